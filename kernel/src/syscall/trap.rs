//! Full-GPR-capturing trap frame, plus the entry stubs for the two hardware
//! IRQs and the page fault exception. The per-syscall-name trap gates (§6)
//! live in `syscall::mod` instead, since each needs to know its own vector
//! at dispatch time; this module only defines the shared `Registers` layout
//! and push/pop sequence they both reuse.
//!
//! Grounded in *style* on the teacher's `scheduler.rs` `switch_to`
//! (`#[unsafe(naked)]`, `core::arch::naked_asm!`, `offset_of!`-computed field
//! offsets), but capturing **all** general-purpose registers instead of only
//! the callee-saved set: the spec requires every trap (not just cooperative
//! yields) to save the full register file so the scheduler can resume a
//! *different* process in the same trap (§4.6/§8), and classic `int $N` trap
//! gates (§6) instead of the teacher's `syscall`/`sysret` fast path, which
//! never exposes caller-saved registers to the handler.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU64, Ordering};

/// Full register file captured on trap entry. Field order matches the stack
/// layout left by the entry stub's push sequence: the GPR block is pushed by
/// software (lowest address first = last pushed = `r15`), and the final five
/// fields alias the frame the CPU itself pushed on entry and consumes again
/// on `iretq` — they are read/written directly, never pushed/popped by the
/// stub.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Registers {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Error code for vectors the CPU pushes one for (page fault, GPF, ...),
/// stashed here by the entry stub before the shared GPR-push sequence so the
/// `Registers` layout stays uniform across every vector.
static LAST_ERROR_CODE: AtomicU64 = AtomicU64::new(0);

pub fn last_error_code() -> u64 {
    LAST_ERROR_CODE.load(Ordering::Relaxed)
}

macro_rules! save_gprs_and_call {
    ($target:ident) => {
        naked_asm!(
            "push rax",
            "push rbx",
            "push rcx",
            "push rdx",
            "push rsi",
            "push rdi",
            "push rbp",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov rdi, rsp",
            "call {target}",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rbp",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rcx",
            "pop rbx",
            "pop rax",
            "iretq",
            target = sym $target,
        )
    };
}

/// Timer IRQ (vector `pic::TIMER_VECTOR`): saves the interrupted process,
/// lets the scheduler pick the next runnable one, overwrites this trap frame
/// with its saved registers.
#[unsafe(naked)]
pub unsafe extern "C" fn timer_entry() {
    save_gprs_and_call!(timer_continuation)
}

/// Keyboard IRQ (vector `pic::KEYBOARD_VECTOR`): pushes the scancode into the
/// keyboard ring, no scheduling decision.
#[unsafe(naked)]
pub unsafe extern "C" fn keyboard_entry() {
    save_gprs_and_call!(keyboard_continuation)
}

/// Page fault: the CPU pushes a 64-bit error code above `rip`. Stash the real
/// `rax` on the stack first, read the error code into `rax` from underneath
/// it, stash that into `LAST_ERROR_CODE`, then restore `rax` and drop the
/// error-code slot — leaving the true `rax` value and a standard iretq frame
/// for the shared GPR-save sequence below, instead of letting the error code
/// overwrite the captured `rax` field.
#[unsafe(naked)]
pub unsafe extern "C" fn page_fault_entry() {
    naked_asm!(
        "push rax",
        "mov rax, [rsp + 8]",
        "mov [{storage}], rax",
        "pop rax",
        "add rsp, 8",
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {target}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        storage = sym LAST_ERROR_CODE,
        target = sym page_fault_continuation,
    )
}

extern "C" fn timer_continuation(regs: *mut Registers) {
    let regs = unsafe { &mut *regs };
    crate::pic::end_of_interrupt(crate::pic::TIMER_VECTOR);
    crate::scheduler::on_timer_tick(regs);
}

extern "C" fn keyboard_continuation(regs: *mut Registers) {
    let _regs = unsafe { &mut *regs };
    crate::keyboard::on_interrupt();
    crate::pic::end_of_interrupt(crate::pic::KEYBOARD_VECTOR);
}

extern "C" fn page_fault_continuation(regs: *mut Registers) {
    let regs = unsafe { &mut *regs };
    let code = last_error_code();
    crate::scheduler::on_page_fault(regs, code);
}
