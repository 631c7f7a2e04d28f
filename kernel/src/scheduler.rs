//! Round-robin scheduler (§4.6): no kernel-thread context switching, no
//! separate per-process kernel stacks — every trap runs on the one kernel
//! stack, and "switching" a process means overwriting the live trap frame
//! with a different process's saved registers and loading its page table
//! root into `CR3`.
//!
//! This replaces the teacher's `Thread`/`Context`/naked-asm `switch_to`
//! machinery entirely: that exists to switch between *kernel* execution
//! contexts sharing one address space, whereas this spec's processes are
//! full user address spaces reached only through `int $N` trap gates
//! (`syscall::trap`), so there is nothing to switch but the saved register
//! file and `CR3` (§5: one logical execution context resumed at a time,
//! cooperative plus timer-preemptive).

use crate::process::{self, ProcessState, ProcessTable};
use crate::syscall::trap::Registers;
use x86_64::registers::control::{Cr3, Cr3Flags};

/// Kernel stack the idle process (PID 0) runs on; `next_runnable` never
/// selects PID 0, so this is only ever resumed as the scheduler's fallback
/// when nothing else is runnable.
const IDLE_STACK_SIZE: usize = 4096 * 4;
static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];

extern "C" fn idle_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Prepares PID 0's descriptor as the permanent idle context: kernel-mode
/// registers parked at `idle_loop`, running on the kernel's own page table.
/// Must run after `process::init()` and `memory::init()`.
pub fn init_idle() {
    let mut table = process::table().lock();
    let stack_top = unsafe { (&raw const IDLE_STACK as u64) + IDLE_STACK_SIZE as u64 };
    let idle = table.get_mut(0).expect("slot 0 always exists");
    idle.state = ProcessState::Runnable;
    idle.root = Some(crate::memory::kernel_root());
    let mut regs = Registers::default();
    regs.rip = idle_loop as u64;
    regs.rsp = stack_top;
    regs.cs = crate::gdt::kernel_code_selector().0 as u64;
    regs.ss = crate::gdt::kernel_data_selector().0 as u64;
    regs.rflags = 0x202;
    idle.registers = regs;
}

/// Advances `table.current` to the next runnable PID after the current one,
/// or to the idle process (PID 0) if nothing else is runnable.
pub fn pick_next(table: &mut ProcessTable) {
    table.current = table.next_runnable(table.current).unwrap_or(0);
}

/// Loads `table.current`'s saved registers into the live trap frame and
/// switches `CR3` to its root. Called at the tail of every trap continuation
/// (timer, syscall, page fault) so every exit path resumes whichever process
/// is now current, uniformly.
pub fn resume(regs: &mut Registers) {
    let table = process::table().lock();
    let current = table.get(table.current).expect("current PID always valid");
    *regs = current.registers;
    if let Some(root) = current.root {
        unsafe {
            Cr3::write(root, Cr3Flags::empty());
        }
    }
}

/// Saves the live trap frame into the current process's descriptor. Called
/// before any operation that might read or mutate process state out from
/// under the caller (a syscall that inspects or forks its own registers).
pub fn checkpoint(table: &mut ProcessTable, regs: &Registers) {
    if let Ok(proc) = table.get_mut(table.current) {
        proc.registers = *regs;
    }
}

/// Timer IRQ continuation: the interrupted process keeps its `Runnable`
/// state (preemption, not a voluntary yield), just advance the cursor.
pub fn on_timer_tick(regs: &mut Registers) {
    let mut table = process::table().lock();
    checkpoint(&mut table, regs);
    pick_next(&mut table);
    drop(table);
    resume(regs);
}

/// Page fault continuation: user-mode faults kill the faulting process
/// (§4.6/§7's "broken" transition); kernel-mode faults are kernel-fatal.
pub fn on_page_fault(regs: &mut Registers, _error_code: u64) {
    let from_user = regs.cs as u16 & 0x3 == 3;
    if !from_user {
        panic!("kernel-mode page fault at rip={:#x}", regs.rip);
    }

    let mut table = process::table().lock();
    checkpoint(&mut table, regs);
    let pid = table.current;
    let _ = process::kill(&mut table, pid);
    pick_next(&mut table);
    drop(table);
    resume(regs);
}
