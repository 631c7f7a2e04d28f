//! IDT setup: CPU exceptions panic the kernel (this is a single-process-at-a-time
//! kernel with no recovery path for a faulting *kernel* context), except the
//! page fault, which routes through the scheduler so a faulting *user*
//! process becomes `broken` instead of halting the machine (§4.6/§7).
//!
//! Interrupts 0x00-0x1F are CPU exceptions, 0x20/0x21 are the PIC's timer and
//! keyboard IRQs (`pic.rs`), and 0x30 upward are the syscall trap gates
//! (`syscall::numbers`), one vector per syscall name.

use lazy_static::lazy_static;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::VirtAddr;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        {
            use exception_handlers::*;

            idt.divide_error.set_handler_fn(divide_error);
            idt.debug.set_handler_fn(debug);
            idt.non_maskable_interrupt.set_handler_fn(non_maskable_interrupt);
            idt.breakpoint.set_handler_fn(breakpoint_handler);
            idt.overflow.set_handler_fn(overflow);
            idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded);
            idt.invalid_opcode.set_handler_fn(invalid_opcode);
            idt.device_not_available.set_handler_fn(device_not_available);

            unsafe {
                idt.double_fault
                    .set_handler_fn(double_fault)
                    .set_stack_index(crate::gdt::DOUBLE_FAULT_IST_INDEX)
            };

            idt.invalid_tss.set_handler_fn(invalid_tss);
            idt.segment_not_present.set_handler_fn(segment_not_present);
            idt.stack_segment_fault.set_handler_fn(stack_segment_fault);
            idt.general_protection_fault.set_handler_fn(general_protection_fault);
            idt.x87_floating_point.set_handler_fn(x87_floating_point);
            idt.alignment_check.set_handler_fn(alignment_check);
            idt.machine_check.set_handler_fn(machine_check);
            idt.simd_floating_point.set_handler_fn(simd_floating_point);
            idt.virtualization.set_handler_fn(virtualization);
        }

        // Page fault needs the full GPR file captured (a user-mode fault kills
        // the process and resumes someone else), so it gets a naked stub like
        // the syscall gates instead of the typed `x86-interrupt` handler above.
        idt.page_fault
            .set_handler_addr(VirtAddr::new(crate::syscall::trap::page_fault_entry as u64));

        idt[crate::pic::TIMER_VECTOR as usize]
            .set_handler_addr(VirtAddr::new(crate::syscall::trap::timer_entry as u64));
        idt[crate::pic::KEYBOARD_VECTOR as usize]
            .set_handler_addr(VirtAddr::new(crate::syscall::trap::keyboard_entry as u64));

        for (vector, stub) in crate::syscall::stubs() {
            idt[vector as usize].set_handler_addr(VirtAddr::new(stub as u64));
        }

        idt
    };
}

pub fn init_idt() {
    IDT.load();
}

pub(super) mod exception_handlers {
    use x86_64::structures::idt::InterruptStackFrame;

    pub(super) extern "x86-interrupt" fn divide_error(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Divide Error");
    }

    pub(super) extern "x86-interrupt" fn debug(_interrupt_stack_frame: InterruptStackFrame) {}

    pub(super) extern "x86-interrupt" fn non_maskable_interrupt(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Non-Maskable Interrupt")
    }

    pub(super) extern "x86-interrupt" fn breakpoint_handler(_interrupt_stack_frame: InterruptStackFrame) {}

    pub(super) extern "x86-interrupt" fn overflow(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Overflow")
    }

    pub(super) extern "x86-interrupt" fn bound_range_exceeded(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Bound Range Exceeded")
    }

    pub(super) extern "x86-interrupt" fn invalid_opcode(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Invalid Opcode")
    }

    pub(super) extern "x86-interrupt" fn device_not_available(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Device Not Available")
    }

    pub(super) extern "x86-interrupt" fn double_fault(
        _interrupt_stack_frame: InterruptStackFrame,
        _error_code: u64,
    ) -> ! {
        panic!("[CPU Exception] Double Fault")
    }

    pub(super) extern "x86-interrupt" fn invalid_tss(_interrupt_stack_frame: InterruptStackFrame, error_code: u64) {
        panic!("[CPU Exception] Invalid TSS {:?}", error_code)
    }

    pub(super) extern "x86-interrupt" fn segment_not_present(
        _interrupt_stack_frame: InterruptStackFrame,
        error_code: u64,
    ) {
        panic!("[CPU Exception] Segment Not Present {:?}", error_code)
    }

    pub(super) extern "x86-interrupt" fn stack_segment_fault(
        _interrupt_stack_frame: InterruptStackFrame,
        error_code: u64,
    ) {
        panic!("[CPU Exception] Stack Segment Fault {:?}", error_code)
    }

    pub(super) extern "x86-interrupt" fn general_protection_fault(
        interrupt_stack_frame: InterruptStackFrame,
        error_code: u64,
    ) {
        panic!(
            "[CPU Exception] General Protection Fault {:?} {:?}",
            error_code, interrupt_stack_frame
        )
    }

    pub(super) extern "x86-interrupt" fn x87_floating_point(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] x87 Floating Point Error")
    }

    pub(super) extern "x86-interrupt" fn alignment_check(
        _interrupt_stack_frame: InterruptStackFrame,
        _error_code: u64,
    ) {
        panic!("[CPU Exception] Alignment Check")
    }

    pub(super) extern "x86-interrupt" fn machine_check(_interrupt_stack_frame: InterruptStackFrame) -> ! {
        panic!("[CPU Exception] Machine Check")
    }

    pub(super) extern "x86-interrupt" fn simd_floating_point(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] SIMD Floating Point Error")
    }

    pub(super) extern "x86-interrupt" fn virtualization(_interrupt_stack_frame: InterruptStackFrame) {
        panic!("[CPU Exception] Virtualization Error")
    }
}
