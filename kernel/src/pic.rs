//! Legacy 8259 PIC remap plus an 8253/8254 PIT driving the timer interrupt.
//!
//! The PIC remap routine is reused verbatim in spirit from the teacher's
//! `apic/mod.rs` inner `mod pic` (ICW sequence, port addresses), but this
//! kernel drives IRQ0 off the PIT (mode-3 square wave at `HZ` from the
//! original `kernel.c`) instead of an APIC LVT timer, since a single
//! cooperative-plus-preemptive core has no need for IOAPIC redirection or a
//! second CPU's LAPIC.

use x86_64::instructions::port::Port;

const ICW1_ICW4: u8 = 0x01;
const ICW1_INIT: u8 = 0x10;
const ICW4_8086: u8 = 0x01;
const CASCADE_IRQ: u8 = 2;

/// Vector offset for IRQ0 (timer); IRQ1 (keyboard) lands at `PIC1_OFFSET + 1`.
pub const PIC1_OFFSET: u8 = 0x20;
pub const PIC2_OFFSET: u8 = 0x28;

pub const TIMER_VECTOR: u8 = PIC1_OFFSET;
pub const KEYBOARD_VECTOR: u8 = PIC1_OFFSET + 1;

struct Pic {
    command: Port<u8>,
    data: Port<u8>,
}

/// Remaps both PICs so their vectors don't collide with CPU exceptions, then
/// unmasks only IRQ0 (timer) and IRQ1 (keyboard).
pub fn init() {
    let mut pic1 = Pic {
        command: Port::new(0x20),
        data: Port::new(0x21),
    };
    let mut pic2 = Pic {
        command: Port::new(0xA0),
        data: Port::new(0xA1),
    };
    let mut wait = Port::<u8>::new(0x80);

    unsafe {
        pic1.command.write(ICW1_INIT | ICW1_ICW4);
        wait.write(0);
        pic2.command.write(ICW1_INIT | ICW1_ICW4);
        wait.write(0);
        pic1.data.write(PIC1_OFFSET);
        wait.write(0);
        pic2.data.write(PIC2_OFFSET);
        wait.write(0);
        pic1.data.write(1 << CASCADE_IRQ);
        wait.write(0);
        pic2.data.write(2);
        wait.write(0);
        pic1.data.write(ICW4_8086);
        wait.write(0);
        pic2.data.write(ICW4_8086);
        wait.write(0);

        // Mask everything except IRQ0 (timer) and IRQ1 (keyboard).
        pic1.data.write(0xFC);
        pic2.data.write(0xFF);
    }

    init_pit(crate::config::TIMER_HZ);
}

/// Programs the PIT (8253/8254) channel 0 for a square wave at `hz`
/// interrupts/sec, mirroring the original kernel's `timer_init(HZ)`.
fn init_pit(hz: u32) {
    const PIT_FREQUENCY: u32 = 1_193_182;
    let divisor = (PIT_FREQUENCY / hz).clamp(1, u16::MAX as u32) as u16;

    let mut command = Port::<u8>::new(0x43);
    let mut channel0 = Port::<u8>::new(0x40);
    unsafe {
        command.write(0x36u8); // channel 0, lo/hi byte, mode 3 (square wave)
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
}

/// Sends end-of-interrupt to one or both PICs, depending on which IRQ fired.
pub fn end_of_interrupt(vector: u8) {
    let mut pic1_command = Port::<u8>::new(0x20);
    let mut pic2_command = Port::<u8>::new(0xA0);
    unsafe {
        if vector >= PIC2_OFFSET {
            pic2_command.write(0x20u8);
        }
        pic1_command.write(0x20u8);
    }
}
