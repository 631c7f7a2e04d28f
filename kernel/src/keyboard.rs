//! Keyboard scancode ring buffer feeding the `keyboard` syscall.
//!
//! Grounded on the teacher's `filesystem/devfs.rs` `Devfs::push_scancode`
//! ring-buffer pattern, adapted to the spec's contract (§4.6): pushed on
//! every exception entry from IRQ1, popped by the `keyboard` syscall which
//! returns -1 when empty. A full ring is a hard assertion per §4.6.

use crate::config::KEYBOARD_RING_CAPACITY;
use conquer_once::spin::OnceCell;
use crossbeam_queue::ArrayQueue;
use pc_keyboard::{layouts::Us104Key, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;
use x86_64::instructions::port::Port;

static RING: OnceCell<ArrayQueue<i64>> = OnceCell::uninit();
static DECODER: OnceCell<Mutex<Keyboard<Us104Key, ScancodeSet1>>> = OnceCell::uninit();

pub fn init() {
    RING.init_once(|| ArrayQueue::new(KEYBOARD_RING_CAPACITY));
    DECODER.init_once(|| {
        Mutex::new(Keyboard::new(
            ScancodeSet1::new(),
            Us104Key,
            HandleControl::Ignore,
        ))
    });
}

/// Called from the IRQ1 handler: reads the scancode off the controller,
/// decodes full key events, and pushes the ASCII byte (or -1 sentinel
/// handling happens in the syscall, not here) onto the ring.
pub fn on_interrupt() {
    let mut port = Port::<u8>::new(0x60);
    let scancode = unsafe { port.read() };

    let ring = RING.get().expect("keyboard::init must run first");
    let mut decoder = DECODER.get().expect("keyboard::init must run first").lock();

    if let Ok(Some(event)) = decoder.add_byte(scancode) {
        if let Some(key) = decoder.process_keyevent(event) {
            if let pc_keyboard::DecodedKey::Unicode(ch) = key {
                assert!(!ring.is_full(), "keyboard ring buffer overflow");
                let _ = ring.push(ch as i64);
            }
        }
    }
}

/// Pops the oldest buffered key, or -1 if the ring is empty (`keyboard` syscall).
pub fn pop() -> i64 {
    RING.get()
        .and_then(|ring| ring.pop())
        .unwrap_or(-1)
}
