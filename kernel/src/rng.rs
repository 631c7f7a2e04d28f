//! Entropy shim. The startup entropy collector is out of scope (SPEC_FULL.md §1):
//! it hands the kernel a single opaque 32-bit seed, and this module turns that
//! seed into a stream via xorshift64, mirroring the role of `srand`/`rand` in
//! `lib/lib.h`.

use conquer_once::spin::OnceCell;
use spin::Mutex;

static GLOBAL: OnceCell<Mutex<XorShiftRng>> = OnceCell::uninit();

/// Seeds the kernel-wide generator, e.g. from a boot-time `rdtsc` reading.
/// Backs the `getrandom` syscall and per-file key/IV generation.
pub fn init(seed: u32) {
    GLOBAL.init_once(|| Mutex::new(XorShiftRng::new(seed)));
}

pub fn global() -> &'static Mutex<XorShiftRng> {
    GLOBAL.get().expect("rng::init must run before rng::global() is used")
}

pub trait Rng {
    fn next_u32(&mut self) -> u32;

    fn fill(&mut self, buf: &mut [u8]) {
        let mut i = 0;
        while i < buf.len() {
            let word = self.next_u32().to_le_bytes();
            let n = core::cmp::min(4, buf.len() - i);
            buf[i..i + n].copy_from_slice(&word[..n]);
            i += n;
        }
    }
}

pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    pub fn new(seed: u32) -> XorShiftRng {
        // xorshift64 requires a nonzero state.
        let state = if seed == 0 { 0xDEAD_BEEF } else { seed as u64 };
        XorShiftRng { state }
    }
}

impl Rng for XorShiftRng {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_produces_same_stream() {
        let mut a = XorShiftRng::new(42);
        let mut b = XorShiftRng::new(42);
        for _ in 0..8 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn stream_is_not_constant() {
        let mut rng = XorShiftRng::new(1);
        let first = rng.next_u32();
        let second = rng.next_u32();
        assert_ne!(first, second);
    }

    #[test]
    fn zero_seed_does_not_stall() {
        let mut rng = XorShiftRng::new(0);
        assert_ne!(rng.next_u32(), 0);
    }
}
