//! Syscall vector assignment (§6): `int $N` software interrupts, one-based
//! offset from base vector 48 in the source's own declaration order.
//! `vector(n) = 48 + n + 1`, except `panic` which uses the base vector
//! itself. Not load-bearing numerically, only stable within a build.

#![allow(dead_code)]

pub const PANIC: u8 = 48;
pub const READ: u8 = 49;
pub const WRITE: u8 = 50;
pub const OPEN: u8 = 51;
pub const CLOSE: u8 = 52;
pub const STAT: u8 = 53; // unused
pub const FSTAT: u8 = 54; // unused
pub const FORGET: u8 = 56;
pub const WAIT: u8 = 57;
pub const KEYBOARD: u8 = 58;
pub const PAGE_ALLOC: u8 = 59;
pub const SCHED_YIELD: u8 = 60;
pub const YIELD: u8 = 60; // alias of SCHED_YIELD
pub const GETPID: u8 = 61;
pub const FORK: u8 = 62;
pub const EXECV: u8 = 63;
pub const EXIT: u8 = 64;
pub const KILL: u8 = 65;
pub const GETCWD: u8 = 66;
pub const CHDIR: u8 = 67;
pub const MKDIR: u8 = 68;
pub const GETRANDOM: u8 = 69;
pub const LISTDIR: u8 = 70;
pub const TOUCH: u8 = 71;
pub const REMOVE: u8 = 72;

/// Lowest and highest vectors this table assigns; used to size the IDT's
/// user-defined-vector range and by the injectivity test below.
pub const FIRST_VECTOR: u8 = PANIC;
pub const LAST_VECTOR: u8 = REMOVE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_injective() {
        let named = [
            ("panic", PANIC),
            ("read", READ),
            ("write", WRITE),
            ("open", OPEN),
            ("close", CLOSE),
            ("stat", STAT),
            ("fstat", FSTAT),
            ("forget", FORGET),
            ("wait", WAIT),
            ("keyboard", KEYBOARD),
            ("page_alloc", PAGE_ALLOC),
            ("sched_yield", SCHED_YIELD),
            ("getpid", GETPID),
            ("fork", FORK),
            ("execv", EXECV),
            ("exit", EXIT),
            ("kill", KILL),
            ("getcwd", GETCWD),
            ("chdir", CHDIR),
            ("mkdir", MKDIR),
            ("getrandom", GETRANDOM),
            ("listdir", LISTDIR),
            ("touch", TOUCH),
            ("remove", REMOVE),
        ];
        // `yield` deliberately aliases `sched_yield`'s vector; skip it when
        // checking pairwise distinctness.
        for i in 0..named.len() {
            for j in (i + 1)..named.len() {
                if named[i].0 == "sched_yield" && named[j].0 == "yield" {
                    continue;
                }
                assert_ne!(
                    named[i].1, named[j].1,
                    "{} and {} share vector {}",
                    named[i].0, named[j].0, named[i].1
                );
            }
        }
    }

    #[test]
    fn every_vector_is_in_range() {
        for &v in &[
            PANIC, READ, WRITE, OPEN, CLOSE, FORGET, WAIT, KEYBOARD, PAGE_ALLOC, SCHED_YIELD,
            GETPID, FORK, EXECV, EXIT, KILL, GETCWD, CHDIR, MKDIR, GETRANDOM, LISTDIR, TOUCH,
            REMOVE,
        ] {
            assert!((FIRST_VECTOR..=LAST_VECTOR).contains(&v));
        }
    }
}
