//! Disk geometry and table capacities in one place instead of scattered literals.

/// Bytes per disk block and per physical/virtual page.
pub const BLOCK_SIZE: usize = 4096;

/// Byte offset of the filesystem region from the start of the disk.
pub const FILESYSTEM_DISK_OFFSET: u64 = 1024 * 512;

/// AES key size in bytes (AES-128).
pub const FS_KEY_SIZE: usize = 16;
/// AES-CTR IV size in bytes.
pub const FS_IV_SIZE: usize = 16;

/// Maximum bytes in one `read`/`write` syscall.
pub const IO_MAX: usize = 1 << 20;

/// Directory entry name capacity, including the NUL terminator.
pub const NAME_SIZE: usize = 32;
/// Maximum children per directory tree node.
pub const MAX_CHILDREN: usize = 32;

/// Default `mkfs` table sizes. Only used by the formatter; a mounted image's own
/// on-disk metadata record is authoritative (SPEC_FULL.md Open Question (a)).
pub const DEFAULT_INODE_COUNT: u32 = 16;
pub const DEFAULT_BLOCK_COUNT: u32 = 16;
pub const DEFAULT_NODE_COUNT: u32 = 16;

/// Maximum live process slots. PID 0 is reserved/unused.
pub const NPROC: usize = 16;

/// Maximum open file descriptors per process.
pub const MAX_FDS: usize = 16;

/// Maximum normalized path length, including the NUL terminator.
pub const PATH_MAX: usize = 256;

/// Timer interrupt frequency in Hz, matching the original kernel's `HZ`.
pub const TIMER_HZ: u32 = 100;

/// Fixed user-space virtual address at which `execv` maps the argv page.
pub const ARGV_VA: u64 = 0x0000_7000_0000_0000;
/// Top of user virtual address space; the user stack grows down from here.
pub const USER_STACK_TOP: u64 = 0x0000_8000_0000_0000;
/// Size of the initial user stack, in bytes.
pub const USER_STACK_SIZE: u64 = 8 * BLOCK_SIZE as u64;

/// Keyboard scancode ring buffer capacity.
pub const KEYBOARD_RING_CAPACITY: usize = 256;
