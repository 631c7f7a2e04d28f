//! Process table: fixed array of descriptors indexed by PID, with `fork`,
//! `exec`, `wait`, `forget`, `exit`, `kill` (§4.5).
//!
//! Grounded on `examples/original_source/kernel/kernel.c`'s `ptable[]`/`process_t`
//! (fixed-size array, PID 0 reserved) and `k-loader.c`'s `program_load`, with the
//! ownership/teardown machinery re-expressed through `memory::frame::FrameTable`
//! and `memory::vmm` instead of raw pointer walks.

pub mod elf;

use crate::config::{ARGV_VA, MAX_FDS, NPROC, USER_STACK_SIZE, USER_STACK_TOP};
use crate::error::{KernelError, KernelResult};
use crate::memory::frame::Owner;
use crate::memory::{self, vmm};
use crate::syscall::trap::Registers;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use conquer_once::spin::OnceCell;
use spin::Mutex;
use x86_64::structures::paging::{PageTableFlags, PhysFrame, Size4KiB};
use x86_64::VirtAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,
    Runnable,
    Blocked,
    Broken,
}

#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub fd: u32,
    pub inode: u32,
    pub offset: u64,
}

pub struct Process {
    pub state: ProcessState,
    pub registers: Registers,
    pub root: Option<PhysFrame<Size4KiB>>,
    pub parent: u32,
    pub blocked_on: Option<u32>,
    pub exit_slot_va: Option<u64>,
    pub exit_code: i64,
    pub cwd: String,
    pub fds: Vec<FileDescriptor>,
    pub next_fd: u32,
}

impl Process {
    fn free() -> Process {
        Process {
            state: ProcessState::Free,
            registers: Registers::default(),
            root: None,
            parent: 0,
            blocked_on: None,
            exit_slot_va: None,
            exit_code: 0,
            cwd: String::new(),
            fds: Vec::new(),
            next_fd: 0,
        }
    }
}

pub struct ProcessTable {
    procs: Vec<Process>,
    /// Slot index of the process the current trap frame belongs to. 0 means
    /// "no process scheduled yet" (the boot context).
    pub current: u32,
}

static TABLE: OnceCell<Mutex<ProcessTable>> = OnceCell::uninit();

pub fn init() {
    let mut procs = Vec::with_capacity(NPROC);
    for _ in 0..NPROC {
        procs.push(Process::free());
    }
    TABLE.init_once(|| Mutex::new(ProcessTable { procs, current: 0 }));
}

pub fn table() -> &'static Mutex<ProcessTable> {
    TABLE.get().expect("process::init must run first")
}

impl ProcessTable {
    fn alloc_slot(&mut self) -> KernelResult<u32> {
        for pid in 1..self.procs.len() {
            if self.procs[pid].state == ProcessState::Free {
                return Ok(pid as u32);
            }
        }
        Err(KernelError::NoSuchProcess)
    }

    pub fn get(&self, pid: u32) -> KernelResult<&Process> {
        self.procs.get(pid as usize).ok_or(KernelError::NoSuchProcess)
    }

    pub fn get_mut(&mut self, pid: u32) -> KernelResult<&mut Process> {
        self.procs.get_mut(pid as usize).ok_or(KernelError::NoSuchProcess)
    }

    /// Next runnable PID after `after`, wrapping around, for the round-robin
    /// scheduler. `None` if nothing is runnable.
    pub fn next_runnable(&self, after: u32) -> Option<u32> {
        let n = self.procs.len() as u32;
        for step in 1..=n {
            let pid = (after + step) % n;
            if pid == 0 {
                continue;
            }
            if self.procs[pid as usize].state == ProcessState::Runnable {
                return Some(pid);
            }
        }
        None
    }
}

/// Builds a fresh address space shared with the kernel's own mappings, loads
/// an ELF image's `PT_LOAD` segments, maps a user stack and the argv page.
/// Shared by process creation (`spawn_initial`/`fork`'s post-copy reset) and
/// `execv`.
fn load_image(root: PhysFrame<Size4KiB>, pid: u32, image: &[u8], argv: &[&str]) -> KernelResult<(u64, u64)> {
    let elf = elf::parse(image)?;
    let frames_lock = memory::frames();
    let mut frames = frames_lock.lock();

    for segment in &elf.segments {
        let page_start = segment.vaddr & !(crate::config::BLOCK_SIZE as u64 - 1);
        let page_end = (segment.vaddr + segment.memsz).div_ceil(crate::config::BLOCK_SIZE as u64)
            * crate::config::BLOCK_SIZE as u64;
        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        if segment.writable {
            flags |= PageTableFlags::WRITABLE;
        }

        let mut va = page_start;
        while va < page_end {
            let frame = frames.alloc(Owner::Process(pid))?;
            vmm::map_page(root, VirtAddr::new(va), frame, flags, &mut frames)?;
            va += crate::config::BLOCK_SIZE as u64;
        }

        // Copy [offset, offset+filesz) into the mapped range and zero the
        // remainder up to memsz, via the physical-memory offset (no CR3 swap
        // needed to write a page we just mapped).
        let phys_offset = frames.phys_offset();
        let dest_base = vmm::translate(root, VirtAddr::new(segment.vaddr), phys_offset)
            .ok_or(KernelError::InvalidArg)?;
        let src = image
            .get(segment.offset as usize..(segment.offset + segment.filesz) as usize)
            .ok_or(KernelError::InvalidArg)?;
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), dest_base as *mut u8, src.len());
            if segment.memsz > segment.filesz {
                core::ptr::write_bytes(
                    (dest_base + segment.filesz) as *mut u8,
                    0,
                    (segment.memsz - segment.filesz) as usize,
                );
            }
        }
    }

    // User stack, growing down from USER_STACK_TOP.
    let stack_flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;
    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    let mut va = stack_base;
    while va < USER_STACK_TOP {
        let frame = frames.alloc(Owner::Process(pid))?;
        vmm::map_page(root, VirtAddr::new(va), frame, stack_flags, &mut frames)?;
        va += crate::config::BLOCK_SIZE as u64;
    }

    // Argv page: a pointer array followed by the argument bytes themselves,
    // mirroring the "argc in rdi, argv in rsi, argv[argc] == null" contract (§6).
    let argv_frame = frames.alloc(Owner::Process(pid))?;
    vmm::map_page(
        root,
        VirtAddr::new(ARGV_VA),
        argv_frame,
        PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE,
        &mut frames,
    )?;
    let phys_offset = frames.phys_offset();
    let argv_kernel_ptr = (phys_offset + argv_frame.start_address().as_u64()) as *mut u8;
    let pointer_slots = (argv.len() + 1) * 8;
    let mut write_off = pointer_slots;
    unsafe {
        for (i, arg) in argv.iter().enumerate() {
            let bytes = arg.as_bytes();
            let str_va = ARGV_VA + write_off as u64;
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), argv_kernel_ptr.add(write_off), bytes.len());
            argv_kernel_ptr.add(write_off + bytes.len()).write(0);
            let ptr_slot = (argv_kernel_ptr.add(i * 8)) as *mut u64;
            ptr_slot.write_unaligned(str_va);
            write_off += bytes.len() + 1;
        }
        let null_slot = (argv_kernel_ptr.add(argv.len() * 8)) as *mut u64;
        null_slot.write_unaligned(0);
    }

    Ok((elf.entry, USER_STACK_TOP))
}

fn fresh_registers(entry: u64, stack_top: u64, argc: u64) -> Registers {
    let mut regs = Registers::default();
    regs.rip = entry;
    regs.rsp = stack_top;
    regs.rdi = argc;
    regs.rsi = ARGV_VA;
    regs.cs = crate::gdt::user_code_selector().0 as u64;
    regs.ss = crate::gdt::user_data_selector().0 as u64;
    regs.rflags = 0x202; // interrupts enabled
    regs
}

/// Creates the very first process (PID 1), parented by PID 0 (the kernel),
/// with an already-normalized root cwd. There is no parent address space to
/// fork from, so this builds a fresh one directly.
pub fn spawn_initial(image: &[u8], argv: &[&str]) -> KernelResult<u32> {
    let mut table = table().lock();
    let pid = table.alloc_slot()?;

    let root = {
        let frames_lock = memory::frames();
        let mut frames = frames_lock.lock();
        let root = vmm::new_root(&mut frames)?;
        vmm::share_kernel_entries(root, memory::kernel_root(), frames.phys_offset());
        root
    };

    let (entry, stack_top) = load_image(root, pid, image, argv)?;

    let proc = &mut table.procs[pid as usize];
    proc.state = ProcessState::Runnable;
    proc.registers = fresh_registers(entry, stack_top, argv.len() as u64);
    proc.root = Some(root);
    proc.parent = 0;
    proc.cwd = "/".to_string();
    Ok(pid)
}

/// §4.5 `fork`: deep-copies every process-owned page, shares kernel/console
/// mappings, duplicates register state (child's `rax` becomes 0), and
/// inherits cwd and the open fd list.
pub fn fork(parent_pid: u32) -> KernelResult<u32> {
    let mut table = table().lock();
    let child_pid = table.alloc_slot()?;

    let parent_root = table.get(parent_pid)?.root.ok_or(KernelError::NoSuchProcess)?;

    let child_root = {
        let frames_lock = memory::frames();
        let mut frames = frames_lock.lock();
        let kernel_root = memory::kernel_root();
        let child_root = vmm::new_root(&mut frames)?;
        vmm::share_kernel_entries(child_root, kernel_root, frames.phys_offset());
        vmm::copy_user_mappings(child_root, parent_root, kernel_root, Owner::Process(child_pid), &mut frames)?;
        child_root
    };

    let (mut child_registers, cwd, fds) = {
        let parent = table.get(parent_pid)?;
        (parent.registers, parent.cwd.clone(), parent.fds.clone())
    };
    child_registers.rax = 0;

    let parent_next_fd = {
        let parent = table.get_mut(parent_pid)?;
        parent.registers.rax = child_pid as u64;
        parent.next_fd
    };

    let child = &mut table.procs[child_pid as usize];
    child.state = ProcessState::Runnable;
    child.registers = child_registers;
    child.root = Some(child_root);
    child.parent = parent_pid;
    child.cwd = cwd;
    child.fds = fds;
    child.next_fd = parent_next_fd;

    Ok(child_pid)
}

/// §4.5 `exec`: tears down the old address space wholesale and builds a fresh
/// one via `load_image`, rather than singling out the argv frame to carry
/// across an in-place teardown — the observable result is the same (a new
/// ELF image, a new stack, a new argv page) without needing a special case
/// for one physical frame.
pub fn execv(pid: u32, image: &[u8], argv: &[&str]) -> KernelResult<()> {
    let mut table = table().lock();
    {
        let frames_lock = memory::frames();
        let mut frames = frames_lock.lock();
        frames.release_process(pid);
    }

    let new_root = {
        let frames_lock = memory::frames();
        let mut frames = frames_lock.lock();
        let root = vmm::new_root(&mut frames)?;
        vmm::share_kernel_entries(root, memory::kernel_root(), frames.phys_offset());
        root
    };
    let (entry, stack_top) = load_image(new_root, pid, image, argv)?;

    let proc = table.get_mut(pid)?;
    proc.root = Some(new_root);
    proc.registers = fresh_registers(entry, stack_top, argv.len() as u64);
    Ok(())
}

/// §4.5 `kill`: transitions to broken and releases every frame the process owns.
pub fn kill(table: &mut ProcessTable, pid: u32) -> KernelResult<()> {
    {
        let frames_lock = memory::frames();
        let mut frames = frames_lock.lock();
        frames.release_process(pid);
    }
    let proc = table.get_mut(pid)?;
    proc.state = ProcessState::Broken;
    Ok(())
}

/// §4.5 `exit`: records the exit code, kills the process, and — if its
/// parent is blocked waiting specifically on this PID — fulfills the wait
/// atomically within this same call (§5's rendezvous ordering guarantee).
pub fn exit(table: &mut ProcessTable, pid: u32, code: i64) -> KernelResult<()> {
    let parent_pid = table.get(pid)?.parent;
    {
        let proc = table.get_mut(pid)?;
        proc.exit_code = code;
    }
    kill(table, pid)?;

    if let Ok(parent) = table.get(parent_pid) {
        if parent.state == ProcessState::Blocked && parent.blocked_on == Some(pid) {
            let slot_va = parent.exit_slot_va;
            let parent_root = parent.root;
            if let (Some(slot_va), Some(parent_root)) = (slot_va, parent_root) {
                let phys_offset = memory::phys_offset();
                if let Some(ptr) = vmm::translate(parent_root, VirtAddr::new(slot_va), phys_offset) {
                    unsafe {
                        (ptr as *mut i64).write_unaligned(code);
                    }
                }
            }
            let parent = table.get_mut(parent_pid)?;
            parent.state = ProcessState::Runnable;
            parent.blocked_on = None;
            parent.exit_slot_va = None;
        }
    }
    Ok(())
}

/// §4.5 `wait`: if the child is already broken, resolves immediately with its
/// exit code written to `exit_slot_va`; otherwise blocks the caller.
/// `child_pid == 0` here means "any child" is not modeled — the spec's table
/// takes an explicit PID.
pub fn wait(table: &mut ProcessTable, caller_pid: u32, child_pid: u32, exit_slot_va: u64) -> KernelResult<i64> {
    let child = table.get(child_pid)?;
    if child.parent != caller_pid {
        return Err(KernelError::NoSuchProcess);
    }

    if child.state == ProcessState::Broken {
        let code = child.exit_code;
        let caller_root = table.get(caller_pid)?.root.ok_or(KernelError::NoSuchProcess)?;
        let phys_offset = memory::phys_offset();
        if let Some(ptr) = vmm::translate(caller_root, VirtAddr::new(exit_slot_va), phys_offset) {
            unsafe {
                (ptr as *mut i64).write_unaligned(code);
            }
        }
        return Ok(0);
    }

    let caller = table.get_mut(caller_pid)?;
    caller.state = ProcessState::Blocked;
    caller.blocked_on = Some(child_pid);
    caller.exit_slot_va = Some(exit_slot_va);
    Ok(0)
}

/// §4.5 `forget`: a broken child parented by the caller becomes free.
pub fn forget(table: &mut ProcessTable, caller_pid: u32, child_pid: u32) -> KernelResult<()> {
    let child = table.get(child_pid)?;
    if child.parent != caller_pid || child.state != ProcessState::Broken {
        return Err(KernelError::NoSuchProcess);
    }
    table.procs[child_pid as usize] = Process::free();
    Ok(())
}

/// Allocates the next fd value and records it with the given inode (`open`).
pub fn open_fd(proc: &mut Process, inode: u32) -> KernelResult<u32> {
    if proc.fds.len() >= MAX_FDS {
        return Err(KernelError::NoSpace);
    }
    let fd = proc.next_fd;
    proc.next_fd += 1;
    proc.fds.push(FileDescriptor { fd, inode, offset: 0 });
    Ok(fd)
}

pub fn find_fd(proc: &mut Process, fd: u32) -> KernelResult<&mut FileDescriptor> {
    proc.fds.iter_mut().find(|d| d.fd == fd).ok_or(KernelError::InvalidArg)
}
