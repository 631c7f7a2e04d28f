//! Syscall dispatch and the user-pointer marshalling every handler needs.
//!
//! One IDT vector per syscall name (§6), each installed from a distinct
//! naked entry stub generated below — `int $N` never tells a handler which
//! vector fired, so (unlike the teacher's single `syscall`/`sysret` fast
//! path with the number in `rax`) a vector-per-name ABI needs a
//! vector-per-name stub. Every stub funnels into the same `dispatch`, which
//! performs the requested operation, writes its `errno`-or-value result
//! into the calling process's saved `rax`, and resumes whichever process is
//! current afterward — reselecting only on an explicit `yield` or when the
//! operation left the caller no longer runnable (blocked on `wait`, exited,
//! killed), so ordinary syscalls return straight back to the same process.

pub mod numbers;
pub mod trap;

use crate::error::{KernelError, KernelResult};
use crate::memory::frame::Owner;
use crate::memory::{self, vmm};
use crate::process::{self, ProcessState};
use crate::rng::Rng;
use crate::scheduler;
use alloc::string::String;
use alloc::vec::Vec;
use core::arch::naked_asm;
use trap::Registers;
use x86_64::structures::paging::{PageTableFlags, PhysFrame, Size4KiB};
use x86_64::VirtAddr;

macro_rules! syscall_stub {
    ($stub_name:ident, $cont_name:ident, $vector:path) => {
        #[unsafe(naked)]
        pub unsafe extern "C" fn $stub_name() {
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
                target = sym $cont_name,
            )
        }

        extern "C" fn $cont_name(regs: *mut Registers) {
            let regs = unsafe { &mut *regs };
            dispatch(regs, $vector);
        }
    };
}

syscall_stub!(read_entry, read_continuation, numbers::READ);
syscall_stub!(write_entry, write_continuation, numbers::WRITE);
syscall_stub!(open_entry, open_continuation, numbers::OPEN);
syscall_stub!(close_entry, close_continuation, numbers::CLOSE);
syscall_stub!(forget_entry, forget_continuation, numbers::FORGET);
syscall_stub!(wait_entry, wait_continuation, numbers::WAIT);
syscall_stub!(keyboard_entry, keyboard_continuation, numbers::KEYBOARD);
syscall_stub!(page_alloc_entry, page_alloc_continuation, numbers::PAGE_ALLOC);
syscall_stub!(sched_yield_entry, sched_yield_continuation, numbers::SCHED_YIELD);
syscall_stub!(getpid_entry, getpid_continuation, numbers::GETPID);
syscall_stub!(fork_entry, fork_continuation, numbers::FORK);
syscall_stub!(execv_entry, execv_continuation, numbers::EXECV);
syscall_stub!(exit_entry, exit_continuation, numbers::EXIT);
syscall_stub!(kill_entry, kill_continuation, numbers::KILL);
syscall_stub!(getcwd_entry, getcwd_continuation, numbers::GETCWD);
syscall_stub!(chdir_entry, chdir_continuation, numbers::CHDIR);
syscall_stub!(mkdir_entry, mkdir_continuation, numbers::MKDIR);
syscall_stub!(getrandom_entry, getrandom_continuation, numbers::GETRANDOM);
syscall_stub!(listdir_entry, listdir_continuation, numbers::LISTDIR);
syscall_stub!(touch_entry, touch_continuation, numbers::TOUCH);
syscall_stub!(remove_entry, remove_continuation, numbers::REMOVE);
syscall_stub!(panic_entry, panic_continuation, numbers::PANIC);

/// One IDT vector/stub pair per installed syscall, for `interrupts::init` to
/// wire up. `yield` deliberately reuses `sched_yield`'s vector and has no
/// stub of its own.
pub fn stubs() -> [(u8, unsafe extern "C" fn()); 22] {
    [
        (numbers::PANIC, panic_entry),
        (numbers::READ, read_entry),
        (numbers::WRITE, write_entry),
        (numbers::OPEN, open_entry),
        (numbers::CLOSE, close_entry),
        (numbers::FORGET, forget_entry),
        (numbers::WAIT, wait_entry),
        (numbers::KEYBOARD, keyboard_entry),
        (numbers::PAGE_ALLOC, page_alloc_entry),
        (numbers::SCHED_YIELD, sched_yield_entry),
        (numbers::GETPID, getpid_entry),
        (numbers::FORK, fork_entry),
        (numbers::EXECV, execv_entry),
        (numbers::EXIT, exit_entry),
        (numbers::KILL, kill_entry),
        (numbers::GETCWD, getcwd_entry),
        (numbers::CHDIR, chdir_entry),
        (numbers::MKDIR, mkdir_entry),
        (numbers::GETRANDOM, getrandom_entry),
        (numbers::LISTDIR, listdir_entry),
        (numbers::TOUCH, touch_entry),
        (numbers::REMOVE, remove_entry),
    ]
}

/// Checkpoints the live trap frame, performs the syscall, writes its
/// `rax`-convention result, and reschedules only if the caller is no longer
/// runnable or explicitly yielded; otherwise resumes the same process.
fn dispatch(regs: &mut Registers, vector: u8) {
    let pid = {
        let mut table = process::table().lock();
        scheduler::checkpoint(&mut table, regs);
        table.current
    };

    let outcome = perform(pid, vector, regs);

    {
        let mut table = process::table().lock();
        if let Ok(proc) = table.get_mut(pid) {
            proc.registers.rax = match outcome {
                Ok(v) => v as u64,
                Err(e) => e.to_errno() as u64,
            };
        }
        let still_runnable = table
            .get(pid)
            .map(|p| p.state == ProcessState::Runnable)
            .unwrap_or(false);
        if vector == numbers::SCHED_YIELD || !still_runnable {
            scheduler::pick_next(&mut table);
        }
    }
    scheduler::resume(regs);
}

fn perform(pid: u32, vector: u8, regs: &Registers) -> KernelResult<i64> {
    match vector {
        numbers::GETPID => Ok(pid as i64),
        numbers::FORK => process::fork(pid).map(|child| child as i64),
        numbers::EXECV => execv(pid, regs),
        numbers::EXIT => {
            let mut table = process::table().lock();
            process::exit(&mut table, pid, regs.rdi as i64).map(|_| 0)
        }
        numbers::KILL => {
            let target = regs.rdi as u32;
            let mut table = process::table().lock();
            process::kill(&mut table, target).map(|_| 0)
        }
        numbers::WAIT => {
            let mut table = process::table().lock();
            process::wait(&mut table, pid, regs.rdi as u32, regs.rsi)
        }
        numbers::FORGET => {
            let mut table = process::table().lock();
            process::forget(&mut table, pid, regs.rdi as u32).map(|_| 0)
        }
        numbers::SCHED_YIELD => Ok(0),
        numbers::KEYBOARD => Ok(crate::keyboard::pop()),
        numbers::PAGE_ALLOC => page_alloc(pid, regs.rdi),
        numbers::GETRANDOM => Ok(crate::rng::global().lock().next_u32() as i64),
        numbers::READ => read(pid, regs),
        numbers::WRITE => write(pid, regs),
        numbers::OPEN => open(pid, regs),
        numbers::CLOSE => close(pid, regs),
        numbers::TOUCH => touch(pid, regs),
        numbers::MKDIR => mkdir(pid, regs),
        numbers::REMOVE => remove_path(pid, regs),
        numbers::LISTDIR => listdir(pid, regs),
        numbers::GETCWD => getcwd(pid, regs),
        numbers::CHDIR => chdir(pid, regs),
        numbers::PANIC => panic!("process {} invoked the panic syscall", pid),
        _ => Err(KernelError::InvalidArg),
    }
}

// --- user pointer marshalling -------------------------------------------

fn user_root(pid: u32) -> KernelResult<PhysFrame<Size4KiB>> {
    process::table().lock().get(pid)?.root.ok_or(KernelError::InvalidArg)
}

fn for_each_user_chunk(
    pid: u32,
    va: u64,
    len: u64,
    mut f: impl FnMut(u64, usize, usize),
) -> KernelResult<()> {
    let root = user_root(pid)?;
    let phys_offset = memory::phys_offset();
    let page_size = crate::config::BLOCK_SIZE as u64;
    let mut remaining = len;
    let mut cur_va = va;
    let mut done = 0usize;
    while remaining > 0 {
        let page_offset = cur_va & (page_size - 1);
        let chunk = core::cmp::min(remaining, page_size - page_offset);
        let ptr = vmm::translate(root, VirtAddr::new(cur_va), phys_offset).ok_or(KernelError::InvalidArg)?;
        f(ptr, done, chunk as usize);
        cur_va += chunk;
        remaining -= chunk;
        done += chunk as usize;
    }
    Ok(())
}

fn copy_in_from_user(pid: u32, va: u64, len: usize) -> KernelResult<Vec<u8>> {
    let mut buf = alloc::vec![0u8; len];
    for_each_user_chunk(pid, va, len as u64, |ptr, off, chunk| unsafe {
        core::ptr::copy_nonoverlapping(ptr as *const u8, buf.as_mut_ptr().add(off), chunk);
    })?;
    Ok(buf)
}

fn copy_out_to_user(pid: u32, va: u64, data: &[u8]) -> KernelResult<()> {
    for_each_user_chunk(pid, va, data.len() as u64, |ptr, off, chunk| unsafe {
        core::ptr::copy_nonoverlapping(data.as_ptr().add(off), ptr as *mut u8, chunk);
    })
}

fn read_user_cstr(pid: u32, va: u64, max_len: usize) -> KernelResult<String> {
    let root = user_root(pid)?;
    let phys_offset = memory::phys_offset();
    let mut bytes = Vec::new();
    let mut addr = va;
    for _ in 0..max_len {
        let ptr = vmm::translate(root, VirtAddr::new(addr), phys_offset).ok_or(KernelError::InvalidArg)?;
        let byte = unsafe { *(ptr as *const u8) };
        if byte == 0 {
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArg);
        }
        bytes.push(byte);
        addr += 1;
    }
    Err(KernelError::NameTooLong)
}

// --- process syscalls ----------------------------------------------------

fn execv(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw_path = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let cwd = process::table().lock().get(pid)?.cwd.clone();
    let path = crate::fs::path::normalize(&cwd, &raw_path)?;

    let root = user_root(pid)?;
    let phys_offset = memory::phys_offset();
    let mut argv_strings: Vec<String> = Vec::new();
    let mut slot_va = regs.rsi;
    loop {
        let ptr = vmm::translate(root, VirtAddr::new(slot_va), phys_offset).ok_or(KernelError::InvalidArg)?;
        let arg_va = unsafe { (ptr as *const u64).read_unaligned() };
        if arg_va == 0 {
            break;
        }
        argv_strings.push(read_user_cstr(pid, arg_va, crate::config::PATH_MAX)?);
        slot_va += 8;
    }

    let image = {
        let mut fs = crate::fs::fs().lock();
        let attr = fs.getattr(&path)?;
        if attr == 0 {
            return Err(KernelError::NotDirectory);
        }
        let ino = attr as u32;
        let size = fs.read_inode(ino)?.size_bytes;
        let mut image = alloc::vec![0u8; size as usize];
        fs.read(ino, &mut image, 0)?;
        image
    };

    let argv_refs: Vec<&str> = argv_strings.iter().map(|s| s.as_str()).collect();
    process::execv(pid, &image, &argv_refs)?;
    Ok(0)
}

fn page_alloc(pid: u32, va: u64) -> KernelResult<i64> {
    if va % crate::config::BLOCK_SIZE as u64 != 0 {
        return Err(KernelError::InvalidArg);
    }
    let root = user_root(pid)?;
    let frames_lock = memory::frames();
    let mut frames = frames_lock.lock();
    let frame = frames.alloc(Owner::Process(pid))?;
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;
    vmm::map_page(root, VirtAddr::new(va), frame, flags, &mut frames)?;
    Ok(0)
}

// --- filesystem syscalls ---------------------------------------------------

fn read(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let fd = regs.rdi as u32;
    let len = regs.rdx as usize;
    if len > crate::config::IO_MAX {
        return Err(KernelError::InvalidArg);
    }
    let (inode, offset) = {
        let mut table = process::table().lock();
        let proc = table.get_mut(pid)?;
        let entry = process::find_fd(proc, fd)?;
        (entry.inode, entry.offset)
    };
    let mut buf = alloc::vec![0u8; len];
    let n = crate::fs::fs().lock().read(inode, &mut buf, offset)?;
    copy_out_to_user(pid, regs.rsi, &buf[..n])?;

    let mut table = process::table().lock();
    let proc = table.get_mut(pid)?;
    let entry = process::find_fd(proc, fd)?;
    entry.offset += n as u64;
    Ok(n as i64)
}

fn write(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let fd = regs.rdi as u32;
    let len = regs.rdx as usize;
    let buf = copy_in_from_user(pid, regs.rsi, len)?;

    let (inode, offset) = {
        let mut table = process::table().lock();
        let proc = table.get_mut(pid)?;
        let entry = process::find_fd(proc, fd)?;
        (entry.inode, entry.offset)
    };
    let n = {
        let mut rng = crate::rng::global().lock();
        crate::fs::fs().lock().write(inode, &buf, offset, &mut *rng)?
    };

    let mut table = process::table().lock();
    let proc = table.get_mut(pid)?;
    let entry = process::find_fd(proc, fd)?;
    entry.offset += n as u64;
    Ok(n as i64)
}

fn open(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let mut table = process::table().lock();
    let proc = table.get_mut(pid)?;
    let path = crate::fs::path::normalize(&proc.cwd, &raw)?;
    let attr = crate::fs::fs().lock().getattr(&path)?;
    if attr == 0 {
        return Err(KernelError::NotDirectory);
    }
    process::open_fd(proc, attr as u32).map(|fd| fd as i64)
}

fn close(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let fd = regs.rdi as u32;
    let mut table = process::table().lock();
    let proc = table.get_mut(pid)?;
    let before = proc.fds.len();
    proc.fds.retain(|d| d.fd != fd);
    if proc.fds.len() == before {
        return Err(KernelError::InvalidArg);
    }
    Ok(0)
}

fn touch(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let cwd = process::table().lock().get(pid)?.cwd.clone();
    let path = crate::fs::path::normalize(&cwd, &raw)?;
    let mut fs = crate::fs::fs().lock();
    let ino = fs.alloc_inode()?;
    if let Err(e) = fs.touch(&path, ino) {
        let _ = fs.free_inode(ino);
        return Err(e);
    }
    Ok(ino as i64)
}

fn mkdir(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let cwd = process::table().lock().get(pid)?.cwd.clone();
    let path = crate::fs::path::normalize(&cwd, &raw)?;
    crate::fs::fs().lock().touch(&path, 0)?;
    Ok(0)
}

fn remove_path(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let cwd = process::table().lock().get(pid)?.cwd.clone();
    let path = crate::fs::path::normalize(&cwd, &raw)?;
    crate::fs::fs().lock().remove(&path)?;
    Ok(0)
}

/// Writes the children's names into the caller's buffer, one per line
/// (newline-separated, per §6), NUL-terminating the whole listing; truncates
/// at whichever entry would overflow the buffer.
fn listdir(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let cwd = process::table().lock().get(pid)?.cwd.clone();
    let path = crate::fs::path::normalize(&cwd, &raw)?;
    let names = crate::fs::fs().lock().readdir(&path)?;

    let cap = regs.rdx as usize;
    let mut out = Vec::new();
    for name in &names {
        if out.len() + name.len() + 2 > cap {
            break;
        }
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
    }
    out.push(0);
    copy_out_to_user(pid, regs.rsi, &out)?;
    Ok(out.len() as i64)
}

fn getcwd(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let cwd = process::table().lock().get(pid)?.cwd.clone();
    let bytes = cwd.as_bytes();
    if bytes.len() + 1 > regs.rsi as usize {
        return Err(KernelError::NoSpace);
    }
    copy_out_to_user(pid, regs.rdi, bytes)?;
    copy_out_to_user(pid, regs.rdi + bytes.len() as u64, &[0])?;
    Ok(bytes.len() as i64)
}

fn chdir(pid: u32, regs: &Registers) -> KernelResult<i64> {
    let raw = read_user_cstr(pid, regs.rdi, crate::config::PATH_MAX)?;
    let mut table = process::table().lock();
    let proc = table.get_mut(pid)?;
    let path = crate::fs::path::normalize(&proc.cwd, &raw)?;
    let attr = crate::fs::fs().lock().getattr(&path)?;
    if attr != 0 {
        return Err(KernelError::NotDirectory);
    }
    proc.cwd = path;
    Ok(0)
}
