//! Physical frame table: one entry per 4 KiB frame, tracking ownership and a
//! refcount. Grounded on `examples/original_source/kernel/kernel.c`'s
//! `pageinfo[]`/`page_alloc` (rotating-cursor linear scan, mandatory
//! zero-on-alloc, `owner`/`refcount` tagging) re-expressed as a safe
//! `FrameAllocator`/`FrameDeallocator` in the shape of the teacher's
//! `memory.rs` `PhysicalMemoryManager`.

use crate::error::{KernelError, KernelResult};
use alloc::vec;
use alloc::vec::Vec;
use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::PhysAddr;

/// Tag on a physical frame: free, reserved (console/MMIO/below kernel base),
/// kernel (code/data/heap/page tables), or owned by a live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Free,
    Reserved,
    Kernel,
    Process(u32),
}

#[derive(Debug, Clone, Copy)]
struct FrameInfo {
    owner: Owner,
    refcount: u8,
}

impl FrameInfo {
    const fn free() -> FrameInfo {
        FrameInfo {
            owner: Owner::Free,
            refcount: 0,
        }
    }
}

/// Maps physical memory to kernel-addressable virtual memory once, via the
/// bootloader's `physical_memory` mapping, so frame contents can be zeroed or
/// copied without ever switching `CR3`.
pub struct FrameTable {
    infos: Vec<FrameInfo>,
    phys_offset: u64,
    cursor: usize,
}

impl FrameTable {
    /// Builds the table from the bootloader's memory map. Every frame not
    /// marked `Usable` (below the kernel base, MMIO holes, bootloader-reclaimable
    /// regions we don't trust yet) starts out `Reserved` and is never handed out.
    pub fn init(memory_regions: &MemoryRegions, phys_offset: u64) -> FrameTable {
        let highest = memory_regions.iter().map(|r| r.end).max().unwrap_or(0);
        let frame_count = (highest / crate::config::BLOCK_SIZE as u64) as usize;
        let mut infos = vec![FrameInfo::free(); frame_count];

        for region in memory_regions.iter() {
            if region.kind != MemoryRegionKind::Usable {
                let start = (region.start / crate::config::BLOCK_SIZE as u64) as usize;
                let end = (region.end / crate::config::BLOCK_SIZE as u64) as usize;
                for info in infos[start..end.min(infos.len())].iter_mut() {
                    info.owner = Owner::Reserved;
                }
            }
        }

        FrameTable {
            infos,
            phys_offset,
            cursor: 0,
        }
    }

    pub fn phys_offset(&self) -> u64 {
        self.phys_offset
    }

    fn zero_frame(&self, frame: PhysFrame<Size4KiB>) {
        let va = self.phys_offset + frame.start_address().as_u64();
        unsafe {
            core::ptr::write_bytes(va as *mut u8, 0, Size4KiB::SIZE as usize);
        }
    }

    /// Linear scan from a rotating cursor for a free frame; zeroes it (to
    /// prevent information leaks across owners) and assigns it to `owner`.
    pub fn alloc(&mut self, owner: Owner) -> KernelResult<PhysFrame<Size4KiB>> {
        let total = self.infos.len();
        for _ in 0..total {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % total;
            if self.infos[idx].owner == Owner::Free {
                self.infos[idx].owner = owner;
                self.infos[idx].refcount = 1;
                let frame = PhysFrame::containing_address(PhysAddr::new(
                    idx as u64 * crate::config::BLOCK_SIZE as u64,
                ));
                self.zero_frame(frame);
                return Ok(frame);
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Assigns a specific, already-known-free frame (used when the caller
    /// needs a particular physical address, e.g. identity-mapping the kernel).
    pub fn assign(&mut self, frame: PhysFrame<Size4KiB>, owner: Owner) -> KernelResult<()> {
        let idx = (frame.start_address().as_u64() / crate::config::BLOCK_SIZE as u64) as usize;
        let info = self.infos.get_mut(idx).ok_or(KernelError::InvalidArg)?;
        if info.owner != Owner::Free {
            return Err(KernelError::InvalidArg);
        }
        info.owner = owner;
        info.refcount = 1;
        Ok(())
    }

    pub fn owner(&self, frame: PhysFrame<Size4KiB>) -> Owner {
        let idx = (frame.start_address().as_u64() / crate::config::BLOCK_SIZE as u64) as usize;
        self.infos.get(idx).map(|i| i.owner).unwrap_or(Owner::Reserved)
    }

    /// Releases every frame owned by `pid` back to free with refcount reset.
    /// Called on process teardown (`kill`/`exit`).
    pub fn release_process(&mut self, pid: u32) {
        for info in self.infos.iter_mut() {
            if info.owner == Owner::Process(pid) {
                *info = FrameInfo::free();
            }
        }
    }

    /// `refcount(f) == 0 <=> owner(f) == Free` by construction: every mutator
    /// above keeps the two fields in lockstep. Exposed for tests.
    #[cfg(test)]
    fn refcount(&self, frame: PhysFrame<Size4KiB>) -> u8 {
        let idx = (frame.start_address().as_u64() / crate::config::BLOCK_SIZE as u64) as usize;
        self.infos[idx].refcount
    }
}

unsafe impl FrameAllocator<Size4KiB> for FrameTable {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.alloc(Owner::Kernel).ok()
    }
}

impl FrameDeallocator<Size4KiB> for FrameTable {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        let idx = (frame.start_address().as_u64() / crate::config::BLOCK_SIZE as u64) as usize;
        if let Some(info) = self.infos.get_mut(idx) {
            *info = FrameInfo::free();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_of(frame_count: usize) -> FrameTable {
        FrameTable {
            infos: vec![FrameInfo::free(); frame_count],
            phys_offset: 0,
            cursor: 0,
        }
    }

    #[test]
    fn alloc_marks_owner_and_refcount() {
        let mut table = table_of(4);
        let frame = table.alloc(Owner::Process(3)).unwrap();
        assert_eq!(table.owner(frame), Owner::Process(3));
        assert_eq!(table.refcount(frame), 1);
    }

    #[test]
    fn release_process_frees_only_its_frames() {
        let mut table = table_of(4);
        let a = table.alloc(Owner::Process(1)).unwrap();
        let _b = table.alloc(Owner::Process(2)).unwrap();
        table.release_process(1);
        assert_eq!(table.owner(a), Owner::Free);
        assert_eq!(table.refcount(a), 0);
    }

    #[test]
    fn reserved_frames_are_never_allocated() {
        let mut table = table_of(2);
        table.infos[0].owner = Owner::Reserved;
        let frame = table.alloc(Owner::Kernel).unwrap();
        assert_eq!(frame.start_address().as_u64(), crate::config::BLOCK_SIZE as u64);
    }

    #[test]
    fn out_of_memory_when_all_frames_taken() {
        let mut table = table_of(1);
        table.alloc(Owner::Kernel).unwrap();
        assert_eq!(table.alloc(Owner::Kernel), Err(KernelError::OutOfMemory));
    }

    #[test]
    fn assign_rejects_non_free_frame() {
        let mut table = table_of(1);
        let frame = table.alloc(Owner::Kernel).unwrap();
        assert_eq!(table.assign(frame, Owner::Reserved), Err(KernelError::InvalidArg));
    }
}
