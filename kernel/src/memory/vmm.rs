//! 4-level page table build/walk/map primitives keyed by `(root, va)`.
//!
//! Grounded on `examples/original_source/kernel/kernel.c`'s
//! `virtual_memory_map`/`virtual_memory_lookup`, translated into a manual
//! walk over `x86_64::structures::paging::PageTable` addressed through the
//! bootloader's fixed physical-memory-offset mapping, rather than the
//! teacher's single global `RecursivePageTable` (per-process roots need to be
//! able to swap `CR3`, which one fixed recursive slot cannot do).

use crate::error::{KernelError, KernelResult};
use crate::memory::frame::{FrameTable, Owner};
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{PageTable, PageTableFlags, PageTableIndex, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

/// Lookup result: the mapped physical frame and the leaf entry's flags.
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub frame: PhysFrame<Size4KiB>,
    pub flags: PageTableFlags,
}

fn table_ptr(frame: PhysFrame<Size4KiB>, phys_offset: u64) -> *mut PageTable {
    (phys_offset + frame.start_address().as_u64()) as *mut PageTable
}

fn table_mut<'a>(frame: PhysFrame<Size4KiB>, phys_offset: u64) -> &'a mut PageTable {
    unsafe { &mut *table_ptr(frame, phys_offset) }
}

fn table_ref<'a>(frame: PhysFrame<Size4KiB>, phys_offset: u64) -> &'a PageTable {
    unsafe { &*table_ptr(frame, phys_offset) }
}

fn indices(va: VirtAddr) -> [PageTableIndex; 4] {
    [va.p4_index(), va.p3_index(), va.p2_index(), va.p1_index()]
}

/// Allocates and zeroes a frame to hold a new page-table page, tracked by the
/// frame table with `Owner::Kernel` (page-table pages are kernel-owned
/// regardless of which process's address space they serve).
fn alloc_table_frame(frames: &mut FrameTable) -> KernelResult<PhysFrame<Size4KiB>> {
    frames.alloc(Owner::Kernel)
}

/// Walks/creates intermediate tables for `va` in the address space rooted at
/// `root`, installing a leaf entry mapping `va` to `pa` with `flags`.
/// Intermediate (non-leaf) entries are always present|writable so permission
/// is enforced only at the leaf, matching the source's `virtual_memory_map`.
pub fn map_page(
    root: PhysFrame<Size4KiB>,
    va: VirtAddr,
    pa: PhysFrame<Size4KiB>,
    flags: PageTableFlags,
    frames: &mut FrameTable,
) -> KernelResult<()> {
    let phys_offset = frames.phys_offset();
    let idx = indices(va);
    let mut table_frame = root;

    for level in 0..3 {
        let table = table_mut(table_frame, phys_offset);
        let entry = &mut table[idx[level]];
        if entry.is_unused() {
            let new_frame = alloc_table_frame(frames)?;
            entry.set_frame(
                new_frame,
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
            );
            table_frame = new_frame;
        } else {
            table_frame = entry.frame().map_err(|_| KernelError::InvalidArg)?;
        }
    }

    let leaf_table = table_mut(table_frame, phys_offset);
    leaf_table[idx[3]].set_frame(pa, flags);
    Ok(())
}

/// Maps `[va, va+len)` a page at a time, zeroing/allocating via `frames`.
/// On any failed walk, the pages mapped so far in this call are left mapped
/// (the caller, e.g. process teardown, releases them via `FrameTable::release_process`).
pub fn map_range(
    root: PhysFrame<Size4KiB>,
    va: VirtAddr,
    pa: PhysFrame<Size4KiB>,
    len: u64,
    flags: PageTableFlags,
    frames: &mut FrameTable,
) -> KernelResult<()> {
    let page_size = crate::config::BLOCK_SIZE as u64;
    let pages = len.div_ceil(page_size);
    for i in 0..pages {
        map_page(
            root,
            va + i * page_size,
            PhysFrame::containing_address(pa.start_address() + i * page_size),
            flags,
            frames,
        )?;
    }
    Ok(())
}

/// Walks the tree for `va`; returns `None` if absent at any level.
pub fn lookup(root: PhysFrame<Size4KiB>, va: VirtAddr, phys_offset: u64) -> Option<Mapping> {
    let idx = indices(va);
    let mut table_frame = root;

    for level in 0..3 {
        let table = table_ref(table_frame, phys_offset);
        let entry: &PageTableEntry = &table[idx[level]];
        if entry.is_unused() {
            return None;
        }
        table_frame = entry.frame().ok()?;
    }

    let leaf_table = table_ref(table_frame, phys_offset);
    let entry = &leaf_table[idx[3]];
    if entry.is_unused() {
        return None;
    }
    Some(Mapping {
        frame: entry.frame().ok()?,
        flags: entry.flags(),
    })
}

/// Translates a virtual address in `root`'s address space to a kernel-visible
/// pointer via the physical-memory offset, for copying data in/out of a
/// process's pages without switching `CR3`.
pub fn translate(root: PhysFrame<Size4KiB>, va: VirtAddr, phys_offset: u64) -> Option<u64> {
    let mapping = lookup(root, va, phys_offset)?;
    let page_offset = va.as_u64() & (crate::config::BLOCK_SIZE as u64 - 1);
    Some(phys_offset + mapping.frame.start_address().as_u64() + page_offset)
}

/// Allocates a fresh, zeroed root page table frame.
pub fn new_root(frames: &mut FrameTable) -> KernelResult<PhysFrame<Size4KiB>> {
    alloc_table_frame(frames)
}

/// Physical address of a fresh root table, for loading `CR3`.
pub fn root_phys_addr(root: PhysFrame<Size4KiB>) -> PhysAddr {
    root.start_address()
}

/// Copies every populated top-level (PML4) entry of `kernel_root` into
/// `dest_root`, so every process address space maps the kernel's own
/// text/data/stack identically (§4.5: "map kernel, kernel stack, console").
/// Per-process user mappings live under PML4 slots the kernel root never
/// populates (user ELF images are assumed, as in the source, to be linked
/// above the kernel's own low-memory footprint), so sharing whole top-level
/// entries here never leaks a process's own pages into another's space.
pub fn share_kernel_entries(dest_root: PhysFrame<Size4KiB>, kernel_root: PhysFrame<Size4KiB>, phys_offset: u64) {
    let kernel_p4 = table_ref(kernel_root, phys_offset);
    let dest_p4 = table_mut(dest_root, phys_offset);
    for i in 0..512u16 {
        let idx = PageTableIndex::new(i);
        let entry = &kernel_p4[idx];
        if entry.is_unused() {
            continue;
        }
        if let Ok(frame) = entry.frame() {
            dest_p4[idx].set_frame(frame, entry.flags());
        }
    }
}

fn virt_addr_from_indices(p4: u16, p3: u16, p2: u16, p1: u16) -> VirtAddr {
    let raw = ((p4 as u64) << 39) | ((p3 as u64) << 30) | ((p2 as u64) << 21) | ((p1 as u64) << 12);
    VirtAddr::new_truncate(raw)
}

/// Deep-copies every leaf page mapped under `src_root` that is *not* part of
/// a top-level entry shared with `kernel_root` (i.e. every page the source
/// process itself owns): a fresh frame tagged `owner` is allocated per page,
/// its contents copied, and the same virtual address re-mapped with the same
/// flags in `dest_root`. Used by `fork` (§4.5, §8's fork invariant).
pub fn copy_user_mappings(
    dest_root: PhysFrame<Size4KiB>,
    src_root: PhysFrame<Size4KiB>,
    kernel_root: PhysFrame<Size4KiB>,
    owner: Owner,
    frames: &mut FrameTable,
) -> KernelResult<()> {
    let phys_offset = frames.phys_offset();

    for p4i in 0u16..512 {
        let p4_idx = PageTableIndex::new(p4i);
        let (p3_frame, shared) = {
            let src_p4 = table_ref(src_root, phys_offset);
            let entry = &src_p4[p4_idx];
            if entry.is_unused() {
                continue;
            }
            let kernel_p4 = table_ref(kernel_root, phys_offset);
            let kentry = &kernel_p4[p4_idx];
            let shared = !kentry.is_unused() && kentry.frame().ok() == entry.frame().ok();
            (entry.frame().map_err(|_| KernelError::InvalidArg)?, shared)
        };
        if shared {
            continue;
        }

        for p3i in 0u16..512 {
            let p3_idx = PageTableIndex::new(p3i);
            let p2_frame = {
                let src_p3 = table_ref(p3_frame, phys_offset);
                let entry = &src_p3[p3_idx];
                if entry.is_unused() {
                    continue;
                }
                entry.frame().map_err(|_| KernelError::InvalidArg)?
            };

            for p2i in 0u16..512 {
                let p2_idx = PageTableIndex::new(p2i);
                let p1_frame = {
                    let src_p2 = table_ref(p2_frame, phys_offset);
                    let entry = &src_p2[p2_idx];
                    if entry.is_unused() {
                        continue;
                    }
                    entry.frame().map_err(|_| KernelError::InvalidArg)?
                };

                for p1i in 0u16..512 {
                    let p1_idx = PageTableIndex::new(p1i);
                    let (frame, flags) = {
                        let src_p1 = table_ref(p1_frame, phys_offset);
                        let entry = &src_p1[p1_idx];
                        if entry.is_unused() {
                            continue;
                        }
                        (entry.frame().map_err(|_| KernelError::InvalidArg)?, entry.flags())
                    };

                    let va = virt_addr_from_indices(p4i, p3i, p2i, p1i);
                    let new_frame = frames.alloc(owner)?;
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            (phys_offset + frame.start_address().as_u64()) as *const u8,
                            (phys_offset + new_frame.start_address().as_u64()) as *mut u8,
                            Size4KiB::SIZE as usize,
                        );
                    }
                    map_page(dest_root, va, new_frame, flags, frames)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::frame::FrameTable;
    use alloc::vec;
    use bootloader_api::info::{MemoryRegion, MemoryRegionKind};

    fn fresh_frames() -> FrameTable {
        // A single usable region big enough for a handful of page tables and
        // data pages in these hosted tests. `phys_offset` is 0 so frame
        // contents can be read directly via their physical address.
        let regions = &[MemoryRegion {
            start: 0,
            end: 64 * crate::config::BLOCK_SIZE as u64,
            kind: MemoryRegionKind::Usable,
        }];
        let regions = unsafe {
            core::mem::transmute::<&[MemoryRegion], &'static bootloader_api::info::MemoryRegions>(
                regions as &[MemoryRegion],
            )
        };
        let _ = vec![0u8; 0]; // keep alloc import used across cfg(test) builds
        FrameTable::init(regions, 0)
    }

    #[test]
    fn map_then_lookup_round_trips() {
        let mut frames = fresh_frames();
        let root = new_root(&mut frames).unwrap();
        let data = frames.alloc(Owner::Process(1)).unwrap();
        let va = VirtAddr::new(0x4000_0000);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;
        map_page(root, va, data, flags, &mut frames).unwrap();

        let mapping = lookup(root, va, frames.phys_offset()).unwrap();
        assert_eq!(mapping.frame, data);
        assert_eq!(mapping.flags, flags);
    }

    #[test]
    fn unmapped_address_is_absent() {
        let mut frames = fresh_frames();
        let root = new_root(&mut frames).unwrap();
        assert!(lookup(root, VirtAddr::new(0x1000), frames.phys_offset()).is_none());
    }
}
