//! Memory management: the physical frame table (§4.1) and the 4-level
//! virtual-memory manager (§4.2), plus kernel heap bootstrap.
//!
//! Grounded on the teacher's `memory.rs` heap bootstrap (`LockedHeap`, fixed
//! `HEAP_START`/`INITIAL_HEAP_SIZE`, mapped before any `Vec`/`Box` use) and on
//! `examples/original_source/kernel/kernel.c`'s `pageinfo[]`/`virtual_memory_map`
//! pair; see `frame.rs`/`vmm.rs` for the per-concern split and DESIGN.md for
//! full citations.

pub mod frame;
pub mod vmm;

use conquer_once::spin::OnceCell;
use frame::{FrameTable, Owner};
use linked_list_allocator::LockedHeap;
use spin::Mutex;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{Page, PageTableFlags, PhysFrame, Size4KiB};
use x86_64::VirtAddr;

pub const HEAP_START: u64 = 0x_4444_4444_0000;
pub const INITIAL_HEAP_SIZE: u64 = 1024 * 1024;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// The single kernel page-table root: the table already active in `CR3` at
/// boot, adopted as-is rather than rebuilt (see `init`). Its top-level
/// entries are copied into every process root at creation
/// (`vmm::share_kernel_entries`), carrying the kernel's code/data mapping and
/// the physical-memory-offset window across every `CR3` switch.
pub static FRAMES: OnceCell<Mutex<FrameTable>> = OnceCell::uninit();
pub static KERNEL_ROOT: OnceCell<PhysFrame<Size4KiB>> = OnceCell::uninit();

pub fn frames() -> &'static Mutex<FrameTable> {
    FRAMES.get().expect("memory::init must run before frames() is used")
}

pub fn kernel_root() -> PhysFrame<Size4KiB> {
    *KERNEL_ROOT.get().expect("memory::init must run before kernel_root() is used")
}

pub fn phys_offset() -> u64 {
    frames().lock().phys_offset()
}

/// Builds the frame table from the bootloader's memory map and brings up the
/// heap. `phys_mem_offset` is the bootloader's offset mapping all of physical
/// memory into kernel virtual space (`Mapping::Dynamic` on `physical_memory`
/// in `BOOTLOADER_CONFIG`, used instead of a recursive slot since per-process
/// roots need to swap `CR3` to arbitrary addresses).
///
/// The kernel root is the table already loaded in `CR3` at this point, not a
/// freshly built one: it is the only table that already carries both the
/// `phys_mem_offset` window and the kernel's own code/data/stack mapping
/// (wherever the bootloader actually placed them), and every trap handler
/// and `vmm` pointer translation depends on both being present regardless of
/// which process's root is current. A new, from-scratch root re-populated by
/// identity-mapping the non-`Usable` regions would map the kernel's physical
/// frames at addresses equal to their physical addresses, which is not where
/// the kernel is actually executing unless that happens to coincide with its
/// real load address — adopting the live table sidesteps needing to know
/// that address at all.
pub fn init(memory_regions: &'static bootloader_api::info::MemoryRegions, phys_mem_offset: u64) {
    let mut table = FrameTable::init(memory_regions, phys_mem_offset);
    let (root, _) = Cr3::read();

    init_heap(root, &mut table);

    FRAMES.init_once(|| Mutex::new(table));
    KERNEL_ROOT.init_once(|| root);
}

fn init_heap(root: PhysFrame<Size4KiB>, table: &mut FrameTable) {
    let heap_start = VirtAddr::new(HEAP_START);
    let heap_end = heap_start + INITIAL_HEAP_SIZE - 1u64;
    let page_range = Page::<Size4KiB>::range_inclusive(
        Page::containing_address(heap_start),
        Page::containing_address(heap_end),
    );
    for page in page_range {
        let frame = table.alloc(Owner::Kernel).expect("failed to allocate heap frame");
        vmm::map_page(
            root,
            page.start_address(),
            frame,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
            table,
        )
        .expect("failed to map heap page");
    }
    unsafe {
        ALLOCATOR
            .lock()
            .init(heap_start.as_mut_ptr(), INITIAL_HEAP_SIZE as usize);
    }
}
