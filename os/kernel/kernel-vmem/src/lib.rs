//! # Virtual Memory Support
//!
//! Sv39 paging for the kernel and for user processes.
//!
//! ## What you get
//! - [`PageEntryBits`]: a bitfield view of one Sv39 page-table entry, including
//!   the software copy-on-write marker.
//! - [`PageTable`]: a 4 KiB-aligned table of 512 entries.
//! - [`AddressSpace`]: walk, map, unmap, grow, shrink, copy (eager or
//!   copy-on-write), COW fault resolution, translation and the user/kernel copy
//!   helpers.
//! - [`kernel_map`]: construction of the kernel's direct-mapped page table.
//! - Two seams to the rest of the kernel: [`FrameAlloc`] hands out frames,
//!   [`PhysMapper`] turns a physical address into something dereferenceable.
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L2   |  L1   |  L0   | Offset |
//! ```
//!
//! ```text
//!  root (L2) → L1 → L0 → 4 KiB frame
//! ```
//!
//! An entry with `V` set and none of `R`/`W`/`X` points to the next table; an
//! entry with any of them set is a leaf. This kernel only creates 4 KiB
//! leaves, so every leaf lives in an L0 table.
//!
//! ## Ownership
//!
//! Interior tables are owned by the address space that links them and are
//! freed by [`AddressSpace::free_walk`]. Leaf frames are owned by the address
//! space too, except for copy-on-write frames (shared, reference counted by
//! the [`FrameAlloc`]) and the trampoline (never freed).

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod error;
pub mod kernel_map;
mod page_entry_bits;
mod page_table;

#[cfg(test)]
mod test_support;

pub use crate::address_space::{AddressSpace, CopyStrategy};
pub use crate::error::VmError;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::PageTable;
pub use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Source of physical 4 KiB frames for page tables and user memory.
///
/// Frames are reference counted so that copy-on-write mappings can share
/// them: [`alloc_4k`](Self::alloc_4k) hands out a frame with one reference,
/// [`share_4k`](Self::share_4k) adds one, [`free_4k`](Self::free_4k) drops one
/// and returns the frame to the pool when none remain.
pub trait FrameAlloc {
    /// Allocate one frame. Returns `None` when physical memory is exhausted.
    fn alloc_4k(&self) -> Option<PhysicalPage>;

    /// Drop one reference to `page`.
    fn free_4k(&self, page: PhysicalPage);

    /// Add a reference to an allocated `page`.
    fn share_4k(&self, page: PhysicalPage);
}

/// Converts physical addresses to usable references in the kernel's own
/// address space (RAM is direct-mapped).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must lie in RAM and be suitably aligned for `T`.
    /// - The bytes at `pa` must be a valid `T`.
    /// - The caller must not create overlapping mutable references that are
    ///   used at the same time.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Borrow the page table stored in frame `page`.
///
/// # Safety
/// `page` must hold a page table (or be about to be initialized as one).
#[inline]
unsafe fn get_table<'a, M: PhysMapper>(m: &M, page: PhysicalPage) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(page.base()) }
}

/// Borrow the raw bytes of frame `page`.
///
/// # Safety
/// `page` must be a RAM frame not concurrently mutated through another path.
#[inline]
unsafe fn frame_bytes<'a, M: PhysMapper>(m: &M, page: PhysicalPage) -> &'a mut [u8; PAGE_SIZE as usize] {
    unsafe { m.phys_to_mut::<[u8; PAGE_SIZE as usize]>(page.base()) }
}
