//! # Address Space (Sv39, three-level)
//!
//! A handle to one page-table tree plus the operations the kernel performs on
//! it. The handle is `Copy`; the tree itself lives in physical frames and is
//! identified by its root frame, which is what process control blocks store.
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] descends the tree and optionally creates missing
//!   interior tables.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] install and remove leaf
//!   mappings. Remapping a valid entry or unmapping a hole is a kernel bug
//!   and panics.
//! - [`AddressSpace::grow`] / [`AddressSpace::shrink`] move the top of a
//!   process image.
//! - [`AddressSpace::copy_to`] duplicates an image for fork, eagerly or
//!   copy-on-write; [`AddressSpace::resolve_cow_fault`] completes a deferred
//!   copy.
//! - [`AddressSpace::copy_in`], [`AddressSpace::copy_out`] and
//!   [`AddressSpace::copy_in_str`] move bytes across the user/kernel boundary.

mod fork;
mod user_copy;

pub use fork::CopyStrategy;

use crate::{FrameAlloc, PageEntryBits, PhysMapper, VmError, frame_bytes, get_table};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, is_page_aligned, round_up,
};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

impl<M: PhysMapper> Clone for AddressSpace<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper> Copy for AddressSpace<'_, M> {}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View an existing tree rooted at `root`.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    /// Create an empty tree (no mappings at all).
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the root frame cannot be allocated.
    pub fn create(mapper: &'m M, alloc: &dyn FrameAlloc) -> Result<Self, VmError> {
        let root = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
        unsafe { get_table(mapper, root).zero() };
        Ok(Self { root, mapper })
    }

    /// Physical frame of the root table.
    #[inline]
    pub const fn root(&self) -> PhysicalPage {
        self.root
    }

    /// The `satp` value that activates this space (Sv39 mode).
    #[inline]
    #[must_use]
    pub const fn satp(&self) -> u64 {
        (8 << 60) | self.root.ppn()
    }

    /// Return the leaf-level entry for `va`.
    ///
    /// With `alloc`, missing interior tables are allocated and zeroed on the
    /// way down. Returns `None` if `va` is not below `MAXVA`, if an interior
    /// table is missing and `alloc` is `None`, or if allocation fails.
    pub fn walk(
        &self,
        va: VirtualAddress,
        alloc: Option<&dyn FrameAlloc>,
    ) -> Option<&'m mut PageEntryBits> {
        if !va.is_valid() {
            return None;
        }

        let mut table = unsafe { get_table(self.mapper, self.root) };
        for level in [2, 1] {
            let pte = table.entry_mut(va.table_index(level));
            if pte.valid() {
                table = unsafe { get_table(self.mapper, pte.page()) };
            } else {
                let next = alloc?.alloc_4k()?;
                let t = unsafe { get_table(self.mapper, next) };
                t.zero();
                *pte = PageEntryBits::table(next);
                table = t;
            }
        }
        Some(table.entry_mut(va.table_index(0)))
    }

    /// Leaf entry for `va` without creating anything.
    #[inline]
    pub fn lookup(&self, va: VirtualAddress) -> Option<&'m mut PageEntryBits> {
        self.walk(va, None)
    }

    /// Map `[va, va + size)` to the physical range starting at `pa`.
    ///
    /// Neither `va` nor `size` need to be page aligned; every page touched by
    /// the range is mapped.
    ///
    /// # Errors
    /// [`VmError::OutOfRange`] past `MAXVA`, [`VmError::OutOfMemory`] if an
    /// interior table cannot be allocated. Pages mapped before the failure
    /// stay mapped.
    ///
    /// # Panics
    /// If any page in the range is already mapped.
    pub fn map(
        &self,
        alloc: &dyn FrameAlloc,
        va: VirtualAddress,
        size: u64,
        pa: PhysicalAddress,
        perm: PageEntryBits,
    ) -> Result<(), VmError> {
        assert!(size > 0, "mappages: size");
        let mut a = va.page().base();
        let last = va
            .as_u64()
            .checked_add(size - 1)
            .ok_or(VmError::OutOfRange(va))?;
        let last = VirtualAddress::new(last).page().base();
        let mut frame = pa.page();
        loop {
            if !a.is_valid() {
                return Err(VmError::OutOfRange(a));
            }
            let pte = self.walk(a, Some(alloc)).ok_or(VmError::OutOfMemory)?;
            assert!(!pte.valid(), "remap of {a}");
            *pte = PageEntryBits::leaf(frame, perm);
            if a == last {
                return Ok(());
            }
            a += PAGE_SIZE;
            frame = frame.step(1);
        }
    }

    /// Remove `npages` leaf mappings starting at the page-aligned `va`.
    ///
    /// With `release`, each mapped frame loses one reference.
    ///
    /// # Panics
    /// If `va` is unaligned or any page in the range is missing, invalid or
    /// not a leaf.
    pub fn unmap(&self, va: VirtualAddress, npages: u64, release: Option<&dyn FrameAlloc>) {
        assert!(is_page_aligned(va.as_u64()), "uvmunmap: not aligned");
        for i in 0..npages {
            let a = va + i * PAGE_SIZE;
            let Some(pte) = self.lookup(a) else {
                panic!("uvmunmap: walk {a}");
            };
            assert!(pte.valid(), "uvmunmap: not mapped {a}");
            assert!(pte.is_leaf(), "uvmunmap: not a leaf {a}");
            if let Some(alloc) = release {
                alloc.free_4k(pte.page());
            }
            pte.clear();
        }
    }

    /// Load `code` into a fresh page at address 0, for the very first process.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if no frame is available.
    ///
    /// # Panics
    /// If `code` does not fit into one page.
    pub fn load_initial(&self, alloc: &dyn FrameAlloc, code: &[u8]) -> Result<(), VmError> {
        assert!((code.len() as u64) < PAGE_SIZE, "inituvm: more than a page");
        let page = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
        let bytes = unsafe { frame_bytes(self.mapper, page) };
        bytes.fill(0);
        bytes[..code.len()].copy_from_slice(code);
        if let Err(e) = self.map(
            alloc,
            VirtualAddress::zero(),
            PAGE_SIZE,
            page.base(),
            PageEntryBits::USER_RWX,
        ) {
            alloc.free_4k(page);
            return Err(e);
        }
        Ok(())
    }

    /// Grow a process image from `old_size` to `new_size` bytes.
    ///
    /// New pages are zeroed and mapped user read/write/execute. Shrinking
    /// requests are returned unchanged.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] or [`VmError::OutOfRange`]. Every frame
    /// allocated by this call is released before returning.
    pub fn grow(&self, alloc: &dyn FrameAlloc, old_size: u64, new_size: u64) -> Result<u64, VmError> {
        if new_size < old_size {
            return Ok(old_size);
        }

        let perm = PageEntryBits::USER_RWX;
        let mut a = round_up(old_size);
        while a < new_size {
            let Some(page) = alloc.alloc_4k() else {
                self.shrink(alloc, a, old_size);
                return Err(VmError::OutOfMemory);
            };
            unsafe { frame_bytes(self.mapper, page) }.fill(0);
            if let Err(e) = self.map(alloc, VirtualAddress::new(a), PAGE_SIZE, page.base(), perm) {
                alloc.free_4k(page);
                self.shrink(alloc, a, old_size);
                return Err(e);
            }
            a += PAGE_SIZE;
        }
        Ok(new_size)
    }

    /// Shrink a process image from `old_size` to `new_size` bytes, releasing
    /// whole pages above the new top. Returns the new size.
    ///
    /// A `new_size` at or above `old_size` is a no-op.
    pub fn shrink(&self, alloc: &dyn FrameAlloc, old_size: u64, new_size: u64) -> u64 {
        if new_size >= old_size {
            return old_size;
        }

        let (lo, hi) = (round_up(new_size), round_up(old_size));
        if lo < hi {
            self.unmap(VirtualAddress::new(lo), (hi - lo) / PAGE_SIZE, Some(alloc));
        }
        new_size
    }

    /// Free every interior table of the tree, including the root.
    ///
    /// # Panics
    /// If a leaf mapping is still present; unmap user memory first.
    pub fn free_walk(self, alloc: &dyn FrameAlloc) {
        Self::free_table(self.mapper, alloc, self.root);
    }

    fn free_table(mapper: &M, alloc: &dyn FrameAlloc, page: PhysicalPage) {
        let table = unsafe { get_table(mapper, page) };
        for pte in table.iter_mut() {
            if !pte.valid() {
                continue;
            }
            assert!(!pte.is_leaf(), "freewalk: leaf");
            Self::free_table(mapper, alloc, pte.page());
            pte.clear();
        }
        alloc.free_4k(page);
    }

    /// Release `size` bytes of user memory starting at 0, then the tree.
    pub fn destroy(self, alloc: &dyn FrameAlloc, size: u64) {
        if size > 0 {
            self.unmap(VirtualAddress::zero(), round_up(size) / PAGE_SIZE, Some(alloc));
        }
        self.free_walk(alloc);
    }

    /// Translate a user virtual address.
    ///
    /// Returns `None` if `va` is out of range, unmapped, or not user
    /// accessible.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let pte = self.lookup(va)?;
        if !pte.valid() || !pte.user() {
            return None;
        }
        Some(pte.page().join(va.page_offset()))
    }

    /// Revoke user access to the page at `va`; used for the stack guard.
    ///
    /// # Panics
    /// If no leaf entry exists for `va`.
    pub fn clear_user(&self, va: VirtualAddress) {
        let Some(pte) = self.lookup(va) else {
            panic!("uvmclear {va}");
        };
        pte.set_user(false);
    }

    /// Check a user-mode access the way the MMU would.
    ///
    /// Returns the physical address on success or `None` where hardware
    /// would raise a page fault.
    #[must_use]
    pub fn probe(&self, va: VirtualAddress, write: bool) -> Option<PhysicalAddress> {
        let pte = self.lookup(va)?;
        if !pte.valid() || !pte.user() || !pte.readable() || (write && !pte.writable()) {
            return None;
        }
        Some(pte.page().join(va.page_offset()))
    }

    /// Borrow the bytes of the frame holding `pa`.
    pub(crate) fn frame_of(&self, pa: PhysicalAddress) -> &'m mut [u8; PAGE_SIZE as usize] {
        unsafe { frame_bytes(self.mapper, pa.page()) }
    }
}
