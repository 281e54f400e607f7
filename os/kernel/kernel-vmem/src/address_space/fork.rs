//! Duplicating an address space for `fork`, and completing deferred copies.

use super::AddressSpace;
use crate::{FrameAlloc, PageEntryBits, PhysMapper, VmError, frame_bytes};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, round_down};

/// How [`AddressSpace::copy_to`] duplicates user memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Allocate a fresh frame for every page and copy its bytes.
    Eager,
    /// Share every frame read-only and copy on the first write fault.
    #[default]
    CopyOnWrite,
}

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Duplicate the first `size` bytes of this address space into `dst`.
    ///
    /// With [`CopyStrategy::CopyOnWrite`] every source leaf is downgraded to
    /// read-only with the COW marker set, the same frame is mapped into `dst`
    /// with identical permissions, and the frame gains a reference.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`]. Everything already installed in `dst` is
    /// unmapped and released again; source entries that were downgraded stay
    /// COW-marked, which only costs a copy on the next write.
    ///
    /// # Panics
    /// If a page below `size` is not mapped in the source.
    pub fn copy_to(
        &self,
        dst: &Self,
        alloc: &dyn FrameAlloc,
        size: u64,
        strategy: CopyStrategy,
    ) -> Result<(), VmError> {
        let mut va = 0;
        while va < size {
            let a = VirtualAddress::new(va);
            let Some(pte) = self.lookup(a) else {
                panic!("uvmcopy: pte should exist at {a}");
            };
            assert!(pte.valid(), "uvmcopy: page not present at {a}");

            let copied = match strategy {
                CopyStrategy::Eager => Self::copy_page_eager(self.mapper, dst, alloc, a, *pte),
                CopyStrategy::CopyOnWrite => {
                    pte.set_writable(false);
                    pte.set_cow(true);
                    let shared = *pte;
                    dst.map(alloc, a, PAGE_SIZE, shared.page().base(), shared.flags())
                        .map(|()| alloc.share_4k(shared.page()))
                }
            };

            if let Err(e) = copied {
                dst.unmap(VirtualAddress::zero(), va / PAGE_SIZE, Some(alloc));
                return Err(e);
            }
            va += PAGE_SIZE;
        }
        Ok(())
    }

    fn copy_page_eager(
        mapper: &M,
        dst: &Self,
        alloc: &dyn FrameAlloc,
        va: VirtualAddress,
        pte: PageEntryBits,
    ) -> Result<(), VmError> {
        let page = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
        unsafe {
            frame_bytes(mapper, page).copy_from_slice(frame_bytes(mapper, pte.page()));
        }
        dst.map(alloc, va, PAGE_SIZE, page.base(), pte.flags())
            .inspect_err(|_| alloc.free_4k(page))
    }

    /// Make the page containing `va` privately writable, copying it if it is
    /// a shared copy-on-write frame. Returns the physical address for `va`.
    ///
    /// Only this address space's entry changes; other spaces mapping the old
    /// frame keep their mapping and the frame keeps their references.
    ///
    /// # Errors
    /// - [`VmError::OutOfRange`] / [`VmError::NotMapped`] if there is nothing
    ///   to fault in.
    /// - [`VmError::AccessDenied`] for kernel-only pages and for read-only
    ///   pages without the COW marker.
    /// - [`VmError::OutOfMemory`] if the private copy cannot be allocated.
    pub fn resolve_cow_fault(
        &self,
        alloc: &dyn FrameAlloc,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, VmError> {
        if !va.is_valid() {
            return Err(VmError::OutOfRange(va));
        }
        let pte = self
            .lookup(va)
            .filter(|pte| pte.valid())
            .ok_or(VmError::NotMapped(va))?;
        if !pte.user() {
            return Err(VmError::AccessDenied(va));
        }
        if pte.writable() {
            return Ok(pte.page().join(va.page_offset()));
        }
        if !pte.cow() {
            return Err(VmError::AccessDenied(va));
        }

        let old = pte.page();
        let new = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
        unsafe {
            frame_bytes(self.mapper, new).copy_from_slice(frame_bytes(self.mapper, old));
        }
        let perm = pte.flags().with_writable(true).with_cow(false);
        *pte = PageEntryBits::leaf(new, perm);
        alloc.free_4k(old);

        log::trace!(
            "cow fault at {}: {} -> {}",
            VirtualAddress::new(round_down(va.as_u64())),
            old,
            new
        );
        Ok(new.join(va.page_offset()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestFrames, TestPhys};

    fn image<'a>(phys: &'a TestPhys, frames: &TestFrames, pages: u64) -> AddressSpace<'a, TestPhys> {
        let space = AddressSpace::create(phys, frames).unwrap();
        space.grow(frames, 0, pages * PAGE_SIZE).unwrap();
        for p in 0..pages {
            let byte = [0xa0 + p as u8];
            space.copy_out(frames, VirtualAddress::new(p * PAGE_SIZE), &byte).unwrap();
        }
        space
    }

    fn read_byte(space: &AddressSpace<'_, TestPhys>, va: u64) -> u8 {
        let mut b = [0u8];
        space.copy_in(&mut b, VirtualAddress::new(va)).unwrap();
        b[0]
    }

    #[test]
    fn eager_copy_is_independent() {
        let phys = TestPhys::with_frames(32);
        let frames = TestFrames::new(&phys);
        let parent = image(&phys, &frames, 2);
        let child = AddressSpace::create(&phys, &frames).unwrap();

        parent.copy_to(&child, &frames, 2 * PAGE_SIZE, CopyStrategy::Eager).unwrap();
        child.copy_out(&frames, VirtualAddress::new(PAGE_SIZE), &[0x11]).unwrap();

        assert_eq!(read_byte(&parent, PAGE_SIZE), 0xa1);
        assert_eq!(read_byte(&child, PAGE_SIZE), 0x11);
        assert_ne!(
            parent.translate(VirtualAddress::zero()),
            child.translate(VirtualAddress::zero())
        );
    }

    #[test]
    fn cow_copy_shares_until_first_write() {
        let phys = TestPhys::with_frames(32);
        let frames = TestFrames::new(&phys);
        let parent = image(&phys, &frames, 1);
        let child = AddressSpace::create(&phys, &frames).unwrap();

        parent.copy_to(&child, &frames, PAGE_SIZE, CopyStrategy::CopyOnWrite).unwrap();
        let shared = parent.translate(VirtualAddress::zero()).unwrap();
        assert_eq!(child.translate(VirtualAddress::zero()), Some(shared));
        assert_eq!(frames.refs(shared.page()), 2);
        assert!(parent.probe(VirtualAddress::zero(), true).is_none());

        // child writes: gets a private copy, parent keeps the original
        child.copy_out(&frames, VirtualAddress::zero(), &[0x55]).unwrap();
        assert_eq!(read_byte(&child, 0), 0x55);
        assert_eq!(read_byte(&parent, 0), 0xa0);
        assert_eq!(frames.refs(shared.page()), 1);

        // parent writes: still marked COW, copies once more and frees the original
        let before = frames.free_count();
        parent.copy_out(&frames, VirtualAddress::zero(), &[0x66]).unwrap();
        assert_eq!(frames.refs(shared.page()), 0);
        assert_eq!(frames.free_count(), before);
        assert_eq!(read_byte(&child, 0), 0x55);
        assert_eq!(read_byte(&parent, 0), 0x66);
    }

    #[test]
    fn write_to_plain_read_only_page_is_denied() {
        let phys = TestPhys::with_frames(16);
        let frames = TestFrames::new(&phys);
        let space = AddressSpace::create(&phys, &frames).unwrap();
        let frame = frames.alloc_4k().unwrap();
        space
            .map(&frames, VirtualAddress::zero(), PAGE_SIZE, frame.base(), PageEntryBits::READ | PageEntryBits::USER)
            .unwrap();
        assert_eq!(
            space.resolve_cow_fault(&frames, VirtualAddress::new(8)),
            Err(VmError::AccessDenied(VirtualAddress::new(8)))
        );
        assert_eq!(
            space.copy_out(&frames, VirtualAddress::zero(), &[1]),
            Err(VmError::AccessDenied(VirtualAddress::zero()))
        );
    }

    #[test]
    fn failed_copy_releases_partial_destination() {
        let phys = TestPhys::with_frames(12);
        let frames = TestFrames::new(&phys);
        let parent = image(&phys, &frames, 4);
        let child = AddressSpace::create(&phys, &frames).unwrap();
        let before = frames.free_count();

        let err = parent.copy_to(&child, &frames, 4 * PAGE_SIZE, CopyStrategy::Eager).unwrap_err();
        assert_eq!(err, VmError::OutOfMemory);
        assert!(child.translate(VirtualAddress::zero()).is_none());
        // only the child's interior tables stay allocated
        assert_eq!(frames.free_count(), before - 2);
    }
}
