//! Per-CPU page frame allocator with copy-on-write reference counts.

use crate::{AllocError, BootCpu, CpuIdentity, PhysicalMemory};
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, round_up};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};

/// Fill pattern for frames on a free list.
pub const FREE_JUNK: u8 = 1;

/// Fill pattern for freshly allocated frames.
pub const ALLOC_JUNK: u8 = 5;

/// Head of one CPU's free list; the links live inside the free frames.
#[derive(Debug, Default)]
struct FreeList {
    head: Option<PhysicalPage>,
    len: usize,
}

pub struct PageAllocator<C = BootCpu> {
    ram: Arc<PhysicalMemory>,
    /// First managed frame.
    start: PhysicalPage,
    /// End of managed memory (exclusive).
    end: PhysicalAddress,
    lists: Box<[SpinLock<FreeList>]>,
    refs: Box<[SpinLock<u8>]>,
    cpus: C,
}

impl<C: CpuIdentity> PageAllocator<C> {
    /// Manage all of `ram` above `kernel_end`, split across `ncpu` lists.
    ///
    /// Every frame starts on the list of the CPU running the constructor.
    pub fn new(ram: Arc<PhysicalMemory>, kernel_end: PhysicalAddress, ncpu: usize, cpus: C) -> Self {
        assert!(ncpu > 0, "kinit: no cpus");
        let start = PhysicalPage::from_addr(PhysicalAddress::new(round_up(kernel_end.as_u64())));
        let end = ram.end();
        let frames = if start.base() < end {
            ((end - start.base()) / PAGE_SIZE) as usize
        } else {
            0
        };

        let this = Self {
            lists: (0..ncpu).map(|_| SpinLock::new(FreeList::default())).collect(),
            // Start at one so the initial free below drops each to zero.
            refs: (0..frames).map(|_| SpinLock::new(1)).collect(),
            ram,
            start,
            end,
            cpus,
        };
        for i in 0..frames {
            this.free_page(start.step(i as u64));
        }

        log::info!("kinit: {frames} frames in {}..{}", start.base(), end);
        this
    }

    /// Take one frame, filled with [`ALLOC_JUNK`] and holding one reference.
    ///
    /// Tries the calling CPU's list, then every other CPU's list in turn.
    /// Returns `None` when all lists are empty.
    pub fn allocate_page(&self) -> Option<PhysicalPage> {
        let n = self.lists.len();
        let me = self.cpus.current() % n;
        let page = (0..n).find_map(|i| self.pop((me + i) % n))?;

        {
            let mut count = self.refs[self.index(page)].lock();
            assert_eq!(*count, 0, "kalloc: {page} on free list with references");
            *count = 1;
        }
        self.fill(page, ALLOC_JUNK);
        Some(page)
    }

    /// [`allocate_page`](Self::allocate_page) as a `Result`.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when no frame is free.
    pub fn try_allocate_page(&self) -> Result<PhysicalPage, AllocError> {
        self.allocate_page().ok_or(AllocError::OutOfMemory)
    }

    /// Drop one reference to `page`; at zero the frame is poisoned with
    /// [`FREE_JUNK`] and pushed onto the calling CPU's list.
    ///
    /// # Panics
    /// If `page` is outside the managed range or not allocated.
    pub fn free_page(&self, page: PhysicalPage) {
        self.decrement_ref(page);
    }

    /// Add a reference to an allocated frame.
    ///
    /// # Panics
    /// If `page` is not allocated, or the count would overflow.
    pub fn increment_ref(&self, page: PhysicalPage) {
        let idx = self.checked_index(page, "increment_ref");
        let mut count = self.refs[idx].lock();
        assert!(*count > 0, "increment_ref: {page} is free");
        *count = count
            .checked_add(1)
            .unwrap_or_else(|| panic!("increment_ref: {page} refcount overflow"));
    }

    /// Drop a reference; returns the frame to a free list at zero.
    ///
    /// # Panics
    /// If `page` is outside the managed range or not allocated.
    pub fn decrement_ref(&self, page: PhysicalPage) {
        let idx = self.checked_index(page, "kfree");
        {
            let mut count = self.refs[idx].lock();
            assert!(*count > 0, "kfree: {page} is not allocated");
            *count -= 1;
            if *count > 0 {
                return;
            }
        }

        self.fill(page, FREE_JUNK);
        let cpu = self.cpus.current() % self.lists.len();
        let mut list = self.lists[cpu].lock();
        self.set_link(page, list.head);
        list.head = Some(page);
        list.len += 1;
    }

    /// Current reference count of `page` (0 when free).
    #[must_use]
    pub fn ref_count(&self, page: PhysicalPage) -> u8 {
        *self.refs[self.checked_index(page, "ref_count")].lock()
    }

    /// Number of free frames across all CPUs.
    ///
    /// Lists are sampled one at a time, so the value is only exact when no
    /// allocation is in flight.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.lists.iter().map(|l| l.lock().len).sum()
    }

    /// Free memory in bytes.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_pages() as u64 * PAGE_SIZE
    }

    /// Free frames on one CPU's list.
    #[must_use]
    pub fn free_pages_on(&self, cpu: usize) -> usize {
        self.lists[cpu].lock().len
    }

    /// Total frames under management.
    #[must_use]
    pub fn managed_pages(&self) -> usize {
        self.refs.len()
    }

    /// The RAM this allocator carves up.
    #[must_use]
    pub fn memory(&self) -> &PhysicalMemory {
        &self.ram
    }

    fn pop(&self, cpu: usize) -> Option<PhysicalPage> {
        let mut list = self.lists[cpu].lock();
        let page = list.head?;
        list.head = self.link(page);
        list.len -= 1;
        Some(page)
    }

    fn checked_index(&self, page: PhysicalPage, what: &str) -> usize {
        let pa = page.base();
        assert!(
            pa >= self.start.base() && pa < self.end,
            "{what}: {pa} outside managed memory"
        );
        self.index(page)
    }

    fn index(&self, page: PhysicalPage) -> usize {
        ((page.base() - self.start.base()) / PAGE_SIZE) as usize
    }

    fn fill(&self, page: PhysicalPage, byte: u8) {
        // SAFETY: the caller owns `page` exclusively (just popped or freed).
        unsafe { self.ram.phys_to_mut::<[u8; PAGE_SIZE as usize]>(page.base()) }.fill(byte);
    }

    fn link(&self, page: PhysicalPage) -> Option<PhysicalPage> {
        // SAFETY: free frames hold their successor in the first word.
        let next = unsafe { *self.ram.phys_to_mut::<u64>(page.base()) };
        (next != 0).then(|| PhysicalPage::from_addr(PhysicalAddress::new(next)))
    }

    fn set_link(&self, page: PhysicalPage, next: Option<PhysicalPage>) {
        // SAFETY: as in `link`.
        unsafe {
            *self.ram.phys_to_mut::<u64>(page.base()) = next.map_or(0, |p| p.base().as_u64());
        }
    }
}

impl<C: CpuIdentity> FrameAlloc for PageAllocator<C> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        self.allocate_page()
    }

    fn free_4k(&self, page: PhysicalPage) {
        self.decrement_ref(page);
    }

    fn share_4k(&self, page: PhysicalPage) {
        self.increment_ref(page);
    }
}
