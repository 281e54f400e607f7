//! In-memory "RAM" and a reference-counting frame pool for unit tests.

use crate::{FrameAlloc, PhysMapper};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use std::cell::{RefCell, UnsafeCell};
use std::collections::HashMap;

const BASE: u64 = 0x8000_0000;

/// A 4 KiB-aligned raw frame.
#[repr(align(4096))]
struct Aligned4K(UnsafeCell<[u8; 4096]>);

/// Physical memory simulated as a vector of frames starting at `BASE`.
pub struct TestPhys {
    frames: Vec<Aligned4K>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n).map(|_| Aligned4K(UnsafeCell::new([0; 4096]))).collect(),
        }
    }

    fn pages(&self) -> impl Iterator<Item = PhysicalPage> {
        (0..self.frames.len() as u64)
            .map(|i| PhysicalPage::from_addr(PhysicalAddress::new(BASE + i * PAGE_SIZE)))
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = ((pa.as_u64() - BASE) / PAGE_SIZE) as usize;
        let off = pa.page_offset() as usize;
        let ptr = self.frames[idx].0.get().cast::<u8>();
        unsafe { &mut *ptr.add(off).cast::<T>() }
    }
}

/// Hands out every frame of a [`TestPhys`] and tracks references.
pub struct TestFrames {
    free: RefCell<Vec<PhysicalPage>>,
    refs: RefCell<HashMap<PhysicalPage, u32>>,
}

impl TestFrames {
    pub fn new(phys: &TestPhys) -> Self {
        let mut free: Vec<_> = phys.pages().collect();
        free.reverse();
        Self {
            free: RefCell::new(free),
            refs: RefCell::new(HashMap::new()),
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.borrow().len()
    }

    pub fn refs(&self, page: PhysicalPage) -> u32 {
        self.refs.borrow().get(&page).copied().unwrap_or(0)
    }
}

impl FrameAlloc for TestFrames {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        let page = self.free.borrow_mut().pop()?;
        self.refs.borrow_mut().insert(page, 1);
        Some(page)
    }

    fn free_4k(&self, page: PhysicalPage) {
        let mut refs = self.refs.borrow_mut();
        let count = refs.get_mut(&page).expect("free of unallocated frame");
        assert!(*count > 0, "double free of {page}");
        *count -= 1;
        if *count == 0 {
            refs.remove(&page);
            self.free.borrow_mut().push(page);
        }
    }

    fn share_4k(&self, page: PhysicalPage) {
        *self.refs.borrow_mut().get_mut(&page).expect("share of free frame") += 1;
    }
}
