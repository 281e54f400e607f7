//! # Simulated RAM
//!
//! The kernel direct-maps all of RAM, so a physical address is all it needs
//! to reach any byte. [`PhysicalMemory`] provides exactly that: a block of
//! page-aligned frames addressed from `KERNBASE` upwards.
//!
//! Frames are handed out as `&mut` through [`PhysMapper`]. Like real memory,
//! nothing here prevents two CPUs from touching the same frame; exclusivity
//! comes from the allocator and the page-table ownership rules.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use kernel_info::memory::KERNBASE;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_vmem::PhysMapper;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

pub struct PhysicalMemory {
    base: PhysicalAddress,
    frames: Box<[Frame]>,
}

// Safety: frames are plain bytes; access discipline is the callers'.
unsafe impl Sync for PhysicalMemory {}
unsafe impl Send for PhysicalMemory {}

impl PhysicalMemory {
    /// Zeroed RAM of `bytes` (rounded down to whole frames) at `KERNBASE`.
    #[must_use]
    pub fn new(bytes: u64) -> Self {
        let n = usize::try_from(bytes / PAGE_SIZE).unwrap_or(usize::MAX);
        let frames = (0..n)
            .map(|_| Frame(UnsafeCell::new([0; PAGE_SIZE as usize])))
            .collect();
        Self {
            base: PhysicalAddress::new(KERNBASE),
            frames,
        }
    }

    /// First byte of RAM.
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.base
    }

    /// One past the last byte of RAM.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.frames.len() as u64 * PAGE_SIZE
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.start() && pa < self.end()
    }

    /// Frame at index `i` from the start of RAM.
    #[must_use]
    pub fn page(&self, i: usize) -> PhysicalPage {
        PhysicalPage::from_addr(self.base + i as u64 * PAGE_SIZE)
    }

    fn ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        assert!(self.contains(pa), "phys_to_mut: {pa} outside RAM");
        let idx = ((pa - self.base) / PAGE_SIZE) as usize;
        let frame = self.frames[idx].0.get().cast::<u8>();
        // SAFETY: offset stays within the frame.
        unsafe { frame.add(pa.page_offset() as usize) }
    }
}

impl PhysMapper for PhysicalMemory {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.ptr(pa).cast::<T>();
        debug_assert!(ptr.is_aligned(), "phys_to_mut: {pa} misaligned");
        // SAFETY: in bounds; the caller vouches for type and exclusivity.
        unsafe { &mut *ptr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_start_at_kernbase() {
        let ram = PhysicalMemory::new(4 * PAGE_SIZE);
        assert_eq!(ram.start().as_u64(), KERNBASE);
        assert_eq!(ram.end().as_u64(), KERNBASE + 4 * PAGE_SIZE);
        assert!(ram.contains(ram.page(3).base()));
        assert!(!ram.contains(ram.end()));
    }

    #[test]
    fn bytes_are_reachable_by_physical_address() {
        let ram = PhysicalMemory::new(2 * PAGE_SIZE);
        let pa = ram.start() + PAGE_SIZE + 8;
        unsafe {
            *ram.phys_to_mut::<u64>(pa) = 0xdead_beef;
            assert_eq!(ram.phys_to_mut::<[u8; 4096]>(ram.page(1).base())[8], 0xef);
        }
    }

    #[test]
    #[should_panic(expected = "outside RAM")]
    fn outside_ram_is_fatal() {
        let ram = PhysicalMemory::new(PAGE_SIZE);
        let _ = unsafe { ram.phys_to_mut::<u8>(ram.end()) };
    }
}
