//! # Memory Layout
//!
//! Physical layout of the QEMU `virt` board, as seen by the kernel:
//!
//! ```text
//! 0x0200_0000  CLINT
//! 0x0C00_0000  PLIC
//! 0x1000_0000  UART0
//! 0x1000_1000  VIRTIO0
//! 0x8000_0000  KERNBASE: kernel text, then data, then free RAM
//!              PHYSTOP: end of RAM
//! ```
//!
//! The kernel direct-maps all of the above. The top of every address space
//! holds the trampoline page; user address spaces place their trap frame
//! directly below it, the kernel address space places one kernel stack per
//! process slot (each with an unmapped guard page) below it.
//!
//! ```text
//! MAXVA      ┌────────────────┐
//!            │   TRAMPOLINE   │  R-X, shared frame
//!            ├────────────────┤
//!            │   TRAPFRAME    │  RW-, per process (user tables only)
//!            ├────────────────┤
//!            │  guard / stack │  kstack(0)   (kernel table only)
//!            │  guard / stack │  kstack(1)
//!            │      ...       │
//!            └────────────────┘
//! ```

use kernel_memory_addresses::{MAXVA, PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Core-local interruptor (timer).
pub const CLINT: u64 = 0x0200_0000;

/// Platform-level interrupt controller.
pub const PLIC: u64 = 0x0c00_0000;

/// Size of the PLIC window that is mapped.
pub const PLIC_SIZE: u64 = 0x40_0000;

/// 16550a UART registers.
pub const UART0: u64 = 0x1000_0000;

/// Virtio MMIO disk interface.
pub const VIRTIO0: u64 = 0x1000_1000;

/// Start of RAM; the kernel is loaded here.
pub const KERNBASE: u64 = 0x8000_0000;

/// Default amount of RAM.
pub const DEFAULT_RAM_BYTES: u64 = 128 * 1024 * 1024;

/// End of RAM for the default configuration.
pub const PHYSTOP: u64 = KERNBASE + DEFAULT_RAM_BYTES;

/// Trampoline page, mapped at the highest page in every address space.
pub const TRAMPOLINE: u64 = MAXVA - PAGE_SIZE;

/// Per-process trap frame, directly below the trampoline.
pub const TRAPFRAME: u64 = TRAMPOLINE - PAGE_SIZE;

const _: () = {
    assert!(KERNBASE % PAGE_SIZE == 0);
    assert!(PHYSTOP > KERNBASE);
    assert!(TRAPFRAME < TRAMPOLINE);
    assert!(VIRTIO0 > UART0 && CLINT < PLIC);
};

/// Virtual address of the kernel stack for process slot `slot`.
///
/// Each stack is followed (downwards) by an invalid guard page.
#[must_use]
pub const fn kstack(slot: usize) -> VirtualAddress {
    VirtualAddress::new(TRAMPOLINE - (slot as u64 + 1) * 2 * PAGE_SIZE)
}

/// Physical end of RAM for a machine with `ram_bytes` of memory.
#[must_use]
pub const fn phys_top(ram_bytes: u64) -> PhysicalAddress {
    PhysicalAddress::new(KERNBASE + ram_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stacks_leave_guard_pages() {
        let a = kstack(0).as_u64();
        let b = kstack(1).as_u64();
        assert_eq!(a, TRAMPOLINE - 2 * PAGE_SIZE);
        assert_eq!(a - b, 2 * PAGE_SIZE);
        assert!(a < TRAPFRAME);
    }

    #[test]
    fn default_phystop() {
        assert_eq!(phys_top(DEFAULT_RAM_BYTES).as_u64(), PHYSTOP);
    }
}
