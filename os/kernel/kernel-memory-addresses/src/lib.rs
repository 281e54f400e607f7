//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw Sv39 addresses and page bases used by the
//! allocator, the page-table code and the process subsystem.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] / [`VirtualPage`] | A (page-table translated) address and its 4 KiB page base. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | A RAM or MMIO address and its 4 KiB frame base. |
//!
//! Sv39 splits a 39-bit virtual address into three 9-bit table indices and a
//! 12-bit page offset:
//!
//! ```text
//!  38        30 29        21 20        12 11           0
//! +------------+------------+------------+--------------+
//! |   VPN[2]   |   VPN[1]   |   VPN[0]   |    offset    |
//! +------------+------------+------------+--------------+
//! ```
//!
//! [`MAXVA`] is one bit less than the Sv39 maximum so that sign extension of
//! bit 38 never has to be considered. It is an **exclusive** bound.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x1234);
//! let (page, off) = va.split();
//! assert_eq!(page.base().as_u64(), 0x1000);
//! assert_eq!(page.join(off), va);
//! assert_eq!(round_up(0x1001), 0x2000);
//! assert_eq!(round_down(0x1fff), 0x1000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical;
mod virt;

pub use physical::{PhysicalAddress, PhysicalPage};
pub use virt::{VirtualAddress, VirtualPage};

/// Bytes per page.
pub const PAGE_SIZE: u64 = 4096;

/// Bits of offset within a page.
pub const PAGE_SHIFT: u32 = 12;

/// Entries per page-table page.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Number of page-table levels in Sv39.
pub const LEVELS: usize = 3;

/// One beyond the highest usable virtual address.
pub const MAXVA: u64 = 1 << (9 + 9 + 9 + 12 - 1);

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(ENTRIES_PER_TABLE * 8 == PAGE_SIZE as usize);
};

/// Round `value` up to the next page boundary.
#[inline]
#[must_use]
pub const fn round_up(value: u64) -> u64 {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Round `value` down to its page boundary.
#[inline]
#[must_use]
pub const fn round_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Whether `value` sits on a page boundary.
#[inline]
#[must_use]
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}
