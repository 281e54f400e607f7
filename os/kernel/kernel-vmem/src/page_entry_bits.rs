use bitfield_struct::bitfield;
use core::ops::BitOr;
use kernel_memory_addresses::PhysicalPage;

/// A single 64-bit Sv39 page-table entry in its raw bitfield form.
///
/// ### Bit layout
///
/// | Bits   | Name  | Meaning |
/// |--------|-------|---------|
/// | 0      | `V`   | Valid |
/// | 1      | `R`   | Readable |
/// | 2      | `W`   | Writable |
/// | 3      | `X`   | Executable |
/// | 4      | `U`   | User-mode accessible |
/// | 5      | `G`   | Global |
/// | 6      | `A`   | Accessed |
/// | 7      | `D`   | Dirty |
/// | 8      | RSW   | Copy-on-write pending (software) |
/// | 9      | RSW   | Reserved for software |
/// | 10–53  | `PPN` | Physical page number |
/// | 54–63  | –     | Reserved |
///
/// An entry is a **leaf** if any of `R`, `W`, `X` is set, otherwise a valid
/// entry points to the next-level table.
///
/// The same type doubles as a permission set: constants such as
/// [`PageEntryBits::READ`] carry only flag bits and combine with `|`.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntryBits, PhysicalPage};
/// let perm = PageEntryBits::READ | PageEntryBits::WRITE | PageEntryBits::USER;
/// let e = PageEntryBits::leaf(PhysicalPage::from_ppn(0x80001), perm);
/// assert!(e.valid() && e.is_leaf() && e.writable());
/// assert_eq!(e.page().ppn(), 0x80001);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Valid (V, bit 0).
    pub valid: bool,

    /// Readable (R, bit 1).
    pub readable: bool,

    /// Writable (W, bit 2).
    pub writable: bool,

    /// Executable (X, bit 3).
    pub executable: bool,

    /// User (U, bit 4). Accessible from user mode; the kernel never executes
    /// from such pages.
    pub user: bool,

    /// Global (G, bit 5).
    pub global: bool,

    /// Accessed (A, bit 6). Set by hardware.
    pub accessed: bool,

    /// Dirty (D, bit 7). Set by hardware on write.
    pub dirty: bool,

    /// Copy-on-write pending (RSW bit 8).
    ///
    /// Set together with clearing `W` when a frame is shared by fork; a write
    /// fault on such a page is resolved by copying.
    pub cow: bool,

    #[bits(1)]
    __: u8,

    /// Physical page number of the target frame or next-level table.
    #[bits(44)]
    pub ppn: u64,

    #[bits(10)]
    __: u16,
}

impl PageEntryBits {
    pub const READ: Self = Self::new().with_readable(true);
    pub const WRITE: Self = Self::new().with_writable(true);
    pub const EXEC: Self = Self::new().with_executable(true);
    pub const USER: Self = Self::new().with_user(true);

    /// Ordinary user memory: readable, writable, executable.
    pub const USER_RWX: Self = Self::new()
        .with_readable(true)
        .with_writable(true)
        .with_executable(true)
        .with_user(true);

    /// Low ten bits: everything but the physical page number.
    const FLAG_MASK: u64 = 0x3ff;

    /// A valid leaf mapping `page` with permission bits from `perm`.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPage, perm: Self) -> Self {
        Self::from_bits(perm.into_bits() & Self::FLAG_MASK)
            .with_ppn(page.ppn())
            .with_valid(true)
    }

    /// A valid non-leaf entry pointing at the table in `page`.
    #[inline]
    #[must_use]
    pub const fn table(page: PhysicalPage) -> Self {
        Self::new().with_ppn(page.ppn()).with_valid(true)
    }

    /// Whether this entry maps memory rather than pointing to a table.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.readable() || self.writable() || self.executable()
    }

    /// The frame this entry refers to.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage::from_ppn(self.ppn())
    }

    /// Just the flag bits (including `V`).
    #[inline]
    #[must_use]
    pub const fn flags(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAG_MASK)
    }

    /// Reset to the invalid all-zero entry.
    #[inline]
    pub const fn clear(&mut self) {
        *self = Self::new();
    }
}

impl BitOr for PageEntryBits {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.into_bits() | rhs.into_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_sv39() {
        let e = PageEntryBits::leaf(
            PhysicalPage::from_ppn(0x8_0123),
            PageEntryBits::READ | PageEntryBits::EXEC,
        );
        assert_eq!(e.into_bits(), (0x8_0123 << 10) | 0b1011);
        assert!(e.is_leaf());
        assert!(!PageEntryBits::table(PhysicalPage::from_ppn(1)).is_leaf());
    }

    #[test]
    fn cow_bit_is_rsw_low() {
        let e = PageEntryBits::new().with_cow(true);
        assert_eq!(e.into_bits(), 1 << 8);
    }

    #[test]
    fn leaf_ignores_ppn_in_perm() {
        let perm = PageEntryBits::READ.with_ppn(0x1234);
        let e = PageEntryBits::leaf(PhysicalPage::from_ppn(7), perm);
        assert_eq!(e.ppn(), 7);
        assert_eq!(e.flags(), PageEntryBits::READ.with_valid(true));
    }
}
