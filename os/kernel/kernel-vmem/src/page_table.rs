use crate::PageEntryBits;
use kernel_memory_addresses::ENTRIES_PER_TABLE;

/// One page-table page: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Invalidate every entry.
    #[inline]
    pub fn zero(&mut self) {
        for e in &mut self.entries {
            e.clear();
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub const fn entry_mut(&mut self, index: usize) -> &mut PageEntryBits {
        &mut self.entries[index]
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PageEntryBits> {
        self.entries.iter_mut()
    }
}
