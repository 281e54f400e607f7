//! Runtime configuration of the simulated machine.

use core::time::Duration;
use kernel_info::memory::DEFAULT_RAM_BYTES;
use kernel_info::param::FSSIZE;
use kernel_memory_addresses::PAGE_SIZE;
use kernel_vmem::CopyStrategy;
use log::LevelFilter;
use utils_accessors_derive::Setters;

/// Frames at the bottom of RAM that stand for the kernel image.
pub const KERNEL_IMAGE_PAGES: u64 = 16;

/// Of those, the frames holding kernel text. The trampoline is the last one.
pub const KERNEL_TEXT_PAGES: u64 = 8;

/// Everything [`Kernel::boot`](crate::Kernel::boot) needs to know.
///
/// ```
/// use kernel::BootConfig;
///
/// let config = BootConfig::default().with_ncpu(2).with_ram_pages(1024);
/// assert_eq!(config.ncpu(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Setters)]
pub struct BootConfig {
    /// Number of CPUs, at most `NCPU`.
    #[setters(get)]
    ncpu: usize,
    /// Physical RAM in 4 KiB pages, kernel image included.
    #[setters(get)]
    ram_pages: u64,
    /// Size of the root disk in blocks.
    #[setters(get)]
    disk_blocks: u32,
    /// Interval of the timer interrupt; `None` runs without a timer.
    #[setters(get)]
    tick: Option<Duration>,
    /// How `fork` copies user memory.
    #[setters(get)]
    strategy: CopyStrategy,
    /// Console log level. With `Off` no logger is installed.
    #[setters(get)]
    log_level: LevelFilter,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            ncpu: 3,
            ram_pages: DEFAULT_RAM_BYTES / PAGE_SIZE,
            disk_blocks: FSSIZE,
            tick: Some(Duration::from_millis(1)),
            strategy: CopyStrategy::CopyOnWrite,
            log_level: LevelFilter::Warn,
        }
    }
}

impl BootConfig {
    /// Bytes of RAM.
    #[must_use]
    pub const fn ram_bytes(&self) -> u64 {
        self.ram_pages * PAGE_SIZE
    }
}
