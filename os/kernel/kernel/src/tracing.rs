//! # Boot diagnostics

use crate::BootConfig;
use kernel_alloc::PageAllocator;
use kernel_alloc::CpuIdentity;
use log::info;

pub fn trace_boot_config<C: CpuIdentity>(config: &BootConfig, pages: &PageAllocator<C>) {
    info!(
        concat!(
            "Booting:\n",
            "  cpus     = {ncpu}\n",
            "  ram      = {ram} KiB, {free} frames free\n",
            "  disk     = {disk} blocks\n",
            "  timer    = {tick}\n",
            "  fork     = {strategy:?}"
        ),
        ncpu = config.ncpu(),
        ram = config.ram_bytes() / 1024,
        free = pages.free_pages(),
        disk = config.disk_blocks(),
        tick = config
            .tick()
            .map_or_else(|| "off".to_owned(), |t| format!("{t:?}")),
        strategy = config.strategy(),
    );
}
