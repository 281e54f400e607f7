//! Bringing the machine up and down.

use crate::fs::{Console, RootFs};
use crate::tracing::trace_boot_config;
use crate::{BootConfig, BootError, KERNEL_IMAGE_PAGES, KERNEL_TEXT_PAGES};
use kernel_alloc::{PageAllocator, PhysicalMemory};
use kernel_bcache::{BlockDevice, BufferCache, RamDisk};
use kernel_console::ConsoleLogger;
use kernel_info::memory::KERNBASE;
use kernel_info::param::{NCPU, ROOTDEV};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_proc::file::{File, FileSystem};
use kernel_proc::{
    CopySrc, KernelMemory, Pid, ProcBlocker, ProcConfig, ProcError, ProcessTable, ThisCpu, UserEnv,
};
use kernel_vmem::kernel_map::{self, KernelLayout};
use log::LevelFilter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type Bcache = BufferCache<ProcBlocker>;

const BANNER: &[u8] = b"kernel is booting";

/// A booted machine: CPUs, timer, memory, processes and the disk cache.
///
/// Dropping it halts the machine.
pub struct Kernel {
    config: BootConfig,
    pages: Arc<PageAllocator<ThisCpu>>,
    procs: Arc<ProcessTable>,
    fs: Arc<RootFs>,
    disk: Arc<RamDisk>,
    bcache: Arc<Bcache>,
    cpus: Mutex<Vec<JoinHandle<()>>>,
    ticking: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Kernel {
    /// Boot: install the console logger, set up physical memory and the
    /// kernel page table, the process table with its kernel stacks, the
    /// root disk and its buffer cache, then start every CPU and the timer.
    ///
    /// # Errors
    /// See [`BootError`].
    pub fn boot(config: BootConfig) -> Result<Self, BootError> {
        if config.log_level() != LevelFilter::Off {
            if ConsoleLogger::new(config.log_level()).init().is_err() {
                log::debug!("boot: keeping the logger of an earlier boot");
            }
        }

        let ncpu = config.ncpu();
        if ncpu == 0 || ncpu > NCPU {
            return Err(BootError::BadCpuCount(ncpu));
        }
        if config.ram_pages() <= KERNEL_IMAGE_PAGES {
            return Err(BootError::TooLittleRam(config.ram_pages()));
        }

        let ram = Arc::new(PhysicalMemory::new(config.ram_bytes()));
        let end = PhysicalAddress::new(KERNBASE + KERNEL_IMAGE_PAGES * PAGE_SIZE);
        let pages = Arc::new(PageAllocator::new(Arc::clone(&ram), end, ncpu, ThisCpu));

        let etext = PhysicalAddress::new(KERNBASE + KERNEL_TEXT_PAGES * PAGE_SIZE);
        let layout = KernelLayout {
            etext,
            phys_top: ram.end(),
            trampoline: PhysicalPage::from_addr(PhysicalAddress::new(etext.as_u64() - PAGE_SIZE)),
        };
        let kernel_root = kernel_map::build(&*ram, &*pages, &layout)?.root();

        let fs = Arc::new(RootFs::default());
        let procs = ProcessTable::new(
            KernelMemory {
                ram: Arc::clone(&ram),
                pages: Arc::clone(&pages),
                kernel_root,
                trampoline: layout.trampoline,
            },
            ProcConfig {
                ncpu,
                strategy: config.strategy(),
                fs: Some(fs.clone() as Arc<dyn FileSystem>),
            },
        )?;
        Console.write(&procs, CopySrc::Kernel(BANNER), BANNER.len())?;

        let disk = Arc::new(RamDisk::new(ROOTDEV, config.disk_blocks()));
        let clock = {
            let procs = Arc::clone(&procs);
            move || procs.ticks()
        };
        let bcache = Arc::new(BufferCache::new(
            disk.clone() as Arc<dyn BlockDevice>,
            Box::new(clock),
            ProcBlocker::new(Arc::clone(&procs)),
        ));

        trace_boot_config(&config, &pages);

        let kernel = Self {
            config,
            pages,
            procs,
            fs,
            disk,
            bcache,
            cpus: Mutex::new(Vec::with_capacity(ncpu)),
            ticking: Arc::new(AtomicBool::new(true)),
            ticker: Mutex::new(None),
        };
        // On failure, dropping `kernel` halts whatever already started.
        kernel.start_cpus()?;
        kernel.start_timer()?;
        log::info!("{ncpu} cpus up");
        Ok(kernel)
    }

    fn start_cpus(&self) -> Result<(), BootError> {
        let mut cpus = self.cpus.lock().unwrap_or_else(PoisonError::into_inner);
        for c in 0..self.config.ncpu() {
            let procs = Arc::clone(&self.procs);
            let handle = thread::Builder::new()
                .name(format!("cpu-{c}"))
                .spawn(move || procs.run_cpu(c))?;
            cpus.push(handle);
        }
        Ok(())
    }

    fn start_timer(&self) -> Result<(), BootError> {
        let Some(interval) = self.config.tick() else {
            return Ok(());
        };
        let procs = Arc::clone(&self.procs);
        let ticking = Arc::clone(&self.ticking);
        let handle = thread::Builder::new()
            .name("timer".to_owned())
            .spawn(move || {
                while ticking.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    procs.clock_tick();
                }
            })?;
        *self.ticker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Create the init process running `init` as its user code.
    ///
    /// # Errors
    /// [`ProcError::OutOfMemory`] if its first page does not fit.
    ///
    /// # Panics
    /// If init was started before.
    pub fn start_init<F>(&self, init: F) -> Result<Pid, ProcError>
    where
        F: FnOnce(&UserEnv<'_>) -> i32 + Send + 'static,
    {
        self.procs.userinit(Box::new(init))
    }

    #[must_use]
    pub const fn config(&self) -> &BootConfig {
        &self.config
    }

    #[must_use]
    pub fn processes(&self) -> &Arc<ProcessTable> {
        &self.procs
    }

    #[must_use]
    pub fn pages(&self) -> &PageAllocator<ThisCpu> {
        &self.pages
    }

    #[must_use]
    pub fn bcache(&self) -> &Arc<Bcache> {
        &self.bcache
    }

    #[must_use]
    pub fn disk(&self) -> &Arc<RamDisk> {
        &self.disk
    }

    #[must_use]
    pub fn fs(&self) -> &Arc<RootFs> {
        &self.fs
    }

    /// Message of the kernel panic that stopped the machine, if any.
    #[must_use]
    pub fn panic_message(&self) -> Option<String> {
        self.procs.panic_message()
    }

    /// Block until the machine halts on its own (a kernel panic) or
    /// `timeout` passes. Returns whether it halted.
    pub fn wait_for_halt(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.procs.is_halted() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stop the schedulers and the timer and end every process thread.
    /// Calling it again does nothing.
    pub fn halt(&self) {
        self.procs.halt();
        let cpus = core::mem::take(&mut *self.cpus.lock().unwrap_or_else(PoisonError::into_inner));
        if cpus.is_empty() {
            return;
        }
        for cpu in cpus {
            join_logged(cpu);
        }

        self.ticking.store(false, Ordering::Release);
        if let Some(t) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            join_logged(t);
        }

        self.procs.retire_all();
        log::info!(
            "halted after {} ticks, {} frames free",
            self.procs.ticks(),
            self.pages.free_pages()
        );
    }
}

/// Join a machine thread. CPU threads catch kernel panics themselves, so an
/// error here is a panic that escaped the scheduler.
fn join_logged(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("unnamed").to_owned();
    if handle.join().is_err() {
        log::warn!("halt: thread {name} panicked");
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.halt();
    }
}
