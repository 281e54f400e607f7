#![allow(dead_code)]

use kernel_alloc::{PageAllocator, PhysicalMemory};
use kernel_info::memory::KERNBASE;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_proc::{KernelMemory, ProcConfig, ProcState, ProcessTable, ThisCpu, UserEnv};
use kernel_vmem::CopyStrategy;
use kernel_vmem::kernel_map::{self, KernelLayout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const RAM_BYTES: u64 = 8 * 1024 * 1024;
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Byte offset inside init's first page that the code does not use.
pub const SCRATCH: u64 = 0x800;

/// A running machine: CPU threads, a ticker and the process table.
pub struct Machine {
    pub table: Arc<ProcessTable>,
    cpus: Vec<JoinHandle<()>>,
    ticking: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl Machine {
    pub fn new(ncpu: usize, strategy: CopyStrategy) -> Self {
        let ram = Arc::new(PhysicalMemory::new(RAM_BYTES));
        let kernel_end = PhysicalAddress::new(KERNBASE + 16 * PAGE_SIZE);
        let pages = Arc::new(PageAllocator::new(Arc::clone(&ram), kernel_end, ncpu, ThisCpu));
        let layout = KernelLayout {
            etext: PhysicalAddress::new(KERNBASE + 8 * PAGE_SIZE),
            phys_top: ram.end(),
            trampoline: PhysicalPage::from_addr(PhysicalAddress::new(KERNBASE + 7 * PAGE_SIZE)),
        };
        let kernel_root = kernel_map::build(&*ram, &*pages, &layout)
            .expect("kernel page table")
            .root();
        let mem = KernelMemory {
            ram,
            pages,
            kernel_root,
            trampoline: layout.trampoline,
        };
        let table = ProcessTable::new(
            mem,
            ProcConfig {
                ncpu,
                strategy,
                fs: None,
            },
        )
        .expect("process table");

        let cpus = (0..ncpu)
            .map(|c| {
                let table = Arc::clone(&table);
                thread::Builder::new()
                    .name(format!("cpu-{c}"))
                    .spawn(move || table.run_cpu(c))
                    .expect("cpu thread")
            })
            .collect();

        let ticking = Arc::new(AtomicBool::new(true));
        let ticker = {
            let table = Arc::clone(&table);
            let ticking = Arc::clone(&ticking);
            thread::spawn(move || {
                while ticking.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(1));
                    table.clock_tick();
                }
            })
        };

        Self {
            table,
            cpus,
            ticking,
            ticker: Some(ticker),
        }
    }

    /// Boot and start `init` as the first process.
    pub fn start<F>(ncpu: usize, strategy: CopyStrategy, init: F) -> Self
    where
        F: FnOnce(&UserEnv<'_>) -> i32 + Send + 'static,
    {
        let m = Self::new(ncpu, strategy);
        m.table.userinit(Box::new(init)).expect("userinit");
        m
    }

    /// Poll until `pid` is in `state`.
    pub fn await_state(&self, pid: i32, state: Option<ProcState>) {
        let deadline = Instant::now() + TIMEOUT;
        while self.table.state_of(pid) != state {
            assert!(Instant::now() < deadline, "pid {pid} never reached {state:?}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn await_halt(&self) {
        let deadline = Instant::now() + TIMEOUT;
        while !self.table.is_halted() {
            assert!(Instant::now() < deadline, "machine did not halt");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.table.halt();
        for cpu in self.cpus.drain(..) {
            let _ = cpu.join();
        }
        self.ticking.store(false, Ordering::Relaxed);
        if let Some(t) = self.ticker.take() {
            let _ = t.join();
        }
        self.table.retire_all();
    }
}

/// What init does once its test is over: reap orphans forever.
pub fn reap_forever(env: &UserEnv<'_>) -> ! {
    loop {
        if env.wait(None) < 0 {
            env.sleep(1);
        }
    }
}

pub fn load_i32(env: &UserEnv<'_>, va: u64) -> i32 {
    i32::from_le_bytes([env.load(va), env.load(va + 1), env.load(va + 2), env.load(va + 3)])
}
