//! Per-CPU state: which process runs, interrupt enable and lock nesting.
//!
//! A CPU is a host thread. The thread-local [`current`] tells any code which
//! CPU it executes on; process threads update it every time a scheduler
//! resumes them, because a process may move between CPUs.

use crate::context::Context;
use kernel_alloc::CpuIdentity;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::Relaxed};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

pub(crate) const NO_PROC: usize = usize::MAX;

thread_local! {
    static CURRENT_CPU: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The CPU the calling thread executes on; `None` for threads outside the
/// machine (the boot thread, the timer, test harnesses).
#[must_use]
pub fn current() -> Option<usize> {
    CURRENT_CPU.with(Cell::get)
}

pub(crate) fn set_current(cpu: Option<usize>) {
    CURRENT_CPU.with(|c| c.set(cpu));
}

/// [`CpuIdentity`] backed by the calling thread's CPU. Threads outside the
/// machine count as CPU 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThisCpu;

impl CpuIdentity for ThisCpu {
    fn current(&self) -> usize {
        current().unwrap_or(0)
    }
}

pub struct Cpu {
    /// Slot of the process running on this CPU, or [`NO_PROC`].
    pub(crate) proc: AtomicUsize,
    /// Depth of `push_off` nesting.
    noff: AtomicU32,
    /// Were interrupts enabled before the outermost `push_off`?
    intena: AtomicBool,
    /// Simulated `sstatus.SIE`.
    intr: AtomicBool,
    /// A timer interrupt arrived and has not been taken yet.
    pub(crate) timer_pending: AtomicBool,
    /// Where the scheduler loop waits while a process runs.
    pub(crate) context: Context,
}

impl Cpu {
    pub(crate) fn new() -> Self {
        Self {
            proc: AtomicUsize::new(NO_PROC),
            noff: AtomicU32::new(0),
            intena: AtomicBool::new(false),
            intr: AtomicBool::new(false),
            timer_pending: AtomicBool::new(false),
            context: Context::new(),
        }
    }

    pub(crate) fn intr_on(&self) {
        self.intr.store(true, Relaxed);
    }

    pub(crate) fn intr_off(&self) {
        self.intr.store(false, Relaxed);
    }

    pub(crate) fn intr_get(&self) -> bool {
        self.intr.load(Relaxed)
    }

    pub(crate) fn noff(&self) -> u32 {
        self.noff.load(Relaxed)
    }

    pub(crate) fn intena(&self) -> bool {
        self.intena.load(Relaxed)
    }

    pub(crate) fn set_intena(&self, on: bool) {
        self.intena.store(on, Relaxed);
    }

    /// Like `intr_off`, but matched: it takes two `pop_off`s to undo two
    /// `push_off`s, and interrupts come back only if they were on before.
    pub(crate) fn push_off(&self) {
        let old = self.intr_get();
        self.intr_off();
        if self.noff.load(Relaxed) == 0 {
            self.intena.store(old, Relaxed);
        }
        self.noff.fetch_add(1, Relaxed);
    }

    pub(crate) fn pop_off(&self) {
        assert!(!self.intr_get(), "pop_off - interruptible");
        let noff = self.noff.load(Relaxed);
        assert!(noff >= 1, "pop_off");
        self.noff.store(noff - 1, Relaxed);
        if noff == 1 && self.intena.load(Relaxed) {
            self.intr_on();
        }
    }
}

/// What a CPU with nothing to run waits on, standing in for `wfi`.
///
/// Anything that may make a process runnable bumps the generation; a CPU
/// only waits if the generation did not move since it started its scan.
#[derive(Default)]
pub(crate) struct Idle {
    generation: Mutex<u64>,
    signal: Condvar,
}

impl Idle {
    const MAX_WAIT: Duration = Duration::from_millis(10);

    pub(crate) fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        let mut g = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *g = g.wrapping_add(1);
        self.signal.notify_all();
    }

    pub(crate) fn wait(&self, seen: u64) {
        let g = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *g == seen {
            let _ = self
                .signal
                .wait_timeout(g, Self::MAX_WAIT)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
