//! The context switch.
//!
//! Every CPU scheduler and every process owns a [`Context`]. Switching from
//! one to the other hands over a baton: the target is resumed, the caller
//! parks until somebody resumes it in turn. Exactly one thread per CPU holds
//! the baton at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Baton {
    Parked,
    /// Continue on the given CPU.
    Run(usize),
    /// Do not continue. A process unwinds its thread; a scheduler stops
    /// because the process it ran died abnormally.
    Retire,
}

/// Unwind payload used to end a retired process thread.
#[derive(Debug)]
pub(crate) struct ProcessRetired;

pub(crate) struct Context {
    baton: Mutex<Baton>,
    signal: Condvar,
    started: AtomicBool,
}

impl Context {
    pub(crate) const fn new() -> Self {
        Self {
            baton: Mutex::new(Baton::Parked),
            signal: Condvar::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Marks the context as having a thread behind it. Returns `true` only
    /// for the first caller, which must spawn that thread.
    pub(crate) fn claim_start(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn resume(&self, baton: Baton) {
        let mut b = self.baton.lock().unwrap_or_else(PoisonError::into_inner);
        *b = baton;
        self.signal.notify_one();
    }

    /// Block until resumed; returns how.
    pub(crate) fn park(&self) -> Baton {
        let mut b = self.baton.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match core::mem::replace(&mut *b, Baton::Parked) {
                Baton::Parked => {
                    b = self.signal.wait(b).unwrap_or_else(PoisonError::into_inner);
                }
                other => return other,
            }
        }
    }
}

/// Resume `to` with `baton`, then park on `from`.
pub(crate) fn swtch(from: &Context, to: &Context, baton: Baton) -> Baton {
    to.resume(baton);
    from.park()
}
