use crate::table::ProcessTable;
use kernel_sync::{Blocker, Channel, SpinLockGuard};
use std::sync::Arc;
use std::thread;

/// [`Blocker`] that puts the calling process to sleep. Threads outside the
/// machine, which cannot sleep, yield and retry instead.
#[derive(Clone)]
pub struct ProcBlocker(Arc<ProcessTable>);

impl ProcBlocker {
    #[must_use]
    pub const fn new(table: Arc<ProcessTable>) -> Self {
        Self(table)
    }
}

impl Blocker for ProcBlocker {
    fn holder_id(&self) -> usize {
        self.0
            .current_pid()
            .and_then(|pid| usize::try_from(pid).ok())
            .unwrap_or(0)
    }

    fn block<'a, T>(&self, chan: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        if self.0.myproc().is_some() {
            self.0.sleep(chan, guard)
        } else {
            let lock = SpinLockGuard::unlock(guard);
            thread::yield_now();
            lock.lock()
        }
    }

    fn wake_all(&self, chan: Channel) {
        self.0.wakeup(chan);
    }
}
