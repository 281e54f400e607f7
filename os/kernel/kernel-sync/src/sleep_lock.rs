//! Long-term locks for processes.
//!
//! A [`SleepLock`] protects data that is held across slow operations such as
//! disk I/O. Contenders do not spin: they hand the lock's internal spin lock
//! to a [`Blocker`] which suspends them until the holder releases.

use crate::{Channel, SpinLock, SpinLockGuard};
use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
};

/// Suspension primitive used by [`SleepLock`].
///
/// The process subsystem implements this with `sleep`/`wakeup`;
/// [`SpinBlocker`] is a stand-in for contexts without processes.
pub trait Blocker {
    /// Identity of the caller, recorded as the lock holder. Zero means "no one".
    fn holder_id(&self) -> usize;

    /// Atomically release `guard`, suspend until `chan` is signaled, then
    /// re-acquire the same lock and return the new guard.
    fn block<'a, T>(&self, chan: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T>;

    /// Make every caller blocked on `chan` eligible to run again.
    fn wake_all(&self, chan: Channel);
}

/// [`Blocker`] that busy-waits. Used before any process exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinBlocker;

impl Blocker for SpinBlocker {
    fn holder_id(&self) -> usize {
        0
    }

    fn block<'a, T>(&self, _chan: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let lock = SpinLockGuard::unlock(guard);
        spin_loop();
        lock.lock()
    }

    fn wake_all(&self, _chan: Channel) {}
}

#[derive(Debug)]
struct SleepState {
    locked: bool,
    holder: usize,
}

pub struct SleepLock<T> {
    state: SpinLock<SleepState>,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `state.locked`.
unsafe impl<T: Send> Sync for SleepLock<T> {}
unsafe impl<T: Send> Send for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            state: SpinLock::new(SleepState {
                locked: false,
                holder: 0,
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire, blocking through `blocker` while someone else holds it.
    pub fn lock<'a, B: Blocker>(&'a self, blocker: &'a B) -> SleepLockGuard<'a, T, B> {
        let mut st = self.state.lock();
        while st.locked {
            st = blocker.block(self.channel(), st);
        }
        st.locked = true;
        st.holder = blocker.holder_id();
        drop(st);
        SleepLockGuard {
            lock: self,
            blocker,
        }
    }

    /// Whether `blocker`'s caller currently holds this lock.
    pub fn holding<B: Blocker>(&self, blocker: &B) -> bool {
        let st = self.state.lock();
        st.locked && st.holder == blocker.holder_id()
    }

    /// Whether anyone holds this lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    fn channel(&self) -> Channel {
        Channel::of(self)
    }

    fn release<B: Blocker>(&self, blocker: &B) {
        let mut st = self.state.lock();
        st.locked = false;
        st.holder = 0;
        blocker.wake_all(self.channel());
    }
}

pub struct SleepLockGuard<'a, T, B: Blocker> {
    lock: &'a SleepLock<T>,
    blocker: &'a B,
}

impl<'a, T, B: Blocker> SleepLockGuard<'a, T, B> {
    /// The lock this guard holds.
    #[must_use]
    pub const fn lock_of(guard: &Self) -> &'a SleepLock<T> {
        guard.lock
    }
}

impl<T, B: Blocker> Deref for SleepLockGuard<'_, T, B> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, B: Blocker> DerefMut for SleepLockGuard<'_, T, B> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, B: Blocker> Drop for SleepLockGuard<'_, T, B> {
    fn drop(&mut self) {
        self.lock.release(self.blocker);
    }
}
