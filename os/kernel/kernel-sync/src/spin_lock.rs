use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

pub struct SpinLock<T> {
    /// lock state
    /// * `false`: unlocked
    /// * `true`: locked
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.try_acquire() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Spin until acquired (TATAS), then return a guard.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while !self.try_acquire() {
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Snapshot of the lock word. Only meaningful for assertions.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Re-materialize a guard for a lock that was acquired elsewhere and
    /// handed over with [`SpinLockGuard::leak`].
    ///
    /// # Safety
    /// The lock must be held, and ownership of that hold must have been
    /// transferred to the caller. No other guard for it may be live.
    #[inline]
    pub unsafe fn assume_locked(&self) -> SpinLockGuard<'_, T> {
        debug_assert!(self.is_locked(), "assume_locked on a free lock");
        SpinLockGuard { lock: self }
    }

    /// Release a lock whose guard was leaked.
    ///
    /// # Safety
    /// Same contract as [`SpinLock::assume_locked`].
    #[inline]
    pub unsafe fn force_unlock(&self) {
        debug_assert!(self.is_locked(), "force_unlock on a free lock");
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Forget the guard but keep the lock held; the hold can be picked up
    /// again with [`SpinLock::assume_locked`], possibly on another thread.
    #[inline]
    #[must_use = "the lock stays held"]
    pub fn leak(guard: Self) -> &'a SpinLock<T> {
        let lock = guard.lock;
        mem::forget(guard);
        lock
    }

    /// Release the lock, returning it for later re-acquisition.
    #[inline]
    pub fn unlock(guard: Self) -> &'a SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    /// The lock this guard holds.
    #[inline]
    pub const fn lock_of(guard: &Self) -> &'a SpinLock<T> {
        guard.lock
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes the critical section.
        self.lock.locked.store(false, Ordering::Release);
    }
}
