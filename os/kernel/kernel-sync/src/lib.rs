//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: short, non-blocking critical sections. The guard can be
//!   handed across a context switch ([`SpinLockGuard::leak`] and
//!   [`SpinLock::assume_locked`]), which the scheduler relies on.
//! * [`SleepLock`]: long-held exclusive access; contenders block through a
//!   [`Blocker`] instead of spinning.
//! * [`Channel`]: the opaque rendezvous token that sleepers and wakers agree on.
//! * [`SyncOnceCell`]: write-once global state.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod channel;
mod sleep_lock;
mod spin_lock;
mod sync_once_cell;

pub use channel::Channel;
pub use sleep_lock::{Blocker, SleepLock, SleepLockGuard, SpinBlocker};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
