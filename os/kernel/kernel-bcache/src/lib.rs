//! # Disk Block Cache
//!
//! Keeps up to [`NBUF`](kernel_info::param::NBUF) disk blocks in memory and
//! serializes access to each of them.
//!
//! * Buffers are bound to a `(dev, blockno)` identity and live in one of
//!   [`NBUCKET`](kernel_info::param::NBUCKET) hash buckets, each an
//!   index-linked list behind its own spin lock.
//! * A cached buffer is found under its home bucket's lock alone. A miss
//!   recycles the unreferenced buffer with the oldest timestamp, starting in
//!   the home bucket and moving on to the others with `try_lock`, so no thread
//!   ever waits on a second bucket lock.
//! * The block contents sit behind a [`SleepLock`](kernel_sync::SleepLock):
//!   [`BufferCache::get`] returns a [`BufGuard`] that holds it, and dropping
//!   the guard is `brelse`.
//!
//! The disk itself is a [`BlockDevice`]; [`RamDisk`] is the in-memory one.
//!
//! ```rust
//! use std::sync::Arc;
//! use kernel_bcache::{BufferCache, RamDisk};
//!
//! let disk = Arc::new(RamDisk::new(1, 64));
//! let cache = BufferCache::with_defaults(disk.clone());
//!
//! let mut buf = cache.read(1, 7);
//! buf[0] = 0xAB;
//! cache.write(&buf);
//! drop(buf);
//!
//! assert_eq!(disk.snapshot(7).unwrap()[0], 0xAB);
//! ```

#![allow(unsafe_code)]

mod buf;
mod cache;
mod clock;
mod device;
mod links;

pub use buf::BufId;
pub use cache::{BufGuard, BufferCache, bucket_of};
pub use clock::{Clock, LogicalClock};
pub use device::{BlockDevice, DeviceError, RamDisk};
