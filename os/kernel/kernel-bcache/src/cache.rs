use crate::buf::{Buf, BufId, UNBOUND};
use crate::clock::{Clock, LogicalClock};
use crate::device::BlockDevice;
use crate::links::Links;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering::Relaxed;
use kernel_info::param::{BSIZE, NBUCKET, NBUF};
use kernel_sync::{Blocker, SleepLockGuard, SpinBlocker, SpinLock};
use std::sync::Arc;

/// Home bucket of a block.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn bucket_of(dev: u32, blockno: u32) -> usize {
    ((dev as usize)
        .wrapping_mul(31)
        .wrapping_add(blockno as usize))
        % NBUCKET
}

enum Victim {
    Found(usize),
    /// Nothing found, but some bucket was skipped because it was busy.
    Contended,
    Exhausted,
}

/// The block cache. `B` decides how a thread waits for a busy buffer.
pub struct BufferCache<B: Blocker = SpinBlocker> {
    bufs: Box<[Buf]>,
    buckets: [SpinLock<()>; NBUCKET],
    links: Links,
    device: Arc<dyn BlockDevice>,
    clock: Box<dyn Clock>,
    blocker: B,
}

impl BufferCache<SpinBlocker> {
    /// A cache that spins on busy buffers and stamps with a logical clock.
    #[must_use]
    pub fn with_defaults(device: Arc<dyn BlockDevice>) -> Self {
        Self::new(device, Box::new(LogicalClock::new()), SpinBlocker)
    }
}

impl<B: Blocker> BufferCache<B> {
    #[must_use]
    pub fn new(device: Arc<dyn BlockDevice>, clock: Box<dyn Clock>, blocker: B) -> Self {
        log::debug!("bcache: {NBUF} buffers of {BSIZE} bytes in {NBUCKET} buckets");
        Self {
            bufs: (0..NBUF).map(|_| Buf::new()).collect(),
            buckets: core::array::from_fn(|_| SpinLock::new(())),
            links: Links::new(),
            device,
            clock,
            blocker,
        }
    }

    /// Lock the buffer for `(dev, blockno)`, recycling an unused one on a
    /// miss. The contents are only meaningful after [`Self::read`].
    ///
    /// # Panics
    /// Every buffer is referenced (`"bget: no buffers"`).
    pub fn get(&self, dev: u32, blockno: u32) -> BufGuard<'_, B> {
        assert_ne!(dev, UNBOUND, "bget: reserved device number");
        let home = bucket_of(dev, blockno);
        loop {
            let bucket = self.buckets[home].lock();

            if let Some(i) = self
                .links
                .members(home)
                .find(|&i| self.bufs[i].holds(dev, blockno))
            {
                let buf = &self.bufs[i];
                buf.refcnt.fetch_add(1, Relaxed);
                buf.timestamp.store(self.clock.now(), Relaxed);
                drop(bucket);
                return self.lock_buffer(i);
            }

            match self.find_victim(home) {
                Victim::Found(i) => {
                    self.bufs[i].rebind(dev, blockno, self.clock.now());
                    drop(bucket);
                    return self.lock_buffer(i);
                }
                Victim::Contended => {
                    // Give up the home bucket too, so two threads raiding each
                    // other's buckets cannot keep skipping one another.
                    drop(bucket);
                    std::thread::yield_now();
                }
                Victim::Exhausted => panic!("bget: no buffers"),
            }
        }
    }

    /// [`Self::get`], then fill the buffer from the device unless it already
    /// holds the block.
    ///
    /// # Panics
    /// On device errors and when no buffer can be recycled.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard<'_, B> {
        let mut buf = self.get(dev, blockno);
        let slot = &self.bufs[buf.index];
        if !slot.valid.load(Relaxed) {
            if let Err(err) = self.device.read_block(dev, blockno, &mut buf) {
                panic!("bread: {err}");
            }
            slot.valid.store(true, Relaxed);
        }
        buf
    }

    /// Write the buffer's contents to the device.
    ///
    /// # Panics
    /// The caller does not hold the buffer (`"bwrite"`) or the device fails.
    pub fn write(&self, buf: &BufGuard<'_, B>) {
        self.assert_held(buf, "bwrite");
        let (dev, blockno) = self.bufs[buf.index].identity();
        if let Err(err) = self.device.write_block(dev, blockno, buf) {
            panic!("bwrite: {err}");
        }
    }

    /// Unlock the buffer and drop the caller's reference. Dropping the guard
    /// does the same.
    ///
    /// # Panics
    /// The caller does not hold the buffer (`"brelse"`).
    pub fn release(&self, buf: BufGuard<'_, B>) {
        self.assert_held(&buf, "brelse");
        drop(buf);
    }

    /// Take an extra reference so the block stays cached after it is released.
    ///
    /// # Panics
    /// The buffer is not referenced by anyone (`"bpin"`).
    pub fn pin(&self, id: BufId) {
        let buf = &self.bufs[id.0];
        let (dev, blockno) = buf.identity();
        let _bucket = self.buckets[bucket_of(dev, blockno)].lock();
        assert!(buf.refcnt.load(Relaxed) > 0, "bpin: buffer not referenced");
        buf.refcnt.fetch_add(1, Relaxed);
    }

    /// Drop a reference taken with [`Self::pin`].
    ///
    /// # Panics
    /// The buffer is not referenced (`"bunpin"`).
    pub fn unpin(&self, id: BufId) {
        self.unreference(id.0, "bunpin", false);
    }

    /// Reference count of the buffer currently bound to `(dev, blockno)`, or
    /// `None` when the block is not cached.
    #[must_use]
    pub fn refcount(&self, dev: u32, blockno: u32) -> Option<u32> {
        let home = bucket_of(dev, blockno);
        let _bucket = self.buckets[home].lock();
        self.links
            .members(home)
            .find(|&i| self.bufs[i].holds(dev, blockno))
            .map(|i| self.bufs[i].refcnt.load(Relaxed))
    }

    /// Number of buffers nobody references.
    #[must_use]
    pub fn unreferenced(&self) -> usize {
        (0..NBUCKET)
            .map(|b| {
                let _bucket = self.buckets[b].lock();
                self.links
                    .members(b)
                    .filter(|&i| self.bufs[i].refcnt.load(Relaxed) == 0)
                    .count()
            })
            .sum()
    }

    #[must_use]
    pub const fn blocker(&self) -> &B {
        &self.blocker
    }

    /// Caller holds `home`. Scans `home` and then the other buckets in order,
    /// taking each with `try_lock` only, and stops at the first bucket with
    /// an unreferenced buffer. A buffer taken from another bucket is moved to
    /// `home`.
    fn find_victim(&self, home: usize) -> Victim {
        let mut contended = false;
        for bucket in (0..NBUCKET).map(|step| (home + step) % NBUCKET) {
            if bucket == home {
                if let Some(victim) = self.oldest_unreferenced(home) {
                    return Victim::Found(victim);
                }
                continue;
            }

            let Some(other) = self.buckets[bucket].try_lock() else {
                contended = true;
                continue;
            };
            if let Some(victim) = self.oldest_unreferenced(bucket) {
                self.links.unlink(victim);
                drop(other);
                self.links.push_front(home, victim);
                log::trace!("bcache: buffer {victim} moved from bucket {bucket} to {home}");
                return Victim::Found(victim);
            }
        }

        if contended {
            Victim::Contended
        } else {
            Victim::Exhausted
        }
    }

    fn oldest_unreferenced(&self, bucket: usize) -> Option<usize> {
        self.links
            .members(bucket)
            .filter(|&i| self.bufs[i].refcnt.load(Relaxed) == 0)
            .min_by_key(|&i| self.bufs[i].timestamp.load(Relaxed))
    }

    fn lock_buffer(&self, index: usize) -> BufGuard<'_, B> {
        BufGuard {
            cache: self,
            index,
            data: ManuallyDrop::new(self.bufs[index].data.lock(&self.blocker)),
        }
    }

    fn assert_held(&self, buf: &BufGuard<'_, B>, op: &str) {
        let ours = core::ptr::eq(buf.cache, self);
        assert!(
            ours && SleepLockGuard::lock_of(&buf.data).holding(&self.blocker),
            "{op}: buffer not held"
        );
    }

    fn unreference(&self, index: usize, op: &str, stamp: bool) {
        let buf = &self.bufs[index];
        // The identity cannot change while our reference is outstanding.
        let (dev, blockno) = buf.identity();
        let _bucket = self.buckets[bucket_of(dev, blockno)].lock();
        let refs = buf.refcnt.load(Relaxed);
        assert!(refs > 0, "{op}: buffer not referenced");
        buf.refcnt.store(refs - 1, Relaxed);
        if stamp {
            buf.timestamp.store(self.clock.now(), Relaxed);
        }
    }
}

/// A locked, referenced buffer. Dereferences to the block contents.
pub struct BufGuard<'a, B: Blocker> {
    cache: &'a BufferCache<B>,
    index: usize,
    data: ManuallyDrop<SleepLockGuard<'a, [u8; BSIZE], B>>,
}

impl<B: Blocker> BufGuard<'_, B> {
    #[must_use]
    pub const fn id(&self) -> BufId {
        BufId(self.index)
    }

    #[must_use]
    pub fn dev(&self) -> u32 {
        self.cache.bufs[self.index].identity().0
    }

    #[must_use]
    pub fn blockno(&self) -> u32 {
        self.cache.bufs[self.index].identity().1
    }

    /// Whether the contents have been read from the device.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cache.bufs[self.index].valid.load(Relaxed)
    }
}

impl<B: Blocker> Deref for BufGuard<'_, B> {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<B: Blocker> DerefMut for BufGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<B: Blocker> Drop for BufGuard<'_, B> {
    fn drop(&mut self) {
        // SAFETY: `data` is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.unreference(self.index, "brelse", true);
    }
}
