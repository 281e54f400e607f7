use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering::Relaxed};
use kernel_info::param::BSIZE;
use kernel_sync::SleepLock;

/// Stable handle to a buffer slot, used to pin a block across operations
/// that do not keep the buffer locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufId(pub(crate) usize);

impl BufId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Device number of a slot that has never held a block.
pub const UNBOUND: u32 = u32::MAX;

/// One cache slot.
///
/// Identity, reference count and timestamp are changed only under the lock
/// of the bucket the slot is linked into. `valid` belongs to whoever holds
/// `data`.
pub struct Buf {
    pub dev: AtomicU32,
    pub blockno: AtomicU32,
    pub refcnt: AtomicU32,
    pub timestamp: AtomicU64,
    pub valid: AtomicBool,
    pub data: SleepLock<[u8; BSIZE]>,
}

impl Buf {
    pub const fn new() -> Self {
        Self {
            dev: AtomicU32::new(UNBOUND),
            blockno: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            timestamp: AtomicU64::new(0),
            valid: AtomicBool::new(false),
            data: SleepLock::new([0; BSIZE]),
        }
    }

    /// Whether this slot is bound to `(dev, blockno)`.
    ///
    /// An unreferenced slot still answers for its last identity; that is what
    /// makes a released block a cache hit.
    pub fn holds(&self, dev: u32, blockno: u32) -> bool {
        self.dev.load(Relaxed) == dev && self.blockno.load(Relaxed) == blockno
    }

    pub fn identity(&self) -> (u32, u32) {
        (self.dev.load(Relaxed), self.blockno.load(Relaxed))
    }

    /// Recycle for a new block. The old contents become meaningless.
    pub fn rebind(&self, dev: u32, blockno: u32, now: u64) {
        debug_assert_eq!(self.refcnt.load(Relaxed), 0, "rebind of a referenced buffer");
        self.dev.store(dev, Relaxed);
        self.blockno.store(blockno, Relaxed);
        self.valid.store(false, Relaxed);
        self.refcnt.store(1, Relaxed);
        self.timestamp.store(now, Relaxed);
    }
}
