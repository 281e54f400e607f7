use core::sync::atomic::{AtomicU64, Ordering};

/// Source of the recency stamps used to pick eviction victims.
///
/// The kernel stamps buffers with the timer tick count; coarse stamps are fine
/// because ties between equally old buffers may be broken either way.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

impl<F> Clock for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn now(&self) -> u64 {
        self()
    }
}

/// Strictly increasing counter, one step per stamp.
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
