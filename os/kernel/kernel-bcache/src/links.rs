//! Index-linked, circular, doubly linked lists over the buffer array.
//!
//! Nodes `0..NBUF` are buffers; node `NBUF + b` is the sentinel head of
//! bucket `b`. A buffer is on exactly one bucket list at a time, and every
//! link touching a list is only read or written under that bucket's lock.

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use kernel_info::param::{NBUCKET, NBUF};

const NODES: usize = NBUF + NBUCKET;

pub struct Links {
    next: [AtomicUsize; NODES],
    prev: [AtomicUsize; NODES],
}

const fn head(bucket: usize) -> usize {
    NBUF + bucket
}

impl Links {
    /// Every bucket empty except bucket 0, which holds all buffers.
    pub fn new() -> Self {
        let links = Self {
            next: core::array::from_fn(AtomicUsize::new),
            prev: core::array::from_fn(AtomicUsize::new),
        };
        for buf in 0..NBUF {
            links.push_front(0, buf);
        }
        links
    }

    /// Insert `buf` right after the head of `bucket`. `buf` must be unlinked.
    pub fn push_front(&self, bucket: usize, buf: usize) {
        let h = head(bucket);
        let first = self.next[h].load(Relaxed);
        self.next[buf].store(first, Relaxed);
        self.prev[buf].store(h, Relaxed);
        self.prev[first].store(buf, Relaxed);
        self.next[h].store(buf, Relaxed);
    }

    /// Take `buf` off whatever list it is on.
    pub fn unlink(&self, buf: usize) {
        debug_assert!(buf < NBUF, "unlink of a bucket head");
        let p = self.prev[buf].load(Relaxed);
        let n = self.next[buf].load(Relaxed);
        self.next[p].store(n, Relaxed);
        self.prev[n].store(p, Relaxed);
        self.next[buf].store(buf, Relaxed);
        self.prev[buf].store(buf, Relaxed);
    }

    /// Buffers on `bucket`'s list, most recently inserted first.
    pub fn members(&self, bucket: usize) -> impl Iterator<Item = usize> + '_ {
        let h = head(bucket);
        let mut cursor = self.next[h].load(Relaxed);
        core::iter::from_fn(move || {
            if cursor == h {
                return None;
            }
            let current = cursor;
            cursor = self.next[current].load(Relaxed);
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_everything_in_bucket_zero() {
        let links = Links::new();
        assert_eq!(links.members(0).count(), NBUF);
        assert!((1..NBUCKET).all(|b| links.members(b).next().is_none()));
    }

    #[test]
    fn move_between_buckets() {
        let links = Links::new();
        links.unlink(4);
        links.push_front(3, 4);
        links.unlink(9);
        links.push_front(3, 9);

        assert_eq!(links.members(3).collect::<Vec<_>>(), [9, 4]);
        assert_eq!(links.members(0).count(), NBUF - 2);
        assert!(links.members(0).all(|b| b != 4 && b != 9));

        links.unlink(9);
        assert_eq!(links.members(3).collect::<Vec<_>>(), [4]);
    }
}
