use kernel_bcache::{BufferCache, RamDisk};
use kernel_info::param::NBUF;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

fn setup(nblocks: u32) -> (Arc<RamDisk>, Arc<BufferCache>) {
    let disk = Arc::new(RamDisk::new(1, nblocks));
    let cache = Arc::new(BufferCache::with_defaults(disk.clone()));
    (disk, cache)
}

#[test]
fn concurrent_gets_of_one_block_share_a_buffer() {
    const THREADS: usize = 8;
    let (disk, cache) = setup(16);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut buf = cache.read(1, 5);
                buf[0] += 1;
                cache.write(&buf);
                buf.id()
            })
        })
        .collect();

    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(disk.reads(), 1);
    assert_eq!(disk.snapshot(5).unwrap()[0], THREADS as u8);
    assert_eq!(cache.refcount(1, 5), Some(0));
}

#[test]
fn refcount_tracks_outstanding_references() {
    let (_, cache) = setup(16);
    let first = cache.get(1, 2);
    let id = first.id();
    cache.pin(id);
    cache.pin(id);
    assert_eq!(cache.refcount(1, 2), Some(3));

    // A second getter has its reference counted before it blocks on the lock.
    let (tx, rx) = mpsc::channel();
    let waiter = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            tx.send(()).unwrap();
            cache.get(1, 2).id()
        })
    };
    rx.recv().unwrap();
    while cache.refcount(1, 2) != Some(4) {
        thread::yield_now();
    }

    drop(first);
    assert_eq!(waiter.join().unwrap(), id);
    cache.unpin(id);
    cache.unpin(id);
    assert_eq!(cache.refcount(1, 2), Some(0));
}

#[test]
fn exhausted_pool_is_fatal_until_a_buffer_is_released() {
    let (_, cache) = setup(64);
    let mut held: Vec<_> = (0..NBUF as u32).map(|b| cache.read(1, b)).collect();

    let overflow = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || catch_unwind(AssertUnwindSafe(|| cache.get(1, NBUF as u32).id())))
    };
    let err = overflow.join().unwrap().unwrap_err();
    assert_eq!(err.downcast_ref::<&str>(), Some(&"bget: no buffers"));

    let released = held.pop().unwrap().id();
    let next = cache.get(1, NBUF as u32);
    assert_eq!(next.id(), released);
}

#[test]
fn at_most_nbuf_minus_one_pinned_leaves_room() {
    let (_, cache) = setup(256);
    let pinned: Vec<_> = (0..NBUF as u32 - 1)
        .map(|b| {
            let buf = cache.read(1, b);
            let id = buf.id();
            cache.pin(id);
            id
        })
        .collect();

    for b in 100..200 {
        let buf = cache.read(1, b);
        assert!(!pinned.contains(&buf.id()));
    }
    for id in pinned {
        cache.unpin(id);
    }
    assert_eq!(cache.unreferenced(), NBUF);
}

/// Many threads hammer more blocks than there are buffers. Each increment is
/// a read-modify-write under the buffer lock followed by a write-back, so no
/// increment may be lost to an eviction.
#[test]
fn eviction_under_contention_loses_no_updates() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 400;
    const BLOCKS: u32 = 3 * NBUF as u32;

    let (disk, cache) = setup(BLOCKS);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut seed = 0x9E37_79B9_u32.wrapping_mul(t as u32 + 1);
                barrier.wait();
                for _ in 0..ROUNDS {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    let blockno = (seed >> 16) % BLOCKS;
                    let mut buf = cache.read(1, blockno);
                    let count = u32::from_le_bytes(buf[..4].try_into().unwrap());
                    buf[..4].copy_from_slice(&(count + 1).to_le_bytes());
                    cache.write(&buf);
                }
            })
        })
        .collect();

    // A stuck victim search would hang here; bound it.
    let deadline = std::time::Instant::now() + Duration::from_secs(60);
    for h in handles {
        while !h.is_finished() {
            assert!(std::time::Instant::now() < deadline, "victim search livelocked");
            thread::sleep(Duration::from_millis(5));
        }
        h.join().unwrap();
    }

    let total: u32 = (0..BLOCKS)
        .map(|b| u32::from_le_bytes(disk.snapshot(b).unwrap()[..4].try_into().unwrap()))
        .sum();
    assert_eq!(total as usize, THREADS * ROUNDS);
    assert_eq!(cache.unreferenced(), NBUF);
}
