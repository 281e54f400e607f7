use kernel::{BootConfig, BootError, CopyStrategy, KERNEL_IMAGE_PAGES, Kernel, ProcState, UserEnv};
use kernel_info::param::{NBUF, NCPU, ROOTDEV};
use log::LevelFilter;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(30);
const SCRATCH: u64 = 0x800;

fn config(ncpu: usize) -> BootConfig {
    BootConfig::default()
        .with_ncpu(ncpu)
        .with_ram_pages(2048)
        .with_disk_blocks(64)
        .with_log_level(LevelFilter::Off)
}

fn boot(ncpu: usize) -> Kernel {
    Kernel::boot(config(ncpu)).expect("boot")
}

fn load_i32(env: &UserEnv<'_>, va: u64) -> i32 {
    i32::from_le_bytes([env.load(va), env.load(va + 1), env.load(va + 2), env.load(va + 3)])
}

fn idle_forever(env: &UserEnv<'_>) -> ! {
    loop {
        if env.wait(None) < 0 {
            env.sleep(1);
        }
    }
}

fn await_state(kernel: &Kernel, pid: i32, state: Option<ProcState>) {
    let deadline = Instant::now() + TIMEOUT;
    while kernel.processes().state_of(pid) != state {
        assert!(Instant::now() < deadline, "pid {pid} never reached {state:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default()
}

#[test]
fn boot_rejects_bad_cpu_counts() {
    for ncpu in [0, NCPU + 1] {
        match Kernel::boot(config(ncpu)) {
            Err(BootError::BadCpuCount(n)) => assert_eq!(n, ncpu),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("booted with {ncpu} cpus"),
        }
    }
}

#[test]
fn boot_rejects_ram_without_room_for_users() {
    let small = config(1).with_ram_pages(KERNEL_IMAGE_PAGES);
    assert!(matches!(
        Kernel::boot(small),
        Err(BootError::TooLittleRam(pages)) if pages == KERNEL_IMAGE_PAGES
    ));
}

#[test]
fn halt_twice_is_harmless() {
    let kernel = boot(2);
    kernel.halt();
    kernel.halt();
    assert!(kernel.wait_for_halt(Duration::ZERO));
    assert_eq!(kernel.panic_message(), None);
}

#[test]
fn exiting_init_stops_the_machine() {
    let kernel = boot(2);
    kernel.start_init(|_| 0).expect("init");
    assert!(kernel.wait_for_halt(TIMEOUT), "machine kept running");
    let message = kernel.panic_message().expect("panic recorded");
    assert!(message.contains("init exiting"), "{message}");
}

#[test]
fn exhausted_allocator_hands_back_the_freed_frame() {
    let kernel = boot(2);
    let pages = kernel.pages();
    let before = pages.free_pages();

    let mut taken = Vec::new();
    while let Some(page) = pages.allocate_page() {
        taken.push(page);
    }
    assert_eq!(taken.len(), before);
    assert_eq!(pages.free_pages(), 0);
    assert!(pages.allocate_page().is_none());

    let returned = taken.swap_remove(taken.len() / 2);
    pages.free_page(returned);
    assert_eq!(pages.allocate_page(), Some(returned));

    for page in taken.into_iter().chain([returned]) {
        pages.free_page(page);
    }
    assert_eq!(pages.free_pages(), before);
}

#[test]
fn forked_writes_stay_private_under_both_strategies() {
    for strategy in [CopyStrategy::CopyOnWrite, CopyStrategy::Eager] {
        let kernel = Kernel::boot(config(2).with_strategy(strategy)).expect("boot");
        let (tx, rx) = mpsc::channel();
        kernel
            .start_init(move |env| {
                env.store(SCRATCH, 7);
                env.fork_with(|env| {
                    env.store(SCRATCH, 9);
                    i32::from(env.load(SCRATCH))
                });
                env.wait(Some(SCRATCH + 8));
                tx.send((env.load(SCRATCH), load_i32(env, SCRATCH + 8))).unwrap();
                idle_forever(env)
            })
            .expect("init");

        let (parent, child) = rx.recv_timeout(TIMEOUT).expect("init reports");
        assert_eq!((parent, child), (7, 9), "{strategy:?}");
    }
}

#[test]
fn exhausted_buffer_cache_panics_until_a_buffer_is_released() {
    let kernel = boot(1);
    let bcache = kernel.bcache();
    let nbuf = u32::try_from(NBUF).unwrap();

    let mut held: Vec<_> = (0..nbuf).map(|b| bcache.read(ROOTDEV, b)).collect();
    assert_eq!(bcache.unreferenced(), 0);

    let err = catch_unwind(AssertUnwindSafe(|| bcache.get(ROOTDEV, nbuf).id()))
        .expect_err("every buffer is referenced");
    assert_eq!(panic_text(&*err), "bget: no buffers");

    bcache.release(held.pop().expect("held buffers"));
    let buf = bcache.get(ROOTDEV, nbuf);
    assert_eq!(buf.blockno(), nbuf);
    drop(buf);
    drop(held);
    assert_eq!(bcache.unreferenced(), NBUF);
}

#[test]
fn released_buffer_wakes_every_waiting_process() {
    const BLOCK: u32 = 7;
    const WAITERS: usize = 3;

    let kernel = boot(3);
    let bcache = Arc::clone(kernel.bcache());
    let held = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let (pids_tx, pids) = mpsc::channel();
    let (done_tx, done) = mpsc::channel();

    {
        let release = Arc::clone(&release);
        kernel
            .start_init(move |env| {
                let holder = {
                    let bcache = Arc::clone(&bcache);
                    let held = Arc::clone(&held);
                    env.fork_with(move |env| {
                        let mut buf = bcache.read(ROOTDEV, BLOCK);
                        buf[0] = 1;
                        held.store(true, Ordering::Release);
                        while !release.load(Ordering::Acquire) {
                            env.yield_now();
                        }
                        bcache.write(&buf);
                        0
                    })
                };
                while !held.load(Ordering::Acquire) {
                    env.yield_now();
                }

                let mut waiters = Vec::new();
                for _ in 0..WAITERS {
                    let bcache = Arc::clone(&bcache);
                    waiters.push(env.fork_with(move |_| {
                        let mut buf = bcache.read(ROOTDEV, BLOCK);
                        buf[0] += 1;
                        bcache.write(&buf);
                        i32::from(buf[0])
                    }));
                }
                pids_tx.send((holder, waiters)).unwrap();

                let mut statuses = Vec::new();
                for _ in 0..=WAITERS {
                    env.wait(Some(SCRATCH));
                    statuses.push(load_i32(env, SCRATCH));
                }
                statuses.sort_unstable();
                done_tx.send(statuses).unwrap();
                idle_forever(env)
            })
            .expect("init");
    }

    let (holder, waiters) = pids.recv_timeout(TIMEOUT).expect("init forks");
    for &pid in &waiters {
        await_state(&kernel, i32::try_from(pid).unwrap(), Some(ProcState::Sleeping));
    }
    assert_ne!(
        kernel.processes().state_of(i32::try_from(holder).unwrap()),
        Some(ProcState::Sleeping)
    );
    assert_eq!(kernel.bcache().refcount(ROOTDEV, BLOCK), Some(4));

    release.store(true, Ordering::Release);
    let statuses = done.recv_timeout(TIMEOUT).expect("init reaps");
    assert_eq!(statuses, [0, 2, 3, 4]);
    assert_eq!(kernel.disk().snapshot(BLOCK).expect("block")[0], 4);
    assert_eq!(kernel.bcache().refcount(ROOTDEV, BLOCK), Some(0));
}

#[test]
fn orphans_are_adopted_and_reaped_by_init() {
    let kernel = boot(2);
    let (tx, rx) = mpsc::channel();
    kernel
        .start_init(move |env| {
            let grandchild = Arc::new(std::sync::Mutex::new(None));
            let slot = Arc::clone(&grandchild);
            let child = env.fork_with(move |env| {
                let pid = env.fork_with(|env| {
                    env.sleep(20);
                    3
                });
                *slot.lock().unwrap() = Some(pid);
                1
            });

            let mut reaped = Vec::new();
            for _ in 0..2 {
                let pid = env.wait(Some(SCRATCH));
                reaped.push((pid, load_i32(env, SCRATCH)));
            }
            reaped.sort_unstable();
            let grandchild = grandchild.lock().unwrap().expect("grandchild forked");
            tx.send((child, grandchild, reaped)).unwrap();
            idle_forever(env)
        })
        .expect("init");

    let (child, grandchild, reaped) = rx.recv_timeout(TIMEOUT).expect("init reports");
    assert_eq!(reaped, [(child, 1), (grandchild, 3)]);
    assert_eq!(kernel.processes().state_of(i32::try_from(grandchild).unwrap()), None);
}

#[test]
fn orphan_points_at_init_while_it_runs() {
    let kernel = boot(2);
    let (tx, rx) = mpsc::channel();
    let release = Arc::new(AtomicBool::new(false));
    {
        let release = Arc::clone(&release);
        kernel
            .start_init(move |env| {
                env.fork_with(move |env| {
                    let pid = env.fork_with(move |env| {
                        while !release.load(Ordering::Acquire) {
                            env.sleep(1);
                        }
                        0
                    });
                    tx.send(pid).unwrap();
                    0
                });
                idle_forever(env)
            })
            .expect("init");
    }

    let orphan = i32::try_from(rx.recv_timeout(TIMEOUT).expect("child forks")).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while kernel.processes().parent_of(orphan) != Some(1) {
        assert!(Instant::now() < deadline, "orphan never adopted");
        thread::sleep(Duration::from_millis(1));
    }
    release.store(true, Ordering::Release);
    await_state(&kernel, orphan, None);
}
