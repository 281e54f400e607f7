mod common;

use common::{Machine, SCRATCH, TIMEOUT, load_i32, reap_forever};
use kernel_proc::ProcState;
use kernel_sync::{Channel, SpinLock};
use kernel_vmem::CopyStrategy;
use std::sync::mpsc;

#[test]
fn wait_returns_the_child_and_its_status() {
    let (tx, rx) = mpsc::channel();
    let m = Machine::start(2, CopyStrategy::CopyOnWrite, move |env| {
        let child = env.fork_with(|_| 42);
        let reaped = env.wait(Some(SCRATCH));
        tx.send((child, reaped, load_i32(env, SCRATCH))).unwrap();
        reap_forever(env)
    });

    let (child, reaped, status) = rx.recv_timeout(TIMEOUT).expect("init reports");
    assert_eq!(child, 2);
    assert_eq!(reaped, child);
    assert_eq!(status, 42);
    assert_eq!(m.table.state_of(2), None);
}

#[test]
fn wait_without_children_fails_immediately() {
    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(1, CopyStrategy::CopyOnWrite, move |env| {
        tx.send(env.wait(None)).unwrap();
        reap_forever(env)
    });
    assert_eq!(rx.recv_timeout(TIMEOUT).expect("init reports"), -1);
}

fn child_writes_do_not_reach_the_parent(strategy: CopyStrategy) {
    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(2, strategy, move |env| {
        env.store(SCRATCH, 0xAA);
        let before = env.kernel().memory().pages.free_pages();

        env.fork_with(|env| {
            let inherited = env.load(SCRATCH);
            env.store(SCRATCH, 0x55);
            i32::from(inherited == 0xAA && env.load(SCRATCH) == 0x55)
        });
        env.wait(Some(SCRATCH + 16));
        let child_ok = load_i32(env, SCRATCH + 16);
        let parent_sees = env.load(SCRATCH);

        let after = env.kernel().memory().pages.free_pages();
        tx.send((child_ok, parent_sees, before, after)).unwrap();
        reap_forever(env)
    });

    let (child_ok, parent_sees, before, after) = rx.recv_timeout(TIMEOUT).expect("init reports");
    assert_eq!(child_ok, 1);
    assert_eq!(parent_sees, 0xAA);
    assert_eq!(before, after, "frames leaked across fork/exit/wait");
}

#[test]
fn cow_child_writes_are_private() {
    child_writes_do_not_reach_the_parent(CopyStrategy::CopyOnWrite);
}

#[test]
fn eager_child_writes_are_private() {
    child_writes_do_not_reach_the_parent(CopyStrategy::Eager);
}

#[test]
fn exit_hands_children_to_init() {
    let (tx, rx) = mpsc::channel();
    let m = Machine::start(2, CopyStrategy::CopyOnWrite, move |env| {
        let kids = tx.clone();
        let a = env.fork_with(move |env| {
            let a = i32::try_from(env.getpid()).unwrap();
            for _ in 0..2 {
                let kids = kids.clone();
                env.fork_with(move |env| {
                    let me = i32::try_from(env.getpid()).unwrap();
                    // Wait until our parent has exited.
                    while env.kernel().parent_of(me) == Some(a) {
                        env.sleep(1);
                    }
                    kids.send(("grandchild", me, env.kernel().parent_of(me))).unwrap();
                    3
                });
            }
            9
        });

        let mut reaped = vec![];
        for _ in 0..3 {
            reaped.push(env.wait(Some(SCRATCH)));
            reaped.push(i64::from(load_i32(env, SCRATCH)));
        }
        tx.send(("init", i32::try_from(a).unwrap(), None)).unwrap();
        for pair in reaped.chunks(2) {
            tx.send(("status", i32::try_from(pair[1]).unwrap(), i32::try_from(pair[0]).ok()))
                .unwrap();
        }
        reap_forever(env)
    });

    let mut grandchildren = vec![];
    let mut statuses = vec![];
    let mut a = 0;
    while statuses.len() < 3 {
        match rx.recv_timeout(TIMEOUT).expect("progress") {
            ("grandchild", pid, parent) => grandchildren.push((pid, parent)),
            ("init", pid, _) => a = pid,
            ("status", status, Some(pid)) => statuses.push((pid, status)),
            _ => {}
        }
    }

    assert_eq!(grandchildren.len(), 2);
    for (pid, parent) in &grandchildren {
        // Reparented to init, which is pid 1.
        assert_eq!(*parent, Some(1), "pid {pid}");
    }
    statuses.sort_unstable();
    assert_eq!(statuses[0], (a, 9));
    assert!(statuses[1..].iter().all(|&(_, status)| status == 3));
    assert_eq!(m.table.nproc(), 1);
}

#[test]
fn kill_wakes_a_sleeping_process_which_exits() {
    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(2, CopyStrategy::CopyOnWrite, move |env| {
        let victim = env.fork_with(|env| {
            loop {
                env.sleep(1_000);
            }
        });
        let victim = i32::try_from(victim).unwrap();
        while env.kernel().state_of(victim) != Some(ProcState::Sleeping) {
            env.sleep(1);
        }
        let killed = env.kill(victim);
        let reaped = env.wait(Some(SCRATCH));
        let missing = env.kill(9_999);
        tx.send((killed, reaped, i64::from(victim), load_i32(env, SCRATCH), missing))
            .unwrap();
        reap_forever(env)
    });

    let (killed, reaped, victim, status, missing) = rx.recv_timeout(TIMEOUT).expect("init reports");
    assert_eq!(killed, 0);
    assert_eq!(reaped, victim);
    assert_eq!(status, -1);
    assert_eq!(missing, -1);
}

#[test]
fn bad_user_accesses_kill_only_the_offender() {
    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(1, CopyStrategy::CopyOnWrite, move |env| {
        env.fork_with(|env| {
            env.store(0x40_0000, 1);
            0
        });
        env.wait(Some(SCRATCH));
        let store = load_i32(env, SCRATCH);

        env.fork_with(|env| i32::from(env.load(0x40_0000)));
        env.wait(Some(SCRATCH));
        let load = load_i32(env, SCRATCH);

        tx.send((store, load)).unwrap();
        reap_forever(env)
    });

    assert_eq!(rx.recv_timeout(TIMEOUT).expect("init reports"), (-1, -1));
}

#[test]
fn many_children_across_cpus() {
    const KIDS: i32 = 16;
    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(4, CopyStrategy::CopyOnWrite, move |env| {
        let mut pids = vec![];
        for i in 0..KIDS {
            pids.push(env.fork_with(move |env| {
                env.yield_now();
                let top = u64::try_from(env.sbrk(4096)).unwrap();
                env.store(top + 8, 7);
                env.yield_now();
                if env.load(top + 8) == 7 { i } else { -100 }
            }));
        }
        let mut sum = 0;
        let mut reaped = vec![];
        for _ in 0..KIDS {
            reaped.push(env.wait(Some(SCRATCH)));
            sum += load_i32(env, SCRATCH);
        }
        pids.sort_unstable();
        reaped.sort_unstable();
        tx.send((pids, reaped, sum)).unwrap();
        reap_forever(env)
    });

    let (pids, reaped, sum) = rx.recv_timeout(TIMEOUT).expect("init reports");
    assert_eq!(pids, reaped);
    assert!(pids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sum, (0..KIDS).sum());
}

#[test]
fn init_must_not_exit() {
    let m = Machine::start(1, CopyStrategy::CopyOnWrite, |_| 0);
    m.await_halt();
    let message = m.table.panic_message().expect("kernel panicked");
    assert!(message.contains("init exiting"), "{message}");
}

#[test]
fn procdump_lists_live_processes() {
    let (tx, rx) = mpsc::channel();
    let m = Machine::start(1, CopyStrategy::CopyOnWrite, move |env| {
        env.fork_with(|env| {
            // Nobody ever signals this channel.
            let lock = SpinLock::new(());
            loop {
                let g = lock.lock();
                drop(env.kernel().sleep(Channel::of(&lock), g));
            }
        });
        tx.send(()).unwrap();
        reap_forever(env)
    });

    rx.recv_timeout(TIMEOUT).expect("init reports");
    m.await_state(2, Some(ProcState::Sleeping));
    let dump = m.table.procdump();
    assert_eq!(dump.len(), 2);
    assert_eq!(dump[0].pid, 1);
    assert_eq!(dump[0].name, "initcode");
    assert_eq!(dump[1].name, "initcode");
    assert_eq!(dump[1].parent, Some(1));
    assert_eq!(dump[1].state.to_string(), "sleep ");
}
