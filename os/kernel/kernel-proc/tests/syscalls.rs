mod common;

use common::{Machine, SCRATCH, TIMEOUT, reap_forever};
use kernel_proc::file::File;
use kernel_proc::{SysInfo, UserEnv};
use kernel_vmem::CopyStrategy;
use std::sync::{Arc, mpsc};

fn run(init: impl FnOnce(&UserEnv<'_>) -> Vec<i64> + Send + 'static) -> Vec<i64> {
    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(1, CopyStrategy::CopyOnWrite, move |env| {
        tx.send(init(env)).unwrap();
        reap_forever(env)
    });
    rx.recv_timeout(TIMEOUT).expect("init reports")
}

#[test]
fn getpid_and_unknown_calls() {
    let out = run(|env| vec![env.getpid(), env.syscall(99, [0; 6])]);
    assert_eq!(out, vec![1, -1]);
}

#[test]
fn sbrk_grows_and_shrinks() {
    let out = run(|env| {
        let first = env.sbrk(8192);
        env.store(4096 + 100, 9);
        env.store(8192 + 100, 8);
        let stored = i64::from(env.load(4096 + 100)) + i64::from(env.load(8192 + 100));
        let second = env.sbrk(-8192);
        let huge = env.sbrk(i32::MAX);
        vec![first, stored, second, i64::try_from(env.size()).unwrap(), huge]
    });
    assert_eq!(out, vec![4096, 17, 12288, 4096, -1]);
}

#[test]
fn sysinfo_reports_memory_and_processes() {
    let out = run(|env| {
        let rc = env.sysinfo(SCRATCH);
        let read = |env: &UserEnv<'_>| {
            let mut bytes = [0; SysInfo::SIZE];
            for (i, b) in (0..).zip(bytes.iter_mut()) {
                *b = env.load(SCRATCH + i);
            }
            SysInfo::from_bytes(bytes)
        };
        let alone = read(env);

        env.sbrk(4 * 4096);
        env.fork_with(|env| {
            env.sleep(1_000);
            0
        });
        env.sysinfo(SCRATCH);
        let crowded = read(env);

        let bad = env.sysinfo(0xdead_0000);
        vec![
            rc,
            i64::try_from(alone.nproc).unwrap(),
            i64::try_from(crowded.nproc).unwrap(),
            i64::from(alone.freemem - crowded.freemem >= 4 * 4096),
            bad,
        ]
    });
    assert_eq!(out, vec![0, 1, 2, 1, -1]);
}

struct Console;

impl File for Console {
    fn describe(&self) -> String {
        "console".to_owned()
    }
}

#[test]
fn dup_and_close_share_the_open_file() {
    let file: Arc<dyn File> = Arc::new(Console);
    let probe = Arc::clone(&file);
    let out = run(move |env| {
        let fd = env.open_file(file);
        let dup = env.dup(0);
        let shared = i64::try_from(Arc::strong_count(&probe)).unwrap();
        let closed = env.close(0);
        let again = env.close(0);
        let bad = env.dup(7);
        let negative = env.close(-1);
        let left = i64::try_from(Arc::strong_count(&probe)).unwrap();
        vec![fd, dup, shared, closed, again, bad, negative, left]
    });
    assert_eq!(out, vec![0, 1, 3, 0, -1, -1, -1, 2]);
}

#[test]
fn fork_shares_open_files_until_exit() {
    let file: Arc<dyn File> = Arc::new(Console);
    let probe = Arc::clone(&file);
    let out = run(move |env| {
        env.open_file(file);
        let before = Arc::strong_count(&probe);
        let watch = Arc::clone(&probe);
        env.fork_with(move |env| {
            // Parent's handle, ours and `watch` itself.
            let count = Arc::strong_count(&watch);
            drop(watch);
            i32::try_from(count).unwrap() * 10 + i32::try_from(env.close(0)).unwrap()
        });
        env.wait(Some(SCRATCH));
        let status = common::load_i32(env, SCRATCH);
        let after = Arc::strong_count(&probe);
        vec![
            i64::try_from(before).unwrap(),
            i64::from(status),
            i64::try_from(after).unwrap(),
        ]
    });
    // probe + init's descriptor, then + watch + child's descriptor.
    assert_eq!(out, vec![2, 40, 2]);
}
