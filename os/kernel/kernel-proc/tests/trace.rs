//! Syscall tracing goes through the logger, so this file installs its own.

mod common;

use common::{Machine, SCRATCH, TIMEOUT, reap_forever};
use kernel_proc::syscall::{SYS_FORK, SYS_GETPID};
use kernel_vmem::CopyStrategy;
use log::{LevelFilter, Log, Metadata, Record};
use std::sync::{Mutex, mpsc};

static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct Capture;

impl Log for Capture {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            LINES.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture;

#[test]
fn traced_calls_are_logged_for_the_process_and_its_children() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Info);

    let (tx, rx) = mpsc::channel();
    let _m = Machine::start(1, CopyStrategy::CopyOnWrite, move |env| {
        env.getpid();
        env.trace((1 << SYS_GETPID) | (1 << SYS_FORK));
        let child = env.fork_with(|env| i32::try_from(env.getpid()).unwrap());
        env.getpid();
        env.wait(Some(SCRATCH));
        tx.send(child).unwrap();
        reap_forever(env)
    });
    let child = rx.recv_timeout(TIMEOUT).expect("init reports");

    let lines = LINES.lock().unwrap().clone();
    let traced: Vec<&String> = lines.iter().filter(|l| l.contains(": syscall ")).collect();
    assert!(traced.contains(&&format!("1: syscall fork -> {child}")), "{traced:?}");
    assert!(traced.contains(&&"1: syscall getpid -> 1".to_owned()), "{traced:?}");
    assert!(
        traced.contains(&&format!("{child}: syscall getpid -> {child}")),
        "{traced:?}"
    );
    // Only calls after `trace` and only the selected ones.
    assert_eq!(traced.len(), 3, "{traced:?}");
}
