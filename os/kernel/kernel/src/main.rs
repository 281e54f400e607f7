//! # Kernel Entry Point
//!
//! Boots the simulated machine and runs a small init: it opens the console,
//! forks workers that grow their memory and touch the disk, reaps them,
//! reports and lets the machine halt.

use kernel::fs::Console;
use kernel::{BootConfig, Kernel, SysInfo};
use kernel_info::param::ROOTDEV;
use log::LevelFilter;
use std::process::ExitCode;
use std::sync::{Arc, mpsc};
use std::time::Duration;

const WORKERS: u32 = 4;

/// Where init keeps its `sysinfo`, past the end of its code.
const SCRATCH: u64 = 0x800;

fn main() -> ExitCode {
    let config = BootConfig::default().with_log_level(LevelFilter::Info);
    let kernel = match Kernel::boot(config) {
        Ok(kernel) => kernel,
        Err(err) => {
            log::error!("boot failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let console = Arc::new(Console);
    let bcache = Arc::clone(kernel.bcache());
    let (done, finished) = mpsc::channel();
    let init = kernel.start_init(move |env| {
        // stdin, stdout, stderr
        for _ in 0..3 {
            env.open_file(console.clone());
        }

        for w in 0..WORKERS {
            let bcache = Arc::clone(&bcache);
            env.fork_with(move |env| {
                let Ok(top) = u64::try_from(env.sbrk(4096)) else {
                    return 1;
                };
                env.store(top, 0x5A);

                let mut buf = bcache.read(ROOTDEV, w);
                buf[0] = env.load(top);
                bcache.write(&buf);
                drop(buf);

                let line = format!("worker {w}: pid {} wrote block {w}", env.getpid());
                for (va, b) in (top..).zip(line.bytes()) {
                    env.store(va, b);
                }
                let len = i32::try_from(line.len()).unwrap_or(0);
                i32::from(env.write(1, top, len) != i64::from(len))
            });
        }

        let mut reaped = 0;
        while env.wait(None) > 0 {
            reaped += 1;
        }

        env.sysinfo(SCRATCH);
        let mut bytes = [0; SysInfo::SIZE];
        for (i, b) in (0..).zip(bytes.iter_mut()) {
            *b = env.load(SCRATCH + i);
        }
        env.kernel().procdump();
        let _ = done.send((reaped, SysInfo::from_bytes(bytes)));

        loop {
            env.sleep(100);
        }
    });
    if let Err(err) = init {
        log::error!("cannot start init: {err}");
        return ExitCode::FAILURE;
    }

    let outcome = finished.recv_timeout(Duration::from_secs(30));
    kernel.halt();
    match (outcome, kernel.panic_message()) {
        (_, Some(message)) => {
            log::error!("kernel panic: {message}");
            ExitCode::FAILURE
        }
        (Ok((reaped, info)), None) => {
            log::info!(
                "init reaped {reaped} workers; {} bytes free, {} processes",
                info.freemem,
                info.nproc
            );
            log::info!("disk: {} reads, {} writes", kernel.disk().reads(), kernel.disk().writes());
            ExitCode::SUCCESS
        }
        (Err(_), None) => {
            log::error!("init did not finish");
            ExitCode::FAILURE
        }
    }
}
