//! # Kernel
//!
//! Ties memory, processes and the buffer cache into one machine that runs
//! on host threads.
//!
//! ```no_run
//! use kernel::{BootConfig, Kernel};
//!
//! let kernel = Kernel::boot(BootConfig::default().with_ncpu(2)).unwrap();
//! kernel
//!     .start_init(|env| {
//!         let child = env.fork_with(|_| 7);
//!         assert_eq!(env.wait(None), child);
//!         loop {
//!             env.sleep(10);
//!         }
//!     })
//!     .unwrap();
//! kernel.halt();
//! ```

mod config;
mod error;
pub mod fs;
mod machine;
mod tracing;

pub use config::{BootConfig, KERNEL_IMAGE_PAGES, KERNEL_TEXT_PAGES};
pub use error::BootError;
pub use machine::{Bcache, Kernel};

pub use kernel_proc::{Pid, ProcError, ProcState, Program, SysInfo, UserEnv};
pub use kernel_vmem::CopyStrategy;
