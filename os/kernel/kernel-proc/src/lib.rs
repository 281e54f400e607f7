//! # Processes
//!
//! The process table, per-CPU scheduling and the process lifecycle.
//!
//! The machine is simulated with host threads. Every CPU runs
//! [`ProcessTable::scheduler`] on a thread of its own, and every process
//! gets a thread the first time it is scheduled. A context switch hands a
//! baton between the two, so exactly one of them runs per CPU at any time.
//!
//! User code is a [`Program`]: a closure receiving a [`UserEnv`] that
//! issues system calls and touches user memory through the process's page
//! table.
//!
//! ## Locking
//!
//! * A process lock guards state, channel, killed flag, exit status and pid.
//! * A parent's lock is taken before a child's, and `wait` holds the
//!   parent's lock while it looks at children.
//! * A process switching to the scheduler holds exactly its own lock, which
//!   the scheduler releases; the scheduler hands the lock back the same way.

#![allow(unsafe_code)]

mod blocker;
mod context;
pub mod cpu;
mod error;
pub mod file;
mod lifecycle;
mod proc;
mod sched;
pub mod syscall;
mod table;
pub mod trap;
mod user;

pub use blocker::ProcBlocker;
pub use cpu::ThisCpu;
pub use error::ProcError;
pub use proc::{Pid, ProcState, TrapFrame};
pub use syscall::SysInfo;
pub use table::{CopyDst, CopySrc, KernelMemory, ProcConfig, ProcInfo, ProcessTable};
pub use user::{Program, UserEnv};
