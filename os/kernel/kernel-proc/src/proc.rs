//! Process control blocks.

use crate::context::Context;
use crate::cpu::{self, Cpu};
use crate::file::{File, Inode};
use crate::user::Program;
use core::cell::UnsafeCell;
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use kernel_info::param::{NOFILE, PROC_NAME_LEN};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_sync::{Channel, SpinLock, SpinLockGuard};
use std::sync::Arc;

pub type Pid = i32;

/// Marker for "no parent" in [`Proc::parent`].
pub(crate) const NO_PARENT: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcState {
    Unused,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unused => "unused",
            Self::Sleeping => "sleep ",
            Self::Runnable => "runble",
            Self::Running => "run   ",
            Self::Zombie => "zombie",
        })
    }
}

/// Saved user registers, stored in the process's trap-frame page and mapped
/// just below the trampoline in its address space.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    pub kernel_satp: u64,
    pub kernel_sp: u64,
    pub kernel_trap: u64,
    /// User program counter.
    pub epc: u64,
    pub kernel_hartid: u64,
    pub ra: u64,
    /// User stack pointer.
    pub sp: u64,
    /// `a0` through `a7`.
    pub a: [u64; 8],
}

/// Fields guarded by the process lock.
pub struct ProcShared {
    pub pid: Pid,
    pub name: String,
    pub state: ProcState,
    /// Channel this process sleeps on, if sleeping.
    pub chan: Option<Channel>,
    pub killed: bool,
    /// Exit status, for the parent's `wait`.
    pub xstate: i32,
    pub(crate) context: Option<Arc<Context>>,
}

impl ProcShared {
    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.extend(name.chars().take(PROC_NAME_LEN - 1));
    }
}

/// Fields only the process itself touches, except while it cannot run:
/// during creation (`allocproc`, `fork`) and after it became a zombie
/// (`wait`), both under its lock.
#[derive(Default)]
pub(crate) struct ProcPrivate {
    /// Size of user memory in bytes.
    pub sz: u64,
    pub pagetable: Option<PhysicalPage>,
    pub trapframe: Option<PhysicalPage>,
    pub ofile: [Option<Arc<dyn File>>; NOFILE],
    pub cwd: Option<Arc<dyn Inode>>,
    /// Bit `n` set: trace system call `n`.
    pub trace_mask: u64,
    /// Code to run on first return to user space.
    pub program: Option<Program>,
    /// Code for the child of the next `fork`.
    pub fork_image: Option<Program>,
}

pub struct Proc {
    lock: SpinLock<ProcShared>,
    /// CPU holding `lock`, plus one; zero when free or held outside a CPU.
    holder: AtomicUsize,
    /// Slot of the parent. Written by the parent (or, when reparenting, by
    /// the exiting parent) with this lock held; read without it.
    pub(crate) parent: AtomicUsize,
    private: UnsafeCell<ProcPrivate>,
    /// Kernel stack of this slot.
    pub(crate) kstack: VirtualAddress,
}

// Safety: `private` follows the access rule documented on `ProcPrivate`.
unsafe impl Sync for Proc {}

impl Proc {
    pub(crate) fn new(kstack: VirtualAddress) -> Self {
        Self {
            lock: SpinLock::new(ProcShared {
                pid: 0,
                name: String::new(),
                state: ProcState::Unused,
                chan: None,
                killed: false,
                xstate: 0,
                context: None,
            }),
            holder: AtomicUsize::new(0),
            parent: AtomicUsize::new(NO_PARENT),
            private: UnsafeCell::new(ProcPrivate::default()),
            kstack,
        }
    }

    /// Acquire the process lock, disabling interrupts on this CPU until it is
    /// released.
    ///
    /// # Panics
    /// If this CPU already holds the lock (`"acquire"`).
    pub(crate) fn lock<'a>(&'a self, cpus: &'a [Cpu]) -> ProcGuard<'a> {
        let me = cpu::current();
        if let Some(c) = me {
            cpus[c].push_off();
            assert!(!self.holding(), "acquire");
        }
        let inner = self.lock.lock();
        self.holder.store(me.map_or(0, |c| c + 1), Relaxed);
        ProcGuard {
            cpus,
            proc: self,
            inner: ManuallyDrop::new(inner),
        }
    }

    /// Whether the calling CPU holds the lock.
    pub(crate) fn holding(&self) -> bool {
        self.lock.is_locked() && cpu::current().is_some_and(|c| self.holder.load(Relaxed) == c + 1)
    }

    /// Pick up a hold handed over with [`ProcGuard::leak`].
    ///
    /// # Safety
    /// The lock must be held and the hold must have been handed to the
    /// caller; nobody else may use it any more.
    pub(crate) unsafe fn assume_locked<'a>(&'a self, cpus: &'a [Cpu]) -> ProcGuard<'a> {
        self.holder
            .store(cpu::current().map_or(0, |c| c + 1), Relaxed);
        ProcGuard {
            cpus,
            proc: self,
            inner: ManuallyDrop::new(unsafe { self.lock.assume_locked() }),
        }
    }

    /// Drop a hold whose guard was lost to a panic.
    ///
    /// # Safety
    /// The caller held the lock and nobody else uses that hold.
    pub(crate) unsafe fn force_release(&self) {
        self.holder.store(0, Relaxed);
        unsafe { self.lock.force_unlock() };
    }

    /// # Safety
    /// See [`ProcPrivate`]: the caller is this process, or holds the lock
    /// while the process cannot run.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn private(&self) -> &mut ProcPrivate {
        unsafe { &mut *self.private.get() }
    }

    pub(crate) fn channel(&self) -> Channel {
        Channel::of(self)
    }
}

/// Held process lock.
pub struct ProcGuard<'a> {
    cpus: &'a [Cpu],
    proc: &'a Proc,
    inner: ManuallyDrop<SpinLockGuard<'a, ProcShared>>,
}

impl<'a> ProcGuard<'a> {
    /// Keep the lock held but forget the guard; used across a context switch.
    #[must_use = "the lock stays held"]
    pub(crate) fn leak(mut guard: Self) -> &'a Proc {
        let proc = guard.proc;
        // SAFETY: taken once; `guard` is forgotten right after.
        let inner = unsafe { ManuallyDrop::take(&mut guard.inner) };
        let _ = SpinLockGuard::leak(inner);
        core::mem::forget(guard);
        proc
    }

    pub(crate) const fn proc(guard: &Self) -> &'a Proc {
        guard.proc
    }
}

impl Deref for ProcGuard<'_> {
    type Target = ProcShared;
    fn deref(&self) -> &ProcShared {
        &self.inner
    }
}

impl DerefMut for ProcGuard<'_> {
    fn deref_mut(&mut self) -> &mut ProcShared {
        &mut self.inner
    }
}

impl Drop for ProcGuard<'_> {
    fn drop(&mut self) {
        self.proc.holder.store(0, Relaxed);
        // SAFETY: dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        if let Some(c) = cpu::current() {
            self.cpus[c].pop_off();
        }
    }
}
