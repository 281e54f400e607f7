//! Per-CPU scheduling, `sched`, and `sleep`/`wakeup`.

use crate::context::{Baton, Context, ProcessRetired, swtch};
use crate::cpu::{self, Cpu, NO_PROC};
use crate::proc::{Pid, Proc, ProcGuard, ProcShared, ProcState};
use crate::table::ProcessTable;
use crate::user::{UserEnv, exit_zero};
use core::sync::atomic::Ordering::{Relaxed, SeqCst};
use kernel_sync::{Channel, SpinLockGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::thread;

/// Text of a panic payload.
pub(crate) fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl ProcessTable {
    pub(crate) fn mycpu(&self) -> &Cpu {
        let Some(c) = cpu::current() else {
            panic!("mycpu: not on a cpu");
        };
        &self.cpus[c]
    }

    /// Run the scheduler of CPU `c` on the calling thread until the machine
    /// halts.
    ///
    /// Each pass looks for a runnable process, marks it running and switches
    /// to it. The process switches back through [`Self::sched`] still holding
    /// its lock, which is released here. A CPU without work waits for the
    /// next wakeup, fork or clock tick.
    ///
    /// # Panics
    /// If `c` is not a CPU of this machine.
    pub fn scheduler(&self, c: usize) {
        let cpu = &self.cpus[c];
        cpu::set_current(Some(c));
        cpu.proc.store(NO_PROC, Relaxed);
        log::debug!("cpu {c}: scheduler starting");

        'run: loop {
            // Avoid deadlock by ensuring that devices can interrupt.
            cpu.intr_on();

            let seen = self.idle.generation();
            let mut found = false;
            for (slot, p) in self.procs.iter().enumerate() {
                if self.is_halted() {
                    break 'run;
                }
                let mut g = p.lock(&self.cpus);
                if g.state != ProcState::Runnable {
                    continue;
                }
                let Some(ctx) = g.context.clone() else {
                    panic!("scheduler: runnable process without context");
                };

                // Switch to the chosen process. It is the process's job to
                // release its lock and then reacquire it before jumping back.
                g.state = ProcState::Running;
                cpu.proc.store(slot, Relaxed);
                cpu.timer_pending.store(false, Relaxed);
                if ctx.claim_start() {
                    self.start_thread(slot, g.pid, Arc::clone(&ctx));
                }
                let p = ProcGuard::leak(g);
                let baton = swtch(&cpu.context, &ctx, Baton::Run(c));

                // Process is done running for now.
                cpu.proc.store(NO_PROC, Relaxed);
                if baton != Baton::Run(c) {
                    break 'run;
                }
                // SAFETY: `sched` handed its hold of the lock to us.
                drop(unsafe { p.assume_locked(&self.cpus) });
                found = true;
            }

            if !found {
                self.idle.wait(seen);
            }
        }

        cpu.intr_off();
        cpu::set_current(None);
        log::debug!("cpu {c}: scheduler stopped");
    }

    /// [`Self::scheduler`] for a CPU thread: a kernel panic on this CPU is
    /// recorded and halts the machine instead of unwinding further.
    pub fn run_cpu(&self, c: usize) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.scheduler(c)));
        if let Err(payload) = outcome {
            self.record_panic(panic_text(&*payload));
            cpu::set_current(None);
        }
    }

    fn start_thread(&self, slot: usize, pid: Pid, ctx: Arc<Context>) {
        let Some(table) = self.this.upgrade() else {
            panic!("scheduler: process table is gone");
        };
        let spawned = thread::Builder::new()
            .name(format!("proc-{pid}"))
            .spawn(move || table.process_main(slot, &ctx));
        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
                threads.retain(|t| !t.is_finished());
                threads.push(handle);
            }
            Err(err) => panic!("scheduler: cannot start pid {pid}: {err}"),
        }
    }

    /// Body of a process thread. Waits for the first dispatch, then runs
    /// the process until it is retired.
    fn process_main(&self, slot: usize, ctx: &Context) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Baton::Run(c) = ctx.park() {
                cpu::set_current(Some(c));
                self.forkret(slot);
            }
        }));
        let Err(payload) = outcome else {
            return;
        };
        if payload.is::<ProcessRetired>() {
            return;
        }

        // A kernel panic: stop the machine and give the CPU back so its
        // scheduler can notice.
        self.record_panic(panic_text(&*payload));
        let p = &self.procs[slot];
        if p.holding() {
            // SAFETY: held by this thread, which will not touch it again.
            unsafe { p.force_release() };
        }
        if let Some(c) = cpu::current() {
            cpu::set_current(None);
            self.cpus[c].context.resume(Baton::Retire);
        }
    }

    /// A fork child's very first scheduling by `scheduler` switches here.
    fn forkret(&self, slot: usize) -> ! {
        let p = &self.procs[slot];
        // Still holding the lock from the scheduler.
        // SAFETY: the scheduler leaked its guard before switching to us.
        drop(unsafe { p.assume_locked(&self.cpus) });

        self.usertrapret(slot);
        // SAFETY: our own process.
        let program = unsafe { p.private() }.program.take();
        let env = UserEnv::new(self, slot);
        let status = program.map_or_else(|| exit_zero(&env), |f| f(&env));
        env.exit(status)
    }

    /// Switch to the scheduler. The caller holds only the process lock and
    /// has already changed the process state; the lock comes back held.
    ///
    /// Saves and restores `intena` because it is a property of this kernel
    /// thread, not of the CPU it happens to run on.
    pub(crate) fn sched<'a>(&'a self, guard: ProcGuard<'a>) -> ProcGuard<'a> {
        let Some(c) = cpu::current() else {
            panic!("sched: not on a cpu");
        };
        let cpu = &self.cpus[c];
        assert!(ProcGuard::proc(&guard).holding(), "sched p->lock");
        assert!(cpu.noff() == 1, "sched locks");
        assert!(guard.state != ProcState::Running, "sched running");
        assert!(!cpu.intr_get(), "sched interruptible");

        let intena = cpu.intena();
        let Some(ctx) = guard.context.clone() else {
            panic!("sched: no context");
        };
        let p = ProcGuard::leak(guard);
        match swtch(&ctx, &cpu.context, Baton::Run(c)) {
            Baton::Run(next) => {
                cpu::set_current(Some(next));
                self.cpus[next].set_intena(intena);
                // SAFETY: the scheduler that resumed us leaked its guard.
                unsafe { p.assume_locked(&self.cpus) }
            }
            Baton::Retire | Baton::Parked => {
                cpu::set_current(None);
                panic::resume_unwind(Box::new(ProcessRetired))
            }
        }
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_cpu(&self) {
        let (_, p) = self.current();
        let mut g = p.lock(&self.cpus);
        g.state = ProcState::Runnable;
        drop(self.sched(g));
    }

    /// Atomically release `lk` and sleep on `chan`; reacquire `lk` when
    /// awakened.
    ///
    /// Must be called from a process.
    pub fn sleep<'a, T>(&self, chan: Channel, lk: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let (_, p) = self.current();

        // Once we hold the process lock we are guaranteed not to miss any
        // wakeup, because wakeup locks it too; so it is okay to drop `lk`.
        let g = p.lock(&self.cpus);
        let lock = SpinLockGuard::unlock(lk);
        drop(self.sleep_locked(chan, g));
        lock.lock()
    }

    /// [`Self::sleep`] where the lock to release is the process's own.
    pub(crate) fn sleep_locked<'a>(&'a self, chan: Channel, mut g: ProcGuard<'a>) -> ProcGuard<'a> {
        g.chan = Some(chan);
        g.state = ProcState::Sleeping;
        let mut g = self.sched(g);
        g.chan = None;
        g
    }

    /// Wake up all processes sleeping on `chan`. Must be called without any
    /// process lock held.
    pub fn wakeup(&self, chan: Channel) {
        let me = self.myproc();
        let mut woke = false;
        for (slot, p) in self.procs.iter().enumerate() {
            if Some(slot) == me {
                continue;
            }
            let mut g = p.lock(&self.cpus);
            if g.state == ProcState::Sleeping && g.chan == Some(chan) {
                g.state = ProcState::Runnable;
                woke = true;
            }
        }
        if woke {
            self.idle.notify();
        }
    }

    /// Wake `p` if it sleeps in `wait`. The caller holds `p`'s lock.
    pub(crate) fn wakeup1(&self, p: &Proc, g: &mut ProcShared) {
        if g.state == ProcState::Sleeping && g.chan == Some(p.channel()) {
            g.state = ProcState::Runnable;
            self.idle.notify();
        }
    }

    /// Number of CPUs currently running a process.
    #[must_use]
    pub fn busy_cpus(&self) -> usize {
        self.cpus
            .iter()
            .filter(|c| c.proc.load(SeqCst) != NO_PROC)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_text_reads_common_payloads() {
        assert_eq!(panic_text(&"static"), "static");
        assert_eq!(panic_text(&String::from("owned")), "owned");
        assert_eq!(panic_text(&42_u8), "unknown panic");
    }
}
