//! Process creation and teardown: `fork`, `exit`, `wait` and `kill`.

use crate::error::ProcError;
use crate::proc::{NO_PARENT, Pid, ProcGuard, ProcState};
use crate::table::{CopyDst, ProcessTable};
use crate::user::exit_zero;
use core::sync::atomic::Ordering::{Acquire, Release};
use kernel_memory_addresses::VirtualAddress;

impl ProcessTable {
    /// Create a new process copying the caller. The child starts with the
    /// caller's memory (eagerly copied or shared copy-on-write), open
    /// files, working directory, name and trace mask, and sees `0` as the
    /// result of its `fork`.
    ///
    /// The child runs the program the caller staged with
    /// [`UserEnv::fork_with`](crate::UserEnv::fork_with), or exits with
    /// status 0 if there is none.
    ///
    /// # Errors
    /// [`ProcError::NoFreeSlot`] or [`ProcError::OutOfMemory`]; nothing is
    /// left behind on failure.
    pub fn fork(&self) -> Result<Pid, ProcError> {
        let (pslot, p) = self.current();
        // Read before locking the child; the parent lock comes first.
        let name = p.lock(&self.cpus).name.clone();

        // Allocate process.
        let (_, mut g) = self.allocproc()?;
        let np = ProcGuard::proc(&g);
        // SAFETY: `p` is the caller; `np` is locked and cannot run yet.
        let (pp, cp) = unsafe { (p.private(), np.private()) };
        let (Some(proot), Some(croot)) = (pp.pagetable, cp.pagetable) else {
            panic!("fork: missing page table");
        };

        // Copy user memory from parent to child.
        let copied = self.space(proot).copy_to(
            &self.space(croot),
            self.frames(),
            pp.sz,
            self.strategy,
        );
        if let Err(err) = copied {
            self.freeproc(np, &mut g);
            return Err(err.into());
        }
        cp.sz = pp.sz;
        np.parent.store(pslot, Release);

        // SAFETY: both trap frames belong to processes we may touch here.
        let (ptf, ctf) = unsafe { (self.trapframe(pp), self.trapframe(cp)) };
        *ctf = *ptf;
        // Cause fork to return 0 in the child.
        ctf.a[0] = 0;

        // Increment reference counts on open file descriptors.
        cp.ofile.clone_from(&pp.ofile);
        cp.cwd.clone_from(&pp.cwd);
        cp.trace_mask = pp.trace_mask;
        cp.program = Some(pp.fork_image.take().unwrap_or_else(|| Box::new(exit_zero)));
        g.set_name(&name);

        let pid = g.pid;
        g.state = ProcState::Runnable;
        drop(g);
        self.idle.notify();
        log::trace!("fork: {name} -> pid {pid}");
        Ok(pid)
    }

    /// Hand the children of `slot` to init. The caller holds `slot`'s lock.
    fn reparent(&self, slot: usize, init: usize) {
        for pp in self.procs.iter() {
            // Only the parent changes `pp.parent`, and we are the parent.
            if pp.parent.load(Acquire) == slot {
                let _g = pp.lock(&self.cpus);
                pp.parent.store(init, Release);
            }
        }
    }

    /// Exit the current process. Does not return. The process stays a
    /// zombie until its parent calls [`Self::wait`].
    ///
    /// # Panics
    /// `"init exiting"` if the caller is the init process.
    pub fn exit(&self, status: i32) -> ! {
        let (slot, p) = self.current();
        let Some(&init) = self.initproc.get() else {
            panic!("exit: no init process");
        };
        assert!(slot != init, "init exiting");

        // Close all open files and drop the working directory.
        // SAFETY: our own process.
        let private = unsafe { p.private() };
        private.ofile.iter_mut().for_each(|f| drop(f.take()));
        private.cwd = None;

        // We might re-parent a child to init. We can't be precise about
        // waking up init, since we can't acquire its lock once we've
        // acquired any other proc lock. So wake up init whether that's
        // necessary or not. Init may miss this wakeup, but that seems
        // harmless.
        {
            let ip = &self.procs[init];
            let mut ig = ip.lock(&self.cpus);
            self.wakeup1(ip, &mut ig);
        }

        // Lock the parent before ourselves. The parent may exit and hand us
        // to init in the meantime; then try again with the new parent.
        let (parent, mut pg) = loop {
            let candidate = p.parent.load(Acquire);
            assert!(candidate != NO_PARENT, "exit: orphan process");
            let pp = &self.procs[candidate];
            let pg = pp.lock(&self.cpus);
            if p.parent.load(Acquire) == candidate {
                break (pp, pg);
            }
        };

        let mut g = p.lock(&self.cpus);

        // Give any children to init.
        self.reparent(slot, init);

        // Parent might be sleeping in wait().
        self.wakeup1(parent, &mut pg);

        g.xstate = status;
        g.state = ProcState::Zombie;
        log::trace!("exit: pid {} status {status}", g.pid);

        drop(pg);

        // Jump into the scheduler, never to return.
        drop(self.sched(g));
        panic!("zombie exit");
    }

    /// Wait for a child to exit and return its pid. With `addr`, its exit
    /// status is stored there as a little-endian `i32`.
    ///
    /// # Errors
    /// - [`ProcError::NoChildren`] if the caller has no children.
    /// - [`ProcError::Killed`] if the caller was killed while waiting.
    /// - [`ProcError::BadAddress`] if `addr` is not writable; the zombie
    ///   stays for a later `wait`.
    pub fn wait(&self, addr: Option<VirtualAddress>) -> Result<Pid, ProcError> {
        let (slot, p) = self.current();

        // Hold our own lock the whole time to avoid lost wakeups from a
        // child's exit().
        let mut g = p.lock(&self.cpus);
        loop {
            // Scan through the table looking for exited children.
            let mut havekids = false;
            for np in self.procs.iter() {
                // `np.parent` is read without `np`'s lock: `np` might be an
                // ancestor, whose lock we must not take while holding ours.
                if np.parent.load(Acquire) != slot {
                    continue;
                }
                let mut ng = np.lock(&self.cpus);
                havekids = true;
                if ng.state != ProcState::Zombie {
                    continue;
                }

                let pid = ng.pid;
                if let Some(va) = addr {
                    self.either_copy_out(CopyDst::User(va), &ng.xstate.to_le_bytes())?;
                }
                self.freeproc(np, &mut ng);
                return Ok(pid);
            }

            // No point waiting if we don't have any children.
            if !havekids {
                return Err(ProcError::NoChildren);
            }
            if g.killed {
                return Err(ProcError::Killed);
            }

            // Wait for a child to exit.
            g = self.sleep_locked(p.channel(), g);
        }
    }

    /// Kill the process with the given pid. The victim won't exit until it
    /// tries to return to user space.
    ///
    /// # Errors
    /// [`ProcError::NoSuchProcess`] if no live process has that pid.
    pub fn kill(&self, pid: Pid) -> Result<(), ProcError> {
        for p in self.procs.iter() {
            let mut g = p.lock(&self.cpus);
            if g.pid != pid || g.state == ProcState::Unused {
                continue;
            }
            g.killed = true;
            if g.state == ProcState::Sleeping {
                // Wake process from sleep().
                g.state = ProcState::Runnable;
                self.idle.notify();
            }
            return Ok(());
        }
        Err(ProcError::NoSuchProcess(pid))
    }

    /// Whether the current process has been killed.
    pub(crate) fn killed(&self) -> bool {
        let (_, p) = self.current();
        p.lock(&self.cpus).killed
    }

    pub(crate) fn set_killed(&self) {
        let (_, p) = self.current();
        p.lock(&self.cpus).killed = true;
    }
}
