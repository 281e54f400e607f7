//! Entering the kernel from user space and going back.
//!
//! User code calls into the kernel through [`UserEnv`](crate::UserEnv),
//! which raises a [`Trap`] for every system call, page fault and pending
//! timer interrupt.

use crate::table::ProcessTable;
use core::sync::atomic::Ordering::Relaxed;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_sync::Channel;

/// `scause` for an environment call from U-mode.
pub const SCAUSE_ECALL_U: u64 = 8;
/// `scause` for a load page fault.
pub const SCAUSE_LOAD_PAGE_FAULT: u64 = 13;
/// `scause` for a store/AMO page fault.
pub const SCAUSE_STORE_PAGE_FAULT: u64 = 15;
/// `scause` for a supervisor software interrupt, which is how the machine
/// timer reaches the kernel.
pub const SCAUSE_TIMER: u64 = (1 << 63) | 1;

/// Why user code entered the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Syscall,
    PageFault { va: VirtualAddress, write: bool },
    Timer,
}

impl Trap {
    #[must_use]
    pub const fn scause(self) -> u64 {
        match self {
            Self::Syscall => SCAUSE_ECALL_U,
            Self::PageFault { write: false, .. } => SCAUSE_LOAD_PAGE_FAULT,
            Self::PageFault { write: true, .. } => SCAUSE_STORE_PAGE_FAULT,
            Self::Timer => SCAUSE_TIMER,
        }
    }
}

impl ProcessTable {
    /// Handle a trap from user space, then return there.
    ///
    /// A store fault on a copy-on-write page gets a private copy; any other
    /// fault kills the process. A killed process exits here instead of
    /// returning, and a timer interrupt gives up the CPU.
    pub fn usertrap(&self, trap: Trap) {
        let (slot, p) = self.current();
        // We're in the kernel now.
        self.mycpu().intr_off();
        // SAFETY: our own process.
        let tf = unsafe { self.trapframe(p.private()) };

        match trap {
            Trap::Syscall => {
                if self.killed() {
                    self.exit(-1);
                }

                // sepc points to the ecall instruction, but we want to
                // return to the next instruction.
                tf.epc += 4;

                // An interrupt will change sstatus &c registers, so don't
                // enable until done with those registers.
                self.mycpu().intr_on();
                self.syscall();
            }
            Trap::PageFault { va, write: true } => {
                if let Err(err) = self.own_space().resolve_cow_fault(self.frames(), va) {
                    self.unexpected(trap, va, &err);
                    self.set_killed();
                }
            }
            Trap::PageFault { va, write: false } => {
                self.unexpected(trap, va, &"not readable");
                self.set_killed();
            }
            Trap::Timer => {}
        }

        if self.killed() {
            self.exit(-1);
        }

        // Give up the CPU if this is a timer interrupt.
        if trap == Trap::Timer {
            self.yield_cpu();
        }

        self.usertrapret(slot);
    }

    fn unexpected(&self, trap: Trap, va: VirtualAddress, why: &dyn core::fmt::Display) {
        let (_, p) = self.current();
        let pid = p.lock(&self.cpus).pid;
        // SAFETY: our own process.
        let epc = unsafe { self.trapframe(p.private()) }.epc;
        log::warn!("usertrap(): unexpected scause {:#x} pid={pid}", trap.scause());
        log::warn!("            sepc={epc:#x} stval={va}: {why}");
    }

    /// Set up the trap frame for the next entry into the kernel and return
    /// to user space.
    pub(crate) fn usertrapret(&self, slot: usize) {
        let p = &self.procs[slot];
        let cpu = self.mycpu();

        // We're about to switch the destination of traps from kerneltrap()
        // to usertrap(), so turn off interrupts until we're back in user
        // space.
        cpu.intr_off();

        // SAFETY: our own process.
        let tf = unsafe { self.trapframe(p.private()) };
        tf.kernel_satp = self.kernel_space().satp();
        tf.kernel_sp = p.kstack.as_u64() + PAGE_SIZE;
        tf.kernel_hartid = crate::cpu::current().map_or(0, |c| c as u64);

        // sret turns interrupts back on for user mode.
        cpu.intr_on();
    }

    /// Called by user code between instructions: takes a pending timer
    /// interrupt, and stops running once the machine halts.
    pub(crate) fn user_boundary(&self) {
        let cpu = self.mycpu();
        if cpu.timer_pending.swap(false, Relaxed) || self.is_halted() {
            self.usertrap(Trap::Timer);
        }
    }

    /// The timer interrupt: advance `ticks`, wake `sleep` callers and ask
    /// every CPU to reschedule.
    pub fn clock_tick(&self) {
        {
            let mut ticks = self.ticks.lock();
            *ticks += 1;
            self.wakeup(Channel::of(&self.ticks));
        }
        for cpu in self.cpus.iter() {
            cpu.timer_pending.store(true, Relaxed);
        }
        self.idle.notify();
    }

    /// Timer ticks since boot.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        *self.ticks.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scause_values() {
        assert_eq!(Trap::Syscall.scause(), 8);
        let va = VirtualAddress::new(0x1000);
        assert_eq!(Trap::PageFault { va, write: false }.scause(), 13);
        assert_eq!(Trap::PageFault { va, write: true }.scause(), 15);
        assert_eq!(Trap::Timer.scause() >> 63, 1);
    }
}
