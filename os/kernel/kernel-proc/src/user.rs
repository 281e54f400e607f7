//! The user side of a process.
//!
//! A process's user code is a Rust closure, a [`Program`]. It reaches the
//! kernel only the way real user code would: through system calls and
//! through loads and stores into its own address space, which fault like
//! the MMU would. Every such access is also an instruction boundary where a
//! pending timer interrupt is taken.

use crate::file::File;
use crate::proc::{Pid, TrapFrame};
use crate::syscall::{
    SYS_CLOSE, SYS_DUP, SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_KILL, SYS_SBRK, SYS_SLEEP,
    SYS_SYSINFO, SYS_TRACE, SYS_UPTIME, SYS_WAIT, SYS_WRITE,
};
use crate::table::ProcessTable;
use crate::trap::Trap;
use kernel_alloc::PhysicalMemory;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, PhysMapper};
use std::sync::Arc;

/// User code of a process. Returning from it is `exit` with the returned
/// status.
pub type Program = Box<dyn FnOnce(&UserEnv<'_>) -> i32 + Send + 'static>;

/// What a forked child runs unless told otherwise.
pub(crate) fn exit_zero(_: &UserEnv<'_>) -> i32 {
    0
}

/// Handle through which user code talks to the kernel.
pub struct UserEnv<'a> {
    table: &'a ProcessTable,
    slot: usize,
}

impl<'a> UserEnv<'a> {
    pub(crate) const fn new(table: &'a ProcessTable, slot: usize) -> Self {
        Self { table, slot }
    }

    /// The kernel this process runs on.
    #[must_use]
    pub const fn kernel(&self) -> &'a ProcessTable {
        self.table
    }

    #[allow(clippy::mut_from_ref)]
    fn trapframe(&self) -> &mut TrapFrame {
        // SAFETY: we are the process.
        unsafe {
            self.table
                .trapframe(self.table.procs[self.slot].private())
        }
    }

    fn space(&self) -> AddressSpace<'a, PhysicalMemory> {
        // SAFETY: we are the process.
        let private = unsafe { self.table.procs[self.slot].private() };
        let Some(root) = private.pagetable else {
            panic!("user: no page table");
        };
        self.table.space(root)
    }

    /// `ecall`: system call `num` with up to six arguments.
    pub fn syscall(&self, num: u64, args: [u64; 6]) -> i64 {
        self.table.user_boundary();
        let tf = self.trapframe();
        tf.a[..6].copy_from_slice(&args);
        tf.a[7] = num;
        self.table.usertrap(Trap::Syscall);
        self.trapframe().a[0].cast_signed()
    }

    fn call1(&self, num: u64, arg: u64) -> i64 {
        self.syscall(num, [arg, 0, 0, 0, 0, 0])
    }

    /// `fork`, with `child` as the user code of the new process.
    pub fn fork_with<F>(&self, child: F) -> i64
    where
        F: FnOnce(&UserEnv<'_>) -> i32 + Send + 'static,
    {
        // SAFETY: we are the process.
        let private = unsafe { self.table.procs[self.slot].private() };
        private.fork_image = Some(Box::new(child));
        let pid = self.call1(SYS_FORK, 0);
        private.fork_image = None;
        pid
    }

    /// `fork` with a child that exits right away with status 0.
    pub fn fork(&self) -> i64 {
        self.call1(SYS_FORK, 0)
    }

    pub fn exit(&self, status: i32) -> ! {
        self.call1(SYS_EXIT, u64::from(status.cast_unsigned()));
        panic!("exit returned");
    }

    /// `wait`, storing the child's exit status at user address `status`
    /// if given.
    pub fn wait(&self, status: Option<u64>) -> i64 {
        self.call1(SYS_WAIT, status.unwrap_or(0))
    }

    pub fn kill(&self, pid: Pid) -> i64 {
        self.call1(SYS_KILL, u64::from(pid.cast_unsigned()))
    }

    pub fn getpid(&self) -> i64 {
        self.call1(SYS_GETPID, 0)
    }

    /// Grow memory by `n` bytes; returns the old size.
    pub fn sbrk(&self, n: i32) -> i64 {
        self.call1(SYS_SBRK, u64::from(n.cast_unsigned()))
    }

    /// Sleep for `n` clock ticks.
    pub fn sleep(&self, n: i32) -> i64 {
        self.call1(SYS_SLEEP, u64::from(n.cast_unsigned()))
    }

    pub fn uptime(&self) -> i64 {
        self.call1(SYS_UPTIME, 0)
    }

    /// Trace the system calls whose bit is set in `mask`, in this process
    /// and its future children.
    pub fn trace(&self, mask: u64) -> i64 {
        self.call1(SYS_TRACE, mask)
    }

    /// Write a [`SysInfo`](crate::SysInfo) to user address `addr`.
    pub fn sysinfo(&self, addr: u64) -> i64 {
        self.call1(SYS_SYSINFO, addr)
    }

    /// Write `n` bytes at user address `addr` to descriptor `fd`.
    pub fn write(&self, fd: i32, addr: u64, n: i32) -> i64 {
        self.syscall(
            SYS_WRITE,
            [u64::from(fd.cast_unsigned()), addr, u64::from(n.cast_unsigned()), 0, 0, 0],
        )
    }

    pub fn dup(&self, fd: i32) -> i64 {
        self.call1(SYS_DUP, u64::from(fd.cast_unsigned()))
    }

    pub fn close(&self, fd: i32) -> i64 {
        self.call1(SYS_CLOSE, u64::from(fd.cast_unsigned()))
    }

    /// Install `file` in the lowest free descriptor, the way `open` or
    /// `pipe` would. Returns `-1` if the table is full.
    pub fn open_file(&self, file: Arc<dyn File>) -> i64 {
        self.table.user_boundary();
        self.table.fdalloc(file).map_or(-1, i64::from)
    }

    /// Give up the CPU as if the timer had fired.
    pub fn yield_now(&self) {
        self.table.usertrap(Trap::Timer);
    }

    /// User store of one byte. Faults are handled like the hardware would
    /// raise them; a fatal fault does not return.
    pub fn store(&self, va: u64, value: u8) {
        self.table.user_boundary();
        let va = VirtualAddress::new(va);
        loop {
            if let Some(pa) = self.space().probe(va, true) {
                // SAFETY: a mapped, user-writable byte of our memory.
                unsafe { *self.table.mem.ram.phys_to_mut::<u8>(pa) = value };
                return;
            }
            self.table.usertrap(Trap::PageFault { va, write: true });
        }
    }

    /// User load of one byte.
    pub fn load(&self, va: u64) -> u8 {
        self.table.user_boundary();
        let va = VirtualAddress::new(va);
        loop {
            if let Some(pa) = self.space().probe(va, false) {
                // SAFETY: a mapped, user-readable byte of our memory.
                return unsafe { *self.table.mem.ram.phys_to_mut::<u8>(pa) };
            }
            self.table.usertrap(Trap::PageFault { va, write: false });
        }
    }

    pub fn store_u64(&self, va: u64, value: u64) {
        for (i, b) in (0..).zip(value.to_le_bytes()) {
            self.store(va + i, b);
        }
    }

    pub fn load_u64(&self, va: u64) -> u64 {
        let mut bytes = [0; 8];
        for (i, b) in (0..).zip(bytes.iter_mut()) {
            *b = self.load(va + i);
        }
        u64::from_le_bytes(bytes)
    }

    /// Size of user memory in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        // SAFETY: we are the process.
        unsafe { self.table.procs[self.slot].private() }.sz
    }
}
