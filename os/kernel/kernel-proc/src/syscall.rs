//! System call numbers and their kernel side.
//!
//! Arguments arrive in `a0`..`a5` of the trap frame, the call number in
//! `a7`; the result goes back in `a0`, with `-1` for every failure.

use crate::error::ProcError;
use crate::file::File;
use crate::table::{CopyDst, CopySrc, ProcessTable};
use kernel_info::param::NOFILE;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::Channel;
use std::sync::Arc;

pub const SYS_FORK: u64 = 1;
pub const SYS_EXIT: u64 = 2;
pub const SYS_WAIT: u64 = 3;
pub const SYS_KILL: u64 = 6;
pub const SYS_DUP: u64 = 10;
pub const SYS_GETPID: u64 = 11;
pub const SYS_SBRK: u64 = 12;
pub const SYS_SLEEP: u64 = 13;
pub const SYS_UPTIME: u64 = 14;
pub const SYS_WRITE: u64 = 16;
pub const SYS_CLOSE: u64 = 21;
pub const SYS_TRACE: u64 = 22;
pub const SYS_SYSINFO: u64 = 23;

/// Name of a system call, as printed by `trace`.
#[must_use]
pub const fn name(num: u64) -> Option<&'static str> {
    Some(match num {
        SYS_FORK => "fork",
        SYS_EXIT => "exit",
        SYS_WAIT => "wait",
        SYS_KILL => "kill",
        SYS_DUP => "dup",
        SYS_GETPID => "getpid",
        SYS_SBRK => "sbrk",
        SYS_SLEEP => "sleep",
        SYS_UPTIME => "uptime",
        SYS_WRITE => "write",
        SYS_CLOSE => "close",
        SYS_TRACE => "trace",
        SYS_SYSINFO => "sysinfo",
        _ => return None,
    })
}

/// Result of `sysinfo`, as copied to user memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SysInfo {
    /// Free physical memory in bytes.
    pub freemem: u64,
    /// Processes whose state is not unused.
    pub nproc: u64,
}

impl SysInfo {
    pub const SIZE: usize = 16;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0; Self::SIZE];
        out[..8].copy_from_slice(&self.freemem.to_le_bytes());
        out[8..].copy_from_slice(&self.nproc.to_le_bytes());
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut freemem = [0; 8];
        let mut nproc = [0; 8];
        freemem.copy_from_slice(&bytes[..8]);
        nproc.copy_from_slice(&bytes[8..]);
        Self {
            freemem: u64::from_le_bytes(freemem),
            nproc: u64::from_le_bytes(nproc),
        }
    }
}

impl ProcessTable {
    /// Run the system call in the current process's trap frame.
    pub(crate) fn syscall(&self) {
        let (_, p) = self.current();
        // SAFETY: our own process.
        let num = unsafe { self.trapframe(p.private()) }.a[7];

        let ret = match self.dispatch(num) {
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                log::trace!("syscall {num}: {err}");
                -1
            }
            None => {
                let g = p.lock(&self.cpus);
                log::warn!("{} {}: unknown sys call {num}", g.pid, g.name);
                -1
            }
        };

        // SAFETY: as above.
        let private = unsafe { p.private() };
        unsafe { self.trapframe(private) }.a[0] = ret.cast_unsigned();

        if num < 64 && private.trace_mask & (1 << num) != 0 {
            let pid = p.lock(&self.cpus).pid;
            log::info!("{pid}: syscall {} -> {ret}", name(num).unwrap_or("?"));
        }
    }

    fn dispatch(&self, num: u64) -> Option<Result<i64, ProcError>> {
        Some(match num {
            SYS_FORK => self.fork().map(i64::from),
            SYS_EXIT => self.exit(self.argint(0)),
            SYS_WAIT => self.sys_wait(),
            SYS_KILL => self.kill(self.argint(0)).map(|()| 0),
            SYS_DUP => self.sys_dup(),
            SYS_GETPID => Ok(i64::from(self.current_pid().unwrap_or_default())),
            SYS_SBRK => self.sys_sbrk(),
            SYS_SLEEP => self.sys_sleep(),
            SYS_UPTIME => Ok(self.ticks().cast_signed()),
            SYS_WRITE => self.sys_write(),
            SYS_CLOSE => self.sys_close(),
            SYS_TRACE => self.sys_trace(),
            SYS_SYSINFO => self.sys_sysinfo(),
            _ => return None,
        })
    }

    fn argraw(&self, n: usize) -> u64 {
        assert!(n <= 5, "argraw");
        let (_, p) = self.current();
        // SAFETY: our own process.
        unsafe { self.trapframe(p.private()) }.a[n]
    }

    /// Fetch the nth 32-bit system call argument.
    #[allow(clippy::cast_possible_truncation)]
    fn argint(&self, n: usize) -> i32 {
        (self.argraw(n) as u32).cast_signed()
    }

    /// Retrieve an argument as a user address. Doesn't check for
    /// legality, since copy_in/copy_out will do that.
    fn argaddr(&self, n: usize) -> VirtualAddress {
        VirtualAddress::new(self.argraw(n))
    }

    /// Fetch the nth argument as a file descriptor and return both the
    /// descriptor and the corresponding file.
    fn argfd(&self, n: usize) -> Result<(usize, Arc<dyn File>), ProcError> {
        let fd = self.argint(n);
        let (_, p) = self.current();
        // SAFETY: our own process.
        let private = unsafe { p.private() };
        usize::try_from(fd)
            .ok()
            .filter(|&i| i < NOFILE)
            .and_then(|i| Some((i, private.ofile[i].clone()?)))
            .ok_or(ProcError::BadDescriptor(fd))
    }

    /// Allocate a file descriptor for the given file in the current process.
    pub(crate) fn fdalloc(&self, f: Arc<dyn File>) -> Result<i32, ProcError> {
        let (_, p) = self.current();
        // SAFETY: our own process.
        let private = unsafe { p.private() };
        let fd = private
            .ofile
            .iter()
            .position(Option::is_none)
            .ok_or(ProcError::DescriptorTableFull)?;
        private.ofile[fd] = Some(f);
        Ok(i32::try_from(fd).unwrap_or(i32::MAX))
    }

    fn sys_wait(&self) -> Result<i64, ProcError> {
        let addr = self.argaddr(0);
        let addr = (addr != VirtualAddress::zero()).then_some(addr);
        self.wait(addr).map(i64::from)
    }

    fn sys_dup(&self) -> Result<i64, ProcError> {
        let (_, f) = self.argfd(0)?;
        self.fdalloc(f).map(i64::from)
    }

    fn sys_close(&self) -> Result<i64, ProcError> {
        let (fd, _) = self.argfd(0)?;
        let (_, p) = self.current();
        // SAFETY: our own process.
        unsafe { p.private() }.ofile[fd] = None;
        Ok(0)
    }

    fn sys_write(&self) -> Result<i64, ProcError> {
        let (_, f) = self.argfd(0)?;
        let addr = self.argaddr(1);
        let n = usize::try_from(self.argint(2)).map_err(|_| ProcError::BadAddress(addr))?;
        let written = f.write(self, CopySrc::User(addr), n)?;
        Ok(i64::try_from(written).unwrap_or(i64::MAX))
    }

    fn sys_sbrk(&self) -> Result<i64, ProcError> {
        let n = self.argint(0);
        let (_, p) = self.current();
        // SAFETY: our own process.
        let addr = unsafe { p.private() }.sz;
        self.growproc(i64::from(n))?;
        Ok(addr.cast_signed())
    }

    fn sys_sleep(&self) -> Result<i64, ProcError> {
        let n = u64::try_from(self.argint(0)).unwrap_or(0);
        let mut ticks = self.ticks.lock();
        let ticks0 = *ticks;
        while *ticks - ticks0 < n {
            if self.killed() {
                return Err(ProcError::Killed);
            }
            ticks = self.sleep(Channel::of(&self.ticks), ticks);
        }
        Ok(0)
    }

    fn sys_trace(&self) -> Result<i64, ProcError> {
        let mask = self.argraw(0);
        let (_, p) = self.current();
        // SAFETY: our own process.
        unsafe { p.private() }.trace_mask = mask;
        Ok(0)
    }

    fn sys_sysinfo(&self) -> Result<i64, ProcError> {
        let addr = self.argaddr(0);
        let info = SysInfo {
            freemem: self.mem.pages.free_bytes(),
            nproc: self.nproc() as u64,
        };
        self.either_copy_out(CopyDst::User(addr), &info.to_bytes())?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_layout() {
        let info = SysInfo {
            freemem: 0x0102_0304,
            nproc: 3,
        };
        let bytes = info.to_bytes();
        assert_eq!(bytes[0], 0x04);
        assert_eq!(bytes[8], 3);
        assert_eq!(SysInfo::from_bytes(bytes), info);
        assert_eq!(core::mem::size_of::<SysInfo>(), SysInfo::SIZE);
    }

    #[test]
    fn names() {
        assert_eq!(name(SYS_FORK), Some("fork"));
        assert_eq!(name(SYS_SYSINFO), Some("sysinfo"));
        assert_eq!(name(SYS_WRITE), Some("write"));
        assert_eq!(name(99), None);
    }
}
