//! The process table and the memory every process is built from.

use crate::context::{Baton, Context};
use crate::cpu::{self, Cpu, Idle, NO_PROC};
use crate::error::ProcError;
use crate::file::FileSystem;
use crate::proc::{NO_PARENT, Pid, Proc, ProcGuard, ProcPrivate, ProcShared, ProcState, TrapFrame};
use crate::user::Program;
use crate::ThisCpu;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_alloc::{PageAllocator, PhysicalMemory};
use kernel_info::memory::{TRAMPOLINE, TRAPFRAME, kstack};
use kernel_info::param::{NCPU, NPROC};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress};
use kernel_sync::{SpinLock, SyncOnceCell};
use kernel_vmem::{AddressSpace, CopyStrategy, FrameAlloc, PageEntryBits, PhysMapper, VmError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;

/// First user program: `exec("/init", ...)`, then `exit` if that fails.
const INITCODE: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00, 0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// Physical memory as the process layer sees it.
#[derive(Clone)]
pub struct KernelMemory {
    pub ram: Arc<PhysicalMemory>,
    pub pages: Arc<PageAllocator<ThisCpu>>,
    /// Root of the kernel page table; kernel stacks are mapped into it.
    pub kernel_root: PhysicalPage,
    /// Frame holding the trampoline, shared by every address space.
    pub trampoline: PhysicalPage,
}

/// Process-layer settings chosen at boot.
#[derive(Clone)]
pub struct ProcConfig {
    pub ncpu: usize,
    /// How `fork` duplicates user memory.
    pub strategy: CopyStrategy,
    /// Source of the initial working directory.
    pub fs: Option<Arc<dyn FileSystem>>,
}

/// One line of [`ProcessTable::procdump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub state: ProcState,
    pub name: String,
    pub parent: Option<Pid>,
}

/// Where [`ProcessTable::either_copy_out`] writes to.
pub enum CopyDst<'a> {
    User(VirtualAddress),
    Kernel(&'a mut [u8]),
}

/// Where [`ProcessTable::either_copy_in`] reads from.
pub enum CopySrc<'a> {
    User(VirtualAddress),
    Kernel(&'a [u8]),
}

pub struct ProcessTable {
    pub(crate) procs: Box<[Proc]>,
    pub(crate) cpus: Box<[Cpu]>,
    next_pid: SpinLock<Pid>,
    pub(crate) initproc: SyncOnceCell<usize>,
    pub(crate) mem: KernelMemory,
    pub(crate) strategy: CopyStrategy,
    fs: Option<Arc<dyn FileSystem>>,
    /// `tickslock` and `ticks`.
    pub(crate) ticks: SpinLock<u64>,
    pub(crate) idle: Idle,
    halted: AtomicBool,
    panicked: Mutex<Option<String>>,
    pub(crate) threads: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) this: Weak<Self>,
}

impl ProcessTable {
    /// `procinit`: allocate one kernel stack per slot and map it, with a
    /// guard page below, into the kernel page table.
    ///
    /// # Errors
    /// [`ProcError::OutOfMemory`] if the stacks or their page tables do not fit.
    ///
    /// # Panics
    /// If `ncpu` is zero or larger than `NCPU`.
    pub fn new(mem: KernelMemory, config: ProcConfig) -> Result<Arc<Self>, ProcError> {
        assert!(config.ncpu > 0 && config.ncpu <= NCPU, "procinit: bad cpu count");
        let kvm = AddressSpace::from_root(&*mem.ram, mem.kernel_root);
        let frames: &dyn FrameAlloc = &*mem.pages;

        let mut procs = Vec::with_capacity(NPROC);
        for slot in 0..NPROC {
            let stack = mem.pages.allocate_page().ok_or(ProcError::OutOfMemory)?;
            let va = kstack(slot);
            kvm.map(
                frames,
                va,
                PAGE_SIZE,
                stack.base(),
                PageEntryBits::READ | PageEntryBits::WRITE,
            )?;
            procs.push(Proc::new(va));
        }
        log::debug!("procinit: {NPROC} kernel stacks mapped, {} cpus", config.ncpu);

        Ok(Arc::new_cyclic(|this| Self {
            procs: procs.into_boxed_slice(),
            cpus: (0..config.ncpu).map(|_| Cpu::new()).collect(),
            next_pid: SpinLock::new(1),
            initproc: SyncOnceCell::new(),
            mem,
            strategy: config.strategy,
            fs: config.fs,
            ticks: SpinLock::new(0),
            idle: Idle::default(),
            halted: AtomicBool::new(false),
            panicked: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
            this: this.clone(),
        }))
    }

    #[must_use]
    pub fn ncpu(&self) -> usize {
        self.cpus.len()
    }

    #[must_use]
    pub fn memory(&self) -> &KernelMemory {
        &self.mem
    }

    pub(crate) fn frames(&self) -> &dyn FrameAlloc {
        &*self.mem.pages
    }

    pub(crate) fn space(&self, root: PhysicalPage) -> AddressSpace<'_, PhysicalMemory> {
        AddressSpace::from_root(&*self.mem.ram, root)
    }

    pub(crate) fn kernel_space(&self) -> AddressSpace<'_, PhysicalMemory> {
        self.space(self.mem.kernel_root)
    }

    /// The trap frame of a process.
    ///
    /// # Safety
    /// Same rule as for the rest of [`ProcPrivate`].
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn trapframe(&self, private: &ProcPrivate) -> &mut TrapFrame {
        let Some(page) = private.trapframe else {
            panic!("trapframe: process has none");
        };
        unsafe { self.mem.ram.phys_to_mut::<TrapFrame>(page.base()) }
    }

    /// Slot of the process running on the calling CPU.
    pub(crate) fn myproc(&self) -> Option<usize> {
        let c = cpu::current()?;
        let cpu = &self.cpus[c];
        cpu.push_off();
        let slot = cpu.proc.load(Ordering::Relaxed);
        cpu.pop_off();
        (slot != NO_PROC).then_some(slot)
    }

    /// Like [`Self::myproc`], for code that only runs inside a process.
    pub(crate) fn current(&self) -> (usize, &Proc) {
        let Some(slot) = self.myproc() else {
            panic!("myproc: no process on this cpu");
        };
        (slot, &self.procs[slot])
    }

    /// The pid of the process running on the calling thread, if any.
    #[must_use]
    pub fn current_pid(&self) -> Option<Pid> {
        let slot = self.myproc()?;
        Some(self.procs[slot].lock(&self.cpus).pid)
    }

    fn allocpid(&self) -> Pid {
        let mut next = self.next_pid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    /// Claim an unused slot and give it a pid, a trap frame and an empty
    /// user page table. Returns with the slot locked.
    pub(crate) fn allocproc(&self) -> Result<(usize, ProcGuard<'_>), ProcError> {
        for (slot, p) in self.procs.iter().enumerate() {
            let mut g = p.lock(&self.cpus);
            if g.state != ProcState::Unused {
                continue;
            }

            g.pid = self.allocpid();
            // SAFETY: unused and locked.
            let private = unsafe { p.private() };
            let Some(tf) = self.mem.pages.allocate_page() else {
                self.freeproc(p, &mut g);
                return Err(ProcError::OutOfMemory);
            };
            private.trapframe = Some(tf);
            // SAFETY: the frame was just allocated to this process.
            unsafe { *self.trapframe(private) = TrapFrame::default() };

            match self.proc_pagetable(tf) {
                Ok(root) => private.pagetable = Some(root),
                Err(err) => {
                    self.freeproc(p, &mut g);
                    return Err(err);
                }
            }
            g.context = Some(Arc::new(Context::new()));
            return Ok((slot, g));
        }
        Err(ProcError::NoFreeSlot)
    }

    /// Release everything a slot holds and mark it unused. The caller holds
    /// the slot's lock and the process does not run.
    pub(crate) fn freeproc(&self, p: &Proc, g: &mut ProcShared) {
        // SAFETY: locked and not running.
        let private = unsafe { p.private() };
        if let Some(tf) = private.trapframe.take() {
            self.mem.pages.free_page(tf);
        }
        if let Some(root) = private.pagetable.take() {
            self.proc_freepagetable(root, private.sz);
        }
        private.sz = 0;
        private.ofile.iter_mut().for_each(|f| *f = None);
        private.cwd = None;
        private.trace_mask = 0;
        private.program = None;
        private.fork_image = None;

        g.pid = 0;
        g.name.clear();
        g.chan = None;
        g.killed = false;
        g.xstate = 0;
        g.state = ProcState::Unused;
        p.parent.store(NO_PARENT, Ordering::Relaxed);

        if let Some(ctx) = g.context.take() {
            if ctx.is_started() {
                ctx.resume(Baton::Retire);
            }
        }
    }

    /// A user page table with no user memory: just the trampoline and the
    /// trap frame `tf`.
    fn proc_pagetable(&self, tf: PhysicalPage) -> Result<PhysicalPage, ProcError> {
        let frames = self.frames();
        let space = AddressSpace::create(&*self.mem.ram, frames)?;

        // Not user accessible; only used on the way into and out of the kernel.
        if let Err(err) = space.map(
            frames,
            VirtualAddress::new(TRAMPOLINE),
            PAGE_SIZE,
            self.mem.trampoline.base(),
            PageEntryBits::READ | PageEntryBits::EXEC,
        ) {
            space.free_walk(frames);
            return Err(err.into());
        }

        if let Err(err) = space.map(
            frames,
            VirtualAddress::new(TRAPFRAME),
            PAGE_SIZE,
            tf.base(),
            PageEntryBits::READ | PageEntryBits::WRITE,
        ) {
            space.unmap(VirtualAddress::new(TRAMPOLINE), 1, None);
            space.free_walk(frames);
            return Err(err.into());
        }

        Ok(space.root())
    }

    /// Tear down a user page table and the `sz` bytes of memory it maps. The
    /// trampoline and trap frame are unmapped but not freed here.
    fn proc_freepagetable(&self, root: PhysicalPage, sz: u64) {
        let space = self.space(root);
        space.unmap(VirtualAddress::new(TRAMPOLINE), 1, None);
        space.unmap(VirtualAddress::new(TRAPFRAME), 1, None);
        space.destroy(self.frames(), sz);
    }

    /// Create the first process. It starts with one page holding the init
    /// code at address 0 and then runs `program` as its user code.
    ///
    /// # Errors
    /// [`ProcError::NoFreeSlot`] or [`ProcError::OutOfMemory`].
    ///
    /// # Panics
    /// If an init process already exists.
    pub fn userinit(&self, program: Program) -> Result<Pid, ProcError> {
        let (slot, mut g) = self.allocproc()?;
        let p = ProcGuard::proc(&g);
        // SAFETY: locked and not yet runnable.
        let private = unsafe { p.private() };

        let Some(root) = private.pagetable else {
            panic!("userinit: no page table");
        };
        if let Err(err) = self.space(root).load_initial(self.frames(), &INITCODE) {
            self.freeproc(p, &mut g);
            return Err(err.into());
        }
        private.sz = PAGE_SIZE;

        // SAFETY: as above.
        let tf = unsafe { self.trapframe(private) };
        tf.epc = 0;
        tf.sp = PAGE_SIZE;

        g.set_name("initcode");
        private.cwd = self.fs.as_ref().map(|fs| fs.root());
        private.program = Some(program);
        assert!(self.initproc.set(slot).is_ok(), "userinit: init already exists");

        g.state = ProcState::Runnable;
        let pid = g.pid;
        drop(g);
        self.idle.notify();
        log::debug!("userinit: pid {pid}");
        Ok(pid)
    }

    /// Grow (or with negative `n`, shrink) the calling process's memory by
    /// `n` bytes. Shrinking stops at zero.
    ///
    /// # Errors
    /// [`ProcError::OutOfMemory`] or an address-space error when growing.
    pub fn growproc(&self, n: i64) -> Result<(), ProcError> {
        let (_, p) = self.current();
        // SAFETY: our own process.
        let private = unsafe { p.private() };
        let Some(root) = private.pagetable else {
            panic!("growproc: no page table");
        };
        let space = self.space(root);
        let sz = private.sz;

        private.sz = if n > 0 {
            let target = sz
                .checked_add(n.unsigned_abs())
                .filter(|&t| t <= TRAPFRAME)
                .ok_or(VmError::OutOfRange(VirtualAddress::new(sz)))?;
            space.grow(self.frames(), sz, target)?
        } else if n < 0 {
            space.shrink(self.frames(), sz, sz.saturating_sub(n.unsigned_abs()))
        } else {
            sz
        };
        Ok(())
    }

    /// Copy `src` to a user address of the calling process or to the start
    /// of a kernel buffer. Only the user side needs a calling process.
    ///
    /// # Errors
    /// - [`ProcError::BadAddress`] if the user range is not writable.
    /// - [`ProcError::ShortBuffer`] if the kernel buffer is smaller than `src`.
    pub fn either_copy_out(&self, dst: CopyDst<'_>, src: &[u8]) -> Result<(), ProcError> {
        match dst {
            CopyDst::User(va) => self
                .own_space()
                .copy_out(self.frames(), va, src)
                .map_err(|_| ProcError::BadAddress(va)),
            CopyDst::Kernel(buf) => {
                let len = buf.len();
                let head = buf.get_mut(..src.len()).ok_or(ProcError::ShortBuffer {
                    len,
                    needed: src.len(),
                })?;
                head.copy_from_slice(src);
                Ok(())
            }
        }
    }

    /// Fill `dst` from a user address of the calling process or from the
    /// start of a kernel buffer. Only the user side needs a calling process.
    ///
    /// # Errors
    /// - [`ProcError::BadAddress`] if the user range is not readable.
    /// - [`ProcError::ShortBuffer`] if the kernel buffer is smaller than `dst`.
    pub fn either_copy_in(&self, dst: &mut [u8], src: CopySrc<'_>) -> Result<(), ProcError> {
        match src {
            CopySrc::User(va) => self
                .own_space()
                .copy_in(dst, va)
                .map_err(|_| ProcError::BadAddress(va)),
            CopySrc::Kernel(buf) => {
                let head = buf.get(..dst.len()).ok_or(ProcError::ShortBuffer {
                    len: buf.len(),
                    needed: dst.len(),
                })?;
                dst.copy_from_slice(head);
                Ok(())
            }
        }
    }

    pub(crate) fn own_space(&self) -> AddressSpace<'_, PhysicalMemory> {
        let (_, p) = self.current();
        // SAFETY: our own process.
        let Some(root) = (unsafe { p.private() }).pagetable else {
            panic!("no page table");
        };
        self.space(root)
    }

    /// Number of slots in use.
    #[must_use]
    pub fn nproc(&self) -> usize {
        self.procs
            .iter()
            .filter(|p| p.lock(&self.cpus).state != ProcState::Unused)
            .count()
    }

    /// List every used slot and log it, one line per process.
    pub fn procdump(&self) -> Vec<ProcInfo> {
        let out = self.snapshot();
        for info in &out {
            log::info!("{} {} {}", info.pid, info.state, info.name);
        }
        out
    }

    fn snapshot(&self) -> Vec<ProcInfo> {
        let parents: Vec<Pid> = self.procs.iter().map(|p| p.lock(&self.cpus).pid).collect();
        let mut out = Vec::new();
        for p in self.procs.iter() {
            let g = p.lock(&self.cpus);
            if g.state == ProcState::Unused {
                continue;
            }
            let parent = parents
                .get(p.parent.load(Ordering::Relaxed))
                .copied()
                .filter(|&pid| pid != 0);
            out.push(ProcInfo {
                pid: g.pid,
                state: g.state,
                name: g.name.clone(),
                parent,
            });
        }
        out
    }

    /// State of the process with `pid`.
    #[must_use]
    pub fn state_of(&self, pid: Pid) -> Option<ProcState> {
        self.procs.iter().find_map(|p| {
            let g = p.lock(&self.cpus);
            (g.pid == pid && g.state != ProcState::Unused).then_some(g.state)
        })
    }

    /// Pid of the parent of the process with `pid`.
    #[must_use]
    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        self.snapshot()
            .into_iter()
            .find(|info| info.pid == pid)
            .and_then(|info| info.parent)
    }

    /// Pid of the init process, once it exists.
    #[must_use]
    pub fn init_pid(&self) -> Option<Pid> {
        let slot = *self.initproc.get()?;
        Some(self.procs[slot].lock(&self.cpus).pid)
    }

    /// Stop all schedulers at their next pass. Running processes are
    /// switched out at their next trap.
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            log::info!("halting");
        }
        self.idle.notify();
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Record a kernel panic and halt. Only the first message is kept.
    pub(crate) fn record_panic(&self, message: String) {
        log::error!("panic: {message}");
        self.panicked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(message);
        self.halt();
    }

    /// Message of the kernel panic that halted the machine, if any.
    #[must_use]
    pub fn panic_message(&self) -> Option<String> {
        self.panicked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// End every process thread. Only valid once all schedulers returned.
    ///
    /// # Panics
    /// If the machine was not halted first.
    pub fn retire_all(&self) {
        assert!(self.is_halted(), "retire_all: machine still running");
        for p in self.procs.iter() {
            let g = p.lock(&self.cpus);
            if let Some(ctx) = g.context.as_ref().filter(|c| c.is_started()) {
                ctx.resume(Baton::Retire);
            }
        }
        let threads = core::mem::take(
            &mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for t in threads {
            let _ = t.join();
        }
    }
}
