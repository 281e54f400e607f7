//! Byte copies between kernel buffers and a user address space, one page at
//! a time.

use super::AddressSpace;
use crate::{FrameAlloc, PhysMapper, VmError};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, round_down};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Copy `src` to user address `dst_va`.
    ///
    /// Each destination page goes through the copy-on-write path first, so a
    /// still-shared page is privatized instead of being written in place.
    ///
    /// # Errors
    /// Any error from [`AddressSpace::resolve_cow_fault`].
    pub fn copy_out(
        &self,
        alloc: &dyn FrameAlloc,
        dst_va: VirtualAddress,
        mut src: &[u8],
    ) -> Result<(), VmError> {
        let mut dst = dst_va.as_u64();
        while !src.is_empty() {
            let va0 = round_down(dst);
            let pa0 = self.resolve_cow_fault(alloc, VirtualAddress::new(va0))?;
            let off = (dst - va0) as usize;
            let n = src.len().min(PAGE_SIZE as usize - off);
            self.frame_of(pa0)[off..off + n].copy_from_slice(&src[..n]);
            src = &src[n..];
            dst = va0 + PAGE_SIZE;
        }
        Ok(())
    }

    /// Fill `dst` from user address `src_va`.
    ///
    /// # Errors
    /// [`VmError::NotMapped`] for the first page that is not user accessible.
    pub fn copy_in(&self, dst: &mut [u8], src_va: VirtualAddress) -> Result<(), VmError> {
        let mut src = src_va.as_u64();
        let mut done = 0;
        while done < dst.len() {
            let va0 = VirtualAddress::new(round_down(src));
            let pa0 = self.translate(va0).ok_or(VmError::NotMapped(va0))?;
            let off = (src - va0.as_u64()) as usize;
            let n = (dst.len() - done).min(PAGE_SIZE as usize - off);
            dst[done..done + n].copy_from_slice(&self.frame_of(pa0)[off..off + n]);
            done += n;
            src = va0.as_u64() + PAGE_SIZE;
        }
        Ok(())
    }

    /// Copy a NUL-terminated string from user address `src_va` into `dst`,
    /// including the terminator. Returns the string length without it.
    ///
    /// # Errors
    /// [`VmError::NotMapped`] if the string runs into an unmapped page,
    /// [`VmError::NoTerminator`] if no NUL appears within `dst.len()` bytes.
    pub fn copy_in_str(&self, dst: &mut [u8], src_va: VirtualAddress) -> Result<usize, VmError> {
        let mut src = src_va.as_u64();
        let mut done = 0;
        while done < dst.len() {
            let va0 = VirtualAddress::new(round_down(src));
            let pa0 = self.translate(va0).ok_or(VmError::NotMapped(va0))?;
            let off = (src - va0.as_u64()) as usize;
            let n = (dst.len() - done).min(PAGE_SIZE as usize - off);
            let page = &self.frame_of(pa0)[off..off + n];
            for &b in page {
                dst[done] = b;
                if b == 0 {
                    return Ok(done);
                }
                done += 1;
            }
            src = va0.as_u64() + PAGE_SIZE;
        }
        Err(VmError::NoTerminator)
    }
}
