// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Buffer objects and the service that allocates and submits them.
//!
//! The kernel transport is not part of this crate. A driver plugs it in by implementing
//! [`BoService`]; the crate only ever talks to the GPU through that trait. [`HostBoService`]
//! is an implementation backed by host memory.
//!
//! [`HostBoService`]: super::host::HostBoService

use super::{
    refs::BoReference, BoFlags, BufferCreateFlags, BufferUsage, DeviceAlignment,
    MemoryRequirements,
};
use crate::{macros::impl_id_counter, DeviceSize, VulkanError};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    num::NonZero,
    os::fd::OwnedFd,
    ptr::{self, NonNull},
    sync::Arc,
};

/// Kernel handle of a buffer object.
pub type BoHandle = NonZero<u32>;

/// The kernel-facing collaborator: allocation, mapping, export and submission of BOs.
pub trait BoService: Send + Sync + Debug {
    /// Allocates a BO of at least `size` bytes whose GPU address is aligned to `align`.
    fn alloc(
        &self,
        size: DeviceSize,
        align: DeviceAlignment,
        flags: BoFlags,
    ) -> Result<BoHandle, VulkanError>;

    /// Releases the BO. The handle must not be used afterwards.
    fn destroy(&self, handle: BoHandle);

    /// Returns the GPU virtual address of the BO.
    fn gpu_addr(&self, handle: BoHandle) -> u64;

    /// Maps the BO into the CPU address space. The mapping stays valid until `destroy`.
    fn map(&self, handle: BoHandle) -> Result<NonNull<u8>, VulkanError>;

    /// Exports the BO as a dma-buf file descriptor. The descriptor polls writable once all
    /// GPU work writing to the BO has completed.
    fn export_dmabuf(&self, handle: BoHandle) -> Result<OwnedFd, VulkanError>;

    /// Hands a command stream and the BOs it depends on to the kernel.
    fn submit(&self, submission: &Submission<'_>) -> Result<(), VulkanError>;

    /// Queries the memory requirements of a buffer synchronously.
    fn buffer_memory_requirements(
        &self,
        size: DeviceSize,
        usage: BufferUsage,
        flags: BufferCreateFlags,
    ) -> Result<MemoryRequirements, VulkanError>;
}

/// A range of dwords in a BO that the GPU front-end executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushRange {
    pub bo: BoHandle,
    pub start_dw: u32,
    pub dw_count: u32,
}

/// Everything the kernel needs for one submission.
#[derive(Clone, Copy, Debug)]
pub struct Submission<'a> {
    /// The dword ranges to execute, in order.
    pub pushes: &'a [PushRange],

    /// The references collected while recording.
    pub refs: &'a [BoReference],

    /// References added for this submission only, such as sync BOs and the queue state.
    pub extra_refs: &'a [BoReference],
}

/// A GPU-visible buffer object.
///
/// The BO is destroyed through its service when the last `Arc` is dropped.
pub struct Bo {
    handle: BoHandle,
    size: DeviceSize,
    gpu_addr: u64,
    flags: BoFlags,
    mapping: Option<NonNull<u8>>,
    service: Arc<dyn BoService>,
    id: NonZero<u64>,
}

// The mapping pointer is only dereferenced through the unsafe accessors below.
unsafe impl Send for Bo {}
unsafe impl Sync for Bo {}

impl Bo {
    /// Allocates a new BO, mapping it when `flags` contains `MAPPED`.
    pub fn new(
        service: &Arc<dyn BoService>,
        size: DeviceSize,
        align: DeviceAlignment,
        flags: BoFlags,
    ) -> Result<Arc<Bo>, VulkanError> {
        let handle = service.alloc(size, align, flags)?;
        let gpu_addr = service.gpu_addr(handle);

        let mapping = if flags.intersects(BoFlags::MAPPED) {
            match service.map(handle) {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    service.destroy(handle);
                    return Err(err);
                }
            }
        } else {
            None
        };

        log::trace!("allocated BO {handle} of {size} bytes at {gpu_addr:#x} ({flags:?})");

        Ok(Arc::new(Bo {
            handle,
            size,
            gpu_addr,
            flags,
            mapping,
            service: service.clone(),
            id: Self::next_id(),
        }))
    }

    #[inline]
    pub fn handle(&self) -> BoHandle {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn gpu_addr(&self) -> u64 {
        self.gpu_addr
    }

    #[inline]
    pub fn flags(&self) -> BoFlags {
        self.flags
    }

    /// Returns the CPU mapping, if the BO was created with `MAPPED`.
    #[inline]
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapping
    }

    /// Exports the BO as a dma-buf.
    pub fn export_dmabuf(&self) -> Result<OwnedFd, VulkanError> {
        self.service.export_dmabuf(self.handle)
    }

    /// Copies `data` into the mapping at `offset`.
    ///
    /// # Panics
    ///
    /// - Panics if the BO is not mapped.
    /// - Panics if the range is out of bounds.
    ///
    /// # Safety
    ///
    /// - No other thread and no in-flight GPU work may access the range concurrently.
    pub unsafe fn write(&self, offset: DeviceSize, data: &[u8]) {
        let dst = self.range_ptr(offset, data.len());
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
    }

    /// Copies from the mapping at `offset` into `data`.
    ///
    /// # Panics
    ///
    /// - Panics if the BO is not mapped.
    /// - Panics if the range is out of bounds.
    ///
    /// # Safety
    ///
    /// - No other thread and no in-flight GPU work may write the range concurrently.
    pub unsafe fn read(&self, offset: DeviceSize, data: &mut [u8]) {
        let src = self.range_ptr(offset, data.len());
        unsafe { ptr::copy_nonoverlapping(src, data.as_mut_ptr(), data.len()) };
    }

    fn range_ptr(&self, offset: DeviceSize, len: usize) -> *mut u8 {
        let mapping = match self.mapping {
            Some(mapping) => mapping,
            None => panic!("BO {} is not mapped", self.handle),
        };

        assert!(
            offset
                .checked_add(len as DeviceSize)
                .is_some_and(|end| end <= self.size),
            "range {offset}..+{len} is out of bounds of BO {} ({} bytes)",
            self.handle,
            self.size,
        );

        unsafe { mapping.as_ptr().add(offset as usize) }
    }
}

impl Drop for Bo {
    fn drop(&mut self) {
        log::trace!("destroying BO {}", self.handle);
        self.service.destroy(self.handle);
    }
}

impl Debug for Bo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Bo")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("gpu_addr", &format_args!("{:#x}", self.gpu_addr))
            .field("flags", &self.flags)
            .field("mapped", &self.mapping.is_some())
            .finish_non_exhaustive()
    }
}

impl_id_counter!(Bo);

#[cfg(test)]
mod tests {
    use super::{Bo, BoService};
    use crate::memory::{host::HostBoService, BoFlags, DeviceAlignment};
    use std::sync::Arc;

    #[test]
    fn write_then_read() {
        let service: Arc<dyn BoService> = Arc::new(HostBoService::new());
        let bo = Bo::new(&service, 256, DeviceAlignment::MIN, BoFlags::MAPPED).unwrap();

        let mut out = [0u8; 4];
        unsafe {
            bo.write(12, &[1, 2, 3, 4]);
            bo.read(12, &mut out);
        }

        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_bounds_write() {
        let service: Arc<dyn BoService> = Arc::new(HostBoService::new());
        let bo = Bo::new(&service, 16, DeviceAlignment::MIN, BoFlags::MAPPED).unwrap();

        assert_should_panic!("out of bounds", {
            unsafe { bo.write(12, &[0; 8]) };
        });
    }

    #[test]
    fn unique_ids() {
        let service: Arc<dyn BoService> = Arc::new(HostBoService::new());
        let a = Bo::new(&service, 16, DeviceAlignment::MIN, BoFlags::empty()).unwrap();
        let b = Bo::new(&service, 16, DeviceAlignment::MIN, BoFlags::empty()).unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.handle(), b.handle());
    }
}
