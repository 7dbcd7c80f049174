// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A [`BoService`] that lives entirely in host memory.
//!
//! Allocations are page-aligned heap blocks with synthetic GPU addresses. Each BO that is
//! exported or submitted gets a non-blocking pipe standing in for its dma-buf: the BO is busy
//! while the pipe is full and idle once it has been drained, so `poll(POLLOUT)` on the exported
//! descriptor behaves like it does on a real dma-buf.
//!
//! Submissions are recorded rather than executed. By default every submission completes
//! immediately; [`hold_submissions`](HostBoService::hold_submissions) keeps the referenced BOs
//! busy until [`complete_all`](HostBoService::complete_all) is called.

use super::{
    align_up, bo::PushRange, BoAccess, BoFlags, BoHandle, BoService, BufferCreateFlags,
    BufferUsage, DeviceAlignment, MemoryRequirements, Submission,
};
use crate::{DeviceSize, VulkanError};
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{
    alloc::{self, Layout},
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

const PAGE_SIZE: DeviceSize = 4096;
const BASE_ADDRESS: u64 = 0x1_0000_0000;

/// What the host service saw for one submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedSubmission {
    /// The dwords of all push ranges, concatenated in order.
    pub dwords: Vec<u32>,

    /// The push ranges as they were handed over.
    pub pushes: Vec<PushRange>,

    /// Every referenced BO with its access class, recorded references first.
    pub refs: Vec<(BoHandle, BoAccess)>,
}

impl RecordedSubmission {
    /// Returns the access class of `handle` in this submission.
    pub fn access_of(&self, handle: BoHandle) -> Option<BoAccess> {
        self.refs
            .iter()
            .filter(|&&(h, _)| h == handle)
            .map(|&(_, access)| access)
            .reduce(|a, b| a | b)
    }
}

#[derive(Debug)]
pub struct HostBoService {
    state: Mutex<HostState>,
    hold: AtomicBool,
    lost: AtomicBool,
    failing_allocs: AtomicU32,
    alloc_error: Mutex<VulkanError>,
    requirement_queries: AtomicU32,
}

#[derive(Debug)]
struct HostState {
    next_handle: u32,
    next_addr: u64,
    bos: HashMap<BoHandle, HostBo>,
    submissions: Vec<RecordedSubmission>,
}

#[derive(Debug)]
struct HostBo {
    ptr: NonNull<u8>,
    layout: Layout,
    gpu_addr: u64,
    dmabuf: Option<DmaBufPipe>,
}

// The allocation is owned by the entry and only touched under the state lock or through `Bo`.
unsafe impl Send for HostBo {}

#[derive(Debug)]
struct DmaBufPipe {
    read: OwnedFd,
    write: OwnedFd,
    busy: bool,
}

impl DmaBufPipe {
    fn new() -> Result<Self, VulkanError> {
        let mut fds = [0; 2];

        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } < 0 {
            return Err(VulkanError::last_os_error());
        }

        Ok(DmaBufPipe {
            read: unsafe { OwnedFd::from_raw_fd(fds[0]) },
            write: unsafe { OwnedFd::from_raw_fd(fds[1]) },
            busy: false,
        })
    }

    fn mark_busy(&mut self) {
        if self.busy {
            return;
        }

        // Fill every slot of the pipe so that it stops polling writable.
        let page = [0u8; PAGE_SIZE as usize];
        for chunk in [&page[..], &page[..1]] {
            loop {
                let written =
                    unsafe { libc::write(self.write.as_raw_fd(), chunk.as_ptr().cast(), chunk.len()) };
                if written <= 0 {
                    break;
                }
            }
        }

        self.busy = true;
    }

    fn mark_idle(&mut self) {
        let mut page = [0u8; PAGE_SIZE as usize];
        loop {
            let read =
                unsafe { libc::read(self.read.as_raw_fd(), page.as_mut_ptr().cast(), page.len()) };
            if read <= 0 {
                break;
            }
        }

        self.busy = false;
    }
}

impl HostBoService {
    pub fn new() -> Self {
        HostBoService {
            state: Mutex::new(HostState {
                next_handle: 1,
                next_addr: BASE_ADDRESS,
                bos: HashMap::default(),
                submissions: Vec::new(),
            }),
            hold: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            failing_allocs: AtomicU32::new(0),
            alloc_error: Mutex::new(VulkanError::OutOfDeviceMemory),
            requirement_queries: AtomicU32::new(0),
        }
    }

    /// When `hold` is true, every BO referenced by a later submission stays busy until
    /// [`complete_all`](Self::complete_all).
    pub fn hold_submissions(&self, hold: bool) {
        self.hold.store(hold, Ordering::Release);
    }

    /// Completes all outstanding work, making every BO idle.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();

        for bo in state.bos.values_mut() {
            if let Some(dmabuf) = &mut bo.dmabuf {
                dmabuf.mark_idle();
            }
        }
    }

    /// Makes every later submission fail with `DeviceLost`.
    pub fn lose_device(&self) {
        self.lost.store(true, Ordering::Release);
    }

    /// Makes the next `count` allocations fail with `OutOfDeviceMemory`.
    pub fn fail_next_allocs(&self, count: u32) {
        self.fail_next_allocs_with(count, VulkanError::OutOfDeviceMemory);
    }

    /// Makes the next `count` allocations fail with `error`.
    pub fn fail_next_allocs_with(&self, count: u32, error: VulkanError) {
        *self.alloc_error.lock() = error;
        self.failing_allocs.store(count, Ordering::Release);
    }

    /// Returns how many times the device was asked for buffer memory requirements.
    pub fn requirement_query_count(&self) -> u32 {
        self.requirement_queries.load(Ordering::Acquire)
    }

    /// Returns a copy of every submission seen so far.
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.state.lock().submissions.clone()
    }

    /// Returns the number of BOs that have not been destroyed.
    pub fn live_bo_count(&self) -> usize {
        self.state.lock().bos.len()
    }

    /// Returns whether `handle` is kept busy by a held submission.
    pub fn is_busy(&self, handle: BoHandle) -> bool {
        self.state
            .lock()
            .bos
            .get(&handle)
            .and_then(|bo| bo.dmabuf.as_ref())
            .is_some_and(|dmabuf| dmabuf.busy)
    }
}

impl Default for HostBoService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostBoService {
    fn drop(&mut self) {
        for (_, bo) in self.state.get_mut().bos.drain() {
            unsafe { alloc::dealloc(bo.ptr.as_ptr(), bo.layout) };
        }
    }
}

impl BoService for HostBoService {
    fn alloc(
        &self,
        size: DeviceSize,
        align: DeviceAlignment,
        _flags: BoFlags,
    ) -> Result<BoHandle, VulkanError> {
        if self
            .failing_allocs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(*self.alloc_error.lock());
        }

        let page = DeviceAlignment::new(PAGE_SIZE).ok_or(VulkanError::Unknown)?;
        let align = align.max(page);
        let size = align_up(size.max(1), page);
        let layout = Layout::from_size_align(size as usize, align.as_devicesize() as usize)
            .map_err(|_| VulkanError::OutOfHostMemory)?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or(VulkanError::OutOfHostMemory)?;

        let mut state = self.state.lock();
        let gpu_addr = align_up(state.next_addr, align);
        state.next_addr = gpu_addr + size;

        let Some(handle) = BoHandle::new(state.next_handle) else {
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            return Err(VulkanError::TooManyObjects);
        };
        state.next_handle += 1;
        state.bos.insert(
            handle,
            HostBo {
                ptr,
                layout,
                gpu_addr,
                dmabuf: None,
            },
        );

        Ok(handle)
    }

    fn destroy(&self, handle: BoHandle) {
        if let Some(bo) = self.state.lock().bos.remove(&handle) {
            unsafe { alloc::dealloc(bo.ptr.as_ptr(), bo.layout) };
        }
    }

    fn gpu_addr(&self, handle: BoHandle) -> u64 {
        self.state
            .lock()
            .bos
            .get(&handle)
            .map_or(0, |bo| bo.gpu_addr)
    }

    fn map(&self, handle: BoHandle) -> Result<NonNull<u8>, VulkanError> {
        self.state
            .lock()
            .bos
            .get(&handle)
            .map(|bo| bo.ptr)
            .ok_or(VulkanError::InvalidExternalHandle)
    }

    fn export_dmabuf(&self, handle: BoHandle) -> Result<OwnedFd, VulkanError> {
        let mut state = self.state.lock();
        let bo = state
            .bos
            .get_mut(&handle)
            .ok_or(VulkanError::InvalidExternalHandle)?;

        if bo.dmabuf.is_none() {
            bo.dmabuf = Some(DmaBufPipe::new()?);
        }

        let write = match &bo.dmabuf {
            Some(dmabuf) => dmabuf.write.as_raw_fd(),
            None => return Err(VulkanError::Unknown),
        };
        let fd = unsafe { libc::fcntl(write, libc::F_DUPFD_CLOEXEC, 0) };

        if fd < 0 {
            return Err(VulkanError::last_os_error());
        }

        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<(), VulkanError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(VulkanError::DeviceLost);
        }

        let mut state = self.state.lock();
        let mut dwords = Vec::new();

        for push in submission.pushes {
            let bo = state
                .bos
                .get(&push.bo)
                .ok_or(VulkanError::InvalidExternalHandle)?;
            let start = push.start_dw as usize * 4;
            let len = push.dw_count as usize * 4;

            if start + len > bo.layout.size() {
                return Err(VulkanError::InvalidExternalHandle);
            }

            let bytes = unsafe { std::slice::from_raw_parts(bo.ptr.as_ptr().add(start), len) };
            dwords.extend(
                bytes
                    .chunks_exact(4)
                    .map(|dw| u32::from_le_bytes([dw[0], dw[1], dw[2], dw[3]])),
            );
        }

        let refs: Vec<_> = submission
            .refs
            .iter()
            .chain(submission.extra_refs)
            .map(|r| (r.bo.handle(), r.access))
            .collect();

        if self.hold.load(Ordering::Acquire) {
            for &(handle, _) in &refs {
                if let Some(bo) = state.bos.get_mut(&handle) {
                    if bo.dmabuf.is_none() {
                        bo.dmabuf = Some(DmaBufPipe::new()?);
                    }
                    if let Some(dmabuf) = &mut bo.dmabuf {
                        dmabuf.mark_busy();
                    }
                }
            }
        }

        state.submissions.push(RecordedSubmission {
            dwords,
            pushes: submission.pushes.to_vec(),
            refs,
        });

        Ok(())
    }

    fn buffer_memory_requirements(
        &self,
        size: DeviceSize,
        usage: BufferUsage,
        flags: BufferCreateFlags,
    ) -> Result<MemoryRequirements, VulkanError> {
        self.requirement_queries.fetch_add(1, Ordering::AcqRel);

        let alignment = if usage.intersects(BufferUsage::UNIFORM_BUFFER) {
            256
        } else if usage.intersects(
            BufferUsage::STORAGE_BUFFER
                | BufferUsage::UNIFORM_TEXEL_BUFFER
                | BufferUsage::STORAGE_TEXEL_BUFFER,
        ) {
            64
        } else {
            16
        };
        let alignment = DeviceAlignment::new(alignment).ok_or(VulkanError::Unknown)?;

        Ok(MemoryRequirements {
            size: align_up(size, alignment),
            alignment,
            memory_type_bits: if flags.intersects(BufferCreateFlags::PROTECTED) {
                0b1000
            } else {
                0b0111
            },
            prefers_dedicated_allocation: false,
            requires_dedicated_allocation: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::HostBoService;
    use crate::memory::{
        bo::Submission, refs::BoReference, Bo, BoAccess, BoFlags, BoService, DeviceAlignment,
    };
    use std::{
        os::fd::{AsRawFd, OwnedFd},
        sync::Arc,
    };

    fn writable(fd: &OwnedFd) -> bool {
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };

        unsafe { libc::poll(&mut pfd, 1, 0) == 1 }
    }

    #[test]
    fn addresses_are_aligned_and_distinct() {
        let service = HostBoService::new();
        let align = DeviceAlignment::new(1 << 16).unwrap();

        let a = service.alloc(100, align, BoFlags::empty()).unwrap();
        let b = service.alloc(100, align, BoFlags::empty()).unwrap();

        assert_eq!(service.gpu_addr(a) % (1 << 16), 0);
        assert_eq!(service.gpu_addr(b) % (1 << 16), 0);
        assert!(service.gpu_addr(b) >= service.gpu_addr(a) + 4096);

        service.destroy(a);
        service.destroy(b);
        assert_eq!(service.live_bo_count(), 0);
    }

    #[test]
    fn injected_alloc_failure() {
        let service = HostBoService::new();
        service.fail_next_allocs(1);

        assert!(service.alloc(16, DeviceAlignment::MIN, BoFlags::empty()).is_err());
        assert!(service.alloc(16, DeviceAlignment::MIN, BoFlags::empty()).is_ok());
    }

    #[test]
    fn held_submission_keeps_dmabuf_busy() {
        let host = Arc::new(HostBoService::new());
        let service: Arc<dyn BoService> = host.clone();
        let bo = Bo::new(&service, 64, DeviceAlignment::MIN, BoFlags::empty()).unwrap();
        let fd = bo.export_dmabuf().unwrap();
        assert!(writable(&fd));

        host.hold_submissions(true);
        let refs = [BoReference {
            bo: bo.clone(),
            access: BoAccess::RW,
        }];
        service
            .submit(&Submission {
                pushes: &[],
                refs: &refs,
                extra_refs: &[],
            })
            .unwrap();

        assert!(host.is_busy(bo.handle()));
        assert!(!writable(&fd));

        host.complete_all();
        assert!(writable(&fd));
        assert_eq!(
            host.submissions()[0].access_of(bo.handle()),
            Some(BoAccess::RW)
        );
    }
}
