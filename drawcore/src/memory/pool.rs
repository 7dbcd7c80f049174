// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Bump allocation of short-lived descriptor memory.
//!
//! A [`BatchPool`] hands out aligned regions from a list of mapped BO chunks. Regions are never
//! freed individually; the whole pool is rewound when its command buffer is reset.

use super::{align_up, Bo, BoFlags, BoService, DeviceAlignment};
use crate::{DeviceSize, NonExhaustive, VulkanError};
use std::{ptr::NonNull, sync::Arc};

/// Parameters to create a new `BatchPool`.
#[derive(Clone, Debug)]
pub struct BatchPoolCreateInfo {
    /// The size of a regular chunk. Requests larger than this get a chunk of their own.
    ///
    /// The default value is 64 KiB.
    pub chunk_size: DeviceSize,

    /// The flags of the chunk BOs. `MAPPED` is always added.
    ///
    /// The default value is `GART | WRITE_COMBINED`.
    pub flags: BoFlags,

    pub _ne: NonExhaustive,
}

impl Default for BatchPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            flags: BoFlags::GART | BoFlags::WRITE_COMBINED,
            _ne: NonExhaustive(()),
        }
    }
}

#[derive(Debug)]
pub struct BatchPool {
    service: Arc<dyn BoService>,
    chunk_size: DeviceSize,
    flags: BoFlags,
    chunks: Vec<Arc<Bo>>,
    cursor: DeviceSize,
}

impl BatchPool {
    pub fn new(service: Arc<dyn BoService>, create_info: BatchPoolCreateInfo) -> Self {
        let BatchPoolCreateInfo {
            chunk_size,
            flags,
            _ne: _,
        } = create_info;

        BatchPool {
            service,
            chunk_size,
            flags: flags | BoFlags::MAPPED,
            chunks: Vec::new(),
            cursor: 0,
        }
    }

    /// Reserves `size` bytes whose GPU and CPU addresses are both aligned to `align`.
    ///
    /// When the current chunk is too small, or its mapping is not congruent with its GPU address
    /// modulo `align`, a new chunk of `max(chunk_size, size + align - 1)` bytes becomes current.
    /// On allocation failure the pool keeps its previous chunks and cursor.
    pub fn reserve(
        &mut self,
        size: DeviceSize,
        align: DeviceAlignment,
    ) -> Result<PoolAllocation, VulkanError> {
        if let Some(chunk) = self.chunks.last() {
            if let Some(offset) = aligned_offset(chunk, self.cursor, align) {
                if offset + size <= chunk.size() {
                    let allocation = PoolAllocation::new(chunk.clone(), offset, size)?;
                    self.cursor = offset + size;

                    return Ok(allocation);
                }
            }
        }

        let chunk_size = self
            .chunk_size
            .max(size + align.as_devicesize() - 1);
        let bo = Bo::new(&self.service, chunk_size, align, self.flags)?;

        log::trace!(
            "batch pool grew to {} chunks ({chunk_size} bytes added)",
            self.chunks.len() + 1,
        );

        // The chunk was requested with `align`; a service that ignores it still gets an aligned
        // GPU address out of the slack.
        let offset = align_up(bo.gpu_addr(), align) - bo.gpu_addr();
        let allocation = PoolAllocation::new(bo.clone(), offset, size)?;
        self.chunks.push(bo);
        self.cursor = offset + size;

        Ok(allocation)
    }

    /// Reserves space for `data` and copies it in, returning the allocation.
    pub fn upload(
        &mut self,
        data: &[u8],
        align: DeviceAlignment,
    ) -> Result<PoolAllocation, VulkanError> {
        let allocation = self.reserve(data.len() as DeviceSize, align)?;
        allocation.write(0, data);

        Ok(allocation)
    }

    /// Returns the chunks allocated since the last reset.
    #[inline]
    pub fn chunks(&self) -> &[Arc<Bo>] {
        &self.chunks
    }

    /// Rewinds the pool. One regular-sized chunk is kept for reuse.
    pub fn reset(&mut self) {
        let keep = self
            .chunks
            .iter()
            .position(|chunk| chunk.size() == self.chunk_size);

        match keep {
            Some(i) => {
                let chunk = self.chunks.swap_remove(i);
                self.chunks.clear();
                self.chunks.push(chunk);
            }
            None => self.chunks.clear(),
        }

        // A kept chunk is current again but completely free.
        self.cursor = 0;
    }
}

/// Returns the first offset at or after `cursor` where both addresses of `chunk` are aligned.
fn aligned_offset(chunk: &Bo, cursor: DeviceSize, align: DeviceAlignment) -> Option<DeviceSize> {
    let base = chunk.gpu_addr();
    let offset = align_up(base + cursor, align) - base;
    let cpu = chunk.mapped_ptr()?.as_ptr() as DeviceSize + offset;

    (cpu % align.as_devicesize() == 0).then_some(offset)
}

/// A region reserved from a [`BatchPool`].
#[derive(Debug)]
pub struct PoolAllocation {
    bo: Arc<Bo>,
    offset: DeviceSize,
    size: DeviceSize,
    cpu: NonNull<u8>,
}

impl PoolAllocation {
    fn new(bo: Arc<Bo>, offset: DeviceSize, size: DeviceSize) -> Result<Self, VulkanError> {
        // Chunks are always created with `MAPPED`, so a missing mapping means a broken service.
        let base = bo.mapped_ptr().ok_or(VulkanError::Unknown)?;
        let cpu = unsafe { base.add(offset as usize) };

        Ok(PoolAllocation {
            bo,
            offset,
            size,
            cpu,
        })
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn gpu_addr(&self) -> u64 {
        self.bo.gpu_addr() + self.offset
    }

    /// Returns the CPU address of the region.
    #[inline]
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu
    }

    /// Writes `data` at `offset` within the region.
    ///
    /// # Panics
    ///
    /// - Panics if the write does not fit in the region.
    pub fn write(&self, offset: DeviceSize, data: &[u8]) {
        assert!(offset + data.len() as DeviceSize <= self.size);

        // SAFETY: the pool hands every region out exactly once, and the region is only read by
        // the GPU after the owning batch has been submitted.
        unsafe { self.bo.write(self.offset + offset, data) };
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchPool, BatchPoolCreateInfo};
    use crate::{
        memory::{host::HostBoService, Bo, BoFlags, BoService, DeviceAlignment},
        VulkanError,
    };
    use std::sync::Arc;

    fn pool(chunk_size: u64) -> (Arc<HostBoService>, BatchPool) {
        let host = Arc::new(HostBoService::new());
        let service: Arc<dyn BoService> = host.clone();
        let pool = BatchPool::new(
            service,
            BatchPoolCreateInfo {
                chunk_size,
                ..Default::default()
            },
        );

        (host, pool)
    }

    #[test]
    fn reservations_are_aligned() {
        let (_host, mut pool) = pool(4096);

        for (size, align) in [(3, 1), (17, 16), (64, 64), (5, 8), (100, 256), (1, 32)] {
            let align = DeviceAlignment::new(align).unwrap();
            let alloc = pool.reserve(size, align).unwrap();

            assert_eq!(alloc.gpu_addr() % align.as_devicesize(), 0);
            assert_eq!(
                alloc.cpu_ptr().as_ptr() as u64 % align.as_devicesize(),
                0
            );
        }

        assert_eq!(pool.chunks().len(), 1);
    }

    #[test]
    fn alignment_beyond_chunk_base() {
        let (host, mut pool) = pool(1 << 20);
        let service: Arc<dyn BoService> = host.clone();

        // Pushes the pool's first chunk to an address that is only page-aligned.
        let _other = Bo::new(&service, 4096, DeviceAlignment::MIN, BoFlags::GART).unwrap();

        let small = pool.reserve(16, DeviceAlignment::new(16).unwrap()).unwrap();
        assert_eq!(small.gpu_addr() % 16, 0);

        let align = DeviceAlignment::new(8192).unwrap();
        let big = pool.reserve(16, align).unwrap();
        assert_eq!(big.gpu_addr() % 8192, 0);
        assert_eq!(big.cpu_ptr().as_ptr() as u64 % 8192, 0);

        // Later requests still land behind the aligned one.
        let next = pool.reserve(16, DeviceAlignment::new(16).unwrap()).unwrap();
        if next.bo().handle() == big.bo().handle() {
            assert!(next.offset() >= big.offset() + 16);
        }
    }

    #[test]
    fn allocation_errors_pass_through() {
        let (host, mut pool) = pool(256);
        host.fail_next_allocs_with(1, VulkanError::OutOfHostMemory);

        assert_eq!(
            pool.reserve(8, DeviceAlignment::MIN).unwrap_err(),
            VulkanError::OutOfHostMemory,
        );
        assert!(pool.chunks().is_empty());
    }

    #[test]
    fn overflow_appends_chunk() {
        let (_host, mut pool) = pool(256);
        let align = DeviceAlignment::new(16).unwrap();

        let a = pool.reserve(200, align).unwrap();
        let b = pool.reserve(100, align).unwrap();
        assert_eq!(pool.chunks().len(), 2);
        assert_ne!(a.bo().handle(), b.bo().handle());

        let big = pool.reserve(1000, align).unwrap();
        assert!(big.bo().size() >= 1000 + 15);
        assert_eq!(pool.chunks().len(), 3);
    }

    #[test]
    fn failure_keeps_pool_usable() {
        let (host, mut pool) = pool(256);
        let align = DeviceAlignment::new(4).unwrap();

        pool.reserve(200, align).unwrap();
        host.fail_next_allocs(1);

        assert_eq!(
            pool.reserve(200, align).unwrap_err(),
            VulkanError::OutOfDeviceMemory
        );
        assert_eq!(pool.chunks().len(), 1);

        // Still fits in the first chunk.
        let c = pool.reserve(40, align).unwrap();
        assert_eq!(c.offset(), 200);
    }

    #[test]
    fn reset_keeps_one_chunk() {
        let (host, mut pool) = pool(256);
        let align = DeviceAlignment::new(4).unwrap();

        pool.reserve(200, align).unwrap();
        pool.reserve(200, align).unwrap();
        pool.reserve(2000, align).unwrap();
        assert_eq!(host.live_bo_count(), 3);

        pool.reset();
        assert_eq!(pool.chunks().len(), 1);
        assert_eq!(host.live_bo_count(), 1);

        let again = pool.reserve(8, align).unwrap();
        assert_eq!(again.offset(), 0);
        assert_eq!(pool.chunks().len(), 1);
    }

    #[test]
    fn upload_copies_data() {
        let (_host, mut pool) = pool(256);
        let alloc = pool.upload(&[9, 8, 7], DeviceAlignment::MIN).unwrap();

        let mut out = [0u8; 3];
        unsafe { alloc.bo().read(alloc.offset(), &mut out) };
        assert_eq!(out, [9, 8, 7]);
    }
}
