// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The device-wide scratch buffer used by partial renders.
//!
//! Partial renders are serialized by the hardware across the whole device, so all batches can
//! share one buffer. The store keeps the largest buffer requested so far as its head; a larger
//! request replaces the head, and the previous buffer lives on until its last reference is
//! released.

use super::{Bo, BoFlags, BoService, DeviceAlignment};
use crate::{DeviceSize, VulkanError};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
pub struct ScratchStore {
    service: Arc<dyn BoService>,
    head: Mutex<Option<Arc<ScratchBuffer>>>,
}

/// A reference-counted scratch buffer handed out by [`ScratchStore::get`].
#[derive(Debug)]
pub struct ScratchBuffer {
    bo: Arc<Bo>,
    size: DeviceSize,
}

impl ScratchBuffer {
    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }
}

impl ScratchStore {
    pub fn new(service: Arc<dyn BoService>) -> Self {
        ScratchStore {
            service,
            head: Mutex::new(None),
        }
    }

    /// Returns a reference to a scratch buffer of at least `size` bytes.
    ///
    /// If the head is missing or smaller than `size`, a buffer of exactly `size` bytes is
    /// allocated and becomes the head. On failure the head is left untouched.
    pub fn get(&self, size: DeviceSize) -> Result<Arc<ScratchBuffer>, VulkanError> {
        let mut head = self.head.lock();

        if let Some(current) = &*head {
            if current.size >= size {
                return Ok(current.clone());
            }
        }

        let bo = Bo::new(
            &self.service,
            size,
            DeviceAlignment::MIN,
            BoFlags::VRAM | BoFlags::NO_SHARE,
        )?;

        log::debug!(
            "scratch buffer grown from {} to {size} bytes",
            head.as_ref().map_or(0, |current| current.size),
        );

        let buffer = Arc::new(ScratchBuffer { bo, size });
        *head = Some(buffer.clone());

        Ok(buffer)
    }

    /// Drops a reference obtained from [`get`](Self::get). A replaced buffer is destroyed with
    /// its last reference.
    #[inline]
    pub fn release(&self, buffer: Arc<ScratchBuffer>) {
        drop(buffer);
    }

    /// Returns the size of the current head, or 0 if nothing was requested yet.
    pub fn head_size(&self) -> DeviceSize {
        self.head.lock().as_ref().map_or(0, |head| head.size)
    }
}

#[cfg(test)]
mod tests {
    use super::ScratchStore;
    use crate::{
        memory::{host::HostBoService, BoService},
        VulkanError,
    };
    use std::sync::Arc;

    fn store() -> (Arc<HostBoService>, ScratchStore) {
        let host = Arc::new(HostBoService::new());
        let service: Arc<dyn BoService> = host.clone();

        (host, ScratchStore::new(service))
    }

    #[test]
    fn head_grows_monotonically() {
        let (_host, store) = store();
        let mut last = 0;

        for size in [4096, 1024, 8192, 8192, 100, 65536] {
            let buffer = store.get(size).unwrap();
            assert!(buffer.size() >= size);
            assert!(store.head_size() >= last);
            last = store.head_size();
        }

        assert_eq!(last, 65536);
    }

    #[test]
    fn smaller_request_shares_head() {
        let (host, store) = store();

        let a = store.get(8192).unwrap();
        let b = store.get(4096).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(Arc::strong_count(&a), 3);
        assert_eq!(host.live_bo_count(), 1);
    }

    #[test]
    fn replaced_head_dies_with_last_reference() {
        let (host, store) = store();

        let old = store.get(4096).unwrap();
        let new = store.get(8192).unwrap();
        assert_eq!(host.live_bo_count(), 2);

        store.release(old);
        assert_eq!(host.live_bo_count(), 1);

        store.release(new);
        assert_eq!(host.live_bo_count(), 1);
        assert_eq!(store.head_size(), 8192);
    }

    #[test]
    fn failure_keeps_head() {
        let (host, store) = store();

        let _a = store.get(4096).unwrap();
        host.fail_next_allocs(1);

        assert_eq!(
            store.get(1 << 20).unwrap_err(),
            VulkanError::OutOfDeviceMemory
        );
        assert_eq!(store.head_size(), 4096);
    }

    #[test]
    fn service_errors_pass_through() {
        let (host, store) = store();
        host.fail_next_allocs_with(1, VulkanError::OutOfHostMemory);

        assert_eq!(store.get(4096).unwrap_err(), VulkanError::OutOfHostMemory);
        assert_eq!(store.head_size(), 0);
    }
}
