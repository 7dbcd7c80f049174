// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Cache of buffer memory requirements.
//!
//! The requirements of a buffer only depend on its usage and creation flags, apart from the
//! size which is rounded up to the alignment. Asking the device is a synchronous round trip, so
//! the answer for each `(usage, flags)` pair is fetched once and published for every thread.
//! Published entries are read without taking a lock.

use super::{align_up, BoService, BufferCreateFlags, BufferUsage, MemoryRequirements};
use crate::{DeviceSize, NonExhaustive, VulkanError};
use parking_lot::Mutex;
use std::sync::OnceLock;

/// The number of `(usage, flags)` pairs the cache can hold. Must be a power of two.
const SLOT_COUNT: usize = 256;

/// Describes a buffer whose memory requirements are queried.
#[derive(Clone, Debug)]
pub struct BufferRequirementsInfo {
    /// The default value is `0`.
    pub size: DeviceSize,

    /// The default value is empty.
    pub usage: BufferUsage,

    /// The default value is empty.
    pub flags: BufferCreateFlags,

    /// Whether the buffer is only accessed by one queue family at a time.
    ///
    /// The default value is `true`.
    pub sharing_exclusive: bool,

    /// Whether the creation carries extension structures, such as external memory info.
    ///
    /// The default value is `false`.
    pub has_extensions: bool,

    pub _ne: NonExhaustive,
}

impl Default for BufferRequirementsInfo {
    #[inline]
    fn default() -> Self {
        Self {
            size: 0,
            usage: BufferUsage::empty(),
            flags: BufferCreateFlags::empty(),
            sharing_exclusive: true,
            has_extensions: false,
            _ne: NonExhaustive(()),
        }
    }
}

#[derive(Debug)]
pub struct MemoryRequirementsCache {
    max_buffer_size: DeviceSize,
    // Open addressing with linear probing. Slots are written once, by the holder of `fill`, and
    // never cleared, so a vacant slot ends every probe sequence.
    slots: Box<[OnceLock<(u64, MemoryRequirements)>]>,
    fill: Mutex<()>,
}

impl MemoryRequirementsCache {
    /// Creates an empty cache. Buffers larger than `max_buffer_size` bypass it.
    pub fn new(max_buffer_size: DeviceSize) -> Self {
        MemoryRequirementsCache {
            max_buffer_size,
            slots: (0..SLOT_COUNT).map(|_| OnceLock::new()).collect(),
            fill: Mutex::new(()),
        }
    }

    /// Returns the cache key of a `(usage, flags)` pair.
    #[inline]
    pub fn key(usage: BufferUsage, flags: BufferCreateFlags) -> u64 {
        (u64::from(flags.bits()) << 32) | u64::from(usage.bits())
    }

    /// Returns whether requirements for `info` may be served from the cache.
    pub fn is_cacheable(&self, info: &BufferRequirementsInfo) -> bool {
        info.size <= self.max_buffer_size && info.sharing_exclusive && !info.has_extensions
    }

    /// Looks `key` up, returning either its entry or the slot it would be published in. The
    /// slot is `None` once the table is full.
    fn lookup(&self, key: u64) -> Result<MemoryRequirements, Option<usize>> {
        let start = (key.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32) as usize;

        for step in 0..SLOT_COUNT {
            let index = (start + step) & (SLOT_COUNT - 1);

            match self.slots[index].get() {
                Some(&(slot_key, entry)) if slot_key == key => return Ok(entry),
                Some(_) => (),
                None => return Err(Some(index)),
            }
        }

        Err(None)
    }

    /// Returns the entry for `key`, running `producer` if the entry is vacant.
    ///
    /// Published entries are returned without locking. Otherwise `producer` runs under a fill
    /// lock, at most once per key across all threads, and callers that race with it wait and
    /// then observe its result. A failed producer publishes nothing. Once every slot is taken,
    /// new keys are no longer published and `producer` runs on each call.
    pub fn get_or_fill<E>(
        &self,
        key: u64,
        producer: impl FnOnce() -> Result<MemoryRequirements, E>,
    ) -> Result<MemoryRequirements, E> {
        if let Ok(entry) = self.lookup(key) {
            return Ok(entry);
        }

        let _fill = self.fill.lock();

        let vacant = match self.lookup(key) {
            Ok(entry) => return Ok(entry),
            Err(vacant) => vacant,
        };

        let entry = producer()?;

        match vacant {
            Some(index) => {
                // Only the holder of `fill` writes slots, so the slot is still vacant.
                let _ = self.slots[index].set((key, entry));
                log::debug!("memory requirements for key {key:#x} cached: {entry:?}");
            }
            None => log::warn!("memory requirements cache is full, key {key:#x} is not cached"),
        }

        Ok(entry)
    }

    /// Returns the memory requirements of the buffer described by `info`.
    pub fn buffer_requirements(
        &self,
        service: &dyn BoService,
        info: &BufferRequirementsInfo,
    ) -> Result<MemoryRequirements, VulkanError> {
        if !self.is_cacheable(info) {
            return service.buffer_memory_requirements(info.size, info.usage, info.flags);
        }

        let entry = self.get_or_fill(Self::key(info.usage, info.flags), || {
            service.buffer_memory_requirements(info.size, info.usage, info.flags)
        })?;

        Ok(MemoryRequirements {
            size: align_up(info.size, entry.alignment),
            ..entry
        })
    }

    /// Returns the number of published entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferRequirementsInfo, MemoryRequirementsCache, SLOT_COUNT};
    use crate::{
        memory::{
            align_up, host::HostBoService, BufferCreateFlags, BufferUsage, DeviceAlignment,
            MemoryRequirements,
        },
        DeviceSize,
    };
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            mpsc, Arc,
        },
        thread,
        time::Duration,
    };

    fn requirements(size: DeviceSize) -> MemoryRequirements {
        MemoryRequirements {
            size,
            alignment: DeviceAlignment::new(64).unwrap(),
            memory_type_bits: 1,
            ..Default::default()
        }
    }

    #[test]
    fn producer_runs_once_across_threads() {
        let cache = Arc::new(MemoryRequirementsCache::new(1 << 30));
        let calls = Arc::new(AtomicU32::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();

                thread::spawn(move || {
                    cache
                        .get_or_fill(42, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));

                            Ok::<_, ()>(requirements(64))
                        })
                        .unwrap()
                })
            })
            .collect();

        for t in threads {
            assert_eq!(t.join().unwrap().size, 64);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn published_entries_are_read_without_locking() {
        let cache = Arc::new(MemoryRequirementsCache::new(1 << 30));
        cache
            .get_or_fill(7, || Ok::<_, ()>(requirements(64)))
            .unwrap();

        let _fill = cache.fill.lock();
        let (tx, rx) = mpsc::channel();
        let reader = cache.clone();

        thread::spawn(move || {
            let _ = tx.send(reader.get_or_fill(7, || Err(())));
        });

        let entry = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(entry.unwrap().size, 64);
    }

    #[test]
    fn full_table_still_answers() {
        let cache = MemoryRequirementsCache::new(1 << 30);

        for key in 0..SLOT_COUNT as u64 {
            cache
                .get_or_fill(key, || Ok::<_, ()>(requirements(64)))
                .unwrap();
        }
        assert_eq!(cache.len(), SLOT_COUNT);

        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let entry = cache
                .get_or_fill(u64::MAX, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(requirements(128))
                })
                .unwrap();
            assert_eq!(entry.size, 128);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_or_fill(0, || Err(())).unwrap().size, 64);
        assert_eq!(cache.len(), SLOT_COUNT);
    }

    #[test]
    fn successive_queries_are_identical() {
        let service = HostBoService::new();
        let cache = MemoryRequirementsCache::new(1 << 30);
        let info = BufferRequirementsInfo {
            size: 1000,
            usage: BufferUsage::UNIFORM_BUFFER | BufferUsage::TRANSFER_DST,
            ..Default::default()
        };

        let a = cache.buffer_requirements(&service, &info).unwrap();
        let b = cache.buffer_requirements(&service, &info).unwrap();

        assert_eq!(a, b);
        assert!(a.size <= align_up(info.size, a.alignment));
        assert_eq!(service.requirement_query_count(), 1);
    }

    #[test]
    fn size_is_rescaled_per_query() {
        let service = HostBoService::new();
        let cache = MemoryRequirementsCache::new(1 << 30);
        let small = BufferRequirementsInfo {
            size: 10,
            usage: BufferUsage::STORAGE_BUFFER,
            ..Default::default()
        };
        let large = BufferRequirementsInfo {
            size: 1000,
            ..small.clone()
        };

        assert_eq!(cache.buffer_requirements(&service, &small).unwrap().size, 64);
        assert_eq!(cache.buffer_requirements(&service, &large).unwrap().size, 1024);
        assert_eq!(service.requirement_query_count(), 1);
    }

    #[test]
    fn uncacheable_buffers_bypass() {
        let service = HostBoService::new();
        let cache = MemoryRequirementsCache::new(4096);

        let huge = BufferRequirementsInfo {
            size: 8192,
            ..Default::default()
        };
        let concurrent = BufferRequirementsInfo {
            sharing_exclusive: false,
            ..Default::default()
        };
        let external = BufferRequirementsInfo {
            has_extensions: true,
            flags: BufferCreateFlags::PROTECTED,
            ..Default::default()
        };

        for info in [&huge, &concurrent, &external] {
            cache.buffer_requirements(&service, info).unwrap();
        }

        assert!(cache.is_empty());
        assert_eq!(service.requirement_query_count(), 3);
    }
}
