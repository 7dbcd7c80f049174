// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The device and the services it owns.
//!
//! A [`Device`] stands for one opened GPU. It owns every piece of process-local state that
//! would otherwise be global:
//!
//! - the [BO service](crate::memory::bo::BoService) all GPU memory comes from,
//! - the [memory-requirements cache](MemoryRequirementsCache),
//! - the [scratch-buffer store](ScratchStore),
//! - the interned descriptor-set layouts,
//! - the image and sampler [descriptor heaps](DescriptorHeap),
//! - the shader-local-memory area shared by all queues,
//! - the lost flag and the condition variable that blocking waits sleep on.
//!
//! Everything is created and destroyed together with the device.
//!
//! # Examples
//!
//! ```
//! use drawcore::{
//!     device::{Device, DeviceCreateInfo},
//!     memory::host::HostBoService,
//! };
//! use std::sync::Arc;
//!
//! let service = Arc::new(HostBoService::new());
//! let device = Device::new(DeviceCreateInfo::new(service)).unwrap();
//! assert!(!device.is_lost());
//! ```

pub use self::queue::{Queue, QueueCreateInfo, SubmitInfo};
use crate::{
    cache::OnceCache,
    descriptor_set::layout::{DescriptorSetLayout, LayoutKey},
    format::{FormatDatabase, StandardFormats},
    memory::{
        requirements::{BufferRequirementsInfo, MemoryRequirementsCache},
        scratch::ScratchStore,
        Bo, BoFlags, BoService, DeviceAlignment, MemoryRequirements,
    },
    pack::mali::MaliArch,
    DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    num::NonZero,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

pub mod queue;

/// Static properties of the GPU behind a device.
#[derive(Clone, Debug)]
pub struct DeviceProperties {
    /// The Gen-style hardware generation times ten, for example `90`, `120` or `125`.
    ///
    /// The default value is `120`.
    pub gfx_version: u32,

    /// Whether the Nouveau-style classes are Volta or later.
    ///
    /// The default value is `true`.
    pub nv_volta_or_later: bool,

    /// The default value is [`MaliArch::Bifrost`].
    pub mali_arch: MaliArch,

    /// The largest buffer that can be created.
    ///
    /// The default value is `1 << 32`.
    pub max_buffer_size: DeviceSize,

    /// Blending with a zero destination factor misbehaves with multisampling.
    ///
    /// The default value is `false`.
    pub has_msaa_zero_factor_erratum: bool,

    /// Object-level preemption must be disabled while rasterizer discard is on.
    ///
    /// The default value is `false`.
    pub needs_preemption_toggle: bool,

    /// Toggling depth or stencil writes requires a pipeline stall.
    ///
    /// The default value is `false`.
    pub needs_ds_write_stall: bool,

    /// The default value is `true`.
    pub sample_locations: bool,

    /// The default value is `true`.
    pub fragment_shading_rate: bool,

    /// The number of shader processors that share the local-memory area.
    ///
    /// The default value is `16`.
    pub shader_processor_count: u32,

    /// The default value is `64`.
    pub max_warps_per_processor: u32,

    pub _ne: NonExhaustive,
}

impl Default for DeviceProperties {
    #[inline]
    fn default() -> Self {
        Self {
            gfx_version: 120,
            nv_volta_or_later: true,
            mali_arch: MaliArch::Bifrost,
            max_buffer_size: 1 << 32,
            has_msaa_zero_factor_erratum: false,
            needs_preemption_toggle: false,
            needs_ds_write_stall: false,
            sample_locations: true,
            fragment_shading_rate: true,
            shader_processor_count: 16,
            max_warps_per_processor: 64,
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters to create a new `Device`.
#[derive(Clone, Debug)]
pub struct DeviceCreateInfo {
    /// The service all GPU memory is allocated from.
    pub service: Arc<dyn BoService>,

    pub properties: DeviceProperties,

    /// The default value is [`StandardFormats`].
    pub format_database: Arc<dyn FormatDatabase>,

    /// The size of the chunks batch pools allocate.
    ///
    /// The default value is 64 KiB.
    pub batch_chunk_size: DeviceSize,

    /// The size of one command-stream buffer in dwords.
    ///
    /// The default value is `16 * 1024`.
    pub pushbuf_dwords: u32,

    /// The initial number of entries of the image descriptor heap.
    ///
    /// The default value is `1024`.
    pub image_heap_capacity: u32,

    /// The initial number of entries of the sampler descriptor heap.
    ///
    /// The default value is `256`.
    pub sampler_heap_capacity: u32,

    pub _ne: NonExhaustive,
}

impl DeviceCreateInfo {
    /// Returns a `DeviceCreateInfo` with the specified `service`.
    #[inline]
    pub fn new(service: Arc<dyn BoService>) -> Self {
        Self {
            service,
            properties: DeviceProperties::default(),
            format_database: Arc::new(StandardFormats),
            batch_chunk_size: 64 * 1024,
            pushbuf_dwords: 16 * 1024,
            image_heap_capacity: 1024,
            sampler_heap_capacity: 256,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.batch_chunk_size == 0 {
            return Err(Box::new(ValidationError {
                context: "batch_chunk_size".into(),
                problem: "is zero".into(),
                ..Default::default()
            }));
        }

        if self.pushbuf_dwords < 64 {
            return Err(Box::new(ValidationError {
                context: "pushbuf_dwords".into(),
                problem: "is less than 64".into(),
                ..Default::default()
            }));
        }

        if self.image_heap_capacity == 0 || self.sampler_heap_capacity == 0 {
            return Err(Box::new(ValidationError {
                context: "image_heap_capacity".into(),
                problem: "a descriptor heap capacity is zero".into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// One opened GPU.
#[derive(Debug)]
pub struct Device {
    id: NonZero<u64>,
    service: Arc<dyn BoService>,
    properties: DeviceProperties,
    format_database: Arc<dyn FormatDatabase>,
    batch_chunk_size: DeviceSize,
    pushbuf_dwords: u32,

    requirements_cache: MemoryRequirementsCache,
    scratch_store: ScratchStore,
    pub(crate) descriptor_set_layouts:
        OnceCache<LayoutKey, Arc<DescriptorSetLayout>>,

    image_heap: DescriptorHeap,
    sampler_heap: DescriptorHeap,
    slm: Mutex<SlmArea>,

    lost: AtomicBool,
    sync_mutex: Mutex<()>,
    sync_cond: Condvar,
}

impl Device {
    /// Opens a device.
    pub fn new(create_info: DeviceCreateInfo) -> Result<Arc<Device>, Validated<VulkanError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(create_info)?)
    }

    #[doc(hidden)]
    pub fn new_unchecked(create_info: DeviceCreateInfo) -> Result<Arc<Device>, VulkanError> {
        let DeviceCreateInfo {
            service,
            properties,
            format_database,
            batch_chunk_size,
            pushbuf_dwords,
            image_heap_capacity,
            sampler_heap_capacity,
            _ne: _,
        } = create_info;

        let image_heap = DescriptorHeap::new(
            service.clone(),
            IMAGE_DESCRIPTOR_SIZE,
            image_heap_capacity,
        )?;
        let sampler_heap = DescriptorHeap::new(
            service.clone(),
            SAMPLER_DESCRIPTOR_SIZE,
            sampler_heap_capacity,
        )?;

        Ok(Arc::new(Device {
            id: Self::next_id(),
            requirements_cache: MemoryRequirementsCache::new(properties.max_buffer_size),
            scratch_store: ScratchStore::new(service.clone()),
            descriptor_set_layouts: OnceCache::new(),
            service,
            properties,
            format_database,
            batch_chunk_size,
            pushbuf_dwords,
            image_heap,
            sampler_heap,
            slm: Mutex::new(SlmArea::default()),
            lost: AtomicBool::new(false),
            sync_mutex: Mutex::new(()),
            sync_cond: Condvar::new(),
        }))
    }

    #[inline]
    pub fn service(&self) -> &Arc<dyn BoService> {
        &self.service
    }

    #[inline]
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn format_database(&self) -> &Arc<dyn FormatDatabase> {
        &self.format_database
    }

    #[inline]
    pub fn batch_chunk_size(&self) -> DeviceSize {
        self.batch_chunk_size
    }

    #[inline]
    pub fn pushbuf_dwords(&self) -> u32 {
        self.pushbuf_dwords
    }

    #[inline]
    pub fn scratch_store(&self) -> &ScratchStore {
        &self.scratch_store
    }

    #[inline]
    pub fn requirements_cache(&self) -> &MemoryRequirementsCache {
        &self.requirements_cache
    }

    /// Returns the memory requirements of a buffer, going through the cache when possible.
    pub fn buffer_memory_requirements(
        &self,
        info: &BufferRequirementsInfo,
    ) -> Result<MemoryRequirements, VulkanError> {
        self.check_lost()?;
        self.requirements_cache
            .buffer_requirements(self.service.as_ref(), info)
    }

    /// Returns the heap holding the descriptors of every image view.
    #[inline]
    pub fn image_heap(&self) -> &DescriptorHeap {
        &self.image_heap
    }

    /// Returns the heap holding the descriptors of every sampler.
    #[inline]
    pub fn sampler_heap(&self) -> &DescriptorHeap {
        &self.sampler_heap
    }

    /// Grows the shader-local-memory area so that it holds `bytes_per_thread` for every thread
    /// the GPU can run at once. The area never shrinks.
    pub fn ensure_slm(&self, bytes_per_thread: u32) -> Result<(), VulkanError> {
        let bytes_per_warp = DeviceSize::from(bytes_per_thread * 32).next_multiple_of(0x200);
        let bytes_per_processor =
            bytes_per_warp * DeviceSize::from(self.properties.max_warps_per_processor);

        if bytes_per_processor <= self.slm.lock().bytes_per_processor {
            return Ok(());
        }

        let size = bytes_per_processor * DeviceSize::from(self.properties.shader_processor_count);
        let bo = Bo::new(
            &self.service,
            size,
            SLM_ALIGNMENT,
            BoFlags::VRAM | BoFlags::NO_SHARE,
        )?;

        let mut slm = self.slm.lock();

        // Another thread may have grown the area further while the lock was released.
        if bytes_per_processor <= slm.bytes_per_processor {
            return Ok(());
        }

        log::debug!(
            "shader local memory grown to {bytes_per_processor} bytes per processor ({size} bytes)",
        );

        *slm = SlmArea {
            bo: Some(bo),
            bytes_per_warp,
            bytes_per_processor,
        };

        Ok(())
    }

    /// Returns the current shader-local-memory area.
    #[inline]
    pub fn slm(&self) -> SlmArea {
        self.slm.lock().clone()
    }

    /// Returns whether the device was lost. Once lost, a device stays lost.
    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Marks the device as lost and wakes up every blocked waiter.
    pub fn mark_lost(&self, reason: &str) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::warn!("device lost: {reason}");
        }

        self.notify_syncs();
    }

    #[inline]
    pub(crate) fn check_lost(&self) -> Result<(), VulkanError> {
        if self.is_lost() {
            Err(VulkanError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Locks the mutex that sync state transitions are published under.
    #[inline]
    pub(crate) fn lock_syncs(&self) -> MutexGuard<'_, ()> {
        self.sync_mutex.lock()
    }

    /// Sleeps until a sync changes state or `deadline` passes. Returns `false` on timeout.
    pub(crate) fn wait_syncs_changed(
        &self,
        guard: &mut MutexGuard<'_, ()>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => !self.sync_cond.wait_until(guard, deadline).timed_out(),
            None => {
                self.sync_cond.wait(guard);
                true
            }
        }
    }

    /// Wakes every thread blocked in a multi-sync wait.
    pub(crate) fn notify_syncs(&self) {
        let _guard = self.sync_mutex.lock();
        self.sync_cond.notify_all();
    }
}

crate::macros::impl_id_counter!(Device);

const SLM_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(1 << 17) };
const HEAP_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(256) };

/// The size of one entry of the image heap.
pub const IMAGE_DESCRIPTOR_SIZE: u32 = 32;

/// The size of one entry of the sampler heap.
pub const SAMPLER_DESCRIPTOR_SIZE: u32 = 32;

/// The shader-local-memory area shared by all queues of a device.
#[derive(Clone, Debug, Default)]
pub struct SlmArea {
    pub bo: Option<Arc<Bo>>,
    pub bytes_per_warp: DeviceSize,
    pub bytes_per_processor: DeviceSize,
}

/// A growable table of fixed-size descriptors in one BO, indexed by the GPU.
///
/// Freed entries are recycled before the table grows. Growing allocates a BO of twice the
/// capacity and copies the live entries over, so the BO returned by [`snapshot`](Self::snapshot)
/// may change after any [`add`](Self::add).
#[derive(Debug)]
pub struct DescriptorHeap {
    service: Arc<dyn BoService>,
    descriptor_size: u32,
    state: Mutex<HeapState>,
}

#[derive(Debug)]
struct HeapState {
    bo: Arc<Bo>,
    capacity: u32,
    alloc_count: u32,
    free_list: Vec<u32>,
}

impl DescriptorHeap {
    fn new(
        service: Arc<dyn BoService>,
        descriptor_size: u32,
        capacity: u32,
    ) -> Result<Self, VulkanError> {
        let bo = Self::alloc_bo(&service, descriptor_size, capacity)?;

        Ok(DescriptorHeap {
            service,
            descriptor_size,
            state: Mutex::new(HeapState {
                bo,
                capacity,
                alloc_count: 0,
                free_list: Vec::new(),
            }),
        })
    }

    fn alloc_bo(
        service: &Arc<dyn BoService>,
        descriptor_size: u32,
        capacity: u32,
    ) -> Result<Arc<Bo>, VulkanError> {
        Bo::new(
            service,
            DeviceSize::from(descriptor_size) * DeviceSize::from(capacity),
            HEAP_ALIGNMENT,
            BoFlags::GART | BoFlags::MAPPED | BoFlags::NO_SHARE,
        )
    }

    #[inline]
    pub fn descriptor_size(&self) -> u32 {
        self.descriptor_size
    }

    /// Stores `descriptor` and returns its index.
    ///
    /// # Panics
    ///
    /// - Panics if `descriptor` is longer than the descriptor size.
    pub fn add(&self, descriptor: &[u8]) -> Result<u32, VulkanError> {
        assert!(descriptor.len() <= self.descriptor_size as usize);

        let mut state = self.state.lock();

        let index = match state.free_list.pop() {
            Some(index) => index,
            None => {
                if state.alloc_count == state.capacity {
                    self.grow(&mut state)?;
                }

                state.alloc_count += 1;
                state.alloc_count - 1
            }
        };

        let offset = DeviceSize::from(index) * DeviceSize::from(self.descriptor_size);
        let mut entry = vec![0u8; self.descriptor_size as usize];
        entry[..descriptor.len()].copy_from_slice(descriptor);
        unsafe { state.bo.write(offset, &entry) };

        Ok(index)
    }

    /// Returns `index` to the free list.
    pub fn remove(&self, index: u32) {
        let mut state = self.state.lock();
        debug_assert!(index < state.alloc_count);
        debug_assert!(!state.free_list.contains(&index));
        state.free_list.push(index);
    }

    fn grow(&self, state: &mut HeapState) -> Result<(), VulkanError> {
        let new_capacity = state.capacity * 2;
        let bo = Self::alloc_bo(&self.service, self.descriptor_size, new_capacity)?;

        let used = (state.alloc_count * self.descriptor_size) as usize;
        let mut contents = vec![0u8; used];
        unsafe {
            state.bo.read(0, &mut contents);
            bo.write(0, &contents);
        }

        log::debug!(
            "descriptor heap grown from {} to {new_capacity} entries",
            state.capacity,
        );

        state.bo = bo;
        state.capacity = new_capacity;

        Ok(())
    }

    /// Returns the current BO and the number of entries ever handed out.
    pub fn snapshot(&self) -> (Arc<Bo>, u32) {
        let state = self.state.lock();
        (state.bo.clone(), state.alloc_count)
    }

    /// Reads back the descriptor at `index`.
    pub fn read(&self, index: u32) -> Vec<u8> {
        let state = self.state.lock();
        let mut entry = vec![0u8; self.descriptor_size as usize];
        unsafe {
            state.bo.read(
                DeviceSize::from(index) * DeviceSize::from(self.descriptor_size),
                &mut entry,
            )
        };

        entry
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceCreateInfo, DeviceProperties};
    use crate::{
        device::Device,
        memory::{host::HostBoService, requirements::BufferRequirementsInfo, BufferUsage},
        Validated, VulkanError,
    };
    use std::sync::Arc;

    #[test]
    fn invalid_create_info() {
        let service = Arc::new(HostBoService::new());

        match Device::new(DeviceCreateInfo {
            pushbuf_dwords: 8,
            ..DeviceCreateInfo::new(service)
        }) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "create_info.pushbuf_dwords");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn heap_recycles_then_grows() {
        let service = Arc::new(HostBoService::new());
        let device = Device::new(DeviceCreateInfo {
            image_heap_capacity: 2,
            ..DeviceCreateInfo::new(service)
        })
        .unwrap();
        let heap = device.image_heap();

        assert_eq!(heap.add(&[1; 4]).unwrap(), 0);
        assert_eq!(heap.add(&[2; 4]).unwrap(), 1);
        let (first_bo, count) = heap.snapshot();
        assert_eq!(count, 2);

        heap.remove(0);
        assert_eq!(heap.add(&[3; 4]).unwrap(), 0);
        assert_eq!(heap.snapshot().0.handle(), first_bo.handle());

        assert_eq!(heap.add(&[4; 4]).unwrap(), 2);
        let (grown_bo, count) = heap.snapshot();
        assert_ne!(grown_bo.handle(), first_bo.handle());
        assert_eq!(count, 3);
        assert_eq!(&heap.read(1)[..4], &[2; 4]);
        assert_eq!(&heap.read(0)[..4], &[3; 4]);
    }

    #[test]
    fn slm_grows_monotonically() {
        let (device, _service) = dev!(DeviceProperties {
            shader_processor_count: 2,
            max_warps_per_processor: 4,
            ..Default::default()
        });

        assert!(device.slm().bo.is_none());

        device.ensure_slm(16).unwrap();
        let slm = device.slm();
        assert_eq!(slm.bytes_per_warp, 0x200);
        assert_eq!(slm.bytes_per_processor, 0x800);
        let handle = slm.bo.unwrap().handle();

        // Smaller requests keep the area.
        device.ensure_slm(4).unwrap();
        assert_eq!(device.slm().bo.unwrap().handle(), handle);

        device.ensure_slm(64).unwrap();
        let slm = device.slm();
        assert_eq!(slm.bytes_per_warp, 0x800);
        assert_ne!(slm.bo.unwrap().handle(), handle);
    }

    #[test]
    fn lost_is_sticky() {
        let (device, _service) = dev!();
        device.mark_lost("test");
        device.mark_lost("again");
        assert!(device.is_lost());

        let info = BufferRequirementsInfo {
            size: 64,
            usage: BufferUsage::UNIFORM_BUFFER,
            ..Default::default()
        };
        assert_eq!(
            device.buffer_memory_requirements(&info),
            Err(VulkanError::DeviceLost),
        );
    }
}
