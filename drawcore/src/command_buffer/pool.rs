// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Memory and resource pool for recording command buffers.
//!
//! A command pool hands out [`CommandBuffer`]s and takes their recording resources (the command
//! stream and the batch pool) back when they are dropped. Freed resources are rewound and kept
//! on a free list, so that the next allocation reuses their BOs instead of allocating new ones.
//! [`CommandPool::trim`] releases the free list.
//!
//! Resetting the pool bumps its generation. Command buffers notice the new generation the next
//! time they are used and reset themselves, so the pool never has to reach into buffers it
//! handed out.

use super::{stream::CommandStream, CommandBuffer, CommandBufferLevel};
use crate::{
    device::Device,
    macros::{impl_id_counter, vulkan_bitflags},
    memory::{
        pool::{BatchPool, BatchPoolCreateInfo},
        BoAccess, DeviceAlignment,
    },
    DeviceOwned, NonExhaustive, ValidationError, VulkanError,
};
use crossbeam_queue::SegQueue;
use std::{
    num::NonZero,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

vulkan_bitflags! {
    /// Additional properties of the command pool.
    CommandPoolCreateFlags = CommandPoolCreateFlags(u32);

    /// A hint to the implementation that the command buffers allocated from this pool will be
    /// short-lived.
    TRANSIENT = TRANSIENT,

    /// Command buffers allocated from this pool can be reset individually.
    RESET_COMMAND_BUFFER = RESET_COMMAND_BUFFER,
}

vulkan_bitflags! {
    /// Additional properties of the command pool reset operation.
    CommandPoolResetFlags = CommandPoolResetFlags(u32);

    /// Release the free list as well.
    RELEASE_RESOURCES = RELEASE_RESOURCES,
}

/// Parameters to create a new `CommandPool`.
#[derive(Clone, Debug)]
pub struct CommandPoolCreateInfo {
    /// Additional properties of the command pool.
    ///
    /// The default value is empty.
    pub flags: CommandPoolCreateFlags,

    pub _ne: NonExhaustive,
}

impl Default for CommandPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            flags: CommandPoolCreateFlags::empty(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters to allocate command buffers from a `CommandPool`.
#[derive(Clone, Debug)]
pub struct CommandBufferAllocateInfo {
    /// The level of command buffer to allocate.
    ///
    /// The default value is [`CommandBufferLevel::Primary`].
    pub level: CommandBufferLevel,

    /// The number of command buffers to allocate.
    ///
    /// The default value is `1`.
    pub command_buffer_count: u32,

    pub _ne: NonExhaustive,
}

impl Default for CommandBufferAllocateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            level: CommandBufferLevel::Primary,
            command_buffer_count: 1,
            _ne: NonExhaustive(()),
        }
    }
}

impl CommandBufferAllocateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.command_buffer_count == 0 {
            return Err(Box::new(ValidationError {
                context: "command_buffer_count".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkCommandBufferAllocateInfo-commandBufferCount-arraylength"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// The memory a command buffer records into.
#[derive(Debug)]
pub(crate) struct RecordingResources {
    pub(crate) stream: CommandStream,
    pub(crate) batch: BatchPool,
}

impl RecordingResources {
    fn new(device: &Device) -> Self {
        RecordingResources {
            stream: CommandStream::new(device.service().clone(), device.pushbuf_dwords()),
            batch: BatchPool::new(
                device.service().clone(),
                BatchPoolCreateInfo {
                    chunk_size: device.batch_chunk_size(),
                    ..Default::default()
                },
            ),
        }
    }

    /// Copies `data` into the batch pool and returns its GPU address. The chunk holding it is
    /// referenced by the stream.
    pub(crate) fn upload(
        &mut self,
        data: &[u8],
        align: DeviceAlignment,
    ) -> Result<u64, VulkanError> {
        let allocation = self.batch.upload(data, align)?;
        self.stream.ref_bo(allocation.bo(), BoAccess::READ);

        Ok(allocation.gpu_addr())
    }

    /// Rewinds both allocators without giving their retained BOs back.
    pub(crate) fn reset(&mut self) {
        self.stream.reset();
        self.batch.reset();
    }
}

/// Owns the recording resources of command buffers.
#[derive(Debug)]
pub struct CommandPool {
    device: Arc<Device>,
    id: NonZero<u64>,
    flags: CommandPoolCreateFlags,
    generation: AtomicU64,
    live: AtomicU32,
    free: SegQueue<RecordingResources>,
}

impl CommandPool {
    /// Creates a new `CommandPool`.
    pub fn new(device: Arc<Device>, create_info: CommandPoolCreateInfo) -> Arc<CommandPool> {
        let CommandPoolCreateInfo { flags, _ne: _ } = create_info;

        Arc::new(CommandPool {
            device,
            id: Self::next_id(),
            flags,
            generation: AtomicU64::new(0),
            live: AtomicU32::new(0),
            free: SegQueue::new(),
        })
    }

    #[inline]
    pub fn flags(&self) -> CommandPoolCreateFlags {
        self.flags
    }

    /// Allocates command buffers, reusing freed recording resources first.
    pub fn allocate_command_buffers(
        self: &Arc<Self>,
        allocate_info: CommandBufferAllocateInfo,
    ) -> Result<Vec<CommandBuffer>, Box<ValidationError>> {
        allocate_info
            .validate()
            .map_err(|err| err.add_context("allocate_info"))?;

        let CommandBufferAllocateInfo {
            level,
            command_buffer_count,
            _ne: _,
        } = allocate_info;

        let generation = self.generation();
        let mut reused = 0;

        let buffers = (0..command_buffer_count)
            .map(|_| {
                let resources = match self.free.pop() {
                    Some(resources) => {
                        reused += 1;
                        resources
                    }
                    None => RecordingResources::new(&self.device),
                };

                self.live.fetch_add(1, Ordering::Relaxed);

                CommandBuffer::new(self.clone(), level, generation, resources)
            })
            .collect();

        log::trace!(
            "allocated {command_buffer_count} command buffers from pool {} ({reused} reused)",
            self.id,
        );

        Ok(buffers)
    }

    /// Resets every command buffer allocated from the pool.
    ///
    /// Buffers are reset lazily, the next time they are used. With `RELEASE_RESOURCES` the free
    /// list is released as well.
    pub fn reset(&self, flags: CommandPoolResetFlags) {
        self.generation.fetch_add(1, Ordering::AcqRel);

        if flags.intersects(CommandPoolResetFlags::RELEASE_RESOURCES) {
            self.trim();
        }
    }

    /// Releases the recording resources of freed command buffers.
    pub fn trim(&self) {
        let mut released = 0;

        while self.free.pop().is_some() {
            released += 1;
        }

        if released > 0 {
            log::trace!("trimmed {released} freed command buffers from pool {}", self.id);
        }
    }

    /// Returns the number of command buffers that are currently allocated.
    #[inline]
    pub fn live_count(&self) -> u32 {
        self.live.load(Ordering::Relaxed)
    }

    /// Returns the number of freed command buffers whose resources wait for reuse.
    #[inline]
    pub fn freed_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Takes the resources of a dropped command buffer back.
    pub(crate) fn recycle(&self, mut resources: RecordingResources) {
        resources.reset();
        self.free.push(resources);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl DeviceOwned for CommandPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(CommandPool);

#[cfg(test)]
mod tests {
    use super::{
        CommandBufferAllocateInfo, CommandPool, CommandPoolCreateInfo, CommandPoolResetFlags,
    };
    use crate::command_buffer::{CommandBufferBeginInfo, CommandBufferState};

    #[test]
    fn freed_resources_are_reused() {
        let (device, service) = dev!();
        let pool = CommandPool::new(device, CommandPoolCreateInfo::default());

        let mut buffers = pool
            .allocate_command_buffers(CommandBufferAllocateInfo {
                command_buffer_count: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pool.live_count(), 2);

        for cb in &mut buffers {
            cb.begin(CommandBufferBeginInfo::default()).unwrap();
        }

        let bos = service.live_bo_count();
        drop(buffers);

        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.freed_count(), 2);
        assert!(service.live_bo_count() <= bos);

        let again = pool
            .allocate_command_buffers(CommandBufferAllocateInfo::default())
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(pool.freed_count(), 1);

        pool.trim();
        assert_eq!(pool.freed_count(), 0);
    }

    #[test]
    fn zero_count_is_rejected() {
        let (device, _service) = dev!();
        let pool = CommandPool::new(device, CommandPoolCreateInfo::default());

        let err = pool
            .allocate_command_buffers(CommandBufferAllocateInfo {
                command_buffer_count: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.context, "allocate_info.command_buffer_count");
    }

    #[test]
    fn pool_reset_reaches_buffers_lazily() {
        let (device, _service) = dev!();
        let pool = CommandPool::new(device, CommandPoolCreateInfo::default());
        let mut cb = pool
            .allocate_command_buffers(CommandBufferAllocateInfo::default())
            .unwrap()
            .pop()
            .unwrap();

        cb.begin(CommandBufferBeginInfo::default()).unwrap();
        cb.end().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Executable);

        pool.reset(CommandPoolResetFlags::empty());
        assert_eq!(cb.state(), CommandBufferState::Initial);
        assert!(cb.stream_dwords().is_empty());
    }
}
