// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Hands recorded command buffers to the kernel.
//!
//! Every queue keeps a small state block recording which descriptor heaps and which
//! shader-local-memory area the GPU currently has bound. Before a submission the block is
//! compared with the device's current objects; when anything moved, a short pre-stream that
//! rebinds them is submitted ahead of the work.

use super::{Device, SlmArea};
use crate::{
    command_buffer::{stream::CommandStream, CommandBuffer, CommandBufferLevel, CommandBufferState},
    macros::impl_id_counter,
    memory::{refs::BoReference, Bo, BoAccess, BoHandle, Submission},
    pack::nv::{
        mthd, Push, Subchannel, INVALIDATE_ALL_LINES, LOCAL_WINDOW, SHARED_WINDOW,
    },
    sync::{BinarySync, BinarySyncCreateInfo, SyncError, SyncState},
    DeviceOwned, DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{num::NonZero, sync::Arc};

/// Parameters to create a new `Queue`.
#[derive(Clone, Debug)]
pub struct QueueCreateInfo {
    /// The size in dwords of the buffer the state pre-stream is built in.
    ///
    /// The default value is `256`.
    pub state_stream_dwords: u32,

    pub _ne: NonExhaustive,
}

impl Default for QueueCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            state_stream_dwords: 256,
            _ne: NonExhaustive(()),
        }
    }
}

/// One batch of work for [`Queue::submit`].
#[derive(Debug)]
pub struct SubmitInfo<'a> {
    /// Syncs the work waits on.
    ///
    /// The default value is empty.
    pub wait_syncs: Vec<Arc<BinarySync>>,

    /// The command buffers to execute, in order. They must be primary and executable.
    ///
    /// The default value is empty.
    pub command_buffers: Vec<&'a mut CommandBuffer>,

    /// Syncs signaled once the work completes. They must not have a signal pending already.
    ///
    /// The default value is empty.
    pub signal_syncs: Vec<Arc<BinarySync>>,

    pub _ne: NonExhaustive,
}

impl Default for SubmitInfo<'_> {
    #[inline]
    fn default() -> Self {
        Self {
            wait_syncs: Vec::new(),
            command_buffers: Vec::new(),
            signal_syncs: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl SubmitInfo<'_> {
    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        for (index, sync) in self.wait_syncs.iter().enumerate() {
            if sync.device().as_ref() != device {
                return Err(Box::new(ValidationError {
                    context: format!("wait_syncs[{index}]").into(),
                    problem: "was not created from the device of the queue".into(),
                    vuids: &["VUID-vkQueueSubmit2-commonparent"],
                    ..Default::default()
                }));
            }
        }

        for (index, command_buffer) in self.command_buffers.iter().enumerate() {
            if command_buffer.level() != CommandBufferLevel::Primary {
                return Err(Box::new(ValidationError {
                    context: format!("command_buffers[{index}].level()").into(),
                    problem: "is not `CommandBufferLevel::Primary`".into(),
                    vuids: &["VUID-VkCommandBufferSubmitInfo-commandBuffer-03890"],
                    ..Default::default()
                }));
            }

            if command_buffer.state() != CommandBufferState::Executable {
                return Err(Box::new(ValidationError {
                    context: format!("command_buffers[{index}].state()").into(),
                    problem: "is not `CommandBufferState::Executable`".into(),
                    vuids: &["VUID-vkQueueSubmit2-commandBuffer-03874"],
                    ..Default::default()
                }));
            }
        }

        for (index, sync) in self.signal_syncs.iter().enumerate() {
            if sync.device().as_ref() != device {
                return Err(Box::new(ValidationError {
                    context: format!("signal_syncs[{index}]").into(),
                    problem: "was not created from the device of the queue".into(),
                    vuids: &["VUID-vkQueueSubmit2-commonparent"],
                    ..Default::default()
                }));
            }

            if sync.state() == SyncState::Submitted {
                return Err(Box::new(ValidationError {
                    context: format!("signal_syncs[{index}]").into(),
                    problem: "already has a pending signal operation".into(),
                    vuids: &["VUID-vkQueueSubmit2-semaphore-03868"],
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }
}

/// A submission queue of a device.
#[derive(Debug)]
pub struct Queue {
    device: Arc<Device>,
    id: NonZero<u64>,
    state_stream_dwords: u32,

    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    // Only updated once a rebinding pre-stream has been accepted by the kernel.
    bound: Bindings,

    // The last pre-stream, kept alive while the GPU may still read it.
    state_stream: Option<CommandStream>,
    nop_stream: Option<CommandStream>,
}

/// Heaps and shader-local memory bound in the GPU context of a queue.
#[derive(Clone, Debug, Default)]
struct Bindings {
    images: Option<(Arc<Bo>, u32)>,
    samplers: Option<(Arc<Bo>, u32)>,
    slm: Option<(Arc<Bo>, DeviceSize)>,
}

impl Bindings {
    /// References every BO the bound state points at.
    fn refs(&self) -> impl Iterator<Item = BoReference> + '_ {
        let heaps = [&self.images, &self.samplers]
            .into_iter()
            .flatten()
            .map(|(bo, _)| BoReference {
                bo: bo.clone(),
                access: BoAccess::READ,
            });
        let slm = self.slm.iter().map(|(bo, _)| BoReference {
            bo: bo.clone(),
            access: BoAccess::RW,
        });

        heaps.chain(slm)
    }
}

fn same_bo<T: PartialEq>(bound: &Option<(Arc<Bo>, T)>, bo: BoHandle, value: &T) -> bool {
    bound
        .as_ref()
        .is_some_and(|(bound, bound_value)| bound.handle() == bo && bound_value == value)
}

impl Queue {
    /// Creates a new `Queue`.
    pub fn new(device: Arc<Device>, create_info: QueueCreateInfo) -> Arc<Queue> {
        let QueueCreateInfo {
            state_stream_dwords,
            _ne: _,
        } = create_info;

        Arc::new(Queue {
            device,
            id: Self::next_id(),
            state_stream_dwords,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Submits work to the queue.
    ///
    /// After the kernel has accepted the work, the signal syncs move to
    /// [`SyncState::Submitted`] and each command buffer goes through its post-submit
    /// transition.
    pub fn submit(&self, submit_info: SubmitInfo<'_>) -> Result<(), Validated<VulkanError>> {
        submit_info
            .validate(&self.device)
            .map_err(|err| err.add_context("submit_info"))?;

        Ok(self.submit_unchecked(submit_info)?)
    }

    #[doc(hidden)]
    pub fn submit_unchecked(&self, submit_info: SubmitInfo<'_>) -> Result<(), VulkanError> {
        let SubmitInfo {
            wait_syncs,
            mut command_buffers,
            signal_syncs,
            _ne: _,
        } = submit_info;

        self.device.check_lost()?;

        let mut state = self.state.lock();

        if let Some((bindings, stream)) = self.update_state(&state.bound)? {
            let state_refs: SmallVec<[_; 4]> = bindings.refs().collect();

            self.submit_stream(&stream, &state_refs)?;
            state.bound = bindings;
            state.state_stream = Some(stream);
        }

        let extra_refs: SmallVec<[BoReference; 8]> = wait_syncs
            .iter()
            .map(|sync| sync.wait_ref())
            .chain(signal_syncs.iter().map(|sync| sync.signal_ref()))
            .chain(state.bound.refs())
            .collect();

        if command_buffers.is_empty() {
            let stream = self.nop_stream(&mut state)?;
            self.submit_stream(stream, &extra_refs)?;
        } else {
            for command_buffer in &command_buffers {
                self.submit_stream(&command_buffer.resources().stream, &extra_refs)?;
            }
        }

        drop(state);

        for sync in &signal_syncs {
            sync.mark_submitted();
        }

        for command_buffer in &mut command_buffers {
            command_buffer.mark_submitted();
        }

        self.device.notify_syncs();

        Ok(())
    }

    /// Blocks until every submission made so far has completed.
    pub fn wait_idle(&self) -> Result<(), SyncError> {
        let sync = BinarySync::new(self.device.clone(), BinarySyncCreateInfo::default())?;

        self.submit_unchecked(SubmitInfo {
            signal_syncs: vec![sync.clone()],
            ..Default::default()
        })?;

        sync.wait(None)
    }

    fn submit_stream(
        &self,
        stream: &CommandStream,
        extra_refs: &[BoReference],
    ) -> Result<(), VulkanError> {
        let submission = Submission {
            pushes: stream.pushes(),
            refs: stream.refs(),
            extra_refs,
        };

        log::trace!(
            "submitting {} push ranges with {} references",
            submission.pushes.len(),
            submission.refs.len() + extra_refs.len(),
        );

        self.device.service().submit(&submission).inspect_err(|&err| {
            if err == VulkanError::DeviceLost {
                self.device.mark_lost("the kernel rejected a submission");
            }
        })
    }

    fn nop_stream<'a>(&self, state: &'a mut QueueState) -> Result<&'a CommandStream, VulkanError> {
        let stream = state.nop_stream.get_or_insert_with(|| {
            CommandStream::new(self.device.service().clone(), self.state_stream_dwords)
        });
        stream.reset();
        stream.begin()?;
        stream.finish();

        Ok(stream)
    }

    /// Compares `bound` with the device's current heaps and shader-local memory. If anything
    /// changed, returns the new bindings together with a stream that binds them.
    fn update_state(
        &self,
        bound: &Bindings,
    ) -> Result<Option<(Bindings, CommandStream)>, VulkanError> {
        let (image_bo, image_count) = self.device.image_heap().snapshot();
        let (sampler_bo, sampler_count) = self.device.sampler_heap().snapshot();
        let SlmArea {
            bo: slm_bo,
            bytes_per_warp,
            bytes_per_processor,
        } = self.device.slm();

        let images_changed = !same_bo(&bound.images, image_bo.handle(), &image_count);
        let samplers_changed = !same_bo(&bound.samplers, sampler_bo.handle(), &sampler_count);
        let slm_changed = match &slm_bo {
            Some(bo) => !same_bo(&bound.slm, bo.handle(), &bytes_per_processor),
            None => false,
        };

        if !images_changed && !samplers_changed && !slm_changed {
            return Ok(None);
        }

        let state = Bindings {
            images: Some((image_bo, image_count)),
            samplers: Some((sampler_bo, sampler_count)),
            slm: slm_bo
                .map(|bo| (bo, bytes_per_processor))
                .or_else(|| bound.slm.clone()),
        };

        let mut push = Push::new();

        for (subc, header_pool, sampler_pool, invalidate_headers, invalidate_samplers) in [
            (
                Subchannel::Compute,
                mthd::compute::SET_TEX_HEADER_POOL_A,
                mthd::compute::SET_TEX_SAMPLER_POOL_A,
                mthd::compute::INVALIDATE_TEXTURE_HEADER_CACHE_NO_WFI,
                mthd::compute::INVALIDATE_SAMPLER_CACHE_NO_WFI,
            ),
            (
                Subchannel::ThreeD,
                mthd::three_d::SET_TEX_HEADER_POOL_A,
                mthd::three_d::SET_TEX_SAMPLER_POOL_A,
                mthd::three_d::INVALIDATE_TEXTURE_HEADER_CACHE_NO_WFI,
                mthd::three_d::INVALIDATE_SAMPLER_CACHE_NO_WFI,
            ),
        ] {
            for (pool, (bo, count)) in [
                (header_pool, &state.images),
                (sampler_pool, &state.samplers),
            ]
            .into_iter()
            .filter_map(|(pool, bound)| Some((pool, bound.as_ref()?)))
            {
                push.mthd(subc, pool)
                    .data((bo.gpu_addr() >> 32) as u32)
                    .data(bo.gpu_addr() as u32)
                    .data(count.saturating_sub(1));
            }

            push.immd(subc, invalidate_headers, INVALIDATE_ALL_LINES)
                .immd(subc, invalidate_samplers, INVALIDATE_ALL_LINES);
        }

        if let Some((bo, bytes_per_processor)) = &state.slm {
            let addr = bo.gpu_addr();
            let size_hi = (bytes_per_processor >> 32) as u32;
            let size_lo = *bytes_per_processor as u32;
            let max_processors = self.device.properties().shader_processor_count;

            push.mthd(Subchannel::Compute, mthd::compute::SET_SHADER_LOCAL_MEMORY_A)
                .data((addr >> 32) as u32)
                .data(addr as u32);

            for throttling in [
                mthd::compute::SET_SHADER_LOCAL_MEMORY_NON_THROTTLED_A,
                mthd::compute::SET_SHADER_LOCAL_MEMORY_THROTTLED_A,
            ] {
                push.mthd(Subchannel::Compute, throttling)
                    .data(size_hi)
                    .data(size_lo)
                    .data(max_processors);
            }

            push.mthd(Subchannel::ThreeD, mthd::three_d::SET_SHADER_LOCAL_MEMORY_A)
                .data((addr >> 32) as u32)
                .data(addr as u32)
                .data(size_hi)
                .data(size_lo)
                .data(bytes_per_warp as u32);
        }

        // A stale window faults, so the windows are part of every rebind.
        if self.device.properties().nv_volta_or_later {
            push.mthd(Subchannel::Compute, mthd::compute::SET_SHADER_SHARED_MEMORY_WINDOW_A)
                .data((SHARED_WINDOW >> 32) as u32)
                .data(SHARED_WINDOW as u32);
            push.mthd(Subchannel::Compute, mthd::compute::SET_SHADER_LOCAL_MEMORY_WINDOW_A)
                .data((LOCAL_WINDOW >> 32) as u32)
                .data(LOCAL_WINDOW as u32);
        } else {
            push.mthd(Subchannel::Compute, mthd::compute::SET_SHADER_SHARED_MEMORY_WINDOW)
                .data(SHARED_WINDOW as u32);
            push.mthd(Subchannel::Compute, mthd::compute::SET_SHADER_LOCAL_MEMORY_WINDOW)
                .data(LOCAL_WINDOW as u32);
        }

        push.mthd(Subchannel::ThreeD, mthd::three_d::SET_SHADER_LOCAL_MEMORY_WINDOW)
            .data(LOCAL_WINDOW as u32);

        let mut stream = CommandStream::new(self.device.service().clone(), self.state_stream_dwords);
        stream.emit_push(&push)?;
        stream.finish();

        log::trace!(
            "rebinding queue state (images: {images_changed}, samplers: {samplers_changed}, \
            slm: {slm_changed})",
        );

        Ok(Some((state, stream)))
    }
}

impl DeviceOwned for Queue {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(Queue);

#[cfg(test)]
mod tests {
    use super::{Queue, QueueCreateInfo, SubmitInfo};
    use crate::{
        command_buffer::{
            pool::{
                CommandBufferAllocateInfo, CommandPool, CommandPoolCreateFlags,
                CommandPoolCreateInfo,
            },
            tests::recording,
            CommandBufferBeginInfo, CommandBufferLevel,
            CommandBufferState, CommandBufferUsage,
        },
        device::{DeviceProperties, IMAGE_DESCRIPTOR_SIZE},
        memory::BoAccess,
        pack::nv::{self, mthd, Subchannel, LOCAL_WINDOW, SHARED_WINDOW},
        sync::{BinarySync, BinarySyncCreateInfo, SyncState},
        Validated, VulkanError,
    };

    fn rebinds(dwords: &[u32]) -> bool {
        dwords.contains(&nv::sq(Subchannel::ThreeD, mthd::three_d::SET_TEX_HEADER_POOL_A, 3))
    }

    #[test]
    fn submit_command_buffer() {
        let (device, service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());
        let wait = BinarySync::new(
            device.clone(),
            BinarySyncCreateInfo {
                signaled: true,
                ..Default::default()
            },
        )
        .unwrap();
        let signal = BinarySync::new(device.clone(), BinarySyncCreateInfo::default()).unwrap();

        let mut cb = recording(&device);
        cb.end().unwrap();
        let recorded = cb.stream_dwords();

        queue
            .submit(SubmitInfo {
                wait_syncs: vec![wait.clone()],
                command_buffers: vec![&mut cb],
                signal_syncs: vec![signal.clone()],
                ..Default::default()
            })
            .unwrap();

        let submissions = service.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(rebinds(&submissions[0].dwords));
        assert_eq!(submissions[1].dwords, recorded);
        assert_eq!(submissions[1].access_of(wait.bo().handle()), Some(BoAccess::READ));
        assert_eq!(submissions[1].access_of(signal.bo().handle()), Some(BoAccess::RW));

        let (image_heap, _) = device.image_heap().snapshot();
        assert_eq!(submissions[1].access_of(image_heap.handle()), Some(BoAccess::READ));

        assert_eq!(signal.state(), SyncState::Submitted);
        assert_eq!(cb.state(), CommandBufferState::Executable);

        // A pending signal cannot be submitted twice.
        assert!(matches!(
            queue.submit(SubmitInfo {
                signal_syncs: vec![signal],
                ..Default::default()
            }),
            Err(Validated::ValidationError(_)),
        ));
    }

    #[test]
    fn state_rebinds_on_change() {
        let (device, service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());

        queue.submit(SubmitInfo::default()).unwrap();
        queue.submit(SubmitInfo::default()).unwrap();

        let submissions = service.submissions();
        assert_eq!(submissions.len(), 3);
        assert!(rebinds(&submissions[0].dwords));
        assert_eq!(
            submissions[2].dwords,
            [nv::immd(Subchannel::Copy, mthd::copy::NOP, 0)],
        );

        device.image_heap().add(&[0; IMAGE_DESCRIPTOR_SIZE as usize]).unwrap();
        queue.submit(SubmitInfo::default()).unwrap();

        let submissions = service.submissions();
        assert_eq!(submissions.len(), 5);
        assert!(rebinds(&submissions[3].dwords));

        let (image_heap, _) = device.image_heap().snapshot();
        let addr = image_heap.gpu_addr();
        let header = nv::sq(Subchannel::Compute, mthd::compute::SET_TEX_HEADER_POOL_A, 3);
        let at = submissions[3].dwords.iter().position(|&dw| dw == header).unwrap();
        assert_eq!(
            &submissions[3].dwords[at + 1..at + 4],
            &[(addr >> 32) as u32, addr as u32, 0],
        );
    }

    #[test]
    fn failed_rebind_is_retried() {
        let (device, service) = dev!();
        let queue = Queue::new(device, QueueCreateInfo::default());

        service.fail_next_allocs(1);
        assert!(matches!(
            queue.submit(SubmitInfo::default()),
            Err(Validated::Error(VulkanError::OutOfDeviceMemory)),
        ));
        assert!(service.submissions().is_empty());

        queue.submit(SubmitInfo::default()).unwrap();

        let submissions = service.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(rebinds(&submissions[0].dwords));
    }

    #[test]
    fn slm_binding() {
        let (device, service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());

        device.ensure_slm(64).unwrap();
        queue.submit(SubmitInfo::default()).unwrap();

        let slm = device.slm();
        let slm_bo = slm.bo.unwrap();
        let submissions = service.submissions();
        let dwords = &submissions[0].dwords;

        let header = nv::sq(Subchannel::ThreeD, mthd::three_d::SET_SHADER_LOCAL_MEMORY_A, 5);
        let at = dwords.iter().position(|&dw| dw == header).unwrap();
        assert_eq!(dwords[at + 2], slm_bo.gpu_addr() as u32);
        assert_eq!(dwords[at + 4], slm.bytes_per_processor as u32);
        assert_eq!(dwords[at + 5], slm.bytes_per_warp as u32);

        assert_eq!(submissions[1].access_of(slm_bo.handle()), Some(BoAccess::RW));
    }

    #[test]
    fn memory_windows() {
        let (device, service) = dev!();
        let queue = Queue::new(device, QueueCreateInfo::default());
        queue.submit(SubmitInfo::default()).unwrap();

        let dwords = &service.submissions()[0].dwords;
        let header = nv::sq(
            Subchannel::Compute,
            mthd::compute::SET_SHADER_SHARED_MEMORY_WINDOW_A,
            2,
        );
        let at = dwords.iter().position(|&dw| dw == header).unwrap();
        assert_eq!(dwords[at + 2], SHARED_WINDOW as u32);

        let (device, service) = dev!(DeviceProperties {
            nv_volta_or_later: false,
            ..Default::default()
        });
        let queue = Queue::new(device, QueueCreateInfo::default());
        queue.submit(SubmitInfo::default()).unwrap();

        let dwords = &service.submissions()[0].dwords;
        let header = nv::sq(
            Subchannel::Compute,
            mthd::compute::SET_SHADER_LOCAL_MEMORY_WINDOW,
            1,
        );
        let at = dwords.iter().position(|&dw| dw == header).unwrap();
        assert_eq!(dwords[at + 1], LOCAL_WINDOW as u32);
    }

    #[test]
    fn one_time_submit_invalidates() {
        let (device, _service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());
        let pool = CommandPool::new(
            device.clone(),
            CommandPoolCreateInfo {
                flags: CommandPoolCreateFlags::empty(),
                ..Default::default()
            },
        );
        let mut cb = pool
            .allocate_command_buffers(CommandBufferAllocateInfo::default())
            .unwrap()
            .pop()
            .unwrap();
        cb.begin(CommandBufferBeginInfo {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            ..Default::default()
        })
        .unwrap();
        cb.end().unwrap();

        queue
            .submit(SubmitInfo {
                command_buffers: vec![&mut cb],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cb.state(), CommandBufferState::Invalid);

        assert!(matches!(
            queue.submit(SubmitInfo {
                command_buffers: vec![&mut cb],
                ..Default::default()
            }),
            Err(Validated::ValidationError(_)),
        ));
    }

    #[test]
    fn secondary_is_rejected() {
        let (device, _service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());
        let pool = CommandPool::new(device, CommandPoolCreateInfo::default());
        let mut cb = pool
            .allocate_command_buffers(CommandBufferAllocateInfo {
                level: CommandBufferLevel::Secondary,
                ..Default::default()
            })
            .unwrap()
            .pop()
            .unwrap();
        cb.begin(CommandBufferBeginInfo::default()).unwrap();
        cb.end().unwrap();

        match queue.submit(SubmitInfo {
            command_buffers: vec![&mut cb],
            ..Default::default()
        }) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "submit_info.command_buffers[0].level()");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn device_loss() {
        let (device, service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());
        let signal = BinarySync::new(device.clone(), BinarySyncCreateInfo::default()).unwrap();

        service.lose_device();

        assert!(matches!(
            queue.submit(SubmitInfo {
                signal_syncs: vec![signal.clone()],
                ..Default::default()
            }),
            Err(Validated::Error(VulkanError::DeviceLost)),
        ));
        assert!(device.is_lost());
        assert_eq!(signal.state(), SyncState::Reset);

        assert!(matches!(
            queue.submit(SubmitInfo::default()),
            Err(Validated::Error(VulkanError::DeviceLost)),
        ));
    }

    #[test]
    fn wait_idle_completes() {
        let (device, service) = dev!();
        let queue = Queue::new(device, QueueCreateInfo::default());

        queue.wait_idle().unwrap();
        assert_eq!(service.submissions().len(), 2);
    }
}
