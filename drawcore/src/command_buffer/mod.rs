// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Recording of commands for the GPU.
//!
//! A [`CommandBuffer`] is allocated from a [`CommandPool`] and records into a
//! [`CommandStream`](stream::CommandStream). Binding commands and the `set_*` commands only
//! update the shadow state of the command buffer and mark what they touched as dirty. Right
//! before a draw or a dispatch, the dirty part of the state is materialized into hardware
//! packets and descriptor tables; everything else is left as the previous draw emitted it.
//!
//! # Lifecycle
//!
//! A command buffer starts out in the [initial] state. [`begin`] moves it to [recording], and
//! [`end`] to [executable], after which it can be submitted to a queue. Resetting the buffer,
//! or the pool it was allocated from, returns it to the initial state. A buffer that was begun
//! with [`ONE_TIME_SUBMIT`] becomes [invalid] after its submission, unless its pool allows
//! individual resets, in which case it is reset right away.
//!
//! An error while recording, such as a failed allocation, poisons the buffer: later commands
//! are ignored and [`end`] returns [`VulkanError::DeviceLost`].
//!
//! [initial]: CommandBufferState::Initial
//! [recording]: CommandBufferState::Recording
//! [executable]: CommandBufferState::Executable
//! [invalid]: CommandBufferState::Invalid
//! [`begin`]: CommandBuffer::begin
//! [`end`]: CommandBuffer::end
//! [`ONE_TIME_SUBMIT`]: CommandBufferUsage::ONE_TIME_SUBMIT

pub use self::clear::{ClearAttachment, ClearColorValue, ClearRect};
use self::pool::{CommandPool, CommandPoolCreateFlags, RecordingResources};
use crate::{
    buffer::Buffer,
    descriptor_set::{
        layout::DescriptorType, ubo_record, DescriptorSet, DynamicBufferDescriptor,
        ATTRIBUTE_BUFFER_DESC_SIZE, ATTRIBUTE_DESC_SIZE, TEXTURE_DESC_SIZE, UBO_DESC_SIZE,
    },
    device::Device,
    format::Format,
    image::{ImageAspects, ImageView},
    macros::{impl_id_counter, vulkan_bitflags, vulkan_enum},
    memory::{Bo, BoAccess, BufferUsage, DeviceAlignment},
    pack::{
        gen,
        mali::{self, BlendInputs, FsOverlayInputs, LocalStorage},
    },
    pipeline::{
        dynamic_state::{
            ColorBlendAttachmentState, ColorBlendState, DirtySet, DynamicGraphicsState,
            DynamicState, DynamicStateTracker, MAX_COLOR_ATTACHMENTS, MAX_VERTEX_ATTRIBUTES,
        },
        layout::{PipelineLayout, MAX_PUSH_CONSTANT_SIZE},
        state::{BlendFactor, IndexType},
        ComputePipeline, GraphicsPipeline, PipelineBindPoint,
    },
    query::{QueryPool, QueryType},
    sampler::SAMPLER_DESC_SIZE,
    DeviceOwned, DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use smallvec::SmallVec;
use std::{mem::ManuallyDrop, num::NonZero, sync::Arc};

mod clear;
mod dynamic_state;
mod flush;
pub mod pool;
pub mod stream;

/// The size of the root table: the push constants followed by twelve table addresses.
const ROOT_TABLE_SIZE: usize = MAX_PUSH_CONSTANT_SIZE as usize + 12 * 8;

const ROOT_TABLE_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(64) };
const TABLE_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(64) };

/// Bits of `3DSTATE_CONSTANT_ALL::ShaderUpdateEnable` for the five graphics stages.
const GRAPHICS_STAGES: u32 = 0x1f;

vulkan_enum! {
    /// The level of a command buffer.
    CommandBufferLevel = CommandBufferLevel(i32);

    /// Submitted to a queue directly.
    Primary = PRIMARY,

    /// Continues rendering begun elsewhere.
    Secondary = SECONDARY,
}

vulkan_bitflags! {
    /// How a command buffer is going to be used.
    CommandBufferUsage = CommandBufferUsageFlags(u32);

    /// The command buffer is submitted once, and then reset or freed.
    ONE_TIME_SUBMIT = ONE_TIME_SUBMIT,

    /// A secondary command buffer is recorded entirely inside rendering.
    RENDER_PASS_CONTINUE = RENDER_PASS_CONTINUE,

    SIMULTANEOUS_USE = SIMULTANEOUS_USE,
}

/// Parameters to begin recording a command buffer.
#[derive(Clone, Debug)]
pub struct CommandBufferBeginInfo {
    /// The default value is empty.
    pub usage: CommandBufferUsage,

    /// The rendering a secondary command buffer continues.
    ///
    /// Must be `Some` if, and only if, the buffer is secondary and `usage` contains
    /// `RENDER_PASS_CONTINUE`. The render area is not known to a secondary buffer and is
    /// ignored.
    ///
    /// The default value is `None`.
    pub inheritance: Option<RenderingInfo>,

    pub _ne: NonExhaustive,
}

impl Default for CommandBufferBeginInfo {
    #[inline]
    fn default() -> Self {
        Self {
            usage: CommandBufferUsage::empty(),
            inheritance: None,
            _ne: NonExhaustive(()),
        }
    }
}

impl CommandBufferBeginInfo {
    pub(crate) fn validate(&self, level: CommandBufferLevel) -> Result<(), Box<ValidationError>> {
        let continues = level == CommandBufferLevel::Secondary
            && self.usage.intersects(CommandBufferUsage::RENDER_PASS_CONTINUE);

        match (&self.inheritance, continues) {
            (None, true) => {
                return Err(Box::new(ValidationError {
                    context: "inheritance".into(),
                    problem: "is `None`, but the command buffer is secondary and `usage` \
                        contains `CommandBufferUsage::RENDER_PASS_CONTINUE`"
                        .into(),
                    vuids: &["VUID-VkCommandBufferBeginInfo-flags-09240"],
                    ..Default::default()
                }));
            }
            (Some(_), false) => {
                return Err(Box::new(ValidationError {
                    context: "inheritance".into(),
                    problem: "is `Some`, but the command buffer does not continue rendering"
                        .into(),
                    ..Default::default()
                }));
            }
            (Some(inheritance), true) => {
                inheritance
                    .validate()
                    .map_err(|err| err.add_context("inheritance"))?;
            }
            (None, false) => (),
        }

        Ok(())
    }
}

/// The state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,

    /// A one-time-submit buffer that was submitted and must be reset before it is begun again.
    Invalid,
}

/// Parameters to begin rendering.
#[derive(Clone, Debug)]
pub struct RenderingInfo {
    /// The default value is `[0; 2]`.
    pub render_area_offset: [u32; 2],

    /// The extent of the render area.
    ///
    /// The default value is `[0; 2]`, which stands for the largest extent all attachments share,
    /// minus the offset.
    pub render_area_extent: [u32; 2],

    /// The default value is `1`.
    pub layer_count: u32,

    /// Bit `i` is set if view `i` is rendered to. If nonzero, `layer_count` is ignored.
    ///
    /// The default value is `0`.
    pub view_mask: u32,

    /// The color attachments, indexed by fragment output location.
    ///
    /// The default value is empty.
    pub color_attachments: Vec<Option<Arc<ImageView>>>,

    /// The default value is `None`.
    pub depth_attachment: Option<Arc<ImageView>>,

    /// The default value is `None`.
    pub stencil_attachment: Option<Arc<ImageView>>,

    pub _ne: NonExhaustive,
}

impl Default for RenderingInfo {
    #[inline]
    fn default() -> Self {
        Self {
            render_area_offset: [0; 2],
            render_area_extent: [0; 2],
            layer_count: 1,
            view_mask: 0,
            color_attachments: Vec::new(),
            depth_attachment: None,
            stencil_attachment: None,
            _ne: NonExhaustive(()),
        }
    }
}

impl RenderingInfo {
    fn attachments(&self) -> impl Iterator<Item = &Arc<ImageView>> {
        self.color_attachments
            .iter()
            .flatten()
            .chain(&self.depth_attachment)
            .chain(&self.stencil_attachment)
    }

    /// Returns the largest extent all attachments share.
    fn attachment_extent(&self) -> [u32; 2] {
        self.attachments().fold([u32::MAX; 2], |extent, view| {
            let [width, height, _] = view.extent();
            [extent[0].min(width), extent[1].min(height)]
        })
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.color_attachments.len() > MAX_COLOR_ATTACHMENTS {
            return Err(Box::new(ValidationError {
                context: "color_attachments".into(),
                problem: "contains more elements than the maximum number of color attachments"
                    .into(),
                vuids: &["VUID-VkRenderingInfo-colorAttachmentCount-06106"],
                ..Default::default()
            }));
        }

        if self.view_mask == 0 && self.layer_count == 0 {
            return Err(Box::new(ValidationError {
                problem: "`view_mask` is zero and `layer_count` is zero".into(),
                vuids: &["VUID-VkRenderingInfo-viewMask-06069"],
                ..Default::default()
            }));
        }

        if let Some(view) = &self.depth_attachment {
            if !view.format().aspects().intersects(ImageAspects::DEPTH) {
                return Err(Box::new(ValidationError {
                    context: "depth_attachment".into(),
                    problem: "does not have a depth aspect".into(),
                    vuids: &["VUID-VkRenderingInfo-pDepthAttachment-06547"],
                    ..Default::default()
                }));
            }
        }

        if let Some(view) = &self.stencil_attachment {
            if !view.format().aspects().intersects(ImageAspects::STENCIL) {
                return Err(Box::new(ValidationError {
                    context: "stencil_attachment".into(),
                    problem: "does not have a stencil aspect".into(),
                    vuids: &["VUID-VkRenderingInfo-pStencilAttachment-06548"],
                    ..Default::default()
                }));
            }
        }

        let mut samples = None;

        for view in self.attachments() {
            match samples {
                None => samples = Some(view.samples()),
                Some(samples) if samples != view.samples() => {
                    return Err(Box::new(ValidationError {
                        problem: "the attachments do not all have the same sample count".into(),
                        vuids: &["VUID-VkRenderingInfo-multisampledRenderToSingleSampled-06857"],
                        ..Default::default()
                    }));
                }
                Some(_) => (),
            }
        }

        if self.attachments().next().is_some() {
            let extent = self.attachment_extent();

            for axis in 0..2 {
                if self.render_area_offset[axis] + self.render_area_extent[axis] > extent[axis] {
                    return Err(Box::new(ValidationError {
                        problem: "the render area is not contained in the attachments".into(),
                        vuids: &[
                            "VUID-VkRenderingInfo-pNext-06079",
                            "VUID-VkRenderingInfo-pNext-06080",
                        ],
                        ..Default::default()
                    }));
                }
            }
        }

        Ok(())
    }
}

/// A rectangle in framebuffer coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RenderArea {
    pub(crate) offset: [u32; 2],
    pub(crate) extent: [u32; 2],
}

/// What the command buffer knows about the current rendering.
#[derive(Clone, Debug)]
pub(crate) struct RenderingState {
    /// `None` in secondary command buffers, which do not know the render area.
    pub(crate) area: Option<RenderArea>,
    pub(crate) layer_count: u32,
    pub(crate) view_mask: u32,
    pub(crate) color_formats: SmallVec<[Option<Format>; MAX_COLOR_ATTACHMENTS]>,
    pub(crate) depth_format: Option<Format>,
    pub(crate) stencil_format: Option<Format>,
    pub(crate) samples: u32,

    /// Began by this command buffer, rather than inherited.
    pub(crate) local: bool,
}

impl RenderingState {
    fn new(info: &RenderingInfo, area_known: bool, local: bool) -> Self {
        let area = area_known.then(|| {
            let mut extent = info.render_area_extent;

            if extent == [0; 2] {
                let shared = info.attachment_extent();
                extent = [
                    shared[0].saturating_sub(info.render_area_offset[0]),
                    shared[1].saturating_sub(info.render_area_offset[1]),
                ];
            }

            RenderArea {
                offset: info.render_area_offset,
                extent,
            }
        });

        RenderingState {
            area,
            layer_count: info.layer_count,
            view_mask: info.view_mask,
            color_formats: info
                .color_attachments
                .iter()
                .map(|view| view.as_ref().map(|view| view.format()))
                .collect(),
            depth_format: info.depth_attachment.as_ref().map(|view| view.format()),
            stencil_format: info.stencil_attachment.as_ref().map(|view| view.format()),
            samples: info.attachments().next().map_or(1, |view| view.samples()),
            local,
        }
    }

    /// Returns a mask with bit `i` set if color attachment `i` is bound.
    pub(crate) fn color_mask(&self) -> u32 {
        self.color_formats
            .iter()
            .enumerate()
            .filter(|(_, format)| format.is_some())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Returns whether any color attachment has an integer format.
    pub(crate) fn has_integer_rt(&self) -> bool {
        self.color_formats
            .iter()
            .flatten()
            .any(|format| format.is_integer())
    }

    #[inline]
    pub(crate) fn has_depth(&self) -> bool {
        self.depth_format.is_some()
    }

    #[inline]
    pub(crate) fn has_stencil(&self) -> bool {
        self.stencil_format.is_some()
    }
}

/// A descriptor set bound together with its dynamic offsets.
#[derive(Clone, Debug)]
struct BoundSet {
    set: Arc<DescriptorSet>,
    dyn_ubo_offsets: SmallVec<[u32; 4]>,
    dyn_ssbo_offsets: SmallVec<[u32; 4]>,
}

/// The descriptor sets bound to one bind point.
#[derive(Clone, Debug, Default)]
struct DescriptorBindings {
    sets: Vec<Option<BoundSet>>,

    /// The address of the root table the last draw or dispatch used, while it stays valid.
    root_table: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct IndexBufferBinding {
    pub(crate) address: u64,
    pub(crate) size: u32,
    pub(crate) index_type: IndexType,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct VertexBufferBinding {
    pub(crate) address: u64,
    pub(crate) size: u32,
}

/// Hardware state that outlives a single flush.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct HardwareState {
    pub(crate) pma_fix_enabled: bool,
    pub(crate) preemption_disabled: bool,

    /// The depth and stencil write enables of the last emitted depth/stencil packet.
    pub(crate) depth_write_enable: bool,
    pub(crate) stencil_write_enable: bool,

    /// Zero destination blend factors were rewritten to read the blend constants, which are
    /// then emitted as zero.
    pub(crate) color_blend_zero: bool,
    pub(crate) alpha_blend_zero: bool,
}

/// A query that was begun and not yet ended.
#[derive(Clone, Debug)]
struct ActiveQuery {
    pool: Arc<QueryPool>,
    query: u32,
}

/// The table the shaders of a draw or dispatch find their resources through.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct RootTable {
    push_constants: [u8; MAX_PUSH_CONSTANT_SIZE as usize],
    /// The renderer state followed by its `BLEND` descriptors. Zero for dispatches.
    renderer_state: u64,
    samplers: u64,
    textures: u64,
    ubos: u64,
    images: u64,
    /// One `ATTRIBUTE` per storage image, pointing at its attribute buffer in `images`.
    image_attributes: u64,
    dyn_ssbos: u64,
    local_storage: u64,
    /// Zero for dispatches.
    viewport: u64,
    _reserved: [u64; 3],
}

// SAFETY: `RootTable` is `repr(C)` and made of integers without padding.
unsafe impl bytemuck::Zeroable for RootTable {}
unsafe impl bytemuck::Pod for RootTable {}

const _: () = assert!(size_of::<RootTable>() == ROOT_TABLE_SIZE);

/// A dynamic storage buffer descriptor in the root table.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct DynSsboRecord {
    address: u64,
    size: u32,
    _pad: u32,
}

// SAFETY: `repr(C)` with explicit padding.
unsafe impl bytemuck::Zeroable for DynSsboRecord {}
unsafe impl bytemuck::Pod for DynSsboRecord {}

/// Records commands to be submitted to a queue.
#[derive(Debug)]
pub struct CommandBuffer {
    pool: Arc<CommandPool>,
    id: NonZero<u64>,
    level: CommandBufferLevel,
    generation: u64,
    state: CommandBufferState,
    usage: CommandBufferUsage,
    reset_on_submit: bool,
    error: Option<VulkanError>,

    // Taken back by the pool on drop.
    resources: ManuallyDrop<RecordingResources>,

    dynamic: DynamicStateTracker,
    graphics_pipeline: Option<Arc<GraphicsPipeline>>,
    compute_pipeline: Option<Arc<ComputePipeline>>,
    graphics: DescriptorBindings,
    compute: DescriptorBindings,
    push_constants: [u8; MAX_PUSH_CONSTANT_SIZE as usize],
    index_buffer: Option<IndexBufferBinding>,
    vertex_buffers: [Option<VertexBufferBinding>; MAX_VERTEX_ATTRIBUTES],
    rendering: Option<RenderingState>,
    active_queries: SmallVec<[ActiveQuery; 2]>,
    occlusion_queries: u32,
    hw: HardwareState,
}

impl CommandBuffer {
    pub(crate) fn new(
        pool: Arc<CommandPool>,
        level: CommandBufferLevel,
        generation: u64,
        resources: RecordingResources,
    ) -> Self {
        CommandBuffer {
            pool,
            id: Self::next_id(),
            level,
            generation,
            state: CommandBufferState::Initial,
            usage: CommandBufferUsage::empty(),
            reset_on_submit: false,
            error: None,
            resources: ManuallyDrop::new(resources),
            dynamic: DynamicStateTracker::new(),
            graphics_pipeline: None,
            compute_pipeline: None,
            graphics: DescriptorBindings::default(),
            compute: DescriptorBindings::default(),
            push_constants: [0; MAX_PUSH_CONSTANT_SIZE as usize],
            index_buffer: None,
            vertex_buffers: [None; MAX_VERTEX_ATTRIBUTES],
            rendering: None,
            active_queries: SmallVec::new(),
            occlusion_queries: 0,
            hw: HardwareState::default(),
        }
    }

    /// Returns the pool the command buffer was allocated from.
    #[inline]
    pub fn pool(&self) -> &Arc<CommandPool> {
        &self.pool
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Returns the current state.
    ///
    /// A buffer whose pool was reset reports [`CommandBufferState::Initial`], even though the
    /// reset itself happens the next time the buffer is used.
    #[inline]
    pub fn state(&self) -> CommandBufferState {
        if self.is_stale() {
            CommandBufferState::Initial
        } else {
            self.state
        }
    }

    /// Returns the dwords recorded so far, in execution order.
    pub fn stream_dwords(&self) -> Vec<u32> {
        if self.is_stale() {
            Vec::new()
        } else {
            self.resources.stream.dwords()
        }
    }

    /// Returns the access class the recorded commands reference `bo` with.
    pub fn bo_access(&self, bo: &Bo) -> Option<BoAccess> {
        if self.is_stale() {
            None
        } else {
            self.resources.stream.ref_of(bo)
        }
    }

    /// Returns the current dynamic state.
    #[inline]
    pub fn dynamic_state(&self) -> &DynamicGraphicsState {
        self.dynamic.state()
    }

    #[inline]
    pub(crate) fn resources(&self) -> &RecordingResources {
        &self.resources
    }

    #[inline]
    fn is_stale(&self) -> bool {
        self.generation != self.pool.generation()
    }

    /// Performs a pool reset the buffer has not seen yet.
    fn sync_with_pool(&mut self) {
        if self.is_stale() {
            self.reset_unchecked();
        }
    }

    /// Runs `f` unless the buffer is poisoned, and poisons it if `f` fails.
    fn record(&mut self, f: impl FnOnce(&mut Self) -> Result<(), VulkanError>) {
        if self.error.is_some() {
            return;
        }

        if let Err(err) = f(self) {
            log::warn!("command buffer {} poisoned while recording: {err}", self.id);
            self.error = Some(err);
        }
    }

    fn validate_recording(&self, vuids: &'static [&'static str]) -> Result<(), Box<ValidationError>> {
        if self.state() != CommandBufferState::Recording {
            return Err(Box::new(ValidationError {
                problem: "the command buffer is not in the recording state".into(),
                vuids,
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Begins recording.
    ///
    /// A buffer that is not in the initial state is reset first, which requires its pool to
    /// have been created with `RESET_COMMAND_BUFFER`.
    pub fn begin(
        &mut self,
        begin_info: CommandBufferBeginInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.sync_with_pool();
        self.validate_begin(&begin_info)?;

        if self.state != CommandBufferState::Initial {
            self.reset_unchecked();
        }

        let CommandBufferBeginInfo {
            usage,
            inheritance,
            _ne: _,
        } = begin_info;

        self.state = CommandBufferState::Recording;
        self.usage = usage;
        self.reset_on_submit = usage.intersects(CommandBufferUsage::ONE_TIME_SUBMIT)
            && self
                .pool
                .flags()
                .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        if let Some(inheritance) = &inheritance {
            self.dynamic
                .set_color_attachment_count(inheritance.color_attachments.len() as u32);
            self.rendering = Some(RenderingState::new(inheritance, false, false));
        }

        self.record(|cb| cb.resources.stream.begin());

        Ok(self)
    }

    fn validate_begin(&self, begin_info: &CommandBufferBeginInfo) -> Result<(), Box<ValidationError>> {
        if self.state == CommandBufferState::Recording {
            return Err(Box::new(ValidationError {
                problem: "the command buffer is already in the recording state".into(),
                vuids: &["VUID-vkBeginCommandBuffer-commandBuffer-00049"],
                ..Default::default()
            }));
        }

        if self.state != CommandBufferState::Initial
            && !self
                .pool
                .flags()
                .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        {
            return Err(Box::new(ValidationError {
                problem: "the command buffer is not in the initial state, and its pool was not \
                    created with `CommandPoolCreateFlags::RESET_COMMAND_BUFFER`"
                    .into(),
                vuids: &["VUID-vkBeginCommandBuffer-commandBuffer-00050"],
                ..Default::default()
            }));
        }

        begin_info
            .validate(self.level)
            .map_err(|err| err.add_context("begin_info"))?;

        Ok(())
    }

    /// Ends recording. The buffer can be submitted afterwards.
    ///
    /// Returns [`VulkanError::DeviceLost`] if an error poisoned the buffer while recording; the
    /// buffer is then invalid until it is reset.
    pub fn end(&mut self) -> Result<(), Validated<VulkanError>> {
        self.validate_end()?;

        if self.error.is_some() {
            self.state = CommandBufferState::Invalid;

            return Err(Validated::Error(VulkanError::DeviceLost));
        }

        self.resources.stream.finish();
        self.state = CommandBufferState::Executable;

        log::trace!(
            "command buffer {} ended with {} references",
            self.id,
            self.resources.stream.num_refs(),
        );

        Ok(())
    }

    fn validate_end(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkEndCommandBuffer-commandBuffer-00059"])?;

        if self.rendering.as_ref().is_some_and(|rendering| rendering.local) {
            return Err(Box::new(ValidationError {
                problem: "rendering is active".into(),
                vuids: &["VUID-vkEndCommandBuffer-None-06991"],
                ..Default::default()
            }));
        }

        if !self.active_queries.is_empty() {
            return Err(Box::new(ValidationError {
                problem: "a query is active".into(),
                vuids: &["VUID-vkEndCommandBuffer-commandBuffer-00061"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Returns the buffer to the initial state.
    ///
    /// The recording memory is rewound, not released.
    pub fn reset(&mut self) -> Result<(), Box<ValidationError>> {
        if !self
            .pool
            .flags()
            .intersects(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        {
            return Err(Box::new(ValidationError {
                problem: "the pool of the command buffer was not created with \
                    `CommandPoolCreateFlags::RESET_COMMAND_BUFFER`"
                    .into(),
                vuids: &["VUID-vkResetCommandBuffer-commandBuffer-00046"],
                ..Default::default()
            }));
        }

        self.reset_unchecked();

        Ok(())
    }

    pub(crate) fn reset_unchecked(&mut self) {
        self.resources.reset();
        self.generation = self.pool.generation();
        self.state = CommandBufferState::Initial;
        self.usage = CommandBufferUsage::empty();
        self.reset_on_submit = false;
        self.error = None;
        self.dynamic.reset();
        self.graphics_pipeline = None;
        self.compute_pipeline = None;
        self.graphics = DescriptorBindings::default();
        self.compute = DescriptorBindings::default();
        self.push_constants = [0; MAX_PUSH_CONSTANT_SIZE as usize];
        self.index_buffer = None;
        self.vertex_buffers = [None; MAX_VERTEX_ATTRIBUTES];
        self.rendering = None;
        self.active_queries.clear();
        self.occlusion_queries = 0;
        self.hw = HardwareState::default();
    }

    /// Called by the queue once the buffer was handed to the kernel.
    pub(crate) fn mark_submitted(&mut self) {
        if !self.usage.intersects(CommandBufferUsage::ONE_TIME_SUBMIT) {
            return;
        }

        if self.reset_on_submit {
            self.reset_unchecked();
        } else {
            self.state = CommandBufferState::Invalid;
        }
    }

    /// Binds a graphics pipeline.
    ///
    /// Every category the pipeline does not leave dynamic is overwritten with the pipeline's
    /// value.
    pub fn bind_graphics_pipeline(
        &mut self,
        pipeline: Arc<GraphicsPipeline>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBindPipeline-commandBuffer-recording"])?;
        self.validate_same_device(pipeline.device(), "pipeline")?;

        self.dynamic
            .bind_pipeline_state(pipeline.state(), pipeline.fixed_state());
        self.graphics.root_table = None;

        self.record(|cb| {
            for shader in pipeline.stages() {
                cb.resources.stream.ref_bo(shader.bo(), BoAccess::READ);
            }

            cb.device().ensure_slm(pipeline.max_tls_size())
        });

        self.graphics_pipeline = Some(pipeline);

        Ok(self)
    }

    /// Binds a compute pipeline.
    pub fn bind_compute_pipeline(
        &mut self,
        pipeline: Arc<ComputePipeline>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBindPipeline-commandBuffer-recording"])?;
        self.validate_same_device(pipeline.device(), "pipeline")?;

        self.compute.root_table = None;

        self.record(|cb| {
            cb.resources
                .stream
                .ref_bo(pipeline.shader().bo(), BoAccess::READ);

            cb.device().ensure_slm(pipeline.shader().info().tls_size)
        });

        self.compute_pipeline = Some(pipeline);

        Ok(self)
    }

    fn validate_same_device(
        &self,
        device: &Arc<Device>,
        context: &'static str,
    ) -> Result<(), Box<ValidationError>> {
        if !Arc::ptr_eq(device, self.device()) {
            return Err(Box::new(ValidationError {
                context: context.into(),
                problem: "was not created from the same device as the command buffer".into(),
                vuids: &["VUID-vkCmdBindPipeline-commonparent"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Binds descriptor sets `first_set..first_set + sets.len()`.
    ///
    /// `dynamic_offsets` holds one offset per dynamic buffer descriptor of the sets, in set
    /// order and then in binding order.
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        layout: &Arc<PipelineLayout>,
        first_set: u32,
        sets: &[Arc<DescriptorSet>],
        dynamic_offsets: &[u32],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_bind_descriptor_sets(layout, first_set, sets, dynamic_offsets)?;

        let mut offsets = dynamic_offsets.iter().copied();
        let bindings = match bind_point {
            PipelineBindPoint::Graphics => &mut self.graphics,
            PipelineBindPoint::Compute => &mut self.compute,
        };

        let needed = first_set as usize + sets.len();
        if bindings.sets.len() < needed {
            bindings.sets.resize(needed, None);
        }

        for (index, set) in sets.iter().enumerate() {
            let mut bound = BoundSet {
                set: set.clone(),
                dyn_ubo_offsets: SmallVec::new(),
                dyn_ssbo_offsets: SmallVec::new(),
            };

            for binding in set.layout().bindings().values() {
                let count = binding.array_size as usize;

                match binding.descriptor_type {
                    DescriptorType::UniformBufferDynamic => {
                        bound.dyn_ubo_offsets.extend(offsets.by_ref().take(count));
                    }
                    DescriptorType::StorageBufferDynamic => {
                        bound.dyn_ssbo_offsets.extend(offsets.by_ref().take(count));
                    }
                    _ => (),
                }
            }

            bindings.sets[first_set as usize + index] = Some(bound);
        }

        bindings.root_table = None;

        for set in sets {
            if let Some(bo) = set.desc_bo() {
                self.resources.stream.ref_bo(bo, BoAccess::READ);
            }

            for reference in set.tables().resources.iter().flatten() {
                self.resources.stream.ref_bo(&reference.bo, reference.access);
            }
        }

        if bind_point == PipelineBindPoint::Graphics {
            self.dynamic.mark_dirty(DynamicState::DescriptorSets);
        }

        Ok(self)
    }

    fn validate_bind_descriptor_sets(
        &self,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[Arc<DescriptorSet>],
        dynamic_offsets: &[u32],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBindDescriptorSets-commandBuffer-recording"])?;

        if first_set as usize + sets.len() > layout.set_layouts().len() {
            return Err(Box::new(ValidationError {
                problem: "`first_set + sets.len()` is greater than the number of sets in \
                    `layout`"
                    .into(),
                vuids: &["VUID-vkCmdBindDescriptorSets-firstSet-00360"],
                ..Default::default()
            }));
        }

        for (index, set) in sets.iter().enumerate() {
            if !Arc::ptr_eq(set.layout(), &layout.set_layouts()[first_set as usize + index]) {
                return Err(Box::new(ValidationError {
                    context: format!("sets[{index}]").into(),
                    problem: "its layout is not the layout of the same set in `layout`".into(),
                    vuids: &["VUID-vkCmdBindDescriptorSets-pDescriptorSets-00358"],
                    ..Default::default()
                }));
            }

            if !set.is_valid() {
                return Err(Box::new(ValidationError {
                    context: format!("sets[{index}]").into(),
                    problem: "was allocated from a pool that has since been reset".into(),
                    vuids: &["VUID-vkCmdBindDescriptorSets-pDescriptorSets-parameter"],
                    ..Default::default()
                }));
            }
        }

        let expected = layout.dynamic_offset_count(first_set, sets.len() as u32);

        if dynamic_offsets.len() as u32 != expected {
            return Err(Box::new(ValidationError {
                context: "dynamic_offsets".into(),
                problem: format!(
                    "contains {} offsets, but the sets have {expected} dynamic descriptors",
                    dynamic_offsets.len(),
                )
                .into(),
                vuids: &["VUID-vkCmdBindDescriptorSets-dynamicOffsetCount-00359"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Updates `data.len()` bytes of the push constants at `offset`.
    pub fn push_constants(
        &mut self,
        layout: &Arc<PipelineLayout>,
        offset: u32,
        data: &[u8],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_push_constants(layout, offset, data)?;

        self.push_constants[offset as usize..][..data.len()].copy_from_slice(data);
        self.graphics.root_table = None;
        self.compute.root_table = None;
        self.dynamic.mark_dirty(DynamicState::PushConstants);

        Ok(self)
    }

    fn validate_push_constants(
        &self,
        layout: &PipelineLayout,
        offset: u32,
        data: &[u8],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdPushConstants-commandBuffer-recording"])?;

        if data.is_empty() {
            return Err(Box::new(ValidationError {
                context: "data".into(),
                problem: "is empty".into(),
                vuids: &["VUID-vkCmdPushConstants-size-arraylength"],
                ..Default::default()
            }));
        }

        if offset % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not a multiple of 4".into(),
                vuids: &["VUID-vkCmdPushConstants-offset-00368"],
                ..Default::default()
            }));
        }

        if data.len() % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "data".into(),
                problem: "its length is not a multiple of 4".into(),
                vuids: &["VUID-vkCmdPushConstants-size-00369"],
                ..Default::default()
            }));
        }

        if offset as usize + data.len() > layout.push_constant_size() as usize {
            return Err(Box::new(ValidationError {
                problem: "`offset + data.len()` is greater than the push constant size of \
                    `layout`"
                    .into(),
                vuids: &["VUID-vkCmdPushConstants-offset-01795"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Binds an index buffer. The primitive restart index follows from `index_type`.
    pub fn bind_index_buffer(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: DeviceSize,
        index_type: IndexType,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_bind_index_buffer(buffer, offset, index_type)?;

        self.resources.stream.ref_bo(buffer.bo(), BoAccess::READ);
        self.index_buffer = Some(IndexBufferBinding {
            address: buffer.device_address(offset),
            size: u32::try_from(buffer.size() - offset).unwrap_or(u32::MAX),
            index_type,
        });
        self.dynamic.mark_dirty(DynamicState::IndexBuffer);

        Ok(self)
    }

    fn validate_bind_index_buffer(
        &self,
        buffer: &Buffer,
        offset: DeviceSize,
        index_type: IndexType,
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBindIndexBuffer-commandBuffer-recording"])?;

        if !buffer.usage().intersects(BufferUsage::INDEX_BUFFER) {
            return Err(Box::new(ValidationError {
                context: "buffer.usage()".into(),
                problem: "does not contain `BufferUsage::INDEX_BUFFER`".into(),
                vuids: &["VUID-vkCmdBindIndexBuffer-buffer-08784"],
                ..Default::default()
            }));
        }

        if offset >= buffer.size() {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not less than the size of `buffer`".into(),
                vuids: &["VUID-vkCmdBindIndexBuffer-offset-08782"],
                ..Default::default()
            }));
        }

        if offset % DeviceSize::from(index_type.size()) != 0 {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not a multiple of the size of `index_type`".into(),
                vuids: &["VUID-vkCmdBindIndexBuffer-offset-08783"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Binds vertex buffers to bindings `first_binding..first_binding + buffers.len()`.
    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[(Arc<Buffer>, DeviceSize)],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_bind_vertex_buffers(first_binding, buffers)?;

        for (index, (buffer, offset)) in buffers.iter().enumerate() {
            self.resources.stream.ref_bo(buffer.bo(), BoAccess::READ);
            self.vertex_buffers[first_binding as usize + index] = Some(VertexBufferBinding {
                address: buffer.device_address(*offset),
                size: u32::try_from(buffer.size() - offset).unwrap_or(u32::MAX),
            });
        }

        self.dynamic.mark_dirty(DynamicState::VertexBuffers);

        Ok(self)
    }

    fn validate_bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[(Arc<Buffer>, DeviceSize)],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBindVertexBuffers-commandBuffer-recording"])?;

        if first_binding as usize + buffers.len() > MAX_VERTEX_ATTRIBUTES {
            return Err(Box::new(ValidationError {
                problem: "`first_binding + buffers.len()` is greater than the maximum number of \
                    vertex input bindings"
                    .into(),
                vuids: &["VUID-vkCmdBindVertexBuffers-firstBinding-00624"],
                ..Default::default()
            }));
        }

        for (index, (buffer, offset)) in buffers.iter().enumerate() {
            if !buffer.usage().intersects(BufferUsage::VERTEX_BUFFER) {
                return Err(Box::new(ValidationError {
                    context: format!("buffers[{index}].0.usage()").into(),
                    problem: "does not contain `BufferUsage::VERTEX_BUFFER`".into(),
                    vuids: &["VUID-vkCmdBindVertexBuffers-pBuffers-00627"],
                    ..Default::default()
                }));
            }

            if *offset >= buffer.size() {
                return Err(Box::new(ValidationError {
                    context: format!("buffers[{index}].1").into(),
                    problem: "is not less than the size of the buffer".into(),
                    vuids: &["VUID-vkCmdBindVertexBuffers-pOffsets-00626"],
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }

    /// Begins rendering to the given attachments.
    pub fn begin_rendering(
        &mut self,
        rendering_info: RenderingInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBeginRendering-commandBuffer-recording"])?;

        if self.rendering.is_some() {
            return Err(Box::new(ValidationError {
                problem: "rendering is already active".into(),
                vuids: &["VUID-vkCmdBeginRendering-renderpass"],
                ..Default::default()
            }));
        }

        rendering_info
            .validate()
            .map_err(|err| err.add_context("rendering_info"))?;

        for view in rendering_info.attachments() {
            self.resources.stream.ref_bo(view.bo(), BoAccess::RW);
        }

        let rendering = RenderingState::new(
            &rendering_info,
            self.level == CommandBufferLevel::Primary,
            true,
        );

        self.dynamic
            .set_color_attachment_count(rendering_info.color_attachments.len() as u32);
        self.dynamic.mark_dirty(DynamicState::RenderTargets);
        self.rendering = Some(rendering);

        Ok(self)
    }

    /// Ends the rendering begun with [`begin_rendering`](Self::begin_rendering).
    pub fn end_rendering(&mut self) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdEndRendering-commandBuffer-recording"])?;

        if !self.rendering.as_ref().is_some_and(|rendering| rendering.local) {
            return Err(Box::new(ValidationError {
                problem: "no rendering begun in this command buffer is active".into(),
                vuids: &["VUID-vkCmdEndRendering-None-06161"],
                ..Default::default()
            }));
        }

        self.rendering = None;
        self.dynamic.mark_dirty(DynamicState::RenderTargets);

        Ok(self)
    }

    /// Draws non-indexed primitives.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw(false)?;

        self.record(|cb| {
            let topology = cb.prepare_draw()?;

            cb.resources.stream.emit_record(&gen::Primitive {
                vertex_access_type_random: false,
                primitive_topology_type: topology,
                vertex_count_per_instance: vertex_count,
                start_vertex_location: first_vertex,
                instance_count,
                start_instance_location: first_instance,
                base_vertex_location: 0,
            })
        });

        Ok(self)
    }

    /// Draws indexed primitives with the bound index buffer.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw(true)?;

        self.record(|cb| {
            let topology = cb.prepare_draw()?;

            cb.resources.stream.emit_record(&gen::Primitive {
                vertex_access_type_random: true,
                primitive_topology_type: topology,
                vertex_count_per_instance: index_count,
                start_vertex_location: first_index,
                instance_count,
                start_instance_location: first_instance,
                base_vertex_location: vertex_offset,
            })
        });

        Ok(self)
    }

    fn validate_draw(&self, indexed: bool) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdDraw-commandBuffer-recording"])?;

        if self.graphics_pipeline.is_none() {
            return Err(Box::new(ValidationError {
                problem: "no graphics pipeline is bound".into(),
                vuids: &["VUID-vkCmdDraw-None-08606"],
                ..Default::default()
            }));
        }

        if self.rendering.is_none() {
            return Err(Box::new(ValidationError {
                problem: "rendering is not active".into(),
                vuids: &["VUID-vkCmdDraw-renderpass"],
                ..Default::default()
            }));
        }

        if indexed && self.index_buffer.is_none() {
            return Err(Box::new(ValidationError {
                problem: "no index buffer is bound".into(),
                vuids: &["VUID-vkCmdDrawIndexed-None-07312"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Flushes the dirty state and the root table, returning the topology of the draw.
    fn prepare_draw(&mut self) -> Result<u32, VulkanError> {
        let dirty = self.dynamic.dirty();
        self.flush_dynamic_state()?;
        self.flush_graphics_root_table(dirty)?;

        Ok(self.hw_topology())
    }

    /// Returns the hardware topology the bound pipeline draws with.
    pub(crate) fn hw_topology(&self) -> u32 {
        let state = self.dynamic.state();

        match &self.graphics_pipeline {
            Some(pipeline) => flush::hw_topology(pipeline, state),
            None => gen::primitive_topology(
                state.input_assembly.topology,
                state.tessellation.patch_control_points,
            ),
        }
    }

    /// Dispatches `group_counts` workgroups of the bound compute pipeline.
    pub fn dispatch(&mut self, group_counts: [u32; 3]) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dispatch()?;

        self.record(|cb| {
            let Some(pipeline) = cb.compute_pipeline.clone() else {
                return Ok(());
            };

            let root_table = match cb.compute.root_table {
                Some(address) => address,
                None => {
                    let shader = pipeline.shader();
                    let address = cb.upload_root_table(
                        pipeline.layout(),
                        PipelineBindPoint::Compute,
                        [0; 2],
                        shader.info().tls_size,
                    )?;
                    cb.compute.root_table = Some(address);

                    address
                }
            };

            let shader = pipeline.shader();

            cb.resources.stream.emit_record(&gen::ComputeWalker {
                kernel_start_pointer: shader.code_addr(),
                root_table_address: root_table,
                thread_group_id_x_dimension: group_counts[0],
                thread_group_id_y_dimension: group_counts[1],
                thread_group_id_z_dimension: group_counts[2],
                shared_local_memory_size: shader.info().wls_size.div_ceil(1024),
                barrier_enable: shader.info().wls_size > 0,
            })
        });

        Ok(self)
    }

    fn validate_dispatch(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdDispatch-commandBuffer-recording"])?;

        if self.compute_pipeline.is_none() {
            return Err(Box::new(ValidationError {
                problem: "no compute pipeline is bound".into(),
                vuids: &["VUID-vkCmdDispatch-None-08606"],
                ..Default::default()
            }));
        }

        if self.rendering.is_some() {
            return Err(Box::new(ValidationError {
                problem: "rendering is active".into(),
                vuids: &["VUID-vkCmdDispatch-renderpass"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Re-emits the graphics root table if anything it depends on changed.
    fn flush_graphics_root_table(&mut self, dirty: DirtySet) -> Result<(), VulkanError> {
        let Some(pipeline) = self.graphics_pipeline.clone() else {
            return Ok(());
        };

        if self.graphics.root_table.is_some() && dirty.is_empty() {
            return Ok(());
        }

        let mut rsd = self.renderer_state(&pipeline).to_vec();
        rsd.extend(self.blend_descriptors());
        let rsd_address = self.resources.upload(&rsd, TABLE_ALIGNMENT)?;

        let viewport_state = &self.dynamic.state().viewport;
        let viewport =
            mali::pack_viewport(&viewport_state.viewports[0], &viewport_state.scissors[0]);
        let viewport_address = self
            .resources
            .upload(&viewport.to_bytes(), TABLE_ALIGNMENT)?;

        let address = self.upload_root_table(
            pipeline.layout(),
            PipelineBindPoint::Graphics,
            [rsd_address, viewport_address],
            pipeline.max_tls_size(),
        )?;

        self.resources.stream.emit_record(&gen::ConstantAll {
            shader_update_enable: GRAPHICS_STAGES,
            root_table_address: address,
            root_table_size: ROOT_TABLE_SIZE as u32 / 32,
        })?;
        self.graphics.root_table = Some(address);

        Ok(())
    }

    /// Builds the fragment renderer state of the next draw: the pipeline's partial descriptor
    /// merged with the draw-time overlay.
    fn renderer_state(&self, pipeline: &GraphicsPipeline) -> [u8; 64] {
        let arch = self.device().properties().mali_arch;
        let state = self.dynamic.state();
        let rendering = self.rendering.as_ref();
        let rt_mask = rendering.map_or(0, RenderingState::color_mask);
        let color_blend = &state.color_blend;
        let ds = &state.depth_stencil;
        let rs = &state.rasterization;
        let ms = &state.multisample;

        let mut rt_written_mask = 0;
        let mut blend_reads_dest_mask = 0;

        for (i, attachment) in color_blend.attachments[..color_blend.attachment_count as usize]
            .iter()
            .enumerate()
        {
            if color_blend.color_write_enables & (1 << i) != 0 && !attachment.write_mask.is_empty()
            {
                rt_written_mask |= 1 << i;
            }

            if blend_reads_destination(color_blend, attachment) {
                blend_reads_dest_mask |= 1 << i;
            }
        }

        let samples = rendering.map_or(ms.rasterization_samples, |r| r.samples);
        let (depth_bias_constant, depth_bias_slope, depth_bias_clamp) = if rs.depth_bias_enable {
            (
                rs.depth_bias.constant_factor,
                rs.depth_bias.slope_factor,
                rs.depth_bias.clamp,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        let inputs = FsOverlayInputs {
            fs: pipeline.fs_info(),
            rt_mask,
            rt_written_mask,
            blend_reads_dest_mask,
            alpha_to_coverage: ms.alpha_to_coverage_enable,
            zs_enabled: ds.depth.test_enable || ds.stencil.test_enable,
            occlusion_query_active: self.occlusion_queries > 0,
            multisample: samples > 1,
            sample_mask: ms.sample_mask,
            min_samples: 1,
            depth_bias_constant,
            depth_bias_slope,
            depth_bias_clamp,
            stencil_front_reference: ds.stencil.front.reference as u8,
            stencil_back_reference: ds.stencil.back.reference as u8,
            back_stencil_enabled: ds.stencil.test_enable,
            ..Default::default()
        };

        let overlay = mali::prepare_fs_overlay(arch, &inputs);

        mali::merge_fs_state(
            arch,
            &pipeline.partial_records().rsd,
            &overlay,
            mali::fs_required(&inputs),
        )
    }

    /// Packs the `BLEND` descriptors that follow the renderer state, one per render target.
    fn blend_descriptors(&self) -> Vec<u8> {
        let state = self.dynamic.state();
        let color_blend = &state.color_blend;
        let rendering = self.rendering.as_ref();

        color_blend.attachments[..color_blend.attachment_count as usize]
            .iter()
            .enumerate()
            .flat_map(|(i, attachment)| {
                let equation = &attachment.equation;
                let constant = [
                    equation.src_color_blend_factor,
                    equation.dst_color_blend_factor,
                    equation.src_alpha_blend_factor,
                    equation.dst_alpha_blend_factor,
                ]
                .into_iter()
                .find_map(|factor| match factor {
                    BlendFactor::ConstantColor | BlendFactor::OneMinusConstantColor => Some(0),
                    BlendFactor::ConstantAlpha | BlendFactor::OneMinusConstantAlpha => Some(3),
                    _ => None,
                });

                mali::pack_blend(&BlendInputs {
                    rt: i as u32,
                    format: rendering.and_then(|r| r.color_formats.get(i).copied().flatten()),
                    enable: attachment.blend_enable && !color_blend.logic_op_enable,
                    load_destination: blend_reads_destination(color_blend, attachment),
                    alpha_to_one: state.multisample.alpha_to_one_enable,
                    constant: constant.map(|channel| color_blend.blend_constants[channel]),
                })
                .to_bytes()
            })
            .collect()
    }

    /// Uploads the descriptor tables and the root table pointing at them.
    ///
    /// `[renderer_state, viewport]` are the addresses of the graphics-only descriptors.
    fn upload_root_table(
        &mut self,
        layout: &PipelineLayout,
        bind_point: PipelineBindPoint,
        [renderer_state, viewport]: [u64; 2],
        tls_size: u32,
    ) -> Result<u64, VulkanError> {
        let bindings = match bind_point {
            PipelineBindPoint::Graphics => &self.graphics,
            PipelineBindPoint::Compute => &self.compute,
        };
        let tables = gather_descriptor_tables(layout, bindings);

        let mut root = RootTable {
            push_constants: self.push_constants,
            renderer_state,
            samplers: 0,
            textures: 0,
            ubos: 0,
            images: 0,
            image_attributes: 0,
            dyn_ssbos: 0,
            local_storage: 0,
            viewport,
            _reserved: [0; 3],
        };

        let resources = &mut *self.resources;
        let mut upload = |data: &[u8]| -> Result<u64, VulkanError> {
            if data.is_empty() {
                Ok(0)
            } else {
                resources.upload(data, TABLE_ALIGNMENT)
            }
        };

        root.samplers = upload(&tables.samplers)?;
        root.textures = upload(&tables.textures)?;
        root.ubos = upload(&tables.ubos)?;
        root.images = upload(&tables.images)?;
        root.image_attributes = upload(&tables.image_attributes)?;
        root.dyn_ssbos = upload(&tables.dyn_ssbos)?;

        let slm = self.device().slm();
        let local_storage = LocalStorage {
            tls_size: mali::tls_size_shift(tls_size),
            tls_base_pointer: match (&slm.bo, tls_size) {
                (Some(bo), 1..) => bo.gpu_addr(),
                _ => 0,
            },
            ..Default::default()
        };

        if let (Some(bo), 1..) = (&slm.bo, tls_size) {
            self.resources.stream.ref_bo(bo, BoAccess::RW);
        }

        root.local_storage = self
            .resources
            .upload(&local_storage.to_bytes(), TABLE_ALIGNMENT)?;

        self.resources
            .upload(bytemuck::bytes_of(&root), ROOT_TABLE_ALIGNMENT)
    }

    /// Resets queries `first_query..first_query + query_count` of `query_pool` on the GPU.
    pub fn reset_query_pool(
        &mut self,
        query_pool: &Arc<QueryPool>,
        first_query: u32,
        query_count: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdResetQueryPool-commandBuffer-recording"])?;
        query_pool.validate_range(first_query, query_count)?;

        if self.rendering.is_some() {
            return Err(Box::new(ValidationError {
                problem: "rendering is active".into(),
                vuids: &["VUID-vkCmdResetQueryPool-renderpass"],
                ..Default::default()
            }));
        }

        self.record(|cb| {
            cb.resources.stream.ref_bo(query_pool.bo(), BoAccess::RW);
            cb.resources
                .stream
                .emit_push(&query_pool.reset_push(first_query, query_count))
        });

        Ok(self)
    }

    /// Begins an occlusion or pipeline statistics query.
    pub fn begin_query(
        &mut self,
        query_pool: &Arc<QueryPool>,
        query: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBeginQuery-commandBuffer-recording"])?;
        query_pool.validate_range(query, 1)?;

        if query_pool.query_type() == QueryType::Timestamp {
            return Err(Box::new(ValidationError {
                context: "query_pool.query_type()".into(),
                problem: "is `QueryType::Timestamp`".into(),
                vuids: &["VUID-vkCmdBeginQuery-queryType-02804"],
                ..Default::default()
            }));
        }

        if self
            .active_queries
            .iter()
            .any(|active| Arc::ptr_eq(&active.pool, query_pool) && active.query == query)
        {
            return Err(Box::new(ValidationError {
                problem: "the query is already active".into(),
                vuids: &["VUID-vkCmdBeginQuery-queryPool-01922"],
                ..Default::default()
            }));
        }

        self.active_queries.push(ActiveQuery {
            pool: query_pool.clone(),
            query,
        });

        if query_pool.query_type() == QueryType::Occlusion {
            self.occlusion_queries += 1;
            self.dynamic.mark_dirty(DynamicState::OcclusionQueries);
        }

        self.record(|cb| {
            cb.resources.stream.ref_bo(query_pool.bo(), BoAccess::RW);
            cb.resources.stream.emit_push(&query_pool.begin_push(query))
        });

        Ok(self)
    }

    /// Ends a query begun with [`begin_query`](Self::begin_query) and makes its result
    /// available.
    pub fn end_query(
        &mut self,
        query_pool: &Arc<QueryPool>,
        query: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdEndQuery-commandBuffer-recording"])?;

        let Some(position) = self
            .active_queries
            .iter()
            .position(|active| Arc::ptr_eq(&active.pool, query_pool) && active.query == query)
        else {
            return Err(Box::new(ValidationError {
                problem: "the query is not active".into(),
                vuids: &["VUID-vkCmdEndQuery-None-01923"],
                ..Default::default()
            }));
        };

        self.active_queries.remove(position);

        if query_pool.query_type() == QueryType::Occlusion {
            self.occlusion_queries -= 1;
            self.dynamic.mark_dirty(DynamicState::OcclusionQueries);
        }

        self.record(|cb| cb.resources.stream.emit_push(&query_pool.end_push(query)));

        Ok(self)
    }

    /// Writes the GPU timestamp to a query.
    pub fn write_timestamp(
        &mut self,
        query_pool: &Arc<QueryPool>,
        query: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdWriteTimestamp-commandBuffer-recording"])?;
        query_pool.validate_range(query, 1)?;

        if query_pool.query_type() != QueryType::Timestamp {
            return Err(Box::new(ValidationError {
                context: "query_pool.query_type()".into(),
                problem: "is not `QueryType::Timestamp`".into(),
                vuids: &["VUID-vkCmdWriteTimestamp-queryPool-01416"],
                ..Default::default()
            }));
        }

        self.record(|cb| {
            cb.resources.stream.ref_bo(query_pool.bo(), BoAccess::RW);
            cb.resources.stream.emit_push(&query_pool.timestamp_push(query))
        });

        Ok(self)
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        // SAFETY: `resources` is not used after this point.
        let resources = unsafe { ManuallyDrop::take(&mut self.resources) };
        self.pool.recycle(resources);
    }
}

impl DeviceOwned for CommandBuffer {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        self.pool.device()
    }
}

impl_id_counter!(CommandBuffer);

/// The pipeline-wide descriptor tables of one draw or dispatch, as bytes.
#[derive(Debug, Default)]
struct GatheredTables {
    samplers: Vec<u8>,
    textures: Vec<u8>,
    ubos: Vec<u8>,
    images: Vec<u8>,
    image_attributes: Vec<u8>,
    dyn_ssbos: Vec<u8>,
}

/// Concatenates the tables of the bound sets in the index spaces of `layout`.
///
/// Sets that are unbound, or bound with a layout that does not match, leave their range
/// zeroed.
fn gather_descriptor_tables(layout: &PipelineLayout, bindings: &DescriptorBindings) -> GatheredTables {
    let totals = layout.totals();
    let mut tables = GatheredTables {
        samplers: vec![0; totals.samplers as usize * SAMPLER_DESC_SIZE],
        textures: vec![0; totals.textures as usize * TEXTURE_DESC_SIZE],
        ubos: vec![0; (totals.ubos + totals.dyn_ubos) as usize * UBO_DESC_SIZE],
        images: vec![0; totals.images as usize * ATTRIBUTE_BUFFER_DESC_SIZE],
        image_attributes: vec![0; totals.images as usize * ATTRIBUTE_DESC_SIZE],
        dyn_ssbos: vec![0; totals.dyn_ssbos as usize * size_of::<DynSsboRecord>()],
    };

    for (index, set_layout) in layout.set_layouts().iter().enumerate() {
        let Some(Some(bound)) = bindings.sets.get(index) else {
            continue;
        };

        if !Arc::ptr_eq(bound.set.layout(), set_layout) {
            continue;
        }

        let offsets = layout.set_offsets(index as u32);
        let set_tables = bound.set.tables();

        copy_records(&mut tables.samplers, offsets.samplers, &set_tables.samplers);
        copy_records(&mut tables.textures, offsets.textures, &set_tables.textures);
        copy_records(&mut tables.ubos, offsets.ubos, &set_tables.ubos);
        copy_records(
            &mut tables.images,
            offsets.images,
            &set_tables.image_attribute_buffers,
        );

        let image_attributes = set_tables
            .image_formats
            .iter()
            .enumerate()
            .map(|(i, &format)| {
                mali::Attribute {
                    buffer_index: offsets.images + i as u32,
                    offset_enable: false,
                    format,
                }
                .to_bytes()
            })
            .collect::<Vec<_>>();
        copy_records(&mut tables.image_attributes, offsets.images, &image_attributes);

        let dyn_ubos = set_tables
            .dyn_ubos
            .iter()
            .zip(&bound.dyn_ubo_offsets)
            .map(|(desc, &offset)| dynamic_ubo_record(desc, offset))
            .collect::<SmallVec<[_; 4]>>();
        copy_records(&mut tables.ubos, totals.ubos + offsets.dyn_ubos, &dyn_ubos);

        let dyn_ssbos = set_tables
            .dyn_ssbos
            .iter()
            .zip(&bound.dyn_ssbo_offsets)
            .map(|(desc, &offset)| {
                bytemuck::cast::<_, [u8; 16]>(DynSsboRecord {
                    address: desc.address + u64::from(offset),
                    size: desc.size,
                    _pad: 0,
                })
            })
            .collect::<SmallVec<[_; 4]>>();
        copy_records(&mut tables.dyn_ssbos, offsets.dyn_ssbos, &dyn_ssbos);
    }

    tables
}

/// Returns whether blending render target `attachment` reads the destination color.
fn blend_reads_destination(color_blend: &ColorBlendState, attachment: &ColorBlendAttachmentState) -> bool {
    let equation = &attachment.equation;

    color_blend.logic_op_enable
        || attachment.blend_enable
            && [
                equation.src_color_blend_factor,
                equation.dst_color_blend_factor,
                equation.src_alpha_blend_factor,
                equation.dst_alpha_blend_factor,
            ]
            .into_iter()
            .any(BlendFactor::reads_destination)
}

fn dynamic_ubo_record(desc: &DynamicBufferDescriptor, offset: u32) -> [u8; UBO_DESC_SIZE] {
    ubo_record(desc.address + u64::from(offset), DeviceSize::from(desc.size))
}

/// Copies `records` into `dst` starting at record index `first`.
fn copy_records<const N: usize>(dst: &mut [u8], first: u32, records: &[[u8; N]]) {
    let start = first as usize * N;

    for (i, record) in records.iter().enumerate() {
        if let Some(slot) = dst.get_mut(start + i * N..start + (i + 1) * N) {
            slot.copy_from_slice(record);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        pool::{CommandBufferAllocateInfo, CommandPool, CommandPoolCreateFlags, CommandPoolCreateInfo},
        CommandBuffer, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferState,
        CommandBufferUsage, RenderingInfo,
    };
    use crate::{device::Device, Validated, VulkanError};
    use std::sync::Arc;

    fn pool(device: &Arc<Device>, flags: CommandPoolCreateFlags) -> Arc<CommandPool> {
        CommandPool::new(
            device.clone(),
            CommandPoolCreateInfo {
                flags,
                ..Default::default()
            },
        )
    }

    fn allocate(pool: &Arc<CommandPool>, level: CommandBufferLevel) -> CommandBuffer {
        pool.allocate_command_buffers(CommandBufferAllocateInfo {
            level,
            ..Default::default()
        })
        .unwrap()
        .pop()
        .unwrap()
    }

    /// Returns a primary command buffer in the recording state.
    pub(crate) fn recording(device: &Arc<Device>) -> CommandBuffer {
        let pool = pool(device, CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let mut cb = allocate(&pool, CommandBufferLevel::Primary);
        cb.begin(CommandBufferBeginInfo::default()).unwrap();

        cb
    }

    #[test]
    fn lifecycle() {
        let (device, _service) = dev!();
        let pool = pool(&device, CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let mut cb = allocate(&pool, CommandBufferLevel::Primary);
        assert_eq!(cb.state(), CommandBufferState::Initial);

        cb.begin(CommandBufferBeginInfo::default()).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Recording);
        assert!(cb.begin(CommandBufferBeginInfo::default()).is_err());

        cb.end().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Executable);
        assert!(!cb.stream_dwords().is_empty());

        // Beginning again resets implicitly.
        cb.begin(CommandBufferBeginInfo::default()).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Recording);
        assert_eq!(cb.stream_dwords().len(), 1);
    }

    #[test]
    fn begin_again_requires_resettable_pool() {
        let (device, _service) = dev!();
        let pool = pool(&device, CommandPoolCreateFlags::empty());
        let mut cb = allocate(&pool, CommandBufferLevel::Primary);

        cb.begin(CommandBufferBeginInfo::default()).unwrap();
        cb.end().unwrap();

        assert!(cb.begin(CommandBufferBeginInfo::default()).is_err());
        assert!(cb.reset().is_err());
    }

    #[test]
    fn one_time_submit() {
        let (device, _service) = dev!();
        let begin_info = || CommandBufferBeginInfo {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            ..Default::default()
        };

        let pool_plain = pool(&device, CommandPoolCreateFlags::empty());
        let mut cb = allocate(&pool_plain, CommandBufferLevel::Primary);
        cb.begin(begin_info()).unwrap();
        cb.end().unwrap();
        cb.mark_submitted();
        assert_eq!(cb.state(), CommandBufferState::Invalid);

        let pool_resettable = pool(&device, CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let mut cb = allocate(&pool_resettable, CommandBufferLevel::Primary);
        cb.begin(begin_info()).unwrap();
        cb.end().unwrap();
        cb.mark_submitted();
        assert_eq!(cb.state(), CommandBufferState::Initial);
    }

    #[test]
    fn allocation_failure_poisons() {
        let (device, service) = dev!();
        let pool = pool(&device, CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let mut cb = allocate(&pool, CommandBufferLevel::Primary);

        service.fail_next_allocs(1);
        cb.begin(CommandBufferBeginInfo::default()).unwrap();

        assert!(matches!(
            cb.end(),
            Err(Validated::Error(VulkanError::DeviceLost)),
        ));
        assert_eq!(cb.state(), CommandBufferState::Invalid);

        cb.reset().unwrap();
        cb.begin(CommandBufferBeginInfo::default()).unwrap();
        cb.end().unwrap();
    }

    #[test]
    fn secondary_inherits_rendering_without_area() {
        let (device, _service) = dev!();
        let pool = pool(&device, CommandPoolCreateFlags::empty());
        let mut cb = allocate(&pool, CommandBufferLevel::Secondary);

        assert!(cb
            .begin(CommandBufferBeginInfo {
                usage: CommandBufferUsage::RENDER_PASS_CONTINUE,
                ..Default::default()
            })
            .is_err());

        cb.begin(CommandBufferBeginInfo {
            usage: CommandBufferUsage::RENDER_PASS_CONTINUE,
            inheritance: Some(RenderingInfo::default()),
            ..Default::default()
        })
        .unwrap();

        let rendering = cb.rendering.as_ref().unwrap();
        assert!(rendering.area.is_none());
        assert!(!rendering.local);

        // Inherited rendering does not block the end of the buffer.
        cb.end().unwrap();
    }

    #[test]
    fn draw_requires_pipeline_and_rendering() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        let err = cb.draw(3, 1, 0, 0).unwrap_err();
        assert_eq!(err.problem, "no graphics pipeline is bound");
    }
}
