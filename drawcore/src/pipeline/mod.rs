// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Describes a graphical or compute operation.
//!
//! A pipeline bundles compiled [shaders](shader::Shader) with the fixed-function state that is
//! known when the pipeline is created. Everything else is left to the
//! [dynamic state](dynamic_state) of the command buffer.
//!
//! At creation time a graphics pipeline packs the *partial* hardware records: every field of
//! `3DSTATE_CLIP`, `3DSTATE_SF`, `3DSTATE_RASTER` and friends that depends only on the pipeline,
//! and the shader-derived part of the fragment renderer state. At draw time the command buffer
//! packs the remaining fields into an overlay and merges the two with a bitwise OR, so the
//! pipeline never has to be repacked.

use self::{
    dynamic_state::{DirtySet, DynamicGraphicsState, DynamicState},
    layout::PipelineLayout,
    shader::{FsInfo, Shader, ShaderStage},
};
use crate::{
    device::Device,
    macros::impl_id_counter,
    pack::{
        gen,
        mali::{DepthSource, MaliArch, PixelKill, RendererState},
    },
    DeviceOwned, NonExhaustive, ValidationError,
};
use smallvec::SmallVec;
use std::{num::NonZero, sync::Arc};

pub mod dynamic_state;
pub mod layout;
pub mod shader;
pub mod state;

/// The type of a pipeline, which determines the bind point it is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

/// The hardware records of a graphics pipeline, packed once at creation.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialRecords {
    pub clip: [u8; 16],
    pub streamout: [u8; 20],
    pub te: [u8; 20],
    pub gs: [u8; 40],
    pub sf: [u8; 16],
    pub raster: [u8; 20],
    pub wm: [u8; 8],

    /// The shader-dependent part of the fragment renderer state.
    pub rsd: [u8; 64],
}

/// Parameters to create a new `GraphicsPipeline`.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineCreateInfo {
    /// The shader stages. There must be a vertex stage and at most one of each stage.
    ///
    /// The default value is empty, which must be overridden.
    pub stages: SmallVec<[Arc<Shader>; 5]>,

    /// The values of every state category that is not listed in `dynamic_state`.
    ///
    /// The default value is [`DynamicGraphicsState::default()`].
    pub state: DynamicGraphicsState,

    /// The categories that command buffers set instead of the pipeline.
    ///
    /// The default value is empty.
    pub dynamic_state: DirtySet,

    /// The last pre-rasterization stage writes transform feedback outputs.
    ///
    /// The default value is `false`.
    pub transform_feedback: bool,

    /// Run the fragment shader even when no color is written.
    ///
    /// The default value is `false`.
    pub force_fragment_thread_dispatch: bool,

    /// The layout used by the pipeline.
    ///
    /// There is no default value.
    pub layout: Arc<PipelineLayout>,

    pub _ne: NonExhaustive,
}

impl GraphicsPipelineCreateInfo {
    /// Returns a `GraphicsPipelineCreateInfo` with the specified `layout`.
    #[inline]
    pub fn layout(layout: Arc<PipelineLayout>) -> Self {
        Self {
            stages: SmallVec::new(),
            state: DynamicGraphicsState::default(),
            dynamic_state: DirtySet::empty(),
            transform_feedback: false,
            force_fragment_thread_dispatch: false,
            layout,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        let mut seen = SmallVec::<[ShaderStage; 5]>::new();

        for (index, stage) in self.stages.iter().enumerate() {
            if !std::ptr::eq(&**stage.device(), device) {
                return Err(Box::new(ValidationError {
                    context: format!("stages[{}]", index).into(),
                    problem: "was not created from the same device as the pipeline".into(),
                    ..Default::default()
                }));
            }

            if stage.stage() == ShaderStage::Compute {
                return Err(Box::new(ValidationError {
                    context: format!("stages[{}]", index).into(),
                    problem: "is a compute shader".into(),
                    vuids: &["VUID-VkGraphicsPipelineCreateInfo-stage-06897"],
                    ..Default::default()
                }));
            }

            if seen.contains(&stage.stage()) {
                return Err(Box::new(ValidationError {
                    context: "stages".into(),
                    problem: format!("contains more than one {:?} stage", stage.stage()).into(),
                    vuids: &["VUID-VkGraphicsPipelineCreateInfo-stage-06897"],
                    ..Default::default()
                }));
            }

            validate_push_words(stage, &self.layout)
                .map_err(|err| err.add_context(format!("stages[{}]", index)))?;

            seen.push(stage.stage());
        }

        if !seen.contains(&ShaderStage::Vertex) {
            return Err(Box::new(ValidationError {
                context: "stages".into(),
                problem: "does not contain a vertex stage".into(),
                vuids: &["VUID-VkGraphicsPipelineCreateInfo-stage-02096"],
                ..Default::default()
            }));
        }

        if seen.contains(&ShaderStage::TessellationControl)
            != seen.contains(&ShaderStage::TessellationEvaluation)
        {
            return Err(Box::new(ValidationError {
                context: "stages".into(),
                problem: "contains only one of the two tessellation stages".into(),
                vuids: &["VUID-VkGraphicsPipelineCreateInfo-pStages-00729"],
                ..Default::default()
            }));
        }

        if !self.dynamic_state.difference(DirtySet::settable()).is_empty() {
            return Err(Box::new(ValidationError {
                context: "dynamic_state".into(),
                problem: "contains a category that cannot be set dynamically".into(),
                ..Default::default()
            }));
        }

        self.state
            .vertex_input
            .validate()
            .map_err(|err| err.add_context("state.vertex_input"))?;

        for (index, &stride) in self.state.vertex_binding_strides.iter().enumerate() {
            dynamic_state::validate_binding_stride(stride).map_err(|err| {
                err.add_context(format!("state.vertex_binding_strides[{index}]"))
            })?;
        }

        if self.state.color_blend.attachment_count as usize > gen::MAX_RTS {
            return Err(Box::new(ValidationError {
                context: "state.color_blend.attachment_count".into(),
                problem: "is greater than the maximum number of color attachments".into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

fn validate_push_words(
    shader: &Shader,
    layout: &PipelineLayout,
) -> Result<(), Box<ValidationError>> {
    if shader.info().push.count * 4 > layout.push_constant_size() {
        return Err(Box::new(ValidationError {
            problem: "reads more push constants than the pipeline layout provides".into(),
            vuids: &["VUID-VkGraphicsPipelineCreateInfo-layout-07987"],
            ..Default::default()
        }));
    }

    Ok(())
}

/// A pipeline that draws primitives.
#[derive(Debug)]
pub struct GraphicsPipeline {
    device: Arc<Device>,
    id: NonZero<u64>,
    layout: Arc<PipelineLayout>,
    stages: SmallVec<[Arc<Shader>; 5]>,
    state: DynamicGraphicsState,
    fixed: DirtySet,
    partial: PartialRecords,
    transform_feedback: bool,
    force_fragment_thread_dispatch: bool,
    max_tls_size: u32,
}

impl GraphicsPipeline {
    /// Creates a new `GraphicsPipeline`.
    pub fn new(
        device: Arc<Device>,
        create_info: GraphicsPipelineCreateInfo,
    ) -> Result<Arc<GraphicsPipeline>, Box<ValidationError>> {
        create_info
            .validate(&device)
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(device, create_info))
    }

    #[doc(hidden)]
    pub fn new_unchecked(
        device: Arc<Device>,
        create_info: GraphicsPipelineCreateInfo,
    ) -> Arc<GraphicsPipeline> {
        let GraphicsPipelineCreateInfo {
            stages,
            state,
            dynamic_state,
            transform_feedback,
            force_fragment_thread_dispatch,
            layout,
            _ne: _,
        } = create_info;

        let partial = pack_partial_records(
            device.properties().mali_arch,
            &stages,
            &layout,
            transform_feedback,
        );
        let max_tls_size = stages
            .iter()
            .map(|stage| stage.info().tls_size)
            .max()
            .unwrap_or(0);

        Arc::new(GraphicsPipeline {
            device,
            id: Self::next_id(),
            layout,
            stages,
            state,
            fixed: DirtySet::settable().difference(dynamic_state),
            partial,
            transform_feedback,
            force_fragment_thread_dispatch,
            max_tls_size,
        })
    }

    #[inline]
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    #[inline]
    pub fn stages(&self) -> &[Arc<Shader>] {
        &self.stages
    }

    /// Returns the shader of `stage`, if the pipeline has one.
    pub fn stage(&self, stage: ShaderStage) -> Option<&Arc<Shader>> {
        self.stages.iter().find(|shader| shader.stage() == stage)
    }

    /// Returns the static values of the pipeline.
    #[inline]
    pub fn state(&self) -> &DynamicGraphicsState {
        &self.state
    }

    /// Returns the categories that the pipeline embeds statically.
    #[inline]
    pub fn fixed_state(&self) -> DirtySet {
        self.fixed
    }

    /// Returns whether `category` is left to the command buffer.
    #[inline]
    pub fn is_dynamic(&self, category: DynamicState) -> bool {
        !self.fixed.contains(category)
    }

    #[inline]
    pub fn partial_records(&self) -> &PartialRecords {
        &self.partial
    }

    #[inline]
    pub fn fs_info(&self) -> Option<&FsInfo> {
        self.stage(ShaderStage::Fragment).map(|fs| &fs.info().fs)
    }

    #[inline]
    pub fn has_tessellation(&self) -> bool {
        self.stage(ShaderStage::TessellationEvaluation).is_some()
    }

    #[inline]
    pub fn has_geometry(&self) -> bool {
        self.stage(ShaderStage::Geometry).is_some()
    }

    #[inline]
    pub fn uses_transform_feedback(&self) -> bool {
        self.transform_feedback
    }

    #[inline]
    pub fn force_fragment_thread_dispatch(&self) -> bool {
        self.force_fragment_thread_dispatch
    }

    /// Returns whether the fragment shader declares a second color output for blending.
    #[inline]
    pub fn dual_source_blend(&self) -> bool {
        self.fs_info().is_some_and(|fs| fs.dual_source_blend)
    }

    /// Returns the largest per-thread stack of any stage.
    #[inline]
    pub fn max_tls_size(&self) -> u32 {
        self.max_tls_size
    }
}

impl DeviceOwned for GraphicsPipeline {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(GraphicsPipeline);

fn last_pre_raster_stage(stages: &[Arc<Shader>]) -> Option<&Arc<Shader>> {
    [
        ShaderStage::Geometry,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Vertex,
    ]
    .into_iter()
    .find_map(|stage| stages.iter().find(|shader| shader.stage() == stage))
}

fn pack_partial_records(
    arch: MaliArch,
    stages: &[Arc<Shader>],
    layout: &PipelineLayout,
    transform_feedback: bool,
) -> PartialRecords {
    let find = |stage| stages.iter().find(|shader: &&Arc<Shader>| shader.stage() == stage);
    let last_vs = last_pre_raster_stage(stages).map(|shader| &shader.info().vs);

    let clip = gen::Clip {
        statistics_enable: true,
        early_cull_enable: true,
        clip_enable: true,
        guardband_clip_test_enable: true,
        minimum_point_width: 0.125,
        maximum_point_width: 255.875,
        force_zero_rta_index_enable: !last_vs.is_some_and(|vs| vs.writes_viewport),
        ..Default::default()
    };

    let streamout = gen::Streamout {
        so_function_enable: transform_feedback,
        so_statistics_enable: true,
        ..Default::default()
    };

    let te = match find(ShaderStage::TessellationEvaluation) {
        Some(_) => gen::Te {
            te_enable: true,
            te_mode: 1,
            maximum_tessellation_factor_odd: 63.0,
            maximum_tessellation_factor_not_odd: 64.0,
            ..Default::default()
        },
        None => gen::Te::default(),
    };

    let gs = match find(ShaderStage::Geometry) {
        Some(shader) => gen::Gs {
            kernel_start_pointer: shader.code_addr(),
            statistics_enable: true,
            function_enable: true,
            ..Default::default()
        },
        None => gen::Gs::default(),
    };

    let sf = gen::Sf {
        statistics_enable: true,
        viewport_transform_enable: true,
        aa_line_distance_mode: true,
        point_width_source: last_vs.is_some_and(|vs| vs.writes_point_size),
        point_width: 1.0,
        ..Default::default()
    };

    let raster = gen::Raster {
        scissor_rectangle_enable: true,
        ..Default::default()
    };

    let fs = find(ShaderStage::Fragment);

    let wm = gen::Wm {
        statistics_enable: true,
        early_depth_stencil_control: u32::from(
            fs.is_some_and(|fs| fs.info().fs.early_fragment_tests),
        ),
        point_rasterization_rule: true,
        ..Default::default()
    };

    let rsd = match fs {
        Some(fs) => fs_partial(arch, fs, layout),
        None => RendererState::default(),
    };

    PartialRecords {
        clip: clip.to_bytes(),
        streamout: streamout.to_bytes(),
        te: te.to_bytes(),
        gs: gs.to_bytes(),
        sf: sf.to_bytes(),
        raster: raster.to_bytes(),
        wm: wm.to_bytes(),
        rsd: rsd.to_bytes(),
    }
}

/// Packs the fields of the fragment renderer state that only depend on the shader.
fn fs_partial(arch: MaliArch, fs: &Shader, layout: &PipelineLayout) -> RendererState {
    let info = fs.info();
    let totals = layout.totals();

    let mut rsd = RendererState {
        shader_pointer: fs.code_addr(),
        attribute_count: info.attribute_count,
        varying_count: info.varyings.input.len() as u32,
        texture_count: totals.textures,
        sampler_count: totals.samplers,
        uniform_buffer_count: info.ubo_count,
        work_register_count: info.work_reg_count,
        uniform_count: info.push.count,
        depth_source: if info.fs.writes_depth {
            DepthSource::Shader
        } else {
            DepthSource::FixedFunction
        },
        ..Default::default()
    };

    if arch == MaliArch::Bifrost {
        rsd.allow_forward_pixel_to_be_killed = !info.fs.sidefx;
        rsd.shader_modifies_coverage =
            info.fs.can_discard || info.fs.writes_depth || info.fs.writes_stencil;

        let late = info.fs.sidefx || info.fs.writes_depth || info.fs.writes_stencil;
        rsd.zs_update_operation = if late {
            PixelKill::ForceLate
        } else {
            PixelKill::StrongEarly
        };
        rsd.pixel_kill_operation = if info.fs.can_discard || late {
            PixelKill::WeakEarly
        } else {
            PixelKill::ForceEarly
        };
    }

    rsd
}

/// Parameters to create a new `ComputePipeline`.
#[derive(Clone, Debug)]
pub struct ComputePipelineCreateInfo {
    /// The compute shader.
    ///
    /// There is no default value.
    pub stage: Arc<Shader>,

    /// The layout used by the pipeline.
    ///
    /// There is no default value.
    pub layout: Arc<PipelineLayout>,

    pub _ne: NonExhaustive,
}

impl ComputePipelineCreateInfo {
    /// Returns a `ComputePipelineCreateInfo` with the specified `stage` and `layout`.
    #[inline]
    pub fn stage_layout(stage: Arc<Shader>, layout: Arc<PipelineLayout>) -> Self {
        Self {
            stage,
            layout,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.stage.stage() != ShaderStage::Compute {
            return Err(Box::new(ValidationError {
                context: "stage".into(),
                problem: "is not a compute shader".into(),
                vuids: &["VUID-VkComputePipelineCreateInfo-stage-00701"],
                ..Default::default()
            }));
        }

        validate_push_words(&self.stage, &self.layout).map_err(|err| err.add_context("stage"))?;

        Ok(())
    }
}

/// A pipeline that runs a compute shader.
#[derive(Debug)]
pub struct ComputePipeline {
    device: Arc<Device>,
    id: NonZero<u64>,
    layout: Arc<PipelineLayout>,
    shader: Arc<Shader>,
}

impl ComputePipeline {
    /// Creates a new `ComputePipeline`.
    pub fn new(
        device: Arc<Device>,
        create_info: ComputePipelineCreateInfo,
    ) -> Result<Arc<ComputePipeline>, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let ComputePipelineCreateInfo {
            stage,
            layout,
            _ne: _,
        } = create_info;

        Ok(Arc::new(ComputePipeline {
            device,
            id: Self::next_id(),
            layout,
            shader: stage,
        }))
    }

    #[inline]
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    #[inline]
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// Returns the workgroup size.
    #[inline]
    pub fn local_size(&self) -> [u32; 3] {
        self.shader.info().local_size
    }
}

impl DeviceOwned for ComputePipeline {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(ComputePipeline);
