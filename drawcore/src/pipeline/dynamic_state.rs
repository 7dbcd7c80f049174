// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Dynamic graphics state and the dirty set that drives re-emission.
//!
//! Every piece of fixed-function state that can change between draws belongs to exactly one
//! [`DynamicState`] category. A [`DynamicStateTracker`] holds the current values together with
//! two [`DirtySet`]s: the categories whose value changed since the last flush, and the categories
//! the application has set explicitly since recording began.
//!
//! Setting a category to the value it already has does not mark it dirty. Binding a pipeline
//! copies the categories the pipeline embeds statically and marks them dirty unconditionally.

use super::state::{
    BlendFactor, BlendOp, ColorComponents, CompareOp, ConservativeRasterizationMode, CullMode,
    FragmentShadingRateCombinerOp, FrontFace, LineRasterizationMode, LogicOp, PolygonMode,
    PrimitiveTopology, ProvokingVertexMode, StencilOp, TessellationDomainOrigin, VertexInputRate,
};
use crate::{format::Format, ValidationError};
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// The maximum number of vertex attributes and vertex buffer bindings.
pub const MAX_VERTEX_ATTRIBUTES: usize = 32;

/// The largest vertex buffer stride, bounded by the width of the packed pitch field.
pub const MAX_VERTEX_INPUT_BINDING_STRIDE: u32 = 2048;

/// The largest offset of a vertex attribute within its element.
pub const MAX_VERTEX_INPUT_ATTRIBUTE_OFFSET: u32 = 2047;

/// The maximum number of viewports and scissors.
pub const MAX_VIEWPORTS: usize = 16;

/// The maximum number of color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// The maximum number of custom sample locations per pixel.
pub const MAX_SAMPLE_LOCATIONS: usize = 16;

/// A category of state tracked for re-emission.
///
/// The categories up to and including `FragmentShadingRate` can be set dynamically. The ones after
/// it change as a side effect of other commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
#[non_exhaustive]
pub enum DynamicState {
    VertexInput,
    VertexInputBindingStrides,
    PrimitiveTopology,
    PrimitiveRestartEnable,
    PatchControlPoints,
    TessellationDomainOrigin,
    ViewportCount,
    Viewports,
    ScissorCount,
    Scissors,
    DepthClipNegativeOneToOne,
    RasterizerDiscardEnable,
    DepthClampEnable,
    DepthClipEnable,
    PolygonMode,
    CullMode,
    FrontFace,
    ConservativeRasterizationMode,
    RasterizationStream,
    ProvokingVertexMode,
    LineRasterizationMode,
    LineWidth,
    LineStippleEnable,
    LineStipple,
    DepthBiasEnable,
    DepthBias,
    RasterizationSamples,
    SampleMask,
    AlphaToCoverageEnable,
    AlphaToOneEnable,
    SampleLocationsEnable,
    SampleLocations,
    DepthTestEnable,
    DepthWriteEnable,
    DepthCompareOp,
    DepthBoundsTestEnable,
    DepthBounds,
    StencilTestEnable,
    StencilOp,
    StencilCompareMask,
    StencilWriteMask,
    StencilReference,
    LogicOpEnable,
    LogicOp,
    ColorAttachmentCount,
    ColorWriteEnable,
    ColorBlendEnable,
    ColorBlendEquation,
    ColorWriteMask,
    BlendConstants,
    FragmentShadingRate,

    /// A different pipeline was bound.
    Pipeline,
    /// The render targets or their formats changed.
    RenderTargets,
    /// The index buffer or its type changed, which includes the restart index.
    IndexBuffer,
    VertexBuffers,
    DescriptorSets,
    PushConstants,
    /// Transform feedback was started or stopped.
    TransformFeedback,
    /// The number of active occlusion queries changed.
    OcclusionQueries,
}

impl DynamicState {
    /// Every category, in emission-independent declaration order.
    pub const ALL: [DynamicState; 59] = [
        Self::VertexInput,
        Self::VertexInputBindingStrides,
        Self::PrimitiveTopology,
        Self::PrimitiveRestartEnable,
        Self::PatchControlPoints,
        Self::TessellationDomainOrigin,
        Self::ViewportCount,
        Self::Viewports,
        Self::ScissorCount,
        Self::Scissors,
        Self::DepthClipNegativeOneToOne,
        Self::RasterizerDiscardEnable,
        Self::DepthClampEnable,
        Self::DepthClipEnable,
        Self::PolygonMode,
        Self::CullMode,
        Self::FrontFace,
        Self::ConservativeRasterizationMode,
        Self::RasterizationStream,
        Self::ProvokingVertexMode,
        Self::LineRasterizationMode,
        Self::LineWidth,
        Self::LineStippleEnable,
        Self::LineStipple,
        Self::DepthBiasEnable,
        Self::DepthBias,
        Self::RasterizationSamples,
        Self::SampleMask,
        Self::AlphaToCoverageEnable,
        Self::AlphaToOneEnable,
        Self::SampleLocationsEnable,
        Self::SampleLocations,
        Self::DepthTestEnable,
        Self::DepthWriteEnable,
        Self::DepthCompareOp,
        Self::DepthBoundsTestEnable,
        Self::DepthBounds,
        Self::StencilTestEnable,
        Self::StencilOp,
        Self::StencilCompareMask,
        Self::StencilWriteMask,
        Self::StencilReference,
        Self::LogicOpEnable,
        Self::LogicOp,
        Self::ColorAttachmentCount,
        Self::ColorWriteEnable,
        Self::ColorBlendEnable,
        Self::ColorBlendEquation,
        Self::ColorWriteMask,
        Self::BlendConstants,
        Self::FragmentShadingRate,
        Self::Pipeline,
        Self::RenderTargets,
        Self::IndexBuffer,
        Self::VertexBuffers,
        Self::DescriptorSets,
        Self::PushConstants,
        Self::TransformFeedback,
        Self::OcclusionQueries,
    ];

    #[inline]
    const fn bit(self) -> u64 {
        1 << self as u8
    }
}

/// A fixed-width set of [`DynamicState`] categories.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DirtySet(u64);

impl DirtySet {
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn all() -> Self {
        Self((1 << DynamicState::ALL.len()) - 1)
    }

    /// Returns the set of the categories that are settable dynamically.
    #[inline]
    pub const fn settable() -> Self {
        Self((DynamicState::FragmentShadingRate.bit() << 1) - 1)
    }

    #[inline]
    pub const fn from_slice(categories: &[DynamicState]) -> Self {
        let mut bits = 0;
        let mut i = 0;

        while i < categories.len() {
            bits |= categories[i].bit();
            i += 1;
        }

        Self(bits)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub const fn contains(self, category: DynamicState) -> bool {
        self.0 & category.bit() != 0
    }

    /// Returns whether any of `categories` is in the set.
    #[inline]
    pub const fn any(self, categories: &[DynamicState]) -> bool {
        self.intersects(Self::from_slice(categories))
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, category: DynamicState) {
        self.0 |= category.bit();
    }

    #[inline]
    pub fn remove(&mut self, category: DynamicState) {
        self.0 &= !category.bit();
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Iterates over the categories in the set.
    pub fn iter(self) -> impl Iterator<Item = DynamicState> {
        DynamicState::ALL
            .into_iter()
            .filter(move |&category| self.contains(category))
    }
}

impl std::ops::BitOr for DirtySet {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for DirtySet {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<DynamicState> for DirtySet {
    #[inline]
    fn from(category: DynamicState) -> Self {
        Self(category.bit())
    }
}

impl Debug for DirtySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A vertex attribute read by the vertex shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInputAttribute {
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

impl Default for VertexInputAttribute {
    #[inline]
    fn default() -> Self {
        Self {
            binding: 0,
            format: Format::R32G32B32A32_SFLOAT,
            offset: 0,
        }
    }
}

impl VertexInputAttribute {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.offset > MAX_VERTEX_INPUT_ATTRIBUTE_OFFSET {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is greater than the maximum vertex attribute offset".into(),
                vuids: &["VUID-VkVertexInputAttributeDescription2EXT-offset-06230"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInputBinding {
    pub stride: u32,
    pub input_rate: VertexInputRate,

    /// The default value is `1`.
    pub divisor: u32,
}

impl Default for VertexInputBinding {
    #[inline]
    fn default() -> Self {
        Self {
            stride: 0,
            input_rate: VertexInputRate::Vertex,
            divisor: 1,
        }
    }
}

impl VertexInputBinding {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        validate_binding_stride(self.stride).map_err(|err| err.add_context("stride"))
    }
}

pub(crate) fn validate_binding_stride(stride: u32) -> Result<(), Box<ValidationError>> {
    if stride > MAX_VERTEX_INPUT_BINDING_STRIDE {
        return Err(Box::new(ValidationError {
            problem: "is greater than the maximum vertex input binding stride".into(),
            vuids: &[
                "VUID-VkVertexInputBindingDescription2EXT-stride-04797",
                "VUID-vkCmdBindVertexBuffers2-pStrides-03362",
            ],
            ..Default::default()
        }));
    }

    Ok(())
}

/// The vertex input interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexInputState {
    /// Bit `i` is set if attribute location `i` is used.
    pub attributes_valid: u32,
    pub attributes: [VertexInputAttribute; MAX_VERTEX_ATTRIBUTES],

    /// Bit `i` is set if binding `i` is used.
    pub bindings_valid: u32,
    pub bindings: [VertexInputBinding; MAX_VERTEX_ATTRIBUTES],
}

impl VertexInputState {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        for binding in 0..MAX_VERTEX_ATTRIBUTES {
            if self.bindings_valid & (1 << binding) != 0 {
                self.bindings[binding]
                    .validate()
                    .map_err(|err| err.add_context(format!("bindings[{binding}]")))?;
            }
        }

        for (location, attribute) in self.active_attributes() {
            attribute
                .validate()
                .map_err(|err| err.add_context(format!("attributes[{location}]")))?;
        }

        Ok(())
    }

    /// Returns the used attribute locations with their description.
    pub fn active_attributes(&self) -> impl Iterator<Item = (u32, &VertexInputAttribute)> {
        (0..MAX_VERTEX_ATTRIBUTES as u32)
            .filter(|&location| self.attributes_valid & (1 << location) != 0)
            .map(|location| (location, &self.attributes[location as usize]))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputAssemblyState {
    pub topology: PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TessellationState {
    /// The default value is `3`.
    pub patch_control_points: u32,
    pub domain_origin: TessellationDomainOrigin,
}

impl Default for TessellationState {
    #[inline]
    fn default() -> Self {
        Self {
            patch_control_points: 3,
            domain_origin: TessellationDomainOrigin::UpperLeft,
        }
    }
}

/// A viewport transform in framebuffer coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub offset: [f32; 2],

    /// A negative height flips the Y axis.
    pub extent: [f32; 2],

    pub min_depth: f32,
    pub max_depth: f32,
}

/// A scissor rectangle in framebuffer coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Scissor {
    pub offset: [i32; 2],
    pub extent: [u32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub viewport_count: u32,
    pub viewports: [Viewport; MAX_VIEWPORTS],
    pub scissor_count: u32,
    pub scissors: [Scissor; MAX_VIEWPORTS],

    /// Clip space Z ranges over `[-1, 1]` instead of `[0, 1]`.
    pub depth_clip_negative_one_to_one: bool,
}

impl Default for ViewportState {
    #[inline]
    fn default() -> Self {
        Self {
            viewport_count: 0,
            viewports: [Viewport::default(); MAX_VIEWPORTS],
            scissor_count: 0,
            scissors: [Scissor::default(); MAX_VIEWPORTS],
            depth_clip_negative_one_to_one: false,
        }
    }
}

/// Whether primitives are clipped against the near and far planes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthClip {
    Enabled,
    Disabled,
    /// Clipping is the inverse of depth clamping.
    #[default]
    NotClamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineStipple {
    /// The default value is `1`.
    pub factor: u32,
    pub pattern: u16,
}

impl Default for LineStipple {
    #[inline]
    fn default() -> Self {
        Self {
            factor: 1,
            pattern: 0xffff,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineState {
    pub mode: LineRasterizationMode,

    /// The default value is `1.0`.
    pub width: f32,

    pub stipple_enable: bool,
    pub stipple: LineStipple,
}

impl Default for LineState {
    #[inline]
    fn default() -> Self {
        Self {
            mode: LineRasterizationMode::Default,
            width: 1.0,
            stipple_enable: false,
            stipple: LineStipple::default(),
        }
    }
}

/// How the constant depth bias factor is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthBiasRepresentation {
    #[default]
    LeastRepresentableValueFormat,
    LeastRepresentableValueForceUnorm,
    /// The factor is an absolute floating-point offset.
    Float,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
    pub representation: DepthBiasRepresentation,
    pub exact: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RasterizationState {
    pub rasterizer_discard_enable: bool,
    pub depth_clamp_enable: bool,
    pub depth_clip: DepthClip,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub conservative_mode: ConservativeRasterizationMode,
    pub rasterization_stream: u32,
    pub provoking_vertex: ProvokingVertexMode,
    pub line: LineState,
    pub depth_bias_enable: bool,
    pub depth_bias: DepthBias,
}

impl RasterizationState {
    /// Returns whether near and far plane clipping is in effect.
    #[inline]
    pub fn depth_clip_enabled(&self) -> bool {
        match self.depth_clip {
            DepthClip::Enabled => true,
            DepthClip::Disabled => false,
            DepthClip::NotClamp => !self.depth_clamp_enable,
        }
    }
}

/// Custom sample positions within a pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleLocations {
    /// The sample count the locations apply to.
    pub per_pixel: u32,
    pub grid_size: [u32; 2],
    pub locations: [[f32; 2]; MAX_SAMPLE_LOCATIONS],
}

impl Default for SampleLocations {
    #[inline]
    fn default() -> Self {
        Self {
            per_pixel: 1,
            grid_size: [1, 1],
            locations: [[0.5, 0.5]; MAX_SAMPLE_LOCATIONS],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultisampleState {
    /// The default value is `1`.
    pub rasterization_samples: u32,

    /// The default value is `u32::MAX`.
    pub sample_mask: u32,

    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
    pub sample_locations_enable: bool,
    pub sample_locations: SampleLocations,
}

impl Default for MultisampleState {
    #[inline]
    fn default() -> Self {
        Self {
            rasterization_samples: 1,
            sample_mask: u32::MAX,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
            sample_locations_enable: false,
            sample_locations: SampleLocations::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBounds {
    pub min: f32,
    pub max: f32,
}

impl Default for DepthBounds {
    #[inline]
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare_op: CompareOp,
    pub bounds_test_enable: bool,
    pub bounds: DepthBounds,
}

/// The operations applied to one stencil face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StencilOps {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StencilFaceState {
    pub ops: StencilOps,

    /// The default value is `0xff`.
    pub compare_mask: u32,

    /// The default value is `0xff`.
    pub write_mask: u32,

    pub reference: u32,
}

impl Default for StencilFaceState {
    #[inline]
    fn default() -> Self {
        Self {
            ops: StencilOps::default(),
            compare_mask: 0xff,
            write_mask: 0xff,
            reference: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StencilState {
    pub test_enable: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthStencilState {
    pub depth: DepthState,
    pub stencil: StencilState,
}

/// Which stencil faces a command affects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StencilFaces {
    Front,
    Back,
    FrontAndBack,
}

impl StencilFaces {
    #[inline]
    fn front(self) -> bool {
        matches!(self, Self::Front | Self::FrontAndBack)
    }

    #[inline]
    fn back(self) -> bool {
        matches!(self, Self::Back | Self::FrontAndBack)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendEquation {
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
}

impl Default for ColorBlendEquation {
    #[inline]
    fn default() -> Self {
        Self {
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

impl ColorBlendEquation {
    /// Returns whether any factor reads the second fragment output.
    pub fn uses_dual_source(&self) -> bool {
        [
            self.src_color_blend_factor,
            self.dst_color_blend_factor,
            self.src_alpha_blend_factor,
            self.dst_alpha_blend_factor,
        ]
        .into_iter()
        .any(BlendFactor::is_dual_source)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachmentState {
    pub blend_enable: bool,
    pub equation: ColorBlendEquation,

    /// The default value is all components.
    pub write_mask: ColorComponents,
}

impl Default for ColorBlendAttachmentState {
    #[inline]
    fn default() -> Self {
        Self {
            blend_enable: false,
            equation: ColorBlendEquation::default(),
            write_mask: ColorComponents::all(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorBlendState {
    pub logic_op_enable: bool,
    pub logic_op: LogicOp,
    pub attachment_count: u32,

    /// Bit `i` is set if writes to attachment `i` are enabled. The default value is `0xff`.
    pub color_write_enables: u8,

    pub attachments: [ColorBlendAttachmentState; MAX_COLOR_ATTACHMENTS],
    pub blend_constants: [f32; 4],
}

impl Default for ColorBlendState {
    #[inline]
    fn default() -> Self {
        Self {
            logic_op_enable: false,
            logic_op: LogicOp::Copy,
            attachment_count: 0,
            color_write_enables: 0xff,
            attachments: [ColorBlendAttachmentState::default(); MAX_COLOR_ATTACHMENTS],
            blend_constants: [0.0; 4],
        }
    }
}

impl ColorBlendState {
    /// Returns whether no attachment has any channel enabled for writing.
    pub fn all_writes_masked(&self) -> bool {
        self.attachments[..self.attachment_count as usize]
            .iter()
            .enumerate()
            .all(|(i, attachment)| {
                self.color_write_enables & (1 << i) == 0 || attachment.write_mask.is_empty()
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentShadingRateState {
    /// The default value is `[1, 1]`.
    pub fragment_size: [u32; 2],
    pub combiner_ops: [FragmentShadingRateCombinerOp; 2],
}

impl Default for FragmentShadingRateState {
    #[inline]
    fn default() -> Self {
        Self {
            fragment_size: [1, 1],
            combiner_ops: [FragmentShadingRateCombinerOp::Keep; 2],
        }
    }
}

/// All state that can be set dynamically.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DynamicGraphicsState {
    pub vertex_input: VertexInputState,
    pub vertex_binding_strides: [u32; MAX_VERTEX_ATTRIBUTES],
    pub input_assembly: InputAssemblyState,
    pub tessellation: TessellationState,
    pub viewport: ViewportState,
    pub rasterization: RasterizationState,
    pub multisample: MultisampleState,
    pub depth_stencil: DepthStencilState,
    pub color_blend: ColorBlendState,
    pub fragment_shading_rate: FragmentShadingRateState,
}

impl DynamicGraphicsState {
    /// Copies the values of `category` from `src`.
    ///
    /// Categories that don't carry a value in this struct are ignored.
    pub fn copy_category(&mut self, src: &Self, category: DynamicState) {
        use DynamicState as S;

        let (rs, src_rs) = (&mut self.rasterization, &src.rasterization);
        let (ms, src_ms) = (&mut self.multisample, &src.multisample);
        let (ds, src_ds) = (&mut self.depth_stencil, &src.depth_stencil);
        let (cb, src_cb) = (&mut self.color_blend, &src.color_blend);

        match category {
            S::VertexInput => self.vertex_input = src.vertex_input,
            S::VertexInputBindingStrides => {
                self.vertex_binding_strides = src.vertex_binding_strides;
            }
            S::PrimitiveTopology => self.input_assembly.topology = src.input_assembly.topology,
            S::PrimitiveRestartEnable => {
                self.input_assembly.primitive_restart_enable =
                    src.input_assembly.primitive_restart_enable;
            }
            S::PatchControlPoints => {
                self.tessellation.patch_control_points = src.tessellation.patch_control_points;
            }
            S::TessellationDomainOrigin => {
                self.tessellation.domain_origin = src.tessellation.domain_origin;
            }
            S::ViewportCount => self.viewport.viewport_count = src.viewport.viewport_count,
            S::Viewports => self.viewport.viewports = src.viewport.viewports,
            S::ScissorCount => self.viewport.scissor_count = src.viewport.scissor_count,
            S::Scissors => self.viewport.scissors = src.viewport.scissors,
            S::DepthClipNegativeOneToOne => {
                self.viewport.depth_clip_negative_one_to_one =
                    src.viewport.depth_clip_negative_one_to_one;
            }
            S::RasterizerDiscardEnable => {
                rs.rasterizer_discard_enable = src_rs.rasterizer_discard_enable;
            }
            S::DepthClampEnable => rs.depth_clamp_enable = src_rs.depth_clamp_enable,
            S::DepthClipEnable => rs.depth_clip = src_rs.depth_clip,
            S::PolygonMode => rs.polygon_mode = src_rs.polygon_mode,
            S::CullMode => rs.cull_mode = src_rs.cull_mode,
            S::FrontFace => rs.front_face = src_rs.front_face,
            S::ConservativeRasterizationMode => rs.conservative_mode = src_rs.conservative_mode,
            S::RasterizationStream => rs.rasterization_stream = src_rs.rasterization_stream,
            S::ProvokingVertexMode => rs.provoking_vertex = src_rs.provoking_vertex,
            S::LineRasterizationMode => rs.line.mode = src_rs.line.mode,
            S::LineWidth => rs.line.width = src_rs.line.width,
            S::LineStippleEnable => rs.line.stipple_enable = src_rs.line.stipple_enable,
            S::LineStipple => rs.line.stipple = src_rs.line.stipple,
            S::DepthBiasEnable => rs.depth_bias_enable = src_rs.depth_bias_enable,
            S::DepthBias => rs.depth_bias = src_rs.depth_bias,
            S::RasterizationSamples => ms.rasterization_samples = src_ms.rasterization_samples,
            S::SampleMask => ms.sample_mask = src_ms.sample_mask,
            S::AlphaToCoverageEnable => {
                ms.alpha_to_coverage_enable = src_ms.alpha_to_coverage_enable;
            }
            S::AlphaToOneEnable => ms.alpha_to_one_enable = src_ms.alpha_to_one_enable,
            S::SampleLocationsEnable => {
                ms.sample_locations_enable = src_ms.sample_locations_enable;
            }
            S::SampleLocations => ms.sample_locations = src_ms.sample_locations,
            S::DepthTestEnable => ds.depth.test_enable = src_ds.depth.test_enable,
            S::DepthWriteEnable => ds.depth.write_enable = src_ds.depth.write_enable,
            S::DepthCompareOp => ds.depth.compare_op = src_ds.depth.compare_op,
            S::DepthBoundsTestEnable => {
                ds.depth.bounds_test_enable = src_ds.depth.bounds_test_enable;
            }
            S::DepthBounds => ds.depth.bounds = src_ds.depth.bounds,
            S::StencilTestEnable => ds.stencil.test_enable = src_ds.stencil.test_enable,
            S::StencilOp => {
                ds.stencil.front.ops = src_ds.stencil.front.ops;
                ds.stencil.back.ops = src_ds.stencil.back.ops;
            }
            S::StencilCompareMask => {
                ds.stencil.front.compare_mask = src_ds.stencil.front.compare_mask;
                ds.stencil.back.compare_mask = src_ds.stencil.back.compare_mask;
            }
            S::StencilWriteMask => {
                ds.stencil.front.write_mask = src_ds.stencil.front.write_mask;
                ds.stencil.back.write_mask = src_ds.stencil.back.write_mask;
            }
            S::StencilReference => {
                ds.stencil.front.reference = src_ds.stencil.front.reference;
                ds.stencil.back.reference = src_ds.stencil.back.reference;
            }
            S::LogicOpEnable => cb.logic_op_enable = src_cb.logic_op_enable,
            S::LogicOp => cb.logic_op = src_cb.logic_op,
            S::ColorAttachmentCount => cb.attachment_count = src_cb.attachment_count,
            S::ColorWriteEnable => cb.color_write_enables = src_cb.color_write_enables,
            S::ColorBlendEnable => {
                for (dst, src) in cb.attachments.iter_mut().zip(&src_cb.attachments) {
                    dst.blend_enable = src.blend_enable;
                }
            }
            S::ColorBlendEquation => {
                for (dst, src) in cb.attachments.iter_mut().zip(&src_cb.attachments) {
                    dst.equation = src.equation;
                }
            }
            S::ColorWriteMask => {
                for (dst, src) in cb.attachments.iter_mut().zip(&src_cb.attachments) {
                    dst.write_mask = src.write_mask;
                }
            }
            S::BlendConstants => cb.blend_constants = src_cb.blend_constants,
            S::FragmentShadingRate => self.fragment_shading_rate = src.fragment_shading_rate,
            S::Pipeline
            | S::RenderTargets
            | S::IndexBuffer
            | S::VertexBuffers
            | S::DescriptorSets
            | S::PushConstants
            | S::TransformFeedback
            | S::OcclusionQueries => (),
        }
    }
}

/// Categories that a pipeline bind always invalidates, whatever the pipeline embeds.
const PIPELINE_DEPENDENT: DirtySet = DirtySet::from_slice(&[
    DynamicState::Pipeline,
    DynamicState::VertexBuffers,
    DynamicState::DescriptorSets,
    DynamicState::PushConstants,
]);

/// The current dynamic state of a command buffer plus its dirty set.
#[derive(Clone, Debug, Default)]
pub struct DynamicStateTracker {
    state: DynamicGraphicsState,
    dirty: DirtySet,
    set: DirtySet,
}

impl DynamicStateTracker {
    /// Returns a tracker with default values where every category is dirty.
    pub fn new() -> Self {
        Self {
            state: DynamicGraphicsState::default(),
            dirty: DirtySet::all(),
            set: DirtySet::empty(),
        }
    }

    #[inline]
    pub fn state(&self) -> &DynamicGraphicsState {
        &self.state
    }

    /// Returns the categories that changed since the last flush.
    #[inline]
    pub fn dirty(&self) -> DirtySet {
        self.dirty
    }

    /// Returns the categories the application set since the tracker was reset.
    #[inline]
    pub fn explicitly_set(&self) -> DirtySet {
        self.set
    }

    #[inline]
    pub fn mark_dirty(&mut self, categories: impl Into<DirtySet>) {
        self.dirty |= categories.into();
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Restores the defaults and marks everything dirty.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Takes over the categories in `fixed` from a pipeline's static state.
    pub fn bind_pipeline_state(&mut self, static_state: &DynamicGraphicsState, fixed: DirtySet) {
        for category in fixed.iter() {
            self.state.copy_category(static_state, category);
        }

        self.dirty |= fixed | PIPELINE_DEPENDENT;
    }

    fn update<T: PartialEq>(
        &mut self,
        category: DynamicState,
        slot: impl FnOnce(&mut DynamicGraphicsState) -> &mut T,
        value: T,
    ) {
        let slot = slot(&mut self.state);

        if *slot != value {
            *slot = value;
            self.dirty.insert(category);
        }

        self.set.insert(category);
    }

    pub fn set_vertex_input(
        &mut self,
        bindings: &[(u32, VertexInputBinding)],
        attributes: &[(u32, VertexInputAttribute)],
    ) {
        let mut vertex_input = VertexInputState::default();
        let mut strides = self.state.vertex_binding_strides;

        for &(binding, description) in bindings {
            vertex_input.bindings_valid |= 1 << binding;
            vertex_input.bindings[binding as usize] = description;
            strides[binding as usize] = description.stride;
        }

        for &(location, description) in attributes {
            vertex_input.attributes_valid |= 1 << location;
            vertex_input.attributes[location as usize] = description;
        }

        self.update(DynamicState::VertexInput, |s| &mut s.vertex_input, vertex_input);
        self.update(
            DynamicState::VertexInputBindingStrides,
            |s| &mut s.vertex_binding_strides,
            strides,
        );
    }

    pub fn set_vertex_binding_strides(&mut self, first_binding: u32, strides: &[u32]) {
        let mut new = self.state.vertex_binding_strides;
        new[first_binding as usize..][..strides.len()].copy_from_slice(strides);
        self.update(
            DynamicState::VertexInputBindingStrides,
            |s| &mut s.vertex_binding_strides,
            new,
        );
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.update(
            DynamicState::PrimitiveTopology,
            |s| &mut s.input_assembly.topology,
            topology,
        );
    }

    pub fn set_primitive_restart_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::PrimitiveRestartEnable,
            |s| &mut s.input_assembly.primitive_restart_enable,
            enable,
        );
    }

    pub fn set_patch_control_points(&mut self, count: u32) {
        self.update(
            DynamicState::PatchControlPoints,
            |s| &mut s.tessellation.patch_control_points,
            count,
        );
    }

    pub fn set_tessellation_domain_origin(&mut self, origin: TessellationDomainOrigin) {
        self.update(
            DynamicState::TessellationDomainOrigin,
            |s| &mut s.tessellation.domain_origin,
            origin,
        );
    }

    /// Sets viewports starting at `first_viewport`. The viewport count is left alone.
    pub fn set_viewports(&mut self, first_viewport: u32, viewports: &[Viewport]) {
        let mut new = self.state.viewport.viewports;
        new[first_viewport as usize..][..viewports.len()].copy_from_slice(viewports);
        self.update(DynamicState::Viewports, |s| &mut s.viewport.viewports, new);
    }

    /// Sets all viewports and their count.
    pub fn set_viewports_with_count(&mut self, viewports: &[Viewport]) {
        self.update(
            DynamicState::ViewportCount,
            |s| &mut s.viewport.viewport_count,
            viewports.len() as u32,
        );
        self.set_viewports(0, viewports);
    }

    pub fn set_scissors(&mut self, first_scissor: u32, scissors: &[Scissor]) {
        let mut new = self.state.viewport.scissors;
        new[first_scissor as usize..][..scissors.len()].copy_from_slice(scissors);
        self.update(DynamicState::Scissors, |s| &mut s.viewport.scissors, new);
    }

    pub fn set_scissors_with_count(&mut self, scissors: &[Scissor]) {
        self.update(
            DynamicState::ScissorCount,
            |s| &mut s.viewport.scissor_count,
            scissors.len() as u32,
        );
        self.set_scissors(0, scissors);
    }

    pub fn set_depth_clip_negative_one_to_one(&mut self, enable: bool) {
        self.update(
            DynamicState::DepthClipNegativeOneToOne,
            |s| &mut s.viewport.depth_clip_negative_one_to_one,
            enable,
        );
    }

    pub fn set_rasterizer_discard_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::RasterizerDiscardEnable,
            |s| &mut s.rasterization.rasterizer_discard_enable,
            enable,
        );
    }

    pub fn set_depth_clamp_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::DepthClampEnable,
            |s| &mut s.rasterization.depth_clamp_enable,
            enable,
        );
    }

    pub fn set_depth_clip_enable(&mut self, enable: bool) {
        let clip = if enable {
            DepthClip::Enabled
        } else {
            DepthClip::Disabled
        };
        self.update(
            DynamicState::DepthClipEnable,
            |s| &mut s.rasterization.depth_clip,
            clip,
        );
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.update(
            DynamicState::PolygonMode,
            |s| &mut s.rasterization.polygon_mode,
            mode,
        );
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.update(
            DynamicState::CullMode,
            |s| &mut s.rasterization.cull_mode,
            mode,
        );
    }

    pub fn set_front_face(&mut self, face: FrontFace) {
        self.update(
            DynamicState::FrontFace,
            |s| &mut s.rasterization.front_face,
            face,
        );
    }

    pub fn set_conservative_rasterization_mode(&mut self, mode: ConservativeRasterizationMode) {
        self.update(
            DynamicState::ConservativeRasterizationMode,
            |s| &mut s.rasterization.conservative_mode,
            mode,
        );
    }

    pub fn set_rasterization_stream(&mut self, stream: u32) {
        self.update(
            DynamicState::RasterizationStream,
            |s| &mut s.rasterization.rasterization_stream,
            stream,
        );
    }

    pub fn set_provoking_vertex_mode(&mut self, mode: ProvokingVertexMode) {
        self.update(
            DynamicState::ProvokingVertexMode,
            |s| &mut s.rasterization.provoking_vertex,
            mode,
        );
    }

    pub fn set_line_rasterization_mode(&mut self, mode: LineRasterizationMode) {
        self.update(
            DynamicState::LineRasterizationMode,
            |s| &mut s.rasterization.line.mode,
            mode,
        );
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.update(
            DynamicState::LineWidth,
            |s| &mut s.rasterization.line.width,
            width,
        );
    }

    pub fn set_line_stipple_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::LineStippleEnable,
            |s| &mut s.rasterization.line.stipple_enable,
            enable,
        );
    }

    pub fn set_line_stipple(&mut self, factor: u32, pattern: u16) {
        self.update(
            DynamicState::LineStipple,
            |s| &mut s.rasterization.line.stipple,
            LineStipple { factor, pattern },
        );
    }

    pub fn set_depth_bias_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::DepthBiasEnable,
            |s| &mut s.rasterization.depth_bias_enable,
            enable,
        );
    }

    pub fn set_depth_bias(&mut self, depth_bias: DepthBias) {
        self.update(
            DynamicState::DepthBias,
            |s| &mut s.rasterization.depth_bias,
            depth_bias,
        );
    }

    pub fn set_rasterization_samples(&mut self, samples: u32) {
        self.update(
            DynamicState::RasterizationSamples,
            |s| &mut s.multisample.rasterization_samples,
            samples,
        );
    }

    pub fn set_sample_mask(&mut self, mask: u32) {
        self.update(
            DynamicState::SampleMask,
            |s| &mut s.multisample.sample_mask,
            mask,
        );
    }

    pub fn set_alpha_to_coverage_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::AlphaToCoverageEnable,
            |s| &mut s.multisample.alpha_to_coverage_enable,
            enable,
        );
    }

    pub fn set_alpha_to_one_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::AlphaToOneEnable,
            |s| &mut s.multisample.alpha_to_one_enable,
            enable,
        );
    }

    pub fn set_sample_locations_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::SampleLocationsEnable,
            |s| &mut s.multisample.sample_locations_enable,
            enable,
        );
    }

    pub fn set_sample_locations(&mut self, locations: SampleLocations) {
        self.update(
            DynamicState::SampleLocations,
            |s| &mut s.multisample.sample_locations,
            locations,
        );
    }

    pub fn set_depth_test_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::DepthTestEnable,
            |s| &mut s.depth_stencil.depth.test_enable,
            enable,
        );
    }

    pub fn set_depth_write_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::DepthWriteEnable,
            |s| &mut s.depth_stencil.depth.write_enable,
            enable,
        );
    }

    pub fn set_depth_compare_op(&mut self, op: CompareOp) {
        self.update(
            DynamicState::DepthCompareOp,
            |s| &mut s.depth_stencil.depth.compare_op,
            op,
        );
    }

    pub fn set_depth_bounds_test_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::DepthBoundsTestEnable,
            |s| &mut s.depth_stencil.depth.bounds_test_enable,
            enable,
        );
    }

    pub fn set_depth_bounds(&mut self, min: f32, max: f32) {
        self.update(
            DynamicState::DepthBounds,
            |s| &mut s.depth_stencil.depth.bounds,
            DepthBounds { min, max },
        );
    }

    pub fn set_stencil_test_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::StencilTestEnable,
            |s| &mut s.depth_stencil.stencil.test_enable,
            enable,
        );
    }

    fn update_stencil_faces(
        &mut self,
        category: DynamicState,
        faces: StencilFaces,
        apply: impl Fn(&mut StencilFaceState),
    ) {
        let mut stencil = self.state.depth_stencil.stencil;

        if faces.front() {
            apply(&mut stencil.front);
        }

        if faces.back() {
            apply(&mut stencil.back);
        }

        self.update(category, |s| &mut s.depth_stencil.stencil, stencil);
    }

    pub fn set_stencil_op(&mut self, faces: StencilFaces, ops: StencilOps) {
        self.update_stencil_faces(DynamicState::StencilOp, faces, |face| face.ops = ops);
    }

    pub fn set_stencil_compare_mask(&mut self, faces: StencilFaces, mask: u32) {
        self.update_stencil_faces(DynamicState::StencilCompareMask, faces, |face| {
            face.compare_mask = mask;
        });
    }

    pub fn set_stencil_write_mask(&mut self, faces: StencilFaces, mask: u32) {
        self.update_stencil_faces(DynamicState::StencilWriteMask, faces, |face| {
            face.write_mask = mask;
        });
    }

    pub fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u32) {
        self.update_stencil_faces(DynamicState::StencilReference, faces, |face| {
            face.reference = reference;
        });
    }

    pub fn set_logic_op_enable(&mut self, enable: bool) {
        self.update(
            DynamicState::LogicOpEnable,
            |s| &mut s.color_blend.logic_op_enable,
            enable,
        );
    }

    pub fn set_logic_op(&mut self, op: LogicOp) {
        self.update(DynamicState::LogicOp, |s| &mut s.color_blend.logic_op, op);
    }

    pub fn set_color_write_enable(&mut self, enables: &[bool]) {
        let bits = enables
            .iter()
            .enumerate()
            .fold(0u8, |bits, (i, &enable)| bits | (u8::from(enable) << i));
        self.update(
            DynamicState::ColorWriteEnable,
            |s| &mut s.color_blend.color_write_enables,
            bits,
        );
    }

    fn update_attachments(
        &mut self,
        category: DynamicState,
        first_attachment: u32,
        count: usize,
        apply: impl Fn(usize, &mut ColorBlendAttachmentState),
    ) {
        let mut attachments = self.state.color_blend.attachments;

        for (i, attachment) in attachments[first_attachment as usize..][..count]
            .iter_mut()
            .enumerate()
        {
            apply(i, attachment);
        }

        self.update(category, |s| &mut s.color_blend.attachments, attachments);
    }

    pub fn set_color_blend_enable(&mut self, first_attachment: u32, enables: &[bool]) {
        self.update_attachments(
            DynamicState::ColorBlendEnable,
            first_attachment,
            enables.len(),
            |i, attachment| attachment.blend_enable = enables[i],
        );
    }

    pub fn set_color_blend_equation(
        &mut self,
        first_attachment: u32,
        equations: &[ColorBlendEquation],
    ) {
        self.update_attachments(
            DynamicState::ColorBlendEquation,
            first_attachment,
            equations.len(),
            |i, attachment| attachment.equation = equations[i],
        );
    }

    pub fn set_color_write_mask(&mut self, first_attachment: u32, masks: &[ColorComponents]) {
        self.update_attachments(
            DynamicState::ColorWriteMask,
            first_attachment,
            masks.len(),
            |i, attachment| attachment.write_mask = masks[i],
        );
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) {
        self.update(
            DynamicState::BlendConstants,
            |s| &mut s.color_blend.blend_constants,
            constants,
        );
    }

    pub fn set_fragment_shading_rate(
        &mut self,
        fragment_size: [u32; 2],
        combiner_ops: [FragmentShadingRateCombinerOp; 2],
    ) {
        self.update(
            DynamicState::FragmentShadingRate,
            |s| &mut s.fragment_shading_rate,
            FragmentShadingRateState {
                fragment_size,
                combiner_ops,
            },
        );
    }

    /// Sets the color attachment count, as done when rendering begins.
    pub(crate) fn set_color_attachment_count(&mut self, count: u32) {
        self.update(
            DynamicState::ColorAttachmentCount,
            |s| &mut s.color_blend.attachment_count,
            count,
        );
    }
}

/// Depth/stencil state after removing operations that cannot have an effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptimizedDepthStencil {
    pub state: DepthStencilState,
    pub depth_write_enable: bool,
    pub stencil_write_enable: bool,
}

fn optimize_stencil_face(face: &mut StencilOps, depth_can_fail: bool) {
    match face.compare_op {
        CompareOp::Always => face.fail_op = StencilOp::Keep,
        CompareOp::Never => {
            face.pass_op = StencilOp::Keep;
            face.depth_fail_op = StencilOp::Keep;
        }
        _ => (),
    }

    if !depth_can_fail {
        face.depth_fail_op = StencilOp::Keep;
    }
}

fn stencil_face_writes(face: &StencilFaceState) -> bool {
    face.write_mask & 0xff != 0
        && [face.ops.fail_op, face.ops.pass_op, face.ops.depth_fail_op]
            .into_iter()
            .any(|op| op != StencilOp::Keep)
}

/// Removes depth and stencil operations that cannot have an effect with the bound attachments.
pub fn optimize_depth_stencil(
    ds: &DepthStencilState,
    has_depth: bool,
    has_stencil: bool,
) -> OptimizedDepthStencil {
    let mut state = *ds;

    if !has_depth {
        state.depth.test_enable = false;
        state.depth.bounds_test_enable = false;
    }

    if !has_stencil {
        state.stencil.test_enable = false;
    }

    // Depth writes only happen as part of the depth test.
    if !state.depth.test_enable || state.depth.compare_op == CompareOp::Never {
        state.depth.write_enable = false;
    }

    let depth_can_fail =
        state.depth.test_enable && state.depth.compare_op != CompareOp::Always;

    let stencil_write_enable = if state.stencil.test_enable {
        optimize_stencil_face(&mut state.stencil.front.ops, depth_can_fail);
        optimize_stencil_face(&mut state.stencil.back.ops, depth_can_fail);
        stencil_face_writes(&state.stencil.front) || stencil_face_writes(&state.stencil.back)
    } else {
        false
    };

    OptimizedDepthStencil {
        state,
        depth_write_enable: state.depth.write_enable,
        stencil_write_enable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_bits_are_distinct() {
        let all = DirtySet::all();
        assert_eq!(all.count(), DynamicState::ALL.len() as u32);
        assert!(DynamicState::ALL.iter().all(|&c| all.contains(c)));
        assert!(DirtySet::settable().contains(DynamicState::FragmentShadingRate));
        assert!(!DirtySet::settable().contains(DynamicState::Pipeline));
    }

    #[test]
    fn setting_same_value_keeps_category_clean() {
        let mut tracker = DynamicStateTracker::new();
        tracker.clear_dirty();

        tracker.set_cull_mode(CullMode::None);
        assert!(tracker.dirty().is_empty());
        assert!(tracker.explicitly_set().contains(DynamicState::CullMode));

        tracker.set_cull_mode(CullMode::Back);
        assert_eq!(tracker.dirty(), DirtySet::from(DynamicState::CullMode));
        assert_eq!(tracker.state().rasterization.cull_mode, CullMode::Back);
    }

    #[test]
    fn setters_touch_only_their_category() {
        let mut tracker = DynamicStateTracker::new();
        tracker.clear_dirty();

        tracker.set_viewports(
            1,
            &[Viewport {
                extent: [4.0, 4.0],
                ..Default::default()
            }],
        );
        tracker.set_stencil_reference(StencilFaces::Back, 7);

        assert_eq!(
            tracker.dirty(),
            DirtySet::from_slice(&[DynamicState::Viewports, DynamicState::StencilReference]),
        );
        let state = tracker.state();
        assert_eq!(state.viewport.viewport_count, 0);
        assert_eq!(state.viewport.viewports[1].extent, [4.0, 4.0]);
        assert_eq!(state.depth_stencil.stencil.front.reference, 0);
        assert_eq!(state.depth_stencil.stencil.back.reference, 7);
    }

    #[test]
    fn pipeline_bind_copies_fixed_categories() {
        let mut tracker = DynamicStateTracker::new();
        tracker.set_line_width(3.0);
        tracker.clear_dirty();

        let mut pipeline_state = DynamicGraphicsState::default();
        pipeline_state.rasterization.cull_mode = CullMode::Front;
        pipeline_state.rasterization.line.width = 8.0;

        let fixed = DirtySet::from(DynamicState::CullMode);
        tracker.bind_pipeline_state(&pipeline_state, fixed);

        assert_eq!(tracker.state().rasterization.cull_mode, CullMode::Front);
        // Line width is dynamic for this pipeline and keeps the application's value.
        assert_eq!(tracker.state().rasterization.line.width, 3.0);
        assert!(tracker.dirty().contains(DynamicState::CullMode));
        assert!(tracker.dirty().contains(DynamicState::Pipeline));
        assert!(!tracker.dirty().contains(DynamicState::LineWidth));
    }

    #[test]
    fn color_write_enable_bits() {
        let mut tracker = DynamicStateTracker::new();
        tracker.set_color_attachment_count(2);
        tracker.set_color_write_enable(&[false, true]);
        assert_eq!(tracker.state().color_blend.color_write_enables, 0b10);
        assert!(!tracker.state().color_blend.all_writes_masked());

        tracker.set_color_write_mask(1, &[ColorComponents::empty()]);
        assert!(tracker.state().color_blend.all_writes_masked());
    }

    #[test]
    fn depth_writes_need_depth_attachment() {
        let mut ds = DepthStencilState::default();
        ds.depth.test_enable = true;
        ds.depth.write_enable = true;
        ds.depth.compare_op = CompareOp::Less;

        let opt = optimize_depth_stencil(&ds, true, false);
        assert!(opt.depth_write_enable);

        let opt = optimize_depth_stencil(&ds, false, false);
        assert!(!opt.depth_write_enable);
        assert!(!opt.state.depth.test_enable);
    }

    #[test]
    fn stencil_writes_need_stencil_attachment() {
        let mut ds = DepthStencilState::default();
        ds.stencil.test_enable = true;
        ds.stencil.front.ops = StencilOps {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Replace,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
        };

        assert!(optimize_depth_stencil(&ds, false, true).stencil_write_enable);
        assert!(!optimize_depth_stencil(&ds, false, false).stencil_write_enable);

        // A zero write mask means nothing is written.
        ds.stencil.front.write_mask = 0;
        assert!(!optimize_depth_stencil(&ds, false, true).stencil_write_enable);
    }

    #[test]
    fn unreachable_stencil_ops_are_dropped() {
        let mut ds = DepthStencilState::default();
        ds.stencil.test_enable = true;
        ds.stencil.front.ops = StencilOps {
            fail_op: StencilOp::Zero,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Invert,
            compare_op: CompareOp::Always,
        };
        ds.stencil.back.ops = ds.stencil.front.ops;

        // The stencil test always passes and there is no depth test that could fail.
        let opt = optimize_depth_stencil(&ds, false, true);
        assert!(!opt.stencil_write_enable);
        assert_eq!(opt.state.stencil.front.ops.fail_op, StencilOp::Keep);
        assert_eq!(opt.state.stencil.front.ops.depth_fail_op, StencilOp::Keep);
    }
}
