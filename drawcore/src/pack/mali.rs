// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Descriptors of the Mali (Midgard and Bifrost) tile-based GPUs.
//!
//! Descriptor sets store their samplers, textures, storage images and uniform buffers as these
//! records, and draws build their fragment renderer state by merging a per-draw overlay from
//! [`prepare_fs_overlay`] over the pipeline's precomputed partial. The renderer state is
//! followed by one [`Blend`] per render target, and the draw's [`Viewport`] is packed from the
//! first viewport and scissor.

use super::{hw_enum, merge, record};
use crate::{
    format::Format,
    pipeline::{
        dynamic_state::{self, Scissor},
        shader::FsInfo,
        state::{CompareOp, Filter, SamplerAddressMode, SamplerMipmapMode},
    },
};

/// The two descriptor architectures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaliArch {
    Midgard,
    #[default]
    Bifrost,
}

pub mod descriptor_type {
    pub const SAMPLER: u32 = 1;
    pub const TEXTURE: u32 = 2;
    pub const ATTRIBUTE_BUFFER_1D: u32 = 1;
}

hw_enum! {
    pub enum WrapMode {
        #[default]
        Repeat = 8,
        ClampToEdge = 9,
        Clamp = 10,
        ClampToBorder = 11,
        MirroredRepeat = 12,
        MirroredClampToEdge = 13,
        MirroredClamp = 14,
        MirroredClampToBorder = 15,
    }

    pub enum Func {
        #[default]
        Never = 0,
        Less = 1,
        Equal = 2,
        LessEqual = 3,
        Greater = 4,
        NotEqual = 5,
        GreaterEqual = 6,
        Always = 7,
    }

    pub enum MipmapMode {
        #[default]
        Nearest = 0,
        None = 1,
        Trilinear = 3,
    }

    pub enum LodAlgorithm {
        #[default]
        Isotropic = 0,
        Anisotropic = 3,
    }

    pub enum TextureDimension {
        Cube = 0,
        D1 = 1,
        #[default]
        D2 = 2,
        D3 = 3,
    }

    pub enum PixelKill {
        #[default]
        ForceEarly = 0,
        StrongEarly = 1,
        WeakEarly = 2,
        ForceLate = 3,
    }

    pub enum DepthSource {
        #[default]
        Minimum = 0,
        FixedFunction = 1,
        Shader = 2,
    }

    pub enum BlendMode {
        #[default]
        Shader = 0,
        Opaque = 1,
        FixedFunction = 2,
        Off = 3,
    }

    pub enum JobType {
        #[default]
        NotStarted = 0,
        Null = 1,
        WriteValue = 2,
        CacheFlush = 3,
        Compute = 4,
        Vertex = 5,
        Geometry = 6,
        Tiler = 7,
        Fused = 8,
        Fragment = 9,
    }
}

record! {
    pub struct Sampler("SAMPLER", 32, 32) {
        ty: u32 => (0, 0, 4, Uint),
        wrap_mode_r: WrapMode => (0, 8, 4, Uint),
        wrap_mode_t: WrapMode => (0, 12, 4, Uint),
        wrap_mode_s: WrapMode => (0, 16, 4, Uint),
        point_sample_minify: bool => (0, 20, 1, Bool),
        point_sample_magnify: bool => (0, 21, 1, Bool),
        normalized_coordinates: bool => (0, 22, 1, Bool),
        seamless_cube_map: bool => (0, 23, 1, Bool),
        mipmap_mode: MipmapMode => (0, 24, 2, Uint),
        lod_algorithm: LodAlgorithm => (0, 26, 2, Uint),
        compare_function: Func => (0, 28, 3, Uint),
        minimum_lod: f32 => (1, 0, 13, Fixed { frac_bits: 8, signed: false }),
        maximum_lod: f32 => (1, 16, 13, Fixed { frac_bits: 8, signed: false }),
        lod_bias: f32 => (2, 0, 16, Fixed { frac_bits: 8, signed: true }),
        maximum_anisotropy: u32 => (2, 16, 5, Minus1),
        border_color_r: u32 => (4, 0, 32, Uint),
        border_color_g: u32 => (5, 0, 32, Uint),
        border_color_b: u32 => (6, 0, 32, Uint),
        border_color_a: u32 => (7, 0, 32, Uint),
    }

    pub struct Texture("TEXTURE", 32, 32) {
        ty: u32 => (0, 0, 4, Uint),
        dimension: TextureDimension => (0, 4, 2, Uint),
        format: u32 => (0, 10, 22, Uint),
        width: u32 => (1, 0, 16, Minus1),
        height: u32 => (1, 16, 16, Minus1),
        swizzle: u32 => (2, 0, 12, Uint),
        levels: u32 => (2, 16, 5, Minus1),
        sample_count_log2: u32 => (2, 24, 3, Uint),
        depth: u32 => (3, 0, 16, Minus1),
        array_size: u32 => (3, 16, 16, Minus1),
        surfaces: u64 => (4, 0, 64, Address { shift: 0 }),
        surface_stride: u32 => (6, 0, 32, Uint),
    }

    pub struct Attribute("ATTRIBUTE", 4, 4) {
        buffer_index: u32 => (0, 0, 9, Uint),
        offset_enable: bool => (0, 9, 1, Bool),
        format: u32 => (0, 10, 22, Uint),
    }

    pub struct AttributeBuffer("ATTRIBUTE_BUFFER", 16, 32) {
        ty: u32 => (0, 0, 6, Uint),
        pointer: u64 => (0, 6, 58, Address { shift: 6 }),
        stride: u32 => (2, 0, 32, Uint),
        size: u32 => (3, 0, 32, Uint),
    }

    pub struct UniformBuffer("UNIFORM_BUFFER", 8, 8) {
        /// Size in 16-byte entries.
        entries: u32 => (0, 0, 12, Minus1),
        pointer: u64 => (0, 12, 52, Address { shift: 4 }),
    }

    pub struct Blend("BLEND", 16, 16) {
        load_destination: bool => (0, 0, 1, Bool),
        alpha_to_one: bool => (0, 8, 1, Bool),
        enable: bool => (0, 9, 1, Bool),
        srgb: bool => (0, 10, 1, Bool),
        round_to_fb_precision: bool => (0, 11, 1, Bool),
        constant: u32 => (0, 16, 16, Uint),
        equation: u32 => (1, 0, 32, Uint),
        internal_mode: BlendMode => (2, 0, 2, Uint),
        rt: u32 => (2, 16, 4, Uint),
        register_format: u32 => (2, 24, 3, Uint),
        memory_format: u32 => (3, 0, 32, Uint),
    }

    pub struct RendererState("RENDERER_STATE", 64, 64) {
        shader_pointer: u64 => (0, 0, 64, Address { shift: 0 }),
        attribute_count: u32 => (2, 0, 8, Uint),
        varying_count: u32 => (2, 8, 8, Uint),
        texture_count: u32 => (2, 16, 8, Uint),
        sampler_count: u32 => (2, 24, 8, Uint),
        uniform_buffer_count: u32 => (3, 0, 8, Uint),
        work_register_count: u32 => (3, 8, 6, Uint),

        allow_forward_pixel_to_kill: bool => (4, 0, 1, Bool),
        allow_forward_pixel_to_be_killed: bool => (4, 1, 1, Bool),
        shader_modifies_coverage: bool => (4, 2, 1, Bool),
        zs_update_operation: PixelKill => (4, 3, 2, Uint),
        pixel_kill_operation: PixelKill => (4, 5, 2, Uint),
        force_early_z: bool => (4, 8, 1, Bool),
        shader_contains_discard: bool => (4, 9, 1, Bool),
        shader_reads_tilebuffer: bool => (4, 10, 1, Bool),
        depth_source: DepthSource => (4, 12, 2, Uint),
        shader_contains_barrier: bool => (4, 14, 1, Bool),
        uniform_count: u32 => (4, 16, 8, Uint),

        depth_units: f32 => (5, 0, 32, Float),
        depth_factor: f32 => (6, 0, 32, Float),
        depth_bias_clamp: f32 => (7, 0, 32, Float),

        sample_mask: u32 => (8, 0, 16, Uint),
        multisample_enable: bool => (8, 16, 1, Bool),
        evaluate_per_sample: bool => (8, 17, 1, Bool),
        depth_function: Func => (8, 20, 3, Uint),
        depth_write_mask: bool => (8, 23, 1, Bool),
        fixed_function_near_discard: bool => (8, 24, 1, Bool),
        fixed_function_far_discard: bool => (8, 25, 1, Bool),

        stencil_mask_front: u32 => (9, 0, 8, Uint),
        stencil_mask_back: u32 => (9, 8, 8, Uint),
        stencil_enable: bool => (9, 16, 1, Bool),
        alpha_to_coverage: bool => (9, 17, 1, Bool),

        stencil_front_reference_value: u32 => (10, 0, 8, Uint),
        stencil_front_mask: u32 => (10, 8, 8, Uint),
        stencil_front_compare_function: Func => (10, 16, 3, Uint),
        stencil_front_stencil_fail: u32 => (10, 19, 3, Uint),
        stencil_front_depth_fail: u32 => (10, 22, 3, Uint),
        stencil_front_depth_pass: u32 => (10, 25, 3, Uint),

        stencil_back_reference_value: u32 => (11, 0, 8, Uint),
        stencil_back_mask: u32 => (11, 8, 8, Uint),
        stencil_back_compare_function: Func => (11, 16, 3, Uint),
        stencil_back_stencil_fail: u32 => (11, 19, 3, Uint),
        stencil_back_depth_fail: u32 => (11, 22, 3, Uint),
        stencil_back_depth_pass: u32 => (11, 25, 3, Uint),

        alpha_reference: f32 => (12, 0, 32, Float),
    }

    pub struct Viewport("VIEWPORT", 32, 32) {
        minimum_x: f32 => (0, 0, 32, Float),
        minimum_y: f32 => (1, 0, 32, Float),
        maximum_x: f32 => (2, 0, 32, Float),
        maximum_y: f32 => (3, 0, 32, Float),
        minimum_z: f32 => (4, 0, 32, Float),
        maximum_z: f32 => (5, 0, 32, Float),
        scissor_minimum_x: u32 => (6, 0, 16, Uint),
        scissor_minimum_y: u32 => (6, 16, 16, Uint),
        scissor_maximum_x: u32 => (7, 0, 16, Uint),
        scissor_maximum_y: u32 => (7, 16, 16, Uint),
    }

    pub struct LocalStorage("LOCAL_STORAGE", 32, 64) {
        tls_size: u32 => (0, 0, 5, Uint),
        wls_instances: u32 => (0, 8, 5, Uint),
        wls_size_scale: u32 => (0, 16, 5, Uint),
        tls_base_pointer: u64 => (2, 0, 64, Address { shift: 0 }),
        wls_base_pointer: u64 => (4, 0, 64, Address { shift: 0 }),
    }

    /// The header shared by every job descriptor.
    pub struct JobHeader("JOB_HEADER", 32, 64) {
        exception_status: u32 => (0, 0, 32, Uint),
        first_incomplete_task: u32 => (1, 0, 32, Uint),
        fault_pointer: u64 => (2, 0, 64, Address { shift: 0 }),
        job_descriptor_size_64: bool => (4, 0, 1, Bool),
        job_type: JobType => (4, 1, 7, Uint),
        job_barrier: bool => (4, 8, 1, Bool),
        suppress_prefetch: bool => (4, 11, 1, Bool),
        job_index: u32 => (4, 16, 16, Uint),
        first_dependency: u32 => (5, 0, 16, Uint),
        second_dependency: u32 => (5, 16, 16, Uint),
        next_job: u64 => (6, 0, 64, Address { shift: 0 }),
    }
}

/// Texture wrap modes, including the clamp modes that only exist in older APIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexWrap {
    Repeat,
    Clamp,
    ClampToEdge,
    ClampToBorder,
    MirroredRepeat,
    MirroredClamp,
    MirroredClampToEdge,
    MirroredClampToBorder,
}

impl From<SamplerAddressMode> for TexWrap {
    fn from(val: SamplerAddressMode) -> Self {
        match val {
            SamplerAddressMode::Repeat => Self::Repeat,
            SamplerAddressMode::MirroredRepeat => Self::MirroredRepeat,
            SamplerAddressMode::ClampToEdge => Self::ClampToEdge,
            SamplerAddressMode::ClampToBorder => Self::ClampToBorder,
            SamplerAddressMode::MirrorClampToEdge => Self::MirroredClampToEdge,
        }
    }
}

/// Picks the wrap encoding for `wrap`.
///
/// Bifrost has no `CLAMP`, and Midgard's `CLAMP` misbehaves with nearest filtering. Both fall
/// back to `CLAMP_TO_EDGE` with nearest filtering; otherwise Midgard keeps `CLAMP` and Bifrost
/// uses `CLAMP_TO_BORDER`. The mirrored modes follow the same rule.
pub fn translate_wrap(wrap: TexWrap, arch: MaliArch, using_nearest: bool) -> WrapMode {
    let supports_clamp = arch == MaliArch::Midgard;

    match wrap {
        TexWrap::Repeat => WrapMode::Repeat,
        TexWrap::Clamp if using_nearest => WrapMode::ClampToEdge,
        TexWrap::Clamp if supports_clamp => WrapMode::Clamp,
        TexWrap::Clamp => WrapMode::ClampToBorder,
        TexWrap::ClampToEdge => WrapMode::ClampToEdge,
        TexWrap::ClampToBorder => WrapMode::ClampToBorder,
        TexWrap::MirroredRepeat => WrapMode::MirroredRepeat,
        TexWrap::MirroredClamp if using_nearest => WrapMode::MirroredClampToEdge,
        TexWrap::MirroredClamp if supports_clamp => WrapMode::MirroredClamp,
        TexWrap::MirroredClamp => WrapMode::MirroredClampToBorder,
        TexWrap::MirroredClampToEdge => WrapMode::MirroredClampToEdge,
        TexWrap::MirroredClampToBorder => WrapMode::MirroredClampToBorder,
    }
}

impl From<CompareOp> for Func {
    fn from(val: CompareOp) -> Self {
        match val {
            CompareOp::Never => Self::Never,
            CompareOp::Less => Self::Less,
            CompareOp::Equal => Self::Equal,
            CompareOp::LessOrEqual => Self::LessEqual,
            CompareOp::Greater => Self::Greater,
            CompareOp::NotEqual => Self::NotEqual,
            CompareOp::GreaterOrEqual => Self::GreaterEqual,
            CompareOp::Always => Self::Always,
        }
    }
}

/// Swaps the operands of a comparison. Texture units compare in reverse order.
pub fn flip_compare(func: Func) -> Func {
    match func {
        Func::Less => Func::Greater,
        Func::Greater => Func::Less,
        Func::LessEqual => Func::GreaterEqual,
        Func::GreaterEqual => Func::LessEqual,
        other => other,
    }
}

/// The API-side description of a sampler.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: SamplerMipmapMode,
    /// Disables mipmapping entirely.
    pub mipmaps_disabled: bool,
    pub address_mode: [TexWrap; 3],
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub max_anisotropy: u32,
    pub compare: Option<CompareOp>,
    pub unnormalized_coordinates: bool,
    pub seamless_cube_map: bool,
    pub border_color: [u32; 4],
}

impl Default for SamplerInfo {
    #[inline]
    fn default() -> Self {
        Self {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            mipmap_mode: SamplerMipmapMode::Nearest,
            mipmaps_disabled: false,
            address_mode: [TexWrap::Repeat; 3],
            mip_lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: 1000.0,
            max_anisotropy: 1,
            compare: None,
            unnormalized_coordinates: false,
            seamless_cube_map: true,
            border_color: [0; 4],
        }
    }
}

/// Packs the sampler descriptor of `info` for `arch`.
pub fn pack_sampler(arch: MaliArch, info: &SamplerInfo) -> Sampler {
    let using_nearest = info.min_filter == Filter::Nearest;
    let [s, t, r] = info.address_mode;
    let compare_function = info.compare.map_or(Func::Never, |op| flip_compare(op.into()));

    let mut sampler = Sampler {
        ty: descriptor_type::SAMPLER,
        wrap_mode_s: translate_wrap(s, arch, using_nearest),
        wrap_mode_t: translate_wrap(t, arch, using_nearest),
        wrap_mode_r: translate_wrap(r, arch, using_nearest),
        point_sample_magnify: info.mag_filter == Filter::Nearest,
        point_sample_minify: info.min_filter == Filter::Nearest,
        normalized_coordinates: !info.unnormalized_coordinates,
        seamless_cube_map: info.seamless_cube_map,
        compare_function,
        lod_bias: info.mip_lod_bias,
        minimum_lod: info.min_lod,
        maximum_lod: info.max_lod,
        border_color_r: info.border_color[0],
        border_color_g: info.border_color[1],
        border_color_b: info.border_color[2],
        border_color_a: info.border_color[3],
        ..Default::default()
    };

    match arch {
        MaliArch::Midgard => {
            sampler.mipmap_mode = match info.mipmap_mode {
                SamplerMipmapMode::Linear => MipmapMode::Trilinear,
                SamplerMipmapMode::Nearest => MipmapMode::Nearest,
            };

            // Clamp the LOD range to a single step to turn mipmapping off.
            if info.mipmaps_disabled {
                sampler.maximum_lod = info.min_lod + 1.0 / 256.0;
            }
        }
        MaliArch::Bifrost => {
            sampler.mipmap_mode = match (info.mipmaps_disabled, info.mipmap_mode) {
                (true, _) => MipmapMode::None,
                (false, SamplerMipmapMode::Nearest) => MipmapMode::Nearest,
                (false, SamplerMipmapMode::Linear) => MipmapMode::Trilinear,
            };

            if info.max_anisotropy > 1 {
                sampler.maximum_anisotropy = info.max_anisotropy;
                sampler.lod_algorithm = LodAlgorithm::Anisotropic;
            }
        }
    }

    sampler
}

/// Returns the `LOCAL_STORAGE` size field for a per-thread stack of `bytes`.
pub fn tls_size_shift(bytes: u32) -> u32 {
    if bytes == 0 {
        0
    } else {
        bytes.div_ceil(16).next_power_of_two().trailing_zeros()
    }
}

/// Converts a blend constant to the fixed-point form stored in `BLEND`, for a render target
/// whose widest channel has `chan_size` bits.
pub fn blend_constant(constant: f32, chan_size: u32) -> u32 {
    let chan_size = chan_size.clamp(1, 16);
    let max = ((1u32 << chan_size) - 1) as f32;
    let value = (constant.clamp(0.0, 1.0) * max) as u32;

    (value << (16 - chan_size)) & 0xffff
}

/// Draw-time inputs of the `BLEND` descriptor of one render target.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlendInputs {
    pub rt: u32,
    /// The format of the bound attachment, if any.
    pub format: Option<Format>,
    pub enable: bool,
    pub load_destination: bool,
    pub alpha_to_one: bool,
    /// The blend constant the equation reads. The fixed-function unit holds a single one.
    pub constant: Option<f32>,
}

pub fn pack_blend(inputs: &BlendInputs) -> Blend {
    let Some(format) = inputs.format else {
        return Blend {
            internal_mode: BlendMode::Off,
            rt: inputs.rt,
            ..Default::default()
        };
    };

    let chan_size = format.components().into_iter().max().map_or(8, u32::from);

    Blend {
        load_destination: inputs.load_destination,
        alpha_to_one: inputs.alpha_to_one,
        enable: inputs.enable,
        srgb: format.is_srgb(),
        constant: inputs
            .constant
            .map_or(0, |constant| blend_constant(constant, chan_size)),
        internal_mode: if inputs.enable {
            BlendMode::FixedFunction
        } else {
            BlendMode::Opaque
        },
        rt: inputs.rt,
        ..Default::default()
    }
}

/// Packs the `VIEWPORT` of a draw: the depth range and the scissor box, intersected with the
/// viewport rectangle. The maxima are inclusive.
pub fn pack_viewport(viewport: &dynamic_state::Viewport, scissor: &Scissor) -> Viewport {
    let [x, y] = viewport.offset;
    let [width, height] = viewport.extent;

    let min_x = (x as i64).max(i64::from(scissor.offset[0]));
    let min_y = (y.min(y + height) as i64).max(i64::from(scissor.offset[1]));
    let max_x = ((x + width) as i64).min(i64::from(scissor.offset[0]) + i64::from(scissor.extent[0]));
    let max_y = (y.max(y + height) as i64)
        .min(i64::from(scissor.offset[1]) + i64::from(scissor.extent[1]));

    // An empty box keeps its maximum at the minimum.
    let max_x = if max_x > min_x { max_x - 1 } else { max_x };
    let max_y = if max_y > min_y { max_y - 1 } else { max_y };
    let coord = |value: i64| value.clamp(0, 0xffff) as u32;

    Viewport {
        minimum_x: f32::NEG_INFINITY,
        minimum_y: f32::NEG_INFINITY,
        maximum_x: f32::INFINITY,
        maximum_y: f32::INFINITY,
        minimum_z: viewport.min_depth.min(viewport.max_depth),
        maximum_z: viewport.min_depth.max(viewport.max_depth),
        scissor_minimum_x: coord(min_x),
        scissor_minimum_y: coord(min_y),
        scissor_maximum_x: coord(max_x),
        scissor_maximum_y: coord(max_y),
    }
}

/// Draw-time inputs of the fragment renderer-state overlay.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsOverlayInputs<'a> {
    /// The fragment shader, if the pipeline has one.
    pub fs: Option<&'a FsInfo>,
    /// Render targets bound to the current pass.
    pub rt_mask: u32,
    /// Render targets whose color is written.
    pub rt_written_mask: u32,
    /// Render targets whose blend equation reads the destination.
    pub blend_reads_dest_mask: u32,
    pub alpha_to_coverage: bool,
    /// Whether any depth or stencil test is enabled.
    pub zs_enabled: bool,
    pub occlusion_query_active: bool,
    pub multisample: bool,
    pub sample_mask: u32,
    pub min_samples: u32,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
    pub depth_bias_clamp: f32,
    pub stencil_front_reference: u8,
    pub stencil_back_reference: u8,
    pub back_stencil_enabled: bool,
    pub alpha_reference: f32,
}

/// Returns whether the fragment shader must run at all.
pub fn fs_required(inputs: &FsOverlayInputs<'_>) -> bool {
    let Some(fs) = inputs.fs else {
        return false;
    };

    fs.sidefx
        || inputs.rt_mask & inputs.rt_written_mask != 0
        || fs.writes_depth
        || fs.writes_stencil
}

/// Computes the per-draw part of the fragment renderer state.
///
/// The result only touches draw-dependent fields and is merged over either the pipeline's
/// partial descriptor or [`empty_fs_partial`].
pub fn prepare_fs_overlay(arch: MaliArch, inputs: &FsOverlayInputs<'_>) -> RendererState {
    let mut rsd = RendererState::default();
    let required = fs_required(inputs);

    if let (true, Some(fs)) = (required, inputs.fs) {
        match arch {
            MaliArch::Bifrost => {
                let blend_reads_dest = inputs.blend_reads_dest_mask & inputs.rt_mask != 0;

                rsd.allow_forward_pixel_to_kill = fs.can_fpk
                    && inputs.rt_mask & !fs.outputs_written == 0
                    && !inputs.alpha_to_coverage
                    && !blend_reads_dest;
            }
            MaliArch::Midgard => {
                rsd.force_early_z = fs.can_early_z && !inputs.alpha_to_coverage;

                // Forcing early ZS without a depth buffer breaks occlusion queries.
                let force_ez_with_discard = !inputs.zs_enabled && !inputs.occlusion_query_active;

                rsd.shader_reads_tilebuffer = force_ez_with_discard && fs.can_discard;
                rsd.shader_contains_discard = !force_ez_with_discard && fs.can_discard;
            }
        }
    }

    rsd.sample_mask = if inputs.multisample {
        inputs.sample_mask & 0xffff
    } else {
        0xffff
    };
    rsd.evaluate_per_sample = inputs.multisample && inputs.min_samples > 1;
    rsd.alpha_to_coverage = inputs.alpha_to_coverage;

    rsd.depth_units = inputs.depth_bias_constant * 2.0;
    rsd.depth_factor = inputs.depth_bias_slope;
    rsd.depth_bias_clamp = inputs.depth_bias_clamp;

    rsd.stencil_front_reference_value = u32::from(inputs.stencil_front_reference);
    rsd.stencil_back_reference_value = u32::from(if inputs.back_stencil_enabled {
        inputs.stencil_back_reference
    } else {
        inputs.stencil_front_reference
    });

    if arch == MaliArch::Midgard {
        rsd.alpha_reference = inputs.alpha_reference;
    }

    rsd
}

/// The partial renderer state used when the fragment shader does not need to run.
pub fn empty_fs_partial(arch: MaliArch) -> RendererState {
    match arch {
        MaliArch::Bifrost => RendererState {
            shader_modifies_coverage: true,
            allow_forward_pixel_to_kill: true,
            allow_forward_pixel_to_be_killed: true,
            zs_update_operation: PixelKill::StrongEarly,
            ..Default::default()
        },
        MaliArch::Midgard => RendererState {
            shader_pointer: 0x1,
            work_register_count: 1,
            depth_source: DepthSource::FixedFunction,
            force_early_z: true,
            ..Default::default()
        },
    }
}

/// Merges `overlay` over the pipeline's packed `partial`, or over the empty-shader partial when
/// the fragment shader is not required.
pub fn merge_fs_state(
    arch: MaliArch,
    partial: &[u8; 64],
    overlay: &RendererState,
    fs_required: bool,
) -> [u8; 64] {
    let mut rsd = overlay.to_bytes();

    if fs_required {
        merge(&mut rsd, partial);
    } else {
        merge(&mut rsd, &empty_fs_partial(arch).to_bytes());
    }

    rsd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackRecord;

    #[test]
    fn wrap_table() {
        use TexWrap::*;

        for arch in [MaliArch::Midgard, MaliArch::Bifrost] {
            assert_eq!(translate_wrap(Clamp, arch, true), WrapMode::ClampToEdge);
            assert_eq!(
                translate_wrap(MirroredClamp, arch, true),
                WrapMode::MirroredClampToEdge
            );
            assert_eq!(translate_wrap(Repeat, arch, false), WrapMode::Repeat);
            assert_eq!(
                translate_wrap(ClampToBorder, arch, true),
                WrapMode::ClampToBorder
            );
        }

        assert_eq!(
            translate_wrap(Clamp, MaliArch::Midgard, false),
            WrapMode::Clamp
        );
        assert_eq!(
            translate_wrap(Clamp, MaliArch::Bifrost, false),
            WrapMode::ClampToBorder
        );
        assert_eq!(
            translate_wrap(MirroredClamp, MaliArch::Bifrost, false),
            WrapMode::MirroredClampToBorder
        );
        assert_eq!(WrapMode::Repeat as u32, 8);
        assert_eq!(WrapMode::MirroredClampToBorder as u32, 15);
    }

    #[test]
    fn compare_is_flipped() {
        let info = SamplerInfo {
            compare: Some(CompareOp::Less),
            ..Default::default()
        };
        assert_eq!(
            pack_sampler(MaliArch::Bifrost, &info).compare_function,
            Func::Greater
        );

        let info = SamplerInfo {
            compare: Some(CompareOp::GreaterOrEqual),
            ..Default::default()
        };
        assert_eq!(
            pack_sampler(MaliArch::Bifrost, &info).compare_function,
            Func::LessEqual
        );

        assert_eq!(
            pack_sampler(MaliArch::Bifrost, &SamplerInfo::default()).compare_function,
            Func::Never
        );
        assert_eq!(flip_compare(Func::Equal), Func::Equal);
    }

    #[test]
    fn sampler_lod_encoding() {
        let info = SamplerInfo {
            mip_lod_bias: -0.5,
            min_lod: 1.0,
            max_lod: 4.0,
            ..Default::default()
        };
        let bytes = pack_sampler(MaliArch::Bifrost, &info).to_bytes();

        assert_eq!(Sampler::raw(&bytes, "lod_bias"), Some(0xff80));
        assert_eq!(Sampler::raw(&bytes, "minimum_lod"), Some(256));
        assert_eq!(Sampler::raw(&bytes, "maximum_lod"), Some(1024));
    }

    #[test]
    fn midgard_disabled_mipmaps_clamp_lod() {
        let info = SamplerInfo {
            min_lod: 2.0,
            mipmaps_disabled: true,
            ..Default::default()
        };
        let bytes = pack_sampler(MaliArch::Midgard, &info).to_bytes();

        assert_eq!(Sampler::raw(&bytes, "maximum_lod"), Some(513));
    }

    #[test]
    fn anisotropy_only_on_bifrost() {
        let info = SamplerInfo {
            max_anisotropy: 16,
            ..Default::default()
        };

        let bifrost = pack_sampler(MaliArch::Bifrost, &info);
        assert_eq!(bifrost.lod_algorithm, LodAlgorithm::Anisotropic);
        assert_eq!(Sampler::raw(&bifrost.to_bytes(), "maximum_anisotropy"), Some(15));

        let midgard = pack_sampler(MaliArch::Midgard, &info);
        assert_eq!(midgard.lod_algorithm, LodAlgorithm::Isotropic);
    }

    #[test]
    fn forward_pixel_kill() {
        let fs = FsInfo {
            can_fpk: true,
            outputs_written: 0b1,
            ..Default::default()
        };
        let mut inputs = FsOverlayInputs {
            fs: Some(&fs),
            rt_mask: 0b1,
            rt_written_mask: 0b1,
            ..Default::default()
        };

        assert!(prepare_fs_overlay(MaliArch::Bifrost, &inputs).allow_forward_pixel_to_kill);

        inputs.alpha_to_coverage = true;
        assert!(!prepare_fs_overlay(MaliArch::Bifrost, &inputs).allow_forward_pixel_to_kill);

        inputs.alpha_to_coverage = false;
        inputs.rt_mask = 0b11;
        inputs.rt_written_mask = 0b11;
        assert!(!prepare_fs_overlay(MaliArch::Bifrost, &inputs).allow_forward_pixel_to_kill);
    }

    #[test]
    fn midgard_early_z_and_discard() {
        let fs = FsInfo {
            can_early_z: true,
            can_discard: true,
            sidefx: true,
            ..Default::default()
        };
        let inputs = FsOverlayInputs {
            fs: Some(&fs),
            ..Default::default()
        };

        let rsd = prepare_fs_overlay(MaliArch::Midgard, &inputs);
        assert!(rsd.force_early_z);
        assert!(rsd.shader_reads_tilebuffer);
        assert!(!rsd.shader_contains_discard);

        let inputs = FsOverlayInputs {
            zs_enabled: true,
            ..inputs
        };
        let rsd = prepare_fs_overlay(MaliArch::Midgard, &inputs);
        assert!(!rsd.shader_reads_tilebuffer);
        assert!(rsd.shader_contains_discard);
    }

    #[test]
    fn overlay_defaults() {
        let inputs = FsOverlayInputs {
            sample_mask: 0x3,
            depth_bias_constant: 1.5,
            stencil_front_reference: 7,
            stencil_back_reference: 9,
            ..Default::default()
        };

        let rsd = prepare_fs_overlay(MaliArch::Bifrost, &inputs);
        assert_eq!(rsd.sample_mask, 0xffff);
        assert_eq!(rsd.depth_units, 3.0);
        assert_eq!(rsd.stencil_back_reference_value, 7);

        let rsd = prepare_fs_overlay(
            MaliArch::Bifrost,
            &FsOverlayInputs {
                multisample: true,
                back_stencil_enabled: true,
                ..inputs
            },
        );
        assert_eq!(rsd.sample_mask, 0x3);
        assert_eq!(rsd.stencil_back_reference_value, 9);
    }

    #[test]
    fn merged_state_keeps_partial_fields() {
        let partial = RendererState {
            shader_pointer: 0x8000_0000,
            uniform_buffer_count: 3,
            stencil_front_mask: 0xff,
            ..Default::default()
        }
        .to_bytes();
        let overlay = RendererState {
            sample_mask: 0xffff,
            stencil_front_reference_value: 4,
            ..Default::default()
        };

        let rsd = merge_fs_state(MaliArch::Bifrost, &partial, &overlay, true);
        assert_eq!(RendererState::raw(&rsd, "shader_pointer"), Some(0x8000_0000));
        assert_eq!(RendererState::raw(&rsd, "stencil_front_mask"), Some(0xff));
        assert_eq!(
            RendererState::raw(&rsd, "stencil_front_reference_value"),
            Some(4)
        );

        let rsd = merge_fs_state(MaliArch::Bifrost, &partial, &overlay, false);
        assert_eq!(RendererState::raw(&rsd, "shader_pointer"), Some(0));
        assert_eq!(
            RendererState::raw(&rsd, "allow_forward_pixel_to_kill"),
            Some(1)
        );
    }

    #[test]
    fn job_headers() {
        let bytes = JobHeader {
            job_descriptor_size_64: true,
            job_type: JobType::Tiler,
            job_index: 2,
            first_dependency: 1,
            next_job: 0x1000,
            ..Default::default()
        }
        .to_bytes();

        assert_eq!(JobHeader::raw(&bytes, "job_type"), Some(7));
        assert_eq!(JobHeader::raw(&bytes, "job_index"), Some(2));
        assert_eq!(JobHeader::raw(&bytes, "first_dependency"), Some(1));
        assert_eq!(JobHeader::raw(&bytes, "next_job"), Some(0x1000));
    }

    #[test]
    fn blend_descriptor() {
        let bytes = pack_blend(&BlendInputs {
            rt: 2,
            format: Some(Format::R8G8B8A8_SRGB),
            enable: true,
            load_destination: true,
            constant: Some(1.0),
            ..Default::default()
        })
        .to_bytes();

        assert_eq!(Blend::raw(&bytes, "rt"), Some(2));
        assert_eq!(Blend::raw(&bytes, "srgb"), Some(1));
        assert_eq!(Blend::raw(&bytes, "load_destination"), Some(1));
        assert_eq!(Blend::raw(&bytes, "constant"), Some(0xff00));
        assert_eq!(
            Blend::raw(&bytes, "internal_mode"),
            Some(BlendMode::FixedFunction as u64),
        );

        let unbound = pack_blend(&BlendInputs {
            rt: 1,
            enable: true,
            ..Default::default()
        })
        .to_bytes();

        assert_eq!(Blend::raw(&unbound, "enable"), Some(0));
        assert_eq!(Blend::raw(&unbound, "internal_mode"), Some(BlendMode::Off as u64));
    }

    #[test]
    fn viewport_descriptor() {
        let viewport = dynamic_state::Viewport {
            offset: [0.0, 600.0],
            extent: [800.0, -600.0],
            min_depth: 1.0,
            max_depth: 0.25,
        };
        let scissor = Scissor {
            offset: [10, 20],
            extent: [2000, 100],
        };

        let bytes = pack_viewport(&viewport, &scissor).to_bytes();
        let float = |name| f32::from_bits(Viewport::raw(&bytes, name).unwrap() as u32);

        assert_eq!(Viewport::raw(&bytes, "scissor_minimum_x"), Some(10));
        assert_eq!(Viewport::raw(&bytes, "scissor_minimum_y"), Some(20));
        assert_eq!(Viewport::raw(&bytes, "scissor_maximum_x"), Some(799));
        assert_eq!(Viewport::raw(&bytes, "scissor_maximum_y"), Some(119));
        assert_eq!(float("minimum_z"), 0.25);
        assert_eq!(float("maximum_z"), 1.0);
        assert_eq!(float("minimum_x"), f32::NEG_INFINITY);

        let empty = Scissor {
            offset: [10, 10],
            extent: [0, 0],
        };
        let bytes = pack_viewport(&viewport, &empty).to_bytes();

        assert_eq!(Viewport::raw(&bytes, "scissor_minimum_x"), Some(10));
        assert_eq!(Viewport::raw(&bytes, "scissor_maximum_x"), Some(10));
    }

    #[test]
    fn helpers() {
        assert_eq!(tls_size_shift(0), 0);
        assert_eq!(tls_size_shift(16), 0);
        assert_eq!(tls_size_shift(17), 1);
        assert_eq!(tls_size_shift(256), 4);

        assert_eq!(blend_constant(1.0, 8), 0xff00);
        assert_eq!(blend_constant(0.0, 8), 0);
    }

    #[test]
    fn uniform_buffer_entries() {
        let bytes = UniformBuffer {
            entries: 4,
            pointer: 0x1_0000_0100,
        }
        .to_bytes();

        assert_eq!(UniformBuffer::raw(&bytes, "entries"), Some(3));
        assert_eq!(UniformBuffer::raw(&bytes, "pointer"), Some(0x1000_0010));
    }
}
