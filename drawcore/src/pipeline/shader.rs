// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Compiled shaders and the information blob their compiler hands over.
//!
//! Compilation happens outside of this crate. A [`Shader`] is created from the finished machine
//! code plus a [`ShaderInfo`] describing the resources the code uses; the code is uploaded to a
//! GPU-visible BO so that pipelines can point at it.

use crate::{
    device::Device,
    macros::{impl_id_counter, vulkan_enum},
    memory::{Bo, BoFlags, DeviceAlignment},
    DeviceOwned, DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use smallvec::SmallVec;
use std::{num::NonZero, sync::Arc};

vulkan_enum! {
    /// A single shader stage.
    ShaderStage = ShaderStageFlags(u32);

    Vertex = VERTEX,
    TessellationControl = TESSELLATION_CONTROL,
    TessellationEvaluation = TESSELLATION_EVALUATION,
    Geometry = GEOMETRY,
    Fragment = FRAGMENT,
    Compute = COMPUTE,
}

/// The number of 32-bit words of push constants a shader can consume.
pub const MAX_PUSH_WORDS: u32 = 32;

/// Alignment of shader code in GPU memory.
pub const CODE_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(128) };

/// Opaque handle of a type interned by the shader compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub u32);

/// Layout rules used to size an interned type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayoutMode {
    Std140,
    Std430,
    Natural,
    /// Every member padded to a vec4, as used for uniform registers.
    Vec4Padded,
}

/// Computes sizes of compiler-interned types.
pub trait TypeSizeService: Send + Sync {
    /// Returns the size and alignment in bytes of `ty` laid out with `mode`.
    fn size_align(&self, ty: TypeHandle, mode: LayoutMode) -> (u32, u32);
}

/// Lays out a block whose members have the types `members`, in order.
///
/// Returns the offset of every member and the size of the block, rounded up to the largest
/// member alignment. `Std140` additionally rounds the block alignment up to 16 bytes.
pub fn block_layout(
    types: &dyn TypeSizeService,
    members: &[TypeHandle],
    mode: LayoutMode,
) -> (SmallVec<[u32; 8]>, u32) {
    let mut offsets = SmallVec::with_capacity(members.len());
    let mut block_align = if mode == LayoutMode::Std140 { 16 } else { 1 };
    let mut end = 0u32;

    for &member in members {
        let (size, align) = types.size_align(member, mode);
        let align = align.max(1);

        let offset = end.next_multiple_of(align);
        offsets.push(offset);
        end = offset + size;
        block_align = block_align.max(align);
    }

    (offsets, end.next_multiple_of(block_align))
}

/// What a fragment shader does, as far as fixed-function state is concerned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsInfo {
    /// The shader may be killed by a later fragment covering the same pixel.
    pub can_fpk: bool,
    /// Depth and stencil tests may run before the shader.
    pub can_early_z: bool,
    pub can_discard: bool,
    /// The shader has side effects such as image or buffer stores.
    pub sidefx: bool,
    pub writes_depth: bool,
    pub writes_stencil: bool,
    pub reads_point_coord: bool,
    pub reads_face: bool,
    pub reads_frag_coord: bool,
    /// Bit `i` is set if color output `i` is written.
    pub outputs_written: u32,
    pub dual_source_blend: bool,
    pub early_fragment_tests: bool,
    pub coarse_pixel: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VsInfo {
    pub writes_point_size: bool,
    /// The last pre-rasterization stage writes the viewport index.
    pub writes_viewport: bool,
}

/// The primitives a tessellation evaluation shader emits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TessOutput {
    Points,
    Lines,
    TrianglesCw,
    #[default]
    TrianglesCcw,
}

/// Varying slots read and written by a stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Varyings {
    pub input: Vec<u32>,
    pub output: Vec<u32>,
    /// The stage was compiled without knowledge of its neighbours.
    pub separable: bool,
}

/// Push constant words a stage reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushInfo {
    pub count: u32,
    pub words: SmallVec<[u32; 8]>,
}

/// Where a Bifrost blend shader returns to, per render target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlendReturn {
    pub return_offset: u32,
    pub format: u32,
}

/// The information blob of a compiled shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderInfo {
    pub stage: ShaderStage,

    /// The default value is `0`.
    pub work_reg_count: u32,

    /// Thread-local storage in bytes per thread.
    ///
    /// The default value is `0`.
    pub tls_size: u32,

    /// Workgroup-local storage in bytes.
    ///
    /// The default value is `0`.
    pub wls_size: u32,

    pub attribute_count: u32,
    pub ubo_count: u32,
    pub push: PushInfo,
    pub sysvals: Vec<u32>,
    pub varyings: Varyings,
    pub fs: FsInfo,
    pub vs: VsInfo,

    /// The output of a tessellation evaluation shader, with a lower-left domain origin.
    ///
    /// The default value is [`TessOutput::TrianglesCcw`].
    pub tess_output: TessOutput,

    pub bifrost_blend: [BlendReturn; 8],

    /// The type of the push constant block, if the shader declares one.
    pub push_block_type: Option<TypeHandle>,

    /// The workgroup size of a compute shader.
    ///
    /// The default value is `[1; 3]`.
    pub local_size: [u32; 3],
}

impl ShaderInfo {
    /// Returns a `ShaderInfo` for `stage` with everything else empty.
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            work_reg_count: 0,
            tls_size: 0,
            wls_size: 0,
            attribute_count: 0,
            ubo_count: 0,
            push: PushInfo::default(),
            sysvals: Vec::new(),
            varyings: Varyings::default(),
            fs: FsInfo::default(),
            vs: VsInfo::default(),
            tess_output: TessOutput::default(),
            bifrost_blend: [BlendReturn::default(); 8],
            push_block_type: None,
            local_size: [1; 3],
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.push.count > MAX_PUSH_WORDS {
            return Err(Box::new(ValidationError {
                context: "push.count".into(),
                problem: "is greater than the number of push constant words".into(),
                ..Default::default()
            }));
        }

        if self.stage == ShaderStage::Fragment && self.fs.outputs_written > 0xff {
            return Err(Box::new(ValidationError {
                context: "fs.outputs_written".into(),
                problem: "names a color output beyond the eighth".into(),
                ..Default::default()
            }));
        }

        if self.stage == ShaderStage::Compute && self.local_size.contains(&0) {
            return Err(Box::new(ValidationError {
                context: "local_size".into(),
                problem: "contains zero".into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// Parameters to create a new `Shader`.
#[derive(Clone, Debug)]
pub struct ShaderCreateInfo {
    pub info: ShaderInfo,

    /// The machine code.
    pub code: Vec<u8>,

    pub _ne: NonExhaustive,
}

impl ShaderCreateInfo {
    #[inline]
    pub fn new(info: ShaderInfo, code: Vec<u8>) -> Self {
        Self {
            info,
            code,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.code.is_empty() {
            return Err(Box::new(ValidationError {
                context: "code".into(),
                problem: "is empty".into(),
                ..Default::default()
            }));
        }

        self.info
            .validate()
            .map_err(|err| err.add_context("info"))?;

        Ok(())
    }
}

/// Compiled code resident in GPU memory.
#[derive(Debug)]
pub struct Shader {
    device: Arc<Device>,
    id: NonZero<u64>,
    bo: Arc<Bo>,
    info: ShaderInfo,
}

impl Shader {
    /// Uploads a compiled shader.
    pub fn new(
        device: Arc<Device>,
        create_info: ShaderCreateInfo,
    ) -> Result<Arc<Shader>, Validated<VulkanError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        unsafe { Ok(Self::new_unchecked(device, create_info)?) }
    }

    #[doc(hidden)]
    pub unsafe fn new_unchecked(
        device: Arc<Device>,
        create_info: ShaderCreateInfo,
    ) -> Result<Arc<Shader>, VulkanError> {
        let ShaderCreateInfo {
            info,
            code,
            _ne: _,
        } = create_info;

        let bo = Bo::new(
            device.service(),
            code.len() as DeviceSize,
            CODE_ALIGNMENT,
            BoFlags::GART | BoFlags::MAPPED | BoFlags::NO_SHARE,
        )?;
        unsafe { bo.write(0, &code) };

        Ok(Arc::new(Shader {
            device,
            id: Self::next_id(),
            bo,
            info,
        }))
    }

    #[inline]
    pub fn info(&self) -> &ShaderInfo {
        &self.info
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.info.stage
    }

    /// Returns the BO holding the code.
    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Returns the GPU address of the first instruction.
    #[inline]
    pub fn code_addr(&self) -> u64 {
        self.bo.gpu_addr()
    }
}

impl DeviceOwned for Shader {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(Shader);
