// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Materialization of the dirty graphics state into hardware packets.
//!
//! [`CommandBuffer::flush_dynamic_state`] runs before every draw. It walks a fixed sequence of
//! packet groups, and each group is emitted only if one of the state categories it reads is
//! dirty. Packets the pipeline pre-packed a partial for are merged with it: the pipeline owns
//! some fields, the draw owns the rest, and the two sets are disjoint.
//!
//! Viewports, scissors, blend state and color-calc state do not fit in a packet. They are
//! uploaded to the batch pool and the matching `*_POINTERS` packet points at them.
//!
//! Some toggles depend on what the previous flush emitted rather than on the shadow state
//! alone. Those are kept in [`HardwareState`] and only re-emitted when they change.

use super::{
    pool::RecordingResources, CommandBuffer, HardwareState, IndexBufferBinding, RenderArea,
    RenderingState, VertexBufferBinding,
};
use crate::{
    device::Device,
    memory::DeviceAlignment,
    pack::{
        gen::{self, prim},
        merge, packet_header,
    },
    pipeline::{
        dynamic_state::{
            optimize_depth_stencil, ColorBlendState, DepthBiasRepresentation, DirtySet,
            DynamicGraphicsState, DynamicState as S, OptimizedDepthStencil, SampleLocations,
            Scissor, VertexInputAttribute, Viewport, MAX_VERTEX_ATTRIBUTES,
        },
        shader::{FsInfo, ShaderStage, TessOutput},
        state::{
            BlendOp, ColorComponents, ConservativeRasterizationMode,
            FragmentShadingRateCombinerOp, IndexType, LineRasterizationMode, PolygonMode,
            PrimitiveTopology, TessellationDomainOrigin,
        },
        GraphicsPipeline,
    },
    DeviceOwned, VulkanError,
};
use smallvec::SmallVec;

const STATE_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(64) };
const CC_VIEWPORT_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(32) };

/// The largest framebuffer extent.
const FB_SIZE_MAX: i64 = 1 << 14;

/// The largest coordinate a scissor rectangle can hold.
const SCISSOR_MAX: i64 = (i16::MAX >> 1) as i64;

const CS_CHICKEN1: u32 = 0x2580;
const REPLAY_MODE_MIDCMDBUFFER_DISABLED: u32 = 1;
const REPLAY_MODE_MASK: u32 = 1 << 16;

/// Line width below which rectangular lines are still rasterized as MSAA lines on Gen9.
const GEN9_WIDE_LINE_THRESHOLD: f32 = 1.0078125;

const SAMPLE_POSITIONS_1X: [[f32; 2]; 1] = [[0.5, 0.5]];
const SAMPLE_POSITIONS_2X: [[f32; 2]; 2] = [[0.75, 0.75], [0.25, 0.25]];
const SAMPLE_POSITIONS_4X: [[f32; 2]; 4] = [
    [0.375, 0.125],
    [0.875, 0.375],
    [0.125, 0.625],
    [0.625, 0.875],
];
const SAMPLE_POSITIONS_8X: [[f32; 2]; 8] = [
    [0.5625, 0.3125],
    [0.4375, 0.6875],
    [0.8125, 0.5625],
    [0.3125, 0.1875],
    [0.1875, 0.8125],
    [0.0625, 0.4375],
    [0.6875, 0.9375],
    [0.9375, 0.0625],
];
const SAMPLE_POSITIONS_16X: [[f32; 2]; 16] = [
    [0.5625, 0.5625],
    [0.4375, 0.3125],
    [0.3125, 0.625],
    [0.75, 0.4375],
    [0.1875, 0.375],
    [0.625, 0.8125],
    [0.8125, 0.6875],
    [0.6875, 0.1875],
    [0.375, 0.875],
    [0.5, 0.0625],
    [0.25, 0.125],
    [0.125, 0.75],
    [0.0, 0.5],
    [0.9375, 0.25],
    [0.875, 0.9375],
    [0.0625, 0.0],
];

impl CommandBuffer {
    /// Emits the packets of every dirty state category, then clears the dirty set.
    ///
    /// Does nothing if no graphics pipeline is bound.
    pub(crate) fn flush_dynamic_state(&mut self) -> Result<(), VulkanError> {
        let Some(pipeline) = self.graphics_pipeline.clone() else {
            return Ok(());
        };

        let mut flush = Flush {
            device: self.pool.device(),
            pipeline: &pipeline,
            state: self.dynamic.state(),
            rendering: self.rendering.as_ref(),
            index_buffer: self.index_buffer,
            vertex_buffers: &self.vertex_buffers,
            occlusion_queries: self.occlusion_queries,
            resources: &mut *self.resources,
            hw: &mut self.hw,
            dirty: self.dynamic.dirty(),
        };

        flush.run()?;
        self.dynamic.clear_dirty();

        Ok(())
    }
}

/// The parts of a command buffer one flush reads and writes.
struct Flush<'a> {
    device: &'a Device,
    pipeline: &'a GraphicsPipeline,
    state: &'a DynamicGraphicsState,
    rendering: Option<&'a RenderingState>,
    index_buffer: Option<IndexBufferBinding>,
    vertex_buffers: &'a [Option<VertexBufferBinding>; MAX_VERTEX_ATTRIBUTES],
    occlusion_queries: u32,
    resources: &'a mut RecordingResources,
    hw: &'a mut HardwareState,
    dirty: DirtySet,
}

impl Flush<'_> {
    fn run(&mut self) -> Result<(), VulkanError> {
        self.emit_clip()?;
        self.emit_streamout()?;
        self.emit_viewports()?;
        self.emit_vertex_input()?;
        self.emit_te()?;
        self.emit_gs()?;
        self.emit_shading_rate()?;
        self.emit_sf()?;
        self.emit_raster()?;
        self.emit_sample_mask()?;
        self.emit_depth_stencil()?;
        self.emit_depth_bounds()?;
        self.emit_index_state()?;
        self.emit_sample_pattern()?;
        self.emit_wm()?;
        self.emit_blend()?;
        self.emit_color_calc()
    }

    #[inline]
    fn gfx_version(&self) -> u32 {
        self.device.properties().gfx_version
    }

    /// The sample count the rasterizer runs at.
    fn samples(&self) -> u32 {
        let rasterization_samples = self.state.multisample.rasterization_samples;

        self.rendering
            .map_or(rasterization_samples, |rendering| {
                rendering.samples.max(rasterization_samples)
            })
    }

    fn emit<R: crate::pack::PackRecord>(&mut self, record: &R) -> Result<(), VulkanError> {
        self.resources.stream.emit_record(record)
    }

    /// Emits the pipeline's `partial` of a packet with `overlay` merged in.
    fn emit_merged<const N: usize>(
        &mut self,
        partial: &[u8; N],
        overlay: [u8; N],
    ) -> Result<(), VulkanError> {
        let mut bytes = *partial;
        merge(&mut bytes, &overlay);

        let dwords: SmallVec<[u32; 16]> = bytes
            .chunks_exact(4)
            .map(|dw| u32::from_le_bytes([dw[0], dw[1], dw[2], dw[3]]))
            .collect();

        self.resources.stream.emit(&dwords)
    }

    fn emit_clip(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::PrimitiveTopology,
            S::DepthClipNegativeOneToOne,
            S::ViewportCount,
            S::PolygonMode,
            S::ProvokingVertexMode,
        ]) {
            return Ok(());
        }

        let (pipeline, state) = (self.pipeline, self.state);
        let (tri, line, fan) = gen::provoking_vertex_selects(state.rasterization.provoking_vertex);
        let writes_viewport = pipeline
            .stages()
            .iter()
            .filter(|shader| shader.stage() != ShaderStage::Fragment)
            .any(|shader| shader.info().vs.writes_viewport);

        let overlay = gen::Clip {
            api_mode: if state.viewport.depth_clip_negative_one_to_one {
                gen::ClipApiMode::Ogl
            } else {
                gen::ClipApiMode::D3d
            },
            viewport_xy_clip_test_enable: raster_polygon_mode(pipeline, state) == PolygonMode::Fill,
            triangle_strip_list_provoking_vertex_select: tri,
            line_strip_list_provoking_vertex_select: line,
            triangle_fan_provoking_vertex_select: fan,
            maximum_vp_index: if writes_viewport {
                state.viewport.viewport_count.saturating_sub(1)
            } else {
                0
            },
            ..Default::default()
        };

        self.emit_merged(&pipeline.partial_records().clip, overlay.to_bytes())
    }

    fn emit_streamout(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::TransformFeedback,
            S::RasterizerDiscardEnable,
            S::RasterizationStream,
            S::ProvokingVertexMode,
            S::OcclusionQueries,
        ]) {
            return Ok(());
        }

        let pipeline = self.pipeline;

        // Mid-command-buffer preemption corrupts transform feedback on some parts.
        if self.device.properties().needs_preemption_toggle {
            let disable = pipeline.uses_transform_feedback();

            if disable != self.hw.preemption_disabled {
                self.set_preemption(!disable)?;
            }
        }

        let rs = &self.state.rasterization;
        let overlay = gen::Streamout {
            rendering_disable: rs.rasterizer_discard_enable,
            render_stream_select: rs.rasterization_stream,
            reorder_mode: gen::reorder_mode(rs.provoking_vertex),
            force_rendering: if !rs.rasterizer_discard_enable && self.occlusion_queries > 0 {
                gen::ForceRendering::ForceOn
            } else {
                gen::ForceRendering::Normal
            },
            ..Default::default()
        };

        self.emit_merged(&pipeline.partial_records().streamout, overlay.to_bytes())
    }

    fn set_preemption(&mut self, enable: bool) -> Result<(), VulkanError> {
        self.emit(&gen::PipeControl {
            command_streamer_stall_enable: true,
            ..Default::default()
        })?;
        self.emit(&gen::MiLoadRegisterImm {
            register_offset: CS_CHICKEN1,
            data_dword: REPLAY_MODE_MASK
                | if enable {
                    0
                } else {
                    REPLAY_MODE_MIDCMDBUFFER_DISABLED
                },
        })?;
        self.hw.preemption_disabled = !enable;

        log::trace!("mid-command-buffer preemption {}", if enable { "enabled" } else { "disabled" });

        Ok(())
    }

    fn emit_viewports(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::RenderTargets,
            S::ViewportCount,
            S::Viewports,
            S::ScissorCount,
            S::Scissors,
            S::DepthClampEnable,
            S::DepthClipNegativeOneToOne,
        ]) {
            return Ok(());
        }

        let state = self.state;
        let vp = &state.viewport;
        let area = self.rendering.and_then(|rendering| rendering.area);
        let count = vp.viewport_count as usize;

        if count > 0 {
            let mut sf_clip = Vec::with_capacity(count * 64);
            let mut cc = Vec::with_capacity(count * 8);

            for (i, viewport) in vp.viewports[..count].iter().enumerate() {
                let scissor = (i < vp.scissor_count as usize).then(|| &vp.scissors[i]);

                sf_clip.extend_from_slice(
                    &sf_clip_viewport(viewport, vp.depth_clip_negative_one_to_one, area, scissor)
                        .to_bytes(),
                );
                cc.extend_from_slice(
                    &cc_viewport(viewport, state.rasterization.depth_clamp_enable).to_bytes(),
                );
            }

            let sf_clip_viewport_pointer = self.resources.upload(&sf_clip, STATE_ALIGNMENT)?;
            self.emit(&gen::ViewportStatePointersSfClip {
                sf_clip_viewport_pointer,
            })?;

            let cc_viewport_pointer = self.resources.upload(&cc, CC_VIEWPORT_ALIGNMENT)?;
            self.emit(&gen::ViewportStatePointersCc {
                cc_viewport_pointer,
            })?;
        }

        let scissor_count = vp.scissor_count as usize;

        if scissor_count > 0 {
            let mut rects = Vec::with_capacity(scissor_count * 8);

            for (scissor, viewport) in vp.scissors[..scissor_count].iter().zip(&vp.viewports) {
                rects.extend_from_slice(&scissor_rect(scissor, viewport, area).to_bytes());
            }

            let scissor_rect_pointer = self.resources.upload(&rects, STATE_ALIGNMENT)?;
            self.emit(&gen::ScissorStatePointers {
                scissor_rect_pointer,
            })?;
        }

        Ok(())
    }

    fn emit_vertex_input(&mut self) -> Result<(), VulkanError> {
        let (pipeline, state) = (self.pipeline, self.state);

        if self
            .dirty
            .any(&[S::Pipeline, S::PrimitiveTopology, S::PatchControlPoints])
        {
            self.emit(&gen::VfTopology {
                primitive_topology_type: hw_topology(pipeline, state),
            })?;
        }

        if self.dirty.any(&[S::Pipeline, S::VertexInput]) {
            let db = self.device.format_database();
            let mut elements: SmallVec<[gen::VertexElementState; 16]> = state
                .vertex_input
                .active_attributes()
                .map(|(_, attribute)| {
                    vertex_element(attribute, db.hw_format(attribute.format).unwrap_or(0))
                })
                .collect();

            if elements.is_empty() {
                elements.push(gen::empty_vertex_element());
            }

            let mut dwords = Vec::with_capacity(1 + 2 * elements.len());
            dwords.push(packet_header(
                gen::VERTEX_ELEMENTS_HEADER,
                1 + 2 * elements.len() as u32,
            ));
            for element in &elements {
                dwords.extend(dwords_of(&element.to_bytes()));
            }

            self.resources.stream.emit(&dwords)?;
        }

        if self
            .dirty
            .any(&[S::Pipeline, S::VertexBuffers, S::VertexInputBindingStrides])
        {
            let mut dwords = vec![0];

            for (index, binding) in self.vertex_buffers.iter().enumerate() {
                let Some(binding) = binding else {
                    continue;
                };

                let vb = gen::VertexBufferState {
                    vertex_buffer_index: index as u32,
                    address_modify_enable: true,
                    null_vertex_buffer: false,
                    buffer_pitch: state.vertex_binding_strides[index],
                    buffer_starting_address: binding.address,
                    buffer_size: binding.size,
                };
                dwords.extend(dwords_of(&vb.to_bytes()));
            }

            if dwords.len() > 1 {
                dwords[0] = packet_header(gen::VERTEX_BUFFERS_HEADER, dwords.len() as u32);
                self.resources.stream.emit(&dwords)?;
            }
        }

        Ok(())
    }

    fn emit_te(&mut self) -> Result<(), VulkanError> {
        if !self
            .dirty
            .any(&[S::Pipeline, S::TessellationDomainOrigin])
        {
            return Ok(());
        }

        let pipeline = self.pipeline;
        let overlay = match pipeline.stage(ShaderStage::TessellationEvaluation) {
            Some(tes) => gen::Te {
                output_topology: te_output_topology(
                    tes.info().tess_output,
                    self.state.tessellation.domain_origin,
                ),
                ..Default::default()
            },
            None => gen::Te::default(),
        };

        self.emit_merged(&pipeline.partial_records().te, overlay.to_bytes())
    }

    fn emit_gs(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[S::Pipeline, S::ProvokingVertexMode]) {
            return Ok(());
        }

        let pipeline = self.pipeline;

        if !pipeline.has_geometry() {
            return self.emit(&gen::Gs::default());
        }

        let overlay = gen::Gs {
            reorder_mode: gen::reorder_mode(self.state.rasterization.provoking_vertex),
            ..Default::default()
        };

        self.emit_merged(&pipeline.partial_records().gs, overlay.to_bytes())
    }

    fn emit_shading_rate(&mut self) -> Result<(), VulkanError> {
        let gfx_version = self.gfx_version();

        if !self.device.properties().fragment_shading_rate
            || gfx_version < 110
            || !self.dirty.any(&[S::Pipeline, S::FragmentShadingRate])
        {
            return Ok(());
        }

        let state = self.state;
        let fsr = &state.fragment_shading_rate;
        let enabled = self.pipeline.fs_info().is_some_and(|fs| fs.coarse_pixel);
        let (mode, [size_x, size_y]) = if enabled {
            (gen::CpsMode::Constant, fsr.fragment_size)
        } else {
            (gen::CpsMode::None, [0; 2])
        };

        if gfx_version < 120 {
            return self.emit(&gen::Cps {
                coarse_pixel_shading_mode: mode,
                min_cp_size_x: size_x,
                min_cp_size_y: size_y,
            });
        }

        // The CPS state array must not change under a running pixel shader.
        self.emit(&gen::PipeControl {
            pss_stall_sync_enable: true,
            ..Default::default()
        })?;

        let entry = gen::CpsState {
            coarse_pixel_shading_mode: mode,
            combiner0_op: combiner_op(fsr.combiner_ops[0]),
            combiner1_op: combiner_op(fsr.combiner_ops[1]),
            min_cp_size_x: size_x,
            min_cp_size_y: size_y,
        }
        .to_bytes();

        let coarse_pixel_shading_state_array_pointer = self
            .resources
            .upload(&entry.repeat(gen::MAX_VIEWPORTS), CC_VIEWPORT_ALIGNMENT)?;

        self.emit(&gen::CpsPointers {
            coarse_pixel_shading_state_array_pointer,
        })
    }

    fn emit_sf(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::LineWidth,
            S::ProvokingVertexMode,
            S::DepthBias,
        ]) {
            return Ok(());
        }

        let pipeline = self.pipeline;
        let rs = &self.state.rasterization;
        let (tri, line, fan) = gen::provoking_vertex_selects(rs.provoking_vertex);
        let overlay = gen::Sf {
            line_width: rs.line.width,
            legacy_global_depth_bias_enable: rs.depth_bias.representation
                == DepthBiasRepresentation::Float,
            triangle_strip_list_provoking_vertex_select: tri,
            line_strip_list_provoking_vertex_select: line,
            triangle_fan_provoking_vertex_select: fan,
            ..Default::default()
        };

        self.emit_merged(&pipeline.partial_records().sf, overlay.to_bytes())
    }

    fn emit_raster(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::PrimitiveTopology,
            S::CullMode,
            S::FrontFace,
            S::DepthBiasEnable,
            S::DepthBias,
            S::PolygonMode,
            S::LineRasterizationMode,
            S::LineWidth,
            S::DepthClipEnable,
            S::DepthClampEnable,
            S::ConservativeRasterizationMode,
            S::RasterizationSamples,
            S::RenderTargets,
        ]) {
            return Ok(());
        }

        let (pipeline, state) = (self.pipeline, self.state);
        let rs = &state.rasterization;
        let gfx_version = self.gfx_version();
        let samples = self.samples();
        let polygon_mode = raster_polygon_mode(pipeline, state);
        let line_mode = effective_line_mode(rs.line.mode, samples);
        let (api_mode, msaa_enable) =
            rasterization_mode(polygon_mode, line_mode, rs.line.width, gfx_version);
        let has_integer_rt = self
            .rendering
            .is_some_and(RenderingState::has_integer_rt);
        let depth_clip = rs.depth_clip_enabled();
        let bias = rs.depth_bias_enable;

        let overlay = gen::Raster {
            viewport_z_far_clip_test_enable: depth_clip,
            conservative_rasterization_enable: rs.conservative_mode
                != ConservativeRasterizationMode::Disabled,
            api_mode,
            front_winding: rs.front_face.into(),
            cull_mode: rs.cull_mode.into(),
            dx_multisample_rasterization_enable: msaa_enable,
            global_depth_offset_enable_solid: bias,
            global_depth_offset_enable_wireframe: bias,
            global_depth_offset_enable_point: bias,
            front_face_fill_mode: rs.polygon_mode.into(),
            back_face_fill_mode: rs.polygon_mode.into(),
            antialiasing_enable: antialiasing_enable(
                polygon_mode,
                line_mode,
                has_integer_rt,
                samples,
                gfx_version,
            ),
            viewport_z_near_clip_test_enable: depth_clip,
            global_depth_offset_constant: rs.depth_bias.constant_factor,
            global_depth_offset_scale: rs.depth_bias.slope_factor,
            global_depth_offset_clamp: rs.depth_bias.clamp,
            ..Default::default()
        };

        self.emit_merged(&pipeline.partial_records().raster, overlay.to_bytes())
    }

    fn emit_sample_mask(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[S::Pipeline, S::SampleMask]) {
            return Ok(());
        }

        self.emit(&gen::SampleMask {
            sample_mask: self.state.multisample.sample_mask & 0xffff,
        })
    }

    fn emit_depth_stencil(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::RenderTargets,
            S::DepthTestEnable,
            S::DepthWriteEnable,
            S::DepthCompareOp,
            S::StencilTestEnable,
            S::StencilOp,
            S::StencilCompareMask,
            S::StencilWriteMask,
            S::StencilReference,
            S::AlphaToCoverageEnable,
        ]) {
            return Ok(());
        }

        let has_depth = self.rendering.is_some_and(RenderingState::has_depth);
        let has_stencil = self.rendering.is_some_and(RenderingState::has_stencil);
        let optimized = optimize_depth_stencil(&self.state.depth_stencil, has_depth, has_stencil);

        self.emit(&wm_depth_stencil(&optimized))?;

        if self.device.properties().needs_ds_write_stall {
            let writes = optimized.depth_write_enable || optimized.stencil_write_enable;
            let wrote = self.hw.depth_write_enable || self.hw.stencil_write_enable;

            if writes != wrote {
                self.emit(&gen::PipeControl {
                    pss_stall_sync_enable: true,
                    ..Default::default()
                })?;
            }
        }

        self.hw.depth_write_enable = optimized.depth_write_enable;
        self.hw.stencil_write_enable = optimized.stencil_write_enable;

        let pma_fix = wants_pma_fix(
            self.gfx_version(),
            has_depth,
            self.pipeline.fs_info(),
            &optimized,
            self.state.multisample.alpha_to_coverage_enable,
        );

        self.set_pma_fix(pma_fix)
    }

    /// Toggles the stencil PMA optimization, flushing the depth caches around the change.
    fn set_pma_fix(&mut self, enable: bool) -> Result<(), VulkanError> {
        if self.hw.pma_fix_enabled == enable {
            return Ok(());
        }

        self.hw.pma_fix_enabled = enable;
        let tile_cache_flush_enable = self.gfx_version() >= 120;

        self.emit(&gen::PipeControl {
            depth_cache_flush_enable: true,
            command_streamer_stall_enable: true,
            render_target_cache_flush_enable: true,
            tile_cache_flush_enable,
            ..Default::default()
        })?;

        let cache_mode = gen::CacheMode0 {
            stc_pma_optimization_enable: enable,
            stc_pma_optimization_enable_mask: true,
        }
        .to_bytes();

        self.emit(&gen::MiLoadRegisterImm {
            register_offset: gen::CACHE_MODE_0_NUM,
            data_dword: u32::from_le_bytes(cache_mode),
        })?;

        self.emit(&gen::PipeControl {
            depth_stall_enable: true,
            depth_cache_flush_enable: true,
            render_target_cache_flush_enable: true,
            tile_cache_flush_enable,
            ..Default::default()
        })?;

        log::trace!("stencil PMA fix {}", if enable { "enabled" } else { "disabled" });

        Ok(())
    }

    fn emit_depth_bounds(&mut self) -> Result<(), VulkanError> {
        if self.gfx_version() < 120
            || !self
                .dirty
                .any(&[S::Pipeline, S::DepthBoundsTestEnable, S::DepthBounds])
        {
            return Ok(());
        }

        let state = self.state;
        let depth = &state.depth_stencil.depth;
        let (min, max) = if depth.bounds_test_enable {
            (depth.bounds.min, depth.bounds.max)
        } else {
            (0.0, 1.0)
        };

        self.emit(&gen::DepthBounds {
            depth_bounds_test_enable: depth.bounds_test_enable,
            depth_bounds_test_min_value: min,
            depth_bounds_test_max_value: max,
        })
    }

    fn emit_index_state(&mut self) -> Result<(), VulkanError> {
        let state = self.state;

        if self.dirty.contains(S::LineStipple) {
            let stipple = &state.rasterization.line.stipple;
            let factor = stipple.factor.max(1);

            self.emit(&gen::LineStipple {
                line_stipple_pattern: u32::from(stipple.pattern),
                line_stipple_inverse_repeat_count: 1.0 / factor as f32,
                line_stipple_repeat_count: factor,
                ..Default::default()
            })?;
        }

        if self
            .dirty
            .any(&[S::Pipeline, S::IndexBuffer, S::PrimitiveRestartEnable])
        {
            let index_type = self
                .index_buffer
                .map_or(IndexType::U32, |binding| binding.index_type);

            self.emit(&gen::Vf {
                indexed_draw_cut_index_enable: state.input_assembly.primitive_restart_enable,
                cut_index: index_type.restart_index(),
            })?;
        }

        if self.dirty.contains(S::IndexBuffer) {
            if let Some(binding) = self.index_buffer {
                self.emit(&gen::IndexBuffer {
                    index_format: index_format(binding.index_type),
                    buffer_starting_address: binding.address,
                    buffer_size: binding.size,
                    ..Default::default()
                })?;
            }
        }

        Ok(())
    }

    fn emit_sample_pattern(&mut self) -> Result<(), VulkanError> {
        if !self.device.properties().sample_locations
            || !self
                .dirty
                .any(&[S::SampleLocations, S::SampleLocationsEnable])
        {
            return Ok(());
        }

        let state = self.state;
        let ms = &state.multisample;
        let custom = ms.sample_locations_enable.then_some(&ms.sample_locations);

        self.emit(&sample_pattern(custom))
    }

    fn emit_wm(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::ColorWriteEnable,
            S::ColorWriteMask,
            S::ColorAttachmentCount,
            S::LineStippleEnable,
        ]) {
            return Ok(());
        }

        let (pipeline, state) = (self.pipeline, self.state);

        // A shader with side effects must run even if no color is written.
        let force = pipeline.fs_info().is_some()
            && (pipeline.force_fragment_thread_dispatch()
                || state.color_blend.all_writes_masked());

        let overlay = gen::Wm {
            force_thread_dispatch_enable: if force {
                gen::ForceThreadDispatch::ForceOn
            } else {
                gen::ForceThreadDispatch::Normal
            },
            line_stipple_enable: state.rasterization.line.stipple_enable,
            ..Default::default()
        };

        self.emit_merged(&pipeline.partial_records().wm, overlay.to_bytes())
    }

    fn emit_blend(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.any(&[
            S::Pipeline,
            S::RenderTargets,
            S::LogicOp,
            S::LogicOpEnable,
            S::ColorWriteEnable,
            S::ColorAttachmentCount,
            S::AlphaToOneEnable,
            S::AlphaToCoverageEnable,
            S::ColorWriteMask,
            S::ColorBlendEnable,
            S::ColorBlendEquation,
            S::RasterizationSamples,
        ]) {
            return Ok(());
        }

        let (pipeline, state) = (self.pipeline, self.state);
        let cb = &state.color_blend;
        let ms = &state.multisample;
        let fs = pipeline.fs_info();
        let zero_factor_erratum = self.device.properties().has_msaa_zero_factor_erratum
            && ms.rasterization_samples > 1;
        let table = blend_entries(
            cb,
            fs.map_or(true, |fs| fs.dual_source_blend),
            zero_factor_erratum,
        );

        let header = gen::BlendState {
            alpha_to_coverage_enable: ms.alpha_to_coverage_enable,
            independent_alpha_blend_enable: table.independent_alpha,
            alpha_to_one_enable: ms.alpha_to_one_enable,
            ..Default::default()
        };

        let mut bytes = Vec::with_capacity(4 + 8 * gen::MAX_RTS);
        bytes.extend_from_slice(&header.to_bytes());

        for entry in &table.entries {
            bytes.extend_from_slice(&entry.to_bytes());
        }

        let blend_state_pointer = self.resources.upload(&bytes, STATE_ALIGNMENT)?;

        let enabled_rts = u32::from(cb.color_write_enables) & ((1 << cb.attachment_count) - 1);
        let first = &table.entries[0];

        self.emit(&gen::PsBlend {
            alpha_to_coverage_enable: ms.alpha_to_coverage_enable,
            has_writeable_rt: fs.is_some() && enabled_rts != 0,
            color_buffer_blend_enable: first.color_buffer_blend_enable,
            source_alpha_blend_factor: first.source_alpha_blend_factor,
            destination_alpha_blend_factor: first.destination_alpha_blend_factor,
            source_blend_factor: first.source_blend_factor,
            destination_blend_factor: first.destination_blend_factor,
            alpha_test_enable: false,
            independent_alpha_blend_enable: table.independent_alpha,
        })?;
        self.emit(&gen::BlendStatePointers {
            blend_state_pointer_valid: true,
            blend_state_pointer,
        })?;

        // The rewritten factors read the blend constants, which must now hold zeroes.
        if (table.color_zero, table.alpha_zero)
            != (self.hw.color_blend_zero, self.hw.alpha_blend_zero)
        {
            self.hw.color_blend_zero = table.color_zero;
            self.hw.alpha_blend_zero = table.alpha_zero;
            self.dirty.insert(S::BlendConstants);
        }

        Ok(())
    }

    fn emit_color_calc(&mut self) -> Result<(), VulkanError> {
        if !self.dirty.contains(S::BlendConstants) {
            return Ok(());
        }

        let cc = color_calc_state(
            self.state.color_blend.blend_constants,
            self.hw.color_blend_zero,
            self.hw.alpha_blend_zero,
        );
        let color_calc_state_pointer = self.resources.upload(&cc.to_bytes(), STATE_ALIGNMENT)?;

        self.emit(&gen::CcStatePointers {
            color_calc_state_pointer_valid: true,
            color_calc_state_pointer,
        })
    }
}

/// Returns the hardware topology `pipeline` draws with under `state`.
pub(super) fn hw_topology(pipeline: &GraphicsPipeline, state: &DynamicGraphicsState) -> u32 {
    if pipeline.has_tessellation() {
        prim::patchlist(state.tessellation.patch_control_points.max(1))
    } else {
        gen::primitive_topology(
            state.input_assembly.topology,
            state.tessellation.patch_control_points,
        )
    }
}

/// Returns the polygon mode primitives reach the rasterizer with. Points and lines coming out
/// of the input assembler or the tessellator are not affected by the API polygon mode.
fn raster_polygon_mode(pipeline: &GraphicsPipeline, state: &DynamicGraphicsState) -> PolygonMode {
    if let Some(tes) = pipeline.stage(ShaderStage::TessellationEvaluation) {
        return match tes.info().tess_output {
            TessOutput::Points => PolygonMode::Point,
            TessOutput::Lines => PolygonMode::Line,
            TessOutput::TrianglesCw | TessOutput::TrianglesCcw => state.rasterization.polygon_mode,
        };
    }

    match state.input_assembly.topology {
        PrimitiveTopology::PointList => PolygonMode::Point,
        PrimitiveTopology::LineList
        | PrimitiveTopology::LineStrip
        | PrimitiveTopology::LineListWithAdjacency
        | PrimitiveTopology::LineStripWithAdjacency => PolygonMode::Line,
        _ => state.rasterization.polygon_mode,
    }
}

fn effective_line_mode(mode: LineRasterizationMode, samples: u32) -> LineRasterizationMode {
    match mode {
        LineRasterizationMode::Default if samples > 1 => LineRasterizationMode::Rectangular,
        LineRasterizationMode::Default => LineRasterizationMode::Bresenham,
        mode => mode,
    }
}

/// Returns the rasterizer API mode and whether MSAA rasterization is enabled.
fn rasterization_mode(
    polygon_mode: PolygonMode,
    line_mode: LineRasterizationMode,
    line_width: f32,
    gfx_version: u32,
) -> (gen::RasterApiMode, bool) {
    if polygon_mode != PolygonMode::Line {
        return (gen::RasterApiMode::Dx101, true);
    }

    match line_mode {
        LineRasterizationMode::Rectangular => {
            // Gen9 draws wide MSAA lines with the wrong width.
            let msaa = gfx_version > 90 || line_width < GEN9_WIDE_LINE_THRESHOLD;

            (gen::RasterApiMode::Dx101, msaa)
        }
        _ => (gen::RasterApiMode::Dx9Ogl, false),
    }
}

/// Smooth lines are antialiased unless the target cannot hold coverage.
fn antialiasing_enable(
    polygon_mode: PolygonMode,
    line_mode: LineRasterizationMode,
    has_integer_rt: bool,
    samples: u32,
    gfx_version: u32,
) -> bool {
    polygon_mode == PolygonMode::Line
        && line_mode == LineRasterizationMode::RectangularSmooth
        && !has_integer_rt
        && !(gfx_version >= 120 && samples > 1)
}

/// Builds the clip and viewport transform of `viewport`.
///
/// The guardband is narrowed to the region that can actually be rendered to: the render area
/// if it is known, intersected with `scissor`.
pub(super) fn sf_clip_viewport(
    viewport: &Viewport,
    negative_one_to_one: bool,
    area: Option<RenderArea>,
    scissor: Option<&Scissor>,
) -> gen::SfClipViewport {
    let [x, y] = viewport.offset;
    let [width, height] = viewport.extent;
    let (min_depth, max_depth) = (viewport.min_depth, viewport.max_depth);
    let scale = if negative_one_to_one { 0.5 } else { 1.0 };

    let mut sfv = gen::SfClipViewport {
        viewport_matrix_element_m00: width / 2.0,
        viewport_matrix_element_m11: height / 2.0,
        viewport_matrix_element_m22: (max_depth - min_depth) * scale,
        viewport_matrix_element_m30: x + width / 2.0,
        viewport_matrix_element_m31: y + height / 2.0,
        viewport_matrix_element_m32: if negative_one_to_one {
            (min_depth + max_depth) * scale
        } else {
            min_depth
        },
        x_min_clip_guardband: -1.0,
        x_max_clip_guardband: 1.0,
        y_min_clip_guardband: -1.0,
        y_max_clip_guardband: 1.0,
        x_min_viewport: x,
        x_max_viewport: x + width - 1.0,
        y_min_viewport: y.min(y + height),
        y_max_viewport: y.max(y + height) - 1.0,
    };

    let (mut x_min, mut x_max, mut y_min, mut y_max) = (0, FB_SIZE_MAX, 0, FB_SIZE_MAX);

    if let Some(area) = area.filter(|area| area.extent[0] > 0 && area.extent[1] > 0) {
        let [ax, ay] = area.offset.map(i64::from);
        let [aw, ah] = area.extent.map(i64::from);

        x_min = x_min.max(ax);
        x_max = x_max.min(ax + aw);
        y_min = y_min.max(ay);
        y_max = y_max.min(ay + ah);
    }

    if let Some(scissor) = scissor {
        let [sx, sy] = scissor.offset.map(i64::from);
        let [sw, sh] = scissor.extent.map(i64::from);

        x_min = x_min.max(sx);
        x_max = x_max.min(sx + sw);
        y_min = y_min.max(sy);
        y_max = y_max.min(sy + sh);
    }

    if x_min > 0 || y_min > 0 || x_max < FB_SIZE_MAX || y_max < FB_SIZE_MAX {
        let (gx_min, gx_max, gy_min, gy_max) = gen::guardband(
            x_min as f32,
            x_max as f32,
            y_min as f32,
            y_max as f32,
            sfv.viewport_matrix_element_m00,
            sfv.viewport_matrix_element_m11,
            sfv.viewport_matrix_element_m30,
            sfv.viewport_matrix_element_m31,
        );

        sfv.x_min_clip_guardband = gx_min;
        sfv.x_max_clip_guardband = gx_max;
        sfv.y_min_clip_guardband = gy_min;
        sfv.y_max_clip_guardband = gy_max;
    }

    sfv
}

/// Builds the depth range of `viewport`. Without depth clamping the range is left open.
pub(super) fn cc_viewport(viewport: &Viewport, depth_clamp: bool) -> gen::CcViewport {
    if depth_clamp {
        gen::CcViewport {
            minimum_depth: viewport.min_depth.min(viewport.max_depth),
            maximum_depth: viewport.min_depth.max(viewport.max_depth),
        }
    } else {
        gen::CcViewport {
            minimum_depth: 0.0,
            maximum_depth: 1.0,
        }
    }
}

/// Builds the scissor rectangle of `scissor` clipped to `viewport`, and to the render area when
/// it is known.
pub(super) fn scissor_rect(
    scissor: &Scissor,
    viewport: &Viewport,
    area: Option<RenderArea>,
) -> gen::ScissorRect {
    // Inverted, so that nothing passes.
    const EMPTY: gen::ScissorRect = gen::ScissorRect {
        scissor_rectangle_y_min: 1,
        scissor_rectangle_x_min: 1,
        scissor_rectangle_y_max: 0,
        scissor_rectangle_x_max: 0,
    };

    if scissor.extent.contains(&0) {
        return EMPTY;
    }

    let [vx, vy] = viewport.offset;
    let [vw, vh] = viewport.extent;
    let [sx, sy] = scissor.offset.map(i64::from);
    let [sw, sh] = scissor.extent.map(i64::from);

    let mut x_min = sx.max(vx as i64);
    let mut y_min = sy.max(vy.min(vy + vh) as i64);
    let mut x_max = (sx + sw - 1).min((vx + vw) as i64 - 1).clamp(0, SCISSOR_MAX);
    let mut y_max = (sy + sh - 1)
        .min(vy.max(vy + vh) as i64 - 1)
        .clamp(0, SCISSOR_MAX);

    if let Some(area) = area {
        let [ax, ay] = area.offset.map(i64::from);
        let [aw, ah] = area.extent.map(i64::from);

        x_min = x_min.max(ax);
        y_min = y_min.max(ay);
        x_max = x_max.min(ax + aw - 1).max(0);
        y_max = y_max.min(ay + ah - 1).max(0);
    }

    let coord = |v: i64| v.clamp(0, i64::from(u16::MAX)) as u32;

    gen::ScissorRect {
        scissor_rectangle_y_min: coord(y_min),
        scissor_rectangle_x_min: coord(x_min),
        scissor_rectangle_y_max: coord(y_max),
        scissor_rectangle_x_max: coord(x_max),
    }
}

fn vertex_element(attribute: &VertexInputAttribute, hw_format: u32) -> gen::VertexElementState {
    let components = attribute.format.components();
    let control = |i: usize| {
        if components[i] > 0 {
            gen::ComponentControl::StoreSrc
        } else if i == 3 {
            gen::ComponentControl::Store1Fp
        } else {
            gen::ComponentControl::Store0
        }
    };

    gen::VertexElementState {
        vertex_buffer_index: attribute.binding,
        valid: true,
        source_element_format: hw_format,
        edge_flag_enable: false,
        source_element_offset: attribute.offset,
        component0_control: control(0),
        component1_control: control(1),
        component2_control: control(2),
        component3_control: control(3),
    }
}

fn dwords_of(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|dw| u32::from_le_bytes([dw[0], dw[1], dw[2], dw[3]]))
}

fn te_output_topology(output: TessOutput, origin: TessellationDomainOrigin) -> gen::OutputTopology {
    let upper_left = origin == TessellationDomainOrigin::UpperLeft;

    match output {
        TessOutput::Points => gen::OutputTopology::Point,
        TessOutput::Lines => gen::OutputTopology::Line,
        TessOutput::TrianglesCw if upper_left => gen::OutputTopology::TriCcw,
        TessOutput::TrianglesCw => gen::OutputTopology::TriCw,
        TessOutput::TrianglesCcw if upper_left => gen::OutputTopology::TriCw,
        TessOutput::TrianglesCcw => gen::OutputTopology::TriCcw,
    }
}

fn combiner_op(op: FragmentShadingRateCombinerOp) -> u32 {
    match op {
        FragmentShadingRateCombinerOp::Keep => 0,
        FragmentShadingRateCombinerOp::Replace => 1,
        FragmentShadingRateCombinerOp::Min => 2,
        FragmentShadingRateCombinerOp::Max => 3,
        FragmentShadingRateCombinerOp::Mul => 4,
    }
}

fn index_format(index_type: IndexType) -> gen::IndexFormat {
    match index_type {
        IndexType::U8 => gen::IndexFormat::Byte,
        IndexType::U16 => gen::IndexFormat::Word,
        IndexType::U32 => gen::IndexFormat::Dword,
    }
}

fn wm_depth_stencil(optimized: &OptimizedDepthStencil) -> gen::WmDepthStencil {
    let ds = &optimized.state;
    let (front, back) = (&ds.stencil.front, &ds.stencil.back);

    gen::WmDepthStencil {
        stencil_fail_op: front.ops.fail_op.into(),
        stencil_pass_depth_fail_op: front.ops.depth_fail_op.into(),
        stencil_pass_depth_pass_op: front.ops.pass_op.into(),
        stencil_test_function: front.ops.compare_op.into(),
        backface_stencil_fail_op: back.ops.fail_op.into(),
        backface_stencil_pass_depth_fail_op: back.ops.depth_fail_op.into(),
        backface_stencil_pass_depth_pass_op: back.ops.pass_op.into(),
        backface_stencil_test_function: back.ops.compare_op.into(),
        depth_test_function: ds.depth.compare_op.into(),
        double_sided_stencil_enable: true,
        stencil_test_enable: ds.stencil.test_enable,
        stencil_buffer_write_enable: optimized.stencil_write_enable,
        depth_test_enable: ds.depth.test_enable,
        depth_buffer_write_enable: optimized.depth_write_enable,
        stencil_test_mask: front.compare_mask & 0xff,
        stencil_write_mask: front.write_mask & 0xff,
        backface_stencil_test_mask: back.compare_mask & 0xff,
        backface_stencil_write_mask: back.write_mask & 0xff,
        stencil_reference_value: front.reference & 0xff,
        backface_stencil_reference_value: back.reference & 0xff,
    }
}

/// Returns whether the stencil PMA optimization must be enabled.
///
/// It is only needed on Gen9, when a fragment shader that can kill pixels or compute depth
/// feeds a stencil buffer that is written.
fn wants_pma_fix(
    gfx_version: u32,
    has_depth: bool,
    fs: Option<&FsInfo>,
    optimized: &OptimizedDepthStencil,
    alpha_to_coverage: bool,
) -> bool {
    if gfx_version != 90 || !has_depth {
        return false;
    }

    let Some(fs) = fs else {
        return false;
    };

    if fs.early_fragment_tests {
        return false;
    }

    let computes_stencil = optimized.state.stencil.test_enable && fs.writes_stencil;

    if !computes_stencil && !optimized.stencil_write_enable {
        return false;
    }

    fs.can_discard || alpha_to_coverage || fs.writes_depth
}

/// The blend state entries of every render target.
#[derive(Debug)]
pub(super) struct BlendEntries {
    pub(super) entries: [gen::BlendStateEntry; gen::MAX_RTS],
    pub(super) independent_alpha: bool,

    /// A zero destination factor was rewritten to read the blend constants.
    pub(super) color_zero: bool,
    pub(super) alpha_zero: bool,
}

pub(super) fn blend_entries(
    cb: &ColorBlendState,
    dual_source_supported: bool,
    zero_factor_erratum: bool,
) -> BlendEntries {
    let mut out = BlendEntries {
        entries: [gen::BlendStateEntry::default(); gen::MAX_RTS],
        independent_alpha: false,
        color_zero: false,
        alpha_zero: false,
    };

    for (i, (attachment, entry)) in cb.attachments.iter().zip(&mut out.entries).enumerate() {
        let write_disabled =
            i as u32 >= cb.attachment_count || cb.color_write_enables & (1 << i) == 0;
        let mask = attachment.write_mask;
        let eq = &attachment.equation;

        *entry = gen::BlendStateEntry {
            color_buffer_blend_enable: !cb.logic_op_enable
                && attachment.blend_enable
                && (dual_source_supported || !eq.uses_dual_source()),
            source_blend_factor: eq.src_color_blend_factor.into(),
            destination_blend_factor: eq.dst_color_blend_factor.into(),
            color_blend_function: eq.color_blend_op.into(),
            source_alpha_blend_factor: eq.src_alpha_blend_factor.into(),
            destination_alpha_blend_factor: eq.dst_alpha_blend_factor.into(),
            alpha_blend_function: eq.alpha_blend_op.into(),
            write_disable_alpha: write_disabled || !mask.intersects(ColorComponents::A),
            write_disable_red: write_disabled || !mask.intersects(ColorComponents::R),
            write_disable_green: write_disabled || !mask.intersects(ColorComponents::G),
            write_disable_blue: write_disabled || !mask.intersects(ColorComponents::B),
            logic_op_enable: cb.logic_op_enable,
            logic_op_function: cb.logic_op.into(),
            color_clamp_range: gen::ColorClampRange::RtFormat,
            pre_blend_color_clamp_enable: true,
            post_blend_color_clamp_enable: true,
            ..Default::default()
        };

        if eq.src_color_blend_factor != eq.src_alpha_blend_factor
            || eq.dst_color_blend_factor != eq.dst_alpha_blend_factor
            || eq.color_blend_op != eq.alpha_blend_op
        {
            out.independent_alpha = true;
        }

        // MIN and MAX ignore the factors, but the hardware does not.
        if matches!(eq.color_blend_op, BlendOp::Min | BlendOp::Max) {
            entry.source_blend_factor = gen::BlendFactor::One;
            entry.destination_blend_factor = gen::BlendFactor::One;
        }

        if matches!(eq.alpha_blend_op, BlendOp::Min | BlendOp::Max) {
            entry.source_alpha_blend_factor = gen::BlendFactor::One;
            entry.destination_alpha_blend_factor = gen::BlendFactor::One;
        }

        if zero_factor_erratum {
            if entry.destination_blend_factor == gen::BlendFactor::Zero {
                entry.destination_blend_factor = gen::BlendFactor::ConstColor;
                out.color_zero = true;
            }

            if entry.destination_alpha_blend_factor == gen::BlendFactor::Zero {
                entry.destination_alpha_blend_factor = gen::BlendFactor::ConstAlpha;
                out.alpha_zero = true;
            }
        }
    }

    out
}

pub(super) fn color_calc_state(
    constants: [f32; 4],
    color_zero: bool,
    alpha_zero: bool,
) -> gen::ColorCalcState {
    let [red, green, blue, alpha] = constants;
    let color = |v: f32| if color_zero { 0.0 } else { v };

    gen::ColorCalcState {
        blend_constant_color_red: color(red),
        blend_constant_color_green: color(green),
        blend_constant_color_blue: color(blue),
        blend_constant_color_alpha: if alpha_zero { 0.0 } else { alpha },
        ..Default::default()
    }
}

/// Builds the sample pattern of every sample count. `custom` replaces the standard positions
/// of the count it was given for.
pub(super) fn sample_pattern(custom: Option<&SampleLocations>) -> gen::SamplePattern {
    let pack = |standard: &[[f32; 2]]| -> u128 {
        let count = standard.len();
        let positions = match custom {
            Some(custom) if custom.per_pixel as usize == count => &custom.locations[..count],
            _ => standard,
        };

        positions
            .iter()
            .enumerate()
            .fold(0, |packed, (i, &[x, y])| {
                packed | u128::from(gen::sample_position_byte(x, y)) << (8 * i)
            })
    };

    let p16 = pack(&SAMPLE_POSITIONS_16X);
    let p8 = pack(&SAMPLE_POSITIONS_8X);

    gen::SamplePattern {
        samples_16x_0_3: p16 as u32,
        samples_16x_4_7: (p16 >> 32) as u32,
        samples_16x_8_11: (p16 >> 64) as u32,
        samples_16x_12_15: (p16 >> 96) as u32,
        samples_8x_0_3: p8 as u32,
        samples_8x_4_7: (p8 >> 32) as u32,
        samples_4x: pack(&SAMPLE_POSITIONS_4X) as u32,
        samples_2x: pack(&SAMPLE_POSITIONS_2X) as u32,
        samples_1x: pack(&SAMPLE_POSITIONS_1X) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        blend_entries, cc_viewport, color_calc_state, sample_pattern, scissor_rect,
        sf_clip_viewport, CS_CHICKEN1, REPLAY_MODE_MASK, REPLAY_MODE_MIDCMDBUFFER_DISABLED,
    };
    use crate::{
        command_buffer::{
            tests::recording, CommandBuffer, RenderArea, RenderingInfo, RootTable,
            ROOT_TABLE_SIZE,
        },
        descriptor_set::{
            layout::{
                DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
                DescriptorType,
            },
            pool::{DescriptorPool, DescriptorPoolCreateInfo},
            DescriptorSet, WriteDescriptorSet,
        },
        device::{Device, DeviceProperties},
        format::Format,
        image::{ImageView, ImageViewCreateInfo},
        memory::{Bo, BoFlags, DeviceAlignment},
        pack::{gen, mali, packet_header, PackRecord},
        pipeline::{
            dynamic_state::{
                ColorBlendState, SampleLocations, Scissor, Viewport,
            },
            layout::{PipelineLayout, PipelineLayoutCreateInfo},
            shader::{FsInfo, Shader, ShaderCreateInfo, ShaderInfo, ShaderStage},
            state::{BlendFactor, BlendOp, LineRasterizationMode, PrimitiveTopology, StencilOp},
            GraphicsPipeline, GraphicsPipelineCreateInfo, PipelineBindPoint,
        },
    };
    use smallvec::smallvec;
    use std::sync::Arc;

    fn viewport(x: f32, y: f32, width: f32, height: f32) -> Viewport {
        Viewport {
            offset: [x, y],
            extent: [width, height],
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    fn shader(device: &Arc<Device>, stage: ShaderStage) -> Arc<Shader> {
        Shader::new(
            device.clone(),
            ShaderCreateInfo::new(ShaderInfo::new(stage), vec![0; 16]),
        )
        .unwrap()
    }

    fn fragment_shader(device: &Arc<Device>, fs: FsInfo) -> Arc<Shader> {
        Shader::new(
            device.clone(),
            ShaderCreateInfo::new(
                ShaderInfo {
                    fs,
                    ..ShaderInfo::new(ShaderStage::Fragment)
                },
                vec![0; 16],
            ),
        )
        .unwrap()
    }

    fn pipeline(
        device: &Arc<Device>,
        configure: impl FnOnce(&mut GraphicsPipelineCreateInfo),
    ) -> Arc<GraphicsPipeline> {
        let layout = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                push_constant_size: 16,
                ..Default::default()
            },
        )
        .unwrap();

        let mut create_info = GraphicsPipelineCreateInfo {
            stages: smallvec![
                shader(device, ShaderStage::Vertex),
                shader(device, ShaderStage::Fragment),
            ],
            ..GraphicsPipelineCreateInfo::layout(layout)
        };
        create_info.state.color_blend.attachment_count = 1;
        configure(&mut create_info);

        GraphicsPipeline::new(device.clone(), create_info).unwrap()
    }

    fn color_view(device: &Arc<Device>, format: Format, samples: u32) -> Arc<ImageView> {
        let bo = Bo::new(device.service(), 1 << 20, DeviceAlignment::MIN, BoFlags::VRAM).unwrap();

        ImageView::new(
            device.clone(),
            ImageViewCreateInfo {
                extent: [64, 64, 1],
                samples,
                ..ImageViewCreateInfo::new(bo, format)
            },
        )
        .unwrap()
    }

    /// Returns the last packet of type `R` in `dwords`, as bytes.
    fn last_packet<R: PackRecord>(dwords: &[u32]) -> Option<Vec<u8>> {
        let len = R::LEN / 4;
        let header = packet_header(R::HEADER?, len as u32);
        let start = dwords.iter().rposition(|&dw| dw == header)?;

        Some(
            dwords[start..start + len]
                .iter()
                .flat_map(|dw| dw.to_le_bytes())
                .collect(),
        )
    }

    /// Returns the packet of type `R` that starts at dword `at`, as bytes.
    fn packet_at<R: PackRecord>(dwords: &[u32], at: usize) -> Option<Vec<u8>> {
        let header = packet_header(R::HEADER?, (R::LEN / 4) as u32);
        let packet = dwords.get(at..at + R::LEN / 4)?;

        (packet[0] == header).then(|| packet.iter().flat_map(|dw| dw.to_le_bytes()).collect())
    }

    fn packet_positions<R: PackRecord>(dwords: &[u32]) -> Vec<usize> {
        let header = R::HEADER.map(|header| packet_header(header, (R::LEN / 4) as u32));

        (0..dwords.len())
            .filter(|&at| Some(dwords[at]) == header)
            .collect()
    }

    /// Returns the start of every `MI_LOAD_REGISTER_IMM` that writes `register`.
    fn register_writes(dwords: &[u32], register: u32) -> Vec<usize> {
        packet_positions::<gen::MiLoadRegisterImm>(dwords)
            .into_iter()
            .filter(|&at| dwords.get(at + 1) == Some(&register))
            .collect()
    }

    fn pipe_control_flag(dwords: &[u32], at: usize, flag: &str) -> bool {
        packet_at::<gen::PipeControl>(dwords, at)
            .is_some_and(|pc| gen::PipeControl::raw(&pc, flag) == Some(1))
    }

    /// Reads `len` bytes at GPU address `address` out of the batch chunks of `cb`.
    fn read_batch(cb: &CommandBuffer, address: u64, len: usize) -> Vec<u8> {
        let chunk = cb
            .resources
            .batch
            .chunks()
            .iter()
            .find(|bo| (bo.gpu_addr()..bo.gpu_addr() + bo.size()).contains(&address))
            .unwrap();
        let offset = (address - chunk.gpu_addr()) as usize;
        let ptr = chunk.mapped_ptr().unwrap();

        unsafe { std::slice::from_raw_parts(ptr.as_ptr().add(offset), len) }.to_vec()
    }

    fn count_packets<R: PackRecord>(dwords: &[u32]) -> usize {
        let header = R::HEADER.map(|header| packet_header(header, (R::LEN / 4) as u32));

        dwords.iter().filter(|&&dw| Some(dw) == header).count()
    }

    #[test]
    fn viewport_transform() {
        let sfv = sf_clip_viewport(&viewport(0.0, 0.0, 800.0, 600.0), false, None, None);

        assert_eq!(sfv.viewport_matrix_element_m00, 400.0);
        assert_eq!(sfv.viewport_matrix_element_m11, 300.0);
        assert_eq!(sfv.viewport_matrix_element_m22, 1.0);
        assert_eq!(sfv.viewport_matrix_element_m30, 400.0);
        assert_eq!(sfv.viewport_matrix_element_m31, 300.0);
        assert_eq!(sfv.viewport_matrix_element_m32, 0.0);
        assert_eq!(
            (sfv.x_min_clip_guardband, sfv.x_max_clip_guardband),
            (-1.0, 1.0),
        );
        assert_eq!(
            (sfv.y_min_clip_guardband, sfv.y_max_clip_guardband),
            (-1.0, 1.0),
        );
        assert_eq!((sfv.x_min_viewport, sfv.x_max_viewport), (0.0, 799.0));
        assert_eq!((sfv.y_min_viewport, sfv.y_max_viewport), (0.0, 599.0));
    }

    #[test]
    fn negative_one_to_one_depth() {
        let sfv = sf_clip_viewport(&viewport(0.0, 0.0, 800.0, 600.0), true, None, None);

        assert_eq!(sfv.viewport_matrix_element_m22, 0.5);
        assert_eq!(sfv.viewport_matrix_element_m32, 0.5);
    }

    #[test]
    fn flipped_viewport() {
        let sfv = sf_clip_viewport(&viewport(0.0, 600.0, 800.0, -600.0), false, None, None);

        assert_eq!(sfv.viewport_matrix_element_m11, -300.0);
        assert_eq!((sfv.y_min_viewport, sfv.y_max_viewport), (0.0, 599.0));
    }

    #[test]
    fn guardband_widens_with_known_area() {
        let area = RenderArea {
            offset: [0, 0],
            extent: [800, 600],
        };
        let sfv = sf_clip_viewport(&viewport(0.0, 0.0, 800.0, 600.0), false, Some(area), None);

        assert!(sfv.x_min_clip_guardband < -1.0);
        assert!(sfv.x_max_clip_guardband > 1.0);
        assert!(sfv.y_min_clip_guardband < -1.0);
        assert!(sfv.y_max_clip_guardband > 1.0);
    }

    #[test]
    fn depth_range_follows_clamp() {
        let vp = Viewport {
            min_depth: 0.75,
            max_depth: 0.25,
            ..viewport(0.0, 0.0, 1.0, 1.0)
        };

        let clamped = cc_viewport(&vp, true);
        assert_eq!((clamped.minimum_depth, clamped.maximum_depth), (0.25, 0.75));

        let open = cc_viewport(&vp, false);
        assert_eq!((open.minimum_depth, open.maximum_depth), (0.0, 1.0));
    }

    #[test]
    fn empty_scissor_rejects_everything() {
        let rect = scissor_rect(
            &Scissor {
                offset: [10, 10],
                extent: [0, 20],
            },
            &viewport(0.0, 0.0, 800.0, 600.0),
            None,
        );

        assert_eq!(rect.scissor_rectangle_x_min, 1);
        assert_eq!(rect.scissor_rectangle_y_min, 1);
        assert_eq!(rect.scissor_rectangle_x_max, 0);
        assert_eq!(rect.scissor_rectangle_y_max, 0);
    }

    #[test]
    fn scissor_is_clipped_to_viewport_and_area() {
        let vp = viewport(0.0, 0.0, 800.0, 600.0);
        let scissor = Scissor {
            offset: [10, 20],
            extent: [2000, 100],
        };

        let rect = scissor_rect(&scissor, &vp, None);
        assert_eq!(
            (rect.scissor_rectangle_x_min, rect.scissor_rectangle_x_max),
            (10, 799),
        );
        assert_eq!(
            (rect.scissor_rectangle_y_min, rect.scissor_rectangle_y_max),
            (20, 119),
        );

        let area = RenderArea {
            offset: [0, 0],
            extent: [256, 64],
        };
        let rect = scissor_rect(&scissor, &vp, Some(area));
        assert_eq!(rect.scissor_rectangle_x_max, 255);
        assert_eq!(rect.scissor_rectangle_y_max, 63);
    }

    #[test]
    fn min_max_blend_ops_force_one() {
        let mut cb = ColorBlendState {
            attachment_count: 1,
            ..Default::default()
        };
        cb.attachments[0].blend_enable = true;
        cb.attachments[0].equation.color_blend_op = BlendOp::Min;
        cb.attachments[0].equation.src_color_blend_factor = BlendFactor::SrcAlpha;
        cb.attachments[0].equation.dst_color_blend_factor = BlendFactor::OneMinusSrcAlpha;

        let table = blend_entries(&cb, true, false);
        let entry = &table.entries[0];

        assert_eq!(entry.source_blend_factor, gen::BlendFactor::One);
        assert_eq!(entry.destination_blend_factor, gen::BlendFactor::One);
        assert_eq!(entry.color_blend_function, gen::BlendFunction::Min);
        assert!(table.independent_alpha);
    }

    #[test]
    fn unused_targets_are_write_disabled() {
        let cb = ColorBlendState {
            attachment_count: 2,
            color_write_enables: 0b01,
            ..Default::default()
        };

        let table = blend_entries(&cb, true, false);

        assert!(!table.entries[0].write_disable_red);
        assert!(table.entries[1].write_disable_red);
        assert!(table.entries[2].write_disable_alpha);
    }

    #[test]
    fn zero_factor_erratum_reads_zeroed_constants() {
        let mut cb = ColorBlendState {
            attachment_count: 1,
            blend_constants: [0.25, 0.5, 0.75, 1.0],
            ..Default::default()
        };
        // Every entry is checked, including the unused ones.
        for attachment in &mut cb.attachments {
            attachment.equation.dst_alpha_blend_factor = BlendFactor::One;
        }
        cb.attachments[0].blend_enable = true;
        cb.attachments[0].equation.dst_color_blend_factor = BlendFactor::Zero;

        let table = blend_entries(&cb, true, true);
        assert_eq!(
            table.entries[0].destination_blend_factor,
            gen::BlendFactor::ConstColor,
        );
        assert_eq!(
            table.entries[0].destination_alpha_blend_factor,
            gen::BlendFactor::One,
        );
        assert!(table.color_zero);
        assert!(!table.alpha_zero);
        assert_eq!(
            table.entries[5].destination_blend_factor,
            gen::BlendFactor::ConstColor,
        );

        let cc = color_calc_state(cb.blend_constants, table.color_zero, table.alpha_zero);
        assert_eq!(cc.blend_constant_color_red, 0.0);
        assert_eq!(cc.blend_constant_color_blue, 0.0);
        assert_eq!(cc.blend_constant_color_alpha, 1.0);
    }

    #[test]
    fn standard_and_custom_sample_positions() {
        let standard = sample_pattern(None);
        assert_eq!(standard.samples_1x, 0x88);
        assert_eq!(standard.samples_2x, 0x44cc);

        let mut custom = SampleLocations {
            per_pixel: 2,
            ..Default::default()
        };
        custom.locations[0] = [0.0, 0.0];
        custom.locations[1] = [0.5, 0.5];

        let pattern = sample_pattern(Some(&custom));
        assert_eq!(pattern.samples_2x, 0x8800);
        assert_eq!(pattern.samples_4x, standard.samples_4x);
    }

    #[test]
    fn smooth_lines_are_not_antialiased_on_integer_targets() {
        let (device, _service) = dev!();
        let pipeline = pipeline(&device, |info| {
            info.state.input_assembly.topology = PrimitiveTopology::LineList;
            info.state.rasterization.line.mode = LineRasterizationMode::RectangularSmooth;
        });

        let aa_for = |format: Format| {
            let mut cb = recording(&device);
            cb.bind_graphics_pipeline(pipeline.clone()).unwrap();
            cb.begin_rendering(RenderingInfo {
                color_attachments: vec![Some(color_view(&device, format, 1))],
                ..Default::default()
            })
            .unwrap();
            cb.draw(2, 1, 0, 0).unwrap();

            let raster = last_packet::<gen::Raster>(&cb.stream_dwords()).unwrap();
            gen::Raster::raw(&raster, "antialiasing_enable").unwrap()
        };

        assert_eq!(aa_for(Format::R8G8B8A8_UNORM), 1);
        assert_eq!(aa_for(Format::R8G8B8A8_UINT), 0);
    }

    #[test]
    fn clean_state_is_not_reemitted() {
        let (device, _service) = dev!();
        let pipeline = pipeline(&device, |_| ());

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(pipeline).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let first = cb.stream_dwords();
        assert_eq!(count_packets::<gen::Raster>(&first), 1);
        assert_eq!(count_packets::<gen::SampleMask>(&first), 1);
        assert!(cb.dynamic.dirty().is_empty());

        cb.set_sample_mask(0x1_0003).unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let second = cb.stream_dwords();
        assert_eq!(count_packets::<gen::Raster>(&second), 1);
        assert_eq!(count_packets::<gen::SampleMask>(&second), 2);

        let mask = last_packet::<gen::SampleMask>(&second).unwrap();
        assert_eq!(gen::SampleMask::raw(&mask, "sample_mask"), Some(0x3));
    }

    #[test]
    fn depth_bounds_default_to_full_range() {
        let (device, _service) = dev!();
        let pipeline = pipeline(&device, |info| {
            info.state.depth_stencil.depth.bounds.min = 0.25;
            info.state.depth_stencil.depth.bounds.max = 0.5;
        });

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(pipeline).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let bounds = last_packet::<gen::DepthBounds>(&cb.stream_dwords()).unwrap();
        let value = |name| f32::from_bits(gen::DepthBounds::raw(&bounds, name).unwrap() as u32);

        assert_eq!(gen::DepthBounds::raw(&bounds, "depth_bounds_test_enable"), Some(0));
        assert_eq!(value("depth_bounds_test_min_value"), 0.0);
        assert_eq!(value("depth_bounds_test_max_value"), 1.0);
    }

    #[test]
    fn zero_factor_erratum_tracks_blend_constants() {
        let (device, _service) = dev!(DeviceProperties {
            has_msaa_zero_factor_erratum: true,
            ..Default::default()
        });
        let pipeline = pipeline(&device, |info| {
            info.state.multisample.rasterization_samples = 4;
            info.state.color_blend.attachments[0].blend_enable = true;
            info.state.color_blend.attachments[0]
                .equation
                .dst_color_blend_factor = BlendFactor::Zero;
        });

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(pipeline).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 4))],
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        assert!(cb.hw.color_blend_zero);
        assert_eq!(
            count_packets::<gen::CcStatePointers>(&cb.stream_dwords()),
            1,
        );

        let blend = last_packet::<gen::PsBlend>(&cb.stream_dwords()).unwrap();
        assert_eq!(
            gen::PsBlend::raw(&blend, "destination_blend_factor"),
            Some(gen::BlendFactor::ConstColor as u64),
        );
    }

    #[test]
    fn smooth_multisampled_lines_are_not_antialiased() {
        let aa_on = |gfx_version: u32| {
            let (device, _service) = dev!(DeviceProperties {
                gfx_version,
                ..Default::default()
            });
            let pipeline = pipeline(&device, |info| {
                info.state.input_assembly.topology = PrimitiveTopology::LineList;
                info.state.rasterization.line.mode = LineRasterizationMode::RectangularSmooth;
                info.state.multisample.rasterization_samples = 4;
            });

            let mut cb = recording(&device);
            cb.bind_graphics_pipeline(pipeline).unwrap();
            cb.begin_rendering(RenderingInfo {
                color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 4))],
                ..Default::default()
            })
            .unwrap();
            cb.draw(2, 1, 0, 0).unwrap();

            let raster = last_packet::<gen::Raster>(&cb.stream_dwords()).unwrap();
            gen::Raster::raw(&raster, "antialiasing_enable").unwrap()
        };

        assert_eq!(aa_on(110), 1);
        assert_eq!(aa_on(120), 0);
        assert_eq!(aa_on(125), 0);
    }

    #[test]
    fn sample_mask_defaults_to_pipeline() {
        let mask_of = |sample_mask: Option<u32>| {
            let (device, _service) = dev!();
            let pipeline = pipeline(&device, |info| {
                if let Some(sample_mask) = sample_mask {
                    info.state.multisample.sample_mask = sample_mask;
                }
            });

            let mut cb = recording(&device);
            cb.bind_graphics_pipeline(pipeline).unwrap();
            cb.begin_rendering(RenderingInfo {
                color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
                ..Default::default()
            })
            .unwrap();
            cb.draw(3, 1, 0, 0).unwrap();

            let mask = last_packet::<gen::SampleMask>(&cb.stream_dwords()).unwrap();
            gen::SampleMask::raw(&mask, "sample_mask").unwrap()
        };

        assert_eq!(mask_of(None), 0xffff);
        assert_eq!(mask_of(Some(0xdead_0005)), 0x5);
    }

    #[test]
    fn preemption_is_disabled_around_transform_feedback() {
        let (device, _service) = dev!(DeviceProperties {
            needs_preemption_toggle: true,
            ..Default::default()
        });
        let xfb = pipeline(&device, |info| info.transform_feedback = true);
        let plain = pipeline(&device, |_| ());

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(xfb).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();
        assert!(cb.hw.preemption_disabled);

        cb.bind_graphics_pipeline(plain).unwrap();
        cb.draw(3, 1, 0, 0).unwrap();
        assert!(!cb.hw.preemption_disabled);

        let dwords = cb.stream_dwords();
        let writes = register_writes(&dwords, CS_CHICKEN1);
        let pc_len = gen::PipeControl::LEN / 4;

        assert_eq!(writes.len(), 2);
        assert_eq!(
            dwords[writes[0] + 2],
            REPLAY_MODE_MASK | REPLAY_MODE_MIDCMDBUFFER_DISABLED,
        );
        assert_eq!(dwords[writes[1] + 2], REPLAY_MODE_MASK);

        for &at in &writes {
            assert!(pipe_control_flag(&dwords, at - pc_len, "command_streamer_stall_enable"));
        }
    }

    #[test]
    fn preemption_is_left_alone_without_the_toggle() {
        let (device, _service) = dev!();
        let xfb = pipeline(&device, |info| info.transform_feedback = true);

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(xfb).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        assert!(!cb.hw.preemption_disabled);
        assert!(register_writes(&cb.stream_dwords(), CS_CHICKEN1).is_empty());
    }

    #[test]
    fn toggling_depth_writes_stalls_the_pixel_shader() {
        // Whether a pixel-shader stall follows each depth-stencil packet.
        let stalls = |needs_ds_write_stall: bool| {
            let (device, _service) = dev!(DeviceProperties {
                needs_ds_write_stall,
                ..Default::default()
            });
            let writing = pipeline(&device, |info| {
                info.state.depth_stencil.depth.test_enable = true;
                info.state.depth_stencil.depth.write_enable = true;
            });
            let read_only = pipeline(&device, |info| {
                info.state.depth_stencil.depth.test_enable = true;
            });

            let mut cb = recording(&device);
            cb.bind_graphics_pipeline(writing.clone()).unwrap();
            cb.begin_rendering(RenderingInfo {
                color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
                depth_attachment: Some(color_view(&device, Format::D32_SFLOAT, 1)),
                ..Default::default()
            })
            .unwrap();
            cb.draw(3, 1, 0, 0).unwrap();
            assert!(cb.hw.depth_write_enable);

            cb.bind_graphics_pipeline(writing).unwrap();
            cb.draw(3, 1, 0, 0).unwrap();
            cb.bind_graphics_pipeline(read_only).unwrap();
            cb.draw(3, 1, 0, 0).unwrap();
            assert!(!cb.hw.depth_write_enable);

            let dwords = cb.stream_dwords();
            let ds_len = gen::WmDepthStencil::LEN / 4;

            packet_positions::<gen::WmDepthStencil>(&dwords)
                .into_iter()
                .map(|at| pipe_control_flag(&dwords, at + ds_len, "pss_stall_sync_enable"))
                .collect::<Vec<_>>()
        };

        let toggled = stalls(true);
        assert_eq!(toggled.first(), Some(&true));
        assert_eq!(toggled.last(), Some(&true));
        assert_eq!(toggled.iter().filter(|&&stall| stall).count(), 2);

        assert!(stalls(false).iter().all(|&stall| !stall));
    }

    #[test]
    fn stencil_pma_fix_follows_discarding_shaders() {
        let (device, _service) = dev!(DeviceProperties {
            gfx_version: 90,
            ..Default::default()
        });
        let stencil_pipeline = |can_discard: bool| {
            pipeline(&device, |info| {
                info.stages[1] = fragment_shader(
                    &device,
                    FsInfo {
                        can_discard,
                        ..Default::default()
                    },
                );

                let ds = &mut info.state.depth_stencil;
                ds.depth.test_enable = true;
                ds.stencil.test_enable = true;
                ds.stencil.front.ops.pass_op = StencilOp::Replace;
                ds.stencil.back.ops.pass_op = StencilOp::Replace;
            })
        };

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(stencil_pipeline(true)).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            depth_attachment: Some(color_view(&device, Format::D24_UNORM_S8_UINT, 1)),
            stencil_attachment: Some(color_view(&device, Format::D24_UNORM_S8_UINT, 1)),
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();
        assert!(cb.hw.pma_fix_enabled);

        cb.bind_graphics_pipeline(stencil_pipeline(false)).unwrap();
        cb.draw(3, 1, 0, 0).unwrap();
        assert!(!cb.hw.pma_fix_enabled);

        let dwords = cb.stream_dwords();
        let writes = register_writes(&dwords, gen::CACHE_MODE_0_NUM);
        let enable = u32::from_le_bytes(
            gen::CacheMode0 {
                stc_pma_optimization_enable: true,
                stc_pma_optimization_enable_mask: true,
            }
            .to_bytes(),
        );
        let disable = u32::from_le_bytes(
            gen::CacheMode0 {
                stc_pma_optimization_enable: false,
                stc_pma_optimization_enable_mask: true,
            }
            .to_bytes(),
        );

        assert_eq!(writes.len(), 2);
        assert_eq!(dwords[writes[0] + 2], enable);
        assert_eq!(dwords[writes[1] + 2], disable);

        let pc_len = gen::PipeControl::LEN / 4;
        let lri_len = gen::MiLoadRegisterImm::LEN / 4;

        for &at in &writes {
            let before = at - pc_len;
            assert!(pipe_control_flag(&dwords, before, "depth_cache_flush_enable"));
            assert!(pipe_control_flag(&dwords, before, "command_streamer_stall_enable"));
            assert!(pipe_control_flag(&dwords, before, "render_target_cache_flush_enable"));

            let after = at + lri_len;
            assert!(pipe_control_flag(&dwords, after, "depth_stall_enable"));
            assert!(pipe_control_flag(&dwords, after, "depth_cache_flush_enable"));
        }
    }

    #[test]
    fn stencil_pma_fix_is_gen9_only() {
        let (device, _service) = dev!();
        let pipeline = pipeline(&device, |info| {
            info.stages[1] = fragment_shader(
                &device,
                FsInfo {
                    can_discard: true,
                    ..Default::default()
                },
            );

            let ds = &mut info.state.depth_stencil;
            ds.depth.test_enable = true;
            ds.stencil.test_enable = true;
            ds.stencil.front.ops.pass_op = StencilOp::Replace;
        });

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(pipeline).unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            depth_attachment: Some(color_view(&device, Format::D24_UNORM_S8_UINT, 1)),
            stencil_attachment: Some(color_view(&device, Format::D24_UNORM_S8_UINT, 1)),
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        assert!(!cb.hw.pma_fix_enabled);
        assert!(register_writes(&cb.stream_dwords(), gen::CACHE_MODE_0_NUM).is_empty());
    }

    #[test]
    fn root_table_points_at_fragment_descriptors() {
        let (device, _service) = dev!();
        let set_layout = DescriptorSetLayout::new(
            &device,
            DescriptorSetLayoutCreateInfo {
                bindings: [(
                    0,
                    DescriptorSetLayoutBinding {
                        descriptor_count: 2,
                        ..DescriptorSetLayoutBinding::descriptor_type(DescriptorType::StorageImage)
                    },
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            },
        )
        .unwrap();
        let layout = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                set_layouts: vec![set_layout.clone()],
                push_constant_size: 16,
                ..Default::default()
            },
        )
        .unwrap();
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            DescriptorPoolCreateInfo {
                max_sets: 1,
                pool_sizes: [(DescriptorType::StorageImage, 2)].into_iter().collect(),
                ..Default::default()
            },
        )
        .unwrap();
        let set = DescriptorSet::new(
            descriptor_pool,
            set_layout,
            [WriteDescriptorSet::image_view(
                0,
                color_view(&device, Format::R32_UINT, 1),
            )],
            [],
        )
        .unwrap();

        let pipeline = pipeline(&device, |info| {
            info.layout = layout.clone();

            let color_blend = &mut info.state.color_blend;
            color_blend.blend_constants = [0.25, 0.25, 0.25, 0.5];
            color_blend.attachments[0].blend_enable = true;
            color_blend.attachments[0].equation.dst_color_blend_factor =
                BlendFactor::ConstantAlpha;

            let vp = &mut info.state.viewport;
            vp.viewport_count = 1;
            vp.viewports[0] = viewport(0.0, 0.0, 64.0, 64.0);
            vp.scissor_count = 1;
            vp.scissors[0] = Scissor {
                offset: [8, 8],
                extent: [16, 16],
            };
        });

        let mut cb = recording(&device);
        cb.bind_graphics_pipeline(pipeline).unwrap();
        cb.bind_descriptor_sets(PipelineBindPoint::Graphics, &layout, 0, &[set], &[])
            .unwrap();
        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(color_view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let constant_all = last_packet::<gen::ConstantAll>(&cb.stream_dwords()).unwrap();
        let root_address = gen::ConstantAll::raw(&constant_all, "root_table_address").unwrap() << 6;
        let root: RootTable =
            bytemuck::pod_read_unaligned(&read_batch(&cb, root_address, ROOT_TABLE_SIZE));

        // The BLEND descriptors follow the renderer state.
        let blend = read_batch(&cb, root.renderer_state + 64, mali::Blend::LEN);
        assert_eq!(mali::Blend::raw(&blend, "enable"), Some(1));
        assert_eq!(mali::Blend::raw(&blend, "rt"), Some(0));
        assert_eq!(mali::Blend::raw(&blend, "constant"), Some(0x7f00));

        let viewport = read_batch(&cb, root.viewport, mali::Viewport::LEN);
        assert_eq!(mali::Viewport::raw(&viewport, "scissor_minimum_x"), Some(8));
        assert_eq!(mali::Viewport::raw(&viewport, "scissor_maximum_y"), Some(23));

        let attributes = read_batch(&cb, root.image_attributes, 2 * mali::Attribute::LEN);
        let (written, unwritten) = attributes.split_at(mali::Attribute::LEN);
        let hw_format = device.format_database().hw_format(Format::R32_UINT).unwrap();

        assert_eq!(mali::Attribute::raw(written, "buffer_index"), Some(0));
        assert_eq!(
            mali::Attribute::raw(written, "format"),
            Some(u64::from(hw_format)),
        );
        assert_eq!(mali::Attribute::raw(unwritten, "buffer_index"), Some(1));
        assert_eq!(mali::Attribute::raw(unwritten, "format"), Some(0));
    }
}
