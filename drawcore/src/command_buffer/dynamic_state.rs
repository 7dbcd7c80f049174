// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::CommandBuffer;
use crate::{
    pipeline::{
        dynamic_state::{
            validate_binding_stride, ColorBlendEquation, DepthBias, SampleLocations, Scissor, StencilFaces, StencilOps,
            VertexInputAttribute, VertexInputBinding, Viewport, MAX_COLOR_ATTACHMENTS,
            MAX_SAMPLE_LOCATIONS, MAX_VERTEX_ATTRIBUTES, MAX_VIEWPORTS,
        },
        state::{
            ColorComponents, CompareOp, ConservativeRasterizationMode, CullMode,
            FragmentShadingRateCombinerOp, FrontFace, LineRasterizationMode, LogicOp,
            PolygonMode, PrimitiveTopology, ProvokingVertexMode, TessellationDomainOrigin,
        },
    },
    DeviceOwned, ValidationError,
};

const MAX_PATCH_CONTROL_POINTS: u32 = 32;
const MAX_RASTERIZATION_STREAMS: u32 = 4;

// Setters whose only requirement is a command buffer in the recording state.
macro_rules! plain_setters {
    ($(
        $(#[doc = $doc:literal])*
        $name:ident($arg:ident: $ty:ty) => $vuid:literal;
    )+) => {
        impl CommandBuffer {
            $(
                $(#[doc = $doc])*
                pub fn $name(&mut self, $arg: $ty) -> Result<&mut Self, Box<ValidationError>> {
                    self.validate_recording(&[$vuid])?;
                    self.dynamic.$name($arg);

                    Ok(self)
                }
            )+
        }
    };
}

plain_setters! {
    /// Sets the primitive topology of future draws.
    set_primitive_topology(topology: PrimitiveTopology)
        => "VUID-vkCmdSetPrimitiveTopology-commandBuffer-recording";

    set_primitive_restart_enable(enable: bool)
        => "VUID-vkCmdSetPrimitiveRestartEnable-commandBuffer-recording";

    set_tessellation_domain_origin(origin: TessellationDomainOrigin)
        => "VUID-vkCmdSetTessellationDomainOriginEXT-commandBuffer-recording";

    /// Sets whether clip-space depth ranges from -1 to 1 instead of 0 to 1.
    set_depth_clip_negative_one_to_one(enable: bool)
        => "VUID-vkCmdSetDepthClipNegativeOneToOneEXT-commandBuffer-recording";

    set_rasterizer_discard_enable(enable: bool)
        => "VUID-vkCmdSetRasterizerDiscardEnable-commandBuffer-recording";

    set_depth_clamp_enable(enable: bool)
        => "VUID-vkCmdSetDepthClampEnableEXT-commandBuffer-recording";

    /// Sets depth clipping explicitly, overriding the default of following depth clamping.
    set_depth_clip_enable(enable: bool)
        => "VUID-vkCmdSetDepthClipEnableEXT-commandBuffer-recording";

    set_polygon_mode(mode: PolygonMode)
        => "VUID-vkCmdSetPolygonModeEXT-commandBuffer-recording";

    set_cull_mode(mode: CullMode)
        => "VUID-vkCmdSetCullMode-commandBuffer-recording";

    set_front_face(face: FrontFace)
        => "VUID-vkCmdSetFrontFace-commandBuffer-recording";

    set_conservative_rasterization_mode(mode: ConservativeRasterizationMode)
        => "VUID-vkCmdSetConservativeRasterizationModeEXT-commandBuffer-recording";

    set_provoking_vertex_mode(mode: ProvokingVertexMode)
        => "VUID-vkCmdSetProvokingVertexModeEXT-commandBuffer-recording";

    set_line_rasterization_mode(mode: LineRasterizationMode)
        => "VUID-vkCmdSetLineRasterizationModeEXT-commandBuffer-recording";

    set_line_stipple_enable(enable: bool)
        => "VUID-vkCmdSetLineStippleEnableEXT-commandBuffer-recording";

    set_depth_bias_enable(enable: bool)
        => "VUID-vkCmdSetDepthBiasEnable-commandBuffer-recording";

    set_depth_bias(depth_bias: DepthBias)
        => "VUID-vkCmdSetDepthBias-commandBuffer-recording";

    /// Sets the sample mask. Bits above the sample count are ignored.
    set_sample_mask(mask: u32)
        => "VUID-vkCmdSetSampleMaskEXT-commandBuffer-recording";

    set_alpha_to_coverage_enable(enable: bool)
        => "VUID-vkCmdSetAlphaToCoverageEnableEXT-commandBuffer-recording";

    set_alpha_to_one_enable(enable: bool)
        => "VUID-vkCmdSetAlphaToOneEnableEXT-commandBuffer-recording";

    set_depth_test_enable(enable: bool)
        => "VUID-vkCmdSetDepthTestEnable-commandBuffer-recording";

    set_depth_write_enable(enable: bool)
        => "VUID-vkCmdSetDepthWriteEnable-commandBuffer-recording";

    set_depth_compare_op(op: CompareOp)
        => "VUID-vkCmdSetDepthCompareOp-commandBuffer-recording";

    set_depth_bounds_test_enable(enable: bool)
        => "VUID-vkCmdSetDepthBoundsTestEnable-commandBuffer-recording";

    set_stencil_test_enable(enable: bool)
        => "VUID-vkCmdSetStencilTestEnable-commandBuffer-recording";

    set_logic_op_enable(enable: bool)
        => "VUID-vkCmdSetLogicOpEnableEXT-commandBuffer-recording";

    set_logic_op(op: LogicOp)
        => "VUID-vkCmdSetLogicOpEXT-commandBuffer-recording";

    set_blend_constants(constants: [f32; 4])
        => "VUID-vkCmdSetBlendConstants-commandBuffer-recording";
}

/// # Commands to set dynamic state
///
/// A value set here stays in effect until it is set again or a pipeline that embeds the same
/// state statically is bound. Setting a value equal to the current one does not cause any state
/// to be re-emitted.
impl CommandBuffer {
    /// Replaces the vertex input interface: the bindings with their strides, and the
    /// attributes.
    pub fn set_vertex_input(
        &mut self,
        bindings: &[(u32, VertexInputBinding)],
        attributes: &[(u32, VertexInputAttribute)],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetVertexInputEXT-commandBuffer-recording"])?;

        let mut bindings_seen = 0u32;

        for (index, &(binding, _)) in bindings.iter().enumerate() {
            if binding as usize >= MAX_VERTEX_ATTRIBUTES {
                return Err(Box::new(ValidationError {
                    context: format!("bindings[{index}].0").into(),
                    problem: "is not less than the maximum number of vertex input bindings"
                        .into(),
                    vuids: &["VUID-VkVertexInputBindingDescription2EXT-binding-04796"],
                    ..Default::default()
                }));
            }

            if bindings_seen & (1 << binding) != 0 {
                return Err(Box::new(ValidationError {
                    context: "bindings".into(),
                    problem: format!("binding {binding} is described more than once").into(),
                    vuids: &["VUID-vkCmdSetVertexInputEXT-pVertexBindingDescriptions-04794"],
                    ..Default::default()
                }));
            }

            bindings_seen |= 1 << binding;
        }

        for (index, (_, description)) in bindings.iter().enumerate() {
            description
                .validate()
                .map_err(|err| err.add_context(format!("bindings[{index}].1")))?;
        }

        let mut locations_seen = 0u32;

        for (index, &(location, attribute)) in attributes.iter().enumerate() {
            if location as usize >= MAX_VERTEX_ATTRIBUTES {
                return Err(Box::new(ValidationError {
                    context: format!("attributes[{index}].0").into(),
                    problem: "is not less than the maximum number of vertex attributes".into(),
                    vuids: &["VUID-VkVertexInputAttributeDescription2EXT-location-06228"],
                    ..Default::default()
                }));
            }

            if locations_seen & (1 << location) != 0 {
                return Err(Box::new(ValidationError {
                    context: "attributes".into(),
                    problem: format!("location {location} is described more than once").into(),
                    vuids: &["VUID-vkCmdSetVertexInputEXT-pVertexAttributeDescriptions-04795"],
                    ..Default::default()
                }));
            }

            locations_seen |= 1 << location;

            attribute
                .validate()
                .map_err(|err| err.add_context(format!("attributes[{index}].1")))?;

            if attribute.binding >= MAX_VERTEX_ATTRIBUTES as u32
                || bindings_seen & (1 << attribute.binding) == 0
            {
                return Err(Box::new(ValidationError {
                    context: format!("attributes[{index}].1.binding").into(),
                    problem: "is not one of the described bindings".into(),
                    vuids: &["VUID-vkCmdSetVertexInputEXT-binding-04793"],
                    ..Default::default()
                }));
            }
        }

        self.dynamic.set_vertex_input(bindings, attributes);

        Ok(self)
    }

    /// Sets the strides of vertex buffer bindings starting at `first_binding`.
    pub fn set_vertex_binding_strides(
        &mut self,
        first_binding: u32,
        strides: &[u32],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdBindVertexBuffers2-commandBuffer-recording"])?;

        if first_binding as usize + strides.len() > MAX_VERTEX_ATTRIBUTES {
            return Err(Box::new(ValidationError {
                problem: "`first_binding + strides.len()` is greater than the maximum number \
                    of vertex input bindings"
                    .into(),
                vuids: &["VUID-vkCmdBindVertexBuffers2-firstBinding-03355"],
                ..Default::default()
            }));
        }

        for (index, &stride) in strides.iter().enumerate() {
            validate_binding_stride(stride)
                .map_err(|err| err.add_context(format!("strides[{index}]")))?;
        }

        self.dynamic.set_vertex_binding_strides(first_binding, strides);

        Ok(self)
    }

    pub fn set_patch_control_points(
        &mut self,
        count: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetPatchControlPointsEXT-commandBuffer-recording"])?;

        if count == 0 || count > MAX_PATCH_CONTROL_POINTS {
            return Err(Box::new(ValidationError {
                context: "count".into(),
                problem: "is zero or greater than the maximum tessellation patch size".into(),
                vuids: &["VUID-vkCmdSetPatchControlPointsEXT-patchControlPoints-04874"],
                ..Default::default()
            }));
        }

        self.dynamic.set_patch_control_points(count);

        Ok(self)
    }

    /// Sets viewports starting at `first_viewport`, keeping the viewport count.
    pub fn set_viewports(
        &mut self,
        first_viewport: u32,
        viewports: &[Viewport],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetViewport-commandBuffer-recording"])?;
        validate_range(
            first_viewport,
            viewports.len(),
            MAX_VIEWPORTS,
            "viewports",
            &["VUID-vkCmdSetViewport-firstViewport-01223"],
        )?;

        self.dynamic.set_viewports(first_viewport, viewports);

        Ok(self)
    }

    /// Sets the viewport count and every viewport.
    pub fn set_viewports_with_count(
        &mut self,
        viewports: &[Viewport],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetViewportWithCount-commandBuffer-recording"])?;
        validate_range(
            0,
            viewports.len(),
            MAX_VIEWPORTS,
            "viewports",
            &["VUID-vkCmdSetViewportWithCount-viewportCount-03394"],
        )?;

        self.dynamic.set_viewports_with_count(viewports);

        Ok(self)
    }

    /// Sets scissors starting at `first_scissor`, keeping the scissor count.
    pub fn set_scissors(
        &mut self,
        first_scissor: u32,
        scissors: &[Scissor],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetScissor-commandBuffer-recording"])?;
        validate_range(
            first_scissor,
            scissors.len(),
            MAX_VIEWPORTS,
            "scissors",
            &["VUID-vkCmdSetScissor-firstScissor-00592"],
        )?;
        validate_scissors(scissors)?;

        self.dynamic.set_scissors(first_scissor, scissors);

        Ok(self)
    }

    /// Sets the scissor count and every scissor.
    pub fn set_scissors_with_count(
        &mut self,
        scissors: &[Scissor],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetScissorWithCount-commandBuffer-recording"])?;
        validate_range(
            0,
            scissors.len(),
            MAX_VIEWPORTS,
            "scissors",
            &["VUID-vkCmdSetScissorWithCount-scissorCount-03397"],
        )?;
        validate_scissors(scissors)?;

        self.dynamic.set_scissors_with_count(scissors);

        Ok(self)
    }

    pub fn set_rasterization_stream(
        &mut self,
        stream: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetRasterizationStreamEXT-commandBuffer-recording"])?;

        if stream >= MAX_RASTERIZATION_STREAMS {
            return Err(Box::new(ValidationError {
                context: "stream".into(),
                problem: "is not less than the number of transform feedback streams".into(),
                vuids: &["VUID-vkCmdSetRasterizationStreamEXT-rasterizationStream-07477"],
                ..Default::default()
            }));
        }

        self.dynamic.set_rasterization_stream(stream);

        Ok(self)
    }

    pub fn set_line_width(&mut self, width: f32) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetLineWidth-commandBuffer-recording"])?;

        if !(width.is_finite() && width > 0.0) {
            return Err(Box::new(ValidationError {
                context: "width".into(),
                problem: "is not a positive number".into(),
                vuids: &["VUID-vkCmdSetLineWidth-lineWidth-00788"],
                ..Default::default()
            }));
        }

        self.dynamic.set_line_width(width);

        Ok(self)
    }

    /// Sets the line stipple: each bit of `pattern` covers `factor` pixels.
    pub fn set_line_stipple(
        &mut self,
        factor: u32,
        pattern: u16,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetLineStippleKHR-commandBuffer-recording"])?;

        if !(1..=256).contains(&factor) {
            return Err(Box::new(ValidationError {
                context: "factor".into(),
                problem: "is not between 1 and 256 inclusive".into(),
                vuids: &["VUID-vkCmdSetLineStippleKHR-lineStippleFactor-02776"],
                ..Default::default()
            }));
        }

        self.dynamic.set_line_stipple(factor, pattern);

        Ok(self)
    }

    pub fn set_rasterization_samples(
        &mut self,
        samples: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetRasterizationSamplesEXT-commandBuffer-recording"])?;

        if !samples.is_power_of_two() || samples > 16 {
            return Err(Box::new(ValidationError {
                context: "samples".into(),
                problem: "is not a supported sample count".into(),
                vuids: &["VUID-vkCmdSetRasterizationSamplesEXT-rasterizationSamples-parameter"],
                ..Default::default()
            }));
        }

        self.dynamic.set_rasterization_samples(samples);

        Ok(self)
    }

    pub fn set_sample_locations_enable(
        &mut self,
        enable: bool,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&[
            "VUID-vkCmdSetSampleLocationsEnableEXT-commandBuffer-recording",
        ])?;
        self.validate_sample_locations_supported()?;

        self.dynamic.set_sample_locations_enable(enable);

        Ok(self)
    }

    /// Sets custom sample locations, used while sample locations are enabled.
    pub fn set_sample_locations(
        &mut self,
        locations: SampleLocations,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetSampleLocationsEXT-commandBuffer-recording"])?;
        self.validate_sample_locations_supported()?;

        let count = locations.per_pixel as usize
            * locations.grid_size[0] as usize
            * locations.grid_size[1] as usize;

        if !locations.per_pixel.is_power_of_two() || count > MAX_SAMPLE_LOCATIONS {
            return Err(Box::new(ValidationError {
                context: "locations".into(),
                problem: "describes more sample locations than can be stored".into(),
                vuids: &["VUID-VkSampleLocationsInfoEXT-sampleLocationsCount-01527"],
                ..Default::default()
            }));
        }

        if locations.locations[..count]
            .iter()
            .flatten()
            .any(|coordinate| !(0.0..=1.0).contains(coordinate))
        {
            return Err(Box::new(ValidationError {
                context: "locations.locations".into(),
                problem: "contains a coordinate outside the pixel".into(),
                ..Default::default()
            }));
        }

        self.dynamic.set_sample_locations(locations);

        Ok(self)
    }

    fn validate_sample_locations_supported(&self) -> Result<(), Box<ValidationError>> {
        if !self.device().properties().sample_locations {
            return Err(Box::new(ValidationError {
                problem: "the device does not support custom sample locations".into(),
                requires_one_of: &["sample_locations"],
                vuids: &["VUID-vkCmdSetSampleLocationsEXT-None-09423"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    /// Sets the depth bounds. Both must be between 0 and 1 inclusive.
    pub fn set_depth_bounds(
        &mut self,
        min: f32,
        max: f32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetDepthBounds-commandBuffer-recording"])?;

        if !(0.0..=1.0).contains(&min) {
            return Err(Box::new(ValidationError {
                context: "min".into(),
                problem: "is not between 0.0 and 1.0 inclusive".into(),
                vuids: &["VUID-vkCmdSetDepthBounds-minDepthBounds-00600"],
                ..Default::default()
            }));
        }

        if !(0.0..=1.0).contains(&max) {
            return Err(Box::new(ValidationError {
                context: "max".into(),
                problem: "is not between 0.0 and 1.0 inclusive".into(),
                vuids: &["VUID-vkCmdSetDepthBounds-maxDepthBounds-00601"],
                ..Default::default()
            }));
        }

        self.dynamic.set_depth_bounds(min, max);

        Ok(self)
    }

    pub fn set_stencil_op(
        &mut self,
        faces: StencilFaces,
        ops: StencilOps,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetStencilOp-commandBuffer-recording"])?;
        self.dynamic.set_stencil_op(faces, ops);

        Ok(self)
    }

    pub fn set_stencil_compare_mask(
        &mut self,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetStencilCompareMask-commandBuffer-recording"])?;
        self.dynamic.set_stencil_compare_mask(faces, mask);

        Ok(self)
    }

    pub fn set_stencil_write_mask(
        &mut self,
        faces: StencilFaces,
        mask: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetStencilWriteMask-commandBuffer-recording"])?;
        self.dynamic.set_stencil_write_mask(faces, mask);

        Ok(self)
    }

    pub fn set_stencil_reference(
        &mut self,
        faces: StencilFaces,
        reference: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetStencilReference-commandBuffer-recording"])?;
        self.dynamic.set_stencil_reference(faces, reference);

        Ok(self)
    }

    /// Enables or disables color writes per attachment. Element `i` applies to attachment `i`;
    /// attachments past the end of `enables` are disabled.
    pub fn set_color_write_enable(
        &mut self,
        enables: &[bool],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetColorWriteEnableEXT-commandBuffer-recording"])?;
        validate_range(
            0,
            enables.len(),
            MAX_COLOR_ATTACHMENTS,
            "enables",
            &["VUID-vkCmdSetColorWriteEnableEXT-attachmentCount-06656"],
        )?;

        self.dynamic.set_color_write_enable(enables);

        Ok(self)
    }

    pub fn set_color_blend_enable(
        &mut self,
        first_attachment: u32,
        enables: &[bool],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetColorBlendEnableEXT-commandBuffer-recording"])?;
        validate_range(
            first_attachment,
            enables.len(),
            MAX_COLOR_ATTACHMENTS,
            "enables",
            &["VUID-vkCmdSetColorBlendEnableEXT-attachmentCount-arraylength"],
        )?;

        self.dynamic.set_color_blend_enable(first_attachment, enables);

        Ok(self)
    }

    pub fn set_color_blend_equation(
        &mut self,
        first_attachment: u32,
        equations: &[ColorBlendEquation],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetColorBlendEquationEXT-commandBuffer-recording"])?;
        validate_range(
            first_attachment,
            equations.len(),
            MAX_COLOR_ATTACHMENTS,
            "equations",
            &["VUID-vkCmdSetColorBlendEquationEXT-attachmentCount-arraylength"],
        )?;

        self.dynamic
            .set_color_blend_equation(first_attachment, equations);

        Ok(self)
    }

    pub fn set_color_write_mask(
        &mut self,
        first_attachment: u32,
        masks: &[ColorComponents],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdSetColorWriteMaskEXT-commandBuffer-recording"])?;
        validate_range(
            first_attachment,
            masks.len(),
            MAX_COLOR_ATTACHMENTS,
            "masks",
            &["VUID-vkCmdSetColorWriteMaskEXT-attachmentCount-arraylength"],
        )?;

        self.dynamic.set_color_write_mask(first_attachment, masks);

        Ok(self)
    }

    /// Sets the pipeline fragment size and how it combines with the other shading rates.
    pub fn set_fragment_shading_rate(
        &mut self,
        fragment_size: [u32; 2],
        combiner_ops: [FragmentShadingRateCombinerOp; 2],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording(&[
            "VUID-vkCmdSetFragmentShadingRateKHR-commandBuffer-recording",
        ])?;

        if !self.device().properties().fragment_shading_rate {
            return Err(Box::new(ValidationError {
                problem: "the device does not support variable fragment shading rates".into(),
                requires_one_of: &["fragment_shading_rate"],
                vuids: &["VUID-vkCmdSetFragmentShadingRateKHR-pipelineFragmentShadingRate-04509"],
                ..Default::default()
            }));
        }

        if fragment_size
            .iter()
            .any(|&size| !matches!(size, 1 | 2 | 4))
        {
            return Err(Box::new(ValidationError {
                context: "fragment_size".into(),
                problem: "contains a size other than 1, 2 or 4".into(),
                vuids: &[
                    "VUID-vkCmdSetFragmentShadingRateKHR-pFragmentSize-04513",
                    "VUID-vkCmdSetFragmentShadingRateKHR-pFragmentSize-04514",
                ],
                ..Default::default()
            }));
        }

        self.dynamic
            .set_fragment_shading_rate(fragment_size, combiner_ops);

        Ok(self)
    }
}

fn validate_range(
    first: u32,
    len: usize,
    max: usize,
    context: &'static str,
    vuids: &'static [&'static str],
) -> Result<(), Box<ValidationError>> {
    if len == 0 {
        return Err(Box::new(ValidationError {
            context: context.into(),
            problem: "is empty".into(),
            ..Default::default()
        }));
    }

    if first as usize + len > max {
        return Err(Box::new(ValidationError {
            context: context.into(),
            problem: format!("reaches past the maximum of {max} elements").into(),
            vuids,
            ..Default::default()
        }));
    }

    Ok(())
}

fn validate_scissors(scissors: &[Scissor]) -> Result<(), Box<ValidationError>> {
    for (index, scissor) in scissors.iter().enumerate() {
        if scissor.offset[0] < 0 || scissor.offset[1] < 0 {
            return Err(Box::new(ValidationError {
                context: format!("scissors[{index}].offset").into(),
                problem: "is negative".into(),
                vuids: &["VUID-vkCmdSetScissor-x-00595"],
                ..Default::default()
            }));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        command_buffer::tests::recording,
        pipeline::{
            dynamic_state::{
                DynamicState, Scissor, StencilFaces, VertexInputAttribute, VertexInputBinding,
                Viewport, MAX_VERTEX_INPUT_ATTRIBUTE_OFFSET, MAX_VERTEX_INPUT_BINDING_STRIDE,
            },
            state::CullMode,
        },
    };

    #[test]
    fn setting_marks_dirty_once() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);
        cb.dynamic.clear_dirty();

        cb.set_cull_mode(CullMode::Back).unwrap();
        assert!(cb.dynamic.dirty().contains(DynamicState::CullMode));

        cb.dynamic.clear_dirty();
        cb.set_cull_mode(CullMode::Back).unwrap();
        assert!(cb.dynamic.dirty().is_empty());
    }

    #[test]
    fn vertex_layout_limits() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.set_vertex_binding_strides(0, &[MAX_VERTEX_INPUT_BINDING_STRIDE])
            .unwrap();
        assert!(cb.set_vertex_binding_strides(0, &[16, 4096]).is_err());
        assert_eq!(
            cb.dynamic_state().vertex_binding_strides[0],
            MAX_VERTEX_INPUT_BINDING_STRIDE,
        );

        let binding = VertexInputBinding {
            stride: 16,
            ..Default::default()
        };
        let attribute = VertexInputAttribute {
            offset: MAX_VERTEX_INPUT_ATTRIBUTE_OFFSET + 1,
            ..Default::default()
        };
        assert!(cb.set_vertex_input(&[(0, binding)], &[(0, attribute)]).is_err());

        let wide = VertexInputBinding {
            stride: MAX_VERTEX_INPUT_BINDING_STRIDE + 1,
            ..Default::default()
        };
        assert!(cb.set_vertex_input(&[(0, wide)], &[]).is_err());

        let attribute = VertexInputAttribute {
            offset: MAX_VERTEX_INPUT_ATTRIBUTE_OFFSET,
            ..Default::default()
        };
        cb.set_vertex_input(&[(0, binding)], &[(0, attribute)]).unwrap();
    }

    #[test]
    fn stencil_faces_are_set_separately() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.set_stencil_reference(StencilFaces::Front, 3).unwrap();
        cb.set_stencil_reference(StencilFaces::Back, 9).unwrap();

        let stencil = &cb.dynamic_state().depth_stencil.stencil;
        assert_eq!(stencil.front.reference, 3);
        assert_eq!(stencil.back.reference, 9);
    }

    #[test]
    fn viewport_range_is_checked() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        let err = cb
            .set_viewports(15, &[Viewport::default(), Viewport::default()])
            .unwrap_err();
        assert_eq!(err.vuids, ["VUID-vkCmdSetViewport-firstViewport-01223"]);

        cb.set_viewports_with_count(&[Viewport::default(); 2])
            .unwrap();
        assert_eq!(cb.dynamic_state().viewport.viewport_count, 2);
    }

    #[test]
    fn negative_scissor_is_rejected() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        let err = cb
            .set_scissors(
                0,
                &[Scissor {
                    offset: [-1, 0],
                    extent: [4, 4],
                }],
            )
            .unwrap_err();
        assert_eq!(err.context, "scissors[0].offset");
    }

    #[test]
    fn line_stipple_factor_bounds() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        assert!(cb.set_line_stipple(0, 0xffff).is_err());
        assert!(cb.set_line_stipple(257, 0xffff).is_err());
        cb.set_line_stipple(256, 0x0f0f).unwrap();

        let stipple = cb.dynamic_state().rasterization.line.stipple;
        assert_eq!(stipple.factor, 256);
        assert_eq!(stipple.pattern, 0x0f0f);
    }

    #[test]
    fn setters_require_recording() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);
        cb.end().unwrap();

        let err = cb.set_depth_test_enable(true).unwrap_err();
        assert_eq!(
            err.vuids,
            ["VUID-vkCmdSetDepthTestEnable-commandBuffer-recording"],
        );
    }
}
