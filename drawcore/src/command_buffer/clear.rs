// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Clearing regions of the current attachments from inside rendering.
//!
//! The clear is recorded as 3D-class methods: the clear values are latched first, then every
//! rectangle is programmed and one `CLEAR_SURFACE` is issued per selected layer (or per view
//! when multiview is active).

use super::{CommandBuffer, RenderingState};
use crate::{
    pack::nv::{mthd::three_d, ClearRectHorizontal, ClearRectVertical, ClearSurface,
        ClearSurfaceControl, Push, Subchannel},
    ValidationError,
};
use std::ops::Range;

/// A value that a color attachment is cleared to.
///
/// The variant must match the numeric type of the attachment's format.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearColorValue {
    /// For float, unorm, snorm and srgb formats.
    Float([f32; 4]),
    /// For sint formats.
    Int([i32; 4]),
    /// For uint formats.
    Uint([u32; 4]),
}

impl ClearColorValue {
    /// Returns the four words the hardware latches, in RGBA order.
    fn words(self) -> [u32; 4] {
        match self {
            ClearColorValue::Float(v) => v.map(f32::to_bits),
            ClearColorValue::Int(v) => v.map(|c| c as u32),
            ClearColorValue::Uint(v) => v,
        }
    }
}

/// An attachment cleared by [`CommandBuffer::clear_attachments`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearAttachment {
    /// Clear the color attachment at the specified index, with the specified clear value.
    Color {
        color_attachment: u32,
        clear_value: ClearColorValue,
    },

    /// Clear the depth attachment with the specified depth value.
    Depth(f32),

    /// Clear the stencil attachment with the specified stencil value.
    Stencil(u32),

    /// Clear the depth and stencil attachments with the specified depth and stencil values.
    DepthStencil((f32, u32)),
}

/// A region cleared by [`CommandBuffer::clear_attachments`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearRect {
    /// The rectangle offset.
    pub offset: [u32; 2],

    /// The width and height of the rectangle.
    pub extent: [u32; 2],

    /// The range of array layers to be cleared. Must be `0..1` while multiview is active.
    pub array_layers: Range<u32>,
}

impl ClearRect {
    fn validate(&self, rendering: &RenderingState) -> Result<(), Box<ValidationError>> {
        if self.extent[0] == 0 || self.extent[1] == 0 {
            return Err(Box::new(ValidationError {
                context: "extent".into(),
                problem: "is zero".into(),
                vuids: &["VUID-vkCmdClearAttachments-rect-02682", "VUID-vkCmdClearAttachments-rect-02683"],
                ..Default::default()
            }));
        }

        if self.array_layers.is_empty() {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "is empty".into(),
                vuids: &["VUID-vkCmdClearAttachments-layerCount-01934"],
                ..Default::default()
            }));
        }

        if let Some(area) = &rendering.area {
            for axis in 0..2 {
                if self.offset[axis] < area.offset[axis]
                    || self.offset[axis] + self.extent[axis] > area.offset[axis] + area.extent[axis]
                {
                    return Err(Box::new(ValidationError {
                        problem: "the rectangle is not contained in the render area".into(),
                        vuids: &["VUID-vkCmdClearAttachments-pRects-00016"],
                        ..Default::default()
                    }));
                }
            }
        }

        if rendering.view_mask != 0 {
            if self.array_layers != (0..1) {
                return Err(Box::new(ValidationError {
                    context: "array_layers".into(),
                    problem: "is not `0..1` while multiview is active".into(),
                    vuids: &["VUID-vkCmdClearAttachments-baseArrayLayer-00018"],
                    ..Default::default()
                }));
            }
        } else if self.array_layers.end > rendering.layer_count {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "exceeds the layer count of the rendering".into(),
                vuids: &["VUID-vkCmdClearAttachments-pRects-06937"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

impl CommandBuffer {
    /// Clears regions of the current attachments.
    ///
    /// Color attachments whose index is not bound are skipped.
    pub fn clear_attachments(
        &mut self,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_clear_attachments(attachments, rects)?;

        let Some(rendering) = &self.rendering else {
            return Ok(self);
        };

        let push = clear_push(rendering, attachments, rects);
        self.record(|cb| cb.resources.stream.emit_push(&push));

        Ok(self)
    }

    fn validate_clear_attachments(
        &self,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording(&["VUID-vkCmdClearAttachments-commandBuffer-recording"])?;

        let Some(rendering) = &self.rendering else {
            return Err(Box::new(ValidationError {
                problem: "rendering is not active".into(),
                vuids: &["VUID-vkCmdClearAttachments-renderpass"],
                ..Default::default()
            }));
        };

        for (index, attachment) in attachments.iter().enumerate() {
            match *attachment {
                ClearAttachment::Color {
                    color_attachment, ..
                } => {
                    if color_attachment as usize >= rendering.color_formats.len() {
                        return Err(Box::new(ValidationError {
                            context: format!("attachments[{index}].color_attachment").into(),
                            problem: "is not less than the number of color attachments".into(),
                            vuids: &["VUID-vkCmdClearAttachments-aspectMask-07271"],
                            ..Default::default()
                        }));
                    }
                }
                ClearAttachment::Depth(_) if !rendering.has_depth() => {
                    return Err(Box::new(ValidationError {
                        context: format!("attachments[{index}]").into(),
                        problem: "clears depth, but no depth attachment is bound".into(),
                        vuids: &["VUID-vkCmdClearAttachments-aspectMask-07884"],
                        ..Default::default()
                    }));
                }
                ClearAttachment::Stencil(_) if !rendering.has_stencil() => {
                    return Err(Box::new(ValidationError {
                        context: format!("attachments[{index}]").into(),
                        problem: "clears stencil, but no stencil attachment is bound".into(),
                        vuids: &["VUID-vkCmdClearAttachments-aspectMask-07885"],
                        ..Default::default()
                    }));
                }
                ClearAttachment::DepthStencil(_)
                    if !rendering.has_depth() || !rendering.has_stencil() =>
                {
                    return Err(Box::new(ValidationError {
                        context: format!("attachments[{index}]").into(),
                        problem: "clears depth and stencil, but they are not both bound".into(),
                        vuids: &[
                            "VUID-vkCmdClearAttachments-aspectMask-07884",
                            "VUID-vkCmdClearAttachments-aspectMask-07885",
                        ],
                        ..Default::default()
                    }));
                }
                _ => (),
            }
        }

        for (index, rect) in rects.iter().enumerate() {
            rect.validate(rendering)
                .map_err(|err| err.add_context(format!("rects[{index}]")))?;
        }

        Ok(())
    }
}

/// Builds the methods clearing `attachments` over `rects`.
///
/// Depth and stencil ride along with the first color clear; without one they get a pass of
/// their own.
fn clear_push(
    rendering: &RenderingState,
    attachments: &[ClearAttachment],
    rects: &[ClearRect],
) -> Push {
    let mut push = Push::new();

    push.immd_record(
        Subchannel::ThreeD,
        three_d::SET_CLEAR_SURFACE_CONTROL,
        &ClearSurfaceControl {
            respect_stencil_mask: false,
            use_clear_rect: true,
            use_scissor0: false,
            use_viewport_clip0: false,
        },
    );

    let mut clear_depth = false;
    let mut clear_stencil = false;

    for attachment in attachments {
        let (depth, stencil) = match *attachment {
            ClearAttachment::Depth(depth) => (Some(depth), None),
            ClearAttachment::Stencil(stencil) => (None, Some(stencil)),
            ClearAttachment::DepthStencil((depth, stencil)) => (Some(depth), Some(stencil)),
            ClearAttachment::Color { .. } => continue,
        };

        if let Some(depth) = depth {
            push.immd(Subchannel::ThreeD, three_d::SET_Z_CLEAR_VALUE, depth.to_bits());
            clear_depth = true;
        }

        if let Some(stencil) = stencil {
            push.immd(Subchannel::ThreeD, three_d::SET_STENCIL_CLEAR_VALUE, stencil & 0xff);
            clear_stencil = true;
        }
    }

    for attachment in attachments {
        let ClearAttachment::Color {
            color_attachment,
            clear_value,
        } = *attachment
        else {
            continue;
        };

        if !rendering
            .color_formats
            .get(color_attachment as usize)
            .is_some_and(Option::is_some)
        {
            continue;
        }

        push.mthd(Subchannel::ThreeD, three_d::SET_COLOR_CLEAR_VALUE);
        for word in clear_value.words() {
            push.data(word);
        }

        clear_rects(&mut push, rendering, Some(color_attachment), clear_depth, clear_stencil, rects);

        clear_depth = false;
        clear_stencil = false;
    }

    if clear_depth || clear_stencil {
        clear_rects(&mut push, rendering, None, clear_depth, clear_stencil, rects);
    }

    push
}

fn clear_rects(
    push: &mut Push,
    rendering: &RenderingState,
    color_attachment: Option<u32>,
    clear_depth: bool,
    clear_stencil: bool,
    rects: &[ClearRect],
) {
    let color = color_attachment.is_some();
    let surface = |rt_array_index| ClearSurface {
        z_enable: clear_depth,
        stencil_enable: clear_stencil,
        r_enable: color,
        g_enable: color,
        b_enable: color,
        a_enable: color,
        mrt_select: color_attachment.unwrap_or(0),
        rt_array_index,
    };

    for rect in rects {
        push.mthd(Subchannel::ThreeD, three_d::SET_CLEAR_RECT_HORIZONTAL)
            .record(&ClearRectHorizontal {
                xmin: rect.offset[0],
                xmax: rect.offset[0] + rect.extent[0],
            })
            .record(&ClearRectVertical {
                ymin: rect.offset[1],
                ymax: rect.offset[1] + rect.extent[1],
            });

        if rendering.view_mask != 0 {
            for view in (0..32).filter(|view| rendering.view_mask & (1 << view) != 0) {
                push.immd_record(Subchannel::ThreeD, three_d::CLEAR_SURFACE, &surface(view));
            }
        } else {
            for layer in rect.array_layers.clone() {
                push.immd_record(Subchannel::ThreeD, three_d::CLEAR_SURFACE, &surface(layer));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClearAttachment, ClearColorValue, ClearRect};
    use crate::{
        command_buffer::{tests::recording, RenderingInfo},
        device::Device,
        format::Format,
        image::{ImageView, ImageViewCreateInfo, ImageViewType},
        memory::{Bo, BoFlags, DeviceAlignment},
        pack::nv::{self, dword, mthd::three_d, ClearRectHorizontal, ClearRectVertical,
            ClearSurface, ClearSurfaceControl, Subchannel},
    };
    use std::sync::Arc;

    fn view(device: &Arc<Device>, format: Format, array_layers: u32) -> Arc<ImageView> {
        let bo = Bo::new(device.service(), 1 << 20, DeviceAlignment::MIN, BoFlags::VRAM).unwrap();

        ImageView::new(
            device.clone(),
            ImageViewCreateInfo {
                extent: [64, 64, 1],
                view_type: if array_layers > 1 {
                    ImageViewType::Dim2dArray
                } else {
                    ImageViewType::Dim2d
                },
                array_layers,
                ..ImageViewCreateInfo::new(bo, format)
            },
        )
        .unwrap()
    }

    fn rect(x: u32, y: u32, width: u32, height: u32) -> ClearRect {
        ClearRect {
            offset: [x, y],
            extent: [width, height],
            array_layers: 0..1,
        }
    }

    /// Returns the dwords recorded after `start`.
    fn recorded_since(cb: &crate::command_buffer::CommandBuffer, start: usize) -> Vec<u32> {
        cb.stream_dwords()[start..].to_vec()
    }

    fn clear_surface(color: bool, depth: bool, stencil: bool, layer: u32) -> u32 {
        let surface = ClearSurface {
            z_enable: depth,
            stencil_enable: stencil,
            r_enable: color,
            g_enable: color,
            b_enable: color,
            a_enable: color,
            mrt_select: 0,
            rt_array_index: layer,
        };

        let value = dword(&surface);
        assert!(value <= nv::MAX_IMMEDIATE);

        nv::immd(Subchannel::ThreeD, three_d::CLEAR_SURFACE, value)
    }

    #[test]
    fn two_rects_one_view() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.begin_rendering(RenderingInfo {
            view_mask: 0b01,
            color_attachments: vec![Some(view(&device, Format::R8G8B8A8_UNORM, 1))],
            depth_attachment: Some(view(&device, Format::D24_UNORM_S8_UINT, 1)),
            stencil_attachment: Some(view(&device, Format::D24_UNORM_S8_UINT, 1)),
            ..Default::default()
        })
        .unwrap();

        let start = cb.stream_dwords().len();
        cb.clear_attachments(
            &[
                ClearAttachment::Color {
                    color_attachment: 0,
                    clear_value: ClearColorValue::Float([0.5, 0.25, 0.0, 1.0]),
                },
                ClearAttachment::DepthStencil((0.0, 0)),
            ],
            &[rect(0, 0, 16, 16), rect(32, 8, 8, 4)],
        )
        .unwrap();

        let control = ClearSurfaceControl {
            use_clear_rect: true,
            ..Default::default()
        };
        let rect_methods = |x0: u32, y0: u32, x1: u32, y1: u32| {
            [
                nv::sq(Subchannel::ThreeD, three_d::SET_CLEAR_RECT_HORIZONTAL, 2),
                dword(&ClearRectHorizontal { xmin: x0, xmax: x1 }),
                dword(&ClearRectVertical { ymin: y0, ymax: y1 }),
            ]
        };

        let mut expected = vec![
            nv::immd(Subchannel::ThreeD, three_d::SET_CLEAR_SURFACE_CONTROL, dword(&control)),
            nv::immd(Subchannel::ThreeD, three_d::SET_Z_CLEAR_VALUE, 0),
            nv::immd(Subchannel::ThreeD, three_d::SET_STENCIL_CLEAR_VALUE, 0),
            nv::sq(Subchannel::ThreeD, three_d::SET_COLOR_CLEAR_VALUE, 4),
            0.5f32.to_bits(),
            0.25f32.to_bits(),
            0.0f32.to_bits(),
            1.0f32.to_bits(),
        ];
        expected.extend(rect_methods(0, 0, 16, 16));
        expected.push(clear_surface(true, true, true, 0));
        expected.extend(rect_methods(32, 8, 40, 12));
        expected.push(clear_surface(true, true, true, 0));

        assert_eq!(recorded_since(&cb, start), expected);
    }

    #[test]
    fn layers_without_multiview() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.begin_rendering(RenderingInfo {
            layer_count: 4,
            depth_attachment: Some(view(&device, Format::D32_SFLOAT, 4)),
            ..Default::default()
        })
        .unwrap();

        let start = cb.stream_dwords().len();
        cb.clear_attachments(
            &[ClearAttachment::Depth(1.0)],
            &[ClearRect {
                array_layers: 1..3,
                ..rect(0, 0, 64, 64)
            }],
        )
        .unwrap();

        let dwords = recorded_since(&cb, start);
        let clears: Vec<u32> = dwords
            .iter()
            .copied()
            .filter(|&dw| nv::decode(dw).is_some_and(|(_, _, _, m)| m == three_d::CLEAR_SURFACE))
            .collect();
        assert_eq!(
            clears,
            [
                clear_surface(false, true, false, 1),
                clear_surface(false, true, false, 2),
            ],
        );

        // 1.0 does not fit in an immediate header.
        assert!(dwords.windows(2).any(|w| w
            == [nv::sq(Subchannel::ThreeD, three_d::SET_Z_CLEAR_VALUE, 1), 1.0f32.to_bits()]));
    }

    #[test]
    fn rect_outside_render_area_is_rejected() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.begin_rendering(RenderingInfo {
            render_area_extent: [32, 32],
            color_attachments: vec![Some(view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();

        let err = cb
            .clear_attachments(
                &[ClearAttachment::Color {
                    color_attachment: 0,
                    clear_value: ClearColorValue::Uint([0; 4]),
                }],
                &[rect(16, 16, 32, 8)],
            )
            .unwrap_err();
        assert_eq!(err.problem, "the rectangle is not contained in the render area");
    }

    #[test]
    fn missing_depth_attachment_is_rejected() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![Some(view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();

        let err = cb
            .clear_attachments(&[ClearAttachment::Depth(0.0)], &[rect(0, 0, 1, 1)])
            .unwrap_err();
        assert_eq!(err.context, "attachments[0]");
    }

    #[test]
    fn unbound_color_slot_is_skipped() {
        let (device, _service) = dev!();
        let mut cb = recording(&device);

        cb.begin_rendering(RenderingInfo {
            color_attachments: vec![None, Some(view(&device, Format::R8G8B8A8_UNORM, 1))],
            ..Default::default()
        })
        .unwrap();

        let start = cb.stream_dwords().len();
        cb.clear_attachments(
            &[ClearAttachment::Color {
                color_attachment: 0,
                clear_value: ClearColorValue::Int([-1; 4]),
            }],
            &[rect(0, 0, 1, 1)],
        )
        .unwrap();

        // Only the control method remains.
        assert_eq!(recorded_since(&cb, start).len(), 1);
    }
}
