// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Views of image memory, as bound to descriptor sets and render passes.
//!
//! Image allocation and layout are owned by the application layer. An [`ImageView`] is created
//! over a BO that already holds the image, and carries everything descriptor writes need: the
//! packed `TEXTURE` record, its index in the device's image heap, and the size information that
//! descriptor sets shadow in their descriptor UBO.

use crate::{
    device::Device,
    format::Format,
    macros::{impl_id_counter, vulkan_bitflags, vulkan_enum},
    memory::Bo,
    pack::mali::{descriptor_type, AttributeBuffer, Texture, TextureDimension},
    DeviceOwned, DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use std::{num::NonZero, sync::Arc};

vulkan_bitflags! {
    /// The aspects of an image format.
    ImageAspects = ImageAspectFlags(u32);

    COLOR = COLOR,
    DEPTH = DEPTH,
    STENCIL = STENCIL,
}

vulkan_bitflags! {
    /// What an image is going to be used for.
    ImageUsage = ImageUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    SAMPLED = SAMPLED,
    STORAGE = STORAGE,
    COLOR_ATTACHMENT = COLOR_ATTACHMENT,
    DEPTH_STENCIL_ATTACHMENT = DEPTH_STENCIL_ATTACHMENT,
    TRANSIENT_ATTACHMENT = TRANSIENT_ATTACHMENT,
    INPUT_ATTACHMENT = INPUT_ATTACHMENT,
}

vulkan_enum! {
    /// The dimensionality of an image view.
    ImageViewType = ImageViewType(i32);

    Dim1d = TYPE_1D,
    Dim2d = TYPE_2D,
    Dim3d = TYPE_3D,
    Cube = CUBE,
    Dim1dArray = TYPE_1D_ARRAY,
    Dim2dArray = TYPE_2D_ARRAY,
    CubeArray = CUBE_ARRAY,
}

impl ImageViewType {
    #[inline]
    pub fn is_arrayed(self) -> bool {
        matches!(self, Self::Dim1dArray | Self::Dim2dArray | Self::CubeArray)
    }

    #[inline]
    pub fn is_cube(self) -> bool {
        matches!(self, Self::Cube | Self::CubeArray)
    }
}

impl From<ImageViewType> for TextureDimension {
    fn from(val: ImageViewType) -> Self {
        match val {
            ImageViewType::Dim1d | ImageViewType::Dim1dArray => Self::D1,
            ImageViewType::Dim2d | ImageViewType::Dim2dArray => Self::D2,
            ImageViewType::Dim3d => Self::D3,
            ImageViewType::Cube | ImageViewType::CubeArray => Self::Cube,
        }
    }
}

/// The size of the image information shadowed in descriptor UBOs.
pub const IMAGE_DESC_SIZE: usize = 16;

/// RGBA mapped to themselves, three bits per channel.
const IDENTITY_SWIZZLE: u32 = 0b011_010_001_000;

/// Parameters to create a new `ImageView`.
#[derive(Clone, Debug)]
pub struct ImageViewCreateInfo {
    /// The memory holding the image.
    pub bo: Arc<Bo>,

    /// The offset of the first texel in `bo`.
    ///
    /// The default value is `0`.
    pub offset: DeviceSize,

    pub format: Format,

    /// The default value is [`ImageViewType::Dim2d`].
    pub view_type: ImageViewType,

    /// The size of the base mip level.
    ///
    /// The default value is `[1; 3]`.
    pub extent: [u32; 3],

    /// The default value is `1`.
    pub array_layers: u32,

    /// The default value is `1`.
    pub mip_levels: u32,

    /// The default value is `1`.
    pub samples: u32,

    /// The distance in bytes between two rows. When zero, rows are tightly packed.
    ///
    /// The default value is `0`.
    pub row_pitch: u32,

    pub _ne: NonExhaustive,
}

impl ImageViewCreateInfo {
    /// Returns an `ImageViewCreateInfo` with the specified `bo` and `format`.
    #[inline]
    pub fn new(bo: Arc<Bo>, format: Format) -> Self {
        Self {
            bo,
            offset: 0,
            format,
            view_type: ImageViewType::Dim2d,
            extent: [1; 3],
            array_layers: 1,
            mip_levels: 1,
            samples: 1,
            row_pitch: 0,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        if self.format == Format::UNDEFINED {
            return Err(Box::new(ValidationError {
                context: "format".into(),
                problem: "is `Format::UNDEFINED`".into(),
                ..Default::default()
            }));
        }

        if device.format_database().hw_format(self.format).is_none() {
            return Err(Box::new(ValidationError {
                context: "format".into(),
                problem: "is not supported by the device".into(),
                ..Default::default()
            }));
        }

        if self.extent.contains(&0) {
            return Err(Box::new(ValidationError {
                context: "extent".into(),
                problem: "contains zero".into(),
                ..Default::default()
            }));
        }

        if self.array_layers == 0 || self.mip_levels == 0 {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "the layer or level count is zero".into(),
                ..Default::default()
            }));
        }

        if !self.samples.is_power_of_two() || self.samples > 16 {
            return Err(Box::new(ValidationError {
                context: "samples".into(),
                problem: "is not a power of two between 1 and 16".into(),
                ..Default::default()
            }));
        }

        if !self.view_type.is_arrayed() && !self.view_type.is_cube() && self.array_layers != 1 {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "is not 1, but `view_type` is not an array type".into(),
                ..Default::default()
            }));
        }

        if self.view_type.is_cube() && self.array_layers % 6 != 0 {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "is not a multiple of 6, but `view_type` is a cube type".into(),
                ..Default::default()
            }));
        }

        if self.offset >= self.bo.size() {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not less than the size of `bo`".into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// A view of image memory.
#[derive(Debug)]
pub struct ImageView {
    device: Arc<Device>,
    id: NonZero<u64>,
    bo: Arc<Bo>,
    offset: DeviceSize,
    format: Format,
    view_type: ImageViewType,
    extent: [u32; 3],
    array_layers: u32,
    mip_levels: u32,
    samples: u32,
    row_pitch: u32,
    texture: [u8; 32],
    heap_index: u32,
}

impl ImageView {
    /// Creates a new `ImageView` and registers it in the device's image heap.
    pub fn new(
        device: Arc<Device>,
        create_info: ImageViewCreateInfo,
    ) -> Result<Arc<ImageView>, Validated<VulkanError>> {
        create_info
            .validate(&device)
            .map_err(|err| err.add_context("create_info"))?;

        unsafe { Ok(Self::new_unchecked(device, create_info)?) }
    }

    #[doc(hidden)]
    pub unsafe fn new_unchecked(
        device: Arc<Device>,
        create_info: ImageViewCreateInfo,
    ) -> Result<Arc<ImageView>, VulkanError> {
        let ImageViewCreateInfo {
            bo,
            offset,
            format,
            view_type,
            extent,
            array_layers,
            mip_levels,
            samples,
            row_pitch,
            _ne: _,
        } = create_info;

        let row_pitch = if row_pitch == 0 {
            extent[0] * format.block_size()
        } else {
            row_pitch
        };

        let texture = Texture {
            ty: descriptor_type::TEXTURE,
            dimension: view_type.into(),
            format: device.format_database().hw_format(format).unwrap_or(0),
            width: extent[0],
            height: extent[1],
            depth: extent[2],
            swizzle: IDENTITY_SWIZZLE,
            levels: mip_levels,
            sample_count_log2: samples.trailing_zeros(),
            array_size: array_layers,
            surfaces: bo.gpu_addr() + offset,
            surface_stride: row_pitch,
        }
        .to_bytes();

        let heap_index = device.image_heap().add(&texture)?;

        Ok(Arc::new(ImageView {
            device,
            id: Self::next_id(),
            bo,
            offset,
            format,
            view_type,
            extent,
            array_layers,
            mip_levels,
            samples,
            row_pitch,
            texture,
            heap_index,
        }))
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn view_type(&self) -> ImageViewType {
        self.view_type
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    #[inline]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Returns the GPU address of the first texel.
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.bo.gpu_addr() + self.offset
    }

    /// Returns the packed `TEXTURE` record.
    #[inline]
    pub fn texture(&self) -> &[u8; 32] {
        &self.texture
    }

    /// Returns the index of this view in the device's image heap.
    #[inline]
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }

    /// Returns the size information shadowed in descriptor UBOs: width, height and depth as
    /// `u32`, then the level count and sample count as `u16`.
    ///
    /// Layers of 1D arrays are folded into the height, layers of the other array types into the
    /// depth.
    pub fn image_desc(&self) -> [u8; IMAGE_DESC_SIZE] {
        let [width, mut height, mut depth] = self.extent;

        match self.view_type {
            ImageViewType::Dim1dArray => height = self.array_layers,
            ImageViewType::Dim2dArray | ImageViewType::Cube | ImageViewType::CubeArray => {
                depth = self.array_layers
            }
            ImageViewType::Dim1d | ImageViewType::Dim2d | ImageViewType::Dim3d => (),
        }

        let mut desc = [0u8; IMAGE_DESC_SIZE];
        desc[0..4].copy_from_slice(&width.to_le_bytes());
        desc[4..8].copy_from_slice(&height.to_le_bytes());
        desc[8..12].copy_from_slice(&depth.to_le_bytes());
        desc[12..14].copy_from_slice(&(self.mip_levels as u16).to_le_bytes());
        desc[14..16].copy_from_slice(&(self.samples as u16).to_le_bytes());

        desc
    }

    /// Returns the attribute buffer through which shaders access the view as a storage image.
    pub fn attribute_buffer(&self) -> AttributeBuffer {
        let [_, height, depth] = self.extent;
        let size = u64::from(self.row_pitch)
            * u64::from(height)
            * u64::from(depth.max(self.array_layers));

        AttributeBuffer {
            ty: descriptor_type::ATTRIBUTE_BUFFER_1D,
            pointer: self.base_address(),
            stride: self.format.block_size(),
            size: u32::try_from(size).unwrap_or(u32::MAX),
        }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.device.image_heap().remove(self.heap_index);
    }
}

impl DeviceOwned for ImageView {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(ImageView);

#[cfg(test)]
mod tests {
    use super::{ImageView, ImageViewCreateInfo, ImageViewType};
    use crate::{
        format::Format,
        memory::{Bo, BoFlags, DeviceAlignment},
        pack::{mali::Texture, PackRecord},
        Validated,
    };

    #[test]
    fn texture_and_heap_entry() {
        let (device, _service) = dev!();
        let bo = Bo::new(device.service(), 4096, DeviceAlignment::MIN, BoFlags::VRAM).unwrap();

        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo {
                extent: [16, 8, 1],
                mip_levels: 3,
                ..ImageViewCreateInfo::new(bo.clone(), Format::R8G8B8A8_UNORM)
            },
        )
        .unwrap();

        let texture = view.texture();
        assert_eq!(Texture::raw(texture, "width"), Some(15));
        assert_eq!(Texture::raw(texture, "height"), Some(7));
        assert_eq!(Texture::raw(texture, "levels"), Some(2));
        assert_eq!(Texture::raw(texture, "surfaces"), Some(bo.gpu_addr()));
        assert_eq!(Texture::raw(texture, "surface_stride"), Some(64));
        assert_eq!(&device.image_heap().read(view.heap_index()), texture);

        let index = view.heap_index();
        drop(view);
        let other = ImageView::new(
            device,
            ImageViewCreateInfo::new(bo, Format::R8G8B8A8_UNORM),
        )
        .unwrap();
        assert_eq!(other.heap_index(), index);
    }

    #[test]
    fn array_layers_are_folded() {
        let (device, _service) = dev!();
        let bo = Bo::new(device.service(), 4096, DeviceAlignment::MIN, BoFlags::VRAM).unwrap();

        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo {
                view_type: ImageViewType::Dim1dArray,
                extent: [32, 1, 1],
                array_layers: 4,
                ..ImageViewCreateInfo::new(bo.clone(), Format::R32_UINT)
            },
        )
        .unwrap();
        let desc = view.image_desc();
        assert_eq!(&desc[0..4], &32u32.to_le_bytes());
        assert_eq!(&desc[4..8], &4u32.to_le_bytes());
        assert_eq!(&desc[8..12], &1u32.to_le_bytes());

        let view = ImageView::new(
            device,
            ImageViewCreateInfo {
                view_type: ImageViewType::Dim2dArray,
                extent: [8, 8, 1],
                array_layers: 3,
                samples: 4,
                ..ImageViewCreateInfo::new(bo, Format::R32_UINT)
            },
        )
        .unwrap();
        let desc = view.image_desc();
        assert_eq!(&desc[4..8], &8u32.to_le_bytes());
        assert_eq!(&desc[8..12], &3u32.to_le_bytes());
        assert_eq!(&desc[12..14], &1u16.to_le_bytes());
        assert_eq!(&desc[14..16], &4u16.to_le_bytes());
    }

    #[test]
    fn invalid_create_info() {
        let (device, _service) = dev!();
        let bo = Bo::new(device.service(), 4096, DeviceAlignment::MIN, BoFlags::VRAM).unwrap();

        match ImageView::new(
            device.clone(),
            ImageViewCreateInfo {
                array_layers: 2,
                ..ImageViewCreateInfo::new(bo.clone(), Format::R8_UNORM)
            },
        ) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "create_info.array_layers");
            }
            _ => panic!(),
        }

        match ImageView::new(device, ImageViewCreateInfo::new(bo, Format::UNDEFINED)) {
            Err(Validated::ValidationError(err)) => assert_eq!(err.context, "create_info.format"),
            _ => panic!(),
        }
    }
}
