// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Linear GPU memory and formatted views of it.
//!
//! A [`Buffer`] is sized through the device's [memory-requirements
//! cache](crate::memory::requirements) and backed by its own BO. A [`BufferView`] interprets a
//! range of a buffer as an array of texels, for use as a uniform or storage texel buffer.

use crate::{
    device::Device,
    format::Format,
    macros::impl_id_counter,
    memory::{
        requirements::BufferRequirementsInfo, Bo, BoFlags, BufferCreateFlags, BufferUsage,
        MemoryRequirements,
    },
    pack::mali::{descriptor_type, AttributeBuffer, Texture, TextureDimension},
    DeviceOwned, DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use std::{num::NonZero, sync::Arc};

/// The size of the element count shadowed in descriptor UBOs for texel buffers.
pub const BVIEW_DESC_SIZE: usize = 4;

/// Parameters to create a new `Buffer`.
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    /// The size in bytes.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: DeviceSize,

    /// The default value is empty, which must be overridden.
    pub usage: BufferUsage,

    /// The default value is empty.
    pub flags: BufferCreateFlags,

    pub _ne: NonExhaustive,
}

impl Default for BufferCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            size: 0,
            usage: BufferUsage::empty(),
            flags: BufferCreateFlags::empty(),
            _ne: NonExhaustive(()),
        }
    }
}

impl BufferCreateInfo {
    pub(crate) fn validate(&self, device: &Device) -> Result<(), Box<ValidationError>> {
        if self.size == 0 {
            return Err(Box::new(ValidationError {
                context: "size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkBufferCreateInfo-size-00912"],
                ..Default::default()
            }));
        }

        if self.size > device.properties().max_buffer_size {
            return Err(Box::new(ValidationError {
                context: "size".into(),
                problem: "exceeds the `max_buffer_size` device property".into(),
                vuids: &["VUID-VkBufferCreateInfo-size-06409"],
                ..Default::default()
            }));
        }

        if self.usage.is_empty() {
            return Err(Box::new(ValidationError {
                context: "usage".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkBufferCreateInfo-usage-requiredbitmask"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// Linear GPU memory.
#[derive(Debug)]
pub struct Buffer {
    device: Arc<Device>,
    id: NonZero<u64>,
    bo: Arc<Bo>,
    size: DeviceSize,
    usage: BufferUsage,
    requirements: MemoryRequirements,
}

impl Buffer {
    /// Creates a new `Buffer` backed by its own BO.
    pub fn new(
        device: Arc<Device>,
        create_info: BufferCreateInfo,
    ) -> Result<Arc<Buffer>, Validated<VulkanError>> {
        create_info
            .validate(&device)
            .map_err(|err| err.add_context("create_info"))?;

        unsafe { Ok(Self::new_unchecked(device, create_info)?) }
    }

    #[doc(hidden)]
    pub unsafe fn new_unchecked(
        device: Arc<Device>,
        create_info: BufferCreateInfo,
    ) -> Result<Arc<Buffer>, VulkanError> {
        let BufferCreateInfo {
            size,
            usage,
            flags,
            _ne: _,
        } = create_info;

        let requirements = device.buffer_memory_requirements(&BufferRequirementsInfo {
            size,
            usage,
            flags,
            ..Default::default()
        })?;

        let bo = Bo::new(
            device.service(),
            requirements.size,
            requirements.alignment,
            BoFlags::GART | BoFlags::MAPPED | BoFlags::COHERENT,
        )?;

        Ok(Arc::new(Buffer {
            device,
            id: Self::next_id(),
            bo,
            size,
            usage,
            requirements,
        }))
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Returns the size the buffer was created with.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn memory_requirements(&self) -> &MemoryRequirements {
        &self.requirements
    }

    /// Returns the GPU address of the byte at `offset`.
    #[inline]
    pub fn device_address(&self, offset: DeviceSize) -> u64 {
        self.bo.gpu_addr() + offset
    }

    /// Returns the number of bytes from `offset` covered by `range`, where `None` means the
    /// rest of the buffer.
    #[inline]
    pub fn range(&self, offset: DeviceSize, range: Option<DeviceSize>) -> DeviceSize {
        range.unwrap_or(self.size.saturating_sub(offset))
    }
}

impl DeviceOwned for Buffer {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(Buffer);

/// Parameters to create a new `BufferView`.
#[derive(Clone, Debug)]
pub struct BufferViewCreateInfo {
    pub format: Format,

    /// The default value is `0`.
    pub offset: DeviceSize,

    /// The number of bytes viewed. `None` views the rest of the buffer.
    ///
    /// The default value is `None`.
    pub range: Option<DeviceSize>,

    pub _ne: NonExhaustive,
}

impl BufferViewCreateInfo {
    #[inline]
    pub fn new(format: Format) -> Self {
        Self {
            format,
            offset: 0,
            range: None,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self, buffer: &Buffer) -> Result<(), Box<ValidationError>> {
        if !buffer
            .usage()
            .intersects(BufferUsage::UNIFORM_TEXEL_BUFFER | BufferUsage::STORAGE_TEXEL_BUFFER)
        {
            return Err(Box::new(ValidationError {
                context: "buffer.usage()".into(),
                problem: "contains neither `BufferUsage::UNIFORM_TEXEL_BUFFER` nor \
                    `BufferUsage::STORAGE_TEXEL_BUFFER`"
                    .into(),
                vuids: &["VUID-VkBufferViewCreateInfo-buffer-00932"],
                ..Default::default()
            }));
        }

        if buffer
            .device()
            .format_database()
            .hw_format(self.format)
            .is_none()
        {
            return Err(Box::new(ValidationError {
                context: "format".into(),
                problem: "is not supported for texel buffers".into(),
                ..Default::default()
            }));
        }

        if self.offset >= buffer.size() {
            return Err(Box::new(ValidationError {
                context: "offset".into(),
                problem: "is not less than the size of `buffer`".into(),
                vuids: &["VUID-VkBufferViewCreateInfo-offset-00925"],
                ..Default::default()
            }));
        }

        let range = buffer.range(self.offset, self.range);

        if self.offset + range > buffer.size() {
            return Err(Box::new(ValidationError {
                context: "range".into(),
                problem: "`offset + range` is greater than the size of `buffer`".into(),
                vuids: &["VUID-VkBufferViewCreateInfo-range-00931"],
                ..Default::default()
            }));
        }

        if range < DeviceSize::from(self.format.block_size()) {
            return Err(Box::new(ValidationError {
                context: "range".into(),
                problem: "is smaller than one texel".into(),
                vuids: &["VUID-VkBufferViewCreateInfo-range-00928"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// A range of a buffer interpreted as texels.
#[derive(Debug)]
pub struct BufferView {
    buffer: Arc<Buffer>,
    id: NonZero<u64>,
    format: Format,
    offset: DeviceSize,
    range: DeviceSize,
    texture: [u8; 32],
}

impl BufferView {
    pub fn new(
        buffer: Arc<Buffer>,
        create_info: BufferViewCreateInfo,
    ) -> Result<Arc<BufferView>, Box<ValidationError>> {
        create_info
            .validate(&buffer)
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(buffer, create_info))
    }

    #[doc(hidden)]
    pub fn new_unchecked(buffer: Arc<Buffer>, create_info: BufferViewCreateInfo) -> Arc<BufferView> {
        let BufferViewCreateInfo {
            format,
            offset,
            range,
            _ne: _,
        } = create_info;

        let range = buffer.range(offset, range);
        let elements = (range / DeviceSize::from(format.block_size().max(1))) as u32;

        let texture = Texture {
            ty: descriptor_type::TEXTURE,
            dimension: TextureDimension::D1,
            format: buffer
                .device()
                .format_database()
                .hw_format(format)
                .unwrap_or(0),
            width: elements.max(1),
            height: 1,
            depth: 1,
            levels: 1,
            array_size: 1,
            swizzle: 0b011_010_001_000,
            surfaces: buffer.device_address(offset),
            surface_stride: format.block_size(),
            ..Default::default()
        }
        .to_bytes();

        Arc::new(BufferView {
            buffer,
            id: Self::next_id(),
            format,
            offset,
            range,
            texture,
        })
    }

    #[inline]
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    #[inline]
    pub fn range(&self) -> DeviceSize {
        self.range
    }

    /// Returns the number of whole texels in the view.
    #[inline]
    pub fn element_count(&self) -> u32 {
        (self.range / DeviceSize::from(self.format.block_size().max(1))) as u32
    }

    /// Returns the packed `TEXTURE` record used for uniform texel buffers.
    #[inline]
    pub fn texture(&self) -> &[u8; 32] {
        &self.texture
    }

    /// Returns the element count shadowed in descriptor UBOs.
    #[inline]
    pub fn bview_desc(&self) -> [u8; BVIEW_DESC_SIZE] {
        self.element_count().to_le_bytes()
    }

    /// Returns the attribute buffer through which shaders access the view as a storage texel
    /// buffer.
    pub fn attribute_buffer(&self) -> AttributeBuffer {
        AttributeBuffer {
            ty: descriptor_type::ATTRIBUTE_BUFFER_1D,
            pointer: self.buffer.device_address(self.offset),
            stride: self.format.block_size(),
            size: u32::try_from(self.range).unwrap_or(u32::MAX),
        }
    }
}

impl DeviceOwned for BufferView {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        self.buffer.device()
    }
}

impl_id_counter!(BufferView);

#[cfg(test)]
mod tests {
    use super::{Buffer, BufferCreateInfo, BufferView, BufferViewCreateInfo};
    use crate::{
        device::DeviceProperties,
        format::Format,
        memory::BufferUsage,
        pack::{mali::Texture, PackRecord},
        Validated,
    };

    #[test]
    fn create() {
        let (device, service) = dev!();

        let info = BufferCreateInfo {
            size: 128,
            usage: BufferUsage::UNIFORM_BUFFER,
            ..Default::default()
        };
        let a = Buffer::new(device.clone(), info.clone()).unwrap();
        let b = Buffer::new(device.clone(), info).unwrap();

        assert_eq!(a.memory_requirements(), b.memory_requirements());
        assert!(a.memory_requirements().size >= 128);
        assert_eq!(service.requirement_query_count(), 1);
        assert_ne!(a.device_address(0), b.device_address(0));
    }

    #[test]
    fn too_large() {
        let (device, _service) = dev!(DeviceProperties {
            max_buffer_size: 1024,
            ..Default::default()
        });

        match Buffer::new(
            device,
            BufferCreateInfo {
                size: 2048,
                usage: BufferUsage::STORAGE_BUFFER,
                ..Default::default()
            },
        ) {
            Err(Validated::ValidationError(err)) => assert_eq!(err.context, "create_info.size"),
            _ => panic!(),
        }
    }

    #[test]
    fn texel_view() {
        let (device, _service) = dev!();
        let buffer = Buffer::new(
            device,
            BufferCreateInfo {
                size: 256,
                usage: BufferUsage::UNIFORM_TEXEL_BUFFER,
                ..Default::default()
            },
        )
        .unwrap();

        let view = BufferView::new(
            buffer.clone(),
            BufferViewCreateInfo {
                offset: 64,
                ..BufferViewCreateInfo::new(Format::R32G32B32A32_SFLOAT)
            },
        )
        .unwrap();

        assert_eq!(view.range(), 192);
        assert_eq!(view.element_count(), 12);
        assert_eq!(view.bview_desc(), 12u32.to_le_bytes());
        assert_eq!(
            Texture::raw(view.texture(), "surfaces"),
            Some(buffer.device_address(64)),
        );
        assert_eq!(Texture::raw(view.texture(), "width"), Some(11));
    }

    #[test]
    fn view_needs_texel_usage() {
        let (device, _service) = dev!();
        let buffer = Buffer::new(
            device,
            BufferCreateInfo {
                size: 256,
                usage: BufferUsage::VERTEX_BUFFER,
                ..Default::default()
            },
        )
        .unwrap();

        let err = BufferView::new(buffer, BufferViewCreateInfo::new(Format::R8_UNORM)).unwrap_err();
        assert_eq!(err.context, "create_info.buffer.usage()");
    }
}
