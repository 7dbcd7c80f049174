// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Describes the layout of all descriptors within a descriptor set.
//!
//! A layout is compiled once into dense index spaces: every binding gets a first index in the
//! sampler, texture, image, uniform-buffer and dynamic-buffer tables, plus an offset in the
//! set's *descriptor UBO*, the BO holding the plain-bytes shadow of each descriptor.
//!
//! Identical layouts are interned on the device, so two calls to [`DescriptorSetLayout::new`]
//! with equal create infos return the same `Arc`.

use crate::{
    buffer::BVIEW_DESC_SIZE,
    device::Device,
    image::IMAGE_DESC_SIZE,
    macros::{impl_id_counter, vulkan_enum},
    memory::align_up,
    memory::DeviceAlignment,
    sampler::{Sampler, SAMPLER_DESC_SIZE},
    NonExhaustive, ValidationError,
};
use std::{collections::BTreeMap, num::NonZero, sync::Arc};

/// The size of a storage-buffer shadow: a 64-bit address, a 32-bit size and padding.
pub const SSBO_ADDR_SIZE: usize = 16;

const DESC_UBO_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(16) };

vulkan_enum! {
    /// Describes what kind of resource may later be bound to a descriptor.
    DescriptorType = DescriptorType(i32);

    /// Describes how a `SampledImage` descriptor should be read.
    Sampler = SAMPLER,

    /// Combines `SampledImage` and `Sampler` in one descriptor.
    CombinedImageSampler = COMBINED_IMAGE_SAMPLER,

    /// Gives read-only access to an image via a sampler.
    SampledImage = SAMPLED_IMAGE,

    /// Gives read and/or write access to individual pixels in an image.
    StorageImage = STORAGE_IMAGE,

    /// Gives read-only access to the content of a buffer, interpreted as an array of texel data.
    UniformTexelBuffer = UNIFORM_TEXEL_BUFFER,

    /// Gives read and/or write access to the content of a buffer, interpreted as an array of texel
    /// data.
    StorageTexelBuffer = STORAGE_TEXEL_BUFFER,

    /// Gives read-only access to the content of a buffer, interpreted as a structure.
    UniformBuffer = UNIFORM_BUFFER,

    /// Gives read and/or write access to the content of a buffer, interpreted as a structure.
    StorageBuffer = STORAGE_BUFFER,

    /// As `UniformBuffer`, but the offset within the buffer is specified at the time the descriptor
    /// set is bound, rather than when the descriptor set is updated.
    UniformBufferDynamic = UNIFORM_BUFFER_DYNAMIC,

    /// As `StorageBuffer`, but the offset within the buffer is specified at the time the descriptor
    /// set is bound, rather than when the descriptor set is updated.
    StorageBufferDynamic = STORAGE_BUFFER_DYNAMIC,

    /// Gives access to an image inside a fragment shader via a render pass.
    InputAttachment = INPUT_ATTACHMENT,
}

impl DescriptorType {
    /// Returns the stride of one array element in the descriptor UBO.
    pub const fn desc_ubo_stride(self) -> u32 {
        match self {
            Self::CombinedImageSampler
            | Self::SampledImage
            | Self::InputAttachment
            | Self::StorageImage => IMAGE_DESC_SIZE as u32,
            Self::UniformTexelBuffer | Self::StorageTexelBuffer => BVIEW_DESC_SIZE as u32,
            Self::StorageBuffer => SSBO_ADDR_SIZE as u32,
            Self::Sampler
            | Self::UniformBuffer
            | Self::UniformBufferDynamic
            | Self::StorageBufferDynamic => 0,
        }
    }

    /// Returns whether shaders may write through descriptors of this type.
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Self::StorageImage
                | Self::StorageTexelBuffer
                | Self::StorageBuffer
                | Self::StorageBufferDynamic
        )
    }
}

/// A binding in a descriptor set layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBinding {
    /// There is no default value.
    pub descriptor_type: DescriptorType,

    /// How many descriptors (array elements) this binding is made of.
    ///
    /// The default value is `1`.
    pub descriptor_count: u32,

    /// Samplers that are included as a fixed part of the layout.
    ///
    /// The list must be either empty, or contain exactly `descriptor_count` samplers. It can only
    /// be non-empty if `descriptor_type` is [`DescriptorType::Sampler`] or
    /// [`DescriptorType::CombinedImageSampler`].
    ///
    /// The default value is empty.
    pub immutable_samplers: Vec<Arc<Sampler>>,

    pub _ne: NonExhaustive,
}

impl DescriptorSetLayoutBinding {
    /// Returns a `DescriptorSetLayoutBinding` with the given type.
    #[inline]
    pub fn descriptor_type(descriptor_type: DescriptorType) -> Self {
        Self {
            descriptor_type,
            descriptor_count: 1,
            immutable_samplers: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if !self.immutable_samplers.is_empty() {
            if !matches!(
                self.descriptor_type,
                DescriptorType::Sampler | DescriptorType::CombinedImageSampler
            ) {
                return Err(Box::new(ValidationError {
                    problem: "`immutable_samplers` is not empty, but `descriptor_type` is not \
                        `DescriptorType::Sampler` or `DescriptorType::CombinedImageSampler`"
                        .into(),
                    ..Default::default()
                }));
            }

            if self.immutable_samplers.len() != self.descriptor_count as usize {
                return Err(Box::new(ValidationError {
                    problem: "`immutable_samplers` is not empty, but its length does not equal \
                        `descriptor_count`"
                        .into(),
                    vuids: &["VUID-VkDescriptorSetLayoutBinding-descriptorType-00282"],
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }
}

/// Parameters to create a new `DescriptorSetLayout`.
#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutCreateInfo {
    /// The bindings of the layout, by binding number.
    ///
    /// The default value is empty.
    pub bindings: BTreeMap<u32, DescriptorSetLayoutBinding>,

    pub _ne: NonExhaustive,
}

impl Default for DescriptorSetLayoutCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            bindings: BTreeMap::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl DescriptorSetLayoutCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        for (&binding_num, binding) in &self.bindings {
            binding
                .validate()
                .map_err(|err| err.add_context(format!("bindings[{}]", binding_num)))?;
        }

        Ok(())
    }

    fn key(&self) -> LayoutKey {
        LayoutKey {
            bindings: self
                .bindings
                .iter()
                .map(|(&num, binding)| {
                    (
                        num,
                        binding.descriptor_type,
                        binding.descriptor_count,
                        binding
                            .immutable_samplers
                            .iter()
                            .map(|sampler| *sampler.desc())
                            .collect(),
                    )
                })
                .collect(),
        }
    }
}

/// What identifies a layout in the device's interning cache.
///
/// Immutable samplers are keyed by their packed bytes, so the cache holds no samplers and the
/// samplers hold no cached layouts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct LayoutKey {
    bindings: Vec<(u32, DescriptorType, u32, Vec<[u8; SAMPLER_DESC_SIZE]>)>,
}

/// The compiled layout of one binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingLayout {
    pub descriptor_type: DescriptorType,
    pub array_size: u32,

    /// The first index of the binding in the set's resource list.
    pub desc_index: u32,
    pub sampler_index: u32,
    pub texture_index: u32,
    pub image_index: u32,
    pub ubo_index: u32,
    pub dyn_ubo_index: u32,
    pub dyn_ssbo_index: u32,

    pub desc_ubo_offset: u32,
    pub desc_ubo_stride: u32,

    /// Packed immutable samplers, one per array element, or empty.
    pub immutable_samplers: Vec<[u8; SAMPLER_DESC_SIZE]>,
}

/// Describes the layout of all descriptors within a descriptor set.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    id: NonZero<u64>,
    bindings: BTreeMap<u32, BindingLayout>,

    num_descs: u32,
    num_samplers: u32,
    num_textures: u32,
    num_images: u32,
    num_ubos: u32,
    num_dyn_ubos: u32,
    num_dyn_ssbos: u32,
    desc_ubo_size: u32,
    desc_ubo_index: Option<u32>,
}

impl DescriptorSetLayout {
    /// Returns the layout for `create_info`, compiling it if no identical layout was created on
    /// `device` before.
    pub fn new(
        device: &Device,
        create_info: DescriptorSetLayoutCreateInfo,
    ) -> Result<Arc<DescriptorSetLayout>, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(device, create_info))
    }

    #[doc(hidden)]
    pub fn new_unchecked(
        device: &Device,
        create_info: DescriptorSetLayoutCreateInfo,
    ) -> Arc<DescriptorSetLayout> {
        let key = create_info.key();

        match device
            .descriptor_set_layouts
            .get_or_try_insert(&key, || {
                Ok::<_, std::convert::Infallible>((key.clone(), Arc::new(Self::compile(&key))))
            }) {
            Ok(layout) => layout,
            Err(never) => match never {},
        }
    }

    fn compile(key: &LayoutKey) -> DescriptorSetLayout {
        let mut bindings = BTreeMap::new();

        let mut desc_index = 0;
        let mut sampler_index = 0;
        let mut texture_index = 0;
        let mut image_index = 0;
        let mut ubo_index = 0;
        let mut dyn_ubo_index = 0;
        let mut dyn_ssbo_index = 0;
        let mut desc_ubo_size = 0;

        // The key is sorted by binding number.
        for (binding_num, descriptor_type, array_size, immutable_samplers) in &key.bindings {
            let (descriptor_type, array_size) = (*descriptor_type, *array_size);

            let mut layout = BindingLayout {
                descriptor_type,
                array_size,
                desc_index,
                sampler_index: 0,
                texture_index: 0,
                image_index: 0,
                ubo_index: 0,
                dyn_ubo_index: 0,
                dyn_ssbo_index: 0,
                desc_ubo_offset: 0,
                desc_ubo_stride: descriptor_type.desc_ubo_stride(),
                immutable_samplers: immutable_samplers.clone(),
            };
            desc_index += array_size;

            match descriptor_type {
                DescriptorType::Sampler => {
                    layout.sampler_index = sampler_index;
                    sampler_index += array_size;
                }
                DescriptorType::CombinedImageSampler => {
                    layout.sampler_index = sampler_index;
                    layout.texture_index = texture_index;
                    sampler_index += array_size;
                    texture_index += array_size;
                }
                DescriptorType::SampledImage
                | DescriptorType::InputAttachment
                | DescriptorType::UniformTexelBuffer => {
                    layout.texture_index = texture_index;
                    texture_index += array_size;
                }
                DescriptorType::StorageImage | DescriptorType::StorageTexelBuffer => {
                    layout.image_index = image_index;
                    image_index += array_size;
                }
                DescriptorType::UniformBuffer => {
                    layout.ubo_index = ubo_index;
                    ubo_index += array_size;
                }
                DescriptorType::UniformBufferDynamic => {
                    layout.dyn_ubo_index = dyn_ubo_index;
                    dyn_ubo_index += array_size;
                }
                DescriptorType::StorageBufferDynamic => {
                    layout.dyn_ssbo_index = dyn_ssbo_index;
                    dyn_ssbo_index += array_size;
                }
                DescriptorType::StorageBuffer => (),
            }

            desc_ubo_size = align_up(desc_ubo_size, DESC_UBO_ALIGNMENT);
            layout.desc_ubo_offset = desc_ubo_size as u32;
            desc_ubo_size += u64::from(layout.desc_ubo_stride) * u64::from(array_size);

            bindings.insert(*binding_num, layout);
        }

        // The descriptor UBO itself takes the last uniform-buffer slot.
        let desc_ubo_index = (desc_ubo_size > 0).then(|| {
            ubo_index += 1;
            ubo_index - 1
        });

        DescriptorSetLayout {
            id: Self::next_id(),
            bindings,
            num_descs: desc_index,
            num_samplers: sampler_index,
            num_textures: texture_index,
            num_images: image_index,
            num_ubos: ubo_index,
            num_dyn_ubos: dyn_ubo_index,
            num_dyn_ssbos: dyn_ssbo_index,
            desc_ubo_size: desc_ubo_size as u32,
            desc_ubo_index,
        }
    }

    /// Returns the compiled bindings, by binding number.
    #[inline]
    pub fn bindings(&self) -> &BTreeMap<u32, BindingLayout> {
        &self.bindings
    }

    #[inline]
    pub fn binding(&self, binding: u32) -> Option<&BindingLayout> {
        self.bindings.get(&binding)
    }

    /// Returns the binding that array elements past the end of `binding` wrap onto.
    pub fn next_binding(&self, binding: u32) -> Option<(u32, &BindingLayout)> {
        self.bindings
            .range(binding + 1..)
            .find(|(_, layout)| layout.array_size > 0)
            .map(|(&num, layout)| (num, layout))
    }

    #[inline]
    pub fn num_descs(&self) -> u32 {
        self.num_descs
    }

    #[inline]
    pub fn num_samplers(&self) -> u32 {
        self.num_samplers
    }

    #[inline]
    pub fn num_textures(&self) -> u32 {
        self.num_textures
    }

    #[inline]
    pub fn num_images(&self) -> u32 {
        self.num_images
    }

    /// Returns the number of uniform-buffer slots, including the descriptor UBO.
    #[inline]
    pub fn num_ubos(&self) -> u32 {
        self.num_ubos
    }

    #[inline]
    pub fn num_dyn_ubos(&self) -> u32 {
        self.num_dyn_ubos
    }

    #[inline]
    pub fn num_dyn_ssbos(&self) -> u32 {
        self.num_dyn_ssbos
    }

    #[inline]
    pub fn desc_ubo_size(&self) -> u32 {
        self.desc_ubo_size
    }

    /// Returns the uniform-buffer slot of the descriptor UBO, if the layout has one.
    #[inline]
    pub fn desc_ubo_index(&self) -> Option<u32> {
        self.desc_ubo_index
    }
}

impl_id_counter!(DescriptorSetLayout);

#[cfg(test)]
mod tests {
    use super::{DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorType};
    use crate::sampler::{Sampler, SamplerCreateInfo};
    use std::{collections::BTreeMap, sync::Arc};

    fn binding(ty: DescriptorType, count: u32) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding {
            descriptor_count: count,
            ..DescriptorSetLayoutBinding::descriptor_type(ty)
        }
    }

    #[test]
    fn index_spaces() {
        let (device, _service) = dev!();

        let layout = DescriptorSetLayout::new(
            &device,
            DescriptorSetLayoutCreateInfo {
                bindings: BTreeMap::from([
                    (4, binding(DescriptorType::StorageBuffer, 2)),
                    (0, binding(DescriptorType::CombinedImageSampler, 3)),
                    (1, binding(DescriptorType::UniformBuffer, 2)),
                    (2, binding(DescriptorType::Sampler, 1)),
                    (3, binding(DescriptorType::UniformTexelBuffer, 1)),
                    (5, binding(DescriptorType::UniformBufferDynamic, 2)),
                    (6, binding(DescriptorType::StorageImage, 1)),
                ]),
                ..Default::default()
            },
        )
        .unwrap();

        let b0 = layout.binding(0).unwrap();
        assert_eq!((b0.sampler_index, b0.texture_index), (0, 0));
        assert_eq!((b0.desc_ubo_offset, b0.desc_ubo_stride), (0, 16));

        let b2 = layout.binding(2).unwrap();
        assert_eq!(b2.sampler_index, 3);

        let b3 = layout.binding(3).unwrap();
        assert_eq!(b3.texture_index, 3);
        assert_eq!((b3.desc_ubo_offset, b3.desc_ubo_stride), (48, 4));

        // Storage buffers only live in the descriptor UBO, aligned to 16.
        let b4 = layout.binding(4).unwrap();
        assert_eq!((b4.desc_ubo_offset, b4.desc_ubo_stride), (64, 16));

        let b6 = layout.binding(6).unwrap();
        assert_eq!(b6.image_index, 0);
        assert_eq!(b6.desc_ubo_offset, 96);
        assert_eq!(b6.desc_index, 11);

        assert_eq!(layout.num_samplers(), 4);
        assert_eq!(layout.num_textures(), 4);
        assert_eq!(layout.num_images(), 1);
        assert_eq!(layout.num_dyn_ubos(), 2);
        assert_eq!(layout.desc_ubo_size(), 112);
        assert_eq!(layout.desc_ubo_index(), Some(2));
        assert_eq!(layout.num_ubos(), 3);
    }

    #[test]
    fn identical_layouts_are_interned() {
        let (device, _service) = dev!();
        let info = DescriptorSetLayoutCreateInfo {
            bindings: BTreeMap::from([(0, binding(DescriptorType::UniformBuffer, 1))]),
            ..Default::default()
        };

        let a = DescriptorSetLayout::new(&device, info.clone()).unwrap();
        let b = DescriptorSetLayout::new(&device, info).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.desc_ubo_index(), None);

        let c = DescriptorSetLayout::new(
            &device,
            DescriptorSetLayoutCreateInfo {
                bindings: BTreeMap::from([(0, binding(DescriptorType::UniformBuffer, 2))]),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn immutable_sampler_count_must_match() {
        let (device, _service) = dev!();
        let sampler = Sampler::new(device.clone(), SamplerCreateInfo::default()).unwrap();

        let err = DescriptorSetLayout::new(
            &device,
            DescriptorSetLayoutCreateInfo {
                bindings: BTreeMap::from([(
                    0,
                    DescriptorSetLayoutBinding {
                        descriptor_count: 2,
                        immutable_samplers: vec![sampler],
                        ..DescriptorSetLayoutBinding::descriptor_type(DescriptorType::Sampler)
                    },
                )]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.context, "create_info.bindings[0]");
    }
}
