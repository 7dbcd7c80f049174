// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    layout::{BindingLayout, DescriptorSetLayout, DescriptorType},
    DescriptorSet,
};
use crate::{
    buffer::{Buffer, BufferView},
    image::ImageView,
    memory::BufferUsage,
    sampler::Sampler,
    DeviceSize, ValidationError,
};
use smallvec::SmallVec;
use std::{ops::Range, sync::Arc};

/// Represents a single write operation to the binding of a descriptor set.
///
/// `WriteDescriptorSet` specifies the binding number and target array index, and includes one or
/// more resources of a given type that need to be written to that location. Two constructors are
/// provided for each resource type:
/// - The basic constructor variant writes a single element to array index 0. It is intended for
///   non-arrayed bindings, where `descriptor_count` in the descriptor set layout is 1.
/// - The `_array` variant writes several elements and allows specifying the target array index.
///   At least one element must be provided; a panic results if the provided iterator is empty.
///
/// Elements past the end of the binding continue at array element 0 of the next binding with a
/// non-zero descriptor count.
#[derive(Clone, Debug)]
pub struct WriteDescriptorSet {
    binding: u32,
    first_array_element: u32,
    elements: WriteDescriptorSetElements,
}

impl WriteDescriptorSet {
    /// Write a single buffer to array element 0, with the bound range covering the whole buffer.
    #[inline]
    pub fn buffer(binding: u32, buffer: Arc<Buffer>) -> Self {
        let range = 0..buffer.size();
        Self::buffer_with_range_array(
            binding,
            0,
            [DescriptorBufferInfo { buffer, range }],
        )
    }

    /// Write a number of consecutive buffer elements.
    #[inline]
    pub fn buffer_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<Buffer>>,
    ) -> Self {
        Self::buffer_with_range_array(
            binding,
            first_array_element,
            elements.into_iter().map(|buffer| {
                let range = 0..buffer.size();
                DescriptorBufferInfo { buffer, range }
            }),
        )
    }

    /// Write a single buffer to array element 0, specifying the range of the buffer to be bound.
    #[inline]
    pub fn buffer_with_range(binding: u32, buffer_info: DescriptorBufferInfo) -> Self {
        Self::buffer_with_range_array(binding, 0, [buffer_info])
    }

    /// Write a number of consecutive buffer elements, specifying the ranges of the buffers to be
    /// bound.
    pub fn buffer_with_range_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = DescriptorBufferInfo>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::Buffer(elements),
        }
    }

    /// Write a single buffer view to array element 0.
    #[inline]
    pub fn buffer_view(binding: u32, buffer_view: Arc<BufferView>) -> Self {
        Self::buffer_view_array(binding, 0, [buffer_view])
    }

    /// Write a number of consecutive buffer view elements.
    pub fn buffer_view_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<BufferView>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::BufferView(elements),
        }
    }

    /// Write a single image view to array element 0.
    ///
    /// For combined image-sampler bindings, the binding must have immutable samplers.
    #[inline]
    pub fn image_view(binding: u32, image_view: Arc<ImageView>) -> Self {
        Self::image_view_array(binding, 0, [image_view])
    }

    /// Write a number of consecutive image view elements.
    pub fn image_view_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<ImageView>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::ImageView(elements),
        }
    }

    /// Write a single image view and sampler to array element 0.
    #[inline]
    pub fn image_view_sampler(
        binding: u32,
        image_view: Arc<ImageView>,
        sampler: Arc<Sampler>,
    ) -> Self {
        Self::image_view_sampler_array(binding, 0, [(image_view, sampler)])
    }

    /// Write a number of consecutive image view and sampler elements.
    pub fn image_view_sampler_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = (Arc<ImageView>, Arc<Sampler>)>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::ImageViewSampler(elements),
        }
    }

    /// Write a single sampler to array element 0.
    #[inline]
    pub fn sampler(binding: u32, sampler: Arc<Sampler>) -> Self {
        Self::sampler_array(binding, 0, [sampler])
    }

    /// Write a number of consecutive sampler elements.
    pub fn sampler_array(
        binding: u32,
        first_array_element: u32,
        elements: impl IntoIterator<Item = Arc<Sampler>>,
    ) -> Self {
        let elements: SmallVec<_> = elements.into_iter().collect();
        assert!(!elements.is_empty());

        Self {
            binding,
            first_array_element,
            elements: WriteDescriptorSetElements::Sampler(elements),
        }
    }

    /// Returns the binding number that is updated by this descriptor write.
    #[inline]
    pub fn binding(&self) -> u32 {
        self.binding
    }

    /// Returns the first array element in the binding that is updated by this descriptor write.
    #[inline]
    pub fn first_array_element(&self) -> u32 {
        self.first_array_element
    }

    /// Returns a reference to the elements held by this descriptor write.
    #[inline]
    pub fn elements(&self) -> &WriteDescriptorSetElements {
        &self.elements
    }

    pub(crate) fn validate(
        &self,
        layout: &DescriptorSetLayout,
    ) -> Result<(), Box<ValidationError>> {
        let mut element_index = 0;

        for (binding_num, binding, _, count) in
            walk_bindings(layout, self.binding, self.first_array_element, self.elements.len())?
        {
            self.validate_binding(binding_num, binding, element_index..element_index + count)?;
            element_index += count;
        }

        Ok(())
    }

    fn validate_binding(
        &self,
        binding_num: u32,
        binding: &BindingLayout,
        elements: Range<u32>,
    ) -> Result<(), Box<ValidationError>> {
        let descriptor_type = binding.descriptor_type;

        let type_mismatch = || {
            Box::new(ValidationError {
                context: "elements".into(),
                problem: format!(
                    "the elements do not match the descriptor type of binding {} \
                    (`DescriptorType::{:?}`)",
                    binding_num, descriptor_type,
                )
                .into(),
                vuids: &["VUID-VkWriteDescriptorSet-descriptorType-00330"],
                ..Default::default()
            })
        };
        let range = elements.start as usize..elements.end as usize;

        match &self.elements {
            WriteDescriptorSetElements::Buffer(infos) => {
                let required_usage = match descriptor_type {
                    DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic => {
                        BufferUsage::UNIFORM_BUFFER
                    }
                    DescriptorType::StorageBuffer | DescriptorType::StorageBufferDynamic => {
                        BufferUsage::STORAGE_BUFFER
                    }
                    _ => return Err(type_mismatch()),
                };

                for (index, info) in infos[range.clone()].iter().enumerate() {
                    let index = range.start + index;

                    if !info.buffer.usage().intersects(required_usage) {
                        return Err(Box::new(ValidationError {
                            context: format!("elements[{}].buffer.usage()", index).into(),
                            problem: format!(
                                "does not contain `{:?}`, which the descriptor type requires",
                                required_usage,
                            )
                            .into(),
                            vuids: &[
                                "VUID-VkWriteDescriptorSet-descriptorType-00330",
                                "VUID-VkWriteDescriptorSet-descriptorType-00331",
                            ],
                            ..Default::default()
                        }));
                    }

                    if info.range.is_empty() || info.range.end > info.buffer.size() {
                        return Err(Box::new(ValidationError {
                            context: format!("elements[{}].range", index).into(),
                            problem: "is empty, or exceeds the size of the buffer".into(),
                            vuids: &[
                                "VUID-VkDescriptorBufferInfo-offset-00340",
                                "VUID-VkDescriptorBufferInfo-range-00341",
                            ],
                            ..Default::default()
                        }));
                    }
                }
            }
            WriteDescriptorSetElements::BufferView(views) => {
                let required_usage = match descriptor_type {
                    DescriptorType::UniformTexelBuffer => BufferUsage::UNIFORM_TEXEL_BUFFER,
                    DescriptorType::StorageTexelBuffer => BufferUsage::STORAGE_TEXEL_BUFFER,
                    _ => return Err(type_mismatch()),
                };

                for (index, view) in views[range.clone()].iter().enumerate() {
                    if !view.buffer().usage().intersects(required_usage) {
                        return Err(Box::new(ValidationError {
                            context: format!("elements[{}].buffer().usage()", range.start + index)
                                .into(),
                            problem: format!(
                                "does not contain `{:?}`, which the descriptor type requires",
                                required_usage,
                            )
                            .into(),
                            vuids: &[
                                "VUID-VkWriteDescriptorSet-descriptorType-00334",
                                "VUID-VkWriteDescriptorSet-descriptorType-00335",
                            ],
                            ..Default::default()
                        }));
                    }
                }
            }
            WriteDescriptorSetElements::ImageView(_) => match descriptor_type {
                DescriptorType::SampledImage
                | DescriptorType::StorageImage
                | DescriptorType::InputAttachment => (),
                DescriptorType::CombinedImageSampler
                    if !binding.immutable_samplers.is_empty() => {}
                DescriptorType::CombinedImageSampler => {
                    return Err(Box::new(ValidationError {
                        context: "elements".into(),
                        problem: format!(
                            "binding {} is a combined image-sampler binding without immutable \
                            samplers, but no samplers were provided",
                            binding_num,
                        )
                        .into(),
                        ..Default::default()
                    }));
                }
                _ => return Err(type_mismatch()),
            },
            WriteDescriptorSetElements::ImageViewSampler(_) => {
                if descriptor_type != DescriptorType::CombinedImageSampler {
                    return Err(type_mismatch());
                }
            }
            WriteDescriptorSetElements::Sampler(_) => {
                if descriptor_type != DescriptorType::Sampler {
                    return Err(type_mismatch());
                }

                if !binding.immutable_samplers.is_empty() {
                    return Err(Box::new(ValidationError {
                        context: "elements".into(),
                        problem: format!(
                            "binding {} has immutable samplers, which cannot be overwritten",
                            binding_num,
                        )
                        .into(),
                        vuids: &["VUID-VkWriteDescriptorSet-descriptorType-02752"],
                        ..Default::default()
                    }));
                }
            }
        }

        Ok(())
    }
}

/// The elements held by a `WriteDescriptorSet`.
#[derive(Clone, Debug)]
pub enum WriteDescriptorSetElements {
    Buffer(SmallVec<[DescriptorBufferInfo; 1]>),
    BufferView(SmallVec<[Arc<BufferView>; 1]>),
    ImageView(SmallVec<[Arc<ImageView>; 1]>),
    ImageViewSampler(SmallVec<[(Arc<ImageView>, Arc<Sampler>); 1]>),
    Sampler(SmallVec<[Arc<Sampler>; 1]>),
}

impl WriteDescriptorSetElements {
    /// Returns the number of elements.
    #[inline]
    pub fn len(&self) -> u32 {
        match self {
            Self::Buffer(elements) => elements.len() as u32,
            Self::BufferView(elements) => elements.len() as u32,
            Self::ImageView(elements) => elements.len() as u32,
            Self::ImageViewSampler(elements) => elements.len() as u32,
            Self::Sampler(elements) => elements.len() as u32,
        }
    }
}

/// Parameters to write a buffer reference to a descriptor.
#[derive(Clone, Debug)]
pub struct DescriptorBufferInfo {
    /// The buffer to write to the descriptor.
    pub buffer: Arc<Buffer>,

    /// The slice of bytes in `buffer` that will be made available to the shader.
    ///
    /// For dynamic buffer bindings, `range` specifies the slice that is to be bound if the
    /// dynamic offset were zero. When binding the descriptor set, the effective value of `range`
    /// shifts forward by the offset that was provided.
    pub range: Range<DeviceSize>,
}

/// Represents a single copy operation to the binding of a descriptor set.
#[derive(Clone, Debug)]
pub struct CopyDescriptorSet {
    /// The source descriptor set to copy from.
    ///
    /// There is no default value.
    pub src_set: Arc<DescriptorSet>,

    /// The binding number in the source descriptor set to copy from.
    ///
    /// The default value is 0.
    pub src_binding: u32,

    /// The first array element in the source descriptor set to copy from.
    ///
    /// The default value is 0.
    pub src_first_array_element: u32,

    /// The binding number in the destination descriptor set to copy into.
    ///
    /// The default value is 0.
    pub dst_binding: u32,

    /// The first array element in the destination descriptor set to copy into.
    ///
    /// The default value is 0.
    pub dst_first_array_element: u32,

    /// The number of descriptors (array elements) to copy.
    ///
    /// The default value is 1.
    pub descriptor_count: u32,

    pub _ne: crate::NonExhaustive,
}

impl CopyDescriptorSet {
    /// Returns a `CopyDescriptorSet` with the specified `src_set`.
    #[inline]
    pub fn new(src_set: Arc<DescriptorSet>) -> Self {
        Self {
            src_set,
            src_binding: 0,
            src_first_array_element: 0,
            dst_binding: 0,
            dst_first_array_element: 0,
            descriptor_count: 1,
            _ne: crate::NonExhaustive(()),
        }
    }

    pub(crate) fn validate(
        &self,
        dst_layout: &DescriptorSetLayout,
    ) -> Result<(), Box<ValidationError>> {
        let src_layout = self.src_set.layout();

        if !self.src_set.is_valid() {
            return Err(Box::new(ValidationError {
                context: "src_set".into(),
                problem: "was allocated from a pool that has been reset since".into(),
                ..Default::default()
            }));
        }

        let src = walk_bindings(
            src_layout,
            self.src_binding,
            self.src_first_array_element,
            self.descriptor_count,
        )
        .map_err(|err| err.add_context("src"))?;
        let dst = walk_bindings(
            dst_layout,
            self.dst_binding,
            self.dst_first_array_element,
            self.descriptor_count,
        )
        .map_err(|err| err.add_context("dst"))?;

        if src[0].1.descriptor_type != dst[0].1.descriptor_type {
            return Err(Box::new(ValidationError {
                problem: "the descriptor types of the source and destination bindings are not \
                    equal"
                    .into(),
                vuids: &["VUID-VkCopyDescriptorSet-dstBinding-02632"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// Splits `count` array elements starting at `(binding, first_array_element)` into per-binding
/// runs of `(binding number, binding, first element, element count)`, wrapping onto the next
/// bindings.
pub(crate) fn walk_bindings(
    layout: &DescriptorSetLayout,
    binding: u32,
    first_array_element: u32,
    count: u32,
) -> Result<SmallVec<[(u32, &BindingLayout, u32, u32); 2]>, Box<ValidationError>> {
    let mut runs = SmallVec::new();

    let Some(mut current) = layout.binding(binding) else {
        return Err(Box::new(ValidationError {
            context: "binding".into(),
            problem: "does not exist in the descriptor set layout".into(),
            vuids: &["VUID-VkWriteDescriptorSet-dstBinding-00315"],
            ..Default::default()
        }));
    };

    if first_array_element >= current.array_size {
        return Err(Box::new(ValidationError {
            context: "first_array_element".into(),
            problem: "is not less than the descriptor count of the binding".into(),
            vuids: &["VUID-VkWriteDescriptorSet-dstArrayElement-00321"],
            ..Default::default()
        }));
    }

    let descriptor_type = current.descriptor_type;
    let mut binding_num = binding;
    let mut first = first_array_element;
    let mut remaining = count;

    loop {
        if current.descriptor_type != descriptor_type {
            return Err(Box::new(ValidationError {
                context: "binding".into(),
                problem: format!(
                    "the update wraps onto binding {}, which has a different descriptor type",
                    binding_num,
                )
                .into(),
                vuids: &["VUID-VkWriteDescriptorSet-descriptorCount-00317"],
                ..Default::default()
            }));
        }

        let n = (current.array_size - first).min(remaining);
        runs.push((binding_num, current, first, n));
        remaining -= n;

        if remaining == 0 {
            break;
        }

        let Some((next_num, next)) = layout.next_binding(binding_num) else {
            return Err(Box::new(ValidationError {
                problem: "the number of descriptors exceeds the remaining elements of the \
                    binding and the bindings after it"
                    .into(),
                vuids: &["VUID-VkWriteDescriptorSet-dstArrayElement-00321"],
                ..Default::default()
            }));
        };
        binding_num = next_num;
        current = next;
        first = 0;
    }

    Ok(runs)
}
