// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The layout of all the resources a pipeline accesses.
//!
//! A pipeline layout is an ordered list of descriptor set layouts plus the size of the push
//! constant block. Each per-type index space of the sets (samplers, textures, images, uniform
//! buffers, dynamic uniform and storage buffers) is concatenated in set order: the first
//! sampler of set `n` lives at [`SetOffsets::samplers`] of set `n` in the pipeline-wide sampler
//! table.

use crate::{
    descriptor_set::layout::DescriptorSetLayout,
    device::Device,
    macros::impl_id_counter,
    DeviceOwned, NonExhaustive, ValidationError,
};
use smallvec::SmallVec;
use std::{num::NonZero, sync::Arc};

/// The maximum number of descriptor sets in a pipeline layout.
pub const MAX_SETS: usize = 32;

/// The maximum size of the push constant block in bytes.
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// Where the index spaces of one set start in the pipeline-wide tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOffsets {
    pub samplers: u32,
    pub textures: u32,
    pub images: u32,
    pub ubos: u32,
    pub dyn_ubos: u32,
    pub dyn_ssbos: u32,
}

impl SetOffsets {
    fn advance(self, layout: &DescriptorSetLayout) -> Self {
        SetOffsets {
            samplers: self.samplers + layout.num_samplers(),
            textures: self.textures + layout.num_textures(),
            images: self.images + layout.num_images(),
            ubos: self.ubos + layout.num_ubos(),
            dyn_ubos: self.dyn_ubos + layout.num_dyn_ubos(),
            dyn_ssbos: self.dyn_ssbos + layout.num_dyn_ssbos(),
        }
    }
}

/// Parameters to create a new `PipelineLayout`.
#[derive(Clone, Debug)]
pub struct PipelineLayoutCreateInfo {
    /// The layouts of the descriptor sets, indexed by set number.
    ///
    /// The default value is empty.
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,

    /// The size in bytes of the push constant block shared by all stages.
    ///
    /// The default value is `0`.
    pub push_constant_size: u32,

    pub _ne: NonExhaustive,
}

impl Default for PipelineLayoutCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            set_layouts: Vec::new(),
            push_constant_size: 0,
            _ne: NonExhaustive(()),
        }
    }
}

impl PipelineLayoutCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.set_layouts.len() > MAX_SETS {
            return Err(Box::new(ValidationError {
                context: "set_layouts".into(),
                problem: "contains more elements than the maximum number of bound descriptor sets"
                    .into(),
                vuids: &["VUID-VkPipelineLayoutCreateInfo-setLayoutCount-00286"],
                ..Default::default()
            }));
        }

        if self.push_constant_size > MAX_PUSH_CONSTANT_SIZE {
            return Err(Box::new(ValidationError {
                context: "push_constant_size".into(),
                problem: "is greater than the maximum push constant size".into(),
                vuids: &["VUID-VkPushConstantRange-size-00298"],
                ..Default::default()
            }));
        }

        if self.push_constant_size % 4 != 0 {
            return Err(Box::new(ValidationError {
                context: "push_constant_size".into(),
                problem: "is not a multiple of 4".into(),
                vuids: &["VUID-VkPushConstantRange-size-00297"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// Describes the layout of the descriptor sets and push constants a pipeline uses.
#[derive(Debug)]
pub struct PipelineLayout {
    device: Arc<Device>,
    id: NonZero<u64>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constant_size: u32,

    // One more entry than there are sets; the last one holds the totals.
    offsets: SmallVec<[SetOffsets; 5]>,
}

impl PipelineLayout {
    /// Creates a new `PipelineLayout`.
    pub fn new(
        device: Arc<Device>,
        create_info: PipelineLayoutCreateInfo,
    ) -> Result<Arc<PipelineLayout>, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(device, create_info))
    }

    #[doc(hidden)]
    pub fn new_unchecked(
        device: Arc<Device>,
        create_info: PipelineLayoutCreateInfo,
    ) -> Arc<PipelineLayout> {
        let PipelineLayoutCreateInfo {
            set_layouts,
            push_constant_size,
            _ne: _,
        } = create_info;

        let mut offsets = SmallVec::with_capacity(set_layouts.len() + 1);
        let mut current = SetOffsets::default();
        offsets.push(current);

        for layout in &set_layouts {
            current = current.advance(layout);
            offsets.push(current);
        }

        Arc::new(PipelineLayout {
            device,
            id: Self::next_id(),
            set_layouts,
            push_constant_size,
            offsets,
        })
    }

    /// Returns the descriptor set layouts, indexed by set number.
    #[inline]
    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    #[inline]
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }

    /// Returns where the index spaces of `set` start.
    ///
    /// # Panics
    ///
    /// - Panics if `set` is not less than the number of sets.
    #[inline]
    pub fn set_offsets(&self, set: u32) -> SetOffsets {
        assert!((set as usize) < self.set_layouts.len());
        self.offsets[set as usize]
    }

    /// Returns the size of every pipeline-wide index space.
    #[inline]
    pub fn totals(&self) -> SetOffsets {
        self.offsets[self.set_layouts.len()]
    }

    /// Returns the number of dynamic offsets binding sets `first_set..first_set + count` takes.
    pub fn dynamic_offset_count(&self, first_set: u32, count: u32) -> u32 {
        self.set_layouts[first_set as usize..(first_set + count) as usize]
            .iter()
            .map(|layout| layout.num_dyn_ubos() + layout.num_dyn_ssbos())
            .sum()
    }

    /// Returns whether `other` lays out sets `0..=set` identically, so that sets bound with one
    /// layout stay valid for a pipeline created with the other.
    pub fn is_compatible_with(&self, other: &PipelineLayout, set: u32) -> bool {
        let num = set as usize + 1;

        if self.set_layouts.len() < num || other.set_layouts.len() < num {
            return false;
        }

        self.push_constant_size == other.push_constant_size
            && self.set_layouts[..num]
                .iter()
                .zip(&other.set_layouts[..num])
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl DeviceOwned for PipelineLayout {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(PipelineLayout);

#[cfg(test)]
mod tests {
    use super::{PipelineLayout, PipelineLayoutCreateInfo, SetOffsets};
    use crate::descriptor_set::layout::{
        DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
        DescriptorType,
    };
    use std::collections::BTreeMap;

    fn set_layout(
        device: &crate::device::Device,
        bindings: &[(DescriptorType, u32)],
    ) -> std::sync::Arc<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: bindings
                    .iter()
                    .enumerate()
                    .map(|(i, &(ty, count))| {
                        (
                            i as u32,
                            DescriptorSetLayoutBinding {
                                descriptor_count: count,
                                ..DescriptorSetLayoutBinding::descriptor_type(ty)
                            },
                        )
                    })
                    .collect::<BTreeMap<_, _>>(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn offsets_accumulate() {
        let (device, _service) = dev!();
        let set0 = set_layout(
            &device,
            &[
                (DescriptorType::CombinedImageSampler, 2),
                (DescriptorType::UniformBufferDynamic, 1),
            ],
        );
        let set1 = set_layout(
            &device,
            &[
                (DescriptorType::Sampler, 3),
                (DescriptorType::StorageBufferDynamic, 2),
            ],
        );

        let layout = PipelineLayout::new(
            device,
            PipelineLayoutCreateInfo {
                set_layouts: vec![set0.clone(), set1.clone()],
                push_constant_size: 16,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(layout.set_offsets(0), SetOffsets::default());

        let offsets = layout.set_offsets(1);
        assert_eq!(offsets.samplers, set0.num_samplers());
        assert_eq!(offsets.textures, set0.num_textures());
        assert_eq!(offsets.dyn_ubos, 1);
        assert_eq!(offsets.dyn_ssbos, 0);

        let totals = layout.totals();
        assert_eq!(totals.samplers, set0.num_samplers() + 3);
        assert_eq!(totals.dyn_ssbos, 2);
        assert_eq!(layout.dynamic_offset_count(0, 2), 3);
        assert_eq!(layout.dynamic_offset_count(1, 1), 2);
    }

    #[test]
    fn push_constant_limit() {
        let (device, _service) = dev!();

        let err = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                push_constant_size: 132,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.context, "create_info.push_constant_size");

        assert!(PipelineLayout::new(
            device,
            PipelineLayoutCreateInfo {
                push_constant_size: 128,
                ..Default::default()
            },
        )
        .is_ok());
    }

    #[test]
    fn compatibility_follows_interned_layouts() {
        let (device, _service) = dev!();
        let a = set_layout(&device, &[(DescriptorType::UniformBuffer, 1)]);
        let b = set_layout(&device, &[(DescriptorType::UniformBuffer, 1)]);
        let c = set_layout(&device, &[(DescriptorType::StorageImage, 1)]);

        let first = PipelineLayout::new(
            device.clone(),
            PipelineLayoutCreateInfo {
                set_layouts: vec![a, c.clone()],
                ..Default::default()
            },
        )
        .unwrap();
        let second = PipelineLayout::new(
            device,
            PipelineLayoutCreateInfo {
                set_layouts: vec![b, c.clone(), c],
                ..Default::default()
            },
        )
        .unwrap();

        assert!(first.is_compatible_with(&second, 1));
        assert!(!first.is_compatible_with(&second, 2));
    }
}
