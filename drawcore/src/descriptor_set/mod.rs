// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Bindings between shaders and the resources they access.
//!
//! # Overview
//!
//! In order to access a buffer, an image or a sampler from a shader, the resource must be put in
//! a *descriptor*. Descriptors are grouped in *descriptor sets*, whose shape is described by a
//! [`DescriptorSetLayout`](layout::DescriptorSetLayout).
//!
//! A set stores its descriptors in two places:
//!
//! - Opaque hardware records, kept in per-type tables: packed samplers, packed textures,
//!   attribute buffers for storage images, uniform-buffer records and the dynamic buffers whose
//!   offsets are only known at bind time. These are uploaded into the command buffer's batch
//!   memory when a draw needs them.
//! - The *descriptor UBO*, a BO of the set that shadows the plain-bytes part of image, texel
//!   buffer and storage buffer descriptors for the shaders to read. It is exposed to shaders as
//!   one more uniform buffer, the last slot of the set's uniform-buffer table.
//!
//! Writes become visible to draws recorded after them without any explicit flush.

pub use self::update::{
    CopyDescriptorSet, DescriptorBufferInfo, WriteDescriptorSet, WriteDescriptorSetElements,
};
use self::{
    layout::{BindingLayout, DescriptorSetLayout, DescriptorType},
    pool::DescriptorPool,
    update::walk_bindings,
};
use crate::{
    buffer::BufferView,
    image::ImageView,
    macros::impl_id_counter,
    memory::{refs::BoReference, Bo, BoAccess, BoFlags, DeviceAlignment},
    pack::mali::UniformBuffer,
    sampler::SAMPLER_DESC_SIZE,
    DeviceOwned, DeviceSize, Validated, ValidationError, VulkanError,
};
use parking_lot::{RwLock, RwLockReadGuard};
use std::{num::NonZero, sync::Arc};

pub mod layout;
pub mod pool;
mod update;

/// The size of a packed `TEXTURE` record.
pub const TEXTURE_DESC_SIZE: usize = 32;

/// The size of a packed `ATTRIBUTE_BUFFER` record.
pub const ATTRIBUTE_BUFFER_DESC_SIZE: usize = 16;

/// The size of a packed `ATTRIBUTE` record.
pub const ATTRIBUTE_DESC_SIZE: usize = 4;

/// The size of a packed `UNIFORM_BUFFER` record.
pub const UBO_DESC_SIZE: usize = 8;

/// The largest range a `UNIFORM_BUFFER` record can cover, in 16-byte entries.
const MAX_UBO_ENTRIES: u64 = 1 << 12;

const DESC_BO_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(256) };

/// A buffer range whose final address is only known once a dynamic offset is applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DynamicBufferDescriptor {
    pub address: u64,
    pub size: u32,
}

/// The opaque records of a descriptor set.
#[derive(Clone, Debug, Default)]
pub struct DescriptorTables {
    pub samplers: Vec<[u8; SAMPLER_DESC_SIZE]>,
    pub textures: Vec<[u8; TEXTURE_DESC_SIZE]>,
    pub image_attribute_buffers: Vec<[u8; ATTRIBUTE_BUFFER_DESC_SIZE]>,

    /// The hardware format of each storage image, for the attribute records pointing at it.
    pub image_formats: Vec<u32>,
    pub ubos: Vec<[u8; UBO_DESC_SIZE]>,
    pub dyn_ubos: Vec<DynamicBufferDescriptor>,
    pub dyn_ssbos: Vec<DynamicBufferDescriptor>,

    /// The memory behind each descriptor, indexed by `BindingLayout::desc_index`.
    pub resources: Vec<Option<BoReference>>,
}

/// A set of descriptors allocated from a [`DescriptorPool`].
#[derive(Debug)]
pub struct DescriptorSet {
    pool: Arc<DescriptorPool>,
    id: NonZero<u64>,
    generation: u64,
    layout: Arc<DescriptorSetLayout>,
    desc_bo: Option<Arc<Bo>>,
    tables: RwLock<DescriptorTables>,
}

impl DescriptorSet {
    /// Allocates a new descriptor set from `pool` and applies the given writes and copies to it.
    pub fn new(
        pool: Arc<DescriptorPool>,
        layout: Arc<DescriptorSetLayout>,
        descriptor_writes: impl IntoIterator<Item = WriteDescriptorSet>,
        descriptor_copies: impl IntoIterator<Item = CopyDescriptorSet>,
    ) -> Result<Arc<DescriptorSet>, Validated<VulkanError>> {
        let descriptor_writes: Vec<_> = descriptor_writes.into_iter().collect();
        let descriptor_copies: Vec<_> = descriptor_copies.into_iter().collect();
        Self::validate_update(&layout, &descriptor_writes, &descriptor_copies)?;

        let set = unsafe { Self::new_unchecked(pool, layout)? };
        set.update_unchecked(&descriptor_writes, &descriptor_copies);

        Ok(set)
    }

    /// Allocates a new descriptor set with only its immutable samplers written.
    ///
    /// # Safety
    ///
    /// - The other descriptors must be written before a draw reads them.
    pub unsafe fn new_unchecked(
        pool: Arc<DescriptorPool>,
        layout: Arc<DescriptorSetLayout>,
    ) -> Result<Arc<DescriptorSet>, VulkanError> {
        let desc_bo = if layout.desc_ubo_size() > 0 {
            Some(Bo::new(
                pool.device().service(),
                DeviceSize::from(layout.desc_ubo_size()),
                DESC_BO_ALIGNMENT,
                BoFlags::GART | BoFlags::MAPPED | BoFlags::COHERENT,
            )?)
        } else {
            None
        };

        let generation = pool.reserve(&layout)?;

        let mut tables = DescriptorTables {
            samplers: vec![[0; SAMPLER_DESC_SIZE]; layout.num_samplers() as usize],
            textures: vec![[0; TEXTURE_DESC_SIZE]; layout.num_textures() as usize],
            image_attribute_buffers: vec![
                [0; ATTRIBUTE_BUFFER_DESC_SIZE];
                layout.num_images() as usize
            ],
            image_formats: vec![0; layout.num_images() as usize],
            ubos: vec![[0; UBO_DESC_SIZE]; layout.num_ubos() as usize],
            dyn_ubos: vec![DynamicBufferDescriptor::default(); layout.num_dyn_ubos() as usize],
            dyn_ssbos: vec![DynamicBufferDescriptor::default(); layout.num_dyn_ssbos() as usize],
            resources: vec![None; layout.num_descs() as usize],
        };

        if let (Some(bo), Some(index)) = (&desc_bo, layout.desc_ubo_index()) {
            tables.ubos[index as usize] =
                ubo_record(bo.gpu_addr(), DeviceSize::from(layout.desc_ubo_size()));
        }

        for binding in layout.bindings().values() {
            for (i, sampler) in binding.immutable_samplers.iter().enumerate() {
                tables.samplers[binding.sampler_index as usize + i] = *sampler;
            }
        }

        Ok(Arc::new(DescriptorSet {
            pool,
            id: Self::next_id(),
            generation,
            layout,
            desc_bo,
            tables: RwLock::new(tables),
        }))
    }

    /// Returns the pool the set was allocated from.
    #[inline]
    pub fn pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }

    /// Returns the layout of this descriptor set.
    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Returns the descriptor UBO, if the layout has one.
    #[inline]
    pub fn desc_bo(&self) -> Option<&Arc<Bo>> {
        self.desc_bo.as_ref()
    }

    /// Returns whether the pool has not been reset since the set was allocated.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.pool.is_current(self.generation)
    }

    /// Returns the opaque records of the set.
    #[inline]
    pub fn tables(&self) -> RwLockReadGuard<'_, DescriptorTables> {
        self.tables.read()
    }

    /// Reads `len` bytes of the descriptor UBO at `offset`.
    pub fn read_desc_ubo(&self, offset: u32, len: usize) -> Vec<u8> {
        let mut data = vec![0; len];

        if let Some(bo) = &self.desc_bo {
            unsafe { bo.read(DeviceSize::from(offset), &mut data) };
        }

        data
    }

    /// Updates the descriptor set with new values.
    pub fn update(
        &self,
        descriptor_writes: impl IntoIterator<Item = WriteDescriptorSet>,
        descriptor_copies: impl IntoIterator<Item = CopyDescriptorSet>,
    ) -> Result<(), Box<ValidationError>> {
        if !self.is_valid() {
            return Err(Box::new(ValidationError {
                problem: "the set was allocated from a pool that has been reset since".into(),
                ..Default::default()
            }));
        }

        let descriptor_writes: Vec<_> = descriptor_writes.into_iter().collect();
        let descriptor_copies: Vec<_> = descriptor_copies.into_iter().collect();
        Self::validate_update(&self.layout, &descriptor_writes, &descriptor_copies)?;

        self.update_unchecked(&descriptor_writes, &descriptor_copies);

        Ok(())
    }

    fn validate_update(
        layout: &DescriptorSetLayout,
        descriptor_writes: &[WriteDescriptorSet],
        descriptor_copies: &[CopyDescriptorSet],
    ) -> Result<(), Box<ValidationError>> {
        for (index, write) in descriptor_writes.iter().enumerate() {
            write
                .validate(layout)
                .map_err(|err| err.add_context(format!("descriptor_writes[{}]", index)))?;
        }

        for (index, copy) in descriptor_copies.iter().enumerate() {
            copy.validate(layout)
                .map_err(|err| err.add_context(format!("descriptor_copies[{}]", index)))?;
        }

        Ok(())
    }

    #[doc(hidden)]
    pub fn update_unchecked(
        &self,
        descriptor_writes: &[WriteDescriptorSet],
        descriptor_copies: &[CopyDescriptorSet],
    ) {
        if !descriptor_writes.is_empty() {
            let mut tables = self.tables.write();

            for write in descriptor_writes {
                self.write(&mut tables, write);
            }
        }

        for copy in descriptor_copies {
            self.copy(copy);
        }
    }

    fn write(&self, tables: &mut DescriptorTables, write: &WriteDescriptorSet) {
        let Ok(runs) = walk_bindings(
            &self.layout,
            write.binding(),
            write.first_array_element(),
            write.elements().len(),
        ) else {
            return;
        };
        let mut index = 0;

        for (_, binding, first, count) in runs {
            for array_element in first..first + count {
                self.write_element(tables, binding, array_element, write.elements(), index);
                index += 1;
            }
        }
    }

    fn write_element(
        &self,
        tables: &mut DescriptorTables,
        binding: &BindingLayout,
        array_element: u32,
        elements: &WriteDescriptorSetElements,
        index: usize,
    ) {
        let access = if binding.descriptor_type.is_writable() {
            BoAccess::RW
        } else {
            BoAccess::READ
        };
        let resource = &mut tables.resources[(binding.desc_index + array_element) as usize];

        match elements {
            WriteDescriptorSetElements::Buffer(infos) => {
                let info = &infos[index];
                let address = info.buffer.device_address(info.range.start);
                let size = info.range.end - info.range.start;
                *resource = Some(BoReference {
                    bo: info.buffer.bo().clone(),
                    access,
                });

                let dynamic = DynamicBufferDescriptor {
                    address,
                    size: u32::try_from(size).unwrap_or(u32::MAX),
                };

                match binding.descriptor_type {
                    DescriptorType::UniformBuffer => {
                        tables.ubos[(binding.ubo_index + array_element) as usize] =
                            ubo_record(address, size);
                    }
                    DescriptorType::UniformBufferDynamic => {
                        tables.dyn_ubos[(binding.dyn_ubo_index + array_element) as usize] =
                            dynamic;
                    }
                    DescriptorType::StorageBufferDynamic => {
                        tables.dyn_ssbos[(binding.dyn_ssbo_index + array_element) as usize] =
                            dynamic;
                    }
                    DescriptorType::StorageBuffer => {
                        let mut shadow = [0u8; layout::SSBO_ADDR_SIZE];
                        shadow[0..8].copy_from_slice(&address.to_le_bytes());
                        shadow[8..12].copy_from_slice(&dynamic.size.to_le_bytes());
                        self.write_desc_ubo(binding, array_element, &shadow);
                    }
                    _ => (),
                }
            }
            WriteDescriptorSetElements::BufferView(views) => {
                let view = &views[index];
                *resource = Some(BoReference {
                    bo: view.buffer().bo().clone(),
                    access,
                });
                self.write_buffer_view(tables, binding, array_element, view);
            }
            WriteDescriptorSetElements::ImageView(views) => {
                let view = &views[index];
                *resource = Some(BoReference {
                    bo: view.bo().clone(),
                    access,
                });
                self.write_image_view(tables, binding, array_element, view);
            }
            WriteDescriptorSetElements::ImageViewSampler(pairs) => {
                let (view, sampler) = &pairs[index];
                *resource = Some(BoReference {
                    bo: view.bo().clone(),
                    access,
                });
                self.write_image_view(tables, binding, array_element, view);

                if binding.immutable_samplers.is_empty() {
                    tables.samplers[(binding.sampler_index + array_element) as usize] =
                        *sampler.desc();
                }
            }
            WriteDescriptorSetElements::Sampler(samplers) => {
                tables.samplers[(binding.sampler_index + array_element) as usize] =
                    *samplers[index].desc();
            }
        }
    }

    fn write_buffer_view(
        &self,
        tables: &mut DescriptorTables,
        binding: &BindingLayout,
        array_element: u32,
        view: &BufferView,
    ) {
        match binding.descriptor_type {
            DescriptorType::UniformTexelBuffer => {
                tables.textures[(binding.texture_index + array_element) as usize] =
                    *view.texture();
            }
            DescriptorType::StorageTexelBuffer => {
                let index = (binding.image_index + array_element) as usize;
                tables.image_attribute_buffers[index] = view.attribute_buffer().to_bytes();
                tables.image_formats[index] = self.hw_format(view.format());
            }
            _ => return,
        }

        self.write_desc_ubo(binding, array_element, &view.bview_desc());
    }

    fn write_image_view(
        &self,
        tables: &mut DescriptorTables,
        binding: &BindingLayout,
        array_element: u32,
        view: &ImageView,
    ) {
        match binding.descriptor_type {
            DescriptorType::CombinedImageSampler
            | DescriptorType::SampledImage
            | DescriptorType::InputAttachment => {
                tables.textures[(binding.texture_index + array_element) as usize] =
                    *view.texture();
            }
            DescriptorType::StorageImage => {
                let index = (binding.image_index + array_element) as usize;
                tables.image_attribute_buffers[index] = view.attribute_buffer().to_bytes();
                tables.image_formats[index] = self.hw_format(view.format());
            }
            _ => return,
        }

        self.write_desc_ubo(binding, array_element, &view.image_desc());
    }

    fn hw_format(&self, format: crate::format::Format) -> u32 {
        self.device()
            .format_database()
            .hw_format(format)
            .unwrap_or(0)
    }

    fn write_desc_ubo(&self, binding: &BindingLayout, array_element: u32, data: &[u8]) {
        if let Some(bo) = &self.desc_bo {
            let offset = binding.desc_ubo_offset + array_element * binding.desc_ubo_stride;
            unsafe { bo.write(DeviceSize::from(offset), data) };
        }
    }

    fn copy(&self, copy: &CopyDescriptorSet) {
        let src_set = &copy.src_set;
        let (Ok(src_runs), Ok(dst_runs)) = (
            walk_bindings(
                src_set.layout(),
                copy.src_binding,
                copy.src_first_array_element,
                copy.descriptor_count,
            ),
            walk_bindings(
                &self.layout,
                copy.dst_binding,
                copy.dst_first_array_element,
                copy.descriptor_count,
            ),
        ) else {
            return;
        };

        // Snapshot the source first, it may be this very set.
        let src_tables = src_set.tables.read().clone();
        let mut tables = self.tables.write();

        let mut src_iter = src_runs.into_iter().filter(|run| run.3 > 0);
        let mut dst_iter = dst_runs.into_iter().filter(|run| run.3 > 0);
        let mut src = src_iter.next();
        let mut dst = dst_iter.next();

        while let (Some((_, src_binding, src_first, src_count)), Some((_, dst_binding, dst_first, dst_count))) =
            (src, dst)
        {
            let n = src_count.min(dst_count);

            copy_run(
                &src_tables,
                src_binding,
                src_first,
                &mut tables,
                dst_binding,
                dst_first,
                n,
            );

            let stride = dst_binding.desc_ubo_stride;

            if stride > 0 {
                let shadow = src_set.read_desc_ubo(
                    src_binding.desc_ubo_offset + src_first * stride,
                    (n * stride) as usize,
                );

                if let Some(bo) = &self.desc_bo {
                    let offset = dst_binding.desc_ubo_offset + dst_first * stride;
                    unsafe { bo.write(DeviceSize::from(offset), &shadow) };
                }
            }

            src = if n == src_count {
                src_iter.next()
            } else {
                Some((0, src_binding, src_first + n, src_count - n))
            };
            dst = if n == dst_count {
                dst_iter.next()
            } else {
                Some((0, dst_binding, dst_first + n, dst_count - n))
            };
        }
    }
}

/// Copies `n` elements of every table a binding occupies.
fn copy_run(
    src: &DescriptorTables,
    src_binding: &BindingLayout,
    src_first: u32,
    dst: &mut DescriptorTables,
    dst_binding: &BindingLayout,
    dst_first: u32,
    n: u32,
) {
    fn copy_slice<T: Clone>(src: &[T], src_start: u32, dst: &mut [T], dst_start: u32, n: u32) {
        let (src_start, dst_start, n) = (src_start as usize, dst_start as usize, n as usize);
        dst[dst_start..dst_start + n].clone_from_slice(&src[src_start..src_start + n]);
    }

    copy_slice(
        &src.resources,
        src_binding.desc_index + src_first,
        &mut dst.resources,
        dst_binding.desc_index + dst_first,
        n,
    );

    match dst_binding.descriptor_type {
        DescriptorType::Sampler => {
            // Immutable samplers are never overwritten.
            if dst_binding.immutable_samplers.is_empty() {
                copy_slice(
                    &src.samplers,
                    src_binding.sampler_index + src_first,
                    &mut dst.samplers,
                    dst_binding.sampler_index + dst_first,
                    n,
                );
            }
        }
        DescriptorType::CombinedImageSampler => {
            if dst_binding.immutable_samplers.is_empty() {
                copy_slice(
                    &src.samplers,
                    src_binding.sampler_index + src_first,
                    &mut dst.samplers,
                    dst_binding.sampler_index + dst_first,
                    n,
                );
            }
            copy_slice(
                &src.textures,
                src_binding.texture_index + src_first,
                &mut dst.textures,
                dst_binding.texture_index + dst_first,
                n,
            );
        }
        DescriptorType::SampledImage
        | DescriptorType::InputAttachment
        | DescriptorType::UniformTexelBuffer => {
            copy_slice(
                &src.textures,
                src_binding.texture_index + src_first,
                &mut dst.textures,
                dst_binding.texture_index + dst_first,
                n,
            );
        }
        DescriptorType::StorageImage | DescriptorType::StorageTexelBuffer => {
            copy_slice(
                &src.image_attribute_buffers,
                src_binding.image_index + src_first,
                &mut dst.image_attribute_buffers,
                dst_binding.image_index + dst_first,
                n,
            );
            copy_slice(
                &src.image_formats,
                src_binding.image_index + src_first,
                &mut dst.image_formats,
                dst_binding.image_index + dst_first,
                n,
            );
        }
        DescriptorType::UniformBuffer => {
            copy_slice(
                &src.ubos,
                src_binding.ubo_index + src_first,
                &mut dst.ubos,
                dst_binding.ubo_index + dst_first,
                n,
            );
        }
        DescriptorType::UniformBufferDynamic => {
            copy_slice(
                &src.dyn_ubos,
                src_binding.dyn_ubo_index + src_first,
                &mut dst.dyn_ubos,
                dst_binding.dyn_ubo_index + dst_first,
                n,
            );
        }
        DescriptorType::StorageBufferDynamic => {
            copy_slice(
                &src.dyn_ssbos,
                src_binding.dyn_ssbo_index + src_first,
                &mut dst.dyn_ssbos,
                dst_binding.dyn_ssbo_index + dst_first,
                n,
            );
        }
        DescriptorType::StorageBuffer => (),
    }
}

/// Packs the `UNIFORM_BUFFER` record covering `size` bytes at `address`.
pub(crate) fn ubo_record(address: u64, size: DeviceSize) -> [u8; UBO_DESC_SIZE] {
    UniformBuffer {
        entries: size.div_ceil(16).clamp(1, MAX_UBO_ENTRIES) as u32,
        pointer: address,
    }
    .to_bytes()
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.pool.release(&self.layout, self.generation);
    }
}

impl DeviceOwned for DescriptorSet {
    #[inline]
    fn device(&self) -> &Arc<crate::device::Device> {
        self.pool.device()
    }
}

impl_id_counter!(DescriptorSet);

#[cfg(test)]
mod tests {
    use super::{
        layout::{
            DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
            DescriptorType,
        },
        pool::{DescriptorPool, DescriptorPoolCreateFlags, DescriptorPoolCreateInfo},
        CopyDescriptorSet, DescriptorBufferInfo, DescriptorSet, WriteDescriptorSet,
    };
    use crate::{
        buffer::{Buffer, BufferCreateInfo},
        device::Device,
        format::Format,
        image::{ImageView, ImageViewCreateInfo},
        memory::{Bo, BoAccess, BoFlags, BufferUsage, DeviceAlignment},
        pack::{mali::UniformBuffer, PackRecord},
        sampler::{Sampler, SamplerCreateInfo},
        Validated, VulkanError,
    };
    use std::{collections::BTreeMap, sync::Arc};

    fn binding(ty: DescriptorType, count: u32) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding {
            descriptor_count: count,
            ..DescriptorSetLayoutBinding::descriptor_type(ty)
        }
    }

    fn layout(
        device: &Device,
        bindings: impl IntoIterator<Item = (u32, DescriptorSetLayoutBinding)>,
    ) -> Arc<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            device,
            DescriptorSetLayoutCreateInfo {
                bindings: bindings.into_iter().collect::<BTreeMap<_, _>>(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn pool(device: &Arc<Device>, flags: DescriptorPoolCreateFlags) -> Arc<DescriptorPool> {
        DescriptorPool::new(
            device.clone(),
            DescriptorPoolCreateInfo {
                flags,
                max_sets: 4,
                pool_sizes: [
                    (DescriptorType::UniformBuffer, 16),
                    (DescriptorType::StorageBuffer, 16),
                    (DescriptorType::Sampler, 16),
                    (DescriptorType::SampledImage, 16),
                    (DescriptorType::CombinedImageSampler, 16),
                ]
                .into_iter()
                .collect(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn buffer(device: &Arc<Device>, usage: BufferUsage) -> Arc<Buffer> {
        Buffer::new(
            device.clone(),
            BufferCreateInfo {
                size: 1024,
                usage,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn desc_ubo_is_last_ubo() {
        let (device, _service) = dev!();
        let layout = layout(
            &device,
            [
                (0, binding(DescriptorType::UniformBuffer, 1)),
                (1, binding(DescriptorType::SampledImage, 2)),
            ],
        );
        let set = DescriptorSet::new(
            pool(&device, DescriptorPoolCreateFlags::empty()),
            layout.clone(),
            [],
            [],
        )
        .unwrap();

        let desc_bo = set.desc_bo().unwrap();
        let tables = set.tables();
        assert_eq!(tables.ubos.len(), 2);
        assert_eq!(
            UniformBuffer::raw(&tables.ubos[1], "pointer"),
            Some(desc_bo.gpu_addr() >> 4),
        );
        assert_eq!(UniformBuffer::raw(&tables.ubos[1], "entries"), Some(1));
    }

    #[test]
    fn writes_wrap_onto_next_binding() {
        let (device, _service) = dev!();
        let layout = layout(
            &device,
            [
                (0, binding(DescriptorType::UniformBuffer, 1)),
                (1, binding(DescriptorType::UniformBuffer, 2)),
            ],
        );
        let buffers: Vec<_> = (0..3)
            .map(|_| buffer(&device, BufferUsage::UNIFORM_BUFFER))
            .collect();

        let set = DescriptorSet::new(
            pool(&device, DescriptorPoolCreateFlags::empty()),
            layout,
            [WriteDescriptorSet::buffer_array(0, 0, buffers.iter().cloned())],
            [],
        )
        .unwrap();

        let tables = set.tables();
        for (record, buffer) in tables.ubos.iter().zip(&buffers) {
            assert_eq!(
                UniformBuffer::raw(record, "pointer"),
                Some(buffer.device_address(0) >> 4),
            );
            assert_eq!(UniformBuffer::raw(record, "entries"), Some(63));
        }
        assert!(tables.resources.iter().all(Option::is_some));
    }

    #[test]
    fn write_past_last_binding() {
        let (device, _service) = dev!();
        let layout = layout(&device, [(0, binding(DescriptorType::UniformBuffer, 1))]);
        let buffer = buffer(&device, BufferUsage::UNIFORM_BUFFER);

        match DescriptorSet::new(
            pool(&device, DescriptorPoolCreateFlags::empty()),
            layout,
            [WriteDescriptorSet::buffer_array(0, 0, [buffer.clone(), buffer])],
            [],
        ) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "descriptor_writes[0]");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn storage_buffer_shadow() {
        let (device, _service) = dev!();
        let layout = layout(
            &device,
            [
                (0, binding(DescriptorType::SampledImage, 1)),
                (1, binding(DescriptorType::StorageBuffer, 2)),
            ],
        );
        let buffer = buffer(&device, BufferUsage::STORAGE_BUFFER);

        let set = DescriptorSet::new(
            pool(&device, DescriptorPoolCreateFlags::empty()),
            layout,
            [WriteDescriptorSet::buffer_with_range_array(
                1,
                1,
                [DescriptorBufferInfo {
                    buffer: buffer.clone(),
                    range: 256..768,
                }],
            )],
            [],
        )
        .unwrap();

        let shadow = set.read_desc_ubo(32, 16);
        assert_eq!(&shadow[0..8], &(buffer.device_address(256)).to_le_bytes());
        assert_eq!(&shadow[8..12], &512u32.to_le_bytes());

        let tables = set.tables();
        let resource = tables.resources[2].as_ref().unwrap();
        assert_eq!(resource.access, BoAccess::RW);
    }

    #[test]
    fn wrong_buffer_usage() {
        let (device, _service) = dev!();
        let layout = layout(&device, [(0, binding(DescriptorType::StorageBuffer, 1))]);

        match DescriptorSet::new(
            pool(&device, DescriptorPoolCreateFlags::empty()),
            layout,
            [WriteDescriptorSet::buffer(
                0,
                buffer(&device, BufferUsage::UNIFORM_BUFFER),
            )],
            [],
        ) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "descriptor_writes[0].elements[0].buffer.usage()");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn immutable_samplers_copied_at_creation() {
        let (device, _service) = dev!();
        let sampler = Sampler::new(device.clone(), SamplerCreateInfo::default()).unwrap();
        let layout = layout(
            &device,
            [
                (0, binding(DescriptorType::Sampler, 1)),
                (
                    1,
                    DescriptorSetLayoutBinding {
                        immutable_samplers: vec![sampler.clone()],
                        ..binding(DescriptorType::CombinedImageSampler, 1)
                    },
                ),
            ],
        );
        let bo = Bo::new(device.service(), 4096, DeviceAlignment::MIN, BoFlags::VRAM).unwrap();
        let view = ImageView::new(
            device.clone(),
            ImageViewCreateInfo {
                extent: [4, 4, 1],
                ..ImageViewCreateInfo::new(bo, Format::R8G8B8A8_UNORM)
            },
        )
        .unwrap();

        let set = DescriptorSet::new(
            pool(&device, DescriptorPoolCreateFlags::empty()),
            layout,
            [WriteDescriptorSet::image_view(1, view.clone())],
            [],
        )
        .unwrap();

        let tables = set.tables();
        assert_eq!(tables.samplers[1], *sampler.desc());
        assert_eq!(tables.textures[0], *view.texture());
        assert_eq!(set.read_desc_ubo(0, 16), view.image_desc());

        // Binding 0 has no immutable samplers, an image view alone can't be written to 1 here.
        drop(tables);
        assert!(set
            .update([WriteDescriptorSet::sampler(1, sampler)], [])
            .is_err());
    }

    #[test]
    fn copy_walks_both_sides() {
        let (device, _service) = dev!();
        let src_layout = layout(&device, [(0, binding(DescriptorType::UniformBuffer, 3))]);
        let dst_layout = layout(
            &device,
            [
                (0, binding(DescriptorType::UniformBuffer, 1)),
                (2, binding(DescriptorType::UniformBuffer, 2)),
            ],
        );
        let pool = pool(&device, DescriptorPoolCreateFlags::empty());
        let buffers: Vec<_> = (0..3)
            .map(|_| buffer(&device, BufferUsage::UNIFORM_BUFFER))
            .collect();

        let src = DescriptorSet::new(
            pool.clone(),
            src_layout,
            [WriteDescriptorSet::buffer_array(0, 0, buffers.iter().cloned())],
            [],
        )
        .unwrap();
        let dst = DescriptorSet::new(
            pool,
            dst_layout,
            [],
            [CopyDescriptorSet {
                src_first_array_element: 1,
                descriptor_count: 2,
                ..CopyDescriptorSet::new(src.clone())
            }],
        )
        .unwrap();

        let (src_tables, dst_tables) = (src.tables(), dst.tables());
        assert_eq!(dst_tables.ubos[0], src_tables.ubos[1]);
        assert_eq!(dst_tables.ubos[1], src_tables.ubos[2]);
        assert_eq!(dst_tables.ubos[2], [0; 8]);
    }

    #[test]
    fn pool_reset_invalidates() {
        let (device, _service) = dev!();
        let layout = layout(&device, [(0, binding(DescriptorType::UniformBuffer, 4))]);
        let pool = DescriptorPool::new(
            device.clone(),
            DescriptorPoolCreateInfo {
                max_sets: 1,
                pool_sizes: [(DescriptorType::UniformBuffer, 4)].into_iter().collect(),
                ..Default::default()
            },
        )
        .unwrap();

        let set = DescriptorSet::new(pool.clone(), layout.clone(), [], []).unwrap();
        match DescriptorSet::new(pool.clone(), layout.clone(), [], []) {
            Err(Validated::Error(VulkanError::OutOfPoolMemory)) => (),
            _ => panic!(),
        }

        pool.reset();
        assert!(!set.is_valid());
        let buffer = buffer(&device, BufferUsage::UNIFORM_BUFFER);
        assert!(set.update([WriteDescriptorSet::buffer(0, buffer)], []).is_err());

        // Without `FREE_DESCRIPTOR_SET`, dropping leaves the accounting alone.
        let fresh = DescriptorSet::new(pool.clone(), layout, [], []).unwrap();
        drop(fresh);
        assert_eq!(pool.allocated_sets(), 1);
    }
}
