// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A pool from which descriptor sets are allocated.
//!
//! The pool only does the accounting: a set allocates its own descriptor UBO. Each allocation
//! consumes one set and `descriptor_count` descriptors of every binding's type. Dropping a set
//! gives its share back only if the pool was created with
//! [`DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET`]. [`DescriptorPool::reset`] gives everything
//! back at once and invalidates every set allocated before.

use super::layout::{DescriptorSetLayout, DescriptorType};
use crate::{
    device::Device,
    macros::{impl_id_counter, vulkan_bitflags},
    DeviceOwned, NonExhaustive, ValidationError, VulkanError,
};
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{num::NonZero, sync::Arc};

vulkan_bitflags! {
    /// Flags specifying additional properties of a descriptor pool.
    DescriptorPoolCreateFlags = DescriptorPoolCreateFlags(u32);

    /// Individual descriptor sets give their share of the pool back when dropped.
    FREE_DESCRIPTOR_SET = FREE_DESCRIPTOR_SET,
}

/// Parameters to create a new `DescriptorPool`.
#[derive(Clone, Debug)]
pub struct DescriptorPoolCreateInfo {
    /// The default value is empty.
    pub flags: DescriptorPoolCreateFlags,

    /// The maximum number of descriptor sets that can be allocated from the pool.
    ///
    /// The default value is `0`, which must be overridden.
    pub max_sets: u32,

    /// The number of descriptors of each type to allocate for the pool.
    ///
    /// The default value is empty, which must be overridden.
    pub pool_sizes: HashMap<DescriptorType, u32>,

    pub _ne: NonExhaustive,
}

impl Default for DescriptorPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            flags: DescriptorPoolCreateFlags::empty(),
            max_sets: 0,
            pool_sizes: HashMap::default(),
            _ne: NonExhaustive(()),
        }
    }
}

impl DescriptorPoolCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.max_sets == 0 {
            return Err(Box::new(ValidationError {
                context: "max_sets".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkDescriptorPoolCreateInfo-maxSets-00301"],
                ..Default::default()
            }));
        }

        if self.pool_sizes.is_empty() {
            return Err(Box::new(ValidationError {
                context: "pool_sizes".into(),
                problem: "is empty".into(),
                ..Default::default()
            }));
        }

        for (&descriptor_type, &count) in &self.pool_sizes {
            if count == 0 {
                return Err(Box::new(ValidationError {
                    context: format!("pool_sizes[DescriptorType::{:?}]", descriptor_type).into(),
                    problem: "is zero".into(),
                    vuids: &["VUID-VkDescriptorPoolSize-descriptorCount-00302"],
                    ..Default::default()
                }));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct PoolState {
    generation: u64,
    allocated_sets: u32,
    allocated: HashMap<DescriptorType, u32>,
}

/// Pool from which descriptor sets are allocated.
#[derive(Debug)]
pub struct DescriptorPool {
    device: Arc<Device>,
    id: NonZero<u64>,
    flags: DescriptorPoolCreateFlags,
    max_sets: u32,
    pool_sizes: HashMap<DescriptorType, u32>,
    state: Mutex<PoolState>,
}

impl DescriptorPool {
    /// Creates a new `DescriptorPool`.
    pub fn new(
        device: Arc<Device>,
        create_info: DescriptorPoolCreateInfo,
    ) -> Result<Arc<DescriptorPool>, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(device, create_info))
    }

    #[doc(hidden)]
    pub fn new_unchecked(
        device: Arc<Device>,
        create_info: DescriptorPoolCreateInfo,
    ) -> Arc<DescriptorPool> {
        let DescriptorPoolCreateInfo {
            flags,
            max_sets,
            pool_sizes,
            _ne: _,
        } = create_info;

        Arc::new(DescriptorPool {
            device,
            id: Self::next_id(),
            flags,
            max_sets,
            pool_sizes,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Returns the flags that the pool was created with.
    #[inline]
    pub fn flags(&self) -> DescriptorPoolCreateFlags {
        self.flags
    }

    /// Returns the maximum number of sets that can be allocated from the pool.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Returns the number of descriptors of each type that the pool was created with.
    #[inline]
    pub fn pool_sizes(&self) -> &HashMap<DescriptorType, u32> {
        &self.pool_sizes
    }

    /// Returns the number of sets currently allocated from the pool.
    #[inline]
    pub fn allocated_sets(&self) -> u32 {
        self.state.lock().allocated_sets
    }

    /// Gives every allocation back to the pool.
    ///
    /// Sets allocated before the reset stay alive as long as they are referenced, but can no
    /// longer be updated and are rejected when bound.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.allocated_sets = 0;
        state.allocated.clear();
    }

    /// Returns whether allocations of `generation` are still backed by the pool.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    /// Takes the share of `layout` from the pool, returning the generation of the allocation.
    pub(crate) fn reserve(&self, layout: &DescriptorSetLayout) -> Result<u64, VulkanError> {
        let mut state = self.state.lock();

        if state.allocated_sets >= self.max_sets {
            return Err(VulkanError::OutOfPoolMemory);
        }

        for (descriptor_type, count) in Self::share_of(layout) {
            let available = self.pool_sizes.get(&descriptor_type).copied().unwrap_or(0);
            let allocated = state.allocated.get(&descriptor_type).copied().unwrap_or(0);

            if allocated + count > available {
                return Err(VulkanError::OutOfPoolMemory);
            }
        }

        for (descriptor_type, count) in Self::share_of(layout) {
            *state.allocated.entry(descriptor_type).or_default() += count;
        }
        state.allocated_sets += 1;

        Ok(state.generation)
    }

    /// Gives the share of `layout` back, if the pool frees individual sets and the allocation
    /// predates no reset.
    pub(crate) fn release(&self, layout: &DescriptorSetLayout, generation: u64) {
        if !self
            .flags
            .intersects(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return;
        }

        let mut state = self.state.lock();

        if state.generation != generation {
            return;
        }

        for (descriptor_type, count) in Self::share_of(layout) {
            if let Some(allocated) = state.allocated.get_mut(&descriptor_type) {
                *allocated -= count;
            }
        }
        state.allocated_sets -= 1;
    }

    fn share_of(
        layout: &DescriptorSetLayout,
    ) -> impl Iterator<Item = (DescriptorType, u32)> + '_ {
        layout
            .bindings()
            .values()
            .filter(|binding| binding.array_size > 0)
            .map(|binding| (binding.descriptor_type, binding.array_size))
    }
}

impl DeviceOwned for DescriptorPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(DescriptorPool);
