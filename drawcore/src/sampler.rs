// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! How texels are read from a texture.
//!
//! A [`Sampler`] is packed into its hardware `SAMPLER` record once, at creation, and registered
//! in the device's sampler heap. Descriptor writes, including immutable samplers, copy the packed
//! bytes verbatim.

use crate::{
    device::Device,
    macros::impl_id_counter,
    pack::mali::{pack_sampler, SamplerInfo, TexWrap},
    pipeline::state::{CompareOp, Filter, SamplerAddressMode, SamplerMipmapMode},
    DeviceOwned, NonExhaustive, Validated, ValidationError, VulkanError,
};
use std::{num::NonZero, sync::Arc};

/// The size of a packed sampler.
pub const SAMPLER_DESC_SIZE: usize = 32;

/// Parameters to create a new `Sampler`.
#[derive(Clone, Debug)]
pub struct SamplerCreateInfo {
    /// The default value is [`Filter::Nearest`].
    pub mag_filter: Filter,

    /// The default value is [`Filter::Nearest`].
    pub min_filter: Filter,

    /// The default value is [`SamplerMipmapMode::Nearest`].
    pub mipmap_mode: SamplerMipmapMode,

    /// The default value is `[SamplerAddressMode::ClampToEdge; 3]`.
    pub address_mode: [SamplerAddressMode; 3],

    /// The default value is `0.0`.
    pub mip_lod_bias: f32,

    /// The default value is `None`.
    pub anisotropy: Option<f32>,

    /// The default value is `None`.
    pub compare: Option<CompareOp>,

    /// The default value is `0.0..=0.0`.
    pub lod: std::ops::RangeInclusive<f32>,

    /// The border color as raw channel values.
    ///
    /// The default value is `[0; 4]`.
    pub border_color: [u32; 4],

    /// The default value is `false`.
    pub unnormalized_coordinates: bool,

    pub _ne: NonExhaustive,
}

impl Default for SamplerCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            mipmap_mode: SamplerMipmapMode::Nearest,
            address_mode: [SamplerAddressMode::ClampToEdge; 3],
            mip_lod_bias: 0.0,
            anisotropy: None,
            compare: None,
            lod: 0.0..=0.0,
            border_color: [0; 4],
            unnormalized_coordinates: false,
            _ne: NonExhaustive(()),
        }
    }
}

impl SamplerCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if let Some(max_anisotropy) = self.anisotropy {
            if max_anisotropy < 1.0 {
                return Err(Box::new(ValidationError {
                    context: "anisotropy".into(),
                    problem: "is less than 1.0".into(),
                    vuids: &["VUID-VkSamplerCreateInfo-anisotropyEnable-01071"],
                    ..Default::default()
                }));
            }
        }

        if self.lod.is_empty() {
            return Err(Box::new(ValidationError {
                context: "lod".into(),
                problem: "is empty".into(),
                vuids: &["VUID-VkSamplerCreateInfo-maxLod-01973"],
                ..Default::default()
            }));
        }

        if self.unnormalized_coordinates
            && (self.min_filter != self.mag_filter
                || self.mipmap_mode != SamplerMipmapMode::Nearest
                || *self.lod.start() != 0.0
                || *self.lod.end() != 0.0)
        {
            return Err(Box::new(ValidationError {
                context: "unnormalized_coordinates".into(),
                problem: "is `true`, but the filters differ or mipmapping is used".into(),
                vuids: &["VUID-VkSamplerCreateInfo-unnormalizedCoordinates-01072"],
                ..Default::default()
            }));
        }

        Ok(())
    }
}

/// A packed sampler registered in the device's sampler heap.
#[derive(Debug)]
pub struct Sampler {
    device: Arc<Device>,
    id: NonZero<u64>,
    desc: [u8; SAMPLER_DESC_SIZE],
    heap_index: u32,
}

impl Sampler {
    pub fn new(
        device: Arc<Device>,
        create_info: SamplerCreateInfo,
    ) -> Result<Arc<Sampler>, Validated<VulkanError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        unsafe { Ok(Self::new_unchecked(device, create_info)?) }
    }

    #[doc(hidden)]
    pub unsafe fn new_unchecked(
        device: Arc<Device>,
        create_info: SamplerCreateInfo,
    ) -> Result<Arc<Sampler>, VulkanError> {
        let SamplerCreateInfo {
            mag_filter,
            min_filter,
            mipmap_mode,
            address_mode,
            mip_lod_bias,
            anisotropy,
            compare,
            lod,
            border_color,
            unnormalized_coordinates,
            _ne: _,
        } = create_info;

        let info = SamplerInfo {
            mag_filter,
            min_filter,
            mipmap_mode,
            mipmaps_disabled: false,
            address_mode: address_mode.map(TexWrap::from),
            mip_lod_bias,
            min_lod: *lod.start(),
            max_lod: *lod.end(),
            max_anisotropy: anisotropy.map_or(1, |a| a as u32),
            compare,
            unnormalized_coordinates,
            seamless_cube_map: true,
            border_color,
        };
        let desc = pack_sampler(device.properties().mali_arch, &info).to_bytes();
        let heap_index = device.sampler_heap().add(&desc)?;

        Ok(Arc::new(Sampler {
            device,
            id: Self::next_id(),
            desc,
            heap_index,
        }))
    }

    /// Returns the packed `SAMPLER` record.
    #[inline]
    pub fn desc(&self) -> &[u8; SAMPLER_DESC_SIZE] {
        &self.desc
    }

    #[inline]
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.sampler_heap().remove(self.heap_index);
    }
}

impl DeviceOwned for Sampler {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(Sampler);

#[cfg(test)]
mod tests {
    use super::{Sampler, SamplerCreateInfo};
    use crate::{
        pack::{
            mali::{self, WrapMode},
            PackRecord,
        },
        pipeline::state::{CompareOp, Filter, SamplerAddressMode},
        Validated,
    };

    #[test]
    fn packed_once() {
        let (device, _service) = dev!();
        let sampler = Sampler::new(
            device.clone(),
            SamplerCreateInfo {
                mag_filter: Filter::Linear,
                min_filter: Filter::Linear,
                address_mode: [SamplerAddressMode::ClampToBorder; 3],
                compare: Some(CompareOp::Less),
                lod: 0.0..=4.0,
                ..Default::default()
            },
        )
        .unwrap();

        let desc = sampler.desc();
        assert_eq!(
            mali::Sampler::raw(desc, "wrap_mode_s"),
            Some(WrapMode::ClampToBorder as u64),
        );
        assert_eq!(
            mali::Sampler::raw(desc, "compare_function"),
            Some(mali::Func::Greater as u64),
        );
        assert_eq!(mali::Sampler::raw(desc, "maximum_lod"), Some(4 << 8));
        assert_eq!(&device.sampler_heap().read(sampler.heap_index()), desc);
    }

    #[test]
    fn unnormalized_needs_matching_filters() {
        let (device, _service) = dev!();

        match Sampler::new(
            device,
            SamplerCreateInfo {
                min_filter: Filter::Linear,
                unnormalized_coordinates: true,
                ..Default::default()
            },
        ) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "create_info.unnormalized_coordinates");
            }
            _ => panic!(),
        }
    }
}
