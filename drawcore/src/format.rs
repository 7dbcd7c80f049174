// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Texel formats and the database that maps them to hardware encodings.
//!
//! [`Format`] covers the formats used for vertex attributes, render targets and sampled images.
//! Properties that don't depend on the GPU, such as the block size or the numeric type, are
//! methods on the format itself. The hardware encoding is looked up through a [`FormatDatabase`],
//! which the device is created with.

use crate::image::ImageAspects;
use std::fmt::Debug;

/// The numeric type that represents data of a format in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum NumericType {
    SFLOAT,
    SINT,
    UINT,
    SNORM,
    UNORM,
    /// Unsigned normalized, with R, G and B in the sRGB color space.
    SRGB,
}

macro_rules! formats {
    {
        $(
            $name:ident = $ffi:ident {
                block_size: $block_size:expr,
                components: $components:expr,
                numeric: $numeric:ident,
                aspects: $aspects:ident $(| $more_aspects:ident)*,
            },
        )+
    } => {
        /// A texel format.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[allow(non_camel_case_types)]
        #[repr(i32)]
        #[non_exhaustive]
        pub enum Format {
            #[default]
            UNDEFINED = ash::vk::Format::UNDEFINED.as_raw(),
            $(
                $name = ash::vk::Format::$ffi.as_raw(),
            )+
        }

        impl Format {
            /// Returns the size in bytes of one texel, or of one texel of each aspect combined for
            /// depth/stencil formats.
            pub fn block_size(self) -> u32 {
                match self {
                    Self::UNDEFINED => 0,
                    $(Self::$name => $block_size,)+
                }
            }

            /// Returns the number of bits of R, G, B and A, or of depth and stencil in the first
            /// two entries for depth/stencil formats.
            pub fn components(self) -> [u8; 4] {
                match self {
                    Self::UNDEFINED => [0; 4],
                    $(Self::$name => $components,)+
                }
            }

            /// Returns the numeric type of the color components, or of the depth aspect.
            pub fn numeric_type(self) -> Option<NumericType> {
                match self {
                    Self::UNDEFINED => None,
                    $(Self::$name => Some(NumericType::$numeric),)+
                }
            }

            pub fn aspects(self) -> ImageAspects {
                match self {
                    Self::UNDEFINED => ImageAspects::empty(),
                    $(Self::$name => ImageAspects::$aspects $(| ImageAspects::$more_aspects)*,)+
                }
            }
        }

        impl TryFrom<ash::vk::Format> for Format {
            type Error = ();

            fn try_from(val: ash::vk::Format) -> Result<Self, Self::Error> {
                match val {
                    ash::vk::Format::UNDEFINED => Ok(Self::UNDEFINED),
                    $(ash::vk::Format::$ffi => Ok(Self::$name),)+
                    _ => Err(()),
                }
            }
        }
    };
}

formats! {
    R8_UNORM = R8_UNORM { block_size: 1, components: [8, 0, 0, 0], numeric: UNORM, aspects: COLOR, },
    R8_UINT = R8_UINT { block_size: 1, components: [8, 0, 0, 0], numeric: UINT, aspects: COLOR, },
    R8G8_UNORM = R8G8_UNORM { block_size: 2, components: [8, 8, 0, 0], numeric: UNORM, aspects: COLOR, },
    R8G8B8A8_UNORM = R8G8B8A8_UNORM { block_size: 4, components: [8, 8, 8, 8], numeric: UNORM, aspects: COLOR, },
    R8G8B8A8_SNORM = R8G8B8A8_SNORM { block_size: 4, components: [8, 8, 8, 8], numeric: SNORM, aspects: COLOR, },
    R8G8B8A8_UINT = R8G8B8A8_UINT { block_size: 4, components: [8, 8, 8, 8], numeric: UINT, aspects: COLOR, },
    R8G8B8A8_SINT = R8G8B8A8_SINT { block_size: 4, components: [8, 8, 8, 8], numeric: SINT, aspects: COLOR, },
    R8G8B8A8_SRGB = R8G8B8A8_SRGB { block_size: 4, components: [8, 8, 8, 8], numeric: SRGB, aspects: COLOR, },
    B8G8R8A8_UNORM = B8G8R8A8_UNORM { block_size: 4, components: [8, 8, 8, 8], numeric: UNORM, aspects: COLOR, },
    B8G8R8A8_SRGB = B8G8R8A8_SRGB { block_size: 4, components: [8, 8, 8, 8], numeric: SRGB, aspects: COLOR, },
    R16_UNORM = R16_UNORM { block_size: 2, components: [16, 0, 0, 0], numeric: UNORM, aspects: COLOR, },
    R16_UINT = R16_UINT { block_size: 2, components: [16, 0, 0, 0], numeric: UINT, aspects: COLOR, },
    R16_SFLOAT = R16_SFLOAT { block_size: 2, components: [16, 0, 0, 0], numeric: SFLOAT, aspects: COLOR, },
    R16G16_SFLOAT = R16G16_SFLOAT { block_size: 4, components: [16, 16, 0, 0], numeric: SFLOAT, aspects: COLOR, },
    R16G16B16A16_UINT = R16G16B16A16_UINT { block_size: 8, components: [16, 16, 16, 16], numeric: UINT, aspects: COLOR, },
    R16G16B16A16_SFLOAT = R16G16B16A16_SFLOAT { block_size: 8, components: [16, 16, 16, 16], numeric: SFLOAT, aspects: COLOR, },
    R32_UINT = R32_UINT { block_size: 4, components: [32, 0, 0, 0], numeric: UINT, aspects: COLOR, },
    R32_SINT = R32_SINT { block_size: 4, components: [32, 0, 0, 0], numeric: SINT, aspects: COLOR, },
    R32_SFLOAT = R32_SFLOAT { block_size: 4, components: [32, 0, 0, 0], numeric: SFLOAT, aspects: COLOR, },
    R32G32_UINT = R32G32_UINT { block_size: 8, components: [32, 32, 0, 0], numeric: UINT, aspects: COLOR, },
    R32G32_SFLOAT = R32G32_SFLOAT { block_size: 8, components: [32, 32, 0, 0], numeric: SFLOAT, aspects: COLOR, },
    R32G32B32_SFLOAT = R32G32B32_SFLOAT { block_size: 12, components: [32, 32, 32, 0], numeric: SFLOAT, aspects: COLOR, },
    R32G32B32A32_UINT = R32G32B32A32_UINT { block_size: 16, components: [32, 32, 32, 32], numeric: UINT, aspects: COLOR, },
    R32G32B32A32_SINT = R32G32B32A32_SINT { block_size: 16, components: [32, 32, 32, 32], numeric: SINT, aspects: COLOR, },
    R32G32B32A32_SFLOAT = R32G32B32A32_SFLOAT { block_size: 16, components: [32, 32, 32, 32], numeric: SFLOAT, aspects: COLOR, },
    D16_UNORM = D16_UNORM { block_size: 2, components: [16, 0, 0, 0], numeric: UNORM, aspects: DEPTH, },
    X8_D24_UNORM_PACK32 = X8_D24_UNORM_PACK32 { block_size: 4, components: [24, 0, 0, 0], numeric: UNORM, aspects: DEPTH, },
    D32_SFLOAT = D32_SFLOAT { block_size: 4, components: [32, 0, 0, 0], numeric: SFLOAT, aspects: DEPTH, },
    S8_UINT = S8_UINT { block_size: 1, components: [0, 8, 0, 0], numeric: UINT, aspects: STENCIL, },
    D24_UNORM_S8_UINT = D24_UNORM_S8_UINT { block_size: 4, components: [24, 8, 0, 0], numeric: UNORM, aspects: DEPTH | STENCIL, },
    D32_SFLOAT_S8_UINT = D32_SFLOAT_S8_UINT { block_size: 5, components: [32, 8, 0, 0], numeric: SFLOAT, aspects: DEPTH | STENCIL, },
}

impl Format {
    /// Returns whether the color components are read and written as integers.
    #[inline]
    pub fn is_integer(self) -> bool {
        self.aspects() == ImageAspects::COLOR
            && matches!(self.numeric_type(), Some(NumericType::UINT | NumericType::SINT))
    }

    #[inline]
    pub fn is_srgb(self) -> bool {
        self.numeric_type() == Some(NumericType::SRGB)
    }

    /// Returns whether R and B are swapped in memory.
    #[inline]
    pub fn is_bgra(self) -> bool {
        matches!(self, Self::B8G8R8A8_UNORM | Self::B8G8R8A8_SRGB)
    }
}

impl From<Format> for ash::vk::Format {
    #[inline]
    fn from(val: Format) -> Self {
        ash::vk::Format::from_raw(val as i32)
    }
}

/// How the channels of a format are laid out, as the hardware sees them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    /// Bits per channel in R, G, B, A order.
    pub bits: [u8; 4],
    pub numeric_type: NumericType,
    /// Memory order is B, G, R, A.
    pub bgra: bool,
}

/// Maps formats to the encodings of one GPU family.
pub trait FormatDatabase: Send + Sync + Debug {
    /// Returns the hardware format number, or `None` if the GPU can't use the format.
    fn hw_format(&self, format: Format) -> Option<u32>;

    /// Returns the size of one texel block in bytes.
    fn blocksize(&self, format: Format) -> u32 {
        format.block_size()
    }

    fn is_srgb(&self, format: Format) -> bool {
        format.is_srgb()
    }

    fn channel_layout(&self, format: Format) -> Option<ChannelLayout> {
        Some(ChannelLayout {
            bits: format.components(),
            numeric_type: format.numeric_type()?,
            bgra: format.is_bgra(),
        })
    }
}

/// The surface format numbers of Gen-style GPUs.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardFormats;

impl FormatDatabase for StandardFormats {
    fn hw_format(&self, format: Format) -> Option<u32> {
        let hw = match format {
            Format::R32G32B32A32_SFLOAT => 0x000,
            Format::R32G32B32A32_SINT => 0x001,
            Format::R32G32B32A32_UINT => 0x002,
            Format::R32G32B32_SFLOAT => 0x040,
            Format::R16G16B16A16_SFLOAT => 0x084,
            Format::R32G32_SFLOAT => 0x085,
            Format::R32G32_UINT => 0x087,
            Format::R16G16B16A16_UINT => 0x088,
            Format::B8G8R8A8_UNORM => 0x0c0,
            Format::B8G8R8A8_SRGB => 0x0c1,
            Format::R8G8B8A8_UNORM => 0x0c7,
            Format::R8G8B8A8_SRGB => 0x0c8,
            Format::R8G8B8A8_SNORM => 0x0c9,
            Format::R8G8B8A8_SINT => 0x0ca,
            Format::R8G8B8A8_UINT => 0x0cb,
            Format::R16G16_SFLOAT => 0x0d0,
            Format::R32_SINT => 0x0d6,
            Format::R32_UINT => 0x0d7,
            Format::R32_SFLOAT | Format::D32_SFLOAT => 0x0d8,
            Format::X8_D24_UNORM_PACK32 | Format::D24_UNORM_S8_UINT => 0x0d9,
            Format::R8G8_UNORM => 0x106,
            Format::R16_UNORM | Format::D16_UNORM => 0x10a,
            Format::R16_UINT => 0x10d,
            Format::R16_SFLOAT => 0x10e,
            Format::R8_UNORM => 0x140,
            Format::R8_UINT | Format::S8_UINT => 0x143,
            Format::UNDEFINED | Format::D32_SFLOAT_S8_UINT => return None,
        };

        Some(hw)
    }
}

#[cfg(test)]
mod tests {
    use super::{Format, FormatDatabase, NumericType, StandardFormats};
    use crate::image::ImageAspects;

    #[test]
    fn intrinsic_properties() {
        assert_eq!(Format::R32G32B32A32_SFLOAT.block_size(), 16);
        assert_eq!(Format::R8G8B8A8_UINT.numeric_type(), Some(NumericType::UINT));
        assert!(Format::R8G8B8A8_UINT.is_integer());
        assert!(!Format::S8_UINT.is_integer());
        assert!(Format::B8G8R8A8_SRGB.is_srgb());
        assert_eq!(
            Format::D24_UNORM_S8_UINT.aspects(),
            ImageAspects::DEPTH | ImageAspects::STENCIL,
        );
    }

    #[test]
    fn ash_conversion() {
        assert_eq!(
            Format::try_from(ash::vk::Format::R16_UINT),
            Ok(Format::R16_UINT),
        );
        assert!(Format::try_from(ash::vk::Format::BC1_RGB_UNORM_BLOCK).is_err());
        let raw: ash::vk::Format = Format::D32_SFLOAT.into();
        assert!(raw == ash::vk::Format::D32_SFLOAT);
    }

    #[test]
    fn database_lookups() {
        let db = StandardFormats;
        assert_eq!(db.hw_format(Format::R8G8B8A8_UNORM), Some(0x0c7));
        assert_eq!(db.hw_format(Format::UNDEFINED), None);
        assert_eq!(db.blocksize(Format::R16G16_SFLOAT), 4);

        let layout = db.channel_layout(Format::B8G8R8A8_UNORM).unwrap();
        assert!(layout.bgra);
        assert_eq!(layout.bits, [8, 8, 8, 8]);
    }
}
