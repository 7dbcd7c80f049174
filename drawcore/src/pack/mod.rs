// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Bit-exact hardware records.
//!
//! Every record the GPU consumes is declared once through [`record!`] as a table of fields,
//! each with a bit offset, a width and an [`Encoding`]. The macro generates a plain struct with
//! one public member per field and a [`PackRecord`] implementation that writes the record as
//! little-endian bytes. A compile-time check rejects tables whose fields overlap, which is what
//! makes [`merge`] of two partial records equal to packing the union of their fields.
//!
//! ```ignore
//! record! {
//!     /// Depth range of one viewport.
//!     pub struct CcViewport("CC_VIEWPORT", 8, 32) {
//!         minimum_depth: f32 => (0, 0, 32, Float),
//!         maximum_depth: f32 => (1, 0, 32, Float),
//!     }
//! }
//! ```
//!
//! Records with a header (command packets) carry a fixed dword 0 made of the opcode and the
//! packet length; their fields start at dword 1.
//!
//! The vendor record sets live in [`gen`], [`mali`] and [`nv`].

pub mod gen;
pub mod mali;
pub mod nv;

/// How a field value is turned into bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Unsigned integer.
    Uint,
    /// Two's-complement signed integer.
    Int,
    /// A single bit, or a wider field holding 0 or 1.
    Bool,
    /// IEEE 754 single precision. The field must be 32 bits wide.
    Float,
    /// Fixed point with `frac_bits` fractional bits. Values are clamped to the representable
    /// range and rounded half to even.
    Fixed { frac_bits: u32, signed: bool },
    /// An address whose low `shift` bits are dropped.
    Address { shift: u32 },
    /// An unsigned count stored as `value - 1`.
    Minus1,
}

/// One entry of a record's field table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    /// Offset of the lowest bit from the start of the record.
    pub offset: u32,
    pub width: u32,
    pub encoding: Encoding,
}

impl Field {
    pub const fn new(
        name: &'static str,
        dword: u32,
        bit: u32,
        width: u32,
        encoding: Encoding,
    ) -> Self {
        Field {
            name,
            offset: dword * 32 + bit,
            width,
            encoding,
        }
    }

    const fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Converts `value` into the raw bits of the field.
    pub fn encode(&self, value: FieldValue) -> u64 {
        let mask = self.mask();

        let bits = match self.encoding {
            Encoding::Uint => {
                let v = value.as_u64();
                debug_assert!(
                    v & !mask == 0,
                    "value {v:#x} does not fit in field `{}`",
                    self.name,
                );
                v
            }
            Encoding::Int => value.as_i64() as u64,
            Encoding::Bool => u64::from(value.as_bool()),
            Encoding::Float => u64::from(value.as_f32().to_bits()),
            Encoding::Fixed { frac_bits, signed } => {
                encode_fixed(value.as_f32(), self.width, frac_bits, signed)
            }
            Encoding::Address { shift } => value.as_u64() >> shift,
            Encoding::Minus1 => value.as_u64().saturating_sub(1),
        };

        bits & mask
    }

    /// Reads the raw bits of the field from a packed record.
    pub fn extract(&self, bytes: &[u8]) -> u64 {
        let mut value = 0u64;
        let mut done = 0;

        while done < self.width {
            let bit = self.offset + done;
            let shift = bit % 8;
            let take = (8 - shift).min(self.width - done);
            let byte = u64::from(bytes[(bit / 8) as usize] >> shift) & ((1 << take) - 1);
            value |= byte << done;
            done += take;
        }

        value
    }

    /// ORs the bits of `value` into `buf`.
    pub fn deposit(&self, buf: &mut [u8], value: FieldValue) {
        deposit(buf, self.offset, self.width, self.encode(value));
    }
}

fn encode_fixed(value: f32, width: u32, frac_bits: u32, signed: bool) -> u64 {
    let (min, max) = if signed {
        (-(1i64 << (width - 1)), (1i64 << (width - 1)) - 1)
    } else {
        (0, (1i64 << width) - 1)
    };

    let scaled = f64::from(value) * (1u64 << frac_bits) as f64;
    let fixed = if scaled.is_nan() {
        0
    } else {
        scaled.clamp(min as f64, max as f64).round_ties_even() as i64
    };

    fixed as u64
}

/// ORs the low `width` bits of `bits` into `buf` starting at bit `offset`.
pub fn deposit(buf: &mut [u8], offset: u32, width: u32, bits: u64) {
    let mut value = bits;
    let mut bit = offset;
    let mut remaining = width;

    while remaining > 0 {
        let shift = bit % 8;
        let take = (8 - shift).min(remaining);
        let mask = ((1u16 << take) - 1) as u8;
        buf[(bit / 8) as usize] |= (value as u8 & mask) << shift;
        value = value.checked_shr(take).unwrap_or(0);
        bit += take;
        remaining -= take;
    }
}

/// A field value before encoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    Uint(u64),
    Int(i64),
    Bool(bool),
    Float(f32),
}

impl FieldValue {
    fn as_u64(self) -> u64 {
        match self {
            Self::Uint(v) => v,
            Self::Int(v) => v as u64,
            Self::Bool(v) => u64::from(v),
            Self::Float(v) => v as u64,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Self::Uint(v) => v as i64,
            Self::Int(v) => v,
            Self::Bool(v) => i64::from(v),
            Self::Float(v) => v as i64,
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Self::Uint(v) => v != 0,
            Self::Int(v) => v != 0,
            Self::Bool(v) => v,
            Self::Float(v) => v != 0.0,
        }
    }

    fn as_f32(self) -> f32 {
        match self {
            Self::Uint(v) => v as f32,
            Self::Int(v) => v as f32,
            Self::Bool(v) => f32::from(u8::from(v)),
            Self::Float(v) => v,
        }
    }
}

/// Types that can be stored in a record field.
pub trait IntoFieldValue {
    fn into_field_value(self) -> FieldValue;
}

macro_rules! impl_into_field_value {
    ($($ty:ty => $variant:ident as $repr:ty),+ $(,)?) => {
        $(
            impl IntoFieldValue for $ty {
                #[inline]
                fn into_field_value(self) -> FieldValue {
                    FieldValue::$variant(self as $repr)
                }
            }
        )+
    };
}

impl_into_field_value! {
    u8 => Uint as u64,
    u16 => Uint as u64,
    u32 => Uint as u64,
    u64 => Uint as u64,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    bool => Bool as bool,
    f32 => Float as f32,
}

/// A fixed-length hardware record.
pub trait PackRecord: Default {
    /// The hardware name of the record.
    const NAME: &'static str;

    /// Length in bytes.
    const LEN: usize;

    /// Required alignment in bytes of the record in GPU memory.
    const ALIGN: usize;

    /// Dword 0 without the length, for command packets.
    const HEADER: Option<u32>;

    /// The field table, in declaration order.
    const FIELDS: &'static [Field];

    /// Writes exactly `LEN` bytes to the start of `dst`. `dst` is never read.
    fn pack(&self, dst: &mut [u8]);

    /// Returns the table entry of the field called `name`.
    fn field(name: &str) -> Option<&'static Field> {
        Self::FIELDS.iter().find(|field| field.name == name)
    }

    /// Reads the raw bits of the field called `name` from a packed record.
    fn raw(bytes: &[u8], name: &str) -> Option<u64> {
        Self::field(name).map(|field| field.extract(bytes))
    }
}

/// Returns dword 0 of a command packet.
#[inline]
pub const fn packet_header(header: u32, dwords: u32) -> u32 {
    header | (dwords - 2)
}

#[doc(hidden)]
pub const fn header_of(headers: &[u32]) -> Option<u32> {
    if headers.is_empty() {
        None
    } else {
        Some(headers[0])
    }
}

/// Returns whether every field of `fields` fits in `len` bytes without overlapping another
/// field or the packet header.
pub const fn fields_disjoint(fields: &[Field], len: usize, has_header: bool) -> bool {
    let bits = (len * 8) as u32;
    let mut i = 0;

    while i < fields.len() {
        let a = &fields[i];

        if a.width == 0 || a.width > 64 || a.offset + a.width > bits {
            return false;
        }

        if has_header && a.offset < 32 {
            return false;
        }

        if let Encoding::Float = a.encoding {
            if a.width != 32 {
                return false;
            }
        }

        let mut j = i + 1;

        while j < fields.len() {
            let b = &fields[j];

            if a.offset < b.offset + b.width && b.offset < a.offset + a.width {
                return false;
            }

            j += 1;
        }

        i += 1;
    }

    true
}

/// Combines a partial record with an overlay by bitwise OR.
///
/// # Panics
///
/// - Panics if the slices differ in length.
pub fn merge(dst: &mut [u8], overlay: &[u8]) {
    assert_eq!(dst.len(), overlay.len());

    for (d, o) in dst.iter_mut().zip(overlay) {
        *d |= *o;
    }
}

/// Packs `record` into little-endian dwords.
pub fn to_dwords<R: PackRecord>(record: &R) -> smallvec::SmallVec<[u32; 16]> {
    let mut bytes = smallvec::SmallVec::<[u8; 64]>::from_elem(0, R::LEN);
    record.pack(&mut bytes);

    bytes
        .chunks(4)
        .map(|dw| {
            let mut word = [0u8; 4];
            word[..dw.len()].copy_from_slice(dw);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Declares hardware records. See the [module documentation](self).
macro_rules! record {
    ($(
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($hw_name:literal, $len:literal, $align:literal $(, header = $header:expr)?) {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $ty:ty => ($dword:expr, $bit:expr, $width:expr, $encoding:expr),
            )*
        }
    )+) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::pack::PackRecord for $name {
            const NAME: &'static str = $hw_name;
            const LEN: usize = $len;
            const ALIGN: usize = $align;
            const HEADER: Option<u32> = $crate::pack::header_of(&[$($header)?]);
            const FIELDS: &'static [$crate::pack::Field] = &[
                $(
                    $crate::pack::Field::new(stringify!($field), $dword, $bit, $width, {
                        #[allow(unused_imports)]
                        use $crate::pack::Encoding::*;
                        $encoding
                    }),
                )*
            ];

            #[allow(unused_mut, unused_variables)]
            fn pack(&self, dst: &mut [u8]) {
                let mut buf = [0u8; $len];

                if let Some(header) = <Self as $crate::pack::PackRecord>::HEADER {
                    let dword0 = $crate::pack::packet_header(header, ($len / 4) as u32);
                    buf[..4].copy_from_slice(&dword0.to_le_bytes());
                }

                let mut fields = <Self as $crate::pack::PackRecord>::FIELDS.iter();
                $(
                    if let Some(field) = fields.next() {
                        field.deposit(
                            &mut buf,
                            $crate::pack::IntoFieldValue::into_field_value(self.$field),
                        );
                    }
                )*

                dst[..$len].copy_from_slice(&buf);
            }
        }

        impl $name {
            /// Returns the packed record.
            #[inline]
            pub fn to_bytes(&self) -> [u8; $len] {
                let mut bytes = [0u8; $len];
                $crate::pack::PackRecord::pack(self, &mut bytes);
                bytes
            }
        }

        const _: () = assert!(
            $crate::pack::fields_disjoint(
                <$name as $crate::pack::PackRecord>::FIELDS,
                $len,
                <$name as $crate::pack::PackRecord>::HEADER.is_some(),
            ),
            concat!("invalid field table for ", $hw_name),
        );
    )+};
}

/// Declares enums stored in record fields, with their hardware encoding as discriminant.
macro_rules! hw_enum {
    ($(
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:expr,
            )+
        }
    )+) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant = $value,
            )+
        }

        impl $crate::pack::IntoFieldValue for $name {
            #[inline]
            fn into_field_value(self) -> $crate::pack::FieldValue {
                $crate::pack::FieldValue::Uint(self as u64)
            }
        }
    )+};
}

pub(crate) use hw_enum;
pub(crate) use record;

#[cfg(test)]
mod tests {
    use super::*;

    hw_enum! {
        enum Mode {
            #[default]
            Off = 0,
            On = 2,
        }
    }

    record! {
        struct Sample("SAMPLE", 16, 4) {
            count: u32 => (0, 0, 4, Uint),
            enable: bool => (0, 4, 1, Bool),
            mode: Mode => (0, 5, 2, Uint),
            bias: f32 => (0, 8, 16, Fixed { frac_bits: 8, signed: true }),
            offset: i32 => (0, 24, 8, Int),
            scale: f32 => (1, 0, 32, Float),
            base: u64 => (2, 0, 32, Address { shift: 6 }),
            levels: u32 => (3, 0, 6, Minus1),
        }

        struct Packet("PACKET", 8, 4, header = 0x7812_0000) {
            value: u32 => (1, 0, 32, Uint),
        }
    }

    #[test]
    fn default_packs_to_zero() {
        assert_eq!(Sample::default().to_bytes(), [0; 16]);
    }

    #[test]
    fn encodings() {
        let bytes = Sample {
            count: 9,
            enable: true,
            mode: Mode::On,
            bias: -1.5,
            offset: -2,
            scale: 2.0,
            base: 0x1_0000_0040,
            levels: 3,
        }
        .to_bytes();

        assert_eq!(Sample::raw(&bytes, "count"), Some(9));
        assert_eq!(Sample::raw(&bytes, "enable"), Some(1));
        assert_eq!(Sample::raw(&bytes, "mode"), Some(2));
        assert_eq!(Sample::raw(&bytes, "bias"), Some((-384i64 as u64) & 0xffff));
        assert_eq!(Sample::raw(&bytes, "offset"), Some(0xfe));
        assert_eq!(
            Sample::raw(&bytes, "scale"),
            Some(u64::from(2.0f32.to_bits()))
        );
        assert_eq!(Sample::raw(&bytes, "base"), Some(0x0400_0001));
        assert_eq!(Sample::raw(&bytes, "levels"), Some(2));
    }

    #[test]
    fn fixed_point_clamps_and_rounds_to_even() {
        let field = Field::new("lod", 0, 0, 13, Encoding::Fixed {
            frac_bits: 8,
            signed: false,
        });

        assert_eq!(field.encode(FieldValue::Float(-3.0)), 0);
        assert_eq!(field.encode(FieldValue::Float(100.0)), 0x1fff);
        // 0.5 / 256 and 1.5 / 256 land exactly between two steps.
        assert_eq!(field.encode(FieldValue::Float(0.5 / 256.0)), 0);
        assert_eq!(field.encode(FieldValue::Float(1.5 / 256.0)), 2);
        assert_eq!(field.encode(FieldValue::Float(1.0)), 256);
    }

    #[test]
    fn packet_header_carries_length() {
        let bytes = Packet { value: 7 }.to_bytes();

        assert_eq!(&bytes[..4], &0x7812_0000u32.to_le_bytes());
        assert_eq!(&bytes[4..], &7u32.to_le_bytes());
    }

    #[test]
    fn merge_equals_union() {
        let partial = Sample {
            count: 3,
            scale: 0.25,
            ..Default::default()
        };
        let overlay = Sample {
            enable: true,
            levels: 8,
            bias: 0.5,
            ..Default::default()
        };
        let union = Sample {
            count: 3,
            scale: 0.25,
            enable: true,
            levels: 8,
            bias: 0.5,
            ..Default::default()
        };

        let mut merged = partial.to_bytes();
        merge(&mut merged, &overlay.to_bytes());
        assert_eq!(merged, union.to_bytes());
    }

    #[test]
    fn overlap_is_detected() {
        let fields = [
            Field::new("a", 0, 0, 8, Encoding::Uint),
            Field::new("b", 0, 7, 2, Encoding::Uint),
        ];

        assert!(!fields_disjoint(&fields, 4, false));
        assert!(fields_disjoint(&fields[..1], 4, false));
        assert!(!fields_disjoint(&fields[..1], 4, true));
        assert!(!fields_disjoint(&fields[..1], 0, false));
    }

    #[test]
    fn dwords() {
        let dwords = to_dwords(&Packet { value: 0xdead_beef });

        assert_eq!(dwords.as_slice(), &[0x7812_0000, 0xdead_beef]);
    }
}
