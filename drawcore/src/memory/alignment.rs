// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{DeviceSize, NonZeroDeviceSize};
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Power-of-two alignment of a device address or offset.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAlignment(NonZeroDeviceSize);

impl DeviceAlignment {
    /// The smallest possible alignment, 1.
    pub const MIN: Self = Self(NonZeroDeviceSize::MIN);

    /// Tries to create a `DeviceAlignment` from a [`DeviceSize`], returning [`None`] if it's not a
    /// power of two.
    #[inline]
    pub const fn new(alignment: DeviceSize) -> Option<Self> {
        if alignment.is_power_of_two() {
            Some(unsafe { DeviceAlignment::new_unchecked(alignment) })
        } else {
            None
        }
    }

    /// Creates a `DeviceAlignment` from a [`DeviceSize`] without checking if it's a power of two.
    ///
    /// # Safety
    ///
    /// - `alignment` must be a power of two, which also means it must be non-zero.
    #[inline]
    pub const unsafe fn new_unchecked(alignment: DeviceSize) -> Self {
        debug_assert!(alignment.is_power_of_two());

        Self(unsafe { NonZeroDeviceSize::new_unchecked(alignment) })
    }

    /// Returns the alignment as a [`DeviceSize`].
    #[inline]
    pub const fn as_devicesize(self) -> DeviceSize {
        self.0.get()
    }

    /// Returns the base-2 logarithm of the alignment.
    #[inline]
    pub const fn log2(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Returns the larger of the two alignments.
    #[inline]
    pub const fn max(self, other: Self) -> Self {
        if self.0.get() >= other.0.get() {
            self
        } else {
            other
        }
    }
}

impl Debug for DeviceAlignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?} (1 << {:?})", self.0, self.log2())
    }
}

impl Default for DeviceAlignment {
    #[inline]
    fn default() -> Self {
        DeviceAlignment::MIN
    }
}

impl From<DeviceAlignment> for DeviceSize {
    #[inline]
    fn from(alignment: DeviceAlignment) -> Self {
        alignment.as_devicesize()
    }
}

/// Rounds `val` up to a multiple of `alignment`.
#[inline]
pub const fn align_up(val: DeviceSize, alignment: DeviceAlignment) -> DeviceSize {
    align_down(val + alignment.as_devicesize() - 1, alignment)
}

/// Rounds `val` down to a multiple of `alignment`.
#[inline]
pub const fn align_down(val: DeviceSize, alignment: DeviceAlignment) -> DeviceSize {
    val & !(alignment.as_devicesize() - 1)
}

/// Returns whether `val` is a multiple of `alignment`.
#[inline]
pub const fn is_aligned(val: DeviceSize, alignment: DeviceAlignment) -> bool {
    val & (alignment.as_devicesize() - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(DeviceAlignment::new(0).is_none());
        assert!(DeviceAlignment::new(24).is_none());
        assert_eq!(DeviceAlignment::new(64).unwrap().log2(), 6);
    }

    #[test]
    fn rounding() {
        let a = DeviceAlignment::new(16).unwrap();

        assert_eq!(align_up(0, a), 0);
        assert_eq!(align_up(1, a), 16);
        assert_eq!(align_up(32, a), 32);
        assert_eq!(align_down(47, a), 32);
        assert!(is_aligned(48, a));
        assert!(!is_aligned(49, a));
    }
}
