// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! GPU-visible memory: buffer objects and the allocators built on top of them.
//!
//! Everything the GPU reads or writes lives in a [`Bo`] handed out by a [`BoService`]. The
//! other modules layer policy on top:
//!
//! - [`pool`]: per-command-buffer bump allocation of short-lived descriptor memory.
//! - [`refs`]: the set of BOs a submission depends on, with their access class.
//! - [`requirements`]: the publish-once cache of buffer memory requirements.
//! - [`scratch`]: the device-wide scratch buffer used by partial renders.

pub use self::{
    alignment::{align_down, align_up, is_aligned, DeviceAlignment},
    bo::{Bo, BoHandle, BoService, PushRange, Submission},
};
use crate::{macros::driver_bitflags, macros::vulkan_bitflags, DeviceSize};

pub mod alignment;
pub mod bo;
pub mod host;
pub mod pool;
pub mod refs;
pub mod requirements;
pub mod scratch;

driver_bitflags! {
    /// Placement and CPU access class of a buffer object.
    BoFlags = u32;

    /// Place the BO in host memory mapped through the GART aperture.
    GART = 1 << 0,

    /// Place the BO in device-local memory.
    VRAM = 1 << 1,

    /// The BO gets a CPU mapping that stays valid for its whole lifetime.
    MAPPED = 1 << 2,

    /// CPU writes are coherent with the GPU without explicit flushes.
    COHERENT = 1 << 3,

    /// CPU writes go through a write-combining mapping.
    WRITE_COMBINED = 1 << 4,

    /// The BO is never exported to another process.
    NO_SHARE = 1 << 5,
}

driver_bitflags! {
    /// How a submission accesses a BO.
    ///
    /// The classes form a lattice where `READ | WRITE` is the join of the two.
    BoAccess = u32;

    READ = 1 << 0,
    WRITE = 1 << 1,
}

impl BoAccess {
    /// Read-write access.
    pub const RW: Self = Self::READ.union(Self::WRITE);
}

vulkan_bitflags! {
    /// How a buffer is going to be used.
    BufferUsage = BufferUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    UNIFORM_TEXEL_BUFFER = UNIFORM_TEXEL_BUFFER,
    STORAGE_TEXEL_BUFFER = STORAGE_TEXEL_BUFFER,
    UNIFORM_BUFFER = UNIFORM_BUFFER,
    STORAGE_BUFFER = STORAGE_BUFFER,
    INDEX_BUFFER = INDEX_BUFFER,
    VERTEX_BUFFER = VERTEX_BUFFER,
    INDIRECT_BUFFER = INDIRECT_BUFFER,
    SHADER_DEVICE_ADDRESS = SHADER_DEVICE_ADDRESS,
    TRANSFORM_FEEDBACK_BUFFER = TRANSFORM_FEEDBACK_BUFFER_EXT,
}

vulkan_bitflags! {
    /// Flags that affect how a buffer is created.
    BufferCreateFlags = BufferCreateFlags(u32);

    SPARSE_BINDING = SPARSE_BINDING,
    SPARSE_RESIDENCY = SPARSE_RESIDENCY,
    SPARSE_ALIASED = SPARSE_ALIASED,
    PROTECTED = PROTECTED,
    DEVICE_ADDRESS_CAPTURE_REPLAY = DEVICE_ADDRESS_CAPTURE_REPLAY,
}

/// Memory requirements of a buffer as reported by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: DeviceSize,
    pub alignment: DeviceAlignment,
    pub memory_type_bits: u32,
    pub prefers_dedicated_allocation: bool,
    pub requires_dedicated_allocation: bool,
}

#[cfg(test)]
mod tests {
    use super::BoAccess;

    #[test]
    fn access_lattice() {
        assert_eq!(BoAccess::READ | BoAccess::WRITE, BoAccess::RW);
        assert!(BoAccess::RW.contains(BoAccess::READ));
        assert_eq!(format!("{:?}", BoAccess::RW), "READ | WRITE");
    }
}
