// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command-stream assembly and per-draw state materialization for Vulkan-class GPU drivers.
//!
//! # Brief summary
//!
//! - A [`Device`](crate::device::Device) owns the process-local services of one GPU: the
//!   [BO service](crate::memory::bo::BoService) that hands out GPU-visible buffer objects, the
//!   [memory-requirements cache](crate::memory::requirements), the
//!   [scratch-buffer store](crate::memory::scratch) and the descriptor heaps.
//!
//! - A [`CommandPool`](crate::command_buffer::pool::CommandPool) owns
//!   [`CommandBuffer`](crate::command_buffer::CommandBuffer)s. Each command buffer records into a
//!   [command stream](crate::command_buffer::stream) of dwords and allocates short-lived
//!   descriptor memory from a [batch pool](crate::memory::pool). Every BO a recording touches is
//!   collected in its [reference set](crate::memory::refs).
//!
//! - Hardware records are written through bit-exact [field tables](crate::pack). Gen-style state
//!   packets, Mali-style descriptors and Nouveau-style push headers share the same
//!   [`PackRecord`](crate::pack::PackRecord) interface.
//!
//! - Before every draw, [`flush_dynamic_state`](crate::command_buffer::CommandBuffer::draw)
//!   walks the [dirty set](crate::pipeline::dynamic_state) and re-emits only what changed.
//!
//! - [`Queue::submit`](crate::device::queue::Queue::submit) hands the recorded streams plus their
//!   references to the BO service and moves [binary syncs](crate::sync) along their
//!   reset → submitted → signaled state machine.
//!
//! - [Query pools](crate::query) keep their reports in a GART BO that the host reads back
//!   directly, and the [`wsi`] hooks move presentable images between the compositor's native
//!   fences and binary syncs.

pub use ash::vk::DeviceSize;
use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    num::NonZero,
};

mod cache;
pub mod buffer;
pub mod command_buffer;
pub mod descriptor_set;
pub mod device;
pub mod format;
pub mod image;
mod macros;
pub mod memory;
pub mod pack;
pub mod pipeline;
pub mod query;
pub mod sampler;
pub mod sync;
pub mod wsi;

/// A [`DeviceSize`] that is known not to equal zero.
pub type NonZeroDeviceSize = NonZero<DeviceSize>;

/// Error type returned by most fallible functions of the crate.
///
/// The variants mirror the Vulkan return codes a driver surfaces to the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum VulkanError {
    OutOfHostMemory,
    OutOfDeviceMemory,
    OutOfPoolMemory,
    InitializationFailed,
    DeviceLost,
    TooManyObjects,
    InvalidExternalHandle,
    SurfaceLost,
    Timeout,
    Unknown,
}

impl VulkanError {
    /// Converts an `errno` value returned by the OS into the closest Vulkan return code.
    pub(crate) fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EMFILE | libc::ENFILE => VulkanError::TooManyObjects,
            libc::ENOMEM => VulkanError::OutOfHostMemory,
            libc::EBADF | libc::EINVAL => VulkanError::InvalidExternalHandle,
            libc::ENODEV | libc::EIO => VulkanError::DeviceLost,
            libc::ETIME | libc::ETIMEDOUT => VulkanError::Timeout,
            _ => VulkanError::Unknown,
        }
    }

    /// Reads `errno` of the last failed libc call.
    pub(crate) fn last_os_error() -> Self {
        Self::from_errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl Error for VulkanError {}

impl Display for VulkanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        let msg = match self {
            VulkanError::OutOfHostMemory => "A host memory allocation has failed.",
            VulkanError::OutOfDeviceMemory => "A device memory allocation has failed.",
            VulkanError::OutOfPoolMemory => "A pool memory allocation has failed.",
            VulkanError::InitializationFailed => {
                "Initialization of an object could not be completed for implementation-specific \
                reasons."
            }
            VulkanError::DeviceLost => "The logical or physical device has been lost.",
            VulkanError::TooManyObjects => "Too many objects of the type have already been created.",
            VulkanError::InvalidExternalHandle => {
                "An external handle is not a valid handle of the specified type."
            }
            VulkanError::SurfaceLost => "A surface is no longer available.",
            VulkanError::Timeout => "A wait operation has not completed in the specified time.",
            VulkanError::Unknown => {
                "An unknown error has occurred; either the application has provided invalid input, \
                or an implementation failure has occurred."
            }
        };

        f.write_str(msg)
    }
}

/// A wrapper for error types of functions that can return validation errors.
#[derive(Clone, Debug)]
pub enum Validated<E> {
    /// A non-validation error occurred.
    Error(E),

    /// A validation error occurred.
    ValidationError(Box<ValidationError>),
}

impl<E> Validated<E> {
    /// Maps the inner `Error` value using the provided function, or does nothing if the value is
    /// `ValidationError`.
    #[inline]
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> Validated<F> {
        match self {
            Self::Error(err) => Validated::Error(f(err)),
            Self::ValidationError(err) => Validated::ValidationError(err),
        }
    }

    /// Returns the inner `Error` value, or panics if it contains `ValidationError`.
    #[inline(always)]
    #[track_caller]
    pub fn unwrap(self) -> E {
        match self {
            Self::Error(err) => err,
            Self::ValidationError(err) => {
                panic!(
                    "called `Validated::unwrap` on a `ValidationError` value: {:?}",
                    err
                )
            }
        }
    }
}

impl<E> Error for Validated<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Error(err) => Some(err),
            Self::ValidationError(err) => Some(err),
        }
    }
}

impl<E> Display for Validated<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Error(_) => write!(f, "a non-validation error occurred"),
            Self::ValidationError(_) => write!(f, "a validation error occurred"),
        }
    }
}

impl<E> From<Box<ValidationError>> for Validated<E> {
    #[inline]
    fn from(err: Box<ValidationError>) -> Self {
        Self::ValidationError(err)
    }
}

impl From<VulkanError> for Validated<VulkanError> {
    #[inline]
    fn from(err: VulkanError) -> Self {
        Self::Error(err)
    }
}

/// The arguments or other context of a call did not satisfy the valid usage rules.
#[derive(Clone, Debug, Default)]
pub struct ValidationError {
    /// The context in which the problem exists (e.g. a specific parameter).
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,

    /// If applicable, a list of device features or properties, one of which would make the
    /// call valid.
    pub requires_one_of: &'static [&'static str],

    /// A list of Vulkan VUIDs that were violated.
    pub vuids: &'static [&'static str],
}

impl ValidationError {
    pub(crate) fn add_context(mut self: Box<Self>, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        if self.context.is_empty() {
            self.context = context.into();
        } else {
            self.context = format!("{}.{}", context.into(), self.context).into();
        }

        self
    }

    pub(crate) fn set_vuids(mut self: Box<Self>, vuids: &'static [&'static str]) -> Box<Self> {
        self.vuids = vuids;
        self
    }
}

impl Error for ValidationError {}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)?;
        } else {
            write!(f, "{}: {}", self.context, self.problem)?;
        }

        if !self.requires_one_of.is_empty() {
            if self.context.is_empty() && self.problem.is_empty() {
                write!(f, "requires one of: {}", self.requires_one_of.join(", "))?;
            } else {
                write!(f, " -- requires one of: {}", self.requires_one_of.join(", "))?;
            }
        }

        if !self.vuids.is_empty() {
            write!(f, " (Vulkan VUIDs: {}", self.vuids[0])?;

            for vuid in &self.vuids[1..] {
                write!(f, ", {}", vuid)?;
            }

            write!(f, ")")?;
        }

        Ok(())
    }
}

/// Implemented on objects that belong to a [`Device`](crate::device::Device).
pub trait DeviceOwned {
    /// Returns the device that owns `self`.
    fn device(&self) -> &std::sync::Arc<device::Device>;
}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside the crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());
