// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Hooks for the Android window system loader.
//!
//! The loader hands over buffer ownership through native fence descriptors. Acquiring waits on
//! the descriptor on the host and then signals the application's syncs from a queue; releasing
//! drains the application's waits and reports that no fence is needed.

use crate::{
    device::{Queue, SubmitInfo},
    format::Format,
    image::ImageUsage,
    macros::{driver_bitflags, vulkan_bitflags},
    sync::{wait_native_fence, BinarySync, BinarySyncCreateInfo, SyncError},
    DeviceOwned, Validated, VulkanError,
};
use std::{os::fd::OwnedFd, sync::Arc};

vulkan_bitflags! {
    /// How the swapchain shares its images with the compositor.
    SwapchainImageUsage = SwapchainImageUsageFlagsANDROID(u32);

    /// The image is shared for front-buffer rendering.
    SHARED = SHARED,
}

driver_bitflags! {
    /// Gralloc buffer usage bits.
    GrallocUsage = u64;

    /// The GPU samples the buffer.
    GPU_SAMPLED_IMAGE = 1 << 8,

    /// The GPU renders to the buffer.
    GPU_FRAMEBUFFER = 1 << 9,
}

/// Returns the producer and consumer gralloc usage for swapchain images.
pub fn swapchain_gralloc_usage(
    format: Format,
    image_usage: ImageUsage,
    swapchain_usage: SwapchainImageUsage,
) -> Result<(GrallocUsage, GrallocUsage), VulkanError> {
    if swapchain_usage.intersects(SwapchainImageUsage::SHARED) {
        return Err(VulkanError::InitializationFailed);
    }

    log::trace!("gralloc usage for {format:?} with {image_usage:?}");

    let mut producer = GrallocUsage::empty();
    let mut consumer = GrallocUsage::empty();

    if image_usage.intersects(ImageUsage::TRANSFER_DST | ImageUsage::COLOR_ATTACHMENT) {
        producer |= GrallocUsage::GPU_FRAMEBUFFER;
    }

    if image_usage.intersects(
        ImageUsage::TRANSFER_SRC
            | ImageUsage::SAMPLED
            | ImageUsage::STORAGE
            | ImageUsage::INPUT_ATTACHMENT,
    ) {
        consumer |= GrallocUsage::GPU_SAMPLED_IMAGE;
    }

    Ok((producer, consumer))
}

/// Takes ownership of a presentable image back from the compositor.
///
/// Waits until `native_fence` polls readable and closes it whatever the outcome. Then signals
/// `semaphore` and `fence` from `queue`.
pub fn acquire_image(
    queue: &Queue,
    native_fence: Option<OwnedFd>,
    semaphore: Option<&Arc<BinarySync>>,
    fence: Option<&Arc<BinarySync>>,
) -> Result<(), Validated<VulkanError>> {
    if let Some(fd) = native_fence {
        wait_native_fence(fd).map_err(|err| {
            log::warn!("waiting on the native fence failed: {err}");
            VulkanError::SurfaceLost
        })?;
    }

    queue.submit(SubmitInfo {
        signal_syncs: semaphore.into_iter().chain(fence).cloned().collect(),
        ..Default::default()
    })
}

/// Hands a presentable image to the compositor once `wait_syncs` have signaled.
///
/// The wait happens before returning, so the native fence returned is always `-1`.
pub fn queue_signal_release_image(
    queue: &Queue,
    wait_syncs: &[Arc<BinarySync>],
) -> Result<i32, Validated<VulkanError>> {
    let drained = BinarySync::new(queue.device().clone(), BinarySyncCreateInfo::default())?;

    queue.submit(SubmitInfo {
        wait_syncs: wait_syncs.to_vec(),
        signal_syncs: vec![drained.clone()],
        ..Default::default()
    })?;

    drained.wait(None).map_err(|err| match err {
        SyncError::OomError(err) | SyncError::Os(err) => err,
        SyncError::DeviceLost => VulkanError::DeviceLost,
        SyncError::Timeout => VulkanError::Timeout,
    })?;

    Ok(-1)
}

#[cfg(test)]
mod tests {
    use super::{
        acquire_image, queue_signal_release_image, swapchain_gralloc_usage, GrallocUsage,
        SwapchainImageUsage,
    };
    use crate::{
        device::{Queue, QueueCreateInfo},
        format::Format,
        image::ImageUsage,
        sync::{BinarySync, BinarySyncCreateInfo, SyncState},
        Validated, VulkanError,
    };
    use std::{
        os::fd::{AsRawFd, FromRawFd, OwnedFd},
        time::Duration,
    };

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);

        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn gralloc_usage() {
        let (producer, consumer) = swapchain_gralloc_usage(
            Format::R8G8B8A8_UNORM,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            SwapchainImageUsage::empty(),
        )
        .unwrap();
        assert_eq!(producer, GrallocUsage::GPU_FRAMEBUFFER);
        assert_eq!(consumer, GrallocUsage::GPU_SAMPLED_IMAGE);

        let (producer, consumer) = swapchain_gralloc_usage(
            Format::R8G8B8A8_UNORM,
            ImageUsage::TRANSFER_SRC,
            SwapchainImageUsage::empty(),
        )
        .unwrap();
        assert!(producer.is_empty());
        assert_eq!(consumer, GrallocUsage::GPU_SAMPLED_IMAGE);

        assert_eq!(
            swapchain_gralloc_usage(
                Format::R8G8B8A8_UNORM,
                ImageUsage::COLOR_ATTACHMENT,
                SwapchainImageUsage::SHARED,
            ),
            Err(VulkanError::InitializationFailed),
        );
    }

    #[test]
    fn acquire_signals_syncs() {
        let (device, service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());
        let semaphore = BinarySync::new(device.clone(), BinarySyncCreateInfo::default()).unwrap();
        let fence = BinarySync::new(device, BinarySyncCreateInfo::default()).unwrap();

        let (read, write) = pipe();
        let byte = [1u8];
        assert_eq!(unsafe { libc::write(write.as_raw_fd(), byte.as_ptr().cast(), 1) }, 1);

        acquire_image(&queue, Some(read), Some(&semaphore), Some(&fence)).unwrap();

        assert_ne!(semaphore.state(), SyncState::Reset);
        fence.wait(Some(Duration::from_secs(1))).unwrap();

        let submissions = service.submissions();
        let last = submissions.last().unwrap();
        assert!(last.access_of(semaphore.bo().handle()).is_some());
        assert!(last.access_of(fence.bo().handle()).is_some());
    }

    #[test]
    fn acquire_broken_fence() {
        let (device, service) = dev!();
        let queue = Queue::new(device, QueueCreateInfo::default());

        // A write end whose reader is gone polls with an error.
        let (read, write) = pipe();
        drop(read);

        assert!(matches!(
            acquire_image(&queue, Some(write), None, None),
            Err(Validated::Error(VulkanError::SurfaceLost)),
        ));
        assert!(service.submissions().is_empty());
    }

    #[test]
    fn release_returns_no_fence() {
        let (device, service) = dev!();
        let queue = Queue::new(device.clone(), QueueCreateInfo::default());
        let rendered = BinarySync::new(
            device,
            BinarySyncCreateInfo {
                signaled: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            queue_signal_release_image(&queue, &[rendered.clone()]).unwrap(),
            -1,
        );

        let submissions = service.submissions();
        let last = submissions.last().unwrap();
        assert!(last.access_of(rendered.bo().handle()).is_some());
    }
}
