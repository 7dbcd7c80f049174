// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Binary GPU → CPU readiness primitives.
//!
//! A [`BinarySync`] owns a small BO and the dma-buf exported from it. Submissions that signal the
//! sync reference the BO for writing, so the dma-buf polls writable exactly when all of that work
//! has completed. The state machine only moves forward:
//!
//! ```text
//! reset ──submit──▶ submitted ──dma-buf writable──▶ signaled
//!   ▲                                                  │
//!   └──────────────────────reset───────────────────────┘
//! ```
//!
//! Every transition is published under the device's sync mutex and broadcast on its condition
//! variable, which is what lets [`wait_many`] sleep on syncs that have not been submitted yet.

use crate::{
    device::Device,
    macros::impl_id_counter,
    memory::{refs::BoReference, Bo, BoAccess, BoFlags, DeviceAlignment},
    DeviceOwned, NonExhaustive, VulkanError,
};
use smallvec::SmallVec;
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    num::NonZero,
    os::fd::{AsRawFd, OwnedFd},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

const SYNC_BO_SIZE: u64 = 4096;

/// Longest single `poll` of a wait-any that also watches reset syncs. Those only change state
/// through the condition variable, which a thread blocked in `poll` does not see.
const WAIT_ANY_SLICE: Duration = Duration::from_millis(5);

/// The state of a binary sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SyncState {
    /// Not signaled, and no pending work will signal it.
    Reset = 0,
    /// Pending work will signal it.
    Submitted = 1,
    Signaled = 2,
}

impl SyncState {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Reset,
            1 => Self::Submitted,
            _ => Self::Signaled,
        }
    }
}

/// Parameters to create a new `BinarySync`.
#[derive(Clone, Debug)]
pub struct BinarySyncCreateInfo {
    /// Whether the sync starts out signaled.
    ///
    /// The default value is `false`.
    pub signaled: bool,

    pub _ne: NonExhaustive,
}

impl Default for BinarySyncCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            signaled: false,
            _ne: NonExhaustive(()),
        }
    }
}

/// A binary sync object backed by an exported dma-buf.
#[derive(Debug)]
pub struct BinarySync {
    device: Arc<Device>,
    id: NonZero<u64>,
    bo: Arc<Bo>,
    dmabuf: OwnedFd,
    state: AtomicU8,
}

impl BinarySync {
    pub fn new(
        device: Arc<Device>,
        create_info: BinarySyncCreateInfo,
    ) -> Result<Arc<BinarySync>, VulkanError> {
        let BinarySyncCreateInfo { signaled, _ne: _ } = create_info;

        let bo = Bo::new(
            device.service(),
            SYNC_BO_SIZE,
            DeviceAlignment::MIN,
            BoFlags::GART | BoFlags::NO_SHARE,
        )?;
        let dmabuf = bo.export_dmabuf()?;

        let state = if signaled {
            SyncState::Signaled
        } else {
            SyncState::Reset
        };

        Ok(Arc::new(BinarySync {
            device,
            id: Self::next_id(),
            bo,
            dmabuf,
            state: AtomicU8::new(state as u8),
        }))
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Returns the last observed state, without polling the dma-buf.
    #[inline]
    pub fn state(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the reference a submission must carry to wait on this sync.
    #[inline]
    pub fn wait_ref(&self) -> BoReference {
        BoReference {
            bo: self.bo.clone(),
            access: BoAccess::READ,
        }
    }

    /// Returns the reference a submission must carry to signal this sync.
    #[inline]
    pub fn signal_ref(&self) -> BoReference {
        BoReference {
            bo: self.bo.clone(),
            access: BoAccess::RW,
        }
    }

    /// Returns the sync to the reset state.
    pub fn reset(&self) {
        self.set_state(SyncState::Reset);
    }

    /// Moves a reset sync to the submitted state. Called once the kernel has accepted work that
    /// signals it.
    pub(crate) fn mark_submitted(&self) {
        if self.state() == SyncState::Reset {
            self.set_state(SyncState::Submitted);
        }
    }

    /// Signals the sync from the host.
    pub fn signal(&self) {
        self.set_state(SyncState::Signaled);
    }

    fn set_state(&self, state: SyncState) {
        self.state.store(state as u8, Ordering::Release);
        self.device.notify_syncs();
    }

    /// Polls the dma-buf without blocking and moves a submitted sync to signaled if its work
    /// has completed. Returns whether the sync is signaled.
    pub fn is_signaled(&self) -> Result<bool, SyncError> {
        self.device.check_lost()?;

        match self.state() {
            SyncState::Signaled => Ok(true),
            SyncState::Reset => Ok(false),
            SyncState::Submitted => {
                if poll_writable(&[self.dmabuf.as_raw_fd()], Some(Duration::ZERO))? {
                    self.complete();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn complete(&self) {
        if self
            .state
            .compare_exchange(
                SyncState::Submitted as u8,
                SyncState::Signaled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.device.notify_syncs();
        }
    }

    /// Waits until the sync is signaled or `timeout` elapses. `None` waits forever.
    ///
    /// A timeout leaves the state untouched.
    pub fn wait(self: &Arc<Self>, timeout: Option<Duration>) -> Result<(), SyncError> {
        wait_many(&self.device, &[self.clone()], true, timeout)
    }
}

impl DeviceOwned for BinarySync {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(BinarySync);

/// Waits on several syncs of `device` with fence-wait semantics: all of them when `wait_all` is
/// true, otherwise any one.
///
/// Submitted syncs are waited on through their dma-bufs. While a needed sync is still reset, the
/// wait sleeps on the device's condition variable until some other thread submits it. A wait-any
/// over both kinds polls in short slices and re-checks the reset syncs between them.
pub fn wait_many(
    device: &Device,
    syncs: &[Arc<BinarySync>],
    wait_all: bool,
    timeout: Option<Duration>,
) -> Result<(), SyncError> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        device.check_lost()?;

        let mut guard = device.lock_syncs();
        let mut pending_fds: SmallVec<[i32; 8]> = SmallVec::new();
        let mut any_reset = false;
        let mut signaled = 0;

        for sync in syncs {
            match sync.state() {
                SyncState::Signaled => signaled += 1,
                SyncState::Reset => any_reset = true,
                SyncState::Submitted => pending_fds.push(sync.dmabuf.as_raw_fd()),
            }
        }

        if (wait_all && signaled == syncs.len()) || (!wait_all && signaled > 0) {
            return Ok(());
        }

        if (wait_all && any_reset) || pending_fds.is_empty() {
            if !device.wait_syncs_changed(&mut guard, deadline) {
                return Err(SyncError::Timeout);
            }

            continue;
        }

        drop(guard);

        let mut remaining =
            deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

        if !wait_all && any_reset {
            remaining = Some(remaining.map_or(WAIT_ANY_SLICE, |r| r.min(WAIT_ANY_SLICE)));
        }

        // Blocking on one descriptor is enough when all are needed; the loop catches the rest.
        let fds = if wait_all {
            &pending_fds[..1]
        } else {
            &pending_fds[..]
        };

        let ready = poll_writable(fds, remaining)?;

        for sync in syncs {
            if sync.state() == SyncState::Submitted
                && poll_writable(&[sync.dmabuf.as_raw_fd()], Some(Duration::ZERO))?
            {
                sync.complete();
            }
        }

        if !ready && deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(SyncError::Timeout);
        }
    }
}

/// Waits until one of `fds` polls writable. Returns `false` on timeout.
fn poll_writable(fds: &[i32], timeout: Option<Duration>) -> Result<bool, VulkanError> {
    let mut pollfds: SmallVec<[libc::pollfd; 8]> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        })
        .collect();

    let timeout_ms = match timeout {
        None => -1,
        Some(timeout) => {
            let ms = timeout.as_nanos().div_ceil(1_000_000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        }
    };

    loop {
        let ret = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        match ret {
            0 => return Ok(false),
            n if n > 0 => {
                if pollfds
                    .iter()
                    .any(|pollfd| pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0)
                {
                    return Err(VulkanError::DeviceLost);
                }

                return Ok(true);
            }
            _ => {
                let err = std::io::Error::last_os_error();

                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(VulkanError::from_errno(err.raw_os_error().unwrap_or(0)));
                }
            }
        }
    }
}

/// Waits on a native fence descriptor until it polls readable, then closes it.
pub(crate) fn wait_native_fence(fd: OwnedFd) -> Result<(), VulkanError> {
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let ret = unsafe { libc::poll(&mut pollfd, 1, -1) };

        if ret > 0 {
            return if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                Err(VulkanError::InvalidExternalHandle)
            } else {
                Ok(())
            };
        }

        let err = std::io::Error::last_os_error();

        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(VulkanError::from_errno(err.raw_os_error().unwrap_or(0)));
        }
    }
}

/// Error that can be returned when waiting on a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncError {
    /// Not enough memory available.
    OomError(VulkanError),

    /// The device has been lost.
    DeviceLost,

    /// The specified timeout wasn't long enough.
    Timeout,

    /// Waiting on the dma-buf failed.
    Os(VulkanError),
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::OomError(err) | Self::Os(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::OomError(_) => write!(f, "not enough memory available"),
            Self::DeviceLost => write!(f, "the device was lost"),
            Self::Timeout => write!(f, "the timeout has been reached"),
            Self::Os(_) => write!(f, "polling the dma-buf failed"),
        }
    }
}

impl From<VulkanError> for SyncError {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::OutOfHostMemory | VulkanError::OutOfDeviceMemory => Self::OomError(err),
            VulkanError::DeviceLost => Self::DeviceLost,
            VulkanError::Timeout => Self::Timeout,
            _ => Self::Os(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{wait_many, BinarySync, BinarySyncCreateInfo, SyncError, SyncState};
    use crate::memory::{BoService, Submission};
    use std::{
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn initially_signaled() {
        let (device, _service) = dev!();
        let sync = BinarySync::new(
            device,
            BinarySyncCreateInfo {
                signaled: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(sync.state(), SyncState::Signaled);
        sync.wait(Some(Duration::ZERO)).unwrap();

        sync.reset();
        assert_eq!(sync.state(), SyncState::Reset);
        assert!(!sync.is_signaled().unwrap());
    }

    #[test]
    fn timeout_keeps_state() {
        let (device, service) = dev!();
        let sync = BinarySync::new(device, Default::default()).unwrap();

        // The BO stays busy, so the dma-buf never polls writable.
        service.hold_submissions(true);
        service
            .submit(&Submission {
                pushes: &[],
                refs: &[],
                extra_refs: &[sync.signal_ref()],
            })
            .unwrap();
        sync.mark_submitted();

        assert_eq!(
            sync.wait(Some(Duration::from_millis(100))),
            Err(SyncError::Timeout),
        );
        assert_eq!(sync.state(), SyncState::Submitted);

        service.complete_all();
        sync.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(sync.state(), SyncState::Signaled);
    }

    #[test]
    fn wait_unblocks_on_submit() {
        let (device, _service) = dev!();
        let sync = BinarySync::new(device.clone(), Default::default()).unwrap();

        let waiter = {
            let sync = sync.clone();
            thread::spawn(move || sync.wait(Some(Duration::from_secs(10))))
        };

        thread::sleep(Duration::from_millis(20));
        // Nothing holds the BO, so the sync completes as soon as it is submitted.
        sync.mark_submitted();

        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(sync.state(), SyncState::Signaled);
    }

    #[test]
    fn wait_any() {
        let (device, _service) = dev!();
        let a = BinarySync::new(device.clone(), Default::default()).unwrap();
        let b = BinarySync::new(
            device.clone(),
            BinarySyncCreateInfo {
                signaled: true,
                ..Default::default()
            },
        )
        .unwrap();
        let syncs = [a, b];

        wait_many(&device, &syncs, false, Some(Duration::ZERO)).unwrap();
        assert_eq!(
            wait_many(&device, &syncs, true, Some(Duration::from_millis(10))),
            Err(SyncError::Timeout),
        );
    }

    #[test]
    fn wait_any_sees_reset_sync_signaled_elsewhere() {
        let (device, service) = dev!();
        let busy = BinarySync::new(device.clone(), Default::default()).unwrap();
        let idle = BinarySync::new(device.clone(), Default::default()).unwrap();

        service.hold_submissions(true);
        service
            .submit(&Submission {
                pushes: &[],
                refs: &[],
                extra_refs: &[busy.signal_ref()],
            })
            .unwrap();
        busy.mark_submitted();

        let signaler = {
            let idle = idle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                idle.signal();
            })
        };

        let start = Instant::now();
        wait_many(&device, &[busy.clone(), idle], false, Some(Duration::from_secs(2))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(busy.state(), SyncState::Submitted);

        signaler.join().unwrap();
    }

    #[test]
    fn lost_is_sticky() {
        let (device, _service) = dev!();
        let sync = BinarySync::new(device.clone(), Default::default()).unwrap();
        device.mark_lost("test");

        assert_eq!(sync.wait(None), Err(SyncError::DeviceLost));
        assert_eq!(sync.wait(Some(Duration::ZERO)), Err(SyncError::DeviceLost));
    }
}
