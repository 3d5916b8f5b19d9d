//! Explicit-device scopes.
//!
//! The ambient current device is convenient for single-threaded callers and
//! faithful to how device runtimes are usually driven, but it is shared
//! state. A [`DeviceScope`] is the concurrent-caller alternative: it pins an
//! explicit ordinal and routes the device-scoped operations through that
//! pin, never reading or writing the ambient cell. Two threads holding
//! scopes on different devices cannot disturb each other.

use std::fmt;

use sluice_core::error::Result;
use sluice_core::{DeviceHandle, DeviceRegion, Platform, Stream};

use crate::runtime::{logged, Sluice};

impl Sluice {
    /// Pin an explicit device ordinal and operate on it directly.
    ///
    /// The ordinal is validated here and re-validated on every operation;
    /// the scope holds no platform handle, only the number.
    pub fn device(&self, ordinal: usize) -> Result<DeviceScope<'_>> {
        logged("device", self.platform().device_handle(ordinal))?;
        Ok(DeviceScope {
            runtime: self,
            ordinal,
        })
    }
}

/// A borrowed view of the runtime pinned to one device ordinal.
///
/// Exposes the device-scoped operation subset with the ambient resolution
/// step replaced by the pinned ordinal. Stream-scoped operations need no
/// counterpart here; they never resolved a device to begin with.
#[derive(Clone, Copy)]
pub struct DeviceScope<'a> {
    runtime: &'a Sluice,
    ordinal: usize,
}

impl DeviceScope<'_> {
    /// The pinned ordinal.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn op<T>(
        &self,
        op: &'static str,
        call: impl FnOnce(&dyn Platform, DeviceHandle) -> Result<T>,
    ) -> Result<T> {
        let device = logged(op, self.runtime.platform().device_handle(self.ordinal))?;
        logged(op, call(self.runtime.platform().as_ref(), device))
    }

    /// Create a stream bound to the pinned device.
    pub fn create_stream(&self) -> Result<Stream> {
        self.op("create_stream", |platform, device| {
            platform.create_stream(device)
        })
    }

    /// Destroy a stream against the pinned device.
    pub fn destroy_stream(&self, stream: Stream) -> Result<()> {
        self.op("destroy_stream", |platform, device| {
            platform.destroy_stream(device, stream)
        })
    }

    /// Blocking host to device copy on the pinned device.
    pub fn copy_host_to_device(&self, src: &[u8], dst: &DeviceRegion) -> Result<()> {
        self.op("copy_host_to_device", |platform, device| {
            platform.copy_host_to_device(device, src, dst)
        })
    }

    /// Blocking device to host copy on the pinned device.
    pub fn copy_device_to_host(&self, src: &DeviceRegion, dst: &mut [u8]) -> Result<()> {
        self.op("copy_device_to_host", |platform, device| {
            platform.copy_device_to_host(device, src, dst)
        })
    }

    /// Blocking device to device copy of `count` bytes on the pinned device.
    pub fn copy_device_to_device(
        &self,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        self.op("copy_device_to_device", |platform, device| {
            platform.copy_device_to_device(device, src, dst, count)
        })
    }

    /// Blocking fill of `count` bytes on the pinned device.
    pub fn fill_u8(&self, dst: &DeviceRegion, value: u8, count: usize) -> Result<()> {
        self.op("fill_u8", |platform, device| {
            platform.fill_u8(device, dst, value, count)
        })
    }

    /// Blocking fill of `count` 32-bit words on the pinned device.
    pub fn fill_u32(&self, dst: &DeviceRegion, value: u32, count: usize) -> Result<()> {
        self.op("fill_u32", |platform, device| {
            platform.fill_u32(device, dst, value, count)
        })
    }

    /// Block until every stream bound to the pinned device has drained.
    pub fn synchronize(&self) -> Result<()> {
        self.op("device_synchronize", |platform, device| {
            platform.synchronize_device(device)
        })
    }

    /// Allocate `bytes` on the pinned device. Same convention as
    /// [`Sluice::allocate`]: failure is `None`, never an error value.
    pub fn allocate(&self, bytes: usize) -> Option<DeviceRegion> {
        let device = logged("allocate", self.runtime.platform().device_handle(self.ordinal)).ok()?;
        let region = self.runtime.platform().allocate(device, bytes);
        if region.is_none() {
            tracing::error!(
                op = "allocate",
                device = self.ordinal,
                bytes,
                "device allocation failed"
            );
        }
        region
    }

    /// Return `region` to the pinned device. Infallible from the caller's
    /// side; platform-level failures are logged and swallowed.
    pub fn free(&self, region: DeviceRegion) {
        debug_assert_eq!(
            self.ordinal,
            region.device(),
            "region freed through a scope on a different device"
        );
        let device = match self.runtime.platform().device_handle(self.ordinal) {
            Ok(device) => device,
            Err(error) => {
                tracing::trace!(
                    error = error.name(),
                    device = self.ordinal,
                    "free skipped: device is not resolvable"
                );
                return;
            }
        };
        let _ = logged("free", self.runtime.platform().free(device, region));
    }
}

impl fmt::Debug for DeviceScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceScope")
            .field("ordinal", &self.ordinal)
            .finish()
    }
}
