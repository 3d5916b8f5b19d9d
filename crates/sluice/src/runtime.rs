//! The ambient-device runtime.
//!
//! `Sluice` pairs a platform with one piece of mutable state: the ambient
//! current device. Every device-scoped operation resolves that ordinal fresh
//! at call time through a single private seam, so nothing below this module
//! ever reads ambient state. Stream-scoped operations never resolve it at
//! all; the stream's bound device is the execution site.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use sluice_core::error::{Error, Result};
use sluice_core::{DeviceHandle, DeviceRegion, Event, PinnedBuffer, Platform, Stream};

use crate::builder::{Backend, SluiceBuilder};

/// Logs a failed call once, at the site that first observed it. Callers
/// above propagate the error unchanged; this is the only place a failure
/// turns into log output.
pub(crate) fn logged<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(error) = &result {
        tracing::error!(op, error = error.name(), detail = %error, "device runtime call failed");
    }
    result
}

/// A device execution runtime over one backend platform.
///
/// The runtime holds no per-device state beyond the ambient ordinal; device
/// handles are resolved per call and never cached, so backends remain free
/// to invalidate and rebuild their internal tables between calls.
pub struct Sluice {
    platform: Arc<dyn Platform>,
    backend: Backend,
    current: RwLock<Option<usize>>,
}

impl Sluice {
    /// Start configuring a runtime.
    #[must_use]
    pub fn builder() -> SluiceBuilder {
        SluiceBuilder::new()
    }

    pub(crate) fn from_parts(
        platform: Arc<dyn Platform>,
        backend: Backend,
        current: Option<usize>,
    ) -> Self {
        Self {
            platform,
            backend,
            current: RwLock::new(current),
        }
    }

    /// The backend this runtime was built on.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// The one ambient read in the crate. Resolution is fresh on every call:
    /// the ordinal is loaded, validated against the platform, and turned into
    /// a handle that is used immediately and dropped.
    fn resolve_current(&self) -> Result<DeviceHandle> {
        let current = *self.current.read();
        let ordinal = current.ok_or(Error::NoCurrentDevice)?;
        self.platform.device_handle(ordinal)
    }

    fn current_device_handle(&self, op: &'static str) -> Result<DeviceHandle> {
        logged(op, self.resolve_current())
    }

    /// Resolves the current device, then runs one platform call against it.
    fn device_op<T>(
        &self,
        op: &'static str,
        call: impl FnOnce(&dyn Platform, DeviceHandle) -> Result<T>,
    ) -> Result<T> {
        let device = self.current_device_handle(op)?;
        logged(op, call(self.platform.as_ref(), device))
    }

    // --- device registry ---------------------------------------------------

    /// Number of visible devices.
    pub fn device_count(&self) -> Result<usize> {
        logged("device_count", self.platform.device_count())
    }

    /// The ambient current device ordinal.
    ///
    /// Fails with [`Error::NoCurrentDevice`] when nothing is set and no
    /// default exists, which only happens on a platform with zero devices.
    pub fn current_device(&self) -> Result<usize> {
        self.current_device_handle("current_device")
            .map(|device| device.ordinal())
    }

    /// Install `ordinal` as the ambient current device.
    ///
    /// The ordinal is validated first; on [`Error::InvalidDevice`] the
    /// ambient cell is left untouched.
    pub fn set_current_device(&self, ordinal: usize) -> Result<()> {
        logged("set_current_device", self.platform.device_handle(ordinal))?;
        *self.current.write() = Some(ordinal);
        Ok(())
    }

    /// Resolve an explicit ordinal to a live platform handle.
    pub fn device_handle(&self, ordinal: usize) -> Result<DeviceHandle> {
        logged("device_handle", self.platform.device_handle(ordinal))
    }

    // --- stream manager ----------------------------------------------------

    /// Create an in-order command queue on the current device.
    ///
    /// The stream is bound to that device for its whole life; moving the
    /// current device afterwards does not migrate it.
    pub fn create_stream(&self) -> Result<Stream> {
        self.device_op("create_stream", |platform, device| {
            platform.create_stream(device)
        })
    }

    /// Destroy a stream. Non-blocking: work already queued still completes
    /// before the underlying queue retires.
    ///
    /// Destruction resolves the *current* device and trusts it, without
    /// checking it against the stream's bound device. Callers that move the
    /// current device between create and destroy keep both halves working
    /// because backends treat the stream itself as authoritative, but the
    /// resolved handle is what gets validated here.
    pub fn destroy_stream(&self, stream: Stream) -> Result<()> {
        self.device_op("destroy_stream", |platform, device| {
            platform.destroy_stream(device, stream)
        })
    }

    /// Record a completion marker at the current tail of `stream`.
    pub fn record_event(&self, stream: &Stream) -> Result<Event> {
        logged("record_event", self.platform.record_event(stream))
    }

    /// Make `stream` wait for `event` before running anything submitted
    /// after this call. Enqueue-only: the calling thread never blocks.
    pub fn wait_event(&self, stream: &Stream, event: &Event) -> Result<()> {
        logged("wait_event", self.platform.wait_event(stream, event))
    }

    // --- memory operations -------------------------------------------------

    /// Blocking host to device copy of `src.len()` bytes on the current device.
    pub fn copy_host_to_device(&self, src: &[u8], dst: &DeviceRegion) -> Result<()> {
        self.device_op("copy_host_to_device", |platform, device| {
            platform.copy_host_to_device(device, src, dst)
        })
    }

    /// Blocking device to host copy of `dst.len()` bytes on the current device.
    pub fn copy_device_to_host(&self, src: &DeviceRegion, dst: &mut [u8]) -> Result<()> {
        self.device_op("copy_device_to_host", |platform, device| {
            platform.copy_device_to_host(device, src, dst)
        })
    }

    /// Blocking device to device copy of `count` bytes on the current device.
    pub fn copy_device_to_device(
        &self,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        self.device_op("copy_device_to_device", |platform, device| {
            platform.copy_device_to_device(device, src, dst, count)
        })
    }

    /// Blocking fill of `count` bytes on the current device.
    pub fn fill_u8(&self, dst: &DeviceRegion, value: u8, count: usize) -> Result<()> {
        self.device_op("fill_u8", |platform, device| {
            platform.fill_u8(device, dst, value, count)
        })
    }

    /// Blocking fill of `count` 32-bit words on the current device.
    pub fn fill_u32(&self, dst: &DeviceRegion, value: u32, count: usize) -> Result<()> {
        self.device_op("fill_u32", |platform, device| {
            platform.fill_u32(device, dst, value, count)
        })
    }

    /// Enqueue a host to device copy of `count` bytes on `stream`.
    ///
    /// Returns once the command is queued. The platform holds a reference to
    /// `src` until the command retires, so the staging memory stays alive
    /// even if the caller drops its own handle. No device resolution happens
    /// here or in any other `_async` operation; the stream's bound device is
    /// the execution site.
    pub fn copy_host_to_device_async(
        &self,
        src: &PinnedBuffer,
        dst: &DeviceRegion,
        count: usize,
        stream: &Stream,
    ) -> Result<()> {
        logged(
            "copy_host_to_device_async",
            self.platform.copy_host_to_device_async(stream, src, dst, count),
        )
    }

    /// Enqueue a device to host copy of `count` bytes on `stream`.
    pub fn copy_device_to_host_async(
        &self,
        src: &DeviceRegion,
        dst: &PinnedBuffer,
        count: usize,
        stream: &Stream,
    ) -> Result<()> {
        logged(
            "copy_device_to_host_async",
            self.platform.copy_device_to_host_async(stream, src, dst, count),
        )
    }

    /// Enqueue a device to device copy of `count` bytes on `stream`.
    pub fn copy_device_to_device_async(
        &self,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
        stream: &Stream,
    ) -> Result<()> {
        logged(
            "copy_device_to_device_async",
            self.platform
                .copy_device_to_device_async(stream, src, dst, count),
        )
    }

    /// Enqueue a fill of `count` bytes on `stream`.
    pub fn fill_u8_async(
        &self,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
        stream: &Stream,
    ) -> Result<()> {
        logged(
            "fill_u8_async",
            self.platform.fill_u8_async(stream, dst, value, count),
        )
    }

    /// Enqueue a fill of `count` 32-bit words on `stream`.
    pub fn fill_u32_async(
        &self,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
        stream: &Stream,
    ) -> Result<()> {
        logged(
            "fill_u32_async",
            self.platform.fill_u32_async(stream, dst, value, count),
        )
    }

    // --- synchronization ---------------------------------------------------

    /// Block until every stream bound to the current device has drained,
    /// including streams destroyed while work was still in flight.
    pub fn device_synchronize(&self) -> Result<()> {
        self.device_op("device_synchronize", |platform, device| {
            platform.synchronize_device(device)
        })
    }

    /// Block until everything submitted to `stream` before this call has
    /// completed. No device resolution.
    pub fn stream_synchronize(&self, stream: &Stream) -> Result<()> {
        logged("stream_synchronize", self.platform.synchronize_stream(stream))
    }

    // --- device allocator --------------------------------------------------

    /// Allocate `bytes` on the current device.
    ///
    /// Failure is signaled by absence, not by an error value: an unresolvable
    /// current device and a platform allocation fault both come back as
    /// `None`. Zero-byte requests return a valid empty region.
    pub fn allocate(&self, bytes: usize) -> Option<DeviceRegion> {
        let device = self.current_device_handle("allocate").ok()?;
        let region = self.platform.allocate(device, bytes);
        if region.is_none() {
            tracing::error!(
                op = "allocate",
                device = device.ordinal(),
                bytes,
                "device allocation failed"
            );
        }
        region
    }

    /// Return `region` to its device.
    ///
    /// Infallible from the caller's side. If the current device cannot be
    /// resolved the free is skipped with a trace note; platform-level
    /// failures are logged and swallowed. Debug builds assert that the
    /// resolved ordinal matches the region's recorded origin.
    pub fn free(&self, region: DeviceRegion) {
        let device = match self.resolve_current() {
            Ok(device) => device,
            Err(error) => {
                tracing::trace!(
                    error = error.name(),
                    device = region.device(),
                    bytes = region.len(),
                    "free skipped: current device is not resolvable"
                );
                return;
            }
        };
        debug_assert_eq!(
            device.ordinal(),
            region.device(),
            "region freed under a different current device"
        );
        let _ = logged("free", self.platform.free(device, region));
    }
}

impl fmt::Debug for Sluice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sluice")
            .field("backend", &self.backend)
            .field("platform", &self.platform.name())
            .field("current", &*self.current.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_runtime(devices: usize) -> Sluice {
        Sluice::builder()
            .backend(Backend::Host)
            .devices(devices)
            .build()
            .expect("host runtime should build")
    }

    #[test]
    fn device_zero_is_the_default_current() {
        let runtime = host_runtime(2);
        assert_eq!(runtime.current_device().expect("current"), 0);
    }

    #[test]
    fn rejected_ordinal_leaves_the_ambient_cell_alone() {
        let runtime = host_runtime(2);
        runtime.set_current_device(1).expect("valid ordinal");

        let err = runtime.set_current_device(2).unwrap_err();
        assert_eq!(err.name(), "INVALID_DEVICE");
        assert_eq!(runtime.current_device().expect("current"), 1);
    }

    #[test]
    fn streams_bind_to_the_device_current_at_creation() {
        let runtime = host_runtime(2);

        runtime.set_current_device(1).expect("select device 1");
        let on_one = runtime.create_stream().expect("stream");
        runtime.set_current_device(0).expect("select device 0");
        let on_zero = runtime.create_stream().expect("stream");

        assert_eq!(on_one.device(), 1);
        assert_eq!(on_zero.device(), 0);

        runtime.destroy_stream(on_one).expect("destroy");
        runtime.destroy_stream(on_zero).expect("destroy");
    }

    #[test]
    fn zero_device_platform_has_no_default() {
        let runtime = host_runtime(0);
        let err = runtime.current_device().unwrap_err();
        assert_eq!(err.name(), "NO_CURRENT_DEVICE");
        assert!(runtime.allocate(64).is_none());
    }

    #[test]
    fn free_without_a_current_device_is_skipped() {
        let runtime = host_runtime(0);
        // Forged region from nowhere; the skip path must not touch it.
        runtime.free(DeviceRegion::new(0, 0x40, 16));
    }
}
