//! The platform seam between the runtime and a concrete accelerator API.
//!
//! The runtime lives in device-ordinal terms; a [`Platform`] turns ordinals
//! into live handles and carries out the actual work. Everything above this
//! trait is backend-agnostic.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Runtime (ambient device, public operations) │
//! └──────────────────────┬──────────────────────┘
//!                        │ dyn Platform
//!         ┌──────────────┼──────────────┐
//!         ▼              ▼              ▼
//!   HostPlatform    CudaPlatform    (yours)
//!   (emulation)     (driver API)
//! ```
//!
//! Platforms never log the errors they return; the runtime logs each failure
//! once at the call site where it first appears, then propagates it unchanged.

use crate::error::Result;
use crate::memory::{DeviceRegion, PinnedBuffer};
use crate::stream::{Event, Stream};

/// A resolved reference to a live device.
///
/// Handles are produced by [`Platform::device_handle`] and consumed by
/// device-scoped operations in the same call sequence. They are cheap,
/// copyable tokens; holding one across calls defeats the per-call freshness
/// the runtime guarantees, so nothing in this workspace stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle {
    ordinal: usize,
}

impl DeviceHandle {
    /// Wrap an ordinal as a handle.
    ///
    /// Normally obtained from [`Platform::device_handle`], which validates
    /// the ordinal first. Platforms re-check bounds on use, so a forged
    /// handle is rejected, not trusted.
    #[must_use]
    pub fn new(ordinal: usize) -> Self {
        Self { ordinal }
    }

    /// The device ordinal this handle resolves.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

/// Backend contract for a device execution platform.
///
/// Device-scoped operations take a [`DeviceHandle`]; stream-scoped operations
/// take a [`Stream`] and perform no device resolution of their own, mirroring
/// the asymmetry in the public API. Implementations are shared-state objects
/// safe to call from any thread.
pub trait Platform: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Number of visible devices. Ordinals `0..count` are valid.
    fn device_count(&self) -> Result<usize>;

    /// Validate an ordinal and resolve it to a live handle.
    fn device_handle(&self, ordinal: usize) -> Result<DeviceHandle>;

    /// Create an in-order command queue bound to `device` for its whole life.
    fn create_stream(&self, device: DeviceHandle) -> Result<Stream>;

    /// Destroy a stream against `device`.
    ///
    /// Destruction is non-blocking; commands already queued still complete.
    /// The handle is taken on trust — implementations act on the stream's
    /// own binding and do not reconcile a mismatched `device`.
    fn destroy_stream(&self, device: DeviceHandle, stream: Stream) -> Result<()>;

    /// Record a marker at the current tail of `stream`'s command order.
    ///
    /// The returned event completes once everything submitted to the stream
    /// before this call has completed.
    fn record_event(&self, stream: &Stream) -> Result<Event>;

    /// Make all commands submitted to `stream` after this call wait for
    /// `event`. Never blocks the calling thread.
    fn wait_event(&self, stream: &Stream, event: &Event) -> Result<()>;

    /// Block until every stream bound to `device` has drained.
    fn synchronize_device(&self, device: DeviceHandle) -> Result<()>;

    /// Block until every command submitted to `stream` before this call has
    /// completed.
    fn synchronize_stream(&self, stream: &Stream) -> Result<()>;

    /// Blocking host-to-device copy of `src.len()` bytes.
    fn copy_host_to_device(
        &self,
        device: DeviceHandle,
        src: &[u8],
        dst: &DeviceRegion,
    ) -> Result<()>;

    /// Blocking device-to-host copy of `dst.len()` bytes.
    fn copy_device_to_host(
        &self,
        device: DeviceHandle,
        src: &DeviceRegion,
        dst: &mut [u8],
    ) -> Result<()>;

    /// Blocking device-to-device copy of `count` bytes.
    fn copy_device_to_device(
        &self,
        device: DeviceHandle,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()>;

    /// Blocking fill of `count` bytes with `value`.
    fn fill_u8(
        &self,
        device: DeviceHandle,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
    ) -> Result<()>;

    /// Blocking fill of `count` 32-bit words with `value`.
    fn fill_u32(
        &self,
        device: DeviceHandle,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
    ) -> Result<()>;

    /// Enqueue a host-to-device copy of `count` bytes on `stream`.
    ///
    /// The platform holds a reference to `src` until the command retires.
    fn copy_host_to_device_async(
        &self,
        stream: &Stream,
        src: &PinnedBuffer,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()>;

    /// Enqueue a device-to-host copy of `count` bytes on `stream`.
    ///
    /// The platform holds a reference to `dst` until the command retires;
    /// its contents are defined only after the stream is synchronized.
    fn copy_device_to_host_async(
        &self,
        stream: &Stream,
        src: &DeviceRegion,
        dst: &PinnedBuffer,
        count: usize,
    ) -> Result<()>;

    /// Enqueue a device-to-device copy of `count` bytes on `stream`.
    fn copy_device_to_device_async(
        &self,
        stream: &Stream,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()>;

    /// Enqueue a fill of `count` bytes with `value` on `stream`.
    fn fill_u8_async(
        &self,
        stream: &Stream,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
    ) -> Result<()>;

    /// Enqueue a fill of `count` 32-bit words with `value` on `stream`.
    fn fill_u32_async(
        &self,
        stream: &Stream,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
    ) -> Result<()>;

    /// Allocate `bytes` on `device`.
    ///
    /// Failure is the absence of a region, not an error code. Zero-byte
    /// requests return a valid empty region.
    fn allocate(&self, device: DeviceHandle, bytes: usize) -> Option<DeviceRegion>;

    /// Release a region against `device`.
    ///
    /// Like [`destroy_stream`](Platform::destroy_stream), the handle is
    /// taken on trust; implementations act on the region's own binding.
    fn free(&self, device: DeviceHandle, region: DeviceRegion) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips_ordinal() {
        let handle = DeviceHandle::new(3);
        assert_eq!(handle.ordinal(), 3);
        let copy = handle;
        assert_eq!(copy, handle);
    }
}
