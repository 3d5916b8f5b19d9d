//! # Sluice CUDA
//!
//! CUDA driver platform for the Sluice device runtime, built on `cudarc`.
//!
//! One retained context per visible device, streams through the driver's
//! stream objects, events through raw driver event handles, and memory
//! through raw device pointers tracked in a per-device table. The driver
//! library is loaded dynamically at runtime, so this crate compiles on
//! machines with no CUDA toolkit installed; its hardware tests are ignored
//! unless devices are present.
//!
//! Two deliberate deviations from the host emulation backend:
//!
//! - Transfers with a host endpoint drain the stream and then use the
//!   synchronous driver calls, even on the `_async` entry points. The drain
//!   keeps the stream's submission order intact (everything enqueued earlier
//!   retires before the copy runs, and the copy retires before anything
//!   enqueued later), and completing ahead of the synchronize point is
//!   allowed by the runtime contract. It also keeps staging memory sound
//!   without retaining buffer references inside the driver. Device-to-device
//!   copies and fills are genuinely asynchronous.
//! - Counts are passed through to the driver unchecked. The host emulation
//!   validates them because it backs regions with real host memory; here the
//!   driver is the authority.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cudarc::driver::result as cuda_result;
use cudarc::driver::sys as cuda_sys;
use cudarc::driver::{CudaContext, CudaStream};
use parking_lot::Mutex;

use sluice_core::error::{Error, Result};
use sluice_core::{DeviceHandle, DeviceRegion, Event, PinnedBuffer, Platform, Stream};

mod event;

use event::RawEvent;

/// Backend state carried inside a `Stream` handle.
struct CudaStreamState {
    stream: Arc<CudaStream>,
}

/// One visible device: its retained context plus the live allocation table.
struct CudaOrdinal {
    context: Arc<CudaContext>,
    allocations: Mutex<HashMap<u64, usize>>,
}

/// CUDA driver implementation of the platform contract.
pub struct CudaPlatform {
    ordinals: Vec<CudaOrdinal>,
    next_stream: AtomicU64,
    next_event: AtomicU64,
}

/// True when the driver loads and reports at least one device.
#[must_use]
pub fn driver_available() -> bool {
    CudaContext::device_count()
        .map(|count| count as usize > 0)
        .unwrap_or(false)
}

impl CudaPlatform {
    /// Retain a context on every visible device.
    ///
    /// Fails with [`Error::RuntimeUnavailable`] when the driver cannot be
    /// loaded or no device is visible, which is what lets `Backend::Auto`
    /// fall back cleanly.
    pub fn new() -> Result<Self> {
        let count = CudaContext::device_count()
            .map_err(|e| Error::RuntimeUnavailable(format!("cuda driver unavailable: {e}")))?
            as usize;
        if count == 0 {
            return Err(Error::RuntimeUnavailable("no cuda devices visible".into()));
        }

        let mut ordinals = Vec::with_capacity(count);
        for ordinal in 0..count {
            let context = CudaContext::new(ordinal).map_err(|e| {
                Error::RuntimeUnavailable(format!("cuda device {ordinal} failed to open: {e}"))
            })?;
            ordinals.push(CudaOrdinal {
                context,
                allocations: Mutex::new(HashMap::new()),
            });
        }

        tracing::info!(devices = count, "cuda platform initialized");
        Ok(Self {
            ordinals,
            next_stream: AtomicU64::new(1),
            next_event: AtomicU64::new(1),
        })
    }

    fn ordinal(&self, handle: DeviceHandle) -> Result<&CudaOrdinal> {
        self.ordinals
            .get(handle.ordinal())
            .ok_or(Error::InvalidDevice {
                ordinal: handle.ordinal(),
                count: self.ordinals.len(),
            })
    }

    fn ordinal_at(&self, index: usize) -> Result<&CudaOrdinal> {
        self.ordinals.get(index).ok_or(Error::InvalidDevice {
            ordinal: index,
            count: self.ordinals.len(),
        })
    }

    fn state<'a>(&self, stream: &'a Stream) -> Result<&'a CudaStreamState> {
        stream
            .state::<CudaStreamState>()
            .ok_or_else(|| Error::InvalidValue("stream does not belong to the cuda platform".into()))
    }

    fn event_state(&self, event: &Event) -> Result<Arc<RawEvent>> {
        event
            .state::<RawEvent>()
            .ok_or_else(|| Error::InvalidValue("event does not belong to the cuda platform".into()))
    }

    /// Raw driver calls use the thread's current context; bind the region's
    /// owning context before touching its memory.
    fn bind_region(&self, region: &DeviceRegion) -> Result<()> {
        let ordinal = self.ordinal_at(region.device())?;
        if !ordinal.allocations.lock().contains_key(&region.raw()) {
            return Err(Error::InvalidValue(format!(
                "region {:#x} is not live on device {}",
                region.raw(),
                region.device()
            )));
        }
        ordinal
            .context
            .bind_to_thread()
            .map_err(|e| Error::RuntimeUnavailable(format!("context bind failed: {e}")))
    }
}

impl Platform for CudaPlatform {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn device_count(&self) -> Result<usize> {
        Ok(self.ordinals.len())
    }

    fn device_handle(&self, ordinal: usize) -> Result<DeviceHandle> {
        if ordinal < self.ordinals.len() {
            Ok(DeviceHandle::new(ordinal))
        } else {
            Err(Error::InvalidDevice {
                ordinal,
                count: self.ordinals.len(),
            })
        }
    }

    fn create_stream(&self, device: DeviceHandle) -> Result<Stream> {
        let ordinal = self.ordinal(device)?;
        let stream = ordinal
            .context
            .new_stream()
            .map_err(|e| Error::StreamCreationFailed(format!("cuda stream failed: {e}")))?;
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(device = device.ordinal(), stream = id, "stream created");
        Ok(Stream::new(
            device.ordinal(),
            id,
            Box::new(CudaStreamState { stream }),
        ))
    }

    fn destroy_stream(&self, device: DeviceHandle, stream: Stream) -> Result<()> {
        self.ordinal(device)?;
        if device.ordinal() != stream.device() {
            tracing::trace!(
                resolved = device.ordinal(),
                bound = stream.device(),
                stream = stream.id(),
                "destroying stream under a different current device"
            );
        }
        match stream.into_state::<CudaStreamState>() {
            Ok(state) => {
                // Driver semantics: queued work completes before the handle
                // is released.
                drop(state);
                Ok(())
            }
            Err(_) => Err(Error::InvalidValue(
                "stream does not belong to the cuda platform".into(),
            )),
        }
    }

    fn record_event(&self, stream: &Stream) -> Result<Event> {
        let state = self.state(stream)?;
        let raw = RawEvent::create()?;
        raw.record(state.stream.cu_stream())?;
        let id = self.next_event.fetch_add(1, Ordering::Relaxed);
        Ok(Event::new(stream.device(), id, Arc::new(raw)))
    }

    fn wait_event(&self, stream: &Stream, event: &Event) -> Result<()> {
        let state = self.state(stream)?;
        let raw = self.event_state(event)?;
        raw.wait(state.stream.cu_stream())
    }

    fn synchronize_device(&self, device: DeviceHandle) -> Result<()> {
        self.ordinal(device)?
            .context
            .synchronize()
            .map_err(|e| Error::SyncFailed(format!("device synchronize failed: {e}")))
    }

    fn synchronize_stream(&self, stream: &Stream) -> Result<()> {
        self.state(stream)?
            .stream
            .synchronize()
            .map_err(|e| Error::SyncFailed(format!("stream synchronize failed: {e}")))
    }

    fn copy_host_to_device(
        &self,
        device: DeviceHandle,
        src: &[u8],
        dst: &DeviceRegion,
    ) -> Result<()> {
        self.ordinal(device)?;
        if src.is_empty() {
            return Ok(());
        }
        self.bind_region(dst)?;
        unsafe { cuda_result::memcpy_htod_sync(dst.raw(), src) }
            .map_err(|e| Error::TransferFailed(format!("host to device copy failed: {e}")))
    }

    fn copy_device_to_host(
        &self,
        device: DeviceHandle,
        src: &DeviceRegion,
        dst: &mut [u8],
    ) -> Result<()> {
        self.ordinal(device)?;
        if dst.is_empty() {
            return Ok(());
        }
        self.bind_region(src)?;
        unsafe { cuda_result::memcpy_dtoh_sync(dst, src.raw()) }
            .map_err(|e| Error::TransferFailed(format!("device to host copy failed: {e}")))
    }

    fn copy_device_to_device(
        &self,
        device: DeviceHandle,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        self.ordinal(device)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(src)?;
        self.bind_region(dst)?;
        unsafe { cuda_result::memcpy_dtod_sync(dst.raw(), src.raw(), count) }
            .map_err(|e| Error::TransferFailed(format!("device to device copy failed: {e}")))
    }

    fn fill_u8(
        &self,
        device: DeviceHandle,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
    ) -> Result<()> {
        self.ordinal(device)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(dst)?;
        let result = unsafe { cuda_sys::cuMemsetD8_v2(dst.raw(), value, count) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(Error::TransferFailed(format!(
                "cuMemsetD8_v2 failed: {result:?}"
            )));
        }
        Ok(())
    }

    fn fill_u32(
        &self,
        device: DeviceHandle,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
    ) -> Result<()> {
        self.ordinal(device)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(dst)?;
        let result = unsafe { cuda_sys::cuMemsetD32_v2(dst.raw(), value, count) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(Error::TransferFailed(format!(
                "cuMemsetD32_v2 failed: {result:?}"
            )));
        }
        Ok(())
    }

    fn copy_host_to_device_async(
        &self,
        stream: &Stream,
        src: &PinnedBuffer,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        let state = self.state(stream)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(dst)?;
        // The synchronous copy runs on the null stream; drain this stream
        // first so the copy lands in its submission-order slot.
        state
            .stream
            .synchronize()
            .map_err(|e| Error::SyncFailed(format!("stream drain before copy failed: {e}")))?;
        let bytes = src.bytes();
        unsafe { cuda_result::memcpy_htod_sync(dst.raw(), &bytes[..count]) }
            .map_err(|e| Error::TransferFailed(format!("host to device copy failed: {e}")))
    }

    fn copy_device_to_host_async(
        &self,
        stream: &Stream,
        src: &DeviceRegion,
        dst: &PinnedBuffer,
        count: usize,
    ) -> Result<()> {
        let state = self.state(stream)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(src)?;
        // Same as the upload path: the drain keeps FIFO order against
        // commands already enqueued on this stream.
        state
            .stream
            .synchronize()
            .map_err(|e| Error::SyncFailed(format!("stream drain before copy failed: {e}")))?;
        let mut bytes = dst.bytes_mut();
        unsafe { cuda_result::memcpy_dtoh_sync(&mut bytes[..count], src.raw()) }
            .map_err(|e| Error::TransferFailed(format!("device to host copy failed: {e}")))
    }

    fn copy_device_to_device_async(
        &self,
        stream: &Stream,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        let state = self.state(stream)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(src)?;
        self.bind_region(dst)?;
        unsafe {
            cuda_result::memcpy_dtod_async(dst.raw(), src.raw(), count, state.stream.cu_stream())
        }
        .map_err(|e| Error::TransferFailed(format!("device to device copy failed: {e}")))
    }

    fn fill_u8_async(
        &self,
        stream: &Stream,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
    ) -> Result<()> {
        let state = self.state(stream)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(dst)?;
        let result =
            unsafe { cuda_sys::cuMemsetD8Async(dst.raw(), value, count, state.stream.cu_stream()) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(Error::TransferFailed(format!(
                "cuMemsetD8Async failed: {result:?}"
            )));
        }
        Ok(())
    }

    fn fill_u32_async(
        &self,
        stream: &Stream,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
    ) -> Result<()> {
        let state = self.state(stream)?;
        if count == 0 {
            return Ok(());
        }
        self.bind_region(dst)?;
        let result = unsafe {
            cuda_sys::cuMemsetD32Async(dst.raw(), value, count, state.stream.cu_stream())
        };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(Error::TransferFailed(format!(
                "cuMemsetD32Async failed: {result:?}"
            )));
        }
        Ok(())
    }

    fn allocate(&self, device: DeviceHandle, bytes: usize) -> Option<DeviceRegion> {
        let ordinal = self.ordinal(device).ok()?;
        ordinal.context.bind_to_thread().ok()?;

        // The driver rejects zero-byte requests; back empty regions with one
        // byte so they stay valid, distinct handles.
        let backing = bytes.max(1);
        let raw = unsafe { cuda_result::malloc_sync(backing) }.ok()?;
        ordinal.allocations.lock().insert(raw, bytes);
        tracing::trace!(device = device.ordinal(), raw = format_args!("{raw:#x}"), bytes, "region allocated");
        Some(DeviceRegion::new(device.ordinal(), raw, bytes))
    }

    fn free(&self, device: DeviceHandle, region: DeviceRegion) -> Result<()> {
        self.ordinal(device)?;
        if device.ordinal() != region.device() {
            tracing::trace!(
                resolved = device.ordinal(),
                bound = region.device(),
                "freeing region under a different current device"
            );
        }
        let ordinal = self.ordinal_at(region.device())?;
        // Bind before touching the table: a failed bind must leave the
        // region live so a later free can still reach the driver pointer.
        ordinal
            .context
            .bind_to_thread()
            .map_err(|e| Error::RuntimeUnavailable(format!("context bind failed: {e}")))?;
        if ordinal.allocations.lock().remove(&region.raw()).is_none() {
            return Err(Error::InvalidValue(format!(
                "region {:#x} is not live on device {}",
                region.raw(),
                region.device()
            )));
        }
        unsafe { cuda_result::free_sync(region.raw()) }
            .map_err(|e| Error::InvalidValue(format!("device free failed: {e}")))
    }
}
