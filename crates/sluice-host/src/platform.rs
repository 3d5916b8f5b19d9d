//! The host emulation platform.
//!
//! Implements the full platform contract in host memory: devices are
//! allocation tables, streams are worker threads, and transfers move bytes
//! between arenas and caller memory. Semantics match a hardware backend —
//! FIFO streams, stream-scoped async ops, blocking sync ops — which is what
//! makes the runtime's behavior testable on any machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sluice_core::error::{Error, Result};
use sluice_core::{DeviceHandle, DeviceRegion, Event, PinnedBuffer, Platform, Stream};

use crate::device::{HostAllocation, HostDevice};
use crate::stream::{Command, EventState, HostStreamState, StreamShared};

/// A set of emulated devices living in host memory.
///
/// The device count is fixed at construction; ordinals `0..count` stay valid
/// for the platform's whole life.
pub struct HostPlatform {
    devices: Vec<HostDevice>,
    next_stream: AtomicU64,
    next_event: AtomicU64,
}

impl HostPlatform {
    /// Build a platform with `device_count` emulated devices.
    #[must_use]
    pub fn new(device_count: usize) -> Self {
        tracing::info!(devices = device_count, "host platform initialized");
        Self {
            devices: (0..device_count).map(HostDevice::new).collect(),
            next_stream: AtomicU64::new(1),
            next_event: AtomicU64::new(1),
        }
    }

    fn device(&self, handle: DeviceHandle) -> Result<&HostDevice> {
        self.devices
            .get(handle.ordinal())
            .ok_or(Error::InvalidDevice {
                ordinal: handle.ordinal(),
                count: self.devices.len(),
            })
    }

    fn device_at(&self, ordinal: usize) -> Result<&HostDevice> {
        self.devices.get(ordinal).ok_or(Error::InvalidDevice {
            ordinal,
            count: self.devices.len(),
        })
    }

    fn shared<'a>(&self, stream: &'a Stream) -> Result<&'a Arc<StreamShared>> {
        stream
            .state::<HostStreamState>()
            .map(|state| &state.shared)
            .ok_or_else(|| Error::InvalidValue("stream does not belong to the host platform".into()))
    }

    fn event_state(&self, event: &Event) -> Result<Arc<EventState>> {
        event
            .state::<EventState>()
            .ok_or_else(|| Error::InvalidValue("event does not belong to the host platform".into()))
    }

    /// Regions are routed by their own binding: the arena lives in the table
    /// of the device the region was allocated on, whatever device handle the
    /// surrounding call was resolved against.
    fn resolve_region(&self, region: &DeviceRegion) -> Result<Arc<HostAllocation>> {
        self.device_at(region.device())?.resolve(region)
    }

    fn check_pinned(buffer: &PinnedBuffer, count: usize) -> Result<()> {
        if count > buffer.len() {
            return Err(Error::InvalidValue(format!(
                "count {} exceeds pinned buffer of {} bytes",
                count,
                buffer.len()
            )));
        }
        Ok(())
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Platform for HostPlatform {
    fn name(&self) -> &'static str {
        "host"
    }

    fn device_count(&self) -> Result<usize> {
        Ok(self.devices.len())
    }

    fn device_handle(&self, ordinal: usize) -> Result<DeviceHandle> {
        if ordinal < self.devices.len() {
            Ok(DeviceHandle::new(ordinal))
        } else {
            Err(Error::InvalidDevice {
                ordinal,
                count: self.devices.len(),
            })
        }
    }

    fn create_stream(&self, device: DeviceHandle) -> Result<Stream> {
        let device = self.device(device)?;
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let shared = StreamShared::spawn(device.ordinal(), id)?;
        device.register_stream(Arc::downgrade(&shared));
        tracing::debug!(device = device.ordinal(), stream = id, "stream created");
        Ok(Stream::new(
            device.ordinal(),
            id,
            Box::new(HostStreamState { shared }),
        ))
    }

    fn destroy_stream(&self, device: DeviceHandle, stream: Stream) -> Result<()> {
        self.device(device)?;
        if device.ordinal() != stream.device() {
            tracing::trace!(
                resolved = device.ordinal(),
                bound = stream.device(),
                stream = stream.id(),
                "destroying stream under a different current device"
            );
        }
        match stream.into_state::<HostStreamState>() {
            Ok(state) => {
                tracing::debug!(
                    device = state.shared.device(),
                    stream = state.shared.id(),
                    "stream destroyed"
                );
                drop(state);
                Ok(())
            }
            Err(_) => Err(Error::InvalidValue(
                "stream does not belong to the host platform".into(),
            )),
        }
    }

    fn record_event(&self, stream: &Stream) -> Result<Event> {
        let shared = self.shared(stream)?;
        let id = self.next_event.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(EventState::new());
        shared.enqueue(Command::RecordEvent(Arc::clone(&state)));
        Ok(Event::new(stream.device(), id, state))
    }

    fn wait_event(&self, stream: &Stream, event: &Event) -> Result<()> {
        let shared = self.shared(stream)?;
        let state = self.event_state(event)?;
        shared.enqueue(Command::WaitEvent(state));
        Ok(())
    }

    fn synchronize_device(&self, device: DeviceHandle) -> Result<()> {
        self.device(device)?.synchronize();
        Ok(())
    }

    fn synchronize_stream(&self, stream: &Stream) -> Result<()> {
        self.shared(stream)?.synchronize();
        Ok(())
    }

    fn copy_host_to_device(
        &self,
        device: DeviceHandle,
        src: &[u8],
        dst: &DeviceRegion,
    ) -> Result<()> {
        self.device(device)?;
        let allocation = self.resolve_region(dst)?;
        allocation.check_span(src.len())?;
        allocation.store_bytes(src);
        Ok(())
    }

    fn copy_device_to_host(
        &self,
        device: DeviceHandle,
        src: &DeviceRegion,
        dst: &mut [u8],
    ) -> Result<()> {
        self.device(device)?;
        let allocation = self.resolve_region(src)?;
        allocation.check_span(dst.len())?;
        allocation.load_bytes(dst);
        Ok(())
    }

    fn copy_device_to_device(
        &self,
        device: DeviceHandle,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        self.device(device)?;
        let src = self.resolve_region(src)?;
        let dst = self.resolve_region(dst)?;
        src.check_span(count)?;
        dst.check_span(count)?;
        src.copy_bytes_to(&dst, count);
        Ok(())
    }

    fn fill_u8(
        &self,
        device: DeviceHandle,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
    ) -> Result<()> {
        self.device(device)?;
        let allocation = self.resolve_region(dst)?;
        allocation.check_span(count)?;
        allocation.fill_bytes(value, count);
        Ok(())
    }

    fn fill_u32(
        &self,
        device: DeviceHandle,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
    ) -> Result<()> {
        self.device(device)?;
        let allocation = self.resolve_region(dst)?;
        allocation.check_words(count)?;
        allocation.fill_words(value, count);
        Ok(())
    }

    fn copy_host_to_device_async(
        &self,
        stream: &Stream,
        src: &PinnedBuffer,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        let shared = self.shared(stream)?;
        let allocation = self.resolve_region(dst)?;
        allocation.check_span(count)?;
        Self::check_pinned(src, count)?;
        shared.enqueue(Command::HostToDevice {
            src: src.clone(),
            dst: allocation,
            count,
        });
        Ok(())
    }

    fn copy_device_to_host_async(
        &self,
        stream: &Stream,
        src: &DeviceRegion,
        dst: &PinnedBuffer,
        count: usize,
    ) -> Result<()> {
        let shared = self.shared(stream)?;
        let allocation = self.resolve_region(src)?;
        allocation.check_span(count)?;
        Self::check_pinned(dst, count)?;
        shared.enqueue(Command::DeviceToHost {
            src: allocation,
            dst: dst.clone(),
            count,
        });
        Ok(())
    }

    fn copy_device_to_device_async(
        &self,
        stream: &Stream,
        src: &DeviceRegion,
        dst: &DeviceRegion,
        count: usize,
    ) -> Result<()> {
        let shared = self.shared(stream)?;
        let src = self.resolve_region(src)?;
        let dst = self.resolve_region(dst)?;
        src.check_span(count)?;
        dst.check_span(count)?;
        shared.enqueue(Command::DeviceToDevice { src, dst, count });
        Ok(())
    }

    fn fill_u8_async(
        &self,
        stream: &Stream,
        dst: &DeviceRegion,
        value: u8,
        count: usize,
    ) -> Result<()> {
        let shared = self.shared(stream)?;
        let allocation = self.resolve_region(dst)?;
        allocation.check_span(count)?;
        shared.enqueue(Command::FillU8 {
            dst: allocation,
            value,
            count,
        });
        Ok(())
    }

    fn fill_u32_async(
        &self,
        stream: &Stream,
        dst: &DeviceRegion,
        value: u32,
        count: usize,
    ) -> Result<()> {
        let shared = self.shared(stream)?;
        let allocation = self.resolve_region(dst)?;
        allocation.check_words(count)?;
        shared.enqueue(Command::FillU32 {
            dst: allocation,
            value,
            count,
        });
        Ok(())
    }

    fn allocate(&self, device: DeviceHandle, bytes: usize) -> Option<DeviceRegion> {
        let device = self.device(device).ok()?;
        Some(device.allocate(bytes))
    }

    fn free(&self, device: DeviceHandle, region: DeviceRegion) -> Result<()> {
        self.device(device)?;
        if device.ordinal() != region.device() {
            tracing::trace!(
                resolved = device.ordinal(),
                bound = region.device(),
                "freeing region under a different current device"
            );
        }
        self.device_at(region.device())?.release(region.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(platform: &HostPlatform, ordinal: usize) -> DeviceHandle {
        platform
            .device_handle(ordinal)
            .expect("ordinal should be valid")
    }

    #[test]
    fn device_handles_validate_ordinals() {
        let platform = HostPlatform::new(2);
        assert_eq!(platform.device_count().unwrap(), 2);
        assert!(platform.device_handle(1).is_ok());
        let err = platform.device_handle(2).unwrap_err();
        assert_eq!(err.name(), "INVALID_DEVICE");
    }

    #[test]
    fn sync_copy_round_trip() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 16).expect("allocate");

        let payload: Vec<u8> = (0..16).collect();
        platform
            .copy_host_to_device(device, &payload, &region)
            .expect("upload");

        let mut readback = vec![0u8; 16];
        platform
            .copy_device_to_host(device, &region, &mut readback)
            .expect("download");
        assert_eq!(readback, payload);

        platform.free(device, region).expect("free");
    }

    #[test]
    fn device_to_device_copy() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let a = platform.allocate(device, 8).expect("allocate");
        let b = platform.allocate(device, 8).expect("allocate");

        platform.fill_u8(device, &a, 0x42, 8).expect("fill");
        platform
            .copy_device_to_device(device, &a, &b, 8)
            .expect("copy");

        let mut readback = vec![0u8; 8];
        platform
            .copy_device_to_host(device, &b, &mut readback)
            .expect("download");
        assert_eq!(readback, vec![0x42; 8]);
    }

    #[test]
    fn word_fill_then_byte_fill_overlay() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 8).expect("allocate");

        platform
            .fill_u32(device, &region, u32::from_ne_bytes([0xCC; 4]), 2)
            .expect("word fill");
        platform.fill_u8(device, &region, 0x01, 3).expect("byte fill");

        let mut readback = vec![0u8; 8];
        platform
            .copy_device_to_host(device, &region, &mut readback)
            .expect("download");
        assert_eq!(&readback[..3], &[0x01; 3]);
        assert_eq!(&readback[3..], &[0xCC; 5]);
    }

    #[test]
    fn counts_are_validated_against_regions() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 4).expect("allocate");

        let err = platform
            .copy_host_to_device(device, &[0u8; 8], &region)
            .unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");

        let err = platform.fill_u32(device, &region, 0, 2).unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");
    }

    #[test]
    fn async_pipeline_round_trip() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 32).expect("allocate");
        let stream = platform.create_stream(device).expect("stream");

        let staged: Vec<u8> = (0..32).map(|i| i as u8 ^ 0x5A).collect();
        let upload = PinnedBuffer::from_slice(&staged);
        let download = PinnedBuffer::new(32);

        platform
            .copy_host_to_device_async(&stream, &upload, &region, 32)
            .expect("enqueue upload");
        platform
            .copy_device_to_host_async(&stream, &region, &download, 32)
            .expect("enqueue download");
        platform.synchronize_stream(&stream).expect("drain");

        assert_eq!(download.to_vec(), staged);
        platform.destroy_stream(device, stream).expect("destroy");
    }

    #[test]
    fn events_order_work_across_streams() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 64).expect("allocate");
        let producer = platform.create_stream(device).expect("producer");
        let consumer = platform.create_stream(device).expect("consumer");

        platform
            .fill_u8_async(&producer, &region, 0xAA, 64)
            .expect("producer fill");
        let marker = platform.record_event(&producer).expect("record");
        platform.wait_event(&consumer, &marker).expect("wait");
        platform
            .fill_u8_async(&consumer, &region, 0xBB, 16)
            .expect("consumer fill");

        platform.synchronize_device(device).expect("device sync");

        let mut readback = vec![0u8; 64];
        platform
            .copy_device_to_host(device, &region, &mut readback)
            .expect("download");
        assert_eq!(&readback[..16], &[0xBB; 16]);
        assert_eq!(&readback[16..], &[0xAA; 48]);

        platform.destroy_stream(device, producer).expect("destroy");
        platform.destroy_stream(device, consumer).expect("destroy");
    }

    #[test]
    fn destroyed_stream_still_retires_its_backlog() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 16).expect("allocate");
        let stream = platform.create_stream(device).expect("stream");

        platform
            .fill_u8_async(&stream, &region, 0x77, 16)
            .expect("enqueue");
        platform.destroy_stream(device, stream).expect("destroy");
        platform.synchronize_device(device).expect("device sync");

        let mut readback = vec![0u8; 16];
        platform
            .copy_device_to_host(device, &region, &mut readback)
            .expect("download");
        assert_eq!(readback, vec![0x77; 16]);
    }

    #[test]
    fn foreign_stream_state_is_rejected() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let foreign = Stream::new(0, 99, Box::new("not a host stream"));

        let err = platform.synchronize_stream(&foreign).unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");
        let err = platform.destroy_stream(device, foreign).unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");
    }

    #[test]
    fn zero_byte_allocations_are_valid_regions() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);

        let first = platform.allocate(device, 0).expect("first");
        let second = platform.allocate(device, 0).expect("second");
        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_ne!(first.raw(), second.raw());

        platform.free(device, first).expect("free first");
        platform.free(device, second).expect("free second");
    }

    #[test]
    fn freeing_a_dead_region_is_reported() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let forged = DeviceRegion::new(0, 0xDEAD, 4);
        let err = platform.free(device, forged).unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");
    }

    #[test]
    fn pinned_buffer_shorter_than_count_is_rejected() {
        let platform = HostPlatform::new(1);
        let device = handle(&platform, 0);
        let region = platform.allocate(device, 32).expect("allocate");
        let stream = platform.create_stream(device).expect("stream");

        let short = PinnedBuffer::new(8);
        let err = platform
            .copy_host_to_device_async(&stream, &short, &region, 16)
            .unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");

        platform.destroy_stream(device, stream).expect("destroy");
    }
}
