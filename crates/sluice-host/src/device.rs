//! Emulated devices and their memory arenas.
//!
//! Each device owns a table of allocations keyed by an opaque id — the value
//! a [`DeviceRegion`] carries as its raw handle. Arenas are byte arrays of
//! relaxed atomics: stream workers and the calling thread may touch the same
//! arena concurrently (callers get whatever interleaving they asked for, as
//! on hardware), and atomics keep that memory-safe inside the emulation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use sluice_core::error::{Error, Result};
use sluice_core::DeviceRegion;

use crate::stream::StreamShared;

/// A single allocation on an emulated device.
pub(crate) struct HostAllocation {
    id: u64,
    bytes: Box<[AtomicU8]>,
}

impl HostAllocation {
    pub(crate) fn new(id: u64, len: usize) -> Self {
        let bytes = (0..len).map(|_| AtomicU8::new(0)).collect();
        Self { id, bytes }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Validate that a `count`-byte operation fits in the arena.
    pub(crate) fn check_span(&self, count: usize) -> Result<()> {
        if count > self.bytes.len() {
            return Err(Error::InvalidValue(format!(
                "count {} exceeds region of {} bytes",
                count,
                self.bytes.len()
            )));
        }
        Ok(())
    }

    /// Validate a `count`-word fill and return its byte length.
    pub(crate) fn check_words(&self, count: usize) -> Result<usize> {
        let byte_len = count
            .checked_mul(4)
            .ok_or_else(|| Error::InvalidValue(format!("word count {count} overflows")))?;
        self.check_span(byte_len)?;
        Ok(byte_len)
    }

    // The primitives below assume spans were validated; async commands are
    // checked at enqueue time so execution on the worker cannot fail.

    pub(crate) fn store_bytes(&self, src: &[u8]) {
        debug_assert!(src.len() <= self.bytes.len());
        for (slot, &byte) in self.bytes.iter().zip(src) {
            slot.store(byte, Ordering::Relaxed);
        }
    }

    pub(crate) fn load_bytes(&self, dst: &mut [u8]) {
        debug_assert!(dst.len() <= self.bytes.len());
        for (byte, slot) in dst.iter_mut().zip(self.bytes.iter()) {
            *byte = slot.load(Ordering::Relaxed);
        }
    }

    pub(crate) fn copy_bytes_to(&self, dst: &HostAllocation, count: usize) {
        debug_assert!(count <= self.bytes.len() && count <= dst.bytes.len());
        for i in 0..count {
            dst.bytes[i].store(self.bytes[i].load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    pub(crate) fn fill_bytes(&self, value: u8, count: usize) {
        debug_assert!(count <= self.bytes.len());
        for slot in &self.bytes[..count] {
            slot.store(value, Ordering::Relaxed);
        }
    }

    pub(crate) fn fill_words(&self, value: u32, count: usize) {
        let pattern: &[u8] = bytemuck::bytes_of(&value);
        debug_assert!(count * 4 <= self.bytes.len());
        for word in 0..count {
            for (offset, &byte) in pattern.iter().enumerate() {
                self.bytes[word * 4 + offset].store(byte, Ordering::Relaxed);
            }
        }
    }
}

/// One emulated device: an allocation table plus the registry of live
/// streams bound to it.
pub(crate) struct HostDevice {
    ordinal: usize,
    allocations: RwLock<HashMap<u64, Arc<HostAllocation>>>,
    next_allocation: AtomicU64,
    streams: Mutex<Vec<Weak<StreamShared>>>,
}

impl HostDevice {
    pub(crate) fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            allocations: RwLock::new(HashMap::new()),
            next_allocation: AtomicU64::new(1),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Carve out a fresh arena and hand back its region handle.
    ///
    /// Emulated allocation cannot fail short of host memory exhaustion, so
    /// the failure path of the public allocator is exercised by device
    /// resolution, not by this call.
    pub(crate) fn allocate(&self, bytes: usize) -> DeviceRegion {
        let id = self.next_allocation.fetch_add(1, Ordering::Relaxed);
        let allocation = Arc::new(HostAllocation::new(id, bytes));
        self.allocations.write().insert(id, allocation);
        tracing::trace!(device = self.ordinal, id, bytes, "allocated region");
        DeviceRegion::new(self.ordinal, id, bytes)
    }

    /// Drop an arena from the table.
    ///
    /// Commands still in flight hold their own references, so the memory
    /// outlives the table entry until they retire.
    pub(crate) fn release(&self, raw: u64) -> Result<()> {
        match self.allocations.write().remove(&raw) {
            Some(allocation) => {
                tracing::trace!(
                    device = self.ordinal,
                    id = allocation.id(),
                    bytes = allocation.len(),
                    "released region"
                );
                Ok(())
            }
            None => Err(Error::InvalidValue(format!(
                "region {raw:#x} is not live on device {}",
                self.ordinal
            ))),
        }
    }

    /// Look a region handle up in this device's table.
    pub(crate) fn resolve(&self, region: &DeviceRegion) -> Result<Arc<HostAllocation>> {
        self.allocations
            .read()
            .get(&region.raw())
            .cloned()
            .ok_or_else(|| {
                Error::InvalidValue(format!(
                    "region {:#x} is not live on device {}",
                    region.raw(),
                    self.ordinal
                ))
            })
    }

    pub(crate) fn register_stream(&self, stream: Weak<StreamShared>) {
        self.streams.lock().push(stream);
    }

    /// Block until every live stream bound to this device has drained.
    ///
    /// Streams already destroyed but still retiring work are kept alive by
    /// their workers and are waited on like any other.
    pub(crate) fn synchronize(&self) {
        let live: Vec<Arc<StreamShared>> = {
            let mut streams = self.streams.lock();
            streams.retain(|weak| weak.strong_count() > 0);
            streams.iter().filter_map(Weak::upgrade).collect()
        };
        for stream in live {
            stream.wait_idle();
        }
    }

    #[cfg(test)]
    pub(crate) fn live_allocations(&self) -> usize {
        self.allocations.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_stores_and_loads() {
        let arena = HostAllocation::new(1, 8);
        arena.store_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut out = [0u8; 8];
        arena.load_bytes(&mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn arena_copies_between_allocations() {
        let src = HostAllocation::new(1, 4);
        let dst = HostAllocation::new(2, 4);
        src.store_bytes(&[9, 8, 7, 6]);
        src.copy_bytes_to(&dst, 3);
        let mut out = [0u8; 4];
        dst.load_bytes(&mut out);
        assert_eq!(out, [9, 8, 7, 0]);
    }

    #[test]
    fn fill_words_matches_native_layout() {
        let arena = HostAllocation::new(1, 8);
        arena.fill_words(0xAABB_CCDD, 2);
        let mut out = [0u8; 8];
        arena.load_bytes(&mut out);
        let expected = 0xAABB_CCDDu32.to_ne_bytes();
        assert_eq!(&out[..4], &expected);
        assert_eq!(&out[4..], &expected);
    }

    #[test]
    fn partial_fill_leaves_tail_untouched() {
        let arena = HostAllocation::new(1, 4);
        arena.store_bytes(&[1, 1, 1, 1]);
        arena.fill_bytes(7, 2);
        let mut out = [0u8; 4];
        arena.load_bytes(&mut out);
        assert_eq!(out, [7, 7, 1, 1]);
    }

    #[test]
    fn span_checks_reject_overruns() {
        let arena = HostAllocation::new(1, 4);
        assert!(arena.check_span(4).is_ok());
        let err = arena.check_span(5).unwrap_err();
        assert_eq!(err.name(), "INVALID_VALUE");

        assert_eq!(arena.check_words(1).unwrap(), 4);
        assert!(arena.check_words(2).is_err());
        assert!(arena.check_words(usize::MAX / 2).is_err());
    }

    #[test]
    fn zero_length_arena_accepts_empty_operations() {
        let arena = HostAllocation::new(1, 0);
        assert!(arena.check_span(0).is_ok());
        arena.store_bytes(&[]);
        arena.fill_bytes(3, 0);
    }

    #[test]
    fn device_allocation_lifecycle() {
        let device = HostDevice::new(0);
        let region = device.allocate(16);
        assert_eq!(region.device(), 0);
        assert_eq!(region.len(), 16);
        assert_eq!(device.live_allocations(), 1);

        let arena = device.resolve(&region).expect("region should be live");
        assert_eq!(arena.len(), 16);

        device.release(region.raw()).expect("release should succeed");
        assert_eq!(device.live_allocations(), 0);
        assert!(device.resolve(&region).is_err());
        assert!(device.release(region.raw()).is_err());
    }

    #[test]
    fn allocation_ids_are_unique() {
        let device = HostDevice::new(0);
        let a = device.allocate(4);
        let b = device.allocate(4);
        assert_ne!(a.raw(), b.raw());
    }
}
