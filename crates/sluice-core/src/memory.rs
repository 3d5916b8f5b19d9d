//! Device regions and pinned host staging buffers.
//!
//! [`DeviceRegion`] is the handle side of the allocator contract: an opaque,
//! exclusively-owned span of device memory that remembers which device it
//! came from. [`PinnedBuffer`] is the host side of asynchronous transfers:
//! shared host memory that stays alive and addressable for as long as any
//! in-flight command still refers to it.

use std::fmt;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// An owned span of device memory.
///
/// Produced by `allocate`, consumed by `free`; because the handle is not
/// cloneable, use-after-free is a move error rather than a runtime fault.
/// The region records the ordinal it was allocated on so that a free issued
/// under a different ambient device can be caught in debug builds.
pub struct DeviceRegion {
    device: usize,
    raw: u64,
    len: usize,
}

impl DeviceRegion {
    /// Assemble a region handle. Called by platforms.
    #[must_use]
    pub fn new(device: usize, raw: u64, len: usize) -> Self {
        Self { device, raw, len }
    }

    /// Ordinal of the device this region was allocated on.
    #[must_use]
    pub fn device(&self) -> usize {
        self.device
    }

    /// Platform-defined address or identifier for the span.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Length of the span in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the span is zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for DeviceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegion")
            .field("device", &self.device)
            .field("raw", &format_args!("{:#x}", self.raw))
            .field("len", &self.len)
            .finish()
    }
}

/// Host memory with a stable address for the lifetime of in-flight transfers.
///
/// Asynchronous copies capture a clone of the buffer at enqueue time, so the
/// memory cannot disappear while a command still needs it — the host-side
/// analogue of page-locked staging memory. Access goes through read/write
/// guards; the contents written by a device-to-host copy are defined only
/// after the owning stream has been synchronized.
#[derive(Clone)]
pub struct PinnedBuffer {
    len: usize,
    data: Arc<RwLock<Box<[u8]>>>,
}

impl PinnedBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            len,
            data: Arc::new(RwLock::new(vec![0u8; len].into_boxed_slice())),
        }
    }

    /// Allocate a buffer holding a copy of `bytes`.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len(),
            data: Arc::new(RwLock::new(bytes.to_vec().into_boxed_slice())),
        }
    }

    /// Length in bytes. Fixed at construction.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read access to the contents.
    #[must_use]
    pub fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.data.read(), |data| &data[..])
    }

    /// Write access to the contents.
    #[must_use]
    pub fn bytes_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.data.write(), |data| &mut data[..])
    }

    /// Copy the contents out into a fresh vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }
}

impl fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
