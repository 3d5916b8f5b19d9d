//! # Sluice Core
//!
//! Core traits and types for the Sluice device execution runtime.
//!
//! This crate defines the seam between the ordinal-addressed runtime surface
//! and a concrete accelerator backend, plus the handle types that cross it.
//!
//! ## Core Abstractions
//!
//! - [`Platform`] - backend contract: devices, streams, transfers, sync
//! - [`DeviceHandle`] - resolved, never-cached reference to a live device
//! - [`Stream`] / [`Event`] - in-order command queues and cross-stream markers
//! - [`DeviceRegion`] - owned span of device memory, recording its origin
//! - [`PinnedBuffer`] - host staging memory for asynchronous transfers
//! - [`Error`] - the closed failure domain with stable names
//!
//! ## Example
//!
//! ```ignore
//! use sluice_core::{Platform, PinnedBuffer};
//!
//! fn upload(platform: &dyn Platform, bytes: &[u8]) -> sluice_core::Result<()> {
//!     let device = platform.device_handle(0)?;
//!     let region = platform.allocate(device, bytes.len()).unwrap();
//!     platform.copy_host_to_device(device, bytes, &region)?;
//!     platform.free(device, region)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod memory;
pub mod platform;
pub mod stream;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{error_name, Error, Result};
    pub use crate::memory::{DeviceRegion, PinnedBuffer};
    pub use crate::platform::{DeviceHandle, Platform};
    pub use crate::stream::{Event, Stream};
}

// Re-exports for convenience
pub use error::{error_name, Error, Result};
pub use memory::{DeviceRegion, PinnedBuffer};
pub use platform::{DeviceHandle, Platform};
pub use stream::{Event, Stream};
