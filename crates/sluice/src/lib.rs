//! # Sluice
//!
//! An ambient-device accelerator execution runtime.
//!
//! Sluice mediates between host code and a set of accelerator devices: a
//! device registry with an ambient "current device", in-order command
//! streams with cross-stream events, synchronous and asynchronous memory
//! operations, blocking synchronization, and a device allocator whose
//! failure signal is absence rather than an error code.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Sluice                    │
//! │  ambient current device, builder, scopes    │
//! └──────────────────────┬──────────────────────┘
//!                        │ Platform trait (sluice-core)
//!          ┌─────────────┴─────────────┐
//!   ┌──────▼───────┐           ┌───────▼──────┐
//!   │ sluice-host  │           │ sluice-cuda  │
//!   │  emulation,  │           │ CUDA driver, │
//!   │  every build │           │ cuda feature │
//!   └──────────────┘           └──────────────┘
//! ```
//!
//! Device-scoped operations (sync copies and fills, stream creation and
//! destruction, device synchronize, allocate and free) resolve the ambient
//! current device fresh on every call. Stream-scoped operations (async
//! copies and fills, event waits, stream synchronize) never resolve it; the
//! stream's creation-time device is the execution site. [`DeviceScope`]
//! offers an explicit-ordinal alternative for concurrent callers.
//!
//! # Quick start
//!
//! ```
//! use sluice::{Backend, Sluice};
//!
//! # fn main() -> sluice::Result<()> {
//! let runtime = Sluice::builder().backend(Backend::Host).devices(2).build()?;
//! runtime.set_current_device(1)?;
//!
//! let region = runtime.allocate(1024).expect("out of device memory");
//! let payload = vec![7u8; 1024];
//! runtime.copy_host_to_device(&payload, &region)?;
//!
//! let mut readback = vec![0u8; 1024];
//! runtime.copy_device_to_host(&region, &mut readback)?;
//! assert_eq!(readback, payload);
//!
//! runtime.free(region);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `cuda` — build the CUDA driver platform and let `Backend::Auto` probe
//!   for hardware. The driver library is loaded at runtime, so enabling the
//!   feature does not require a CUDA toolkit at build time.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

mod builder;
mod runtime;
mod scope;

pub use builder::{availability, Backend, SluiceBuilder};
pub use runtime::Sluice;
pub use scope::DeviceScope;

pub use sluice_core::error::{error_name, Error, Result};
pub use sluice_core::{DeviceHandle, DeviceRegion, Event, PinnedBuffer, Platform, Stream};

/// Commonly used items, importable in one line.
pub mod prelude {
    pub use crate::{
        Backend, DeviceRegion, Error, Event, PinnedBuffer, Result, Sluice, Stream,
    };
}
