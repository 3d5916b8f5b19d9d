//! # Sluice Host
//!
//! Host-memory emulation backend for the Sluice device runtime.
//!
//! Every device is a table of byte arenas, every stream is a dedicated worker
//! thread draining a FIFO command queue, and every transfer is a plain memory
//! copy. The point is not speed, it is semantics: code written against this
//! backend sees the same ordering, synchronization, and error behavior a
//! hardware backend provides, so the runtime's contract can be exercised in
//! ordinary tests on machines with no accelerator at all.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 HostPlatform                  │
//! │       (validates, routes, enqueues)           │
//! └─────────────┬─────────────────┬───────────────┘
//!               │                 │
//!        ┌──────▼──────┐   ┌──────▼──────┐
//!        │ HostDevice 0│   │ HostDevice 1│   allocation tables
//!        └──────┬──────┘   └─────────────┘
//!               │ registers
//!        ┌──────▼──────────────┐
//!        │ StreamShared (FIFO) │  one worker thread per stream
//!        └─────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

mod device;
mod platform;
mod stream;

pub use platform::HostPlatform;
