//! Error types for the Sluice runtime.
//!
//! The error domain is closed: every failure a platform or the runtime can
//! report maps onto one of the variants below, and [`Error::name`] gives each
//! variant a stable, allocation-free name suitable for logs and diagnostics.
//! Success needs no name here; `Result` already carries it.

use thiserror::Error;

/// Result type used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of runtime failures.
///
/// Payloads carry human-readable context (sizes, ordinals, platform detail)
/// and never influence [`Error::name`], which depends on the variant alone.
/// Errors cross layers unchanged: a platform failure surfaces to the caller
/// with the same kind it was born with.
#[derive(Error, Debug)]
pub enum Error {
    /// The platform is missing or failed to initialize.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// No device is selected and the platform offers no default.
    #[error("no current device is set and no default exists")]
    NoCurrentDevice,

    /// A device ordinal outside `0..device_count()`.
    #[error("invalid device ordinal {ordinal} (device count is {count})")]
    InvalidDevice {
        /// The rejected ordinal.
        ordinal: usize,
        /// The device count it was checked against.
        count: usize,
    },

    /// An argument the platform refused: a byte count past the end of a
    /// region, a stream or event that belongs to a different platform, a
    /// region that is no longer live.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A command queue could not be created.
    #[error("stream creation failed: {0}")]
    StreamCreationFailed(String),

    /// A copy or fill did not complete.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// A device or stream drain did not complete.
    #[error("synchronization failed: {0}")]
    SyncFailed(String),

    /// A platform-level allocation fault. The public allocator still signals
    /// failure by returning no region; this variant exists for platforms and
    /// for the release path of `free`.
    #[error("allocation of {size} bytes failed: {reason}")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Platform-provided reason.
        reason: String,
    },

    /// The operation is not available on this platform.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// Stable name of this error kind.
    ///
    /// Pure and total over the closed set: no allocation, no payload
    /// inspection, the same string for the life of the crate.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Error::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            Error::NoCurrentDevice => "NO_CURRENT_DEVICE",
            Error::InvalidDevice { .. } => "INVALID_DEVICE",
            Error::InvalidValue(_) => "INVALID_VALUE",
            Error::StreamCreationFailed(_) => "STREAM_CREATION_FAILED",
            Error::TransferFailed(_) => "TRANSFER_FAILED",
            Error::SyncFailed(_) => "SYNC_FAILED",
            Error::AllocationFailed { .. } => "ALLOCATION_FAILED",
            Error::Unsupported(_) => "UNSUPPORTED",
        }
    }
}

/// Free-function form of [`Error::name`] for callers that held onto the
/// C-style diagnostic shape.
#[must_use]
pub fn error_name(error: &Error) -> &'static str {
    error.name()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<Error> {
        vec![
            Error::RuntimeUnavailable("probe failed".into()),
            Error::NoCurrentDevice,
            Error::InvalidDevice {
                ordinal: 7,
                count: 2,
            },
            Error::InvalidValue("count 64 exceeds region of 32 bytes".into()),
            Error::StreamCreationFailed("worker spawn failed".into()),
            Error::TransferFailed("copy interrupted".into()),
            Error::SyncFailed("drain interrupted".into()),
            Error::AllocationFailed {
                size: 1024,
                reason: "arena exhausted".into(),
            },
            Error::Unsupported("peer access".into()),
        ]
    }

    #[test]
    fn names_are_stable_and_distinct() {
        let names: Vec<&'static str> = all_variants().iter().map(Error::name).collect();
        assert_eq!(
            names,
            vec![
                "RUNTIME_UNAVAILABLE",
                "NO_CURRENT_DEVICE",
                "INVALID_DEVICE",
                "INVALID_VALUE",
                "STREAM_CREATION_FAILED",
                "TRANSFER_FAILED",
                "SYNC_FAILED",
                "ALLOCATION_FAILED",
                "UNSUPPORTED",
            ]
        );
    }

    #[test]
    fn name_ignores_payload() {
        let a = Error::TransferFailed("reason one".into());
        let b = Error::TransferFailed("entirely different reason".into());
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::InvalidDevice {
            ordinal: 3,
            count: 1,
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains('1'));

        let err = Error::AllocationFailed {
            size: 4096,
            reason: "arena exhausted".into(),
        };
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn free_function_matches_method() {
        for err in all_variants() {
            assert_eq!(error_name(&err), err.name());
        }
    }
}
