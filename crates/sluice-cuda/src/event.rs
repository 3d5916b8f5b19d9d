//! Raw CUDA event handles.

use cudarc::driver::result as cuda_result;
use cudarc::driver::sys as cuda_sys;

use sluice_core::error::{Error, Result};

/// An owned CUDA event, recorded once and waited on from any stream.
///
/// Timing is disabled: these events exist purely for cross-stream ordering,
/// and timing-free events are cheaper to record.
pub(crate) struct RawEvent {
    event: cuda_sys::CUevent,
}

impl RawEvent {
    pub(crate) fn create() -> Result<Self> {
        let event = cuda_result::event::create(cuda_sys::CUevent_flags::CU_EVENT_DISABLE_TIMING)
            .map_err(|e| Error::InvalidValue(format!("event creation failed: {e}")))?;
        Ok(Self { event })
    }

    /// Record this event at the current tail of `stream`.
    pub(crate) fn record(&self, stream: cuda_sys::CUstream) -> Result<()> {
        unsafe { cuda_result::event::record(self.event, stream) }
            .map_err(|e| Error::SyncFailed(format!("event record failed: {e}")))
    }

    /// Make `stream` wait for this event before running later commands.
    pub(crate) fn wait(&self, stream: cuda_sys::CUstream) -> Result<()> {
        let result = unsafe { cuda_sys::cuStreamWaitEvent(stream, self.event, 0) };
        if result != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(Error::SyncFailed(format!(
                "cuStreamWaitEvent failed: {result:?}"
            )));
        }
        Ok(())
    }
}

impl Drop for RawEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = cuda_result::event::destroy(self.event);
        }
    }
}

// CUDA events are usable from any thread once created within their context;
// the raw handle is the only non-Send field.
unsafe impl Send for RawEvent {}
unsafe impl Sync for RawEvent {}
