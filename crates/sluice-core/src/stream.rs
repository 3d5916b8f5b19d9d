//! Streams and events.
//!
//! A [`Stream`] is an in-order command queue permanently bound to the device
//! it was created on. Commands submitted to one stream execute in submission
//! order; distinct streams are unordered with respect to each other unless an
//! [`Event`] dependency links them.
//!
//! Both types carry their backend state type-erased, so the same handle shape
//! works across platforms. A platform downcasts the state it expects and
//! rejects foreign handles with `Error::InvalidValue` instead of trusting
//! them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An in-order command queue bound to a single device.
///
/// Streams are owned values: destroying one consumes it, so submitting to a
/// destroyed stream is unrepresentable rather than checked at runtime. The
/// backend state cleans itself up when the stream is dropped without an
/// explicit destroy, after finishing whatever was already queued.
pub struct Stream {
    device: usize,
    id: u64,
    state: Box<dyn Any + Send>,
}

impl Stream {
    /// Assemble a stream handle around backend state.
    ///
    /// Called by platforms; user code receives streams from `create_stream`.
    #[must_use]
    pub fn new(device: usize, id: u64, state: Box<dyn Any + Send>) -> Self {
        Self { device, id, state }
    }

    /// Ordinal of the device this stream is permanently bound to.
    #[must_use]
    pub fn device(&self) -> usize {
        self.device
    }

    /// Runtime-unique stream id, for logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the backend state, if it has the expected type.
    #[must_use]
    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }

    /// Take the backend state out of the handle, if it has the expected
    /// type; otherwise hand the stream back intact.
    pub fn into_state<T: Any + Send>(self) -> std::result::Result<Box<T>, Stream> {
        let Stream { device, id, state } = self;
        state
            .downcast::<T>()
            .map_err(|state| Stream { device, id, state })
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("device", &self.device)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A marker in a stream's command order.
///
/// Recorded on one stream, an event completes once everything submitted to
/// that stream before the record has completed. Other streams can be made to
/// wait on it; waiting on an already-completed event is a no-op dependency.
/// Events are cheap to clone and all clones observe the same completion.
#[derive(Clone)]
pub struct Event {
    device: usize,
    id: u64,
    state: Arc<dyn Any + Send + Sync>,
}

impl Event {
    /// Assemble an event handle around backend state.
    #[must_use]
    pub fn new(device: usize, id: u64, state: Arc<dyn Any + Send + Sync>) -> Self {
        Self { device, id, state }
    }

    /// Ordinal of the device whose stream recorded this event.
    #[must_use]
    pub fn device(&self) -> usize {
        self.device
    }

    /// Runtime-unique event id, for logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Clone out the backend state, if it has the expected type.
    #[must_use]
    pub fn state<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.state).downcast::<T>().ok()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("device", &self.device)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
