//! Stream workers, commands, and event markers.
//!
//! Every stream is backed by one worker thread draining a FIFO command
//! queue, which is the emulation's stand-in for an in-order hardware queue:
//! commands on one stream execute in submission order, streams run
//! concurrently with each other, and a wait-event command parks the worker —
//! never the submitting thread — until the marker it waits on completes.
//!
//! Commands are validated when they are enqueued, so execution on the worker
//! cannot fail and completion accounting stays a pair of counters.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use sluice_core::error::{Error, Result};
use sluice_core::PinnedBuffer;

use crate::device::HostAllocation;

/// One unit of work on a stream's queue.
///
/// Transfers hold strong references to their endpoints, taken at enqueue
/// time: freeing a region or dropping a pinned buffer mid-flight releases
/// the handle, not the memory a queued command is about to touch.
pub(crate) enum Command {
    HostToDevice {
        src: PinnedBuffer,
        dst: Arc<HostAllocation>,
        count: usize,
    },
    DeviceToHost {
        src: Arc<HostAllocation>,
        dst: PinnedBuffer,
        count: usize,
    },
    DeviceToDevice {
        src: Arc<HostAllocation>,
        dst: Arc<HostAllocation>,
        count: usize,
    },
    FillU8 {
        dst: Arc<HostAllocation>,
        value: u8,
        count: usize,
    },
    FillU32 {
        dst: Arc<HostAllocation>,
        value: u32,
        count: usize,
    },
    RecordEvent(Arc<EventState>),
    WaitEvent(Arc<EventState>),
}

fn execute(command: Command) {
    match command {
        Command::HostToDevice { src, dst, count } => {
            let bytes = src.bytes();
            dst.store_bytes(&bytes[..count]);
        }
        Command::DeviceToHost { src, dst, count } => {
            let mut bytes = dst.bytes_mut();
            src.load_bytes(&mut bytes[..count]);
        }
        Command::DeviceToDevice { src, dst, count } => src.copy_bytes_to(&dst, count),
        Command::FillU8 { dst, value, count } => dst.fill_bytes(value, count),
        Command::FillU32 { dst, value, count } => dst.fill_words(value, count),
        Command::RecordEvent(event) => event.complete(),
        Command::WaitEvent(event) => event.wait(),
    }
}

/// Completion state of a recorded event.
pub(crate) struct EventState {
    done: Mutex<bool>,
    signal: Condvar,
}

impl EventState {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn complete(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.signal.wait(&mut done);
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        *self.done.lock()
    }
}

struct CommandQueue {
    commands: VecDeque<Command>,
    shutdown: bool,
}

struct Progress {
    submitted: u64,
    completed: u64,
}

/// State shared between a stream handle, its worker thread, and the device
/// registry that drains it during device-wide synchronization.
pub(crate) struct StreamShared {
    device: usize,
    id: u64,
    queue: Mutex<CommandQueue>,
    work: Condvar,
    progress: Mutex<Progress>,
    drained: Condvar,
}

impl StreamShared {
    /// Create the shared state and start its worker thread.
    pub(crate) fn spawn(device: usize, id: u64) -> Result<Arc<Self>> {
        let shared = Arc::new(Self {
            device,
            id,
            queue: Mutex::new(CommandQueue {
                commands: VecDeque::new(),
                shutdown: false,
            }),
            work: Condvar::new(),
            progress: Mutex::new(Progress {
                submitted: 0,
                completed: 0,
            }),
            drained: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("sluice-host-{device}.{id}"))
            .spawn(move || worker.run())
            .map_err(|e| Error::StreamCreationFailed(format!("worker spawn failed: {e}")))?;

        Ok(shared)
    }

    pub(crate) fn device(&self) -> usize {
        self.device
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Append a validated command to the queue.
    pub(crate) fn enqueue(&self, command: Command) {
        self.progress.lock().submitted += 1;
        let mut queue = self.queue.lock();
        debug_assert!(!queue.shutdown, "enqueue on a stream past shutdown");
        queue.commands.push_back(command);
        self.work.notify_one();
    }

    /// Block until everything submitted before this call has completed.
    pub(crate) fn synchronize(&self) {
        let mut progress = self.progress.lock();
        let target = progress.submitted;
        while progress.completed < target {
            self.drained.wait(&mut progress);
        }
    }

    /// Block until the queue is fully drained, whatever arrives meanwhile.
    pub(crate) fn wait_idle(&self) {
        let mut progress = self.progress.lock();
        while progress.completed < progress.submitted {
            self.drained.wait(&mut progress);
        }
    }

    /// Commands submitted but not yet retired.
    pub(crate) fn pending(&self) -> u64 {
        let progress = self.progress.lock();
        progress.submitted - progress.completed
    }

    /// Tell the worker to finish the backlog and exit. Non-blocking.
    pub(crate) fn begin_shutdown(&self) {
        let mut queue = self.queue.lock();
        queue.shutdown = true;
        self.work.notify_all();
    }

    fn run(&self) {
        tracing::debug!(device = self.device, stream = self.id, "stream worker started");
        loop {
            let command = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(command) = queue.commands.pop_front() {
                        break Some(command);
                    }
                    if queue.shutdown {
                        break None;
                    }
                    self.work.wait(&mut queue);
                }
            };
            match command {
                Some(command) => {
                    execute(command);
                    let mut progress = self.progress.lock();
                    progress.completed += 1;
                    self.drained.notify_all();
                }
                None => break,
            }
        }
        tracing::debug!(device = self.device, stream = self.id, "stream worker exited");
    }
}

/// The backend state carried inside a `Stream` handle.
///
/// Dropping it — whether through an explicit destroy or by letting the
/// stream fall out of scope — signals the worker to retire the backlog and
/// exit, without blocking the dropping thread.
pub(crate) struct HostStreamState {
    pub(crate) shared: Arc<StreamShared>,
}

impl Drop for HostStreamState {
    fn drop(&mut self) {
        self.shared.begin_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(len: usize) -> Arc<HostAllocation> {
        Arc::new(HostAllocation::new(0, len))
    }

    fn read(allocation: &HostAllocation) -> Vec<u8> {
        let mut out = vec![0u8; allocation.len()];
        allocation.load_bytes(&mut out);
        out
    }

    #[test]
    fn commands_execute_in_submission_order() {
        let stream = StreamShared::spawn(0, 1).expect("spawn worker");
        let target = arena(8);

        stream.enqueue(Command::FillU32 {
            dst: Arc::clone(&target),
            value: u32::from_ne_bytes([0xAA; 4]),
            count: 2,
        });
        stream.enqueue(Command::FillU8 {
            dst: Arc::clone(&target),
            value: 0x11,
            count: 4,
        });
        stream.synchronize();

        let bytes = read(&target);
        assert_eq!(&bytes[..4], &[0x11; 4], "later fill wins the overlap");
        assert_eq!(&bytes[4..], &[0xAA; 4], "tail keeps the earlier fill");
        stream.begin_shutdown();
    }

    #[test]
    fn wait_event_orders_across_streams() {
        let producer = StreamShared::spawn(0, 1).expect("spawn producer");
        let consumer = StreamShared::spawn(0, 2).expect("spawn consumer");
        let target = arena(64);

        let marker = Arc::new(EventState::new());
        producer.enqueue(Command::FillU8 {
            dst: Arc::clone(&target),
            value: 0xAA,
            count: 64,
        });
        producer.enqueue(Command::RecordEvent(Arc::clone(&marker)));

        consumer.enqueue(Command::WaitEvent(Arc::clone(&marker)));
        consumer.enqueue(Command::FillU8 {
            dst: Arc::clone(&target),
            value: 0xBB,
            count: 16,
        });

        consumer.synchronize();
        let bytes = read(&target);
        assert_eq!(&bytes[..16], &[0xBB; 16], "dependent fill lands second");
        assert_eq!(&bytes[16..], &[0xAA; 48]);

        producer.begin_shutdown();
        consumer.begin_shutdown();
    }

    #[test]
    fn waiting_parks_the_worker_not_the_caller() {
        let stream = StreamShared::spawn(0, 1).expect("spawn worker");
        let gate = Arc::new(EventState::new());
        let target = arena(4);

        stream.enqueue(Command::WaitEvent(Arc::clone(&gate)));
        stream.enqueue(Command::FillU8 {
            dst: Arc::clone(&target),
            value: 0x5A,
            count: 4,
        });

        // Both commands are stuck behind the gate, but this thread is not.
        assert!(stream.pending() >= 1);
        assert!(!gate.is_complete());

        gate.complete();
        stream.wait_idle();
        assert_eq!(stream.pending(), 0);
        assert_eq!(read(&target), vec![0x5A; 4]);
        stream.begin_shutdown();
    }

    #[test]
    fn shutdown_retires_the_backlog() {
        let stream = StreamShared::spawn(0, 1).expect("spawn worker");
        let target = arena(16);

        for value in 1..=4u8 {
            stream.enqueue(Command::FillU8 {
                dst: Arc::clone(&target),
                value,
                count: 16,
            });
        }
        stream.begin_shutdown();
        stream.wait_idle();
        assert_eq!(read(&target), vec![4u8; 16]);
    }

    #[test]
    fn completed_event_is_a_noop_dependency() {
        let stream = StreamShared::spawn(0, 1).expect("spawn worker");
        let marker = Arc::new(EventState::new());
        marker.complete();

        let target = arena(2);
        stream.enqueue(Command::WaitEvent(Arc::clone(&marker)));
        stream.enqueue(Command::FillU8 {
            dst: Arc::clone(&target),
            value: 1,
            count: 2,
        });
        stream.synchronize();
        assert_eq!(read(&target), vec![1, 1]);
        stream.begin_shutdown();
    }

    #[test]
    fn dropping_state_shuts_the_worker_down() {
        let stream = StreamShared::spawn(0, 9).expect("spawn worker");
        let state = HostStreamState {
            shared: Arc::clone(&stream),
        };
        let target = arena(4);
        stream.enqueue(Command::FillU8 {
            dst: Arc::clone(&target),
            value: 3,
            count: 4,
        });
        drop(state);
        stream.wait_idle();
        assert_eq!(read(&target), vec![3; 4]);
    }
}
