//! FIFO execution stream for asynchronous device transfers.
//!
//! A [`CopyStream`] owns one worker thread draining a queue of transfer and
//! fill operations. Operations enqueued on the same stream execute in
//! submission order; operations on different streams are unordered with
//! respect to each other. There is no cancellation: once enqueued, an
//! operation will run.
//!
//! The queue carries raw addresses, so the enqueue entry points are
//! `unsafe`: the caller keeps every endpoint alive and unaliased until
//! [`CopyStream::synchronize`] (or drop, which drains) has returned. The
//! synchronous transfer paths of the buffer types never involve a stream.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::device;
use crate::device_block::DevicePtr;

/// A queued transfer or fill.
enum Op {
    HostToDevice {
        src: *const u8,
        dst: DevicePtr,
        bytes: usize,
    },
    DeviceToHost {
        src: DevicePtr,
        dst: *mut u8,
        bytes: usize,
    },
    DeviceToDevice {
        src: DevicePtr,
        dst: DevicePtr,
        bytes: usize,
    },
    Fill {
        dst: DevicePtr,
        value: u8,
        bytes: usize,
    },
}

// SAFETY: an Op carries addresses, not access paths; the enqueue contract
// guarantees both endpoints stay valid until the stream is synchronized, and
// the worker performs each access exactly once.
unsafe impl Send for Op {}

struct StreamState {
    pending: Mutex<usize>,
    drained: Condvar,
}

/// A FIFO queue of device transfers with a dedicated worker thread.
///
/// Cheap to keep around for the lifetime of a pipeline; callers that do not
/// want asynchrony simply never construct one and use the synchronous
/// transfer methods instead.
pub struct CopyStream {
    tx: Option<Sender<Op>>,
    state: Arc<StreamState>,
    worker: Option<JoinHandle<()>>,
}

impl CopyStream {
    /// Creates a stream and spawns its worker thread.
    pub fn new() -> CopyStream {
        let (tx, rx) = std::sync::mpsc::channel::<Op>();
        let state = Arc::new(StreamState {
            pending: Mutex::new(0),
            drained: Condvar::new(),
        });
        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("voluma-copy-stream".to_string())
            .spawn(move || Self::worker_fn(rx, worker_state))
            .expect("spawn thread");
        CopyStream {
            tx: Some(tx),
            state,
            worker: Some(worker),
        }
    }

    /// Queues a host to device copy of `bytes` bytes.
    ///
    /// # Safety
    ///
    /// `src` must stay valid for `bytes` reads and `dst` must stay a live
    /// device allocation with `bytes` bytes available, both unaliased by
    /// other writes, until the stream has been synchronized.
    pub unsafe fn enqueue_host_to_device(&self, src: *const u8, dst: DevicePtr, bytes: usize) {
        if bytes != 0 {
            self.enqueue(Op::HostToDevice { src, dst, bytes });
        }
    }

    /// Queues a device to host copy of `bytes` bytes.
    ///
    /// # Safety
    ///
    /// `src` must stay a live device allocation with `bytes` bytes available
    /// and `dst` must stay valid for `bytes` writes, with no overlapping
    /// access from elsewhere, until the stream has been synchronized.
    pub unsafe fn enqueue_device_to_host(&self, src: DevicePtr, dst: *mut u8, bytes: usize) {
        if bytes != 0 {
            self.enqueue(Op::DeviceToHost { src, dst, bytes });
        }
    }

    /// Queues a copy of `bytes` bytes between two distinct device
    /// allocations.
    ///
    /// # Safety
    ///
    /// Both endpoints must stay live device allocations with `bytes` bytes
    /// available and must not overlap, until the stream has been
    /// synchronized.
    pub unsafe fn enqueue_device_to_device(&self, src: DevicePtr, dst: DevicePtr, bytes: usize) {
        if bytes != 0 {
            self.enqueue(Op::DeviceToDevice { src, dst, bytes });
        }
    }

    /// Queues a fill of `bytes` bytes of device memory with `value`.
    ///
    /// # Safety
    ///
    /// `dst` must stay a live device allocation with `bytes` bytes
    /// available, unaliased by other access, until the stream has been
    /// synchronized.
    pub unsafe fn enqueue_fill(&self, dst: DevicePtr, value: u8, bytes: usize) {
        if bytes != 0 {
            self.enqueue(Op::Fill { dst, value, bytes });
        }
    }

    /// Blocks until every queued operation has executed.
    pub fn synchronize(&self) {
        let mut pending = self.state.pending.lock().unwrap();
        while *pending != 0 {
            pending = self.state.drained.wait(pending).unwrap();
        }
    }

    /// Returns `true` if no operations are queued or executing.
    pub fn is_idle(&self) -> bool {
        *self.state.pending.lock().unwrap() == 0
    }

    fn enqueue(&self, op: Op) {
        {
            let mut pending = self.state.pending.lock().unwrap();
            *pending += 1;
        }
        self.tx
            .as_ref()
            .expect("sender lives until drop")
            .send(op)
            .expect("copy stream worker is running");
    }

    fn worker_fn(rx: Receiver<Op>, state: Arc<StreamState>) {
        while let Ok(op) = rx.recv() {
            // SAFETY: the op was admitted under an enqueue_* contract that
            // keeps its endpoints valid until synchronization, and this is
            // its only execution.
            unsafe { Self::execute(op) };
            let mut pending = state.pending.lock().unwrap();
            *pending -= 1;
            if *pending == 0 {
                state.drained.notify_all();
            }
        }
    }

    unsafe fn execute(op: Op) {
        match op {
            Op::HostToDevice { src, dst, bytes } => unsafe { device::copy_in(dst.0, src, bytes) },
            Op::DeviceToHost { src, dst, bytes } => unsafe { device::copy_out(dst, src.0, bytes) },
            Op::DeviceToDevice { src, dst, bytes } => unsafe {
                device::copy_within(dst.0, src.0, bytes)
            },
            Op::Fill { dst, value, bytes } => unsafe { device::fill(dst.0, value, bytes) },
        }
    }
}

impl Default for CopyStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CopyStream {
    /// Closes the queue, lets the worker drain outstanding operations and
    /// joins it.
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for CopyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyStream")
            .field("pending", &*self.state.pending.lock().unwrap())
            .finish()
    }
}
