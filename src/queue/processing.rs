//! Processing queue
//!
//! A FIFO of pending actions drained by one dedicated worker thread. The
//! worker is started on the first enqueue and parks on the channel while the
//! queue is idle. Disposing the queue closes the channel; actions already
//! queued still run before the worker exits.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A unit of work executed on a queue worker
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Ordered execution queue with a single worker
pub struct ProcessingQueue {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Action>>>,
    disposed: AtomicBool,
    assigned: AtomicUsize,
    processed: Arc<AtomicU64>,
}

impl ProcessingQueue {
    /// Create a queue; the worker thread is named after `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender: Mutex::new(None),
            disposed: AtomicBool::new(false),
            assigned: AtomicUsize::new(0),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an action. Returns `false` if the queue has been disposed.
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut sender = self.sender.lock();
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }

        if sender.is_none() {
            match self.start_worker() {
                Ok(tx) => *sender = Some(tx),
                Err(e) => {
                    error!(queue = %self.name, error = %e, "Failed to start queue worker");
                    return false;
                }
            }
        }

        match sender.as_ref() {
            Some(tx) => tx.send(Box::new(action)).is_ok(),
            None => false,
        }
    }

    fn start_worker(&self) -> std::io::Result<mpsc::UnboundedSender<Action>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
        let processed = self.processed.clone();
        let name = self.name.clone();

        thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(queue = %name, "Queue worker started");
            while let Some(action) = rx.blocking_recv() {
                if catch_unwind(AssertUnwindSafe(action)).is_err() {
                    error!(queue = %name, "Queued action panicked");
                }
                processed.fetch_add(1, Ordering::Relaxed);
            }
            debug!(queue = %name, "Queue worker stopped");
        })?;

        Ok(tx)
    }

    /// Stop accepting actions; the worker exits once the backlog is drained
    pub fn dispose(&self) {
        let mut sender = self.sender.lock();
        if !self.disposed.swap(true, Ordering::AcqRel) {
            sender.take();
            debug!(queue = %self.name, "Queue disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether the worker thread has been started
    pub fn is_started(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Number of actions executed so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Number of entities currently assigned to this queue
    pub fn load(&self) -> usize {
        self.assigned.load(Ordering::Acquire)
    }

    pub(crate) fn assign(&self) {
        self.assigned.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unassign(&self) {
        let _ = self
            .assigned
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl std::fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("name", &self.name)
            .field("load", &self.load())
            .field("processed", &self.processed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
