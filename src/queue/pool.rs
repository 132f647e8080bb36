//! Queue pool
//!
//! Buckets many server-side connections onto a bounded set of processing
//! queues. Each new connection goes to the least-loaded queue that is below
//! the per-queue ceiling; a new queue is created when every queue is full.
//! The assignment holds for the connection's whole lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::processing::ProcessingQueue;

/// Default number of connections sharing one queue
pub const DEFAULT_CONNECTIONS_PER_QUEUE: usize = 64;

/// Least-loaded pool of processing queues
pub struct QueuePool {
    name: String,
    connections_per_queue: usize,
    queues: Mutex<Vec<Arc<ProcessingQueue>>>,
}

impl QueuePool {
    /// Create a pool. A ceiling of 0 is treated as 1.
    pub fn new(name: impl Into<String>, connections_per_queue: usize) -> Self {
        Self {
            name: name.into(),
            connections_per_queue: connections_per_queue.max(1),
            queues: Mutex::new(Vec::new()),
        }
    }

    pub fn connections_per_queue(&self) -> usize {
        self.connections_per_queue
    }

    /// Assign a slot on the least-loaded queue with spare capacity
    pub fn acquire(&self) -> QueueSlot {
        let mut queues = self.queues.lock();

        let candidate = queues
            .iter()
            .filter(|queue| queue.load() < self.connections_per_queue)
            .min_by_key(|queue| queue.load())
            .cloned();

        let queue = match candidate {
            Some(queue) => queue,
            None => {
                let queue = Arc::new(ProcessingQueue::new(format!(
                    "{}-{}",
                    self.name,
                    queues.len()
                )));
                queues.push(queue.clone());
                debug!(
                    pool = %self.name,
                    queues = queues.len(),
                    "Queue pool grew"
                );
                queue
            }
        };

        queue.assign();
        QueueSlot {
            queue,
            released: AtomicBool::new(false),
        }
    }

    /// Number of queues created so far
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Current load of every queue, in creation order
    pub fn loads(&self) -> Vec<usize> {
        self.queues.lock().iter().map(|queue| queue.load()).collect()
    }

    /// Dispose every queue in the pool
    pub fn dispose(&self) {
        for queue in self.queues.lock().iter() {
            queue.dispose();
        }
    }
}

impl std::fmt::Debug for QueuePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePool")
            .field("name", &self.name)
            .field("connections_per_queue", &self.connections_per_queue)
            .field("loads", &self.loads())
            .finish()
    }
}

/// A connection's permanent assignment to one pooled queue.
///
/// Released exactly once, either explicitly or on drop.
#[derive(Debug)]
pub struct QueueSlot {
    queue: Arc<ProcessingQueue>,
    released: AtomicBool,
}

impl QueueSlot {
    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        &self.queue
    }

    /// Give the slot back to the pool. Later calls are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.queue.unassign();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.release();
    }
}
