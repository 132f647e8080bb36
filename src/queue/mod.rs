//! Processing queue module
//!
//! Moves message handling off the socket I/O path while keeping
//! per-entity ordering:
//! - `processing` - single-worker FIFO queue
//! - `pool` - least-loaded assignment of connections to queues

pub mod pool;
pub mod processing;

use std::sync::Arc;

pub use pool::{QueuePool, QueueSlot, DEFAULT_CONNECTIONS_PER_QUEUE};
pub use processing::{Action, ProcessingQueue};

/// The queue an entity enqueues its work on
#[derive(Debug)]
pub enum QueueHandle {
    /// A queue owned by a single client; disposed on release
    Dedicated(Arc<ProcessingQueue>),
    /// A shared slot on a server's queue pool
    Pooled(QueueSlot),
}

impl QueueHandle {
    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        match self {
            QueueHandle::Dedicated(queue) => queue,
            QueueHandle::Pooled(slot) => slot.queue(),
        }
    }

    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue().enqueue(action)
    }

    /// Give the queue back: dedicated queues are disposed, pooled slots freed
    pub fn release(&self) {
        match self {
            QueueHandle::Dedicated(queue) => queue.dispose(),
            QueueHandle::Pooled(slot) => slot.release(),
        }
    }
}
