//! Connection groups
//!
//! A dynamic set of entities that receive the same bytes. Membership and
//! broadcast share one lock, so a member removed before a broadcast never
//! receives it.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::entity::Entity;
use crate::error::Result;
use crate::message::Message;

/// Broadcast list of entities
pub struct ConnectionGroup<E: Entity> {
    name: String,
    members: Mutex<Vec<Arc<E>>>,
}

impl<E: Entity> ConnectionGroup<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn add(&self, entity: Arc<E>) -> bool {
        let mut members = self.members.lock();
        if members.iter().any(|member| Arc::ptr_eq(member, &entity)) {
            return false;
        }
        members.push(entity);
        true
    }

    /// Remove a member. Returns `false` if it was not present.
    pub fn remove(&self, entity: &Arc<E>) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|member| !Arc::ptr_eq(member, entity));
        members.len() != before
    }

    pub fn contains(&self, entity: &Arc<E>) -> bool {
        self.members
            .lock()
            .iter()
            .any(|member| Arc::ptr_eq(member, entity))
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Snapshot of the current members
    pub fn members(&self) -> Vec<Arc<E>> {
        self.members.lock().clone()
    }

    pub fn clear(&self) {
        self.members.lock().clear();
    }

    /// Send identical bytes to every connected member.
    ///
    /// Members that are no longer connected are dropped from the group.
    /// Returns how many members the bytes were queued for.
    pub fn broadcast(&self, data: Bytes) -> usize {
        let mut members = self.members.lock();
        members.retain(|member| member.is_connected());

        let sent = members
            .iter()
            .filter(|member| member.send_bytes(data.clone()).is_ok())
            .count();

        trace!(
            group = %self.name,
            members = members.len(),
            sent,
            bytes = data.len(),
            "Broadcast"
        );
        sent
    }

    /// Serialize `message` once and broadcast the frame
    pub fn broadcast_message(&self, message: &dyn Message) -> Result<usize> {
        let engine = match self.members.lock().first() {
            Some(member) => member.core().engine().clone(),
            None => return Ok(0),
        };
        let data = engine.serialize(message)?;
        Ok(self.broadcast(data))
    }
}

impl<E: Entity> Default for ConnectionGroup<E> {
    fn default() -> Self {
        Self::new("group")
    }
}

impl<E: Entity> std::fmt::Debug for ConnectionGroup<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGroup")
            .field("name", &self.name)
            .field("members", &self.len())
            .finish()
    }
}
