//! Channel membership capability.
//!
//! The session core only needs to ask a channel how many members it has and
//! who they are. [`MemoryChannel`] is the in-process implementation the
//! server uses; anything else implementing [`Channel`] works the same way.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::Session;

/// A named membership group of sessions.
pub trait Channel: Send + Sync {
    /// Channel name as given at creation (e.g. `#general`).
    fn name(&self) -> &str;

    fn member_count(&self) -> usize;

    /// Snapshot of the current members.
    fn members(&self) -> Vec<Arc<Session>>;
}

/// Case-folded channel name, used as the membership key on both sides.
pub fn channel_key(name: &str) -> String {
    name.to_lowercase()
}

/// Channel whose member list lives in memory.
///
/// Members are tracked by `Arc` identity: a rename does not change which
/// session object sits in the channel.
pub struct MemoryChannel {
    name: String,
    members: RwLock<Vec<Arc<Session>>>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: RwLock::new(Vec::new()),
        }
    }

    /// Add a member. Returns `false` if the session was already present.
    pub fn add(&self, session: &Arc<Session>) -> bool {
        let mut members = self.members.write();
        if members.iter().any(|m| Arc::ptr_eq(m, session)) {
            return false;
        }
        members.push(Arc::clone(session));
        true
    }

    /// Remove a member. Returns `false` if the session was not present.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| !Arc::ptr_eq(m, session));
        members.len() != before
    }

    pub fn contains(&self, session: &Arc<Session>) -> bool {
        self.members.read().iter().any(|m| Arc::ptr_eq(m, session))
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn member_count(&self) -> usize {
        self.members.read().len()
    }

    fn members(&self) -> Vec<Arc<Session>> {
        self.members.read().clone()
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .finish()
    }
}
