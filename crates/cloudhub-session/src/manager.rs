//! Session manager — the per-replica table of attached edge nodes.
//!
//! At most one session per node id. A second registration for the same node
//! wins and the old session is terminated. Deletes compare session identity,
//! so a slow-closing old connection cannot evict its replacement.
//!
//! The node limit is advisory for `add_session`: callers check `reach_limit`
//! before accepting. `try_add_session` enforces it atomically instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use cloudhub_core::Identity;

use crate::gauge::{ConnectedNodesGauge, LogGauge};
use crate::message::MessageId;
use crate::session::{NodeSession, SessionError, SharedSession, TerminateCode};

/// Shared handle threaded through the transport and API.
pub type SharedSessionManager = Arc<SessionManager>;

pub struct SessionManager {
    identity: Arc<Identity>,
    /// Connected nodes. Only changed while holding the entry's shard lock.
    node_number: AtomicUsize,
    node_limit: usize,
    sessions: DashMap<String, SharedSession>,
    gauge: Arc<dyn ConnectedNodesGauge>,
}

/// Pointer identity, ignoring vtables.
fn same_session(a: &SharedSession, b: &dyn NodeSession) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), b as *const dyn NodeSession)
}

impl SessionManager {
    pub fn new(identity: Arc<Identity>, node_limit: usize) -> Self {
        Self::with_gauge(identity, node_limit, Arc::new(LogGauge))
    }

    pub fn with_gauge(
        identity: Arc<Identity>,
        node_limit: usize,
        gauge: Arc<dyn ConnectedNodesGauge>,
    ) -> Self {
        Self {
            identity,
            node_number: AtomicUsize::new(0),
            node_limit,
            sessions: DashMap::new(),
            gauge,
        }
    }

    /// Register a session, superseding any existing one for the same node.
    pub fn add_session(&self, session: SharedSession) {
        let node_id = session.node_id().to_string();

        // Counter moves under the shard lock so it never runs ahead of the map.
        let (previous, count) = match self.sessions.entry(node_id.clone()) {
            Entry::Occupied(mut e) => (
                Some(e.insert(session.clone())),
                self.node_number.load(Ordering::SeqCst),
            ),
            Entry::Vacant(e) => {
                let count = self.node_number.fetch_add(1, Ordering::SeqCst) + 1;
                e.insert(session.clone());
                (None, count)
            }
        };

        if let Some(old) = previous {
            self.retire(&node_id, old, &session);
        }
        self.gauge.set(count);
        tracing::info!(node_id = %node_id, connected = count, "node session added");
    }

    /// Register a session only if a slot is free. Replacing an existing
    /// session for the same node never needs a new slot.
    pub fn try_add_session(&self, session: SharedSession) -> Result<(), SessionError> {
        let node_id = session.node_id().to_string();

        let previous = match self.sessions.entry(node_id.clone()) {
            Entry::Occupied(mut e) => Some(e.insert(session.clone())),
            Entry::Vacant(e) => {
                self.node_number
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < self.node_limit).then_some(n + 1)
                    })
                    .map_err(|_| {
                        tracing::warn!(node_id = %node_id, limit = self.node_limit, "node limit reached, rejecting session");
                        SessionError::LimitReached {
                            limit: self.node_limit,
                        }
                    })?;
                e.insert(session.clone());
                None
            }
        };

        if let Some(old) = previous {
            self.retire(&node_id, old, &session);
        }
        let count = self.node_number.load(Ordering::SeqCst);
        self.gauge.set(count);
        tracing::info!(node_id = %node_id, connected = count, "node session added");
        Ok(())
    }

    /// Terminate a superseded session. Runs after the map lock is released.
    fn retire(&self, node_id: &str, old: SharedSession, new: &SharedSession) {
        if same_session(&old, new.as_ref()) {
            return;
        }
        tracing::warn!(node_id = %node_id, "session exists, closing old session");
        old.set_terminate_code(TerminateCode::Superseded);
        old.terminate();
    }

    /// Remove `session` if it is still the registered one for its node.
    /// Returns whether an entry was removed.
    pub fn delete_session(&self, session: &dyn NodeSession) -> bool {
        let node_id = session.node_id();

        let count = match self.sessions.entry(node_id.to_string()) {
            Entry::Occupied(e) if same_session(e.get(), session) => {
                let count = self.decrement();
                e.remove();
                count
            }
            Entry::Occupied(_) => {
                // usually a quick disconnect + reconnect
                tracing::debug!(node_id = %node_id, "stale session already replaced");
                return false;
            }
            Entry::Vacant(_) => {
                tracing::warn!(node_id = %node_id, "session not found");
                return false;
            }
        };

        self.gauge.set(count);
        tracing::info!(node_id = %node_id, connected = count, "node session removed");
        true
    }

    /// Saturating decrement; returns the new count.
    fn decrement(&self) -> usize {
        let prev = self
            .node_number
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or_else(|n| n);
        prev.saturating_sub(1)
    }

    pub fn get_session(&self, node_id: &str) -> Option<SharedSession> {
        self.sessions.get(node_id).map(|s| s.value().clone())
    }

    /// Connected count is at or above the node limit.
    pub fn reach_limit(&self) -> bool {
        self.node_number.load(Ordering::SeqCst) >= self.node_limit
    }

    /// Forward a keepalive to the node's session.
    pub fn keepalive_message(&self, node_id: &str) -> Result<(), SessionError> {
        let session = self.get_session(node_id).ok_or_else(|| {
            tracing::debug!(node_id = %node_id, "keepalive for unknown node");
            SessionError::NotFound(node_id.to_string())
        })?;
        session.keepalive();
        Ok(())
    }

    /// Forward a message ack to the node's session.
    pub fn receive_message_ack(&self, node_id: &str, ack: MessageId) -> Result<(), SessionError> {
        let session = self.get_session(node_id).ok_or_else(|| {
            tracing::debug!(node_id = %node_id, msg_id = %ack, "ack for unknown node");
            SessionError::NotFound(node_id.to_string())
        })?;
        session.receive_ack(ack);
        Ok(())
    }

    /// Owning cloud id of the node's session and whether that is us.
    /// `("", false)` when the node has no session here.
    pub fn is_node_connect_self(&self, node_id: &str) -> (String, bool) {
        match self.get_session(node_id) {
            Some(session) => {
                let cloud_id = session.connected_cloud_id().to_string();
                let is_self = self.is_cloud_self(&cloud_id);
                (cloud_id, is_self)
            }
            None => (String::new(), false),
        }
    }

    pub fn cloud_id(&self) -> &str {
        self.identity.id()
    }

    pub fn is_cloud_self(&self, id: &str) -> bool {
        self.identity.is_self(id)
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn node_number(&self) -> usize {
        self.node_number.load(Ordering::SeqCst)
    }

    pub fn node_limit(&self) -> usize {
        self.node_limit
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<SharedSession> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Remove and terminate every session. Used on shutdown.
    pub fn terminate_all(&self, code: TerminateCode) -> usize {
        let mut terminated = 0;
        for node_id in self.node_ids() {
            let (session, count) = match self.sessions.entry(node_id) {
                Entry::Occupied(e) => {
                    let count = self.decrement();
                    (e.remove(), count)
                }
                Entry::Vacant(_) => continue,
            };
            session.set_terminate_code(code);
            session.terminate();
            self.gauge.set(count);
            terminated += 1;
        }
        tracing::info!(terminated, ?code, "terminated all node sessions");
        terminated
    }
}
