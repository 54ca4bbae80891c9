//! Connection manager — which cloud replica each edge node is attached to.
//!
//! A lighter table than `SessionManager`: no keepalive, no acks, just
//! node id → owning cloud id. Subsystems that only need to answer
//! "is node X attached here" use this one.

use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use cloudhub_core::Identity;

use crate::manager::SessionManager;

#[derive(Debug)]
pub struct NodeConnectionInfo {
    pub created_at: Instant,
    pub node_id: String,
    pub cloud_id: String,
}

impl NodeConnectionInfo {
    pub fn new(node_id: impl Into<String>, cloud_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            created_at: Instant::now(),
            node_id: node_id.into(),
            cloud_id: cloud_id.into(),
        })
    }
}

pub struct ConnectionManager {
    identity: Arc<Identity>,
    nodes: DashMap<String, Arc<NodeConnectionInfo>>,
}

impl ConnectionManager {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            nodes: DashMap::new(),
        }
    }

    /// Record a connection, replacing any earlier one for the node.
    pub fn add_node(&self, conn: Arc<NodeConnectionInfo>) {
        let node_id = conn.node_id.clone();
        if let Some(old) = self.nodes.insert(node_id.clone(), conn) {
            tracing::warn!(node_id = %node_id, old_cloud_id = %old.cloud_id, "node connection exists, replacing");
        }
    }

    /// Remove `conn` if it is still the recorded connection for its node.
    pub fn delete_node(&self, conn: &Arc<NodeConnectionInfo>) -> bool {
        match self.nodes.entry(conn.node_id.clone()) {
            Entry::Occupied(e) if Arc::ptr_eq(e.get(), conn) => {
                e.remove();
                true
            }
            Entry::Occupied(_) => {
                tracing::debug!(node_id = %conn.node_id, "stale node connection already replaced");
                false
            }
            Entry::Vacant(_) => {
                tracing::warn!(node_id = %conn.node_id, "node connection not found");
                false
            }
        }
    }

    pub fn get_cloud(&self, node_id: &str) -> Option<Arc<NodeConnectionInfo>> {
        self.nodes.get(node_id).map(|c| c.value().clone())
    }

    /// Owning cloud id and whether that is us. `("", false)` when unknown.
    pub fn is_node_connect_self(&self, node_id: &str) -> (String, bool) {
        match self.get_cloud(node_id) {
            Some(conn) => {
                let is_self = self.identity.is_self(&conn.cloud_id);
                (conn.cloud_id.clone(), is_self)
            }
            None => (String::new(), false),
        }
    }

    pub fn cloud_id(&self) -> &str {
        self.identity.id()
    }

    pub fn is_id_self(&self, id: &str) -> bool {
        self.identity.is_self(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rebuild from the live session table: record nodes that gained a
    /// session or changed owner, drop nodes whose session is gone.
    /// Returns (added, removed).
    pub fn sync_from_sessions(&self, sessions: &SessionManager) -> (usize, usize) {
        let mut added = 0;
        for session in sessions.sessions() {
            let current = self.get_cloud(session.node_id());
            let stale = current
                .map(|c| c.cloud_id != session.connected_cloud_id())
                .unwrap_or(true);
            if stale {
                self.nodes.insert(
                    session.node_id().to_string(),
                    NodeConnectionInfo::new(session.node_id(), session.connected_cloud_id()),
                );
                added += 1;
            }
        }

        let before = self.nodes.len();
        self.nodes
            .retain(|node_id, _| sessions.get_session(node_id).is_some());
        let removed = before.saturating_sub(self.nodes.len());

        if added > 0 || removed > 0 {
            tracing::info!(added, removed, "node connections synced from sessions");
        }
        (added, removed)
    }
}
