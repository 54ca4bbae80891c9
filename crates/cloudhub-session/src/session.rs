//! Node session contract — what a connection object must provide to be
//! tracked by the session manager.
//!
//! Concrete sessions are owned by the transport. The manager only holds
//! `Arc<dyn NodeSession>` handles and forwards keepalive/ack events to them.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::message::MessageId;
use crate::pool::NodeMessagePool;

/// Shared handle to a live node session.
pub type SharedSession = Arc<dyn NodeSession>;

/// Why a session ended. Stable integer codes, reported back to the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum TerminateCode {
    /// Still running.
    #[default]
    None = 0,
    Normal = 1,
    KeepaliveTimeout = 2,
    /// Replaced by a newer session for the same node.
    Superseded = 3,
    SendFailed = 4,
    Shutdown = 5,
    /// Dropped by an operator.
    Evicted = 6,
}

impl TerminateCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Unknown codes map to `None`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => TerminateCode::Normal,
            2 => TerminateCode::KeepaliveTimeout,
            3 => TerminateCode::Superseded,
            4 => TerminateCode::SendFailed,
            5 => TerminateCode::Shutdown,
            6 => TerminateCode::Evicted,
            _ => TerminateCode::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found for node {0}")]
    NotFound(String),
    #[error("node limit {limit} reached")]
    LimitReached { limit: usize },
    #[error("message queue full")]
    QueueFull,
    #[error("message queue closed")]
    QueueClosed,
}

/// One edge node's connection, as seen by the session manager.
///
/// `terminate` must be idempotent and must not block: the manager calls it
/// inline when a newer session supersedes this one. It has to unblock every
/// internal loop so no task outlives the session.
pub trait NodeSession: Send + Sync {
    fn node_id(&self) -> &str;

    /// Id of the cloud replica this node is attached to.
    fn connected_cloud_id(&self) -> &str;

    /// A keepalive arrived from the edge node.
    fn keepalive(&self);

    /// Terminates the session when no keepalive is seen within the window.
    fn keepalive_check(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Sends messages that require an ack until an error or termination.
    fn send_ack_messages(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Sends messages that need no ack until an error or termination.
    fn send_no_ack_messages(self: Arc<Self>) -> BoxFuture<'static, ()>;

    fn receive_ack(&self, ack: MessageId);

    /// Spawn the session's loops on the current tokio runtime.
    fn start(self: Arc<Self>) {
        tracing::debug!(node_id = %self.node_id(), "starting node session");
        tokio::spawn(self.clone().keepalive_check());
        tokio::spawn(self.clone().send_ack_messages());
        tokio::spawn(self.send_no_ack_messages());
    }

    fn terminate(&self);

    fn set_terminate_code(&self, code: TerminateCode);

    fn terminate_code(&self) -> TerminateCode;

    fn message_pool(&self) -> &NodeMessagePool;
}
