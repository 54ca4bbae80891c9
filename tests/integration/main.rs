//! Cloud hub integration test harness.
//!
//! Drives `SessionManager` and `ChannelSession` together the way an edge
//! transport does: one task per connection registers the session, starts
//! its loops, and unregisters it once the session reports closed.
//!
//!   cargo test --test integration

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cloudhub_core::Identity;
use cloudhub_session::{
    ChannelSession, EdgeLink, EdgeMessage, NodeSession, SessionManager, SessionOptions,
};

mod identity;
mod lifecycle;
mod registry;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const CLOUD_ID: &str = "cloud-a";

/// Edge link that hands every sent message to the test.
pub struct EdgeEnd {
    sent: mpsc::UnboundedSender<EdgeMessage>,
    fail: AtomicBool,
    closes: AtomicUsize,
}

impl EdgeEnd {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EdgeMessage>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            sent,
            fail: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        });
        (link, rx)
    }

    /// Make every later send fail.
    pub fn break_link(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl EdgeLink for EdgeEnd {
    fn send<'a>(&'a self, message: &'a EdgeMessage) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("edge link broken");
            }
            self.sent.send(message.clone())?;
            Ok(())
        })
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn hub(limit: usize) -> Arc<SessionManager> {
    let identity = Arc::new(Identity::configured(CLOUD_ID).expect("configured identity"));
    Arc::new(SessionManager::new(identity, limit))
}

pub fn options() -> SessionOptions {
    SessionOptions {
        keepalive_interval: Duration::from_secs(30),
        ack_timeout: Duration::from_secs(1),
        ack_max_retries: 2,
        queue_capacity: 16,
    }
}

/// A connected edge node as the transport sees it.
pub struct Connection {
    pub session: Arc<ChannelSession>,
    pub edge: Arc<EdgeEnd>,
    pub inbox: mpsc::UnboundedReceiver<EdgeMessage>,
    /// Finishes once the session closed and was unregistered.
    pub task: JoinHandle<bool>,
}

/// Register and start a session, then unregister it when it closes.
pub fn connect(hub: &Arc<SessionManager>, node_id: &str, options: SessionOptions) -> Connection {
    let (edge, inbox) = EdgeEnd::new();
    let session = ChannelSession::new(node_id, CLOUD_ID, edge.clone(), options);

    hub.add_session(session.clone());
    session.clone().start();

    let task = {
        let hub = hub.clone();
        let session = session.clone();
        tokio::spawn(async move {
            session.closed().await;
            hub.delete_session(&*session)
        })
    };

    Connection {
        session,
        edge,
        inbox,
        task,
    }
}

/// Let spawned loops run until they park.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_registers_and_close_unregisters() {
    let hub = hub(10);
    let conn = connect(&hub, "edge-1", options());

    assert_eq!(hub.node_number(), 1);
    assert_eq!(
        hub.is_node_connect_self("edge-1"),
        (CLOUD_ID.to_string(), true)
    );

    conn.session.terminate();
    assert!(conn.task.await.unwrap(), "transport should unregister its session");
    assert_eq!(hub.node_number(), 0);
    assert!(hub.get_session("edge-1").is_none());
    assert_eq!(conn.edge.closes(), 1);
}
