//! Per-session outbound message pool.
//!
//! Two bounded queues feed the session's send loops:
//!   ack    — each message waits for an edge ack before the next is sent
//!   no_ack — fire and forget
//!
//! Every enqueued message gets the next id from a per-pool counter. The send
//! loop registers a waiter for that id before sending; `ack` completes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::message::{EdgeMessage, MessageId};
use crate::session::SessionError;

pub struct NodeMessagePool {
    next_id: AtomicU64,
    ack_tx: mpsc::Sender<EdgeMessage>,
    ack_rx: Mutex<Option<mpsc::Receiver<EdgeMessage>>>,
    no_ack_tx: mpsc::Sender<EdgeMessage>,
    no_ack_rx: Mutex<Option<mpsc::Receiver<EdgeMessage>>>,
    /// message id -> waiter in the ack send loop
    pending: DashMap<MessageId, oneshot::Sender<()>>,
}

impl NodeMessagePool {
    /// Create a pool whose queues each hold up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (ack_tx, ack_rx) = mpsc::channel(capacity.max(1));
        let (no_ack_tx, no_ack_rx) = mpsc::channel(capacity.max(1));
        Self {
            next_id: AtomicU64::new(1),
            ack_tx,
            ack_rx: Mutex::new(Some(ack_rx)),
            no_ack_tx,
            no_ack_rx: Mutex::new(Some(no_ack_rx)),
            pending: DashMap::new(),
        }
    }

    fn stamp(&self, route: String, payload: Bytes) -> EdgeMessage {
        EdgeMessage {
            id: MessageId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            route,
            payload,
        }
    }

    /// Queue a message that must be acknowledged by the edge node.
    pub fn enqueue_ack(
        &self,
        route: impl Into<String>,
        payload: Bytes,
    ) -> Result<MessageId, SessionError> {
        let message = self.stamp(route.into(), payload);
        let id = message.id;
        self.ack_tx.try_send(message).map_err(queue_error)?;
        Ok(id)
    }

    /// Queue a fire-and-forget message.
    pub fn enqueue_no_ack(
        &self,
        route: impl Into<String>,
        payload: Bytes,
    ) -> Result<MessageId, SessionError> {
        let message = self.stamp(route.into(), payload);
        let id = message.id;
        self.no_ack_tx.try_send(message).map_err(queue_error)?;
        Ok(id)
    }

    /// Hand the ack queue to its send loop. Only the first call gets it.
    pub fn take_ack_receiver(&self) -> Option<mpsc::Receiver<EdgeMessage>> {
        self.ack_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Hand the no-ack queue to its send loop. Only the first call gets it.
    pub fn take_no_ack_receiver(&self) -> Option<mpsc::Receiver<EdgeMessage>> {
        self.no_ack_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Register interest in the ack for `id`. Replaces any earlier waiter.
    pub fn await_ack(&self, id: MessageId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Complete the waiter for `id`. Returns false for unknown or late acks.
    pub fn ack(&self, id: MessageId) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Forget the waiter for `id` without completing it.
    pub fn cancel_ack(&self, id: MessageId) {
        self.pending.remove(&id);
    }

    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub fn clear_pending(&self) {
        self.pending.clear();
    }
}

fn queue_error(e: mpsc::error::TrySendError<EdgeMessage>) -> SessionError {
    match e {
        mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
        mpsc::error::TrySendError::Closed(_) => SessionError::QueueClosed,
    }
}
