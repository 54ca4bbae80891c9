//! Channel-backed node session over an abstract edge link.
//!
//! The link is whatever the transport gives us (websocket, QUIC stream...);
//! this type owns the session-side state machine around it:
//!   - keepalive window, reset by every `keepalive()`
//!   - ack loop: send, wait for ack, resend up to `ack_max_retries`
//!   - no-ack loop: send and move on
//!   - idempotent termination that stops all three loops

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Notify};

use cloudhub_core::SessionSettings;

use crate::message::{EdgeMessage, MessageId};
use crate::pool::NodeMessagePool;
use crate::session::{NodeSession, TerminateCode};

/// The transport half of a session. Sends one message to the edge node.
pub trait EdgeLink: Send + Sync {
    fn send<'a>(&'a self, message: &'a EdgeMessage) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Close the underlying connection. Called once, on termination.
    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub keepalive_interval: Duration,
    pub ack_timeout: Duration,
    pub ack_max_retries: u32,
    pub queue_capacity: usize,
}

impl From<&SessionSettings> for SessionOptions {
    fn from(s: &SessionSettings) -> Self {
        Self {
            keepalive_interval: s.keepalive_interval(),
            ack_timeout: s.ack_timeout(),
            ack_max_retries: s.ack_max_retries,
            queue_capacity: s.queue_capacity,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

pub struct ChannelSession {
    node_id: String,
    cloud_id: String,
    link: Arc<dyn EdgeLink>,
    options: SessionOptions,
    pool: NodeMessagePool,
    keepalive: Notify,
    terminated: AtomicBool,
    terminate_code: AtomicI32,
    shutdown: watch::Sender<bool>,
}

impl ChannelSession {
    pub fn new(
        node_id: impl Into<String>,
        cloud_id: impl Into<String>,
        link: Arc<dyn EdgeLink>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            node_id: node_id.into(),
            cloud_id: cloud_id.into(),
            link,
            pool: NodeMessagePool::new(options.queue_capacity),
            options,
            keepalive: Notify::new(),
            terminated: AtomicBool::new(false),
            terminate_code: AtomicI32::new(TerminateCode::None.code()),
            shutdown,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolves once the session has been terminated.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Terminate with `code` unless a reason was already recorded.
    fn fail(&self, code: TerminateCode) {
        let _ = self.terminate_code.compare_exchange(
            TerminateCode::None.code(),
            code.code(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.terminate();
    }

    /// Send one message and wait for its ack, resending on timeout.
    /// Returns false when the loop must stop.
    async fn deliver_with_ack(
        &self,
        message: &EdgeMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        for attempt in 0..=self.options.ack_max_retries {
            let ack = self.pool.await_ack(message.id);

            if let Err(e) = self.link.send(message).await {
                self.pool.cancel_ack(message.id);
                tracing::error!(
                    node_id = %self.node_id,
                    msg_id = %message.id,
                    error = %e,
                    "failed to send ack message"
                );
                self.fail(TerminateCode::SendFailed);
                return false;
            }

            tokio::select! {
                _ = shutdown.wait_for(|done| *done) => return false,
                r = tokio::time::timeout(self.options.ack_timeout, ack) => match r {
                    Ok(Ok(())) => {
                        tracing::trace!(node_id = %self.node_id, msg_id = %message.id, "message acked");
                        return true;
                    }
                    // waiter dropped: pending acks were cleared on termination
                    Ok(Err(_)) => return false,
                    Err(_) => {
                        tracing::debug!(
                            node_id = %self.node_id,
                            msg_id = %message.id,
                            attempt,
                            "ack timeout"
                        );
                    }
                }
            }
        }

        self.pool.cancel_ack(message.id);
        tracing::warn!(
            node_id = %self.node_id,
            msg_id = %message.id,
            route = %message.route,
            retries = self.options.ack_max_retries,
            "message dropped, never acknowledged"
        );
        true
    }
}

impl NodeSession for ChannelSession {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn connected_cloud_id(&self) -> &str {
        &self.cloud_id
    }

    fn keepalive(&self) {
        self.keepalive.notify_one();
    }

    fn keepalive_check(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut shutdown = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|done| *done) => return,
                    r = tokio::time::timeout(self.options.keepalive_interval, self.keepalive.notified()) => {
                        if r.is_err() {
                            tracing::warn!(
                                node_id = %self.node_id,
                                window_secs = self.options.keepalive_interval.as_secs(),
                                "keepalive timeout, terminating session"
                            );
                            self.fail(TerminateCode::KeepaliveTimeout);
                            return;
                        }
                    }
                }
            }
        })
    }

    fn send_ack_messages(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Some(mut rx) = self.pool.take_ack_receiver() else {
                tracing::warn!(node_id = %self.node_id, "ack send loop already running");
                return;
            };
            let mut shutdown = self.shutdown.subscribe();
            loop {
                let message = tokio::select! {
                    _ = shutdown.wait_for(|done| *done) => return,
                    m = rx.recv() => match m {
                        Some(m) => m,
                        None => return,
                    },
                };
                if !self.deliver_with_ack(&message, &mut shutdown).await {
                    return;
                }
            }
        })
    }

    fn send_no_ack_messages(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let Some(mut rx) = self.pool.take_no_ack_receiver() else {
                tracing::warn!(node_id = %self.node_id, "no-ack send loop already running");
                return;
            };
            let mut shutdown = self.shutdown.subscribe();
            loop {
                let message = tokio::select! {
                    _ = shutdown.wait_for(|done| *done) => return,
                    m = rx.recv() => match m {
                        Some(m) => m,
                        None => return,
                    },
                };
                if let Err(e) = self.link.send(&message).await {
                    tracing::error!(
                        node_id = %self.node_id,
                        msg_id = %message.id,
                        error = %e,
                        "failed to send message"
                    );
                    self.fail(TerminateCode::SendFailed);
                    return;
                }
            }
        })
    }

    fn receive_ack(&self, ack: MessageId) {
        if !self.pool.ack(ack) {
            tracing::debug!(node_id = %self.node_id, msg_id = %ack, "ack for unknown message");
        }
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.terminate_code.compare_exchange(
            TerminateCode::None.code(),
            TerminateCode::Normal.code(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.shutdown.send_replace(true);
        self.pool.clear_pending();
        self.link.close();
        tracing::info!(
            node_id = %self.node_id,
            code = ?self.terminate_code(),
            "node session terminated"
        );
    }

    fn set_terminate_code(&self, code: TerminateCode) {
        self.terminate_code.store(code.code(), Ordering::SeqCst);
    }

    fn terminate_code(&self) -> TerminateCode {
        TerminateCode::from_code(self.terminate_code.load(Ordering::SeqCst))
    }

    fn message_pool(&self) -> &NodeMessagePool {
        &self.pool
    }
}
