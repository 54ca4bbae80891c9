//! cloudhubd — cloud hub replica daemon.
//!
//! Owns the replica identity, the node session table and the local status
//! API. Edge transports register their sessions with the shared
//! `SessionManager` handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use cloudhub_core::{HubConfig, Identity};
use cloudhub_session::{ConnectionManager, SessionManager, TerminateCode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = HubConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = HubConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HubConfig::default()
    });
    if let Err(e) = config.resolve_node_id() {
        tracing::error!(error = %e, "failed to read node id file");
    }

    tracing::info!(
        id_type = %config.identity.id_type,
        node_limit = config.hub.node_limit,
        "cloudhubd starting"
    );

    // Identity
    let identity = Arc::new(
        Identity::generate(&config.identity, &config.hub)
            .context("failed to generate cloud identity")?,
    );

    // Shared state
    let sessions = Arc::new(SessionManager::new(identity.clone(), config.hub.node_limit));
    let connections = Arc::new(ConnectionManager::new(identity.clone()));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let session_printer = {
        let sessions = sessions.clone();
        let connections = connections.clone();
        let period = config.session.keepalive_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                connections.sync_from_sessions(&sessions);
                tracing::info!(
                    count = sessions.node_number(),
                    limit = sessions.node_limit(),
                    reach_limit = sessions.reach_limit(),
                    "session table snapshot"
                );
                for s in sessions.sessions() {
                    tracing::debug!(
                        node_id = %s.node_id(),
                        cloud_id = %s.connected_cloud_id(),
                        pending_acks = s.message_pool().pending_acks(),
                        "  session"
                    );
                }
            }
        })
    };

    // Status HTTP endpoint
    let api_port = config.hub.api_port;
    let api_server = {
        let state = cloudhub_api::ApiState {
            sessions: sessions.clone(),
            connections: connections.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = cloudhub_api::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = session_printer     => tracing::error!("session printer exited: {:?}", r),
        r = api_server          => tracing::error!("status server exited: {:?}", r),
    }

    let terminated = sessions.terminate_all(TerminateCode::Shutdown);
    // let session loops observe termination before the runtime drops them
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(terminated, cloud_id = %identity.id(), "cloudhubd stopped");

    Ok(())
}
