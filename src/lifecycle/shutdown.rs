//! Shutdown coordination.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::net::Listener;

/// Stop every listener concurrently. Each one drains its own peers within
/// the configured drain timeout.
pub async fn shutdown_listeners(listeners: &[Arc<dyn Listener>]) {
    tracing::info!(listeners = listeners.len(), "Shutting down listeners");
    join_all(listeners.iter().map(|listener| listener.shutdown())).await;
    tracing::info!("All listeners stopped");
}
