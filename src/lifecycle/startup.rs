//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the enabled listeners from configuration
//! - Start them in order, failing fast on the first bind error
//!
//! # Design Decisions
//! - Listeners already started are stopped again when a later one fails

use std::sync::Arc;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::http::HttpListener;
use crate::lifecycle::shutdown::shutdown_listeners;
use crate::net::Listener;
use crate::rpc::IncomingHandler;
use crate::websocket::WebSocketListener;

pub async fn start_listeners(
    config: &TransportConfig,
    handler: Arc<dyn IncomingHandler>,
) -> Result<Vec<Arc<dyn Listener>>, TransportError> {
    let mut pending: Vec<Arc<dyn Listener>> = Vec::new();
    if config.http.enabled {
        pending.push(Arc::new(HttpListener::new(
            config.http.clone(),
            config.port_binding.clone(),
            &config.shutdown,
            Arc::clone(&handler),
        )));
    }
    if config.websocket.enabled {
        pending.push(Arc::new(WebSocketListener::new(
            config.websocket.clone(),
            config.port_binding.clone(),
            &config.shutdown,
            Arc::clone(&handler),
        )));
    }

    let mut started = Vec::with_capacity(pending.len());
    for listener in pending {
        if let Err(e) = listener.listen().await {
            tracing::error!(protocol = %listener.metadata().protocol, error = %e, "Listener failed to start");
            shutdown_listeners(&started).await;
            return Err(e);
        }
        started.push(listener);
    }
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerOptions;
    use crate::net::ListenerState;
    use crate::rpc::EchoHandler;

    fn loopback_config() -> TransportConfig {
        let mut config = TransportConfig::default();
        config.http.listener = ListenerOptions::with_port("127.0.0.1", 0);
        config.websocket.listener = ListenerOptions::with_port("127.0.0.1", 0);
        config.shutdown.drain_timeout_secs = 1;
        config
    }

    #[tokio::test]
    async fn starts_and_stops_enabled_listeners() {
        let listeners = start_listeners(&loopback_config(), Arc::new(EchoHandler)).await.unwrap();
        assert_eq!(listeners.len(), 2);
        assert!(listeners.iter().all(|l| l.state() == ListenerState::Ready));

        shutdown_listeners(&listeners).await;
        assert!(listeners.iter().all(|l| l.state() == ListenerState::Stopped));
    }

    #[tokio::test]
    async fn failed_listener_stops_the_others() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = loopback_config();
        config.websocket.listener = ListenerOptions::with_port("127.0.0.1", taken.local_addr().unwrap().port());

        let err = start_listeners(&config, Arc::new(EchoHandler)).await.err().expect("expected start_listeners to fail");
        assert!(matches!(err, TransportError::BindConflict(_)));
    }
}
