//! Shared helpers for integration tests. Everything binds to loopback with
//! OS-assigned ports.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rpc_transport::config::{
    HttpListenerConfig, ListenerOptions, PortBindingConfig, ShutdownConfig, WebSocketListenerConfig,
};
use rpc_transport::connector::{Connector, ConnectorState};
use rpc_transport::resilience::RetryPolicy;
use rpc_transport::rpc::IncomingHandler;
use rpc_transport::{HttpListener, Listener, WebSocketListener};

pub fn shutdown_config() -> ShutdownConfig {
    ShutdownConfig { drain_timeout_secs: 2 }
}

pub async fn start_http(handler: Arc<dyn IncomingHandler>) -> HttpListener {
    start_http_with(HttpListenerConfig::default(), handler).await
}

/// Start an HTTP listener on an OS-assigned loopback port with `config`'s
/// other settings.
pub async fn start_http_with(mut config: HttpListenerConfig, handler: Arc<dyn IncomingHandler>) -> HttpListener {
    config.listener = ListenerOptions::with_port("127.0.0.1", 0);
    let listener = HttpListener::new(config, PortBindingConfig::default(), &shutdown_config(), handler);
    listener.listen().await.expect("http listener should start");
    listener
}

pub async fn start_ws_on(port: u16, handler: Arc<dyn IncomingHandler>) -> WebSocketListener {
    let config = WebSocketListenerConfig {
        listener: ListenerOptions::with_port("127.0.0.1", port),
        ..WebSocketListenerConfig::default()
    };
    start_ws_with(config, handler).await
}

pub async fn start_ws_with(config: WebSocketListenerConfig, handler: Arc<dyn IncomingHandler>) -> WebSocketListener {
    let listener = WebSocketListener::new(config, PortBindingConfig::default(), &shutdown_config(), handler);
    listener.listen().await.expect("websocket listener should start");
    listener
}

pub async fn start_ws(handler: Arc<dyn IncomingHandler>) -> WebSocketListener {
    start_ws_on(0, handler).await
}

/// Reconnect quickly so tests do not wait on production backoff.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        min_interval: Duration::from_millis(20),
        max_interval: Duration::from_millis(100),
        increment_interval: true,
    }
}

pub async fn wait_for_state(connector: &dyn Connector, state: ConnectorState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while connector.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "connector stuck in {} while waiting for {}",
        connector.state(),
        state
    );
}
