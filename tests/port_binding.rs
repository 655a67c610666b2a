//! Listener binding over port ranges.

use std::sync::Arc;

use rpc_transport::config::{ListenerOptions, PortBindingConfig, ShutdownConfig, WebSocketListenerConfig};
use rpc_transport::rpc::EchoHandler;
use rpc_transport::{Listener, ListenerState, TransportError, WebSocketListener};

/// `len` consecutive loopback ports that were free a moment ago.
fn free_window(len: u16) -> u16 {
    loop {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = free.local_addr().unwrap().port();
        drop(free);
        if base.checked_add(len).is_none() {
            continue;
        }
        let held: Vec<_> = (base..base + len)
            .map_while(|port| std::net::TcpListener::bind(("127.0.0.1", port)).ok())
            .collect();
        if held.len() == len as usize {
            return base;
        }
    }
}

fn ranged(min: u16, max: u16) -> WebSocketListener {
    let config = WebSocketListenerConfig {
        listener: ListenerOptions::with_range("127.0.0.1", min, max),
        ..WebSocketListenerConfig::default()
    };
    let binding = PortBindingConfig {
        retry_delay_ms: 1,
        max_step: 2,
    };
    WebSocketListener::new(config, binding, &ShutdownConfig::default(), Arc::new(EchoHandler))
}

#[tokio::test]
async fn listeners_share_a_range_without_collisions() {
    let min = free_window(4);
    let max = min + 3;

    let mut listeners = Vec::new();
    for _ in 0..3 {
        let listener = ranged(min, max);
        listener.listen().await.unwrap();
        listeners.push(listener);
    }

    let mut ports: Vec<u16> = listeners.iter().map(|l| l.core().use_port()).collect();
    assert!(ports.iter().all(|port| (min..=max).contains(port)));
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 3);

    for listener in &listeners {
        let endpoint = listener.metadata().endpoint;
        assert!(endpoint.ends_with(&format!(":{}/ws", listener.core().use_port())));
        listener.shutdown().await;
    }
}

#[tokio::test]
async fn exhausted_range_puts_listener_in_error() {
    let min = free_window(2);
    let max = min + 1;
    let _held: Vec<_> = (min..=max)
        .map(|port| std::net::TcpListener::bind(("127.0.0.1", port)).unwrap())
        .collect();

    let listener = ranged(min, max);
    let err = listener.listen().await.unwrap_err();

    assert!(matches!(err, TransportError::NoAvailablePort { .. }));
    assert_eq!(listener.state(), ListenerState::Error);
}
