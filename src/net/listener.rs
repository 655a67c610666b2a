//! State shared by the HTTP and WebSocket listeners.
//!
//! # Responsibilities
//! - Validate options and bind through the port binder
//! - Track the listener lifecycle and the live connectors keyed by session
//! - Hand out `rpc-id` values and per-link cancellation tokens
//! - Describe the listener (`metadata`) with labels that can change at runtime
//!
//! # Design Decisions
//! - Listener-level tokens are parents of every link token, so one cancel
//!   tears down all sockets
//! - Registration is a guard: dropping it removes the connector from the
//!   map on every exit path, including a cancelled request future
//! - Removal from the connector map checks the connector id; a newer
//!   connector registered under the same session is never evicted

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::validation::check_listener;
use crate::config::{Labels, ListenerOptions, PortBindingConfig};
use crate::connector::{lock, Connector, Protocol};
use crate::error::TransportError;
use crate::net::connection::{ConnectionGuard, ConnectionTracker, ConnectorId};
use crate::net::port::{bind_port, PortSpec};
use crate::observability::metrics;
use crate::rpc::IncomingHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenerState {
    Init,
    /// Binding.
    Pending,
    Ready,
    Stopping,
    Stopped,
    Error,
}

impl ListenerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ListenerState::Init => "INIT",
            ListenerState::Pending => "PENDING",
            ListenerState::Ready => "READY",
            ListenerState::Stopping => "STOPPING",
            ListenerState::Stopped => "STOPPED",
            ListenerState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot describing a listener, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerMetadata {
    pub id: String,
    pub protocol: Protocol,
    pub endpoint: String,
    pub state: ListenerState,
    pub labels: Labels,
}

/// Common surface of every listener.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Bind and start serving. Returns once the listener is READY; only
    /// configuration and bind failures are reported.
    async fn listen(&self) -> Result<(), TransportError>;

    /// Graceful stop; returns once the server task is gone.
    async fn shutdown(&self);

    fn state(&self) -> ListenerState;

    fn metadata(&self) -> ListenerMetadata;

    fn set_labels(&self, labels: Labels);
}

pub struct ListenerCore {
    id: Uuid,
    protocol: Protocol,
    options: ListenerOptions,
    binding: PortBindingConfig,
    entry_path: String,
    state: Mutex<ListenerState>,
    use_port: AtomicU16,
    labels: ArcSwap<Labels>,
    connectors: Arc<DashMap<String, Arc<dyn Connector>>>,
    tracker: ConnectionTracker,
    handler: Arc<dyn IncomingHandler>,
    links: CancellationToken,
    server: CancellationToken,
    next_rpc_id: AtomicU64,
}

impl ListenerCore {
    pub fn new(
        protocol: Protocol,
        options: ListenerOptions,
        binding: PortBindingConfig,
        entry_path: impl Into<String>,
        handler: Arc<dyn IncomingHandler>,
    ) -> Self {
        let labels = ArcSwap::from_pointee(options.labels.clone());
        Self {
            id: Uuid::new_v4(),
            protocol,
            options,
            binding,
            entry_path: entry_path.into(),
            state: Mutex::new(ListenerState::Init),
            use_port: AtomicU16::new(0),
            labels,
            connectors: Arc::new(DashMap::new()),
            tracker: ConnectionTracker::new(),
            handler,
            links: CancellationToken::new(),
            server: CancellationToken::new(),
            next_rpc_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ListenerState {
        *lock(&self.state)
    }

    pub fn set_state(&self, next: ListenerState) {
        let previous = std::mem::replace(&mut *lock(&self.state), next);
        if previous != next {
            tracing::info!(
                listener_id = %self.id,
                protocol = %self.protocol,
                from = %previous,
                to = %next,
                "Listener state changed"
            );
        }
    }

    /// Validate options and bind. Moves through PENDING; ERROR on failure.
    pub async fn bind(&self) -> Result<TcpListener, TransportError> {
        if self.state() != ListenerState::Init {
            return Err(TransportError::InvalidOptions(format!(
                "listener already started ({})",
                self.state()
            )));
        }
        if let Err(errors) = check_listener("listener", &self.options) {
            self.set_state(ListenerState::Error);
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            return Err(TransportError::InvalidOptions(message));
        }

        self.set_state(ListenerState::Pending);
        let bound = async {
            let spec = PortSpec::from_options(&self.options)?;
            let listener = bind_port(&self.options.host, spec, &self.binding).await?;
            let addr = listener.local_addr().map_err(TransportError::Bind)?;
            Ok::<_, TransportError>((listener, addr))
        }
        .await;

        match bound {
            Ok((listener, addr)) => {
                self.use_port.store(addr.port(), Ordering::SeqCst);
                tracing::info!(
                    listener_id = %self.id,
                    protocol = %self.protocol,
                    address = %addr,
                    "Listener bound"
                );
                Ok(listener)
            }
            Err(e) => {
                tracing::error!(listener_id = %self.id, protocol = %self.protocol, error = %e, "Bind failed");
                self.set_state(ListenerState::Error);
                Err(e)
            }
        }
    }

    /// Server task failed after a successful bind.
    pub fn on_server_error(&self, error: &dyn std::fmt::Display) {
        tracing::error!(listener_id = %self.id, protocol = %self.protocol, error = %error, "Listener server failed");
        self.set_state(ListenerState::Error);
    }

    pub fn use_port(&self) -> u16 {
        self.use_port.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Http => "http",
            Protocol::WebSocket => "ws",
        };
        format!(
            "{scheme}://{}:{}{}",
            self.options.advertised_host(),
            self.use_port(),
            self.entry_path
        )
    }

    pub fn metadata(&self) -> ListenerMetadata {
        ListenerMetadata {
            id: self.id.to_string(),
            protocol: self.protocol,
            endpoint: self.endpoint(),
            state: self.state(),
            labels: Labels::clone(&self.labels.load()),
        }
    }

    pub fn set_labels(&self, labels: Labels) {
        self.labels.store(Arc::new(labels));
    }

    pub fn handler(&self) -> Arc<dyn IncomingHandler> {
        Arc::clone(&self.handler)
    }

    pub fn next_rpc_id(&self) -> u64 {
        self.next_rpc_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Parent token of every link this listener owns.
    pub fn links(&self) -> &CancellationToken {
        &self.links
    }

    /// Fires when the server must stop accepting.
    pub fn server(&self) -> &CancellationToken {
        &self.server
    }

    /// Make `connector` reachable under `session` until the returned
    /// registration is dropped.
    pub fn register(&self, session: String, connector: Arc<dyn Connector>) -> Registration {
        let id = connector.id();
        let channel = self.tracker.track(id);
        self.connectors.insert(session.clone(), connector);
        metrics::record_active_connectors(self.protocol.as_str(), self.connectors.len());
        Registration {
            connectors: Arc::clone(&self.connectors),
            protocol: self.protocol,
            session,
            id,
            _channel: channel,
        }
    }

    pub fn connector(&self, session: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(session).map(|entry| Arc::clone(entry.value()))
    }

    pub fn connectors(&self) -> Vec<Arc<dyn Connector>> {
        self.connectors.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn active_count(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait for live channels to go away, bounded by `limit`.
    pub async fn drain(&self, limit: Duration) -> bool {
        let drained = self.tracker.wait_drained(limit).await;
        if !drained {
            tracing::warn!(
                listener_id = %self.id,
                protocol = %self.protocol,
                remaining = self.tracker.active_count(),
                "Drain timeout reached"
            );
        }
        drained
    }
}

/// A connector's entry in a listener's session map.
pub struct Registration {
    connectors: Arc<DashMap<String, Arc<dyn Connector>>>,
    protocol: Protocol,
    session: String,
    id: ConnectorId,
    _channel: ConnectionGuard,
}

impl Registration {
    pub fn session(&self) -> &str {
        &self.session
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.id;
        self.connectors.remove_if(&self.session, |_, current| current.id() == id);
        metrics::record_active_connectors(self.protocol.as_str(), self.connectors.len());
    }
}
