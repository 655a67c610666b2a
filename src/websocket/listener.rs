//! WebSocket listener.
//!
//! # Responsibilities
//! - Accept upgrades on the entry path, one `WebSocketConnector` per socket
//! - Give every socket a fresh session id
//! - Shut down gracefully: tell peers to leave, wait for them within the
//!   drain timeout, then close what is left
//!
//! # Design Decisions
//! - Upgrades completing while the listener is not READY are closed at once
//! - Accepted links ping their peer per the configured heartbeat
//! - Notifying peers and draining share one drain budget; a peer that
//!   stops reading cannot hold shutdown open

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::{Labels, PortBindingConfig, ShutdownConfig, WebSocketListenerConfig};
use crate::connector::{lock, Connector, Heartbeat, Protocol, WebSocketConnector};
use crate::error::TransportError;
use crate::net::{Listener, ListenerCore, ListenerMetadata, ListenerState};
use crate::rpc::{IncomingHandler, OpCode, Packet, COMMAND_HEADER, COMMAND_OFF};

#[derive(Clone)]
struct AcceptState {
    core: Arc<ListenerCore>,
    heartbeat: Option<Heartbeat>,
}

pub struct WebSocketListener {
    core: Arc<ListenerCore>,
    entry_path: String,
    heartbeat: Option<Heartbeat>,
    drain_timeout: Duration,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketListener {
    pub fn new(
        config: WebSocketListenerConfig,
        binding: PortBindingConfig,
        shutdown: &ShutdownConfig,
        handler: Arc<dyn IncomingHandler>,
    ) -> Self {
        let core = ListenerCore::new(
            Protocol::WebSocket,
            config.listener,
            binding,
            config.entry_path.clone(),
            handler,
        );
        Self {
            core: Arc::new(core),
            entry_path: config.entry_path,
            heartbeat: Heartbeat::from_config(&config.heartbeat),
            drain_timeout: Duration::from_secs(shutdown.drain_timeout_secs),
            server_task: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &ListenerCore {
        &self.core
    }

    fn router(&self) -> Router {
        Router::new()
            .route(&self.entry_path, get(upgrade_handler))
            .with_state(AcceptState {
                core: Arc::clone(&self.core),
                heartbeat: self.heartbeat,
            })
            .layer(TraceLayer::new_for_http())
    }
}

async fn upgrade_handler(
    State(state): State<AcceptState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| accept(state.core, state.heartbeat, socket, peer))
}

async fn accept(core: Arc<ListenerCore>, heartbeat: Option<Heartbeat>, mut socket: WebSocket, peer: SocketAddr) {
    if core.state() != ListenerState::Ready {
        tracing::debug!(peer = %peer, state = %core.state(), "Closing upgrade on a listener that is not ready");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let session = Uuid::new_v4().to_string();
    let (connector, io) =
        WebSocketConnector::accepted(session.clone(), peer.to_string(), core.handler(), heartbeat, core.links());
    let registration = core.register(session.clone(), connector.clone());
    tracing::info!(
        connector_id = %connector.id(),
        session = %session,
        peer = %peer,
        "WebSocket peer connected"
    );

    Arc::clone(&connector).run_link(socket, io).await;

    drop(registration);
    tracing::info!(connector_id = %connector.id(), session = %session, "WebSocket peer disconnected");
}

#[async_trait]
impl Listener for WebSocketListener {
    async fn listen(&self) -> Result<(), TransportError> {
        let listener = self.core.bind().await?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        let core = Arc::clone(&self.core);
        let stop = self.core.server().clone();
        self.core.set_state(ListenerState::Ready);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            match served {
                Ok(()) => tracing::info!(endpoint = %core.endpoint(), "WebSocket server stopped"),
                Err(e) => core.on_server_error(&e),
            }
        });
        *lock(&self.server_task) = Some(task);

        tracing::info!(endpoint = %self.core.endpoint(), "WebSocket listener ready");
        Ok(())
    }

    async fn shutdown(&self) {
        if !matches!(self.core.state(), ListenerState::Ready | ListenerState::Error) {
            return;
        }
        self.core.set_state(ListenerState::Stopping);

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        let off = Packet::new(OpCode::Notify, Value::Null).with_header(COMMAND_HEADER, COMMAND_OFF);
        let peers = self.core.connectors();
        tracing::info!(endpoint = %self.core.endpoint(), peers = peers.len(), "Asking peers to disconnect");
        let notices = join_all(peers.iter().map(|connector| {
            let off = off.clone();
            async move {
                if let Err(e) = connector.send(off).await {
                    tracing::debug!(connector_id = %connector.id(), error = %e, "Could not notify peer");
                }
            }
        }));
        if tokio::time::timeout_at(deadline, notices).await.is_err() {
            tracing::warn!(endpoint = %self.core.endpoint(), "Peers did not take the disconnect notice in time");
        }

        self.core.server().cancel();
        self.core
            .drain(deadline.saturating_duration_since(tokio::time::Instant::now()))
            .await;
        self.core.links().cancel();

        let task = lock(&self.server_task).take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.drain_timeout, task).await.is_err() {
                tracing::warn!(endpoint = %self.core.endpoint(), "WebSocket server did not stop, aborting");
                abort.abort();
            }
        }
        self.core.set_state(ListenerState::Stopped);
    }

    fn state(&self) -> ListenerState {
        self.core.state()
    }

    fn metadata(&self) -> ListenerMetadata {
        self.core.metadata()
    }

    fn set_labels(&self, labels: Labels) {
        self.core.set_labels(labels);
    }
}
