//! HTTP listener.
//!
//! # Responsibilities
//! - Serve every path and verb through one fallback handler
//! - Build a throwaway `HttpConnector` per request, registered under the
//!   request's session for the duration of the cycle
//! - Bound every cycle by the request timeout and answer an overrun with
//!   the `TIMEOUT` envelope
//! - Stop gracefully: stop accepting, let in-flight requests finish within
//!   the drain timeout

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequest, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{HttpListenerConfig, Labels, PortBindingConfig, ShutdownConfig};
use crate::connector::{lock, Connector, HttpConnector, Protocol};
use crate::error::TransportError;
use crate::http::session::{session_middleware, Session};
use crate::net::{Listener, ListenerCore, ListenerMetadata, ListenerState, Registration};
use crate::rpc::IncomingHandler;

#[derive(Clone)]
struct AppState {
    core: Arc<ListenerCore>,
    request_timeout: Duration,
}

pub struct HttpListener {
    core: Arc<ListenerCore>,
    config: HttpListenerConfig,
    drain_timeout: Duration,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpListener {
    pub fn new(
        config: HttpListenerConfig,
        binding: PortBindingConfig,
        shutdown: &ShutdownConfig,
        handler: Arc<dyn IncomingHandler>,
    ) -> Self {
        let core = ListenerCore::new(Protocol::Http, config.listener.clone(), binding, "", handler);
        Self {
            core: Arc::new(core),
            config,
            drain_timeout: Duration::from_secs(shutdown.drain_timeout_secs),
            server_task: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &ListenerCore {
        &self.core
    }

    fn router(&self) -> Router {
        let state = AppState {
            core: Arc::clone(&self.core),
            request_timeout: Duration::from_secs(self.config.request_timeout_secs),
        };
        Router::new().fallback(rpc_handler).with_state(state).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(session_middleware))
                .layer(DefaultBodyLimit::max(self.config.max_body_size)),
        )
    }
}

/// One request cycle. Dropping it closes the connector and removes it from
/// the session map, whether the cycle finished, timed out or was abandoned
/// by the client.
struct Cycle {
    connector: Arc<HttpConnector>,
    _registration: Registration,
}

impl Drop for Cycle {
    fn drop(&mut self) {
        self.connector.close();
    }
}

async fn rpc_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(session): Extension<Session>,
    request: Request<Body>,
) -> Response {
    let connector = HttpConnector::inbound(session.id.clone(), peer.to_string(), state.core.handler());
    let cycle = Cycle {
        _registration: state.core.register(session.id.clone(), connector.clone()),
        connector,
    };
    tracing::debug!(
        connector_id = %cycle.connector.id(),
        session = %session.id,
        method = %request.method(),
        path = %request.uri().path(),
        "HTTP request accepted"
    );

    match tokio::time::timeout(state.request_timeout, serve(&state, &cycle.connector, peer, request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                connector_id = %cycle.connector.id(),
                session = %session.id,
                timeout_ms = state.request_timeout.as_millis() as u64,
                "Request cycle timed out"
            );
            TransportError::Timeout(state.request_timeout.as_millis() as u64).into_response()
        }
    }
}

async fn serve(state: &AppState, connector: &HttpConnector, peer: SocketAddr, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();
    let body = match Bytes::from_request(request, &()).await {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(peer = %peer, "Request body over the size limit");
            return TransportError::PayloadTooLarge.into_response();
        }
        Err(rejection) => {
            tracing::warn!(peer = %peer, error = %rejection.body_text(), "Failed to read request body");
            return TransportError::Transport(rejection.body_text()).into_response();
        }
    };

    let rpc_id = state.core.next_rpc_id();
    connector.handle(&method, &uri, &headers, &body, rpc_id).await;
    connector.take_response()
}

#[async_trait]
impl Listener for HttpListener {
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
                Ok(()) => tracing::info!(endpoint = %core.endpoint(), "HTTP server stopped"),
                Err(e) => core.on_server_error(&e),
            }
        });
        *lock(&self.server_task) = Some(task);

        tracing::info!(endpoint = %self.core.endpoint(), "HTTP listener ready");
        Ok(())
    }

    async fn shutdown(&self) {
        if !matches!(self.core.state(), ListenerState::Ready | ListenerState::Error) {
            return;
        }
        self.core.set_state(ListenerState::Stopping);
        self.core.server().cancel();

        let task = lock(&self.server_task).take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.drain_timeout, task).await.is_err() {
                tracing::warn!(
                    endpoint = %self.core.endpoint(),
                    in_flight = self.core.active_count(),
                    "In-flight requests did not finish, aborting"
                );
                abort.abort();
            }
        }
        self.core.links().cancel();
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
