//! WebSocket connector.
//!
//! # Responsibilities
//! - Carry packets over one socket as JSON text frames
//! - Read frames sequentially and dispatch each before reading the next
//! - Outbound only: reconnect with backoff after an unexpected close
//!
//! # Design Decisions
//! - Every socket ("link") has its own cancellation token, a reader loop and
//!   a writer task fed by an mpsc queue; writes are acknowledged so `send`
//!   reports the real write result
//! - Links carry a generation number; events from a replaced link are ignored
//! - A NOTIFY with `rpc-command: off` makes an outbound connector drop the
//!   link and start reconnecting
//! - With a heartbeat, a link pings its peer every interval and is closed
//!   when nothing arrives within the timeout after a ping

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use super::{endpoint_of, lock, Connector, ConnectorState, Protocol, StateCell, StateChange, Target};
use crate::config::HeartbeatConfig;
use crate::error::TransportError;
use crate::net::connection::ConnectorId;
use crate::observability::metrics;
use crate::resilience::{retry, RetryEvent, RetryPolicy};
use crate::rpc::{dispatch, IncomingHandler, OpCode, Packet};

const OUTBOUND_BUFFER: usize = 256;
const PROTOCOL: &str = "ws";
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A frame queued for the writer task, with its write acknowledgement.
pub(crate) struct Outbound {
    frame: OutFrame,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

enum OutFrame {
    Text(String),
    Ping,
}

/// Liveness probing of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between pings.
    pub interval: Duration,
    /// How long a link may stay silent after a ping.
    pub timeout: Duration,
}

impl Heartbeat {
    /// `None` when the heartbeat is disabled.
    pub fn from_config(config: &HeartbeatConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
        }
    }
}

/// What a link cares about in a received message.
pub(crate) enum Frame {
    Text(String),
    Invalid,
    Close,
    Other,
}

/// Common view of the axum and tungstenite message types.
pub(crate) trait WsMessage: Send + Sized + 'static {
    fn text(payload: String) -> Self;
    fn close() -> Self;
    fn ping() -> Self;
    fn into_frame(self) -> Frame;
}

impl WsMessage for axum::extract::ws::Message {
    fn text(payload: String) -> Self {
        Self::Text(payload.into())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn ping() -> Self {
        Self::Ping(Default::default())
    }

    fn into_frame(self) -> Frame {
        match self {
            Self::Text(text) => Frame::Text(text.as_str().to_owned()),
            Self::Binary(bytes) => String::from_utf8(bytes.to_vec()).map_or(Frame::Invalid, Frame::Text),
            Self::Close(_) => Frame::Close,
            _ => Frame::Other,
        }
    }
}

impl WsMessage for tungstenite::Message {
    fn text(payload: String) -> Self {
        Self::Text(payload.into())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn ping() -> Self {
        Self::Ping(Default::default())
    }

    fn into_frame(self) -> Frame {
        match self {
            Self::Text(text) => Frame::Text(text.as_str().to_owned()),
            Self::Binary(bytes) => String::from_utf8(bytes.to_vec()).map_or(Frame::Invalid, Frame::Text),
            Self::Close(_) => Frame::Close,
            _ => Frame::Other,
        }
    }
}

struct Link {
    generation: u64,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

/// Receiving half of a link, consumed by [`WebSocketConnector::run_link`].
pub(crate) struct LinkIo {
    generation: u64,
    outbound: mpsc::Receiver<Outbound>,
    pinger: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

enum Role {
    Accepted,
    Outbound { policy: RetryPolicy },
}

pub struct WebSocketConnector {
    id: ConnectorId,
    me: Weak<WebSocketConnector>,
    role: Role,
    state: StateCell,
    handler: Arc<dyn IncomingHandler>,
    heartbeat: Option<Heartbeat>,
    target: Mutex<Option<Target>>,
    session: Mutex<Option<String>>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    connecting: AtomicBool,
    /// Outbound only; cancelled by `disconnect` to stop reconnecting.
    lifetime: Mutex<Option<CancellationToken>>,
    retry_events: broadcast::Sender<RetryEvent>,
}

impl WebSocketConnector {
    fn build(
        me: Weak<Self>,
        role: Role,
        handler: Arc<dyn IncomingHandler>,
        heartbeat: Option<Heartbeat>,
        target: Option<Target>,
        session: Option<String>,
    ) -> Self {
        let id = ConnectorId::new();
        let (retry_events, _) = broadcast::channel(64);
        Self {
            id,
            me,
            role,
            state: StateCell::new(Protocol::WebSocket, id, ConnectorState::Init),
            handler,
            heartbeat,
            target: Mutex::new(target),
            session: Mutex::new(session),
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            lifetime: Mutex::new(None),
            retry_events,
        }
    }

    /// Client connector that dials out and reconnects according to `policy`,
    /// with the default heartbeat.
    pub fn outbound(handler: Arc<dyn IncomingHandler>, policy: RetryPolicy) -> Arc<Self> {
        Self::outbound_with_heartbeat(handler, policy, Some(Heartbeat::default()))
    }

    pub fn outbound_with_heartbeat(
        handler: Arc<dyn IncomingHandler>,
        policy: RetryPolicy,
        heartbeat: Option<Heartbeat>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self::build(me.clone(), Role::Outbound { policy }, handler, heartbeat, None, None))
    }

    /// Connector for a socket a listener just accepted. Born READY; the
    /// caller drives the returned link with [`Self::run_link`].
    pub(crate) fn accepted(
        session: String,
        peer: String,
        handler: Arc<dyn IncomingHandler>,
        heartbeat: Option<Heartbeat>,
        parent: &CancellationToken,
    ) -> (Arc<Self>, LinkIo) {
        let connector = Arc::new_cyclic(|me| {
            Self::build(
                me.clone(),
                Role::Accepted,
                handler,
                heartbeat,
                Some(Target::new(Protocol::WebSocket, peer)),
                Some(session),
            )
        });
        let io = connector.open_link(parent);
        connector.state.set(ConnectorState::Ready);
        (connector, io)
    }

    /// Failed connect attempts, published while the retry sequence goes on.
    pub fn subscribe_retry_events(&self) -> broadcast::Receiver<RetryEvent> {
        self.retry_events.subscribe()
    }

    fn open_link(&self, parent: &CancellationToken) -> LinkIo {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = parent.child_token();
        *lock(&self.link) = Some(Link {
            generation,
            outbound: tx.clone(),
            cancel: cancel.clone(),
        });
        LinkIo {
            generation,
            outbound: rx,
            pinger: tx,
            cancel,
        }
    }

    /// Close the current link and forget it; no reconnect follows.
    fn close_link(&self) {
        if let Some(link) = lock(&self.link).take() {
            link.cancel.cancel();
        }
    }

    /// Pump one socket until it closes or its token fires.
    pub(crate) async fn run_link<S, M, E>(self: Arc<Self>, socket: S, io: LinkIo)
    where
        S: Stream<Item = Result<M, E>> + Sink<M> + Send + 'static,
        <S as Sink<M>>::Error: Display + Send,
        M: WsMessage,
        E: Display + Send + 'static,
    {
        let LinkIo {
            generation,
            outbound,
            pinger,
            cancel,
        } = io;
        let (sink, mut stream) = socket.split();
        let writer = tokio::spawn(write_loop(sink, outbound, cancel.clone()));

        let mut ticker = self.heartbeat.map(|heartbeat| heartbeat.ticker());
        let mut silent_until: Option<Instant> = None;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = next_tick(&mut ticker) => {
                    if silent_until.is_none() {
                        if let Some(heartbeat) = self.heartbeat {
                            silent_until = Some(Instant::now() + heartbeat.timeout);
                        }
                        let (ack, _) = oneshot::channel();
                        let _ = pinger.try_send(Outbound { frame: OutFrame::Ping, ack });
                    }
                    continue;
                }
                _ = expire(silent_until) => {
                    metrics::record_heartbeat_timeout(PROTOCOL);
                    tracing::warn!(connector_id = %self.id, "Peer missed heartbeat, closing link");
                    break;
                }
                frame = stream.next() => frame,
            };
            silent_until = None;
            match frame {
                Some(Ok(message)) => match message.into_frame() {
                    Frame::Text(text) => self.handle_text(&text).await,
                    Frame::Invalid => {
                        metrics::record_decode_failure(PROTOCOL, "invalid_utf8");
                        tracing::warn!(connector_id = %self.id, "Dropping non UTF-8 frame");
                    }
                    Frame::Close => break,
                    Frame::Other => {}
                },
                Some(Err(e)) => {
                    tracing::debug!(connector_id = %self.id, error = %e, "WebSocket read failed");
                    break;
                }
                None => break,
            }
        }

        cancel.cancel();
        let _ = writer.await;
        self.on_link_closed(generation);
    }

    async fn handle_text(&self, text: &str) {
        let packet = match Packet::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                metrics::record_decode_failure(PROTOCOL, e.code());
                tracing::warn!(connector_id = %self.id, error = %e, "Dropping undecodable frame");
                return;
            }
        };
        metrics::record_packet(PROTOCOL, "in", packet.opcode.as_str());

        if matches!(self.role, Role::Outbound { .. }) && packet.is_off_command() {
            tracing::info!(
                connector_id = %self.id,
                endpoint = %endpoint_of(&lock(&self.target)),
                "Peer is shutting down, dropping link"
            );
            if let Some(link) = lock(&self.link).as_ref() {
                link.cancel.cancel();
            }
            return;
        }

        let Some(me) = self.me.upgrade() else {
            return;
        };
        let session = self.session().unwrap_or_default();
        dispatch(self.handler.as_ref(), packet, &session, me).await;
    }

    fn on_link_closed(&self, generation: u64) {
        {
            let mut link = lock(&self.link);
            match link.as_ref() {
                Some(current) if current.generation == generation => *link = None,
                _ => return,
            }
        }

        match &self.role {
            Role::Accepted => {
                self.state.set(ConnectorState::Closed);
            }
            Role::Outbound { .. } => {
                let lifetime = lock(&self.lifetime).clone();
                match lifetime {
                    Some(token) if !token.is_cancelled() => {
                        if self.state.set(ConnectorState::Reconnecting) {
                            tracing::warn!(
                                connector_id = %self.id,
                                endpoint = %endpoint_of(&lock(&self.target)),
                                "WebSocket link lost, reconnecting"
                            );
                            self.spawn_reconnect(token);
                        }
                    }
                    _ => {
                        self.state.set(ConnectorState::Closed);
                    }
                }
            }
        }
    }

    fn spawn_reconnect(&self, token: CancellationToken) {
        let (Some(me), Some(target)) = (self.me.upgrade(), self.target()) else {
            return;
        };
        tokio::spawn(async move {
            match me.establish(&target, &token).await {
                Ok(()) => {}
                Err(TransportError::Cancelled) => {
                    me.state.set(ConnectorState::Closed);
                }
                Err(e) => {
                    tracing::error!(
                        connector_id = %me.id,
                        endpoint = %target.endpoint,
                        error = %e,
                        "Reconnect abandoned"
                    );
                    me.state.set(terminal_state_for(&e));
                }
            }
        });
    }

    /// Dial `target` with retries, then start pumping the new link.
    async fn establish(&self, target: &Target, token: &CancellationToken) -> Result<(), TransportError> {
        let Role::Outbound { policy } = &self.role else {
            return Err(TransportError::NotSupported("accepted connectors cannot dial out"));
        };
        let endpoint = target.endpoint.as_str();

        let stream = retry(
            policy,
            token,
            |event| {
                metrics::record_connect_failure(PROTOCOL);
                tracing::error!(
                    connector_id = %self.id,
                    endpoint = %endpoint,
                    attempt = event.attempt,
                    error = %event.error,
                    next_retry_ms = event.next_retry.as_millis() as u64,
                    "WebSocket connect failed"
                );
                let _ = self.retry_events.send(event.clone());
            },
            |attempt| async move {
                tracing::info!(endpoint = %endpoint, attempt, "WebSocket connecting");
                connect_once(endpoint).await
            },
        )
        .await?;

        if token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let io = self.open_link(token);
        if !self.state.set(ConnectorState::Ready) && self.state.get() != ConnectorState::Ready {
            self.close_link();
            return Err(TransportError::Cancelled);
        }
        tracing::info!(connector_id = %self.id, endpoint = %endpoint, "WebSocket connected");

        if let Some(me) = self.me.upgrade() {
            tokio::spawn(me.run_link(stream, io));
        }
        Ok(())
    }

    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let mut changes = self.state.subscribe();
        loop {
            match self.state.get() {
                ConnectorState::Ready => return Ok(()),
                state if state.is_terminal() => {
                    return Err(TransportError::TunnelNotAvailable {
                        endpoint: endpoint_of(&lock(&self.target)),
                    })
                }
                _ => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                change = changes.recv() => {
                    if let Err(RecvError::Closed) = change {
                        return Err(TransportError::Cancelled);
                    }
                }
            }
        }
    }

    fn not_available(&self) -> TransportError {
        TransportError::TunnelNotAvailable {
            endpoint: endpoint_of(&lock(&self.target)),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn terminal_state_for(err: &TransportError) -> ConnectorState {
    match err {
        TransportError::Handshake(_) | TransportError::InvalidOptions(_) => ConnectorState::Error,
        _ => ConnectorState::Closed,
    }
}

type ClientStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_once(endpoint: &str) -> Result<ClientStream, TransportError> {
    match tokio_tungstenite::connect_async(endpoint).await {
        Ok((stream, _response)) => Ok(stream),
        Err(tungstenite::Error::Http(response)) => Err(TransportError::Handshake(format!(
            "upgrade rejected with status {}",
            response.status()
        ))),
        Err(e @ (tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_))) => {
            Err(TransportError::Handshake(e.to_string()))
        }
        Err(e) => Err(TransportError::Connection(e.to_string())),
    }
}

async fn write_loop<K, M>(mut sink: K, mut outbound: mpsc::Receiver<Outbound>, cancel: CancellationToken)
where
    K: Sink<M> + Unpin,
    K::Error: Display,
    M: WsMessage,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            next = outbound.recv() => next,
        };
        let Some(Outbound { frame, ack }) = next else {
            break;
        };
        let message = match frame {
            OutFrame::Text(text) => M::text(text),
            OutFrame::Ping => M::ping(),
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ack.send(Err(TransportError::Transport("link closed".to_string())));
                break;
            }
            written = sink.send(message) => written,
        };
        match written {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                let _ = ack.send(Err(TransportError::Transport(e.to_string())));
                cancel.cancel();
                break;
            }
        }
    }
    // A peer that stopped reading must not hold the link open.
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = sink.send(M::close()).await;
        let _ = sink.close().await;
    })
    .await;
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn id(&self) -> ConnectorId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::WebSocket
    }

    fn state(&self) -> ConnectorState {
        self.state.get()
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    fn target(&self) -> Option<Target> {
        lock(&self.target).clone()
    }

    fn session(&self) -> Option<String> {
        lock(&self.session).clone()
    }

    fn is_available(&self) -> bool {
        self.state.get() == ConnectorState::Ready && lock(&self.link).is_some()
    }

    async fn connect(&self, target: &Target, cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.is_available() {
            return Ok(());
        }
        if matches!(self.role, Role::Accepted) {
            return Err(TransportError::NotSupported("accepted connectors cannot dial out"));
        }
        match self.state.get() {
            ConnectorState::Reconnecting => return self.wait_ready(cancel).await,
            state if state.is_terminal() => return Err(self.not_available()),
            _ => {}
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.wait_ready(cancel).await;
        }

        let result = self.connect_fresh(target, cancel).await;
        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn disconnect(&self) {
        if let Some(token) = lock(&self.lifetime).take() {
            token.cancel();
        }
        self.close_link();
        if self.state.set(ConnectorState::Closed) {
            tracing::info!(connector_id = %self.id, "WebSocket connector closed");
        }
    }

    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(self.not_available());
        }
        let text = packet.encode()?;
        self.write(text, packet.opcode).await
    }

    async fn send_raw(&self, _raw: Value) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("websocket connectors only carry packets"))
    }
}

impl WebSocketConnector {
    async fn connect_fresh(&self, target: &Target, cancel: &CancellationToken) -> Result<(), TransportError> {
        let valid = url::Url::parse(&target.endpoint)
            .map(|url| matches!(url.scheme(), "ws" | "wss"))
            .unwrap_or(false);
        if !valid {
            self.state.set(ConnectorState::Error);
            return Err(TransportError::InvalidOptions(format!(
                "not a websocket endpoint: {}",
                target.endpoint
            )));
        }

        *lock(&self.target) = Some(target.clone());
        let token = cancel.child_token();
        *lock(&self.lifetime) = Some(token.clone());

        match self.establish(target, &token).await {
            Ok(()) => Ok(()),
            Err(TransportError::Cancelled) => Err(TransportError::Cancelled),
            Err(e) => {
                self.state.set(terminal_state_for(&e));
                Err(e)
            }
        }
    }

    async fn write(&self, text: String, opcode: OpCode) -> Result<(), TransportError> {
        let outbound = lock(&self.link)
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or_else(|| self.not_available())?;

        let (ack, written) = oneshot::channel();
        outbound
            .send(Outbound {
                frame: OutFrame::Text(text),
                ack,
            })
            .await
            .map_err(|_| TransportError::Transport("link closed".to_string()))?;
        written
            .await
            .map_err(|_| TransportError::Transport("link closed before write".to_string()))??;

        metrics::record_packet(PROTOCOL, "out", opcode.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::EchoHandler;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(40),
            increment_interval: true,
        }
    }

    #[tokio::test]
    async fn send_before_connect_fails_fast() {
        let connector = WebSocketConnector::outbound(Arc::new(EchoHandler), quick_policy(0));
        let err = connector
            .send(Packet::notify("svc", "tick", Value::Null))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::TunnelNotAvailable { .. }));
        assert_eq!(connector.state(), ConnectorState::Init);
    }

    #[tokio::test]
    async fn raw_sends_are_not_supported() {
        let connector = WebSocketConnector::outbound(Arc::new(EchoHandler), quick_policy(0));
        let err = connector.send_raw(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::NotSupported(_)));
    }

    #[tokio::test]
    async fn invalid_endpoint_moves_to_error() {
        let connector = WebSocketConnector::outbound(Arc::new(EchoHandler), quick_policy(0));
        let target = Target::new(Protocol::WebSocket, "http://127.0.0.1:1/ws");

        let err = connector.connect(&target, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidOptions(_)));
        assert_eq!(connector.state(), ConnectorState::Error);
    }

    #[tokio::test]
    async fn bounded_retry_gives_up_and_closes() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let connector = WebSocketConnector::outbound(Arc::new(EchoHandler), quick_policy(2));
        let mut events = connector.subscribe_retry_events();
        let target = Target::new(Protocol::WebSocket, format!("ws://127.0.0.1:{port}/ws"));

        let err = connector.connect(&target, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(connector.state(), ConnectorState::Closed);
        assert_eq!(events.try_recv().unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn cancelling_connect_is_distinguishable() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let connector = WebSocketConnector::outbound(Arc::new(EchoHandler), quick_policy(0));
        let target = Target::new(Protocol::WebSocket, format!("ws://127.0.0.1:{port}/ws"));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let err = connector.connect(&target, &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(!connector.is_available());
    }

    #[tokio::test]
    async fn silent_server_triggers_reconnect() {
        let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            let (tcp, _) = server.accept().await.unwrap();
            let _socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let heartbeat = Heartbeat {
            interval: Duration::from_millis(100),
            timeout: Duration::from_millis(200),
        };
        let connector =
            WebSocketConnector::outbound_with_heartbeat(Arc::new(EchoHandler), quick_policy(0), Some(heartbeat));
        let mut changes = connector.subscribe();
        let target = Target::new(Protocol::WebSocket, format!("ws://127.0.0.1:{port}/ws"));
        connector.connect(&target, &CancellationToken::new()).await.unwrap();

        let reconnecting = tokio::time::timeout(Duration::from_secs(5), async {
            while changes.recv().await.unwrap().to != ConnectorState::Reconnecting {}
        })
        .await;
        assert!(reconnecting.is_ok(), "link to a silent server was kept");

        connector.disconnect().await;
        assert_eq!(connector.state(), ConnectorState::Closed);
        held.abort();
    }

    #[test]
    fn heartbeat_follows_config() {
        let mut config = HeartbeatConfig {
            enabled: true,
            interval_ms: 250,
            timeout_ms: 750,
        };
        assert_eq!(
            Heartbeat::from_config(&config),
            Some(Heartbeat {
                interval: Duration::from_millis(250),
                timeout: Duration::from_millis(750),
            })
        );
        config.enabled = false;
        assert_eq!(Heartbeat::from_config(&config), None);
    }
}
