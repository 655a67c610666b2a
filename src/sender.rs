//! Outbound RPC caller.
//!
//! # Responsibilities
//! - Own one registry-built client connector for a target
//! - Stamp every REQUEST with a unique `rpc-id` and wait for the RESPONSE
//!   carrying the same id, bounded by the request timeout
//! - Forward every other inbound packet to an optional handler
//!
//! # Design Decisions
//! - A response without a waiting caller is logged and dropped
//! - The pending entry is removed on every exit path, success or not

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::connector::{Connector, Target};
use crate::error::TransportError;
use crate::registry::TransportRegistry;
use crate::rpc::{HandlerError, IncomingHandler, OpCode, Packet, RPC_ID_HEADER};

struct PendingResponses {
    waiting: DashMap<u64, oneshot::Sender<Packet>>,
    inbound: Option<Arc<dyn IncomingHandler>>,
}

#[async_trait]
impl IncomingHandler for PendingResponses {
    async fn handle_income_message(
        &self,
        packet: Packet,
        session: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<(), HandlerError> {
        if packet.opcode == OpCode::Response {
            let waiter = packet
                .correlation_id()
                .and_then(|id| self.waiting.remove(&id))
                .map(|(_, tx)| tx);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(packet);
                }
                None => tracing::debug!(
                    connector_id = %connector.id(),
                    rpc_id = ?packet.correlation_id(),
                    "Dropping response nobody waits for"
                ),
            }
            return Ok(());
        }

        match &self.inbound {
            Some(handler) => handler.handle_income_message(packet, session, connector).await,
            None => Ok(()),
        }
    }
}

pub struct Sender {
    target: Target,
    connector: Arc<dyn Connector>,
    pending: Arc<PendingResponses>,
    next_id: AtomicU64,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl Sender {
    pub fn new(
        registry: &TransportRegistry,
        target: Target,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        Self::build(registry, target, request_timeout, None)
    }

    /// Like [`Sender::new`], passing inbound REQUEST and NOTIFY packets
    /// from the peer to `handler`.
    pub fn with_handler(
        registry: &TransportRegistry,
        target: Target,
        request_timeout: Duration,
        handler: Arc<dyn IncomingHandler>,
    ) -> Result<Self, TransportError> {
        Self::build(registry, target, request_timeout, Some(handler))
    }

    fn build(
        registry: &TransportRegistry,
        target: Target,
        request_timeout: Duration,
        inbound: Option<Arc<dyn IncomingHandler>>,
    ) -> Result<Self, TransportError> {
        let pending = Arc::new(PendingResponses {
            waiting: DashMap::new(),
            inbound,
        });
        let connector = registry.create(target.protocol, pending.clone())?;
        Ok(Self {
            target,
            connector,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            cancel: CancellationToken::new(),
        })
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Connect the underlying connector.
    pub async fn start(&self) -> Result<(), TransportError> {
        tracing::info!(endpoint = %self.target.endpoint, protocol = %self.target.protocol, "Sender starting");
        self.connector.connect(&self.target, &self.cancel).await
    }

    /// Send a REQUEST and wait for its RESPONSE.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        payload: Value,
    ) -> Result<Packet, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let packet = Packet::request(service, method, payload).with_header(RPC_ID_HEADER, id);

        let (tx, rx) = oneshot::channel();
        self.pending.waiting.insert(id, tx);

        let outcome = async {
            self.connector.send(packet).await?;
            match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(TransportError::Transport("response channel closed".to_string())),
                Err(_) => Err(TransportError::Timeout(self.request_timeout.as_millis() as u64)),
            }
        }
        .await;

        self.pending.waiting.remove(&id);
        if let Err(e) = &outcome {
            tracing::warn!(service, method, rpc_id = id, error = %e, "Call failed");
        }
        outcome
    }

    /// Fire-and-forget NOTIFY.
    pub async fn notify(&self, service: &str, method: &str, payload: Value) -> Result<(), TransportError> {
        self.connector.send(Packet::notify(service, method, payload)).await
    }

    /// Cancel any connect in progress and close the connector.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.connector.disconnect().await;
        self.pending.waiting.clear();
        tracing::info!(endpoint = %self.target.endpoint, "Sender stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::connector::Protocol;
    use crate::rpc::{ChannelHandler, EchoHandler};

    #[tokio::test]
    async fn call_before_start_fails_fast() {
        let registry = TransportRegistry::with_defaults(&ClientConfig::default());
        let target = Target::new(Protocol::Http, "http://127.0.0.1:1");
        let sender = Sender::new(&registry, target, Duration::from_secs(1)).unwrap();

        let err = sender.call("svc", "m", Value::Null).await.unwrap_err();
        assert!(matches!(err, TransportError::TunnelNotAvailable { .. }));
        assert!(sender.pending.waiting.is_empty());
    }

    #[tokio::test]
    async fn pending_responses_match_by_id() {
        let (inbound, mut rx) = ChannelHandler::new();
        let pending = PendingResponses {
            waiting: DashMap::new(),
            inbound: Some(Arc::new(inbound)),
        };
        let (tx, waiter) = oneshot::channel();
        pending.waiting.insert(3, tx);

        let connector: Arc<dyn Connector> =
            crate::connector::HttpConnector::inbound("s".into(), "peer".into(), Arc::new(EchoHandler));
        let response = Packet::new(OpCode::Response, Value::Bool(true)).with_header(RPC_ID_HEADER, 3u64);
        pending
            .handle_income_message(response, "s", connector.clone())
            .await
            .unwrap();
        assert_eq!(waiter.await.unwrap().payload, Value::Bool(true));

        let notify = Packet::notify("svc", "tick", Value::Null);
        pending.handle_income_message(notify, "s", connector).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().packet.method.as_deref(), Some("tick"));
    }
}
