//! Boundary with the RPC dispatch layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connector::Connector;
use crate::error::ResponseEnvelope;
use crate::rpc::packet::{OpCode, Packet};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every valid inbound packet together with the session it belongs
/// to and the connector the reply must travel back through.
#[async_trait]
pub trait IncomingHandler: Send + Sync + 'static {
    async fn handle_income_message(
        &self,
        packet: Packet,
        session: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<(), HandlerError>;
}

/// Invoke `handler`, containing any failure at the connector boundary.
pub async fn dispatch(
    handler: &dyn IncomingHandler,
    packet: Packet,
    session: &str,
    connector: Arc<dyn Connector>,
) {
    let opcode = packet.opcode;
    let connector_id = connector.id();
    if let Err(e) = handler.handle_income_message(packet, session, connector).await {
        tracing::error!(
            connector_id = %connector_id,
            session = %session,
            opcode = %opcode,
            error = %e,
            "Incoming message handler failed"
        );
    }
}

/// Answers every REQUEST with `{"error": null, "result": <request payload>}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl IncomingHandler for EchoHandler {
    async fn handle_income_message(
        &self,
        packet: Packet,
        session: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<(), HandlerError> {
        if packet.opcode != OpCode::Request {
            tracing::debug!(session = %session, opcode = %packet.opcode, "Echo handler ignoring packet");
            return Ok(());
        }

        let result = serde_json::to_value(ResponseEnvelope::ok(packet.payload.clone()))?;
        connector.send(Packet::response_to(&packet, result)).await?;
        Ok(())
    }
}

/// A packet observed by a [`ChannelHandler`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub packet: Packet,
    pub session: String,
}

/// Forwards inbound packets to an mpsc channel, optionally replying first.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Delivery>,
    reply: Option<Value>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, reply: None }, rx)
    }

    /// Answer each REQUEST with `result` inside an ok envelope.
    pub fn replying(mut self, result: Value) -> Self {
        self.reply = Some(result);
        self
    }
}

#[async_trait]
impl IncomingHandler for ChannelHandler {
    async fn handle_income_message(
        &self,
        packet: Packet,
        session: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<(), HandlerError> {
        if let (Some(result), OpCode::Request) = (&self.reply, packet.opcode) {
            let payload = serde_json::to_value(ResponseEnvelope::ok(result.clone()))?;
            connector.send(Packet::response_to(&packet, payload)).await?;
        }
        self.tx.send(Delivery {
            packet,
            session: session.to_string(),
        })?;
        Ok(())
    }
}
