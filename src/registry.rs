//! Protocol → outbound connector factories.
//!
//! # Responsibilities
//! - Map each protocol to a factory building a fresh client connector
//! - Ship defaults for `http` and `ws` built from `ClientConfig`
//!
//! # Design Decisions
//! - An explicit value passed to whoever needs it; nothing global
//! - Registering a protocol twice replaces the earlier factory

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::connector::{Connector, Heartbeat, HttpClientConnector, Protocol, WebSocketConnector};
use crate::error::TransportError;
use crate::resilience::RetryPolicy;
use crate::rpc::IncomingHandler;

pub type ConnectorFactory = Arc<dyn Fn(Arc<dyn IncomingHandler>) -> Arc<dyn Connector> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<Protocol, ConnectorFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `http` and `ws` client connectors configured from `config`.
    pub fn with_defaults(config: &ClientConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.reconnect);
        let heartbeat = Heartbeat::from_config(&config.heartbeat);
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let mut registry = Self::new();
        registry.register(Protocol::WebSocket, move |handler| {
            WebSocketConnector::outbound_with_heartbeat(handler, policy.clone(), heartbeat) as Arc<dyn Connector>
        });
        registry.register(Protocol::Http, move |handler| {
            HttpClientConnector::new(handler, timeout) as Arc<dyn Connector>
        });
        registry
    }

    pub fn register<F>(&mut self, protocol: Protocol, factory: F)
    where
        F: Fn(Arc<dyn IncomingHandler>) -> Arc<dyn Connector> + Send + Sync + 'static,
    {
        if self.factories.insert(protocol, Arc::new(factory)).is_some() {
            tracing::debug!(protocol = %protocol, "Replaced connector factory");
        }
    }

    /// Build a connector for `protocol` that feeds inbound packets to `handler`.
    pub fn create(
        &self,
        protocol: Protocol,
        handler: Arc<dyn IncomingHandler>,
    ) -> Result<Arc<dyn Connector>, TransportError> {
        let factory = self.factories.get(&protocol).ok_or_else(|| {
            TransportError::InvalidOptions(format!("no transport registered for {protocol}"))
        })?;
        Ok(factory(handler))
    }

    pub fn contains(&self, protocol: Protocol) -> bool {
        self.factories.contains_key(&protocol)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("protocols", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorState;
    use crate::rpc::EchoHandler;

    #[test]
    fn defaults_cover_both_protocols() {
        let registry = TransportRegistry::with_defaults(&ClientConfig::default());
        for protocol in [Protocol::Http, Protocol::WebSocket] {
            let connector = registry.create(protocol, Arc::new(EchoHandler)).unwrap();
            assert_eq!(connector.protocol(), protocol);
            assert_eq!(connector.state(), ConnectorState::Init);
        }
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let registry = TransportRegistry::new();
        assert!(!registry.contains(Protocol::Http));
        assert!(matches!(
            registry.create(Protocol::Http, Arc::new(EchoHandler)),
            Err(TransportError::InvalidOptions(_))
        ));
    }

    #[test]
    fn factories_can_be_replaced() {
        let mut registry = TransportRegistry::with_defaults(&ClientConfig::default());
        registry.register(Protocol::WebSocket, |handler| {
            HttpClientConnector::new(handler, Duration::from_secs(1)) as Arc<dyn Connector>
        });

        let connector = registry.create(Protocol::WebSocket, Arc::new(EchoHandler)).unwrap();
        assert_eq!(connector.protocol(), Protocol::Http);
    }
}
