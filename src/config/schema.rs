//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! every field has a default, so a minimal file is enough.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form labels attached to listeners and targets.
pub type Labels = BTreeMap<String, String>;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// HTTP request/response listener.
    pub http: HttpListenerConfig,

    /// WebSocket listener.
    pub websocket: WebSocketListenerConfig,

    /// Outbound connector settings.
    pub client: ClientConfig,

    /// Port range binding behaviour.
    pub port_binding: PortBindingConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Where and how a listener binds.
///
/// Exactly one of `port` / `port_range` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerOptions {
    /// Fixed port; `0` lets the OS pick one.
    pub port: Option<u16>,

    /// Inclusive `[min, max]` range to pick a free port from.
    pub port_range: Option<[u16; 2]>,

    /// Bind host.
    pub host: String,

    /// Host advertised in the listener endpoint (NAT, reverse proxy).
    pub expose_host: Option<String>,

    pub labels: Labels,
}

impl ListenerOptions {
    pub fn with_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            port: Some(port),
            port_range: None,
            host: host.into(),
            expose_host: None,
            labels: Labels::new(),
        }
    }

    pub fn with_range(host: impl Into<String>, min: u16, max: u16) -> Self {
        Self {
            port: None,
            port_range: Some([min, max]),
            host: host.into(),
            expose_host: None,
            labels: Labels::new(),
        }
    }

    /// Host that goes into advertised endpoints.
    pub fn advertised_host(&self) -> &str {
        self.expose_host.as_deref().unwrap_or(&self.host)
    }
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            port: None,
            port_range: None,
            host: "127.0.0.1".to_string(),
            expose_host: None,
            labels: Labels::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpListenerConfig {
    pub enabled: bool,

    pub listener: ListenerOptions,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Total time allowed for one request/response cycle.
    pub request_timeout_secs: u64,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listener: ListenerOptions::with_port("0.0.0.0", 8080),
            max_body_size: 2 * 1024 * 1024, // 2MB
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketListenerConfig {
    pub enabled: bool,

    pub listener: ListenerOptions,

    /// Path accepting upgrade requests.
    pub entry_path: String,

    /// Pings sent to accepted peers.
    pub heartbeat: HeartbeatConfig,
}

impl Default for WebSocketListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listener: ListenerOptions::with_port("0.0.0.0", 8090),
            entry_path: "/ws".to_string(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,

    /// Pings sent by outbound WebSocket connectors.
    pub heartbeat: HeartbeatConfig,

    /// How long a sender waits for a response.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            request_timeout_secs: 10,
        }
    }
}

/// Reconnect policy of outbound WebSocket connectors.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay after a failed attempt.
    pub min_interval_ms: u64,

    /// Delay cap.
    pub max_interval_ms: u64,

    /// Double the delay after each failure.
    pub increment_interval: bool,

    /// `0` retries until cancelled.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_interval_ms: 5000,
            increment_interval: true,
            max_attempts: 0,
        }
    }
}

/// WebSocket liveness probing. A link that stays silent for `timeout_ms`
/// after a ping is closed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,

    pub interval_ms: u64,

    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortBindingConfig {
    /// Wait between bind attempts after a conflict.
    pub retry_delay_ms: u64,

    /// Upper bound of the random step to the next candidate port.
    pub max_step: u16,
}

impl Default for PortBindingConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 100,
            max_step: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Bounded wait for peers to disconnect before links are closed.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: TransportConfig = toml::from_str(
            r#"
            [websocket.listener]
            port_range = [9000, 9004]
            host = "10.0.0.5"
            expose_host = "rpc.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.websocket.listener.port_range, Some([9000, 9004]));
        assert_eq!(config.websocket.listener.port, None);
        assert_eq!(config.websocket.listener.advertised_host(), "rpc.example.com");
        assert_eq!(config.websocket.entry_path, "/ws");
        assert_eq!(config.http.listener.port, Some(8080));
        assert_eq!(config.client.reconnect.max_attempts, 0);
        assert_eq!(config.port_binding.retry_delay_ms, 100);
        assert!(config.websocket.heartbeat.enabled);
        assert_eq!(config.client.heartbeat.timeout_ms, 5000);
    }
}
