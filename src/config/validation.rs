//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, intervals, sizes)
//! - Reject ambiguous listener options (fixed port and range together)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: &TransportConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;

use crate::config::schema::{HeartbeatConfig, ListenerOptions, TransportConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.http.enabled {
        validate_listener("http.listener", &config.http.listener, &mut errors);
        if config.http.max_body_size == 0 {
            errors.push(ValidationError::new("http.max_body_size", "must be greater than 0"));
        }
        if config.http.request_timeout_secs == 0 {
            errors.push(ValidationError::new("http.request_timeout_secs", "must be greater than 0"));
        }
    }

    if config.websocket.enabled {
        validate_listener("websocket.listener", &config.websocket.listener, &mut errors);
        if !config.websocket.entry_path.starts_with('/') {
            errors.push(ValidationError::new("websocket.entry_path", "must start with '/'"));
        }
        validate_heartbeat("websocket.heartbeat", &config.websocket.heartbeat, &mut errors);
    }
    validate_heartbeat("client.heartbeat", &config.client.heartbeat, &mut errors);

    let reconnect = &config.client.reconnect;
    if reconnect.min_interval_ms == 0 {
        errors.push(ValidationError::new("client.reconnect.min_interval_ms", "must be greater than 0"));
    }
    if reconnect.max_interval_ms < reconnect.min_interval_ms {
        errors.push(ValidationError::new(
            "client.reconnect.max_interval_ms",
            "must not be lower than min_interval_ms",
        ));
    }

    if config.port_binding.max_step == 0 {
        errors.push(ValidationError::new("port_binding.max_step", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check one listener's options, appending to `errors`.
pub fn validate_listener(field: &str, options: &ListenerOptions, errors: &mut Vec<ValidationError>) {
    match (options.port, options.port_range) {
        (Some(_), Some(_)) => errors.push(ValidationError::new(
            field,
            "set either port or port_range, not both",
        )),
        (None, None) => errors.push(ValidationError::new(field, "one of port or port_range is required")),
        (None, Some([min, max])) => {
            if min == 0 {
                errors.push(ValidationError::new(
                    format!("{field}.port_range"),
                    "range must not include port 0",
                ));
            }
            if min > max {
                errors.push(ValidationError::new(
                    format!("{field}.port_range"),
                    format!("min {min} is greater than max {max}"),
                ));
            }
        }
        (Some(_), None) => {}
    }

    if options.host.trim().is_empty() {
        errors.push(ValidationError::new(format!("{field}.host"), "must not be empty"));
    }
}

fn validate_heartbeat(field: &str, heartbeat: &HeartbeatConfig, errors: &mut Vec<ValidationError>) {
    if !heartbeat.enabled {
        return;
    }
    if heartbeat.interval_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.interval_ms"), "must be greater than 0"));
    }
    if heartbeat.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.timeout_ms"), "must be greater than 0"));
    }
}

/// Validate a single listener's options.
pub fn check_listener(field: &str, options: &ListenerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_listener(field, options, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn port_and_range_together_are_rejected() {
        let mut options = ListenerOptions::with_range("127.0.0.1", 9000, 9004);
        options.port = Some(9000);

        let errors = check_listener("http.listener", &options).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("not both"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = TransportConfig::default();
        config.http.listener = ListenerOptions::with_range("", 9010, 9000);
        config.websocket.entry_path = "ws".into();
        config.client.reconnect.min_interval_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"http.listener.port_range"));
        assert!(fields.contains(&"http.listener.host"));
        assert!(fields.contains(&"websocket.entry_path"));
        assert!(fields.contains(&"client.reconnect.min_interval_ms"));
    }

    #[test]
    fn disabled_listener_is_not_checked() {
        let mut config = TransportConfig::default();
        config.websocket.enabled = false;
        config.websocket.listener.port = None;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn enabled_heartbeat_needs_intervals() {
        let mut config = TransportConfig::default();
        config.client.heartbeat.interval_ms = 0;
        config.websocket.heartbeat.timeout_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["websocket.heartbeat.timeout_ms", "client.heartbeat.interval_ms"]);

        config.client.heartbeat.enabled = false;
        config.websocket.heartbeat.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}
