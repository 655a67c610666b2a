//! Connector state machine.
//!
//! ```text
//! Init ──▶ Ready ◀──▶ Reconnecting
//!   │        │             │
//!   └────────┴──────┬──────┘
//!                   ▼
//!            Error | Closed   (terminal)
//! ```

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use super::{lock, Protocol};
use crate::net::connection::ConnectorId;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorState {
    Init,
    Ready,
    Reconnecting,
    Error,
    Closed,
}

impl ConnectorState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectorState::Init => "INIT",
            ConnectorState::Ready => "READY",
            ConnectorState::Reconnecting => "RECONNECTING",
            ConnectorState::Error => "ERROR",
            ConnectorState::Closed => "CLOSED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ConnectorState::Error | ConnectorState::Closed)
    }

    pub const fn can_transition_to(self, next: ConnectorState) -> bool {
        use ConnectorState::*;
        matches!(
            (self, next),
            (Init, Ready | Error | Closed)
                | (Ready, Reconnecting | Error | Closed)
                | (Reconnecting, Ready | Error | Closed)
        )
    }
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectorState,
    pub to: ConnectorState,
}

/// Current state plus a stream of every accepted transition.
#[derive(Debug)]
pub struct StateCell {
    protocol: Protocol,
    connector: ConnectorId,
    current: Mutex<ConnectorState>,
    changes: broadcast::Sender<StateChange>,
}

impl StateCell {
    pub fn new(protocol: Protocol, connector: ConnectorId, initial: ConnectorState) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            protocol,
            connector,
            current: Mutex::new(initial),
            changes,
        }
    }

    pub fn get(&self) -> ConnectorState {
        *lock(&self.current)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Move to `next`. Returns `false` when already there or the transition
    /// is not allowed; nothing is emitted in that case.
    pub fn set(&self, next: ConnectorState) -> bool {
        let change = {
            let mut current = lock(&self.current);
            let from = *current;
            if from == next {
                return false;
            }
            if !from.can_transition_to(next) {
                tracing::debug!(
                    connector_id = %self.connector,
                    from = %from,
                    to = %next,
                    "Refused connector state transition"
                );
                return false;
            }
            *current = next;
            let change = StateChange { from, to: next };
            // Sent under the lock so subscribers observe transitions in order.
            let _ = self.changes.send(change);
            change
        };

        tracing::debug!(
            connector_id = %self.connector,
            protocol = %self.protocol,
            from = %change.from,
            to = %change.to,
            "Connector state changed"
        );
        metrics::record_state_transition(self.protocol.as_str(), change.to.as_str());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> StateCell {
        StateCell::new(Protocol::WebSocket, ConnectorId::new(), ConnectorState::Init)
    }

    #[test]
    fn emits_each_change_once() {
        let cell = cell();
        let mut rx = cell.subscribe();

        assert!(cell.set(ConnectorState::Ready));
        assert!(!cell.set(ConnectorState::Ready));
        assert!(cell.set(ConnectorState::Reconnecting));
        assert!(cell.set(ConnectorState::Ready));

        let seen: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|c| c.to).collect();
        assert_eq!(
            seen,
            vec![ConnectorState::Ready, ConnectorState::Reconnecting, ConnectorState::Ready]
        );
    }

    #[test]
    fn terminal_states_are_final() {
        let cell = cell();
        assert!(cell.set(ConnectorState::Closed));
        assert!(!cell.set(ConnectorState::Ready));
        assert_eq!(cell.get(), ConnectorState::Closed);
    }

    #[test]
    fn init_cannot_jump_to_reconnecting() {
        let cell = cell();
        assert!(!cell.set(ConnectorState::Reconnecting));
        assert_eq!(cell.get(), ConnectorState::Init);
    }
}
