//! Listening port selection.
//!
//! # Responsibilities
//! - Bind a fixed port, or pick a free port inside `[min, max]`
//! - Retry only on "address in use"; any other bind error is fatal
//! - Spread co-starting instances with a random start and random steps

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpListener;

use crate::config::{ListenerOptions, PortBindingConfig};
use crate::error::TransportError;
use crate::observability::metrics;

/// Which port(s) a listener may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    /// One explicit port; `0` lets the OS choose.
    Fixed(u16),
    /// Inclusive range.
    Range { min: u16, max: u16 },
}

impl PortSpec {
    /// Resolve validated listener options into a spec.
    pub fn from_options(options: &ListenerOptions) -> Result<Self, TransportError> {
        match (options.port, options.port_range) {
            (Some(port), None) => Ok(PortSpec::Fixed(port)),
            (None, Some([min, max])) if min > 0 && min <= max => Ok(PortSpec::Range { min, max }),
            (None, Some([min, max])) => Err(TransportError::InvalidOptions(format!(
                "invalid port range {min}-{max}"
            ))),
            (Some(_), Some(_)) => Err(TransportError::InvalidOptions(
                "set either port or port_range, not both".to_string(),
            )),
            (None, None) => Err(TransportError::InvalidOptions(
                "one of port or port_range is required".to_string(),
            )),
        }
    }
}

/// Bind `host` according to `spec`.
pub async fn bind_port(
    host: &str,
    spec: PortSpec,
    config: &PortBindingConfig,
) -> Result<TcpListener, TransportError> {
    match spec {
        PortSpec::Fixed(port) => TcpListener::bind((host, port)).await.map_err(|e| {
            if e.kind() == ErrorKind::AddrInUse {
                metrics::record_bind_conflict();
                TransportError::BindConflict(port)
            } else {
                TransportError::Bind(e)
            }
        }),
        PortSpec::Range { min, max } => bind_range(host, min, max, config).await,
    }
}

async fn bind_range(
    host: &str,
    min: u16,
    max: u16,
    config: &PortBindingConfig,
) -> Result<TcpListener, TransportError> {
    let step = config.max_step.max(1);
    let delay = Duration::from_millis(config.retry_delay_ms);
    let mut untried: BTreeSet<u16> = (min..=max).collect();
    let mut candidate = min.saturating_add(rand::thread_rng().gen_range(0..step)).min(max);

    loop {
        untried.remove(&candidate);

        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                metrics::record_bind_conflict();
                let next = next_candidate(&untried, candidate, step);
                tracing::debug!(
                    port = candidate,
                    next = ?next,
                    remaining = untried.len(),
                    "Port in use"
                );
                candidate = next.ok_or(TransportError::NoAvailablePort { min, max })?;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(TransportError::Bind(e)),
        }
    }
}

/// First untried port at or after a random step from `current`, wrapping to
/// the lowest untried port. `None` once the range is exhausted.
fn next_candidate(untried: &BTreeSet<u16>, current: u16, step: u16) -> Option<u16> {
    let target = current.saturating_add(rand::thread_rng().gen_range(1..=step));
    untried
        .range(target..)
        .next()
        .or_else(|| untried.iter().next())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PortBindingConfig {
        PortBindingConfig {
            retry_delay_ms: 1,
            max_step: 5,
        }
    }

    /// A window of `len` consecutive ports that were free a moment ago.
    async fn free_window(len: u16) -> u16 {
        loop {
            let free = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let base = free.local_addr().unwrap().port();
            drop(free);
            if base.checked_add(len).is_none() {
                continue;
            }
            let mut held = Vec::new();
            for port in base..base + len {
                match std::net::TcpListener::bind(("127.0.0.1", port)) {
                    Ok(l) => held.push(l),
                    Err(_) => break,
                }
            }
            if held.len() == len as usize {
                return base;
            }
        }
    }

    #[test]
    fn next_candidate_stays_in_untried_set() {
        let untried: BTreeSet<u16> = [9001, 9003].into_iter().collect();
        for _ in 0..50 {
            let next = next_candidate(&untried, 9000, 5).unwrap();
            assert!(untried.contains(&next));
        }
        assert_eq!(next_candidate(&BTreeSet::new(), 9000, 5), None);
    }

    #[test]
    fn spec_from_options() {
        assert_eq!(
            PortSpec::from_options(&ListenerOptions::with_port("127.0.0.1", 80)).unwrap(),
            PortSpec::Fixed(80)
        );
        assert_eq!(
            PortSpec::from_options(&ListenerOptions::with_range("127.0.0.1", 9000, 9004)).unwrap(),
            PortSpec::Range { min: 9000, max: 9004 }
        );

        let mut both = ListenerOptions::with_range("127.0.0.1", 9000, 9004);
        both.port = Some(9000);
        assert!(matches!(
            PortSpec::from_options(&both),
            Err(TransportError::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn range_binding_stays_inside_range() {
        let base = free_window(5).await;
        let max = base + 4;

        let listener = bind_port("127.0.0.1", PortSpec::Range { min: base, max }, &fast())
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!((base..=max).contains(&port));
    }

    #[tokio::test]
    async fn occupied_port_is_skipped() {
        let base = free_window(5).await;
        let max = base + 4;
        let _occupied = TcpListener::bind(("127.0.0.1", base)).await.unwrap();

        for _ in 0..5 {
            let listener = bind_port("127.0.0.1", PortSpec::Range { min: base, max }, &fast())
                .await
                .unwrap();
            let port = listener.local_addr().unwrap().port();
            assert_ne!(port, base);
            assert!((base..=max).contains(&port));
        }
    }

    #[tokio::test]
    async fn fully_occupied_range_fails() {
        let base = free_window(3).await;
        let max = base + 2;
        let mut held = Vec::new();
        for port in base..=max {
            held.push(TcpListener::bind(("127.0.0.1", port)).await.unwrap());
        }

        let err = bind_port("127.0.0.1", PortSpec::Range { min: base, max }, &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoAvailablePort { min, max: m } if min == base && m == max));
    }

    #[tokio::test]
    async fn fixed_port_conflict_is_reported() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind_port("127.0.0.1", PortSpec::Fixed(port), &fast()).await.unwrap_err();
        assert!(matches!(err, TransportError::BindConflict(p) if p == port));
    }
}
