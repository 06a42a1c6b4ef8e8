//! Outcome notifications published by the worker pool

use std::time::Duration;

use cadence_common::{Signal, internal};
use cadence_store::UnitId;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// What happened to a unit after a worker picked it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Delivered and recorded as SENT
    Sent {
        unit_id: UnitId,
        delivery_id: String,
        attempt: u32,
    },
    /// Over the sender's hourly limit; requeued without counting an attempt
    Deferred {
        unit_id: UnitId,
        until: DateTime<Utc>,
    },
    /// The unit no longer exists in the store
    Dropped { unit_id: UnitId },
    /// Delivery failed and another attempt is queued
    RetryScheduled {
        unit_id: UnitId,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// Delivery failed on the final attempt
    Failed {
        unit_id: UnitId,
        attempts: u32,
        reason: String,
    },
}

impl DispatchEvent {
    pub const fn unit_id(&self) -> UnitId {
        match self {
            Self::Sent { unit_id, .. }
            | Self::Deferred { unit_id, .. }
            | Self::Dropped { unit_id }
            | Self::RetryScheduled { unit_id, .. }
            | Self::Failed { unit_id, .. } => *unit_id,
        }
    }

    /// Whether the unit has left the queue for good
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent { .. } | Self::Dropped { .. } | Self::Failed { .. })
    }
}

/// Write every dispatch event to the log until shutdown
pub async fn log_events(
    mut events: broadcast::Receiver<DispatchEvent>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    internal!(level = WARN, skipped, "Event logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            signal = shutdown.recv() => {
                if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                    break;
                }
            }
        }
    }
}

fn log_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::Sent {
            unit_id,
            delivery_id,
            attempt,
        } => {
            internal!(level = INFO, unit_id = %unit_id, delivery_id = %delivery_id, attempt, "Unit sent");
        }
        DispatchEvent::Deferred { unit_id, until } => {
            internal!(level = DEBUG, unit_id = %unit_id, until = %until, "Unit deferred by hourly limit");
        }
        DispatchEvent::Dropped { unit_id } => {
            internal!(level = WARN, unit_id = %unit_id, "Unit no longer exists, skipped");
        }
        DispatchEvent::RetryScheduled {
            unit_id,
            attempt,
            delay,
            reason,
        } => {
            internal!(
                level = WARN,
                unit_id = %unit_id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason = %reason,
                "Unit failed, retry scheduled"
            );
        }
        DispatchEvent::Failed {
            unit_id,
            attempts,
            reason,
        } => {
            internal!(level = ERROR, unit_id = %unit_id, attempts, reason = %reason, "Unit failed permanently");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        let unit_id = UnitId::generate();

        assert!(DispatchEvent::Dropped { unit_id }.is_terminal());
        assert!(
            DispatchEvent::Failed {
                unit_id,
                attempts: 3,
                reason: "boom".to_string()
            }
            .is_terminal()
        );
        assert!(
            !DispatchEvent::Deferred {
                unit_id,
                until: Utc::now()
            }
            .is_terminal()
        );
        assert_eq!(DispatchEvent::Dropped { unit_id }.unit_id(), unit_id);
    }

    #[tokio::test]
    async fn test_logger_stops_on_shutdown() {
        let (events_tx, events_rx) = broadcast::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let logger = tokio::spawn(log_events(events_rx, shutdown_rx));
        let _ = events_tx.send(DispatchEvent::Dropped {
            unit_id: UnitId::generate(),
        });
        let _ = shutdown_tx.send(Signal::Shutdown);

        assert!(logger.await.is_ok());
    }
}
