//! Per-unit dispatch: admission, delivery, status recording and retry

use std::sync::Arc;

use cadence_common::tracing;
use cadence_store::{CampaignStore, StatusUpdate, StoreError, UnitId};
use chrono::Utc;
use tokio::sync::broadcast;

use crate::{
    events::DispatchEvent,
    mailer::{Mailer, OutgoingMessage},
    policy::RetryPolicy,
    queue::{Job, WorkQueue},
    rate_limiter::{Admission, RateLimiter},
};

/// Everything a spawned dispatch task needs
#[derive(Debug)]
pub(super) struct Worker {
    pub(super) store: Arc<dyn CampaignStore>,
    pub(super) mailer: Arc<dyn Mailer>,
    pub(super) rate_limiter: Arc<RateLimiter>,
    pub(super) queue: WorkQueue,
    pub(super) retry: RetryPolicy,
    pub(super) events: broadcast::Sender<DispatchEvent>,
}

/// Frees a unit's in-flight slot if its dispatch task unwinds
struct InFlightGuard<'a> {
    queue: &'a WorkQueue,
    unit_id: UnitId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(unit_id = %self.unit_id, "Dispatch task panicked, releasing unit");
            self.queue.complete(&self.unit_id);
        }
    }
}

impl Worker {
    pub(super) fn publish(&self, event: DispatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Take one job through to its next state
    ///
    /// Every path either completes the job or hands it back to the queue.
    pub(super) async fn dispatch(&self, job: Job) -> DispatchEvent {
        let unit_id = job.id();
        let _guard = InFlightGuard {
            queue: &self.queue,
            unit_id,
        };

        if let Admission::Deferred { until } = self
            .rate_limiter
            .try_admit(&job.payload.sender, job.payload.hourly_limit)
        {
            let delay = (until - Utc::now()).to_std().unwrap_or_default();
            self.queue.reschedule(job, delay);
            return DispatchEvent::Deferred { unit_id, until };
        }

        // The body may have been edited since scheduling
        let unit = match self.store.get_unit(&unit_id).await {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                self.queue.complete(&unit_id);
                return DispatchEvent::Dropped { unit_id };
            }
            Err(e) => return self.fail(job, e.to_string()).await,
        };

        let attempt = job.attempts_made.saturating_add(1);
        let message = OutgoingMessage {
            from: &job.payload.sender,
            to: &job.payload.recipient,
            subject: &job.payload.subject,
            body: &unit.body,
        };

        tracing::debug!(
            unit_id = %unit_id,
            sender = %job.payload.sender,
            attempt,
            "Delivering unit"
        );

        match self.mailer.deliver(message).await {
            Ok(receipt) => {
                self.record(&unit_id, StatusUpdate::sent(Utc::now())).await;
                self.queue.complete(&unit_id);

                DispatchEvent::Sent {
                    unit_id,
                    delivery_id: receipt.delivery_id,
                    attempt,
                }
            }
            Err(e) => self.fail(job, e.to_string()).await,
        }
    }

    /// Record a failed attempt and either queue a retry or give up
    async fn fail(&self, job: Job, reason: String) -> DispatchEvent {
        let unit_id = job.id();
        let attempt = job.attempts_made.saturating_add(1);

        self.record(&unit_id, StatusUpdate::failed(reason.clone()))
            .await;

        if self.retry.should_retry(attempt) {
            let delay = self.retry.backoff(attempt);
            self.queue.retry(job, delay);

            DispatchEvent::RetryScheduled {
                unit_id,
                attempt,
                delay,
                reason,
            }
        } else {
            self.queue.complete(&unit_id);

            DispatchEvent::Failed {
                unit_id,
                attempts: attempt,
                reason,
            }
        }
    }

    /// Write a status change, tolerating units deleted mid-flight
    async fn record(&self, unit_id: &UnitId, update: StatusUpdate) {
        let status = update.status;
        match self.store.update_unit_status(unit_id, update).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(
                    unit_id = %unit_id,
                    status = %status,
                    "Unit removed before its status could be recorded"
                );
            }
            Err(e) => {
                tracing::error!(
                    unit_id = %unit_id,
                    status = %status,
                    error = %e,
                    "Failed to record unit status"
                );
            }
        }
    }
}
