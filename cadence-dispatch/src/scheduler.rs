//! Campaign expansion and scheduling
//!
//! A campaign request is turned into one dispatch unit per recipient. Units
//! are spaced `delay_seconds` apart starting at `start_time`; high priority
//! campaigns record the same planned times but are released immediately.

use std::{sync::Arc, time::Duration};

use cadence_common::{Priority, tracing};
use cadence_store::{CampaignId, CampaignStore, NewCampaign, NewDispatchUnit};
use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    error::{ScheduleError, ValidationError},
    queue::{DispatchPayload, WorkQueue},
};

/// A fully resolved campaign request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub recipients: Vec<String>,
    pub subject: String,
    /// HTML body
    pub body: String,
    pub start_time: DateTime<Utc>,
    /// Spacing between consecutive recipients
    pub delay_seconds: u64,
    /// Sends per hour for the sender; zero is unlimited
    pub hourly_limit: u32,
    pub sender: String,
    pub priority: Priority,
}

impl ScheduleRequest {
    /// # Errors
    /// If there are no recipients, a recipient is blank, or the sender is
    /// blank
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.recipients.is_empty() {
            return Err(ValidationError::NoRecipients);
        }

        if let Some(index) = self.recipients.iter().position(|r| r.trim().is_empty()) {
            return Err(ValidationError::BlankRecipient(index));
        }

        if self.sender.trim().is_empty() {
            return Err(ValidationError::MissingSender);
        }

        Ok(())
    }
}

/// The planned send for one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSend {
    /// Time recorded on the unit
    pub scheduled_at: DateTime<Utc>,
    /// How long the queue holds the unit before release
    pub delay: Duration,
}

/// Result of accepting a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignHandle {
    pub campaign_id: CampaignId,
    /// Units stored and queued
    pub count: usize,
    /// Recipients whose unit could not be stored
    pub failed: usize,
}

fn offset(index: usize, delay_seconds: u64) -> TimeDelta {
    let secs = u64::try_from(index)
        .unwrap_or(u64::MAX)
        .saturating_mul(delay_seconds);
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Compute the send time and queue delay for every recipient, in order
///
/// Recipient `i` is scheduled at `start_time + i * delay_seconds`. The queue
/// delay is measured from `now`; a start time in the past counts as now.
pub fn plan(request: &ScheduleRequest, now: DateTime<Utc>) -> Vec<PlannedSend> {
    let initial = (request.start_time - now).max(TimeDelta::zero());

    (0..request.recipients.len())
        .map(|index| {
            let offset = offset(index, request.delay_seconds);
            let scheduled_at = request
                .start_time
                .checked_add_signed(offset)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            let delay = if request.priority.is_high() {
                Duration::ZERO
            } else {
                initial
                    .checked_add(&offset)
                    .and_then(|delay| delay.to_std().ok())
                    .unwrap_or(Duration::MAX)
            };

            PlannedSend {
                scheduled_at,
                delay,
            }
        })
        .collect()
}

/// Persists campaigns and feeds their units into the work queue
#[derive(Debug, Clone)]
pub struct Scheduler {
    store: Arc<dyn CampaignStore>,
    queue: WorkQueue,
}

impl Scheduler {
    pub fn new(store: Arc<dyn CampaignStore>, queue: WorkQueue) -> Self {
        Self { store, queue }
    }

    pub const fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Accept a campaign and schedule a unit per recipient
    ///
    /// # Errors
    /// If the request is invalid or the campaign record cannot be stored.
    /// A recipient whose unit cannot be stored is logged and skipped; the
    /// remaining recipients are still scheduled.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<CampaignHandle, ScheduleError> {
        self.schedule_at(request, Utc::now()).await
    }

    /// As [`Self::schedule`], planning from `now`
    ///
    /// # Errors
    /// See [`Self::schedule`]
    pub async fn schedule_at(
        &self,
        request: ScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<CampaignHandle, ScheduleError> {
        request.validate()?;

        let campaign = self
            .store
            .create_campaign(NewCampaign {
                title: request.subject.clone(),
                owner: request.sender.clone(),
                start_time: request.start_time,
                delay_seconds: request.delay_seconds,
                hourly_limit: request.hourly_limit,
            })
            .await?;

        let planned = plan(&request, now);
        let mut count = 0;
        let mut failed = 0;

        for (recipient, send) in request.recipients.iter().zip(planned) {
            let unit = match self
                .store
                .create_unit(NewDispatchUnit {
                    campaign_id: Some(campaign.id),
                    recipient: recipient.clone(),
                    subject: request.subject.clone(),
                    body: request.body.clone(),
                    sender: request.sender.clone(),
                    scheduled_at: send.scheduled_at,
                    priority: request.priority,
                })
                .await
            {
                Ok(unit) => unit,
                Err(e) => {
                    tracing::warn!(
                        campaign_id = %campaign.id,
                        recipient = %recipient,
                        error = %e,
                        "Failed to store dispatch unit, skipping recipient"
                    );
                    failed += 1;
                    continue;
                }
            };

            let payload = DispatchPayload::from_unit(&unit, request.hourly_limit);
            if self.queue.enqueue(payload, request.priority, send.delay) {
                count += 1;
            } else {
                tracing::warn!(
                    campaign_id = %campaign.id,
                    unit_id = %unit.id,
                    "Dispatch unit was not queued"
                );
                failed += 1;
            }
        }

        tracing::info!(
            campaign_id = %campaign.id,
            count,
            failed,
            priority = %request.priority,
            "Campaign scheduled"
        );

        Ok(CampaignHandle {
            campaign_id: campaign.id,
            count,
            failed,
        })
    }
}
