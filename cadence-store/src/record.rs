//! Persisted records and the inputs used to create them

use cadence_common::{Priority, UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CampaignId, UnitId};

/// A requested campaign.
///
/// `delay_seconds` and `hourly_limit` are fixed once the campaign's units are
/// generated; an `hourly_limit` of 0 means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: CampaignId,
    pub title: String,
    pub owner: String,
    pub start_time: DateTime<Utc>,
    pub delay_seconds: u64,
    pub hourly_limit: u32,
    pub created_at: DateTime<Utc>,
}

/// Fields of a campaign about to be created
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub title: String,
    pub owner: String,
    pub start_time: DateTime<Utc>,
    pub delay_seconds: u64,
    pub hourly_limit: u32,
}

impl NewCampaign {
    pub(crate) fn into_campaign(self, id: CampaignId, now: DateTime<Utc>) -> Campaign {
        Campaign {
            id,
            title: self.title,
            owner: self.owner,
            start_time: self.start_time,
            delay_seconds: self.delay_seconds,
            hourly_limit: self.hourly_limit,
            created_at: now,
        }
    }
}

/// One scheduled send to one recipient.
///
/// `body` is the durable copy: the worker pool reads it at execution time, so
/// edits made while the unit is pending are the ones delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchUnit {
    pub id: UnitId,
    pub campaign_id: Option<CampaignId>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub scheduled_at: DateTime<Utc>,
    pub priority: Priority,
    pub status: UnitStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a dispatch unit about to be created. New units are always
/// `Pending`.
#[derive(Debug, Clone)]
pub struct NewDispatchUnit {
    pub campaign_id: Option<CampaignId>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub scheduled_at: DateTime<Utc>,
    pub priority: Priority,
}

impl NewDispatchUnit {
    pub(crate) fn into_unit(self, id: UnitId, now: DateTime<Utc>) -> DispatchUnit {
        DispatchUnit {
            id,
            campaign_id: self.campaign_id,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
            sender: self.sender,
            scheduled_at: self.scheduled_at,
            priority: self.priority,
            status: UnitStatus::Pending,
            sent_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Resolution of a delivery attempt.
///
/// Applying an update overwrites `sent_at` and `failure_reason` together, so a
/// unit that fails and later succeeds on retry ends without a stale reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: UnitStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl StatusUpdate {
    #[must_use]
    pub const fn sent(at: DateTime<Utc>) -> Self {
        Self {
            status: UnitStatus::Sent,
            sent_at: Some(at),
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            sent_at: None,
            failure_reason: Some(reason.into()),
        }
    }

    pub(crate) fn apply(self, unit: &mut DispatchUnit, now: DateTime<Utc>) {
        unit.status = self.status;
        unit.sent_at = self.sent_at;
        unit.failure_reason = self.failure_reason;
        unit.updated_at = now;
    }
}

/// Sort order of a unit listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitOrder {
    /// Creation order (identifier order)
    #[default]
    Created,
    ScheduledAsc,
    SentDesc,
    UpdatedDesc,
}

/// Filter, order and limit of a unit listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitQuery {
    pub status: Option<UnitStatus>,
    pub order: UnitOrder,
    pub limit: Option<usize>,
}

impl UnitQuery {
    #[must_use]
    pub const fn with_status(status: UnitStatus, order: UnitOrder) -> Self {
        Self {
            status: Some(status),
            order,
            limit: None,
        }
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter, sort and truncate `units`. Ties are broken by identifier so
    /// the result does not depend on the backend's iteration order.
    pub(crate) fn apply(&self, units: impl IntoIterator<Item = DispatchUnit>) -> Vec<DispatchUnit> {
        let mut units: Vec<_> = units
            .into_iter()
            .filter(|unit| self.status.is_none_or(|status| unit.status == status))
            .collect();

        match self.order {
            UnitOrder::Created => units.sort_by_key(|unit| unit.id),
            UnitOrder::ScheduledAsc => units.sort_by_key(|unit| (unit.scheduled_at, unit.id)),
            UnitOrder::SentDesc => units.sort_by(|a, b| {
                b.sent_at.cmp(&a.sent_at).then_with(|| a.id.cmp(&b.id))
            }),
            UnitOrder::UpdatedDesc => units.sort_by(|a, b| {
                b.updated_at
                    .cmp(&a.updated_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }

        if let Some(limit) = self.limit {
            units.truncate(limit);
        }

        units
    }
}
