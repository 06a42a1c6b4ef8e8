//! Query and control interface used by the HTTP API

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use cadence_common::{UnitStatus, tracing};
use cadence_store::{
    Campaign, CampaignId, CampaignStore, DispatchUnit, UnitId, UnitOrder, UnitQuery,
};
use serde::Serialize;

use crate::{
    error::{ServiceError, ValidationError},
    queue::WorkQueue,
    scheduler::{CampaignHandle, ScheduleRequest, Scheduler},
};

/// A pending unit together with the campaign it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledUnit {
    #[serde(flatten)]
    pub unit: DispatchUnit,
    pub campaign: Option<Campaign>,
}

/// Operations exposed to the outside world
#[async_trait]
pub trait DispatchService: Send + Sync + std::fmt::Debug {
    /// Accept a campaign and schedule a send per recipient
    async fn schedule(&self, request: ScheduleRequest) -> Result<CampaignHandle, ServiceError>;

    /// Replace the body of a pending unit; the new body is what gets sent
    async fn edit_unit_body(&self, id: &UnitId, body: String)
    -> Result<DispatchUnit, ServiceError>;

    /// Remove units; queued jobs for them become no-ops
    async fn delete_units(&self, ids: &[UnitId]) -> Result<usize, ServiceError>;

    /// Pending units, earliest scheduled first
    async fn scheduled_units(&self) -> Result<Vec<ScheduledUnit>, ServiceError>;

    /// Sent units, most recent first
    async fn sent_units(&self) -> Result<Vec<DispatchUnit>, ServiceError>;

    /// The most recently failed units
    async fn failed_units(&self, limit: usize) -> Result<Vec<DispatchUnit>, ServiceError>;

    async fn campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, ServiceError>;

    /// Jobs currently waiting in the work queue
    fn queue_len(&self) -> usize;
}

/// [`DispatchService`] backed by a campaign store and the work queue
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<dyn CampaignStore>,
    scheduler: Scheduler,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn CampaignStore>, queue: WorkQueue) -> Self {
        Self {
            scheduler: Scheduler::new(Arc::clone(&store), queue),
            store,
        }
    }

    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

#[async_trait]
impl DispatchService for Dispatcher {
    async fn schedule(&self, request: ScheduleRequest) -> Result<CampaignHandle, ServiceError> {
        // Units are persisted and enqueued one at a time; the campaign must
        // finish scheduling even if the caller stops waiting for it.
        let scheduler = self.scheduler.clone();
        let task = tokio::spawn(async move { scheduler.schedule(request).await });

        match task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(ServiceError::Interrupted(e.to_string())),
        }
    }

    async fn edit_unit_body(
        &self,
        id: &UnitId,
        body: String,
    ) -> Result<DispatchUnit, ServiceError> {
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }

        let unit = self.store.update_unit_body(id, body).await?;
        tracing::info!(unit_id = %id, "Unit body updated");
        Ok(unit)
    }

    async fn delete_units(&self, ids: &[UnitId]) -> Result<usize, ServiceError> {
        let removed = self.store.delete_units(ids).await?;
        tracing::info!(requested = ids.len(), removed, "Units deleted");
        Ok(removed)
    }

    async fn scheduled_units(&self) -> Result<Vec<ScheduledUnit>, ServiceError> {
        let units = self
            .store
            .list_units(UnitQuery::with_status(
                UnitStatus::Pending,
                UnitOrder::ScheduledAsc,
            ))
            .await?;

        let mut campaigns: HashMap<CampaignId, Option<Campaign>> = HashMap::new();
        let mut scheduled = Vec::with_capacity(units.len());

        for unit in units {
            let campaign = match unit.campaign_id {
                Some(id) => {
                    if !campaigns.contains_key(&id) {
                        let campaign = self.store.get_campaign(&id).await?;
                        campaigns.insert(id, campaign);
                    }
                    campaigns.get(&id).cloned().flatten()
                }
                None => None,
            };

            scheduled.push(ScheduledUnit { unit, campaign });
        }

        Ok(scheduled)
    }

    async fn sent_units(&self) -> Result<Vec<DispatchUnit>, ServiceError> {
        Ok(self
            .store
            .list_units(UnitQuery::with_status(UnitStatus::Sent, UnitOrder::SentDesc))
            .await?)
    }

    async fn failed_units(&self, limit: usize) -> Result<Vec<DispatchUnit>, ServiceError> {
        Ok(self
            .store
            .list_units(
                UnitQuery::with_status(UnitStatus::Failed, UnitOrder::UpdatedDesc).limit(limit),
            )
            .await?)
    }

    async fn campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, ServiceError> {
        Ok(self.store.get_campaign(id).await?)
    }

    fn queue_len(&self) -> usize {
        self.scheduler.queue().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests")]
mod tests {
    use std::time::Duration;

    use cadence_common::Priority;
    use cadence_store::{MemoryCampaignStore, NewCampaign, NewDispatchUnit, StatusUpdate};
    use chrono::Utc;

    use super::*;

    /// Memory store whose unit writes take a while
    #[derive(Debug, Default)]
    struct SlowStore {
        inner: MemoryCampaignStore,
    }

    #[async_trait]
    impl CampaignStore for SlowStore {
        async fn create_campaign(&self, campaign: NewCampaign) -> cadence_store::Result<Campaign> {
            self.inner.create_campaign(campaign).await
        }

        async fn get_campaign(&self, id: &CampaignId) -> cadence_store::Result<Option<Campaign>> {
            self.inner.get_campaign(id).await
        }

        async fn create_unit(&self, unit: NewDispatchUnit) -> cadence_store::Result<DispatchUnit> {
            tokio::time::sleep(Duration::from_millis(400)).await;
            self.inner.create_unit(unit).await
        }

        async fn get_unit(&self, id: &UnitId) -> cadence_store::Result<Option<DispatchUnit>> {
            self.inner.get_unit(id).await
        }

        async fn update_unit_status(
            &self,
            id: &UnitId,
            update: StatusUpdate,
        ) -> cadence_store::Result<DispatchUnit> {
            self.inner.update_unit_status(id, update).await
        }

        async fn update_unit_body(
            &self,
            id: &UnitId,
            body: String,
        ) -> cadence_store::Result<DispatchUnit> {
            self.inner.update_unit_body(id, body).await
        }

        async fn delete_units(&self, ids: &[UnitId]) -> cadence_store::Result<usize> {
            self.inner.delete_units(ids).await
        }

        async fn list_units(&self, query: UnitQuery) -> cadence_store::Result<Vec<DispatchUnit>> {
            self.inner.list_units(query).await
        }
    }

    fn request(recipients: usize) -> ScheduleRequest {
        ScheduleRequest {
            recipients: (0..recipients).map(|i| format!("r{i}@x.com")).collect(),
            subject: "Launch".to_string(),
            body: "<p>Hi</p>".to_string(),
            start_time: Utc::now(),
            delay_seconds: 10,
            hourly_limit: 0,
            sender: "owner@example.com".to_string(),
            priority: Priority::Normal,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_reports_every_unit() {
        let store = Arc::new(SlowStore::default());
        let queue = WorkQueue::new();
        let dispatcher = Dispatcher::new(Arc::clone(&store) as Arc<dyn CampaignStore>, queue.clone());

        let handle = dispatcher.schedule(request(5)).await.unwrap();

        assert_eq!(handle.count, 5);
        assert_eq!(queue.len(), 5);
        assert_eq!(store.inner.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_schedule_still_queues_every_stored_unit() {
        let store = Arc::new(SlowStore::default());
        let queue = WorkQueue::new();
        let dispatcher = Dispatcher::new(Arc::clone(&store) as Arc<dyn CampaignStore>, queue.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), dispatcher.schedule(request(5))).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(store.inner.len(), 5);
        assert_eq!(queue.len(), 5);
        assert_eq!(dispatcher.scheduled_units().await.unwrap().len(), 5);
    }
}
