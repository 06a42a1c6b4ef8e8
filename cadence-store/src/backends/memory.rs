use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    Campaign, CampaignId, DispatchUnit, NewCampaign, NewDispatchUnit, StatusUpdate, StoreError,
    UnitId, UnitQuery, r#trait::CampaignStore,
};

/// In-memory campaign store
///
/// Campaigns and units live in `HashMap`s behind `RwLock`s. Every operation
/// takes the lock once, so single-record operations are atomic.
///
/// # Capacity Management
/// An optional capacity bounds the number of stored units. Once it is
/// reached, `create_unit` fails with [`StoreError::CapacityExceeded`]. This
/// is mostly useful to exercise partial scheduling failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryCampaignStore {
    campaigns: Arc<RwLock<HashMap<CampaignId, Campaign>>>,
    units: Arc<RwLock<HashMap<UnitId, DispatchUnit>>>,
    /// Maximum number of units to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryCampaignStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store holding at most `capacity` units
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Number of stored units
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn create_campaign(&self, campaign: NewCampaign) -> crate::Result<Campaign> {
        let campaign = campaign.into_campaign(CampaignId::generate(), Utc::now());
        self.campaigns
            .write()?
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get_campaign(&self, id: &CampaignId) -> crate::Result<Option<Campaign>> {
        Ok(self.campaigns.read()?.get(id).cloned())
    }

    async fn create_unit(&self, unit: NewDispatchUnit) -> crate::Result<DispatchUnit> {
        let mut units = self.units.write()?;

        if let Some(capacity) = self.capacity
            && units.len() >= capacity
        {
            return Err(StoreError::CapacityExceeded {
                used: units.len(),
                capacity,
            });
        }

        let unit = unit.into_unit(UnitId::generate(), Utc::now());
        units.insert(unit.id, unit.clone());

        Ok(unit)
    }

    async fn get_unit(&self, id: &UnitId) -> crate::Result<Option<DispatchUnit>> {
        Ok(self.units.read()?.get(id).cloned())
    }

    async fn update_unit_status(
        &self,
        id: &UnitId,
        update: StatusUpdate,
    ) -> crate::Result<DispatchUnit> {
        let mut units = self.units.write()?;
        let unit = units.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        update.apply(unit, Utc::now());
        Ok(unit.clone())
    }

    async fn update_unit_body(&self, id: &UnitId, body: String) -> crate::Result<DispatchUnit> {
        let mut units = self.units.write()?;
        let unit = units.get_mut(id).ok_or(StoreError::NotFound(*id))?;

        if !unit.status.is_pending() {
            return Err(StoreError::NotPending(*id));
        }

        unit.body = body;
        unit.updated_at = Utc::now();
        Ok(unit.clone())
    }

    async fn delete_units(&self, ids: &[UnitId]) -> crate::Result<usize> {
        let mut units = self.units.write()?;
        Ok(ids.iter().filter(|id| units.remove(*id).is_some()).count())
    }

    async fn list_units(&self, query: UnitQuery) -> crate::Result<Vec<DispatchUnit>> {
        let units = self.units.read()?.values().cloned().collect::<Vec<_>>();
        Ok(query.apply(units))
    }
}

#[cfg(test)]
mod tests {
    use cadence_common::{Priority, UnitStatus};

    use super::*;
    use crate::UnitOrder;

    fn new_unit(recipient: &str) -> NewDispatchUnit {
        NewDispatchUnit {
            campaign_id: None,
            recipient: recipient.to_string(),
            subject: "Hello".to_string(),
            body: "<p>Hello</p>".to_string(),
            sender: "sender@example.com".to_string(),
            scheduled_at: Utc::now(),
            priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryCampaignStore::new();

        let unit = store
            .create_unit(new_unit("a@example.com"))
            .await
            .expect("Failed to create");
        assert_eq!(unit.status, UnitStatus::Pending);

        let read = store.get_unit(&unit.id).await.expect("Failed to read");
        assert_eq!(read, Some(unit.clone()));

        let sent = store
            .update_unit_status(&unit.id, StatusUpdate::sent(Utc::now()))
            .await
            .expect("Failed to update");
        assert_eq!(sent.status, UnitStatus::Sent);

        assert_eq!(store.delete_units(&[unit.id]).await.unwrap(), 1);
        assert!(store.get_unit(&unit.id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_body_edit_only_while_pending() {
        let store = MemoryCampaignStore::new();
        let unit = store.create_unit(new_unit("a@example.com")).await.unwrap();

        let edited = store
            .update_unit_body(&unit.id, "first".to_string())
            .await
            .unwrap();
        assert_eq!(edited.body, "first");
        assert_eq!(edited.status, UnitStatus::Pending);
        assert_eq!(edited.scheduled_at, unit.scheduled_at);

        store
            .update_unit_status(&unit.id, StatusUpdate::failed("boom"))
            .await
            .unwrap();

        let result = store.update_unit_body(&unit.id, "second".to_string()).await;
        assert!(matches!(result, Err(StoreError::NotPending(id)) if id == unit.id));
    }

    #[tokio::test]
    async fn test_missing_unit_operations() {
        let store = MemoryCampaignStore::new();
        let id = UnitId::generate();

        assert!(store.get_unit(&id).await.unwrap().is_none());
        assert!(matches!(
            store.update_unit_status(&id, StatusUpdate::sent(Utc::now())).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update_unit_body(&id, String::new()).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.delete_units(&[id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryCampaignStore::with_capacity(2);

        store.create_unit(new_unit("1@example.com")).await.unwrap();
        let second = store.create_unit(new_unit("2@example.com")).await.unwrap();

        let result = store.create_unit(new_unit("3@example.com")).await;
        assert!(matches!(
            result,
            Err(StoreError::CapacityExceeded {
                used: 2,
                capacity: 2
            })
        ));

        store.delete_units(&[second.id]).await.unwrap();
        assert!(store.create_unit(new_unit("3@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_pending_in_schedule_order() {
        let store = MemoryCampaignStore::new();
        let now = Utc::now();

        for (i, recipient) in ["c", "a", "b"].into_iter().enumerate() {
            let mut unit = new_unit(recipient);
            unit.scheduled_at = now + chrono::TimeDelta::seconds([30, 10, 20][i]);
            store.create_unit(unit).await.unwrap();
        }

        let listed = store
            .list_units(UnitQuery::with_status(
                UnitStatus::Pending,
                UnitOrder::ScheduledAsc,
            ))
            .await
            .unwrap();
        let recipients: Vec<_> = listed.iter().map(|u| u.recipient.as_str()).collect();
        assert_eq!(recipients, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_creates_have_unique_ids() {
        let store = MemoryCampaignStore::new();

        let mut handles = vec![];
        for i in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_unit(new_unit(&format!("{i}@example.com"))).await
            }));
        }

        for handle in handles {
            handle.await.expect("Task panicked").expect("Create failed");
        }

        assert_eq!(store.len(), 100);
    }
}
