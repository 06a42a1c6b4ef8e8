use async_trait::async_trait;

use crate::{
    Campaign, CampaignId, DispatchUnit, NewCampaign, NewDispatchUnit, StatusUpdate, UnitId,
    UnitQuery,
};

/// Persistence consumed by the scheduler, the worker pool and the API.
///
/// Implementations must make each single-record operation atomic. The worker
/// pool guarantees that only one worker mutates a given unit at a time, but a
/// body edit may race a status update, and neither may be lost.
#[async_trait]
pub trait CampaignStore: Send + Sync + std::fmt::Debug {
    /// Persist a new campaign and return it with its identifier
    async fn create_campaign(&self, campaign: NewCampaign) -> crate::Result<Campaign>;

    async fn get_campaign(&self, id: &CampaignId) -> crate::Result<Option<Campaign>>;

    /// Persist a new `Pending` unit and return it with its identifier
    async fn create_unit(&self, unit: NewDispatchUnit) -> crate::Result<DispatchUnit>;

    /// Read a unit, `None` when it does not exist (e.g. it was deleted)
    async fn get_unit(&self, id: &UnitId) -> crate::Result<Option<DispatchUnit>>;

    /// Record the resolution of a delivery attempt.
    ///
    /// # Errors
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) if the unit no longer exists
    async fn update_unit_status(
        &self,
        id: &UnitId,
        update: StatusUpdate,
    ) -> crate::Result<DispatchUnit>;

    /// Replace the body of a pending unit.
    ///
    /// # Errors
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) for unknown units and
    /// [`StoreError::NotPending`](crate::StoreError::NotPending) once the unit has been resolved
    async fn update_unit_body(&self, id: &UnitId, body: String) -> crate::Result<DispatchUnit>;

    /// Delete the given units, ignoring unknown identifiers. Returns how many
    /// records were removed.
    async fn delete_units(&self, ids: &[UnitId]) -> crate::Result<usize>;

    async fn list_units(&self, query: UnitQuery) -> crate::Result<Vec<DispatchUnit>>;
}
