//! Durable record of campaigns and their dispatch units.
//!
//! The dispatch pipeline only talks to persistence through the
//! [`CampaignStore`] trait. Two backends ship with the crate:
//! - [`MemoryCampaignStore`]: in-process maps, for tests and development
//! - [`FileCampaignStore`]: one bincode file per record under a directory

pub mod backends;
pub mod config;
pub mod error;
pub mod record;
pub mod r#trait;
pub mod types;

pub use backends::{FileCampaignStore, MemoryCampaignStore};
pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError};
pub use record::{
    Campaign, DispatchUnit, NewCampaign, NewDispatchUnit, StatusUpdate, UnitOrder, UnitQuery,
};
pub use r#trait::CampaignStore;
pub use types::{CampaignId, UnitId};
