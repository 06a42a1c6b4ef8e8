use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileCampaignStore, MemoryCampaignStore, r#trait::CampaignStore};

/// Configuration for the campaign store
///
/// # Examples
///
/// File-backed store in RON config:
/// ```ron
/// Cadence (
///     store: File(
///         path: "/var/lib/cadence",
///     ),
/// )
/// ```
///
/// Memory-backed store with a capacity limit:
/// ```ron
/// Cadence (
///     store: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    /// One file per record (durable)
    File { path: PathBuf },
    /// In-process maps (testing/development)
    Memory {
        /// Maximum number of units to store (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory { capacity: None }
    }
}

impl StoreConfig {
    /// Build the configured store, preparing its directories if it is file
    /// backed.
    ///
    /// # Errors
    /// If the file store path is invalid or cannot be initialised
    pub async fn into_store(self) -> crate::Result<Arc<dyn CampaignStore>> {
        match self {
            Self::File { path } => {
                let store = FileCampaignStore::new(path)?;
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => {
                let store = capacity.map_or_else(MemoryCampaignStore::new, MemoryCampaignStore::with_capacity);
                Ok(Arc::new(store))
            }
        }
    }
}
