use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use cadence_common::internal;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{fs, sync::Mutex};

use crate::{
    Campaign, CampaignId, DispatchUnit, NewCampaign, NewDispatchUnit, StatusUpdate, StoreError,
    UnitId, UnitQuery, r#trait::CampaignStore,
};

const CAMPAIGNS_DIR: &str = "campaigns";
const UNITS_DIR: &str = "units";

/// File-based campaign store
///
/// Each record is a bincode file named after its ULID:
/// - `{path}/campaigns/{id}.bin`
/// - `{path}/units/{id}.bin`
///
/// # Atomicity
/// Writes go to a `.tmp_` file first and are renamed into place, so a crash
/// never leaves a partially written record behind. Deletes rename the record
/// to a `.deleted` suffix before removing it; leftovers of an interrupted
/// delete are cleaned up by [`FileCampaignStore::init`].
///
/// Read-modify-write operations (status and body updates) are serialized by
/// a store-wide mutex.
#[derive(Debug)]
pub struct FileCampaignStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCampaignStore {
    /// Create a store rooted at `path`.
    ///
    /// # Errors
    /// If the path is relative, contains `..`, or points into a system directory
    pub fn new(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Validate a store path
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> crate::Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StoreError::Configuration(format!(
                "Store path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(StoreError::Configuration(format!(
                "Store path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(StoreError::Configuration(format!(
                "Store path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the record directories and clean up after interrupted deletes.
    ///
    /// # Errors
    /// - If a directory cannot be created
    /// - If the path exists but is not a directory
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising campaign store at {}", self.path.display());

        for dir in [CAMPAIGNS_DIR, UNITS_DIR] {
            let dir = self.path.join(dir);
            if !fs::try_exists(&dir).await? {
                fs::create_dir_all(&dir).await?;
            } else if !fs::metadata(&dir).await?.is_dir() {
                return Err(StoreError::Configuration(format!(
                    "Expected {} to be a directory, but it is not",
                    dir.display()
                )));
            }
        }

        let cleaned = self.cleanup_deleted_files().await?;
        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned .deleted files from the campaign store"
            );
        }

        Ok(())
    }

    async fn cleanup_deleted_files(&self) -> crate::Result<usize> {
        let mut cleaned = 0;

        for dir in [CAMPAIGNS_DIR, UNITS_DIR] {
            let mut entries = fs::read_dir(self.path.join(dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().ends_with(".deleted") {
                    fs::remove_file(entry.path()).await?;
                    cleaned += 1;
                }
            }
        }

        Ok(cleaned)
    }

    fn record_path(&self, dir: &str, id: &impl std::fmt::Display) -> PathBuf {
        self.path.join(dir).join(format!("{id}.bin"))
    }

    async fn write_record<T: Serialize + Sync>(&self, path: &Path, record: &T) -> crate::Result<()> {
        let encoded = bincode::serde::encode_to_vec(record, bincode::config::standard())?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".tmp_{file_name}"));

        fs::write(&temp_path, &encoded).await?;
        fs::rename(&temp_path, path).await?;

        Ok(())
    }

    /// Read a record, `None` if the file does not exist
    async fn read_record<T: DeserializeOwned>(path: &Path) -> crate::Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let (record, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Two-phase delete, `false` if the record did not exist
    async fn delete_record(path: &Path) -> crate::Result<bool> {
        let mut deleted = path.as_os_str().to_owned();
        deleted.push(".deleted");
        let deleted = PathBuf::from(deleted);

        match fs::rename(path, &deleted).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        fs::remove_file(&deleted).await?;
        Ok(true)
    }
}

#[async_trait]
impl CampaignStore for FileCampaignStore {
    async fn create_campaign(&self, campaign: NewCampaign) -> crate::Result<Campaign> {
        let campaign = campaign.into_campaign(CampaignId::generate(), Utc::now());
        self.write_record(&self.record_path(CAMPAIGNS_DIR, &campaign.id), &campaign)
            .await?;
        Ok(campaign)
    }

    async fn get_campaign(&self, id: &CampaignId) -> crate::Result<Option<Campaign>> {
        Self::read_record(&self.record_path(CAMPAIGNS_DIR, id)).await
    }

    async fn create_unit(&self, unit: NewDispatchUnit) -> crate::Result<DispatchUnit> {
        let unit = unit.into_unit(UnitId::generate(), Utc::now());
        self.write_record(&self.record_path(UNITS_DIR, &unit.id), &unit)
            .await?;

        internal!(level = DEBUG, "Stored dispatch unit {}", unit.id);

        Ok(unit)
    }

    async fn get_unit(&self, id: &UnitId) -> crate::Result<Option<DispatchUnit>> {
        Self::read_record(&self.record_path(UNITS_DIR, id)).await
    }

    async fn update_unit_status(
        &self,
        id: &UnitId,
        update: StatusUpdate,
    ) -> crate::Result<DispatchUnit> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(UNITS_DIR, id);

        let mut unit: DispatchUnit = Self::read_record(&path)
            .await?
            .ok_or(StoreError::NotFound(*id))?;
        update.apply(&mut unit, Utc::now());
        self.write_record(&path, &unit).await?;

        Ok(unit)
    }

    async fn update_unit_body(&self, id: &UnitId, body: String) -> crate::Result<DispatchUnit> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(UNITS_DIR, id);

        let mut unit: DispatchUnit = Self::read_record(&path)
            .await?
            .ok_or(StoreError::NotFound(*id))?;

        if !unit.status.is_pending() {
            return Err(StoreError::NotPending(*id));
        }

        unit.body = body;
        unit.updated_at = Utc::now();
        self.write_record(&path, &unit).await?;

        Ok(unit)
    }

    async fn delete_units(&self, ids: &[UnitId]) -> crate::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut deleted = 0;

        for id in ids {
            if Self::delete_record(&self.record_path(UNITS_DIR, id)).await? {
                deleted += 1;
            }
        }

        internal!(level = DEBUG, "Deleted {deleted} dispatch units");

        Ok(deleted)
    }

    async fn list_units(&self, query: UnitQuery) -> crate::Result<Vec<DispatchUnit>> {
        let mut entries = fs::read_dir(self.path.join(UNITS_DIR)).await?;
        let mut units = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if UnitId::from_filename(&file_name.to_string_lossy()).is_none() {
                continue;
            }

            // A concurrent delete may remove the file between listing and reading
            if let Some(unit) = Self::read_record(&entry.path()).await? {
                units.push(unit);
            }
        }

        Ok(query.apply(units))
    }
}
