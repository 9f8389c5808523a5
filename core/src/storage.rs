use crate::error::{Error, ScoreResult};
use crate::reputation::MinerHistory;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const HISTORY_FILE: &str = "history.json";
const PENDING_FILE: &str = "pending_weights.json";
const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredHistories {
    version: u32,
    histories: Vec<MinerHistory>,
}

/// On-disk home of participant histories and the pending weight table.
#[derive(Debug, Clone)]
pub struct HistoryStorage {
    data_dir: PathBuf,
}

impl HistoryStorage {
    pub fn with_path(data_dir: impl Into<PathBuf>) -> ScoreResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn pending_path(&self) -> PathBuf {
        self.data_dir.join(PENDING_FILE)
    }

    pub fn has_history(&self) -> bool {
        self.history_path().exists()
    }

    pub fn load_histories(&self) -> ScoreResult<Vec<MinerHistory>> {
        let stored: Option<StoredHistories> = read_json(&self.history_path())?;

        match stored {
            Some(stored) if stored.version != STORE_FORMAT_VERSION => Err(Error::Storage(format!(
                "Unsupported history format version {}",
                stored.version
            ))),
            Some(stored) => Ok(stored.histories),
            None => Ok(Vec::new()),
        }
    }

    pub fn save_histories(&self, histories: &[MinerHistory]) -> ScoreResult<()> {
        let stored = StoredHistories {
            version: STORE_FORMAT_VERSION,
            histories: histories.to_vec(),
        };
        write_json_atomic(&self.history_path(), &stored)?;

        tracing::debug!(
            participants = histories.len(),
            path = %self.history_path().display(),
            "Saved histories"
        );
        Ok(())
    }

    pub fn load_pending<T: DeserializeOwned>(&self) -> ScoreResult<Option<T>> {
        read_json(&self.pending_path())
    }

    pub fn save_pending<T: Serialize>(&self, pending: &T) -> ScoreResult<()> {
        write_json_atomic(&self.pending_path(), pending)
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> ScoreResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;

    let value = serde_json::from_str(&json)
        .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))?;

    Ok(Some(value))
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> ScoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Storage(format!("Failed to serialize: {}", e)))?;

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;
    file.write_all(&json)
        .map_err(|e| Error::Storage(format!("Failed to write temp file: {}", e)))?;
    file.as_file()
        .sync_all()
        .map_err(|e| Error::Storage(format!("Failed to sync temp file: {}", e)))?;

    file.persist(path)
        .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::{HistoryConfig, HistoryTracker};
    use crate::types::MinerUid;
    use tempfile::TempDir;

    fn create_test_storage() -> (HistoryStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = HistoryStorage::with_path(temp_dir.path().to_path_buf()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_missing_history_loads_empty() {
        let (storage, _temp) = create_test_storage();
        assert!(!storage.has_history());
        assert!(storage.load_histories().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_histories() {
        let (storage, _temp) = create_test_storage();

        let mut tracker = HistoryTracker::new(HistoryConfig::default());
        tracker.bind_hotkey(MinerUid::new(3), "hk_3");
        tracker.update(MinerUid::new(3), 1.65);
        tracker.update(MinerUid::new(8), -5.0);

        storage.save_histories(&tracker.snapshot()).unwrap();
        assert!(storage.has_history());

        let loaded = storage.load_histories().unwrap();
        assert_eq!(loaded, tracker.snapshot());
    }

    #[test]
    fn test_save_overwrites_previous() {
        let (storage, _temp) = create_test_storage();

        let mut tracker = HistoryTracker::new(HistoryConfig::default());
        tracker.update(MinerUid::new(1), 1.0);
        storage.save_histories(&tracker.snapshot()).unwrap();

        tracker.update(MinerUid::new(1), 1.0);
        storage.save_histories(&tracker.snapshot()).unwrap();

        let loaded = storage.load_histories().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].request_count, 2);
    }

    #[test]
    fn test_corrupt_history_is_an_error() {
        let (storage, _temp) = create_test_storage();
        std::fs::write(storage.history_path(), "{not json").unwrap();
        assert!(matches!(storage.load_histories(), Err(Error::Storage(_))));
    }

    #[test]
    fn test_unknown_format_version_rejected() {
        let (storage, _temp) = create_test_storage();
        std::fs::write(storage.history_path(), r#"{"version": 99, "histories": []}"#).unwrap();
        assert!(storage.load_histories().is_err());
    }

    #[test]
    fn test_pending_round_trip() {
        let (storage, _temp) = create_test_storage();

        assert_eq!(storage.load_pending::<Vec<u16>>().unwrap(), None);

        storage.save_pending(&vec![1u16, 2, 3]).unwrap();
        assert_eq!(storage.load_pending::<Vec<u16>>().unwrap(), Some(vec![1, 2, 3]));
        assert!(storage.pending_path().exists());
    }
}
