use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::IngestError;

pub mod file;

pub use file::JsonFileStore;

pub const NAME_KEY: &str = "name";
pub const LAST_FILE_PROCESSED_KEY: &str = "last_file_processed";

/// Persistent key/value configuration the loop keeps its progress in.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read(&self) -> Result<Map<String, Value>, IngestError>;

    /// Merge `patch` into the stored object. Keys not in `patch` are left alone.
    async fn update(&self, patch: Map<String, Value>) -> Result<(), IngestError>;
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn read(&self) -> Result<Map<String, Value>, IngestError> {
        let values = self.values.lock().await;
        Ok(values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn update(&self, patch: Map<String, Value>) -> Result<(), IngestError> {
        self.values.lock().await.extend(patch);
        Ok(())
    }
}

/// The name of the last fully processed file, backed by a `ConfigStore`.
///
/// Read once at startup, afterwards the in-memory copy is authoritative and every
/// commit is written through. The value never moves backwards.
pub struct Checkpoint {
    store: Arc<dyn ConfigStore>,
    last: Option<String>,
}

impl Checkpoint {
    /// Load the checkpoint, seeding the first-run fields when the store has never
    /// been written by us (no `name` key).
    pub async fn load(
        store: Arc<dyn ConfigStore>,
        device_name: &str,
        initial_last_file: &str,
    ) -> Result<Self, IngestError> {
        let mut values = store.read().await?;

        if !values.contains_key(NAME_KEY) {
            let mut seed = Map::new();
            seed.insert(NAME_KEY.to_owned(), Value::from(device_name));
            if !values.contains_key(LAST_FILE_PROCESSED_KEY) {
                seed.insert(
                    LAST_FILE_PROCESSED_KEY.to_owned(),
                    Value::from(initial_last_file),
                );
            }
            info!(device_name, initial_last_file, "seeding checkpoint store");
            store.update(seed.clone()).await?;
            values.extend(seed);
        }

        let last = match values.get(LAST_FILE_PROCESSED_KEY) {
            Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(other) => {
                return Err(IngestError::Store(format!(
                    "{LAST_FILE_PROCESSED_KEY} is not a string: {other}"
                )))
            }
        };

        Ok(Self { store, last })
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Persist `name` as processed. Returns whether the checkpoint moved.
    pub async fn commit(&mut self, name: &str) -> Result<bool, IngestError> {
        if self.last.as_deref().is_some_and(|last| name <= last) {
            warn!(name, last = ?self.last, "refusing to move checkpoint backwards");
            return Ok(false);
        }

        let mut patch = Map::new();
        patch.insert(LAST_FILE_PROCESSED_KEY.to_owned(), Value::from(name));
        self.store.update(patch).await?;

        self.last = Some(name.to_owned());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_first_run_seeds_the_store() {
        let store = Arc::new(MemoryStore::new());
        let checkpoint = Checkpoint::load(store.clone(), "v11", "2021_01_01.csv")
            .await
            .unwrap();

        assert_eq!(checkpoint.last(), Some("2021_01_01.csv"));
        assert_eq!(
            store.read().await.unwrap(),
            object(json!({"name": "v11", "last_file_processed": "2021_01_01.csv"}))
        );
    }

    #[tokio::test]
    async fn test_empty_seed_means_no_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let checkpoint = Checkpoint::load(store, "v11", "").await.unwrap();
        assert_eq!(checkpoint.last(), None);
    }

    #[tokio::test]
    async fn test_existing_store_is_not_reseeded() {
        let store = Arc::new(MemoryStore::with_values(object(json!({
            "name": "mten",
            "last_file_processed": "2021_06_03.csv",
            "unrelated": 7,
        }))));
        let checkpoint = Checkpoint::load(store.clone(), "v11", "2020_01_01.csv")
            .await
            .unwrap();

        assert_eq!(checkpoint.last(), Some("2021_06_03.csv"));
        let values = store.read().await.unwrap();
        assert_eq!(values["name"], "mten");
        assert_eq!(values["unrelated"], 7);
    }

    #[tokio::test]
    async fn test_commit_writes_through_and_never_goes_back() {
        let store = Arc::new(MemoryStore::new());
        let mut checkpoint = Checkpoint::load(store.clone(), "v11", "").await.unwrap();

        assert!(checkpoint.commit("2021_06_02.csv").await.unwrap());
        assert!(!checkpoint.commit("2021_06_01.csv").await.unwrap());
        assert!(!checkpoint.commit("2021_06_02.csv").await.unwrap());
        assert_eq!(checkpoint.last(), Some("2021_06_02.csv"));
        assert_eq!(
            store.read().await.unwrap()["last_file_processed"],
            "2021_06_02.csv"
        );
    }

    #[tokio::test]
    async fn test_non_string_checkpoint_is_a_store_error() {
        let store = Arc::new(MemoryStore::with_values(object(json!({
            "name": "v11",
            "last_file_processed": 12,
        }))));
        assert!(matches!(
            Checkpoint::load(store, "v11", "").await,
            Err(IngestError::Store(_))
        ));
    }
}
