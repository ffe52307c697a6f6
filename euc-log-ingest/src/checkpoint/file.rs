use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::ConfigStore;
use crate::error::IngestError;

/// A JSON object on disk. Writes go to a sibling temp file that is then renamed over
/// the old one, so readers only ever see a complete document.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Map<String, Value>, IngestError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(IngestError::Store(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(IngestError::Store(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(IngestError::Store(format!(
                "failed to parse {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn read(&self) -> Result<Map<String, Value>, IngestError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn update(&self, patch: Map<String, Value>) -> Result<(), IngestError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.extend(patch);

        let bytes = serde_json::to_vec_pretty(&values)
            .map_err(|e| IngestError::Store(format!("failed to serialize checkpoint: {e}")))?;
        let store_err = |e: std::io::Error| {
            IngestError::Store(format!("failed to write {}: {e}", self.path.display()))
        };

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await.map_err(store_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(store_err)?;

        debug!(path = %self.path.display(), "wrote checkpoint store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("checkpoint.json"));
        assert!(store.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"name": "v11", "extra": true}"#).unwrap();

        let store = JsonFileStore::new(&path);
        let mut patch = Map::new();
        patch.insert("last_file_processed".to_owned(), json!("2021_06_01.csv"));
        store.update(patch).await.unwrap();

        // A fresh store sees what the first one wrote
        let reopened = JsonFileStore::new(&path).read().await.unwrap();
        assert_eq!(reopened["name"], "v11");
        assert_eq!(reopened["extra"], true);
        assert_eq!(reopened["last_file_processed"], "2021_06_01.csv");

        let leftovers: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["checkpoint.json"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_store_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).read().await,
            Err(IngestError::Store(_))
        ));

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).read().await,
            Err(IngestError::Store(_))
        ));
    }
}
