use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use euc_log_ingest::auth::StaticToken;
use euc_log_ingest::checkpoint::{Checkpoint, ConfigStore};
use euc_log_ingest::emit::{EventSink, Pacer};
use euc_log_ingest::error::IngestError;
use euc_log_ingest::ingest::{IngestSettings, Ingestor};
use euc_log_ingest::metric::{ChangeEvent, MetricEventBuilder};
use euc_log_ingest::source::FolderStorage;
use tokio::sync::Mutex;

pub const DEVICE: &str = "v11";

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingSink {
    pub async fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().await.clone()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| format!("{}={}", e.entity_key, e.value))
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: ChangeEvent) -> Result<(), IngestError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

pub fn write_log(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

pub async fn ingestor(
    dir: &Path,
    store: Arc<dyn ConfigStore>,
    sink: Arc<RecordingSink>,
) -> Ingestor {
    let checkpoint = Checkpoint::load(store, DEVICE, "").await.unwrap();
    let storage = FolderStorage::new(dir).await.unwrap();

    Ingestor::new(
        Arc::new(StaticToken::new("")),
        Arc::new(storage),
        sink,
        MetricEventBuilder::new(DEVICE),
        checkpoint,
    )
    .with_pacer(Pacer::new(100, Duration::ZERO))
    .with_settings(IngestSettings {
        channel_capacity: 4,
        ..Default::default()
    })
}
