use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::metric::ChangeEvent;

pub mod homeassistant;

pub use homeassistant::HomeAssistantSink;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(200);

/// Destination for change events. A failed publish fails the file being processed.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ChangeEvent) -> Result<(), IngestError>;
}

fn to_json(event: &ChangeEvent) -> Result<String, IngestError> {
    serde_json::to_string(event)
        .map_err(|e| IngestError::Sink(format!("failed to serialize event: {e}")))
}

pub struct StdoutSink {
    pub as_json: bool,
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn publish(&self, event: ChangeEvent) -> Result<(), IngestError> {
        if self.as_json {
            println!("{}", to_json(&event)?);
        } else {
            println!("{event:?}");
        }
        Ok(())
    }
}

pub struct NoOpSink;

#[async_trait]
impl EventSink for NoOpSink {
    async fn publish(&self, _event: ChangeEvent) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Appends one JSON document per line.
pub struct FileSink {
    pub path: String,
    file: Mutex<tokio::fs::File>,
}

impl FileSink {
    pub async fn new(path: String) -> Result<Self, IngestError> {
        info!("Creating file sink at {}", path);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| IngestError::Sink(format!("failed to open {path}: {e}")))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl EventSink for FileSink {
    async fn publish(&self, event: ChangeEvent) -> Result<(), IngestError> {
        let line = format!("{}\n", to_json(&event)?);
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| IngestError::Sink(format!("failed to write {}: {e}", self.path)))?;
        file.flush()
            .await
            .map_err(|e| IngestError::Sink(format!("failed to flush {}: {e}", self.path)))
    }
}

/// Throttles publishing: after every `batch_size` events the caller pauses for
/// `pause`. The count carries over between files.
#[derive(Debug, Clone)]
pub struct Pacer {
    batch_size: usize,
    pause: Duration,
    published: u64,
}

impl Pacer {
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        Self {
            batch_size,
            pause,
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Count one published event, sleeping when a batch is complete. Returns
    /// `Cancelled` if shutdown is requested during the pause.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        self.published += 1;
        if self.batch_size == 0 || self.pause.is_zero() {
            return Ok(());
        }
        if self.published % self.batch_size as u64 != 0 {
            return Ok(());
        }

        debug!(published = self.published, pause = ?self.pause, "pacing pause");
        tokio::select! {
            _ = tokio::time::sleep(self.pause) => Ok(()),
            _ = cancel.cancelled() => Err(IngestError::Cancelled("pacing pause".to_string())),
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_PAUSE)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tokio::time::Instant;

    use super::*;

    fn event(value: &str) -> ChangeEvent {
        ChangeEvent {
            entity_key: "sensor.euc_speed".to_string(),
            value: value.to_string(),
            attributes: BTreeMap::from([("source".to_string(), "euc_logs".to_string())]),
            timestamp: Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_file_sink_appends_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        std::fs::write(&path, "").unwrap();

        let sink = FileSink::new(path.to_string_lossy().into_owned())
            .await
            .unwrap();
        sink.publish(event("10")).await.unwrap();
        sink.publish(event("11")).await.unwrap();

        let written: Vec<ChangeEvent> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(written, vec![event("10"), event("11")]);
    }

    #[tokio::test]
    async fn test_file_sink_fails_on_unwritable_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("events.jsonl");
        assert!(matches!(
            FileSink::new(path.to_string_lossy().into_owned()).await,
            Err(IngestError::Sink(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_pauses_after_each_batch() {
        let cancel = CancellationToken::new();
        let mut pacer = Pacer::new(3, Duration::from_millis(200));

        let start = Instant::now();
        for _ in 0..7 {
            pacer.tick(&cancel).await.unwrap();
        }
        assert_eq!(pacer.published(), 7);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut pacer = Pacer::new(1, Duration::from_secs(3600));
        assert!(matches!(
            pacer.tick(&cancel).await,
            Err(IngestError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_pause_never_sleeps() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut pacer = Pacer::new(1, Duration::ZERO);
        for _ in 0..10 {
            pacer.tick(&cancel).await.unwrap();
        }
    }
}
