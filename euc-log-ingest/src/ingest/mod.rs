use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AccessToken, TokenProvider};
use crate::checkpoint::Checkpoint;
use crate::emit::{EventSink, Pacer};
use crate::error::IngestError;
use crate::health::Liveness;
use crate::metric::{MetricEventBuilder, MetricState};
use crate::metrics_constants::*;
use crate::metrics_utils::{gauge, get_current_timestamp_seconds, inc, timing_guard};
use crate::parse::{default_aliases, FileParser};
use crate::select::select_next;
use crate::source::Storage;

pub const DEFAULT_SHORT_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_LONG_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Wait after a file was processed, there may be more to catch up on.
    pub short_delay: Duration,
    /// Wait when caught up or after a failed cycle.
    pub long_delay: Duration,
    /// Events buffered between the parser and the sink.
    pub channel_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            short_delay: DEFAULT_SHORT_DELAY,
            long_delay: DEFAULT_LONG_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl IngestSettings {
    // A healthy worker reports at least once per long delay, plus however long
    // one file takes between pacing pauses
    fn liveness_deadline(&self) -> Duration {
        self.long_delay.saturating_mul(4).max(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Data rows read, header excluded.
    pub rows: u64,
    /// Rows dropped for an unparseable timestamp.
    pub skipped_rows: u64,
    pub events: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub name: String,
    pub stats: FileStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// One file was fully emitted and the checkpoint moved past it.
    Processed(FileReport),
    /// No file newer than the checkpoint.
    CaughtUp,
}

/// The ingestion worker. Each cycle refreshes the credential, picks the next file
/// after the checkpoint, streams its change events into the sink and only then
/// advances the checkpoint.
pub struct Ingestor {
    tokens: Arc<dyn TokenProvider>,
    storage: Arc<dyn Storage>,
    sink: Arc<dyn EventSink>,
    builder: Arc<MetricEventBuilder>,
    aliases: Arc<HashMap<String, String>>,
    checkpoint: Checkpoint,
    pacer: Pacer,
    settings: IngestSettings,
    liveness: Liveness,
    metrics_labels: Vec<(String, String)>,
}

impl Ingestor {
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        storage: Arc<dyn Storage>,
        sink: Arc<dyn EventSink>,
        builder: MetricEventBuilder,
        checkpoint: Checkpoint,
    ) -> Self {
        let settings = IngestSettings::default();
        let metrics_labels = vec![("device".to_string(), builder.device_name().to_string())];
        Self {
            tokens,
            storage,
            sink,
            builder: Arc::new(builder),
            aliases: Arc::new(default_aliases()),
            checkpoint,
            pacer: Pacer::default(),
            liveness: Liveness::new(settings.liveness_deadline()),
            settings,
            metrics_labels,
        }
    }

    pub fn with_settings(mut self, settings: IngestSettings) -> Self {
        self.liveness = Liveness::new(settings.liveness_deadline());
        self.settings = settings;
        self
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Heartbeat handle for the liveness probe.
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Loop until `cancel` fires. Failed cycles are logged and retried after the
    /// long delay, nothing here ends the loop except shutdown.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(checkpoint = ?self.checkpoint.last(), "starting ingestion loop");

        while !cancel.is_cancelled() {
            let result = self.run_once(&cancel).await;
            self.liveness.report_healthy();

            match &result {
                Ok(CycleOutcome::Processed(report)) => info!(
                    file = %report.name,
                    rows = report.stats.rows,
                    skipped = report.stats.skipped_rows,
                    events = report.stats.events,
                    "processed file"
                ),
                Ok(CycleOutcome::CaughtUp) => debug!("no new files"),
                Err(IngestError::Cancelled(during)) => {
                    info!(during, "shutdown requested, stopping without committing");
                    break;
                }
                Err(e) => {
                    error!(kind = e.kind(), "ingestion cycle failed: {e}");
                    let mut labels = self.metrics_labels.clone();
                    labels.push(("kind".to_string(), e.kind().to_string()));
                    inc(CYCLE_FAILURES, &labels, 1);
                }
            }

            let delay = self.delay_after(&result);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!(checkpoint = ?self.checkpoint.last(), "ingestion loop stopped");
    }

    pub fn delay_after(&self, result: &Result<CycleOutcome, IngestError>) -> Duration {
        match result {
            Ok(CycleOutcome::Processed(_)) => self.settings.short_delay,
            Ok(CycleOutcome::CaughtUp) | Err(_) => self.settings.long_delay,
        }
    }

    /// One pass through the state machine. On any error the checkpoint is left
    /// where it was.
    pub async fn run_once(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, IngestError> {
        inc(CYCLE_STARTS, &self.metrics_labels, 1);

        debug!(phase = "idle", "refreshing credentials");
        let token = self.tokens.ensure_valid().await?;

        debug!(phase = "selecting", checkpoint = ?self.checkpoint.last(), "listing files");
        let listing = self.storage.list(&token).await?;
        let Some(name) = select_next(self.checkpoint.last(), &listing) else {
            inc(CYCLES_CAUGHT_UP, &self.metrics_labels, 1);
            return Ok(CycleOutcome::CaughtUp);
        };

        info!(phase = "parsing", file = %name, "processing file");
        let labels = self.metrics_labels.clone();
        let stats = {
            let _timing = timing_guard(FILE_PROCESSING_TIME, &labels);
            self.process_file(&token, &name, cancel).await?
        };

        debug!(phase = "committing", file = %name, "advancing checkpoint");
        self.checkpoint.commit(&name).await?;
        inc(FILES_PROCESSED, &self.metrics_labels, 1);
        gauge(
            CHECKPOINT_COMMITTED_AT,
            &self.metrics_labels,
            get_current_timestamp_seconds(),
        );

        Ok(CycleOutcome::Processed(FileReport { name, stats }))
    }

    async fn process_file(
        &mut self,
        token: &AccessToken,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<FileStats, IngestError> {
        let started = Instant::now();
        let stream = self.storage.open(token, name).await?;
        let reader = SyncIoBridge::new(stream);

        let (tx, mut rx) = mpsc::channel(self.settings.channel_capacity.max(1));

        let parse_handle = tokio::task::spawn_blocking({
            let file = name.to_owned();
            let builder = self.builder.clone();
            let aliases = self.aliases.clone();

            move || -> Result<FileStats, IngestError> {
                let parser = FileParser::new(&file, reader, &aliases)?;
                // Change detection starts over with every file
                let mut state = MetricState::default();
                let mut stats = FileStats::default();

                for row in parser {
                    let row = row?;
                    stats.rows += 1;

                    let events = match builder.build_row(&mut state, &row) {
                        Ok(events) => events,
                        Err(e) if e.is_row_level() => {
                            warn!(file, line = row.line, "skipping row: {e}");
                            stats.skipped_rows += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    for event in events {
                        // The receiver is gone when publishing failed or shutdown started,
                        // the async side reports why
                        if tx.blocking_send(event).is_err() {
                            return Ok(stats);
                        }
                    }
                }

                Ok(stats)
            }
        });

        let mut published = 0;
        let mut failure = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    failure = Some(IngestError::Cancelled(name.to_owned()));
                    break;
                }
                event = rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            if let Err(e) = self.sink.publish(event).await {
                failure = Some(e);
                break;
            }
            published += 1;
            self.liveness.report_healthy();

            if let Err(e) = self.pacer.tick(cancel).await {
                failure = Some(e);
                break;
            }
        }
        // Unblocks the parser if it is waiting on a full channel. A parser stuck in a
        // read on a stalled download is released by the storage's read timeout.
        drop(rx);

        let parsed = parse_handle
            .await
            .map_err(|e| IngestError::Transport(format!("parser for {name} died: {e}")))?;
        if let Some(e) = failure {
            return Err(e);
        }
        let mut stats = parsed?;
        stats.events = published;

        inc(ROWS_READ, &self.metrics_labels, stats.rows);
        inc(ROWS_SKIPPED, &self.metrics_labels, stats.skipped_rows);
        inc(EVENTS_EMITTED, &self.metrics_labels, stats.events);
        debug!(file = name, elapsed = ?started.elapsed(), "file emitted");

        Ok(stats)
    }
}
