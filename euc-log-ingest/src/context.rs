use std::sync::Arc;

use anyhow::{Context, Error};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{OAuthRefresher, StaticToken, TokenProvider};
use crate::checkpoint::{Checkpoint, ConfigStore, JsonFileStore};
use crate::config::{Config, SinkKind, StorageKind};
use crate::emit::{EventSink, FileSink, HomeAssistantSink, NoOpSink, StdoutSink};
use crate::health::{wait_for_shutdown_signal, Readiness};
use crate::ingest::Ingestor;
use crate::source::{DriveStorage, FolderStorage, Storage};

/// Everything the worker is wired from, built once at startup.
pub struct AppContext {
    pub config: Config,
    pub tokens: Arc<dyn TokenProvider>,
    pub storage: Arc<dyn Storage>,
    pub sink: Arc<dyn EventSink>,
    pub store: Arc<dyn ConfigStore>,
    pub shutdown: CancellationToken,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, Error> {
        let timeout = config.request_timeout();

        let tokens: Arc<dyn TokenProvider> = if config.oauth_refresh_token.is_empty() {
            if config.storage == StorageKind::Drive && config.access_token.is_empty() {
                warn!("drive storage configured without OAUTH_REFRESH_TOKEN or ACCESS_TOKEN");
            }
            Arc::new(StaticToken::new(&config.access_token))
        } else {
            Arc::new(OAuthRefresher::new(
                &config.oauth_token_url,
                &config.oauth_client_id,
                &config.oauth_client_secret,
                &config.oauth_refresh_token,
                timeout,
            )?)
        };

        let storage: Arc<dyn Storage> = match config.storage {
            StorageKind::Folder => Arc::new(
                FolderStorage::new(&config.folder_path)
                    .await
                    .with_context(|| "Failed to open log folder")?,
            ),
            StorageKind::Drive => Arc::new(DriveStorage::new(
                &config.drive_api_url,
                &config.drive_folder_name,
                timeout,
            )?),
        };

        let sink: Arc<dyn EventSink> = match config.sink {
            SinkKind::Stdout => Arc::new(StdoutSink { as_json: true }),
            SinkKind::File => Arc::new(FileSink::new(config.sink_file_path.clone()).await?),
            SinkKind::HomeAssistant => Arc::new(HomeAssistantSink::new(
                &config.homeassistant_url,
                &config.homeassistant_token,
                timeout,
            )?),
            SinkKind::NoOp => Arc::new(NoOpSink),
        };

        info!(
            storage = ?config.storage,
            sink = ?config.sink,
            checkpoint_path = %config.checkpoint_path,
            "configured collaborators"
        );

        Ok(Self {
            config: config.clone(),
            tokens,
            storage,
            sink,
            store: Arc::new(JsonFileStore::new(&config.checkpoint_path)),
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn ingestor(&self) -> Result<Ingestor, Error> {
        let builder = self.config.builder().map_err(Error::msg)?;
        let checkpoint = Checkpoint::load(
            self.store.clone(),
            &self.config.device_name,
            &self.config.initial_last_file_processed,
        )
        .await
        .with_context(|| "Failed to load checkpoint")?;

        Ok(Ingestor::new(
            self.tokens.clone(),
            self.storage.clone(),
            self.sink.clone(),
            builder,
            checkpoint,
        )
        .with_pacer(self.config.pacer())
        .with_settings(self.config.ingest_settings()))
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::new(self.shutdown.clone())
    }

    /// Cancel the shared token on SIGINT or SIGTERM.
    pub fn spawn_shutdown_listener(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal().await {
                warn!("failed to listen for shutdown signals: {e}");
                return;
            }
            info!("shutting down");
            shutdown.cancel();
        });
    }
}
