use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;
use envconfig::Envconfig;

use crate::emit::Pacer;
use crate::ingest::IngestSettings;
use crate::metric::MetricEventBuilder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Folder,
    Drive,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "folder" => Ok(StorageKind::Folder),
            "drive" => Ok(StorageKind::Drive),
            _ => Err(format!("Unknown storage: {s}, must be folder or drive")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    Stdout,
    File,
    HomeAssistant,
    NoOp,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "stdout" => Ok(SinkKind::Stdout),
            "file" => Ok(SinkKind::File),
            "homeassistant" => Ok(SinkKind::HomeAssistant),
            "noop" => Ok(SinkKind::NoOp),
            _ => Err(format!(
                "Unknown sink: {s}, must be stdout, file, homeassistant or noop"
            )),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    // Prefix of every entity key, and the store's `name` on first run
    #[envconfig(from = "DEVICE_NAME", default = "euc")]
    pub device_name: String,

    // IANA zone the logger writes its naive timestamps in
    #[envconfig(from = "DEVICE_TIMEZONE", default = "UTC")]
    pub device_timezone: String,

    // Files at or before this name are never processed on a fresh install
    #[envconfig(from = "INITIAL_LAST_FILE_PROCESSED", default = "")]
    pub initial_last_file_processed: String,

    #[envconfig(from = "STORAGE", default = "folder")]
    pub storage: StorageKind,

    #[envconfig(from = "FOLDER_PATH", default = "./logs")]
    pub folder_path: String,

    #[envconfig(
        from = "DRIVE_API_URL",
        default = "https://www.googleapis.com/drive/v3"
    )]
    pub drive_api_url: String,

    #[envconfig(from = "DRIVE_FOLDER_NAME", default = "EucWorld Logs")]
    pub drive_folder_name: String,

    #[envconfig(
        from = "OAUTH_TOKEN_URL",
        default = "https://oauth2.googleapis.com/token"
    )]
    pub oauth_token_url: String,

    #[envconfig(from = "OAUTH_CLIENT_ID", default = "")]
    pub oauth_client_id: String,

    #[envconfig(from = "OAUTH_CLIENT_SECRET", default = "")]
    pub oauth_client_secret: String,

    // When empty, ACCESS_TOKEN is used as is
    #[envconfig(from = "OAUTH_REFRESH_TOKEN", default = "")]
    pub oauth_refresh_token: String,

    #[envconfig(from = "ACCESS_TOKEN", default = "")]
    pub access_token: String,

    #[envconfig(from = "CHECKPOINT_PATH", default = "./euc_logs_checkpoint.json")]
    pub checkpoint_path: String,

    #[envconfig(from = "SINK", default = "stdout")]
    pub sink: SinkKind,

    #[envconfig(from = "SINK_FILE_PATH", default = "./events.jsonl")]
    pub sink_file_path: String,

    #[envconfig(from = "HOMEASSISTANT_URL", default = "http://localhost:8123")]
    pub homeassistant_url: String,

    #[envconfig(from = "HOMEASSISTANT_TOKEN", default = "")]
    pub homeassistant_token: String,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "10000")]
    pub request_timeout_ms: u64,

    #[envconfig(from = "SHORT_DELAY_SECONDS", default = "10")]
    pub short_delay_seconds: u64,

    #[envconfig(from = "LONG_DELAY_SECONDS", default = "60")]
    pub long_delay_seconds: u64,

    #[envconfig(from = "EMIT_BATCH_SIZE", default = "100")]
    pub emit_batch_size: usize,

    #[envconfig(from = "EMIT_PAUSE_MS", default = "200")]
    pub emit_pause_ms: u64,

    #[envconfig(from = "DEBOUNCE_SECONDS", default = "300")]
    pub debounce_seconds: i64,

    #[envconfig(from = "EMIT_CHANNEL_CAPACITY", default = "1024")]
    pub emit_channel_capacity: usize,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn timezone(&self) -> Result<Tz, String> {
        Tz::from_str(&self.device_timezone)
            .map_err(|e| format!("invalid DEVICE_TIMEZONE {:?}: {e}", self.device_timezone))
    }

    pub fn builder(&self) -> Result<MetricEventBuilder, String> {
        let debounce = TimeDelta::try_seconds(self.debounce_seconds)
            .filter(|window| *window >= TimeDelta::zero())
            .ok_or_else(|| format!("invalid DEBOUNCE_SECONDS {}", self.debounce_seconds))?;

        Ok(MetricEventBuilder::new(&self.device_name)
            .with_timezone(self.timezone()?)
            .with_debounce(debounce))
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(
            self.emit_batch_size,
            Duration::from_millis(self.emit_pause_ms),
        )
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            short_delay: Duration::from_secs(self.short_delay_seconds),
            long_delay: Duration::from_secs(self.long_delay_seconds),
            channel_capacity: self.emit_channel_capacity,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
