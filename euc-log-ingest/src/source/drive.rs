use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use super::{FileEntry, FileStream, Storage};
use crate::auth::AccessToken;
use crate::error::IngestError;

pub const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_FOLDER_NAME: &str = "EucWorld Logs";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
}

// Drive query string literals escape quotes and backslashes
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn transport(context: &str) -> impl Fn(reqwest::Error) -> IngestError + '_ {
    move |e| IngestError::Transport(format!("{context}: {e}"))
}

/// Logs uploaded by the EUC World app into a Google Drive folder, found by name.
///
/// Drive addresses files by id, so listing remembers the name to id mapping that
/// `open` later needs. The folder id is resolved once and cached.
///
/// `timeout` bounds each listing query end to end. Downloads are read only as fast as
/// events are published, so they get a connect timeout and an idle timeout per read
/// instead of a total deadline.
pub struct DriveStorage {
    client: Client,
    timeout: Duration,
    api_url: String,
    folder_name: String,
    folder_id: Mutex<Option<String>>,
    file_ids: Mutex<HashMap<String, String>>,
}

impl DriveStorage {
    pub fn new(api_url: &str, folder_name: &str, timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(transport("failed to build http client"))?;

        Ok(Self {
            client,
            timeout,
            api_url: api_url.trim_end_matches('/').to_owned(),
            folder_name: folder_name.to_owned(),
            folder_id: Mutex::new(None),
            file_ids: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, token: &AccessToken, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}/{path}", self.api_url))
            .bearer_auth(token.as_str())
    }

    async fn query(
        &self,
        token: &AccessToken,
        q: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, IngestError> {
        let mut request = self.get(token, "files").timeout(self.timeout).query(&[
            ("q", q),
            ("fields", "nextPageToken,files(id,name,mimeType)"),
            ("pageSize", PAGE_SIZE),
        ]);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        request
            .send()
            .await
            .map_err(transport("drive file query failed"))?
            .error_for_status()
            .map_err(transport("drive file query rejected"))?
            .json()
            .await
            .map_err(transport("drive file query returned garbage"))
    }

    async fn folder_id(&self, token: &AccessToken) -> Result<String, IngestError> {
        let mut cached = self.folder_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let q = format!(
            "name = {} and mimeType = {} and trashed = false",
            quote(&self.folder_name),
            quote(FOLDER_MIME_TYPE)
        );
        let found = self.query(token, &q, None).await?;
        let id = found
            .files
            .into_iter()
            .next()
            .map(|folder| folder.id)
            .ok_or_else(|| {
                IngestError::Transport(format!("drive folder {:?} not found", self.folder_name))
            })?;

        info!(folder = %self.folder_name, id, "resolved drive folder");
        *cached = Some(id.clone());
        Ok(id)
    }

    async fn file_id(&self, token: &AccessToken, name: &str) -> Result<String, IngestError> {
        if let Some(id) = self.file_ids.lock().await.get(name) {
            return Ok(id.clone());
        }

        // Not seen yet, the file may have been uploaded after the last listing
        self.list(token).await?;
        self.file_ids
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::Transport(format!("{name} not found in drive folder")))
    }
}

#[async_trait]
impl Storage for DriveStorage {
    async fn list(&self, token: &AccessToken) -> Result<Vec<FileEntry>, IngestError> {
        let folder_id = self.folder_id(token).await?;
        let q = format!("{} in parents and trashed = false", quote(&folder_id));

        let mut ids = HashMap::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.query(token, &q, page_token.as_deref()).await?;
            ids.extend(
                page.files
                    .into_iter()
                    .filter(|file| file.mime_type != FOLDER_MIME_TYPE)
                    .map(|file| (file.name, file.id)),
            );
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(files = ids.len(), "listed drive folder");
        let entries = ids.keys().map(FileEntry::new).collect();
        *self.file_ids.lock().await = ids;
        Ok(entries)
    }

    async fn open(&self, token: &AccessToken, name: &str) -> Result<FileStream, IngestError> {
        let id = self.file_id(token, name).await?;

        let response = self
            .get(token, &format!("files/{id}"))
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(transport("drive download failed"))?
            .error_for_status()
            .map_err(transport("drive download rejected"))?;

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}
