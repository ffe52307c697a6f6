use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::auth::AccessToken;
use crate::error::IngestError;

pub mod drive;
pub mod folder;

pub use drive::DriveStorage;
pub use folder::FolderStorage;

/// Readable byte stream of a single remote file.
pub type FileStream = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
}

impl FileEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Where the logging device drops its files. Both operations fail with
/// `IngestError::Transport`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list(&self, token: &AccessToken) -> Result<Vec<FileEntry>, IngestError>;
    async fn open(&self, token: &AccessToken, name: &str) -> Result<FileStream, IngestError>;
}
