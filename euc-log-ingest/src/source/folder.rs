use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{FileEntry, FileStream, Storage};
use crate::auth::AccessToken;
use crate::error::IngestError;

/// Logs synced to a local directory. The access token is ignored.
pub struct FolderStorage {
    pub path: PathBuf,
}

impl FolderStorage {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = tokio::fs::canonicalize(path.as_ref()).await.map_err(|e| {
            IngestError::Transport(format!(
                "log folder {} is not accessible: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self { path })
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, IngestError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(IngestError::Transport(format!("invalid file name: {name:?}")));
        }
        Ok(self.path.join(name))
    }
}

#[async_trait]
impl Storage for FolderStorage {
    async fn list(&self, _token: &AccessToken) -> Result<Vec<FileEntry>, IngestError> {
        let transport = |e: std::io::Error| {
            IngestError::Transport(format!("failed to list {}: {e}", self.path.display()))
        };

        let mut entries = vec![];
        let mut dir = tokio::fs::read_dir(&self.path).await.map_err(transport)?;
        while let Some(entry) = dir.next_entry().await.map_err(transport)? {
            if !entry.file_type().await.map_err(transport)?.is_file() {
                continue;
            }
            entries.push(FileEntry::new(entry.file_name().to_string_lossy()));
        }
        Ok(entries)
    }

    async fn open(&self, _token: &AccessToken, name: &str) -> Result<FileStream, IngestError> {
        let path = self.resolve(name)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| IngestError::Transport(format!("failed to open {name}: {e}")))?;
        Ok(Box::pin(file))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    use super::*;

    async fn setup_test_folder() -> (TempDir, FolderStorage) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("2021_06_01.csv"), b"datetime,speed\n").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();
        fs::create_dir(temp_dir.path().join("archive.csv")).unwrap();

        let storage = FolderStorage::new(temp_dir.path()).await.unwrap();
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_list_returns_files_only() {
        let (_temp_dir, storage) = setup_test_folder().await;
        let mut names: Vec<String> = storage
            .list(&AccessToken::none())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["2021_06_01.csv", "notes.txt"]);
    }

    #[tokio::test]
    async fn test_open_streams_contents() {
        let (_temp_dir, storage) = setup_test_folder().await;
        let mut stream = storage
            .open(&AccessToken::none(), "2021_06_01.csv")
            .await
            .unwrap();
        let mut contents = String::new();
        stream.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "datetime,speed\n");
    }

    #[tokio::test]
    async fn test_open_rejects_missing_and_escaping_names() {
        let (_temp_dir, storage) = setup_test_folder().await;
        let token = AccessToken::none();
        for name in ["missing.csv", "../etc/passwd", "..", ""] {
            assert!(
                matches!(
                    storage.open(&token, name).await,
                    Err(IngestError::Transport(_))
                ),
                "{name:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_folder_is_a_transport_error() {
        let result = FolderStorage::new("/definitely/not/a/real/folder").await;
        assert!(matches!(result, Err(IngestError::Transport(_))));
    }
}
