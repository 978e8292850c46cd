use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use thiserror::Error;

use crate::scheduling::Attachment;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object store holding appointment attachments.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Stores `bytes` under a fresh key and returns the attachment record.
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<Attachment, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// `<unix-millis>_<7 alphanumerics>.<ext>`, extension taken from the upload name.
pub fn object_key(original_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    let ext = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_lowercase)
        .unwrap_or_else(|| "bin".to_string());
    format!("{}_{}.{}", Utc::now().timestamp_millis(), suffix, ext)
}

fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        && !key.starts_with('.')
}

/// Files on local disk, served read-only by the HTTP layer under `/files`.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_base_url, key)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl AttachmentStore for LocalDiskStore {
    async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<Attachment, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let key = object_key(original_name);
        let path = self.path_for(&key)?;
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(%key, size = bytes.len(), "attachment stored");

        Ok(Attachment {
            name: original_name.to_string(),
            url: self.public_url(&key),
            key: Some(key),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shape() {
        let key = object_key("Exame Sangue.PDF");
        let (stamp, rest) = key.split_once('_').unwrap();
        assert!(stamp.parse::<i64>().is_ok());
        assert!(rest.ends_with(".pdf"));
        assert_eq!(rest.len(), 7 + ".pdf".len());
        assert!(is_safe_key(&key));

        assert!(object_key("no-extension").ends_with(".bin"));
        assert!(object_key("weird.p/df").ends_with(".bin"));
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        assert!(!is_safe_key("../etc/passwd"));
        assert!(!is_safe_key(".hidden"));
        assert!(!is_safe_key(""));
    }

    #[tokio::test]
    async fn put_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path().join("attachments"), "http://localhost:8080/");

        let att = store.put("raio-x.png", b"\x89PNG fake").await.unwrap();
        assert_eq!(att.name, "raio-x.png");
        let key = att.key.clone().unwrap();
        assert_eq!(att.url, format!("http://localhost:8080/files/{key}"));

        let on_disk = store.root().join(&key);
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"\x89PNG fake");

        store.delete(&key).await.unwrap();
        assert!(!on_disk.exists());
        // second delete is a no-op
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn delete_refuses_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path(), "http://x");
        assert!(matches!(
            store.delete("../outside").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
