//! Raw upload storage on the local filesystem.
//!
//! Files are stored flat under the configured directory as
//! `<document id>.pdf`, so the original file name never reaches the disk.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, document_id: &str) -> Result<PathBuf> {
        if document_id.is_empty()
            || !document_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::Validation(format!(
                "invalid document id: {}",
                document_id
            )));
        }
        Ok(self.root.join(format!("{}.pdf", document_id)))
    }

    pub async fn save(&self, document_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(document_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn read(&self, document_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(document_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "stored file for document {}",
                document_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the stored file. A missing file is not an error.
    pub async fn remove(&self, document_id: &str) -> Result<()> {
        let path = self.path_for(document_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
