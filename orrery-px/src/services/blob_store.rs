//! Local blob store for uploaded chart files
//!
//! Blobs live under `{root}/uploads/{user_id}/{session_id}/{ts}_{name}`.
//! The index row in uploaded_documents records the relative storage path;
//! removal deletes both.

use chrono::Utc;
use orrery_common::{Error, Result};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// A stored blob's index-facing metadata
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Relative storage path (the index key)
    pub storage_path: String,
    /// Detected content type
    pub file_type: String,
    pub file_size: i64,
}

/// Filesystem blob store rooted at the uploads directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store a blob, returning its storage path and detected metadata
    pub fn store(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredBlob> {
        let safe_name = sanitize_file_name(file_name)?;
        let key = format!(
            "{}/{}/{}_{}",
            user_id,
            session_id,
            Utc::now().timestamp_millis(),
            safe_name
        );

        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;

        let file_type = detect_file_type(&safe_name, bytes);

        Ok(StoredBlob {
            storage_path: key,
            file_type,
            file_size: bytes.len() as i64,
        })
    }

    /// Remove a blob by its storage path. Missing blobs are not an error;
    /// the index row is authoritative.
    pub fn remove(&self, storage_path: &str) -> Result<()> {
        let path = self.resolve(storage_path)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(storage_path, "Blob already missing on removal");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute path for a storage key, rejecting traversal outside the root
    pub fn resolve(&self, storage_path: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path);
        let traverses = relative.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if traverses {
            return Err(Error::InvalidInput(format!(
                "Invalid storage path: {}",
                storage_path
            )));
        }
        Ok(self.root.join(relative))
    }
}

/// Keep only the final path component and printable characters
fn sanitize_file_name(file_name: &str) -> Result<String> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::InvalidInput(format!(
            "Invalid file name: {}",
            file_name
        )));
    }
    Ok(base.to_string())
}

/// Detect a content type from magic bytes, falling back to the extension
fn detect_file_type(file_name: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    match file_name.rsplit('.').next().map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf".to_string(),
        Some(ext) if ext == "png" => "image/png".to_string(),
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg".to_string(),
        Some(ext) if ext == "txt" => "text/plain".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
