use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::extract::multipart::Field;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Attachment ready for transport: base64 data plus what the receiver needs
/// to render it.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime_type: String,
    pub data: String,
    pub filename: String,
}

impl MediaPayload {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8], filename: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
            filename: filename.into(),
        }
    }
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// An upload spooled to the upload directory. The file on disk lives exactly
/// as long as this value.
pub struct UploadedFile {
    path: TempPath,
    mime_type: String,
    filename: String,
    size: u64,
}

impl UploadedFile {
    /// Streams a multipart file part to disk. Returns `None` for the empty
    /// part browsers submit when no file was picked.
    pub async fn receive(mut field: Field<'_>, upload_dir: &Path) -> Result<Option<Self>, AppError> {
        let filename = field.file_name().unwrap_or_default().to_string();
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&filename).first_raw().map(str::to_string))
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        tokio::fs::create_dir_all(upload_dir)
            .await
            .with_context(|| format!("creating upload dir {}", upload_dir.display()))?;
        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(upload_dir)
            .with_context(|| format!("creating temp file in {}", upload_dir.display()))?
            .into_parts();

        let mut file = tokio::fs::File::from_std(file);
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("writing upload to {}", path.display()))?;
        }
        file.flush().await.context("flushing upload")?;

        if filename.is_empty() && size == 0 {
            return Ok(None);
        }

        debug!("Stored upload {:?} ({} bytes) at {}", filename, size, path.display());
        Ok(Some(Self {
            path,
            mime_type,
            filename,
            size,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn load(&self) -> Result<MediaPayload, AppError> {
        let bytes = tokio::fs::read(self.path())
            .await
            .map_err(|source| AppError::MediaRead {
                path: self.path().to_path_buf(),
                source,
            })?;
        Ok(MediaPayload::from_bytes(
            self.mime_type.clone(),
            &bytes,
            self.filename.clone(),
        ))
    }

    /// Deletes the file now. Dropping does the same but cannot report errors.
    pub fn discard(self) {
        let path: PathBuf = self.path.to_path_buf();
        if let Err(err) = self.path.close() {
            warn!("Failed to delete upload {}: {}", path.display(), err);
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("path", &self.path.display())
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
impl UploadedFile {
    pub fn from_temp_path(path: TempPath, mime_type: &str, filename: &str) -> Self {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self {
            path,
            mime_type: mime_type.to_string(),
            filename: filename.to_string(),
            size,
        }
    }
}
