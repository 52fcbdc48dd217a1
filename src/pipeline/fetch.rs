//! Attachment retrieval with a hard size ceiling, checked before any download.

use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::transport::{AttachmentRef, ChatTransport, RemoteFile, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("file exceeds the {limit} byte download limit")]
    SizeExceeded { size: Option<u64>, limit: u64 },
    #[error("failed to fetch the file: {0}")]
    Failed(#[from] TransportError),
    #[error("failed to prepare a temporary file: {0}")]
    TempFile(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, FetchError::SizeExceeded { .. })
    }
}

/// A downloaded attachment living in a temporary file, removed on drop.
#[derive(Debug)]
pub struct FetchedMedia {
    file: NamedTempFile,
    mime_type: String,
}

impl FetchedMedia {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

fn temp_suffix(mime_type: &str) -> String {
    let subtype = mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.split('/').nth(1))
        .map(str::trim)
        .unwrap_or_default();
    if subtype.is_empty() {
        ".bin".to_string()
    } else {
        format!(".{subtype}")
    }
}

#[derive(Clone)]
pub struct AttachmentFetcher {
    transport: Arc<dyn ChatTransport>,
    max_bytes: u64,
}

impl AttachmentFetcher {
    pub fn new(transport: Arc<dyn ChatTransport>, max_bytes: u64) -> Self {
        Self {
            transport,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn check_size(&self, size: u64) -> Result<(), FetchError> {
        if size > self.max_bytes {
            return Err(FetchError::SizeExceeded {
                size: Some(size),
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Size-checks an attachment and looks up its download metadata.
    ///
    /// The size the event declared is checked first so an oversized file never
    /// costs a metadata call. The platform refusing to describe a file because it
    /// is too big counts as oversized as well.
    pub async fn resolve(&self, attachment: &AttachmentRef) -> Result<RemoteFile, FetchError> {
        if let Some(declared) = attachment.declared_size {
            self.check_size(declared)?;
        }

        let file = match self.transport.file_info(&attachment.file_id).await {
            Ok(file) => file,
            Err(TransportError::FileTooBig) => {
                warn!(
                    "Platform refused metadata for {}: file is too big",
                    attachment.file_id
                );
                return Err(FetchError::SizeExceeded {
                    size: attachment.declared_size,
                    limit: self.max_bytes,
                });
            }
            Err(err) => return Err(err.into()),
        };
        self.check_size(file.size)?;
        Ok(file)
    }

    pub async fn fetch_bytes(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, FetchError> {
        let file = self.resolve(attachment).await?;
        let bytes = self.transport.download_bytes(&file).await?;
        info!("Fetched {} ({} bytes)", attachment.file_id, bytes.len());
        Ok(bytes)
    }

    /// Downloads an already resolved file into a fresh temporary file.
    pub async fn download_to_temp(
        &self,
        file: &RemoteFile,
        mime_type: &str,
    ) -> Result<FetchedMedia, FetchError> {
        let temp = tempfile::Builder::new()
            .prefix("channel-media-")
            .suffix(&temp_suffix(mime_type))
            .tempfile()?;
        self.transport.download_to_path(file, temp.path()).await?;
        info!("Fetched {} into {}", file.file_id, temp.path().display());
        Ok(FetchedMedia {
            file: temp,
            mime_type: mime_type.to_string(),
        })
    }
}
