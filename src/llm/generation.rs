//! Generation client: the request/outcome contract around a multimodal backend.
//!
//! A request carries exactly one media shape. When the shape is an uploaded file,
//! the remote handle returned by the upload is released before [`GenerationClient::generate`]
//! returns, whatever happened in between.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::llm::media::image_dimensions;
use crate::utils::text::truncate_for_log;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMedia {
    TextOnly,
    InlineImages(Vec<Vec<u8>>),
    Uploaded { path: PathBuf, mime_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    media: RequestMedia,
}

impl GenerationRequest {
    pub fn text(prompt: &str) -> Option<Self> {
        Self::new(prompt, Vec::new(), None)
    }

    /// Returns `None` for a blank prompt. An uploaded file takes precedence over
    /// inline images; the images are dropped in that case.
    pub fn new(
        prompt: &str,
        images: Vec<Vec<u8>>,
        upload: Option<(PathBuf, String)>,
    ) -> Option<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return None;
        }

        let media = match upload {
            Some((path, mime_type)) => {
                if !images.is_empty() {
                    warn!(
                        "Ignoring {} inline image(s): uploaded media takes precedence",
                        images.len()
                    );
                }
                RequestMedia::Uploaded { path, mime_type }
            }
            None if !images.is_empty() => RequestMedia::InlineImages(images),
            None => RequestMedia::TextOnly,
        };

        Some(Self {
            prompt: prompt.to_string(),
            media,
        })
    }
}

/// Opaque reference to a file uploaded to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMediaHandle {
    name: String,
    uri: String,
    mime_type: String,
}

impl RemoteMediaHandle {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailureKind {
    TransportRefused,
    Backend,
    NotFound,
}

impl fmt::Display for UploadFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadFailureKind::TransportRefused => "connection refused",
            UploadFailureKind::Backend => "backend error",
            UploadFailureKind::NotFound => "file not found",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationFailure {
    #[error("the generation backend is not configured")]
    NotConfigured,
    #[error("blocked by safety restrictions ({reason})")]
    SafetyBlocked { reason: String },
    #[error("request blocked: {reason}")]
    Blocked { reason: String },
    #[error("connection failed while generating, check proxy/network: {0}")]
    Transport(String),
    #[error("generation backend error: {0}")]
    Backend(String),
    #[error("media upload failed ({kind}): {message}")]
    Upload {
        kind: UploadFailureKind,
        message: String,
    },
    #[error("the generation backend returned an empty response")]
    EmptyResponse,
    #[error("unexpected generation error: {0}")]
    Unknown(String),
}

impl GenerationFailure {
    pub fn upload(kind: UploadFailureKind, message: impl Into<String>) -> Self {
        GenerationFailure::Upload {
            kind,
            message: message.into(),
        }
    }

    pub fn is_safety_block(&self) -> bool {
        matches!(self, GenerationFailure::SafetyBlocked { .. })
    }
}

pub type GenerationOutcome = Result<String, GenerationFailure>;

/// Generated post text. `unreadable_images` counts inline images that were
/// dropped before the call because they could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub unreadable_images: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum GenerationMedia<'a> {
    TextOnly,
    InlineImages(&'a [Vec<u8>]),
    Uploaded(&'a RemoteMediaHandle),
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn upload_media(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<RemoteMediaHandle, GenerationFailure>;

    /// Blocks until an uploaded file can be referenced by a generation call.
    async fn wait_until_ready(&self, _handle: &RemoteMediaHandle) -> Result<(), GenerationFailure> {
        Ok(())
    }

    async fn generate(&self, prompt: &str, media: GenerationMedia<'_>) -> GenerationOutcome;

    async fn delete_media(&self, handle: &RemoteMediaHandle) -> Result<(), GenerationFailure>;
}

#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    persona: String,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, persona: impl Into<String>) -> Self {
        Self {
            backend,
            persona: persona.into(),
        }
    }

    pub fn compose_prompt(&self, prompt: &str) -> String {
        format!("{}\n\nTask: {}", self.persona, prompt)
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<Generated, GenerationFailure> {
        let GenerationRequest { prompt, media } = request;
        let full_prompt = self.compose_prompt(&prompt);
        let mut unreadable_images = 0;

        let outcome = match media {
            RequestMedia::TextOnly => {
                info!(
                    "Generating text-only: model={}, prompt='{}'",
                    self.backend.model(),
                    truncate_for_log(&prompt, 100)
                );
                self.backend
                    .generate(&full_prompt, GenerationMedia::TextOnly)
                    .await
            }
            RequestMedia::InlineImages(images) => {
                let submitted = images.len();
                let images = keep_readable_images(images);
                unreadable_images = submitted - images.len();
                info!(
                    "Generating with {} image(s): model={}, prompt='{}'",
                    images.len(),
                    self.backend.model(),
                    truncate_for_log(&prompt, 100)
                );
                let media = if images.is_empty() {
                    warn!("No readable images left; falling back to text-only generation");
                    GenerationMedia::TextOnly
                } else {
                    GenerationMedia::InlineImages(&images)
                };
                self.backend.generate(&full_prompt, media).await
            }
            RequestMedia::Uploaded { path, mime_type } => {
                self.generate_with_upload(full_prompt, &path, &mime_type)
                    .await
            }
        };

        match outcome {
            Ok(text) if text.trim().is_empty() => Err(GenerationFailure::EmptyResponse),
            Ok(text) => Ok(Generated {
                text: text.trim().to_string(),
                unreadable_images,
            }),
            Err(failure) => Err(failure),
        }
    }

    async fn generate_with_upload(
        &self,
        prompt: String,
        path: &Path,
        mime_type: &str,
    ) -> GenerationOutcome {
        info!(
            "Uploading media {} ({}) for model {}",
            path.display(),
            mime_type,
            self.backend.model()
        );
        let handle = self.backend.upload_media(path, mime_type).await?;
        info!("Media uploaded as {}", handle.name());

        // Runs on its own task so a panic in the backend still reaches the release below.
        let backend = Arc::clone(&self.backend);
        let task_handle = handle.clone();
        let joined = tokio::spawn(async move {
            backend.wait_until_ready(&task_handle).await?;
            backend
                .generate(&prompt, GenerationMedia::Uploaded(&task_handle))
                .await
        })
        .await;

        match self.backend.delete_media(&handle).await {
            Ok(()) => info!("Released uploaded media {}", handle.name()),
            Err(err) => error!("Failed to release uploaded media {}: {}", handle.name(), err),
        }

        match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                error!("Generation task for {} aborted: {}", handle.name(), join_err);
                Err(GenerationFailure::Unknown(join_err.to_string()))
            }
        }
    }
}

fn keep_readable_images(images: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    images
        .into_iter()
        .enumerate()
        .filter_map(|(index, bytes)| {
            if image_dimensions(&bytes).is_some() {
                Some(bytes)
            } else {
                error!("Skipping unreadable image #{}", index + 1);
                None
            }
        })
        .collect()
}
