//! Post flows: fetch the attachment, generate the text, publish, report.
//!
//! Each flow keeps a single status message in the operator's chat and edits it
//! as the flow advances. A failing stage short-circuits straight to the final
//! report, so every flow ends with exactly one terminal status.

pub mod album;
pub mod fetch;
pub mod publish;
pub mod status;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::llm::{GenerationClient, GenerationFailure, GenerationRequest};
use crate::transport::{AttachmentRef, ChannelMedia, ChatTransport, MessageRef};
use crate::utils::timing::FlowTimer;

pub use album::{AlbumItem, AlbumSink, MediaGroupAggregator};
pub use fetch::{AttachmentFetcher, FetchError};
pub use publish::{PublishFailure, Publisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Video,
    Animation,
}

impl MotionKind {
    pub fn label(self) -> &'static str {
        match self {
            MotionKind::Video => "video",
            MotionKind::Animation => "GIF",
        }
    }

    fn flow_name(self) -> &'static str {
        match self {
            MotionKind::Video => "video",
            MotionKind::Animation => "animation",
        }
    }

    /// Used when the platform did not report a mime type.
    fn default_mime_type(self) -> &'static str {
        match self {
            MotionKind::Video | MotionKind::Animation => "video/mp4",
        }
    }

    fn channel_media(self, file_id: &str) -> ChannelMedia {
        match self {
            MotionKind::Video => ChannelMedia::Video(file_id.to_string()),
            MotionKind::Animation => ChannelMedia::Animation(file_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Analysis {
    Full,
    Partial { skipped: usize },
    TextOnly,
}

#[derive(Debug)]
struct Published {
    topic: String,
    media_label: Option<&'static str>,
    analysis: Analysis,
}

impl Published {
    fn status_text(&self) -> String {
        match (self.analysis, self.media_label) {
            (Analysis::Partial { skipped }, Some(label)) => {
                status::published_partially_analyzed(&self.topic, label, skipped)
            }
            (Analysis::TextOnly, Some(label)) => status::published_text_only(&self.topic, label),
            (_, label) => status::published(&self.topic, label),
        }
    }

    fn timer_status(&self) -> &'static str {
        match self.analysis {
            Analysis::Full => "success",
            Analysis::Partial { .. } | Analysis::TextOnly => "degraded",
        }
    }
}

#[derive(Debug)]
enum FlowFailure {
    MissingPrompt(Option<&'static str>),
    Fetch {
        media_label: &'static str,
        error: FetchError,
    },
    AlbumNothingDownloaded,
    Generation(GenerationFailure),
    Publish(PublishFailure),
}

impl FlowFailure {
    fn kind(&self) -> &'static str {
        match self {
            FlowFailure::MissingPrompt(_) => "missing_prompt",
            FlowFailure::Fetch { .. } => "fetch_failed",
            FlowFailure::AlbumNothingDownloaded => "album_nothing_downloaded",
            FlowFailure::Generation(failure) if failure.is_safety_block() => "safety_blocked",
            FlowFailure::Generation(_) => "generation_failed",
            FlowFailure::Publish(_) => "publish_failed",
        }
    }

    fn status_text(&self) -> String {
        match self {
            FlowFailure::MissingPrompt(Some(label)) => status::missing_caption(label),
            FlowFailure::MissingPrompt(None) => status::GEN_TEXT_USAGE.to_string(),
            FlowFailure::Fetch { media_label, error } => {
                status::fetch_failed(media_label, &error.to_string())
            }
            FlowFailure::AlbumNothingDownloaded => status::ALBUM_NOTHING_DOWNLOADED.to_string(),
            FlowFailure::Generation(failure) => status::generation_failed(failure),
            FlowFailure::Publish(failure) => {
                status::publish_failed(&failure.error.to_string(), &failure.text)
            }
        }
    }
}

type FlowResult = Result<Published, FlowFailure>;

/// The operator-side progress message of one flow.
struct StatusMessage<'a> {
    transport: &'a dyn ChatTransport,
    origin: MessageRef,
    message: Option<MessageRef>,
}

impl<'a> StatusMessage<'a> {
    async fn open(transport: &'a dyn ChatTransport, origin: MessageRef, text: &str) -> Self {
        let mut status = StatusMessage {
            transport,
            origin,
            message: None,
        };
        status.update(text).await;
        status
    }

    /// Failures are logged only; a lost status update never stops a flow.
    async fn update(&mut self, text: &str) {
        match self.message {
            Some(message) => {
                if let Err(err) = self.transport.edit(message, text).await {
                    warn!("Failed to edit status message {:?}: {}", message, err);
                }
            }
            None => match self.transport.reply(self.origin, text).await {
                Ok(message) => self.message = Some(message),
                Err(err) => warn!("Failed to send status reply to {:?}: {}", self.origin, err),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub channel_id: Option<i64>,
    pub max_download_bytes: u64,
    pub caption_single_media: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_id: config.channel_id,
            max_download_bytes: config.max_download_bytes,
            caption_single_media: config.caption_single_media,
        }
    }
}

pub struct PostPipeline {
    transport: Arc<dyn ChatTransport>,
    fetcher: AttachmentFetcher,
    generator: GenerationClient,
    publisher: Publisher,
}

impl PostPipeline {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        generator: GenerationClient,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher: AttachmentFetcher::new(transport.clone(), settings.max_download_bytes),
            publisher: Publisher::new(
                transport.clone(),
                settings.channel_id,
                settings.caption_single_media,
            ),
            transport,
            generator,
        }
    }

    /// Replies to the operator outside of any flow.
    pub async fn notify(&self, to: MessageRef, text: &str) {
        if let Err(err) = self.transport.reply(to, text).await {
            warn!("Failed to reply to {:?}: {}", to, err);
        }
    }

    async fn ensure_channel(&self, origin: MessageRef, timer: &mut FlowTimer) -> bool {
        if self.publisher.channel_id().is_some() {
            return true;
        }
        warn!("Refusing to generate: no target channel configured");
        self.notify(origin, status::CHANNEL_NOT_CONFIGURED).await;
        timer.complete("error", Some("channel_not_configured"));
        false
    }

    fn skip_reason(&self, error: &FetchError) -> String {
        if error.is_size_exceeded() {
            format!(
                "is larger than {} MiB",
                self.fetcher.max_bytes() / (1024 * 1024)
            )
        } else {
            "could not be downloaded".to_string()
        }
    }

    /// Returns how many images the backend could not read.
    async fn generate_and_publish(
        &self,
        status: &mut StatusMessage<'_>,
        request: GenerationRequest,
        media: Option<ChannelMedia>,
    ) -> Result<usize, FlowFailure> {
        let generated = self
            .generator
            .generate(request)
            .await
            .map_err(FlowFailure::Generation)?;
        status.update(status::PUBLISHING).await;
        self.publisher
            .publish(&generated.text, media)
            .await
            .map_err(FlowFailure::Publish)?;
        Ok(generated.unreadable_images)
    }

    async fn report(&self, status: &mut StatusMessage<'_>, timer: &mut FlowTimer, result: FlowResult) {
        match result {
            Ok(published) => {
                info!(
                    "Flow finished: media={:?}, analysis={:?}",
                    published.media_label, published.analysis
                );
                status.update(&published.status_text()).await;
                timer.complete(published.timer_status(), None);
            }
            Err(failure) => {
                warn!("Flow failed: {:?}", failure);
                status.update(&failure.status_text()).await;
                timer.complete("error", Some(failure.kind()));
            }
        }
    }

    pub async fn text_post(&self, origin: MessageRef, prompt: &str) {
        let mut timer = FlowTimer::start("gen_text", origin.chat_id, origin.message_id);
        let Some(request) = GenerationRequest::text(prompt) else {
            self.notify(origin, status::GEN_TEXT_USAGE).await;
            timer.complete("error", Some("missing_prompt"));
            return;
        };
        if !self.ensure_channel(origin, &mut timer).await {
            return;
        }

        let mut status =
            StatusMessage::open(&*self.transport, origin, &status::generating_text(prompt)).await;
        let result = self
            .generate_and_publish(&mut status, request, None)
            .await
            .map(|_| Published {
                topic: prompt.to_string(),
                media_label: None,
                analysis: Analysis::Full,
            });
        self.report(&mut status, &mut timer, result).await;
    }

    pub async fn photo_post(&self, origin: MessageRef, photo: AttachmentRef, caption: &str) {
        let mut timer = FlowTimer::start("photo", origin.chat_id, origin.message_id);
        if !self.ensure_channel(origin, &mut timer).await {
            return;
        }

        let mut status =
            StatusMessage::open(&*self.transport, origin, &status::checking_size("photo")).await;
        let result = self.run_photo(&mut status, &photo, caption).await;
        self.report(&mut status, &mut timer, result).await;
    }

    async fn run_photo(
        &self,
        status: &mut StatusMessage<'_>,
        photo: &AttachmentRef,
        caption: &str,
    ) -> FlowResult {
        let (images, analysis) = match self.fetcher.fetch_bytes(photo).await {
            Ok(bytes) => {
                status.update(&status::generating_with("photo")).await;
                (vec![bytes], Analysis::Full)
            }
            Err(err) => {
                warn!("Photo {} will not be analyzed: {}", photo.file_id, err);
                status
                    .update(&status::generating_from_caption("photo", &self.skip_reason(&err)))
                    .await;
                (Vec::new(), Analysis::TextOnly)
            }
        };

        let request = GenerationRequest::new(caption, images, None)
            .ok_or(FlowFailure::MissingPrompt(Some("photo")))?;
        let unreadable = self
            .generate_and_publish(
                status,
                request,
                Some(ChannelMedia::Photo(photo.file_id.clone())),
            )
            .await?;
        Ok(Published {
            topic: caption.to_string(),
            media_label: Some("photo"),
            analysis: if unreadable > 0 {
                Analysis::TextOnly
            } else {
                analysis
            },
        })
    }

    /// Runs the album flow. A crashed download task ends the flow with a critical
    /// error written into the open status message.
    pub async fn album_post(&self, first: MessageRef, photos: Vec<AttachmentRef>, caption: &str) {
        let mut timer = FlowTimer::start("album", first.chat_id, first.message_id);
        if !self.ensure_channel(first, &mut timer).await {
            return;
        }

        let mut status =
            StatusMessage::open(&*self.transport, first, &status::album_received(photos.len()))
                .await;
        let fetched = match self.fetch_album(&photos).await {
            Ok(fetched) => fetched,
            Err(err) => {
                error!("Album from {:?} failed: {:#}", first, err);
                status
                    .update(&status::album_critical(&format!("{err:#}")))
                    .await;
                timer.complete("error", Some("download_task_failed"));
                return;
            }
        };
        let result = self
            .finish_album(&mut status, &photos, fetched, caption)
            .await;
        self.report(&mut status, &mut timer, result).await;
    }

    /// Downloads every photo on its own task. Result order follows `photos`;
    /// photos that could not be fetched are `None`.
    async fn fetch_album(&self, photos: &[AttachmentRef]) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
        let mut tasks = JoinSet::new();
        for (index, photo) in photos.iter().cloned().enumerate() {
            let fetcher = self.fetcher.clone();
            tasks.spawn(async move { (index, fetcher.fetch_bytes(&photo).await) });
        }

        let mut fetched = vec![None; photos.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.context("album photo download task failed")?;
            match result {
                Ok(bytes) => fetched[index] = Some(bytes),
                Err(err) => warn!("Skipping album photo #{}: {}", index + 1, err),
            }
        }
        Ok(fetched)
    }

    async fn finish_album(
        &self,
        status: &mut StatusMessage<'_>,
        photos: &[AttachmentRef],
        fetched: Vec<Option<Vec<u8>>>,
        caption: &str,
    ) -> FlowResult {
        let images: Vec<Vec<u8>> = fetched.into_iter().flatten().collect();
        if images.is_empty() {
            return Err(FlowFailure::AlbumNothingDownloaded);
        }
        let skipped = photos.len() - images.len();
        status.update(&status::generating_with("album")).await;

        let request = GenerationRequest::new(caption, images, None)
            .ok_or(FlowFailure::MissingPrompt(Some("album")))?;
        let submitted = photos.len() - skipped;
        let album = ChannelMedia::Album(photos.iter().map(|photo| photo.file_id.clone()).collect());
        let unreadable = self.generate_and_publish(status, request, Some(album)).await?;

        let analysis = if unreadable >= submitted {
            Analysis::TextOnly
        } else if skipped + unreadable > 0 {
            Analysis::Partial {
                skipped: skipped + unreadable,
            }
        } else {
            Analysis::Full
        };
        Ok(Published {
            topic: caption.to_string(),
            media_label: Some("album"),
            analysis,
        })
    }

    pub async fn motion_post(
        &self,
        origin: MessageRef,
        kind: MotionKind,
        attachment: AttachmentRef,
        caption: &str,
    ) {
        let mut timer = FlowTimer::start(kind.flow_name(), origin.chat_id, origin.message_id);
        if !self.ensure_channel(origin, &mut timer).await {
            return;
        }

        let mut status =
            StatusMessage::open(&*self.transport, origin, &status::checking_size(kind.label()))
                .await;
        let result = self.run_motion(&mut status, kind, &attachment, caption).await;
        self.report(&mut status, &mut timer, result).await;
    }

    async fn run_motion(
        &self,
        status: &mut StatusMessage<'_>,
        kind: MotionKind,
        attachment: &AttachmentRef,
        caption: &str,
    ) -> FlowResult {
        let label = kind.label();
        let mime_type = attachment
            .mime_type
            .clone()
            .unwrap_or_else(|| kind.default_mime_type().to_string());
        let fetch_failed = |error: FetchError| FlowFailure::Fetch {
            media_label: label,
            error,
        };

        // Lives until the flow returns; the temporary file goes with it.
        let media_file = match self.fetcher.resolve(attachment).await {
            Ok(file) => {
                status.update(&status::downloading(label)).await;
                let media = self
                    .fetcher
                    .download_to_temp(&file, &mime_type)
                    .await
                    .map_err(fetch_failed)?;
                status.update(&status::generating_with(label)).await;
                Some(media)
            }
            Err(err) if err.is_size_exceeded() => {
                info!("{} {} is over the size limit: {}", label, attachment.file_id, err);
                status
                    .update(&status::generating_from_caption(label, &self.skip_reason(&err)))
                    .await;
                None
            }
            Err(err) => return Err(fetch_failed(err)),
        };

        let analysis = if media_file.is_some() {
            Analysis::Full
        } else {
            Analysis::TextOnly
        };
        let upload = media_file
            .as_ref()
            .map(|media| (media.path().to_path_buf(), media.mime_type().to_string()));
        let request = GenerationRequest::new(caption, Vec::new(), upload)
            .ok_or(FlowFailure::MissingPrompt(Some(label)))?;
        self.generate_and_publish(status, request, Some(kind.channel_media(&attachment.file_id)))
            .await?;

        Ok(Published {
            topic: caption.to_string(),
            media_label: Some(label),
            analysis,
        })
    }
}

#[async_trait]
impl AlbumSink for PostPipeline {
    async fn process_album(
        &self,
        first: MessageRef,
        photos: Vec<AttachmentRef>,
        caption: String,
    ) -> anyhow::Result<()> {
        self.album_post(first, photos, &caption).await;
        Ok(())
    }

    async fn report_missing_caption(&self, first: MessageRef) {
        self.notify(first, status::ALBUM_WITHOUT_CAPTION).await;
    }

    async fn report_failure(&self, first: MessageRef, detail: &str) {
        self.notify(first, &status::album_critical(detail)).await;
    }
}
