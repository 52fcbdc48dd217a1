//! The chat-platform boundary the publishing flows talk to.
//!
//! Everything the core needs from the chat side goes through [`ChatTransport`]:
//! file metadata and downloads, operator status messages, and channel delivery.
//! Identifiers are plain values so flows can be driven without a live bot.

use std::path::Path;

use async_trait::async_trait;

pub mod telegram;

pub use telegram::TelegramTransport;

/// A chat attachment as announced by the incoming event, before any API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub file_id: String,
    pub declared_size: Option<u64>,
    pub mime_type: Option<String>,
}

impl AttachmentRef {
    pub fn new(file_id: impl Into<String>, declared_size: Option<u64>) -> Self {
        Self {
            file_id: file_id.into(),
            declared_size,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }
}

/// Server-side metadata for a downloadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub file_id: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i32) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// Media posted to the channel, always by the original platform file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMedia {
    Photo(String),
    Album(Vec<String>),
    Video(String),
    Animation(String),
}

impl ChannelMedia {
    pub fn label(&self) -> &'static str {
        match self {
            ChannelMedia::Photo(_) => "photo",
            ChannelMedia::Album(_) => "album",
            ChannelMedia::Video(_) => "video",
            ChannelMedia::Animation(_) => "GIF",
        }
    }

    /// Whether the platform accepts a caption on this media in a single call.
    pub fn accepts_caption(&self) -> bool {
        !matches!(self, ChannelMedia::Album(_))
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("file is too big to be served by the Bot API")]
    FileTooBig,
    #[error("Telegram API error: {0}")]
    Api(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("I/O error: {0}")]
    Io(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn file_info(&self, file_id: &str) -> Result<RemoteFile, TransportError>;

    async fn download_bytes(&self, file: &RemoteFile) -> Result<Vec<u8>, TransportError>;

    async fn download_to_path(&self, file: &RemoteFile, dest: &Path)
        -> Result<(), TransportError>;

    /// Replies to `to` with HTML-formatted text and returns the sent message.
    async fn reply(&self, to: MessageRef, text: &str) -> Result<MessageRef, TransportError>;

    /// Replaces the text of an earlier message with HTML-formatted text.
    async fn edit(&self, message: MessageRef, text: &str) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        chat_id: i64,
        media: &ChannelMedia,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Sends plain text, without markup parsing.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;
}
