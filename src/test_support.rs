//! In-memory stand-ins for the chat platform and the generation backend.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llm::generation::{
    GenerationBackend, GenerationFailure, GenerationMedia, GenerationOutcome, RemoteMediaHandle,
};
use crate::transport::{ChannelMedia, ChatTransport, MessageRef, RemoteFile, TransportError};

pub const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Upload { path: PathBuf, mime_type: String },
    Generate {
        prompt: String,
        images: usize,
        handle: Option<String>,
    },
    Delete(String),
}

enum Reply {
    Text(String),
    Fail(GenerationFailure),
    Panic,
}

pub struct FakeBackend {
    reply: Reply,
    ready_failure: Option<GenerationFailure>,
    upload_failure: Option<GenerationFailure>,
    calls: Mutex<Vec<BackendCall>>,
}

impl FakeBackend {
    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            ready_failure: None,
            upload_failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::with_reply(Reply::Text(text.to_string()))
    }

    pub fn failing(failure: GenerationFailure) -> Self {
        Self::with_reply(Reply::Fail(failure))
    }

    pub fn panicking() -> Self {
        Self::with_reply(Reply::Panic)
    }

    pub fn with_ready_failure(mut self, failure: GenerationFailure) -> Self {
        self.ready_failure = Some(failure);
        self
    }

    pub fn with_upload_failure(mut self, failure: GenerationFailure) -> Self {
        self.upload_failure = Some(failure);
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Delete(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn generated_prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Generate { prompt, .. } => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn upload_media(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<RemoteMediaHandle, GenerationFailure> {
        let upload_count = {
            let mut calls = self.calls.lock();
            calls.push(BackendCall::Upload {
                path: path.to_path_buf(),
                mime_type: mime_type.to_string(),
            });
            calls
                .iter()
                .filter(|call| matches!(call, BackendCall::Upload { .. }))
                .count()
        };
        if let Some(failure) = &self.upload_failure {
            return Err(failure.clone());
        }
        let name = format!("files/upload-{upload_count}");
        Ok(RemoteMediaHandle::new(
            name.clone(),
            format!("https://files.test/{name}"),
            mime_type,
        ))
    }

    async fn wait_until_ready(&self, _handle: &RemoteMediaHandle) -> Result<(), GenerationFailure> {
        match &self.ready_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    async fn generate(&self, prompt: &str, media: GenerationMedia<'_>) -> GenerationOutcome {
        let (images, handle) = match media {
            GenerationMedia::TextOnly => (0, None),
            GenerationMedia::InlineImages(images) => (images.len(), None),
            GenerationMedia::Uploaded(handle) => (0, Some(handle.name().to_string())),
        };
        self.calls.lock().push(BackendCall::Generate {
            prompt: prompt.to_string(),
            images,
            handle,
        });
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(failure) => Err(failure.clone()),
            Reply::Panic => panic!("backend exploded mid-generation"),
        }
    }

    async fn delete_media(&self, handle: &RemoteMediaHandle) -> Result<(), GenerationFailure> {
        self.calls
            .lock()
            .push(BackendCall::Delete(handle.name().to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    FileInfo(String),
    DownloadBytes(String),
    DownloadToPath(String),
    Reply { to: MessageRef, text: String },
    Edit { message: MessageRef, text: String },
    SendMedia {
        chat_id: i64,
        media: ChannelMedia,
        caption: Option<String>,
    },
    SendText { chat_id: i64, text: String },
}

pub struct FakeTransport {
    sizes: HashMap<String, u64>,
    bytes: HashMap<String, Vec<u8>>,
    info_errors: HashMap<String, TransportError>,
    download_errors: HashSet<String>,
    download_panics: HashSet<String>,
    media_error: Option<TransportError>,
    text_error: Option<TransportError>,
    calls: Mutex<Vec<TransportCall>>,
    next_message_id: Mutex<i32>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            sizes: HashMap::new(),
            bytes: HashMap::new(),
            info_errors: HashMap::new(),
            download_errors: HashSet::new(),
            download_panics: HashSet::new(),
            media_error: None,
            text_error: None,
            calls: Mutex::new(Vec::new()),
            next_message_id: Mutex::new(1000),
        }
    }

    pub fn with_size(mut self, file_id: &str, size: u64) -> Self {
        self.sizes.insert(file_id.to_string(), size);
        self
    }

    pub fn with_bytes(mut self, file_id: &str, bytes: &[u8]) -> Self {
        self.bytes.insert(file_id.to_string(), bytes.to_vec());
        self
    }

    pub fn with_info_error(mut self, file_id: &str, error: TransportError) -> Self {
        self.info_errors.insert(file_id.to_string(), error);
        self
    }

    pub fn with_download_error(mut self, file_id: &str) -> Self {
        self.download_errors.insert(file_id.to_string());
        self
    }

    pub fn with_panicking_download(mut self, file_id: &str) -> Self {
        self.download_panics.insert(file_id.to_string());
        self
    }

    pub fn with_media_error(mut self, error: TransportError) -> Self {
        self.media_error = Some(error);
        self
    }

    pub fn with_text_error(mut self, error: TransportError) -> Self {
        self.text_error = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Only the calls that reach the broadcast channel, in order.
    pub fn channel_calls(&self) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    TransportCall::SendMedia { .. } | TransportCall::SendText { .. }
                )
            })
            .collect()
    }

    pub fn downloads(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    TransportCall::DownloadBytes(_) | TransportCall::DownloadToPath(_)
                )
            })
            .count()
    }

    pub fn replies(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Reply { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Edit { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// The text the operator sees last: the final edit, or the last reply.
    pub fn final_status(&self) -> Option<String> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|call| match call {
                TransportCall::Edit { text, .. } | TransportCall::Reply { text, .. } => {
                    Some(text.clone())
                }
                _ => None,
            })
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn file_info(&self, file_id: &str) -> Result<RemoteFile, TransportError> {
        self.record(TransportCall::FileInfo(file_id.to_string()));
        if let Some(error) = self.info_errors.get(file_id) {
            return Err(error.clone());
        }
        Ok(RemoteFile {
            file_id: file_id.to_string(),
            path: format!("files/{file_id}"),
            size: self.sizes.get(file_id).copied().unwrap_or(1024),
        })
    }

    async fn download_bytes(&self, file: &RemoteFile) -> Result<Vec<u8>, TransportError> {
        self.record(TransportCall::DownloadBytes(file.file_id.clone()));
        if self.download_panics.contains(&file.file_id) {
            panic!("download of {} blew up", file.file_id);
        }
        if self.download_errors.contains(&file.file_id) {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        Ok(self
            .bytes
            .get(&file.file_id)
            .cloned()
            .unwrap_or_else(|| PNG_1X1.to_vec()))
    }

    async fn download_to_path(&self, file: &RemoteFile, dest: &Path) -> Result<(), TransportError> {
        self.record(TransportCall::DownloadToPath(file.file_id.clone()));
        if self.download_errors.contains(&file.file_id) {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        let bytes = self
            .bytes
            .get(&file.file_id)
            .cloned()
            .unwrap_or_else(|| b"\x00\x00\x00\x18ftypmp42".to_vec());
        std::fs::write(dest, bytes).map_err(|err| TransportError::Io(err.to_string()))
    }

    async fn reply(&self, to: MessageRef, text: &str) -> Result<MessageRef, TransportError> {
        self.record(TransportCall::Reply {
            to,
            text: text.to_string(),
        });
        let mut next = self.next_message_id.lock();
        *next += 1;
        Ok(MessageRef::new(to.chat_id, *next))
    }

    async fn edit(&self, message: MessageRef, text: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Edit {
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media: &ChannelMedia,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SendMedia {
            chat_id,
            media: media.clone(),
            caption: caption.map(str::to_string),
        });
        match &self.media_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        self.record(TransportCall::SendText {
            chat_id,
            text: text.to_string(),
        });
        match &self.text_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
