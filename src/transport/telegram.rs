use std::future::{Future, IntoFuture};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InputFile, InputMedia, InputMediaPhoto, MessageId, ParseMode, ReplyParameters,
};
use teloxide::{DownloadError, RequestError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ChannelMedia, ChatTransport, MessageRef, RemoteFile, TransportError};

const TELEGRAM_RETRY_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn telegram_retryable_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

fn map_request_error(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(api) => {
            let text = api.to_string();
            if text.to_lowercase().contains("file is too big") {
                TransportError::FileTooBig
            } else {
                TransportError::Api(text)
            }
        }
        RequestError::Network(err) => TransportError::Network(err.to_string()),
        RequestError::Io(err) => TransportError::Io(err.to_string()),
        other => TransportError::Api(other.to_string()),
    }
}

fn map_download_error(err: DownloadError) -> TransportError {
    TransportError::Network(err.to_string())
}

/// Retries transient Bot API failures with doubling backoff, honouring `RetryAfter`.
async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut delay = Duration::from_secs_f32(1.5);
    for attempt in 0..TELEGRAM_RETRY_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt + 1 == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(map_request_error(err));
                }
                warn!("{operation} attempt {} failed: {err}", attempt + 1);
                if let RequestError::RetryAfter(wait) = err {
                    tokio::time::sleep(wait.duration()).await;
                } else {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(TransportError::Api(format!("{operation} retries exhausted")))
}

/// Channel deliveries go out exactly once. A send that timed out may already have
/// been posted, so repeating it could duplicate the post.
async fn send_once<T, F, Fut>(operation: &str, call: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    call().await.map_err(|err| {
        warn!("{operation} failed: {err}");
        map_request_error(err)
    })
}

fn file_input(file_id: &str) -> InputFile {
    InputFile::file_id(FileId(file_id.to_string()))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn file_info(&self, file_id: &str) -> Result<RemoteFile, TransportError> {
        let file = with_retry("get_file", || {
            self.bot.get_file(FileId(file_id.to_string())).into_future()
        })
        .await?;
        Ok(RemoteFile {
            file_id: file_id.to_string(),
            path: file.path.clone(),
            size: u64::from(file.size),
        })
    }

    async fn download_bytes(&self, file: &RemoteFile) -> Result<Vec<u8>, TransportError> {
        let mut buffer: Vec<u8> = Vec::with_capacity(file.size as usize);
        self.bot
            .download_file(&file.path, &mut buffer)
            .await
            .map_err(map_download_error)?;
        debug!("Downloaded {} bytes for {}", buffer.len(), file.file_id);
        Ok(buffer)
    }

    async fn download_to_path(
        &self,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<(), TransportError> {
        let mut output = tokio::fs::File::create(dest)
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        self.bot
            .download_file(&file.path, &mut output)
            .await
            .map_err(map_download_error)?;
        output
            .flush()
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        debug!("Downloaded {} to {}", file.file_id, dest.display());
        Ok(())
    }

    async fn reply(&self, to: MessageRef, text: &str) -> Result<MessageRef, TransportError> {
        let message = with_retry("send_message", || {
            self.bot
                .send_message(ChatId(to.chat_id), text.to_string())
                .reply_parameters(ReplyParameters::new(MessageId(to.message_id)))
                .parse_mode(ParseMode::Html)
                .into_future()
        })
        .await?;
        Ok(MessageRef::new(message.chat.id.0, message.id.0))
    }

    async fn edit(&self, message: MessageRef, text: &str) -> Result<(), TransportError> {
        with_retry("edit_message_text", || {
            self.bot
                .edit_message_text(
                    ChatId(message.chat_id),
                    MessageId(message.message_id),
                    text.to_string(),
                )
                .parse_mode(ParseMode::Html)
                .into_future()
        })
        .await?;
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media: &ChannelMedia,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let chat_id = ChatId(chat_id);
        let caption = caption.map(str::to_string);
        match media {
            ChannelMedia::Photo(file_id) => {
                send_once("send_photo", || {
                    let mut request = self.bot.send_photo(chat_id, file_input(file_id));
                    if let Some(caption) = caption.clone() {
                        request = request.caption(caption);
                    }
                    request.into_future()
                })
                .await?;
            }
            ChannelMedia::Album(file_ids) => {
                send_once("send_media_group", || {
                    let media = file_ids
                        .iter()
                        .map(|file_id| InputMedia::Photo(InputMediaPhoto::new(file_input(file_id))))
                        .collect::<Vec<_>>();
                    self.bot.send_media_group(chat_id, media).into_future()
                })
                .await?;
            }
            ChannelMedia::Video(file_id) => {
                send_once("send_video", || {
                    let mut request = self.bot.send_video(chat_id, file_input(file_id));
                    if let Some(caption) = caption.clone() {
                        request = request.caption(caption);
                    }
                    request.into_future()
                })
                .await?;
            }
            ChannelMedia::Animation(file_id) => {
                send_once("send_animation", || {
                    let mut request = self.bot.send_animation(chat_id, file_input(file_id));
                    if let Some(caption) = caption.clone() {
                        request = request.caption(caption);
                    }
                    request.into_future()
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        send_once("send_message", || {
            self.bot
                .send_message(ChatId(chat_id), text.to_string())
                .into_future()
        })
        .await?;
        Ok(())
    }
}
