use std::error::Error;

use teloxide::types::Message;

use crate::transport::MessageRef;

pub mod access;
pub mod commands;
pub mod media;

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

pub fn origin(message: &Message) -> MessageRef {
    MessageRef::new(message.chat.id.0, message.id.0)
}

/// The trimmed caption, if the message has a non-blank one.
pub fn caption_of(message: &Message) -> Option<String> {
    message
        .caption()
        .map(str::trim)
        .filter(|caption| !caption.is_empty())
        .map(str::to_string)
}
