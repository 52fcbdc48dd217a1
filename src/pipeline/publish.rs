use std::sync::Arc;

use tracing::{error, info};

use crate::transport::{ChannelMedia, ChatTransport, TransportError};

/// Telegram's caption limit for a single media message.
pub const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("publishing is disabled because no target channel is configured")]
    ChannelNotConfigured,
    #[error("failed to send the {stage}: {source}")]
    Delivery {
        stage: &'static str,
        source: TransportError,
    },
}

/// A failed publication, still holding the text so the operator can recover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub error: PublishError,
    pub text: String,
}

pub type PublishResult = Result<(), PublishFailure>;

#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn ChatTransport>,
    channel_id: Option<i64>,
    caption_single_media: bool,
}

impl Publisher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        channel_id: Option<i64>,
        caption_single_media: bool,
    ) -> Self {
        Self {
            transport,
            channel_id,
            caption_single_media,
        }
    }

    pub fn channel_id(&self) -> Option<i64> {
        self.channel_id
    }

    /// Sends the media first and the text second. Stops at the first delivery error.
    pub async fn publish(&self, text: &str, media: Option<ChannelMedia>) -> PublishResult {
        let fail = |error: PublishError| PublishFailure {
            error,
            text: text.to_string(),
        };

        let channel_id = self
            .channel_id
            .ok_or_else(|| fail(PublishError::ChannelNotConfigured))?;

        let media = media.and_then(|media| match media {
            ChannelMedia::Album(mut file_ids) if file_ids.len() == 1 => {
                file_ids.pop().map(ChannelMedia::Photo)
            }
            ChannelMedia::Album(file_ids) if file_ids.is_empty() => None,
            other => Some(other),
        });

        if let Some(media) = &media {
            let caption = (self.caption_single_media
                && media.accepts_caption()
                && text.chars().count() <= CAPTION_LIMIT)
                .then_some(text);

            self.transport
                .send_media(channel_id, media, caption)
                .await
                .map_err(|source| {
                    error!("Failed to publish {} to {}: {}", media.label(), channel_id, source);
                    fail(PublishError::Delivery {
                        stage: media.label(),
                        source,
                    })
                })?;
            info!("Published {} to channel {}", media.label(), channel_id);

            if caption.is_some() {
                return Ok(());
            }
        }

        self.transport
            .send_text(channel_id, text)
            .await
            .map_err(|source| {
                error!("Failed to publish text to {}: {}", channel_id, source);
                fail(PublishError::Delivery {
                    stage: "text",
                    source,
                })
            })?;
        info!(
            "Published text ({} chars) to channel {}",
            text.chars().count(),
            channel_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeTransport, TransportCall};

    const CHANNEL: i64 = -100500;

    fn publisher(transport: &Arc<FakeTransport>, caption: bool) -> Publisher {
        Publisher::new(transport.clone(), Some(CHANNEL), caption)
    }

    #[tokio::test]
    async fn media_goes_out_before_the_text() {
        let transport = Arc::new(FakeTransport::new());
        publisher(&transport, false)
            .publish(
                "post",
                Some(ChannelMedia::Album(vec!["a".into(), "b".into()])),
            )
            .await
            .unwrap();
        assert_eq!(
            transport.channel_calls(),
            vec![
                TransportCall::SendMedia {
                    chat_id: CHANNEL,
                    media: ChannelMedia::Album(vec!["a".into(), "b".into()]),
                    caption: None,
                },
                TransportCall::SendText {
                    chat_id: CHANNEL,
                    text: "post".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn single_element_album_is_sent_as_a_photo() {
        let transport = Arc::new(FakeTransport::new());
        publisher(&transport, false)
            .publish("post", Some(ChannelMedia::Album(vec!["only".into()])))
            .await
            .unwrap();
        assert!(matches!(
            &transport.channel_calls()[0],
            TransportCall::SendMedia {
                media: ChannelMedia::Photo(id),
                ..
            } if id == "only"
        ));
    }

    #[tokio::test]
    async fn short_text_rides_as_a_caption_when_enabled() {
        let transport = Arc::new(FakeTransport::new());
        publisher(&transport, true)
            .publish("post", Some(ChannelMedia::Video("clip".into())))
            .await
            .unwrap();
        assert_eq!(
            transport.channel_calls(),
            vec![TransportCall::SendMedia {
                chat_id: CHANNEL,
                media: ChannelMedia::Video("clip".into()),
                caption: Some("post".into()),
            }]
        );
    }

    #[tokio::test]
    async fn long_text_is_never_a_caption() {
        let transport = Arc::new(FakeTransport::new());
        let text = "x".repeat(CAPTION_LIMIT + 1);
        publisher(&transport, true)
            .publish(&text, Some(ChannelMedia::Photo("p".into())))
            .await
            .unwrap();
        assert_eq!(transport.channel_calls().len(), 2);
    }

    #[tokio::test]
    async fn media_failure_stops_before_the_text() {
        let transport = Arc::new(
            FakeTransport::new().with_media_error(TransportError::Api("chat not found".into())),
        );
        let failure = publisher(&transport, false)
            .publish("generated", Some(ChannelMedia::Photo("p".into())))
            .await
            .unwrap_err();
        assert_eq!(failure.text, "generated");
        assert!(matches!(
            failure.error,
            PublishError::Delivery { stage: "photo", .. }
        ));
        assert_eq!(transport.channel_calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_channel_disables_publishing() {
        let transport = Arc::new(FakeTransport::new());
        let failure = Publisher::new(transport.clone(), None, false)
            .publish("generated", None)
            .await
            .unwrap_err();
        assert_eq!(failure.error, PublishError::ChannelNotConfigured);
        assert!(transport.calls().is_empty());
    }
}
