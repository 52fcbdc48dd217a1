//! Turns incoming media messages into pipeline flows.

use teloxide::prelude::*;
use tracing::debug;

use crate::handlers::{caption_of, origin, HandlerResult};
use crate::pipeline::{status, AlbumItem, MotionKind};
use crate::state::AppState;
use crate::transport::AttachmentRef;

fn largest_photo(message: &Message) -> Option<AttachmentRef> {
    let photo = message.photo()?.last()?;
    Some(AttachmentRef::new(
        photo.file.id.0.clone(),
        Some(u64::from(photo.file.size)),
    ))
}

fn motion_attachment(message: &Message) -> Option<(MotionKind, AttachmentRef)> {
    if let Some(animation) = message.animation() {
        let attachment = AttachmentRef::new(
            animation.file.id.0.clone(),
            Some(u64::from(animation.file.size)),
        )
        .with_mime_type(animation.mime_type.as_ref().map(|mime| mime.to_string()));
        return Some((MotionKind::Animation, attachment));
    }
    let video = message.video()?;
    let attachment = AttachmentRef::new(video.file.id.0.clone(), Some(u64::from(video.file.size)))
        .with_mime_type(video.mime_type.as_ref().map(|mime| mime.to_string()));
    Some((MotionKind::Video, attachment))
}

pub async fn handle_album_part(state: AppState, message: Message) -> HandlerResult {
    let (Some(group_id), Some(photo)) = (message.media_group_id(), largest_photo(&message)) else {
        return Ok(());
    };

    let item = AlbumItem {
        origin: origin(&message),
        caption: message.caption().map(str::to_string),
        photo,
    };
    if state.albums.on_attachment(&group_id.0, item).is_some() {
        debug!("Scheduled album {}", group_id.0);
    }
    Ok(())
}

pub async fn handle_photo(state: AppState, message: Message) -> HandlerResult {
    let Some(photo) = largest_photo(&message) else {
        return Ok(());
    };
    let origin = origin(&message);
    let Some(caption) = caption_of(&message) else {
        state
            .pipeline
            .notify(origin, &status::missing_caption("photo"))
            .await;
        return Ok(());
    };

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.photo_post(origin, photo, &caption).await;
    });
    Ok(())
}

pub async fn handle_motion(state: AppState, message: Message) -> HandlerResult {
    let Some((kind, attachment)) = motion_attachment(&message) else {
        return Ok(());
    };
    let origin = origin(&message);
    let Some(caption) = caption_of(&message) else {
        state
            .pipeline
            .notify(origin, &status::missing_caption(kind.label()))
            .await;
        return Ok(());
    };

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.motion_post(origin, kind, attachment, &caption).await;
    });
    Ok(())
}
