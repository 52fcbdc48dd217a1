//! Operator-facing status texts. Everything here is HTML for the status message.

use crate::llm::GenerationFailure;
use crate::utils::text::{escape_html, truncate_chars};

/// Longest raw detail (error text or generated post) echoed back in a status.
pub const DETAIL_DISPLAY_LIMIT: usize = 1500;
const TOPIC_DISPLAY_LIMIT: usize = 80;

pub const CHANNEL_NOT_CONFIGURED: &str =
    "❌ The target channel is not configured (TELEGRAM_CHANNEL_ID), nothing was generated.";
pub const ALBUM_WITHOUT_CAPTION: &str =
    "⚠️ The album has no caption. Add the task as a caption to one of the photos and send it again.";
pub const ALBUM_NOTHING_DOWNLOADED: &str = "❌ Could not download photos from the album.";
pub const GEN_TEXT_USAGE: &str =
    "Please provide a task after the command, for example: <code>/gen_text a short note about Rust 2024</code>";
pub const UNKNOWN_MESSAGE: &str =
    "I don't know what to do with this. Send /help to see what I can publish.";

pub fn pre_block(text: &str) -> String {
    let (shown, truncated) = truncate_chars(text, DETAIL_DISPLAY_LIMIT);
    let suffix = if truncated { "\n..." } else { "" };
    format!("<pre>{}{}</pre>", escape_html(&shown), suffix)
}

fn topic(prompt: &str) -> String {
    let (shown, truncated) = truncate_chars(prompt.trim(), TOPIC_DISPLAY_LIMIT);
    let suffix = if truncated { "..." } else { "" };
    format!("«{}{}»", escape_html(&shown), suffix)
}

pub fn missing_caption(media_label: &str) -> String {
    format!("Please add a caption to the {media_label} with the task for the post.")
}

pub fn generating_text(prompt: &str) -> String {
    format!("⏳ Generating a post on {}...", topic(prompt))
}

pub fn checking_size(media_label: &str) -> String {
    format!("⏳ Received the {media_label}, checking its size...")
}

pub fn album_received(count: usize) -> String {
    format!("⏳ Received an album of {count} photo(s), downloading...")
}

pub fn downloading(media_label: &str) -> String {
    format!("⏳ Downloading the {media_label}...")
}

pub fn generating_with(media_label: &str) -> String {
    format!("⏳ Generating the text with the {media_label}...")
}

/// `reason` completes "The photo ...", e.g. "is larger than 20 MiB".
pub fn generating_from_caption(media_label: &str, reason: &str) -> String {
    format!(
        "⏳ The {media_label} {reason} and will not be analyzed. Generating the text from the caption only..."
    )
}

pub const PUBLISHING: &str = "✅ Text generated, publishing to the channel...";

pub fn published(prompt: &str, media_label: Option<&str>) -> String {
    match media_label {
        Some(label) => format!(
            "✅ Post with the {label} on {} was published to the channel!",
            topic(prompt)
        ),
        None => format!("✅ Post on {} was published to the channel!", topic(prompt)),
    }
}

pub fn published_partially_analyzed(prompt: &str, media_label: &str, skipped: usize) -> String {
    format!(
        "✅ Post with the {media_label} on {} was published to the channel.\n⚠️ {skipped} item(s) could not be downloaded or read and were left out of the analysis.",
        topic(prompt)
    )
}

pub fn published_text_only(prompt: &str, media_label: &str) -> String {
    format!(
        "⚠️ Post with the {media_label} on {} was published, but the {media_label} itself was not analyzed (text was generated from the caption only).",
        topic(prompt)
    )
}

pub fn generation_failed(failure: &GenerationFailure) -> String {
    if failure.is_safety_block() {
        return "⛔ The text could not be generated because of safety restrictions. Try rephrasing the task.".to_string();
    }
    format!("❌ Text generation failed:\n{}", pre_block(&failure.to_string()))
}

pub fn fetch_failed(media_label: &str, detail: &str) -> String {
    format!(
        "❌ Failed to download the {media_label}:\n{}",
        pre_block(detail)
    )
}

pub fn publish_failed(detail: &str, generated: &str) -> String {
    format!(
        "❌ Failed to publish to the channel: {}\n\nGenerated text:\n{}",
        escape_html(detail),
        pre_block(generated)
    )
}

pub fn album_critical(detail: &str) -> String {
    format!(
        "❌ Critical error while processing the album:\n{}",
        pre_block(detail)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_blocks_have_their_own_wording() {
        let safety = generation_failed(&GenerationFailure::SafetyBlocked {
            reason: "SAFETY".to_string(),
        });
        assert!(safety.contains("safety restrictions"));
        assert!(!safety.contains("<pre>"));

        let other = generation_failed(&GenerationFailure::Blocked {
            reason: "OTHER".to_string(),
        });
        assert!(!other.contains("safety restrictions"));
        assert!(other.contains("<pre>request blocked: OTHER</pre>"));
    }

    #[test]
    fn long_details_are_truncated_and_escaped() {
        let block = pre_block(&format!("<{}", "a".repeat(2000)));
        assert!(block.starts_with("<pre>&lt;aaa"));
        assert!(block.ends_with("\n...</pre>"));
        assert_eq!(block.matches('a').count(), DETAIL_DISPLAY_LIMIT - 1);
    }

    #[test]
    fn publish_failure_echoes_the_generated_text() {
        let text = publish_failed("chat not found", "Tom & Jerry");
        assert!(text.contains("chat not found"));
        assert!(text.contains("<pre>Tom &amp; Jerry</pre>"));
    }

    #[test]
    fn topics_are_shortened() {
        let status = published(&"x".repeat(200), Some("photo"));
        assert!(status.contains("photo"));
        assert!(status.contains(&format!("«{}...»", "x".repeat(TOPIC_DISPLAY_LIMIT))));
    }
}
