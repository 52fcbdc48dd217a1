use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use tracing::info;

use crate::handlers::{origin, HandlerResult};
use crate::pipeline::status;
use crate::state::AppState;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    Start,
    Help,
    GenText(String),
}

pub const HELP_TEXT: &str = "<b>Channel post assistant</b>

I write posts with Gemini and publish them to the channel.

/gen_text &lt;task&gt; - generate a text post on the task and publish it
Photo with a caption - the photo is analyzed and published together with the text
Album with a caption on any photo - every photo is analyzed, the album is published with the text
Video or GIF with a caption - the clip is analyzed when it fits the download limit, otherwise the text is written from the caption only

The caption is the task for the post.";

async fn send_help(bot: &Bot, message: &Message) -> HandlerResult {
    bot.send_message(message.chat.id, HELP_TEXT)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start | Command::Help => send_help(&bot, &message).await?,
        Command::GenText(prompt) => {
            info!("gen_text requested: {} chars", prompt.chars().count());
            let pipeline = state.pipeline.clone();
            let origin = origin(&message);
            tokio::spawn(async move {
                pipeline.text_post(origin, &prompt).await;
            });
        }
    }
    Ok(())
}

/// Anything the other branches did not claim.
pub async fn handle_unknown(state: AppState, message: Message) -> HandlerResult {
    state
        .pipeline
        .notify(origin(&message), status::UNKNOWN_MESSAGE)
        .await;
    Ok(())
}
