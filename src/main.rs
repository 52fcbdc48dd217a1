use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tracing::{debug, error, info};

mod config;
mod handlers;
mod llm;
mod pipeline;
mod state;
#[cfg(test)]
mod test_support;
mod transport;
mod utils;

use config::Config;
use handlers::commands::{self, Command};
use handlers::{access, media, HandlerResult};
use llm::{GeminiClient, GenerationClient};
use pipeline::{PipelineSettings, PostPipeline};
use state::AppState;
use transport::TelegramTransport;
use utils::http::init_http_client;
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let _guards = init_logging(&log_level);

    let config = Config::load().map_err(|err| {
        error!("Invalid configuration: {}", err);
        err
    })?;
    config.log_summary();
    init_http_client(config.proxy_url.as_deref())?;

    let bot = Bot::new(config.bot_token.clone());
    info!("Starting channel post assistant");
    bot.delete_webhook().drop_pending_updates(true).await?;

    let generator = GenerationClient::new(
        Arc::new(GeminiClient::from_config(&config)),
        config.persona.clone(),
    );
    let pipeline = PostPipeline::new(
        Arc::new(TelegramTransport::new(bot.clone())),
        generator,
        PipelineSettings::from_config(&config),
    );
    let state = AppState::new(config, pipeline);

    let message_handler = Update::filter_message()
        .chain(dptree::filter(|msg: Message, state: AppState| {
            access::is_admin(&msg, state.config.admin_user_id)
        }))
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(commands::handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| {
                msg.media_group_id().is_some() && msg.photo().is_some()
            })
            .endpoint(media::handle_album_part),
        )
        .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(media::handle_photo))
        .branch(
            dptree::filter(|msg: Message| msg.video().is_some() || msg.animation().is_some())
                .endpoint(media::handle_motion),
        )
        .endpoint(commands::handle_unknown);

    Dispatcher::builder(bot, message_handler)
        .dependencies(dptree::deps![state])
        .default_handler(|update| async move {
            debug!("Unhandled update {}", update.id.0);
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");
    Ok(())
}
