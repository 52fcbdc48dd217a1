use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const TIMING_TARGET: &str = "bot.timing";
const LOGS_DIR: &str = "logs";

/// Keeps the non-blocking writers alive; dropping it flushes the log files.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn parse_log_level(value: &str) -> LevelFilter {
    let value = value.trim().to_lowercase();
    let value = if value == "warning" { "warn" } else { value.as_str() };
    LevelFilter::from_str(value).unwrap_or(LevelFilter::INFO)
}

/// Operational logs at the configured level. Timing events go to their own files,
/// and HTTP/Bot API client chatter is capped at WARN.
fn general_targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("teloxide", LevelFilter::WARN)
}

fn timing_targets() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn daily_writer(file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(LOGS_DIR, file_name));
    guards.push(guard);
    writer
}

pub fn init_logging(log_level: &str) -> LoggingGuards {
    if let Err(err) = fs::create_dir_all(Path::new(LOGS_DIR)) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let mut guards = Vec::with_capacity(4);
    let general = general_targets(parse_log_level(log_level));
    let timing = timing_targets();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(general.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(daily_writer("bot.log", &mut guards))
        .with_ansi(false)
        .with_filter(general.clone());
    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(daily_writer("bot.jsonl", &mut guards))
        .with_filter(general);
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(daily_writer("timing.log", &mut guards))
        .with_ansi(false)
        .with_filter(timing.clone());
    let json_timing_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(daily_writer("timing.jsonl", &mut guards))
        .with_filter(timing);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(json_file_layer)
        .with(timing_layer)
        .with(json_timing_layer)
        .init();

    LoggingGuards { _guards: guards }
}
