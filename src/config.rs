use std::env;
use std::time::Duration;

use tracing::{info, warn};

pub const DEFAULT_PERSONA: &str = "You are a helpful AI assistant.";
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;
pub const DEFAULT_MEDIA_GROUP_DELAY_MS: u64 = 1500;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("TELEGRAM_BOT_TOKEN is required")]
    MissingBotToken,
    #[error("ADMIN_USER_ID is required")]
    MissingAdmin,
    #[error("{name} must be an integer, got '{value}'")]
    InvalidInteger { name: &'static str, value: String },
    #[error("PROXY_URL is not a valid URL: {0}")]
    InvalidProxy(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_user_id: u64,
    pub channel_id: Option<i64>,
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_temperature: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub persona: String,
    pub proxy_url: Option<String>,
    pub media_group_delay: Duration,
    pub max_download_bytes: u64,
    pub caption_single_media: bool,
}

/// Typed accessors over a variable source, so the same parsing runs against the
/// process environment and against fixtures.
struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn bool(&self, name: &str, default: bool) -> bool {
        self.raw(name)
            .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
            .unwrap_or(default)
    }

    fn f32(&self, name: &str, default: f32) -> f32 {
        self.raw(name)
            .and_then(|value| value.parse::<f32>().ok())
            .unwrap_or(default)
    }

    fn i32(&self, name: &str, default: i32) -> i32 {
        self.raw(name)
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(default)
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.raw(name)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(default)
    }
}

fn normalize_gemini_safety_settings(value: String) -> String {
    match value.to_lowercase().as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to standard.",
                value
            );
            "standard".to_string()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = EnvSource { lookup };

        let bot_token = source
            .raw("TELEGRAM_BOT_TOKEN")
            .or_else(|| source.raw("BOT_TOKEN"))
            .ok_or(ConfigError::MissingBotToken)?;

        let admin_raw = source.raw("ADMIN_USER_ID").ok_or(ConfigError::MissingAdmin)?;
        let admin_user_id =
            admin_raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidInteger {
                    name: "ADMIN_USER_ID",
                    value: admin_raw.clone(),
                })?;

        let channel_id = match source.raw("TELEGRAM_CHANNEL_ID") {
            Some(value) => Some(value.parse::<i64>().map_err(|_| {
                ConfigError::InvalidInteger {
                    name: "TELEGRAM_CHANNEL_ID",
                    value: value.clone(),
                }
            })?),
            None => {
                warn!("TELEGRAM_CHANNEL_ID is not set; publishing to the channel is disabled.");
                None
            }
        };

        let proxy_url = match source.raw("PROXY_URL") {
            Some(value) => {
                url::Url::parse(&value).map_err(|err| ConfigError::InvalidProxy(err.to_string()))?;
                Some(value)
            }
            None => None,
        };

        let gemini_api_key = source.string("GEMINI_API_KEY", "");
        if gemini_api_key.is_empty() {
            warn!("GEMINI_API_KEY is not set; text generation will be unavailable.");
        }

        let persona = match source.raw("CHANNEL_PERSONA") {
            Some(persona) => persona,
            None => {
                warn!("CHANNEL_PERSONA is not set; using the default persona.");
                DEFAULT_PERSONA.to_string()
            }
        };

        Ok(Config {
            bot_token,
            admin_user_id,
            channel_id,
            log_level: source.string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key,
            gemini_model: source.string("GEMINI_MODEL", "gemini-2.5-pro"),
            gemini_temperature: source.f32("GEMINI_TEMPERATURE", 0.9),
            gemini_max_output_tokens: source.i32("GEMINI_MAX_OUTPUT_TOKENS", 2048),
            gemini_safety_settings: normalize_gemini_safety_settings(
                source.string("GEMINI_SAFETY_SETTINGS", "standard"),
            ),
            persona,
            proxy_url,
            media_group_delay: Duration::from_millis(
                source.u64("MEDIA_GROUP_DELAY_MS", DEFAULT_MEDIA_GROUP_DELAY_MS),
            ),
            max_download_bytes: source.u64("MAX_DOWNLOAD_BYTES", DEFAULT_MAX_DOWNLOAD_BYTES),
            caption_single_media: source.bool("CAPTION_SINGLE_MEDIA", false),
        })
    }

    pub fn log_summary(&self) {
        let persona_preview: String = self.persona.chars().take(50).collect();
        info!("Configuration loaded.");
        info!("Admin user id: {}", self.admin_user_id);
        info!("Target channel id: {:?}", self.channel_id);
        info!("Channel persona (first 50 chars): {}...", persona_preview);
        info!(
            "Gemini API key loaded: {}",
            if self.gemini_api_key.is_empty() { "no" } else { "yes" }
        );
        info!("Gemini model: {}", self.gemini_model);
        info!("Log level: {}", self.log_level);
        if self.proxy_url.is_some() {
            info!("Proxy configured via PROXY_URL");
        } else {
            info!("PROXY_URL is not set; outbound requests go direct.");
        }
    }
}
