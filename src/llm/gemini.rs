use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::generation::{
    GenerationBackend, GenerationFailure, GenerationMedia, GenerationOutcome, RemoteMediaHandle,
    UploadFailureKind,
};
use crate::llm::media::{detect_mime_type, normalize_gemini_mime_type};
use crate::utils::http::get_http_client;
use crate::utils::text::truncate_for_log;
use crate::utils::timing::log_llm_timing;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;
const GEMINI_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const FILE_ACTIVE_POLL_ATTEMPTS: usize = 15;
const FILE_ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileInfo {
    name: String,
    #[serde(default)]
    uri: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiFileResponse {
    file: GeminiFileInfo,
}

/// Failure of a single HTTP exchange with the API, before it is given a meaning.
#[derive(Debug)]
enum GeminiHttpError {
    Connect(String),
    Send(String),
    Status { status: StatusCode, detail: String },
    Decode(String),
}

impl GeminiHttpError {
    fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() {
            GeminiHttpError::Connect(err.to_string())
        } else {
            GeminiHttpError::Send(err.to_string())
        }
    }

    fn describe(&self) -> String {
        match self {
            GeminiHttpError::Connect(message)
            | GeminiHttpError::Send(message)
            | GeminiHttpError::Decode(message) => message.clone(),
            GeminiHttpError::Status { status, detail } => format!("status {status}: {detail}"),
        }
    }

    fn into_upload_failure(self) -> GenerationFailure {
        let kind = match &self {
            GeminiHttpError::Connect(_) => UploadFailureKind::TransportRefused,
            GeminiHttpError::Status { status, .. } if *status == StatusCode::NOT_FOUND => {
                UploadFailureKind::NotFound
            }
            _ => UploadFailureKind::Backend,
        };
        GenerationFailure::upload(kind, self.describe())
    }

    fn into_generation_failure(self) -> GenerationFailure {
        match self {
            GeminiHttpError::Connect(message) | GeminiHttpError::Send(message) => {
                GenerationFailure::Transport(message)
            }
            GeminiHttpError::Status { .. } => GenerationFailure::Backend(self.describe()),
            GeminiHttpError::Decode(message) => GenerationFailure::Unknown(message),
        }
    }
}

fn gemini_should_retry_error(err: &GeminiHttpError) -> bool {
    match err {
        GeminiHttpError::Connect(_) | GeminiHttpError::Send(_) => true,
        GeminiHttpError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS
                || *status == StatusCode::REQUEST_TIMEOUT
                || status.is_server_error()
        }
        GeminiHttpError::Decode(_) => false,
    }
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
        {
            return message.to_string();
        }
        return truncate_for_log(&value.to_string(), 2000);
    }

    truncate_for_log(trimmed, 2000)
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GeminiHttpError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(GeminiHttpError::Status {
        status,
        detail: summarize_error_body(&body),
    })
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "permissive" => "OFF",
        _ => "BLOCK_MEDIUM_AND_ABOVE",
    };

    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|category| json!({ "category": category, "threshold": threshold }))
    .collect()
}

fn build_parts(prompt: &str, media: GenerationMedia<'_>) -> Vec<Value> {
    let mut parts = vec![json!({ "text": prompt })];
    match media {
        GenerationMedia::TextOnly => {}
        GenerationMedia::InlineImages(images) => {
            for image in images {
                let mime_type = detect_mime_type(image)
                    .map(|mime| normalize_gemini_mime_type(&mime))
                    .unwrap_or_else(|| "image/jpeg".to_string());
                parts.push(json!({
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": general_purpose::STANDARD.encode(image)
                    }
                }));
            }
        }
        GenerationMedia::Uploaded(handle) => {
            parts.push(json!({
                "fileData": {
                    "fileUri": handle.uri(),
                    "mimeType": handle.mime_type()
                }
            }));
        }
    }
    parts
}

fn media_label(media: &GenerationMedia<'_>) -> String {
    match media {
        GenerationMedia::TextOnly => "none".to_string(),
        GenerationMedia::InlineImages(images) => format!("{} image(s)", images.len()),
        GenerationMedia::Uploaded(handle) => format!("file {}", handle.name()),
    }
}

/// Turns a parsed `generateContent` response into text or a typed failure.
fn outcome_from_response(response: GeminiResponse) -> GenerationOutcome {
    let candidates = response.candidates.unwrap_or_default();
    let first_finish_reason = candidates
        .first()
        .and_then(|candidate| candidate.finish_reason.clone());

    let text = candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .filter_map(|content| content.parts)
        .flatten()
        .filter_map(|part| part.text)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !text.trim().is_empty() {
        return Ok(text.trim().to_string());
    }

    let safety_finish = first_finish_reason.as_deref() == Some("SAFETY");
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        warn!("Gemini blocked the request: {}", reason);
        if safety_finish || reason == "SAFETY" {
            return Err(GenerationFailure::SafetyBlocked { reason });
        }
        return Err(GenerationFailure::Blocked { reason });
    }
    if safety_finish {
        return Err(GenerationFailure::SafetyBlocked {
            reason: "SAFETY".to_string(),
        });
    }

    Err(GenerationFailure::EmptyResponse)
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: i32,
    safety_profile: String,
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
            temperature: config.gemini_temperature,
            max_output_tokens: config.gemini_max_output_tokens,
            safety_profile: config.gemini_safety_settings.clone(),
        }
    }

    fn ensure_configured(&self) -> Result<(), GenerationFailure> {
        if self.api_key.trim().is_empty() {
            return Err(GenerationFailure::NotConfigured);
        }
        Ok(())
    }

    async fn upload_bytes(
        &self,
        display_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<GeminiFileInfo, GeminiHttpError> {
        let client = get_http_client();
        let start_response = client
            .post(format!("{GEMINI_API_BASE}/upload/v1beta/files"))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(GeminiHttpError::from_send)?;
        let start_response = ensure_success(start_response).await?;

        let upload_url = start_response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                GeminiHttpError::Decode("file upload did not return an upload URL".to_string())
            })?;

        let content_length = bytes.len();
        let finalize_response = client
            .post(upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .header("Content-Length", content_length.to_string())
            .body(bytes)
            .send()
            .await
            .map_err(GeminiHttpError::from_send)?;
        let finalize_response = ensure_success(finalize_response).await?;

        finalize_response
            .json::<GeminiFileResponse>()
            .await
            .map(|payload| payload.file)
            .map_err(|err| GeminiHttpError::Decode(err.to_string()))
    }

    async fn file_metadata(&self, name: &str) -> Result<GeminiFileInfo, GeminiHttpError> {
        let response = get_http_client()
            .get(format!("{GEMINI_API_BASE}/v1beta/{name}"))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(GeminiHttpError::from_send)?;
        ensure_success(response)
            .await?
            .json::<GeminiFileResponse>()
            .await
            .map(|payload| payload.file)
            .map_err(|err| GeminiHttpError::Decode(err.to_string()))
    }

    async fn call_generate_content(&self, payload: &Value) -> Result<GeminiResponse, GeminiHttpError> {
        let url = format!(
            "{GEMINI_API_BASE}/v1beta/models/{}:generateContent",
            self.model
        );

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let result = match get_http_client()
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(GEMINI_REQUEST_TIMEOUT)
                .json(payload)
                .send()
                .await
            {
                Ok(response) => ensure_success(response).await,
                Err(err) => Err(GeminiHttpError::from_send(err)),
            };

            match result {
                Ok(response) => {
                    return response
                        .json::<GeminiResponse>()
                        .await
                        .map_err(|err| GeminiHttpError::Decode(err.to_string()));
                }
                Err(err) => {
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                    warn!(
                        "Gemini request failed: {} (attempt={}, retrying={})",
                        err.describe(),
                        attempt,
                        should_retry
                    );
                    if !should_retry {
                        return Err(err);
                    }
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn upload_media(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<RemoteMediaHandle, GenerationFailure> {
        self.ensure_configured()?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                UploadFailureKind::NotFound
            } else {
                UploadFailureKind::Backend
            };
            GenerationFailure::upload(kind, format!("{}: {}", path.display(), err))
        })?;

        let mime_type = normalize_gemini_mime_type(mime_type);
        let info = self
            .upload_bytes("user_media_upload", &mime_type, bytes)
            .await
            .map_err(GeminiHttpError::into_upload_failure)?;
        let uri = if info.uri.trim().is_empty() {
            format!("{GEMINI_API_BASE}/v1beta/{}", info.name)
        } else {
            info.uri.clone()
        };
        info!("Gemini file uploaded: name={}, uri={}", info.name, uri);
        Ok(RemoteMediaHandle::new(info.name, uri, mime_type))
    }

    async fn wait_until_ready(&self, handle: &RemoteMediaHandle) -> Result<(), GenerationFailure> {
        for _ in 0..FILE_ACTIVE_POLL_ATTEMPTS {
            let info = self
                .file_metadata(handle.name())
                .await
                .map_err(GeminiHttpError::into_upload_failure)?;
            match info.state.as_deref().unwrap_or("PROCESSING") {
                "ACTIVE" => return Ok(()),
                "FAILED" => {
                    return Err(GenerationFailure::upload(
                        UploadFailureKind::Backend,
                        format!("file processing failed for {}", handle.name()),
                    ))
                }
                state => debug!("Gemini file {} is {}", handle.name(), state),
            }
            tokio::time::sleep(FILE_ACTIVE_POLL_INTERVAL).await;
        }

        Err(GenerationFailure::upload(
            UploadFailureKind::Backend,
            format!("timed out waiting for {} to become active", handle.name()),
        ))
    }

    async fn generate(&self, prompt: &str, media: GenerationMedia<'_>) -> GenerationOutcome {
        self.ensure_configured()?;

        let payload = json!({
            "contents": [{ "role": "user", "parts": build_parts(prompt, media) }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            },
            "safetySettings": build_safety_settings(&self.safety_profile),
        });
        debug!(
            target: "llm.gemini",
            model = %self.model,
            media = %media_label(&media),
            prompt = %truncate_for_log(prompt, 200)
        );

        log_llm_timing("gemini", &self.model, "generate_content", || async {
            let response = self
                .call_generate_content(&payload)
                .await
                .map_err(GeminiHttpError::into_generation_failure)?;
            let outcome = outcome_from_response(response);
            if let Ok(text) = &outcome {
                info!("Gemini replied with {} chars", text.chars().count());
            }
            outcome
        })
        .await
    }

    async fn delete_media(&self, handle: &RemoteMediaHandle) -> Result<(), GenerationFailure> {
        let response = get_http_client()
            .delete(format!("{GEMINI_API_BASE}/v1beta/{}", handle.name()))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| GeminiHttpError::from_send(err).into_generation_failure())?;
        ensure_success(response)
            .await
            .map_err(GeminiHttpError::into_generation_failure)?;
        Ok(())
    }
}
