//! Typed client for OpenAI-compatible chat-completions endpoints.

use std::time::Duration;

use lingualink_core::{BackendConfig, Error, Result};
use serde::{Deserialize, Serialize};

/// One chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Message content: plain text for the system role, ordered parts for
/// the user role.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "input_audio")]
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudio {
    /// Base64-encoded waveform.
    pub data: String,
    /// Always `"wav"`: uploads are normalized before dispatch.
    pub format: String,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// Assemble the canonical audio request: an optional system message
    /// and a user message of `[text?, input_audio]`.
    pub fn audio(
        model: impl Into<String>,
        system_prompt: &str,
        user_prompt: &str,
        audio_base64: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(system_prompt.to_string()),
            });
        }

        let mut parts = Vec::new();
        if !user_prompt.is_empty() {
            parts.push(ContentPart::Text { text: user_prompt.to_string() });
        }
        parts.push(ContentPart::InputAudio {
            input_audio: InputAudio { data: audio_base64, format: "wav".to_string() },
        });
        messages.push(ChatMessage { role: "user".to_string(), content: MessageContent::Parts(parts) });

        Self { model: model.into(), messages, max_tokens, temperature }
    }
}

/// The slice of the response body the gateway consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// The reply text, when the response carries a usable choice.
    pub fn reply_text(&self) -> Option<&str> {
        self.choices.first().and_then(|choice| choice.message.content.as_deref())
    }
}

/// Append `/v1` to a backend base URL unless it is already terminal.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

/// Thin reqwest wrapper for upstream calls. Timeouts are per call, from
/// the chosen backend's configuration.
pub struct ChatClient {
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("upstream client: {e}")))?;
        Ok(Self { client })
    }

    /// POST the request to the backend's chat-completions route and
    /// return the reply text.
    pub async fn chat_completion(
        &self,
        backend: &BackendConfig,
        request: &ChatRequest,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", normalize_base_url(&backend.url));
        tracing::debug!(
            backend = %backend.name,
            url = %url,
            model = %request.model,
            "sending chat completion"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&backend.api_key)
            .timeout(Duration::from_secs_f64(backend.timeout))
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<serde_json::Value>().await.ok();
            return Err(Error::Upstream {
                message: format!("HTTP {}", status.as_u16()),
                status: Some(status.as_u16()),
                body,
            });
        }

        let decoded: ChatResponse = response.json().await.map_err(|e| Error::Upstream {
            message: format!("undecodable response body: {e}"),
            status: Some(status.as_u16()),
            body: None,
        })?;

        match decoded.reply_text() {
            Some(text) => Ok(text.to_string()),
            None => Err(Error::Upstream {
                message: "no valid choice in model response".to_string(),
                status: Some(status.as_u16()),
                body: None,
            }),
        }
    }
}

fn classify_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Upstream { message: e.to_string(), status: None, body: None }
    }
}
