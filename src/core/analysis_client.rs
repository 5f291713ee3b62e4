// Fit analysis client
// Sends the captured composite to a vision chat model and maps the reply to display text

use crate::core::config::AnalysisConfig;
use crate::models::capture::AnalysisStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// What the backend said about the outfit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisReply {
    Text(String),
    /// The backend answered with an error payload
    Error(String),
}

// ==============================================================================
// Conversation Context
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentCategory {
    Top,
    Bottom,
    Full,
}

/// Wardrobe entry the stylist may refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosetItem {
    pub category: GarmentCategory,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub closet: Vec<ClosetItem>,
}

impl ConversationContext {
    pub fn closet_json(&self) -> String {
        serde_json::to_string(&self.closet).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Analysis client trait
/// Must be safe to call repeatedly with the same image
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, image_uri: &str, context: &ConversationContext) -> AnalysisResult<AnalysisReply>;
}

/// Map a finished call to what the result panel shows. Unreachable backends
/// get the friendly fallback; anything the backend said is shown as a warning.
pub fn status_from_result(result: AnalysisResult<AnalysisReply>) -> AnalysisStatus {
    match result {
        Ok(AnalysisReply::Text(text)) => AnalysisStatus::Reply(text),
        Ok(AnalysisReply::Error(error)) => AnalysisStatus::Warning(error),
        Err(AnalysisError::Transport(e)) => {
            warn!("Analysis backend unreachable: {}", e);
            AnalysisStatus::Unreachable
        }
        Err(AnalysisError::MalformedResponse(e)) => {
            warn!("Analysis response could not be read: {}", e);
            AnalysisStatus::Unreachable
        }
        Err(e @ AnalysisError::Status { .. }) | Err(e @ AnalysisError::MissingApiKey(_)) => {
            AnalysisStatus::Warning(e.to_string())
        }
    }
}

// ==============================================================================
// OpenAI-compatible Chat Completions
// ==============================================================================

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    config: AnalysisConfig,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    /// Build a client, reading the API key from the configured environment variable
    pub fn new(config: AnalysisConfig) -> AnalysisResult<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: AnalysisConfig, api_key: Option<String>) -> AnalysisResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    pub fn build_request(&self, image_uri: &str, context: &ConversationContext) -> Value {
        let system_prompt = self
            .config
            .system_prompt
            .replace("{closet}", &context.closet_json());

        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.config.user_prompt },
                        { "type": "image_url", "image_url": { "url": image_uri } }
                    ]
                }
            ]
        })
    }
}

/// Interpret a chat completions response body. An error payload is a reply,
/// not a failure, whatever the status code.
pub fn parse_response(status: u16, body: &str) -> AnalysisResult<AnalysisReply> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) if (200..300).contains(&status) => {
            return Err(AnalysisError::MalformedResponse(e.to_string()));
        }
        Err(_) => {
            return Err(AnalysisError::Status {
                status,
                body: body.to_string(),
            });
        }
    };

    if let Some(error) = value.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "Failed to fetch response".to_string()),
        };
        return Ok(AnalysisReply::Error(message));
    }

    if !(200..300).contains(&status) {
        return Err(AnalysisError::Status {
            status,
            body: body.to_string(),
        });
    }

    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|text| AnalysisReply::Text(text.trim().to_string()))
        .ok_or_else(|| AnalysisError::MalformedResponse("missing choices[0].message.content".to_string()))
}

#[async_trait]
impl AnalysisClient for ChatCompletionsClient {
    async fn analyze(&self, image_uri: &str, context: &ConversationContext) -> AnalysisResult<AnalysisReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AnalysisError::MissingApiKey(self.config.api_key_env.clone()))?;

        debug!(
            "Requesting fit analysis from {} ({} byte image)",
            self.config.model,
            image_uri.len()
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&self.build_request(image_uri, context))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_response(status, &body)
    }
}
