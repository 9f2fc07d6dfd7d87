use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::prompts::VISION_SYSTEM_PROMPT;
use crate::services::ApiError;

/// Seam for the vision-understanding service, so the pipeline can be
/// exercised with stub captioners in tests.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Caption an image. The instruction steers what the caption covers.
    async fn analyze(&self, image_bytes: &[u8], instruction: &str) -> Result<String, ApiError>;
}

/// Client for the chat-completions style vision endpoint.
pub struct VisionClient {
    http: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct TokenUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl VisionClient {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.vision_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: config.vision_api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.vision_model.clone(),
        })
    }
}

#[async_trait]
impl VisionBackend for VisionClient {
    async fn analyze(&self, image_bytes: &[u8], instruction: &str) -> Result<String, ApiError> {
        // The service wants the media subtype in the data URL.
        let subtype = match image::guess_format(image_bytes) {
            Ok(image::ImageFormat::Png) => "png",
            Ok(image::ImageFormat::Jpeg) => "jpeg",
            Ok(_) | Err(_) => "jpeg",
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": VISION_SYSTEM_PROMPT
                },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": instruction },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:image/{};base64,{}", subtype, encoded),
                                "detail": "high"
                            }
                        }
                    ]
                }
            ],
            "stream": false,
            "max_tokens": 1000
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        let body = response.text().await.map_err(ApiError::from_transport)?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::permanent(format!("unparseable vision response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Vision token usage"
            );
        }

        let caption = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::permanent("vision response contained no choices"))?;

        if caption.trim().is_empty() {
            return Err(ApiError::permanent("vision response caption was empty"));
        }

        Ok(caption)
    }
}
