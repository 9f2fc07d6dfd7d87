use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::generation::GenerationRequest;
use crate::services::ApiError;

/// Seam for the text-to-image service.
#[async_trait]
pub trait ImageGenBackend: Send + Sync {
    /// Produce image bytes for a composed request.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, ApiError>;
}

/// Client for the image-generation endpoint. The service answers with either
/// a URL to fetch or inline base64 bytes; both are handled here so callers
/// always get raw bytes.
pub struct ImageGenClient {
    http: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    url: Option<String>,
    b64_json: Option<String>,
}

impl ImageGenClient {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.generation_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: config.image_api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.image_model.clone(),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status, String::new()));
        }

        let bytes = response.bytes().await.map_err(ApiError::from_transport)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenBackend for ImageGenClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, ApiError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "response_format": "url",
            "size": request.size.to_string(),
            "guidance_scale": request.guidance_scale,
            "watermark": request.watermark,
            "seed": request.seed,
            "n": 1
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
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::permanent(format!("unparseable generation response: {e}")))?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::permanent("generation response contained no images"))?;

        if let Some(b64) = first.b64_json {
            return base64::engine::general_purpose::STANDARD
                .decode(b64.as_bytes())
                .map_err(|e| ApiError::permanent(format!("invalid base64 image payload: {e}")));
        }

        match first.url {
            Some(url) => self.download(&url).await,
            None => Err(ApiError::permanent(
                "generation response had neither url nor b64_json",
            )),
        }
    }
}
