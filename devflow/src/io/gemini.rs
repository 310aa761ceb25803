//! Blocking HTTP client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::config::ModelConfig;
use crate::io::model::{GenerationOptions, Model, ModelError, ModelResponse};

const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

#[derive(Debug)]
pub struct GeminiModel {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiModel {
    /// Build a client from config, reading the API key from the configured
    /// environment variable.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        if cfg.provider != "gemini" {
            return Err(anyhow!("unsupported model provider '{}'", cfg.provider));
        }
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("{} is required for the gemini provider", cfg.api_key_env))?;
        Self::with_base_url(
            api_key,
            cfg.api_base.clone(),
            cfg.name.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }

    pub fn with_base_url(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build gemini HTTP client")?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

impl Model for GeminiModel {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ModelError> {
        let request = GenerateRequest::new(prompt, options.temperature);
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            warn!(?retry_after, "gemini rate limited");
            return Err(ModelError::RateLimited { retry_after });
        }
        if status >= 400 {
            let body = response.text().unwrap_or_else(|_| "(no body)".into());
            if body.contains(RESOURCE_EXHAUSTED) {
                warn!(status, "gemini resource exhausted");
                return Err(ModelError::RateLimited { retry_after: None });
            }
            return Err(ModelError::Api {
                status,
                message: body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ModelError::InvalidResponse(format!("failed to parse response: {e}")))?;
        parsed.into_model_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str, temperature: f32) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_model_response(self) -> Result<ModelResponse, ModelError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            let err = ModelError::Blocked(reason);
            warn!(err = %err, "prompt blocked; treating as an empty response");
            return Ok(ModelResponse::empty());
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            debug!("no candidates returned");
            return Ok(ModelResponse::empty());
        };
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            debug!(finish_reason = ?candidate.finish_reason, "candidate carried no text");
            return Ok(ModelResponse::empty());
        }
        Ok(ModelResponse::text(text))
    }
}
