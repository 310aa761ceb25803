//! Generative model capability.

use serde::{Deserialize, Serialize};

/// Errors from model calls.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Transient overload; the only kind the retrying caller retries.
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("quota exhausted after {attempts} attempts: {last}")]
    QuotaExhausted { attempts: u32, last: String },

    /// The provider refused the prompt itself.
    #[error("prompt blocked by provider: {0}")]
    Blocked(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.7 }
    }
}

/// Model output. `is_empty` is set when the provider returned no text
/// (e.g. every candidate was filtered).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelResponse {
    pub text: String,
    pub is_empty: bool,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let is_empty = text.is_empty();
        Self { text, is_empty }
    }

    pub fn empty() -> Self {
        Self {
            text: String::new(),
            is_empty: true,
        }
    }
}

/// A text-in, text-out generative model.
pub trait Model {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ModelError>;
}

impl<T: Model + ?Sized> Model for &T {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ModelError> {
        (**self).generate(prompt, options)
    }
}

impl<T: Model + ?Sized> Model for Box<T> {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ModelError> {
        (**self).generate(prompt, options)
    }
}
