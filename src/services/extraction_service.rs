use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::search::GroundingSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free text expected to contain a JSON array somewhere.
    FreeText,
    /// A JSON object with a single `leads` array.
    Structured,
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub prompt: String,
    pub model: String,
    pub grounded: bool,
    pub temperature: f32,
    pub format: ResponseFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Text(String),
    Json(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub body: ResponseBody,
    pub sources: Vec<GroundingSource>,
}

impl ServiceResponse {
    pub fn text(text: impl Into<String>) -> Self {
        ServiceResponse {
            body: ResponseBody::Text(text.into()),
            sources: vec![],
        }
    }

    pub fn json(json: impl Into<String>) -> Self {
        ServiceResponse {
            body: ResponseBody::Json(json.into()),
            sources: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

// Provider status codes for quota exhaustion, or an explicit 429 code field.
static RATE_LIMIT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(resource_exhausted|rate_limit_exceeded|insufficient_quota|too many requests)\b|"?\bcode"?\s*:\s*(Some\()?"?429\b"#,
    )
    .unwrap()
});

/// Classifies a raw provider error message.
pub fn classify_error_message(message: &str) -> ServiceError {
    match RATE_LIMIT_MARKERS.is_match(message) {
        true => ServiceError::RateLimited(message.to_string()),
        false => ServiceError::Other(message.to_string()),
    }
}

/// A remote model that turns a prompt into text or JSON.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    fn default_format(&self) -> ResponseFormat;

    async fn generate(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ServiceError>;
}
