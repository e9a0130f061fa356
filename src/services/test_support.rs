use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use super::{ExtractionRequest, ExtractionService, ResponseFormat, ServiceError, ServiceResponse};

type Handler = Box<dyn Fn(&ExtractionRequest) -> Result<ServiceResponse, ServiceError> + Send + Sync>;

/// Scripted stand-in for the remote model.
pub struct FakeService {
    handler: Handler,
    pub attempts: AtomicUsize,
    rate_limited_calls: AtomicUsize,
    delay: Duration,
}

impl FakeService {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ExtractionRequest) -> Result<ServiceResponse, ServiceError> + Send + Sync + 'static,
    {
        FakeService {
            handler: Box::new(handler),
            attempts: AtomicUsize::new(0),
            rate_limited_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The next `calls` requests are answered with a rate limit.
    pub fn fail_first(&self, calls: usize) {
        self.rate_limited_calls.store(calls, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionService for FakeService {
    fn default_format(&self) -> ResponseFormat {
        ResponseFormat::FreeText
    }

    async fn generate(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ServiceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.rate_limited_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rate_limited_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(ServiceError::RateLimited("429 Too Many Requests".to_string()));
        }

        (self.handler)(request)
    }
}

/// A free-text answer holding `count` leads named `"{prefix} Lead {i}"`.
pub fn lead_array(prefix: &str, count: usize) -> String {
    let leads: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "name": format!("{} Lead {}", prefix, i),
                "phone": format!("{}-{:04}", prefix, i),
                "email": "N/A",
                "website": "N/A",
                "address": "Ahmedabad",
                "sourceUrl": "https://www.indiamart.com",
            })
        })
        .collect();

    format!(
        "Here is everything I found:\n{}\nAll entries come from public directories.",
        serde_json::to_string_pretty(&leads).unwrap_or_default()
    )
}
