use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::domain::search::GroundingSource;

use super::{
    classify_error_message, ExtractionRequest, ExtractionService, ResponseBody, ResponseFormat,
    ServiceError, ServiceResponse,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/";

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn lead_list_schema() -> serde_json::Value {
    let field = json!({"type": "STRING"});
    json!({
        "type": "OBJECT",
        "properties": {
            "leads": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": field,
                        "phone": field,
                        "email": field,
                        "website": field,
                        "address": field,
                        "sourceUrl": field,
                    },
                    "required": ["name", "phone", "email", "website", "address", "sourceUrl"]
                }
            }
        },
        "required": ["leads"]
    })
}

impl GeminiClient {
    /// Calls carry no deadline of their own; the harvester bounds each one.
    pub fn new(api_key: String, base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = match base_url.ends_with('/') {
            true => base_url.to_string(),
            false => format!("{}/", base_url),
        };
        let base_url = Url::parse(&base_url).context("Invalid Gemini base url")?;

        Ok(GeminiClient {
            client,
            api_key,
            base_url,
        })
    }

    fn endpoint(&self, model: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(&format!("v1beta/models/{}:generateContent", model))
            .map_err(|e| ServiceError::Other(format!("Invalid model endpoint: {}", e)))
    }

    fn build_body(request: &ExtractionRequest) -> GenerateContentRequest {
        let tools = match request.grounded {
            true => vec![json!({"google_search": {}})],
            false => vec![],
        };
        let (response_mime_type, response_schema) = match request.format {
            ResponseFormat::Structured => {
                (Some("application/json".to_string()), Some(lead_list_schema()))
            }
            ResponseFormat::FreeText => (None, None),
        };

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt.clone()),
                }],
            }],
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                response_mime_type,
                response_schema,
            },
        }
    }
}

fn into_service_response(
    response: GenerateContentResponse,
    format: ResponseFormat,
) -> ServiceResponse {
    let candidate = response.candidates.into_iter().next();

    let text: String = candidate
        .as_ref()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    let sources = candidate
        .and_then(|c| c.grounding_metadata)
        .map(|metadata| {
            metadata
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| {
                    let uri = web.uri.unwrap_or_default();
                    match uri.is_empty() {
                        true => None,
                        false => Some(GroundingSource {
                            title: web.title.unwrap_or("Registry Source".to_string()),
                            uri,
                        }),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let body = match format {
        ResponseFormat::Structured => ResponseBody::Json(text),
        ResponseFormat::FreeText => ResponseBody::Text(text),
    };

    ServiceResponse { body, sources }
}

#[async_trait]
impl ExtractionService for GeminiClient {
    fn default_format(&self) -> ResponseFormat {
        ResponseFormat::FreeText
    }

    async fn generate(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ServiceError> {
        let url = self.endpoint(&request.model)?;
        let body = Self::build_body(request);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Other(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("Gemini returned {}: {}", status, text);
            let message = format!("Gemini API error {}: {}", status, text);

            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited(message),
                _ => classify_error_message(&message),
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Other(format!("Failed to decode Gemini response: {}", e)))?;

        Ok(into_service_response(parsed, request.format))
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, sync::Arc, time::Duration};

    use tokio_util::sync::CancellationToken;

    use super::{into_service_response, GeminiClient, GenerateContentResponse, GEMINI_BASE_URL};
    use crate::services::{
        ExtractionRequest, Harvester, ModelSettings, ResponseBody, ResponseFormat, RetryPolicy,
        SegmentError,
    };

    fn request(grounded: bool, format: ResponseFormat) -> ExtractionRequest {
        ExtractionRequest {
            prompt: "find leads".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            grounded,
            temperature: 0.1,
            format,
        }
    }

    #[test]
    fn endpoint_includes_model() {
        let client = GeminiClient::new("key".to_string(), GEMINI_BASE_URL.trim_end_matches('/'))
            .unwrap();

        assert_eq!(
            client.endpoint("gemini-3-flash-preview").unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }

    #[test]
    fn grounded_request_enables_search_tool() {
        let body = GeminiClient::build_body(&request(true, ResponseFormat::FreeText));
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["tools"][0], serde_json::json!({"google_search": {}}));
        assert_eq!(value["contents"][0]["parts"][0]["text"], "find leads");
        assert!(value["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn structured_request_carries_schema() {
        let body = GeminiClient::build_body(&request(false, ResponseFormat::Structured));
        let value = serde_json::to_value(&body).unwrap();

        assert!(value.get("tools").is_none());
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(
            value["generationConfig"]["responseSchema"]["properties"]["leads"]["type"],
            "ARRAY"
        );
    }

    #[test]
    fn response_joins_text_and_collects_sources() {
        let raw = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "[{\"name\":"}, {"text": "\"A\"}]"}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://indiamart.com/x", "title": "IndiaMART"}},
                    {"web": {"uri": "https://gidc.gov.in/members"}},
                    {"web": {"uri": "", "title": "empty"}},
                    {}
                ]}
            }]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let response = into_service_response(parsed, ResponseFormat::FreeText);

        assert_eq!(response.body, ResponseBody::Text(r#"[{"name":"A"}]"#.to_string()));
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.sources[1].title, "Registry Source");
    }

    #[test]
    fn empty_candidates_give_empty_text() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        let response = into_service_response(parsed, ResponseFormat::FreeText);

        assert_eq!(response.body, ResponseBody::Text(String::new()));
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn unanswered_request_is_a_timeout() {
        // Accepted by the kernel backlog, never answered.
        let silent = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", silent.local_addr().unwrap());
        let client = GeminiClient::new("key".to_string(), &base_url).unwrap();
        let deadline = Duration::from_millis(50);
        let harvester = Harvester::new(
            Arc::new(client),
            ModelSettings {
                model: "gemini-3-flash-preview".to_string(),
                temperature: 0.1,
                grounded: false,
                request_timeout: deadline,
            },
        );
        let retry = RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(1),
        };

        for _ in 0..10 {
            let outcome = harvester
                .run_segment("q", "", &retry, &CancellationToken::new())
                .await;

            assert_eq!(outcome, Err(SegmentError::Timeout(deadline)));
        }
    }
}
