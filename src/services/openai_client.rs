use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        ResponseFormat as OpenaiResponseFormat,
    },
    Client,
};
use async_trait::async_trait;

use super::{
    classify_error_message, ExtractionRequest, ExtractionService, ResponseBody, ResponseFormat,
    ServiceError, ServiceResponse,
};

pub struct OpenaiClient {
    client: Client<OpenAIConfig>,
}

fn into_service_error(error: OpenAIError) -> ServiceError {
    // Debug output keeps the provider's error code next to the message.
    classify_error_message(&format!("{:?}", error))
}

impl OpenaiClient {
    pub fn new(api_key: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        OpenaiClient {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl ExtractionService for OpenaiClient {
    fn default_format(&self) -> ResponseFormat {
        ResponseFormat::Structured
    }

    async fn generate(&self, request: &ExtractionRequest) -> Result<ServiceResponse, ServiceError> {
        if request.grounded {
            log::warn!(
                "Model {} has no search grounding, answering from its own knowledge",
                request.model
            );
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(request.model.clone())
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.clone())
                .build()
                .map_err(into_service_error)?
                .into()])
            .temperature(request.temperature);
        if request.format == ResponseFormat::Structured {
            builder.response_format(OpenaiResponseFormat::JsonObject);
        }
        let chat_request = builder.build().map_err(into_service_error)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| {
                log::error!("Openai request failed: {:?}", e);
                into_service_error(e)
            })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(ServiceError::Other("No content in Openai response".to_string()))?;

        let body = match request.format {
            ResponseFormat::Structured => ResponseBody::Json(content),
            ResponseFormat::FreeText => ResponseBody::Text(content),
        };

        Ok(ServiceResponse {
            body,
            sources: vec![],
        })
    }
}
