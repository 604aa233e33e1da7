use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{GenerateRequest, LlmClient, LlmError};

const MODEL_URL_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// --- Structs for content generation ---

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ApiResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ApiResponseContent {
    parts: Option<Vec<ApiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct ApiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Gemini REST client.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>, timeout: Duration) -> Self {
        GeminiClient {
            client: Client::new(),
            api_key,
            model: model.into(),
            timeout,
        }
    }

    pub fn from_env(settings: &crate::config::Settings) -> Result<Self, LlmError> {
        let api_key = settings
            .gemini_api_key
            .clone()
            .ok_or(LlmError::ApiKeyMissing)?;
        Ok(Self::new(
            api_key,
            settings.gemini_model.clone(),
            settings.llm_timeout,
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", MODEL_URL_BASE, self.model)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let generation_config = request.json_mode.then(|| GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
        });

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config,
            system_instruction: request.system_instruction.as_deref().map(|text| Content {
                parts: vec![Part { text }],
            }),
        };

        let send = self
            .client
            .post(self.endpoint())
            .header("X-Goog-Api-Key", &self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;

        let parsed: GenerateContentResponse = response.json().await?;

        if let Some(error) = parsed.error {
            return Err(LlmError::Api(error.message));
        }

        let text = parsed
            .candidates
            .and_then(|mut candidates| candidates.drain(..).next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .and_then(|parts| parts.into_iter().find_map(|part| part.text))
            .ok_or(LlmError::ContentMissing)?;

        debug!(chars = text.len(), "llm_response");
        Ok(text)
    }
}
