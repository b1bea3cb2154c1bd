//! Gemini API client with function calling
//!
//! Uses a long-lived reqwest::Client for connection pooling. Transient
//! failures (connect errors, timeouts, 429 and 5xx) are retried with a
//! linearly growing delay.

use crate::config::LlmSettings;
use crate::error::AssistantError;
use crate::tools::ToolSpec;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: i32,
    max_retries: u32,
    retry_delay: Duration,
}

impl GeminiClient {
    pub fn new(settings: &LlmSettings) -> crate::Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AssistantError::ConfigError("GEMINI_API_KEY not configured".to_string()))?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            max_retries: settings.max_retries.max(1),
            retry_delay: settings.retry_delay,
        })
    }

    /// Point at a different endpoint (proxies, local mocks)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    pub fn build_request(
        &self,
        system_prompt: &str,
        contents: Vec<Content>,
        tools: &[ToolSpec],
    ) -> GenerateContentRequest {
        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations {
                function_declarations: tools
                    .iter()
                    .map(|spec| FunctionDeclaration {
                        name: spec.name.to_string(),
                        description: spec.description.to_string(),
                        parameters: spec.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        GenerateContentRequest {
            contents,
            tools,
            system_instruction: Some(Content::text(None, system_prompt)),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    /// Send one generateContent call, retrying transient failures
    pub async fn generate(&self, request: &GenerateContentRequest) -> crate::Result<GenerateContentResponse> {
        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            info!(model = %self.model, attempt, "Calling Gemini API");

            let sent = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(request)
                .send()
                .await;

            let failure = match sent {
                Ok(response) if response.status().is_success() => {
                    return response.json::<GenerateContentResponse>().await.map_err(|e| {
                        error!("Failed to parse Gemini response: {}", e);
                        AssistantError::RouterError(format!("Gemini parse error: {}", e))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let err = AssistantError::RouterError(format!("Gemini API error {}: {}", status, body));
                    if !is_transient_status(status) {
                        error!(%status, "Gemini API rejected request");
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    AssistantError::RouterError(format!("Gemini API unreachable: {}", e))
                }
                Err(e) => return Err(e.into()),
            };

            warn!(attempt, error = %failure, "Gemini call failed");
            last_error = Some(failure);

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| AssistantError::RouterError("Gemini API not called".to_string())))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

// ================= WIRE TYPES =================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclarations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclarations {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Parts of the first candidate, empty if there is none
    pub fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }
}
