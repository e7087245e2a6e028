use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::{OracleError, OracleResult};
use crate::models::ChatMessage;

/// One call to the provider's generate endpoint.
///
/// Carries the full prior history explicitly so that retrying the same
/// request against another model is idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub history: Vec<ChatMessage>,
    pub message: String,
    pub response_schema: Option<serde_json::Value>,
    /// Ask for `application/json` output even without a schema.
    pub json_output: bool,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            history: Vec::new(),
            message: message.into(),
            response_schema: None,
            json_output: false,
            temperature: None,
        }
    }
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Raw model identifiers from the catalog, prefix already stripped.
    async fn list_models(&self, credential: &str) -> OracleResult<Vec<String>>;

    /// Returns the concatenated text of the first candidate.
    async fn generate(&self, credential: &str, request: &GenerateRequest) -> OracleResult<String>;
}

// Gemini REST API 结构
#[derive(Debug, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl GenerateContentRequest {
    pub fn from_request(request: &GenerateRequest) -> Self {
        let mut contents: Vec<Content> = request
            .history
            .iter()
            .map(|msg| text_content(Some(msg.role.as_str()), &msg.content))
            .collect();
        contents.push(text_content(Some("user"), &request.message));

        let wants_json = request.json_output || request.response_schema.is_some();
        let generation_config = if wants_json || request.temperature.is_some() {
            Some(GenerationConfig {
                response_mime_type: wants_json.then(|| "application/json".to_string()),
                response_schema: request.response_schema.clone(),
                temperature: request.temperature,
            })
        } else {
            None
        };

        Self {
            contents,
            system_instruction: request
                .system_instruction
                .as_deref()
                .map(|text| text_content(None, text)),
            generation_config,
        }
    }
}

impl ModelListResponse {
    /// 解析模型目录，去掉 `models/` 前缀
    pub fn parse_names(body: &str) -> OracleResult<Vec<String>> {
        let listing: ModelListResponse = serde_json::from_str(body)
            .map_err(|e| OracleError::MalformedPayload(format!("模型目錄解析失敗: {}", e)))?;

        Ok(listing
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

/// Build the error for a non-success response from its status and body.
pub fn provider_error_from_body(http_status: u16, body: &str) -> OracleError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => OracleError::from_provider(
            http_status,
            envelope.error.status.as_deref(),
            envelope.error.message,
        ),
        Err(_) => OracleError::from_provider(
            http_status,
            None,
            format!("API請求失敗 (狀態碼: {}): {}", http_status, body),
        ),
    }
}

impl GenerateContentResponse {
    /// 拼接第一个候选的所有文本片段
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part { text: Some(text.to_string()) }],
    }
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> OracleResult<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(ApiClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn provider_error(response: reqwest::Response) -> OracleError {
        let status = response.status().as_u16();
        match response.text().await {
            Ok(error_text) => provider_error_from_body(status, &error_text),
            Err(e) => OracleError::Transport(format!("讀取錯誤響應失敗: {}", e)),
        }
    }
}

#[async_trait]
impl GenerativeBackend for ApiClient {
    async fn list_models(&self, credential: &str) -> OracleResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", credential)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        let body = response.text().await?;
        ModelListResponse::parse_names(&body)
    }

    async fn generate(&self, credential: &str, request: &GenerateRequest) -> OracleResult<String> {
        let body = GenerateContentRequest::from_request(request);
        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, request.model))
            .query(&[("key", credential)])
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error(response).await);
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| OracleError::MalformedPayload(format!("JSON解析失敗: {}", e)))?;

        api_response.text().ok_or(OracleError::EmptyResponse)
    }
}
