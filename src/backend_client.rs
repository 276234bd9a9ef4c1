use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::app_config::Endpoints;
use crate::errors::{ClientError, ClientResult, ForbiddenDetails, ForbiddenReason};
use crate::models::{RegistrationForm, SubscriptionLevel};

// Text recorded when the backend answers without usable content
pub const NO_RESPONSE: &str = "No response";

// Body of `POST <backend>/task`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub prompt: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

// Body of `GET <backend-root>/auth/status`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default, alias = "access_token", alias = "accessToken")]
    pub token: Option<String>,
    #[serde(default)]
    pub subscription: Option<SubscriptionLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegistrationOutcome {
    #[serde(default)]
    pub message: Option<String>,
}

/// Completion endpoint seam
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &TaskRequest) -> ClientResult<String>;
}

/// Model listing seam
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_models(&self) -> ClientResult<Vec<Value>>;
}

/// Registration, password and status calls of the access service
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn status(&self) -> ClientResult<AuthStatus>;
    async fn subscription(&self) -> ClientResult<SubscriptionLevel>;
    async fn register(&self, form: &RegistrationForm) -> ClientResult<RegistrationOutcome>;
    async fn submit_password(&self, password: &str) -> ClientResult<String>;
}

/// Pull the completion text out of either response shape the backend uses.
pub fn extract_completion(body: &Value) -> String {
    let from_llm_result = body
        .get("llmResult")
        .and_then(|r| r.get("choices"))
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str);

    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    if success {
        if let Some(content) = from_llm_result {
            return content.to_string();
        }
    }

    body.get("response")
        .and_then(Value::as_str)
        .or(from_llm_result)
        .unwrap_or(NO_RESPONSE)
        .to_string()
}

/// Interpret the body of a 403 response.
pub fn parse_forbidden(body: &Value) -> ForbiddenDetails {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("Access denied")
        .to_string();

    ForbiddenDetails {
        reason: ForbiddenReason::from_error_text(&message),
        response: body.get("response").and_then(Value::as_str).map(str::to_string),
        requires_registration: body.get("requiresRegistration").and_then(Value::as_bool).unwrap_or(false),
        message,
    }
}

/// Accept a bare array or an object wrapping it under `data` or `models`.
pub fn extract_model_list(body: Value) -> ClientResult<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data").or_else(|| map.remove("models")) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ClientError::MalformedResponse("model listing has no array".to_string())),
        },
        _ => Err(ClientError::MalformedResponse("model listing is not JSON array".to_string())),
    }
}

fn extract_subscription(body: &Value) -> SubscriptionLevel {
    ["level", "subscription", "tier", "plan"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(SubscriptionLevel::parse)
        .unwrap_or_default()
}

// Read a non-success body into an error, keeping the backend's message when it sent one
async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if status == StatusCode::FORBIDDEN {
        return ClientError::Forbidden(parse_forbidden(&body));
    }

    let message = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

    ClientError::Http {
        status: status.as_u16(),
        message,
    }
}

/// HTTP client for the completion backend, the access service and the model catalog.
pub struct BackendClient {
    client: Client,
    endpoints: Endpoints,
}

impl BackendClient {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self { client, endpoints })
    }

    fn auth_url(&self, path: &str) -> ClientResult<String> {
        self.endpoints
            .auth_endpoint(path)
            .ok_or(ClientError::NotConfigured("auth service URL"))
    }

    async fn send_json(&self, request: RequestBuilder) -> ClientResult<Value> {
        let response = request.header("Content-Type", "application/json").send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        // Unparseable success bodies are read as empty
        Ok(response.json::<Value>().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CompletionBackend for BackendClient {
    async fn complete(&self, request: &TaskRequest) -> ClientResult<String> {
        let url = self
            .endpoints
            .task_url()
            .ok_or(ClientError::NotConfigured("completion backend URL"))?;

        info!("Sending prompt to backend with model {}", request.model);

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }

        match self.send_json(builder).await {
            Ok(body) => Ok(extract_completion(&body)),
            Err(ClientError::Forbidden(details)) => {
                warn!("Backend refused model {}: {}", request.model, details.message);
                Err(ClientError::Forbidden(details))
            }
            Err(e) => {
                error!("Completion request failed: {}", e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CatalogSource for BackendClient {
    async fn fetch_models(&self) -> ClientResult<Vec<Value>> {
        let url = self
            .endpoints
            .models_url()
            .ok_or(ClientError::NotConfigured("model catalog URL"))?;

        let mut builder = self.client.get(&url);
        if let Some(key) = self.endpoints.models_api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let body = self.send_json(builder).await?;
        let models = extract_model_list(body)?;
        debug!("Fetched {} catalog entries from {}", models.len(), url);
        Ok(models)
    }
}

#[async_trait]
impl AuthService for BackendClient {
    async fn status(&self) -> ClientResult<AuthStatus> {
        let url = self.auth_url("status")?;
        let body = self.send_json(self.client.get(&url)).await?;
        Ok(serde_json::from_value(body).unwrap_or_default())
    }

    async fn subscription(&self) -> ClientResult<SubscriptionLevel> {
        let url = self.auth_url("subscription")?;
        let body = self.send_json(self.client.get(&url)).await?;
        Ok(extract_subscription(&body))
    }

    async fn register(&self, form: &RegistrationForm) -> ClientResult<RegistrationOutcome> {
        let url = self.auth_url("register")?;
        info!("Submitting registration");
        let body = self.send_json(self.client.post(&url).json(form)).await?;
        Ok(serde_json::from_value(body).unwrap_or_default())
    }

    async fn submit_password(&self, password: &str) -> ClientResult<String> {
        let url = self.auth_url("password")?;
        let body = self
            .send_json(self.client.post(&url).json(&json!({ "password": password })))
            .await?;

        ["token", "accessToken", "access_token"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ClientError::MalformedResponse("password response carried no token".to_string()))
    }
}
