use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{error, info};

use crate::app_config::Endpoints;
use crate::errors::{ClientError, ClientResult};

pub const PROMPTS_TABLE: &str = "ai_prompts";

// A row of the hosted prompt table; unknown columns are carried through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: Value,
    #[serde(default)]
    pub usage_count: i64,
    #[serde(default)]
    pub effectiveness_score: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn validate_score(score: f64) -> ClientResult<()> {
    if !(0.0..=10.0).contains(&score) {
        return Err(ClientError::InvalidInput(
            "Effectiveness score must be between 0 and 10.".to_string(),
        ));
    }
    Ok(())
}

/// Client for the prompt/procedure table of the hosted database (PostgREST).
pub struct PromptStore {
    client: Client,
    table_url: Option<String>,
    anon_key: Option<String>,
}

impl PromptStore {
    pub fn new(endpoints: &Endpoints, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            table_url: endpoints.supabase_rest_url(PROMPTS_TABLE),
            anon_key: endpoints.supabase_anon_key.clone().filter(|k| !k.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.table_url.is_some() && self.anon_key.is_some()
    }

    fn request(&self, method: reqwest::Method) -> ClientResult<RequestBuilder> {
        let (Some(url), Some(key)) = (&self.table_url, &self.anon_key) else {
            return Err(ClientError::NotConfigured("prompt store"));
        };
        Ok(self
            .client
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(key))
    }

    async fn rows(&self, request: RequestBuilder) -> ClientResult<Vec<PromptRecord>> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("Prompt store request failed with {}: {}", status, message);
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let rows = response
            .json::<Vec<PromptRecord>>()
            .await
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        Ok(rows)
    }

    pub async fn fetch_prompts(&self) -> ClientResult<Vec<PromptRecord>> {
        let request = self.request(reqwest::Method::GET)?.query(&[("select", "*")]);
        let prompts = self.rows(request).await?;
        info!("Fetched {} prompts", prompts.len());
        Ok(prompts)
    }

    // A missing row is `None`, not an error
    pub async fn fetch_prompt_by_id(&self, id: &str) -> ClientResult<Option<PromptRecord>> {
        let request = self
            .request(reqwest::Method::GET)?
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))]);
        Ok(self.rows(request).await?.into_iter().next())
    }

    async fn update(&self, id: &str, changes: Value) -> ClientResult<Option<PromptRecord>> {
        let request = self
            .request(reqwest::Method::PATCH)?
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&changes);
        Ok(self.rows(request).await?.into_iter().next())
    }

    /// Bump the usage counter. Read-then-write, so concurrent bumps can be lost.
    pub async fn increment_prompt_usage(&self, id: &str) -> ClientResult<Option<PromptRecord>> {
        let prompt = self
            .fetch_prompt_by_id(id)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("prompt {}", id)))?;

        self.update(
            id,
            json!({
                "usage_count": prompt.usage_count + 1,
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn update_prompt_effectiveness(&self, id: &str, score: f64) -> ClientResult<Option<PromptRecord>> {
        validate_score(score)?;
        self.update(
            id,
            json!({
                "effectiveness_score": score,
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert!(validate_score(0.0).is_ok());
        assert!(validate_score(10.0).is_ok());
        assert!(validate_score(-0.5).is_err());
        assert!(validate_score(10.1).is_err());
        assert!(validate_score(f64::NAN).is_err());
    }

    #[test]
    fn test_record_keeps_unknown_columns() {
        let record: PromptRecord = serde_json::from_value(json!({
            "id": 7,
            "title": "Cold call opener",
            "usage_count": 3
        }))
        .unwrap();
        assert_eq!(record.usage_count, 3);
        assert_eq!(record.extra.get("title"), Some(&json!("Cold call opener")));
        assert!(record.effectiveness_score.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_store() {
        let store = PromptStore::new(&Endpoints::default(), Duration::from_secs(1)).unwrap();
        assert!(!store.is_configured());
        assert!(matches!(store.fetch_prompts().await, Err(ClientError::NotConfigured(_))));
        assert!(matches!(
            store.update_prompt_effectiveness("1", 11.0).await,
            Err(ClientError::InvalidInput(_))
        ));
    }
}
