use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Access requirement of a model, derived from its catalog metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingTier {
    Free,
    Paid,
}

// Define the structure for a selectable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub provider: String,
    pub context_length: Option<u64>,
    pub pricing_tier: PricingTier,
    pub is_favorite: bool,
}

impl ModelDescriptor {
    /// Provider is the segment before the first `/` of a `provider/name` id.
    pub fn provider_of(id: &str) -> String {
        match id.split_once('/') {
            Some((provider, _)) if !provider.is_empty() => provider.to_string(),
            _ => "unknown".to_string(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.pricing_tier == PricingTier::Free
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionLevel {
    #[default]
    Free,
    Asm,
    Pro,
    #[serde(other)]
    Other,
}

impl SubscriptionLevel {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "free" | "" => SubscriptionLevel::Free,
            "asm" => SubscriptionLevel::Asm,
            "pro" => SubscriptionLevel::Pro,
            _ => SubscriptionLevel::Other,
        }
    }
}

/// Who the current user is as far as premium models are concerned.
///
/// Either fully authenticated with a token or anonymous; the fields are
/// private so a half-populated state cannot be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessState {
    authenticated: bool,
    subscription_level: SubscriptionLevel,
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Default for AccessState {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl AccessState {
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            subscription_level: SubscriptionLevel::Free,
            token: None,
            expires_at: None,
        }
    }

    pub fn authenticated(token: String, subscription_level: SubscriptionLevel, expires_at: DateTime<Utc>) -> Self {
        Self {
            authenticated: true,
            subscription_level,
            token: Some(token),
            expires_at: Some(expires_at),
        }
    }

    // A cached record claiming authentication without a token counts as anonymous
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_authenticated() && self.expires_at.is_some_and(|expires| now < expires)
    }

    pub fn token(&self) -> Option<&str> {
        if self.is_authenticated() { self.token.as_deref() } else { None }
    }

    pub fn subscription_level(&self) -> &SubscriptionLevel {
        &self.subscription_level
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

// One prompt/response exchange; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub prompt: String,
    pub response: String,
    pub model_id: String,
    pub timestamp: String,
}

impl ConversationEntry {
    pub fn new(prompt: String, response: String, model_id: String) -> Self {
        Self {
            prompt,
            response,
            model_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// Identity fields collected during registration; no payment data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl RegistrationForm {
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name".to_string());
        }
        if self.email.trim().is_empty() {
            missing.push("email".to_string());
        }
        missing
    }
}
