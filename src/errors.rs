use serde::{Deserialize, Serialize};

/// Result alias used by every fallible operation in the crate
pub type ClientResult<T> = Result<T, ClientError>;

/// Why the completion backend refused a request with HTTP 403
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForbiddenReason {
    AuthenticationRequired,
    SubscriptionRequired,
    PasswordRequired,
    Other,
}

impl ForbiddenReason {
    /// Map the backend's `error` text onto a reason.
    pub fn from_error_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("password required") {
            ForbiddenReason::PasswordRequired
        } else if lower.contains("subscription") {
            ForbiddenReason::SubscriptionRequired
        } else if lower.contains("authentication") {
            ForbiddenReason::AuthenticationRequired
        } else {
            ForbiddenReason::Other
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ForbiddenReason::AuthenticationRequired => "Authentication required for this model",
            ForbiddenReason::SubscriptionRequired => "Your subscription level does not include this model",
            ForbiddenReason::PasswordRequired => "Password required for this model",
            ForbiddenReason::Other => "Access to this model was denied",
        }
    }
}

/// Parsed body of a 403 response from the completion backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenDetails {
    pub reason: ForbiddenReason,
    pub message: String,
    pub response: Option<String>,
    pub requires_registration: bool,
}

/// Main error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Access denied: {}", .0.message)]
    Forbidden(ForbiddenDetails),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Step {step} cannot be entered before the previous step is complete")]
    PrerequisiteMissing { step: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Text shown inline to the user when an action fails.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Transport(e) if e.is_timeout() => {
                "The request timed out. Please try again.".to_string()
            }
            ClientError::Transport(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            ClientError::Http { status, message } => {
                format!("Request failed with status {}: {}", status, message)
            }
            ClientError::Forbidden(details) => details.reason.describe().to_string(),
            ClientError::MalformedResponse(_) => "No response".to_string(),
            other => other.to_string(),
        }
    }
}
