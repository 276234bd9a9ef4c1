//! Decides whether a prompt may go to the backend now or has to wait for the
//! user to register and unlock premium models.
//!
//! The gate only tracks state. All network calls happen in the session, which
//! feeds their outcomes back through the transition methods below. Server-side
//! validation is the only real boundary; the gate exists to drive the UI.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation_log::CachedAuthStatus;
use crate::errors::{ClientError, ClientResult, ForbiddenDetails, ForbiddenReason};
use crate::models::{AccessState, ModelDescriptor, PricingTier, SubscriptionLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Anonymous,
    PendingRegistration,
    PendingPassword,
    Authenticated,
}

/// A prompt held back until authentication completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub id: Uuid,
    pub prompt: String,
    pub model_id: String,
    pub queued_at: DateTime<Utc>,
}

impl PendingRequest {
    fn new(prompt: &str, model_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            model_id: model_id.to_string(),
            queued_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Dispatch { token: Option<String> },
    Queued(PendingRequest),
}

/// What the user is offered when an authenticated request is refused
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenOutcome {
    pub reason: ForbiddenReason,
    pub message: String,
    pub model_id: String,
    pub suggested_model: Option<String>,
    pub upgrade_contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForbiddenResolution {
    Queued(PendingRequest),
    Blocked(ForbiddenOutcome),
}

pub struct AccessGate {
    state: GateState,
    access: AccessState,
    pending: Option<PendingRequest>,
    cache_ttl: Duration,
    upgrade_contact: String,
}

impl AccessGate {
    pub fn new(cache_ttl: Duration, upgrade_contact: &str) -> Self {
        Self {
            state: GateState::Anonymous,
            access: AccessState::anonymous(),
            pending: None,
            cache_ttl,
            upgrade_contact: upgrade_contact.to_string(),
        }
    }

    /// Adopt a cached auth status if it is still inside its freshness window.
    ///
    /// Returns whether the gate is now authenticated.
    pub fn restore(&mut self, cached: Option<CachedAuthStatus>, now: DateTime<Utc>) -> bool {
        let Some(cached) = cached else {
            return false;
        };

        let fresh_until = cached.fresh_until();
        if now >= fresh_until || !cached.state.is_authenticated() {
            debug!("Cached auth status is stale or anonymous; server re-check required");
            return false;
        }

        self.access = cached.state.with_expiry(fresh_until);
        self.state = GateState::Authenticated;
        true
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn access(&self) -> &AccessState {
        &self.access
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn set_cache_ttl(&mut self, ttl: Duration) {
        self.cache_ttl = ttl;
    }

    pub fn set_upgrade_contact(&mut self, contact: &str) {
        self.upgrade_contact = contact.to_string();
    }

    // Authenticated but past the freshness window
    pub fn needs_recheck(&self, now: DateTime<Utc>) -> bool {
        self.state == GateState::Authenticated && !self.access.is_valid_at(now)
    }

    /// Decide what happens to a prompt aimed at a model of the given tier.
    pub fn request(&mut self, prompt: &str, model_id: &str, tier: PricingTier, now: DateTime<Utc>) -> GateDecision {
        let token = self.access.token().map(str::to_string);

        if tier == PricingTier::Free || self.state == GateState::Authenticated {
            return GateDecision::Dispatch { token };
        }

        GateDecision::Queued(self.queue(prompt, model_id, GateState::PendingRegistration, now))
    }

    // Only one request waits at a time; a newer one replaces it
    fn queue(&mut self, prompt: &str, model_id: &str, target: GateState, now: DateTime<Utc>) -> PendingRequest {
        let pending = PendingRequest::new(prompt, model_id, now);
        info!("Queued prompt {} for model {} until access is granted", pending.id, model_id);
        self.pending = Some(pending.clone());

        self.state = match (self.state, target) {
            (_, GateState::PendingPassword) => GateState::PendingPassword,
            (GateState::PendingPassword, _) => GateState::PendingPassword,
            _ => GateState::PendingRegistration,
        };
        pending
    }

    pub fn registration_succeeded(&mut self) -> ClientResult<()> {
        match self.state {
            GateState::Anonymous | GateState::PendingRegistration => {
                self.state = GateState::PendingPassword;
                Ok(())
            }
            other => Err(ClientError::InvalidState(format!("cannot register while {:?}", other))),
        }
    }

    /// Enter Authenticated and hand back the queued request, if any.
    ///
    /// The pending slot is emptied here so the request is replayed at most once.
    pub fn password_accepted(
        &mut self,
        token: String,
        level: SubscriptionLevel,
        now: DateTime<Utc>,
    ) -> ClientResult<Option<PendingRequest>> {
        if self.state != GateState::PendingPassword {
            return Err(ClientError::InvalidState(format!(
                "password was not requested (gate is {:?})",
                self.state
            )));
        }

        self.access = AccessState::authenticated(token, level, now + self.cache_ttl);
        self.state = GateState::Authenticated;
        info!("Access granted with subscription {:?}", self.access.subscription_level());
        Ok(self.pending.take())
    }

    /// Fold in a server status check.
    pub fn apply_server_status(&mut self, token: Option<String>, level: Option<SubscriptionLevel>, now: DateTime<Utc>) {
        let token = token.or_else(|| self.access.token().map(str::to_string));
        match token {
            Some(token) => {
                let level = level.unwrap_or_else(|| self.access.subscription_level().clone());
                self.access = AccessState::authenticated(token, level, now + self.cache_ttl);
                self.state = GateState::Authenticated;
                self.pending = None;
            }
            None => self.sign_out(),
        }
    }

    /// Handle a 403 from the backend for the given prompt.
    ///
    /// An authenticated user stays authenticated and is offered an alternative
    /// model or an upgrade contact. Otherwise the prompt is queued and the
    /// registration flow starts.
    pub fn on_forbidden(
        &mut self,
        details: &ForbiddenDetails,
        prompt: &str,
        model_id: &str,
        alternative: Option<&ModelDescriptor>,
        now: DateTime<Utc>,
    ) -> ForbiddenResolution {
        if self.state == GateState::Authenticated {
            let upgrade_contact = match details.reason {
                ForbiddenReason::SubscriptionRequired | ForbiddenReason::Other => Some(self.upgrade_contact.clone()),
                _ => None,
            };
            return ForbiddenResolution::Blocked(ForbiddenOutcome {
                reason: details.reason,
                message: details.reason.describe().to_string(),
                model_id: model_id.to_string(),
                suggested_model: alternative.map(|m| m.id.clone()),
                upgrade_contact,
            });
        }

        let target = if details.reason == ForbiddenReason::PasswordRequired {
            GateState::PendingPassword
        } else {
            GateState::PendingRegistration
        };
        ForbiddenResolution::Queued(self.queue(prompt, model_id, target, now))
    }

    pub fn sign_out(&mut self) {
        self.state = GateState::Anonymous;
        self.access = AccessState::anonymous();
        self.pending = None;
    }
}
