//! One user's client state: the model catalog, the access gate, the workflow
//! forms and the conversation history, wired to the network seams.
//!
//! Each component sits behind its own lock. Locks are never held across an
//! await point, and when two are needed they are taken catalog first.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::access_gate::{AccessGate, ForbiddenOutcome, ForbiddenResolution, GateDecision, GateState, PendingRequest};
use crate::app_config::AppSettings;
use crate::backend_client::{AuthService, CatalogSource, CompletionBackend, TaskRequest};
use crate::conversation_log::ConversationLog;
use crate::errors::{ClientError, ClientResult, ForbiddenDetails};
use crate::local_store::LocalStore;
use crate::model_catalog::{ListingOrigin, ModelCatalog, select_default};
use crate::models::{AccessState, ConversationEntry, ModelDescriptor, PricingTier, RegistrationForm, SubscriptionLevel};
use crate::preview::OutputSections;
use crate::workflow::{FormBundle, ReportPayload, WorkflowStep, WorkflowStepper, WorkflowView};

/// Result of sending a prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Completed { entry: ConversationEntry },
    Queued { pending: PendingRequest, gate: GateState },
    Blocked { outcome: ForbiddenOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub pending: PendingRequest,
    pub entry: Option<ConversationEntry>,
    pub error: Option<String>,
    pub blocked: Option<ForbiddenOutcome>,
}

// Access state as shown to the UI; the token itself never leaves the session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessView {
    pub state: GateState,
    pub authenticated: bool,
    pub subscription_level: SubscriptionLevel,
    pub expires_at: Option<DateTime<Utc>>,
    pub pending: Option<PendingRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordOutcome {
    pub access: AccessView,
    pub replayed: Option<ReplayResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogView {
    pub models: Vec<ModelDescriptor>,
    pub selected_model: Option<String>,
    pub origin: ListingOrigin,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub payload: ReportPayload,
    pub result: SendOutcome,
}

pub struct Session {
    settings: RwLock<AppSettings>,
    catalog: Mutex<ModelCatalog>,
    selected_model: Mutex<Option<String>>,
    gate: Mutex<AccessGate>,
    workflow: Mutex<WorkflowStepper>,
    log: Mutex<ConversationLog>,
    completion: Arc<dyn CompletionBackend>,
    auth: Arc<dyn AuthService>,
    catalog_source: Arc<dyn CatalogSource>,
}

impl Session {
    pub fn new(
        settings: AppSettings,
        store: Arc<LocalStore>,
        completion: Arc<dyn CompletionBackend>,
        auth: Arc<dyn AuthService>,
        catalog_source: Arc<dyn CatalogSource>,
    ) -> Self {
        let log = ConversationLog::new(store, settings.history_limit);
        let favorites = log.load_favorites();

        let mut gate = AccessGate::new(settings.auth_cache_ttl(), &settings.upgrade_contact);
        if gate.restore(log.load_cached_auth_status(), Utc::now()) {
            info!("Restored cached authentication");
        }

        Self {
            settings: RwLock::new(settings),
            catalog: Mutex::new(ModelCatalog::new(favorites)),
            selected_model: Mutex::new(None),
            gate: Mutex::new(gate),
            workflow: Mutex::new(WorkflowStepper::new()),
            log: Mutex::new(log),
            completion,
            auth,
            catalog_source,
        }
    }

    /// Initial catalog load plus an auth status check when no fresh cache was restored.
    pub async fn bootstrap(&self) {
        self.refresh_models().await;

        let needs_check = {
            let gate = self.gate.lock();
            gate.state() == GateState::Anonymous || gate.needs_recheck(Utc::now())
        };
        if needs_check {
            self.check_auth_status().await;
        }
    }

    // ---- Model catalog ----

    pub async fn refresh_models(&self) -> ListingOrigin {
        let listing = self.catalog_source.fetch_models().await;

        let mut catalog = self.catalog.lock();
        let origin = catalog.load_listing(listing);

        let mut selected = self.selected_model.lock();
        if selected.is_none() {
            *selected = select_default(catalog.models()).map(|m| m.id.clone());
            debug!("Default model: {:?}", *selected);
        }
        origin
    }

    /// Catalog in display order, optionally narrowed to one pricing tier.
    pub fn catalog_view(&self, tier: Option<PricingTier>) -> CatalogView {
        let catalog = self.catalog.lock();
        let models = match tier {
            Some(tier) => catalog.filter_by_tier(tier),
            None => catalog.display_order(),
        };
        CatalogView {
            models,
            selected_model: self.selected_model.lock().clone(),
            origin: catalog.origin(),
            refreshed_at: catalog.refreshed_at(),
        }
    }

    pub fn selected_model(&self) -> Option<String> {
        self.selected_model.lock().clone()
    }

    pub fn select_model(&self, id: &str) -> ClientResult<ModelDescriptor> {
        let catalog = self.catalog.lock();
        let model = catalog
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("model {}", id)))?;
        *self.selected_model.lock() = Some(model.id.clone());
        Ok(model)
    }

    /// Flip a favorite and write the new set to the local store straight away.
    pub fn toggle_favorite(&self, id: &str) -> ClientResult<bool> {
        let (is_favorite, favorites) = {
            let mut catalog = self.catalog.lock();
            let is_favorite = catalog.toggle_favorite(id);
            (is_favorite, catalog.favorites().clone())
        };
        self.log.lock().persist_favorites(&favorites)?;
        Ok(is_favorite)
    }

    // ---- Prompts ----

    /// Send a prompt to `model`, or to the selected model when none is given.
    pub async fn send_prompt(&self, prompt: &str, model: Option<&str>) -> ClientResult<SendOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ClientError::Validation {
                missing: vec!["prompt".to_string()],
            });
        }

        let model_id = match model.filter(|m| !m.trim().is_empty()) {
            Some(model) => model.trim().to_string(),
            None => self
                .selected_model()
                .ok_or_else(|| ClientError::InvalidState("no model selected".to_string()))?,
        };

        self.ensure_fresh_auth().await;

        let tier = self.catalog.lock().tier_of(&model_id);
        let decision = self.gate.lock().request(prompt, &model_id, tier, Utc::now());

        match decision {
            GateDecision::Queued(pending) => {
                let gate = self.gate.lock().state();
                Ok(SendOutcome::Queued { pending, gate })
            }
            GateDecision::Dispatch { token } => self.dispatch(prompt, &model_id, token).await,
        }
    }

    async fn dispatch(&self, prompt: &str, model_id: &str, token: Option<String>) -> ClientResult<SendOutcome> {
        let request = TaskRequest {
            prompt: prompt.to_string(),
            model: model_id.to_string(),
            token,
        };

        match self.completion.complete(&request).await {
            Ok(response) => {
                let entry = ConversationEntry::new(request.prompt, response, request.model);
                self.log.lock().record(entry.clone());
                Ok(SendOutcome::Completed { entry })
            }
            Err(ClientError::Forbidden(details)) => {
                let alternative = self.catalog.lock().accessible_alternative(model_id).cloned();
                let resolution =
                    self.gate
                        .lock()
                        .on_forbidden(&details, prompt, model_id, alternative.as_ref(), Utc::now());

                match resolution {
                    ForbiddenResolution::Queued(pending) => {
                        let gate = self.gate.lock().state();
                        Ok(SendOutcome::Queued { pending, gate })
                    }
                    ForbiddenResolution::Blocked(outcome) => Ok(SendOutcome::Blocked { outcome }),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub fn history(&self) -> Vec<ConversationEntry> {
        self.log.lock().entries()
    }

    // ---- Access ----

    /// Re-check with the server once the cached authentication has gone stale.
    pub async fn ensure_fresh_auth(&self) -> GateState {
        let (state, stale) = {
            let gate = self.gate.lock();
            (gate.state(), gate.needs_recheck(Utc::now()))
        };
        if stale {
            self.check_auth_status().await
        } else {
            state
        }
    }

    // Failures leave the session anonymous; they are never reported to the caller
    async fn check_auth_status(&self) -> GateState {
        let status = match self.auth.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("Auth status check failed: {}", e);
                return self.drop_stale_access();
            }
        };

        if !status.authenticated {
            return self.drop_stale_access();
        }

        let level = match status.subscription {
            Some(level) => Some(level),
            None => self.auth.subscription().await.ok(),
        };

        let (state, access) = {
            let mut gate = self.gate.lock();
            gate.apply_server_status(status.token, level, Utc::now());
            (gate.state(), gate.access().clone())
        };

        if state == GateState::Authenticated {
            self.remember_access(&access);
        } else {
            self.forget_access();
        }
        state
    }

    // Stale authentication falls back to anonymous; pending flows are left alone
    fn drop_stale_access(&self) -> GateState {
        let dropped = {
            let mut gate = self.gate.lock();
            let dropped = gate.needs_recheck(Utc::now());
            if dropped {
                gate.sign_out();
            }
            dropped
        };
        if dropped {
            info!("Cached authentication expired and could not be renewed");
            self.forget_access();
        }
        self.gate.lock().state()
    }

    fn remember_access(&self, access: &AccessState) {
        let ttl = self.settings.read().auth_cache_ttl();
        if let Err(e) = self.log.lock().cache_auth_status(access, ttl) {
            warn!("Failed to cache auth status: {}", e);
        }
    }

    fn forget_access(&self) {
        if let Err(e) = self.log.lock().clear_auth_status() {
            warn!("Failed to clear cached auth status: {}", e);
        }
    }

    pub fn access_view(&self) -> AccessView {
        let gate = self.gate.lock();
        let access = gate.access();
        AccessView {
            state: gate.state(),
            authenticated: access.is_authenticated(),
            subscription_level: access.subscription_level().clone(),
            expires_at: access.expires_at(),
            pending: gate.pending().cloned(),
        }
    }

    pub async fn register(&self, form: RegistrationForm) -> ClientResult<AccessView> {
        let missing = form.missing_fields();
        if !missing.is_empty() {
            return Err(ClientError::Validation { missing });
        }

        let state = self.gate.lock().state();
        if !matches!(state, GateState::Anonymous | GateState::PendingRegistration) {
            return Err(ClientError::InvalidState(format!("cannot register while {:?}", state)));
        }

        let outcome = self.auth.register(&form).await?;
        if let Some(message) = outcome.message {
            debug!("Registration response: {}", message);
        }

        self.gate.lock().registration_succeeded()?;
        info!("Registration accepted, waiting for password");
        Ok(self.access_view())
    }

    /// Exchange the password for a token, then replay the queued prompt once.
    pub async fn submit_password(&self, password: &str) -> ClientResult<PasswordOutcome> {
        if password.is_empty() {
            return Err(ClientError::Validation {
                missing: vec!["password".to_string()],
            });
        }

        let state = self.gate.lock().state();
        if state != GateState::PendingPassword {
            return Err(ClientError::InvalidState(format!(
                "password was not requested (gate is {:?})",
                state
            )));
        }

        let token = self.auth.submit_password(password).await?;
        let level = self.auth.subscription().await.unwrap_or_default();

        let (pending, access) = {
            let mut gate = self.gate.lock();
            let pending = gate.password_accepted(token, level, Utc::now())?;
            (pending, gate.access().clone())
        };
        self.remember_access(&access);

        let replayed = match pending {
            Some(pending) => Some(self.replay(pending).await),
            None => None,
        };

        Ok(PasswordOutcome {
            access: self.access_view(),
            replayed,
        })
    }

    // Replay goes straight to the backend; a failure is reported, never re-queued
    async fn replay(&self, pending: PendingRequest) -> ReplayResult {
        let token = self.gate.lock().access().token().map(str::to_string);
        let request = TaskRequest {
            prompt: pending.prompt.clone(),
            model: pending.model_id.clone(),
            token,
        };

        info!("Replaying queued prompt {} for model {}", pending.id, pending.model_id);
        match self.completion.complete(&request).await {
            Ok(response) => {
                let entry = ConversationEntry::new(request.prompt, response, request.model);
                self.log.lock().record(entry.clone());
                ReplayResult {
                    pending,
                    entry: Some(entry),
                    error: None,
                    blocked: None,
                }
            }
            Err(e) => {
                warn!("Replay of queued prompt {} failed: {}", pending.id, e);
                let blocked = match &e {
                    ClientError::Forbidden(details) => self.blocked_after_unlock(details, &pending),
                    _ => None,
                };
                ReplayResult {
                    pending,
                    entry: None,
                    error: Some(e.user_message()),
                    blocked,
                }
            }
        }
    }

    // Alternative model or upgrade contact for a refused replay; None unless authenticated
    fn blocked_after_unlock(&self, details: &ForbiddenDetails, pending: &PendingRequest) -> Option<ForbiddenOutcome> {
        let alternative = self.catalog.lock().accessible_alternative(&pending.model_id).cloned();

        let mut gate = self.gate.lock();
        if gate.state() != GateState::Authenticated {
            return None;
        }
        match gate.on_forbidden(details, &pending.prompt, &pending.model_id, alternative.as_ref(), Utc::now()) {
            ForbiddenResolution::Blocked(outcome) => Some(outcome),
            ForbiddenResolution::Queued(_) => None,
        }
    }

    pub fn sign_out(&self) -> AccessView {
        self.gate.lock().sign_out();
        self.forget_access();
        info!("Signed out");
        self.access_view()
    }

    // ---- Workflow ----

    pub fn workflow_view(&self) -> WorkflowView {
        self.workflow.lock().view()
    }

    pub fn submit_step(&self, step: WorkflowStep, data: FormBundle) -> ClientResult<WorkflowView> {
        let mut workflow = self.workflow.lock();
        workflow.submit_step(step, data)?;
        Ok(workflow.view())
    }

    pub fn navigate(&self, step: WorkflowStep) -> ClientResult<WorkflowView> {
        let mut workflow = self.workflow.lock();
        workflow.enter(step)?;
        Ok(workflow.view())
    }

    pub fn reset_workflow(&self) -> WorkflowView {
        let mut workflow = self.workflow.lock();
        workflow.reset();
        workflow.view()
    }

    /// Preview sections derived from whatever forms are stored so far.
    pub fn preview(&self) -> OutputSections {
        let workflow = self.workflow.lock();
        let Some(market) = workflow.slot(WorkflowStep::MarketIntel) else {
            return OutputSections::default().rendered();
        };

        let mut sections = OutputSections::from_market_intel(market);
        if let Some(sales) = workflow.slot(WorkflowStep::SalesStrategies) {
            sections.extend_with_strategies(sales);
        }
        sections
    }

    /// Build the report prompt from the stored forms and send it like any other prompt.
    pub async fn generate_report(&self) -> ClientResult<ReportOutcome> {
        let template = self.settings.read().report_prompt_template().to_string();
        let payload = self.workflow.lock().generate_report(&template)?;

        let result = self.send_prompt(&payload.prompt, None).await?;
        Ok(ReportOutcome { payload, result })
    }

    // ---- Settings ----

    pub fn settings(&self) -> AppSettings {
        self.settings.read().clone()
    }

    pub fn apply_settings(&self, settings: AppSettings) {
        {
            let mut gate = self.gate.lock();
            gate.set_cache_ttl(settings.auth_cache_ttl());
            gate.set_upgrade_contact(&settings.upgrade_contact);
        }
        self.log.lock().set_limit(settings.history_limit);
        *self.settings.write() = settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_client::AuthStatus;
    use crate::conversation_log::{AUTH_STATUS_KEY, CachedAuthStatus};
    use crate::errors::ForbiddenReason;
    use std::sync::atomic::Ordering;
    use crate::test_support::{TEST_PASSWORD, TEST_TOKEN, TestHarness};

    fn forbidden(reason: ForbiddenReason) -> ClientError {
        ClientError::Forbidden(ForbiddenDetails {
            reason,
            message: reason.describe().to_string(),
            response: None,
            requires_registration: false,
        })
    }

    fn registration() -> RegistrationForm {
        RegistrationForm {
            name: "Pat Rep".to_string(),
            email: "pat@example.com".to_string(),
            company: "Acme Devices".to_string(),
            phone: None,
        }
    }

    async fn unlocked(harness: &TestHarness) -> Session {
        let session = harness.session();
        session.bootstrap().await;
        session.register(registration()).await.unwrap();
        session.submit_password(TEST_PASSWORD).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_bootstrap_selects_default_model() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;

        assert_eq!(session.selected_model().as_deref(), Some("google/gemini-2.0-flash-exp:free"));
        let view = session.catalog_view(None);
        assert_eq!(view.origin, ListingOrigin::Remote);
        assert_eq!(view.models.len(), 4);
        // Anonymous with no cache, so the server was asked once
        assert_eq!(harness.auth.status_calls(), 1);
        assert_eq!(session.access_view().state, GateState::Anonymous);
    }

    #[tokio::test]
    async fn test_free_prompt_is_sent_and_recorded() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;

        let outcome = session.send_prompt("  Hello  ", None).await.unwrap();
        match outcome {
            SendOutcome::Completed { entry } => {
                assert_eq!(entry.prompt, "Hello");
                assert_eq!(entry.response, "echo: Hello");
                assert_eq!(entry.model_id, "google/gemini-2.0-flash-exp:free");
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(session.history().len(), 1);
        assert!(harness.completion.calls.lock()[0].token.is_none());
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        assert!(matches!(
            session.send_prompt("   ", None).await,
            Err(ClientError::Validation { .. })
        ));
        assert_eq!(harness.completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_paid_prompt_queued_then_replayed_exactly_once() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;

        let outcome = session.send_prompt("Summarise the market", Some("openai/gpt-4o")).await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Queued {
                gate: GateState::PendingRegistration,
                ..
            }
        ));
        assert_eq!(harness.completion.call_count(), 0);

        let view = session.register(registration()).await.unwrap();
        assert_eq!(view.state, GateState::PendingPassword);
        assert_eq!(harness.auth.register_calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.completion.call_count(), 0);

        let result = session.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(result.access.state, GateState::Authenticated);
        let replayed = result.replayed.unwrap();
        assert!(replayed.error.is_none());

        let calls = harness.completion.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "Summarise the market");
        assert_eq!(calls[0].model, "openai/gpt-4o");
        assert_eq!(calls[0].token.as_deref(), Some(TEST_TOKEN));

        assert!(session.access_view().pending.is_none());
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_replay_is_not_requeued() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        session.send_prompt("Hi", Some("openai/gpt-4o")).await.unwrap();
        session.register(registration()).await.unwrap();

        harness.completion.push(Err(ClientError::Http {
            status: 500,
            message: "boom".to_string(),
        }));
        let result = session.submit_password(TEST_PASSWORD).await.unwrap();
        let replayed = result.replayed.unwrap();
        assert!(replayed.entry.is_none());
        assert!(replayed.error.unwrap().contains("500"));
        assert_eq!(result.access.state, GateState::Authenticated);
        assert!(result.access.pending.is_none());
        assert_eq!(harness.completion.call_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_keeps_pending_request() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        session.send_prompt("Hi", Some("openai/gpt-4o")).await.unwrap();
        session.register(registration()).await.unwrap();

        assert!(session.submit_password("guess").await.is_err());
        let view = session.access_view();
        assert_eq!(view.state, GateState::PendingPassword);
        assert!(view.pending.is_some());
    }

    #[tokio::test]
    async fn test_password_before_registration_rejected() {
        let harness = TestHarness::new();
        let session = harness.session();
        assert!(matches!(
            session.submit_password(TEST_PASSWORD).await,
            Err(ClientError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_forbidden_while_authenticated_offers_alternative() {
        let harness = TestHarness::new();
        let session = unlocked(&harness).await;

        harness.completion.push(Err(forbidden(ForbiddenReason::SubscriptionRequired)));
        let outcome = session.send_prompt("Hi", Some("anthropic/claude-3-opus")).await.unwrap();
        match outcome {
            SendOutcome::Blocked { outcome } => {
                assert_eq!(outcome.reason, ForbiddenReason::SubscriptionRequired);
                assert_eq!(outcome.suggested_model.as_deref(), Some("google/gemini-2.0-flash-exp:free"));
                assert!(outcome.upgrade_contact.is_some());
            }
            other => panic!("expected blocked, got {:?}", other),
        }
        assert_eq!(session.access_view().state, GateState::Authenticated);
    }

    #[tokio::test]
    async fn test_forbidden_free_model_while_anonymous_queues() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;

        harness.completion.push(Err(forbidden(ForbiddenReason::PasswordRequired)));
        let outcome = session.send_prompt("Hi", None).await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Queued {
                gate: GateState::PendingPassword,
                ..
            }
        ));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_transport_errors_surface_unchanged() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        harness.completion.push(Err(ClientError::MalformedResponse("bad".to_string())));
        assert!(matches!(
            session.send_prompt("Hi", None).await,
            Err(ClientError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_auth_survives_reload() {
        let harness = TestHarness::new();
        let _first = unlocked(&harness).await;
        let calls_before = harness.auth.status_calls();

        let reloaded = harness.reopen();
        reloaded.bootstrap().await;
        assert_eq!(reloaded.access_view().state, GateState::Authenticated);
        assert_eq!(harness.auth.status_calls(), calls_before);
    }

    #[tokio::test]
    async fn test_sign_out_clears_cache() {
        let harness = TestHarness::new();
        let session = unlocked(&harness).await;
        assert_eq!(session.sign_out().state, GateState::Anonymous);

        let reloaded = harness.reopen();
        assert_eq!(reloaded.access_view().state, GateState::Anonymous);
    }

    #[tokio::test]
    async fn test_server_status_authenticates_at_bootstrap() {
        let harness = TestHarness::new();
        *harness.auth.status.lock() = Some(AuthStatus {
            authenticated: true,
            token: Some("server-token".to_string()),
            subscription: Some(SubscriptionLevel::Pro),
        });

        let session = harness.session();
        session.bootstrap().await;
        let view = session.access_view();
        assert_eq!(view.state, GateState::Authenticated);
        assert_eq!(view.subscription_level, SubscriptionLevel::Pro);
    }

    #[tokio::test]
    async fn test_favorites_persist_across_reload() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;

        assert!(session.toggle_favorite("openai/gpt-4o").unwrap());
        assert_eq!(session.catalog_view(None).models[0].id, "openai/gpt-4o");

        let reloaded = harness.reopen();
        reloaded.bootstrap().await;
        let view = reloaded.catalog_view(None);
        assert_eq!(view.models[0].id, "openai/gpt-4o");
        assert!(view.models[0].is_favorite);
    }

    #[tokio::test]
    async fn test_select_unknown_model_fails() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        assert!(matches!(session.select_model("nope/none"), Err(ClientError::NotFound(_))));
        assert_eq!(session.select_model("openai/gpt-4o").unwrap().id, "openai/gpt-4o");
        assert_eq!(session.selected_model().as_deref(), Some("openai/gpt-4o"));
    }

    #[tokio::test]
    async fn test_report_end_to_end() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;

        assert!(matches!(
            session.generate_report().await,
            Err(ClientError::PrerequisiteMissing { .. })
        ));

        let market = FormBundle::from_pairs([
            ("doctorName", "Smith"),
            ("city", "Austin"),
            ("state", "TX"),
            ("product", "DeviceX"),
            ("timeframe", "3 months"),
        ]);
        let view = session.submit_step(WorkflowStep::MarketIntel, market).unwrap();
        assert_eq!(view.current_step, WorkflowStep::SalesStrategies);
        assert!(session.preview().market_analysis.contains("DeviceX"));

        let sales = FormBundle::from_pairs([
            ("challenges", "Budget freeze"),
            ("benefits", "Shorter recovery"),
            ("successDefinition", "Pilot order"),
        ]);
        let view = session.submit_step(WorkflowStep::SalesStrategies, sales).unwrap();
        assert_eq!(view.current_step, WorkflowStep::DoctorReport);
        assert!(session.preview().market_analysis.contains("Budget freeze"));

        let report = session.generate_report().await.unwrap();
        for value in ["Smith", "Austin", "TX", "DeviceX", "3 months", "Budget freeze"] {
            assert!(report.payload.prompt.contains(value));
        }
        assert!(matches!(report.result, SendOutcome::Completed { .. }));
        assert_eq!(harness.completion.call_count(), 1);
    }

    #[tokio::test]
    async fn test_history_limit_from_settings() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        for prompt in ["a", "b", "c"] {
            session.send_prompt(prompt, None).await.unwrap();
        }

        session.apply_settings(AppSettings {
            history_limit: Some(2),
            ..AppSettings::default()
        });
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].prompt, "c");
    }

    // Unlock a session whose cache window is already over
    async fn unlocked_with_zero_ttl(harness: &TestHarness) -> Session {
        let session = harness.session_with(AppSettings {
            auth_cache_ttl_secs: 0,
            ..AppSettings::default()
        });
        session.bootstrap().await;
        session.register(registration()).await.unwrap();
        session.submit_password(TEST_PASSWORD).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_expired_window_failed_recheck_queues_and_clears_cache() {
        let harness = TestHarness::new();
        let session = unlocked_with_zero_ttl(&harness).await;
        assert!(harness.store.get::<CachedAuthStatus>(AUTH_STATUS_KEY).is_some());
        let calls_before = harness.auth.status_calls();

        let outcome = session.send_prompt("Hi", Some("openai/gpt-4o")).await.unwrap();

        assert_eq!(harness.auth.status_calls(), calls_before + 1);
        assert!(matches!(
            outcome,
            SendOutcome::Queued {
                gate: GateState::PendingRegistration,
                ..
            }
        ));
        assert_eq!(harness.completion.call_count(), 0);
        assert!(harness.store.get::<CachedAuthStatus>(AUTH_STATUS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_expired_window_successful_recheck_stays_authenticated() {
        let harness = TestHarness::new();
        let session = unlocked_with_zero_ttl(&harness).await;
        *harness.auth.status.lock() = Some(AuthStatus {
            authenticated: true,
            token: Some("server-token".to_string()),
            subscription: Some(SubscriptionLevel::Pro),
        });
        let calls_before = harness.auth.status_calls();

        let outcome = session.send_prompt("Hi", Some("openai/gpt-4o")).await.unwrap();

        assert_eq!(harness.auth.status_calls(), calls_before + 1);
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(session.access_view().state, GateState::Authenticated);
        assert_eq!(harness.completion.calls.lock()[0].token.as_deref(), Some("server-token"));

        let cached = harness.store.get::<CachedAuthStatus>(AUTH_STATUS_KEY).unwrap();
        assert_eq!(cached.state.token(), Some("server-token"));
        assert_eq!(cached.state.subscription_level(), &SubscriptionLevel::Pro);
    }

    #[tokio::test]
    async fn test_refused_replay_offers_alternative() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        session.send_prompt("Hi", Some("anthropic/claude-3-opus")).await.unwrap();
        session.register(registration()).await.unwrap();

        harness.completion.push(Err(forbidden(ForbiddenReason::SubscriptionRequired)));
        let result = session.submit_password(TEST_PASSWORD).await.unwrap();
        let replayed = result.replayed.unwrap();

        assert!(replayed.entry.is_none());
        assert!(replayed.error.is_some());
        let blocked = replayed.blocked.unwrap();
        assert_eq!(blocked.reason, ForbiddenReason::SubscriptionRequired);
        assert_eq!(blocked.model_id, "anthropic/claude-3-opus");
        assert_eq!(blocked.suggested_model.as_deref(), Some("google/gemini-2.0-flash-exp:free"));
        assert!(blocked.upgrade_contact.is_some());

        let access = session.access_view();
        assert_eq!(access.state, GateState::Authenticated);
        assert!(access.pending.is_none());
        assert_eq!(harness.completion.call_count(), 1);
    }

    #[tokio::test]
    async fn test_catalog_view_filtered_by_tier() {
        let harness = TestHarness::new();
        let session = harness.session();
        session.bootstrap().await;
        session.toggle_favorite("meta-llama/llama-3.3-70b-instruct:free").unwrap();

        let free = session.catalog_view(Some(PricingTier::Free)).models;
        assert_eq!(free.len(), 2);
        assert_eq!(free[0].id, "meta-llama/llama-3.3-70b-instruct:free");
        assert!(free.iter().all(|m| m.is_free()));

        let paid = session.catalog_view(Some(PricingTier::Paid)).models;
        assert_eq!(paid.len(), 2);
    }

    #[test]
    fn test_preview_placeholder_before_any_form() {
        let harness = TestHarness::new();
        let session = harness.session();
        assert_eq!(session.preview().market_analysis, crate::preview::EMPTY_SECTION);
    }
}
