// In-memory stand-ins for the network seams, shared by the session and handler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use crate::app_config::AppSettings;
use crate::backend_client::{AuthService, AuthStatus, CatalogSource, CompletionBackend, RegistrationOutcome, TaskRequest};
use crate::errors::{ClientError, ClientResult};
use crate::local_store::LocalStore;
use crate::models::{RegistrationForm, SubscriptionLevel};
use crate::session::Session;

pub const TEST_PASSWORD: &str = "open-sesame";
pub const TEST_TOKEN: &str = "tok-123";

#[derive(Default)]
pub struct FakeCompletion {
    pub calls: Mutex<Vec<TaskRequest>>,
    // Scripted results, consumed in order; an empty script echoes the prompt
    pub script: Mutex<VecDeque<ClientResult<String>>>,
}

impl FakeCompletion {
    pub fn push(&self, result: ClientResult<String>) {
        self.script.lock().push_back(result);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CompletionBackend for FakeCompletion {
    async fn complete(&self, request: &TaskRequest) -> ClientResult<String> {
        self.calls.lock().push(request.clone());
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("echo: {}", request.prompt)))
    }
}

#[derive(Default)]
pub struct FakeAuth {
    // `None` makes the status call fail
    pub status: Mutex<Option<AuthStatus>>,
    pub level: Mutex<SubscriptionLevel>,
    pub status_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn status(&self) -> ClientResult<AuthStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status
            .lock()
            .clone()
            .ok_or(ClientError::NotConfigured("auth service URL"))
    }

    async fn subscription(&self) -> ClientResult<SubscriptionLevel> {
        Ok(self.level.lock().clone())
    }

    async fn register(&self, _form: &RegistrationForm) -> ClientResult<RegistrationOutcome> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RegistrationOutcome {
            message: Some("Registered".to_string()),
        })
    }

    async fn submit_password(&self, password: &str) -> ClientResult<String> {
        if password == TEST_PASSWORD {
            Ok(TEST_TOKEN.to_string())
        } else {
            Err(ClientError::Http {
                status: 401,
                message: "Invalid password".to_string(),
            })
        }
    }
}

// `None` makes the listing call fail
pub struct FakeCatalog {
    pub listing: Option<Vec<Value>>,
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_models(&self) -> ClientResult<Vec<Value>> {
        self.listing.clone().ok_or(ClientError::NotConfigured("model catalog URL"))
    }
}

pub fn sample_listing() -> Vec<Value> {
    vec![
        json!({"id": "google/gemini-2.0-flash-exp:free", "name": "Gemini Flash (free)"}),
        json!({"id": "meta-llama/llama-3.3-70b-instruct:free", "name": "Llama 3.3 70B (free)"}),
        json!({"id": "openai/gpt-4o", "name": "GPT-4o", "pricing": {"prompt": "0.0000025", "completion": "0.00001"}}),
        json!({"id": "anthropic/claude-3-opus", "name": "Claude 3 Opus", "pricing": {"prompt": "0.000015", "completion": "0.000075"}}),
    ]
}

pub struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<LocalStore>,
    pub completion: Arc<FakeCompletion>,
    pub auth: Arc<FakeAuth>,
    pub catalog: Arc<FakeCatalog>,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::in_dir(dir.path()));
        Self {
            dir,
            store,
            completion: Arc::new(FakeCompletion::default()),
            auth: Arc::new(FakeAuth::default()),
            catalog: Arc::new(FakeCatalog {
                listing: Some(sample_listing()),
            }),
        }
    }

    pub fn session(&self) -> Session {
        self.session_with(AppSettings::default())
    }

    pub fn session_with(&self, settings: AppSettings) -> Session {
        Session::new(
            settings,
            self.store.clone(),
            self.completion.clone(),
            self.auth.clone(),
            self.catalog.clone(),
        )
    }

    // A session over the same store, as after a reload
    pub fn reopen(&self) -> Session {
        let store = Arc::new(LocalStore::in_dir(self.dir.path()));
        Session::new(
            AppSettings::default(),
            store,
            self.completion.clone(),
            self.auth.clone(),
            self.catalog.clone(),
        )
    }
}
