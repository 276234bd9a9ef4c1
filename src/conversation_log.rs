use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::errors::ClientResult;
use crate::local_store::LocalStore;
use crate::models::{AccessState, ConversationEntry};

pub const FAVORITES_KEY: &str = "repsight.favorites.v1";
pub const AUTH_STATUS_KEY: &str = "repsight.auth_status.v1";

/// Auth status as written to durable storage.
///
/// Freshness is judged by the reader against `cached_at + ttl_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAuthStatus {
    pub state: AccessState,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl CachedAuthStatus {
    pub fn fresh_until(&self) -> DateTime<Utc> {
        self.cached_at + Duration::seconds(self.ttl_secs)
    }
}

/// Newest-first history of prompt/response pairs, plus the persistence
/// helpers for favorites and cached auth status.
pub struct ConversationLog {
    entries: VecDeque<ConversationEntry>,
    limit: Option<usize>,
    store: Arc<LocalStore>,
}

impl ConversationLog {
    pub fn new(store: Arc<LocalStore>, limit: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
            store,
        }
    }

    // Prepend; with a limit set the oldest entries fall off the back
    pub fn record(&mut self, entry: ConversationEntry) {
        debug!("Recording conversation entry for model {}", entry.model_id);
        self.entries.push_front(entry);
        if let Some(limit) = self.limit {
            self.entries.truncate(limit);
        }
    }

    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
        if let Some(limit) = limit {
            self.entries.truncate(limit);
        }
    }

    pub fn persist_favorites(&self, favorites: &BTreeSet<String>) -> ClientResult<()> {
        let ids: Vec<&String> = favorites.iter().collect();
        self.store.set(FAVORITES_KEY, &ids)
    }

    pub fn load_favorites(&self) -> BTreeSet<String> {
        self.store
            .get::<Vec<String>>(FAVORITES_KEY)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn cache_auth_status(&self, state: &AccessState, ttl: Duration) -> ClientResult<()> {
        let cached = CachedAuthStatus {
            state: state.clone(),
            cached_at: Utc::now(),
            ttl_secs: ttl.num_seconds(),
        };
        self.store.set(AUTH_STATUS_KEY, &cached)
    }

    pub fn load_cached_auth_status(&self) -> Option<CachedAuthStatus> {
        self.store.get(AUTH_STATUS_KEY)
    }

    pub fn clear_auth_status(&self) -> ClientResult<()> {
        self.store.remove(AUTH_STATUS_KEY)
    }
}
