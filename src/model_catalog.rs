use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::errors::ClientResult;
use crate::models::{ModelDescriptor, PricingTier};

// Experimental free model picked on first load when the catalog offers it
pub const PREFERRED_DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

lazy_static! {
    // Families known to be served without charge
    static ref FREE_FAMILIES: Vec<Regex> = [
        r"(?i)gemini-2\.0-flash-exp",
        r"(?i)gemma",
        r"(?i)llama-3(\.\d+)?-\d+b",
        r"(?i)mistral-7b",
        r"(?i)deepseek-(r1|chat)",
        r"(?i)qwen",
        r"(?i)phi-3",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect();

    // Families that always need a subscription
    static ref PREMIUM_FAMILIES: Vec<Regex> = [
        r"(?i)gpt-4",
        r"(?i)claude-(3|opus|sonnet)",
        r"(?i)(^|/)o[13](-|$)",
        r"(?i)gemini-(1\.5|2\.5)-pro",
        r"(?i)command-r-plus",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect();
}

/// Classify raw catalog metadata as free or paid.
///
/// Precedence: explicit marker, then pricing metadata, then the premium
/// allow-list, then the free allow-list. Anything left is paid.
pub fn classify(model: &Value) -> PricingTier {
    let id = model.get("id").and_then(Value::as_str).unwrap_or_default();
    let name = model.get("name").and_then(Value::as_str).unwrap_or_default();

    if let Some(tier) = explicit_marker(id, name) {
        return tier;
    }
    if let Some(tier) = pricing_metadata(model) {
        return tier;
    }
    if PREMIUM_FAMILIES.iter().any(|re| re.is_match(id)) {
        return PricingTier::Paid;
    }
    if FREE_FAMILIES.iter().any(|re| re.is_match(id)) {
        return PricingTier::Free;
    }
    PricingTier::Paid
}

fn explicit_marker(id: &str, name: &str) -> Option<PricingTier> {
    let name = name.to_lowercase();
    if name.contains("(free)") || id.to_lowercase().ends_with(":free") {
        Some(PricingTier::Free)
    } else if name.contains("(paid)") {
        Some(PricingTier::Paid)
    } else {
        None
    }
}

fn pricing_metadata(model: &Value) -> Option<PricingTier> {
    if let Some(tier) = model.get("pricing").and_then(tier_from_pricing) {
        return Some(tier);
    }
    match model.get("tier").and_then(Value::as_str) {
        Some(tier) => tier_from_label(tier),
        None => None,
    }
}

fn tier_from_pricing(pricing: &Value) -> Option<PricingTier> {
    match pricing {
        Value::String(label) => tier_from_label(label).or_else(|| tier_from_rates(&[rate(pricing)?])),
        Value::Number(_) => tier_from_rates(&[rate(pricing)?]),
        Value::Object(map) => {
            let rates: Vec<f64> = ["prompt", "completion", "request", "image"]
                .iter()
                .filter_map(|key| map.get(*key).and_then(rate))
                .collect();
            tier_from_rates(&rates)
        }
        _ => None,
    }
}

fn tier_from_label(label: &str) -> Option<PricingTier> {
    match label.trim().to_lowercase().as_str() {
        "free" => Some(PricingTier::Free),
        "paid" | "premium" => Some(PricingTier::Paid),
        _ => None,
    }
}

fn tier_from_rates(rates: &[f64]) -> Option<PricingTier> {
    if rates.is_empty() {
        None
    } else if rates.iter().all(|r| *r == 0.0) {
        Some(PricingTier::Free)
    } else {
        Some(PricingTier::Paid)
    }
}

fn rate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn context_length(model: &Value) -> Option<u64> {
    model
        .get("context_length")
        .or_else(|| model.get("contextLength"))
        .or_else(|| model.get("top_provider").and_then(|p| p.get("context_length")))
        .and_then(Value::as_u64)
}

/// Build a descriptor from one catalog item; items without an id are dropped.
pub fn describe(model: &Value, favorites: &BTreeSet<String>) -> Option<ModelDescriptor> {
    let id = model.get("id").and_then(Value::as_str)?.trim();
    if id.is_empty() {
        return None;
    }

    let display_name = model
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(id)
        .to_string();

    Some(ModelDescriptor {
        id: id.to_string(),
        display_name,
        provider: ModelDescriptor::provider_of(id),
        context_length: context_length(model),
        pricing_tier: classify(model),
        is_favorite: favorites.contains(id),
    })
}

/// Built-in list used whenever the remote catalog cannot be read.
pub fn fallback_listing() -> Vec<Value> {
    vec![
        json!({
            "id": "google/gemini-2.0-flash-exp:free",
            "name": "Google: Gemini 2.0 Flash Experimental (free)",
            "context_length": 1048576,
            "pricing": {"prompt": "0", "completion": "0"}
        }),
        json!({
            "id": "meta-llama/llama-3.3-70b-instruct:free",
            "name": "Meta: Llama 3.3 70B Instruct (free)",
            "context_length": 131072,
            "pricing": {"prompt": "0", "completion": "0"}
        }),
        json!({
            "id": "openai/gpt-4o",
            "name": "OpenAI: GPT-4o",
            "context_length": 128000,
            "pricing": {"prompt": "0.0000025", "completion": "0.00001"}
        }),
    ]
}

/// Preferred experimental model, else the first free one, else the first overall.
pub fn select_default(models: &[ModelDescriptor]) -> Option<&ModelDescriptor> {
    models
        .iter()
        .find(|m| m.id == PREFERRED_DEFAULT_MODEL)
        .or_else(|| models.iter().find(|m| m.is_free()))
        .or_else(|| models.first())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingOrigin {
    Remote,
    Fallback,
}

/// Catalog of selectable models plus the user's favorites.
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    favorites: BTreeSet<String>,
    origin: ListingOrigin,
    refreshed_at: Option<DateTime<Utc>>,
}

impl ModelCatalog {
    pub fn new(favorites: BTreeSet<String>) -> Self {
        Self {
            models: Vec::new(),
            favorites,
            origin: ListingOrigin::Fallback,
            refreshed_at: None,
        }
    }

    /// Replace the catalog with a fresh listing.
    ///
    /// Descriptors are rebuilt from scratch, never merged with the previous
    /// set. A failed fetch or a listing with no usable items falls back to
    /// the built-in models.
    pub fn load_listing(&mut self, listing: ClientResult<Vec<Value>>) -> ListingOrigin {
        let remote: Vec<ModelDescriptor> = match listing {
            Ok(items) => items.iter().filter_map(|item| describe(item, &self.favorites)).collect(),
            Err(e) => {
                warn!("Model catalog fetch failed, using built-in models: {}", e);
                Vec::new()
            }
        };

        let (mut models, origin) = if remote.is_empty() {
            let fallback = fallback_listing()
                .iter()
                .filter_map(|item| describe(item, &self.favorites))
                .collect();
            (fallback, ListingOrigin::Fallback)
        } else {
            (remote, ListingOrigin::Remote)
        };

        models.sort_by(|a, b| a.id.cmp(&b.id));
        info!("Model catalog loaded {} models ({:?})", models.len(), origin);

        self.models = models;
        self.origin = origin;
        self.refreshed_at = Some(Utc::now());
        origin
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    // Unknown ids are treated as paid
    pub fn tier_of(&self, id: &str) -> PricingTier {
        self.get(id).map(|m| m.pricing_tier).unwrap_or(PricingTier::Paid)
    }

    // Display order restricted to one tier
    pub fn filter_by_tier(&self, tier: PricingTier) -> Vec<ModelDescriptor> {
        self.display_order().into_iter().filter(|m| m.pricing_tier == tier).collect()
    }

    /// Favorites first, each group keeping catalog order.
    pub fn display_order(&self) -> Vec<ModelDescriptor> {
        let (mut ordered, rest): (Vec<_>, Vec<_>) =
            self.models.iter().cloned().partition(|m| m.is_favorite);
        ordered.extend(rest);
        ordered
    }

    /// Flip favorite membership and return the new state.
    ///
    /// The caller persists `favorites()` afterwards.
    pub fn toggle_favorite(&mut self, id: &str) -> bool {
        let now_favorite = if self.favorites.remove(id) {
            false
        } else {
            self.favorites.insert(id.to_string());
            true
        };

        if let Some(model) = self.models.iter_mut().find(|m| m.id == id) {
            model.is_favorite = now_favorite;
        }
        debug!("Model {} favorite = {}", id, now_favorite);
        now_favorite
    }

    pub fn favorites(&self) -> &BTreeSet<String> {
        &self.favorites
    }

    // First free model other than `exclude`, offered when a model is refused
    pub fn accessible_alternative(&self, exclude: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.is_free() && m.id != exclude)
    }

    pub fn origin(&self) -> ListingOrigin {
        self.origin
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}
