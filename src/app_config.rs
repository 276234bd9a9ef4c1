use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

pub const APP_CONFIG_FILE: &str = "repsight_config.json";

// Default prompt for the doctor-ready report. `{market.*}`, `{sales.*}` and
// `{report.*}` placeholders are filled from the matching workflow step.
pub const DEFAULT_REPORT_PROMPT_TEMPLATE: &str = "You are a medical sales enablement assistant. Write a concise, doctor-ready report for Dr. {market.doctorName} in {market.city}, {market.state} about {market.product}, covering the next {market.timeframe}.\n\nSales context:\n- Product: {sales.product}\n- Location: {sales.location}\n- Key challenges: {sales.challenges}\n- Benefits to highlight: {sales.benefits}\n- Definition of success: {sales.successDefinition}\n\nReport focus: {report.reportFocus}\nAdditional notes: {report.notes}\n\nStructure the report with an executive summary, market context, clinical and economic value, and recommended next steps.";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_AUTH_CACHE_TTL_SECS: i64 = 3600;
pub const DEFAULT_UPGRADE_CONTACT: &str = "mailto:sales@example.com";

/// User-editable settings persisted as JSON next to the local store.
/// Keys are camelCase like every other `/api` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub report_prompt_template: Option<String>,
    /// Read once at startup when the HTTP clients are built; a new value
    /// applies after a restart.
    pub request_timeout_secs: u64,
    pub auth_cache_ttl_secs: i64,
    pub history_limit: Option<usize>,
    pub upgrade_contact: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            report_prompt_template: Some(DEFAULT_REPORT_PROMPT_TEMPLATE.to_string()),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auth_cache_ttl_secs: DEFAULT_AUTH_CACHE_TTL_SECS,
            history_limit: None,
            upgrade_contact: DEFAULT_UPGRADE_CONTACT.to_string(),
        }
    }
}

impl AppSettings {
    pub fn report_prompt_template(&self) -> &str {
        self.report_prompt_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_REPORT_PROMPT_TEMPLATE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn auth_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auth_cache_ttl_secs.max(0))
    }
}

/// Remote services the client talks to. Every field is optional; a missing
/// endpoint degrades the matching feature instead of failing startup.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub api_url: Option<String>,
    pub auth_url: Option<String>,
    pub models_url: Option<String>,
    pub models_api_key: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
}

fn normalize(url: &Option<String>) -> Option<String> {
    url.as_deref()
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
}

impl Endpoints {
    // `<backend>/task`
    pub fn task_url(&self) -> Option<String> {
        normalize(&self.api_url).map(|base| format!("{}/task", base))
    }

    // Auth root defaults to the API base with a trailing `/api` removed
    pub fn auth_root(&self) -> Option<String> {
        normalize(&self.auth_url).or_else(|| {
            normalize(&self.api_url).map(|base| base.strip_suffix("/api").map(str::to_string).unwrap_or(base))
        })
    }

    pub fn auth_endpoint(&self, path: &str) -> Option<String> {
        self.auth_root().map(|root| format!("{}/auth/{}", root, path.trim_start_matches('/')))
    }

    pub fn models_url(&self) -> Option<String> {
        normalize(&self.models_url)
            .or_else(|| normalize(&self.api_url))
            .map(|base| format!("{}/models", base))
    }

    pub fn supabase_rest_url(&self, table: &str) -> Option<String> {
        normalize(&self.supabase_url).map(|base| format!("{}/rest/v1/{}", base, table))
    }
}

pub struct AppConfigManager {
    config_file: String,
}

impl AppConfigManager {
    pub fn new(config_file: &str) -> Self {
        Self {
            config_file: config_file.to_string(),
        }
    }

    pub fn load_config(&self) -> io::Result<AppSettings> {
        let config_path = Path::new(&self.config_file);

        // If the file doesn't exist, return the defaults
        if !config_path.exists() {
            return Ok(AppSettings::default());
        }

        let config_str = fs::read_to_string(config_path)?;
        let settings: AppSettings = serde_json::from_str(&config_str)?;
        Ok(settings)
    }

    pub fn save_config(&self, settings: &AppSettings) -> io::Result<()> {
        let config_str = serde_json::to_string_pretty(settings)?;

        if let Some(parent) = Path::new(&self.config_file).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.config_file, config_str)?;
        Ok(())
    }
}
