use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::info;

use crate::errors::{ClientError, ClientResult};

lazy_static! {
    static ref PLACEHOLDER: Option<Regex> = Regex::new(r"\{(market|sales|report)\.([A-Za-z]+)\}").ok();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStep {
    MarketIntel,
    SalesStrategies,
    DoctorReport,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 3] = [
        WorkflowStep::MarketIntel,
        WorkflowStep::SalesStrategies,
        WorkflowStep::DoctorReport,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    // The last step has no successor; it stays put
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1).unwrap_or(self)
    }

    pub fn title(self) -> &'static str {
        match self {
            WorkflowStep::MarketIntel => "Market Intelligence",
            WorkflowStep::SalesStrategies => "Sales Strategies",
            WorkflowStep::DoctorReport => "Doctor-Ready Report",
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            WorkflowStep::MarketIntel => &["doctorName", "city", "state", "product", "timeframe"],
            WorkflowStep::SalesStrategies => &["product", "location", "challenges", "benefits", "successDefinition"],
            WorkflowStep::DoctorReport => &[],
        }
    }
}

impl FromStr for WorkflowStep {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.parse::<usize>() {
            return Self::from_index(index).ok_or_else(|| ClientError::NotFound(format!("workflow step {}", s)));
        }
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "marketintel" => Ok(WorkflowStep::MarketIntel),
            "salesstrategies" => Ok(WorkflowStep::SalesStrategies),
            "doctorreport" => Ok(WorkflowStep::DoctorReport),
            _ => Err(ClientError::NotFound(format!("workflow step {}", s))),
        }
    }
}

/// Field values submitted by one workflow form, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormBundle(BTreeMap<String, String>);

impl FormBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn trimmed(self) -> Self {
        Self(self.0.into_iter().map(|(k, v)| (k, v.trim().to_string())).collect())
    }

    fn has_value(&self, field: &str) -> bool {
        self.get(field).is_some_and(|v| !v.is_empty())
    }

    pub fn missing_fields(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|field| !self.has_value(field))
            .map(|field| field.to_string())
            .collect()
    }
}

/// Everything the report generation call needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub market_intel: FormBundle,
    pub sales_strategies: FormBundle,
    pub doctor_report: Option<FormBundle>,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step: WorkflowStep,
    pub index: usize,
    pub title: &'static str,
    pub completed: bool,
    pub can_enter: bool,
    pub data: Option<FormBundle>,
}

// Shown on the Doctor Report step so the user can check what the report will use
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub doctor_name: String,
    pub product: String,
    pub location: String,
    pub success_definition: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub current_step: WorkflowStep,
    pub steps: Vec<StepView>,
    pub can_generate_report: bool,
    pub report_summary: Option<ReportSummary>,
}

/// Three-step form wizard: Market Intel, Sales Strategies, Doctor Report.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStepper {
    slots: [Option<FormBundle>; 3],
    current: usize,
}

impl WorkflowStepper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_step(&self) -> WorkflowStep {
        WorkflowStep::from_index(self.current).unwrap_or(WorkflowStep::MarketIntel)
    }

    pub fn slot(&self, step: WorkflowStep) -> Option<&FormBundle> {
        self.slots[step.index()].as_ref()
    }

    pub fn can_enter(&self, step: WorkflowStep) -> bool {
        match step.previous() {
            None => true,
            Some(previous) => self.slot(previous).is_some(),
        }
    }

    // Manual navigation; going back never clears later slots
    pub fn enter(&mut self, step: WorkflowStep) -> ClientResult<()> {
        if !self.can_enter(step) {
            return Err(ClientError::PrerequisiteMissing { step: step.index() });
        }
        self.current = step.index();
        Ok(())
    }

    /// Validate and store the form for `step`, then move to the next step.
    ///
    /// Only the form at the current step may be submitted; a stale submit of
    /// another step is rejected and the pointer stays where it is.
    pub fn submit_step(&mut self, step: WorkflowStep, data: FormBundle) -> ClientResult<WorkflowStep> {
        if !self.can_enter(step) {
            return Err(ClientError::PrerequisiteMissing { step: step.index() });
        }
        if step != self.current_step() {
            return Err(ClientError::InvalidState(format!(
                "{} is not the current step ({})",
                step.title(),
                self.current_step().title()
            )));
        }

        let mut data = data.trimmed();
        if step == WorkflowStep::SalesStrategies {
            self.fill_from_market_intel(&mut data);
        }

        let missing = data.missing_fields(step.required_fields());
        if !missing.is_empty() {
            return Err(ClientError::Validation { missing });
        }

        self.slots[step.index()] = Some(data);
        self.current = step.next().index();
        info!("Workflow step {} submitted, now at {}", step.title(), self.current_step().title());
        Ok(self.current_step())
    }

    // Sales strategies default product and location from the market intel form
    fn fill_from_market_intel(&self, data: &mut FormBundle) {
        let Some(market) = self.slot(WorkflowStep::MarketIntel) else {
            return;
        };

        if !data.has_value("product") {
            if let Some(product) = market.get("product") {
                data.insert("product", product);
            }
        }
        if !data.has_value("location") {
            if let (Some(city), Some(state)) = (market.get("city"), market.get("state")) {
                data.insert("location", format!("{}, {}", city, state));
            }
        }
    }

    pub fn can_generate_report(&self) -> bool {
        self.slot(WorkflowStep::MarketIntel).is_some() && self.slot(WorkflowStep::SalesStrategies).is_some()
    }

    /// Combine the stored forms into a report request. No text is generated here.
    pub fn generate_report(&self, template: &str) -> ClientResult<ReportPayload> {
        let (Some(market), Some(sales)) = (self.slot(WorkflowStep::MarketIntel), self.slot(WorkflowStep::SalesStrategies))
        else {
            return Err(ClientError::PrerequisiteMissing {
                step: WorkflowStep::DoctorReport.index(),
            });
        };
        let report = self.slot(WorkflowStep::DoctorReport);

        // Single pass, so placeholder-like text inside a value is never expanded
        let Some(placeholder) = PLACEHOLDER.as_ref() else {
            return Err(ClientError::InvalidState("report template pattern unavailable".to_string()));
        };
        let prompt = placeholder
            .replace_all(template, |caps: &Captures| {
                let bundle = match &caps[1] {
                    "market" => Some(market),
                    "sales" => Some(sales),
                    _ => report,
                };
                // Unfilled optional fields render as blanks
                bundle.and_then(|b| b.get(&caps[2])).unwrap_or_default().to_string()
            })
            .into_owned();

        Ok(ReportPayload {
            market_intel: market.clone(),
            sales_strategies: sales.clone(),
            doctor_report: report.cloned(),
            prompt,
        })
    }

    pub fn report_summary(&self) -> Option<ReportSummary> {
        let market = self.slot(WorkflowStep::MarketIntel)?;
        let sales = self.slot(WorkflowStep::SalesStrategies)?;
        let text = |bundle: &FormBundle, field: &str| bundle.get(field).unwrap_or_default().to_string();

        Some(ReportSummary {
            doctor_name: text(market, "doctorName"),
            product: text(sales, "product"),
            location: text(sales, "location"),
            success_definition: text(sales, "successDefinition"),
        })
    }

    pub fn view(&self) -> WorkflowView {
        let steps = WorkflowStep::ALL
            .iter()
            .map(|&step| StepView {
                step,
                index: step.index(),
                title: step.title(),
                completed: self.slot(step).is_some(),
                can_enter: self.can_enter(step),
                data: self.slot(step).cloned(),
            })
            .collect();

        WorkflowView {
            current_step: self.current_step(),
            steps,
            can_generate_report: self.can_generate_report(),
            report_summary: self.report_summary(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
