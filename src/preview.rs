use serde::Serialize;

use crate::workflow::FormBundle;

// Text shown in each section before any form has been submitted
pub const EMPTY_SECTION: &str = "Complete the Market Intel form to populate this section.";

/// Preview pane content built up as the workflow forms are submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSections {
    pub market_analysis: String,
    pub industry_overview: String,
    pub competitive_landscape: String,
}

fn field<'a>(data: &'a FormBundle, name: &str) -> &'a str {
    data.get(name).unwrap_or_default()
}

impl OutputSections {
    pub fn from_market_intel(data: &FormBundle) -> Self {
        let product = field(data, "product");
        let city = field(data, "city");
        let state = field(data, "state");

        Self {
            market_analysis: format!(
                "Market analysis for {} in {}, {} over the next {}, tailored to Dr. {}'s practice.",
                product,
                city,
                state,
                field(data, "timeframe"),
                field(data, "doctorName"),
            ),
            industry_overview: format!(
                "Industry overview for devices similar to {} in the {} area, covering trends and growth projections.",
                product, city
            ),
            competitive_landscape: format!(
                "Competitive landscape for {} providers in {}, {}, identifying key competitors and their positioning.",
                product, city, state
            ),
        }
    }

    pub fn extend_with_strategies(&mut self, data: &FormBundle) {
        if let Some(challenges) = data.get("challenges") {
            self.market_analysis.push_str(&format!("\n\nKey challenges identified: {}", challenges));
        }
        if let Some(benefits) = data.get("benefits") {
            self.competitive_landscape
                .push_str(&format!("\n\nProduct benefits to highlight: {}", benefits));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.market_analysis.is_empty() && self.industry_overview.is_empty() && self.competitive_landscape.is_empty()
    }

    // Section text with the placeholder substituted for empty sections
    pub fn rendered(&self) -> OutputSections {
        let or_placeholder = |s: &str| if s.is_empty() { EMPTY_SECTION.to_string() } else { s.to_string() };
        OutputSections {
            market_analysis: or_placeholder(&self.market_analysis),
            industry_overview: or_placeholder(&self.industry_overview),
            competitive_landscape: or_placeholder(&self.competitive_landscape),
        }
    }
}
