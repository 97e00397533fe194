use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::invoice::{ChargeType, LineItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    Match,
    Minor,
    Significant,
    /// Calculated, but not on the invoice.
    MissingInvoiced,
    /// On the invoice, but not calculated.
    MissingCalculated,
}

impl DiscrepancyStatus {
    /// Ordering used to pick the overall status; higher is worse.
    pub fn severity(self) -> u8 {
        match self {
            Self::Match => 0,
            Self::Minor => 1,
            Self::Significant => 2,
            Self::MissingInvoiced => 3,
            Self::MissingCalculated => 4,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Self::MissingInvoiced | Self::MissingCalculated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Minor => "minor",
            Self::Significant => "significant",
            Self::MissingInvoiced => "missing_invoiced",
            Self::MissingCalculated => "missing_calculated",
        }
    }
}

impl fmt::Display for DiscrepancyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_match_percent() -> Decimal {
    Decimal::new(5, 1)
}

fn default_minor_percent() -> Decimal {
    Decimal::new(5, 0)
}

/// Percentage bounds for classifying a matched pair: `|pct| <= match_percent`
/// is a match, `|pct| <= minor_percent` is minor, anything above is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_match_percent")]
    pub match_percent: Decimal,
    #[serde(default = "default_minor_percent")]
    pub minor_percent: Decimal,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            match_percent: default_match_percent(),
            minor_percent: default_minor_percent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemReconciliation {
    pub description: String,
    pub charge_type: ChargeType,
    pub invoiced: Option<LineItem>,
    pub calculated: Option<LineItem>,
    /// Zero when there is no invoiced item.
    pub invoiced_amount: Decimal,
    /// Zero when there is no calculated item.
    pub calculated_amount: Decimal,
    pub amount_difference: Decimal,
    /// Absent whenever the calculated amount is zero.
    pub percentage_difference: Option<Decimal>,
    pub status: DiscrepancyStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub line_items: Vec<LineItemReconciliation>,
    pub invoiced_total: Decimal,
    pub calculated_total: Decimal,
    pub total_difference: Decimal,
    pub total_percentage_difference: Option<Decimal>,
    pub matched_items: usize,
    pub minor_discrepancies: usize,
    pub significant_discrepancies: usize,
    pub missing_items: usize,
    pub overall_status: DiscrepancyStatus,
    pub confidence_score: f64,
    pub recommendations: Vec<String>,
}
