use serde::{Deserialize, Serialize};
use time::Date;

/// Bucket for interval energy that falls in no configured time-of-use period.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("billing window ends ({end}) before it starts ({start})")]
pub struct InvalidWindow {
    pub start: Date,
    pub end: Date,
}

/// Inclusive date range a bill covers. `end` is never before `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct BillingWindow {
    start: Date,
    end: Date,
}

#[derive(Deserialize)]
struct RawWindow {
    start: Date,
    end: Date,
}

impl TryFrom<RawWindow> for BillingWindow {
    type Error = InvalidWindow;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl BillingWindow {
    pub fn new(start: Date, end: Date) -> Result<Self, InvalidWindow> {
        if end < start {
            return Err(InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Date {
        self.start
    }

    pub fn end(&self) -> Date {
        self.end
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> u32 {
        let span = (self.end - self.start).whole_days();
        u32::try_from(span).map_or(0, |d| d.saturating_add(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodConsumption {
    pub name: String,
    pub kwh: f64,
    pub interval_count: usize,
}

/// Energy for one connection over a billing window, bucketed by
/// time-of-use period in configuration order. The uncategorized bucket is
/// always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionSummary {
    pub connection_id: String,
    pub period_start: Date,
    pub period_end: Date,
    pub periods: Vec<PeriodConsumption>,
    pub total_kwh: f64,
    /// Highest average demand over a single interval, in kW.
    pub peak_demand_kw: Option<f64>,
    pub known_intervals: usize,
    pub unknown_intervals: usize,
}

impl ConsumptionSummary {
    pub fn period_kwh(&self, name: &str) -> Option<f64> {
        self.periods.iter().find(|p| p.name == name).map(|p| p.kwh)
    }

    pub fn window(&self) -> Result<BillingWindow, InvalidWindow> {
        BillingWindow::new(self.period_start, self.period_end)
    }
}
