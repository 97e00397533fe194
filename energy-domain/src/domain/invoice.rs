use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

/// Category of a charge on an energy bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeType {
    Usage,
    Demand,
    Supply,
    Network,
    Metering,
    Environmental,
    #[serde(alias = "gst")]
    Tax,
    Other,
}

impl ChargeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Demand => "demand",
            Self::Supply => "supply",
            Self::Network => "network",
            Self::Metering => "metering",
            Self::Environmental => "environmental",
            Self::Tax => "tax",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ChargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChargeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usage" => Ok(Self::Usage),
            "demand" => Ok(Self::Demand),
            "supply" => Ok(Self::Supply),
            "network" => Ok(Self::Network),
            "metering" => Ok(Self::Metering),
            "environmental" => Ok(Self::Environmental),
            "tax" | "gst" => Ok(Self::Tax),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown charge type '{other}'")),
        }
    }
}

/// One charge on a bill, either read off an invoice or calculated from
/// metering data and a tariff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub charge_type: ChargeType,
    pub amount: Decimal,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub period_start: Option<Date>,
    #[serde(default)]
    pub period_end: Option<Date>,
}

pub type InvoiceLineItem = LineItem;
pub type CalculatedLineItem = LineItem;

impl LineItem {
    pub fn new(description: impl Into<String>, charge_type: ChargeType, amount: Decimal) -> Self {
        Self {
            description: description.into(),
            charge_type,
            amount,
            quantity: None,
            unit: None,
            rate: None,
            period_start: None,
            period_end: None,
        }
    }

    pub fn with_quantity(mut self, quantity: f64, unit: impl Into<String>) -> Self {
        self.quantity = Some(quantity);
        self.unit = Some(unit.into());
        self
    }

    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_period(mut self, start: Date, end: Date) -> Self {
        self.period_start = Some(start);
        self.period_end = Some(end);
        self
    }
}
