use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Weekday;

use super::interval::MINUTES_PER_DAY;

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Monday,
    Weekday::Tuesday,
    Weekday::Wednesday,
    Weekday::Thursday,
    Weekday::Friday,
    Weekday::Saturday,
    Weekday::Sunday,
];

/// A named time-of-day/weekday window used to rate consumption.
///
/// `start` and `end` are minutes past midnight, written `HH:MM` in config
/// (`24:00` is accepted as an end). A window whose end is before its start
/// wraps past midnight; equal start and end cover the whole day. An interval
/// belongs to the window when its start minute does, on its own weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfUsePeriod {
    pub name: String,
    #[serde(with = "clock")]
    pub start: u32,
    #[serde(with = "clock")]
    pub end: u32,
    #[serde(default = "all_weekdays", with = "weekday_names")]
    pub weekdays: Vec<Weekday>,
}

impl TimeOfUsePeriod {
    pub fn new(name: impl Into<String>, start: u32, end: u32, weekdays: &[Weekday]) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            weekdays: weekdays.to_vec(),
        }
    }

    pub fn contains(&self, weekday: Weekday, minute_of_day: u32) -> bool {
        if !self.weekdays.contains(&weekday) {
            return false;
        }
        if self.start < self.end {
            self.start <= minute_of_day && minute_of_day < self.end
        } else if self.start > self.end {
            minute_of_day >= self.start || minute_of_day < self.end
        } else {
            true
        }
    }
}

pub fn all_weekdays() -> Vec<Weekday> {
    ALL_WEEKDAYS.to_vec()
}

/// Parse `HH:MM` into minutes past midnight; `24:00` is the latest value.
pub fn parse_clock(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if m >= 60 {
        return None;
    }
    let total = h * 60 + m;
    (total <= MINUTES_PER_DAY).then_some(total)
}

mod clock {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(minutes: &u32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{:02}:{:02}", minutes / 60, minutes % 60))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_clock(&s).ok_or_else(|| D::Error::custom(format!("invalid time of day '{s}'")))
    }
}

mod weekday_names {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use time::Weekday;

    fn short(day: Weekday) -> &'static str {
        match day {
            Weekday::Monday => "mon",
            Weekday::Tuesday => "tue",
            Weekday::Wednesday => "wed",
            Weekday::Thursday => "thu",
            Weekday::Friday => "fri",
            Weekday::Saturday => "sat",
            Weekday::Sunday => "sun",
        }
    }

    fn parse(name: &str) -> Option<Weekday> {
        let lower = name.trim().to_ascii_lowercase();
        let prefix = lower.get(..3)?;
        super::ALL_WEEKDAYS.into_iter().find(|d| short(*d) == prefix)
    }

    pub fn serialize<S: Serializer>(days: &[Weekday], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(days.iter().map(|d| short(*d)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Weekday>, D::Error> {
        let names = Vec::<String>::deserialize(d)?;
        names
            .iter()
            .map(|n| parse(n).ok_or_else(|| D::Error::custom(format!("invalid weekday '{n}'"))))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRate {
    pub period: String,
    pub rate_per_kwh: Decimal,
}

/// How energy is priced: one rate for everything, or a rate per
/// time-of-use period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageRates {
    Flat { rate_per_kwh: Decimal },
    TimeOfUse { rates: Vec<PeriodRate> },
}

fn default_tax_rate() -> Decimal {
    Decimal::new(10, 2)
}

fn default_tax_label() -> String {
    "GST".to_string()
}

/// Rate structure converting consumption and demand into charges.
/// All rates are in dollars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub daily_supply_charge: Decimal,
    pub usage: UsageRates,
    #[serde(default)]
    pub demand_rate_per_kw: Option<Decimal>,
    /// Overrides the number of days derived from the billing window.
    #[serde(default)]
    pub billing_days: Option<u32>,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,
    #[serde(default = "default_tax_label")]
    pub tax_label: String,
}

impl Tariff {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Rate for a time-of-use period, matched case-insensitively.
    /// Flat tariffs have no per-period rates.
    pub fn period_rate(&self, period: &str) -> Option<Decimal> {
        match &self.usage {
            UsageRates::Flat { .. } => None,
            UsageRates::TimeOfUse { rates } => rates
                .iter()
                .find(|r| r.period.eq_ignore_ascii_case(period))
                .map(|r| r.rate_per_kwh),
        }
    }
}
