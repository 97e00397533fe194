use energy_domain::domain::{
    CalculatedLineItem, ChargeType, ConsumptionSummary, LineItem, Tariff, UsageRates,
};
use rust_decimal::{prelude::FromPrimitive, Decimal, RoundingStrategy};
use serde::Serialize;
use time::Date;

/// A charge component that could not be priced. Only the affected line is
/// flagged; the remaining lines are still calculated.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
pub enum CalculationError {
    #[error("tariff {tariff} has no rate for time-of-use period '{period}' ({kwh:.3} kWh)")]
    MissingPeriodRate { tariff: String, period: String, kwh: f64 },
    #[error("tariff {tariff} has a demand rate but no demand was recorded")]
    MissingDemand { tariff: String },
    #[error("{description}: quantity {quantity} cannot be priced")]
    InvalidQuantity { description: String, quantity: f64 },
    #[error("consumption period ends ({end}) before it starts ({start})")]
    InvalidPeriod { start: Date, end: Date },
}

pub type ChargeLine = Result<CalculatedLineItem, CalculationError>;

/// Round half away from zero to whole cents.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn price(description: &str, quantity: f64, rate: Decimal) -> Result<Decimal, CalculationError> {
    Decimal::from_f64(quantity)
        .and_then(|q| q.checked_mul(rate))
        .map(round_cents)
        .ok_or_else(|| CalculationError::InvalidQuantity {
            description: description.to_string(),
            quantity,
        })
}

/// `off_peak` -> `Off Peak Energy Usage`.
fn usage_description(period: &str) -> String {
    let words: Vec<String> = period
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("{} Energy Usage", words.join(" "))
}

/// Price a consumption summary with a tariff.
///
/// Lines come out in a fixed order: supply, usage (one flat line or one per
/// time-of-use period with non-zero consumption, net export included),
/// demand when the tariff has a demand rate, then tax on the subtotal of the
/// lines that could be priced.
pub fn calculate_charges(summary: &ConsumptionSummary, tariff: &Tariff) -> Vec<ChargeLine> {
    let start = summary.period_start;
    let end = summary.period_end;
    let days = match tariff.billing_days {
        Some(days) => Ok(days),
        None => summary
            .window()
            .map(|w| w.days())
            .map_err(|e| CalculationError::InvalidPeriod { start: e.start, end: e.end }),
    };
    let mut lines: Vec<ChargeLine> = Vec::new();

    lines.push(days.map(|days| {
        let supply_amount = round_cents(tariff.daily_supply_charge * Decimal::from(days));
        LineItem::new("Daily Supply Charge", ChargeType::Supply, supply_amount)
            .with_quantity(days as f64, "day")
            .with_rate(tariff.daily_supply_charge)
            .with_period(start, end)
    }));

    let usage_line = |description: String, kwh: f64, rate: Decimal| -> ChargeLine {
        let amount = price(&description, kwh, rate)?;
        Ok(LineItem::new(description, ChargeType::Usage, amount)
            .with_quantity(kwh, "kWh")
            .with_rate(rate)
            .with_period(start, end))
    };

    match &tariff.usage {
        UsageRates::Flat { rate_per_kwh } => {
            lines.push(usage_line("Energy Usage".to_string(), summary.total_kwh, *rate_per_kwh));
        }
        UsageRates::TimeOfUse { .. } => {
            for period in summary.periods.iter().filter(|p| p.kwh != 0.0) {
                let line = match tariff.period_rate(&period.name) {
                    Some(rate) => usage_line(usage_description(&period.name), period.kwh, rate),
                    None => Err(CalculationError::MissingPeriodRate {
                        tariff: tariff.code.clone(),
                        period: period.name.clone(),
                        kwh: period.kwh,
                    }),
                };
                lines.push(line);
            }
        }
    }

    if let Some(rate) = tariff.demand_rate_per_kw {
        let line = match summary.peak_demand_kw {
            Some(kw) => price("Demand Charge", kw, rate).map(|amount| {
                LineItem::new("Demand Charge", ChargeType::Demand, amount)
                    .with_quantity(kw, "kW")
                    .with_rate(rate)
                    .with_period(start, end)
            }),
            None => Err(CalculationError::MissingDemand {
                tariff: tariff.code.clone(),
            }),
        };
        lines.push(line);
    }

    if !tariff.tax_rate.is_zero() {
        let subtotal: Decimal = lines.iter().filter_map(|l| l.as_ref().ok()).map(|i| i.amount).sum();
        lines.push(Ok(LineItem::new(
            tariff.tax_label.clone(),
            ChargeType::Tax,
            round_cents(subtotal * tariff.tax_rate),
        )
        .with_rate(tariff.tax_rate)
        .with_period(start, end)));
    }

    lines
}

/// Split calculator output into priced items and failures, keeping order.
pub fn partition_charges(lines: Vec<ChargeLine>) -> (Vec<CalculatedLineItem>, Vec<CalculationError>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    for line in lines {
        match line {
            Ok(item) => items.push(item),
            Err(e) => errors.push(e),
        }
    }
    (items, errors)
}
