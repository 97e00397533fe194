//! Invoice reconciliation.
//!
//! Invoiced line items are paired with calculated ones by normalized
//! description and charge type, each pair is classified against percentage
//! thresholds, and the results are rolled up into a summary with a
//! confidence score and plain-language recommendations.

mod recommend;

use std::collections::{HashMap, VecDeque};

use energy_domain::domain::{
    CalculatedLineItem, ChargeType, DiscrepancyStatus, InvoiceLineItem, LineItem, LineItemReconciliation,
    ReconciliationSummary, Thresholds,
};
use rust_decimal::Decimal;

pub use recommend::{discrepancy_note, recommendations};

/// Decimal places stored percentages are rounded to.
const PERCENT_DP: u32 = 4;

/// Weight of a minor discrepancy in the confidence score.
const MINOR_WEIGHT: f64 = 0.3;

/// Trimmed, inner whitespace collapsed, lowercased.
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

type MatchKey = (String, ChargeType);

fn key_of(item: &LineItem) -> MatchKey {
    (normalize_description(&item.description), item.charge_type)
}

fn exact_percentage(difference: Decimal, base: Decimal) -> Option<Decimal> {
    if base.is_zero() {
        return None;
    }
    difference
        .checked_div(base)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
}

/// `difference / base × 100` to four decimal places, absent when `base` is zero.
pub fn percentage(difference: Decimal, base: Decimal) -> Option<Decimal> {
    exact_percentage(difference, base).map(|p| p.round_dp(PERCENT_DP))
}

/// Classify a matched pair. Thresholds are compared against the unrounded
/// percentage, so a band edge is never crossed by rounding.
pub fn classify(invoiced: Decimal, calculated: Decimal, thresholds: &Thresholds) -> DiscrepancyStatus {
    if calculated.is_zero() {
        return if invoiced.is_zero() {
            DiscrepancyStatus::Match
        } else {
            DiscrepancyStatus::Significant
        };
    }
    match exact_percentage(invoiced - calculated, calculated) {
        Some(pct) if pct.abs() <= thresholds.match_percent => DiscrepancyStatus::Match,
        Some(pct) if pct.abs() <= thresholds.minor_percent => DiscrepancyStatus::Minor,
        _ => DiscrepancyStatus::Significant,
    }
}

fn line(
    invoiced: Option<&InvoiceLineItem>,
    calculated: Option<&CalculatedLineItem>,
    thresholds: &Thresholds,
) -> LineItemReconciliation {
    let (description, charge_type) = match (invoiced, calculated) {
        (Some(i), _) | (None, Some(i)) => (i.description.clone(), i.charge_type),
        (None, None) => (String::new(), ChargeType::Other),
    };
    let invoiced_amount = invoiced.map_or(Decimal::ZERO, |i| i.amount);
    let calculated_amount = calculated.map_or(Decimal::ZERO, |c| c.amount);
    let amount_difference = invoiced_amount - calculated_amount;

    let status = match (invoiced, calculated) {
        (Some(_), Some(_)) => classify(invoiced_amount, calculated_amount, thresholds),
        (Some(_), None) => DiscrepancyStatus::MissingCalculated,
        _ => DiscrepancyStatus::MissingInvoiced,
    };

    let mut reconciled = LineItemReconciliation {
        description,
        charge_type,
        invoiced: invoiced.cloned(),
        calculated: calculated.cloned(),
        invoiced_amount,
        calculated_amount,
        amount_difference,
        percentage_difference: percentage(amount_difference, calculated_amount),
        status,
        note: None,
    };
    reconciled.note = discrepancy_note(&reconciled);
    reconciled
}

/// Compare invoiced charges with calculated charges.
///
/// Output keeps invoiced items in their original order, followed by any
/// calculated items nothing on the invoice matched. Items sharing a key are
/// paired in the order they appear.
pub fn reconcile(
    invoiced: &[InvoiceLineItem],
    calculated: &[CalculatedLineItem],
    thresholds: &Thresholds,
) -> ReconciliationSummary {
    let mut unused: HashMap<MatchKey, VecDeque<usize>> = HashMap::new();
    for (idx, item) in calculated.iter().enumerate() {
        unused.entry(key_of(item)).or_default().push_back(idx);
    }

    let mut paired = vec![false; calculated.len()];
    let mut line_items = Vec::with_capacity(invoiced.len().max(calculated.len()));

    for item in invoiced {
        let partner = unused.get_mut(&key_of(item)).and_then(VecDeque::pop_front);
        if let Some(idx) = partner {
            paired[idx] = true;
        }
        line_items.push(line(Some(item), partner.map(|idx| &calculated[idx]), thresholds));
    }
    for (idx, item) in calculated.iter().enumerate() {
        if !paired[idx] {
            line_items.push(line(None, Some(item), thresholds));
        }
    }

    summarize(line_items)
}

fn summarize(line_items: Vec<LineItemReconciliation>) -> ReconciliationSummary {
    let invoiced_total: Decimal = line_items.iter().map(|l| l.invoiced_amount).sum();
    let calculated_total: Decimal = line_items.iter().map(|l| l.calculated_amount).sum();
    let total_difference = invoiced_total - calculated_total;

    let count = |status: DiscrepancyStatus| line_items.iter().filter(|l| l.status == status).count();
    let matched_items = count(DiscrepancyStatus::Match);
    let minor_discrepancies = count(DiscrepancyStatus::Minor);
    let significant_discrepancies = count(DiscrepancyStatus::Significant);
    let missing_items = line_items.iter().filter(|l| l.status.is_missing()).count();

    let overall_status = line_items
        .iter()
        .map(|l| l.status)
        .max_by_key(|s| s.severity())
        .unwrap_or(DiscrepancyStatus::Match);

    let confidence_score = if line_items.is_empty() {
        0.0
    } else {
        let penalty =
            significant_discrepancies as f64 + missing_items as f64 + MINOR_WEIGHT * minor_discrepancies as f64;
        (1.0 - penalty / line_items.len() as f64).max(0.0)
    };

    let mut summary = ReconciliationSummary {
        line_items,
        invoiced_total,
        calculated_total,
        total_difference,
        total_percentage_difference: percentage(total_difference, calculated_total),
        matched_items,
        minor_discrepancies,
        significant_discrepancies,
        missing_items,
        overall_status,
        confidence_score,
        recommendations: Vec::new(),
    };
    summary.recommendations = recommendations(&summary);

    tracing::debug!(
        items = summary.line_items.len(),
        overall = %summary.overall_status,
        confidence = summary.confidence_score,
        "reconciliation complete"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn item(description: &str, charge_type: ChargeType, amount: &str) -> LineItem {
        LineItem::new(description, charge_type, dec(amount))
    }

    #[test]
    fn small_deviation_is_minor() {
        let invoiced = vec![item("Peak Energy Usage", ChargeType::Usage, "157.50")];
        let calculated = vec![item("peak  energy usage ", ChargeType::Usage, "155.75")];

        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        assert_eq!(summary.line_items.len(), 1);

        let line = &summary.line_items[0];
        assert_eq!(line.status, DiscrepancyStatus::Minor);
        assert_eq!(line.amount_difference, dec("1.75"));
        assert_eq!(line.percentage_difference, Some(dec("1.1236")));
        assert_eq!(line.note.as_deref(), Some("Invoiced amount is higher by $1.75 (1.1%)"));
        assert_eq!(summary.overall_status, DiscrepancyStatus::Minor);
        assert!((summary.confidence_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn large_deviation_is_significant() {
        let invoiced = vec![item("Daily Supply Charge", ChargeType::Supply, "58.40")];
        let calculated = vec![item("Daily Supply Charge", ChargeType::Supply, "54.80")];

        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        assert_eq!(summary.line_items[0].status, DiscrepancyStatus::Significant);
        assert_eq!(summary.significant_discrepancies, 1);
        assert_eq!(summary.confidence_score, 0.0);
    }

    #[test]
    fn unmatched_items_are_missing_on_the_other_side() {
        let invoiced = vec![
            item("Energy Usage", ChargeType::Usage, "100.00"),
            item("Late Payment Fee", ChargeType::Other, "12.50"),
        ];
        let calculated = vec![
            item("Energy Usage", ChargeType::Usage, "100.20"),
            item("Demand Charge", ChargeType::Demand, "9.00"),
        ];

        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        let statuses: Vec<_> = summary.line_items.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![
                DiscrepancyStatus::Match,
                DiscrepancyStatus::MissingCalculated,
                DiscrepancyStatus::MissingInvoiced,
            ]
        );
        assert_eq!(summary.missing_items, 2);
        assert_eq!(summary.overall_status, DiscrepancyStatus::MissingCalculated);
        assert_eq!(summary.line_items[1].percentage_difference, None);
        assert_eq!(summary.line_items[2].amount_difference, dec("-9.00"));
    }

    #[test]
    fn same_description_with_different_charge_type_does_not_match() {
        let invoiced = vec![item("Network", ChargeType::Network, "10")];
        let calculated = vec![item("Network", ChargeType::Other, "10")];
        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        assert_eq!(summary.line_items.len(), 2);
        assert_eq!(summary.missing_items, 2);
    }

    #[test]
    fn duplicate_keys_pair_in_order() {
        let invoiced = vec![
            item("Metering", ChargeType::Metering, "5.00"),
            item("Metering", ChargeType::Metering, "7.00"),
        ];
        let calculated = vec![
            item("Metering", ChargeType::Metering, "5.00"),
            item("Metering", ChargeType::Metering, "7.00"),
        ];
        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        assert_eq!(summary.matched_items, 2);
        assert_eq!(summary.confidence_score, 1.0);
    }

    #[test]
    fn zero_calculated_amount_has_no_percentage() {
        assert_eq!(
            classify(dec("3.00"), Decimal::ZERO, &Thresholds::default()),
            DiscrepancyStatus::Significant
        );
        assert_eq!(
            classify(Decimal::ZERO, Decimal::ZERO, &Thresholds::default()),
            DiscrepancyStatus::Match
        );

        let invoiced = vec![item("Environmental", ChargeType::Environmental, "3.00")];
        let calculated = vec![item("Environmental", ChargeType::Environmental, "0")];
        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        assert_eq!(summary.line_items[0].percentage_difference, None);
        assert_eq!(summary.total_percentage_difference, None);
    }

    #[test]
    fn total_difference_is_sum_of_line_differences() {
        let invoiced = vec![
            item("Energy Usage", ChargeType::Usage, "120.10"),
            item("Daily Supply Charge", ChargeType::Supply, "30.00"),
            item("Late Payment Fee", ChargeType::Other, "12.50"),
        ];
        let calculated = vec![
            item("Energy Usage", ChargeType::Usage, "118.00"),
            item("Daily Supply Charge", ChargeType::Supply, "30.00"),
            item("GST", ChargeType::Tax, "14.80"),
        ];
        let summary = reconcile(&invoiced, &calculated, &Thresholds::default());
        let line_sum: Decimal = summary.line_items.iter().map(|l| l.amount_difference).sum();
        assert_eq!(summary.total_difference, line_sum);
        assert_eq!(summary.total_difference, summary.invoiced_total - summary.calculated_total);
        assert_eq!(summary.invoiced_total, dec("162.60"));
        assert_eq!(summary.calculated_total, dec("162.80"));
    }

    #[test]
    fn empty_input_has_zero_confidence() {
        let summary = reconcile(&[], &[], &Thresholds::default());
        assert!(summary.line_items.is_empty());
        assert_eq!(summary.confidence_score, 0.0);
        assert_eq!(summary.overall_status, DiscrepancyStatus::Match);
        assert_eq!(summary.total_percentage_difference, None);
    }

    #[test]
    fn custom_thresholds_change_classification() {
        let strict = Thresholds {
            match_percent: Decimal::ZERO,
            minor_percent: dec("1"),
        };
        assert_eq!(classify(dec("101.5"), dec("100"), &strict), DiscrepancyStatus::Significant);
        assert_eq!(classify(dec("100.5"), dec("100"), &strict), DiscrepancyStatus::Minor);
        assert_eq!(classify(dec("100"), dec("100"), &strict), DiscrepancyStatus::Match);
    }

    #[test]
    fn default_band_edges_are_inclusive() {
        let t = Thresholds::default();
        assert_eq!(classify(dec("100.50"), dec("100"), &t), DiscrepancyStatus::Match);
        assert_eq!(classify(dec("99.50"), dec("100"), &t), DiscrepancyStatus::Match);
        assert_eq!(classify(dec("100.51"), dec("100"), &t), DiscrepancyStatus::Minor);
        assert_eq!(classify(dec("105.00"), dec("100"), &t), DiscrepancyStatus::Minor);
        assert_eq!(classify(dec("105.01"), dec("100"), &t), DiscrepancyStatus::Significant);
    }

    #[test]
    fn deviation_hidden_by_rounding_still_leaves_match_band() {
        let t = Thresholds::default();
        let invoiced = dec("2010000.01");
        let calculated = dec("2000000.00");

        assert_eq!(percentage(invoiced - calculated, calculated), Some(dec("0.5000")));
        assert_eq!(classify(invoiced, calculated, &t), DiscrepancyStatus::Minor);
        assert_eq!(classify(dec("2100000.01"), calculated, &t), DiscrepancyStatus::Significant);
    }
}
