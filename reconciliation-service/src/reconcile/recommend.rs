use energy_domain::domain::{DiscrepancyStatus, LineItemReconciliation, ReconciliationSummary};
use rust_decimal::{Decimal, RoundingStrategy};

fn direction(difference: Decimal) -> &'static str {
    if difference.is_sign_negative() {
        "lower"
    } else {
        "higher"
    }
}

/// Display formatting of `Decimal` truncates, so round before printing.
fn dollars(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn percent(pct: Decimal) -> Decimal {
    pct.abs().round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

/// Short explanation attached to every line that is not a match.
pub fn discrepancy_note(line: &LineItemReconciliation) -> Option<String> {
    match line.status {
        DiscrepancyStatus::Match => None,
        DiscrepancyStatus::MissingCalculated => {
            Some("Charged on the invoice but not calculated from metering data".to_string())
        }
        DiscrepancyStatus::MissingInvoiced => {
            Some("Calculated from metering data but not on the invoice".to_string())
        }
        DiscrepancyStatus::Minor | DiscrepancyStatus::Significant => {
            let amount = dollars(line.amount_difference.abs());
            let dir = direction(line.amount_difference);
            Some(match line.percentage_difference {
                Some(pct) => format!("Invoiced amount is {dir} by ${amount:.2} ({:.1}%)", percent(pct)),
                None => format!("Invoiced amount is {dir} by ${amount:.2}; calculated amount is zero"),
            })
        }
    }
}

/// One sentence per line at minor or worse, then one comparing the totals.
pub fn recommendations(summary: &ReconciliationSummary) -> Vec<String> {
    let mut out: Vec<String> = summary
        .line_items
        .iter()
        .filter(|l| l.status != DiscrepancyStatus::Match)
        .map(line_recommendation)
        .collect();

    if !summary.line_items.is_empty() {
        out.push(totals_sentence(summary));
    }
    out
}

fn line_recommendation(line: &LineItemReconciliation) -> String {
    let name = &line.description;
    match line.status {
        DiscrepancyStatus::MissingCalculated => format!(
            "Query '{name}' with the retailer: ${:.2} was invoiced but no matching charge was calculated.",
            dollars(line.invoiced_amount)
        ),
        DiscrepancyStatus::MissingInvoiced => format!(
            "Check '{name}': ${:.2} was calculated but does not appear on the invoice.",
            dollars(line.calculated_amount)
        ),
        _ => {
            let severity = if line.status == DiscrepancyStatus::Significant {
                "Dispute"
            } else {
                "Review"
            };
            let amount = dollars(line.amount_difference.abs());
            let dir = direction(line.amount_difference);
            match line.percentage_difference {
                Some(pct) => format!(
                    "{severity} '{name}': invoiced ${:.2} is {dir} than calculated ${:.2} by ${amount:.2} ({:.1}%).",
                    dollars(line.invoiced_amount),
                    dollars(line.calculated_amount),
                    percent(pct)
                ),
                None => format!(
                    "{severity} '{name}': invoiced ${:.2} where nothing was calculated.",
                    dollars(line.invoiced_amount)
                ),
            }
        }
    }
}

fn totals_sentence(summary: &ReconciliationSummary) -> String {
    if summary.total_difference.is_zero() {
        return format!(
            "The invoice total of ${:.2} agrees with the calculated total.",
            dollars(summary.invoiced_total)
        );
    }
    let amount = dollars(summary.total_difference.abs());
    let dir = direction(summary.total_difference);
    let invoiced = dollars(summary.invoiced_total);
    let calculated = dollars(summary.calculated_total);
    match summary.total_percentage_difference {
        Some(pct) => format!(
            "The invoice total of ${invoiced:.2} is ${amount:.2} ({:.1}%) {dir} than the calculated total of ${calculated:.2}.",
            percent(pct)
        ),
        None => format!(
            "The invoice total of ${invoiced:.2} is ${amount:.2} {dir} than the calculated total of ${calculated:.2}."
        ),
    }
}
