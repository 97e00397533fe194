use std::{env, fs::File};

use anyhow::{bail, Context, Result};
use energy_domain::domain::{BillingWindow, ConsumptionSummary, MeterDataSeries, ReconciliationSummary};
use reconciliation_service::{
    aggregate::aggregate,
    charges::{calculate_charges, partition_charges, CalculationError},
    config::{load_tariff, AppConfig},
    export,
    nem12::{decode_lines, parse_interval_stream, FormatError},
    observability,
    reconcile::reconcile,
    sources::read_invoice_items,
};
use serde::Serialize;
use time::{macros::format_description, Date};

const USAGE: &str =
    "usage: reconciliation-service <nem12_file> <tariff_toml> <invoice_csv> [<from> <to>] [<export_csv>]";

#[derive(Serialize)]
struct Report<'a> {
    connection_id: &'a str,
    consumption: &'a ConsumptionSummary,
    calculation_errors: &'a [CalculationError],
    format_errors: &'a [FormatError],
    reconciliation: &'a ReconciliationSummary,
}

fn parse_date(s: &str) -> Result<Date> {
    Date::parse(s, format_description!("[year]-[month]-[day]")).with_context(|| format!("invalid date '{s}'"))
}

/// Covers every day present in the series.
fn full_window(series: &[&MeterDataSeries]) -> Result<BillingWindow> {
    let start = series.iter().map(|s| s.start_date).min();
    let end = series.iter().map(|s| s.end_date).max();
    match (start, end) {
        (Some(start), Some(end)) => Ok(BillingWindow::new(start, end)?),
        _ => bail!("NEM12 file contains no interval data"),
    }
}

/// Compare an invoice with charges calculated from NEM12 interval data.
///
/// Usage:
///   reconciliation-service <nem12_file> <tariff_toml> <invoice_csv> [<from> <to>] [<export_csv>]
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let (nem12_path, tariff_path, invoice_path) = match args.as_slice() {
        [n, t, i, ..] => (n, t, i),
        _ => bail!(USAGE),
    };
    let (range, export_path) = match &args[3..] {
        [] => (None, None),
        [out] => (None, Some(out)),
        [from, to] => (Some((parse_date(from)?, parse_date(to)?)), None),
        [from, to, out] => (Some((parse_date(from)?, parse_date(to)?)), Some(out)),
        _ => bail!(USAGE),
    };

    let cfg = AppConfig::load()?;

    let contents = tokio::fs::read(nem12_path)
        .await
        .with_context(|| format!("failed to read NEM12 file {nem12_path}"))?;
    let parsed = parse_interval_stream(decode_lines(&contents), &cfg.parser)?;
    for e in &parsed.errors {
        tracing::warn!(error = %e, "NEM12 record skipped");
    }

    let Some(first) = parsed.series.first() else {
        bail!("NEM12 file {nem12_path} contains no interval data");
    };
    let connection_id = first.connection_id.as_str();
    let selected: Vec<&MeterDataSeries> = parsed
        .series
        .iter()
        .filter(|s| s.connection_id == connection_id)
        .collect();
    if selected.len() < parsed.series.len() {
        tracing::warn!(
            connection_id,
            skipped = parsed.series.len() - selected.len(),
            "file has several connections; reconciling the first only"
        );
    }

    let window = match range {
        Some((from, to)) => BillingWindow::new(from, to)?,
        None => full_window(&selected)?,
    };
    let series: Vec<MeterDataSeries> = selected.into_iter().cloned().collect();
    let consumption = aggregate(&series, &cfg.periods, window)?;
    tracing::info!(
        connection_id,
        from = %window.start(),
        to = %window.end(),
        total_kwh = consumption.total_kwh,
        "consumption aggregated"
    );

    let tariff = load_tariff(tariff_path)?;
    let (calculated, calculation_errors) = partition_charges(calculate_charges(&consumption, &tariff));
    for e in &calculation_errors {
        tracing::warn!(error = %e, "charge could not be calculated");
    }

    let invoice_file =
        File::open(invoice_path).with_context(|| format!("failed to open invoice CSV {invoice_path}"))?;
    let invoiced = read_invoice_items(invoice_file)?;

    let summary = reconcile(&invoiced, &calculated, &cfg.reconciliation);
    metrics::counter!("reconciliation_runs_total", "status" => summary.overall_status.as_str()).increment(1);
    tracing::info!(
        overall = %summary.overall_status,
        confidence = summary.confidence_score,
        difference = %summary.total_difference,
        "reconciliation finished"
    );

    if let Some(path) = export_path {
        export::write_csv_file(&summary, path).with_context(|| format!("failed to write {path}"))?;
    }

    let report = Report {
        connection_id,
        consumption: &consumption,
        calculation_errors: &calculation_errors,
        format_errors: &parsed.errors,
        reconciliation: &summary,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
