use std::{io::Write, path::Path};

use energy_domain::domain::{ChargeType, DiscrepancyStatus, ReconciliationSummary};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    description: &'a str,
    charge_type: ChargeType,
    invoiced: Decimal,
    calculated: Decimal,
    difference: Decimal,
    percentage: Option<Decimal>,
    status: DiscrepancyStatus,
}

/// Write one CSV row per reconciled line item, with a header row.
pub fn write_csv<W: Write>(summary: &ReconciliationSummary, writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for line in &summary.line_items {
        wtr.serialize(ExportRow {
            description: &line.description,
            charge_type: line.charge_type,
            invoiced: line.invoiced_amount,
            calculated: line.calculated_amount,
            difference: line.amount_difference,
            percentage: line.percentage_difference,
            status: line.status,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_csv_file(summary: &ReconciliationSummary, path: impl AsRef<Path>) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_csv(summary, file)
}
