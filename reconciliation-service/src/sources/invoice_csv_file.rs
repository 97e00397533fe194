use std::io::Read;

use csv::StringRecord;
use energy_domain::domain::{ChargeType, InvoiceLineItem, LineItem};
use rust_decimal::Decimal;
use time::{macros::format_description, Date};

use crate::pipeline::PipelineError;

fn parse_optional_f64(s: &str) -> Option<f64> {
    if s.trim().is_empty() {
        None
    } else {
        s.trim().parse().ok()
    }
}

fn parse_optional_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_decimal(name: &str, s: &str) -> Result<Decimal, PipelineError> {
    let cleaned = s.trim().trim_start_matches('$').replace(',', "");
    cleaned
        .parse()
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{s}': {e}")))
}

fn parse_optional_date(name: &str, s: &str) -> Result<Option<Date>, PipelineError> {
    if s.trim().is_empty() {
        return Ok(None);
    }
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map(Some)
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{s}': {e}")))
}

fn record_to_line_item(record: &StringRecord, headers: &StringRecord) -> Result<InvoiceLineItem, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in invoice record")))
    };

    let description = get("description")?.trim().to_string();
    if description.is_empty() {
        return Err(PipelineError::Source("invoice record has an empty description".to_string()));
    }
    let charge_type: ChargeType = get("charge_type")?.parse().map_err(PipelineError::Source)?;
    let amount = parse_decimal("amount", get("amount")?)?;

    let mut item = LineItem::new(description, charge_type, amount);
    item.quantity = get("quantity").ok().and_then(parse_optional_f64);
    item.unit = get("unit").ok().and_then(parse_optional_string);
    item.rate = match get("rate").ok().map(str::trim) {
        Some(s) if !s.is_empty() => Some(parse_decimal("rate", s)?),
        _ => None,
    };
    item.period_start = parse_optional_date("period_start", get("period_start").unwrap_or(""))?;
    item.period_end = parse_optional_date("period_end", get("period_end").unwrap_or(""))?;
    Ok(item)
}

/// Read every line item off a retailer invoice CSV, failing on the first bad
/// record.
///
/// Expected header columns (by name):
/// - description
/// - charge_type (usage, demand, supply, network, metering, environmental, tax/gst, other)
/// - amount (dollars, e.g. 157.50)
/// - quantity (optional)
/// - unit (optional)
/// - rate (optional)
/// - period_start, period_end (optional, YYYY-MM-DD)
pub fn read_invoice_items<R: Read>(reader: R) -> Result<Vec<InvoiceLineItem>, PipelineError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::Source(format!("failed to read invoice CSV headers: {e}")))?
        .clone();

    let mut items = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| PipelineError::Source(format!("failed to read invoice CSV record: {e}")))?;
        match record_to_line_item(&record, &headers) {
            Ok(item) => items.push(item),
            Err(e) => {
                metrics::counter!("invoice_csv_parse_errors_total").increment(1);
                return Err(e);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const INVOICE: &str = "\
description,charge_type,amount,quantity,unit,rate,period_start,period_end
Peak Energy Usage,usage,157.50,441.9,kWh,0.3564,2024-01-01,2024-01-31
Daily Supply Charge,supply,$30.00,31,day,,,
Late Payment Fee,other,12.50,,,,,
GST,gst,\"1,020.00\",,,,,
";

    #[test]
    fn reads_items_with_optional_columns() {
        let items = read_invoice_items(INVOICE.as_bytes()).unwrap();
        assert_eq!(items.len(), 4);

        assert_eq!(items[0].description, "Peak Energy Usage");
        assert_eq!(items[0].charge_type, ChargeType::Usage);
        assert_eq!(items[0].amount, Decimal::new(15750, 2));
        assert_eq!(items[0].quantity, Some(441.9));
        assert_eq!(items[0].rate, Some(Decimal::new(3564, 4)));
        assert_eq!(items[0].period_end, Some(date!(2024-01-31)));

        assert_eq!(items[1].amount, Decimal::new(3000, 2));
        assert_eq!(items[1].rate, None);
        assert_eq!(items[2].unit, None);
        assert_eq!(items[3].charge_type, ChargeType::Tax);
        assert_eq!(items[3].amount, Decimal::new(102000, 2));
    }

    #[test]
    fn unknown_charge_type_is_rejected() {
        let csv = "description,charge_type,amount\nThing,fees,1.00\n";
        assert!(matches!(read_invoice_items(csv.as_bytes()), Err(PipelineError::Source(_))));
    }

    #[test]
    fn missing_amount_column_is_rejected() {
        let csv = "description,charge_type\nThing,other\n";
        let err = read_invoice_items(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("amount"));
    }
}
