//! NEM12 interval metering file parsing.
//!
//! A file is read once, line by line. Stream-header (200) records set the
//! context that following interval-data (300) and interval-event (400)
//! records are read under; data for the same connection and date is
//! collected into a single day table until the connection or date changes.

pub mod assembler;
pub mod record;
pub mod series;

use std::borrow::Cow;

use energy_domain::domain::{DayTable, FileHeader, MeterDataSeries};
use serde::{Deserialize, Serialize};
use time::{error::ComponentRange, UtcOffset};

pub use assembler::{Assembler, Step};
pub use record::RecordType;
pub use series::group_series;

/// A malformed record. The record is skipped and parsing continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("line {line}: {record_type} record: {reason}")]
pub struct FormatError {
    pub line: usize,
    pub record_type: String,
    pub reason: String,
}

/// An interval record seen before any stream header. The whole file is rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {record_type} record appears before any 200 stream header")]
pub struct StructuralError {
    pub line: usize,
    pub record_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Subtracted from 400 start/end fields: 0 when they are zero-based
    /// indices, 1 when they are NEM12 interval numbers.
    pub event_index_base: usize,
    /// Offset of the market clock interval dates are recorded in.
    pub market_utc_offset_hours: i8,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            event_index_base: 0,
            market_utc_offset_hours: 10,
        }
    }
}

impl ParserSettings {
    pub fn market_offset(&self) -> Result<UtcOffset, ComponentRange> {
        UtcOffset::from_hms(self.market_utc_offset_hours, 0, 0)
    }
}

/// Decode one raw line. Bytes that are not UTF-8 are replaced in this line
/// only, so a stray byte in a reason field does not cost the rest of the file.
pub fn decode_line(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Split a whole file into decoded lines.
pub fn decode_lines(bytes: &[u8]) -> impl Iterator<Item = Cow<'_, str>> {
    bytes.split_inclusive(|b| *b == b'\n').map(decode_line)
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub header: Option<FileHeader>,
    pub tables: Vec<DayTable>,
    pub series: Vec<MeterDataSeries>,
    pub errors: Vec<FormatError>,
}

/// Parse a whole NEM12 file.
///
/// Malformed records are collected in `errors` alongside whatever series
/// could be built. An interval record before any stream header rejects the
/// file and no series are returned.
pub fn parse_interval_stream<I, S>(lines: I, settings: &ParserSettings) -> Result<ParseOutcome, StructuralError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut assembler = Assembler::new(settings.clone());
    let mut tables = Vec::new();
    let mut errors = Vec::new();

    for line in lines {
        let step = match assembler.feed(line.as_ref()) {
            Ok(step) => step,
            Err(e) => {
                metrics::counter!("nem12_structural_errors_total").increment(1);
                return Err(e);
            }
        };
        if step.error.is_some() {
            metrics::counter!("nem12_format_errors_total").increment(1);
        }
        tables.extend(step.table);
        errors.extend(step.error);
        if assembler.is_finished() {
            break;
        }
    }

    let lines_read = assembler.lines_read();
    let header = assembler.file_header().cloned();
    tables.extend(assembler.finish());
    metrics::counter!("nem12_records_total").increment(lines_read as u64);
    metrics::counter!("nem12_day_tables_total").increment(tables.len() as u64);

    let series = group_series(&tables);
    tracing::info!(
        lines = lines_read,
        day_tables = tables.len(),
        series = series.len(),
        format_errors = errors.len(),
        "NEM12 file parsed"
    );

    Ok(ParseOutcome {
        header,
        tables,
        series,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::domain::{QualityFlag, QualityMethod};
    use time::macros::date;

    fn sample_values(n: usize) -> String {
        (0..n).map(|i| format!("{:.1}", 0.5 + i as f64 * 0.1)).collect::<Vec<_>>().join(",")
    }

    #[test]
    fn single_day_round_trip_with_quality_override() {
        let content = format!(
            "100,NEM12,202401150000,ENERGYCO,RETAILER\n\
             200,1234567890,E1,E1,E1,N1,METSER01,kWh,30,\n\
             300,20240101,{},A,,,,\n\
             400,10,20,S14,79,Estimated\n\
             900\n",
            sample_values(48)
        );

        let out = parse_interval_stream(content.lines(), &ParserSettings::default()).unwrap();
        assert!(out.errors.is_empty());
        assert_eq!(out.header.unwrap().from_participant, "ENERGYCO");
        assert_eq!(out.tables.len(), 1);

        let column = &out.tables[0].columns[0];
        assert_eq!(column.values.len(), 48);
        assert_eq!(column.values[0], Some(0.5));

        let substituted: QualityMethod = "S14".parse().unwrap();
        for (idx, q) in column.quality.iter().enumerate() {
            if (10..=20).contains(&idx) {
                assert_eq!(q, &substituted);
            } else {
                assert_eq!(q, &QualityMethod::new(QualityFlag::Actual));
            }
        }

        assert_eq!(out.series.len(), 1);
        let s = &out.series[0];
        assert_eq!(s.connection_id, "1234567890");
        assert_eq!(s.unit_of_measure, "kWh");
        assert_eq!(s.interval_length_minutes, 30);
        assert_eq!(s.start_date, date!(2024-01-01));
    }

    #[test]
    fn row_length_follows_interval_length() {
        for length in [5u32, 10, 15, 30, 60] {
            let n = (1440 / length) as usize;
            let content = format!(
                "200,NMI1,E1,E1,E1,N1,MTR1,kWh,{length},\n300,20240101,{},A\n",
                vec!["1"; n].join(",")
            );
            let out = parse_interval_stream(content.lines(), &ParserSettings::default()).unwrap();
            assert!(out.errors.is_empty(), "length {length}");
            assert_eq!(out.tables[0].columns[0].values.len(), n);
            assert_eq!(out.tables[0].interval_count(), n);
        }
    }

    #[test]
    fn structural_error_rejects_the_file() {
        let content = "100,NEM12,202401150000,A,B\n300,20240101,1,A\n";
        let err = parse_interval_stream(content.lines(), &ParserSettings::default()).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn format_errors_are_returned_with_surviving_series() {
        let content = format!(
            "200,NMI1,E1,E1,E1,N1,MTR1,kWh,30,\n\
             300,20240101,{},A\n\
             300,20240102,not,a,number,A\n\
             300,20240103,{},A\n\
             900\n",
            vec!["1"; 48].join(","),
            vec!["2"; 48].join(",")
        );
        let out = parse_interval_stream(content.lines(), &ParserSettings::default()).unwrap();
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].line, 3);
        assert_eq!(out.series[0].days.len(), 2);
        assert_eq!(out.series[0].end_date, date!(2024-01-03));
    }

    #[test]
    fn invalid_utf8_costs_only_its_own_line() {
        let mut content = Vec::new();
        content.extend_from_slice(b"200,NMI1,E1,E1,E1,N1,MTR1,kWh,30,\r\n");
        for (day, reason) in [("01", &b"ok"[..]), ("02", &b"r\xe9ad"[..]), ("03", &b"ok"[..])] {
            content.extend_from_slice(format!("300,202401{day},{},A,,", vec!["1"; 48].join(",")).as_bytes());
            content.extend_from_slice(reason);
            content.extend_from_slice(b"\r\n");
        }
        content.extend_from_slice(b"300,20240104,\xff,A\n900\n");

        let out = parse_interval_stream(decode_lines(&content), &ParserSettings::default()).unwrap();
        assert_eq!(out.series[0].days.len(), 3);
        assert_eq!(out.series[0].end_date, date!(2024-01-03));
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].line, 5);
    }

    #[test]
    fn out_of_range_market_offset_is_an_error() {
        let settings = ParserSettings {
            market_utc_offset_hours: 30,
            ..ParserSettings::default()
        };
        assert!(settings.market_offset().is_err());
        assert_eq!(ParserSettings::default().market_offset().unwrap(), UtcOffset::from_hms(10, 0, 0).unwrap());
    }

    #[test]
    fn empty_input_yields_nothing() {
        let out = parse_interval_stream(Vec::<String>::new(), &ParserSettings::default()).unwrap();
        assert!(out.series.is_empty());
        assert!(out.errors.is_empty());
        assert!(out.header.is_none());
    }
}
