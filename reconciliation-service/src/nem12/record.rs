//! Record tokenizer: splits a NEM12 line into fields, classifies it by its
//! record-type code and validates each record type into a fixed shape.

use std::fmt;

use energy_domain::domain::{FileHeader, QualityMethod};
use time::{macros::format_description, Date, PrimitiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Header,
    StreamHeader,
    IntervalData,
    IntervalEvent,
    Correction,
    EndOfData,
}

impl RecordType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "100" => Some(Self::Header),
            "200" => Some(Self::StreamHeader),
            "300" => Some(Self::IntervalData),
            "400" => Some(Self::IntervalEvent),
            "500" => Some(Self::Correction),
            "900" => Some(Self::EndOfData),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Header => "100",
            Self::StreamHeader => "200",
            Self::IntervalData => "300",
            Self::IntervalEvent => "400",
            Self::Correction => "500",
            Self::EndOfData => "900",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A tokenized line: the record-type code and the fields after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<'a> {
    pub code: &'a str,
    pub fields: Vec<&'a str>,
}

impl<'a> RawRecord<'a> {
    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_code(self.code)
    }

    fn field(&self, idx: usize) -> &'a str {
        self.fields.get(idx).copied().unwrap_or("")
    }
}

/// Split a line on commas. Blank lines yield `None`.
pub fn tokenize(line: &str) -> Option<RawRecord<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let mut parts = line.split(',').map(str::trim);
    let code = parts.next()?;
    Some(RawRecord {
        code,
        fields: parts.collect(),
    })
}

fn require_fields(raw: &RawRecord<'_>, min: usize) -> Result<(), String> {
    if raw.fields.len() < min {
        return Err(format!(
            "expected at least {min} fields after the record code, found {}",
            raw.fields.len()
        ));
    }
    Ok(())
}

fn required<'a>(raw: &RawRecord<'a>, idx: usize, name: &str) -> Result<&'a str, String> {
    let v = raw.field(idx);
    if v.is_empty() {
        Err(format!("missing {name}"))
    } else {
        Ok(v)
    }
}

fn optional(raw: &RawRecord<'_>, idx: usize) -> Option<String> {
    let v = raw.field(idx);
    (!v.is_empty()).then(|| v.to_string())
}

fn parse_date(s: &str) -> Result<Date, String> {
    Date::parse(s, format_description!("[year][month][day]"))
        .map_err(|e| format!("invalid date '{s}': {e}"))
}

fn parse_quality(s: &str) -> Result<QualityMethod, String> {
    s.parse().map_err(|e| format!("{e}"))
}

/// `100,NEM12,YYYYMMDDhhmm,from,to`; extra trailing fields are discarded.
pub fn parse_file_header(raw: &RawRecord<'_>) -> Result<FileHeader, String> {
    require_fields(raw, 4)?;
    let created = required(raw, 1, "file creation datetime")?;
    let created_at = PrimitiveDateTime::parse(created, format_description!("[year][month][day][hour][minute]"))
        .map_err(|e| format!("invalid file creation datetime '{created}': {e}"))?;

    Ok(FileHeader {
        version: required(raw, 0, "version header")?.to_string(),
        created_at,
        from_participant: raw.field(2).to_string(),
        to_participant: raw.field(3).to_string(),
    })
}

/// Validated `200` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub connection_id: String,
    pub nmi_configuration: String,
    pub register_id: String,
    pub suffix: String,
    pub data_stream_id: Option<String>,
    pub meter_serial: Option<String>,
    pub unit_of_measure: String,
    pub interval_length_minutes: u32,
    pub next_scheduled_read: Option<Date>,
}

impl StreamHeader {
    pub fn parse(raw: &RawRecord<'_>) -> Result<Self, String> {
        require_fields(raw, 8)?;
        let length = required(raw, 7, "interval length")?;
        let interval_length_minutes = length
            .parse()
            .map_err(|_| format!("invalid interval length '{length}'"))?;
        let next_scheduled_read = optional(raw, 8).map(|s| parse_date(&s)).transpose()?;

        Ok(Self {
            connection_id: required(raw, 0, "connection id")?.to_string(),
            nmi_configuration: raw.field(1).to_string(),
            register_id: required(raw, 2, "register id")?.to_string(),
            suffix: required(raw, 3, "sub-stream suffix")?.to_string(),
            data_stream_id: optional(raw, 4),
            meter_serial: optional(raw, 5),
            unit_of_measure: required(raw, 6, "unit of measure")?.to_string(),
            interval_length_minutes,
            next_scheduled_read,
        })
    }
}

/// Validated `300` record for a known interval count.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalData {
    pub date: Date,
    pub values: Vec<Option<f64>>,
    pub quality: QualityMethod,
    pub reason_code: Option<String>,
    pub reason_description: Option<String>,
    pub update_datetime: Option<String>,
    pub load_datetime: Option<String>,
}

impl IntervalData {
    /// Fields: date, `interval_count` values, quality method, then up to four
    /// optional trailing fields.
    pub fn parse(raw: &RawRecord<'_>, interval_count: usize) -> Result<Self, String> {
        let min = interval_count + 2;
        let max = interval_count + 6;
        let n = raw.fields.len();
        if n < min || n > max {
            return Err(format!(
                "expected {min} to {max} fields after the record code for {interval_count} intervals, found {n}"
            ));
        }

        let date = parse_date(required(raw, 0, "interval date")?)?;

        let values = raw.fields[1..=interval_count]
            .iter()
            .enumerate()
            .map(|(idx, v)| parse_value(idx, v))
            .collect::<Result<Vec<_>, _>>()?;

        let q = interval_count + 1;
        let quality = parse_quality(required(raw, q, "quality method")?)?;

        Ok(Self {
            date,
            values,
            quality,
            reason_code: optional(raw, q + 1),
            reason_description: optional(raw, q + 2),
            update_datetime: optional(raw, q + 3),
            load_datetime: optional(raw, q + 4),
        })
    }
}

fn parse_value(idx: usize, v: &str) -> Result<Option<f64>, String> {
    if v.is_empty() {
        return Ok(None);
    }
    match v.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(Some(x)),
        _ => Err(format!("invalid value '{v}' at interval {idx}")),
    }
}

/// Validated `400` record with a zero-based inclusive index range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalEvent {
    pub start: usize,
    pub end: usize,
    pub quality: QualityMethod,
    pub reason_code: Option<String>,
    pub reason_description: Option<String>,
}

impl IntervalEvent {
    /// `index_base` is subtracted from the start/end fields before the range
    /// is checked against `[0, interval_count - 1]`.
    pub fn parse(raw: &RawRecord<'_>, interval_count: usize, index_base: usize) -> Result<Self, String> {
        require_fields(raw, 3)?;
        let index = |pos: usize, name: &str| -> Result<usize, String> {
            let s = required(raw, pos, name)?;
            s.parse::<usize>()
                .ok()
                .and_then(|v| v.checked_sub(index_base))
                .ok_or_else(|| format!("invalid {name} '{s}'"))
        };

        let start = index(0, "start interval")?;
        let end = index(1, "end interval")?;
        if start > end {
            return Err(format!("event range start {start} is after end {end}"));
        }
        if end >= interval_count {
            return Err(format!(
                "event range {start}..={end} outside 0..={}",
                interval_count.saturating_sub(1)
            ));
        }

        Ok(Self {
            start,
            end,
            quality: parse_quality(required(raw, 2, "quality method")?)?,
            reason_code: optional(raw, 3),
            reason_description: optional(raw, 4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::domain::QualityFlag;
    use time::macros::{date, datetime};

    fn raw(line: &str) -> RawRecord<'_> {
        tokenize(line).unwrap()
    }

    #[test]
    fn tokenize_classifies_by_leading_code() {
        let r = raw("200,NMI1,E1E2,E1,E1,N1,MTR1,kWh,30,\r\n");
        assert_eq!(r.record_type(), Some(RecordType::StreamHeader));
        assert_eq!(r.fields.len(), 9);
        assert_eq!(r.fields[8], "");

        assert_eq!(raw("250,x").record_type(), None);
        assert!(tokenize("   ").is_none());
    }

    #[test]
    fn file_header_discards_extra_fields() {
        let h = parse_file_header(&raw("100,NEM12,202401150000,ENERGYCO,RETAILER,extra")).unwrap();
        assert_eq!(h.version, "NEM12");
        assert_eq!(h.created_at, datetime!(2024-01-15 00:00));
        assert_eq!(h.to_participant, "RETAILER");

        assert!(parse_file_header(&raw("100,NEM12")).is_err());
        assert!(parse_file_header(&raw("100,NEM12,notadate,A,B")).is_err());
    }

    #[test]
    fn stream_header_requires_numeric_interval_length() {
        let h = StreamHeader::parse(&raw("200,NMI1,E1,E1,E1,N1,MTR1,kWh,15,20240301")).unwrap();
        assert_eq!(h.connection_id, "NMI1");
        assert_eq!(h.interval_length_minutes, 15);
        assert_eq!(h.meter_serial.as_deref(), Some("MTR1"));
        assert_eq!(h.next_scheduled_read, Some(date!(2024-03-01)));

        assert!(StreamHeader::parse(&raw("200,NMI1,E1,E1,E1,N1,MTR1,kWh,thirty")).is_err());
        assert!(StreamHeader::parse(&raw("200,NMI1,E1")).is_err());
    }

    #[test]
    fn interval_data_keeps_empty_values_unknown() {
        let line = "300,20240101,1.5,,2.25,0,A,,,,";
        let d = IntervalData::parse(&raw(line), 4).unwrap();
        assert_eq!(d.date, date!(2024-01-01));
        assert_eq!(d.values, vec![Some(1.5), None, Some(2.25), Some(0.0)]);
        assert_eq!(d.quality.flag, QualityFlag::Actual);
        assert!(d.reason_code.is_none());
    }

    #[test]
    fn interval_data_rejects_wrong_field_count_and_garbage() {
        assert!(IntervalData::parse(&raw("300,20240101,1,2,3,A"), 4).is_err());
        assert!(IntervalData::parse(&raw("300,20240101,1,2,3,x,A"), 4).is_err());
        assert!(IntervalData::parse(&raw("300,20240101,1,2,3,inf,A"), 4).is_err());
        assert!(IntervalData::parse(&raw("300,2024-01-01,1,2,3,4,A"), 4).is_err());
        assert!(IntervalData::parse(&raw("300,20240101,1,2,3,4,Q"), 4).is_err());
        assert!(IntervalData::parse(&raw("300,20240101,1,2,3,4,A,1,2,3,4,5"), 4).is_err());
    }

    #[test]
    fn interval_event_validates_range() {
        let e = IntervalEvent::parse(&raw("400,10,20,S14,79,Reading estimated"), 48, 0).unwrap();
        assert_eq!((e.start, e.end), (10, 20));
        assert_eq!(e.quality.to_string(), "S14");
        assert_eq!(e.reason_description.as_deref(), Some("Reading estimated"));

        assert!(IntervalEvent::parse(&raw("400,20,10,A"), 48, 0).is_err());
        assert!(IntervalEvent::parse(&raw("400,40,48,A"), 48, 0).is_err());
        assert!(IntervalEvent::parse(&raw("400,0,5,A"), 48, 1).is_err());

        let one_based = IntervalEvent::parse(&raw("400,1,48,E52"), 48, 1).unwrap();
        assert_eq!((one_based.start, one_based.end), (0, 47));
    }
}
