use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

pub const MINUTES_PER_DAY: u32 = 1440;

/// Number of intervals in one day for the given interval length, or `None`
/// when the length does not evenly divide a day.
pub fn intervals_per_day(interval_length_minutes: u32) -> Option<usize> {
    if interval_length_minutes == 0 || MINUTES_PER_DAY % interval_length_minutes != 0 {
        None
    } else {
        Some((MINUTES_PER_DAY / interval_length_minutes) as usize)
    }
}

/// Wall-clock start of an interval in the given market offset.
pub fn interval_start(
    date: Date,
    interval_index: usize,
    interval_length_minutes: u32,
    offset: UtcOffset,
) -> OffsetDateTime {
    let midnight = PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_offset(offset);
    midnight + Duration::minutes(interval_index as i64 * interval_length_minutes as i64)
}

/// How an interval value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Actual,
    Estimated,
    Final,
    Null,
    Substituted,
    Variable,
}

impl QualityFlag {
    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'A' => Some(Self::Actual),
            'E' => Some(Self::Estimated),
            'F' => Some(Self::Final),
            'N' => Some(Self::Null),
            'S' => Some(Self::Substituted),
            'V' => Some(Self::Variable),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::Actual => 'A',
            Self::Estimated => 'E',
            Self::Final => 'F',
            Self::Null => 'N',
            Self::Substituted => 'S',
            Self::Variable => 'V',
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid quality method '{0}'")]
pub struct InvalidQualityMethod(pub String);

/// A quality flag with its optional substitution/estimation method number,
/// written in NEM12 as e.g. `A`, `S14` or `E52`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct QualityMethod {
    pub flag: QualityFlag,
    pub method: Option<String>,
}

impl QualityMethod {
    pub fn new(flag: QualityFlag) -> Self {
        Self { flag, method: None }
    }
}

impl FromStr for QualityMethod {
    type Err = InvalidQualityMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let flag = chars
            .next()
            .and_then(QualityFlag::from_code)
            .ok_or_else(|| InvalidQualityMethod(s.to_string()))?;

        let rest = chars.as_str();
        if !rest.chars().all(|c| c.is_ascii_digit()) {
            return Err(InvalidQualityMethod(s.to_string()));
        }

        Ok(Self {
            flag,
            method: (!rest.is_empty()).then(|| rest.to_string()),
        })
    }
}

impl fmt::Display for QualityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flag.code())?;
        if let Some(m) = &self.method {
            f.write_str(m)?;
        }
        Ok(())
    }
}

impl From<QualityMethod> for String {
    fn from(q: QualityMethod) -> Self {
        q.to_string()
    }
}

impl TryFrom<String> for QualityMethod {
    type Error = InvalidQualityMethod;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Contents of the `100` file header record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub version: String,
    pub created_at: PrimitiveDateTime,
    pub from_participant: String,
    pub to_participant: String,
}

/// One value+quality column pair of a day table, named by its sub-stream suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayColumn {
    pub suffix: String,
    pub register_id: String,
    pub unit_of_measure: String,
    /// `None` is an unknown reading, never zero.
    pub values: Vec<Option<f64>>,
    pub quality: Vec<QualityMethod>,
}

/// All interval data for one connection point on one day.
///
/// Registers sharing the connection and date are sibling columns of the same
/// table. Every column has exactly `interval_count()` rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayTable {
    pub connection_id: String,
    pub date: Date,
    pub interval_length_minutes: u32,
    pub columns: Vec<DayColumn>,
}

impl DayTable {
    pub fn interval_count(&self) -> usize {
        intervals_per_day(self.interval_length_minutes).unwrap_or(0)
    }

    pub fn column(&self, suffix: &str) -> Option<&DayColumn> {
        self.columns.iter().find(|c| c.suffix == suffix)
    }

    /// Flatten every column into individual readings.
    pub fn readings(&self, offset: UtcOffset) -> impl Iterator<Item = IntervalReading> + '_ {
        self.columns.iter().flat_map(move |col| {
            col.values
                .iter()
                .zip(&col.quality)
                .enumerate()
                .map(move |(idx, (value, quality))| IntervalReading {
                    connection_id: self.connection_id.clone(),
                    register_id: col.register_id.clone(),
                    suffix: col.suffix.clone(),
                    date: self.date,
                    interval_index: idx,
                    interval_length_minutes: self.interval_length_minutes,
                    start: interval_start(self.date, idx, self.interval_length_minutes, offset),
                    energy: *value,
                    unit_of_measure: col.unit_of_measure.clone(),
                    quality: quality.clone(),
                })
        })
    }
}

/// A single interval value with its position in the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalReading {
    pub connection_id: String,
    pub register_id: String,
    pub suffix: String,
    pub date: Date,
    pub interval_index: usize,
    pub interval_length_minutes: u32,
    pub start: OffsetDateTime,
    pub energy: Option<f64>,
    pub unit_of_measure: String,
    pub quality: QualityMethod,
}

/// One register's values for one day within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRow {
    pub date: Date,
    pub values: Vec<Option<f64>>,
    pub quality: Vec<QualityMethod>,
}

/// Interval data for one (connection, register), ordered by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterDataSeries {
    pub connection_id: String,
    pub register_id: String,
    pub suffix: String,
    pub interval_length_minutes: u32,
    pub unit_of_measure: String,
    pub start_date: Date,
    pub end_date: Date,
    pub days: Vec<DayRow>,
}

impl MeterDataSeries {
    pub fn interval_count(&self) -> usize {
        intervals_per_day(self.interval_length_minutes).unwrap_or(0)
    }

    /// Sum of all known values, in the series' own unit.
    pub fn total_energy(&self) -> f64 {
        self.days
            .iter()
            .flat_map(|d| d.values.iter().flatten())
            .sum()
    }

    pub fn unknown_count(&self) -> usize {
        self.days
            .iter()
            .flat_map(|d| d.values.iter())
            .filter(|v| v.is_none())
            .count()
    }

    pub fn readings(&self, offset: UtcOffset) -> impl Iterator<Item = IntervalReading> + '_ {
        self.days.iter().flat_map(move |day| {
            day.values
                .iter()
                .zip(&day.quality)
                .enumerate()
                .map(move |(idx, (value, quality))| IntervalReading {
                    connection_id: self.connection_id.clone(),
                    register_id: self.register_id.clone(),
                    suffix: self.suffix.clone(),
                    date: day.date,
                    interval_index: idx,
                    interval_length_minutes: self.interval_length_minutes,
                    start: interval_start(day.date, idx, self.interval_length_minutes, offset),
                    energy: *value,
                    unit_of_measure: self.unit_of_measure.clone(),
                    quality: quality.clone(),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, offset};

    #[test]
    fn intervals_per_day_requires_an_even_divisor() {
        assert_eq!(intervals_per_day(5), Some(288));
        assert_eq!(intervals_per_day(15), Some(96));
        assert_eq!(intervals_per_day(30), Some(48));
        assert_eq!(intervals_per_day(7), None);
        assert_eq!(intervals_per_day(0), None);
    }

    #[test]
    fn quality_method_parses_flag_and_method() {
        let q: QualityMethod = "S14".parse().unwrap();
        assert_eq!(q.flag, QualityFlag::Substituted);
        assert_eq!(q.method.as_deref(), Some("14"));
        assert_eq!(q.to_string(), "S14");

        let a: QualityMethod = "A".parse().unwrap();
        assert_eq!(a, QualityMethod::new(QualityFlag::Actual));

        assert!("X".parse::<QualityMethod>().is_err());
        assert!("".parse::<QualityMethod>().is_err());
        assert!("E5x".parse::<QualityMethod>().is_err());
    }

    #[test]
    fn interval_start_offsets_from_market_midnight() {
        let ts = interval_start(date!(2024-01-01), 3, 30, offset!(+10));
        assert_eq!(ts, datetime!(2024-01-01 01:30 +10));
    }

    #[test]
    fn day_table_readings_cover_every_column_and_row() {
        let quality = vec![QualityMethod::new(QualityFlag::Actual); 48];
        let column = |suffix: &str| DayColumn {
            suffix: suffix.to_string(),
            register_id: suffix.to_string(),
            unit_of_measure: "kWh".to_string(),
            values: vec![Some(0.5); 48],
            quality: quality.clone(),
        };
        let table = DayTable {
            connection_id: "NMI1".to_string(),
            date: date!(2024-01-01),
            interval_length_minutes: 30,
            columns: vec![column("E1"), column("B1")],
        };

        let readings: Vec<_> = table.readings(offset!(+10)).collect();
        assert_eq!(readings.len(), 96);
        assert_eq!(readings[47].suffix, "E1");
        assert_eq!(readings[48].suffix, "B1");
        assert_eq!(readings[48].interval_index, 0);
    }
}
