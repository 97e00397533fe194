use energy_domain::domain::{intervals_per_day, DayColumn, DayTable, FileHeader};

use super::record::{self, IntervalData, IntervalEvent, RawRecord, RecordType, StreamHeader};
use super::{FormatError, ParserSettings, StructuralError};

#[derive(Debug, Clone)]
enum HeaderContext {
    /// No 200 record seen yet.
    Unseen,
    Valid(StreamHeader),
    /// The most recent 200 record was malformed.
    Invalid,
}

enum Rejection {
    Format(String),
    Structural,
}

impl From<String> for Rejection {
    fn from(reason: String) -> Self {
        Rejection::Format(reason)
    }
}

/// What a single line produced.
#[derive(Debug, Default)]
pub struct Step {
    pub table: Option<DayTable>,
    pub error: Option<FormatError>,
}

/// Parser state folded across the lines of one NEM12 file.
///
/// Carries the current stream-header context and the day table being built.
/// Each call to [`Assembler::feed`] consumes one line and yields any finalized
/// table and any recoverable error it produced.
#[derive(Debug, Clone)]
pub struct Assembler {
    settings: ParserSettings,
    line: usize,
    file_header: Option<FileHeader>,
    header: HeaderContext,
    open: Option<DayTable>,
    /// Suffix column that a following 400 record applies to.
    event_target: Option<String>,
    finished: bool,
}

impl Assembler {
    pub fn new(settings: ParserSettings) -> Self {
        Self {
            settings,
            line: 0,
            file_header: None,
            header: HeaderContext::Unseen,
            open: None,
            event_target: None,
            finished: false,
        }
    }

    pub fn file_header(&self) -> Option<&FileHeader> {
        self.file_header.as_ref()
    }

    /// True once the end-of-data record has been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn lines_read(&self) -> usize {
        self.line
    }

    pub fn feed(&mut self, line: &str) -> Result<Step, StructuralError> {
        self.line += 1;
        if self.finished {
            return Ok(Step::default());
        }
        let Some(raw) = record::tokenize(line) else {
            return Ok(Step::default());
        };

        // Events attach to the last accepted 300; anything else breaks the chain.
        let kind = raw.record_type();
        if kind != Some(RecordType::IntervalEvent) {
            self.event_target = None;
        }

        let result = match kind {
            Some(RecordType::Header) => self.on_file_header(&raw),
            Some(RecordType::StreamHeader) => self.on_stream_header(&raw),
            Some(RecordType::IntervalData) => self.on_interval_data(&raw),
            Some(RecordType::IntervalEvent) => self.on_interval_event(&raw),
            Some(RecordType::Correction) => Ok(None),
            Some(RecordType::EndOfData) => {
                self.finished = true;
                Ok(None)
            }
            None => Err(Rejection::Format(format!("unrecognized record type '{}'", raw.code))),
        };

        match result {
            Ok(table) => {
                if let Some(t) = &table {
                    tracing::debug!(
                        connection_id = %t.connection_id,
                        date = %t.date,
                        columns = t.columns.len(),
                        "day table finalized"
                    );
                }
                Ok(Step { table, error: None })
            }
            Err(Rejection::Format(reason)) => {
                tracing::warn!(
                    line = self.line,
                    record_type = raw.code,
                    reason = %reason,
                    "skipping malformed NEM12 record"
                );
                Ok(Step {
                    table: None,
                    error: Some(FormatError {
                        line: self.line,
                        record_type: raw.code.to_string(),
                        reason,
                    }),
                })
            }
            Err(Rejection::Structural) => Err(StructuralError {
                line: self.line,
                record_type: raw.code.to_string(),
            }),
        }
    }

    /// Close the pass, returning the table still open, if any.
    pub fn finish(self) -> Option<DayTable> {
        self.open
    }

    fn current_header(&self) -> Result<&StreamHeader, Rejection> {
        match &self.header {
            HeaderContext::Valid(h) => Ok(h),
            HeaderContext::Invalid => Err(Rejection::Format(
                "no valid stream header; the preceding 200 record was rejected".to_string(),
            )),
            HeaderContext::Unseen => Err(Rejection::Structural),
        }
    }

    fn on_file_header(&mut self, raw: &RawRecord<'_>) -> Result<Option<DayTable>, Rejection> {
        self.file_header = Some(record::parse_file_header(raw)?);
        Ok(None)
    }

    fn on_stream_header(&mut self, raw: &RawRecord<'_>) -> Result<Option<DayTable>, Rejection> {
        match StreamHeader::parse(raw) {
            Ok(h) => {
                tracing::debug!(
                    connection_id = %h.connection_id,
                    register_id = %h.register_id,
                    suffix = %h.suffix,
                    interval_length = h.interval_length_minutes,
                    "stream header"
                );
                self.header = HeaderContext::Valid(h);
                Ok(None)
            }
            Err(reason) => {
                self.header = HeaderContext::Invalid;
                Err(Rejection::Format(reason))
            }
        }
    }

    fn on_interval_data(&mut self, raw: &RawRecord<'_>) -> Result<Option<DayTable>, Rejection> {
        let header = self.current_header()?.clone();
        let count = intervals_per_day(header.interval_length_minutes).ok_or_else(|| {
            format!(
                "interval length {} does not evenly divide a day",
                header.interval_length_minutes
            )
        })?;
        let data = IntervalData::parse(raw, count)?;

        let column = DayColumn {
            suffix: header.suffix.clone(),
            register_id: header.register_id.clone(),
            unit_of_measure: header.unit_of_measure.clone(),
            values: data.values,
            quality: vec![data.quality; count],
        };

        if let Some(table) = self
            .open
            .as_mut()
            .filter(|t| t.connection_id == header.connection_id && t.date == data.date)
        {
            if table.interval_length_minutes != header.interval_length_minutes {
                return Err(Rejection::Format(format!(
                    "interval length {} differs from the open day table's {}",
                    header.interval_length_minutes, table.interval_length_minutes
                )));
            }
            if table.column(&header.suffix).is_some() {
                return Err(Rejection::Format(format!(
                    "duplicate interval data for suffix {} on {}",
                    header.suffix, data.date
                )));
            }
            table.columns.push(column);
            self.event_target = Some(header.suffix);
            return Ok(None);
        }

        let finished = self.open.replace(DayTable {
            connection_id: header.connection_id,
            date: data.date,
            interval_length_minutes: header.interval_length_minutes,
            columns: vec![column],
        });
        self.event_target = Some(header.suffix);
        Ok(finished)
    }

    fn on_interval_event(&mut self, raw: &RawRecord<'_>) -> Result<Option<DayTable>, Rejection> {
        self.current_header()?;
        let no_context = || Rejection::Format("interval event without a preceding interval data record".to_string());

        let target = self.event_target.as_deref().ok_or_else(no_context)?;
        let table = self.open.as_mut().ok_or_else(no_context)?;
        let event = IntervalEvent::parse(raw, table.interval_count(), self.settings.event_index_base)?;
        let column = table
            .columns
            .iter_mut()
            .find(|c| c.suffix == target)
            .ok_or_else(no_context)?;

        for q in &mut column.quality[event.start..=event.end] {
            *q = event.quality.clone();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::domain::{QualityFlag, QualityMethod};
    use time::macros::date;

    fn values(n: usize, v: &str) -> String {
        vec![v; n].join(",")
    }

    fn feed_all(asm: &mut Assembler, lines: &[String]) -> (Vec<DayTable>, Vec<FormatError>) {
        let mut tables = Vec::new();
        let mut errors = Vec::new();
        for line in lines {
            let step = asm.feed(line).unwrap();
            tables.extend(step.table);
            errors.extend(step.error);
        }
        (tables, errors)
    }

    #[test]
    fn registers_sharing_connection_and_date_become_sibling_columns() {
        let mut asm = Assembler::new(ParserSettings::default());
        let lines = vec![
            "200,NMI1,E1B1,E1,E1,N1,MTR1,kWh,30,".to_string(),
            format!("300,20240101,{},A,,,,", values(48, "1")),
            "200,NMI1,E1B1,B1,B1,N1,MTR1,kWh,30,".to_string(),
            format!("300,20240101,{},A,,,,", values(48, "0.2")),
        ];
        let (tables, errors) = feed_all(&mut asm, &lines);
        assert!(tables.is_empty());
        assert!(errors.is_empty());

        let table = asm.finish().unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].suffix, "E1");
        assert_eq!(table.columns[1].suffix, "B1");
        assert_eq!(table.columns[1].values[0], Some(0.2));
    }

    #[test]
    fn new_date_finalizes_open_table() {
        let mut asm = Assembler::new(ParserSettings::default());
        let lines = vec![
            "200,NMI1,E1,E1,E1,N1,MTR1,kWh,60,".to_string(),
            format!("300,20240101,{},A", values(24, "1")),
            format!("300,20240102,{},E52", values(24, "2")),
        ];
        let (tables, _) = feed_all(&mut asm, &lines);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].date, date!(2024-01-01));
        assert_eq!(tables[0].columns[0].values.len(), 24);

        let last = asm.finish().unwrap();
        assert_eq!(last.date, date!(2024-01-02));
        assert_eq!(last.columns[0].quality[0].flag, QualityFlag::Estimated);
    }

    #[test]
    fn interval_data_before_any_stream_header_is_structural() {
        let mut asm = Assembler::new(ParserSettings::default());
        asm.feed("100,NEM12,202401150000,MDP,RETAILER").unwrap();
        let err = asm.feed(&format!("300,20240101,{},A", values(48, "1"))).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.record_type, "300");

        let mut asm = Assembler::new(ParserSettings::default());
        assert!(asm.feed("400,1,2,A").is_err());
    }

    #[test]
    fn malformed_stream_header_skips_following_data_without_aborting() {
        let mut asm = Assembler::new(ParserSettings::default());
        let lines = vec![
            "200,NMI1,E1,E1,E1,N1,MTR1,kWh,30,".to_string(),
            format!("300,20240101,{},A", values(48, "1")),
            "200,NMI2,E1,E1,E1,N1,MTR2,kWh,abc,".to_string(),
            format!("300,20240101,{},A", values(48, "1")),
            "400,0,3,S14".to_string(),
        ];
        let (tables, errors) = feed_all(&mut asm, &lines);
        assert!(tables.is_empty());
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].line, 3);
        assert_eq!(errors[1].line, 4);
        assert_eq!(asm.finish().unwrap().connection_id, "NMI1");
    }

    #[test]
    fn non_dividing_interval_length_is_a_format_error() {
        let mut asm = Assembler::new(ParserSettings::default());
        asm.feed("200,NMI1,E1,E1,E1,N1,MTR1,kWh,7,").unwrap();
        let step = asm.feed("300,20240101,1,2,3,A").unwrap();
        assert!(step.error.unwrap().reason.contains("does not evenly divide"));
        assert!(asm.finish().is_none());
    }

    #[test]
    fn event_overrides_only_the_inclusive_range_of_its_suffix() {
        let mut asm = Assembler::new(ParserSettings::default());
        let lines = vec![
            "200,NMI1,E1B1,E1,E1,N1,MTR1,kWh,30,".to_string(),
            format!("300,20240101,{},A", values(48, "1")),
            "200,NMI1,E1B1,B1,B1,N1,MTR1,kWh,30,".to_string(),
            format!("300,20240101,{},V", values(48, "1")),
            "400,10,20,S14,79,".to_string(),
            "400,30,30,E52,,".to_string(),
        ];
        let (_, errors) = feed_all(&mut asm, &lines);
        assert!(errors.is_empty());

        let table = asm.finish().unwrap();
        let e1 = table.column("E1").unwrap();
        assert!(e1.quality.iter().all(|q| q.flag == QualityFlag::Actual));

        let b1 = table.column("B1").unwrap();
        let substituted: QualityMethod = "S14".parse().unwrap();
        for (idx, q) in b1.quality.iter().enumerate() {
            match idx {
                10..=20 => assert_eq!(q, &substituted),
                30 => assert_eq!(q.flag, QualityFlag::Estimated),
                _ => assert_eq!(q.flag, QualityFlag::Variable),
            }
        }
    }

    #[test]
    fn event_without_interval_context_is_a_format_error() {
        let mut asm = Assembler::new(ParserSettings::default());
        asm.feed("200,NMI1,E1,E1,E1,N1,MTR1,kWh,30,").unwrap();
        let step = asm.feed("400,1,2,A").unwrap();
        assert!(step.error.is_some());

        asm.feed(&format!("300,20240101,{},A", values(48, "1"))).unwrap();
        asm.feed("500,O,S01,20240102,").unwrap();
        let step = asm.feed("400,1,2,S14").unwrap();
        assert!(step.error.is_some());
    }

    #[test]
    fn duplicate_suffix_and_unknown_records_are_skipped() {
        let mut asm = Assembler::new(ParserSettings::default());
        let lines = vec![
            "200,NMI1,E1,E1,E1,N1,MTR1,kWh,30,".to_string(),
            format!("300,20240101,{},A", values(48, "1")),
            format!("300,20240101,{},A", values(48, "9")),
            "250,whatever".to_string(),
        ];
        let (_, errors) = feed_all(&mut asm, &lines);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].record_type, "250");
        let table = asm.finish().unwrap();
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].values[0], Some(1.0));
    }

    #[test]
    fn lines_after_end_of_data_are_ignored() {
        let mut asm = Assembler::new(ParserSettings::default());
        asm.feed("200,NMI1,E1,E1,E1,N1,MTR1,kWh,30,").unwrap();
        asm.feed("900").unwrap();
        assert!(asm.is_finished());
        let step = asm.feed("garbage").unwrap();
        assert!(step.error.is_none());
    }
}
