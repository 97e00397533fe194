use std::path::PathBuf;

use energy_domain::domain::IntervalReading;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::nem12::{decode_line, Assembler, ParserSettings};
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Streams a NEM12 file as individual interval readings.
///
/// Lines are fed to the assembler as they are read; each finalized day table
/// is flattened into one reading per register and interval. Malformed records,
/// including lines that are not valid UTF-8, are logged and skipped. An
/// interval record ahead of any stream header ends the stream with an error.
pub struct Nem12FileSource {
    path: PathBuf,
    settings: ParserSettings,
}

impl Nem12FileSource {
    pub fn new<P: Into<PathBuf>>(path: P, settings: ParserSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl Source<IntervalReading> for Nem12FileSource {
    async fn stream(&self) -> EnvelopeStream<IntervalReading> {
        let path = self.path.clone();
        let settings = self.settings.clone();
        let s = async_stream::try_stream! {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| PipelineError::Source(format!("failed to open NEM12 file {}: {e}", path.display())))?;
            let offset = settings
                .market_offset()
                .map_err(|e| PipelineError::Source(format!("invalid market UTC offset: {e}")))?;
            let mut reader = BufReader::new(file);
            let mut assembler = Assembler::new(settings);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                let n = reader
                    .read_until(b'\n', &mut buf)
                    .await
                    .map_err(|e| PipelineError::Source(format!("failed to read NEM12 line: {e}")))?;
                if n == 0 {
                    break;
                }

                let step = assembler.feed(&decode_line(&buf)).map_err(|e| {
                    metrics::counter!("nem12_structural_errors_total").increment(1);
                    PipelineError::Source(e.to_string())
                })?;

                // The assembler logs the skipped record itself.
                if step.error.is_some() {
                    metrics::counter!("nem12_format_errors_total").increment(1);
                }
                if let Some(table) = step.table {
                    let readings: Vec<IntervalReading> = table.readings(offset).collect();
                    for reading in readings {
                        yield Envelope::new(reading);
                    }
                }
                if assembler.is_finished() {
                    break;
                }
            }

            if let Some(table) = assembler.finish() {
                let readings: Vec<IntervalReading> = table.readings(offset).collect();
                for reading in readings {
                    yield Envelope::new(reading);
                }
            }
        };

        Box::pin(s)
    }
}
