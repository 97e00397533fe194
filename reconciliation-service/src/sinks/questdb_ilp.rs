//! Interval readings to QuestDB over the InfluxDB line protocol (ILP/TCP).

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use energy_domain::domain::IntervalReading;
use futures::StreamExt;
use time::Date;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Backslash-escape commas, spaces and equals in ILP identifiers and tag values.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field_sep(out: &mut String, first: &mut bool, key: &str) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }
    ilp_escape_ident(key, out);
    out.push('=');
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    push_field_sep(out, first, key);
    out.push_str(&value.to_string());
}

/// ILP integers carry an `i` suffix.
fn push_field_i64(out: &mut String, first: &mut bool, key: &str, value: i64) {
    push_field_sep(out, first, key);
    out.push_str(&value.to_string());
    out.push('i');
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_f64(hasher: &mut blake3::Hasher, v: Option<f64>) {
    match v {
        Some(x) => {
            hasher.update(&[1]);
            hasher.update(&x.to_bits().to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// The same register, interval, value and quality always hash to the same id.
fn event_id_reading(r: &IntervalReading) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&r.start.unix_timestamp_nanos().to_le_bytes());
    hash_str(&mut h, &r.connection_id);
    hash_str(&mut h, &r.register_id);
    hash_str(&mut h, &r.suffix);
    h.update(&r.interval_length_minutes.to_le_bytes());
    hash_opt_f64(&mut h, r.energy);
    hash_str(&mut h, &r.quality.to_string());
    h.finalize().to_hex().to_string()
}

/// One `interval_reading` line, without the trailing newline.
pub fn write_ilp_line(reading: &IntervalReading, out: &mut String) {
    out.push_str("interval_reading");

    // tags (SYMBOL columns)
    push_tag(out, "event_id", &event_id_reading(reading));
    push_tag(out, "connection_id", &reading.connection_id);
    push_tag(out, "register_id", &reading.register_id);
    push_tag(out, "suffix", &reading.suffix);
    push_tag(out, "unit", &reading.unit_of_measure);
    let mut flag = [0u8; 4];
    push_tag(out, "quality_flag", reading.quality.flag.code().encode_utf8(&mut flag));
    if let Some(method) = &reading.quality.method {
        push_tag(out, "quality_method", method);
    }

    // fields; unknown readings carry only their index
    out.push(' ');
    let mut first = true;
    if let Some(energy) = reading.energy {
        push_field_f64(out, &mut first, "energy", energy);
    }
    push_field_i64(out, &mut first, "interval_index", reading.interval_index as i64);

    out.push(' ');
    out.push_str(&reading.start.unix_timestamp_nanos().to_string());
}

/// Running totals for one ingest. Shared with the caller through
/// [`QuestDbIlpReadingSink::counts`] since the pipeline consumes the sink.
#[derive(Debug, Default)]
pub struct IngestCounts {
    written: AtomicU64,
    rejected: AtomicU64,
    day_batches: AtomicU64,
}

impl IngestCounts {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Readings a transform refused; they were never sent.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Connection-days written, counting a split day once per write.
    pub fn day_batches(&self) -> u64 {
        self.day_batches.load(Ordering::Relaxed)
    }
}

/// Readings waiting to be written, all for one connection and date.
#[derive(Default)]
struct DayBatch {
    key: Option<(String, Date)>,
    lines: String,
    readings: u64,
    oldest: Option<SystemTime>,
}

impl DayBatch {
    fn belongs(&self, reading: &IntervalReading) -> bool {
        match &self.key {
            Some((connection_id, date)) => *connection_id == reading.connection_id && *date == reading.date,
            None => true,
        }
    }

    fn push(&mut self, env: &Envelope<IntervalReading>) {
        if self.key.is_none() {
            self.key = Some((env.payload.connection_id.clone(), env.payload.date));
        }
        write_ilp_line(&env.payload, &mut self.lines);
        self.lines.push('\n');
        self.readings += 1;
        self.oldest = Some(self.oldest.map_or(env.received_at, |t| t.min(env.received_at)));
    }

    fn take(&mut self) -> DayBatch {
        std::mem::take(self)
    }
}

/// Writes interval readings to QuestDB, one write per connection-day.
///
/// NEM12 readings arrive grouped by day table, so consecutive readings with
/// the same connection and date are sent together; `max_batch` caps a single
/// write. The TCP connection opens on the first write and is re-established
/// between retries.
///
/// Transform rejections are counted and skipped. Any other upstream error
/// fails the run once, without writing the partially collected day.
pub struct QuestDbIlpReadingSink {
    addr: SocketAddr,
    max_batch: u64,
    max_retries: u32,
    retry_backoff: Duration,
    counts: Arc<IngestCounts>,
}

impl QuestDbIlpReadingSink {
    pub fn new(addr: SocketAddr, max_batch: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            addr,
            max_batch: max_batch.max(1) as u64,
            max_retries,
            retry_backoff,
            counts: Arc::default(),
        }
    }

    pub fn counts(&self) -> Arc<IngestCounts> {
        self.counts.clone()
    }

    async fn write_once(&self, conn: Option<TcpStream>, payload: &[u8]) -> std::io::Result<TcpStream> {
        let mut stream = match conn {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(self.addr).await?;
                stream.set_nodelay(true)?;
                stream
            }
        };
        stream.write_all(payload).await?;
        Ok(stream)
    }

    async fn write_day(&self, conn: &mut Option<TcpStream>, batch: DayBatch) -> Result<(), PipelineError> {
        let Some((connection_id, date)) = &batch.key else {
            return Ok(());
        };
        let payload = batch.lines.as_bytes();

        let mut attempt: u32 = 0;
        loop {
            match self.write_once(conn.take(), payload).await {
                Ok(stream) => {
                    *conn = Some(stream);
                    break;
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        connection_id = %connection_id,
                        date = %date,
                        "ILP write failed, reconnecting"
                    );
                    metrics::counter!("questdb_ilp_retry_total").increment(1);
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    metrics::counter!("questdb_ilp_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(format!(
                        "ILP write for {connection_id} on {date} failed after {} attempts: {e}",
                        attempt + 1
                    )));
                }
            }
        }

        self.counts.written.fetch_add(batch.readings, Ordering::Relaxed);
        self.counts.day_batches.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("interval_readings_written_total").increment(batch.readings);
        metrics::counter!("questdb_ilp_bytes_total").increment(payload.len() as u64);
        if let Some(oldest) = batch.oldest {
            if let Ok(dur) = SystemTime::now().duration_since(oldest) {
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
            }
        }
        tracing::debug!(connection_id = %connection_id, date = %date, readings = batch.readings, "day written");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink<IntervalReading> for QuestDbIlpReadingSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<IntervalReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut conn: Option<TcpStream> = None;
        let mut batch = DayBatch::default();

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(PipelineError::Transform(reason)) => {
                    self.counts.rejected.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("interval_readings_rejected_total").increment(1);
                    tracing::warn!(reason = %reason, "interval reading rejected");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "ingest aborted");
                    return Err(e);
                }
            };

            if !batch.belongs(&env.payload) || batch.readings >= self.max_batch {
                self.write_day(&mut conn, batch.take()).await?;
            }
            batch.push(&env);
        }
        self.write_day(&mut conn, batch.take()).await?;

        if let Some(mut stream) = conn {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}
