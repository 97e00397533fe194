use anyhow::{bail, Context, Result};
use energy_domain::domain::IntervalReading;
use reconciliation_service::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::QuestDbIlpReadingSink,
    sources::Nem12FileSource,
    transform,
};
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

/// Stream a NEM12 file's interval readings into QuestDB over ILP.
///
/// Usage:
///   ingest_nem12 <nem12_file>
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: ingest_nem12 <nem12_file>");
    }
    let file_path = &args[1];

    // RECON_CONFIG can point to an ingest-specific file.
    let cfg = AppConfig::load()?;
    let Some(qdb) = &cfg.questdb else {
        bail!("[questdb] section with ilp_tcp_addr is required for ingestion");
    };
    let ilp_addr: SocketAddr = qdb
        .ilp_tcp_addr
        .parse()
        .with_context(|| format!("invalid questdb.ilp_tcp_addr '{}'", qdb.ilp_tcp_addr))?;

    let sink = QuestDbIlpReadingSink::new(
        ilp_addr,
        qdb.batch_size,
        qdb.max_retries,
        Duration::from_millis(qdb.retry_backoff_ms),
    );
    let counts = sink.counts();
    let source = Nem12FileSource::new(file_path, cfg.parser.clone());

    tracing::info!(file = %file_path, addr = %ilp_addr, "ingesting NEM12 file");
    let pipeline: Pipeline<_, IntervalReading, _> =
        Pipeline::new(source, sink).with_transform(Arc::new(transform::IntervalReadingValidation));
    pipeline.run().await?;

    tracing::info!(
        written = counts.written(),
        rejected = counts.rejected(),
        day_batches = counts.day_batches(),
        "ingest finished"
    );
    println!(
        "{} readings written in {} connection-day batches, {} rejected",
        counts.written(),
        counts.day_batches(),
        counts.rejected()
    );

    Ok(())
}
