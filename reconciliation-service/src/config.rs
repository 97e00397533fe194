use std::{fs, path::Path};

use anyhow::Context;
use energy_domain::domain::{all_weekdays, Tariff, Thresholds, TimeOfUsePeriod};
use serde::Deserialize;
use time::Weekday;

use crate::nem12::ParserSettings;

const DEFAULT_CONFIG_PATH: &str = "recon-config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDbConfig {
    pub ilp_tcp_addr: String,
    /// Upper bound on readings per write. A connection-day larger than this
    /// is split across writes.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Weekday peak 07:00-22:00, everything else off-peak.
fn default_periods() -> Vec<TimeOfUsePeriod> {
    let weekdays = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
    ];
    vec![
        TimeOfUsePeriod::new("peak", 7 * 60, 22 * 60, &weekdays),
        TimeOfUsePeriod::new("off_peak", 0, 24 * 60, &all_weekdays()),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub parser: ParserSettings,
    pub reconciliation: Thresholds,
    /// Checked in order; an interval goes to the first period that contains it.
    pub periods: Vec<TimeOfUsePeriod>,
    pub questdb: Option<QuestDbConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            parser: ParserSettings::default(),
            reconciliation: Thresholds::default(),
            periods: default_periods(),
            questdb: None,
        }
    }
}

impl AppConfig {
    /// Load from `RECON_CONFIG`, or `recon-config.toml` in the working
    /// directory. Without either, built-in defaults apply.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        match env::var("RECON_CONFIG") {
            Ok(path) => Self::from_path(&path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_path(DEFAULT_CONFIG_PATH),
            Err(_) => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.reconciliation.match_percent > cfg.reconciliation.minor_percent {
            anyhow::bail!(
                "reconciliation.match_percent ({}) exceeds minor_percent ({})",
                cfg.reconciliation.match_percent,
                cfg.reconciliation.minor_percent
            );
        }
        if cfg.parser.event_index_base > 1 {
            anyhow::bail!("parser.event_index_base must be 0 or 1");
        }
        if !(-12..=14).contains(&cfg.parser.market_utc_offset_hours) {
            anyhow::bail!(
                "parser.market_utc_offset_hours ({}) must be between -12 and 14",
                cfg.parser.market_utc_offset_hours
            );
        }
        Ok(cfg)
    }
}

pub fn load_tariff(path: impl AsRef<Path>) -> anyhow::Result<Tariff> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read tariff {}", path.display()))?;
    Tariff::from_toml_str(&contents).with_context(|| format!("invalid tariff {}", path.display()))
}
