use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::timezones::parse_timezone;

fn default_streaming_threshold() -> usize {
    50_000
}

fn default_chunk_size() -> usize {
    1_000
}

fn default_stream_window() -> usize {
    1_000
}

fn default_worker_count() -> usize {
    12
}

fn default_super_batch_size() -> usize {
    10_000
}

fn default_fallback_batch_size() -> usize {
    100
}

fn default_stream_pause_ms() -> u64 {
    100
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_plan_column() -> String {
    "SHR".to_string()
}

fn default_departure_column() -> String {
    "DEP".to_string()
}

fn default_arrival_column() -> String {
    "ARR".to_string()
}

/// Header names of the three message columns, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    #[serde(default = "default_plan_column")]
    pub plan: String,
    #[serde(default = "default_departure_column")]
    pub departure: String,
    #[serde(default = "default_arrival_column")]
    pub arrival: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            plan: default_plan_column(),
            departure: default_departure_column(),
            arrival: default_arrival_column(),
        }
    }
}

/// Tuning knobs for an ingest run, loaded from TOML.
///
/// ```toml
/// streaming_threshold = 50000
/// worker_count = 8
/// default_timezone = "Europe/Moscow"
///
/// [columns]
/// plan = "SHR"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Files with at least this many plan rows are processed in streaming mode
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold: usize,
    /// Rows per parsing task
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Rows read, parsed and persisted together in streaming mode
    #[serde(default = "default_stream_window")]
    pub stream_window: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_super_batch_size")]
    pub super_batch_size: usize,
    /// Sub-batch size used to retry a failed super-batch
    #[serde(default = "default_fallback_batch_size")]
    pub fallback_batch_size: usize,
    #[serde(default = "default_stream_pause_ms")]
    pub stream_pause_ms: u64,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    /// Load all region boundaries into memory instead of querying per point
    #[serde(default = "default_true")]
    pub preload_region_boundaries: bool,
    #[serde(default = "default_true")]
    pub relaxed_durability: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub columns: ColumnNames,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            stream_window: default_stream_window(),
            worker_count: default_worker_count(),
            super_batch_size: default_super_batch_size(),
            fallback_batch_size: default_fallback_batch_size(),
            stream_pause_ms: default_stream_pause_ms(),
            default_timezone: default_timezone(),
            preload_region_boundaries: true,
            relaxed_durability: true,
            pool_size: default_pool_size(),
            columns: ColumnNames::default(),
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: IngestConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("chunk_size", self.chunk_size),
            ("stream_window", self.stream_window),
            ("worker_count", self.worker_count),
            ("super_batch_size", self.super_batch_size),
            ("fallback_batch_size", self.fallback_batch_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.pool_size == 0 {
            bail!("pool_size must be greater than zero");
        }
        if self.fallback_batch_size > self.super_batch_size {
            bail!(
                "fallback_batch_size ({}) must not exceed super_batch_size ({})",
                self.fallback_batch_size,
                self.super_batch_size
            );
        }
        self.timezone()?;
        for (name, column) in [
            ("plan", &self.columns.plan),
            ("departure", &self.columns.departure),
            ("arrival", &self.columns.arrival),
        ] {
            if column.trim().is_empty() {
                bail!("{} column name must not be empty", name);
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.default_timezone)
            .with_context(|| format!("Unknown timezone '{}'", self.default_timezone))
    }

    pub fn stream_pause(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stream_pause_ms)
    }
}
