//! Whole-file ingest runs.
//!
//! A run counts the plan rows, picks standard or streaming mode from that count,
//! parses rows on the worker pool and hands parsed rows to the [`BulkWriter`].
//! Row-level problems end up in the [`RunSummary`]; only file-level failures are
//! returned as errors.

pub mod sheet;
pub mod summary;
pub mod workers;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::bulk_writer::{BulkWriter, PersistOutcome};
use crate::flight_plans::{ParsedRow, RawRecord};
use crate::flight_plans_repo::{DurabilityMode, FlightStore};
use crate::ingest_config::IngestConfig;
use crate::reference_cache::ReferenceCache;
use crate::reference_data::ReferenceStore;
use crate::regions::{RegionResolver, RegionStore};
use crate::timezones::TimezoneConverter;

pub use summary::{ProcessingMode, RunSummary, ValidationStats};
use workers::{ChunkOutcome, ParserPool};

pub struct IngestPipeline {
    config: IngestConfig,
    flights: Arc<dyn FlightStore>,
    references: Arc<dyn ReferenceStore>,
    regions: Arc<dyn RegionStore>,
    parser: Arc<ParserPool>,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        flights: Arc<dyn FlightStore>,
        references: Arc<dyn ReferenceStore>,
        regions: Arc<dyn RegionStore>,
    ) -> Result<Self> {
        config.validate()?;
        let parser = ParserPool::new(config.worker_count, config.chunk_size)?;
        Ok(Self {
            config,
            flights,
            references,
            regions,
            parser: Arc::new(parser),
        })
    }

    pub fn select_mode(&self, total_rows: usize) -> ProcessingMode {
        if total_rows < self.config.streaming_threshold {
            ProcessingMode::Standard
        } else {
            ProcessingMode::Streaming
        }
    }

    /// Ingest one spreadsheet export.
    ///
    /// Durability is relaxed for the duration of the run and restored before
    /// returning, whether the run succeeded or not.
    pub async fn ingest_file(&self, path: &Path) -> Result<RunSummary> {
        let start = Instant::now();

        let total_rows = {
            let owned = path.to_path_buf();
            let columns = self.config.columns.clone();
            tokio::task::spawn_blocking(move || sheet::count_plan_rows(&owned, &columns)).await?
        }
        .with_context(|| format!("Failed to count rows in {}", path.display()))?;
        let mode = self.select_mode(total_rows);
        info!(
            "Ingesting {}: {} plan rows, {} mode",
            path.display(),
            total_rows,
            mode
        );

        let relaxed = self.config.relaxed_durability;
        if relaxed {
            self.flights
                .set_durability(DurabilityMode::Relaxed)
                .await
                .context("Failed to relax durability")?;
        }

        let result = self.run(path, mode, total_rows).await;

        if relaxed && let Err(e) = self.flights.set_durability(DurabilityMode::Standard).await {
            error!("Failed to restore durability: {:#}", e);
        }

        let mut summary = result?;
        summary.duration_secs = start.elapsed().as_secs_f64();
        metrics::histogram!("ingest.run_duration_seconds").record(summary.duration_secs);
        info!(
            "Ingest of {} finished in {:.1}s: {} processed, {} created, {} actual flights, {} skipped, {} duplicates, {} lost",
            path.display(),
            summary.duration_secs,
            summary.processed,
            summary.created,
            summary.actual_flights_created,
            summary.skipped,
            summary.duplicates,
            summary.lost
        );
        Ok(summary)
    }

    async fn run(&self, path: &Path, mode: ProcessingMode, total_rows: usize) -> Result<RunSummary> {
        let mut summary = RunSummary::new(mode, total_rows);
        let mut writer = self.build_writer().await?;
        let run_stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

        match mode {
            ProcessingMode::Standard => {
                self.run_standard(path, &run_stamp, &mut writer, &mut summary)
                    .await?
            }
            ProcessingMode::Streaming => {
                self.run_streaming(path, &run_stamp, &mut writer, &mut summary)
                    .await?
            }
        }
        Ok(summary)
    }

    async fn build_writer(&self) -> Result<BulkWriter> {
        let default_timezone = self.config.timezone()?;
        let cache = ReferenceCache::load(
            self.references.as_ref(),
            self.regions.as_ref(),
            default_timezone,
        )
        .await?;
        let run_date = Utc::now().with_timezone(&default_timezone).date_naive();

        Ok(BulkWriter::new(
            self.flights.clone(),
            self.references.clone(),
            cache,
            RegionResolver::new(self.regions.clone()),
            TimezoneConverter::new(default_timezone, self.regions.clone()),
            run_date,
            self.config.super_batch_size,
            self.config.fallback_batch_size,
        ))
    }

    async fn run_standard(
        &self,
        path: &Path,
        run_stamp: &str,
        writer: &mut BulkWriter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let records = {
            let owned = path.to_path_buf();
            let columns = self.config.columns.clone();
            tokio::task::spawn_blocking(move || sheet::read_all(&owned, &columns)).await?
        }
        .with_context(|| format!("Failed to read {}", path.display()))?;
        info!("Loaded {} rows", records.len());

        let parsed = self.parse(records, run_stamp).await?;
        let rows = apply_parse(summary, parsed);
        let persisted = writer.persist(&rows).await;
        apply_persist(summary, persisted);
        Ok(())
    }

    async fn run_streaming(
        &self,
        path: &Path,
        run_stamp: &str,
        writer: &mut BulkWriter,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut feed = {
            let owned = path.to_path_buf();
            let columns = self.config.columns.clone();
            tokio::task::spawn_blocking(move || sheet::open_feed(&owned, &columns)).await?
        }
        .with_context(|| format!("Failed to open {}", path.display()))?;

        let window_size = self.config.stream_window;
        let mut window_index = 0usize;
        let mut seen = 0usize;
        loop {
            let (returned, window) = tokio::task::spawn_blocking(move || {
                let window = feed.next_window(window_size);
                (feed, window)
            })
            .await?;
            feed = returned;
            let window = window.context("Failed to read rows")?;
            if window.is_empty() {
                break;
            }

            window_index += 1;
            seen += window.len();
            let parsed = self.parse(window, run_stamp).await?;
            let rows = apply_parse(summary, parsed);
            let persisted = writer.persist(&rows).await;
            apply_persist(summary, persisted);

            info!(
                "Window {}: {}/{} rows read, {} created so far",
                window_index, seen, summary.total_rows, summary.created
            );
            tokio::time::sleep(self.config.stream_pause()).await;
        }
        Ok(())
    }

    async fn parse(
        &self,
        records: Vec<RawRecord>,
        run_stamp: &str,
    ) -> Result<ChunkOutcome> {
        let parser = self.parser.clone();
        let stamp = run_stamp.to_string();
        let outcome = tokio::task::spawn_blocking(move || parser.parse_all(records, &stamp))
            .await
            .context("Parser pool task failed")?;
        Ok(outcome)
    }
}

fn apply_parse(summary: &mut RunSummary, parsed: ChunkOutcome) -> Vec<ParsedRow> {
    for (row_number, rejection) in &parsed.rejections {
        summary.reject_row(*row_number, *rejection);
    }
    if !parsed.rejections.is_empty() {
        metrics::counter!("ingest.rows_rejected_total").increment(parsed.rejections.len() as u64);
    }
    summary.processed += parsed.rows.len();
    summary.validation_stats.merge(&parsed.stats);
    parsed.rows
}

fn apply_persist(summary: &mut RunSummary, persisted: PersistOutcome) {
    summary.created += persisted.created;
    summary.duplicates += persisted.duplicates;
    summary.actual_flights_created += persisted.actual_flights_created;
    summary.lost += persisted.lost;
    if persisted.lost > 0 {
        warn!("{} rows lost in this pass", persisted.lost);
    }
    for message in persisted.errors {
        summary.push_error(message);
    }
}
