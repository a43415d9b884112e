use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use uas_ingest::IngestPipeline;
use uas_ingest::db::{PgPool, run_migrations};
use uas_ingest::flight_plans_repo::FlightPlanRepository;
use uas_ingest::ingest_config::IngestConfig;
use uas_ingest::reference_repo::ReferenceRepository;
use uas_ingest::regions::{BoundarySet, RegionStore};
use uas_ingest::regions_repo::RegionRepository;

const LOGGED_ROW_ERRORS: usize = 20;

pub async fn handle_ingest(
    diesel_pool: PgPool,
    config: IngestConfig,
    file: PathBuf,
    summary_json: Option<PathBuf>,
) -> Result<()> {
    let applied = run_migrations(diesel_pool.clone()).await?;
    if applied > 0 {
        info!("Applied {} pending migrations before ingest", applied);
    }

    let region_repo = RegionRepository::new(diesel_pool.clone());
    let regions: Arc<dyn RegionStore> = if config.preload_region_boundaries {
        let index = region_repo.load_index().await?;
        info!(
            "Preloaded region boundaries: {} land, {} water-inclusive",
            index.len(BoundarySet::Land),
            index.len(BoundarySet::WaterInclusive)
        );
        Arc::new(index)
    } else {
        Arc::new(region_repo)
    };

    let pipeline = IngestPipeline::new(
        config,
        Arc::new(FlightPlanRepository::new(diesel_pool.clone())),
        Arc::new(ReferenceRepository::new(diesel_pool)),
        regions,
    )?;

    let summary = pipeline.ingest_file(&file).await?;

    if let Some(path) = summary_json {
        let out = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(out), &summary)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!("Run summary written to {}", path.display());
    }

    for message in summary.error_messages.iter().take(LOGGED_ROW_ERRORS) {
        warn!("{}", message);
    }
    if summary.error_count > LOGGED_ROW_ERRORS {
        warn!(
            "... and {} more row errors",
            summary.error_count - LOGGED_ROW_ERRORS
        );
    }
    Ok(())
}
