use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::PgPool;
use crate::flight_plans::{NewActualFlight, NewFlightPlan};

// Postgres caps a statement at 65535 bind parameters
const PLAN_INSERT_CHUNK: usize = 2_000;
const ACTUAL_INSERT_CHUNK: usize = 4_000;
const SID_QUERY_CHUNK: usize = 10_000;

/// Commit durability for ingest transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    Standard,
    /// Asynchronous commit and a larger sort buffer; safe to lose the tail on a crash
    Relaxed,
}

impl std::fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurabilityMode::Standard => write!(f, "standard"),
            DurabilityMode::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// Result of one atomic insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Plans actually written; plans lost to a unique-key conflict are absent
    pub inserted_plan_ids: HashSet<Uuid>,
    pub actual_flights_created: usize,
}

#[async_trait]
pub trait FlightStore: Send + Sync {
    /// Subset of `sids` already present in storage
    async fn existing_sids(&self, sids: Vec<String>) -> Result<HashSet<String>>;

    /// Insert plans and their actual flights in one transaction.
    ///
    /// Plans conflicting with an existing sid are skipped, as are actual flights
    /// whose plan was skipped.
    async fn insert_flights(
        &self,
        plans: Vec<NewFlightPlan>,
        actuals: Vec<NewActualFlight>,
    ) -> Result<InsertOutcome>;

    async fn set_durability(&self, mode: DurabilityMode) -> Result<()>;
}

#[derive(Clone)]
pub struct FlightPlanRepository {
    pool: PgPool,
    relaxed: Arc<AtomicBool>,
}

impl FlightPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            relaxed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl FlightStore for FlightPlanRepository {
    async fn existing_sids(&self, sids: Vec<String>) -> Result<HashSet<String>> {
        use crate::schema::flight_plans::dsl::*;

        if sids.is_empty() {
            return Ok(HashSet::new());
        }

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut found = HashSet::new();
            for chunk in sids.chunks(SID_QUERY_CHUNK) {
                let rows: Vec<String> = flight_plans
                    .filter(sid.eq_any(chunk))
                    .select(sid)
                    .load(&mut conn)?;
                found.extend(rows);
            }
            Ok::<_, anyhow::Error>(found)
        })
        .await?
    }

    async fn insert_flights(
        &self,
        plans: Vec<NewFlightPlan>,
        actuals: Vec<NewActualFlight>,
    ) -> Result<InsertOutcome> {
        use crate::schema::{actual_flights, flight_plans};

        if plans.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let pool = self.pool.clone();
        let relaxed = self.relaxed.load(Ordering::SeqCst);

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("Failed to get database connection")?;

            conn.transaction::<_, anyhow::Error, _>(|conn| {
                if relaxed {
                    diesel::sql_query("SET LOCAL synchronous_commit = off").execute(conn)?;
                    diesel::sql_query("SET LOCAL work_mem = '256MB'").execute(conn)?;
                }

                let mut inserted_plan_ids = HashSet::with_capacity(plans.len());
                for chunk in plans.chunks(PLAN_INSERT_CHUNK) {
                    let ids: Vec<Uuid> = diesel::insert_into(flight_plans::table)
                        .values(chunk)
                        .on_conflict_do_nothing()
                        .returning(flight_plans::id)
                        .get_results(conn)?;
                    inserted_plan_ids.extend(ids);
                }

                let actuals: Vec<NewActualFlight> = actuals
                    .into_iter()
                    .filter(|a| inserted_plan_ids.contains(&a.flight_plan_id))
                    .collect();
                let mut actual_flights_created = 0;
                for chunk in actuals.chunks(ACTUAL_INSERT_CHUNK) {
                    actual_flights_created += diesel::insert_into(actual_flights::table)
                        .values(chunk)
                        .on_conflict_do_nothing()
                        .execute(conn)?;
                }

                let skipped = plans.len() - inserted_plan_ids.len();
                if skipped > 0 {
                    debug!("{} plans skipped on sid conflict", skipped);
                }
                Ok(InsertOutcome {
                    inserted_plan_ids,
                    actual_flights_created,
                })
            })
        })
        .await?
    }

    async fn set_durability(&self, mode: DurabilityMode) -> Result<()> {
        let previous = self
            .relaxed
            .swap(mode == DurabilityMode::Relaxed, Ordering::SeqCst);
        if previous != (mode == DurabilityMode::Relaxed) {
            info!("Ingest durability set to {}", mode);
        }
        Ok(())
    }
}
