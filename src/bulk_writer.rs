use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::coordinates::Point;
use crate::flight_plans::{NewActualFlight, NewFlightPlan, ParsedActualFlight, ParsedRow};
use crate::flight_plans_repo::FlightStore;
use crate::flight_times::actual_duration;
use crate::reference_cache::ReferenceCache;
use crate::reference_data::ReferenceStore;
use crate::regions::RegionResolver;
use crate::timezones::TimezoneConverter;

/// Counts from one `save_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub created: usize,
    pub duplicates: usize,
    pub actual_flights_created: usize,
}

/// Counts from persisting a whole pass, fallback included
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub created: usize,
    pub duplicates: usize,
    pub actual_flights_created: usize,
    pub lost: usize,
    pub errors: Vec<String>,
}

impl PersistOutcome {
    fn add(&mut self, saved: SaveOutcome) {
        self.created += saved.created;
        self.duplicates += saved.duplicates;
        self.actual_flights_created += saved.actual_flights_created;
    }
}

/// Local date/time pair, or whatever part of it is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LocalStamp {
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
}

/// Single-threaded persistence path of a run.
///
/// Owns the reference cache, the region resolver and the set of sids inserted so far,
/// so duplicates are caught across batches without asking storage again.
pub struct BulkWriter {
    flights: Arc<dyn FlightStore>,
    references: Arc<dyn ReferenceStore>,
    cache: ReferenceCache,
    resolver: RegionResolver,
    timezones: TimezoneConverter,
    seen_sids: HashSet<String>,
    run_date: NaiveDate,
    super_batch_size: usize,
    fallback_batch_size: usize,
}

impl BulkWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flights: Arc<dyn FlightStore>,
        references: Arc<dyn ReferenceStore>,
        cache: ReferenceCache,
        resolver: RegionResolver,
        timezones: TimezoneConverter,
        run_date: NaiveDate,
        super_batch_size: usize,
        fallback_batch_size: usize,
    ) -> Self {
        Self {
            flights,
            references,
            cache,
            resolver,
            timezones,
            seen_sids: HashSet::new(),
            run_date,
            super_batch_size: super_batch_size.max(1),
            fallback_batch_size: fallback_batch_size.max(1),
        }
    }

    /// Persist parsed rows in super-batches.
    ///
    /// A failed super-batch is retried in small sub-batches; a sub-batch that still
    /// fails is logged and its rows are counted as lost. Never returns an error.
    pub async fn persist(&mut self, rows: &[ParsedRow]) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        let batches = rows.len().div_ceil(self.super_batch_size);

        for (index, batch) in rows.chunks(self.super_batch_size).enumerate() {
            match self.save_batch(batch).await {
                Ok(saved) => {
                    info!(
                        "Super-batch {}/{}: {} created, {} duplicates, {} actual flights",
                        index + 1,
                        batches,
                        saved.created,
                        saved.duplicates,
                        saved.actual_flights_created
                    );
                    outcome.add(saved);
                }
                Err(e) => {
                    warn!(
                        "Super-batch {}/{} ({} rows) failed, retrying in batches of {}: {:#}",
                        index + 1,
                        batches,
                        batch.len(),
                        self.fallback_batch_size,
                        e
                    );
                    metrics::counter!("ingest.super_batch_failures_total").increment(1);
                    self.persist_fallback(batch, &mut outcome).await;
                }
            }
        }
        outcome
    }

    async fn persist_fallback(&mut self, batch: &[ParsedRow], outcome: &mut PersistOutcome) {
        for sub_batch in batch.chunks(self.fallback_batch_size) {
            match self.save_batch(sub_batch).await {
                Ok(saved) => outcome.add(saved),
                Err(e) => {
                    let first = sub_batch.first().map(|r| r.row_number()).unwrap_or_default();
                    let last = sub_batch.last().map(|r| r.row_number()).unwrap_or_default();
                    error!(
                        "Dropping {} rows ({}-{}) after failed save: {:#}",
                        sub_batch.len(),
                        first,
                        last,
                        e
                    );
                    metrics::counter!("ingest.rows_lost_total").increment(sub_batch.len() as u64);
                    outcome.lost += sub_batch.len();
                    outcome
                        .errors
                        .push(format!("Rows {}-{}: failed to save: {:#}", first, last, e));
                }
            }
        }
    }

    /// Deduplicate, enrich and insert one batch atomically.
    pub async fn save_batch(&mut self, rows: &[ParsedRow]) -> Result<SaveOutcome> {
        let start = Instant::now();
        let mut outcome = SaveOutcome::default();
        if rows.is_empty() {
            return Ok(outcome);
        }

        let candidate_sids: Vec<String> = rows
            .iter()
            .map(|r| r.plan.sid.clone())
            .filter(|sid| !sid.is_empty() && !self.seen_sids.contains(sid))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let existing = self
            .flights
            .existing_sids(candidate_sids)
            .await
            .context("Failed to check existing sids")?;

        let mut batch_sids = HashSet::new();
        let mut fresh = Vec::with_capacity(rows.len());
        for row in rows {
            let sid = &row.plan.sid;
            if !sid.is_empty()
                && (existing.contains(sid)
                    || self.seen_sids.contains(sid)
                    || !batch_sids.insert(sid.clone()))
            {
                debug!("Row {}: duplicate sid {}", row.row_number(), sid);
                outcome.duplicates += 1;
                continue;
            }
            fresh.push(row);
        }

        let mut plans = Vec::with_capacity(fresh.len());
        let mut actuals = Vec::new();
        let mut sids_by_plan = HashMap::with_capacity(fresh.len());
        for row in fresh {
            let (plan, actual) = self
                .enrich(row)
                .await
                .with_context(|| format!("Failed to enrich row {}", row.row_number()))?;
            sids_by_plan.insert(plan.id, plan.sid.clone());
            plans.push(plan);
            actuals.extend(actual);
        }

        let attempted = plans.len();
        let inserted = self.flights.insert_flights(plans, actuals).await?;

        outcome.created = inserted.inserted_plan_ids.len();
        // Lost a race against a concurrent writer
        outcome.duplicates += attempted - outcome.created;
        outcome.actual_flights_created = inserted.actual_flights_created;

        for id in &inserted.inserted_plan_ids {
            if let Some(sid) = sids_by_plan.remove(id)
                && !sid.is_empty()
            {
                self.seen_sids.insert(sid);
            }
        }

        metrics::counter!("ingest.plans_created_total").increment(outcome.created as u64);
        metrics::counter!("ingest.duplicates_total").increment(outcome.duplicates as u64);
        metrics::histogram!("ingest.batch_save_ms").record(start.elapsed().as_millis() as f64);
        Ok(outcome)
    }

    /// Reference ids, regions and regional times for one row.
    async fn enrich(&mut self, row: &ParsedRow) -> Result<(NewFlightPlan, Option<NewActualFlight>)> {
        let plan = &row.plan;
        let references = self.references.clone();

        let operator_id = self.cache.operator_id(references.as_ref(), &plan.operator_info).await?;
        let drone_type_id = self.cache.drone_type_id(references.as_ref(), &plan.drone_type).await?;
        let flight_zone_id = if plan.zone_code.trim().is_empty() {
            None
        } else {
            Some(self.cache.flight_zone_id(references.as_ref(), &plan.zone_code).await?)
        };

        let departure_region = self.resolver.resolve(plan.departure_point).await;
        let destination_region = self.resolver.resolve(plan.destination_point).await;
        let departure_code = departure_region.as_ref().map(|r| r.code.clone());
        let arrival_code = destination_region
            .as_ref()
            .map(|r| r.code.clone())
            .or_else(|| departure_code.clone());
        // Planned times belong to the departure side
        let region_code = departure_code.clone().or_else(|| arrival_code.clone());

        let planned_date = plan.planned_date.unwrap_or(self.run_date);
        let (planned_date, planned_time) = match plan.departure_time_utc {
            Some(time) => {
                let local = self
                    .to_regional(planned_date.and_time(time), region_code.as_deref())
                    .await;
                (local.date(), local.time())
            }
            None => (planned_date, NaiveTime::MIN),
        };

        let now = Utc::now();
        let new_plan = NewFlightPlan {
            id: Uuid::now_v7(),
            flight_id: plan.flight_id.clone(),
            sid: plan.sid.clone(),
            reg_number: plan.reg_number.clone(),
            planned_date,
            planned_departure_time: planned_time,
            planned_duration_minutes: plan.planned_duration.num_minutes() as i32,
            min_altitude: plan.min_altitude,
            max_altitude: plan.max_altitude,
            departure_latitude: plan.departure_point.latitude,
            departure_longitude: plan.departure_point.longitude,
            destination_latitude: plan.destination_point.latitude,
            destination_longitude: plan.destination_point.longitude,
            departure_region_id: departure_region.as_ref().map(|r| r.id),
            destination_region_id: destination_region.as_ref().map(|r| r.id),
            operator_id,
            drone_type_id,
            flight_zone_id,
            purpose: plan.purpose.clone(),
            raw_data: row.raw.audit_json(),
            created_at: now,
        };

        let new_actual = match &row.actual {
            Some(actual) => Some(
                self.build_actual(
                    &new_plan,
                    row,
                    actual,
                    departure_code.as_deref(),
                    arrival_code.as_deref(),
                )
                .await,
            ),
            None => None,
        };

        Ok((new_plan, new_actual))
    }

    async fn build_actual(
        &mut self,
        plan: &NewFlightPlan,
        row: &ParsedRow,
        actual: &ParsedActualFlight,
        departure_code: Option<&str>,
        arrival_code: Option<&str>,
    ) -> NewActualFlight {
        let departure_utc = actual
            .departure_date
            .zip(actual.departure_time)
            .map(|(d, t)| d.and_time(t));
        let arrival_utc = actual
            .arrival_date
            .zip(actual.arrival_time)
            .map(|(d, t)| d.and_time(t));

        let duration = match (departure_utc, arrival_utc) {
            (Some(dep), Some(arr)) => actual_duration(dep, arr),
            _ => None,
        };

        let departure = self
            .local_stamp(departure_utc, actual.departure_date, actual.departure_time, departure_code)
            .await;
        let arrival = self
            .local_stamp(arrival_utc, actual.arrival_date, actual.arrival_time, arrival_code)
            .await;

        let departure_point =
            actual.departure_point.or_else(|| geocodable(row.plan.departure_point));
        let arrival_point = actual.arrival_point.or_else(|| geocodable(row.plan.destination_point));

        NewActualFlight {
            id: Uuid::now_v7(),
            flight_plan_id: plan.id,
            actual_departure_date: departure.date,
            actual_departure_time: departure.time,
            actual_departure_latitude: departure_point.map(|p| p.latitude),
            actual_departure_longitude: departure_point.map(|p| p.longitude),
            actual_arrival_date: arrival.date,
            actual_arrival_time: arrival.time,
            actual_arrival_latitude: arrival_point.map(|p| p.latitude),
            actual_arrival_longitude: arrival_point.map(|p| p.longitude),
            actual_duration_minutes: duration.map(|d| d.num_minutes() as i32),
            flight_status: actual.status().to_string(),
            created_at: plan.created_at,
        }
    }

    /// Full timestamps are shifted to regional time; partial ones are kept as given.
    async fn local_stamp(
        &mut self,
        utc: Option<NaiveDateTime>,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
        region_code: Option<&str>,
    ) -> LocalStamp {
        match utc {
            Some(utc) => {
                let local = self.to_regional(utc, region_code).await;
                LocalStamp {
                    date: Some(local.date()),
                    time: Some(local.time()),
                }
            }
            None => LocalStamp { date, time },
        }
    }

    async fn to_regional(&mut self, utc: NaiveDateTime, region_code: Option<&str>) -> NaiveDateTime {
        self.timezones
            .to_regional(&mut self.cache, utc, region_code)
            .await
    }
}

fn geocodable(point: Point) -> Option<Point> {
    point.is_geocodable().then_some(point)
}
