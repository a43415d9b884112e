//! In-memory stores and fixture helpers shared by the integration tests.
#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use uuid::Uuid;

use uas_ingest::IngestPipeline;
use uas_ingest::flight_plans::{NewActualFlight, NewFlightPlan};
use uas_ingest::flight_plans_repo::{DurabilityMode, FlightStore, InsertOutcome};
use uas_ingest::ingest_config::IngestConfig;
use uas_ingest::reference_data::{
    DroneType, FlightZone, NewDroneType, NewFlightZone, NewOperator, Operator, ReferenceStore,
};
use uas_ingest::regions::{BoundarySet, Region, RegionIndex, multipolygon_from_geojson};

pub const DEP: &str = "-TITLE IDEP\n-SID 7772251137\n-ADD 250124\n-ATD 0705\n-ADEPZ 552500N0371600E";
pub const ARR: &str = "-TITLE IARR\n-SID 7772251137\n-ADA 250124\n-ATA 0850\n-ADARRZ 553000N0372000E";

/// Plan message departing from inside the test region at 07:05 UTC on 2025-01-24
pub fn plan_message(sid: &str) -> String {
    plan_message_at(sid, "5525N03716E", "5530N03720E")
}

pub fn plan_message_at(sid: &str, departure: &str, destination: &str) -> String {
    let sid_field = if sid.is_empty() {
        String::new()
    } else {
        format!(" SID/{}", sid)
    };
    format!(
        "(SHR-ZZZZZ\n-ZZZZ0705\n-M0000/M0005 /ZONA R001/\n-ZZZZ0900\n\
         -DEP/{} DEST/{} DOF/250124 OPR/ГУ МЧС РОССИИ ПО МОСКОВСКОЙ ОБЛАСТИ +79161234567 \
         REG/RF37452 TYP/BLA RMK/ВИЗУАЛЬНЫЙ ОСМОТР{})",
        departure, destination, sid_field
    )
}

/// Write a CSV export with the default `SHR`, `DEP`, `ARR` header
pub fn write_csv(rows: &[(String, String, String)]) -> NamedTempFile {
    let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    let mut writer = csv::Writer::from_path(file.path()).unwrap();
    writer.write_record(["SHR", "DEP", "ARR"]).unwrap();
    for (plan, dep, arr) in rows {
        writer.write_record([plan, dep, arr]).unwrap();
    }
    writer.flush().unwrap();
    file
}

pub fn full_row(sid: &str) -> (String, String, String) {
    (plan_message(sid), DEP.to_string(), ARR.to_string())
}

/// Small batches, two workers, no pause between streaming windows. The default
/// timezone differs from the test region's so conversions are distinguishable.
pub fn test_config() -> IngestConfig {
    IngestConfig {
        worker_count: 2,
        chunk_size: 2,
        stream_pause_ms: 0,
        default_timezone: "Asia/Yekaterinburg".to_string(),
        ..IngestConfig::default()
    }
}

#[derive(Default)]
struct FlightState {
    plans: Vec<NewFlightPlan>,
    actuals: Vec<NewActualFlight>,
    durability_changes: Vec<DurabilityMode>,
    insert_calls: usize,
    poison_sid: Option<String>,
}

/// Flight storage honouring the unique-sid rule, with failure injection
#[derive(Default)]
pub struct MemoryFlightStore {
    state: Mutex<FlightState>,
}

impl MemoryFlightStore {
    /// Fail every insert whose batch contains this sid
    pub fn poison(&self, sid: &str) {
        self.state.lock().unwrap().poison_sid = Some(sid.to_string());
    }

    pub fn plans(&self) -> Vec<NewFlightPlan> {
        self.state.lock().unwrap().plans.clone()
    }

    pub fn actuals(&self) -> Vec<NewActualFlight> {
        self.state.lock().unwrap().actuals.clone()
    }

    pub fn durability_changes(&self) -> Vec<DurabilityMode> {
        self.state.lock().unwrap().durability_changes.clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.state.lock().unwrap().insert_calls
    }
}

#[async_trait]
impl FlightStore for MemoryFlightStore {
    async fn existing_sids(&self, sids: Vec<String>) -> Result<HashSet<String>> {
        let state = self.state.lock().unwrap();
        let wanted: HashSet<String> = sids.into_iter().collect();
        Ok(state
            .plans
            .iter()
            .filter(|p| wanted.contains(&p.sid))
            .map(|p| p.sid.clone())
            .collect())
    }

    async fn insert_flights(
        &self,
        plans: Vec<NewFlightPlan>,
        actuals: Vec<NewActualFlight>,
    ) -> Result<InsertOutcome> {
        let mut state = self.state.lock().unwrap();
        state.insert_calls += 1;
        if let Some(poison) = &state.poison_sid
            && plans.iter().any(|p| &p.sid == poison)
        {
            bail!("constraint violation on sid {}", poison);
        }

        let mut outcome = InsertOutcome::default();
        for plan in plans {
            if !plan.sid.is_empty() && state.plans.iter().any(|p| p.sid == plan.sid) {
                continue;
            }
            outcome.inserted_plan_ids.insert(plan.id);
            state.plans.push(plan);
        }
        for actual in actuals {
            if outcome.inserted_plan_ids.contains(&actual.flight_plan_id) {
                outcome.actual_flights_created += 1;
                state.actuals.push(actual);
            }
        }
        Ok(outcome)
    }

    async fn set_durability(&self, mode: DurabilityMode) -> Result<()> {
        self.state.lock().unwrap().durability_changes.push(mode);
        Ok(())
    }
}

#[derive(Default)]
struct ReferenceState {
    operators: Vec<Operator>,
    drone_types: Vec<DroneType>,
    flight_zones: Vec<FlightZone>,
    fail_loads: bool,
}

#[derive(Default)]
pub struct MemoryReferenceStore {
    state: Mutex<ReferenceState>,
}

impl MemoryReferenceStore {
    pub fn fail_loads(&self) {
        self.state.lock().unwrap().fail_loads = true;
    }

    pub fn operators(&self) -> Vec<Operator> {
        self.state.lock().unwrap().operators.clone()
    }

    pub fn flight_zones(&self) -> Vec<FlightZone> {
        self.state.lock().unwrap().flight_zones.clone()
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn load_operators(&self) -> Result<Vec<Operator>> {
        let state = self.state.lock().unwrap();
        if state.fail_loads {
            bail!("reference tables unavailable");
        }
        Ok(state.operators.clone())
    }

    async fn load_drone_types(&self) -> Result<Vec<DroneType>> {
        Ok(self.state.lock().unwrap().drone_types.clone())
    }

    async fn load_flight_zones(&self) -> Result<Vec<FlightZone>> {
        Ok(self.state.lock().unwrap().flight_zones.clone())
    }

    async fn get_or_create_operator(&self, operator: NewOperator) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.operators.iter().find(|o| o.name == operator.name) {
            return Ok(existing.id);
        }
        state.operators.push(Operator {
            id: operator.id,
            name: operator.name,
            phone: operator.phone,
            organization_type: operator.organization_type,
            created_at: Utc::now(),
        });
        Ok(operator.id)
    }

    async fn get_or_create_drone_type(&self, drone_type: NewDroneType) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.drone_types.iter().find(|d| d.code == drone_type.code) {
            return Ok(existing.id);
        }
        state.drone_types.push(DroneType {
            id: drone_type.id,
            code: drone_type.code,
            name: drone_type.name,
            description: drone_type.description,
            created_at: Utc::now(),
        });
        Ok(drone_type.id)
    }

    async fn get_or_create_flight_zone(&self, zone: NewFlightZone) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.flight_zones.iter().find(|z| z.code == zone.code) {
            return Ok(existing.id);
        }
        state.flight_zones.push(FlightZone {
            id: zone.id,
            code: zone.code,
            name: zone.name,
            created_at: Utc::now(),
        });
        Ok(zone.id)
    }
}

fn region(code: &str, name: &str, timezone: &str) -> Region {
    Region {
        id: Uuid::now_v7(),
        code: code.to_string(),
        name: name.to_string(),
        timezone: timezone.to_string(),
    }
}

/// Moscow time, covering 55..56N, 37..38E
pub fn moscow_region() -> Region {
    region("77", "Москва", "Europe/Moscow")
}

/// Vladivostok time (UTC+10), covering 43..44N, 131..133E
pub fn primorye_region() -> Region {
    region("25", "Приморский край", "Asia/Vladivostok")
}

/// Land boundaries as `(region, [min_lon, min_lat, max_lon, max_lat])`
pub fn region_index(regions: &[(&Region, [f64; 4])]) -> RegionIndex {
    let mut index = RegionIndex::new();
    for (region, [min_lon, min_lat, max_lon, max_lat]) in regions {
        let geometry = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [min_lon, min_lat],
                [max_lon, min_lat],
                [max_lon, max_lat],
                [min_lon, max_lat],
                [min_lon, min_lat]
            ]]
        });
        index.add(
            BoundarySet::Land,
            (*region).clone(),
            multipolygon_from_geojson(&geometry).unwrap(),
        );
    }
    index
}

/// Stores behind one pipeline, kept around so tests can inspect what was written
pub struct Harness {
    pub flights: Arc<MemoryFlightStore>,
    pub references: Arc<MemoryReferenceStore>,
    pub regions: Arc<RegionIndex>,
    pub region: Region,
}

impl Harness {
    pub fn new() -> Self {
        let region = moscow_region();
        let index = region_index(&[(&region, [37.0, 55.0, 38.0, 56.0])]);
        Self::with_index(region, index)
    }

    /// Moscow plus a second land region seven hours further east
    pub fn with_far_east(far_east: &Region) -> Self {
        let region = moscow_region();
        let index = region_index(&[
            (&region, [37.0, 55.0, 38.0, 56.0]),
            (far_east, [131.0, 43.0, 133.0, 44.0]),
        ]);
        Self::with_index(region, index)
    }

    fn with_index(region: Region, index: RegionIndex) -> Self {
        Self {
            flights: Arc::new(MemoryFlightStore::default()),
            references: Arc::new(MemoryReferenceStore::default()),
            regions: Arc::new(index),
            region,
        }
    }

    pub fn pipeline(&self, config: IngestConfig) -> IngestPipeline {
        IngestPipeline::new(
            config,
            self.flights.clone(),
            self.references.clone(),
            self.regions.clone(),
        )
        .unwrap()
    }
}
