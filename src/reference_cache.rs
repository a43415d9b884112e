use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::flight_plans::DEFAULT_DRONE_TYPE;
use crate::reference_data::{
    NewDroneType, NewFlightZone, NewOperator, ReferenceStore, normalize_operator_name,
    normalize_zone_code, operator_key,
};
use crate::regions::RegionStore;
use crate::timezones::parse_timezone;

/// Per-run lookup tables for reference entities and region timezones.
///
/// Owned by the single persistence path; parsing workers never see it.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    operators: HashMap<String, Uuid>,
    drone_types: HashMap<String, Uuid>,
    flight_zones: HashMap<String, Uuid>,
    timezones: HashMap<String, Tz>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
    pub operators: usize,
    pub drone_types: usize,
    pub flight_zones: usize,
    pub timezones: usize,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload everything the stores already know about.
    pub async fn load(
        references: &dyn ReferenceStore,
        regions: &dyn RegionStore,
        default_timezone: Tz,
    ) -> Result<Self> {
        let mut cache = Self::new();

        for operator in references
            .load_operators()
            .await
            .context("Failed to load operators")?
        {
            cache.operators.insert(operator_key(&operator.name), operator.id);
        }
        for drone_type in references
            .load_drone_types()
            .await
            .context("Failed to load drone types")?
        {
            cache.drone_types.insert(drone_type.code, drone_type.id);
        }
        for zone in references
            .load_flight_zones()
            .await
            .context("Failed to load flight zones")?
        {
            cache.flight_zones.insert(zone.code, zone.id);
        }
        for (code, name) in regions
            .region_timezones()
            .await
            .context("Failed to load region timezones")?
        {
            let tz = parse_timezone(&name).unwrap_or_else(|| {
                warn!(
                    "Region {} has unusable timezone '{}', using {}",
                    code, name, default_timezone
                );
                default_timezone
            });
            cache.timezones.insert(code, tz);
        }

        let sizes = cache.sizes();
        info!(
            "Reference cache loaded: {} operators, {} drone types, {} zones, {} region timezones",
            sizes.operators, sizes.drone_types, sizes.flight_zones, sizes.timezones
        );
        Ok(cache)
    }

    pub fn sizes(&self) -> CacheSizes {
        CacheSizes {
            operators: self.operators.len(),
            drone_types: self.drone_types.len(),
            flight_zones: self.flight_zones.len(),
            timezones: self.timezones.len(),
        }
    }

    pub fn lookup_operator(&self, description: &str) -> Option<Uuid> {
        let key = operator_key(&normalize_operator_name(description));
        self.operators.get(&key).copied()
    }

    pub fn lookup_drone_type(&self, code: &str) -> Option<Uuid> {
        self.drone_types.get(drone_type_code(code)).copied()
    }

    pub fn lookup_flight_zone(&self, code: &str) -> Option<Uuid> {
        self.flight_zones.get(&normalize_zone_code(code)).copied()
    }

    /// Operator id for a free-text description, creating the operator on first sight
    pub async fn operator_id(
        &mut self,
        store: &dyn ReferenceStore,
        description: &str,
    ) -> Result<Uuid> {
        if let Some(id) = self.lookup_operator(description) {
            return Ok(id);
        }

        let operator = NewOperator::from_description(description);
        let key = operator_key(&operator.name);
        let name = operator.name.clone();
        let id = store
            .get_or_create_operator(operator)
            .await
            .with_context(|| format!("Failed to create operator '{}'", name))?;
        self.operators.insert(key, id);
        Ok(id)
    }

    /// Drone type id for a code; an empty code means the default type
    pub async fn drone_type_id(&mut self, store: &dyn ReferenceStore, code: &str) -> Result<Uuid> {
        if let Some(id) = self.lookup_drone_type(code) {
            return Ok(id);
        }

        let code = drone_type_code(code);

        let id = store
            .get_or_create_drone_type(NewDroneType::from_code(code))
            .await
            .with_context(|| format!("Failed to create drone type {}", code))?;
        self.drone_types.insert(code.to_string(), id);
        Ok(id)
    }

    pub async fn flight_zone_id(&mut self, store: &dyn ReferenceStore, code: &str) -> Result<Uuid> {
        if let Some(id) = self.lookup_flight_zone(code) {
            return Ok(id);
        }

        let code = normalize_zone_code(code);

        let id = store
            .get_or_create_flight_zone(NewFlightZone::from_code(&code))
            .await
            .with_context(|| format!("Failed to create flight zone {}", code))?;
        self.flight_zones.insert(code, id);
        Ok(id)
    }

    pub fn timezone(&self, region_code: &str) -> Option<Tz> {
        self.timezones.get(region_code).copied()
    }

    pub fn insert_timezone(&mut self, region_code: &str, tz: Tz) {
        self.timezones.insert(region_code.to_string(), tz);
    }
}

fn drone_type_code(code: &str) -> &str {
    let code = code.trim();
    if code.is_empty() { DEFAULT_DRONE_TYPE } else { code }
}
