use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use geo::{BoundingRect, Contains, Coord, LineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::coordinates::Point;

/// Administrative region with its IANA timezone name (may be empty)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub timezone: String,
}

/// Which boundary table a containment query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundarySet {
    /// Land-only boundaries, authoritative for region ids
    Land,
    /// Boundaries extended over territorial waters, sharing codes with `Land`
    WaterInclusive,
}

impl std::fmt::Display for BoundarySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundarySet::Land => write!(f, "land"),
            BoundarySet::WaterInclusive => write!(f, "water-inclusive"),
        }
    }
}

#[async_trait]
pub trait RegionStore: Send + Sync {
    /// Region whose boundary in `set` contains the point
    async fn find_containing(&self, set: BoundarySet, point: Point) -> Result<Option<Region>>;

    /// Land region by code
    async fn find_by_code(&self, code: &str) -> Result<Option<Region>>;

    /// `(code, timezone)` for every land region with a non-empty timezone
    async fn region_timezones(&self) -> Result<Vec<(String, String)>>;
}

struct RegionBoundary {
    region: Region,
    shape: MultiPolygon<f64>,
    bbox: Option<Rect<f64>>,
}

impl RegionBoundary {
    fn new(region: Region, shape: MultiPolygon<f64>) -> Self {
        let bbox = shape.bounding_rect();
        Self {
            region,
            shape,
            bbox,
        }
    }

    fn contains(&self, point: &geo::Point<f64>) -> bool {
        let Some(bbox) = self.bbox else {
            return false;
        };
        let (x, y) = (point.x(), point.y());
        if x < bbox.min().x || x > bbox.max().x || y < bbox.min().y || y > bbox.max().y {
            return false;
        }
        self.shape.contains(point)
    }
}

/// In-memory boundary index, preloaded once per run.
///
/// Answers the same queries as the database-backed store without a round trip per
/// point. Boundary points are not contained, matching `ST_Contains`.
#[derive(Default)]
pub struct RegionIndex {
    land: Vec<RegionBoundary>,
    water: Vec<RegionBoundary>,
}

impl RegionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, set: BoundarySet, region: Region, shape: MultiPolygon<f64>) {
        let boundary = RegionBoundary::new(region, shape);
        match set {
            BoundarySet::Land => self.land.push(boundary),
            BoundarySet::WaterInclusive => self.water.push(boundary),
        }
    }

    pub fn len(&self, set: BoundarySet) -> usize {
        match set {
            BoundarySet::Land => self.land.len(),
            BoundarySet::WaterInclusive => self.water.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.land.is_empty() && self.water.is_empty()
    }

    fn boundaries(&self, set: BoundarySet) -> &[RegionBoundary] {
        match set {
            BoundarySet::Land => &self.land,
            BoundarySet::WaterInclusive => &self.water,
        }
    }

    pub fn containing(&self, set: BoundarySet, point: Point) -> Option<&Region> {
        let point = geo::Point::new(point.longitude, point.latitude);
        self.boundaries(set)
            .iter()
            .find(|b| b.contains(&point))
            .map(|b| &b.region)
    }

    pub fn by_code(&self, code: &str) -> Option<&Region> {
        self.land.iter().map(|b| &b.region).find(|r| r.code == code)
    }
}

#[async_trait]
impl RegionStore for RegionIndex {
    async fn find_containing(&self, set: BoundarySet, point: Point) -> Result<Option<Region>> {
        Ok(self.containing(set, point).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Region>> {
        Ok(self.by_code(code).cloned())
    }

    async fn region_timezones(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .land
            .iter()
            .filter(|b| !b.region.timezone.is_empty())
            .map(|b| (b.region.code.clone(), b.region.timezone.clone()))
            .collect())
    }
}

fn ring_from_geojson(ring: &serde_json::Value) -> Result<LineString<f64>> {
    let positions = ring
        .as_array()
        .ok_or_else(|| anyhow!("ring is not an array"))?;
    let coords = positions
        .iter()
        .map(|pos| {
            let x = pos.get(0).and_then(|v| v.as_f64());
            let y = pos.get(1).and_then(|v| v.as_f64());
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(anyhow!("invalid position {}", pos)),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(LineString::new(coords))
}

fn polygon_from_geojson(rings: &serde_json::Value) -> Result<Polygon<f64>> {
    let rings = rings
        .as_array()
        .ok_or_else(|| anyhow!("polygon is not an array of rings"))?;
    let mut rings = rings.iter().map(ring_from_geojson);
    let exterior = rings
        .next()
        .ok_or_else(|| anyhow!("polygon has no exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// `Polygon` or `MultiPolygon` GeoJSON geometry (as emitted by `ST_AsGeoJSON`)
pub fn multipolygon_from_geojson(geometry: &serde_json::Value) -> Result<MultiPolygon<f64>> {
    let kind = geometry
        .get("type")
        .and_then(|t| t.as_str())
        .context("geometry has no type")?;
    let coordinates = geometry
        .get("coordinates")
        .context("geometry has no coordinates")?;

    match kind {
        "Polygon" => Ok(MultiPolygon::new(vec![polygon_from_geojson(coordinates)?])),
        "MultiPolygon" => {
            let polygons = coordinates
                .as_array()
                .context("multipolygon coordinates are not an array")?
                .iter()
                .map(polygon_from_geojson)
                .collect::<Result<Vec<_>>>()?;
            Ok(MultiPolygon::new(polygons))
        }
        other => bail!("unsupported geometry type {}", other),
    }
}

/// Point-to-region resolution with a per-run memo.
///
/// Land boundaries win; a point only inside a water-inclusive boundary maps to the
/// land region sharing its code. Store failures are logged and treated as unresolved.
pub struct RegionResolver {
    store: Arc<dyn RegionStore>,
    memo: HashMap<(u64, u64), Option<Region>>,
}

impl RegionResolver {
    pub fn new(store: Arc<dyn RegionStore>) -> Self {
        Self {
            store,
            memo: HashMap::new(),
        }
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    pub async fn resolve(&mut self, point: Point) -> Option<Region> {
        if !point.is_geocodable() {
            return None;
        }

        let key = point.cache_key();
        if let Some(cached) = self.memo.get(&key) {
            return cached.clone();
        }

        match self.lookup(point).await {
            Ok(region) => {
                if region.is_none() {
                    debug!("No region contains {}", point);
                }
                self.memo.insert(key, region.clone());
                region
            }
            Err(e) => {
                warn!("Region lookup for {} failed: {:#}", point, e);
                metrics::counter!("ingest.region_lookup_errors_total").increment(1);
                None
            }
        }
    }

    async fn lookup(&self, point: Point) -> Result<Option<Region>> {
        if let Some(region) = self.store.find_containing(BoundarySet::Land, point).await? {
            return Ok(Some(region));
        }

        let Some(water) = self
            .store
            .find_containing(BoundarySet::WaterInclusive, point)
            .await?
        else {
            return Ok(None);
        };

        let land = self.store.find_by_code(&water.code).await?;
        if land.is_none() {
            warn!(
                "Water-inclusive region {} ({}) has no land counterpart",
                water.code, water.name
            );
        }
        Ok(land)
    }
}
