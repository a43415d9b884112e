use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinates::Point;
use crate::db::PgPool;
use crate::regions::{BoundarySet, Region, RegionIndex, RegionStore, multipolygon_from_geojson};

#[derive(QueryableByName, Debug)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct RegionRow {
    #[diesel(sql_type = sql_types::Uuid)]
    id: Uuid,
    #[diesel(sql_type = sql_types::Varchar)]
    code: String,
    #[diesel(sql_type = sql_types::Varchar)]
    name: String,
    #[diesel(sql_type = sql_types::Varchar)]
    timezone: String,
}

impl From<RegionRow> for Region {
    fn from(row: RegionRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            name: row.name,
            timezone: row.timezone,
        }
    }
}

#[derive(QueryableByName, Debug)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct RegionBoundaryRow {
    #[diesel(sql_type = sql_types::Uuid)]
    id: Uuid,
    #[diesel(sql_type = sql_types::Varchar)]
    code: String,
    #[diesel(sql_type = sql_types::Varchar)]
    name: String,
    #[diesel(sql_type = sql_types::Varchar)]
    timezone: String,
    #[diesel(sql_type = sql_types::Text)]
    geometry_geojson: String,
}

fn table_for(set: BoundarySet) -> &'static str {
    match set {
        BoundarySet::Land => "regions",
        BoundarySet::WaterInclusive => "regions_with_water",
    }
}

/// PostGIS-backed region boundaries
#[derive(Clone)]
pub struct RegionRepository {
    pool: PgPool,
}

impl RegionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load both boundary sets into memory for the duration of a run.
    ///
    /// Rows whose geometry cannot be decoded are skipped with a warning.
    pub async fn load_index(&self) -> Result<RegionIndex> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut index = RegionIndex::new();

            for set in [BoundarySet::Land, BoundarySet::WaterInclusive] {
                let rows: Vec<RegionBoundaryRow> = diesel::sql_query(format!(
                    "SELECT id, code, name, timezone, ST_AsGeoJSON(geometry)::text AS geometry_geojson FROM {}",
                    table_for(set)
                ))
                .load(&mut conn)?;

                for row in rows {
                    let geometry = serde_json::from_str::<serde_json::Value>(&row.geometry_geojson)
                        .map_err(anyhow::Error::from)
                        .and_then(|json| multipolygon_from_geojson(&json));
                    match geometry {
                        Ok(shape) => {
                            let region = Region {
                                id: row.id,
                                code: row.code,
                                name: row.name,
                                timezone: row.timezone,
                            };
                            index.add(set, region, shape);
                        }
                        Err(e) => {
                            warn!("Skipping {} boundary for region {}: {:#}", set, row.code, e);
                        }
                    }
                }
            }

            info!(
                "Loaded region index: {} land and {} water-inclusive boundaries",
                index.len(BoundarySet::Land),
                index.len(BoundarySet::WaterInclusive)
            );
            Ok::<_, anyhow::Error>(index)
        })
        .await?
    }
}

#[async_trait]
impl RegionStore for RegionRepository {
    async fn find_containing(&self, set: BoundarySet, point: Point) -> Result<Option<Region>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let row: Option<RegionRow> = diesel::sql_query(format!(
                r#"
                SELECT id, code, name, timezone
                FROM {}
                WHERE ST_Contains(geometry, ST_SetSRID(ST_MakePoint($1, $2), 4326))
                LIMIT 1
                "#,
                table_for(set)
            ))
            .bind::<sql_types::Double, _>(point.longitude)
            .bind::<sql_types::Double, _>(point.latitude)
            .get_result(&mut conn)
            .optional()?;
            Ok::<_, anyhow::Error>(row.map(Region::from))
        })
        .await?
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Region>> {
        let pool = self.pool.clone();
        let code = code.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let row: Option<RegionRow> = diesel::sql_query(
                "SELECT id, code, name, timezone FROM regions WHERE code = $1 LIMIT 1",
            )
            .bind::<sql_types::Varchar, _>(&code)
            .get_result(&mut conn)
            .optional()?;
            Ok::<_, anyhow::Error>(row.map(Region::from))
        })
        .await?
    }

    async fn region_timezones(&self) -> Result<Vec<(String, String)>> {
        use crate::schema::regions::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows: Vec<(String, String)> = regions
                .filter(timezone.ne(""))
                .select((code, timezone))
                .load(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
    }
}
