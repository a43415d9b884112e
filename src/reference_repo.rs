use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::PgPool;
use crate::reference_data::{
    DroneType, FlightZone, NewDroneType, NewFlightZone, NewOperator, Operator, ReferenceStore,
};

#[derive(Clone)]
pub struct ReferenceRepository {
    pool: PgPool,
}

impl ReferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceStore for ReferenceRepository {
    async fn load_operators(&self) -> Result<Vec<Operator>> {
        use crate::schema::drone_operators::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = drone_operators
                .select(Operator::as_select())
                .load(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
    }

    async fn load_drone_types(&self) -> Result<Vec<DroneType>> {
        use crate::schema::drone_types::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = drone_types.select(DroneType::as_select()).load(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
    }

    async fn load_flight_zones(&self) -> Result<Vec<FlightZone>> {
        use crate::schema::flight_zones::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flight_zones.select(FlightZone::as_select()).load(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
    }

    async fn get_or_create_operator(&self, operator: NewOperator) -> Result<Uuid> {
        use crate::schema::drone_operators::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let inserted: Option<Uuid> = diesel::insert_into(drone_operators)
                .values(&operator)
                .on_conflict(name)
                .do_nothing()
                .returning(id)
                .get_result(&mut conn)
                .optional()?;

            let operator_id = match inserted {
                Some(new_id) => new_id,
                None => drone_operators
                    .filter(name.eq(&operator.name))
                    .select(id)
                    .first(&mut conn)
                    .with_context(|| format!("Operator '{}' vanished after conflict", operator.name))?,
            };
            Ok::<_, anyhow::Error>(operator_id)
        })
        .await?
    }

    async fn get_or_create_drone_type(&self, drone_type: NewDroneType) -> Result<Uuid> {
        use crate::schema::drone_types::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let inserted: Option<Uuid> = diesel::insert_into(drone_types)
                .values(&drone_type)
                .on_conflict(code)
                .do_nothing()
                .returning(id)
                .get_result(&mut conn)
                .optional()?;

            let type_id = match inserted {
                Some(new_id) => new_id,
                None => drone_types
                    .filter(code.eq(&drone_type.code))
                    .select(id)
                    .first(&mut conn)?,
            };
            Ok::<_, anyhow::Error>(type_id)
        })
        .await?
    }

    async fn get_or_create_flight_zone(&self, zone: NewFlightZone) -> Result<Uuid> {
        use crate::schema::flight_zones::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let inserted: Option<Uuid> = diesel::insert_into(flight_zones)
                .values(&zone)
                .on_conflict(code)
                .do_nothing()
                .returning(id)
                .get_result(&mut conn)
                .optional()?;

            let zone_id = match inserted {
                Some(new_id) => new_id,
                None => flight_zones
                    .filter(code.eq(&zone.code))
                    .select(id)
                    .first(&mut conn)?,
            };
            Ok::<_, anyhow::Error>(zone_id)
        })
        .await?
    }
}
