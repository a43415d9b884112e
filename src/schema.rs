// Geometry columns (`regions.geometry`, `regions_with_water.geometry` and the generated
// point columns on the flight tables) are only touched through raw SQL and are left
// out of the table definitions below.

diesel::table! {
    actual_flights (id) {
        id -> Uuid,
        flight_plan_id -> Uuid,
        actual_departure_date -> Nullable<Date>,
        actual_departure_time -> Nullable<Time>,
        actual_departure_latitude -> Nullable<Float8>,
        actual_departure_longitude -> Nullable<Float8>,
        actual_arrival_date -> Nullable<Date>,
        actual_arrival_time -> Nullable<Time>,
        actual_arrival_latitude -> Nullable<Float8>,
        actual_arrival_longitude -> Nullable<Float8>,
        actual_duration_minutes -> Nullable<Int4>,
        #[max_length = 20]
        flight_status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    drone_operators (id) {
        id -> Uuid,
        #[max_length = 500]
        name -> Varchar,
        #[max_length = 20]
        phone -> Varchar,
        #[max_length = 200]
        organization_type -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    drone_types (id) {
        id -> Uuid,
        #[max_length = 50]
        code -> Varchar,
        #[max_length = 200]
        name -> Varchar,
        description -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    flight_plans (id) {
        id -> Uuid,
        #[max_length = 50]
        flight_id -> Varchar,
        #[max_length = 20]
        sid -> Varchar,
        #[max_length = 50]
        reg_number -> Varchar,
        planned_date -> Date,
        planned_departure_time -> Time,
        planned_duration_minutes -> Int4,
        min_altitude -> Int4,
        max_altitude -> Int4,
        departure_latitude -> Float8,
        departure_longitude -> Float8,
        destination_latitude -> Float8,
        destination_longitude -> Float8,
        departure_region_id -> Nullable<Uuid>,
        destination_region_id -> Nullable<Uuid>,
        operator_id -> Uuid,
        drone_type_id -> Uuid,
        flight_zone_id -> Nullable<Uuid>,
        purpose -> Text,
        raw_data -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    flight_zones (id) {
        id -> Uuid,
        #[max_length = 50]
        code -> Varchar,
        #[max_length = 200]
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    regions (id) {
        id -> Uuid,
        #[max_length = 255]
        name -> Varchar,
        #[max_length = 10]
        code -> Varchar,
        #[max_length = 50]
        timezone -> Varchar,
    }
}

diesel::table! {
    regions_with_water (id) {
        id -> Uuid,
        #[max_length = 255]
        name -> Varchar,
        #[max_length = 10]
        code -> Varchar,
        #[max_length = 50]
        timezone -> Varchar,
    }
}

diesel::joinable!(actual_flights -> flight_plans (flight_plan_id));
diesel::joinable!(flight_plans -> drone_operators (operator_id));
diesel::joinable!(flight_plans -> drone_types (drone_type_id));
diesel::joinable!(flight_plans -> flight_zones (flight_zone_id));

diesel::allow_tables_to_appear_in_same_query!(
    actual_flights,
    drone_operators,
    drone_types,
    flight_plans,
    flight_zones,
    regions,
    regions_with_water,
);
