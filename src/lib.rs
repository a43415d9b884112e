//! UAS flight-message ingestion
//!
//! Reads spreadsheet exports of drone flight-plan, departure and arrival
//! messages, parses them into flight records, enriches them with operator,
//! region and timezone data, and stores them in PostgreSQL/PostGIS.

pub mod bulk_writer;
pub mod coordinates;
pub mod db;
pub mod flight_plans;
pub mod flight_plans_repo;
pub mod flight_times;
pub mod ingest;
pub mod ingest_config;
pub mod message_parser;
pub mod reference_cache;
pub mod reference_data;
pub mod reference_repo;
pub mod regions;
pub mod regions_repo;
pub mod schema;
pub mod timezones;

pub use ingest::{IngestPipeline, ProcessingMode, RunSummary, ValidationStats};
pub use ingest_config::IngestConfig;
