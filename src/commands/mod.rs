pub mod ingest;
pub mod migrate;

pub use ingest::handle_ingest;
pub use migrate::handle_migrate;
