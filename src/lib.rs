pub mod aggregate;
pub mod config;
pub mod constants;
#[cfg(feature = "db")]
pub mod db;
pub mod derive;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod upload;
