pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod model;
pub mod mqtt;
pub mod stats;
pub mod telemetry;
pub mod upload;
