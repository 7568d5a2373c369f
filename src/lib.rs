pub mod analyzers;
pub mod config;
pub mod error;
pub mod ingest;
pub mod output;
pub mod record;
pub mod report;
