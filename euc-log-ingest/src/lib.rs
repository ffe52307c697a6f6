pub mod auth;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod emit;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metric;
pub mod metrics_constants;
pub mod metrics_utils;
pub mod parse;
pub mod select;
pub mod source;
