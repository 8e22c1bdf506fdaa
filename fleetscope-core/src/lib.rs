pub mod classifier;
pub mod collector;
pub mod common;
pub mod config;
pub mod connectors;
pub mod error;
pub mod reconciler;
pub mod snapshot_cache;
pub mod types;
