//! Shared types, error model, and configuration for htc.
//!
//! This crate is the foundation depended on by all other htc crates.
//! It provides:
//! - [`HtcError`] — the unified error type
//! - Domain types ([`Entity`], [`Coordinates`], [`EnrichmentOutcome`])
//! - Configuration ([`AppConfig`], [`ScrapeConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, MAX_CONCURRENCY, ScrapeConfig, ScrapeSection, SelectorsConfig, StorageConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_db_path,
};
pub use error::{HtcError, Result};
pub use types::{Coordinates, Course, EnrichmentOutcome, Entity, EntityDetails, Meal};
