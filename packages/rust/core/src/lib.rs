//! Core orchestration for htc.
//!
//! This crate ties together discovery, detail enrichment and storage into the
//! end-to-end `scrape` workflow, and re-reads stored restaurants' menus.

pub mod aggregate;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use aggregate::{EnrichmentReport, enrich_all};
pub use pipeline::{
    MenuRefresh, ProgressReporter, ScrapeOptions, ScrapeResult, SilentProgress, refresh_menus,
    scrape,
};
