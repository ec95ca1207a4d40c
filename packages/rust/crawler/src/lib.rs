//! Document fetching and detail-page enrichment.
//!
//! This crate provides:
//! - [`fetch`] — the [`DocumentFetcher`] seam and its `reqwest` implementation
//! - [`detail`] — the per-entity enrichment task, attribute and menu extraction

pub mod detail;
pub mod fetch;

pub use detail::{
    DetailExtractor, MenuExtractor, compile, element_text, enrich, parse_hours, parse_menu_date,
};
pub use fetch::{DocumentFetcher, HttpFetcher};
