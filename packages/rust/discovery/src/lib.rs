//! Restaurant discovery from the listing page.
//!
//! Fetches the configured listing URL once and extracts the candidate
//! entities that match the target labels. Any failure here is fatal to the
//! run: without a listing there is nothing to enrich.

mod parser;

use tracing::{info, instrument};

use htc_crawler::DocumentFetcher;
use htc_shared::{Entity, Result, ScrapeConfig};

pub use parser::ListingExtractor;

/// Fetch the listing page and return the matching candidates in page order.
#[instrument(skip_all, fields(listing_url = %config.listing_url))]
pub async fn discover(fetcher: &dyn DocumentFetcher, config: &ScrapeConfig) -> Result<Vec<Entity>> {
    // Compile before fetching so a bad selector fails without a request.
    let extractor = ListingExtractor::new(&config.selectors, &config.target_labels)?;

    info!(labels = ?config.target_labels, "fetching listing page");
    let html = fetcher.fetch(config.listing_url.as_str()).await?;

    let entities = extractor.extract(&html, &config.listing_url);

    info!(candidates = entities.len(), "listing parsed");
    Ok(entities)
}
