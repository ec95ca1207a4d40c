//! Listing-page parser.
//!
//! Turns the listing HTML into candidate [`Entity`] values. Pure: no network,
//! no shared state.

use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use htc_crawler::{compile, element_text};
use htc_shared::{Entity, Result, SelectorsConfig};

/// Compiled listing selectors plus the label filter.
#[derive(Debug)]
pub struct ListingExtractor {
    item: Selector,
    name: Selector,
    label: Selector,
    target_labels: Vec<String>,
}

impl ListingExtractor {
    /// Compile the listing selectors. Blank target labels are ignored.
    pub fn new(selectors: &SelectorsConfig, target_labels: &[String]) -> Result<Self> {
        Ok(Self {
            item: compile(&selectors.item)?,
            name: compile(&selectors.name)?,
            label: compile(&selectors.label)?,
            target_labels: target_labels
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        })
    }

    /// Extract matching entities from `html` in document order.
    ///
    /// An item is kept iff its label equals one of the target labels and its
    /// name is non-empty. Relative links are resolved against `base`.
    pub fn extract(&self, html: &str, base: &Url) -> Vec<Entity> {
        let doc = Html::parse_document(html);
        let mut entities = Vec::new();

        for item in doc.select(&self.item) {
            let Some(label) = item.select(&self.label).next().map(element_text) else {
                debug!("item without label, skipping");
                continue;
            };
            if !self.target_labels.iter().any(|t| *t == label) {
                continue;
            }

            let name = item
                .select(&self.name)
                .next()
                .map(element_text)
                .unwrap_or_default();
            if name.is_empty() {
                debug!(%label, "item without name, skipping");
                continue;
            }

            let href = item.value().attr("href").map(str::trim).unwrap_or_default();
            if href.is_empty() {
                warn!(%name, "item without link, skipping");
                continue;
            }

            let url = match base.join(href) {
                Ok(url) => url,
                Err(e) => {
                    warn!(%name, href, error = %e, "unresolvable link, skipping");
                    continue;
                }
            };

            entities.push(Entity::candidate(url.to_string(), name, label));
        }

        entities
    }
}
