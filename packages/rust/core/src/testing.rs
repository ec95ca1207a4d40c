//! In-memory fetcher and page builders for tests.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use htc_crawler::DocumentFetcher;
use htc_shared::{HtcError, Result};

/// Serves registered pages; anything else is a 404.
///
/// Counts calls and tracks the peak number of concurrent fetches.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    pages: HashMap<String, String>,
    failures: HashSet<String>,
    panics: HashSet<String>,
    delay_ms: Option<RangeInclusive<u64>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn with_page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    /// Make `url` fail with a transport error.
    pub fn with_failure(mut self, url: &str) -> Self {
        self.failures.insert(url.to_string());
        self
    }

    /// Make fetching `url` panic.
    pub fn with_panic(mut self, url: &str) -> Self {
        self.panics.insert(url.to_string());
        self
    }

    pub fn with_random_delay(mut self, range_ms: RangeInclusive<u64>) -> Self {
        self.delay_ms = Some(range_ms);
        self
    }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(range) = &self.delay_ms {
            let delay = rand::rng().random_range(range.clone());
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(url) {
            panic!("fetcher exploded on {url}");
        }
        if self.failures.contains(url) {
            return Err(HtcError::transport(url, "connection reset"));
        }
        self.pages.get(url).cloned().ok_or(HtcError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// A detail page with the given `data-lat` / `data-lon` attributes.
pub(crate) fn detail_page(lat: Option<&str>, lon: Option<&str>) -> String {
    let lat = lat.map(|v| format!(r#" data-lat="{v}""#)).unwrap_or_default();
    let lon = lon.map(|v| format!(r#" data-lon="{v}""#)).unwrap_or_default();
    format!(
        r#"<html><body><h1>Resto</h1>
        <div class="info"><p>Du lundi au vendredi de 11h30 à 14h.</p></div>
        <div id="map"{lat}{lon}></div></body></html>"#
    )
}

/// A detail page with coordinates and a single-dish lunch menu.
pub(crate) fn menu_page(lat: &str, lon: &str, dish: &str) -> String {
    format!(
        r#"<html><body><h1>Resto</h1>
        <div class="menu"><time class="menu_date_title">Menu du lundi 13 octobre 2025</time>
        <div class="meal"><div class="meal_title">Déjeuner</div>
        <ul class="meal_foodies"><li>Plats<ul><li>{dish}</li></ul></li></ul></div></div>
        <div id="map" data-lat="{lat}" data-lon="{lon}"></div></body></html>"#
    )
}

/// A listing page with one item per `(href, name, label)`.
pub(crate) fn listing_page(items: &[(String, String, String)]) -> String {
    let lis: String = items
        .iter()
        .map(|(href, name, label)| {
            format!(
                r#"<li><a href="{href}"><div class="restaurant_title">{name}</div><span class="restaurant_area">{label}</span></a></li>"#
            )
        })
        .collect();
    format!(r#"<html><body><section class="vc_restaurants"><ul>{lis}</ul></section></body></html>"#)
}
