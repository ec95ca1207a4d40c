//! End-to-end `scrape` pipeline: listing → discovery → enrichment → storage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use htc_crawler::{DetailExtractor, DocumentFetcher};
use htc_shared::{Entity, Result, ScrapeConfig};
use htc_storage::Storage;

use crate::aggregate::{EnrichmentReport, enrich_all};

/// Options for one `scrape` run.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Delete stored entities before saving the new ones.
    pub replace: bool,
}

/// Result of the `scrape` pipeline.
#[derive(Debug)]
pub struct ScrapeResult {
    /// Enriched entities in listing order.
    pub entities: Vec<Entity>,
    /// Fan-out counters.
    pub report: EnrichmentReport,
    /// Scrape run ID, when a storage handle was given.
    pub run_id: Option<String>,
    /// Entities written to storage.
    pub persisted: usize,
    /// Storage failures (URL, error message).
    pub persist_errors: Vec<(String, String)>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called each time an enrichment outcome is joined.
    fn entity_enriched(&self, url: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &ScrapeResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn entity_enriched(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &ScrapeResult) {}
}

/// Run the full `scrape` pipeline.
///
/// 1. Discovery: fetch the listing and filter candidates (fatal on failure)
/// 2. Enrichment: fan out one detail fetch per candidate
/// 3. Storage: upsert every entity (skipped when `storage` is `None`)
#[instrument(skip_all, fields(listing_url = %config.listing_url))]
pub async fn scrape(
    config: &ScrapeConfig,
    fetcher: Arc<dyn DocumentFetcher>,
    storage: Option<&Storage>,
    options: &ScrapeOptions,
    progress: &dyn ProgressReporter,
) -> Result<ScrapeResult> {
    let start = Instant::now();
    config.validate()?;

    let extractor = Arc::new(DetailExtractor::new(&config.selectors)?);

    let run_id = match storage {
        Some(storage) => Some(storage.insert_scrape_run(config.listing_url.as_str()).await?),
        None => None,
    };

    info!(run_id = ?run_id, "starting scrape pipeline");

    // --- Phase 1: Discovery ---
    progress.phase("Discovering restaurants");
    let candidates = match htc_discovery::discover(fetcher.as_ref(), config).await {
        Ok(candidates) => candidates,
        Err(e) => {
            if let (Some(storage), Some(run_id)) = (storage, &run_id) {
                let stats = serde_json::json!({ "status": "failed", "error": e.to_string() });
                if let Err(store_err) = storage
                    .finish_scrape_run(run_id, &stats.to_string())
                    .await
                {
                    warn!(error = %store_err, "failed to record failed run");
                }
            }
            return Err(e);
        }
    };

    // --- Phase 2: Enrichment ---
    progress.phase("Fetching restaurant details");
    let (entities, report) = enrich_all(
        candidates,
        fetcher,
        extractor,
        config.concurrency as usize,
        progress,
    )
    .await;

    // --- Phase 3: Storage ---
    let mut persisted = 0;
    let mut persist_errors = Vec::new();

    if let (Some(storage), Some(run_id)) = (storage, &run_id) {
        progress.phase("Saving restaurants");

        let saved = match storage.save_entities(&entities, options.replace).await {
            Ok(saved) => saved,
            Err(e) => {
                let stats = serde_json::json!({
                    "status": "failed",
                    "error": e.to_string(),
                    "candidates": entities.len(),
                    "received": report.received,
                });
                if let Err(store_err) = storage
                    .finish_scrape_run(run_id, &stats.to_string())
                    .await
                {
                    warn!(error = %store_err, "failed to record failed run");
                }
                return Err(e);
            }
        };

        if options.replace {
            info!(removed = saved.removed, "cleared stored restaurants");
        }
        persisted = saved.persisted;
        persist_errors = saved.errors;

        let stats = serde_json::json!({
            "status": if persist_errors.is_empty() { "completed" } else { "completed_with_errors" },
            "candidates": entities.len(),
            "dispatched": report.dispatched,
            "received": report.received,
            "enriched": report.enriched,
            "failed": report.failed,
            "duplicates": report.duplicates,
            "meals": entities.iter().map(|e| e.meals.len()).sum::<usize>(),
            "persisted": persisted,
            "persist_errors": persist_errors.len(),
        });
        if let Err(e) = storage.finish_scrape_run(run_id, &stats.to_string()).await {
            warn!(error = %e, "failed to record run stats");
        }
    }

    let result = ScrapeResult {
        entities,
        report,
        run_id,
        persisted,
        persist_errors,
        elapsed: start.elapsed(),
    };

    info!(
        entities = result.entities.len(),
        enriched = result.report.enriched,
        persisted = result.persisted,
        elapsed_ms = result.elapsed.as_millis(),
        "scrape pipeline completed"
    );

    progress.done(&result);
    Ok(result)
}

/// Result of [`refresh_menus`].
#[derive(Debug)]
pub struct MenuRefresh {
    /// Stored restaurants whose detail page was requested.
    pub restaurants: usize,
    /// Restaurants whose detail page was read and saved again.
    pub refreshed: usize,
    /// Meals saved across all refreshed restaurants.
    pub meals: usize,
    /// Fan-out counters.
    pub report: EnrichmentReport,
    /// Storage failures (URL, error message).
    pub persist_errors: Vec<(String, String)>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Re-read the detail page of every stored restaurant and save its current menus.
///
/// Runs the same fan-out as [`scrape`] without touching the listing.
/// Restaurants whose page cannot be read keep what is already stored.
#[instrument(skip_all, fields(concurrency = config.concurrency))]
pub async fn refresh_menus(
    config: &ScrapeConfig,
    fetcher: Arc<dyn DocumentFetcher>,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<MenuRefresh> {
    let start = Instant::now();
    config.validate()?;

    let extractor = Arc::new(DetailExtractor::new(&config.selectors)?);
    let stored = storage.list_entities().await?;
    let restaurants = stored.len();
    info!(restaurants, "refreshing menus");

    progress.phase("Fetching menus");
    let (entities, report) = enrich_all(
        stored,
        fetcher,
        extractor,
        config.concurrency as usize,
        progress,
    )
    .await;

    let fresh: Vec<Entity> = entities.into_iter().filter(|e| e.enriched).collect();
    let meals = fresh.iter().map(|e| e.meals.len()).sum();

    progress.phase("Saving menus");
    let saved = storage.save_entities(&fresh, false).await?;

    let refresh = MenuRefresh {
        restaurants,
        refreshed: saved.persisted,
        meals,
        report,
        persist_errors: saved.errors,
        elapsed: start.elapsed(),
    };

    info!(
        refreshed = refresh.refreshed,
        meals = refresh.meals,
        elapsed_ms = refresh.elapsed.as_millis(),
        "menu refresh completed"
    );
    Ok(refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, detail_page, listing_page, menu_page};
    use htc_crawler::HttpFetcher;
    use htc_shared::{AppConfig, Coordinates, HtcError};
    use url::Url;
    use uuid::Uuid;

    const LISTING: &str = "https://example.com/se-restaurer/ou-manger/";

    fn config(listing: &str) -> ScrapeConfig {
        let mut config = ScrapeConfig::try_from(&AppConfig::default()).unwrap();
        config.listing_url = Url::parse(listing).unwrap();
        config
    }

    fn item(href: &str, name: &str, label: &str) -> (String, String, String) {
        (href.to_string(), name.to_string(), label.to_string())
    }

    async fn temp_storage() -> Storage {
        temp_storage_at().await.0
    }

    async fn temp_storage_at() -> (Storage, std::path::PathBuf) {
        let tmp = std::env::temp_dir().join(format!("htc_pipeline_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        (storage, tmp)
    }

    /// Make the database itself reject restaurants called `name`.
    async fn reject_name(path: &std::path::Path, name: &str) {
        let db = libsql::Builder::new_local(path).build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute_batch(&format!(
            "CREATE TRIGGER reject_name BEFORE INSERT ON entities
             WHEN NEW.name = '{name}'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;"
        ))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn scrape_with_mock_server() {
        let server = wiremock::MockServer::start().await;

        let items = vec![
            item("/restaurant/triolet/", "Resto U' Triolet", "Montpellier"),
            item("/restaurant/cafet-sete/", "Cafét' Sète", "Sète"),
            item("/restaurant/veyrassi/", "Brasserie Veyrassi", "Montpellier"),
        ];
        let detail = std::fs::read_to_string("../../../fixtures/html/detail.html")
            .expect("read detail fixture");

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/se-restaurer/ou-manger/"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string(listing_page(&items)),
            )
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/restaurant/triolet/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(&detail))
            .mount(&server)
            .await;

        // Veyrassi's detail page is down.
        wiremock::Mock::given(wiremock::matchers::path("/restaurant/veyrassi/"))
            .respond_with(wiremock::ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let config = config(&format!("{}/se-restaurer/ou-manger/", server.uri()));
        let fetcher: Arc<dyn DocumentFetcher> =
            Arc::new(HttpFetcher::with_timeout_secs(config.timeout_secs).unwrap());
        let storage = temp_storage().await;

        let result = scrape(
            &config,
            fetcher,
            Some(&storage),
            &ScrapeOptions::default(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.report.received, 2);
        assert_eq!(result.report.enriched, 1);
        assert_eq!(result.persisted, 2);

        let triolet = storage
            .get_entity(&format!("{}/restaurant/triolet/", server.uri()))
            .await
            .unwrap()
            .expect("stored");
        assert!(triolet.enriched);
        assert_eq!(triolet.coordinates, Coordinates::new(43.632, 3.8635));
        let meals = storage.list_meals(Some(triolet.url.as_str())).await.unwrap();
        assert_eq!(meals.len(), 3);
        assert_eq!(meals[0].title, "Déjeuner");
        assert_eq!(triolet.opening_hours.as_deref(), Some("11:30 - 14:00"));

        let veyrassi = storage
            .get_entity(&format!("{}/restaurant/veyrassi/", server.uri()))
            .await
            .unwrap()
            .expect("stored even though enrichment failed");
        assert!(!veyrassi.enriched);
        assert!(veyrassi.coordinates.is_zero());

        let runs = storage.list_scrape_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, result.run_id.unwrap());
        assert!(runs[0].stats_json.as_deref().unwrap().contains("\"received\":2"));
    }

    #[tokio::test]
    async fn fifty_entities_through_full_pipeline() {
        let items: Vec<_> = (0..50)
            .map(|i| {
                (
                    format!("/restaurant/{i}/"),
                    format!("Resto {i}"),
                    if i % 5 == 0 { "Sète" } else { "Montpellier" }.to_string(),
                )
            })
            .collect();

        let mut fetcher = FakeFetcher::default().with_page(LISTING, &listing_page(&items));
        for (i, (href, _, _)) in items.iter().enumerate() {
            let url = format!("https://example.com{href}");
            if i % 7 == 3 {
                fetcher = fetcher.with_failure(&url);
            } else {
                fetcher = fetcher.with_page(&url, &detail_page(Some(&i.to_string()), Some("3.9")));
            }
        }
        let fetcher = Arc::new(fetcher.with_random_delay(0..=15));

        let mut config = config(LISTING);
        config.target_labels = vec!["Montpellier".into(), "Sète".into()];
        config.concurrency = 50;

        let result = tokio::time::timeout(
            Duration::from_secs(20),
            scrape(&config, fetcher, None, &ScrapeOptions::default(), &SilentProgress),
        )
        .await
        .expect("pipeline did not terminate")
        .unwrap();

        assert_eq!(result.entities.len(), 50);
        assert_eq!(result.report.received, 50);
        assert_eq!(result.persisted, 0);
        assert!(result.run_id.is_none());

        for (i, entity) in result.entities.iter().enumerate() {
            assert_eq!(entity.name, format!("Resto {i}"));
            if i % 7 == 3 {
                assert!(!entity.enriched);
                assert!(entity.coordinates.is_zero());
            } else {
                assert_eq!(entity.coordinates.latitude, i as f64);
            }
        }
    }

    #[tokio::test]
    async fn empty_listing_persists_nothing() {
        let fetcher = Arc::new(FakeFetcher::default().with_page(LISTING, &listing_page(&[])));
        let storage = temp_storage().await;

        let result = scrape(
            &config(LISTING),
            fetcher,
            Some(&storage),
            &ScrapeOptions::default(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(result.entities.is_empty());
        assert_eq!(result.report.dispatched, 0);
        assert!(storage.list_entities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_clears_previous_entities() {
        let storage = temp_storage().await;
        storage
            .upsert_entity(&Entity::candidate("https://example.com/old/", "Old", "Montpellier"))
            .await
            .unwrap();

        let items = vec![(
            "/restaurant/new/".to_string(),
            "New".to_string(),
            "Montpellier".to_string(),
        )];
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page(LISTING, &listing_page(&items))
                .with_page(
                    "https://example.com/restaurant/new/",
                    &detail_page(Some("1"), Some("2")),
                ),
        );

        scrape(
            &config(LISTING),
            fetcher,
            Some(&storage),
            &ScrapeOptions { replace: true },
            &SilentProgress,
        )
        .await
        .unwrap();

        let stored = storage.list_entities().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "New");
    }

    #[tokio::test]
    async fn listing_failure_is_fatal_and_recorded() {
        let fetcher = Arc::new(FakeFetcher::default().with_failure(LISTING));
        let storage = temp_storage().await;

        let err = scrape(
            &config(LISTING),
            fetcher,
            Some(&storage),
            &ScrapeOptions::default(),
            &SilentProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HtcError::Transport { .. }));
        let runs = storage.list_scrape_runs().await.unwrap();
        assert!(runs[0].stats_json.as_deref().unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_data_and_records_run() {
        let (storage, path) = temp_storage_at().await;
        storage
            .upsert_entity(&Entity::candidate("https://example.com/old/", "Old", "Montpellier"))
            .await
            .unwrap();
        reject_name(&path, "Broken").await;

        let items = vec![
            item("/restaurant/new/", "New", "Montpellier"),
            item("/restaurant/broken/", "Broken", "Montpellier"),
        ];
        let fetcher = Arc::new(FakeFetcher::default().with_page(LISTING, &listing_page(&items)));

        let err = scrape(
            &config(LISTING),
            fetcher,
            Some(&storage),
            &ScrapeOptions { replace: true },
            &SilentProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HtcError::Storage(_)));

        let names: Vec<_> = storage
            .list_entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["Old"]);

        let runs = storage.list_scrape_runs().await.unwrap();
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].stats_json.as_deref().unwrap().contains("\"status\":\"failed\""));
    }

    #[tokio::test]
    async fn refresh_menus_updates_readable_restaurants() {
        let storage = temp_storage().await;
        let ok = "https://example.com/restaurant/ok/";
        let down = "https://example.com/restaurant/down/";

        let mut located = Entity::candidate(down, "Down", "Montpellier");
        located.coordinates = Coordinates::new(43.6, 3.9);
        located.enriched = true;
        storage.upsert_entity(&located).await.unwrap();
        storage
            .upsert_entity(&Entity::candidate(ok, "Ok", "Montpellier"))
            .await
            .unwrap();

        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page(ok, &menu_page("43.61", "3.87", "Ratatouille"))
                .with_failure(down),
        );

        let refresh = refresh_menus(&config(LISTING), fetcher.clone(), &storage, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(refresh.restaurants, 2);
        assert_eq!(refresh.refreshed, 1);
        assert_eq!(refresh.meals, 1);
        assert_eq!(refresh.report.received, 2);
        assert_eq!(fetcher.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        let meals = storage.list_meals(Some(ok)).await.unwrap();
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].courses[0].dishes, ["Ratatouille"]);
        assert_eq!(
            storage.get_entity(ok).await.unwrap().unwrap().coordinates,
            Coordinates::new(43.61, 3.87)
        );

        // The unreachable restaurant keeps its stored location.
        let kept = storage.get_entity(down).await.unwrap().unwrap();
        assert_eq!(kept.coordinates, Coordinates::new(43.6, 3.9));
        assert!(kept.enriched);
    }

    #[tokio::test]
    async fn refresh_menus_with_empty_store() {
        let storage = temp_storage().await;
        let fetcher = Arc::new(FakeFetcher::default());

        let refresh = refresh_menus(&config(LISTING), fetcher, &storage, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(refresh.restaurants, 0);
        assert_eq!(refresh.meals, 0);
    }
}
