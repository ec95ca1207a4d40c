//! Enrichment fan-out / fan-in.
//!
//! One task per distinct entity URL is spawned into a [`JoinSet`]; outcomes
//! are drained from it one at a time and merged back onto the entity list by
//! URL. The join set is the completion signal: the loop ends exactly when
//! every spawned task has been joined, so an empty input or an all-failed
//! run terminate the same way as a successful one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use htc_crawler::{DetailExtractor, DocumentFetcher, enrich};
use htc_shared::{EnrichmentOutcome, Entity};

use crate::pipeline::ProgressReporter;

/// Counters for one fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentReport {
    /// Tasks spawned (one per distinct URL).
    pub dispatched: usize,
    /// Outcomes joined. Always equal to `dispatched` on return.
    pub received: usize,
    /// Entities whose attribute block was found.
    pub enriched: usize,
    /// Entities left at defaults.
    pub failed: usize,
    /// Entities that shared a URL with an earlier entity.
    pub duplicates: usize,
    /// Wall time of the fan-out.
    pub duration: Duration,
}

/// Enrich every entity from its detail page, at most `concurrency` fetches at a time.
///
/// Returns the same entities in the same order, each with its attributes
/// merged or left at defaults. Entities sharing a URL are fetched once and all
/// receive that single outcome.
#[instrument(skip_all, fields(candidates = entities.len(), concurrency = concurrency))]
pub async fn enrich_all(
    mut entities: Vec<Entity>,
    fetcher: Arc<dyn DocumentFetcher>,
    extractor: Arc<DetailExtractor>,
    concurrency: usize,
    progress: &dyn ProgressReporter,
) -> (Vec<Entity>, EnrichmentReport) {
    let start = Instant::now();

    if entities.is_empty() {
        info!("no candidates, nothing to enrich");
        return (entities, EnrichmentReport::default());
    }

    // URL -> positions in `entities`, built once before dispatch.
    let mut slots: HashMap<String, Vec<usize>> = HashMap::with_capacity(entities.len());
    for (i, entity) in entities.iter().enumerate() {
        slots.entry(entity.url.clone()).or_default().push(i);
    }

    let duplicates = entities.len() - slots.len();
    if duplicates > 0 {
        warn!(duplicates, "duplicate URLs in listing, fetching each once");
    }

    let gate = Arc::new(Semaphore::new(concurrency.clamp(1, Semaphore::MAX_PERMITS)));
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::with_capacity(slots.len());

    for (i, entity) in entities.iter().enumerate() {
        // Dispatch only from the first entity carrying each URL.
        if slots.get(&entity.url).and_then(|s| s.first()) != Some(&i) {
            continue;
        }

        let url = entity.url.clone();
        let fetcher = Arc::clone(&fetcher);
        let extractor = Arc::clone(&extractor);
        let gate = Arc::clone(&gate);

        let handle = tasks.spawn(async move {
            let _permit = match gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => return EnrichmentOutcome::failed(url, "concurrency gate closed"),
            };
            enrich(fetcher.as_ref(), &extractor, &url).await
        });
        pending.insert(handle.id(), entity.url.clone());
    }

    let dispatched = pending.len();
    debug!(dispatched, "enrichment tasks spawned");

    let mut received = 0;
    while let Some(joined) = tasks.join_next_with_id().await {
        let outcome = match joined {
            Ok((id, outcome)) => {
                pending.remove(&id);
                outcome
            }
            Err(e) => {
                // A panicked task still owes its entity an outcome.
                let url = pending.remove(&e.id()).unwrap_or_default();
                error!(%url, error = %e, "enrichment task did not complete");
                EnrichmentOutcome::failed(url, format!("task failed: {e}"))
            }
        };
        received += 1;

        match slots.get(outcome.url()) {
            Some(positions) => {
                for &i in positions {
                    entities[i].apply(&outcome);
                }
            }
            None => warn!(url = outcome.url(), "outcome for unknown URL"),
        }

        progress.entity_enriched(outcome.url(), received, dispatched);
    }

    debug_assert!(pending.is_empty());

    let enriched = entities.iter().filter(|e| e.enriched).count();
    let report = EnrichmentReport {
        dispatched,
        received,
        enriched,
        failed: entities.len() - enriched,
        duplicates,
        duration: start.elapsed(),
    };

    info!(
        dispatched = report.dispatched,
        received = report.received,
        enriched = report.enriched,
        failed = report.failed,
        duration_ms = report.duration.as_millis(),
        "enrichment completed"
    );

    (entities, report)
}
