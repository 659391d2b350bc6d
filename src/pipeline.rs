use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordinator::ScrapeCoordinator;
use crate::extractor::PageExtractor;
use crate::merge::{MergeEngine, MergeStats};
use crate::models::DateTag;
use crate::scraper::{CategoryFetcher, PageSource, page_source};
use crate::store::DatasetStore;
use crate::utils::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub date: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub observations: usize,
    pub rows: usize,
    pub saved: bool,
    pub stats: MergeStats,
}

/// One complete run: scrape every category, then load, merge and save the
/// dataset while holding its lock.
pub struct PricePipeline {
    coordinator: ScrapeCoordinator,
    engine: MergeEngine,
    store: DatasetStore,
}

impl PricePipeline {
    pub fn new(coordinator: ScrapeCoordinator, engine: MergeEngine, store: DatasetStore) -> Self {
        Self {
            coordinator,
            engine,
            store,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::with_source(config, page_source(&config.scraper))
    }

    pub fn with_source(config: &AppConfig, source: Arc<dyn PageSource>) -> Result<Self> {
        let extractor = PageExtractor::from_config(&config.scraper.selectors)?;
        let fetcher = CategoryFetcher::new(source, extractor, config.scraper.clone());
        let coordinator = ScrapeCoordinator::new(fetcher, config.scraper.categories.clone())
            .with_run_timeout(config.scraper.run_timeout.map(Duration::from_secs));

        Ok(Self::new(
            coordinator,
            MergeEngine::new(config.merge.placeholder_image.clone()),
            DatasetStore::from_config(&config.storage),
        ))
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub async fn run_once(&self, date: &DateTag) -> Result<RunSummary> {
        tracing::info!(
            "Starting run {} across {} categories",
            date,
            self.coordinator.categories().len()
        );
        let batch = self.coordinator.scrape_all().await;

        let mut summary = RunSummary {
            date: date.to_string(),
            succeeded: batch.succeeded.clone(),
            failed: batch.failed.clone(),
            observations: batch.observations.len(),
            rows: 0,
            saved: false,
            stats: MergeStats::default(),
        };

        // Nothing to merge; keep the previous generation as it is.
        if batch.succeeded.is_empty() {
            tracing::error!("Every category failed for {}, dataset left unchanged", date);
            return Ok(summary);
        }

        let _lock = self.store.lock()?;
        let prior = self.store.load()?;
        let backdated = prior.latest_date().is_some_and(|latest| date < latest);
        let outcome = self.engine.merge(prior, &batch.observations, &batch.metadata, date);

        // The snapshot describes the newest run; an older date only fills in history.
        if backdated {
            tracing::warn!("Run {} is older than the latest column, keeping the current metadata snapshot", date);
            let current = self.store.load_metadata()?;
            self.store.save(&outcome.history, &current)?;
        } else {
            self.store.save(&outcome.history, &outcome.metadata)?;
        }

        summary.rows = outcome.history.len();
        summary.saved = true;
        summary.stats = outcome.stats;

        tracing::info!(
            "Run {} complete: {} rows, {} matched, {} new, {} images updated, {} categories failed",
            date,
            summary.rows,
            summary.stats.matched,
            summary.stats.inserted,
            summary.stats.reconciled,
            summary.failed.len()
        );
        Ok(summary)
    }
}
