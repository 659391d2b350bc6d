use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{CardMetadata, CategoryScrape, PriceObservation};
use crate::scraper::CategoryFetcher;

/// Flattened output of one scrape across every category.
#[derive(Debug, Clone, Default)]
pub struct ScrapeBatch {
    pub observations: Vec<PriceObservation>,
    pub metadata: Vec<CardMetadata>,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ScrapeBatch {
    /// Concatenate per-category results in the order given.
    pub fn from_scrapes(scrapes: Vec<CategoryScrape>) -> Self {
        let mut batch = Self::default();
        for scrape in scrapes {
            match scrape.error {
                Some(error) => batch.failed.push((scrape.category, error)),
                None => {
                    batch.observations.extend(scrape.observations);
                    batch.metadata.extend(scrape.metadata);
                    batch.succeeded.push(scrape.category);
                }
            }
        }
        batch
    }
}

/// Runs one fetch task per configured category and waits for all of them.
pub struct ScrapeCoordinator {
    fetcher: CategoryFetcher,
    categories: Vec<String>,
    run_timeout: Option<Duration>,
}

impl ScrapeCoordinator {
    pub fn new(fetcher: CategoryFetcher, categories: Vec<String>) -> Self {
        Self {
            fetcher,
            categories,
            run_timeout: None,
        }
    }

    /// Deadline for the whole scrape; categories still running are cancelled.
    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub async fn scrape_all(&self) -> ScrapeBatch {
        let handles: Vec<_> = self
            .categories
            .iter()
            .map(|category| {
                let fetcher = self.fetcher.clone();
                let category = category.clone();
                tokio::spawn(async move { fetcher.fetch(&category).await })
            })
            .collect();

        let deadline = self.run_timeout.map(|t| Instant::now() + t);

        let scrapes = join_all(self.categories.iter().zip(handles).map(|(category, handle)| async move {
            let abort = handle.abort_handle();
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort.abort();
                        tracing::warn!(category = %category, "Run deadline passed, cancelling category");
                        return CategoryScrape::failed(category, "cancelled by run deadline");
                    }
                },
                None => handle.await,
            };

            joined.unwrap_or_else(|e| {
                tracing::error!(category = %category, "Category task failed: {}", e);
                CategoryScrape::failed(category, format!("task failed: {}", e))
            })
        }))
        .await;

        let batch = ScrapeBatch::from_scrapes(scrapes);
        tracing::info!(
            "Scrape finished: {} observations from {} categories ({} failed)",
            batch.observations.len(),
            batch.succeeded.len(),
            batch.failed.len()
        );
        batch
    }
}
