use std::sync::Arc;

use cardwatch::AppError;
use cardwatch::extractor::PageExtractor;
use cardwatch::scraper::{CategoryFetcher, HttpPageSource, PageSource};

use super::*;

#[tokio::test]
async fn test_http_source_returns_page_body() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    site.serve("UR", &[listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円")]).await;

    let config = site.config(dir.path(), &["UR"]);
    let url = config.scraper.category_url("UR").unwrap();
    let source = HttpPageSource::new(config.scraper.clone());

    let html = source.load(&url).await.unwrap();
    assert!(html.contains("Pikachu ex"));
}

#[tokio::test]
async fn test_http_source_reports_status() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();
    site.fail("UR", 404).await;

    let config = site.config(dir.path(), &["UR"]);
    let url = config.scraper.category_url("UR").unwrap();
    let source = HttpPageSource::new(config.scraper.clone());

    let err = source.load(&url).await.unwrap_err();
    assert!(matches!(err, AppError::Status { status: 404, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_fetcher_retries_server_errors() {
    let site = FakeMarket::start().await;
    let dir = tempfile::tempdir().unwrap();

    // The first request fails, the retry gets the page.
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::query_param("rare", "UR"))
        .respond_with(wiremock::ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&site.server)
        .await;
    site.serve("UR", &[listing("001/078", "Pikachu ex", "https://img/a.jpg", "1,200円")]).await;

    let mut config = site.config(dir.path(), &["UR"]);
    config.scraper.retry_attempts = 2;
    let extractor = PageExtractor::from_config(&config.scraper.selectors).unwrap();
    let source: Arc<dyn PageSource> = Arc::new(HttpPageSource::new(config.scraper.clone()));
    let fetcher = CategoryFetcher::new(source, extractor, config.scraper.clone());

    let scrape = fetcher.fetch("UR").await;
    assert!(scrape.succeeded());
    assert_eq!(scrape.observations.len(), 1);
    assert_eq!(scrape.observations[0].price, 1200);
    assert_eq!(scrape.metadata[0].category, "UR");
}
