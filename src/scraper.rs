use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use url::Url;

use crate::config::{PageSourceKind, ScraperConfig};
use crate::extractor::PageExtractor;
use crate::models::{CategoryScrape, ScrapedCard};
use crate::utils::error::{AppError, Result};

/// A browsing-context backend. Every call must use a fresh, isolated context
/// and release it before returning, whatever the outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Navigate to `url` and return the rendered document.
    async fn load(&self, url: &Url) -> Result<String>;
}

/// Headless Chromium; one browser process per page load.
pub struct ChromePageSource {
    config: ScraperConfig,
}

/// Plain HTTP GET; one client (and cookie jar) per page load.
pub struct HttpPageSource {
    config: ScraperConfig,
}

pub fn page_source(config: &ScraperConfig) -> Arc<dyn PageSource> {
    match config.backend {
        PageSourceKind::Chrome => Arc::new(ChromePageSource::new(config.clone())),
        PageSourceKind::Http => Arc::new(HttpPageSource::new(config.clone())),
    }
}

impl ChromePageSource {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    fn launch_options(config: &ScraperConfig) -> Result<LaunchOptions<'static>> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false) // Often needed in containerized environments
            .idle_browser_timeout(Duration::from_secs(config.request_timeout * 2))
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
                std::ffi::OsStr::new("--disable-extensions"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        Ok(launch_options)
    }

    fn load_blocking(config: &ScraperConfig, url: &str, budget: &LoadBudget) -> Result<String> {
        let browser = Browser::new(Self::launch_options(config)?)
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {}", e)))?;
        budget.remaining(url)?;

        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("Failed to create tab: {}", e)))?;

        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| AppError::Browser(format!("Failed to set user agent: {}", e)))?;

        tab.set_default_timeout(budget.remaining(url)?);
        tab.navigate_to(url)
            .map_err(|e| AppError::Browser(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| AppError::Browser(format!("Page load failed: {}", e)))?;

        // An empty listing never renders a block; extraction reports that case.
        tab.set_default_timeout(budget.remaining(url)?);
        if tab.wait_for_element(&config.selectors.card_block).is_err() {
            tracing::debug!("No '{}' element rendered at {}", config.selectors.card_block, url);
        }

        budget.remaining(url)?;
        let html = tab
            .get_content()
            .map_err(|e| AppError::Browser(format!("Failed to get page content: {}", e)))?;

        let _ = tab.close(true);
        Ok(html)
    }
}

/// Time left for one blocking page load, shared with the async caller.
///
/// The caller flips `cancelled` when it stops waiting; the blocking side checks
/// it between browser steps and sizes each step's timeout to what is left.
#[derive(Debug, Clone)]
struct LoadBudget {
    deadline: Instant,
    timeout: Duration,
    cancelled: Arc<AtomicBool>,
}

struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl LoadBudget {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(Arc::clone(&self.cancelled))
    }

    fn remaining(&self, url: &str) -> Result<Duration> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(AppError::Browser(format!("Load of {} cancelled", url)));
        }
        let left = self.deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(AppError::Timeout {
                url: url.to_string(),
                seconds: self.timeout.as_secs(),
            });
        }
        Ok(left)
    }
}

#[async_trait]
impl PageSource for ChromePageSource {
    async fn load(&self, url: &Url) -> Result<String> {
        let config = self.config.clone();
        let url = url.to_string();
        let budget = LoadBudget::new(Duration::from_secs(config.request_timeout));
        // Dropping this future (timeout, run deadline) stops the blocking side too.
        let _cancel = budget.cancel_on_drop();

        tokio::task::spawn_blocking(move || Self::load_blocking(&config, &url, &budget))
            .await
            .map_err(|e| AppError::Internal(format!("Browser task failed: {}", e)))?
    }
}

impl HttpPageSource {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn load(&self, url: &Url) -> Result<String> {
        let client = reqwest::Client::builder()
            .user_agent(self.config.user_agent.as_str())
            .timeout(Duration::from_secs(self.config.request_timeout))
            .build()?;

        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Scrapes one category: navigate, extract, normalize.
///
/// Never fails as a whole. A category that cannot be loaded comes back empty
/// with the reason recorded, so the rest of the run carries on.
#[derive(Clone)]
pub struct CategoryFetcher {
    source: Arc<dyn PageSource>,
    extractor: Arc<PageExtractor>,
    config: Arc<ScraperConfig>,
    timeout: Duration,
}

impl CategoryFetcher {
    pub fn new(source: Arc<dyn PageSource>, extractor: PageExtractor, config: ScraperConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout);
        Self {
            source,
            extractor: Arc::new(extractor),
            config: Arc::new(config),
            timeout,
        }
    }

    /// Override the per-attempt navigation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn fetch(&self, category: &str) -> CategoryScrape {
        match self.try_fetch(category).await {
            Ok(cards) => {
                tracing::info!("Scraped {} cards for category {}", cards.len(), category);
                CategoryScrape::from_cards(category, &cards)
            }
            Err(e) => {
                tracing::warn!(category = %category, "Category fetch failed, continuing without it: {}", e);
                CategoryScrape::failed(category, e.to_string())
            }
        }
    }

    async fn try_fetch(&self, category: &str) -> Result<Vec<ScrapedCard>> {
        let url = self
            .config
            .category_url(category)
            .map_err(|e| AppError::Validation(format!("Bad listing URL for {}: {}", category, e)))?;

        tracing::info!("Scraping: {}", url);
        let html = self.load_with_retry(&url).await?;
        Ok(self.extractor.extract(&html, category))
    }

    async fn load_with_retry(&self, url: &Url) -> Result<String> {
        // First delay equals retry_delay_ms, doubling afterwards.
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.config.retry_delay_ms / 2).max(1))
            .max_delay(Duration::from_secs(60))
            .take(self.config.retry_attempts as usize);

        RetryIf::spawn(
            strategy,
            || self.load_once(url),
            |e: &AppError| {
                let retry = e.is_transient();
                if retry {
                    tracing::debug!("Retrying {} after: {}", url, e);
                }
                retry
            },
        )
        .await
    }

    async fn load_once(&self, url: &Url) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.source.load(url)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                url: url.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}
