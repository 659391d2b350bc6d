use config::{Config, ConfigError, Environment, File};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://yuyu-tei.jp/sell/poc/s/search?search_word=";
pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "https://img.yuyu-tei.jp/card_image/noimage_100_140.jpg";
pub const DEFAULT_CATEGORIES: [&str; 7] = ["UR", "HR", "SR", "SAR", "CSR", "SSR", "PROMO"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub merge: MergeConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PageSourceKind {
    /// Headless Chromium, one browser process per category.
    Chrome,
    /// Plain HTTP GET for server-rendered listings.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub backend: PageSourceKind,
    pub base_url: String,
    pub category_param: String,
    pub categories: Vec<String>,
    /// Per-category navigation timeout in seconds.
    pub request_timeout: u64,
    /// Whole-run deadline in seconds; outstanding categories are cancelled when it passes.
    pub run_timeout: Option<u64>,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    pub selectors: SelectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectorConfig {
    pub card_block: String,
    pub index: String,
    pub price: String,
    pub name: String,
    pub image: String,
    pub image_attr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub placeholder_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub price_history_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Six-field cron expression (seconds first).
    pub cron: String,
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            backend: PageSourceKind::Chrome,
            base_url: DEFAULT_BASE_URL.to_string(),
            category_param: "rare".to_string(),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            request_timeout: 60,
            run_timeout: None,
            retry_attempts: 2,
            retry_delay_ms: 2000,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) cardwatch/0.1".to_string(),
            chrome_path: None,
            selectors: SelectorConfig::default(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            card_block: ".col-md".to_string(),
            index: "span.d-block.border.border-dark.p-1.w-100.text-center.my-2".to_string(),
            price: "strong.d-block.text-end".to_string(),
            name: "h4.text-primary.fw-bold".to_string(),
            image: "img.card.img-fluid".to_string(),
            image_attr: "src".to_string(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            price_history_path: PathBuf::from("card_info/card_price.csv"),
            metadata_path: PathBuf::from("card_info/base_card_info.csv"),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron: "0 0 6 * * *".to_string(),
            run_on_start: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "cardwatch.log".to_string(),
        }
    }
}

impl ScraperConfig {
    /// Listing endpoint for one category tag.
    pub fn category_url(&self, category: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.base_url)?;
        url.query_pairs_mut().append_pair(&self.category_param, category);
        Ok(url)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Layered load: defaults, `config/default`, `config/<RUN_MODE>`, `config/local`,
    /// an explicit file if given, then `CARDWATCH__*` environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        }

        let s = builder
            .add_source(
                Environment::with_prefix("CARDWATCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scraper.categories")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scraper = &self.scraper;

        if scraper.categories.is_empty() {
            return Err(ConfigError::Message("At least one scraper category is required".into()));
        }

        for (i, category) in scraper.categories.iter().enumerate() {
            if category.trim().is_empty() {
                return Err(ConfigError::Message("Scraper categories must not be blank".into()));
            }
            if scraper.categories[..i].contains(category) {
                return Err(ConfigError::Message(format!("Duplicate scraper category: {}", category)));
            }
        }

        if Url::parse(&scraper.base_url).is_err() {
            return Err(ConfigError::Message("Invalid scraper base_url format".into()));
        }

        if scraper.category_param.is_empty() {
            return Err(ConfigError::Message("Scraper category_param must not be empty".into()));
        }

        if scraper.request_timeout == 0 {
            return Err(ConfigError::Message("Scraper request_timeout must be greater than 0".into()));
        }

        if scraper.run_timeout == Some(0) {
            return Err(ConfigError::Message("Scraper run_timeout must be greater than 0".into()));
        }

        let selectors = &scraper.selectors;
        for selector in [
            &selectors.card_block,
            &selectors.index,
            &selectors.price,
            &selectors.name,
            &selectors.image,
        ] {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!("Invalid CSS selector: {}", selector)));
            }
        }

        if selectors.image_attr.is_empty() {
            return Err(ConfigError::Message("Selector image_attr must not be empty".into()));
        }

        if self.merge.placeholder_image.trim().is_empty() {
            return Err(ConfigError::Message("Merge placeholder_image must not be empty".into()));
        }

        if self.storage.price_history_path == self.storage.metadata_path {
            return Err(ConfigError::Message(
                "Storage price_history_path and metadata_path must differ".into(),
            ));
        }

        if !Self::is_valid_cron(&self.scheduler.cron) {
            return Err(ConfigError::Message("Invalid cron expression in scheduler.cron".into()));
        }

        Ok(())
    }

    pub(crate) fn is_valid_cron(cron_expr: &str) -> bool {
        // seconds minutes hours day-of-month month day-of-week [year]
        let parts: Vec<&str> = cron_expr.split_whitespace().collect();
        if parts.len() != 6 && parts.len() != 7 {
            return false;
        }

        parts.iter().all(|part| {
            part.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '-' | ',' | '/' | '?'))
        })
    }
}
