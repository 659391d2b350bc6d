// Shared fixtures for the integration tests

pub mod pipeline_tests;
pub mod source_tests;

use std::path::Path;
use std::time::Duration;

use cardwatch::AppConfig;
use cardwatch::config::PageSourceKind;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LISTING_PATH: &str = "/sell/poc/s/search";
pub const PLACEHOLDER: &str = "https://img.yuyu-tei.jp/card_image/noimage_100_140.jpg";

/// A card as the marketplace renders it.
pub struct Listing<'a> {
    pub index: &'a str,
    pub name: &'a str,
    pub image: &'a str,
    pub price: &'a str,
}

pub fn listing<'a>(index: &'a str, name: &'a str, image: &'a str, price: &'a str) -> Listing<'a> {
    Listing { index, name, image, price }
}

/// Render a category page in the marketplace's layout.
pub fn render_page(cards: &[Listing<'_>]) -> String {
    let blocks: String = cards
        .iter()
        .map(|card| {
            format!(
                r#"<div class="col-md">
                     <span class="d-block border border-dark p-1 w-100 text-center my-2">{}</span>
                     <img class="card img-fluid" src="{}" alt="">
                     <h4 class="text-primary fw-bold">{}</h4>
                     <strong class="d-block text-end">{}</strong>
                   </div>"#,
                card.index, card.image, card.name, card.price
            )
        })
        .collect();
    format!(r#"<html><body><div class="row">{}</div></body></html>"#, blocks)
}

pub struct FakeMarket {
    pub server: MockServer,
}

impl FakeMarket {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub async fn serve(&self, category: &str, cards: &[Listing<'_>]) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("rare", category))
            .respond_with(ResponseTemplate::new(200).set_body_string(render_page(cards)))
            .mount(&self.server)
            .await;
    }

    /// A category whose page never arrives within the request timeout.
    pub async fn stall(&self, category: &str) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("rare", category))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(render_page(&[]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn fail(&self, category: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("rare", category))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Test configuration: HTTP backend pointed at this server, dataset under `dir`.
    pub fn config(&self, dir: &Path, categories: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.scraper.backend = PageSourceKind::Http;
        config.scraper.base_url = format!("{}{}?search_word=", self.server.uri(), LISTING_PATH);
        config.scraper.categories = categories.iter().map(|c| c.to_string()).collect();
        config.scraper.request_timeout = 1;
        config.scraper.retry_attempts = 0;
        config.scraper.retry_delay_ms = 1;
        config.merge.placeholder_image = PLACEHOLDER.to_string();
        config.storage.price_history_path = dir.join("card_info/card_price.csv");
        config.storage.metadata_path = dir.join("card_info/base_card_info.csv");
        config
    }
}
