use scraper::{ElementRef, Html, Selector};

use crate::config::SelectorConfig;
use crate::models::{MISSING_FIELD, ScrapedCard};
use crate::utils::error::{AppError, Result};

/// Compiled selectors for one marketplace layout.
#[derive(Debug, Clone)]
pub struct CardSelectors {
    card_block: Selector,
    index: Selector,
    price: Selector,
    name: Selector,
    image: Selector,
    image_attr: String,
}

impl CardSelectors {
    pub fn from_config(config: &SelectorConfig) -> Result<Self> {
        Ok(Self {
            card_block: parse_selector(&config.card_block)?,
            index: parse_selector(&config.index)?,
            price: parse_selector(&config.price)?,
            name: parse_selector(&config.name)?,
            image: parse_selector(&config.image)?,
            image_attr: config.image_attr.clone(),
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::Selector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

/// Turns a rendered category page into card records.
///
/// Every field of a block is optional on its own: a missing identifier, name or
/// image becomes `"N/A"` and a missing price becomes an empty string, so layout
/// drift degrades individual fields instead of whole pages.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    selectors: CardSelectors,
}

impl PageExtractor {
    pub fn new(selectors: CardSelectors) -> Self {
        Self { selectors }
    }

    pub fn from_config(config: &SelectorConfig) -> Result<Self> {
        Ok(Self::new(CardSelectors::from_config(config)?))
    }

    pub fn extract(&self, html: &str, category: &str) -> Vec<ScrapedCard> {
        let document = Html::parse_document(html);
        let cards: Vec<ScrapedCard> = document
            .select(&self.selectors.card_block)
            .map(|block| self.extract_block(block, category))
            .collect();

        if cards.is_empty() {
            tracing::warn!("No card blocks found for category {}", category);
        }
        cards
    }

    /// One card block to one record.
    pub fn extract_block(&self, block: ElementRef<'_>, category: &str) -> ScrapedCard {
        let s = &self.selectors;

        ScrapedCard {
            position_index: first_text(block, &s.index).unwrap_or_else(|| MISSING_FIELD.to_string()),
            display_name: first_text(block, &s.name).unwrap_or_else(|| MISSING_FIELD.to_string()),
            image_ref: block
                .select(&s.image)
                .next()
                .and_then(|img| img.value().attr(&s.image_attr))
                .map(|src| src.trim().to_string())
                .unwrap_or_else(|| MISSING_FIELD.to_string()),
            price_text: first_text(block, &s.price).unwrap_or_default(),
            category: category.to_string(),
        }
    }
}

fn first_text(block: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let element = block.select(selector).next()?;
    let text = element.text().collect::<String>();
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}
