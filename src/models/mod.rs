pub mod card;
pub mod price_history;

// Re-exports for convenience
pub use card::*;
pub use price_history::*;

/// Everything one category fetch produced, including why it came back empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryScrape {
    pub category: String,
    pub observations: Vec<PriceObservation>,
    pub metadata: Vec<CardMetadata>,
    pub error: Option<String>,
}

impl CategoryScrape {
    pub fn from_cards(category: &str, cards: &[ScrapedCard]) -> Self {
        Self {
            category: category.to_string(),
            observations: cards.iter().map(ScrapedCard::observation).collect(),
            metadata: cards.iter().map(ScrapedCard::metadata).collect(),
            error: None,
        }
    }

    /// Empty result for a category whose fetch failed.
    pub fn failed(category: &str, error: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
