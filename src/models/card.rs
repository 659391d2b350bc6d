use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Stand-in for identifier, name or image fields missing from a card block.
pub const MISSING_FIELD: &str = "N/A";

static NON_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9]").unwrap());

/// One card block as it appeared on a category page, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedCard {
    pub position_index: String,
    pub display_name: String,
    pub image_ref: String,
    pub price_text: String,
    pub category: String,
}

/// A normalized price sighting for one card on the run's date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub position_index: String,
    pub display_name: String,
    pub image_ref: String,
    pub price: u64,
}

/// Current catalog snapshot of a card. Column order matches the metadata artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMetadata {
    #[serde(rename = "index")]
    pub position_index: String,
    #[serde(rename = "rarity")]
    pub category: String,
    #[serde(rename = "card_name")]
    pub display_name: String,
    #[serde(rename = "img_src")]
    pub image_ref: String,
}

/// Row identity across runs: `index_name_image`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn new(position_index: &str, display_name: &str, image_ref: &str) -> Self {
        Self(format!("{}_{}_{}", position_index, display_name, image_ref))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything identified by index, name and image.
pub trait Keyed {
    fn position_index(&self) -> &str;
    fn display_name(&self) -> &str;
    fn image_ref(&self) -> &str;

    fn key(&self) -> CompositeKey {
        CompositeKey::new(self.position_index(), self.display_name(), self.image_ref())
    }

    /// Same printed card slot, ignoring the image.
    fn same_card<K: Keyed + ?Sized>(&self, other: &K) -> bool {
        self.position_index() == other.position_index() && self.display_name() == other.display_name()
    }
}

macro_rules! impl_keyed {
    ($($ty:ty),+) => {
        $(impl Keyed for $ty {
            fn position_index(&self) -> &str {
                &self.position_index
            }
            fn display_name(&self) -> &str {
                &self.display_name
            }
            fn image_ref(&self) -> &str {
                &self.image_ref
            }
        })+
    };
}

impl_keyed!(ScrapedCard, PriceObservation, CardMetadata);

/// Keep only the ASCII digits of marketplace price text.
///
/// Text without digits, or with more digits than fit in a `u64`, yields 0.
pub fn parse_price(text: &str) -> u64 {
    let digits = NON_DIGIT.replace_all(text, "");
    if digits.is_empty() {
        return 0;
    }
    digits.parse().unwrap_or_else(|_| {
        tracing::debug!("Price text out of range, using 0: {}", text);
        0
    })
}

impl ScrapedCard {
    pub fn observation(&self) -> PriceObservation {
        PriceObservation {
            position_index: self.position_index.clone(),
            display_name: self.display_name.clone(),
            image_ref: self.image_ref.clone(),
            price: parse_price(&self.price_text),
        }
    }

    pub fn metadata(&self) -> CardMetadata {
        CardMetadata {
            position_index: self.position_index.clone(),
            category: self.category.clone(),
            display_name: self.display_name.clone(),
            image_ref: self.image_ref.clone(),
        }
    }
}
