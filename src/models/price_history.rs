use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::card::Keyed;

pub const PRICE_COLUMN_PREFIX: &str = "p_";

/// Calendar date label of one price column, stored as `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateTag(String);

impl DateTag {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y%m%d").to_string())
    }

    pub fn today() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    /// Parse a `p_YYYYMMDD` header; `None` for anything else.
    pub fn from_column(column: &str) -> Option<Self> {
        column.strip_prefix(PRICE_COLUMN_PREFIX)?.parse().ok()
    }

    pub fn column_name(&self) -> String {
        format!("{}{}", PRICE_COLUMN_PREFIX, self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DateTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("expected YYYYMMDD, got '{}'", s));
        }
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .map(Self::from_date)
            .map_err(|e| format!("invalid date '{}': {}", s, e))
    }
}

impl fmt::Display for DateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One physical card across its observed lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceHistoryRow {
    pub position_index: String,
    pub display_name: String,
    pub image_ref: String,
    prices: Vec<Option<u64>>,
}

impl PriceHistoryRow {
    pub fn new(position_index: String, display_name: String, image_ref: String, prices: Vec<Option<u64>>) -> Self {
        Self {
            position_index,
            display_name,
            image_ref,
            prices,
        }
    }

    /// Values aligned with the owning table's date columns.
    pub fn prices(&self) -> &[Option<u64>] {
        &self.prices
    }

    pub(crate) fn set_price(&mut self, column: usize, price: Option<u64>) {
        self.prices[column] = price;
    }
}

impl Keyed for PriceHistoryRow {
    fn position_index(&self) -> &str {
        &self.position_index
    }
    fn display_name(&self) -> &str {
        &self.display_name
    }
    fn image_ref(&self) -> &str {
        &self.image_ref
    }
}

/// Wide-format price table: one row per card, one column per run date.
///
/// Rows keep their physical order forever; consumers address them by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceHistory {
    dates: Vec<DateTag>,
    rows: Vec<PriceHistoryRow>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a table, checking every row carries one value per date column.
    pub fn from_parts(dates: Vec<DateTag>, rows: Vec<PriceHistoryRow>) -> Result<Self, String> {
        for (i, date) in dates.iter().enumerate() {
            if dates[..i].contains(date) {
                return Err(format!("duplicate date column {}", date.column_name()));
            }
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.prices.len() != dates.len()) {
            return Err(format!(
                "row {} has {} prices for {} date columns",
                i,
                row.prices.len(),
                dates.len()
            ));
        }
        Ok(Self { dates, rows })
    }

    pub fn dates(&self) -> &[DateTag] {
        &self.dates
    }

    pub fn rows(&self) -> &[PriceHistoryRow] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [PriceHistoryRow] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn date_column(&self, date: &DateTag) -> Option<usize> {
        self.dates.iter().position(|d| d == date)
    }

    /// Column for `date`, inserting an all-absent column if it is new.
    ///
    /// New columns go before the first later date, so a backdated run never
    /// becomes the last ("current") column.
    pub(crate) fn ensure_date(&mut self, date: &DateTag) -> usize {
        if let Some(column) = self.date_column(date) {
            return column;
        }
        let column = self.dates.iter().position(|d| d > date).unwrap_or(self.dates.len());
        self.dates.insert(column, date.clone());
        for row in &mut self.rows {
            row.prices.insert(column, None);
        }
        column
    }

    /// Append a row with every date absent; returns its position.
    pub(crate) fn push_row(&mut self, position_index: String, display_name: String, image_ref: String) -> usize {
        let prices = vec![None; self.dates.len()];
        self.rows.push(PriceHistoryRow::new(position_index, display_name, image_ref, prices));
        self.rows.len() - 1
    }

    pub fn row(&self, position: usize) -> Option<&PriceHistoryRow> {
        self.rows.get(position)
    }

    pub fn price(&self, position: usize, date: &DateTag) -> Option<u64> {
        let column = self.date_column(date)?;
        self.rows.get(position)?.prices[column]
    }

    /// The latest date column, treated downstream as "current".
    pub fn latest_date(&self) -> Option<&DateTag> {
        self.dates.last()
    }

    pub fn latest_price(&self, position: usize) -> Option<u64> {
        let row = self.rows.get(position)?;
        *row.prices.last()?
    }

    /// `(date, price)` pairs of one row in column order.
    pub fn series(&self, position: usize) -> Option<Vec<(&DateTag, Option<u64>)>> {
        let row = self.rows.get(position)?;
        Some(self.dates.iter().zip(row.prices.iter().copied()).collect())
    }
}
