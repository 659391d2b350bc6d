use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::{CardMetadata, CompositeKey, DateTag, Keyed, PriceHistory, PriceObservation};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Existing rows that received a price for the run's date.
    pub matched: usize,
    /// Rows created for keys never seen before.
    pub inserted: usize,
    /// Placeholder images replaced by real ones.
    pub reconciled: usize,
    /// Existing rows left absent for the run's date.
    pub unobserved: usize,
    /// Observations dropped because an earlier one had the same key.
    pub duplicate_observations: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub history: PriceHistory,
    pub metadata: Vec<CardMetadata>,
    pub stats: MergeStats,
}

/// Folds one run's observations into the wide price table.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    placeholder_image: String,
}

impl MergeEngine {
    pub fn new(placeholder_image: impl Into<String>) -> Self {
        Self {
            placeholder_image: placeholder_image.into(),
        }
    }

    pub fn placeholder_image(&self) -> &str {
        &self.placeholder_image
    }

    /// Produce the next generation of the dataset.
    ///
    /// Existing rows keep their positions and earlier dates; the run's date
    /// column is (re)written from scratch, so merging the same run twice gives
    /// the same table. Unseen keys are appended in observation order.
    pub fn merge(
        &self,
        prior: PriceHistory,
        observations: &[PriceObservation],
        metadata: &[CardMetadata],
        date: &DateTag,
    ) -> MergeOutcome {
        let mut history = prior;
        let mut stats = MergeStats::default();
        let prior_len = history.len();

        // Runs first so an observation carrying the new real image lands on
        // the reconciled row instead of creating a second one.
        stats.reconciled = self.reconcile_placeholders(&mut history, metadata);

        let column = history.ensure_date(date);
        for row in history.rows_mut() {
            row.set_price(column, None);
        }

        let mut positions: HashMap<CompositeKey, usize> = HashMap::with_capacity(history.len());
        for (position, row) in history.rows().iter().enumerate() {
            positions.entry(row.key()).or_insert(position);
        }

        let mut seen = HashSet::with_capacity(observations.len());
        for observation in observations {
            let key = observation.key();
            if !seen.insert(key.clone()) {
                stats.duplicate_observations += 1;
                continue;
            }

            match positions.get(&key) {
                Some(&position) => {
                    history.rows_mut()[position].set_price(column, Some(observation.price));
                    stats.matched += 1;
                }
                None => {
                    let position = history.push_row(
                        observation.position_index.clone(),
                        observation.display_name.clone(),
                        observation.image_ref.clone(),
                    );
                    history.rows_mut()[position].set_price(column, Some(observation.price));
                    positions.insert(key, position);
                    stats.inserted += 1;
                }
            }
        }

        stats.unobserved = history.rows()[..prior_len]
            .iter()
            .filter(|row| row.prices()[column].is_none())
            .count();

        if stats.duplicate_observations > 0 {
            tracing::warn!("Ignored {} duplicate observations", stats.duplicate_observations);
        }

        MergeOutcome {
            history,
            metadata: dedup_metadata(metadata),
            stats,
        }
    }

    /// Give placeholder rows the real image their card now has.
    ///
    /// For each metadata record with a real image, the first row of the same
    /// card still holding the placeholder takes that image. A row is left alone
    /// if another row already owns the resulting key. Returns the update count.
    pub fn reconcile_placeholders(&self, history: &mut PriceHistory, metadata: &[CardMetadata]) -> usize {
        let mut owned: HashSet<CompositeKey> = history.rows().iter().map(|row| row.key()).collect();
        let mut updated = 0;

        for record in metadata {
            if record.image_ref == self.placeholder_image {
                continue;
            }

            let Some(position) = history
                .rows()
                .iter()
                .position(|row| row.same_card(record) && row.image_ref == self.placeholder_image)
            else {
                continue;
            };

            let target = record.key();
            if owned.contains(&target) {
                tracing::warn!(
                    "Not updating image for {} ({}) at row {}: {} is already tracked",
                    record.display_name,
                    record.position_index,
                    position,
                    target
                );
                continue;
            }

            let row = &mut history.rows_mut()[position];
            owned.remove(&row.key());
            row.image_ref = record.image_ref.clone();
            owned.insert(target);
            updated += 1;

            tracing::info!(
                "Updated image for {} ({}) at row {}",
                record.display_name,
                record.position_index,
                position
            );
        }

        updated
    }
}

/// First record per composite key, in input order.
pub fn dedup_metadata(metadata: &[CardMetadata]) -> Vec<CardMetadata> {
    let mut seen = HashSet::with_capacity(metadata.len());
    metadata
        .iter()
        .filter(|record| seen.insert(record.key()))
        .cloned()
        .collect()
}
