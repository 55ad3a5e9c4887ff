//! Folds raw observations into per-location language signals.

use crate::cursor::{BatchCursor, CursorOptions, ExecutionMode};
use crate::error::StoreError;
use crate::record::{LanguageSignals, Observation};
use crate::store::{LocationPatch, LocationStore, RecordStore};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Shorter texts carry too little signal to count.
    pub min_text_length: usize,
    /// Clear the location collection before aggregating.
    pub reset: bool,
    pub cursor: CursorOptions<u64>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            min_text_length: 0,
            reset: false,
            cursor: CursorOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSummary {
    pub visited: u64,
    pub merged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_id: Option<u64>,
}

/// Merges every observation into its location. Observations are applied one
/// at a time since several of them usually share a location.
pub async fn aggregate<O, L>(observations: &O, locations: &L, options: AggregateOptions) -> Result<AggregateSummary, StoreError>
where
    O: RecordStore<Record = Observation>,
    L: LocationStore,
{
    if options.reset {
        locations.clear().await?;
        tracing::info!("Cleared location collection");
    }

    let mut cursor_options = options.cursor;
    cursor_options.mode = ExecutionMode::Sequential;

    let min_text_length = options.min_text_length;
    let merged = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);
    let summary = BatchCursor::new(observations, cursor_options)
        .label("observations")
        .run(|observation| {
            let (merged, skipped) = (&merged, &skipped);
            async move {
                let counter = if merge_one(locations, observation, min_text_length).await? {
                    merged
                } else {
                    skipped
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Ok::<_, StoreError>(())
            }
        })
        .await?;
    let (merged, skipped) = (merged.into_inner(), skipped.into_inner());

    tracing::info!(merged, skipped, failed = summary.failed, "Aggregated observations");
    Ok(AggregateSummary {
        visited: summary.processed,
        merged,
        skipped,
        failed: summary.failed,
        last_id: summary.last_key,
    })
}

async fn merge_one<L: LocationStore>(locations: &L, observation: Observation, min_text_length: usize) -> Result<bool, StoreError> {
    if observation.text_length < min_text_length || observation.detections.is_empty() {
        return Ok(false);
    }

    let existing = locations.find_one(&observation.spatial_key).await?;
    let mut languages = existing.as_ref().map(|r| r.languages.clone()).unwrap_or_else(LanguageSignals::new);
    languages.merge_detections(&observation.detections);

    // The first place name seen for a location sticks.
    let set_place_name = match existing {
        Some(record) if record.place_name.is_some() => None,
        _ => observation.place_name,
    };

    locations
        .upsert(
            &observation.spatial_key,
            LocationPatch {
                set_languages: Some(languages),
                set_place_name,
                inc_observations: 1,
            },
        )
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Detection, LocationRecord, SpatialKey};
    use crate::store::MemoryStore;

    fn observation(id: u64, key: &str, length: usize, detections: &[(&str, f64)]) -> Observation {
        Observation {
            id,
            spatial_key: SpatialKey::new(key),
            text_length: length,
            detections: detections
                .iter()
                .map(|&(code, score)| Detection {
                    code: code.into(),
                    score,
                })
                .collect(),
            place_name: Some(format!("place-{id}")),
        }
    }

    #[tokio::test]
    async fn test_observations_sharing_a_location_all_count() {
        let observations = MemoryStore::from_records([
            observation(1, "k1", 50, &[("es", 0.9), ("ca", 0.1)]),
            observation(2, "k1", 50, &[("ca", 0.7), ("es", 0.3)]),
            observation(3, "k1", 50, &[("es", 0.8)]),
            observation(4, "k2", 50, &[("en", 1.0)]),
            observation(5, "k2", 3, &[("en", 1.0)]),
            observation(6, "k2", 50, &[]),
        ]);
        let locations = MemoryStore::<LocationRecord>::new();
        let options = AggregateOptions {
            min_text_length: 10,
            cursor: CursorOptions { batch_size: 2, ..Default::default() },
            ..Default::default()
        };

        let summary = aggregate(&observations, &locations, options).await.unwrap();
        assert_eq!(summary.visited, 6);
        assert_eq!(summary.merged, 4);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.last_id, Some(6));

        let k1 = locations.get(&SpatialKey::new("k1")).unwrap();
        assert_eq!(k1.observations, 3);
        assert_eq!(k1.languages.get("es").unwrap().occurrences, 2);
        assert_eq!(k1.languages.get("ca").unwrap().occurrences, 1);
        assert!((k1.languages.get("es").unwrap().score - 2.0).abs() < 1e-9);
        assert_eq!(k1.place_name.as_deref(), Some("place-1"));
        assert_eq!(locations.get(&SpatialKey::new("k2")).unwrap().observations, 1);
    }

    #[tokio::test]
    async fn test_reset_rebuilds_from_scratch() {
        let observations = MemoryStore::from_records([observation(1, "k", 20, &[("fr", 1.0)])]);
        let locations = MemoryStore::<LocationRecord>::new();

        aggregate(&observations, &locations, AggregateOptions::default()).await.unwrap();
        aggregate(&observations, &locations, AggregateOptions::default()).await.unwrap();
        assert_eq!(locations.get(&SpatialKey::new("k")).unwrap().observations, 2);

        let reset = AggregateOptions {
            reset: true,
            ..Default::default()
        };
        aggregate(&observations, &locations, reset).await.unwrap();
        assert_eq!(locations.get(&SpatialKey::new("k")).unwrap().observations, 1);
    }
}
