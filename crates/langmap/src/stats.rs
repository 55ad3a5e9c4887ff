//! Collection-wide counts for a location store.

use crate::config::RankingCriterion;
use crate::cursor::{BatchCursor, CursorOptions, ExecutionMode};
use crate::error::StoreError;
use crate::record::{LocationRecord, SpatialKey};
use crate::store::RecordStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageShare {
    pub code: String,
    /// Locations whose main language is `code`.
    pub locations: u64,
    /// `locations` over all locations with a main language.
    pub share: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationStats {
    pub total_observations: u64,
    pub unique_locations: u64,
    /// Sorted by descending location count, then code.
    pub top_languages: Vec<LanguageShare>,
}

#[derive(Default)]
struct Tally {
    observations: u64,
    locations: u64,
    main_languages: BTreeMap<String, u64>,
}

pub async fn collect_stats<S>(
    store: &S,
    ranking: RankingCriterion,
    top_n: usize,
    mut options: CursorOptions<SpatialKey>,
) -> Result<LocationStats, StoreError>
where
    S: RecordStore<Record = LocationRecord>,
{
    options.mode = ExecutionMode::Concurrent;
    let tally = Mutex::new(Tally::default());

    BatchCursor::new(store, options)
        .label("locations")
        .run(|record| {
            let tally = &tally;
            async move {
                let mut tally = tally.lock();
                tally.observations += record.observations;
                tally.locations += 1;
                if let Some(code) = record.main_language(ranking) {
                    *tally.main_languages.entry(code.to_owned()).or_default() += 1;
                }
                Ok::<_, Infallible>(())
            }
        })
        .await?;

    let tally = tally.into_inner();
    let labelled: u64 = tally.main_languages.values().sum();
    let mut top_languages: Vec<LanguageShare> = tally
        .main_languages
        .into_iter()
        .map(|(code, locations)| LanguageShare {
            code,
            locations,
            share: locations as f64 / labelled as f64,
        })
        .collect();
    top_languages.sort_by(|a, b| b.locations.cmp(&a.locations).then_with(|| a.code.cmp(&b.code)));
    top_languages.truncate(top_n);

    tracing::info!(
        observations = tally.observations,
        locations = tally.locations,
        "Collected location statistics"
    );
    Ok(LocationStats {
        total_observations: tally.observations,
        unique_locations: tally.locations,
        top_languages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LanguageSignal, LanguageSignals};
    use crate::store::MemoryStore;

    fn record(key: &str, observations: u64, code: Option<&str>) -> LocationRecord {
        let mut record = LocationRecord::new(SpatialKey::new(key));
        record.observations = observations;
        if let Some(code) = code {
            record.languages = LanguageSignals::from(vec![LanguageSignal {
                code: code.into(),
                score: 1.0,
                occurrences: observations,
            }]);
        }
        record
    }

    #[tokio::test]
    async fn test_counts_observations_locations_and_shares() {
        let store = MemoryStore::from_records([
            record("a", 5, Some("en")),
            record("b", 2, Some("es")),
            record("c", 1, Some("en")),
            record("d", 3, Some("fr")),
            record("e", 4, None),
        ]);
        let stats = collect_stats(&store, RankingCriterion::Occurrences, 2, CursorOptions::default())
            .await
            .unwrap();

        assert_eq!(stats.total_observations, 15);
        assert_eq!(stats.unique_locations, 5);
        assert_eq!(stats.top_languages.len(), 2);
        assert_eq!(stats.top_languages[0].code, "en");
        assert!((stats.top_languages[0].share - 0.5).abs() < 1e-9);
        assert_eq!(stats.top_languages[1].code, "es");
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = MemoryStore::<LocationRecord>::new();
        let stats = collect_stats(&store, RankingCriterion::Score, 10, CursorOptions::default())
            .await
            .unwrap();
        assert_eq!(stats, LocationStats::default());
    }
}
