//! Turns resolved location records into scaled Voronoi sites.

use crate::cursor::{BatchCursor, CursorOptions, CursorSummary, ExecutionMode};
use crate::error::{RecordError, StoreError};
use crate::record::{LocationRecord, SpatialKey};
use crate::resolver::LanguageResolver;
use crate::scale::scale_coord;
use crate::store::RecordStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A tessellation seed in scaled coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoronoiSite {
    pub x: f64,
    pub y: f64,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct SiteBuildReport {
    /// Sites ordered by the key of the record they came from.
    pub sites: Vec<VoronoiSite>,
    pub visited: u64,
    pub failed: u64,
    /// Records rejected by the gate or left without a language.
    pub unresolved: u64,
    pub last_key: Option<SpatialKey>,
}

pub struct SiteBuilder<'a> {
    resolver: &'a LanguageResolver,
    scale_factor: f64,
}

impl<'a> SiteBuilder<'a> {
    pub fn new(resolver: &'a LanguageResolver, scale_factor: f64) -> Self {
        Self {
            resolver,
            scale_factor,
        }
    }

    /// Scans `store` concurrently and collects one site per resolved record.
    pub async fn build<S>(
        &self,
        store: &S,
        mut options: CursorOptions<SpatialKey>,
        on_failure: impl Fn(&SpatialKey, &str) + Send + Sync,
    ) -> Result<SiteBuildReport, StoreError>
    where
        S: RecordStore<Record = LocationRecord>,
    {
        options.mode = ExecutionMode::Concurrent;
        let accepted: Mutex<Vec<(SpatialKey, VoronoiSite)>> = Mutex::new(Vec::new());
        let unresolved = Mutex::new(0u64);

        let summary: CursorSummary<SpatialKey> = BatchCursor::new(store, options)
            .label("locations")
            .on_failure(on_failure)
            .run(|record| {
                let accepted = &accepted;
                let unresolved = &unresolved;
                async move {
                    match self.site_for(&record).await? {
                        Some(site) => accepted.lock().push((record.key, site)),
                        None => *unresolved.lock() += 1,
                    }
                    Ok::<_, RecordError>(())
                }
            })
            .await?;

        let mut accepted = accepted.into_inner();
        accepted.sort_by(|a, b| a.0.cmp(&b.0));
        let sites: Vec<VoronoiSite> = accepted.into_iter().map(|(_, site)| site).collect();

        tracing::info!(sites = sites.len(), failed = summary.failed, "Added Voronoi sites");
        Ok(SiteBuildReport {
            sites,
            visited: summary.processed,
            failed: summary.failed,
            unresolved: unresolved.into_inner(),
            last_key: summary.last_key,
        })
    }

    async fn site_for(&self, record: &LocationRecord) -> Result<Option<VoronoiSite>, RecordError> {
        let coordinate = record.key.representative_coordinate()?;
        let Ok(language) = self.resolver.resolve(record, coordinate).await else {
            return Ok(None);
        };
        let scaled = scale_coord(coordinate, self.scale_factor);
        Ok(Some(VoronoiSite {
            x: scaled.x,
            y: scaled.y,
            language,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatePolicy, RankingCriterion};
    use crate::record::{LanguageSignal, LanguageSignals};
    use crate::store::MemoryStore;
    use std::collections::BTreeSet;

    fn record(key: &str, observations: u64, code: &str) -> LocationRecord {
        let mut record = LocationRecord::new(SpatialKey::new(key));
        record.observations = observations;
        record.languages = LanguageSignals::from(vec![LanguageSignal {
            code: code.into(),
            score: observations as f64,
            occurrences: observations,
        }]);
        record
    }

    fn resolver() -> LanguageResolver {
        LanguageResolver::new(
            GatePolicy::Threshold { min: 2 },
            RankingCriterion::Occurrences,
            BTreeSet::new(),
            None,
        )
    }

    #[tokio::test]
    async fn test_builds_scaled_sites_in_key_order() {
        let store = MemoryStore::from_records([
            record("3,3,3,5,5,5,5,3", 4, "fr"),
            record("1,1,1,3,3,3,3,1", 4, "en"),
            record("7,7,7,9,9,9,9,7", 1, "de"),
        ]);
        let resolver = resolver();
        let report = SiteBuilder::new(&resolver, 10.0)
            .build(&store, CursorOptions { batch_size: 2, ..Default::default() }, |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.visited, 3);
        assert_eq!(report.unresolved, 1);
        assert_eq!(
            report.sites,
            vec![
                VoronoiSite { x: 20.0, y: 20.0, language: "en".into() },
                VoronoiSite { x: 40.0, y: 40.0, language: "fr".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_keys_are_per_record_failures() {
        let store = MemoryStore::from_records([record("0,0,0,2,2,2,2,0", 3, "en"), record("broken", 3, "es")]);
        let resolver = resolver();
        let failures = Mutex::new(Vec::new());
        let report = SiteBuilder::new(&resolver, 1.0)
            .build(&store, CursorOptions::default(), |key, _| failures.lock().push(key.clone()))
            .await
            .unwrap();

        assert_eq!(report.sites.len(), 1);
        assert_eq!(report.failed, 1);
        assert_eq!(failures.into_inner(), vec![SpatialKey::new("broken")]);
    }
}
