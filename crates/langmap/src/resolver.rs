//! Picks the one language a location is labelled with, or none.
//!
//! Resolution runs Gate, Rank and Walk in order. The gate rejects locations
//! without enough evidence; ranking orders the candidate languages; the walk
//! accepts the first candidate that is neither excluded nor fenced out.

use crate::config::{GatePolicy, PipelineConfig, RankingCriterion};
use crate::fence::GeofenceStore;
use crate::record::LocationRecord;
use geo::Coord;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Why a location ended up without a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Not enough observations.
    Gate,
    /// Every candidate was excluded or fenced out.
    Exhausted,
}

pub type Resolution = Result<String, Rejection>;

impl GatePolicy {
    /// Whether a record with `observations` and `distinct` candidate
    /// languages passes.
    pub fn admits(&self, observations: u64, distinct: usize) -> bool {
        match *self {
            GatePolicy::Threshold { min } => observations >= min,
            GatePolicy::DensityRescue { min, min_ratio } => {
                if observations > min {
                    true
                } else if observations == min && observations > 1 && distinct > 0 {
                    observations as f64 / distinct as f64 > min_ratio
                } else {
                    false
                }
            }
        }
    }
}

pub struct LanguageResolver {
    gate: GatePolicy,
    ranking: RankingCriterion,
    excluded: BTreeSet<String>,
    fences: Option<Arc<GeofenceStore>>,
}

impl LanguageResolver {
    /// `fences = None` disables the fence step.
    pub fn new(
        gate: GatePolicy,
        ranking: RankingCriterion,
        excluded: BTreeSet<String>,
        fences: Option<Arc<GeofenceStore>>,
    ) -> Self {
        Self {
            gate,
            ranking,
            excluded,
            fences,
        }
    }

    pub fn from_config(config: &PipelineConfig, fences: Arc<GeofenceStore>) -> Self {
        let fences = (!config.ignore_fences).then_some(fences);
        Self::new(
            config.gate,
            config.ranking,
            config.excluded_languages.clone(),
            fences,
        )
    }

    /// The accepted language of `record` at `coordinate`.
    pub async fn resolve(&self, record: &LocationRecord, coordinate: Coord<f64>) -> Resolution {
        if !self.gate.admits(record.observations, record.languages.len()) {
            return Err(Rejection::Gate);
        }

        for code in record.languages.ranked(self.ranking) {
            if self.excluded.contains(code) {
                continue;
            }
            if !self.inside_fence(code, record, coordinate).await {
                continue;
            }
            return Ok(code.to_owned());
        }
        Err(Rejection::Exhausted)
    }

    async fn inside_fence(&self, code: &str, record: &LocationRecord, coordinate: Coord<f64>) -> bool {
        let Some(fences) = &self.fences else {
            return true;
        };
        match fences.is_inside(code, coordinate).await {
            Ok(inside) => inside,
            Err(e) => {
                // A broken fence must not hide the language everywhere.
                tracing::warn!(code, key = %record.key, error = %e, "Fence lookup failed, treating location as inside");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FenceError;
    use crate::fence::{GeofenceSource, LanguageFence, StaticFenceSource};
    use crate::record::{LanguageSignal, LanguageSignals, SpatialKey};
    use async_trait::async_trait;
    use geo::polygon;

    const MADRID: Coord<f64> = Coord { x: -3.7, y: 40.4 };

    fn record(observations: u64, signals: &[(&str, u64)]) -> LocationRecord {
        let mut record = LocationRecord::new(SpatialKey::new("-3.8,40.3,-3.8,40.5,-3.6,40.5,-3.6,40.3"));
        record.observations = observations;
        record.languages = LanguageSignals::from(
            signals
                .iter()
                .map(|&(code, occurrences)| LanguageSignal {
                    code: code.into(),
                    score: occurrences as f64,
                    occurrences,
                })
                .collect::<Vec<_>>(),
        );
        record
    }

    fn fences_with_es_in_portugal() -> Arc<GeofenceStore> {
        let portugal = polygon![(x: -9.5, y: 37.0), (x: -6.2, y: 37.0), (x: -6.2, y: 42.1), (x: -9.5, y: 42.1)];
        let source = StaticFenceSource::new().with_fence(LanguageFence::new("es", vec![portugal]));
        Arc::new(GeofenceStore::new(Arc::new(source)))
    }

    #[test]
    fn test_threshold_gate() {
        let gate = GatePolicy::Threshold { min: 3 };
        assert!(!gate.admits(2, 1));
        assert!(gate.admits(3, 5));
    }

    #[test]
    fn test_density_rescue_gate() {
        let gate = GatePolicy::DensityRescue { min: 2, min_ratio: 1.5 };
        assert!(gate.admits(3, 3));
        assert!(gate.admits(2, 1));
        assert!(!gate.admits(2, 2));
        assert!(!gate.admits(1, 1));

        let single = GatePolicy::DensityRescue { min: 1, min_ratio: 0.5 };
        // A single observation is never rescued.
        assert!(!single.admits(1, 1));
    }

    #[tokio::test]
    async fn test_walk_skips_excluded_and_fenced_out() {
        let resolver = LanguageResolver::new(
            GatePolicy::Threshold { min: 1 },
            RankingCriterion::Occurrences,
            ["en".to_owned()].into(),
            Some(fences_with_es_in_portugal()),
        );
        let record = record(10, &[("en", 5), ("es", 3), ("fr", 2)]);
        assert_eq!(resolver.resolve(&record, MADRID).await, Ok("fr".to_owned()));
    }

    #[tokio::test]
    async fn test_ignore_fences_disables_the_fence_step() {
        let config = PipelineConfig {
            gate: GatePolicy::Threshold { min: 1 },
            excluded_languages: ["en".to_owned()].into(),
            ignore_fences: true,
            ..PipelineConfig::default()
        };
        let resolver = LanguageResolver::from_config(&config, fences_with_es_in_portugal());
        let record = record(10, &[("en", 5), ("es", 3), ("fr", 2)]);
        assert_eq!(resolver.resolve(&record, MADRID).await, Ok("es".to_owned()));
    }

    #[tokio::test]
    async fn test_gate_rescue_depends_on_language_spread() {
        let resolver = LanguageResolver::new(
            GatePolicy::default(),
            RankingCriterion::Occurrences,
            BTreeSet::new(),
            None,
        );
        let focused = record(2, &[("eu", 2)]);
        assert_eq!(resolver.resolve(&focused, MADRID).await, Ok("eu".to_owned()));

        let spread = record(2, &[("eu", 1), ("es", 1), ("ca", 0)]);
        assert_eq!(resolver.resolve(&spread, MADRID).await, Err(Rejection::Gate));
    }

    #[tokio::test]
    async fn test_exhausted_walk() {
        let resolver = LanguageResolver::new(
            GatePolicy::Threshold { min: 1 },
            RankingCriterion::Occurrences,
            ["und".to_owned()].into(),
            None,
        );
        let record = record(4, &[("und", 4)]);
        assert_eq!(resolver.resolve(&record, MADRID).await, Err(Rejection::Exhausted));
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let resolver = LanguageResolver::new(
            GatePolicy::Threshold { min: 1 },
            RankingCriterion::Occurrences,
            BTreeSet::new(),
            Some(fences_with_es_in_portugal()),
        );
        let tied = record(6, &[("pt", 3), ("gl", 3)]);
        for _ in 0..5 {
            assert_eq!(resolver.resolve(&tied, MADRID).await, Ok("gl".to_owned()));
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl GeofenceSource for BrokenSource {
        async fn load(&self, code: &str) -> Result<Option<LanguageFence>, FenceError> {
            Err(FenceError::Other(code.into(), "disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn test_fence_failure_fails_open() {
        let resolver = LanguageResolver::new(
            GatePolicy::Threshold { min: 1 },
            RankingCriterion::Occurrences,
            BTreeSet::new(),
            Some(Arc::new(GeofenceStore::new(Arc::new(BrokenSource)))),
        );
        let record = record(3, &[("es", 3)]);
        assert_eq!(resolver.resolve(&record, MADRID).await, Ok("es".to_owned()));
    }
}
