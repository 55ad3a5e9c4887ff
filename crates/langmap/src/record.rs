//! Location records and the raw observations they are aggregated from.

use crate::config::RankingCriterion;
use crate::error::RecordError;
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Anything the batch cursor can page through: records sorted by a unique key.
pub trait Keyed {
    type Key: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> &Self::Key;
}

/// Bounding-box fingerprint of a location: four `lng,lat` corners joined by
/// commas, e.g. `"-3.8,40.3,-3.8,40.6,-3.5,40.6,-3.5,40.3"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpatialKey(String);

impl SpatialKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Builds the key from a polygon ring, the way the detector tags places.
    pub fn from_corners(corners: &[[f64; 2]; 4]) -> Self {
        let parts: Vec<String> = corners
            .iter()
            .flat_map(|[lng, lat]| [lng.to_string(), lat.to_string()])
            .collect();
        Self(parts.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn corners(&self) -> Result<[[f64; 2]; 4], RecordError> {
        let parts: Vec<&str> = self.0.split(',').map(str::trim).collect();
        if parts.len() != 8 {
            return Err(RecordError::KeyArity {
                key: self.0.clone(),
                found: parts.len(),
            });
        }

        let mut values = [0.0f64; 8];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| RecordError::KeyComponent {
                    key: self.0.clone(),
                    component: (*part).to_owned(),
                })?;
        }

        Ok([
            [values[0], values[1]],
            [values[2], values[3]],
            [values[4], values[5]],
            [values[6], values[7]],
        ])
    }

    /// Midpoint between the first and the third corner, as `(lng, lat)`.
    pub fn representative_coordinate(&self) -> Result<Coord<f64>, RecordError> {
        let corners = self.corners()?;
        Ok(Coord {
            x: (corners[0][0] + corners[2][0]) / 2.0,
            y: (corners[0][1] + corners[2][1]) / 2.0,
        })
    }
}

impl fmt::Display for SpatialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSignal {
    pub code: String,
    /// Detector confidence summed over all observations.
    pub score: f64,
    /// Observations whose top detection was this language.
    #[serde(default)]
    pub occurrences: u64,
}

impl LanguageSignal {
    fn weight(&self, criterion: RankingCriterion) -> f64 {
        match criterion {
            RankingCriterion::Occurrences => self.occurrences as f64,
            RankingCriterion::Score => self.score,
        }
    }
}

/// Per-language signals of one location, kept sorted by language code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LanguageSignal>", into = "Vec<LanguageSignal>")]
pub struct LanguageSignals(Vec<LanguageSignal>);

impl LanguageSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageSignal> {
        self.0.iter()
    }

    pub fn get(&self, code: &str) -> Option<&LanguageSignal> {
        self.position(code).ok().map(|i| &self.0[i])
    }

    fn position(&self, code: &str) -> Result<usize, usize> {
        self.0.binary_search_by(|s| s.code.as_str().cmp(code))
    }

    fn entry(&mut self, code: &str) -> &mut LanguageSignal {
        let index = match self.position(code) {
            Ok(i) => i,
            Err(i) => {
                self.0.insert(
                    i,
                    LanguageSignal {
                        code: code.to_owned(),
                        score: 0.0,
                        occurrences: 0,
                    },
                );
                i
            }
        };
        &mut self.0[index]
    }

    /// Folds one observation's detections in: scores are summed and the top
    /// detected language gains one occurrence.
    pub fn merge_detections(&mut self, detections: &[Detection]) {
        for detection in detections {
            self.entry(&detection.code).score += detection.score;
        }
        if let Some(top) = top_detection(detections) {
            self.entry(&top.code).occurrences += 1;
        }
    }

    /// Codes ordered by descending weight; ties fall back to ascending code.
    pub fn ranked(&self, criterion: RankingCriterion) -> Vec<&str> {
        let mut signals: Vec<&LanguageSignal> = self.0.iter().collect();
        signals.sort_by(|a, b| {
            b.weight(criterion)
                .partial_cmp(&a.weight(criterion))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.code.cmp(&b.code))
        });
        signals.into_iter().map(|s| s.code.as_str()).collect()
    }
}

impl From<Vec<LanguageSignal>> for LanguageSignals {
    fn from(mut signals: Vec<LanguageSignal>) -> Self {
        signals.sort_by(|a, b| a.code.cmp(&b.code));
        // Later duplicates are folded into the first entry for that code.
        let mut merged: Vec<LanguageSignal> = Vec::with_capacity(signals.len());
        for signal in signals {
            match merged.last_mut() {
                Some(last) if last.code == signal.code => {
                    last.score += signal.score;
                    last.occurrences += signal.occurrences;
                }
                _ => merged.push(signal),
            }
        }
        Self(merged)
    }
}

impl From<LanguageSignals> for Vec<LanguageSignal> {
    fn from(signals: LanguageSignals) -> Self {
        signals.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub key: SpatialKey,
    pub observations: u64,
    pub languages: LanguageSignals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
}

impl LocationRecord {
    pub fn new(key: SpatialKey) -> Self {
        Self {
            key,
            observations: 0,
            languages: LanguageSignals::new(),
            place_name: None,
        }
    }

    /// The top-ranked language, ignoring exclusions and fences.
    pub fn main_language(&self, criterion: RankingCriterion) -> Option<&str> {
        self.languages.ranked(criterion).into_iter().next()
    }
}

impl Keyed for LocationRecord {
    type Key = SpatialKey;

    fn key(&self) -> &SpatialKey {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub code: String,
    pub score: f64,
}

/// One language-tagged observation as produced by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: u64,
    pub spatial_key: SpatialKey,
    #[serde(default)]
    pub text_length: usize,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
}

impl Keyed for Observation {
    type Key = u64;

    fn key(&self) -> &u64 {
        &self.id
    }
}

/// Language codes that are safe to use as a file name: `[A-Za-z0-9_-]+`.
pub fn is_valid_language_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Highest-scoring detection; the first one wins on equal scores.
pub fn top_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, d| match best {
        Some(b) if b.score >= d.score => Some(b),
        _ => Some(d),
    })
}
