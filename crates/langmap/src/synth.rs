//! Territory synthesis: dissolve the cells of each language and clip them
//! to land.
//!
//! Every language is processed on its own. A geometry failure in one
//! language degrades only that language, which then carries a fallback
//! geometry and a diagnostic dump; the other languages are unaffected.

use crate::algebra::PolygonAlgebra;
use crate::geojson::{Feature, Geometry};
use crate::record::is_valid_language_code;
use crate::tessellation::Cell;
use async_trait::async_trait;
use geo::{Area, MultiPolygon};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageTerritory {
    pub language: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    Union,
    Intersect,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Union => "union",
            FailureStage::Intersect => "intersect",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerritoryOutcome {
    Clipped(LanguageTerritory),
    /// A boolean operation failed; `fallback` is unclipped.
    Degraded {
        stage: FailureStage,
        reason: String,
        fallback: LanguageTerritory,
    },
    /// Nothing of the language is left on land.
    Dropped { language: String },
}

impl TerritoryOutcome {
    pub fn language(&self) -> &str {
        match self {
            TerritoryOutcome::Clipped(t) => &t.language,
            TerritoryOutcome::Degraded { fallback, .. } => &fallback.language,
            TerritoryOutcome::Dropped { language } => language,
        }
    }

    pub fn territory(&self) -> Option<&LanguageTerritory> {
        match self {
            TerritoryOutcome::Clipped(t) => Some(t),
            TerritoryOutcome::Degraded { fallback, .. } => Some(fallback),
            TerritoryOutcome::Dropped { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, TerritoryOutcome::Degraded { .. })
    }
}

/// The operand a failed operation was working on.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub language: String,
    pub stage: FailureStage,
    pub reason: String,
    /// Scaled coordinates, exactly as handed to the polygon engine.
    pub geometry: MultiPolygon<f64>,
}

impl Diagnostic {
    pub fn to_feature(&self) -> Feature {
        let mut properties = Map::new();
        properties.insert("language".into(), Value::from(self.language.as_str()));
        properties.insert("stage".into(), Value::from(self.stage.as_str()));
        properties.insert("reason".into(), Value::from(self.reason.as_str()));
        Feature::new(Geometry::from(&self.geometry), properties)
    }
}

/// Where failed operands are dumped for later inspection.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn persist(&self, diagnostic: &Diagnostic) -> std::io::Result<()>;
}

/// Writes `error-<stage>-<language>.json` files into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryDiagnostics {
    dir: PathBuf,
}

impl DirectoryDiagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Fails for language codes that could leave the directory.
    pub fn path_for(&self, diagnostic: &Diagnostic) -> std::io::Result<PathBuf> {
        if !is_valid_language_code(&diagnostic.language) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' is not a valid language code", diagnostic.language),
            ));
        }
        Ok(self
            .dir
            .join(format!("error-{}-{}.json", diagnostic.stage, diagnostic.language)))
    }
}

#[async_trait]
impl DiagnosticsSink for DirectoryDiagnostics {
    async fn persist(&self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        let path = self.path_for(diagnostic)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(&diagnostic.to_feature())?;
        tokio::fs::write(path, body).await
    }
}

/// Keeps diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemoryDiagnostics {
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl DiagnosticsSink for MemoryDiagnostics {
    async fn persist(&self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        self.entries.lock().push(diagnostic.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisReport {
    /// One outcome per language, ordered by language code.
    pub outcomes: Vec<TerritoryOutcome>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SynthesisReport {
    pub fn outcome(&self, language: &str) -> Option<&TerritoryOutcome> {
        self.outcomes.iter().find(|o| o.language() == language)
    }

    pub fn clipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TerritoryOutcome::Clipped(_)))
            .count()
    }

    pub fn degraded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_degraded()).count()
    }

    pub fn dropped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TerritoryOutcome::Dropped { .. }))
            .count()
    }

    /// Hands every diagnostic to `sink`. Write failures are logged and
    /// otherwise ignored.
    pub async fn persist_diagnostics(&self, sink: &dyn DiagnosticsSink) -> usize {
        let mut written = 0;
        for diagnostic in &self.diagnostics {
            match sink.persist(diagnostic).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(
                    language = %diagnostic.language,
                    stage = %diagnostic.stage,
                    error = %e,
                    "Failed to persist geometry diagnostic"
                ),
            }
        }
        written
    }
}

pub struct TerritorySynthesizer {
    algebra: Arc<dyn PolygonAlgebra>,
}

impl TerritorySynthesizer {
    pub fn new(algebra: Arc<dyn PolygonAlgebra>) -> Self {
        Self { algebra }
    }

    /// Groups `cells` by language, dissolves each group and clips it to
    /// `land`. CPU bound; run it off the async executor.
    pub fn synthesize(&self, cells: &[Cell], land: &MultiPolygon<f64>) -> SynthesisReport {
        let mut groups: BTreeMap<&str, Vec<&Cell>> = BTreeMap::new();
        for cell in cells {
            groups.entry(cell.language.as_str()).or_default().push(cell);
        }

        let mut report = SynthesisReport::default();
        for (language, mut group) in groups {
            group.sort_by_key(|c| c.site_index);
            let outcome = self.synthesize_language(language, &group, land, &mut report.diagnostics);
            match &outcome {
                TerritoryOutcome::Clipped(t) => {
                    tracing::debug!(language, cells = group.len(), polygons = t.geometry.0.len(), "Clipped territory")
                }
                TerritoryOutcome::Degraded { stage, reason, .. } => {
                    tracing::warn!(language, %stage, %reason, "Territory degraded, using unclipped fallback")
                }
                TerritoryOutcome::Dropped { .. } => {
                    tracing::debug!(language, "Territory has no land, dropped")
                }
            }
            report.outcomes.push(outcome);
        }

        tracing::info!(
            languages = report.outcomes.len(),
            clipped = report.clipped(),
            degraded = report.degraded(),
            dropped = report.dropped(),
            "Synthesized territories"
        );
        report
    }

    fn synthesize_language(
        &self,
        language: &str,
        group: &[&Cell],
        land: &MultiPolygon<f64>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> TerritoryOutcome {
        let territory = |geometry| LanguageTerritory {
            language: language.to_owned(),
            geometry,
        };

        // ----- Union ---
        let mut dissolved = MultiPolygon::new(Vec::new());
        for (i, cell) in group.iter().enumerate() {
            let next = MultiPolygon(vec![cell.boundary.clone()]);
            if i == 0 {
                dissolved = next;
                continue;
            }
            match self.algebra.union(&dissolved, &next) {
                Ok(merged) => dissolved = merged,
                Err(e) => {
                    diagnostics.push(Diagnostic {
                        language: language.to_owned(),
                        stage: FailureStage::Union,
                        reason: e.to_string(),
                        geometry: dissolved,
                    });
                    let undissolved = group.iter().map(|c| c.boundary.clone()).collect();
                    return TerritoryOutcome::Degraded {
                        stage: FailureStage::Union,
                        reason: e.to_string(),
                        fallback: territory(MultiPolygon(undissolved)),
                    };
                }
            }
        }

        // ----- Clip ---
        match self.algebra.intersect(&dissolved, land) {
            Ok(clipped) if clipped.0.is_empty() || clipped.unsigned_area() == 0.0 => TerritoryOutcome::Dropped {
                language: language.to_owned(),
            },
            Ok(clipped) => TerritoryOutcome::Clipped(territory(clipped)),
            Err(e) => {
                diagnostics.push(Diagnostic {
                    language: language.to_owned(),
                    stage: FailureStage::Intersect,
                    reason: e.to_string(),
                    geometry: dissolved.clone(),
                });
                TerritoryOutcome::Degraded {
                    stage: FailureStage::Intersect,
                    reason: e.to_string(),
                    fallback: territory(dissolved),
                }
            }
        }
    }
}
