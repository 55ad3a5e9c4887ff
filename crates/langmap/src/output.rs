//! Brings territories back to degrees and emits the labelled layer.

use crate::error::{PipelineError, Result};
use crate::geojson::{Feature, FeatureCollection, Geometry};
use crate::scale::{round_multi_polygon, scale_down};
use crate::synth::TerritoryOutcome;
use geo::MultiPolygon;
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageFeature {
    pub language: String,
    pub geometry: MultiPolygon<f64>,
    /// The geometry is an unclipped fallback.
    pub degraded: bool,
}

/// The final labelled polygon collection, one feature per language.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanguageLayer {
    pub features: Vec<LanguageFeature>,
}

impl LanguageLayer {
    pub fn languages(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.language.as_str()).collect()
    }

    pub fn to_geojson(&self) -> FeatureCollection {
        let features = self
            .features
            .iter()
            .map(|f| {
                let mut properties = Map::new();
                properties.insert("language".into(), Value::from(f.language.as_str()));
                if f.degraded {
                    properties.insert("degraded".into(), Value::Bool(true));
                }
                Feature::new(Geometry::from(&f.geometry), properties)
            })
            .collect();
        FeatureCollection::new(features)
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let output_err = |source| PipelineError::Output {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(output_err)?;
        }
        let body = serde_json::to_vec(&self.to_geojson())?;
        tokio::fs::write(path, body).await.map_err(output_err)?;
        tracing::info!(path = %path.display(), features = self.features.len(), "Wrote language layer");
        Ok(())
    }
}

pub struct OutputAssembler {
    scale_factor: f64,
    decimals: Option<u32>,
}

impl OutputAssembler {
    pub fn new(scale_factor: f64, decimals: Option<u32>) -> Self {
        Self {
            scale_factor,
            decimals,
        }
    }

    pub fn assemble(&self, outcomes: &[TerritoryOutcome]) -> LanguageLayer {
        let features = outcomes
            .iter()
            .filter_map(|outcome| {
                let territory = outcome.territory()?;
                let mut geometry = scale_down(&territory.geometry, self.scale_factor);
                if let Some(decimals) = self.decimals {
                    geometry = round_multi_polygon(&geometry, decimals);
                }
                Some(LanguageFeature {
                    language: territory.language.clone(),
                    geometry,
                    degraded: outcome.is_degraded(),
                })
            })
            .collect();
        LanguageLayer { features }
    }
}
