//! The land polygons every territory is clipped against.

use crate::error::LandMaskError;
use crate::geojson::Document;
use crate::scale::{polygon_is_finite, scale_up};
use geo::{MultiPolygon, Polygon};
use std::path::Path;

/// Validated land polygons, already in scaled space.
#[derive(Debug, Clone)]
pub struct LandMask {
    geometry: MultiPolygon<f64>,
}

impl LandMask {
    /// Validates `polygons` (unscaled) and scales them by `factor`.
    pub fn new(polygons: Vec<Polygon<f64>>, factor: f64) -> Result<Self, LandMaskError> {
        if polygons.is_empty() {
            return Err(LandMaskError::Empty);
        }
        for (p, polygon) in polygons.iter().enumerate() {
            let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
            for (r, ring) in rings.enumerate() {
                if ring.0.len() < 4 {
                    return Err(LandMaskError::ShortRing {
                        polygon: p,
                        ring: r,
                        points: ring.0.len(),
                    });
                }
            }
            if !polygon_is_finite(polygon) {
                return Err(LandMaskError::NonFinite);
            }
        }
        Ok(Self {
            geometry: scale_up(&MultiPolygon(polygons), factor),
        })
    }

    pub async fn load(path: &Path, factor: f64) -> Result<Self, LandMaskError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| LandMaskError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Document::from_slice(&bytes).map_err(|source| LandMaskError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mask = Self::new(document.polygons(), factor)?;
        tracing::info!(path = %path.display(), polygons = mask.geometry.0.len(), "Loaded land mask");
        Ok(mask)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }
}
