//! Language fences: the areas where a language label may be assigned.

use crate::error::FenceError;
use crate::geojson::Document;
use crate::record::is_valid_language_code;
use async_trait::async_trait;
use dashmap::DashMap;
use geo::{BoundingRect, Coord, Intersects, Point, Polygon, Rect};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// The authorized-area polygon set of one language.
#[derive(Debug, Clone)]
pub struct LanguageFence {
    pub code: String,
    polygons: Vec<(Rect<f64>, Polygon<f64>)>,
}

impl LanguageFence {
    pub fn new(code: impl Into<String>, polygons: Vec<Polygon<f64>>) -> Self {
        let polygons = polygons
            .into_iter()
            .filter_map(|p| p.bounding_rect().map(|bbox| (bbox, p)))
            .collect();
        Self {
            code: code.into(),
            polygons,
        }
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Boundary points count as inside.
    pub fn contains(&self, coordinate: Coord<f64>) -> bool {
        let point = Point::from(coordinate);
        self.polygons
            .iter()
            .any(|(bbox, polygon)| bbox.intersects(&coordinate) && polygon.intersects(&point))
    }
}

/// Where fences come from.
#[async_trait]
pub trait GeofenceSource: Send + Sync {
    /// `Ok(None)` when no fence is registered for `code`.
    async fn load(&self, code: &str) -> Result<Option<LanguageFence>, FenceError>;
}

/// Reads `<dir>/<code>.json` GeoJSON files.
#[derive(Debug, Clone)]
pub struct DirectoryFenceSource {
    dir: PathBuf,
}

impl DirectoryFenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Codes that could leave the directory are rejected.
    pub fn path_for(&self, code: &str) -> Result<PathBuf, FenceError> {
        if !is_valid_language_code(code) {
            return Err(FenceError::InvalidCode(code.to_owned()));
        }
        Ok(self.dir.join(format!("{code}.json")))
    }

    /// Language codes with a fence file in the directory, sorted.
    pub async fn available_codes(&self) -> Result<Vec<String>, FenceError> {
        let io_err = |source| FenceError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut codes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if is_valid_language_code(stem) => codes.push(stem.to_owned()),
                _ => tracing::debug!(path = %path.display(), "Skipping fence file with an invalid code"),
            }
        }
        codes.sort();
        Ok(codes)
    }
}

pub(crate) async fn read_fence_file(path: &Path, code: &str) -> Result<Option<LanguageFence>, FenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(FenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let document = Document::from_slice(&bytes).map_err(|source| FenceError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(LanguageFence::new(code, document.polygons())))
}

#[async_trait]
impl GeofenceSource for DirectoryFenceSource {
    async fn load(&self, code: &str) -> Result<Option<LanguageFence>, FenceError> {
        read_fence_file(&self.path_for(code)?, code).await
    }
}

/// Fences held in memory. Handy for tests and for callers that build fences
/// programmatically.
#[derive(Debug, Clone, Default)]
pub struct StaticFenceSource {
    fences: HashMap<String, LanguageFence>,
}

impl StaticFenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fence(mut self, fence: LanguageFence) -> Self {
        self.fences.insert(fence.code.clone(), fence);
        self
    }
}

#[async_trait]
impl GeofenceSource for StaticFenceSource {
    async fn load(&self, code: &str) -> Result<Option<LanguageFence>, FenceError> {
        Ok(self.fences.get(code).cloned())
    }
}

type FenceSlot = Arc<OnceCell<Option<Arc<LanguageFence>>>>;

/// Per-run, append-only cache in front of a [`GeofenceSource`].
///
/// Each code is loaded at most once successfully, including the "no fence"
/// answer. Failed loads are not cached and are retried on the next lookup.
pub struct GeofenceStore {
    source: Arc<dyn GeofenceSource>,
    cache: DashMap<String, FenceSlot>,
}

impl GeofenceStore {
    pub fn new(source: Arc<dyn GeofenceSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    pub async fn fence(&self, code: &str) -> Result<Option<Arc<LanguageFence>>, FenceError> {
        // Clone the slot out so no map shard lock is held across the load.
        let slot = self.cache.entry(code.to_owned()).or_default().clone();
        let fence = slot
            .get_or_try_init(|| async {
                let loaded = self.source.load(code).await?;
                if let Some(fence) = &loaded {
                    tracing::debug!(code, polygons = fence.polygon_count(), "Loaded language fence");
                }
                Ok::<_, FenceError>(loaded.map(Arc::new))
            })
            .await?;
        Ok(fence.clone())
    }

    /// `Ok(true)` when `code` has no fence or one of its polygons holds
    /// `coordinate`.
    pub async fn is_inside(&self, code: &str, coordinate: Coord<f64>) -> Result<bool, FenceError> {
        Ok(match self.fence(code).await? {
            Some(fence) => fence.contains(coordinate),
            None => true,
        })
    }

    /// Loads every listed code up front. Returns how many fences exist.
    pub async fn preload(&self, codes: &[String]) -> Result<usize, FenceError> {
        let mut loaded = 0;
        for code in codes {
            if self.fence(code).await?.is_some() {
                loaded += 1;
            }
        }
        tracing::info!(fences = loaded, "Preloaded language fences");
        Ok(loaded)
    }

    pub fn cached_codes(&self) -> usize {
        self.cache.iter().filter(|slot| slot.value().initialized()).count()
    }
}
