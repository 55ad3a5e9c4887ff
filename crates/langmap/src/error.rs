use std::path::PathBuf;
use thiserror::Error;

/// Failures of the record store. Always fatal for the run that hits them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error on store snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed store snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Problems with an individual location record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("spatial key '{key}' must hold 8 numbers, found {found}")]
    KeyArity { key: String, found: usize },

    #[error("spatial key '{key}' contains a non-numeric component '{component}'")]
    KeyComponent { key: String, component: String },
}

/// Loading a language fence failed (as opposed to the fence not existing).
#[derive(Error, Debug)]
pub enum FenceError {
    #[error("failed to read fence file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fence file {path} is not valid GeoJSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("fence for '{0}' could not be loaded: {1}")]
    Other(String, String),

    #[error("'{0}' is not a valid language code")]
    InvalidCode(String),
}

/// Raised by a polygon algebra engine on input it cannot process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("degenerate geometry: {0}")]
    Degenerate(String),

    #[error("non-finite coordinate in {0} operand")]
    NonFinite(&'static str),
}

/// The land mask is missing or corrupt. Fatal.
#[derive(Error, Debug)]
pub enum LandMaskError {
    #[error("failed to read land mask {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("land mask {path} is not valid GeoJSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("land mask contains no polygons")]
    Empty,

    #[error("land mask ring {ring} of polygon {polygon} has {points} points, at least 4 required")]
    ShortRing {
        polygon: usize,
        ring: usize,
        points: usize,
    },

    #[error("land mask contains non-finite coordinates")]
    NonFinite,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("scale factor must be finite and positive, got {0}")]
    ScaleFactor(f64),

    #[error("density ratio must be finite and non-negative, got {0}")]
    DensityRatio(f64),

    #[error("output decimals must be at most {max}, got {got}")]
    OutputDecimals { got: u32, max: u32 },
}

#[derive(Error, Debug)]
pub enum TessellationError {
    #[error("tessellation bounds are empty or non-finite")]
    InvalidBounds,

    #[error("site {index} has a non-finite coordinate")]
    NonFiniteSite { index: usize },

    #[error("vertex grid must be finite and positive, got {0}")]
    InvalidGrid(f64),
}

/// Top-level error for a pipeline run. Every variant aborts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    LandMask(#[from] LandMaskError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tessellation(#[from] TessellationError),

    #[error("failed to write output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("geometry worker failed: {0}")]
    Worker(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
