//! langmap: language territories from geolocated, language-tagged
//! observations.
//!
//! Stages, leaves first:
//!
//! - [`cursor`]: keyset-paginated, failure-tolerant iteration over a store.
//! - [`fence`]: per-run cache of the areas each language is allowed in.
//! - [`resolver`]: one language per location (gate, rank, walk).
//! - [`sites`]: resolved locations as scaled Voronoi sites.
//! - [`tessellation`] and [`synth`]: cells dissolved per language and
//!   clipped to the land mask, with per-language failure isolation.
//! - [`output`]: territories back in degrees, labelled, as GeoJSON.
//!
//! [`aggregate`] and [`stats`] maintain and summarise the location
//! collection the build reads from.

pub mod aggregate;
pub mod algebra;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fence;
pub mod geojson;
pub mod landmask;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod resolver;
pub mod scale;
pub mod sites;
pub mod stats;
pub mod store;
pub mod synth;
pub mod tessellation;

pub use aggregate::{aggregate, AggregateOptions, AggregateSummary};
pub use config::{GatePolicy, PipelineConfig, RankingCriterion, DEFAULT_SCALE_FACTOR, MAX_OUTPUT_DECIMALS};
pub use cursor::{BatchCursor, CursorOptions, CursorSummary, ExecutionMode};
pub use error::{PipelineError, Result};
pub use fence::{DirectoryFenceSource, GeofenceSource, GeofenceStore, LanguageFence, StaticFenceSource};
pub use landmask::LandMask;
pub use metrics::PipelineMetrics;
pub use output::{LanguageFeature, LanguageLayer, OutputAssembler};
pub use pipeline::{BuildReport, RunContext, TerritoryPipeline};
pub use record::{LocationRecord, Observation, SpatialKey};
pub use resolver::LanguageResolver;
pub use stats::{collect_stats, LocationStats};
pub use store::{LocationStore, MemoryStore, RecordStore};
pub use synth::{DirectoryDiagnostics, MemoryDiagnostics, TerritoryOutcome, TerritorySynthesizer};
