//! End-to-end territory build: sites, tessellation, synthesis, output.

use crate::algebra::{GeoBooleanOps, PolygonAlgebra};
use crate::config::PipelineConfig;
use crate::cursor::CursorOptions;
use crate::error::{PipelineError, Result};
use crate::fence::{GeofenceSource, GeofenceStore};
use crate::landmask::LandMask;
use crate::metrics::PipelineMetrics;
use crate::output::{LanguageLayer, OutputAssembler};
use crate::record::{LocationRecord, SpatialKey};
use crate::resolver::LanguageResolver;
use crate::scale::world_bounds;
use crate::sites::SiteBuilder;
use crate::store::RecordStore;
use crate::synth::{DiagnosticsSink, SynthesisReport, TerritorySynthesizer};
use crate::tessellation::{HalfPlaneTessellator, TessellationEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Everything one run shares between its stages.
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub fences: Arc<GeofenceStore>,
    pub metrics: Arc<PipelineMetrics>,
}

impl RunContext {
    /// Validates `config`; every run gets a fresh fence cache.
    pub fn new(config: PipelineConfig, fence_source: Arc<dyn GeofenceSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            fences: Arc::new(GeofenceStore::new(fence_source)),
            metrics: Arc::new(PipelineMetrics::new()?),
        })
    }

    pub fn cursor_options<K>(&self) -> CursorOptions<K> {
        CursorOptions {
            batch_size: self.config.batch_size,
            limit: self.config.limit,
            show_progress: !self.config.quiet,
            ..CursorOptions::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub visited: u64,
    pub failed: u64,
    pub unresolved: u64,
    pub sites: usize,
    pub cells: usize,
    pub last_key: Option<SpatialKey>,
    pub synthesis: SynthesisReport,
    pub layer: LanguageLayer,
}

pub struct TerritoryPipeline {
    tessellator: Arc<dyn TessellationEngine>,
    synthesizer: Arc<TerritorySynthesizer>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl TerritoryPipeline {
    pub fn new(
        tessellator: Arc<dyn TessellationEngine>,
        algebra: Arc<dyn PolygonAlgebra>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            tessellator,
            synthesizer: Arc::new(TerritorySynthesizer::new(algebra)),
            diagnostics,
        }
    }

    /// Half-plane tessellation and `geo` boolean operations.
    pub fn with_defaults(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self::new(Arc::new(HalfPlaneTessellator::default()), Arc::new(GeoBooleanOps), diagnostics)
    }

    pub async fn run<S>(&self, ctx: &RunContext, store: &S, land: &LandMask) -> Result<BuildReport>
    where
        S: RecordStore<Record = LocationRecord>,
    {
        let span = tracing::info_span!("build", run_id = %ctx.run_id);
        self.run_stages(ctx, store, land).instrument(span).await
    }

    async fn run_stages<S>(&self, ctx: &RunContext, store: &S, land: &LandMask) -> Result<BuildReport>
    where
        S: RecordStore<Record = LocationRecord>,
    {
        let config = &ctx.config;
        tracing::info!(config = ?config, "Starting territory build");

        // ----- Sites ---
        let resolver = LanguageResolver::from_config(config, ctx.fences.clone());
        let built = SiteBuilder::new(&resolver, config.scale_factor)
            .build(store, ctx.cursor_options(), |_, _| {})
            .await?;
        ctx.metrics.record_cursor(built.visited, built.failed);
        ctx.metrics.sites.set(built.sites.len() as i64);
        let site_count = built.sites.len();

        // ----- Tessellation ---
        let tessellator = self.tessellator.clone();
        let bounds = world_bounds(config.scale_factor);
        let sites = built.sites;
        let tessellation = tokio::task::spawn_blocking(move || tessellator.compute(&sites, bounds))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;
        let cell_count = tessellation.cells.len();

        // ----- Territories ---
        let synthesizer = self.synthesizer.clone();
        let land_geometry = land.geometry().clone();
        let synthesis = tokio::task::spawn_blocking(move || synthesizer.synthesize(&tessellation.cells, &land_geometry))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?;
        synthesis.persist_diagnostics(self.diagnostics.as_ref()).await;

        ctx.metrics.territories_clipped.set(synthesis.clipped() as i64);
        ctx.metrics.territories_degraded.set(synthesis.degraded() as i64);
        ctx.metrics.territories_dropped.set(synthesis.dropped() as i64);

        // ----- Output ---
        let layer = OutputAssembler::new(config.scale_factor, config.output_decimals).assemble(&synthesis.outcomes);

        let elapsed = Utc::now() - ctx.started_at;
        ctx.metrics
            .build_duration_seconds
            .set(elapsed.num_milliseconds() as f64 / 1000.0);
        tracing::info!(
            sites = site_count,
            cells = cell_count,
            features = layer.features.len(),
            degraded = synthesis.degraded(),
            elapsed_ms = elapsed.num_milliseconds(),
            "Finished territory build"
        );

        Ok(BuildReport {
            run_id: ctx.run_id,
            visited: built.visited,
            failed: built.failed,
            unresolved: built.unresolved,
            sites: site_count,
            cells: cell_count,
            last_key: built.last_key,
            synthesis,
            layer,
        })
    }
}
