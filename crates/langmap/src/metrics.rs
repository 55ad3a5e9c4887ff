use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus collectors for one pipeline run.
///
/// Shared by reference (or in an `Arc`) between the stages; nothing here is
/// served over HTTP, the CLI dumps [`PipelineMetrics::render`] to a file.
pub struct PipelineMetrics {
    pub registry: Registry,
    /// Records handed to a cursor callback, across every stage.
    pub records_visited_total: IntCounter,
    /// Callbacks that returned an error.
    pub record_failures_total: IntCounter,
    /// Observations merged into a location.
    pub observations_aggregated_total: IntCounter,
    /// Voronoi sites produced by the last site build.
    pub sites: IntGauge,
    pub territories_clipped: IntGauge,
    pub territories_degraded: IntGauge,
    pub territories_dropped: IntGauge,
    /// Wall time of the last completed build, in seconds.
    pub build_duration_seconds: Gauge,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("langmap".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric?;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            records_visited_total: reg!(IntCounter::new(
                "records_visited_total",
                "Records handed to a batch cursor callback"
            )),
            record_failures_total: reg!(IntCounter::new(
                "record_failures_total",
                "Batch cursor callbacks that failed"
            )),
            observations_aggregated_total: reg!(IntCounter::new(
                "observations_aggregated_total",
                "Observations merged into location records"
            )),
            sites: reg!(IntGauge::new("sites", "Voronoi sites of the last build")),
            territories_clipped: reg!(IntGauge::new(
                "territories_clipped",
                "Languages clipped to land without error"
            )),
            territories_degraded: reg!(IntGauge::new(
                "territories_degraded",
                "Languages emitted with an unclipped fallback geometry"
            )),
            territories_dropped: reg!(IntGauge::new(
                "territories_dropped",
                "Languages with no land left after clipping"
            )),
            build_duration_seconds: reg!(Gauge::new(
                "build_duration_seconds",
                "Wall time of the last territory build"
            )),
            registry,
        })
    }

    pub fn record_cursor(&self, visited: u64, failed: u64) {
        self.records_visited_total.inc_by(visited);
        self.record_failures_total.inc_by(failed);
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
