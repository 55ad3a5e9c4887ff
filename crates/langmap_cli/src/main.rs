mod config;

use crate::config::{AggregateArgs, BuildArgs, Cli, Command, CursorArgs, LogFormat, StatsArgs};
use anyhow::Context;
use clap::Parser;
use langmap::store::MemoryStore;
use langmap::{
    aggregate, collect_stats, AggregateOptions, CursorOptions, DirectoryDiagnostics, DirectoryFenceSource, LandMask,
    LocationRecord, PipelineMetrics, RunContext, TerritoryPipeline,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    tracing::info!(command = ?cli.command, "langmap starting");

    let metrics = match &cli.command {
        Command::Aggregate(args) => run_aggregate(args, cli.quiet).await?,
        Command::Stats(args) => run_stats(args, cli.quiet).await?,
        Command::Build(args) => run_build(args, cli.quiet).await?,
    };

    if let Some(path) = &cli.metrics_out {
        let text = metrics.render().context("Failed to render metrics")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    // Logs go to stderr so stdout only carries command output.
    let builder = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn cursor_options<K>(args: &CursorArgs, quiet: bool) -> CursorOptions<K> {
    CursorOptions {
        batch_size: args.batch_size,
        limit: args.limit,
        show_progress: !quiet,
        ..CursorOptions::default()
    }
}

fn load_locations(path: &Path) -> anyhow::Result<MemoryStore<LocationRecord>> {
    MemoryStore::load_locations(path).with_context(|| format!("Failed to load locations from {}", path.display()))
}

async fn run_aggregate(args: &AggregateArgs, quiet: bool) -> anyhow::Result<Arc<PipelineMetrics>> {
    let metrics = PipelineMetrics::new().context("Failed to create metrics registry")?;
    let observations = MemoryStore::load_observations(&args.observations)
        .with_context(|| format!("Failed to load observations from {}", args.observations.display()))?;
    let locations = load_locations(&args.locations)?;

    let options = AggregateOptions {
        min_text_length: args.min_text_length,
        reset: args.clean,
        cursor: cursor_options(&args.cursor, quiet),
    };
    let summary = aggregate(&observations, &locations, options)
        .await
        .context("Aggregation failed")?;
    metrics.record_cursor(summary.visited, summary.failed);
    metrics.observations_aggregated_total.inc_by(summary.merged);

    locations
        .save_locations(&args.locations)
        .with_context(|| format!("Failed to save locations to {}", args.locations.display()))?;
    tracing::info!(
        merged = summary.merged,
        skipped = summary.skipped,
        locations = locations.len(),
        last_id = ?summary.last_id,
        "Saved location collection"
    );
    Ok(Arc::new(metrics))
}

async fn run_stats(args: &StatsArgs, quiet: bool) -> anyhow::Result<Arc<PipelineMetrics>> {
    let metrics = PipelineMetrics::new().context("Failed to create metrics registry")?;
    let locations = load_locations(&args.locations)?;
    let stats = collect_stats(&locations, args.ranking.into(), args.top, cursor_options(&args.cursor, quiet))
        .await
        .context("Failed to collect statistics")?;
    metrics.record_cursor(stats.unique_locations, 0);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Observations collected: {}", stats.total_observations);
        println!("Unique locations: {}", stats.unique_locations);
        for share in &stats.top_languages {
            println!("  {:<8} {:>8} {:>6.2}%", share.code, share.locations, share.share * 100.0);
        }
    }
    Ok(Arc::new(metrics))
}

async fn run_build(args: &BuildArgs, quiet: bool) -> anyhow::Result<Arc<PipelineMetrics>> {
    let config = args.pipeline_config(quiet);
    let land = LandMask::load(&args.land, config.scale_factor)
        .await
        .with_context(|| format!("Failed to load land mask from {}", args.land.display()))?;
    let locations = load_locations(&args.locations)?;

    let fence_source = Arc::new(DirectoryFenceSource::new(&args.fences));
    let ctx = RunContext::new(config, fence_source.clone()).context("Invalid pipeline configuration")?;
    tracing::info!(run_id = %ctx.run_id, "Created run context");

    if args.preload_fences && !ctx.config.ignore_fences {
        let codes = fence_source
            .available_codes()
            .await
            .with_context(|| format!("Failed to list fences in {}", args.fences.display()))?;
        ctx.fences.preload(&codes).await.context("Failed to preload fences")?;
    }

    let diagnostics = Arc::new(DirectoryDiagnostics::new(&args.diagnostics_dir));
    let report = TerritoryPipeline::with_defaults(diagnostics)
        .run(&ctx, &locations, &land)
        .await
        .context("Territory build failed")?;
    report.layer.write(&args.output).await?;

    tracing::info!(
        run_id = %report.run_id,
        output = %args.output.display(),
        languages = ?report.layer.languages(),
        "Build complete"
    );

    Ok(ctx.metrics.clone())
}
