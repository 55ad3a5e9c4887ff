use clap::{Args, Parser, Subcommand, ValueEnum};
use langmap::{GatePolicy, PipelineConfig, RankingCriterion, DEFAULT_SCALE_FACTOR};
use std::path::PathBuf;

/// `langmap` - Language territory maps from geolocated observations.
///
/// `aggregate` folds language-tagged observations into per-location signals,
/// `stats` summarises the location collection and `build` turns it into one
/// land-clipped territory per language, written as GeoJSON.
#[derive(Parser, Debug)]
#[command(name = "langmap", version, about, long_about = None)]
pub struct Cli {
    /// Log line format.
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Json, global = true)]
    pub log_format: LogFormat,

    /// Hide progress bars.
    #[arg(long, env = "QUIET", global = true)]
    pub quiet: bool,

    /// Write Prometheus metrics in text format to this file when done.
    #[arg(long, env = "METRICS_OUT", global = true)]
    pub metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge raw observations into the location collection.
    Aggregate(AggregateArgs),
    /// Print collection statistics.
    Stats(StatsArgs),
    /// Build the language territory layer.
    Build(BuildArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// Observations whose top detection was the language.
    Occurrences,
    /// Summed detector confidence.
    Score,
}

impl From<Ranking> for RankingCriterion {
    fn from(ranking: Ranking) -> Self {
        match ranking {
            Ranking::Occurrences => RankingCriterion::Occurrences,
            Ranking::Score => RankingCriterion::Score,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Accept locations with at least `--min-observations`.
    Threshold,
    /// Like threshold, but a location sitting exactly at the minimum also
    /// needs `--min-density-ratio` observations per distinct language.
    DensityRescue,
}

#[derive(Args, Debug, Clone)]
pub struct CursorArgs {
    /// Records fetched per page.
    #[arg(long, env = "BATCH_SIZE", default_value_t = 1000)]
    pub batch_size: usize,

    /// Stop after this many records.
    #[arg(long, env = "LIMIT")]
    pub limit: Option<u64>,
}

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// JSON Lines file with one observation per line.
    #[arg(long, env = "OBSERVATIONS_PATH")]
    pub observations: PathBuf,

    /// Location collection snapshot, created when missing.
    #[arg(long, env = "LOCATIONS_PATH", default_value = "data/locations.json")]
    pub locations: PathBuf,

    /// Skip observations whose text is shorter than this.
    #[arg(long, env = "MIN_TEXT_LENGTH", default_value_t = 0)]
    pub min_text_length: usize,

    /// Drop the existing location collection and rebuild it.
    #[arg(long, default_value_t = false)]
    pub clean: bool,

    #[command(flatten)]
    pub cursor: CursorArgs,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[arg(long, env = "LOCATIONS_PATH", default_value = "data/locations.json")]
    pub locations: PathBuf,

    #[arg(long, value_enum, env = "RANKING_CRITERION", default_value_t = Ranking::Occurrences)]
    pub ranking: Ranking,

    /// Number of languages listed.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Print the statistics as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub cursor: CursorArgs,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[arg(long, env = "LOCATIONS_PATH", default_value = "data/locations.json")]
    pub locations: PathBuf,

    /// GeoJSON land polygons every territory is clipped to.
    #[arg(long, env = "LAND_PATH", default_value = "data/land.json")]
    pub land: PathBuf,

    /// Directory of `<code>.json` language fences.
    #[arg(long, env = "FENCES_DIR", default_value = "data/fences")]
    pub fences: PathBuf,

    /// Load every fence file before the scan instead of on first use.
    #[arg(long, default_value_t = false)]
    pub preload_fences: bool,

    /// Ignore language fences altogether.
    #[arg(long, env = "IGNORE_FENCES", default_value_t = false)]
    pub raw: bool,

    #[arg(long, env = "OUTPUT_PATH", default_value = "output/language-areas.json")]
    pub output: PathBuf,

    /// Where failed geometry operands are dumped.
    #[arg(long, env = "DIAGNOSTICS_DIR", default_value = "output")]
    pub diagnostics_dir: PathBuf,

    /// Comma-separated language codes that are never assigned.
    #[arg(long, env = "EXCLUDE_LANGUAGES", default_value = "")]
    pub exclude_languages: String,

    #[arg(long, value_enum, env = "GATE", default_value_t = Gate::DensityRescue)]
    pub gate: Gate,

    #[arg(long, env = "MIN_OBSERVATIONS", default_value_t = 2)]
    pub min_observations: u64,

    #[arg(long, env = "MIN_DENSITY_RATIO", default_value_t = 1.5)]
    pub min_density_ratio: f64,

    #[arg(long, value_enum, env = "RANKING_CRITERION", default_value_t = Ranking::Occurrences)]
    pub ranking: Ranking,

    /// Coordinates are multiplied by this during geometry work.
    #[arg(long, env = "SCALE_FACTOR", default_value_t = DEFAULT_SCALE_FACTOR)]
    pub scale_factor: f64,

    /// Round output coordinates to this many decimals.
    #[arg(long, env = "DECIMALS")]
    pub decimals: Option<u32>,

    #[command(flatten)]
    pub cursor: CursorArgs,
}

impl BuildArgs {
    pub fn pipeline_config(&self, quiet: bool) -> PipelineConfig {
        let gate = match self.gate {
            Gate::Threshold => GatePolicy::Threshold {
                min: self.min_observations,
            },
            Gate::DensityRescue => GatePolicy::DensityRescue {
                min: self.min_observations,
                min_ratio: self.min_density_ratio,
            },
        };
        PipelineConfig {
            batch_size: self.cursor.batch_size,
            limit: self.cursor.limit,
            gate,
            ranking: self.ranking.into(),
            excluded_languages: PipelineConfig::parse_language_list(&self.exclude_languages),
            ignore_fences: self.raw,
            scale_factor: self.scale_factor,
            output_decimals: self.decimals,
            quiet,
        }
    }
}
