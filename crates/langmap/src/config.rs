//! Run configuration shared by every pipeline stage.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Coordinates are multiplied by this before tessellation and polygon
/// algebra, and divided by it again on output.
pub const DEFAULT_SCALE_FACTOR: f64 = 1e6;

/// An f64 carries 15 to 17 significant digits; more decimals than this only
/// round noise.
pub const MAX_OUTPUT_DECIMALS: u32 = 15;

/// Decides whether a location has gathered enough observations to be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatePolicy {
    /// Plain cutoff: `observations >= min`.
    Threshold { min: u64 },
    /// Above `min` is always eligible; exactly `min` is eligible only when the
    /// observations per distinct candidate language exceed `min_ratio`.
    DensityRescue { min: u64, min_ratio: f64 },
}

impl Default for GatePolicy {
    fn default() -> Self {
        GatePolicy::DensityRescue {
            min: 2,
            min_ratio: 1.5,
        }
    }
}

/// Which per-language signal orders the candidates of a location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingCriterion {
    /// How many observations picked this language as their top detection.
    #[default]
    Occurrences,
    /// Detector confidence summed over every observation.
    Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Maximum number of records to visit. `None` means the whole collection.
    pub limit: Option<u64>,
    pub gate: GatePolicy,
    pub ranking: RankingCriterion,
    pub excluded_languages: BTreeSet<String>,
    /// Skip the fence check entirely.
    pub ignore_fences: bool,
    pub scale_factor: f64,
    /// Round output coordinates to this many decimals.
    pub output_decimals: Option<u32>,
    /// Hide progress bars.
    pub quiet: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            limit: None,
            gate: GatePolicy::default(),
            ranking: RankingCriterion::default(),
            excluded_languages: BTreeSet::new(),
            ignore_fences: false,
            scale_factor: DEFAULT_SCALE_FACTOR,
            output_decimals: None,
            quiet: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(ConfigError::ScaleFactor(self.scale_factor));
        }
        if let GatePolicy::DensityRescue { min_ratio, .. } = self.gate {
            if !min_ratio.is_finite() || min_ratio < 0.0 {
                return Err(ConfigError::DensityRatio(min_ratio));
            }
        }
        if let Some(decimals) = self.output_decimals {
            if decimals > MAX_OUTPUT_DECIMALS {
                return Err(ConfigError::OutputDecimals {
                    got: decimals,
                    max: MAX_OUTPUT_DECIMALS,
                });
            }
        }
        Ok(())
    }

    /// Parses a comma-separated exclusion list such as `"und,xx-Qaai"`.
    pub fn parse_language_list(list: &str) -> BTreeSet<String> {
        list.split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));

        config.batch_size = 10;
        config.scale_factor = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::ScaleFactor(0.0)));

        config.scale_factor = 1.0;
        config.gate = GatePolicy::DensityRescue {
            min: 2,
            min_ratio: f64::NAN,
        };
        assert!(matches!(config.validate(), Err(ConfigError::DensityRatio(_))));
    }

    #[test]
    fn test_validate_bounds_output_decimals() {
        let mut config = PipelineConfig {
            output_decimals: Some(MAX_OUTPUT_DECIMALS),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());

        config.output_decimals = Some(400);
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutputDecimals { got: 400, max: 15 })
        );
        config.output_decimals = Some(u32::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_language_list() {
        let codes = PipelineConfig::parse_language_list("en, und,,xx-Qaai ");
        let expected: Vec<&str> = vec!["en", "und", "xx-Qaai"];
        assert_eq!(codes.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"batch_size": 50, "gate": {"kind": "threshold", "min": 5}, "ranking": "score"}"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.gate, GatePolicy::Threshold { min: 5 });
        assert_eq!(config.ranking, RankingCriterion::Score);
        assert_eq!(config.scale_factor, DEFAULT_SCALE_FACTOR);
    }
}
