//! Data types produced by the aggregation and ranking pipeline.
//!
//! `Option<f64>` statistics are undefined when `None` and serialize as the
//! `nan` marker, never as zero.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::ingest::IngestReport;
use crate::record::serialize_nan;

/// Cross-run statistics for one `(provider, variable)` partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateGroup {
    pub provider: String,
    pub variable: String,
    /// Distinct runs contributing at least one defined bias, MAE or RMSE.
    pub run_count: usize,
    pub first_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,

    #[serde(serialize_with = "serialize_nan")]
    pub rmse_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub rmse_mean: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub rmse_std: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub bias_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub bias_mean: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub bias_std: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub mae_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub coverage_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub derived_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub corr_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub over_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub under_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub r_squared_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub diurnal_amplitude_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub pod_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub far_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub csi_median: Option<f64>,

    #[serde(serialize_with = "serialize_nan")]
    pub trend_rmse_per_day: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub trend_bias_per_day: Option<f64>,
}

impl AggregateGroup {
    /// A group with every statistic undefined and `run_count = 0`.
    pub fn empty(provider: &str, variable: &str) -> Self {
        AggregateGroup {
            provider: provider.to_string(),
            variable: variable.to_string(),
            run_count: 0,
            first_run: None,
            last_run: None,
            rmse_median: None,
            rmse_mean: None,
            rmse_std: None,
            bias_median: None,
            bias_mean: None,
            bias_std: None,
            mae_median: None,
            coverage_median: None,
            derived_median: None,
            corr_median: None,
            over_median: None,
            under_median: None,
            r_squared_median: None,
            diurnal_amplitude_median: None,
            pod_median: None,
            far_median: None,
            csi_median: None,
            trend_rmse_per_day: None,
            trend_bias_per_day: None,
        }
    }
}

/// Sign of a provider's median bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDirection {
    Overstates,
    Understates,
    Neutral,
    /// No defined bias to classify.
    Undefined,
}

impl fmt::Display for BiasDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BiasDirection::Overstates => "overstates",
            BiasDirection::Understates => "understates",
            BiasDirection::Neutral => "neutral",
            BiasDirection::Undefined => "nan",
        };
        f.write_str(label)
    }
}

/// One row of a per-variable ranking table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProvider {
    pub rank: usize,
    pub provider: String,
    pub run_count: usize,
    #[serde(serialize_with = "serialize_nan")]
    pub rmse_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub bias_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub coverage_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub trend_rmse_per_day: Option<f64>,
}

/// Providers ordered by ascending median RMSE for one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub variable: String,
    pub entries: Vec<RankedProvider>,
}

impl Ranking {
    pub fn providers(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.provider.as_str()).collect()
    }
}

/// One row of a bias-pattern table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasPattern {
    pub provider: String,
    #[serde(serialize_with = "serialize_nan")]
    pub bias_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub bias_mean: Option<f64>,
    pub trend_direction: BiasDirection,
    /// Whether the direction of `bias_mean` matches `trend_direction`.
    pub mean_agrees: bool,
    #[serde(serialize_with = "serialize_nan")]
    pub slope_bias_per_day: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasPatternTable {
    pub variable: String,
    pub entries: Vec<BiasPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallEntry {
    pub rank: usize,
    pub provider: String,
    /// Median of the provider's per-variable `rmse_median`s.
    #[serde(serialize_with = "serialize_nan")]
    pub median_of_medians_rmse: Option<f64>,
    /// Variables that contributed a defined `rmse_median`.
    pub variable_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallRanking {
    pub entries: Vec<OverallEntry>,
}

impl OverallRanking {
    pub fn providers(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.provider.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEntry {
    pub rank: usize,
    pub provider: String,
    #[serde(serialize_with = "serialize_nan")]
    pub csi_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub pod_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub far_median: Option<f64>,
}

/// Providers ordered by descending median CSI for a thresholded variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRanking {
    pub variable: String,
    pub entries: Vec<DetectionEntry>,
}

/// Spread of provider skill for one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSummary {
    pub variable: String,
    pub provider_count: usize,
    #[serde(serialize_with = "serialize_nan")]
    pub rmse_median: Option<f64>,
    #[serde(serialize_with = "serialize_nan")]
    pub rmse_std: Option<f64>,
}

/// Everything the composer renders, reproducible from the record set alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparativeReport {
    pub schema_version: u8,
    pub run_count: usize,
    pub record_count: usize,
    pub groups: Vec<AggregateGroup>,
    pub rankings: Vec<Ranking>,
    pub bias_patterns: Vec<BiasPatternTable>,
    pub overall: OverallRanking,
    pub detection: Vec<DetectionRanking>,
    pub variables: Vec<VariableSummary>,
    pub validation: IngestReport,
}
