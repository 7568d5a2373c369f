//! Validated per-run metric records.
//!
//! A [`MetricRecord`] is one row of provider-vs-reference performance for a
//! single provider, variable and analysis run. Every numeric field is a
//! [`Stat`], which keeps "column absent" apart from "present but not a number".

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Marker written wherever a statistic is undefined.
pub const NAN_MARKER: &str = "nan";

/// A numeric cell after ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Stat {
    /// The column or cell was not supplied.
    #[default]
    Absent,
    /// The cell was supplied but did not hold a finite real number.
    Undefined,
    Defined(f64),
}

impl Stat {
    /// Parses a raw cell. Empty or missing cells are [`Stat::Absent`];
    /// anything that is not a finite number is [`Stat::Undefined`].
    pub fn parse(cell: Option<&str>) -> Self {
        let Some(raw) = cell.map(str::trim) else {
            return Stat::Absent;
        };
        if raw.is_empty() {
            return Stat::Absent;
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Stat::Defined(v),
            _ => Stat::Undefined,
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Stat::Defined(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_supplied(self) -> bool {
        !matches!(self, Stat::Absent)
    }
}

impl Serialize for Stat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Stat::Absent => serializer.serialize_none(),
            Stat::Undefined => serializer.serialize_str(NAN_MARKER),
            Stat::Defined(v) => serializer.serialize_f64(*v),
        }
    }
}

/// `serialize_with` helper rendering `None` as [`NAN_MARKER`].
pub fn serialize_nan<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_str(NAN_MARKER),
    }
}

/// One accepted row. Immutable once ingested; the
/// `(provider, variable, run_id)` triple is unique within an ingestion.
///
/// Field order is the column order of the central metric log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub provider: String,
    pub variable: String,
    pub run_id: String,
    pub timestamp: Option<DateTime<Utc>>,

    pub n_provider: Stat,
    pub n_reference: Stat,
    pub coverage_pct: Stat,
    pub derived_pct: Stat,

    pub bias: Stat,
    pub mae: Stat,
    pub rmse: Stat,
    pub corr: Stat,
    pub over_pct: Stat,
    pub under_pct: Stat,

    // provider vs reference linear fit
    pub slope: Stat,
    pub intercept: Stat,
    pub r_squared: Stat,

    pub diurnal_amplitude: Stat,
    pub diurnal_peak_hour: Stat,

    // thresholded-event detection
    pub pod: Stat,
    pub far: Stat,
    pub csi: Stat,
}

impl MetricRecord {
    /// Creates a record with every statistic absent.
    pub fn new(provider: &str, variable: &str, run_id: &str) -> Self {
        MetricRecord {
            provider: provider.to_string(),
            variable: variable.to_string(),
            run_id: run_id.to_string(),
            timestamp: None,
            n_provider: Stat::Absent,
            n_reference: Stat::Absent,
            coverage_pct: Stat::Absent,
            derived_pct: Stat::Absent,
            bias: Stat::Absent,
            mae: Stat::Absent,
            rmse: Stat::Absent,
            corr: Stat::Absent,
            over_pct: Stat::Absent,
            under_pct: Stat::Absent,
            slope: Stat::Absent,
            intercept: Stat::Absent,
            r_squared: Stat::Absent,
            diurnal_amplitude: Stat::Absent,
            diurnal_peak_hour: Stat::Absent,
            pod: Stat::Absent,
            far: Stat::Absent,
            csi: Stat::Absent,
        }
    }

    /// Set the run timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn key(&self) -> (String, String, String) {
        (
            self.provider.clone(),
            self.variable.clone(),
            self.run_id.clone(),
        )
    }

    /// True when at least one of bias, MAE or RMSE is a real number.
    pub fn has_core_value(&self) -> bool {
        [self.bias, self.mae, self.rmse]
            .iter()
            .any(|s| s.value().is_some())
    }
}
