use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Variables compared when no explicit list is configured.
pub const DEFAULT_VARIABLES: &[&str] = &[
    "precipitation",
    "temperature_2m",
    "wind_direction_100m",
    "wind_speed_100m",
];

/// How not-a-number cells in fit and detection scores
/// (`r_squared`, `pod`, `far`, `csi`) are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreNanPolicy {
    /// Keep them undefined.
    #[default]
    Undefined,
    /// Read a literal `nan` cell as `0.0` (no skill). Other unparseable
    /// cells stay undefined.
    Zero,
}

/// Tunables for ingestion, aggregation and ranking.
///
/// Stored as a JSON object on disk; every key is optional:
/// ```json
/// {
///   "bias_epsilon": 0.001,
///   "variables": ["precipitation", "temperature_2m"],
///   "score_nan_policy": "undefined",
///   "concurrency": 4
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaterConfig {
    /// `|bias_median|` below this is classified as neutral.
    pub bias_epsilon: f64,
    /// Variables to keep. Empty keeps everything.
    pub variables: Vec<String>,
    pub score_nan_policy: ScoreNanPolicy,
    /// Maximum number of run files read at once.
    pub concurrency: usize,
}

impl Default for RaterConfig {
    fn default() -> Self {
        RaterConfig {
            bias_epsilon: 1e-3,
            variables: DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect(),
            score_nan_policy: ScoreNanPolicy::Undefined,
            concurrency: 4,
        }
    }
}

impl RaterConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RaterConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` if given, else the file named by `RATER_CONFIG`, else defaults.
    pub fn resolve(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => match std::env::var("RATER_CONFIG") {
                Ok(p) if !p.is_empty() => Self::load(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn wants_variable(&self, variable: &str) -> bool {
        self.variables.is_empty() || self.variables.iter().any(|v| v == variable)
    }
}
