//! Per-row rejection reasons collected during ingestion.

use serde::Serialize;
use thiserror::Error;

/// Why a raw row did not become a [`MetricRecord`](crate::record::MetricRecord).
///
/// These are accumulated into the ingestion report; they never abort a batch.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    #[error("{source_name} row {row}: malformed record: {reason}")]
    MalformedRecord {
        source_name: String,
        row: usize,
        reason: String,
    },

    #[error("{source_name} row {row}: duplicate record ({provider}, {variable}, {run_id})")]
    DuplicateRecord {
        source_name: String,
        row: usize,
        provider: String,
        variable: String,
        run_id: String,
    },
}

impl RecordError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordError::DuplicateRecord { .. })
    }
}
