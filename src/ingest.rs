//! Run record ingestion.
//!
//! Summary tables are read as [`RawTable`]s (headers normalized through an
//! alias table, since summaries were written under several header
//! generations) and validated by an [`Ingestor`] into [`MetricRecord`]s.
//! Bad rows are collected into an [`IngestReport`]; they never abort a batch.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, Trim};
use flate2::read::GzDecoder;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{RaterConfig, ScoreNanPolicy};
use crate::error::RecordError;
use crate::record::{MetricRecord, Stat};

/// File-name prefix of timestamped per-run summaries,
/// e.g. `era5_comparison_summary_20250813_153900Z.csv`.
pub const SUMMARY_PREFIX: &str = "era5_comparison_summary_";
const SUMMARY_STAMP_FORMAT: &str = "%Y%m%d_%H%M%SZ";

/// Canonical columns understood by the ingestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Provider,
    Variable,
    RunId,
    Timestamp,
    NProvider,
    NReference,
    CoveragePct,
    DerivedPct,
    Bias,
    Mae,
    Rmse,
    Corr,
    OverPct,
    UnderPct,
    Slope,
    Intercept,
    RSquared,
    DiurnalAmplitude,
    DiurnalPeakHour,
    Pod,
    Far,
    Csi,
}

/// Header spellings (lowercased) mapped to their canonical column.
static ALIASES: &[(&str, Column)] = &[
    ("provider", Column::Provider),
    ("provider (api)", Column::Provider),
    ("provider (dostawca)", Column::Provider),
    ("variable", Column::Variable),
    ("zmienna", Column::Variable),
    ("variable (zmienna)", Column::Variable),
    ("run_id", Column::RunId),
    ("run_file", Column::RunId),
    ("timestamp", Column::Timestamp),
    ("run_ts", Column::Timestamp),
    ("n_provider", Column::NProvider),
    ("n_api", Column::NProvider),
    ("n_provider (liczba punktów api)", Column::NProvider),
    ("n_reference", Column::NReference),
    ("n_era5", Column::NReference),
    ("n", Column::NReference),
    ("n (liczba dopasowań z era5)", Column::NReference),
    ("coverage_pct", Column::CoveragePct),
    ("coverage%", Column::CoveragePct),
    ("pokrycie%", Column::CoveragePct),
    ("coverage_pct (% pokrycia z era5)", Column::CoveragePct),
    ("derived_pct", Column::DerivedPct),
    ("dorobione%", Column::DerivedPct),
    ("derived_pct (% dorobionych wartości)", Column::DerivedPct),
    ("bias", Column::Bias),
    ("bias_mean", Column::Bias),
    ("bias_mean (błąd średni: pred − era5)", Column::Bias),
    ("mae", Column::Mae),
    ("mae (średni błąd bezwzględny)", Column::Mae),
    ("rmse", Column::Rmse),
    ("rmse (pierwiastek średniego błędu kwadratowego)", Column::Rmse),
    ("corr", Column::Corr),
    ("correlation", Column::Corr),
    ("corr (korelacja pearsona)", Column::Corr),
    ("over_pct", Column::OverPct),
    ("%zawyż", Column::OverPct),
    ("over_pct (% przypadków z zawyżeniem)", Column::OverPct),
    ("under_pct", Column::UnderPct),
    ("%zaniż", Column::UnderPct),
    ("under_pct (% przypadków z zaniżeniem)", Column::UnderPct),
    ("slope", Column::Slope),
    ("intercept", Column::Intercept),
    ("r_squared", Column::RSquared),
    ("r2", Column::RSquared),
    ("r²", Column::RSquared),
    ("diurnal_amplitude", Column::DiurnalAmplitude),
    ("diurnal_amp", Column::DiurnalAmplitude),
    ("diurnal_peak_hour", Column::DiurnalPeakHour),
    ("pod", Column::Pod),
    ("far", Column::Far),
    ("csi", Column::Csi),
];

impl Column {
    /// Resolves a header cell. Matching is case-insensitive and trimmed.
    pub fn from_header(header: &str) -> Option<Column> {
        let needle = header.trim().to_lowercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == needle)
            .map(|(_, column)| *column)
    }
}

/// One data row keyed by canonical column.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    /// 1-based data row number within its table.
    pub row: usize,
    pub cells: HashMap<Column, String>,
    /// Set when the row could not be decoded at all.
    pub decode_error: Option<String>,
}

impl RawRow {
    pub fn new(row: usize) -> Self {
        RawRow {
            row,
            ..Default::default()
        }
    }

    /// Builder-style cell setter, mostly for in-memory tables.
    pub fn with(mut self, column: Column, value: &str) -> Self {
        self.cells.insert(column, value.to_string());
        self
    }

    pub fn get(&self, column: Column) -> Option<&str> {
        self.cells.get(&column).map(String::as_str)
    }

    fn stat(&self, column: Column) -> Stat {
        Stat::parse(self.get(column))
    }

    /// A fit or detection score. Under [`ScoreNanPolicy::Zero`] only a
    /// literal `nan` cell becomes `0.0`; other unparseable text stays undefined.
    fn score(&self, column: Column, policy: ScoreNanPolicy) -> Stat {
        let stat = self.stat(column);
        let is_nan_token = self
            .get(column)
            .is_some_and(|raw| raw.trim().eq_ignore_ascii_case("nan"));
        match (stat, policy) {
            (Stat::Undefined, ScoreNanPolicy::Zero) if is_nan_token => Stat::Defined(0.0),
            _ => stat,
        }
    }

    fn identifier(&self, column: Column) -> Option<String> {
        let value = self.get(column)?.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("nan") {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// A per-run summary table plus the run identity it was read under.
#[derive(Debug, Clone)]
pub struct RawTable {
    /// Where the table came from (path or label), used in rejection reasons.
    pub source: String,
    pub run_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn new(source: &str, run_id: &str, timestamp: Option<DateTime<Utc>>) -> Self {
        RawTable {
            source: source.to_string(),
            run_id: run_id.to_string(),
            timestamp,
            rows: Vec::new(),
        }
    }
}

/// Parses delimited text into a [`RawTable`].
///
/// Unknown columns are ignored; when two headers map to the same column the
/// first one wins. Rows that fail to decode are kept with a `decode_error`
/// so the ingestor can reject them individually.
pub fn parse_table<R: Read>(
    reader: R,
    source: &str,
    run_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut mapped = HashSet::new();
    let columns: Vec<Option<Column>> = rdr
        .headers()?
        .iter()
        .map(|h| Column::from_header(h).filter(|c| mapped.insert(*c)))
        .collect();

    let mut table = RawTable::new(source, run_id, timestamp);

    for (idx, result) in rdr.records().enumerate() {
        let mut row = RawRow::new(idx + 1);
        match result {
            Ok(record) => {
                for (column, value) in columns.iter().zip(record.iter()) {
                    if let Some(column) = column {
                        row.cells.insert(*column, value.to_string());
                    }
                }
            }
            Err(e) => row.decode_error = Some(e.to_string()),
        }
        table.rows.push(row);
    }

    debug!(source, rows = table.rows.len(), "Parsed table");
    Ok(table)
}

/// Reads a `.csv` or `.csv.gz` run file.
///
/// The run identity comes from the file name (see [`run_identity`]); without
/// a stamp in the name the file modification time is used as the timestamp.
pub fn read_table(path: &Path) -> Result<RawTable> {
    let source = path.display().to_string();
    let (run_id, stamp) = run_identity(path);
    let timestamp = stamp.or_else(|| modified_time(path));

    let file = File::open(path)?;
    if is_gzip(path) {
        parse_table(GzDecoder::new(file), &source, &run_id, timestamp)
    } else {
        parse_table(file, &source, &run_id, timestamp)
    }
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

/// True for `*.csv` and `*.csv.gz`.
pub fn is_run_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    name.ends_with(".csv") || name.ends_with(".csv.gz")
}

/// Derives `(run_id, timestamp)` from a file name.
///
/// The run id is the file stem (without `.csv`/`.csv.gz`); the timestamp is
/// parsed from `era5_comparison_summary_YYYYMMDD_HHMMSSZ` names only.
pub fn run_identity(path: &Path) -> (String, Option<DateTime<Utc>>) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(".gz").unwrap_or(name);
    let stem = stem
        .strip_suffix(".csv")
        .or_else(|| stem.strip_suffix(".CSV"))
        .unwrap_or(stem);

    let timestamp = stem
        .to_lowercase()
        .strip_prefix(SUMMARY_PREFIX)
        .and_then(|stamp| {
            NaiveDateTime::parse_from_str(&stamp.to_ascii_uppercase(), SUMMARY_STAMP_FORMAT).ok()
        })
        .map(|t| t.and_utc());

    (stem.to_string(), timestamp)
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Parses a timestamp cell in any of the forms the summaries were written in.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(t.with_timezone(&Utc));
    }
    for format in [SUMMARY_STAMP_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Outcome of an ingestion besides the accepted records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<RecordError>,
    /// Rows skipped by the variable filter.
    pub filtered: usize,
    /// Accepted rows whose values look inconsistent.
    pub warnings: Vec<String>,
    /// Files that could not be read at all.
    pub unreadable: Vec<String>,
}

impl IngestReport {
    pub fn malformed_count(&self) -> usize {
        self.rejected.iter().filter(|e| !e.is_duplicate()).count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.rejected.iter().filter(|e| e.is_duplicate()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.warnings.is_empty() && self.unreadable.is_empty()
    }
}

/// Accepted records plus the report of everything else.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub records: Vec<MetricRecord>,
    pub report: IngestReport,
}

/// Validates raw tables into records.
///
/// The first occurrence of a `(provider, variable, run_id)` triple wins;
/// later ones are rejected as duplicates.
pub struct Ingestor<'a> {
    config: &'a RaterConfig,
    seen: HashSet<(String, String, String)>,
    records: Vec<MetricRecord>,
    report: IngestReport,
}

impl<'a> Ingestor<'a> {
    pub fn new(config: &'a RaterConfig) -> Self {
        Ingestor {
            config,
            seen: HashSet::new(),
            records: Vec::new(),
            report: IngestReport::default(),
        }
    }

    /// Treats these triples as already ingested, e.g. the contents of the
    /// central log a new run is appended to.
    pub fn with_known_keys(
        mut self,
        keys: impl IntoIterator<Item = (String, String, String)>,
    ) -> Self {
        self.seen.extend(keys);
        self
    }

    pub fn ingest_table(&mut self, table: &RawTable) {
        for row in &table.rows {
            match self.build_record(table, row) {
                Ok(Some(record)) => {
                    let key = record.key();
                    if self.seen.contains(&key) {
                        warn!(
                            source = %table.source,
                            row = row.row,
                            provider = %record.provider,
                            variable = %record.variable,
                            run_id = %record.run_id,
                            "Duplicate record rejected"
                        );
                        self.report.rejected.push(RecordError::DuplicateRecord {
                            source_name: table.source.clone(),
                            row: row.row,
                            provider: key.0,
                            variable: key.1,
                            run_id: key.2,
                        });
                        continue;
                    }
                    self.report
                        .warnings
                        .extend(consistency_warnings(&table.source, row, &record));
                    self.seen.insert(key);
                    self.records.push(record);
                    self.report.accepted += 1;
                }
                Ok(None) => self.report.filtered += 1,
                Err(e) => {
                    warn!(error = %e, "Malformed record rejected");
                    self.report.rejected.push(e);
                }
            }
        }
    }

    /// Records a file-level read failure.
    pub fn record_unreadable(&mut self, source: &str, error: &str) {
        self.report.unreadable.push(format!("{}: {}", source, error));
    }

    pub fn finish(self) -> Ingested {
        Ingested {
            records: self.records,
            report: self.report,
        }
    }

    fn build_record(
        &self,
        table: &RawTable,
        row: &RawRow,
    ) -> std::result::Result<Option<MetricRecord>, RecordError> {
        let malformed = |reason: &str| RecordError::MalformedRecord {
            source_name: table.source.clone(),
            row: row.row,
            reason: reason.to_string(),
        };

        if let Some(e) = &row.decode_error {
            return Err(malformed(e));
        }
        let provider = row
            .identifier(Column::Provider)
            .ok_or_else(|| malformed("missing provider"))?;
        let variable = row
            .identifier(Column::Variable)
            .ok_or_else(|| malformed("missing variable"))?;

        if !self.config.wants_variable(&variable) {
            return Ok(None);
        }

        let run_id = row
            .identifier(Column::RunId)
            .unwrap_or_else(|| table.run_id.clone());
        // an unreadable row timestamp leaves the record untimed
        let timestamp = match row.get(Column::Timestamp).map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_timestamp(raw),
            _ => table.timestamp,
        };

        let policy = self.config.score_nan_policy;
        let record = MetricRecord {
            timestamp,
            n_provider: row.stat(Column::NProvider),
            n_reference: row.stat(Column::NReference),
            coverage_pct: row.stat(Column::CoveragePct),
            derived_pct: row.stat(Column::DerivedPct),
            bias: row.stat(Column::Bias),
            mae: row.stat(Column::Mae),
            rmse: row.stat(Column::Rmse),
            corr: row.stat(Column::Corr),
            over_pct: row.stat(Column::OverPct),
            under_pct: row.stat(Column::UnderPct),
            slope: row.stat(Column::Slope),
            intercept: row.stat(Column::Intercept),
            r_squared: row.score(Column::RSquared, policy),
            diurnal_amplitude: row.stat(Column::DiurnalAmplitude),
            diurnal_peak_hour: row.stat(Column::DiurnalPeakHour),
            pod: row.score(Column::Pod, policy),
            far: row.score(Column::Far, policy),
            csi: row.score(Column::Csi, policy),
            ..MetricRecord::new(&provider, &variable, &run_id)
        };

        if ![record.bias, record.mae, record.rmse]
            .iter()
            .any(|s| s.is_supplied())
        {
            return Err(malformed("none of bias, mae, rmse supplied"));
        }

        Ok(Some(record))
    }
}

/// Flags values that are accepted but look wrong.
fn consistency_warnings(source: &str, row: &RawRow, r: &MetricRecord) -> Vec<String> {
    let mut out = Vec::new();
    let prefix = format!(
        "{} row {} ({}, {}, {})",
        source, row.row, r.provider, r.variable, r.run_id
    );

    if r.timestamp.is_none() {
        if let Some(raw) = row.get(Column::Timestamp).filter(|t| !t.trim().is_empty()) {
            out.push(format!("{}: unparseable timestamp {:?}, left untimed", prefix, raw));
        }
    }

    if let (Some(mae), Some(rmse)) = (r.mae.value(), r.rmse.value()) {
        if rmse < mae {
            out.push(format!("{}: rmse {} < mae {}", prefix, rmse, mae));
        }
    }
    if let Some(mae) = r.mae.value() {
        if mae < 0.0 {
            out.push(format!("{}: negative mae {}", prefix, mae));
        }
    }
    if let Some(cov) = r.coverage_pct.value() {
        if !(0.0..=100.0).contains(&cov) {
            out.push(format!("{}: coverage_pct {} outside [0, 100]", prefix, cov));
        }
    }
    if let Some(hour) = r.diurnal_peak_hour.value() {
        if !(0.0..=23.0).contains(&hour) || hour.fract() != 0.0 {
            out.push(format!("{}: diurnal_peak_hour {} not in 0..=23", prefix, hour));
        }
    }

    out
}

/// Convenience wrapper: ingests `tables` in order with a fresh [`Ingestor`].
pub fn ingest_tables(tables: &[RawTable], config: &RaterConfig) -> Ingested {
    let mut ingestor = Ingestor::new(config);
    for table in tables {
        ingestor.ingest_table(table);
    }
    ingestor.finish()
}
