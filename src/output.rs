//! Output formatting and persistence for records and reports.
//!
//! Supports pretty-printing, JSON serialization, the append-only central
//! metric log, and the CSV/markdown artifacts of a report run.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzers::types::{AggregateGroup, ComparativeReport};
use crate::record::MetricRecord;
use csv::WriterBuilder;
use std::fs::{self, OpenOptions};
use std::path::Path;

pub const REPORT_FILE: &str = "HISTORY_REPORT.md";
pub const GROUP_STATS_FILE: &str = "history_provider_stats.csv";
pub const RAW_RUNS_FILE: &str = "history_all_runs_raw.csv";
pub const REPORT_JSON_FILE: &str = "history_report.json";

/// Logs a report using Rust's debug pretty-print format.
pub fn print_pretty(report: &ComparativeReport) {
    debug!("{:#?}", report);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends records as rows to the central metric log.
///
/// Creates the file with headers if it does not exist or is empty.
pub fn append_records(path: &Path, records: &[MetricRecord]) -> Result<usize> {
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    debug!(path = %path.display(), has_content, rows = records.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!has_content) // header only on a fresh log
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(records.len())
}

/// Writes `rows` to a fresh CSV file, replacing any previous one.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one row per aggregate group; undefined statistics become `nan`.
pub fn write_group_stats(path: &Path, groups: &[AggregateGroup]) -> Result<()> {
    write_csv(path, groups)
}

/// Writes the merged, accepted record set for auditing.
pub fn write_raw_runs(path: &Path, records: &[MetricRecord]) -> Result<()> {
    write_csv(path, records)
}

pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Writes every artifact of a report run into `outdir`.
pub fn write_report_artifacts(
    outdir: &Path,
    records: &[MetricRecord],
    report: &ComparativeReport,
    markdown: &str,
    with_json: bool,
) -> Result<()> {
    fs::create_dir_all(outdir)?;

    write_raw_runs(&outdir.join(RAW_RUNS_FILE), records)?;
    write_group_stats(&outdir.join(GROUP_STATS_FILE), &report.groups)?;
    fs::write(outdir.join(REPORT_FILE), markdown)?;
    if with_json {
        write_json(&outdir.join(REPORT_JSON_FILE), report)?;
    }

    info!(outdir = %outdir.display(), with_json, "Report artifacts written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::analyzer::compose;
    use crate::config::RaterConfig;
    use crate::ingest::{IngestReport, ingest_tables, read_table};
    use crate::record::Stat;
    use chrono::{TimeZone, Utc};
    use std::env;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn sample_record(run: &str) -> MetricRecord {
        MetricRecord {
            bias: Stat::Defined(-0.5),
            mae: Stat::Undefined,
            rmse: Stat::Defined(1.25),
            ..MetricRecord::new("metno", "temperature_2m", run)
        }
        .at(Utc.with_ymd_and_hms(2025, 8, 13, 15, 39, 0).unwrap())
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        let report = compose(&[], IngestReport::default(), &RaterConfig::default());
        print_pretty(&report);
    }

    #[test]
    fn test_print_json_does_not_panic() {
        let report = compose(&[], IngestReport::default(), &RaterConfig::default());
        print_json(&report).unwrap();
    }

    #[test]
    fn test_append_records_writes_header_once() {
        let path = temp_path("forecast_rater_test_header.csv");
        let _ = fs::remove_file(&path);

        append_records(&path, &[sample_record("r1")]).unwrap();
        append_records(&path, &[sample_record("r2")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content
            .lines()
            .filter(|l| l.starts_with("provider,"))
            .count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_log_reads_back_with_states_intact() {
        let path = temp_path("forecast_rater_test_roundtrip.csv");
        let _ = fs::remove_file(&path);

        append_records(&path, &[sample_record("r1")]).unwrap();
        let table = read_table(&path).unwrap();
        let out = ingest_tables(&[table], &RaterConfig::default());

        assert_eq!(out.records, vec![sample_record("r1")]);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_group_stats_mark_undefined() {
        let path = temp_path("forecast_rater_test_groups.csv");
        let groups = vec![AggregateGroup::empty("metno", "precipitation")];
        write_group_stats(&path, &groups).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert!(row.starts_with("metno,precipitation,0,,,nan,"));

        fs::remove_file(&path).unwrap();
    }
}
