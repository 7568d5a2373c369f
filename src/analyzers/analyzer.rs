use crate::analyzers::aggregate::aggregate_records;
use crate::analyzers::ranking::{
    bias_patterns, detection_rankings, overall_ranking, rank_variables, variable_summaries,
};
use crate::analyzers::types::ComparativeReport;
use crate::config::RaterConfig;
use crate::ingest::{self, IngestReport, Ingested, Ingestor, RawTable};
use crate::record::MetricRecord;
use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};

pub const SCHEMA_VERSION: u8 = 1;

/// Accepted records and the report composed from them.
pub struct Analysis {
    pub records: Vec<MetricRecord>,
    pub report: ComparativeReport,
}

/// Tables read from disk plus the files that could not be read.
#[derive(Default)]
pub struct LoadedTables {
    pub tables: Vec<RawTable>,
    pub failures: Vec<(String, String)>,
}

/// Lists `*.csv` / `*.csv.gz` files directly inside `dir`, sorted by path.
pub fn list_run_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && ingest::is_run_file(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Reads run files concurrently, at most `concurrency` at a time.
///
/// Each file is parsed on its own blocking task with no shared state; the
/// results are collected only after every task has finished.
pub async fn load_tables(paths: Vec<PathBuf>, concurrency: usize) -> LoadedTables {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(paths.len());

    for path in paths {
        let sem = semaphore.clone();
        let source = path.display().to_string();
        let span = tracing::debug_span!("read_run_file", path = %source);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                let table = tokio::task::spawn_blocking(move || ingest::read_table(&path)).await??;
                debug!(rows = table.rows.len(), run_id = %table.run_id, "Run file read");
                Ok::<RawTable, anyhow::Error>(table)
            }
            .instrument(span),
        );
        tasks.push((source, task));
    }

    let mut loaded = LoadedTables::default();
    for (source, task) in tasks {
        match task.await {
            Ok(Ok(table)) => loaded.tables.push(table),
            Ok(Err(e)) => {
                warn!(source = %source, error = %e, "Failed to read run file");
                loaded.failures.push((source, e.to_string()));
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Run file task failed");
                loaded.failures.push((source, e.to_string()));
            }
        }
    }

    loaded
}

/// Orders tables by timestamp (untimed last), then run id, then source, so
/// the first occurrence of a duplicate is always the same one.
pub fn sort_tables(tables: &mut [RawTable]) {
    tables.sort_by(|a, b| {
        let ta = (a.timestamp.is_none(), a.timestamp);
        let tb = (b.timestamp.is_none(), b.timestamp);
        ta.cmp(&tb)
            .then_with(|| a.run_id.cmp(&b.run_id))
            .then_with(|| a.source.cmp(&b.source))
    });
}

/// Merges loaded tables into one validated record set.
pub fn ingest_loaded(mut loaded: LoadedTables, config: &RaterConfig) -> Ingested {
    sort_tables(&mut loaded.tables);

    let mut ingestor = Ingestor::new(config);
    for table in &loaded.tables {
        ingestor.ingest_table(table);
    }
    for (source, error) in &loaded.failures {
        ingestor.record_unreadable(source, error);
    }
    ingestor.finish()
}

/// Aggregates and ranks an ingested record set. Pure: the same records and
/// config always give the same report.
pub fn compose(
    records: &[MetricRecord],
    validation: IngestReport,
    config: &RaterConfig,
) -> ComparativeReport {
    let groups = aggregate_records(records);
    let run_count = records
        .iter()
        .map(|r| r.run_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    ComparativeReport {
        schema_version: SCHEMA_VERSION,
        run_count,
        record_count: records.len(),
        rankings: rank_variables(&groups),
        bias_patterns: bias_patterns(&groups, config.bias_epsilon),
        overall: overall_ranking(&groups),
        detection: detection_rankings(&groups),
        variables: variable_summaries(&groups),
        groups,
        validation,
    }
}

/// Loads every run file under `source` (a directory, or a single file such
/// as the central metric log), ingests, aggregates and ranks.
#[tracing::instrument(skip(source, config), fields(source = %source.display()))]
pub async fn analyze_path(source: &Path, config: &RaterConfig) -> Result<Analysis> {
    let paths = if source.is_dir() {
        list_run_files(source)?
    } else {
        vec![source.to_path_buf()]
    };

    if paths.is_empty() {
        warn!("No run files found");
    } else {
        info!(files = paths.len(), concurrency = config.concurrency, "Loading run files");
    }

    let loaded = load_tables(paths, config.concurrency).await;
    let Ingested { records, report } = ingest_loaded(loaded, config);

    info!(
        accepted = report.accepted,
        malformed = report.malformed_count(),
        duplicates = report.duplicate_count(),
        filtered = report.filtered,
        unreadable = report.unreadable.len(),
        "Ingestion complete"
    );

    let report = compose(&records, report, config);
    info!(
        runs = report.run_count,
        groups = report.groups.len(),
        "Aggregation complete"
    );

    Ok(Analysis { records, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_table;
    use chrono::{TimeZone, Utc};
    use std::env;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_sort_tables_puts_untimed_last() {
        let t1 = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 8, 2, 0, 0, 0).unwrap();
        let mut tables = vec![
            RawTable::new("c", "c", None),
            RawTable::new("b", "b", Some(t2)),
            RawTable::new("a", "a", Some(t1)),
        ];
        sort_tables(&mut tables);
        let order: Vec<&str> = tables.iter().map(|t| t.run_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ingest_loaded_keeps_earliest_duplicate() {
        let config = RaterConfig::default();
        let csv = "provider,variable,run_id,rmse\nmetno,precipitation,shared,";
        let early = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 8, 2, 0, 0, 0).unwrap();
        let loaded = LoadedTables {
            tables: vec![
                parse_table(format!("{}0.9\n", csv).as_bytes(), "late", "late", Some(late))
                    .unwrap(),
                parse_table(format!("{}0.1\n", csv).as_bytes(), "early", "early", Some(early))
                    .unwrap(),
            ],
            failures: vec![("broken.csv".to_string(), "permission denied".to_string())],
        };
        let out = ingest_loaded(loaded, &config);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].rmse.value(), Some(0.1));
        assert_eq!(out.report.duplicate_count(), 1);
        assert_eq!(out.report.unreadable.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_path_reads_directory() {
        let dir = temp_dir("forecast_rater_test_analyze_dir");
        fs::write(
            dir.join("era5_comparison_summary_20250801_000000Z.csv"),
            "provider,variable,bias,mae,rmse\nmetno,precipitation,0.01,0.05,0.1\n",
        )
        .unwrap();
        fs::write(
            dir.join("era5_comparison_summary_20250803_000000Z.csv"),
            "provider,variable,bias,mae,rmse\nmetno,precipitation,0.03,0.07,0.3\n",
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let analysis = analyze_path(&dir, &RaterConfig::default()).await.unwrap();
        assert_eq!(analysis.records.len(), 2);
        assert_eq!(analysis.report.run_count, 2);
        let group = &analysis.report.groups[0];
        assert_eq!(group.rmse_median, Some(0.2));
        assert!((group.trend_rmse_per_day.unwrap() - 0.1).abs() < 1e-9);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_load_tables_reports_missing_file() {
        let loaded = load_tables(vec![PathBuf::from("/nonexistent/forecast_rater.csv")], 2).await;
        assert!(loaded.tables.is_empty());
        assert_eq!(loaded.failures.len(), 1);
    }
}
