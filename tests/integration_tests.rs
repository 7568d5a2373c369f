use forecast_rater::analyzers::analyzer::{analyze_path, compose};
use forecast_rater::analyzers::types::BiasDirection;
use forecast_rater::config::RaterConfig;
use forecast_rater::ingest::{IngestReport, ingest_tables, parse_table};
use forecast_rater::report::render_markdown;
use std::path::PathBuf;

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/history")
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("value should be defined");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_precipitation_ranking_single_run() {
    let csv = "provider,variable,bias,rmse\n\
               visualcrossing,precipitation,0.05,0.167\n\
               weatherapi,precipitation,0.01,0.108\n\
               metno,precipitation,0.02,0.109\n\
               openmeteo,precipitation,0.01,0.108\n\
               openweather,precipitation,-0.005,0.095\n";
    let table = parse_table(csv.as_bytes(), "precip.csv", "run1", None).unwrap();
    let config = RaterConfig::default();
    let ingested = ingest_tables(&[table], &config);
    let report = compose(&ingested.records, ingested.report, &config);

    assert_eq!(report.rankings.len(), 1);
    assert_eq!(
        report.rankings[0].providers(),
        vec![
            "openweather",
            "openmeteo",
            "weatherapi",
            "metno",
            "visualcrossing"
        ]
    );
}

#[tokio::test]
async fn test_full_pipeline_from_history_directory() {
    let config = RaterConfig::default();
    let analysis = analyze_path(&fixture_dir(), &config).await.unwrap();
    let report = &analysis.report;

    assert_eq!(report.run_count, 2);
    assert_eq!(report.validation.malformed_count(), 1);
    assert_eq!(report.validation.duplicate_count(), 1);
    assert_eq!(report.validation.filtered, 1);
    assert!(report.validation.unreadable.is_empty());

    let precipitation = report
        .rankings
        .iter()
        .find(|r| r.variable == "precipitation")
        .unwrap();
    assert_eq!(
        precipitation.providers(),
        vec![
            "openweather",
            "openmeteo",
            "weatherapi",
            "metno",
            "visualcrossing"
        ]
    );
    assert_close(precipitation.entries[0].rmse_median, 0.095);
    assert_close(precipitation.entries[0].trend_rmse_per_day, 0.004);
    assert_eq!(precipitation.entries[3].run_count, 2);

    assert_eq!(
        report.overall.providers(),
        vec![
            "metno",
            "visualcrossing",
            "openweather",
            "weatherapi",
            "openmeteo"
        ]
    );
    let expected = [5.314, 5.387, 5.403, 5.771, 10.578];
    for (entry, value) in report.overall.entries.iter().zip(expected) {
        assert_close(entry.median_of_medians_rmse, value);
        assert_eq!(entry.variable_count, 4);
    }
}

#[tokio::test]
async fn test_bias_patterns_and_detection_from_history() {
    let config = RaterConfig::default();
    let report = analyze_path(&fixture_dir(), &config).await.unwrap().report;

    let temperature = report
        .bias_patterns
        .iter()
        .find(|t| t.variable == "temperature_2m")
        .unwrap();
    let direction = |provider: &str| {
        temperature
            .entries
            .iter()
            .find(|e| e.provider == provider)
            .unwrap()
            .trend_direction
    };
    assert_eq!(direction("metno"), BiasDirection::Understates);
    assert_eq!(direction("visualcrossing"), BiasDirection::Overstates);
    assert_eq!(direction("openweather"), BiasDirection::Neutral);

    assert_eq!(report.detection.len(), 1);
    let detection: Vec<&str> = report.detection[0]
        .entries
        .iter()
        .map(|e| e.provider.as_str())
        .collect();
    assert_eq!(
        detection,
        vec![
            "openmeteo",
            "openweather",
            "metno",
            "weatherapi",
            "visualcrossing"
        ]
    );
    assert_eq!(report.detection[0].entries[4].csi_median, None);
}

#[tokio::test]
async fn test_markdown_report_from_history() {
    let config = RaterConfig::default();
    let report = analyze_path(&fixture_dir(), &config).await.unwrap().report;
    let md = render_markdown(&report);

    assert!(md.contains("| 1 | metno | 5.314 |"));
    assert!(md.contains("| 2 | visualcrossing | 5.387 |"));
    assert!(md.contains("| 3 | openweather | 5.403 |"));
    assert!(md.contains("| 4 | weatherapi | 5.771 |"));
    assert!(md.contains("| 5 | openmeteo | 10.578 |"));
    assert!(md.contains("| openweather | 2 | 0.095 | -0.005 | 100.0 | 0.0040 |"));
    assert!(md.contains("- duplicate collisions: 1"));
}

#[tokio::test]
async fn test_pipeline_is_idempotent() {
    let config = RaterConfig::default();
    let first = analyze_path(&fixture_dir(), &config).await.unwrap();
    let second = analyze_path(&fixture_dir(), &config).await.unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(first.report, second.report);
    assert_eq!(
        render_markdown(&first.report),
        render_markdown(&second.report)
    );
}

#[test]
fn test_empty_input_still_renders() {
    let report = compose(&[], IngestReport::default(), &RaterConfig::default());
    let md = render_markdown(&report);
    assert!(md.contains("## Overall ranking"));
    assert!(md.contains("- accepted records: 0"));
}
