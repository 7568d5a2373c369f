//! Markdown rendering of a [`ComparativeReport`].
//!
//! Pure formatting: everything shown is read from the report structures and
//! undefined values are written as [`NAN_MARKER`].

use crate::analyzers::types::ComparativeReport;
use crate::record::NAN_MARKER;

/// Formats a statistic with fixed precision, or the `nan` marker.
pub fn fmt_stat(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => NAN_MARKER.to_string(),
    }
}

/// Renders the full history report.
pub fn render_markdown(report: &ComparativeReport) -> String {
    let mut lines: Vec<String> = vec![
        "# Forecast provider history report".to_string(),
        String::new(),
        format!(
            "Runs: {}, records: {}, provider/variable groups: {}",
            report.run_count,
            report.record_count,
            report.groups.len()
        ),
        String::new(),
        "## RMSE rankings (median across runs)".to_string(),
    ];

    for ranking in &report.rankings {
        lines.push(String::new());
        lines.push(format!("### {}", ranking.variable));
        lines.push(String::new());
        lines.push(
            "| provider | run_count | rmse_median | bias_median | coverage_median% | trend_rmse_per_day |"
                .to_string(),
        );
        lines.push("|---|---:|---:|---:|---:|---:|".to_string());
        for e in &ranking.entries {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} |",
                e.provider,
                e.run_count,
                fmt_stat(e.rmse_median, 3),
                fmt_stat(e.bias_median, 3),
                fmt_stat(e.coverage_median, 1),
                fmt_stat(e.trend_rmse_per_day, 4),
            ));
        }
    }

    lines.push(String::new());
    lines.push("## Bias patterns (sign and size)".to_string());
    for table in &report.bias_patterns {
        lines.push(String::new());
        lines.push(format!("### {}", table.variable));
        lines.push(String::new());
        lines.push(
            "| provider | bias_median | bias_mean | trend_direction | slope_bias_per_day |"
                .to_string(),
        );
        lines.push("|---|---:|---:|---|---:|".to_string());
        for e in &table.entries {
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                e.provider,
                fmt_stat(e.bias_median, 3),
                fmt_stat(e.bias_mean, 3),
                e.trend_direction,
                fmt_stat(e.slope_bias_per_day, 4),
            ));
        }
    }

    lines.push(String::new());
    lines.push("## Overall ranking (median of per-variable rmse_median)".to_string());
    lines.push(String::new());
    lines.push("| rank | provider | median_of_medians_rmse |".to_string());
    lines.push("|---:|---|---:|".to_string());
    for e in &report.overall.entries {
        lines.push(format!(
            "| {} | {} | {} |",
            e.rank,
            e.provider,
            fmt_stat(e.median_of_medians_rmse, 3)
        ));
    }

    if !report.detection.is_empty() {
        lines.push(String::new());
        lines.push("## Event detection (median CSI)".to_string());
        for ranking in &report.detection {
            lines.push(String::new());
            lines.push(format!("### {}", ranking.variable));
            lines.push(String::new());
            lines.push("| rank | provider | csi_median | pod_median | far_median |".to_string());
            lines.push("|---:|---|---:|---:|---:|".to_string());
            for e in &ranking.entries {
                lines.push(format!(
                    "| {} | {} | {} | {} | {} |",
                    e.rank,
                    e.provider,
                    fmt_stat(e.csi_median, 2),
                    fmt_stat(e.pod_median, 2),
                    fmt_stat(e.far_median, 2),
                ));
            }
        }
    }

    lines.push(String::new());
    lines.push("## Variables".to_string());
    lines.push(String::new());
    lines.push("| variable | providers | rmse_median | rmse_std |".to_string());
    lines.push("|---|---:|---:|---:|".to_string());
    for v in &report.variables {
        lines.push(format!(
            "| {} | {} | {} | {} |",
            v.variable,
            v.provider_count,
            fmt_stat(v.rmse_median, 3),
            fmt_stat(v.rmse_std, 3),
        ));
    }

    let validation = &report.validation;
    lines.push(String::new());
    lines.push("## Validation summary".to_string());
    lines.push(String::new());
    lines.push(format!("- accepted records: {}", validation.accepted));
    lines.push(format!("- malformed rows: {}", validation.malformed_count()));
    lines.push(format!("- duplicate collisions: {}", validation.duplicate_count()));
    lines.push(format!("- filtered by variable: {}", validation.filtered));
    lines.push(format!("- warnings: {}", validation.warnings.len()));
    lines.push(format!("- unreadable files: {}", validation.unreadable.len()));

    let rejected: Vec<String> = validation.rejected.iter().map(|e| e.to_string()).collect();
    push_list(&mut lines, "Rejected rows", &rejected);
    push_list(&mut lines, "Warnings", &validation.warnings);
    push_list(&mut lines, "Unreadable files", &validation.unreadable);

    lines.push(String::new());
    lines.join("\n")
}

/// Appends a `###` section with one bullet per item; nothing when empty.
fn push_list(lines: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(format!("### {}", title));
    lines.push(String::new());
    lines.extend(items.iter().map(|item| format!("- {}", item)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::analyzer::compose;
    use crate::config::RaterConfig;
    use crate::error::RecordError;
    use crate::ingest::IngestReport;
    use crate::record::{MetricRecord, Stat};

    #[test]
    fn test_fmt_stat() {
        assert_eq!(fmt_stat(Some(0.1084), 3), "0.108");
        assert_eq!(fmt_stat(Some(0.0), 3), "0.000");
        assert_eq!(fmt_stat(None, 3), "nan");
    }

    #[test]
    fn test_undefined_cells_render_as_nan() {
        let records = vec![MetricRecord {
            rmse: Stat::Undefined,
            bias: Stat::Defined(0.2),
            ..MetricRecord::new("metno", "temperature_2m", "r1")
        }];
        let report = compose(&records, IngestReport::default(), &RaterConfig::default());
        let md = render_markdown(&report);
        assert!(md.contains("| metno | 1 | nan | 0.200 | nan | nan |"));
        assert!(md.contains("| 1 | metno | nan |"));
    }

    #[test]
    fn test_validation_summary_lists_rejections() {
        let validation = IngestReport {
            rejected: vec![RecordError::MalformedRecord {
                source_name: "a.csv".to_string(),
                row: 3,
                reason: "missing provider".to_string(),
            }],
            ..Default::default()
        };
        let report = compose(&[], validation, &RaterConfig::default());
        let md = render_markdown(&report);
        assert!(md.contains("- malformed rows: 1"));
        assert!(md.contains("a.csv row 3: malformed record: missing provider"));
    }

    #[test]
    fn test_validation_lists_only_non_empty_sections() {
        let validation = IngestReport {
            warnings: vec!["a.csv row 2 (metno, precipitation, r1): negative mae -1".to_string()],
            unreadable: vec!["b.csv: permission denied".to_string()],
            ..Default::default()
        };
        let md = render_markdown(&compose(&[], validation, &RaterConfig::default()));
        assert!(!md.contains("### Rejected rows"));
        assert!(md.contains("### Warnings\n\n- a.csv row 2"));
        assert!(md.contains("### Unreadable files\n\n- b.csv: permission denied\n"));
        assert!(md.ends_with('\n'));
    }

    #[test]
    fn test_rendering_is_reproducible() {
        let records = vec![
            MetricRecord {
                rmse: Stat::Defined(0.1),
                bias: Stat::Defined(0.01),
                ..MetricRecord::new("metno", "precipitation", "r1")
            },
            MetricRecord {
                rmse: Stat::Defined(0.2),
                bias: Stat::Defined(-0.01),
                ..MetricRecord::new("openmeteo", "precipitation", "r1")
            },
        ];
        let config = RaterConfig::default();
        let a = render_markdown(&compose(&records, IngestReport::default(), &config));
        let b = render_markdown(&compose(&records, IngestReport::default(), &config));
        assert_eq!(a, b);
    }
}
