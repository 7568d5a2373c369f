use crate::analyzers::types::AggregateGroup;
use crate::analyzers::utility::{mean, median, ols_slope, sample_stddev};
use crate::record::{MetricRecord, Stat};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Partitions records by `(provider, variable)` and aggregates each partition.
///
/// Groups come back in `(variable, provider)` order. A partition without any
/// usable value is still emitted, with every statistic undefined.
pub fn aggregate_records(records: &[MetricRecord]) -> Vec<AggregateGroup> {
    let mut partitions: BTreeMap<(&str, &str), Vec<&MetricRecord>> = BTreeMap::new();
    for r in records {
        partitions
            .entry((r.variable.as_str(), r.provider.as_str()))
            .or_default()
            .push(r);
    }

    partitions
        .into_iter()
        .map(|((variable, provider), rows)| aggregate_group(provider, variable, &rows))
        .collect()
}

/// Aggregates the records of a single partition.
pub fn aggregate_group(provider: &str, variable: &str, rows: &[&MetricRecord]) -> AggregateGroup {
    let mut group = AggregateGroup::empty(provider, variable);

    let contributing: Vec<&&MetricRecord> = rows.iter().filter(|r| r.has_core_value()).collect();
    if contributing.is_empty() {
        return group;
    }
    group.run_count = contributing
        .iter()
        .map(|r| r.run_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    group.first_run = contributing.iter().filter_map(|r| r.timestamp).min();
    group.last_run = contributing.iter().filter_map(|r| r.timestamp).max();

    let rmse = series(rows, |r| r.rmse);
    let bias = series(rows, |r| r.bias);

    group.rmse_median = median(&rmse);
    group.rmse_mean = mean(&rmse);
    group.rmse_std = sample_stddev(&rmse);
    group.bias_median = median(&bias);
    group.bias_mean = mean(&bias);
    group.bias_std = sample_stddev(&bias);

    group.mae_median = median(&series(rows, |r| r.mae));
    group.coverage_median = median(&series(rows, |r| r.coverage_pct));
    group.derived_median = median(&series(rows, |r| r.derived_pct));
    group.corr_median = median(&series(rows, |r| r.corr));
    group.over_median = median(&series(rows, |r| r.over_pct));
    group.under_median = median(&series(rows, |r| r.under_pct));
    group.r_squared_median = median(&series(rows, |r| r.r_squared));
    group.diurnal_amplitude_median = median(&series(rows, |r| r.diurnal_amplitude));
    group.pod_median = median(&series(rows, |r| r.pod));
    group.far_median = median(&series(rows, |r| r.far));
    group.csi_median = median(&series(rows, |r| r.csi));

    group.trend_rmse_per_day = trend_per_day(rows, |r| r.rmse);
    group.trend_bias_per_day = trend_per_day(rows, |r| r.bias);

    group
}

/// Defined values of one statistic across the partition.
fn series(rows: &[&MetricRecord], stat: impl Fn(&MetricRecord) -> Stat) -> Vec<f64> {
    rows.iter().filter_map(|r| stat(r).value()).collect()
}

/// Least-squares slope of a statistic against elapsed days since the first
/// timestamped run.
///
/// Only records with a timestamp and a defined value take part, and they
/// must span at least two calendar days (UTC); otherwise `None`.
pub fn trend_per_day(
    rows: &[&MetricRecord],
    stat: impl Fn(&MetricRecord) -> Stat,
) -> Option<f64> {
    let mut timed: Vec<(DateTime<Utc>, f64)> = rows
        .iter()
        .filter_map(|r| Some((r.timestamp?, stat(r).value()?)))
        .collect();
    timed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let days: BTreeSet<NaiveDate> = timed.iter().map(|(t, _)| t.date_naive()).collect();
    if days.len() < 2 {
        return None;
    }

    let t0 = timed.first()?.0;
    let points: Vec<(f64, f64)> = timed
        .iter()
        .map(|(t, v)| ((*t - t0).num_milliseconds() as f64 / MILLIS_PER_DAY, *v))
        .collect();

    ols_slope(&points)
}
