use crate::analyzers::types::{
    AggregateGroup, BiasDirection, BiasPattern, BiasPatternTable, DetectionEntry,
    DetectionRanking, OverallEntry, OverallRanking, RankedProvider, Ranking, VariableSummary,
};
use crate::analyzers::utility::{median, sample_stddev};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Orders defined values ascending, undefined after all of them.
fn cmp_defined_first(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Classifies the sign of a median bias.
///
/// | Value                  | Label       |
/// |------------------------|-------------|
/// | `> epsilon`            | overstates  |
/// | `< -epsilon`           | understates |
/// | `\|bias\| <= epsilon`  | neutral     |
/// | undefined              | nan         |
pub fn classify_bias(bias: Option<f64>, epsilon: f64) -> BiasDirection {
    match bias {
        None => BiasDirection::Undefined,
        Some(b) if b.abs() <= epsilon.abs() => BiasDirection::Neutral,
        Some(b) if b > 0.0 => BiasDirection::Overstates,
        Some(_) => BiasDirection::Understates,
    }
}

fn by_variable(groups: &[AggregateGroup]) -> BTreeMap<&str, Vec<&AggregateGroup>> {
    let mut out: BTreeMap<&str, Vec<&AggregateGroup>> = BTreeMap::new();
    for g in groups {
        out.entry(g.variable.as_str()).or_default().push(g);
    }
    out
}

/// Ranks one variable's groups: ascending `rmse_median`, then ascending
/// `|bias_median|`, then provider name.
///
/// Groups with an undefined `rmse_median` come after all others, ordered by
/// provider name only.
pub fn rank_variable(variable: &str, groups: &[&AggregateGroup]) -> Ranking {
    let mut sorted: Vec<&AggregateGroup> = groups.to_vec();
    sorted.sort_by(|a, b| {
        let by_bias = match (a.rmse_median, b.rmse_median) {
            (Some(_), Some(_)) => {
                cmp_defined_first(a.bias_median.map(f64::abs), b.bias_median.map(f64::abs))
            }
            _ => Ordering::Equal,
        };
        cmp_defined_first(a.rmse_median, b.rmse_median)
            .then(by_bias)
            .then_with(|| a.provider.cmp(&b.provider))
    });

    let entries = sorted
        .into_iter()
        .enumerate()
        .map(|(i, g)| RankedProvider {
            rank: i + 1,
            provider: g.provider.clone(),
            run_count: g.run_count,
            rmse_median: g.rmse_median,
            bias_median: g.bias_median,
            coverage_median: g.coverage_median,
            trend_rmse_per_day: g.trend_rmse_per_day,
        })
        .collect();

    Ranking {
        variable: variable.to_string(),
        entries,
    }
}

/// One [`Ranking`] per variable, in variable-name order.
pub fn rank_variables(groups: &[AggregateGroup]) -> Vec<Ranking> {
    by_variable(groups)
        .into_iter()
        .map(|(variable, gs)| rank_variable(variable, &gs))
        .collect()
}

/// Ranks providers by the median of their per-variable `rmse_median`s.
///
/// Only variables where the provider has a defined `rmse_median` count.
/// Providers with none are placed last; ties go to the provider name.
pub fn overall_ranking(groups: &[AggregateGroup]) -> OverallRanking {
    let mut per_provider: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for g in groups {
        let values = per_provider.entry(g.provider.as_str()).or_default();
        if let Some(v) = g.rmse_median {
            values.push(v);
        }
    }

    let mut scored: Vec<(&str, Option<f64>, usize)> = per_provider
        .into_iter()
        .map(|(provider, values)| (provider, median(&values), values.len()))
        .collect();
    scored.sort_by(|a, b| cmp_defined_first(a.1, b.1).then_with(|| a.0.cmp(b.0)));

    let entries = scored
        .into_iter()
        .enumerate()
        .map(|(i, (provider, score, count))| OverallEntry {
            rank: i + 1,
            provider: provider.to_string(),
            median_of_medians_rmse: score,
            variable_count: count,
        })
        .collect();

    OverallRanking { entries }
}

/// Bias direction per `(provider, variable)`, grouped by variable and
/// listed by ascending `bias_median`.
pub fn bias_patterns(groups: &[AggregateGroup], epsilon: f64) -> Vec<BiasPatternTable> {
    by_variable(groups)
        .into_iter()
        .map(|(variable, mut gs)| {
            gs.sort_by(|a, b| {
                cmp_defined_first(a.bias_median, b.bias_median)
                    .then_with(|| a.provider.cmp(&b.provider))
            });
            let entries = gs
                .into_iter()
                .map(|g| {
                    let direction = classify_bias(g.bias_median, epsilon);
                    let mean_direction = classify_bias(g.bias_mean, epsilon);
                    BiasPattern {
                        provider: g.provider.clone(),
                        bias_median: g.bias_median,
                        bias_mean: g.bias_mean,
                        trend_direction: direction,
                        mean_agrees: direction == mean_direction,
                        slope_bias_per_day: g.trend_bias_per_day,
                    }
                })
                .collect();
            BiasPatternTable {
                variable: variable.to_string(),
                entries,
            }
        })
        .collect()
}

/// Descending `csi_median` per variable, for variables where at least one
/// provider has detection scores.
pub fn detection_rankings(groups: &[AggregateGroup]) -> Vec<DetectionRanking> {
    by_variable(groups)
        .into_iter()
        .filter(|(_, gs)| gs.iter().any(|g| g.csi_median.is_some()))
        .map(|(variable, mut gs)| {
            gs.sort_by(|a, b| {
                cmp_defined_first(a.csi_median.map(|v| -v), b.csi_median.map(|v| -v))
                    .then_with(|| a.provider.cmp(&b.provider))
            });
            let entries = gs
                .into_iter()
                .enumerate()
                .map(|(i, g)| DetectionEntry {
                    rank: i + 1,
                    provider: g.provider.clone(),
                    csi_median: g.csi_median,
                    pod_median: g.pod_median,
                    far_median: g.far_median,
                })
                .collect();
            DetectionRanking {
                variable: variable.to_string(),
                entries,
            }
        })
        .collect()
}

/// Median and spread of provider `rmse_median`s per variable.
pub fn variable_summaries(groups: &[AggregateGroup]) -> Vec<VariableSummary> {
    by_variable(groups)
        .into_iter()
        .map(|(variable, gs)| {
            let values: Vec<f64> = gs.iter().filter_map(|g| g.rmse_median).collect();
            VariableSummary {
                variable: variable.to_string(),
                provider_count: values.len(),
                rmse_median: median(&values),
                rmse_std: sample_stddev(&values),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(provider: &str, variable: &str, rmse: Option<f64>, bias: Option<f64>) -> AggregateGroup {
        AggregateGroup {
            rmse_median: rmse,
            bias_median: bias,
            run_count: usize::from(rmse.is_some()),
            ..AggregateGroup::empty(provider, variable)
        }
    }

    #[test]
    fn test_classify_bias() {
        assert_eq!(classify_bias(Some(0.5), 0.01), BiasDirection::Overstates);
        assert_eq!(classify_bias(Some(-0.5), 0.01), BiasDirection::Understates);
        assert_eq!(classify_bias(Some(0.005), 0.01), BiasDirection::Neutral);
        assert_eq!(classify_bias(Some(-0.01), 0.01), BiasDirection::Neutral);
        assert_eq!(classify_bias(None, 0.01), BiasDirection::Undefined);
        // a zero epsilon only makes exact zero neutral
        assert_eq!(classify_bias(Some(0.0), 0.0), BiasDirection::Neutral);
        assert_eq!(classify_bias(Some(1e-9), 0.0), BiasDirection::Overstates);
    }

    #[test]
    fn test_rmse_tie_broken_by_name() {
        let groups = vec![
            group("B", "precipitation", Some(2.0), Some(0.1)),
            group("A", "precipitation", Some(2.0), Some(0.1)),
        ];
        let rankings = rank_variables(&groups);
        assert_eq!(rankings[0].providers(), vec!["A", "B"]);
    }

    #[test]
    fn test_rmse_tie_broken_by_abs_bias_first() {
        let groups = vec![
            group("A", "precipitation", Some(2.0), Some(-0.5)),
            group("B", "precipitation", Some(2.0), Some(0.1)),
        ];
        let rankings = rank_variables(&groups);
        assert_eq!(rankings[0].providers(), vec!["B", "A"]);
    }

    #[test]
    fn test_undefined_rmse_ranked_last_not_dropped() {
        let groups = vec![
            group("zeta", "temperature_2m", Some(3.0), None),
            group("beta", "temperature_2m", None, None),
            group("alpha", "temperature_2m", None, Some(1.0)),
            group("gamma", "temperature_2m", Some(1.0), None),
        ];
        let ranking = &rank_variables(&groups)[0];
        assert_eq!(ranking.providers(), vec!["gamma", "zeta", "alpha", "beta"]);
        assert_eq!(ranking.entries[3].rank, 4);
    }

    #[test]
    fn test_undefined_rmse_ignores_bias_tie_break() {
        let groups = vec![
            group("beta", "temperature_2m", None, Some(1.0)),
            group("alpha", "temperature_2m", None, None),
        ];
        let ranking = &rank_variables(&groups)[0];
        assert_eq!(ranking.providers(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_overall_uses_available_variables_only() {
        let groups = vec![
            group("a", "precipitation", Some(1.0), None),
            group("a", "temperature_2m", Some(3.0), None),
            group("b", "precipitation", Some(1.5), None),
            group("c", "precipitation", None, None),
        ];
        let overall = overall_ranking(&groups);
        assert_eq!(overall.providers(), vec!["b", "a", "c"]);
        assert_eq!(overall.entries[1].median_of_medians_rmse, Some(2.0));
        assert_eq!(overall.entries[1].variable_count, 2);
        assert_eq!(overall.entries[2].median_of_medians_rmse, None);
    }

    #[test]
    fn test_bias_patterns_order_and_agreement() {
        let mut over = group("over", "temperature_2m", Some(1.0), Some(0.8));
        over.bias_mean = Some(-0.2);
        let mut under = group("under", "temperature_2m", Some(1.0), Some(-0.8));
        under.bias_mean = Some(-0.9);
        let tables = bias_patterns(&[over, under], 0.01);
        let entries = &tables[0].entries;
        assert_eq!(entries[0].provider, "under");
        assert_eq!(entries[0].trend_direction, BiasDirection::Understates);
        assert!(entries[0].mean_agrees);
        assert_eq!(entries[1].trend_direction, BiasDirection::Overstates);
        assert!(!entries[1].mean_agrees);
    }

    #[test]
    fn test_detection_ranking_descending_csi() {
        let mut a = group("a", "precipitation", Some(0.1), None);
        a.csi_median = Some(0.3);
        let mut b = group("b", "precipitation", Some(0.1), None);
        b.csi_median = Some(0.6);
        let c = group("c", "precipitation", Some(0.1), None);
        let t = group("a", "temperature_2m", Some(1.0), None);
        let rankings = detection_rankings(&[a, b, c, t]);
        assert_eq!(rankings.len(), 1);
        let providers: Vec<&str> = rankings[0].entries.iter().map(|e| e.provider.as_str()).collect();
        assert_eq!(providers, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_variable_summaries() {
        let groups = vec![
            group("a", "precipitation", Some(1.0), None),
            group("b", "precipitation", Some(3.0), None),
            group("c", "precipitation", None, None),
        ];
        let s = &variable_summaries(&groups)[0];
        assert_eq!(s.provider_count, 2);
        assert_eq!(s.rmse_median, Some(2.0));
    }
}
