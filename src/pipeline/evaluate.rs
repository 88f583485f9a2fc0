//! Condition replay and pricing: turns one alert policy into one [`PolicyResult`].

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::backend::{Listing, QueryBackend, TimeSeriesRequest, TimeSeriesView};
use crate::types::{
    AlertPolicy, Aggregation, ConditionKind, PolicyResult, Reducer, TimeSeriesRow, TimeWindow,
};
use crate::utils::config::PricingConsts;

/// The part of a PromQL range response that is priced.
#[derive(Deserialize)]
struct PromRangeResponse {
    data: PromRangeData,
}

#[derive(Deserialize)]
struct PromRangeData {
    result: Vec<IgnoredAny>,
}

/// Replay every condition of `policy` over `window` and price the series they touch.
///
/// The base price is [`PricingConsts::CONDITION_BASE_PRICE`] per condition. A condition that fails
/// keeps whatever it counted before failing and overwrites `error`; the remaining conditions are
/// still evaluated, so `error` only ever holds the last failure.
pub fn evaluate_policy(
    queries: &dyn QueryBackend,
    policy: &AlertPolicy,
    window: &TimeWindow,
) -> PolicyResult {
    let mut result = PolicyResult {
        project_id: policy.project_id().unwrap_or_default().to_string(),
        name: policy.name.clone(),
        display_name: policy.display_name.clone(),
        conditions: policy.conditions.len(),
        time_series: 0,
        price: PricingConsts::CONDITION_BASE_PRICE * policy.conditions.len() as f64,
        error: None,
    };
    if policy.project_id().is_none() {
        result.error = Some(format!("policy name {} has no project", policy.name));
        return result;
    }
    for condition in &policy.conditions {
        if let Err(e) = evaluate_condition(queries, &condition.kind, window, &mut result) {
            result.error = Some(format!("{:#}", e));
        }
    }
    result
}

fn evaluate_condition(
    queries: &dyn QueryBackend,
    kind: &ConditionKind,
    window: &TimeWindow,
    result: &mut PolicyResult,
) -> Result<()> {
    let project = result.project_id.clone();
    match kind {
        ConditionKind::MonitoringQueryLanguage { query } => {
            count_series(queries.query_mql(&project, query), result)
        }
        ConditionKind::PrometheusQueryLanguage {
            query,
            evaluation_interval,
        } => {
            let step = evaluation_interval.as_secs();
            if step == 0 {
                bail!("PromQL condition has no evaluation interval");
            }
            let body = queries.query_promql_range(&project, query, window, step)?;
            let resp: PromRangeResponse =
                serde_json::from_value(body).context("decode PromQL range response")?;
            let series = resp.data.result.len();
            result.price += PricingConsts::PROMQL_MONTH_PRICE / step as f64 * series as f64;
            result.time_series += series;
            Ok(())
        }
        ConditionKind::Threshold {
            filter,
            aggregations,
        }
        | ConditionKind::Absence {
            filter,
            aggregations,
        } => {
            let request = time_series_request(&project, filter, aggregations, window);
            count_series(queries.list_time_series(&request), result)
        }
        ConditionKind::MatchedLog { .. } => Ok(()),
    }
}

/// Price every row of a streamed query. Rows seen before an error still count.
fn count_series(rows: Listing<'_, TimeSeriesRow>, result: &mut PolicyResult) -> Result<()> {
    for row in rows {
        row?;
        result.price += PricingConsts::PRICE_PER_SERIES;
        result.time_series += 1;
    }
    Ok(())
}

/// Build the list request for a threshold or absence condition.
///
/// Headers are enough to count series, except without any aggregation or when either reducer is
/// `REDUCE_COUNT_FALSE`: the backend then omits series from a headers-only response.
pub fn time_series_request(
    project: &str,
    filter: &str,
    aggregations: &[Aggregation],
    window: &TimeWindow,
) -> TimeSeriesRequest {
    let aggregation = aggregations.first().cloned();
    let secondary_aggregation = aggregations.get(1).cloned();
    let counts_false = |a: &Option<Aggregation>| {
        a.as_ref()
            .and_then(|a| a.cross_series_reducer)
            .is_some_and(|r| r == Reducer::CountFalse)
    };
    let view = if aggregation.is_none()
        || counts_false(&aggregation)
        || counts_false(&secondary_aggregation)
    {
        TimeSeriesView::Full
    } else {
        TimeSeriesView::Headers
    };
    TimeSeriesRequest {
        project: project.to_string(),
        filter: filter.to_string(),
        aggregation,
        secondary_aggregation,
        window: *window,
        view,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CannedResponse, Snapshot, SnapshotBackend};
    use crate::types::Condition;
    use std::time::Duration;

    const EPS: f64 = 1e-9;

    fn window() -> TimeWindow {
        TimeWindow::ending_at(
            std::time::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            Duration::from_secs(12 * 3600),
        )
    }

    fn policy(conditions: Vec<ConditionKind>) -> AlertPolicy {
        AlertPolicy {
            name: "projects/p1/alertPolicies/42".to_string(),
            display_name: "latency".to_string(),
            enabled: Some(true),
            conditions: conditions
                .into_iter()
                .map(|kind| Condition {
                    display_name: String::new(),
                    kind,
                })
                .collect(),
        }
    }

    fn mql(query: &str) -> ConditionKind {
        ConditionKind::MonitoringQueryLanguage {
            query: query.to_string(),
        }
    }

    fn threshold(filter: &str, reducers: &[Option<Reducer>]) -> ConditionKind {
        ConditionKind::Threshold {
            filter: filter.to_string(),
            aggregations: reducers
                .iter()
                .map(|r| Aggregation {
                    cross_series_reducer: *r,
                    ..Aggregation::default()
                })
                .collect(),
        }
    }

    fn backend(snapshot: Snapshot) -> SnapshotBackend {
        SnapshotBackend::new(snapshot)
    }

    #[test]
    fn test_zero_conditions_cost_nothing() {
        let b = backend(Snapshot::default());
        let r = evaluate_policy(&b, &policy(vec![]), &window());
        assert_eq!(r.price, 0.0);
        assert_eq!(r.time_series, 0);
        assert_eq!(r.conditions, 0);
        assert_eq!(r.error, None);
        assert_eq!(r.project_id, "p1");
    }

    #[test]
    fn test_mql_prices_each_row() {
        let mut s = Snapshot::default();
        s.mql.insert("fetch gce_instance".into(), CannedResponse::rows(3));
        let r = evaluate_policy(&backend(s), &policy(vec![mql("fetch gce_instance")]), &window());
        assert_eq!(r.time_series, 3);
        assert!((r.price - (1.5 + 3.0 * 0.03024)).abs() < EPS);
        assert_eq!(r.error, None);
    }

    #[test]
    fn test_mql_error_mid_stream_keeps_rows_seen() {
        let mut s = Snapshot::default();
        s.mql.insert(
            "q".into(),
            CannedResponse {
                rows: 2,
                error: Some("deadline exceeded".into()),
                ..CannedResponse::default()
            },
        );
        let r = evaluate_policy(&backend(s), &policy(vec![mql("q")]), &window());
        assert_eq!(r.time_series, 2);
        assert!((r.price - (1.5 + 2.0 * 0.03024)).abs() < EPS);
        assert_eq!(r.error.as_deref(), Some("deadline exceeded"));
    }

    #[test]
    fn test_rows_behind_stream_error_not_counted() {
        let mut s = Snapshot::default();
        s.mql.insert(
            "q".into(),
            CannedResponse {
                rows: 5,
                error: Some("deadline exceeded".into()),
                error_after: Some(2),
                ..CannedResponse::default()
            },
        );
        s.time_series.insert(
            "metric.type=\"x\"".into(),
            CannedResponse {
                rows: 3,
                error: Some("unavailable".into()),
                error_after: Some(0),
                ..CannedResponse::default()
            },
        );
        let r = evaluate_policy(
            &backend(s),
            &policy(vec![mql("q"), threshold("metric.type=\"x\"", &[])]),
            &window(),
        );
        assert_eq!(r.time_series, 2);
        assert!((r.price - (3.0 + 2.0 * 0.03024)).abs() < EPS);
        assert_eq!(r.error.as_deref(), Some("unavailable"));
    }

    #[test]
    fn test_promql_priced_by_step() {
        let mut s = Snapshot::default();
        s.promql.insert("up == 0".into(), CannedResponse::rows(5));
        let cond = ConditionKind::PrometheusQueryLanguage {
            query: "up == 0".into(),
            evaluation_interval: Duration::from_secs(60),
        };
        let r = evaluate_policy(&backend(s), &policy(vec![cond]), &window());
        assert_eq!(r.time_series, 5);
        assert!((r.price - (1.5 + 0.0756)).abs() < EPS);
    }

    #[test]
    fn test_promql_without_interval_is_an_error() {
        let mut s = Snapshot::default();
        s.promql.insert("up".into(), CannedResponse::rows(5));
        let cond = ConditionKind::PrometheusQueryLanguage {
            query: "up".into(),
            evaluation_interval: Duration::ZERO,
        };
        let r = evaluate_policy(&backend(s), &policy(vec![cond]), &window());
        assert_eq!(r.time_series, 0);
        assert_eq!(r.price, 1.5);
        assert!(r.error.is_some());
    }

    #[test]
    fn test_promql_undecodable_body_is_an_error() {
        let mut s = Snapshot::default();
        s.promql.insert(
            "up".into(),
            CannedResponse {
                body: Some(serde_json::json!({ "status": "error" })),
                ..CannedResponse::default()
            },
        );
        let cond = ConditionKind::PrometheusQueryLanguage {
            query: "up".into(),
            evaluation_interval: Duration::from_secs(30),
        };
        let r = evaluate_policy(&backend(s), &policy(vec![cond]), &window());
        assert_eq!(r.time_series, 0);
        assert!(r.error.unwrap().starts_with("decode PromQL range response"));
    }

    #[test]
    fn test_threshold_without_aggregation_requests_full_view() {
        let req = time_series_request("p1", "f", &[], &window());
        assert_eq!(req.view, TimeSeriesView::Full);
        assert_eq!(req.aggregation, None);
        assert_eq!(req.secondary_aggregation, None);
    }

    #[test]
    fn test_count_false_reducer_requests_full_view() {
        let primary = threshold("f", &[Some(Reducer::CountFalse)]);
        let secondary = threshold("f", &[Some(Reducer::Sum), Some(Reducer::CountFalse)]);
        for kind in [primary, secondary] {
            let ConditionKind::Threshold { aggregations, .. } = kind else {
                unreachable!()
            };
            let req = time_series_request("p1", "f", &aggregations, &window());
            assert_eq!(req.view, TimeSeriesView::Full);
        }
    }

    #[test]
    fn test_aggregated_threshold_uses_headers() {
        let aggs = [
            Aggregation {
                cross_series_reducer: Some(Reducer::Mean),
                ..Aggregation::default()
            },
            Aggregation::default(),
            Aggregation {
                cross_series_reducer: Some(Reducer::CountFalse),
                ..Aggregation::default()
            },
        ];
        // Only the first two aggregations are sent.
        let req = time_series_request("p1", "f", &aggs, &window());
        assert_eq!(req.view, TimeSeriesView::Headers);
        assert_eq!(req.aggregation, Some(aggs[0].clone()));
        assert_eq!(req.secondary_aggregation, Some(aggs[1].clone()));
    }

    #[test]
    fn test_threshold_and_absence_price_each_series() {
        let mut s = Snapshot::default();
        s.time_series.insert("cpu".into(), CannedResponse::rows(4));
        s.time_series.insert("heartbeat".into(), CannedResponse::rows(1));
        let b = backend(s);
        let absence = ConditionKind::Absence {
            filter: "heartbeat".into(),
            aggregations: Vec::new(),
        };
        let r = evaluate_policy(
            &b,
            &policy(vec![threshold("cpu", &[Some(Reducer::Max)]), absence]),
            &window(),
        );
        assert_eq!(r.time_series, 5);
        assert!((r.price - (3.0 + 5.0 * 0.03024)).abs() < EPS);
        let requests = b.time_series_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].view, TimeSeriesView::Headers);
        assert_eq!(requests[1].view, TimeSeriesView::Full);
        assert_eq!(requests[0].project, "p1");
        assert_eq!(requests[0].window, window());
    }

    #[test]
    fn test_failed_condition_keeps_earlier_contribution() {
        let mut s = Snapshot::default();
        s.mql.insert("ok".into(), CannedResponse::rows(2));
        s.mql.insert("bad".into(), CannedResponse::error("invalid query"));
        let r = evaluate_policy(&backend(s), &policy(vec![mql("ok"), mql("bad")]), &window());
        assert_eq!(r.time_series, 2);
        assert!((r.price - (3.0 + 2.0 * 0.03024)).abs() < EPS);
        assert_eq!(r.error.as_deref(), Some("invalid query"));
    }

    #[test]
    fn test_error_field_holds_last_failure_only() {
        let mut s = Snapshot::default();
        s.mql.insert("bad1".into(), CannedResponse::error("first"));
        s.mql.insert("ok".into(), CannedResponse::rows(1));
        s.mql.insert("bad2".into(), CannedResponse::error("second"));
        let r = evaluate_policy(
            &backend(s),
            &policy(vec![mql("bad1"), mql("ok"), mql("bad2")]),
            &window(),
        );
        assert_eq!(r.time_series, 1);
        assert_eq!(r.error.as_deref(), Some("second"));
    }

    #[test]
    fn test_log_condition_contributes_base_price_only() {
        let b = backend(Snapshot::default());
        let cond = ConditionKind::MatchedLog {
            filter: "severity>=ERROR".into(),
        };
        let r = evaluate_policy(&b, &policy(vec![cond]), &window());
        assert_eq!(r.price, 1.5);
        assert_eq!(r.time_series, 0);
        assert_eq!(r.error, None);
    }

    #[test]
    fn test_malformed_policy_name_issues_no_queries() {
        let b = backend(Snapshot::default());
        let mut p = policy(vec![threshold("cpu", &[])]);
        p.name = "alertPolicies/42".into();
        let r = evaluate_policy(&b, &p, &window());
        assert_eq!(r.project_id, "");
        assert_eq!(r.price, 1.5);
        assert!(r.error.is_some());
        assert!(b.time_series_requests().is_empty());
    }

    #[test]
    fn test_reevaluation_is_identical() {
        let mut s = Snapshot::default();
        s.mql.insert("q".into(), CannedResponse::rows(7));
        s.promql.insert("p".into(), CannedResponse::rows(3));
        s.time_series.insert("f".into(), CannedResponse::rows(11));
        let b = backend(s);
        let p = policy(vec![
            mql("q"),
            ConditionKind::PrometheusQueryLanguage {
                query: "p".into(),
                evaluation_interval: Duration::from_secs(30),
            },
            threshold("f", &[Some(Reducer::Sum)]),
        ]);
        let first = evaluate_policy(&b, &p, &window());
        let second = evaluate_policy(&b, &p, &window());
        assert_eq!(first, second);
        assert_eq!(first.price.to_bits(), second.price.to_bits());
    }
}
