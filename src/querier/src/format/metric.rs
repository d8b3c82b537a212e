//! Flattening of aggregation responses into labelled series.
//!
//! Bucket levels are walked outermost first; every path through the bucket
//! tree becomes one series (one per percent for percentiles). Range queries
//! then read the `__date_histogram` level onto a dense time axis where
//! missing points are `null`; instant queries read a single value at the
//! evaluation time.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

use common::config::QueryConfig;
use common::model::metric::{AggregationType, DATE_HISTOGRAM_AGG, PERCENT_LABEL, VALUE_AGG};
use uniquery_api::metric::MetricModelData;

use super::time::{align_calendar, align_fixed, next_calendar};
use crate::error::{QuerierError, codes};
use crate::query::dsl::DslInfo;
use crate::query::planner::{Query, Step};

type Point = (Option<String>, Option<f64>);

pub struct MetricFormatter<'a> {
    info: &'a DslInfo,
    query: &'a Query,
    max_points: usize,
}

impl<'a> MetricFormatter<'a> {
    pub fn new(info: &'a DslInfo, query: &'a Query, limits: &QueryConfig) -> Self {
        Self {
            info,
            query,
            max_points: limits.max_date_histogram_buckets,
        }
    }

    pub fn format(&self, responses: &[Value]) -> Result<Vec<MetricModelData>, QuerierError> {
        let mut series = Vec::new();
        for response in responses {
            let hits_total = response.pointer("/hits/total/value").and_then(Value::as_f64);
            let root = response.get("aggregations").unwrap_or(&Value::Null);
            let mut labels = BTreeMap::new();
            self.walk(root, 0, hits_total, &mut labels, &mut series)?;
        }
        Ok(series)
    }

    fn walk(
        &self,
        node: &Value,
        level: usize,
        hits_total: Option<f64>,
        labels: &mut BTreeMap<String, String>,
        out: &mut Vec<MetricModelData>,
    ) -> Result<(), QuerierError> {
        let Some(bucket) = self.info.buckets.get(level) else {
            let fallback = if level == 0 { hits_total } else { None };
            return self.leaf(node, fallback, labels, out);
        };

        let children = node.get(&bucket.agg_name).and_then(|agg| agg.get("buckets"));
        match children {
            Some(Value::Object(keyed)) => {
                for (key, child) in keyed {
                    labels.insert(bucket.label.clone(), key.clone());
                    self.walk(child, level + 1, None, labels, out)?;
                }
            }
            Some(Value::Array(items)) => {
                for child in items {
                    let Some(key) = bucket_key(child) else {
                        continue;
                    };
                    labels.insert(bucket.label.clone(), key);
                    self.walk(child, level + 1, None, labels, out)?;
                }
            }
            _ => {}
        }
        labels.remove(&bucket.label);
        Ok(())
    }

    fn leaf(
        &self,
        node: &Value,
        fallback: Option<f64>,
        labels: &BTreeMap<String, String>,
        out: &mut Vec<MetricModelData>,
    ) -> Result<(), QuerierError> {
        let Some(step) = &self.query.step else {
            for (percent, value) in self.values(node, fallback) {
                out.push(MetricModelData {
                    labels: series_labels(labels, percent),
                    times: vec![self.query.time],
                    time_strs: Vec::new(),
                    values: vec![value],
                });
            }
            return Ok(());
        };

        let buckets = node
            .get(DATE_HISTOGRAM_AGG)
            .and_then(|h| h.get("buckets"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut per_percent: Vec<(Option<String>, HashMap<i64, Option<f64>>)> = Vec::new();
        let mut first = i64::MAX;
        let mut last = i64::MIN;
        for bucket in buckets {
            let Some(t) = bucket.get("key").and_then(Value::as_i64) else {
                continue;
            };
            first = first.min(t);
            last = last.max(t);
            for (percent, value) in self.values(bucket, None) {
                match per_percent.iter_mut().find(|(p, _)| *p == percent) {
                    Some((_, points)) => {
                        points.insert(t, value);
                    }
                    None => per_percent.push((percent, HashMap::from([(t, value)]))),
                }
            }
        }
        if per_percent.is_empty() {
            return Ok(());
        }

        let times = self.axis(step, first, last)?;
        let time_strs = if step.is_calendar() {
            times.iter().map(|t| render_time(*t)).collect()
        } else {
            Vec::new()
        };
        for (percent, points) in per_percent {
            out.push(MetricModelData {
                labels: series_labels(labels, percent),
                values: times.iter().map(|t| points.get(t).copied().flatten()).collect(),
                times: times.clone(),
                time_strs: time_strs.clone(),
            });
        }
        Ok(())
    }

    /// Value(s) of one bucket; more than one only for percentiles.
    fn values(&self, node: &Value, fallback: Option<f64>) -> Vec<Point> {
        let value = node.get(VALUE_AGG);
        let aggregation = &self.info.aggregation;
        match aggregation.aggregation_type {
            AggregationType::DocCount => {
                vec![(None, node.get("doc_count").and_then(Value::as_f64).or(fallback))]
            }
            AggregationType::Percentiles => {
                let values = value.and_then(|v| v.get("values"));
                aggregation
                    .percents
                    .iter()
                    .map(|p| {
                        let key = format!("{p:?}");
                        let v = values.and_then(|vs| vs.get(&key)).and_then(Value::as_f64);
                        (Some(key), v)
                    })
                    .collect()
            }
            AggregationType::TopHits => {
                let source = value.and_then(|v| v.pointer("/hits/hits/0/_source"));
                let v = source.and_then(|s| source_field(s, &aggregation.field));
                vec![(None, v.and_then(Value::as_f64))]
            }
            _ => vec![(None, value.and_then(|v| v.get("value")).and_then(Value::as_f64))],
        }
    }

    /// Dense axis covering both the requested window and every returned key.
    fn axis(&self, step: &Step, first: i64, last: i64) -> Result<Vec<i64>, QuerierError> {
        let too_many = |points: usize| {
            QuerierError::validation(
                codes::TOO_MANY_BUCKETS,
                format!(
                    "the time axis holds {points} points, the limit is {}",
                    self.max_points
                ),
            )
        };

        match step {
            Step::Fixed { millis } => {
                let millis = (*millis).max(1);
                let start = first.min(align_fixed(self.query.start, millis));
                let end = last.max(align_fixed(self.query.end, millis));
                let points = end
                    .checked_sub(start)
                    .and_then(|span| usize::try_from(span / millis + 1).ok())
                    .unwrap_or(usize::MAX);
                if points > self.max_points {
                    return Err(too_many(points));
                }
                Ok((0..points as i64).map(|i| start + i * millis).collect())
            }
            Step::Calendar(unit) => {
                let start = first.min(align_calendar(self.query.start, *unit)?);
                let end = last.max(align_calendar(self.query.end, *unit)?);
                let mut times = Vec::new();
                let mut t = start;
                while t <= end {
                    if times.len() == self.max_points {
                        return Err(too_many(times.len() + 1));
                    }
                    times.push(t);
                    t = next_calendar(t, *unit)?;
                }
                Ok(times)
            }
        }
    }
}

fn bucket_key(bucket: &Value) -> Option<String> {
    if let Some(key) = bucket.get("key_as_string").and_then(Value::as_str) {
        return Some(key.to_string());
    }
    match bucket.get("key")? {
        Value::Null => None,
        Value::String(key) => Some(key.clone()),
        other => Some(other.to_string()),
    }
}

/// `_source` lookup accepting both flat and nested dotted names.
fn source_field<'v>(source: &'v Value, field: &str) -> Option<&'v Value> {
    if let Some(value) = source.get(field) {
        return Some(value);
    }
    field
        .split('.')
        .try_fold(source, |node, part| node.get(part))
}

fn series_labels(labels: &BTreeMap<String, String>, percent: Option<String>) -> BTreeMap<String, String> {
    let mut labels = labels.clone();
    if let Some(percent) = percent {
        labels.insert(PERCENT_LABEL.to_string(), percent);
    }
    labels
}

fn render_time(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
