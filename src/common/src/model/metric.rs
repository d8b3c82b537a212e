use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use uniquery_api::request::FilterParam;

/// Aggregation name of the date histogram level.
pub const DATE_HISTOGRAM_AGG: &str = "__date_histogram";
/// Aggregation name of the value level.
pub const VALUE_AGG: &str = "__value";
/// Key of the `filters` bucket catching unmatched documents.
pub const OTHER_BUCKET_KEY: &str = "__other";
/// Series label carrying the percent of a percentiles aggregation.
pub const PERCENT_LABEL: &str = "__percent";

pub const DEFAULT_CARDINALITY_PRECISION_THRESHOLD: i64 = 40000;
pub const GEOHASH_MIN_PRECISION: i32 = 1;
pub const GEOHASH_MAX_PRECISION: i32 = 12;

pub const CALENDAR_INTERVALS: [&str; 7] =
    ["minute", "hour", "day", "week", "month", "quarter", "year"];

pub const AUTO_INTERVAL: &str = "auto";

/// A metric model as stored by the configuration service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub data_view_id: String,
    #[serde(default)]
    pub unit: String,
    /// Epoch milliseconds of the last definition change
    #[serde(default)]
    pub update_time: i64,
    pub formula_config: FormulaConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulaConfig {
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
    #[serde(default)]
    pub date_histogram: Option<DateHistogramConfig>,
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub query_string: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketType {
    Terms,
    Range,
    Filters,
    GeohashGrid,
    DateRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermsOrder {
    Field,
    Value,
    Count,
}

/// One bucket level of a formula.
///
/// Only the fields matching `bucket_type` are read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(rename = "type")]
    pub bucket_type: BucketType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub field: String,

    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub order: Option<TermsOrder>,
    #[serde(default)]
    pub direction: String,

    #[serde(default)]
    pub ranges: Vec<RangeConfig>,

    #[serde(default)]
    pub other_bucket: bool,
    #[serde(default)]
    pub filters: BTreeMap<String, BucketFilter>,

    #[serde(default)]
    pub precision: i32,
}

impl BucketConfig {
    pub fn terms(field: &str, size: i64) -> Self {
        Self {
            bucket_type: BucketType::Terms,
            name: String::new(),
            field: field.to_string(),
            size,
            order: None,
            direction: String::new(),
            ranges: Vec::new(),
            other_bucket: false,
            filters: BTreeMap::new(),
            precision: 0,
        }
    }

    /// Label name of the bucket: explicit name, else the field.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.field
        } else {
            &self.name
        }
    }

    /// Aggregation name used in the DSL; dots are not allowed there.
    pub fn agg_name(&self) -> String {
        self.label().replace('.', "_")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub from: Option<Value>,
    #[serde(default)]
    pub to: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketFilter {
    pub query_string: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    Fixed,
    Calendar,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DateHistogramConfig {
    pub field: String,
    pub interval_type: IntervalType,
    /// Calendar unit, fixed duration, or `auto` to follow the query step
    pub interval_value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    DocCount,
    ValueCount,
    Cardinality,
    Sum,
    Avg,
    Max,
    Min,
    Percentiles,
    TopHits,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::DocCount => "doc_count",
            AggregationType::ValueCount => "value_count",
            AggregationType::Cardinality => "cardinality",
            AggregationType::Sum => "sum",
            AggregationType::Avg => "avg",
            AggregationType::Max => "max",
            AggregationType::Min => "min",
            AggregationType::Percentiles => "percentiles",
            AggregationType::TopHits => "top_hits",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(rename = "type")]
    pub aggregation_type: AggregationType,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub percents: Vec<f64>,
    #[serde(default)]
    pub precision_threshold: Option<i64>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            aggregation_type: AggregationType::DocCount,
            field: String::new(),
            percents: Vec::new(),
            precision_threshold: None,
        }
    }
}

/// Request against a metric model. Times are epoch milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricModelQuery {
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub instant: bool,
    /// Evaluation time of an instant query
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub filters: Vec<FilterParam>,
    /// Accept a lossy top-N answer instead of batching high cardinality series
    #[serde(default)]
    pub ignoring_hcts: bool,
    #[serde(default)]
    pub max_search_series_size: Option<i64>,
    #[serde(default)]
    pub include_model: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_config_from_json() {
        let raw = r#"{
            "buckets": [
                {"type": "terms", "field": "host.name", "size": 50, "order": "value", "direction": "desc"},
                {"type": "filters", "name": "level", "other_bucket": true,
                 "filters": {"err": {"query_string": "level:error"}}}
            ],
            "date_histogram": {"field": "@timestamp", "interval_type": "calendar", "interval_value": "auto"},
            "aggregation": {"type": "percentiles", "field": "latency", "percents": [50, 99]}
        }"#;

        let config: FormulaConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.buckets.len(), 2);
        assert_eq!(config.buckets[0].order, Some(TermsOrder::Value));
        assert_eq!(config.buckets[0].agg_name(), "host_name");
        assert_eq!(config.buckets[1].label(), "level");
        assert!(config.buckets[1].other_bucket);
        assert_eq!(
            config.date_histogram.as_ref().unwrap().interval_type,
            IntervalType::Calendar
        );
        assert_eq!(
            config.aggregation.aggregation_type,
            AggregationType::Percentiles
        );
        assert_eq!(config.aggregation.percents, vec![50.0, 99.0]);
    }

    #[test]
    fn test_query_defaults() {
        let query: MetricModelQuery =
            serde_json::from_str(r#"{"start": 0, "end": 3600000}"#).unwrap();
        assert!(!query.instant);
        assert!(!query.ignoring_hcts);
        assert!(query.step.is_none());
        assert!(query.max_search_series_size.is_none());
    }
}
