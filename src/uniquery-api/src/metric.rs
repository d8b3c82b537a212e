use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Time-series response of a metric model query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MetricModelUniResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    pub datas: Vec<MetricModelData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub is_variable: bool,
    pub is_calendar: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_query_by_batch: bool,
    pub has_match_persist: bool,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vega_duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_ms: Option<i64>,
}

/// One series: its labels and the aligned `times`/`values` arrays.
///
/// Missing points carry `null` in `values`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MetricModelData {
    pub labels: BTreeMap<String, String>,
    pub times: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_strs: Vec<String>,
    pub values: Vec<Option<f64>>,
}
