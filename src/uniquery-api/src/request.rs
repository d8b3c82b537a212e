use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single filter condition on a view or model field.
///
/// Example:
/// {"name": "service.name", "operation": "in", "value": ["cart", "checkout"]}
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilterParam {
    pub name: String,
    pub operation: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SortParam {
    pub field: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_direction() -> String {
    "desc".to_string()
}

/// Parameters shared by every view query shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ViewCommonParams {
    /// Start of the time window, epoch milliseconds
    #[serde(default)]
    pub start: Option<i64>,
    /// End of the time window, epoch milliseconds
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub need_total: bool,
    #[serde(default)]
    pub filters: Vec<FilterParam>,
    #[serde(default)]
    pub output_fields: Vec<String>,
}

/// Scroll based view query (first page or continuation by `scroll_id`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DataViewQueryV1 {
    #[serde(flatten)]
    pub common: ViewCommonParams,
    #[serde(default)]
    pub sort: Vec<SortParam>,
    /// Scroll keep-alive such as `1m`
    #[serde(default)]
    pub scroll: Option<String>,
    #[serde(default)]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub include_view: bool,
}

/// `search_after` based view query, optionally pinned to a point in time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DataViewQueryV2 {
    #[serde(flatten)]
    pub common: ViewCommonParams,
    #[serde(default)]
    pub sort: Vec<SortParam>,
    #[serde(default)]
    pub search_after: Option<Vec<Value>>,
    #[serde(default)]
    pub pit_id: Option<String>,
    /// Keep-alive of the point in time, `s`, `m` or `h` suffixed
    #[serde(default)]
    pub pit_keep_alive: Option<String>,
}

/// Inline view definition used to preview a view before it is saved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SimulatedView {
    pub log_group_id: String,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub date_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<ViewFieldParam>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewFieldParam {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DataViewSimulateQuery {
    #[serde(flatten)]
    pub common: ViewCommonParams,
    #[serde(default)]
    pub sort: Vec<SortParam>,
    pub view: SimulatedView,
    #[serde(default)]
    pub search_after: Option<Vec<Value>>,
    #[serde(default)]
    pub pit_id: Option<String>,
    #[serde(default)]
    pub pit_keep_alive: Option<String>,
}

/// Window over the spans of a trace or the logs of a span.
///
/// Example:
/// {"offset": 0, "limit": 20, "sort": [{"field": "StartTime", "direction": "asc"}]}
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpanPageParams {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_span_limit")]
    pub limit: i64,
    #[serde(default)]
    pub sort: Vec<SortParam>,
}

fn default_span_limit() -> i64 {
    10
}

impl Default for SpanPageParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_span_limit(),
            sort: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DeletePitsRequest {
    pub pit_ids: Vec<String>,
}
