use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Summary of the data view echoed back when `include_view` is requested.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewInfo {
    pub id: String,
    pub name: String,
    pub technical_name: String,
    pub query_type: String,
    pub fields: Vec<ViewFieldInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewFieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub display_name: String,
}

/// Scroll paginated view rows.
///
/// Example:
/// {
///   "scroll_id": "FGluY2x1ZGVfY29udGV4dF91dWlk...",
///   "datas": [{"total": 2, "values": [{"message": "a", "__index": "logs-1", "_score": null}]}]
/// }
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ViewUniResponseV1 {
    pub scroll_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewInfo>,
    pub datas: Vec<ViewDatas>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ViewDatas {
    pub total: i64,
    pub values: Vec<Value>,
}

/// `search_after` paginated view rows.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ViewUniResponseV2 {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_after: Option<Vec<Value>>,
    pub entries: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vega_duration_ms: Option<i64>,
}

/// Backend answer to a point-in-time deletion.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DeletePitsResponse {
    #[serde(default)]
    pub pits: Vec<DeletedPit>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeletedPit {
    pub pit_id: String,
    pub successful: bool,
}
