use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Detail of a single trace: span tree, flat span details and statistics.
///
/// All timestamps are nanosecond epoch integers.
///
/// Example:
/// {
///   "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
///   "start_time": 1700000000000000000,
///   "end_time": 1700000000250000000,
///   "duration": 250000000,
///   "status_stats": {"Error": 0, "Ok": 3, "Unset": 0},
///   "depth": 2,
///   "detail": {"key": "a1", "children": [...]},
///   "spans": {"a1": {...}},
///   "services": ["cart", "checkout"]
/// }
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TraceDetailResponse {
    pub trace_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub status_stats: BTreeMap<String, i64>,
    pub depth: i32,
    pub detail: Option<BriefSpanNode>,
    pub spans: BTreeMap<String, SpanDetailResponse>,
    pub services: Vec<String>,
}

/// Node of the span tree. Children are ordered by ascending start time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BriefSpanNode {
    pub key: String,
    pub parent_span_id: String,
    pub name: String,
    pub service_name: String,
    pub span_kind: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub status: String,
    pub related_log_count: i64,
    pub children: Vec<BriefSpanNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpanDetailResponse {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub name: String,
    pub span_kind: String,
    pub service_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub status: String,
    pub related_log_count: i64,
}

/// One page of raw span or log documents.
///
/// Each entry is the stored document plus `__`-prefixed fields naming the
/// span it belongs to, e.g. `__trace_id`, `__span_id` and for spans
/// `__start_time` or `__status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TraceEntryList {
    pub total: i64,
    pub entries: Vec<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_detail_field_names() {
        let detail = TraceDetailResponse {
            trace_id: "t1".to_string(),
            start_time: 10,
            end_time: 30,
            duration: 20,
            status_stats: BTreeMap::from([
                ("Error".to_string(), 0),
                ("Ok".to_string(), 1),
                ("Unset".to_string(), 0),
            ]),
            depth: 1,
            detail: None,
            spans: BTreeMap::new(),
            services: vec!["cart".to_string()],
        };

        let json = serde_json::to_value(&detail).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "depth",
                "detail",
                "duration",
                "end_time",
                "services",
                "spans",
                "start_time",
                "status_stats",
                "trace_id"
            ]
        );
    }
}
