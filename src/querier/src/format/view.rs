use serde::Deserialize;
use serde_json::{Map, Value, json};

use uniquery_api::view::{ViewDatas, ViewInfo, ViewUniResponseV1, ViewUniResponseV2};

use crate::error::QuerierError;

/// Row field carrying the physical index a row was read from.
pub const INDEX_FIELD: &str = "__index";
/// Row field carrying the relevance score of a row.
pub const SCORE_FIELD: &str = "_score";

/// One page of a document search, scroll or point-in-time search.
#[derive(Debug, Default, Deserialize)]
pub struct SearchPage {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: String,
    #[serde(default)]
    pub pit_id: Option<String>,
    #[serde(default)]
    pub hits: PageHits,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageHits {
    #[serde(default)]
    pub total: Option<HitsTotal>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HitsTotal {
    pub value: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
    #[serde(default)]
    pub sort: Option<Vec<Value>>,
}

impl SearchPage {
    pub fn from_body(body: &[u8]) -> Result<Self, QuerierError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn reported_total(&self) -> Option<i64> {
        self.hits.total.as_ref().map(|t| t.value)
    }

    /// Sort values of the last hit, the cursor of the next page.
    pub fn last_sort(&self) -> Option<Vec<Value>> {
        self.hits.hits.last().and_then(|hit| hit.sort.clone())
    }
}

fn row(hit: Hit) -> Map<String, Value> {
    let mut values = hit.source;
    values.insert(INDEX_FIELD.to_string(), json!(hit.index));
    values.insert(SCORE_FIELD.to_string(), json!(hit.score));
    values
}

/// Offset/scroll shaped rows. `total` falls back to the total reported with
/// the page when no count was requested.
pub fn format_v1(page: SearchPage, total: Option<i64>, view: Option<ViewInfo>) -> ViewUniResponseV1 {
    let total = total.or(page.reported_total()).unwrap_or_default();
    ViewUniResponseV1 {
        scroll_id: page.scroll_id,
        view,
        datas: vec![ViewDatas {
            total,
            values: page.hits.hits.into_iter().map(|h| Value::Object(row(h))).collect(),
        }],
    }
}

/// `search_after` shaped rows. The backend may hand out a new point in time
/// id with every page; it wins over the one the request was sent with.
pub fn format_v2(
    page: SearchPage,
    pit_id: Option<&str>,
    total: Option<i64>,
    vega_duration_ms: Option<i64>,
) -> ViewUniResponseV2 {
    let search_after = page.last_sort();
    let pit_id = page
        .pit_id
        .clone()
        .filter(|id| !id.is_empty())
        .or_else(|| pit_id.map(str::to_string))
        .unwrap_or_default();

    ViewUniResponseV2 {
        pit_id,
        search_after,
        entries: page.hits.hits.into_iter().map(row).collect(),
        total_count: total,
        vega_duration_ms,
    }
}

/// Total reported by a `_count` call.
pub fn count_total(body: &[u8]) -> Result<i64, QuerierError> {
    #[derive(Deserialize)]
    struct CountResponse {
        count: i64,
    }
    let response: CountResponse = serde_json::from_slice(body)?;
    Ok(response.count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> SearchPage {
        serde_json::from_value(json!({
            "_scroll_id": "scroll-1",
            "pit_id": "pit-2",
            "hits": {
                "total": {"value": 42, "relation": "eq"},
                "hits": [
                    {"_index": "web-1", "_score": null, "_source": {"message": "a"}, "sort": [3, "x"]},
                    {"_index": "web-2", "_score": 1.5, "_source": {"message": "b"}, "sort": [2, "y"]}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_v1_rows_carry_index_and_score() {
        let response = format_v1(page(), None, None);
        assert_eq!(response.scroll_id, "scroll-1");
        assert_eq!(response.datas[0].total, 42);
        assert_eq!(
            response.datas[0].values[1],
            json!({"message": "b", "__index": "web-2", "_score": 1.5})
        );
        assert!(response.view.is_none());

        let counted = format_v1(page(), Some(7), None);
        assert_eq!(counted.datas[0].total, 7);
    }

    #[test]
    fn test_v2_cursor_is_last_sort() {
        let response = format_v2(page(), Some("pit-1"), Some(42), Some(3));
        assert_eq!(response.pit_id, "pit-2");
        assert_eq!(response.search_after, Some(vec![json!(2), json!("y")]));
        assert_eq!(response.entries.len(), 2);
        assert_eq!(response.total_count, Some(42));
    }

    #[test]
    fn test_empty_page() {
        let response = format_v2(SearchPage::default(), Some("pit-1"), None, None);
        assert_eq!(response.pit_id, "pit-1");
        assert!(response.search_after.is_none());
        assert!(response.entries.is_empty());
    }

    #[test]
    fn test_count_total() {
        assert_eq!(count_total(br#"{"count": 12, "_shards": {}}"#).unwrap(), 12);
        assert!(count_total(b"{}").is_err());
    }
}
