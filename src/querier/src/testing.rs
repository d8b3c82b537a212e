//! Test doubles for the search backend.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use uniquery_api::view::DeletePitsResponse;

use crate::gateway::{GatewayError, GatewayResponse, SearchGateway};

/// Key under which searches against any index set are scripted.
pub const ANY_INDICES: &str = "*";

/// A call received by [`MockSearchGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    SearchSubmit {
        query: Value,
        indices: Vec<String>,
        scroll: Option<Duration>,
        preference: String,
        track_total_hits: bool,
    },
    Scroll {
        scroll_id: String,
        keep_alive: Duration,
    },
    Count {
        query: Value,
        indices: Vec<String>,
    },
    CreatePointInTime {
        indices: Vec<String>,
        keep_alive: Duration,
    },
    SearchWithPit {
        query: Value,
    },
    DeletePointInTime {
        pit_ids: Vec<String>,
    },
    DeleteScroll {
        scroll_ids: Vec<String>,
    },
}

type Script<T> = VecDeque<Result<T, GatewayError>>;

/// Gateway answering from per-operation scripts and recording every call.
///
/// Searches are scripted per index set (`indices.join(",")`) so concurrent
/// producers against different indices stay deterministic. An exhausted
/// script answers with a 500 error.
#[derive(Default)]
pub struct MockSearchGateway {
    searches: Mutex<HashMap<String, Script<Value>>>,
    search_delays: HashMap<String, Duration>,
    scrolls: Mutex<Script<Value>>,
    counts: Mutex<Script<Value>>,
    pits: Mutex<Script<String>>,
    pit_searches: Mutex<Script<Value>>,
    cancel_on_pit_search: Option<CancellationToken>,
    pit_deletes: Mutex<Script<DeletePitsResponse>>,
    scroll_deletes: Mutex<Script<Value>>,
    calls: Mutex<Vec<GatewayCall>>,
}

fn key(indices: &[&str]) -> String {
    indices.join(",")
}

fn exhausted(operation: &str) -> GatewayError {
    GatewayError {
        status: 500,
        error_type: String::new(),
        message: format!("no scripted response for {operation}"),
    }
}

fn respond(result: Result<Value, GatewayError>) -> Result<GatewayResponse, GatewayError> {
    result.map(|body| GatewayResponse::new(200, body.to_string()))
}

impl MockSearchGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_search(mut self, indices: &[&str], result: Result<Value, GatewayError>) -> Self {
        self.searches
            .get_mut()
            .entry(key(indices))
            .or_default()
            .push_back(result);
        self
    }

    pub fn with_search(self, indices: &[&str], body: Value) -> Self {
        self.push_search(indices, Ok(body))
    }

    pub fn with_search_error(self, indices: &[&str], err: GatewayError) -> Self {
        self.push_search(indices, Err(err))
    }

    /// Delay every search against `indices` before it is answered.
    pub fn with_search_delay(mut self, indices: &[&str], delay: Duration) -> Self {
        self.search_delays.insert(key(indices), delay);
        self
    }

    pub fn with_scroll(mut self, body: Value) -> Self {
        self.scrolls.get_mut().push_back(Ok(body));
        self
    }

    pub fn with_scroll_error(mut self, err: GatewayError) -> Self {
        self.scrolls.get_mut().push_back(Err(err));
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.counts.get_mut().push_back(Ok(json!({ "count": count })));
        self
    }

    pub fn with_pit(mut self, pit_id: &str) -> Self {
        self.pits.get_mut().push_back(Ok(pit_id.to_string()));
        self
    }

    pub fn with_pit_search(mut self, body: Value) -> Self {
        self.pit_searches.get_mut().push_back(Ok(body));
        self
    }

    pub fn with_pit_search_error(mut self, err: GatewayError) -> Self {
        self.pit_searches.get_mut().push_back(Err(err));
        self
    }

    /// Cancel `token` as soon as a point in time search is answered.
    pub fn cancel_after_pit_search(mut self, token: CancellationToken) -> Self {
        self.cancel_on_pit_search = Some(token);
        self
    }

    pub fn with_pit_delete(mut self, response: DeletePitsResponse) -> Self {
        self.pit_deletes.get_mut().push_back(Ok(response));
        self
    }

    pub fn with_pit_delete_error(mut self, err: GatewayError) -> Self {
        self.pit_deletes.get_mut().push_back(Err(err));
        self
    }

    pub fn with_scroll_delete_error(mut self, err: GatewayError) -> Self {
        self.scroll_deletes.get_mut().push_back(Err(err));
        self
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().await.clone()
    }

    /// Poll the recorded calls until one matches or `timeout` elapses.
    pub async fn wait_for_call<F>(&self, timeout: Duration, predicate: F) -> Option<GatewayCall>
    where
        F: Fn(&GatewayCall) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(call) = self.calls.lock().await.iter().find(|c| predicate(c)) {
                return Some(call.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn record(&self, call: GatewayCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl SearchGateway for MockSearchGateway {
    async fn search_submit(
        &self,
        query: &Value,
        indices: &[String],
        scroll: Option<Duration>,
        preference: &str,
        track_total_hits: bool,
    ) -> Result<GatewayResponse, GatewayError> {
        self.record(GatewayCall::SearchSubmit {
            query: query.clone(),
            indices: indices.to_vec(),
            scroll,
            preference: preference.to_string(),
            track_total_hits,
        })
        .await;

        let index_key = indices.join(",");
        if let Some(delay) = self.search_delays.get(&index_key) {
            tokio::time::sleep(*delay).await;
        }

        let next = {
            let mut searches = self.searches.lock().await;
            let exact = searches.get_mut(&index_key).and_then(VecDeque::pop_front);
            exact.or_else(|| {
                searches
                    .get_mut(ANY_INDICES)
                    .and_then(VecDeque::pop_front)
            })
        };
        respond(next.unwrap_or_else(|| Err(exhausted(&format!("search on {index_key}")))))
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<GatewayResponse, GatewayError> {
        self.record(GatewayCall::Scroll {
            scroll_id: scroll_id.to_string(),
            keep_alive,
        })
        .await;
        let next = self.scrolls.lock().await.pop_front();
        respond(next.unwrap_or_else(|| Err(exhausted("scroll"))))
    }

    async fn count(
        &self,
        query: &Value,
        indices: &[String],
    ) -> Result<GatewayResponse, GatewayError> {
        self.record(GatewayCall::Count {
            query: query.clone(),
            indices: indices.to_vec(),
        })
        .await;
        let next = self.counts.lock().await.pop_front();
        respond(next.unwrap_or_else(|| Err(exhausted("count"))))
    }

    async fn create_point_in_time(
        &self,
        indices: &[String],
        keep_alive: Duration,
    ) -> Result<String, GatewayError> {
        self.record(GatewayCall::CreatePointInTime {
            indices: indices.to_vec(),
            keep_alive,
        })
        .await;
        let next = self.pits.lock().await.pop_front();
        next.unwrap_or_else(|| Err(exhausted("create point in time")))
    }

    async fn search_with_pit(&self, query: &Value) -> Result<GatewayResponse, GatewayError> {
        self.record(GatewayCall::SearchWithPit {
            query: query.clone(),
        })
        .await;
        let next = self.pit_searches.lock().await.pop_front();
        if let Some(token) = &self.cancel_on_pit_search {
            token.cancel();
        }
        respond(next.unwrap_or_else(|| Err(exhausted("point in time search"))))
    }

    async fn delete_point_in_time(
        &self,
        pit_ids: &[String],
    ) -> Result<DeletePitsResponse, GatewayError> {
        self.record(GatewayCall::DeletePointInTime {
            pit_ids: pit_ids.to_vec(),
        })
        .await;
        let next = self.pit_deletes.lock().await.pop_front();
        next.unwrap_or_else(|| Ok(DeletePitsResponse::default()))
    }

    async fn delete_scroll(&self, scroll_ids: &[String]) -> Result<GatewayResponse, GatewayError> {
        self.record(GatewayCall::DeleteScroll {
            scroll_ids: scroll_ids.to_vec(),
        })
        .await;
        let next = self.scroll_deletes.lock().await.pop_front();
        respond(next.unwrap_or_else(|| Ok(json!({"succeeded": true}))))
    }
}

/// Scroll search page with `_scroll_id`, `hits.total.value` and `hits.hits`.
pub fn scroll_page(scroll_id: &str, total: i64, hits: Vec<Value>) -> Value {
    json!({
        "_scroll_id": scroll_id,
        "hits": {"total": {"value": total, "relation": "eq"}, "hits": hits},
    })
}

/// Span hit carrying the doc values requested by the trace query.
pub fn span_hit(span_id: &str, parent: &str, start: i64, end: i64, status: &str) -> Value {
    json!({
        "fields": {
            "SpanContext.SpanID.keyword": [span_id],
            "Parent.SpanID.keyword": [parent],
            "StartTime": [start],
            "EndTime": [end],
            "Duration": [end - start],
            "Name.keyword": [format!("op-{span_id}")],
            "Status.CodeDesc.keyword": [status],
            "Resource.service.name.keyword": ["checkout"],
            "SpanKindDesc.keyword": ["Server"],
        }
    })
}

/// Plain search page with `hits.total.value` and `hits.hits`.
pub fn entry_page(total: i64, hits: Vec<Value>) -> Value {
    json!({"hits": {"total": {"value": total, "relation": "eq"}, "hits": hits}})
}

/// Span hit with its stored document and the doc values of a span read.
pub fn span_document(
    trace_id: &str,
    span_id: &str,
    parent: &str,
    start: i64,
    end: i64,
    status: &str,
) -> Value {
    let mut hit = span_hit(span_id, parent, start, end, status);
    hit["fields"]["SpanContext.TraceID.keyword"] = json!([trace_id]);
    hit["_source"] = json!({
        "Name": format!("op-{span_id}"),
        "SpanContext": {"TraceID": trace_id, "SpanID": span_id},
        "StartTime": start,
        "EndTime": end,
    });
    hit
}

/// Log hit attached to a span.
pub fn log_document(trace_id: &str, span_id: &str, timestamp: i64, message: &str) -> Value {
    json!({
        "_source": {"@timestamp": timestamp, "message": message},
        "fields": {
            "SpanContext.TraceID.keyword": [trace_id],
            "SpanContext.SpanID.keyword": [span_id],
        }
    })
}

/// Response of the related log aggregation with `(span id, count)` buckets.
pub fn log_buckets(buckets: &[(&str, i64)]) -> Value {
    let buckets: Vec<Value> = buckets
        .iter()
        .map(|(key, count)| json!({"key": key, "doc_count": count}))
        .collect();
    json!({
        "hits": {"total": {"value": 0, "relation": "eq"}, "hits": []},
        "aggregations": {"group_by_SpanID": {"buckets": buckets}},
    })
}
