//! Paged reads of raw span documents and the logs attached to a span.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use common::model::data_view::LogGroup;
use uniquery_api::request::{SortParam, SpanPageParams};
use uniquery_api::trace::TraceEntryList;

use super::producers::{
    DURATION_FIELD, END_TIME_FIELD, NAME_FIELD, PARENT_SPAN_ID_FIELD, SERVICE_NAME_FIELD,
    SPAN_DOC_VALUES, SPAN_ID_FIELD, SPAN_KIND_FIELD, START_TIME_FIELD, STATUS_FIELD,
    TRACE_ID_FIELD, first, resolve_log_group,
};
use crate::catalog::LogGroupAccess;
use crate::error::{QuerierError, codes};
use crate::gateway::SearchGateway;

/// Id that disables the trace or span filter.
pub const ALL_IDS: &str = "_all";

const LOG_TIMESTAMP_FIELD: &str = "@timestamp";

/// Abstract entry fields and the doc value each one is read from.
const SPAN_ENTRY_FIELDS: [(&str, &str); 10] = [
    ("__trace_id", TRACE_ID_FIELD),
    ("__span_id", SPAN_ID_FIELD),
    ("__parent_span_id", PARENT_SPAN_ID_FIELD),
    ("__name", NAME_FIELD),
    ("__start_time", START_TIME_FIELD),
    ("__end_time", END_TIME_FIELD),
    ("__duration", DURATION_FIELD),
    ("__kind", SPAN_KIND_FIELD),
    ("__status", STATUS_FIELD),
    ("__service_name", SERVICE_NAME_FIELD),
];

const LOG_ENTRY_FIELDS: [(&str, &str); 2] =
    [("__trace_id", TRACE_ID_FIELD), ("__span_id", SPAN_ID_FIELD)];

#[derive(Debug, Deserialize)]
struct EntryPage {
    hits: EntryHits,
}

#[derive(Debug, Deserialize)]
struct EntryHits {
    total: EntryTotal,
    #[serde(default)]
    hits: Vec<EntryHit>,
}

#[derive(Debug, Deserialize)]
struct EntryTotal {
    value: i64,
}

#[derive(Debug, Deserialize)]
struct EntryHit {
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl EntryHit {
    fn into_entry(self, abstract_fields: &[(&str, &str)]) -> Map<String, Value> {
        let mut entry = self.source;
        for (name, field) in abstract_fields {
            let value = first(&self.fields, field).cloned().unwrap_or(Value::Null);
            entry.insert((*name).to_string(), value);
        }
        entry
    }
}

fn id_term(field: &str, id: &str) -> Option<Value> {
    (id != ALL_IDS).then(|| json!({"term": {field: {"value": id}}}))
}

/// Reads span and log documents by trace and span id.
pub struct SpanReader {
    gateway: Arc<dyn SearchGateway>,
    log_groups: Arc<dyn LogGroupAccess>,
    preference: String,
    max_search_size: usize,
}

impl SpanReader {
    pub fn new(
        gateway: Arc<dyn SearchGateway>,
        log_groups: Arc<dyn LogGroupAccess>,
        preference: String,
        max_search_size: usize,
    ) -> Self {
        Self {
            gateway,
            log_groups,
            preference,
            max_search_size,
        }
    }

    /// Spans of a trace, `_all` reads spans of every trace.
    pub async fn span_list(
        &self,
        view_id: &str,
        trace_id: &str,
        page: &SpanPageParams,
        cancel: &CancellationToken,
    ) -> Result<TraceEntryList, QuerierError> {
        let window = self.window(page, START_TIME_FIELD, "asc")?;
        let group = self.trace_group(view_id, cancel).await?;
        if group.index_pattern.is_empty() {
            return Ok(TraceEntryList::default());
        }

        let filters: Vec<Value> = id_term(TRACE_ID_FIELD, trace_id).into_iter().collect();
        let (total, entries) = self
            .fetch(group, filters, window, &SPAN_ENTRY_FIELDS, cancel)
            .await?;
        log::debug!("Read {} of {total} spans of trace {trace_id}", entries.len());
        Ok(TraceEntryList { total, entries })
    }

    pub async fn span(
        &self,
        view_id: &str,
        trace_id: &str,
        span_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, QuerierError> {
        let not_found = || {
            QuerierError::not_found(
                codes::SPAN_NOT_FOUND,
                format!("The span whose spanId equals {span_id} was not found!"),
            )
        };
        let group = self.trace_group(view_id, cancel).await?;
        if group.index_pattern.is_empty() {
            return Err(not_found());
        }

        let mut filters: Vec<Value> = id_term(TRACE_ID_FIELD, trace_id).into_iter().collect();
        filters.push(json!({"term": {SPAN_ID_FIELD: {"value": span_id}}}));
        let window = Window {
            offset: 0,
            limit: 1,
            sort: Vec::new(),
        };
        let (_, entries) = self
            .fetch(group, filters, window, &SPAN_ENTRY_FIELDS, cancel)
            .await?;
        entries.into_iter().next().ok_or_else(not_found)
    }

    /// Log records of a span, newest first unless `page` sorts otherwise.
    pub async fn related_logs(
        &self,
        log_view_id: &str,
        trace_id: &str,
        span_id: &str,
        page: &SpanPageParams,
        cancel: &CancellationToken,
    ) -> Result<TraceEntryList, QuerierError> {
        let window = self.window(page, LOG_TIMESTAMP_FIELD, "desc")?;
        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        let group = resolve_log_group(
            self.log_groups.as_ref(),
            log_view_id,
            codes::LOG_DATA_VIEW_NOT_FOUND,
            "log_data_view",
        )
        .await?;
        if group.index_pattern.is_empty() {
            return Ok(TraceEntryList::default());
        }

        let filters: Vec<Value> = id_term(TRACE_ID_FIELD, trace_id)
            .into_iter()
            .chain(id_term(SPAN_ID_FIELD, span_id))
            .collect();
        let (total, entries) = self
            .fetch(group, filters, window, &LOG_ENTRY_FIELDS, cancel)
            .await?;
        Ok(TraceEntryList { total, entries })
    }

    async fn trace_group(
        &self,
        view_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LogGroup, QuerierError> {
        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        resolve_log_group(
            self.log_groups.as_ref(),
            view_id,
            codes::TRACE_DATA_VIEW_NOT_FOUND,
            "trace_data_view",
        )
        .await
    }

    /// `offset + limit` stays within the backend result window.
    fn window(
        &self,
        page: &SpanPageParams,
        default_field: &str,
        default_direction: &str,
    ) -> Result<Window, QuerierError> {
        let max = i64::try_from(self.max_search_size).unwrap_or(i64::MAX);
        if page.offset < 0 {
            return Err(QuerierError::validation(
                codes::INVALID_PARAMETER,
                format!("offset must be >= 0, got {}", page.offset),
            ));
        }
        if page.limit < 1 || page.limit > max {
            return Err(QuerierError::validation(
                codes::INVALID_PARAMETER,
                format!("limit must be within [1, {max}], got {}", page.limit),
            ));
        }
        if page.offset.saturating_add(page.limit) > max {
            return Err(QuerierError::validation(
                codes::INVALID_PARAMETER,
                format!("offset + limit must not exceed {max}"),
            ));
        }

        let sort = if page.sort.is_empty() {
            vec![json!({default_field: {"order": default_direction}})]
        } else {
            page.sort.iter().map(sort_clause).collect::<Result<_, _>>()?
        };
        Ok(Window {
            offset: page.offset,
            limit: page.limit,
            sort,
        })
    }

    async fn fetch(
        &self,
        group: LogGroup,
        filters: Vec<Value>,
        window: Window,
        abstract_fields: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<(i64, Vec<Map<String, Value>>), QuerierError> {
        let mut docvalue_fields: Vec<&str> = SPAN_DOC_VALUES.to_vec();
        docvalue_fields.push(TRACE_ID_FIELD);

        let mut must = group.must_filters;
        must.extend(filters);
        let mut dsl = json!({
            "query": {"bool": {"must": must}},
            "from": window.offset,
            "size": window.limit,
            "_source": true,
            "docvalue_fields": docvalue_fields,
        });
        if !window.sort.is_empty() {
            dsl["sort"] = Value::Array(window.sort);
        }
        log::debug!("Span document query: {dsl}");

        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        let response = self
            .gateway
            .search_submit(&dsl, &group.index_pattern, None, &self.preference, true)
            .await
            .map_err(|e| {
                log::error!("Span document search failed: {e}");
                QuerierError::backend(codes::SEARCH_FAILED, &e)
            })?;

        let page: EntryPage = response.json()?;
        let entries = page
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.into_entry(abstract_fields))
            .collect();
        Ok((page.hits.total.value, entries))
    }
}

struct Window {
    offset: i64,
    limit: i64,
    sort: Vec<Value>,
}

fn sort_clause(sort: &SortParam) -> Result<Value, QuerierError> {
    match sort.direction.as_str() {
        "asc" | "desc" => Ok(json!({sort.field.as_str(): {"order": sort.direction}})),
        other => Err(QuerierError::validation(
            codes::INVALID_SORT,
            format!("sort direction of {} must be asc or desc, got {other}", sort.field),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    use crate::catalog::MockLogGroupAccess;
    use crate::trace::producers::trace_term;
    use crate::testing::{GatewayCall, MockSearchGateway, entry_page, log_document, span_document};

    fn log_groups() -> MockLogGroupAccess {
        let mut log_groups = MockLogGroupAccess::new();
        log_groups
            .expect_get_log_group_query_filters()
            .returning(|id| {
                Ok(match id {
                    "traces" => Some(LogGroup {
                        index_pattern: vec!["traces-*".to_string()],
                        must_filters: vec![json!({"query_string": {"query": "*"}})],
                    }),
                    "logs" => Some(LogGroup {
                        index_pattern: vec!["logs-*".to_string()],
                        must_filters: vec![],
                    }),
                    "empty" => Some(LogGroup::default()),
                    _ => None,
                })
            });
        log_groups
    }

    fn reader(gateway: Arc<MockSearchGateway>) -> SpanReader {
        SpanReader::new(gateway, Arc::new(log_groups()), String::new(), 100)
    }

    async fn only_query(gateway: &MockSearchGateway) -> Value {
        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            GatewayCall::SearchSubmit {
                query,
                track_total_hits,
                ..
            } => {
                assert!(*track_total_hits);
                query.clone()
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_span_list_adds_abstract_fields() {
        let gateway = Arc::new(MockSearchGateway::new().with_search(
            &["traces-*"],
            entry_page(
                7,
                vec![
                    span_document("t1", "a", "", 100, 400, "Ok"),
                    span_document("t1", "b", "a", 150, 200, "Error"),
                ],
            ),
        ));

        let list = reader(gateway.clone())
            .span_list(
                "traces",
                "t1",
                &SpanPageParams {
                    offset: 2,
                    limit: 2,
                    sort: Vec::new(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(list.total, 7);
        assert_eq!(list.entries.len(), 2);
        let b = &list.entries[1];
        assert_eq!(b["__span_id"], "b");
        assert_eq!(b["__parent_span_id"], "a");
        assert_eq!(b["__trace_id"], "t1");
        assert_eq!(b["__start_time"], 150);
        assert_eq!(b["__duration"], 50);
        assert_eq!(b["__status"], "Error");
        assert_eq!(b["__service_name"], "checkout");
        assert_eq!(b["Name"], "op-b");

        let query = only_query(&gateway).await;
        assert_eq!(query["from"], 2);
        assert_eq!(query["size"], 2);
        assert_eq!(query["sort"], json!([{"StartTime": {"order": "asc"}}]));
        let must = query["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[1], trace_term("t1"));
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_all_trace_ids_skip_the_filter() {
        let gateway =
            Arc::new(MockSearchGateway::new().with_search(&["traces-*"], entry_page(0, vec![])));

        let list = reader(gateway.clone())
            .span_list("traces", ALL_IDS, &SpanPageParams::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(list, TraceEntryList::default());

        let query = only_query(&gateway).await;
        assert_eq!(query["query"]["bool"]["must"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_span_window_is_validated_before_any_call() {
        let gateway = Arc::new(MockSearchGateway::new());
        let reader = reader(gateway.clone());
        let cancel = CancellationToken::new();

        for (offset, limit) in [(-1, 10), (0, 0), (0, 101), (95, 10)] {
            let page = SpanPageParams {
                offset,
                limit,
                sort: Vec::new(),
            };
            let err = reader
                .span_list("traces", "t1", &page, &cancel)
                .await
                .unwrap_err();
            assert_eq!(err.code(), codes::INVALID_PARAMETER, "{offset}/{limit}");
        }

        let page = SpanPageParams {
            sort: vec![SortParam {
                field: "StartTime".to_string(),
                direction: "up".to_string(),
            }],
            ..Default::default()
        };
        let err = reader
            .span_list("traces", "t1", &page, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_SORT);
        assert!(gateway.calls().await.is_empty());
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_single_span_lookup() {
        let gateway = Arc::new(MockSearchGateway::new().with_search(
            &["traces-*"],
            entry_page(1, vec![span_document("t1", "b", "a", 150, 200, "Ok")]),
        ));

        let span = reader(gateway.clone())
            .span("traces", "t1", "b", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(span["__span_id"], "b");
        assert_eq!(span["__kind"], "Server");

        let query = only_query(&gateway).await;
        assert_eq!(query["size"], 1);
        let must = query["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must[2], json!({"term": {SPAN_ID_FIELD: {"value": "b"}}}));
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_missing_span_is_not_found() {
        let gateway =
            Arc::new(MockSearchGateway::new().with_search(&["traces-*"], entry_page(0, vec![])));

        let err = reader(gateway)
            .span("traces", "t1", "zz", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::SPAN_NOT_FOUND);
        assert_eq!(err.status(), 404);

        let err = reader(Arc::new(MockSearchGateway::new()))
            .span("empty", "t1", "zz", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::SPAN_NOT_FOUND);
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_related_logs_filter_by_span() {
        let gateway = Arc::new(MockSearchGateway::new().with_search(
            &["logs-*"],
            entry_page(
                3,
                vec![
                    log_document("t1", "b", 300, "payment declined"),
                    log_document("t1", "b", 250, "retrying"),
                ],
            ),
        ));

        let list = reader(gateway.clone())
            .related_logs(
                "logs",
                ALL_IDS,
                "b",
                &SpanPageParams {
                    limit: 2,
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(list.total, 3);
        assert_eq!(list.entries[0]["message"], "payment declined");
        assert_eq!(list.entries[0]["__trace_id"], "t1");
        assert_eq!(list.entries[1]["__span_id"], "b");
        assert!(!list.entries[0].contains_key("__status"));

        let query = only_query(&gateway).await;
        assert_eq!(query["sort"], json!([{"@timestamp": {"order": "desc"}}]));
        assert_eq!(
            query["query"]["bool"]["must"],
            json!([{"term": {SPAN_ID_FIELD: {"value": "b"}}}])
        );
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_unknown_views_are_rejected() {
        let gateway = Arc::new(MockSearchGateway::new());
        let reader = reader(gateway.clone());
        let cancel = CancellationToken::new();

        let err = reader
            .span_list("nope", "t1", &SpanPageParams::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::TRACE_DATA_VIEW_NOT_FOUND);

        let err = reader
            .related_logs("nope", "t1", "a", &SpanPageParams::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::LOG_DATA_VIEW_NOT_FOUND);
        assert!(gateway.calls().await.is_empty());
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_cancelled_read_issues_no_search() {
        let gateway = Arc::new(MockSearchGateway::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reader(gateway.clone())
            .span("traces", "t1", "a", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::CANCELLED);
        assert!(gateway.calls().await.is_empty());
    }
}
