//! The two paginated fetches behind a trace detail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use common::model::data_view::LogGroup;
use common::model::span::{Span, SpanStatus};
use common::model::trace::TraceDetail;

use crate::catalog::LogGroupAccess;
use crate::error::{QuerierError, codes};
use crate::gateway::SearchGateway;
use crate::pagination::PaginationManager;

pub const TRACE_ID_FIELD: &str = "SpanContext.TraceID.keyword";
pub const SPAN_ID_FIELD: &str = "SpanContext.SpanID.keyword";
pub const PARENT_SPAN_ID_FIELD: &str = "Parent.SpanID.keyword";
pub const START_TIME_FIELD: &str = "StartTime";
pub const END_TIME_FIELD: &str = "EndTime";
pub const DURATION_FIELD: &str = "Duration";
pub const NAME_FIELD: &str = "Name.keyword";
pub const STATUS_FIELD: &str = "Status.CodeDesc.keyword";
pub const SERVICE_NAME_FIELD: &str = "Resource.service.name.keyword";
pub const SPAN_KIND_FIELD: &str = "SpanKindDesc.keyword";

/// Aggregation counting related log records per span id.
pub const RELATED_LOG_AGG: &str = "group_by_SpanID";

pub(crate) const SPAN_DOC_VALUES: [&str; 9] = [
    SPAN_ID_FIELD,
    START_TIME_FIELD,
    END_TIME_FIELD,
    DURATION_FIELD,
    NAME_FIELD,
    PARENT_SPAN_ID_FIELD,
    STATUS_FIELD,
    SERVICE_NAME_FIELD,
    SPAN_KIND_FIELD,
];

#[derive(Debug, Deserialize)]
struct ScrollPage {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: String,
    hits: PageHits,
}

#[derive(Debug, Deserialize)]
struct PageHits {
    total: TotalHits,
    #[serde(default)]
    hits: Vec<SpanHit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
    value: i64,
}

#[derive(Debug, Deserialize)]
struct SpanHit {
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct LogAggResponse {
    aggregations: LogAggregations,
}

#[derive(Debug, Deserialize)]
struct LogAggregations {
    #[serde(rename = "group_by_SpanID")]
    group_by_span_id: LogBuckets,
}

#[derive(Debug, Deserialize)]
struct LogBuckets {
    #[serde(default)]
    buckets: Vec<LogBucket>,
}

#[derive(Debug, Deserialize)]
struct LogBucket {
    key: String,
    doc_count: i64,
}

pub(crate) fn trace_term(trace_id: &str) -> Value {
    json!({"term": {TRACE_ID_FIELD: {"value": trace_id}}})
}

pub(crate) fn first<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name)?.as_array()?.first()
}

pub(crate) fn first_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    first(fields, name)?.as_str()
}

/// `Ok(None)` when the field is absent, an error when it is not an integer.
fn first_i64(
    fields: &Map<String, Value>,
    name: &str,
    span_id: &str,
) -> Result<Option<i64>, QuerierError> {
    match first(fields, name) {
        None => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            QuerierError::decode(format!(
                "{name} of span {span_id} is not a 64-bit integer: {value}"
            ))
        }),
    }
}

/// Decode one hit. Spans lacking an id, times or status are skipped.
pub fn decode_span(
    trace_id: &str,
    fields: &Map<String, Value>,
) -> Result<Option<Span>, QuerierError> {
    let Some(span_id) = first_str(fields, SPAN_ID_FIELD) else {
        return Ok(None);
    };
    let Some(start_time) = first_i64(fields, START_TIME_FIELD, span_id)? else {
        return Ok(None);
    };
    let Some(end_time) = first_i64(fields, END_TIME_FIELD, span_id)? else {
        return Ok(None);
    };
    let Some(status) = first_str(fields, STATUS_FIELD) else {
        return Ok(None);
    };

    let duration = end_time.checked_sub(start_time).ok_or_else(|| {
        QuerierError::decode(format!(
            "span {span_id} runs from {start_time} to {end_time}, its duration overflows"
        ))
    })?;

    let text = |name| first_str(fields, name).unwrap_or_default().to_string();
    Ok(Some(Span {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: text(PARENT_SPAN_ID_FIELD),
        name: text(NAME_FIELD),
        span_kind: text(SPAN_KIND_FIELD),
        service_name: text(SERVICE_NAME_FIELD),
        start_time,
        end_time,
        duration,
        status: SpanStatus::parse(status).unwrap_or(SpanStatus::Unset),
        related_log_count: 0,
    }))
}

pub(crate) async fn resolve_log_group(
    log_groups: &dyn LogGroupAccess,
    id: &str,
    missing_code: &'static str,
    kind: &str,
) -> Result<LogGroup, QuerierError> {
    match log_groups.get_log_group_query_filters(id).await? {
        Some(group) => Ok(group),
        None => Err(QuerierError::validation(
            missing_code,
            format!("The {kind} whose id equals {id} was not found!"),
        )),
    }
}

/// Pages every span of a trace through a scroll context.
pub struct SpanProducer {
    pub gateway: Arc<dyn SearchGateway>,
    pub log_groups: Arc<dyn LogGroupAccess>,
    pub pagination: PaginationManager,
    pub view_id: String,
    pub trace_id: String,
    pub page_size: usize,
    pub keep_alive: Duration,
    pub preference: String,
}

impl SpanProducer {
    fn not_found(&self) -> QuerierError {
        QuerierError::not_found(
            codes::TRACE_NOT_FOUND,
            format!(
                "The trace whose traceId equals {} was not found!",
                self.trace_id
            ),
        )
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<TraceDetail, QuerierError> {
        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        let group = resolve_log_group(
            self.log_groups.as_ref(),
            &self.view_id,
            codes::TRACE_DATA_VIEW_NOT_FOUND,
            "trace_data_view",
        )
        .await?;
        if group.index_pattern.is_empty() {
            return Err(self.not_found());
        }

        let mut must = group.must_filters;
        must.push(trace_term(&self.trace_id));
        let dsl = json!({
            "query": {"bool": {"must": must}},
            "docvalue_fields": SPAN_DOC_VALUES,
            "_source": false,
            "size": self.page_size,
        });
        log::debug!("Span query for trace {}: {dsl}", self.trace_id);

        let query_id = format!("trace-{}", uuid::Uuid::new_v4());
        let mut session = self.pagination.open_scroll(&query_id, self.gateway.clone())?;
        let mut detail = TraceDetail::new(&self.trace_id);
        let mut total = 0i64;
        let mut scroll_id = String::new();
        let mut page_num = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(QuerierError::Cancelled);
            }
            page_num += 1;

            let response = if page_num == 1 {
                self.gateway
                    .search_submit(
                        &dsl,
                        &group.index_pattern,
                        Some(self.keep_alive),
                        &self.preference,
                        true,
                    )
                    .await
                    .map_err(|e| {
                        log::error!("Span search of trace {} failed: {e}", self.trace_id);
                        QuerierError::backend(codes::SEARCH_FAILED, &e)
                    })?
            } else {
                self.gateway
                    .scroll(&scroll_id, self.keep_alive)
                    .await
                    .map_err(|e| {
                        log::error!(
                            "Span scroll {page_num} of trace {} failed: {e}",
                            self.trace_id
                        );
                        QuerierError::backend(codes::SCROLL_FAILED, &e)
                    })?
            };

            let page: ScrollPage = response.json()?;
            session.record(&page.scroll_id);
            scroll_id = page.scroll_id;

            if page_num == 1 {
                total = page.hits.total.value;
                if total == 0 {
                    return Err(self.not_found());
                }
            }

            let page_len = page.hits.hits.len();
            for hit in page.hits.hits {
                if let Some(span) = decode_span(&self.trace_id, &hit.fields)? {
                    detail.ingest(span);
                }
            }

            if page_len == 0 || total <= (page_num * self.page_size) as i64 {
                break;
            }
        }

        session.close();
        if detail.spans.is_empty() {
            return Err(self.not_found());
        }
        log::debug!(
            "Fetched {} spans of trace {} in {page_num} pages",
            detail.span_count(),
            self.trace_id
        );
        Ok(detail)
    }
}

/// Counts related log records per span id.
///
/// The terms aggregation is ordered by span id; a page filled up to
/// `bucket_cap` is continued with `span id > last key`.
pub struct LogCountProducer {
    pub gateway: Arc<dyn SearchGateway>,
    pub log_groups: Arc<dyn LogGroupAccess>,
    pub view_id: String,
    pub trace_id: String,
    pub bucket_cap: usize,
    pub preference: String,
}

impl LogCountProducer {
    pub async fn run(self, cancel: CancellationToken) -> Result<HashMap<String, i64>, QuerierError> {
        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        let group = resolve_log_group(
            self.log_groups.as_ref(),
            &self.view_id,
            codes::LOG_DATA_VIEW_NOT_FOUND,
            "log_data_view",
        )
        .await?;

        let mut counts = HashMap::new();
        if group.index_pattern.is_empty() {
            return Ok(counts);
        }

        let mut must = group.must_filters;
        must.push(trace_term(&self.trace_id));
        let mut dsl = json!({
            "query": {"bool": {"must": must}},
            "size": 0,
            "aggs": {
                RELATED_LOG_AGG: {
                    "terms": {
                        "field": SPAN_ID_FIELD,
                        "size": self.bucket_cap,
                        "min_doc_count": 1,
                        "shard_min_doc_count": 1,
                        "order": {"_key": "asc"},
                    }
                }
            }
        });

        loop {
            if cancel.is_cancelled() {
                return Err(QuerierError::Cancelled);
            }
            let response = self
                .gateway
                .search_submit(&dsl, &group.index_pattern, None, &self.preference, false)
                .await
                .map_err(|e| {
                    log::error!("Related log search of trace {} failed: {e}", self.trace_id);
                    QuerierError::backend(codes::SEARCH_FAILED, &e)
                })?;

            let page: LogAggResponse = response.json()?;
            let buckets = page.aggregations.group_by_span_id.buckets;
            let len = buckets.len();
            let last_key = buckets.last().map(|b| b.key.clone());
            for bucket in buckets {
                counts.insert(bucket.key, bucket.doc_count);
            }

            match last_key {
                Some(last) if self.bucket_cap > 0 && len >= self.bucket_cap => {
                    dsl["query"] = json!({
                        "bool": {
                            "must": must,
                            "filter": [{"range": {SPAN_ID_FIELD: {"gt": last}}}],
                        }
                    });
                }
                _ => break,
            }
        }

        Ok(counts)
    }
}
