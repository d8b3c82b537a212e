use std::collections::{BTreeMap, BTreeSet};

use uniquery_api::trace::{BriefSpanNode, SpanDetailResponse, TraceDetailResponse};

use super::span::{BriefSpan, Span, SpanStatus};

/// Aggregate of every span of one trace.
///
/// `start_time` and `end_time` are the minimum start and maximum end over all
/// ingested spans, including spans that end up outside the tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraceDetail {
    pub trace_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status_stats: BTreeMap<SpanStatus, i64>,
    pub depth: i32,
    pub root: Option<BriefSpan>,
    pub spans: BTreeMap<String, Span>,
    pub services: BTreeSet<String>,
}

impl TraceDetail {
    pub fn new(trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            status_stats: SpanStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            ..Default::default()
        }
    }

    /// Folds a decoded span into the running aggregates.
    ///
    /// A span id seen twice keeps the last copy but is only counted once.
    pub fn ingest(&mut self, span: Span) {
        if self.spans.is_empty() {
            self.start_time = span.start_time;
            self.end_time = span.end_time;
        } else {
            self.start_time = self.start_time.min(span.start_time);
            self.end_time = self.end_time.max(span.end_time);
        }

        if let Some(previous) = self.spans.get(&span.span_id) {
            if let Some(count) = self.status_stats.get_mut(&previous.status) {
                *count -= 1;
            }
        }
        *self.status_stats.entry(span.status).or_insert(0) += 1;

        if !span.service_name.is_empty() {
            self.services.insert(span.service_name.clone());
        }
        self.spans.insert(span.span_id.clone(), span);
    }

    pub fn duration(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn status(&self) -> &'static str {
        if self.status_stats.get(&SpanStatus::Error).copied().unwrap_or(0) > 0 {
            "error"
        } else {
            "ok"
        }
    }
}

impl From<TraceDetail> for TraceDetailResponse {
    fn from(detail: TraceDetail) -> Self {
        let duration = detail.duration();
        Self {
            trace_id: detail.trace_id,
            start_time: detail.start_time,
            end_time: detail.end_time,
            duration,
            status_stats: detail
                .status_stats
                .into_iter()
                .map(|(status, count)| (status.as_str().to_string(), count))
                .collect(),
            depth: detail.depth,
            detail: detail.root.map(BriefSpanNode::from),
            spans: detail
                .spans
                .into_iter()
                .map(|(id, span)| (id, SpanDetailResponse::from(span)))
                .collect(),
            services: detail.services.into_iter().collect(),
        }
    }
}
