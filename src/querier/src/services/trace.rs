use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use uniquery_api::request::SpanPageParams;
use uniquery_api::trace::{TraceDetailResponse, TraceEntryList};

use super::ServiceContainer;
use crate::catalog::ResourcePolicy;
use crate::error::{QuerierError, codes};
use crate::trace::TraceAssembler;
use crate::trace::spans::SpanReader;

fn require_id(name: &str, value: &str) -> Result<(), QuerierError> {
    if value.is_empty() {
        return Err(QuerierError::validation(
            codes::INVALID_PARAMETER,
            format!("{name} cannot be empty"),
        ));
    }
    Ok(())
}

pub struct TraceService {
    assembler: TraceAssembler,
    spans: SpanReader,
    policy: Arc<dyn ResourcePolicy>,
}

impl TraceService {
    pub fn new(container: &ServiceContainer) -> Self {
        Self {
            assembler: TraceAssembler::new(
                container.gateway.clone(),
                container.log_groups.clone(),
                container.pagination.clone(),
                container.config.search.clone(),
                container.config.query.clone(),
            ),
            spans: SpanReader::new(
                container.gateway.clone(),
                container.log_groups.clone(),
                container.config.search.preference.clone(),
                container.config.query.max_search_size,
            ),
            policy: container.policy.clone(),
        }
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get_trace_detail(
        &self,
        trace_view_id: &str,
        log_view_id: &str,
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TraceDetailResponse, QuerierError> {
        require_id("trace_id", trace_id)?;
        self.policy.check_data_view(trace_view_id)?;
        self.policy.check_data_view(log_view_id)?;

        let detail = self
            .assembler
            .assemble(trace_view_id, log_view_id, trace_id, cancel)
            .await?;
        log::debug!(
            "Trace {trace_id} assembled: {} spans, depth {}",
            detail.spans.len(),
            detail.depth
        );
        Ok(TraceDetailResponse::from(detail))
    }

    /// Raw span documents of a trace; `_all` lists spans of every trace.
    #[tracing::instrument(skip(self, page, cancel))]
    pub async fn get_span_list(
        &self,
        trace_view_id: &str,
        trace_id: &str,
        page: &SpanPageParams,
        cancel: &CancellationToken,
    ) -> Result<TraceEntryList, QuerierError> {
        require_id("trace_id", trace_id)?;
        self.policy.check_data_view(trace_view_id)?;
        self.spans
            .span_list(trace_view_id, trace_id, page, cancel)
            .await
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get_span(
        &self,
        trace_view_id: &str,
        trace_id: &str,
        span_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, QuerierError> {
        require_id("trace_id", trace_id)?;
        require_id("span_id", span_id)?;
        self.policy.check_data_view(trace_view_id)?;
        self.spans
            .span(trace_view_id, trace_id, span_id, cancel)
            .await
    }

    #[tracing::instrument(skip(self, page, cancel))]
    pub async fn get_span_related_logs(
        &self,
        log_view_id: &str,
        trace_id: &str,
        span_id: &str,
        page: &SpanPageParams,
        cancel: &CancellationToken,
    ) -> Result<TraceEntryList, QuerierError> {
        require_id("trace_id", trace_id)?;
        require_id("span_id", span_id)?;
        self.policy.check_data_view(log_view_id)?;
        self.spans
            .related_logs(log_view_id, trace_id, span_id, page, cancel)
            .await
    }
}
