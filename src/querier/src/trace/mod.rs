//! Trace detail assembly.
//!
//! Spans and related log counts are fetched by two concurrent tasks. The
//! first failure cancels the sibling and is returned right away; the sibling
//! only stops issuing further backend calls. Once both succeed, the counts
//! are joined onto the spans and the tree is built by the caller's task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::config::{QueryConfig, SearchConfig};
use common::model::trace::TraceDetail;

use crate::catalog::LogGroupAccess;
use crate::error::{QuerierError, codes};
use crate::gateway::SearchGateway;
use crate::pagination::PaginationManager;

pub mod producers;
pub mod spans;
pub mod tree;

use producers::{LogCountProducer, SpanProducer};

enum Outcome {
    Spans(Result<TraceDetail, QuerierError>),
    LogCounts(Result<HashMap<String, i64>, QuerierError>),
}

pub struct TraceAssembler {
    gateway: Arc<dyn SearchGateway>,
    log_groups: Arc<dyn LogGroupAccess>,
    pagination: PaginationManager,
    search: SearchConfig,
    limits: QueryConfig,
}

impl TraceAssembler {
    pub fn new(
        gateway: Arc<dyn SearchGateway>,
        log_groups: Arc<dyn LogGroupAccess>,
        pagination: PaginationManager,
        search: SearchConfig,
        limits: QueryConfig,
    ) -> Self {
        Self {
            gateway,
            log_groups,
            pagination,
            search,
            limits,
        }
    }

    pub async fn assemble(
        &self,
        trace_view_id: &str,
        log_view_id: &str,
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TraceDetail, QuerierError> {
        let token = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(2);

        let spans = SpanProducer {
            gateway: self.gateway.clone(),
            log_groups: self.log_groups.clone(),
            pagination: self.pagination.clone(),
            view_id: trace_view_id.to_string(),
            trace_id: trace_id.to_string(),
            page_size: self.limits.max_search_size,
            keep_alive: self.search.scroll_keep_alive,
            preference: self.search.preference.clone(),
        };
        let span_tx = tx.clone();
        let span_token = token.clone();
        tokio::spawn(async move {
            let outcome = spans.run(span_token).await;
            let _ = span_tx.send(Outcome::Spans(outcome)).await;
        });

        let logs = LogCountProducer {
            gateway: self.gateway.clone(),
            log_groups: self.log_groups.clone(),
            view_id: log_view_id.to_string(),
            trace_id: trace_id.to_string(),
            bucket_cap: self.limits.max_related_logs_bucket,
            preference: self.search.preference.clone(),
        };
        let log_token = token.clone();
        tokio::spawn(async move {
            let outcome = logs.run(log_token).await;
            let _ = tx.send(Outcome::LogCounts(outcome)).await;
        });

        let mut detail = None;
        let mut counts = None;
        while detail.is_none() || counts.is_none() {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    token.cancel();
                    return Err(QuerierError::Cancelled);
                }
                outcome = rx.recv() => outcome,
            };

            let failure = match outcome {
                Some(Outcome::Spans(Ok(d))) => {
                    detail = Some(d);
                    None
                }
                Some(Outcome::LogCounts(Ok(c))) => {
                    counts = Some(c);
                    None
                }
                Some(Outcome::Spans(Err(e))) | Some(Outcome::LogCounts(Err(e))) => Some(e),
                None => Some(QuerierError::internal(
                    codes::INTERNAL_ERROR,
                    "trace fetch task ended without reporting",
                )),
            };
            if let Some(err) = failure {
                token.cancel();
                log::warn!("Trace {trace_id} assembly failed: {err}");
                return Err(err);
            }
        }

        let (Some(mut detail), Some(counts)) = (detail, counts) else {
            return Err(QuerierError::internal(
                codes::INTERNAL_ERROR,
                "trace fetch finished without results",
            ));
        };

        for (span_id, span) in detail.spans.iter_mut() {
            span.related_log_count = counts.get(span_id).copied().unwrap_or(0);
        }

        let root = tree::build_trace_tree(&detail.spans)?;
        detail.depth = tree::trace_tree_depth(Some(&root));
        detail.root = Some(root);
        Ok(detail)
    }
}
