//! Execution of compiled metric queries, including the sequential batching
//! of high cardinality terms buckets.

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::config::QueryConfig;
use common::model::metric::DEFAULT_CARDINALITY_PRECISION_THRESHOLD;

use super::dsl::{AggInfo, DslInfo, SeriesTerms};
use super::planner::ExecutionStrategy;
use crate::error::{QuerierError, codes};
use crate::gateway::SearchGateway;

const CARDINALITY_AGG: &str = "__cardinality";

/// Split `eval_size` series into batches of at most `batch_size`.
///
/// The last batch carries the remainder, so the batch sizes always add up to
/// `eval_size`.
pub fn split_series_terms(eval_size: i64, batch_size: i64) -> SeriesTerms {
    if eval_size <= 0 {
        return SeriesTerms::default();
    }
    let batch_size = batch_size.clamp(1, eval_size);
    let batch_num = (eval_size + batch_size - 1) / batch_size;
    SeriesTerms {
        batch_size,
        batch_num,
        last_batch_size: eval_size - (batch_num - 1) * batch_size,
    }
}

/// Raw search responses of one metric query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub responses: Vec<Value>,
    pub by_batch: bool,
}

pub struct BatchExecutor<'a> {
    gateway: &'a dyn SearchGateway,
    indices: &'a [String],
    limits: &'a QueryConfig,
    preference: &'a str,
    cancel: &'a CancellationToken,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        gateway: &'a dyn SearchGateway,
        indices: &'a [String],
        limits: &'a QueryConfig,
        preference: &'a str,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            gateway,
            indices,
            limits,
            preference,
            cancel,
        }
    }

    pub async fn execute(
        &self,
        info: &DslInfo,
        strategy: ExecutionStrategy,
        max_search_series_size: Option<i64>,
    ) -> Result<BatchOutcome, QuerierError> {
        match strategy {
            ExecutionStrategy::Direct => Ok(BatchOutcome {
                responses: vec![self.search(&info.dsl, info.track_total_hits).await?],
                by_batch: false,
            }),
            ExecutionStrategy::TopN => self.top_n(info).await,
            ExecutionStrategy::Batched => match info.term_infos.first() {
                Some(outer) if outer.level == 0 => self.batched(info, max_search_series_size).await,
                _ => {
                    log::warn!(
                        "Outermost bucket is not a terms bucket, high cardinality series are cut to the top N"
                    );
                    self.top_n(info).await
                }
            },
        }
    }

    async fn search(&self, dsl: &Value, track_total_hits: bool) -> Result<Value, QuerierError> {
        if self.cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        let response = self
            .gateway
            .search_submit(dsl, self.indices, None, self.preference, track_total_hits)
            .await
            .map_err(|e| {
                log::error!("Metric search failed: {e}");
                QuerierError::backend(codes::SEARCH_FAILED, &e)
            })?;
        response.json()
    }

    /// Lossy: keeps only the first N outer buckets in the configured order.
    async fn top_n(&self, info: &DslInfo) -> Result<BatchOutcome, QuerierError> {
        let mut plan = info.clone();
        if let Some(outer) = plan.term_infos.first().cloned() {
            let inner: i64 = plan.term_infos[1..]
                .iter()
                .fold(1i64, |acc, t| acc.saturating_mul(t.config_size));
            let series = (self.limits.default_series_num as i64)
                .min(self.limits.max_query_points as i64 / plan.query_time_num.max(1));
            let budget =
                (series / plan.not_terms_series_num.max(1) / inner.max(1)).max(1);
            let size = outer.config_size.min(budget);
            log::warn!(
                "Series of metric query exceed {} ({}), keeping the top {size} values of '{}'",
                self.limits.default_series_num,
                info.bucket_series_num,
                outer.terms_field
            );
            set_terms_size(&mut plan, &outer, size);
        }
        Ok(BatchOutcome {
            responses: vec![self.search(&plan.dsl, plan.track_total_hits).await?],
            by_batch: false,
        })
    }

    /// Terms series one batch may carry: the points budget spread over the
    /// non-terms series and time points, capped by `series_num_by_batch`.
    /// Above `default_series_num` terms series the cap tightens to
    /// `default_series_num` over the non-terms series.
    fn batch_series_budget(&self, plan: &DslInfo, terms_series: i64) -> i64 {
        let not_terms = plan.not_terms_series_num.max(1);
        let mut budget = (self.limits.dsl_max_query_points as i64
            / not_terms
            / plan.query_time_num.max(1))
        .min(self.limits.series_num_by_batch as i64);
        let batch_max = self.limits.default_series_num as i64 / not_terms;
        if terms_series > batch_max {
            budget = budget.min(batch_max);
        }
        budget
    }

    async fn cardinality(&self, info: &DslInfo, field: &str) -> Result<i64, QuerierError> {
        let dsl = json!({
            "size": 0,
            "query": info.dsl["query"],
            "aggs": {
                CARDINALITY_AGG: {
                    "cardinality": {
                        "field": field,
                        "precision_threshold": DEFAULT_CARDINALITY_PRECISION_THRESHOLD,
                    }
                }
            }
        });
        let response = self.search(&dsl, false).await?;
        response
            .pointer(&format!("/aggregations/{CARDINALITY_AGG}/value"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                QuerierError::decode(format!("cardinality of '{field}' missing from response"))
            })
    }

    async fn batched(
        &self,
        info: &DslInfo,
        max_search_series_size: Option<i64>,
    ) -> Result<BatchOutcome, QuerierError> {
        let mut plan = info.clone();

        for term in plan.term_infos.iter_mut() {
            let cardinality = self.cardinality(info, &term.terms_field).await?;
            term.eval_size = cardinality.min(term.config_size);
            log::debug!(
                "Terms '{}' cardinality {cardinality}, evaluated size {}",
                term.terms_field,
                term.eval_size
            );
        }
        if plan.term_infos.iter().any(|t| t.eval_size == 0) {
            return Ok(BatchOutcome {
                responses: Vec::new(),
                by_batch: true,
            });
        }

        let inner: i64 = plan.term_infos[1..]
            .iter()
            .fold(1i64, |acc, t| acc.saturating_mul(t.eval_size));
        let terms_series = plan.term_infos[0].eval_size.saturating_mul(inner);
        let mut budget = (self.batch_series_budget(&plan, terms_series) / inner).max(1);
        if let Some(max) = max_search_series_size {
            budget = budget.min(max);
        }

        let terms = plan.term_infos.clone();
        for term in &terms[1..] {
            set_terms_size(&mut plan, term, term.eval_size);
        }
        let outer = &mut plan.term_infos[0];
        outer.series = split_series_terms(outer.eval_size, budget);
        let outer = outer.clone();
        log::info!(
            "Querying {} values of '{}' in {} batches of {}",
            outer.eval_size,
            outer.terms_field,
            outer.series.batch_num,
            outer.series.batch_size
        );

        let mut responses = Vec::with_capacity(outer.series.batch_num as usize);
        let mut last_key: Option<Value> = None;
        for batch in 0..outer.series.batch_num {
            let size = if batch + 1 == outer.series.batch_num {
                outer.series.last_batch_size
            } else {
                outer.series.batch_size
            };

            let mut page = plan.clone();
            set_terms_size(&mut page, &outer, size);
            if let Some(terms) = page
                .agg_at_mut(&outer.path)
                .and_then(|agg| agg.get_mut("terms"))
            {
                terms["order"] = json!({"_key": "asc"});
            }
            if let Some(key) = &last_key {
                page.push_filter(json!({
                    "range": { outer.terms_field.as_str(): {"gt": key} }
                }));
            }

            let response = self.search(&page.dsl, page.track_total_hits).await?;
            let buckets = response
                .pointer(&format!("/aggregations/{}/buckets", outer.path[0]))
                .and_then(Value::as_array);
            match buckets.and_then(|b| b.last()) {
                Some(last) => last_key = last.get("key").cloned(),
                None => break,
            }
            responses.push(response);
        }

        Ok(BatchOutcome {
            responses,
            by_batch: true,
        })
    }
}

fn set_terms_size(plan: &mut DslInfo, term: &AggInfo, size: i64) {
    if let Some(terms) = plan
        .agg_at_mut(&term.path)
        .and_then(|agg| agg.get_mut("terms"))
    {
        terms["size"] = json!(size);
    }
}
