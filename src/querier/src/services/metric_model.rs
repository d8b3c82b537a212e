use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use common::config::{QueryConfig, SearchConfig};
use common::model::metric::{MetricModel, MetricModelQuery};
use uniquery_api::metric::MetricModelUniResponse;

use super::{ServiceContainer, ensure_index_base, resolve_data_view, resolve_log_group};
use crate::catalog::{DataViewAccess, LogGroupAccess, MetricModelAccess, ResourcePolicy};
use crate::error::{QuerierError, codes};
use crate::format::metric::MetricFormatter;
use crate::gateway::SearchGateway;
use crate::query::batcher::BatchExecutor;
use crate::query::dsl::DslBuilder;
use crate::query::planner::QueryPlanner;

pub struct MetricModelService {
    gateway: Arc<dyn SearchGateway>,
    log_groups: Arc<dyn LogGroupAccess>,
    data_views: Arc<dyn DataViewAccess>,
    metric_models: Arc<dyn MetricModelAccess>,
    policy: Arc<dyn ResourcePolicy>,
    search: SearchConfig,
    limits: QueryConfig,
}

impl MetricModelService {
    pub fn new(container: &ServiceContainer) -> Self {
        Self {
            gateway: container.gateway.clone(),
            log_groups: container.log_groups.clone(),
            data_views: container.data_views.clone(),
            metric_models: container.metric_models.clone(),
            policy: container.policy.clone(),
            search: container.config.search.clone(),
            limits: container.config.query.clone(),
        }
    }

    async fn model(&self, model_id: &str) -> Result<MetricModel, QuerierError> {
        self.metric_models
            .get_metric_model(model_id)
            .await?
            .ok_or_else(|| {
                QuerierError::not_found(
                    codes::METRIC_MODEL_NOT_FOUND,
                    format!("The metric model whose id equals {model_id} was not found!"),
                )
            })
    }

    /// Evaluate a metric model over the request window.
    ///
    /// High cardinality terms buckets are either fetched batch by batch or,
    /// with `ignoring_hcts`, cut down to the top N series.
    #[tracing::instrument(skip(self, request, cancel))]
    pub async fn query_metric_model(
        &self,
        model_id: &str,
        request: &MetricModelQuery,
        cancel: &CancellationToken,
    ) -> Result<MetricModelUniResponse, QuerierError> {
        let started = Instant::now();
        self.policy.check_metric_model(model_id)?;
        let model = self.model(model_id).await?;
        let view = resolve_data_view(self.data_views.as_ref(), &model.data_view_id).await?;
        ensure_index_base(&view)?;
        let group = resolve_log_group(self.log_groups.as_ref(), &view).await?;

        let planner = QueryPlanner::new(&self.limits);
        let query = planner.plan(&model, &view, request)?;

        let mut response = MetricModelUniResponse {
            model: request
                .include_model
                .then(|| serde_json::to_value(&model))
                .transpose()
                .map_err(|e| QuerierError::internal(codes::INTERNAL_ERROR, e.to_string()))?,
            step: query.step.as_ref().map(|s| s.render()),
            is_calendar: query.step.as_ref().is_some_and(|s| s.is_calendar()),
            status_code: 200,
            ..Default::default()
        };

        if group.index_pattern.is_empty() {
            log::info!(
                "Data view {} of metric model {model_id} has no indices, answering with no series",
                view.id
            );
            response.series_total = Some(0);
            response.overall_ms = Some(started.elapsed().as_millis() as i64);
            return Ok(response);
        }

        let info =
            DslBuilder::new(&view, &self.limits, &group.must_filters).build(&model.formula_config, &query)?;
        let strategy = planner.strategy(&query, &info);
        log::debug!(
            "Metric model {model_id}: {} estimated series, strategy {strategy:?}",
            info.bucket_series_num
        );

        let search_started = Instant::now();
        let outcome = BatchExecutor::new(
            self.gateway.as_ref(),
            &group.index_pattern,
            &self.limits,
            &self.search.preference,
            cancel,
        )
        .execute(&info, strategy, query.max_search_series_size)
        .await?;
        let vega_duration_ms = search_started.elapsed().as_millis() as i64;

        let datas = MetricFormatter::new(&info, &query, &self.limits).format(&outcome.responses)?;
        response.series_total = Some(datas.len());
        response.datas = datas;
        response.is_query_by_batch = outcome.by_batch;
        response.vega_duration_ms = Some(vega_duration_ms);
        response.overall_ms = Some(started.elapsed().as_millis() as i64);
        Ok(response)
    }
}
