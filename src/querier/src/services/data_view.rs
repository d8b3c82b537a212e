use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use common::config::{QueryConfig, SearchConfig};
use common::model::data_view::{DataView, LogGroup};
use uniquery_api::request::{DataViewQueryV2, DeletePitsRequest};
use uniquery_api::view::{DeletePitsResponse, ViewUniResponseV1, ViewUniResponseV2};

use super::{ServiceContainer, ensure_index_base, resolve_data_view, resolve_log_group};
use crate::catalog::{DataViewAccess, LogGroupAccess, ResourcePolicy};
use crate::error::{QuerierError, codes};
use crate::format::view::{SearchPage, count_total, format_v1, format_v2};
use crate::gateway::{ALL_PITS, GatewayError, SearchGateway, keep_alive_param};
use crate::pagination::{PaginationManager, PitSession};
use crate::query::duration::parse_keep_alive;
use crate::query::view_query::{
    ViewDslBuilder, ViewQuery, ViewQueryParams, simulated_data_view, validate_common,
};

/// Id accepted from callers to release every point in time.
pub const ALL_PITS_ALIAS: &str = "__all";

/// Response shape follows the request shape: offset/scroll queries answer
/// with V1, `search_after` queries with V2.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ViewResponse {
    V1(ViewUniResponseV1),
    V2(ViewUniResponseV2),
}

fn empty_response(query: &ViewQuery) -> ViewResponse {
    match query {
        ViewQuery::V1(_) => ViewResponse::V1(ViewUniResponseV1 {
            datas: vec![Default::default()],
            ..Default::default()
        }),
        _ => ViewResponse::V2(ViewUniResponseV2::default()),
    }
}

fn search_error(err: GatewayError) -> QuerierError {
    if err.is_search_context_missing() {
        return QuerierError::not_found(codes::PIT_CONTEXT_NOT_FOUND, err.message);
    }
    log::error!("View search failed: {err}");
    QuerierError::backend(codes::SEARCH_FAILED, &err)
}

pub struct DataViewService {
    gateway: Arc<dyn SearchGateway>,
    log_groups: Arc<dyn LogGroupAccess>,
    data_views: Arc<dyn DataViewAccess>,
    policy: Arc<dyn ResourcePolicy>,
    pagination: PaginationManager,
    search: SearchConfig,
    limits: QueryConfig,
}

impl DataViewService {
    pub fn new(container: &ServiceContainer) -> Self {
        Self {
            gateway: container.gateway.clone(),
            log_groups: container.log_groups.clone(),
            data_views: container.data_views.clone(),
            policy: container.policy.clone(),
            pagination: container.pagination.clone(),
            search: container.config.search.clone(),
            limits: container.config.query.clone(),
        }
    }

    async fn view_for(&self, view_id: &str, query: &ViewQuery) -> Result<DataView, QuerierError> {
        self.policy.check_data_view(view_id)?;
        let view = match query.simulated_view() {
            Some(inline) => simulated_data_view(inline)?,
            None => resolve_data_view(self.data_views.as_ref(), view_id).await?,
        };
        ensure_index_base(&view)?;
        Ok(view)
    }

    #[tracing::instrument(skip(self, query, cancel))]
    pub async fn query_view_data(
        &self,
        view_id: &str,
        query: ViewQuery,
        cancel: &CancellationToken,
    ) -> Result<ViewResponse, QuerierError> {
        validate_common(query.common_params())?;
        let view = self.view_for(view_id, &query).await?;
        let include_view = query.query_params().include_view;

        let scroll = query.scroll();
        let scroll_keep_alive = match scroll.keep_alive {
            Some(raw) => parse_keep_alive(raw)
                .map_err(|e| QuerierError::validation(codes::INVALID_SCROLL, e.to_string()))?,
            None => self.search.scroll_keep_alive,
        };
        if let Some(scroll_id) = scroll.scroll_id {
            if cancel.is_cancelled() {
                return Err(QuerierError::Cancelled);
            }
            let response = self
                .gateway
                .scroll(scroll_id, scroll_keep_alive)
                .await
                .map_err(|e| {
                    log::error!("Scroll of view {view_id} failed: {e}");
                    QuerierError::backend(codes::SCROLL_FAILED, &e)
                })?;
            let page = SearchPage::from_body(&response.body)?;
            let info = include_view.then(|| view.to_view_info());
            return Ok(ViewResponse::V1(format_v1(page, None, info)));
        }

        let group = resolve_log_group(self.log_groups.as_ref(), &view).await?;
        if group.index_pattern.is_empty() {
            log::info!("Data view {view_id} has no indices, answering with no rows");
            return Ok(empty_response(&query));
        }

        let search_after = query.search_after();
        let mut created = None;
        if let Some(after) = search_after
            && after.pit_id.is_none()
            && let Some(raw) = after.pit_keep_alive
        {
            let keep_alive = parse_keep_alive(raw).map_err(|e| {
                QuerierError::validation(codes::INVALID_PIT_KEEP_ALIVE, e.to_string())
            })?;
            if cancel.is_cancelled() {
                return Err(QuerierError::Cancelled);
            }
            let pit_id = self
                .gateway
                .create_point_in_time(&group.index_pattern, keep_alive)
                .await
                .map_err(|e| {
                    log::error!("Failed to create point in time for view {view_id}: {e}");
                    QuerierError::backend(codes::CREATE_PIT_FAILED, &e)
                })?;
            log::debug!("Created point in time {pit_id} for view {view_id}");
            let query_id = format!("view-{}", uuid::Uuid::new_v4());
            created = Some(self.pagination.open_pit(&query_id, self.gateway.clone(), pit_id)?);
        }

        let pit_id = match &created {
            Some(session) => Some(session.pit_id().to_string()),
            None => search_after.and_then(|a| a.pit_id).map(str::to_string),
        };
        let result = self
            .search_view(&view, &group, &query, pit_id.as_deref(), scroll_keep_alive, cancel)
            .await;

        match (result, created) {
            // the caller continues with the point in time
            (Ok(response), Some(session)) => {
                session.detach();
                Ok(response)
            }
            (Err(e), Some(session)) => {
                if let Err(release_err) = session.release().await {
                    log::warn!("Point in time of failed view query was not released: {release_err}");
                }
                Err(e)
            }
            (result, None) => result,
        }
    }

    async fn search_view(
        &self,
        view: &DataView,
        group: &LogGroup,
        query: &ViewQuery,
        pit_id: Option<&str>,
        scroll_keep_alive: Duration,
        cancel: &CancellationToken,
    ) -> Result<ViewResponse, QuerierError> {
        let search_after = query.search_after();
        let mut limit = query.common_params().limit;
        if limit == 0 && search_after.is_some_and(|a| !a.search_after.is_empty()) {
            limit = self.limits.search_after_limit as i64;
        }

        let dsl = ViewDslBuilder::new(view, &group.must_filters).build(query, pit_id, limit)?;
        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }

        let started = Instant::now();
        let response = match pit_id {
            Some(_) => self.gateway.search_with_pit(&dsl).await,
            None => {
                let scroll = query.scroll().keep_alive.map(|_| scroll_keep_alive);
                self.gateway
                    .search_submit(&dsl, &group.index_pattern, scroll, &self.search.preference, false)
                    .await
            }
        }
        .map_err(search_error)?;
        let vega_duration_ms = started.elapsed().as_millis() as i64;
        let page = SearchPage::from_body(&response.body)?;

        // a continued point-in-time page never reports a total
        let continued = pit_id.is_some() && search_after.is_some_and(|a| !a.search_after.is_empty());
        let total = if query.common_params().need_total && !continued {
            Some(self.count(&dsl, &group.index_pattern).await?)
        } else {
            None
        };

        Ok(match query {
            ViewQuery::V1(_) => {
                let info = query.query_params().include_view.then(|| view.to_view_info());
                ViewResponse::V1(format_v1(page, total, info))
            }
            _ => ViewResponse::V2(format_v2(page, pit_id, total, Some(vega_duration_ms))),
        })
    }

    async fn count(&self, dsl: &Value, indices: &[String]) -> Result<i64, QuerierError> {
        let body = json!({"query": dsl["query"]});
        let response = self.gateway.count(&body, indices).await.map_err(|e| {
            log::error!("Count failed: {e}");
            QuerierError::backend(codes::COUNT_FAILED, &e)
        })?;
        count_total(&response.body)
    }

    /// Release points in time. `__all` anywhere in `pit_ids` releases all of them.
    #[tracing::instrument(skip(self))]
    pub async fn delete_pits(
        &self,
        request: &DeletePitsRequest,
    ) -> Result<DeletePitsResponse, QuerierError> {
        let pit_ids = &request.pit_ids;
        if pit_ids.is_empty() {
            return Err(QuerierError::validation(
                codes::INVALID_PARAMETER,
                "pit_ids cannot be empty",
            ));
        }
        let ids = if pit_ids.iter().any(|id| id == ALL_PITS_ALIAS) {
            vec![ALL_PITS.to_string()]
        } else {
            pit_ids.to_vec()
        };

        self.gateway.delete_point_in_time(&ids).await.map_err(|e| {
            log::error!("Failed to delete {} points in time: {e}", ids.len());
            QuerierError::backend(codes::DELETE_PIT_FAILED, &e)
        })
    }

    /// Read every row of a view through one point in time.
    ///
    /// The point in time is deleted once the iteration ends, successful,
    /// failed or cancelled.
    #[tracing::instrument(skip(self, query, cancel))]
    pub async fn export_view_data(
        &self,
        view_id: &str,
        query: ViewQuery,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Map<String, Value>>, QuerierError> {
        if page_size == 0 {
            return Err(QuerierError::validation(
                codes::INVALID_PARAMETER,
                "page size must be greater than zero",
            ));
        }
        validate_common(query.common_params())?;
        let view = self.view_for(view_id, &query).await?;
        let group = resolve_log_group(self.log_groups.as_ref(), &view).await?;
        if group.index_pattern.is_empty() {
            return Ok(Vec::new());
        }

        let keep_alive = match query.search_after().and_then(|a| a.pit_keep_alive) {
            Some(raw) => parse_keep_alive(raw).map_err(|e| {
                QuerierError::validation(codes::INVALID_PIT_KEEP_ALIVE, e.to_string())
            })?,
            None => self.search.scroll_keep_alive,
        };
        if cancel.is_cancelled() {
            return Err(QuerierError::Cancelled);
        }
        let pit_id = self
            .gateway
            .create_point_in_time(&group.index_pattern, keep_alive)
            .await
            .map_err(|e| {
                log::error!("Failed to create point in time for export of {view_id}: {e}");
                QuerierError::backend(codes::CREATE_PIT_FAILED, &e)
            })?;

        let query_id = format!("export-{}", uuid::Uuid::new_v4());
        let mut session = self
            .pagination
            .open_pit(&query_id, self.gateway.clone(), pit_id)?;
        let builder = ViewDslBuilder::new(&view, &group.must_filters);
        let rows = self
            .export_pages(&builder, &query, &mut session, keep_alive, page_size, cancel)
            .await;
        let released = session.release().await;

        match (rows, released) {
            (Ok(rows), Ok(_)) => {
                log::info!("Exported {} rows of view {view_id}", rows.len());
                Ok(rows)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    log::warn!("Point in time of failed export was not released: {release_err}");
                }
                Err(e)
            }
        }
    }

    async fn export_pages(
        &self,
        builder: &ViewDslBuilder<'_>,
        query: &ViewQuery,
        session: &mut PitSession,
        keep_alive: Duration,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Map<String, Value>>, QuerierError> {
        let mut rows = Vec::new();
        let mut cursor: Option<Vec<Value>> = None;

        loop {
            if cancel.is_cancelled() {
                log::info!("Export cancelled after {} rows", rows.len());
                return Err(QuerierError::Cancelled);
            }
            let page_query = ViewQuery::V2(DataViewQueryV2 {
                common: query.common_params().clone(),
                sort: query.sort_params().to_vec(),
                search_after: cursor.take(),
                pit_id: Some(session.pit_id().to_string()),
                pit_keep_alive: Some(keep_alive_param(keep_alive)),
            });
            let dsl = builder.build(&page_query, None, page_size as i64)?;
            let response = self
                .gateway
                .search_with_pit(&dsl)
                .await
                .map_err(search_error)?;
            let page = SearchPage::from_body(&response.body)?;

            let hits = page.hits.hits.len();
            if let Some(id) = page.pit_id.as_deref() {
                session.update(id);
            }
            cursor = page.last_sort();
            rows.extend(format_v2(page, None, None, None).entries);

            if hits < page_size || cursor.is_none() {
                return Ok(rows);
            }
        }
    }
}
