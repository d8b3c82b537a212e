//! Request level operations, wired from the configuration.

use std::sync::Arc;

use common::config::Configuration;
use common::model::data_view::{DataView, LogGroup, QueryType};

use crate::catalog::{
    DataViewAccess, HttpLogGroupAccess, LogGroupAccess, MetricModelAccess, ResourcePolicy,
    StaticCatalog, StaticPolicy,
};
use crate::error::{QuerierError, codes};
use crate::gateway::{OpenSearchGateway, SearchGateway};
use crate::pagination::PaginationManager;

pub mod data_view;
pub mod metric_model;
pub mod trace;

pub use data_view::{DataViewService, ViewResponse};
pub use metric_model::MetricModelService;
pub use trace::TraceService;

/// Shared dependencies of every service.
#[derive(Clone)]
pub struct ServiceContainer {
    pub config: Arc<Configuration>,
    pub gateway: Arc<dyn SearchGateway>,
    pub log_groups: Arc<dyn LogGroupAccess>,
    pub data_views: Arc<dyn DataViewAccess>,
    pub metric_models: Arc<dyn MetricModelAccess>,
    pub policy: Arc<dyn ResourcePolicy>,
    pub pagination: PaginationManager,
}

impl ServiceContainer {
    /// Wire the OpenSearch gateway and the configured catalog.
    ///
    /// Log groups come from the data-model service when `data_model.url` is
    /// set, from the static catalog otherwise.
    pub fn from_config(config: Configuration) -> Result<Self, QuerierError> {
        let gateway = OpenSearchGateway::new(&config.search).map_err(|e| {
            QuerierError::internal(codes::INTERNAL_ERROR, format!("search gateway: {e}"))
        })?;
        let catalog = Arc::new(StaticCatalog::new(config.catalog.clone()));

        let mut container = Self::with_gateway(config, Arc::new(gateway), catalog);
        if let Some(url) = container.config.data_model.url.clone() {
            log::info!("Resolving log groups through {url}");
            container.log_groups = Arc::new(HttpLogGroupAccess::new(
                &url,
                &container.config.data_model,
            ));
        }
        Ok(container)
    }

    /// Wire an arbitrary gateway with a static catalog and the configured
    /// access policy.
    pub fn with_gateway(
        config: Configuration,
        gateway: Arc<dyn SearchGateway>,
        catalog: Arc<StaticCatalog>,
    ) -> Self {
        let policy = Arc::new(StaticPolicy::new(config.access.clone()));
        Self {
            config: Arc::new(config),
            gateway,
            log_groups: catalog.clone(),
            data_views: catalog.clone(),
            metric_models: catalog,
            policy,
            pagination: PaginationManager::new(),
        }
    }

    pub fn data_view_service(&self) -> DataViewService {
        DataViewService::new(self)
    }

    pub fn metric_model_service(&self) -> MetricModelService {
        MetricModelService::new(self)
    }

    pub fn trace_service(&self) -> TraceService {
        TraceService::new(self)
    }
}

/// Only index backed views can be answered by the search backend.
pub(crate) fn ensure_index_base(view: &DataView) -> Result<(), QuerierError> {
    if view.query_type != QueryType::IndexBase {
        return Err(QuerierError::validation(
            codes::UNSUPPORTED_QUERY_TYPE,
            format!(
                "data view '{}' has query type {}, only IndexBase is supported",
                view.id,
                view.query_type.as_str()
            ),
        ));
    }
    Ok(())
}

pub(crate) async fn resolve_log_group(
    log_groups: &dyn LogGroupAccess,
    view: &DataView,
) -> Result<LogGroup, QuerierError> {
    log_groups
        .get_log_group_query_filters(view.log_group())
        .await?
        .ok_or_else(|| {
            QuerierError::not_found(
                codes::LOG_GROUP_NOT_FOUND,
                format!(
                    "log group '{}' of data view '{}' was not found",
                    view.log_group(),
                    view.id
                ),
            )
        })
}

pub(crate) async fn resolve_data_view(
    data_views: &dyn DataViewAccess,
    id: &str,
) -> Result<DataView, QuerierError> {
    data_views.get_data_view(id).await?.ok_or_else(|| {
        QuerierError::not_found(
            codes::DATA_VIEW_NOT_FOUND,
            format!("The data view whose id equals {id} was not found!"),
        )
    })
}
