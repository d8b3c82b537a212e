//! Read-only access to the definitions owned by the configuration service.

use async_trait::async_trait;

use common::model::data_view::{DataView, LogGroup};
use common::model::metric::MetricModel;

use crate::error::QuerierError;

pub mod http;
pub mod static_catalog;

pub use http::HttpLogGroupAccess;
pub use static_catalog::{StaticCatalog, StaticPolicy};

/// Physical index set and baseline filter of a logical data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogGroupAccess: Send + Sync {
    /// `Ok(None)` when the log group does not exist.
    async fn get_log_group_query_filters(&self, id: &str)
    -> Result<Option<LogGroup>, QuerierError>;
}

#[async_trait]
pub trait DataViewAccess: Send + Sync {
    async fn get_data_view(&self, id: &str) -> Result<Option<DataView>, QuerierError>;
}

#[async_trait]
pub trait MetricModelAccess: Send + Sync {
    async fn get_metric_model(&self, id: &str) -> Result<Option<MetricModel>, QuerierError>;
}

/// Consulted before any backend call is issued.
pub trait ResourcePolicy: Send + Sync {
    fn check_data_view(&self, id: &str) -> Result<(), QuerierError>;

    fn check_metric_model(&self, id: &str) -> Result<(), QuerierError>;
}
