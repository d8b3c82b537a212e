//! Query engine of uniquery.
//!
//! Serves three read paths over an OpenSearch-compatible backend: trace
//! detail assembly, paginated data view queries and metric model
//! evaluation. Entry points live in [`services`].

pub mod catalog;
pub mod error;
pub mod format;
pub mod gateway;
pub mod pagination;
pub mod query;
pub mod services;
pub mod trace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::QuerierError;
pub use services::{
    DataViewService, MetricModelService, ServiceContainer, TraceService, ViewResponse,
};
