//! Wire models shared by every front end of the unified query engine.
//!
//! The shapes in this crate are part of the public contract: field names and
//! optionality must not change without a versioned endpoint.

pub mod error;
pub mod metric;
pub mod request;
pub mod trace;
pub mod view;

pub use error::{BackendErrorBody, ErrorResponse};
pub use metric::{MetricModelData, MetricModelUniResponse};
pub use request::{
    DataViewQueryV1, DataViewQueryV2, DataViewSimulateQuery, DeletePitsRequest, FilterParam,
    SimulatedView, SortParam, SpanPageParams, ViewCommonParams,
};
pub use trace::{BriefSpanNode, SpanDetailResponse, TraceDetailResponse, TraceEntryList};
pub use view::{DeletePitsResponse, DeletedPit, ViewDatas, ViewInfo, ViewUniResponseV1, ViewUniResponseV2};
