//! The three request shapes of a view query and their search body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use common::model::data_view::{DataView, FieldType, QueryType, ViewField};
use uniquery_api::request::{
    DataViewQueryV1, DataViewQueryV2, DataViewSimulateQuery, SimulatedView, SortParam,
    ViewCommonParams,
};

use super::filter::build_filters;
use crate::error::{QuerierError, codes};

/// Document id field kept in every indexed row, used as sort tiebreaker.
pub const ID_FIELD: &str = "__id";
const SCORE_FIELD: &str = "__score";
const SIMULATED_VIEW_ID: &str = "__simulate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum ViewQuery {
    V1(DataViewQueryV1),
    V2(DataViewQueryV2),
    Simulate(DataViewSimulateQuery),
}

/// Scroll continuation settings of a V1 query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollParams<'a> {
    pub keep_alive: Option<&'a str>,
    pub scroll_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryOptions {
    pub include_view: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchAfterParams<'a> {
    pub search_after: &'a [Value],
    pub pit_id: Option<&'a str>,
    pub pit_keep_alive: Option<&'a str>,
}

/// Accessors shared by every view query shape.
pub trait ViewQueryParams {
    fn common_params(&self) -> &ViewCommonParams;

    fn sort_params(&self) -> &[SortParam];

    fn scroll(&self) -> ScrollParams<'_>;

    fn query_params(&self) -> QueryOptions;

    /// `None` for offset/scroll paginated queries.
    fn search_after(&self) -> Option<SearchAfterParams<'_>>;
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl ViewQueryParams for ViewQuery {
    fn common_params(&self) -> &ViewCommonParams {
        match self {
            ViewQuery::V1(q) => &q.common,
            ViewQuery::V2(q) => &q.common,
            ViewQuery::Simulate(q) => &q.common,
        }
    }

    fn sort_params(&self) -> &[SortParam] {
        match self {
            ViewQuery::V1(q) => &q.sort,
            ViewQuery::V2(q) => &q.sort,
            ViewQuery::Simulate(q) => &q.sort,
        }
    }

    fn scroll(&self) -> ScrollParams<'_> {
        match self {
            ViewQuery::V1(q) => ScrollParams {
                keep_alive: non_empty(&q.scroll),
                scroll_id: non_empty(&q.scroll_id),
            },
            _ => ScrollParams::default(),
        }
    }

    fn query_params(&self) -> QueryOptions {
        QueryOptions {
            include_view: matches!(self, ViewQuery::V1(q) if q.include_view),
        }
    }

    fn search_after(&self) -> Option<SearchAfterParams<'_>> {
        let (search_after, pit_id, pit_keep_alive) = match self {
            ViewQuery::V1(_) => return None,
            ViewQuery::V2(q) => (&q.search_after, &q.pit_id, &q.pit_keep_alive),
            ViewQuery::Simulate(q) => (&q.search_after, &q.pit_id, &q.pit_keep_alive),
        };
        Some(SearchAfterParams {
            search_after: search_after.as_deref().unwrap_or_default(),
            pit_id: non_empty(pit_id),
            pit_keep_alive: non_empty(pit_keep_alive),
        })
    }
}

impl ViewQuery {
    pub fn common_params_mut(&mut self) -> &mut ViewCommonParams {
        match self {
            ViewQuery::V1(q) => &mut q.common,
            ViewQuery::V2(q) => &mut q.common,
            ViewQuery::Simulate(q) => &mut q.common,
        }
    }

    /// Inline view definition of a simulate query.
    pub fn simulated_view(&self) -> Option<&SimulatedView> {
        match self {
            ViewQuery::Simulate(q) => Some(&q.view),
            _ => None,
        }
    }
}

/// Materialize the inline view of a simulate request.
pub fn simulated_data_view(view: &SimulatedView) -> Result<DataView, QuerierError> {
    let query_type = match view.query_type.as_deref() {
        None | Some("") => QueryType::IndexBase,
        Some(raw) => QueryType::parse(raw).ok_or_else(|| {
            QuerierError::validation(
                codes::UNSUPPORTED_QUERY_TYPE,
                format!("unknown query type '{raw}'"),
            )
        })?,
    };

    let mut data_view = DataView::new(SIMULATED_VIEW_ID).with_fields(
        view.fields
            .iter()
            .map(|f| ViewField {
                name: f.name.clone(),
                field_type: FieldType::parse(&f.field_type),
                display_name: if f.display_name.is_empty() {
                    f.name.clone()
                } else {
                    f.display_name.clone()
                },
            })
            .collect(),
    );
    data_view.query_type = query_type;
    data_view.log_group_id = view.log_group_id.clone();
    if let Some(date_field) = view.date_field.as_deref().filter(|f| !f.is_empty()) {
        data_view.date_field = date_field.to_string();
    }
    Ok(data_view)
}

/// Check offsets, limits and the time window before anything is sent.
pub fn validate_common(params: &ViewCommonParams) -> Result<(), QuerierError> {
    if params.offset < 0 {
        return Err(QuerierError::validation(
            codes::INVALID_PARAMETER,
            format!("offset must not be negative, got {}", params.offset),
        ));
    }
    if params.limit < 0 {
        return Err(QuerierError::validation(
            codes::INVALID_PARAMETER,
            format!("limit must not be negative, got {}", params.limit),
        ));
    }
    if let (Some(start), Some(end)) = (params.start, params.end)
        && start > end
    {
        return Err(QuerierError::validation(
            codes::INVALID_TIME_RANGE,
            format!("start {start} is after end {end}"),
        ));
    }
    Ok(())
}

/// Requested sort followed by the default order, first occurrence of a field wins.
fn complete_sort(view: &DataView, sort: &[SortParam], search_after: bool) -> Vec<SortParam> {
    let mut defaults = vec![SortParam {
        field: view.date_field.clone(),
        direction: "desc".to_string(),
    }];
    if search_after {
        defaults.push(SortParam {
            field: ID_FIELD.to_string(),
            direction: "desc".to_string(),
        });
    }

    let mut completed: Vec<SortParam> = Vec::with_capacity(sort.len() + defaults.len());
    for param in sort.iter().cloned().chain(defaults) {
        if !completed.iter().any(|p| p.field == param.field) {
            completed.push(param);
        }
    }
    completed
}

fn sort_clauses(view: &DataView, sort: &[SortParam]) -> Result<Vec<Value>, QuerierError> {
    let mut clauses = Vec::with_capacity(sort.len());
    for param in sort {
        if param.field.is_empty() || param.direction.is_empty() {
            return Err(QuerierError::validation(
                codes::INVALID_SORT,
                "The sort field and direction cannot be empty",
            ));
        }
        if param.direction != "asc" && param.direction != "desc" {
            return Err(QuerierError::validation(
                codes::INVALID_SORT,
                format!(
                    "sort direction of '{}' must be asc or desc, got '{}'",
                    param.field, param.direction
                ),
            ));
        }

        let field = match view.field(&param.field) {
            Some(field) => field.aggregatable_name(),
            None if param.field == SCORE_FIELD => "_score".to_string(),
            None => param.field.clone(),
        };
        clauses.push(json!({ field: param.direction }));
    }
    Ok(clauses)
}

/// Builds the search body of a view query.
pub struct ViewDslBuilder<'a> {
    view: &'a DataView,
    must_filters: &'a [Value],
}

impl<'a> ViewDslBuilder<'a> {
    pub fn new(view: &'a DataView, must_filters: &'a [Value]) -> Self {
        Self { view, must_filters }
    }

    /// `pit_id` overrides the one carried by the request (a freshly created
    /// point in time); `limit` is the effective page size.
    pub fn build(
        &self,
        query: &impl ViewQueryParams,
        pit_id: Option<&str>,
        limit: i64,
    ) -> Result<Value, QuerierError> {
        let params = query.common_params();
        let search_after = query.search_after();

        let mut filter = Vec::new();
        let mut window = Map::new();
        if let Some(start) = params.start.filter(|s| *s != 0) {
            window.insert("gte".to_string(), json!(start));
        }
        if let Some(end) = params.end.filter(|e| *e != 0) {
            window.insert("lte".to_string(), json!(end));
        }
        if !window.is_empty() {
            window.insert("format".to_string(), json!("epoch_millis"));
            filter.push(json!({"range": { self.view.date_field.clone(): window }}));
        }

        let clauses = build_filters(&params.filters, self.view)?;
        filter.extend(clauses.filter);

        let sort = complete_sort(self.view, query.sort_params(), search_after.is_some());
        let mut dsl = json!({
            "from": params.offset,
            "size": limit,
            "sort": sort_clauses(self.view, &sort)?,
            "query": {
                "bool": {
                    "must": self.must_filters,
                    "filter": filter,
                    "must_not": clauses.must_not,
                }
            },
        });

        if !params.output_fields.is_empty() {
            dsl["_source"] = json!({"includes": params.output_fields});
        }

        if let Some(after) = search_after {
            if !after.search_after.is_empty() {
                dsl["search_after"] = json!(after.search_after);
                // search_after pages are addressed by the cursor, not by offset
                dsl["from"] = json!(0);
            }
            if let Some(id) = pit_id.or(after.pit_id) {
                let mut pit = json!({"id": id});
                if let Some(keep_alive) = after.pit_keep_alive {
                    pit["keep_alive"] = json!(keep_alive);
                }
                dsl["pit"] = pit;
            }
        }

        log::debug!("View '{}' search body: {dsl}", self.view.id);
        Ok(dsl)
    }
}
