use serde_json::{Value, json};

use common::model::data_view::DataView;
use uniquery_api::request::FilterParam;

use crate::error::{QuerierError, codes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperation {
    Equal,
    NotEqual,
    In,
    NotIn,
    Range,
    Exist,
}

impl FilterOperation {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(FilterOperation::Equal),
            "!=" => Some(FilterOperation::NotEqual),
            "in" => Some(FilterOperation::In),
            "not_in" => Some(FilterOperation::NotIn),
            "range" => Some(FilterOperation::Range),
            "exist" => Some(FilterOperation::Exist),
            _ => None,
        }
    }
}

/// Filter clauses ready to be placed in a `bool` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterClauses {
    pub filter: Vec<Value>,
    pub must_not: Vec<Value>,
}

fn invalid(detail: String) -> QuerierError {
    QuerierError::validation(codes::INVALID_FILTER, detail)
}

/// Validate request filters against the view and translate them.
///
/// Views without declared fields accept any field name.
pub fn build_filters(
    filters: &[FilterParam],
    view: &DataView,
) -> Result<FilterClauses, QuerierError> {
    let mut clauses = FilterClauses::default();

    for param in filters {
        if param.name.is_empty() {
            return Err(invalid("filter name cannot be empty".to_string()));
        }
        let op = FilterOperation::parse(&param.operation).ok_or_else(|| {
            invalid(format!(
                "unsupported operation '{}' on filter '{}'",
                param.operation, param.name
            ))
        })?;

        let field = match view.field(&param.name) {
            Some(field) => field.aggregatable_name(),
            None if view.fields.is_empty() => param.name.clone(),
            None => {
                return Err(invalid(format!(
                    "filter field '{}' is not in data view '{}'",
                    param.name, view.id
                )));
            }
        };

        match op {
            FilterOperation::Equal | FilterOperation::NotEqual => {
                if param.value.is_null() || param.value.is_array() || param.value.is_object() {
                    return Err(invalid(format!(
                        "filter '{}' expects a single value",
                        param.name
                    )));
                }
                let clause = json!({"term": {field: {"value": param.value}}});
                if op == FilterOperation::Equal {
                    clauses.filter.push(clause);
                } else {
                    clauses.must_not.push(clause);
                }
            }
            FilterOperation::In | FilterOperation::NotIn => {
                let values = param.value.as_array().filter(|v| !v.is_empty()).ok_or_else(|| {
                    invalid(format!(
                        "filter '{}' expects a non-empty array of values",
                        param.name
                    ))
                })?;
                let clause = json!({"terms": {field: values}});
                if op == FilterOperation::In {
                    clauses.filter.push(clause);
                } else {
                    clauses.must_not.push(clause);
                }
            }
            FilterOperation::Range => {
                let bounds = param
                    .value
                    .as_array()
                    .filter(|v| v.len() == 2)
                    .ok_or_else(|| {
                        invalid(format!(
                            "filter '{}' expects a [from, to] range",
                            param.name
                        ))
                    })?;
                let mut range = serde_json::Map::new();
                if !bounds[0].is_null() {
                    range.insert("gte".to_string(), bounds[0].clone());
                }
                if !bounds[1].is_null() {
                    range.insert("lt".to_string(), bounds[1].clone());
                }
                clauses.filter.push(json!({"range": {field: range}}));
            }
            FilterOperation::Exist => {
                clauses
                    .filter
                    .push(json!({"exists": {"field": param.name}}));
            }
        }
    }

    Ok(clauses)
}
