//! Compiles a metric formula into a backend aggregation query.
//!
//! The aggregation tree nests one level per bucket, outermost first, then the
//! `__date_histogram` level (range queries only), then the `__value` metric:
//!
//! ```text
//! aggs.host_name.aggs.level.aggs.__date_histogram.aggs.__value
//! ```

use serde_json::{Map, Value, json};

use common::config::QueryConfig;
use common::model::data_view::{DataView, FieldType, ViewField};
use common::model::metric::{
    AggregationConfig, AggregationType, BucketConfig, BucketType, DATE_HISTOGRAM_AGG,
    DEFAULT_CARDINALITY_PRECISION_THRESHOLD, FormulaConfig, GEOHASH_MAX_PRECISION,
    GEOHASH_MIN_PRECISION, OTHER_BUCKET_KEY, TermsOrder, VALUE_AGG,
};

use super::planner::{Query, Step, window_millis};
use crate::error::{QuerierError, codes};

/// Terms size used when a bucket does not configure one.
pub const UNBOUNDED_TERMS_SIZE: i64 = i32::MAX as i64;

const ASC: &str = "asc";
const DESC: &str = "desc";

/// One bucket level of the compiled tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketInfo {
    /// Series label name
    pub label: String,
    pub agg_name: String,
    pub bucket_type: BucketType,
}

impl BucketInfo {
    /// `filters` buckets come back as an object keyed by filter name.
    pub fn is_keyed(&self) -> bool {
        self.bucket_type == BucketType::Filters
    }
}

/// Batch layout of one terms bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeriesTerms {
    pub batch_size: i64,
    pub batch_num: i64,
    pub last_batch_size: i64,
}

/// Metadata of a terms bucket consumed by the batcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AggInfo {
    /// Index of the bucket in the formula
    pub level: usize,
    /// Aggregation names from the root down to this bucket
    pub path: Vec<String>,
    pub terms_field: String,
    pub config_size: i64,
    /// Size used at execution time, never above `config_size`
    pub eval_size: i64,
    pub order: String,
    pub direction: String,
    pub series: SeriesTerms,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DslInfo {
    pub dsl: Value,
    pub buckets: Vec<BucketInfo>,
    pub term_infos: Vec<AggInfo>,
    /// Estimated series count: product of the terms, range, date_range and
    /// filters bucket sizes
    pub bucket_series_num: i64,
    /// Product of the range, date_range and filters bucket sizes
    pub not_terms_series_num: i64,
    /// Estimated time points per series, 1 for instant queries
    pub query_time_num: i64,
    pub step: Option<Step>,
    pub aggregation: AggregationConfig,
    pub track_total_hits: bool,
}

impl DslInfo {
    /// Mutable access to the aggregation body found at `path`.
    pub fn agg_at_mut(&mut self, path: &[String]) -> Option<&mut Value> {
        let mut node = &mut self.dsl;
        for name in path {
            node = node.get_mut("aggs")?.get_mut(name)?;
        }
        Some(node)
    }

    /// Append a clause to the top level `bool.filter`.
    pub fn push_filter(&mut self, clause: Value) {
        if let Some(filters) = self
            .dsl
            .pointer_mut("/query/bool/filter")
            .and_then(Value::as_array_mut)
        {
            filters.push(clause);
        }
    }
}

fn invalid(detail: String) -> QuerierError {
    QuerierError::validation(codes::INVALID_FORMULA, detail)
}

pub struct DslBuilder<'a> {
    view: &'a DataView,
    limits: &'a QueryConfig,
    must_filters: &'a [Value],
}

impl<'a> DslBuilder<'a> {
    pub fn new(view: &'a DataView, limits: &'a QueryConfig, must_filters: &'a [Value]) -> Self {
        Self {
            view,
            limits,
            must_filters,
        }
    }

    fn field(&self, name: &str, used_by: &str) -> Result<&'a ViewField, QuerierError> {
        if name.is_empty() {
            return Err(invalid(format!("{used_by} requires a field")));
        }
        self.view.field(name).ok_or_else(|| {
            invalid(format!(
                "field '{name}' used by {used_by} is not in data view '{}'",
                self.view.id
            ))
        })
    }

    pub fn build(&self, formula: &FormulaConfig, query: &Query) -> Result<DslInfo, QuerierError> {
        if formula.buckets.len() > self.limits.max_buckets {
            return Err(invalid(format!(
                "a formula accepts at most {} buckets, got {}",
                self.limits.max_buckets,
                formula.buckets.len()
            )));
        }
        let query_time_num = match &query.step {
            Some(step) => self.check_point_count(query, step)?,
            None => 1,
        };

        let leaf = self.value_aggs(&formula.aggregation, query)?;
        let mut current = match &query.step {
            Some(step) => {
                let mut histogram = json!({
                    "date_histogram": self.date_histogram(query, step)?,
                });
                if !leaf.is_empty() {
                    histogram["aggs"] = Value::Object(leaf);
                }
                let mut level = Map::new();
                level.insert(DATE_HISTOGRAM_AGG.to_string(), histogram);
                level
            }
            None => leaf,
        };

        let value_is_direct_child = query.step.is_none();
        let mut buckets = Vec::with_capacity(formula.buckets.len());
        let mut term_infos = Vec::new();
        let mut nodes = Vec::with_capacity(formula.buckets.len());
        let mut not_terms_series_num = 1i64;

        for (idx, bucket) in formula.buckets.iter().enumerate() {
            let label = bucket_label(bucket, idx);
            let agg_name = label.replace('.', "_");
            let is_last = idx + 1 == formula.buckets.len();
            let node = match bucket.bucket_type {
                BucketType::Terms => {
                    let (node, info) = self.terms(
                        bucket,
                        &formula.aggregation,
                        is_last && value_is_direct_child,
                    )?;
                    term_infos.push(AggInfo {
                        level: idx,
                        path: Vec::new(),
                        ..info
                    });
                    node
                }
                BucketType::Range | BucketType::DateRange => {
                    let kind = if bucket.bucket_type == BucketType::Range {
                        "range"
                    } else {
                        "date_range"
                    };
                    let node = self.range(bucket, kind)?;
                    not_terms_series_num =
                        not_terms_series_num.saturating_mul(bucket.ranges.len() as i64);
                    node
                }
                BucketType::Filters => {
                    let node = self.filters(bucket, idx)?;
                    let size = bucket.filters.len() + usize::from(bucket.other_bucket);
                    not_terms_series_num = not_terms_series_num.saturating_mul(size as i64);
                    node
                }
                BucketType::GeohashGrid => self.geohash_grid(bucket)?,
            };
            buckets.push(BucketInfo {
                label,
                agg_name,
                bucket_type: bucket.bucket_type,
            });
            nodes.push(node);
        }

        for info in &mut term_infos {
            info.path = buckets[..=info.level]
                .iter()
                .map(|b| b.agg_name.clone())
                .collect();
        }

        for (bucket, mut node) in buckets.iter().zip(nodes).rev() {
            if !current.is_empty() {
                node["aggs"] = Value::Object(current);
            }
            current = Map::new();
            current.insert(bucket.agg_name.clone(), node);
        }

        let track_total_hits = query.instant
            && formula.buckets.is_empty()
            && formula.aggregation.aggregation_type == AggregationType::DocCount;

        let mut dsl = json!({
            "size": 0,
            "query": self.query_clause(query),
        });
        if !current.is_empty() {
            dsl["aggs"] = Value::Object(current);
        }

        let bucket_series_num = term_infos
            .iter()
            .fold(not_terms_series_num, |acc, info| acc.saturating_mul(info.config_size));

        log::debug!("Compiled metric model {} into {dsl}", query.model_id);

        Ok(DslInfo {
            dsl,
            buckets,
            term_infos,
            bucket_series_num,
            not_terms_series_num,
            query_time_num,
            step: query.step.clone(),
            aggregation: formula.aggregation.clone(),
            track_total_hits,
        })
    }

    /// Returns the estimated number of time points per series.
    fn check_point_count(&self, query: &Query, step: &Step) -> Result<i64, QuerierError> {
        let width = match step {
            Step::Fixed { millis } => *millis,
            Step::Calendar(unit) => unit.approx_millis(),
        }
        .max(1);
        let span = window_millis(query.start, query.end)?;
        let points = span / width + 1;
        if points > self.limits.max_date_histogram_buckets as i64 {
            return Err(QuerierError::validation(
                codes::TOO_MANY_BUCKETS,
                format!(
                    "step {} over the requested window yields {points} points, the limit is {}",
                    step.render(),
                    self.limits.max_date_histogram_buckets
                ),
            ));
        }
        Ok((span / width + i64::from(span % width != 0)).max(1))
    }

    fn query_clause(&self, query: &Query) -> Value {
        let mut filter = vec![json!({
            "range": {
                query.date_field.as_str(): {
                    "gte": query.start,
                    "lte": query.end,
                    "format": "epoch_millis",
                }
            }
        })];
        if !query.query_string.is_empty() {
            filter.push(json!({
                "query_string": {"query": query.query_string, "analyze_wildcard": true}
            }));
        }
        filter.extend(query.filters.filter.iter().cloned());

        json!({
            "bool": {
                "must": self.must_filters,
                "filter": filter,
                "must_not": query.filters.must_not,
            }
        })
    }

    fn date_histogram(&self, query: &Query, step: &Step) -> Result<Value, QuerierError> {
        let field = self.field(&query.date_field, "date_histogram")?;
        if field.field_type != FieldType::Datetime {
            return Err(invalid(format!(
                "date_histogram field '{}' must be a datetime field",
                field.name
            )));
        }
        let interval_key = if step.is_calendar() {
            "calendar_interval"
        } else {
            "fixed_interval"
        };
        Ok(json!({
            "field": field.name,
            interval_key: step.render(),
            "time_zone": "UTC",
            "min_doc_count": 1,
        }))
    }

    fn terms(
        &self,
        bucket: &BucketConfig,
        aggregation: &AggregationConfig,
        value_is_child: bool,
    ) -> Result<(Value, AggInfo), QuerierError> {
        let field = self.field(&bucket.field, "terms")?;
        let direction = match bucket.direction.as_str() {
            "" => DESC,
            ASC => ASC,
            DESC => DESC,
            other => {
                return Err(invalid(format!(
                    "terms direction must be asc or desc, got '{other}'"
                )));
            }
        };
        let order = match bucket.order.unwrap_or(TermsOrder::Count) {
            TermsOrder::Field => "_key",
            TermsOrder::Count => "_count",
            TermsOrder::Value => {
                let single_value = !matches!(
                    aggregation.aggregation_type,
                    AggregationType::DocCount
                        | AggregationType::Percentiles
                        | AggregationType::TopHits
                );
                if single_value && value_is_child {
                    VALUE_AGG
                } else {
                    "_count"
                }
            }
        };
        let size = if bucket.size > 0 {
            bucket.size
        } else {
            UNBOUNDED_TERMS_SIZE
        };

        let terms_field = field.aggregatable_name();
        let mut terms = json!({
            "field": terms_field,
            "size": size,
            "order": {order: direction},
        });
        if field.field_type.is_number() {
            terms["missing"] = json!(0);
            terms["value_type"] = json!("number");
        } else if field.field_type.is_string() {
            terms["missing"] = json!("--");
            terms["value_type"] = json!("string");
        }

        let info = AggInfo {
            level: 0,
            path: Vec::new(),
            terms_field,
            config_size: size,
            eval_size: size,
            order: order.to_string(),
            direction: direction.to_string(),
            series: SeriesTerms {
                batch_size: size,
                batch_num: 1,
                last_batch_size: size,
            },
        };
        Ok((json!({ "terms": terms }), info))
    }

    fn range(&self, bucket: &BucketConfig, kind: &str) -> Result<Value, QuerierError> {
        let field = self.field(&bucket.field, kind)?;
        let type_ok = if kind == "range" {
            field.field_type.is_number()
        } else {
            field.field_type == FieldType::Datetime
        };
        if !type_ok {
            return Err(invalid(format!(
                "{kind} bucket cannot be built on {} field '{}'",
                field.field_type.as_str(),
                field.name
            )));
        }
        if bucket.ranges.is_empty() {
            return Err(invalid(format!("{kind} bucket '{}' has no ranges", field.name)));
        }

        let ranges: Vec<Value> = bucket
            .ranges
            .iter()
            .map(|r| {
                let key = if r.key.is_empty() {
                    format!("{}-{}", render_bound(&r.from), render_bound(&r.to))
                } else {
                    r.key.clone()
                };
                let mut range = json!({ "key": key });
                if let Some(from) = r.from.as_ref().filter(|v| !v.is_null()) {
                    range["from"] = from.clone();
                }
                if let Some(to) = r.to.as_ref().filter(|v| !v.is_null()) {
                    range["to"] = to.clone();
                }
                range
            })
            .collect();

        Ok(json!({ kind: {"field": field.name, "ranges": ranges} }))
    }

    fn filters(&self, bucket: &BucketConfig, idx: usize) -> Result<Value, QuerierError> {
        if bucket.filters.is_empty() {
            return Err(invalid(format!(
                "filters bucket '{}' has no filters",
                bucket_label(bucket, idx)
            )));
        }
        let filters: Map<String, Value> = bucket
            .filters
            .iter()
            .map(|(name, filter)| {
                (
                    name.clone(),
                    json!({"query_string": {"query": filter.query_string, "analyze_wildcard": true}}),
                )
            })
            .collect();

        let mut body = json!({ "filters": filters });
        if bucket.other_bucket {
            body["other_bucket"] = json!(true);
            body["other_bucket_key"] = json!(OTHER_BUCKET_KEY);
        }
        Ok(json!({ "filters": body }))
    }

    fn geohash_grid(&self, bucket: &BucketConfig) -> Result<Value, QuerierError> {
        let field = self.field(&bucket.field, "geohash_grid")?;
        if field.field_type != FieldType::Point {
            return Err(invalid(format!(
                "geohash_grid field '{}' must be a point field",
                field.name
            )));
        }
        let precision = bucket
            .precision
            .clamp(GEOHASH_MIN_PRECISION, GEOHASH_MAX_PRECISION);
        Ok(json!({"geohash_grid": {"field": field.name, "precision": precision}}))
    }

    fn value_aggs(
        &self,
        aggregation: &AggregationConfig,
        query: &Query,
    ) -> Result<Map<String, Value>, QuerierError> {
        let kind = aggregation.aggregation_type.as_str();
        let body = match aggregation.aggregation_type {
            AggregationType::DocCount => return Ok(Map::new()),
            AggregationType::ValueCount => {
                let field = self.field(&aggregation.field, kind)?;
                json!({"value_count": {"field": field.aggregatable_name()}})
            }
            AggregationType::Cardinality => {
                let field = self.field(&aggregation.field, kind)?;
                json!({"cardinality": {
                    "field": field.aggregatable_name(),
                    "precision_threshold": aggregation
                        .precision_threshold
                        .unwrap_or(DEFAULT_CARDINALITY_PRECISION_THRESHOLD),
                }})
            }
            AggregationType::Sum | AggregationType::Avg => {
                let field = self.field(&aggregation.field, kind)?;
                if !field.field_type.is_number() {
                    return Err(invalid(format!(
                        "{kind} requires a number field, '{}' is {}",
                        field.name,
                        field.field_type.as_str()
                    )));
                }
                json!({ kind: {"field": field.name} })
            }
            AggregationType::Max | AggregationType::Min => {
                let field = self.field(&aggregation.field, kind)?;
                if !field.field_type.is_number() && field.field_type != FieldType::Datetime {
                    return Err(invalid(format!(
                        "{kind} requires a number or datetime field, '{}' is {}",
                        field.name,
                        field.field_type.as_str()
                    )));
                }
                json!({ kind: {"field": field.name} })
            }
            AggregationType::Percentiles => {
                let field = self.field(&aggregation.field, kind)?;
                if !field.field_type.is_number() {
                    return Err(invalid(format!(
                        "percentiles requires a number field, '{}' is {}",
                        field.name,
                        field.field_type.as_str()
                    )));
                }
                if aggregation.percents.is_empty() {
                    return Err(invalid("percentiles requires at least one percent".to_string()));
                }
                if let Some(p) = aggregation
                    .percents
                    .iter()
                    .find(|p| !(0.0..=100.0).contains(*p))
                {
                    return Err(invalid(format!("percent {p} is outside [0, 100]")));
                }
                json!({"percentiles": {"field": field.name, "percents": aggregation.percents}})
            }
            AggregationType::TopHits => {
                let field = self.field(&aggregation.field, kind)?;
                json!({"top_hits": {
                    "size": 1,
                    "sort": [{ query.date_field.as_str(): {"order": DESC} }],
                    "_source": {"includes": [field.name]},
                }})
            }
        };

        let mut aggs = Map::new();
        aggs.insert(VALUE_AGG.to_string(), body);
        Ok(aggs)
    }
}

/// Label of a bucket: its name, else its field, else `filters{idx}`.
pub fn bucket_label(bucket: &BucketConfig, idx: usize) -> String {
    match bucket.label() {
        "" if bucket.bucket_type == BucketType::Filters => format!("filters{idx}"),
        label => label.to_string(),
    }
}

fn render_bound(bound: &Option<Value>) -> String {
    match bound {
        None | Some(Value::Null) => "*".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::time::CalendarUnit;
    use crate::query::filter::FilterClauses;
    use common::model::metric::{BucketFilter, RangeConfig};
    use std::collections::BTreeMap;

    fn view() -> DataView {
        DataView::new("logs").with_fields(vec![
            ViewField::new("@timestamp", FieldType::Datetime),
            ViewField::new("host.name", FieldType::Text),
            ViewField::new("status", FieldType::Long),
            ViewField::new("latency", FieldType::Double),
            ViewField::new("location", FieldType::Point),
        ])
    }

    fn query(step: Option<Step>) -> Query {
        Query {
            model_id: "m1".to_string(),
            model_update_time: 0,
            start: 0,
            end: 3_600_000,
            instant: step.is_none(),
            time: 3_600_000,
            step,
            step_is_auto: false,
            date_field: "@timestamp".to_string(),
            filters: FilterClauses::default(),
            query_string: String::new(),
            ignoring_hcts: false,
            max_search_series_size: None,
        }
    }

    fn formula(buckets: Vec<BucketConfig>, aggregation: AggregationConfig) -> FormulaConfig {
        FormulaConfig {
            buckets,
            date_histogram: None,
            aggregation,
            query_string: String::new(),
        }
    }

    fn agg(kind: AggregationType, field: &str) -> AggregationConfig {
        AggregationConfig {
            aggregation_type: kind,
            field: field.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_nested_tree_with_histogram() {
        let limits = QueryConfig::default();
        let view = view();
        let must = vec![json!({"match_all": {}})];
        let builder = DslBuilder::new(&view, &limits, &must);

        let mut host = BucketConfig::terms("host.name", 5);
        host.order = Some(TermsOrder::Field);
        host.direction = "asc".to_string();
        let info = builder
            .build(
                &formula(vec![host], agg(AggregationType::Sum, "latency")),
                &query(Some(Step::Fixed { millis: 60_000 })),
            )
            .unwrap();

        let terms = &info.dsl["aggs"]["host_name"];
        assert_eq!(
            terms["terms"],
            json!({
                "field": "host.name.keyword",
                "size": 5,
                "order": {"_key": "asc"},
                "missing": "--",
                "value_type": "string",
            })
        );
        let histogram = &terms["aggs"][DATE_HISTOGRAM_AGG];
        assert_eq!(histogram["date_histogram"]["fixed_interval"], "1m");
        assert_eq!(histogram["aggs"][VALUE_AGG], json!({"sum": {"field": "latency"}}));
        assert_eq!(info.dsl["query"]["bool"]["must"], json!(must));
        assert_eq!(info.term_infos[0].path, vec!["host_name".to_string()]);
        assert_eq!(info.bucket_series_num, 5);
        assert_eq!(info.query_time_num, 60);
        assert!(!info.track_total_hits);
    }

    #[test]
    fn test_unsized_terms_and_value_order() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let mut status = BucketConfig::terms("status", 0);
        status.order = Some(TermsOrder::Value);
        let info = builder
            .build(
                &formula(vec![status], agg(AggregationType::Avg, "latency")),
                &query(None),
            )
            .unwrap();

        let terms = &info.dsl["aggs"]["status"]["terms"];
        assert_eq!(terms["size"], UNBOUNDED_TERMS_SIZE);
        assert_eq!(terms["order"], json!({"__value": "desc"}));
        assert_eq!(terms["missing"], 0);
        assert_eq!(info.term_infos[0].config_size, UNBOUNDED_TERMS_SIZE);
    }

    #[test]
    fn test_range_and_filters_buckets() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let mut range = BucketConfig::terms("latency", 0);
        range.bucket_type = BucketType::Range;
        range.ranges = vec![
            RangeConfig {
                key: String::new(),
                from: None,
                to: Some(json!(100)),
            },
            RangeConfig {
                key: "slow".to_string(),
                from: Some(json!(100)),
                to: None,
            },
        ];
        let mut filters = BucketConfig::terms("", 0);
        filters.bucket_type = BucketType::Filters;
        filters.other_bucket = true;
        filters.filters = BTreeMap::from([(
            "errors".to_string(),
            BucketFilter {
                query_string: "status:500".to_string(),
            },
        )]);

        let info = builder
            .build(
                &formula(vec![range, filters], AggregationConfig::default()),
                &query(None),
            )
            .unwrap();

        let ranges = &info.dsl["aggs"]["latency"]["range"]["ranges"];
        assert_eq!(ranges[0], json!({"key": "*-100", "to": 100}));
        assert_eq!(ranges[1], json!({"key": "slow", "from": 100}));
        assert_eq!(info.buckets[1].label, "filters1");
        let filters = &info.dsl["aggs"]["latency"]["aggs"]["filters1"]["filters"];
        assert_eq!(filters["other_bucket_key"], OTHER_BUCKET_KEY);
        assert_eq!(
            filters["filters"]["errors"]["query_string"]["analyze_wildcard"],
            true
        );
        assert!(info.buckets[1].is_keyed());
        // two ranges times one filter plus the other bucket
        assert_eq!(info.not_terms_series_num, 4);
        assert_eq!(info.bucket_series_num, 4);
        assert_eq!(info.query_time_num, 1);
    }

    #[test]
    fn test_series_estimate_multiplies_all_bucket_kinds() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let mut range = BucketConfig::terms("latency", 0);
        range.bucket_type = BucketType::Range;
        range.ranges = (0..10)
            .map(|i| RangeConfig {
                key: format!("r{i}"),
                from: Some(json!(i * 10)),
                to: Some(json!((i + 1) * 10)),
            })
            .collect();
        let info = builder
            .build(
                &formula(
                    vec![BucketConfig::terms("status", 900), range],
                    AggregationConfig::default(),
                ),
                &query(Some(Step::Fixed { millis: 1_000 })),
            )
            .unwrap();

        assert_eq!(info.not_terms_series_num, 10);
        assert_eq!(info.bucket_series_num, 9_000);
        assert_eq!(info.query_time_num, 3_600);
    }

    #[test]
    fn test_extreme_window_is_rejected() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);
        let mut query = query(Some(Step::Fixed { millis: 60_000 }));
        query.start = i64::MIN;
        query.end = i64::MAX;

        let err = builder
            .build(&formula(vec![], AggregationConfig::default()), &query)
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_TIME_RANGE);
    }

    #[test]
    fn test_geohash_precision_clamped() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let mut grid = BucketConfig::terms("location", 0);
        grid.bucket_type = BucketType::GeohashGrid;
        grid.precision = 40;
        let info = builder
            .build(&formula(vec![grid], AggregationConfig::default()), &query(None))
            .unwrap();
        assert_eq!(
            info.dsl["aggs"]["location"]["geohash_grid"]["precision"],
            GEOHASH_MAX_PRECISION
        );
    }

    #[test]
    fn test_field_type_checks() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let err = builder
            .build(&formula(vec![], agg(AggregationType::Sum, "host.name")), &query(None))
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_FORMULA);

        let mut range = BucketConfig::terms("host.name", 0);
        range.bucket_type = BucketType::Range;
        range.ranges = vec![RangeConfig {
            key: String::new(),
            from: Some(json!(1)),
            to: None,
        }];
        assert!(
            builder
                .build(&formula(vec![range], AggregationConfig::default()), &query(None))
                .is_err()
        );

        let mut percent = agg(AggregationType::Percentiles, "latency");
        percent.percents = vec![50.0, 101.0];
        assert!(builder.build(&formula(vec![], percent), &query(None)).is_err());
    }

    #[test]
    fn test_cardinality_default_threshold() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let info = builder
            .build(
                &formula(vec![], agg(AggregationType::Cardinality, "host.name")),
                &query(None),
            )
            .unwrap();
        assert_eq!(
            info.dsl["aggs"][VALUE_AGG]["cardinality"],
            json!({"field": "host.name.keyword", "precision_threshold": 40000})
        );
    }

    #[test]
    fn test_instant_doc_count_tracks_total_hits() {
        let limits = QueryConfig::default();
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let info = builder
            .build(&formula(vec![], AggregationConfig::default()), &query(None))
            .unwrap();
        assert!(info.track_total_hits);
        assert!(info.dsl.get("aggs").is_none());
    }

    #[test]
    fn test_too_many_points_fail_fast() {
        let limits = QueryConfig {
            max_date_histogram_buckets: 10,
            ..QueryConfig::default()
        };
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let err = builder
            .build(
                &formula(vec![], AggregationConfig::default()),
                &query(Some(Step::Fixed { millis: 60_000 })),
            )
            .unwrap_err();
        assert_eq!(err.code(), codes::TOO_MANY_BUCKETS);

        let info = builder
            .build(
                &formula(vec![], AggregationConfig::default()),
                &query(Some(Step::Calendar(CalendarUnit::Hour))),
            )
            .unwrap();
        assert_eq!(
            info.dsl["aggs"][DATE_HISTOGRAM_AGG]["date_histogram"]["calendar_interval"],
            "hour"
        );
    }

    #[test]
    fn test_bucket_count_limit() {
        let limits = QueryConfig {
            max_buckets: 1,
            ..QueryConfig::default()
        };
        let view = view();
        let builder = DslBuilder::new(&view, &limits, &[]);

        let err = builder
            .build(
                &formula(
                    vec![
                        BucketConfig::terms("status", 2),
                        BucketConfig::terms("host.name", 2),
                    ],
                    AggregationConfig::default(),
                ),
                &query(None),
            )
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_FORMULA);
    }
}
