use common::config::QueryConfig;
use common::model::data_view::DataView;
use common::model::metric::{AUTO_INTERVAL, IntervalType, MetricModel, MetricModelQuery};

use super::duration::{DurationPattern, parse_duration, parse_with_pattern};
use super::dsl::DslInfo;
use super::filter::{FilterClauses, build_filters};
use crate::error::{QuerierError, codes};
use crate::format::time::CalendarUnit;

/// Smallest step an automatic resolution produces.
pub const MIN_AUTO_STEP_MS: i64 = 1_000;

/// Bucket width of the time axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Fixed { millis: i64 },
    Calendar(CalendarUnit),
}

impl Step {
    pub fn is_calendar(&self) -> bool {
        matches!(self, Step::Calendar(_))
    }

    /// Interval as rendered in the backend query and in responses.
    pub fn render(&self) -> String {
        match self {
            Step::Fixed { millis } => format_millis(*millis),
            Step::Calendar(unit) => unit.as_str().to_string(),
        }
    }
}

/// Compact duration rendering using the largest whole unit.
pub fn format_millis(millis: i64) -> String {
    const UNITS: [(i64, &str); 4] = [
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1_000, "s"),
    ];
    for (size, suffix) in UNITS {
        if millis != 0 && millis % size == 0 {
            return format!("{}{suffix}", millis / size);
        }
    }
    format!("{millis}ms")
}

/// Length of a request window in milliseconds.
pub fn window_millis(start: i64, end: i64) -> Result<i64, QuerierError> {
    end.checked_sub(start).ok_or_else(|| {
        QuerierError::validation(
            codes::INVALID_TIME_RANGE,
            format!("window from {start} to {end} is too wide"),
        )
    })
}

/// How the aggregation of a query is executed against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One search, sizes as configured
    Direct,
    /// One search, the outermost terms size cut to fit the series budget
    TopN,
    /// Cardinality queries, then sequential batches over the outermost terms
    Batched,
}

/// Internal representation of a metric model request.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub model_id: String,
    pub model_update_time: i64,
    /// Epoch milliseconds, `start < end`
    pub start: i64,
    pub end: i64,
    pub instant: bool,
    /// Evaluation time of an instant query
    pub time: i64,
    /// `None` for instant queries
    pub step: Option<Step>,
    /// True when the step was derived from the window rather than requested
    pub step_is_auto: bool,
    pub date_field: String,
    pub filters: FilterClauses,
    pub query_string: String,
    pub ignoring_hcts: bool,
    pub max_search_series_size: Option<i64>,
}

pub struct QueryPlanner<'a> {
    limits: &'a QueryConfig,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(limits: &'a QueryConfig) -> Self {
        Self { limits }
    }

    pub fn plan(
        &self,
        model: &MetricModel,
        view: &DataView,
        request: &MetricModelQuery,
    ) -> Result<Query, QuerierError> {
        if request.start >= request.end {
            return Err(QuerierError::validation(
                codes::INVALID_TIME_RANGE,
                format!(
                    "start ({}) must be before end ({})",
                    request.start, request.end
                ),
            ));
        }
        let span = window_millis(request.start, request.end)?;
        if let Some(size) = request.max_search_series_size {
            if size <= 0 {
                return Err(QuerierError::validation(
                    codes::INVALID_PARAMETER,
                    format!("max_search_series_size must be positive, got {size}"),
                ));
            }
        }

        let filters = build_filters(&request.filters, view)?;
        let histogram = model.formula_config.date_histogram.as_ref();

        let (step, step_is_auto) = if request.instant {
            (None, false)
        } else {
            let (step, auto) = match histogram {
                None => self.fixed_step(request, span)?,
                Some(config) => match config.interval_type {
                    IntervalType::Fixed if config.interval_value == AUTO_INTERVAL => {
                        self.fixed_step(request, span)?
                    }
                    IntervalType::Fixed => {
                        let fixed =
                            parse_with_pattern(&config.interval_value, DurationPattern::DayHourMinute)
                                .map_err(|e| {
                                    QuerierError::validation(codes::INVALID_FORMULA, e.to_string())
                                })?;
                        (Step::Fixed { millis: fixed.as_millis() as i64 }, false)
                    }
                    IntervalType::Calendar if config.interval_value == AUTO_INTERVAL => {
                        self.calendar_step(request, span)?
                    }
                    IntervalType::Calendar => {
                        let unit = CalendarUnit::parse(&config.interval_value).ok_or_else(|| {
                            QuerierError::validation(
                                codes::INVALID_FORMULA,
                                format!(
                                    "calendar interval '{}' is not one of minute, hour, day, week, month, quarter, year",
                                    config.interval_value
                                ),
                            )
                        })?;
                        (Step::Calendar(unit), false)
                    }
                },
            };
            if let Step::Fixed { millis } = step {
                if millis <= 0 {
                    return Err(QuerierError::validation(
                        codes::INVALID_STEP,
                        "step must be greater than zero",
                    ));
                }
            }
            (Some(step), auto)
        };

        let date_field = histogram
            .map(|h| h.field.clone())
            .unwrap_or_else(|| view.date_field.clone());

        Ok(Query {
            model_id: model.id.clone(),
            model_update_time: model.update_time,
            start: request.start,
            end: request.end,
            instant: request.instant,
            time: request.time.unwrap_or(request.end),
            step,
            step_is_auto,
            date_field,
            filters,
            query_string: model.formula_config.query_string.clone(),
            ignoring_hcts: request.ignoring_hcts,
            max_search_series_size: request.max_search_series_size,
        })
    }

    fn auto_millis(&self, span: i64) -> i64 {
        (span / self.limits.step_divisor.max(1)).max(MIN_AUTO_STEP_MS)
    }

    fn fixed_step(
        &self,
        request: &MetricModelQuery,
        span: i64,
    ) -> Result<(Step, bool), QuerierError> {
        match request.step.as_deref() {
            None | Some(AUTO_INTERVAL) => Ok((
                Step::Fixed {
                    millis: self.auto_millis(span),
                },
                true,
            )),
            Some(step) => {
                let parsed = parse_duration(step)
                    .map_err(|e| QuerierError::validation(codes::INVALID_STEP, e.to_string()))?;
                Ok((
                    Step::Fixed {
                        millis: parsed.as_millis() as i64,
                    },
                    false,
                ))
            }
        }
    }

    /// Calendar histograms follow the request step, which must then be a
    /// calendar unit. Without a step the smallest unit covering the automatic
    /// step is used.
    fn calendar_step(
        &self,
        request: &MetricModelQuery,
        span: i64,
    ) -> Result<(Step, bool), QuerierError> {
        match request.step.as_deref() {
            None | Some(AUTO_INTERVAL) => {
                let auto = self.auto_millis(span);
                let unit = CalendarUnit::ALL
                    .into_iter()
                    .find(|u| u.approx_millis() >= auto)
                    .unwrap_or(CalendarUnit::Year);
                Ok((Step::Calendar(unit), true))
            }
            Some(step) => CalendarUnit::parse(step)
                .map(|unit| (Step::Calendar(unit), false))
                .ok_or_else(|| {
                    QuerierError::validation(
                        codes::INVALID_STEP,
                        format!("step '{step}' is not a calendar interval"),
                    )
                }),
        }
    }

    /// A query is high cardinality when its estimated series exceed
    /// `default_series_num` or series times time points exceed
    /// `max_query_points`. Only terms buckets can be cut down or batched.
    pub fn strategy(&self, query: &Query, dsl: &DslInfo) -> ExecutionStrategy {
        let points = dsl.bucket_series_num.saturating_mul(dsl.query_time_num.max(1));
        let high_cardinality = dsl.bucket_series_num > self.limits.default_series_num as i64
            || points > self.limits.max_query_points as i64;
        if dsl.term_infos.is_empty() || !high_cardinality {
            ExecutionStrategy::Direct
        } else if query.ignoring_hcts {
            ExecutionStrategy::TopN
        } else {
            ExecutionStrategy::Batched
        }
    }
}
