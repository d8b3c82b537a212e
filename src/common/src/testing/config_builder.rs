//! Fluent builder for test configurations.

use crate::config::Configuration;
use crate::model::data_view::{DataView, LogGroup};
use crate::model::metric::MetricModel;

/// Builder for creating test configurations.
///
/// Starts from `Configuration::default()` pointed at an unroutable search
/// URL so an accidental real request fails fast.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_related_logs_bucket(2)
///     .with_log_group("logs", &["app-logs"])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.search.url = "http://127.0.0.1:1".to_string();
        Self { config }
    }

    /// Page size of span scrolls and view searches.
    pub fn with_max_search_size(mut self, size: usize) -> Self {
        self.config.query.max_search_size = size;
        self
    }

    /// Bucket cap of one related-log aggregation page.
    pub fn with_related_logs_bucket(mut self, size: usize) -> Self {
        self.config.query.max_related_logs_bucket = size;
        self
    }

    pub fn with_series_limits(mut self, default_series_num: usize, by_batch: usize) -> Self {
        self.config.query.default_series_num = default_series_num;
        self.config.query.series_num_by_batch = by_batch;
        self
    }

    /// Register a log group backed by the given index patterns.
    pub fn with_log_group(mut self, id: &str, index_pattern: &[&str]) -> Self {
        self.config.catalog.log_groups.insert(
            id.to_string(),
            LogGroup {
                index_pattern: index_pattern.iter().map(|p| p.to_string()).collect(),
                must_filters: Vec::new(),
            },
        );
        self
    }

    pub fn with_data_view(mut self, view: DataView) -> Self {
        self.config.catalog.data_views.insert(view.id.clone(), view);
        self
    }

    pub fn with_metric_model(mut self, model: MetricModel) -> Self {
        self.config
            .catalog
            .metric_models
            .insert(model.id.clone(), model);
        self
    }

    pub fn deny_view(mut self, id: &str) -> Self {
        self.config.access.denied_views.push(id.to_string());
        self
    }

    pub fn deny_metric_model(mut self, id: &str) -> Self {
        self.config.access.denied_metric_models.push(id.to_string());
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
