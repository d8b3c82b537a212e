use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::data_view::{DataView, LogGroup};
use crate::model::metric::MetricModel;

pub const CONFIG_FILE: &str = "uniquery.toml";
pub const ENV_PREFIX: &str = "UNIQUERY__";

/// Connection settings of the document search cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Shard routing preference sent with scroll searches
    pub preference: String,
    #[serde(with = "humantime_serde")]
    pub scroll_keep_alive: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:9200"),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            preference: String::from("_local"),
            scroll_keep_alive: Duration::from_secs(60),
        }
    }
}

/// Location of the data-model service that owns log groups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataModelConfig {
    /// Base URL; when unset log groups come from the static catalog
    pub url: Option<String>,
    /// Path template, `{id}` is replaced by the log group id
    pub log_group_path: String,
}

impl Default for DataModelConfig {
    fn default() -> Self {
        Self {
            url: None,
            log_group_path: String::from("/api/mdl-data-model/v1/log-groups/{id}"),
        }
    }
}

/// Engine limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Page size of span scrolls and of view searches
    pub max_search_size: usize,
    /// Bucket cap of one related-log aggregation page
    pub max_related_logs_bucket: usize,
    /// Series count above which a query is treated as high cardinality
    pub default_series_num: usize,
    /// Series budget of one batch
    pub series_num_by_batch: usize,
    pub max_query_points: usize,
    pub dsl_max_query_points: usize,
    pub step_divisor: i64,
    pub max_date_histogram_buckets: usize,
    pub search_after_limit: usize,
    /// Bucket levels allowed in one formula
    pub max_buckets: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_search_size: 10000,
            max_related_logs_bucket: 10000,
            default_series_num: 1000,
            series_num_by_batch: 5000,
            max_query_points: 10000,
            dsl_max_query_points: 30000,
            step_divisor: 100,
            max_date_histogram_buckets: 10000,
            search_after_limit: 10000,
            max_buckets: 10,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    pub denied_views: Vec<String>,
    pub denied_metric_models: Vec<String>,
}

/// Statically declared definitions, keyed by id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub data_views: BTreeMap<String, DataView>,
    pub log_groups: BTreeMap<String, LogGroup>,
    pub metric_models: BTreeMap<String, MetricModel>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub search: SearchConfig,
    pub data_model: DataModelConfig,
    pub query: QueryConfig,
    pub access: AccessConfig,
    pub catalog: CatalogConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.search.url.trim().is_empty() {
            problems.push("search.url cannot be empty".to_string());
        }
        if let Some(url) = &self.data_model.url
            && url.trim().is_empty()
        {
            problems.push("data_model.url cannot be empty when set".to_string());
        }

        let limits = [
            ("query.max_search_size", self.query.max_search_size),
            ("query.max_related_logs_bucket", self.query.max_related_logs_bucket),
            ("query.default_series_num", self.query.default_series_num),
            ("query.series_num_by_batch", self.query.series_num_by_batch),
            ("query.max_query_points", self.query.max_query_points),
            ("query.max_date_histogram_buckets", self.query.max_date_histogram_buckets),
            ("query.search_after_limit", self.query.search_after_limit),
        ];
        for (name, value) in limits {
            if value == 0 {
                problems.push(format!("{name} must be greater than zero"));
            }
        }
        if self.query.step_divisor <= 0 {
            problems.push("query.step_divisor must be greater than zero".to_string());
        }

        if self.data_model.url.is_none() {
            for view in self.catalog.data_views.values() {
                if !self.catalog.log_groups.contains_key(view.log_group()) {
                    problems.push(format!(
                        "data view '{}' references unknown log group '{}'",
                        view.id,
                        view.log_group()
                    ));
                }
            }
        }

        for model in self.catalog.metric_models.values() {
            if !self.catalog.data_views.contains_key(&model.data_view_id) {
                problems.push(format!(
                    "metric model '{}' references unknown data view '{}'",
                    model.id, model.data_view_id
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.search.url, "http://localhost:9200");
        assert_eq!(config.search.preference, "_local");
        assert_eq!(config.search.scroll_keep_alive, Duration::from_secs(60));
        assert_eq!(config.query.max_search_size, 10000);
        assert_eq!(config.query.step_divisor, 100);
        assert!(config.data_model.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.query.max_related_logs_bucket, 10000);
        assert!(config.catalog.data_views.is_empty());
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("UNIQUERY__SEARCH__URL", "http://search:9200");
            jail.set_env("UNIQUERY__QUERY__MAX_SEARCH_SIZE", "500");
            jail.set_env("UNIQUERY__SEARCH__SCROLL_KEEP_ALIVE", "5m");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.search.url, "http://search:9200");
            assert_eq!(config.query.max_search_size, 500);
            assert_eq!(config.search.scroll_keep_alive, Duration::from_secs(300));
            Ok(())
        });
    }

    #[test]
    fn test_toml_catalog() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                [search]
                timeout = "10s"

                [catalog.log_groups.web]
                index_pattern = ["web-logs-*"]

                [catalog.data_views.web]
                id = "web"
                log_group_id = "web"
                fields = [{ name = "status", type = "long" }]
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.search.timeout, Duration::from_secs(10));
            assert_eq!(config.catalog.data_views["web"].fields.len(), 1);
            assert_eq!(
                config.catalog.log_groups["web"].index_pattern,
                vec!["web-logs-*".to_string()]
            );
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = Configuration::default();
        config.search.url = String::new();
        config.query.max_search_size = 0;
        config
            .catalog
            .data_views
            .insert("orphan".to_string(), DataView::new("orphan"));

        let problems = config.validate().unwrap_err();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("orphan")));
    }

    #[test]
    fn test_remote_log_groups_skip_catalog_check() {
        let mut config = Configuration::default();
        config.data_model.url = Some("http://data-model:13020".to_string());
        config
            .catalog
            .data_views
            .insert("v".to_string(), DataView::new("v"));

        assert!(config.validate().is_ok());
    }
}
