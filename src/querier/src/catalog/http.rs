use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use common::config::DataModelConfig;
use common::model::data_view::LogGroup;

use super::LogGroupAccess;
use crate::error::{QuerierError, codes};

/// Prefix of indices written by the data-model pipeline for a pattern.
const MODEL_INDEX_PREFIX: &str = "mdl-";

#[derive(Debug, Deserialize)]
struct LogGroupFilters {
    #[serde(default)]
    indices: LogGroupIndices,
    #[serde(default)]
    must_filter: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct LogGroupIndices {
    #[serde(default)]
    index_pattern: Vec<String>,
    #[serde(default)]
    manual_index: Vec<String>,
}

impl From<LogGroupFilters> for LogGroup {
    fn from(filters: LogGroupFilters) -> Self {
        let mut index_pattern = Vec::with_capacity(
            filters.indices.index_pattern.len() * 2 + filters.indices.manual_index.len(),
        );
        for pattern in filters.indices.index_pattern {
            index_pattern.push(format!("{pattern}-*"));
            index_pattern.push(format!("{MODEL_INDEX_PREFIX}{pattern}-*"));
        }
        index_pattern.extend(filters.indices.manual_index);

        LogGroup {
            index_pattern,
            must_filters: filters.must_filter,
        }
    }
}

/// Log group lookup against the data-model service.
#[derive(Debug, Clone)]
pub struct HttpLogGroupAccess {
    base_url: String,
    path_template: String,
    http: reqwest::Client,
}

impl HttpLogGroupAccess {
    pub fn new(base_url: &str, config: &DataModelConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            path_template: config.log_group_path.clone(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, id: &str) -> String {
        format!("{}{}", self.base_url, self.path_template.replace("{id}", id))
    }
}

#[async_trait]
impl LogGroupAccess for HttpLogGroupAccess {
    async fn get_log_group_query_filters(
        &self,
        id: &str,
    ) -> Result<Option<LogGroup>, QuerierError> {
        let url = self.url(id);
        let resp = self.http.get(&url).send().await.map_err(|e| {
            log::error!("Failed to fetch log group {id} from {url}: {e}");
            QuerierError::internal(codes::LOG_GROUP_ACCESS_FAILED, e.to_string())
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            log::error!("Log group {id} lookup returned {status}");
            return Err(QuerierError::internal(
                codes::LOG_GROUP_ACCESS_FAILED,
                format!("get query filters of log group '{id}' failed with status {status}"),
            ));
        }

        let body = resp.bytes().await.map_err(|e| {
            QuerierError::internal(codes::LOG_GROUP_ACCESS_FAILED, e.to_string())
        })?;
        let filters: LogGroupFilters = serde_json::from_slice(&body)?;
        Ok(Some(filters.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patterns_expand_to_raw_and_model_indices() {
        let filters: LogGroupFilters = serde_json::from_value(json!({
            "indices": {
                "index_pattern": ["nginx", "app_r_0"],
                "ware_house_id": ["101a6ec9"],
                "manual_index": ["a", "b"]
            },
            "must_filter": [{"query_string": {"query": "type:nginx", "analyze_wildcard": true}}]
        }))
        .unwrap();

        let group = LogGroup::from(filters);
        assert_eq!(
            group.index_pattern,
            vec!["nginx-*", "mdl-nginx-*", "app_r_0-*", "mdl-app_r_0-*", "a", "b"]
        );
        assert_eq!(group.must_filters.len(), 1);
    }

    #[test]
    fn test_manual_indices_only() {
        let filters: LogGroupFilters = serde_json::from_value(json!({
            "indices": {"index_pattern": [], "manual_index": ["a"]},
            "must_filter": []
        }))
        .unwrap();

        let group = LogGroup::from(filters);
        assert_eq!(group.index_pattern, vec!["a"]);
        assert!(group.must_filters.is_empty());
    }

    #[test]
    fn test_url_template() {
        let access = HttpLogGroupAccess::new(
            "http://data-model:13020/",
            &DataModelConfig {
                url: None,
                log_group_path: "/api/v1/log-groups/{id}".to_string(),
            },
        );
        assert_eq!(
            access.url("lg-1"),
            "http://data-model:13020/api/v1/log-groups/lg-1"
        );
    }
}
