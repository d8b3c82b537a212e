use async_trait::async_trait;

use common::config::{AccessConfig, CatalogConfig};
use common::model::data_view::{DataView, LogGroup};
use common::model::metric::MetricModel;

use super::{DataViewAccess, LogGroupAccess, MetricModelAccess, ResourcePolicy};
use crate::error::QuerierError;

/// Catalog backed by the `[catalog]` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    config: CatalogConfig,
}

impl StaticCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self { config }
    }

    pub fn with_log_group(mut self, id: &str, log_group: LogGroup) -> Self {
        self.config.log_groups.insert(id.to_string(), log_group);
        self
    }

    pub fn with_data_view(mut self, view: DataView) -> Self {
        self.config.data_views.insert(view.id.clone(), view);
        self
    }

    pub fn with_metric_model(mut self, model: MetricModel) -> Self {
        self.config.metric_models.insert(model.id.clone(), model);
        self
    }
}

#[async_trait]
impl LogGroupAccess for StaticCatalog {
    async fn get_log_group_query_filters(
        &self,
        id: &str,
    ) -> Result<Option<LogGroup>, QuerierError> {
        Ok(self.config.log_groups.get(id).cloned())
    }
}

#[async_trait]
impl DataViewAccess for StaticCatalog {
    async fn get_data_view(&self, id: &str) -> Result<Option<DataView>, QuerierError> {
        Ok(self.config.data_views.get(id).cloned())
    }
}

#[async_trait]
impl MetricModelAccess for StaticCatalog {
    async fn get_metric_model(&self, id: &str) -> Result<Option<MetricModel>, QuerierError> {
        Ok(self.config.metric_models.get(id).cloned())
    }
}

/// Deny-list policy from the `[access]` section.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    access: AccessConfig,
}

impl StaticPolicy {
    pub fn new(access: AccessConfig) -> Self {
        Self { access }
    }
}

impl ResourcePolicy for StaticPolicy {
    fn check_data_view(&self, id: &str) -> Result<(), QuerierError> {
        if self.access.denied_views.iter().any(|d| d == id) {
            log::warn!("Access to data view {id} denied by policy");
            return Err(QuerierError::permission(format!(
                "access to data view '{id}' is not allowed"
            )));
        }
        Ok(())
    }

    fn check_metric_model(&self, id: &str) -> Result<(), QuerierError> {
        if self.access.denied_metric_models.iter().any(|d| d == id) {
            log::warn!("Access to metric model {id} denied by policy");
            return Err(QuerierError::permission(format!(
                "access to metric model '{id}' is not allowed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup() {
        let catalog = StaticCatalog::default()
            .with_log_group(
                "web",
                LogGroup {
                    index_pattern: vec!["web-*".to_string()],
                    must_filters: vec![],
                },
            )
            .with_data_view(DataView::new("web"));

        let group = catalog.get_log_group_query_filters("web").await.unwrap();
        assert_eq!(group.unwrap().index_pattern, vec!["web-*".to_string()]);
        assert!(
            catalog
                .get_log_group_query_filters("missing")
                .await
                .unwrap()
                .is_none()
        );
        assert!(catalog.get_data_view("web").await.unwrap().is_some());
        assert!(catalog.get_metric_model("web").await.unwrap().is_none());
    }

    #[test]
    fn test_policy_denies_configured_ids() {
        let policy = StaticPolicy::new(AccessConfig {
            denied_views: vec!["secret".to_string()],
            denied_metric_models: vec!["cost".to_string()],
        });

        assert!(policy.check_data_view("public").is_ok());
        let err = policy.check_data_view("secret").unwrap_err();
        assert_eq!(err.status(), 403);
        assert!(policy.check_metric_model("cost").is_err());
        assert!(policy.check_metric_model("latency").is_ok());
    }
}
