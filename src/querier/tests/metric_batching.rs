use std::sync::Arc;

use common::model::data_view::{DataView, FieldType, ViewField};
use common::model::metric::{
    AggregationConfig, BucketConfig, FormulaConfig, MetricModel, MetricModelQuery,
};
use common::testing::TestConfigBuilder;
use ntest::timeout;
use querier::error::codes;
use querier::catalog::StaticCatalog;
use querier::services::ServiceContainer;
use querier::testing::{GatewayCall, MockSearchGateway};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const HOUR: i64 = 3_600_000;

fn container(gateway: Arc<MockSearchGateway>, builder: TestConfigBuilder) -> ServiceContainer {
    let view = DataView::new("access").with_fields(vec![
        ViewField::new("@timestamp", FieldType::Datetime),
        ViewField::new("host", FieldType::String),
    ]);
    let model = MetricModel {
        id: "hits-per-host".to_string(),
        name: "hits per host".to_string(),
        data_view_id: "access".to_string(),
        unit: String::new(),
        update_time: 0,
        formula_config: FormulaConfig {
            buckets: vec![BucketConfig::terms("host", 10)],
            date_histogram: None,
            aggregation: AggregationConfig::default(),
            query_string: String::new(),
        },
    };
    let config = builder
        .with_series_limits(2, 2)
        .with_data_view(view)
        .with_metric_model(model)
        .with_log_group("access", &["access-*"])
        .build();
    let catalog = Arc::new(StaticCatalog::new(config.catalog.clone()));
    ServiceContainer::with_gateway(config, gateway, catalog)
}

fn instant(ignoring_hcts: bool) -> MetricModelQuery {
    MetricModelQuery {
        start: 0,
        end: HOUR,
        instant: true,
        ignoring_hcts,
        ..Default::default()
    }
}

fn cardinality(value: i64) -> Value {
    json!({"aggregations": {"__cardinality": {"value": value}}})
}

fn host_page(buckets: &[(&str, i64)]) -> Value {
    let buckets: Vec<Value> = buckets
        .iter()
        .map(|(k, n)| json!({"key": k, "doc_count": n}))
        .collect();
    json!({"hits": {"total": {"value": 0}}, "aggregations": {"host": {"buckets": buckets}}})
}

fn searches(calls: &[GatewayCall]) -> Vec<&Value> {
    calls
        .iter()
        .filter_map(|c| match c {
            GatewayCall::SearchSubmit { query, .. } => Some(query),
            _ => None,
        })
        .collect()
}

#[tokio::test]
#[timeout(5000)]
async fn test_high_cardinality_terms_are_batched() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_search(&["access-*"], cardinality(3))
            .with_search(&["access-*"], host_page(&[("a", 4), ("b", 2)]))
            .with_search(&["access-*"], host_page(&[("c", 9)])),
    );
    let service = container(gateway.clone(), TestConfigBuilder::new()).metric_model_service();

    let response = service
        .query_metric_model("hits-per-host", &instant(false), &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.is_query_by_batch);
    assert_eq!(response.series_total, Some(3));
    assert_eq!(response.step, None);
    let hosts: Vec<(&str, Option<f64>)> = response
        .datas
        .iter()
        .map(|d| (d.labels["host"].as_str(), d.values[0]))
        .collect();
    assert_eq!(
        hosts,
        vec![("a", Some(4.0)), ("b", Some(2.0)), ("c", Some(9.0))]
    );
    assert!(response.datas.iter().all(|d| d.times == vec![HOUR]));

    let calls = gateway.calls().await;
    let searches = searches(&calls);
    assert_eq!(searches.len(), 3);
    assert_eq!(searches[1]["aggs"]["host"]["terms"]["size"], 2);
    assert_eq!(searches[2]["aggs"]["host"]["terms"]["size"], 1);
    let filters = searches[2]["query"]["bool"]["filter"].as_array().unwrap();
    assert!(filters.contains(&json!({"range": {"host": {"gt": "b"}}})));
}

#[tokio::test]
#[timeout(5000)]
async fn test_ignoring_high_cardinality_keeps_top_series() {
    let gateway = Arc::new(
        MockSearchGateway::new().with_search(&["access-*"], host_page(&[("a", 4), ("b", 2)])),
    );
    let service = container(gateway.clone(), TestConfigBuilder::new()).metric_model_service();

    let response = service
        .query_metric_model("hits-per-host", &instant(true), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!response.is_query_by_batch);
    assert_eq!(response.datas.len(), 2);

    let calls = gateway.calls().await;
    let searches = searches(&calls);
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0]["aggs"]["host"]["terms"]["size"], 2);
}

#[tokio::test]
#[timeout(5000)]
async fn test_denied_model_is_forbidden() {
    let gateway = Arc::new(MockSearchGateway::new());
    let service = container(
        gateway.clone(),
        TestConfigBuilder::new().deny_metric_model("hits-per-host"),
    )
    .metric_model_service();

    let err = service
        .query_metric_model("hits-per-host", &instant(false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), codes::FORBIDDEN);
    assert!(gateway.calls().await.is_empty());
}
