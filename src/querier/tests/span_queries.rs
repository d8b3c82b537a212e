use std::sync::Arc;

use common::testing::TestConfigBuilder;
use ntest::timeout;
use querier::catalog::StaticCatalog;
use querier::error::codes;
use querier::services::ServiceContainer;
use querier::testing::{GatewayCall, MockSearchGateway, entry_page, log_document, span_document};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uniquery_api::request::{SortParam, SpanPageParams};

fn container(gateway: Arc<MockSearchGateway>) -> ServiceContainer {
    let config = TestConfigBuilder::new()
        .with_max_search_size(50)
        .with_log_group("traces", &["otel-traces"])
        .with_log_group("logs", &["otel-logs"])
        .build();
    let catalog = Arc::new(StaticCatalog::new(config.catalog.clone()));
    ServiceContainer::with_gateway(config, gateway, catalog)
}

#[tokio::test]
#[timeout(5000)]
async fn test_span_list_honours_custom_sort() {
    let gateway = Arc::new(MockSearchGateway::new().with_search(
        &["otel-traces"],
        entry_page(
            2,
            vec![
                span_document("t1", "c", "a", 300, 800, "Error"),
                span_document("t1", "a", "", 100, 900, "Ok"),
            ],
        ),
    ));
    let service = container(gateway.clone()).trace_service();

    let list = service
        .get_span_list(
            "traces",
            "t1",
            &SpanPageParams {
                offset: 0,
                limit: 50,
                sort: vec![SortParam {
                    field: "Duration".to_string(),
                    direction: "asc".to_string(),
                }],
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(list.total, 2);
    let ids: Vec<&str> = list
        .entries
        .iter()
        .map(|e| e["__span_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["c", "a"]);
    assert_eq!(list.entries[0]["__end_time"], 800);

    let calls = gateway.calls().await;
    let GatewayCall::SearchSubmit { query, scroll, .. } = &calls[0] else {
        panic!("expected a search");
    };
    assert!(scroll.is_none());
    assert_eq!(query["sort"], json!([{"Duration": {"order": "asc"}}]));
}

#[tokio::test]
#[timeout(5000)]
async fn test_span_then_its_logs() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_search(
                &["otel-traces"],
                entry_page(1, vec![span_document("t1", "c", "a", 300, 800, "Error")]),
            )
            .with_search(
                &["otel-logs"],
                entry_page(1, vec![log_document("t1", "c", 500, "card declined")]),
            ),
    );
    let service = container(gateway.clone()).trace_service();
    let cancel = CancellationToken::new();

    let span = service.get_span("traces", "t1", "c", &cancel).await.unwrap();
    assert_eq!(span["__status"], "Error");

    let logs = service
        .get_span_related_logs("logs", "t1", "c", &SpanPageParams::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(logs.total, 1);
    assert_eq!(logs.entries[0]["message"], "card declined");
    assert_eq!(logs.entries[0]["__span_id"], "c");
}

#[tokio::test]
#[timeout(5000)]
async fn test_window_beyond_search_size_is_rejected() {
    let gateway = Arc::new(MockSearchGateway::new());
    let service = container(gateway.clone()).trace_service();

    let err = service
        .get_span_list(
            "traces",
            "t1",
            &SpanPageParams {
                offset: 45,
                limit: 10,
                sort: Vec::new(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), codes::INVALID_PARAMETER);
    assert_eq!(err.status(), 400);
    assert!(gateway.calls().await.is_empty());
}
