use std::sync::Arc;

use common::model::data_view::{DataView, FieldType, ViewField};
use common::testing::TestConfigBuilder;
use ntest::timeout;
use querier::catalog::StaticCatalog;
use querier::error::codes;
use querier::gateway::GatewayError;
use querier::query::view_query::ViewQuery;
use querier::services::{ServiceContainer, ViewResponse};
use querier::testing::{GatewayCall, MockSearchGateway};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uniquery_api::request::{DataViewQueryV2, ViewCommonParams};

fn container(gateway: Arc<MockSearchGateway>) -> ServiceContainer {
    let view = DataView::new("orders").with_fields(vec![
        ViewField::new("@timestamp", FieldType::Datetime),
        ViewField::new("status", FieldType::String),
    ]);
    let config = TestConfigBuilder::new()
        .with_data_view(view)
        .with_log_group("orders", &["orders-*"])
        .build();
    let catalog = Arc::new(StaticCatalog::new(config.catalog.clone()));
    ServiceContainer::with_gateway(config, gateway, catalog)
}

fn pit_page(pit_id: &str, rows: &[(i64, &str)], total: i64) -> Value {
    let hits: Vec<Value> = rows
        .iter()
        .map(|(ts, status)| {
            json!({
                "_index": "orders-1",
                "_score": null,
                "_source": {"@timestamp": ts, "status": status},
                "sort": [ts, format!("id-{ts}")],
            })
        })
        .collect();
    json!({"pit_id": pit_id, "hits": {"total": {"value": total}, "hits": hits}})
}

fn pit_searches(calls: &[GatewayCall]) -> Vec<&Value> {
    calls
        .iter()
        .filter_map(|c| match c {
            GatewayCall::SearchWithPit { query } => Some(query),
            _ => None,
        })
        .collect()
}

fn pit_deletes(calls: &[GatewayCall]) -> Vec<&Vec<String>> {
    calls
        .iter()
        .filter_map(|c| match c {
            GatewayCall::DeletePointInTime { pit_ids } => Some(pit_ids),
            _ => None,
        })
        .collect()
}

#[tokio::test]
#[timeout(5000)]
async fn test_search_after_pages_share_one_pit() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-1")
            .with_pit_search(pit_page("pit-1", &[(300, "paid"), (200, "open")], 3))
            .with_count(3)
            .with_pit_search(pit_page("pit-1", &[(100, "open")], 3)),
    );
    let service = container(gateway.clone()).data_view_service();
    let common = ViewCommonParams {
        limit: 2,
        need_total: true,
        ..Default::default()
    };

    let ViewResponse::V2(first) = service
        .query_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2 {
                common: common.clone(),
                pit_keep_alive: Some("1m".to_string()),
                ..Default::default()
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    else {
        panic!("expected a V2 response");
    };
    assert_eq!(first.pit_id, "pit-1");
    assert_eq!(first.total_count, Some(3));
    assert_eq!(first.entries.len(), 2);
    assert_eq!(first.entries[0]["status"], "paid");
    assert_eq!(first.entries[0]["__index"], "orders-1");

    let ViewResponse::V2(second) = service
        .query_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2 {
                common,
                search_after: first.search_after.clone(),
                pit_id: Some(first.pit_id.clone()),
                pit_keep_alive: Some("1m".to_string()),
                ..Default::default()
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    else {
        panic!("expected a V2 response");
    };
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.total_count, None);

    let calls = gateway.calls().await;
    let creates = calls
        .iter()
        .filter(|c| matches!(c, GatewayCall::CreatePointInTime { .. }))
        .count();
    assert_eq!(creates, 1);
    let counts = calls
        .iter()
        .filter(|c| matches!(c, GatewayCall::Count { .. }))
        .count();
    assert_eq!(counts, 1);

    let searches = pit_searches(&calls);
    assert_eq!(searches[1]["search_after"], json!([200, "id-200"]));
    assert_eq!(searches[1]["from"], 0);
    assert_eq!(searches[1]["pit"]["id"], "pit-1");
}

#[tokio::test]
#[timeout(5000)]
async fn test_export_walks_pages_and_releases_pit_once() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-1")
            .with_pit_search(pit_page("pit-2", &[(300, "paid"), (200, "open")], 3))
            .with_pit_search(pit_page("pit-2", &[(100, "open")], 3)),
    );
    let service = container(gateway.clone()).data_view_service();

    let rows = service
        .export_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2::default()),
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let statuses: Vec<&Value> = rows.iter().map(|r| &r["status"]).collect();
    assert_eq!(statuses, vec!["paid", "open", "open"]);

    let calls = gateway.calls().await;
    let searches = pit_searches(&calls);
    assert_eq!(searches.len(), 2);
    assert_eq!(searches[0]["pit"]["id"], "pit-1");
    assert_eq!(searches[1]["pit"]["id"], "pit-2");
    assert_eq!(searches[1]["search_after"], json!([200, "id-200"]));
    assert_eq!(pit_deletes(&calls), vec![&vec!["pit-2".to_string()]]);
}

#[tokio::test]
#[timeout(5000)]
async fn test_failed_export_still_releases_pit() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-1")
            .with_pit_search(pit_page("pit-1", &[(300, "paid"), (200, "open")], 3))
            .with_pit_search_error(GatewayError {
                status: 500,
                error_type: "search_phase_execution_exception".to_string(),
                message: "shard failure".to_string(),
            }),
    );
    let service = container(gateway.clone()).data_view_service();

    let err = service
        .export_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2::default()),
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::SEARCH_FAILED);

    let calls = gateway.calls().await;
    assert_eq!(pit_deletes(&calls), vec![&vec!["pit-1".to_string()]]);
}

#[tokio::test]
#[timeout(5000)]
async fn test_cancelled_export_releases_pit() {
    let cancel = CancellationToken::new();
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-1")
            .with_pit_search(pit_page("pit-1", &[(300, "paid"), (200, "open")], 3))
            .with_pit_search(pit_page("pit-1", &[(100, "open")], 3))
            .cancel_after_pit_search(cancel.clone()),
    );
    let service = container(gateway.clone()).data_view_service();

    let err = service
        .export_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2::default()),
            2,
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::CANCELLED);

    let calls = gateway.calls().await;
    assert_eq!(pit_searches(&calls).len(), 1);
    assert_eq!(pit_deletes(&calls), vec![&vec!["pit-1".to_string()]]);
}

#[tokio::test]
#[timeout(5000)]
async fn test_failed_first_page_releases_created_pit() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-new")
            .with_pit_search_error(GatewayError {
                status: 500,
                error_type: "search_phase_execution_exception".to_string(),
                message: "shard failure".to_string(),
            }),
    );
    let service = container(gateway.clone()).data_view_service();

    let err = service
        .query_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2 {
                pit_keep_alive: Some("1m".to_string()),
                ..Default::default()
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::SEARCH_FAILED);

    let calls = gateway.calls().await;
    assert_eq!(pit_deletes(&calls), vec![&vec!["pit-new".to_string()]]);
}

#[tokio::test]
#[timeout(5000)]
async fn test_failed_count_releases_created_pit() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-new")
            .with_pit_search(pit_page("pit-new", &[(300, "paid")], 1)),
    );
    let service = container(gateway.clone()).data_view_service();

    let err = service
        .query_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2 {
                common: ViewCommonParams {
                    need_total: true,
                    ..Default::default()
                },
                pit_keep_alive: Some("1m".to_string()),
                ..Default::default()
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::COUNT_FAILED);

    let calls = gateway.calls().await;
    assert_eq!(pit_deletes(&calls), vec![&vec!["pit-new".to_string()]]);
}

#[tokio::test]
#[timeout(5000)]
async fn test_successful_page_keeps_created_pit() {
    let gateway = Arc::new(
        MockSearchGateway::new()
            .with_pit("pit-new")
            .with_pit_search(pit_page("pit-new", &[(300, "paid")], 1)),
    );
    let service = container(gateway.clone()).data_view_service();

    service
        .query_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2 {
                pit_keep_alive: Some("1m".to_string()),
                ..Default::default()
            }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(pit_deletes(&gateway.calls().await).is_empty());
}

#[tokio::test]
#[timeout(5000)]
async fn test_export_rejects_zero_page_size() {
    let gateway = Arc::new(MockSearchGateway::new());
    let service = container(gateway.clone()).data_view_service();

    let err = service
        .export_view_data(
            "orders",
            ViewQuery::V2(DataViewQueryV2::default()),
            0,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_PARAMETER);
    assert!(gateway.calls().await.is_empty());
}
