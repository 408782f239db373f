use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

use highwaypatrol::api::{self, AppState};
use highwaypatrol::config::Config;
use highwaypatrol::dispatch::{Dispatcher, MemoryInvoker};
use highwaypatrol::messaging::MemoryBus;
use highwaypatrol::observability::Metrics;
use highwaypatrol::storage::StorageClient;

struct TestApp {
    app: Router,
    storage: StorageClient,
    bus: MemoryBus,
    invoker: MemoryInvoker,
}

fn build_test_app() -> TestApp {
    build_test_app_with(MemoryInvoker::new())
}

fn build_test_app_with(invoker: MemoryInvoker) -> TestApp {
    let config = Config::default();
    let storage = StorageClient::in_memory();
    let bus = MemoryBus::new();

    let dispatcher = Dispatcher::new(Arc::new(invoker.clone()), &config).unwrap();
    let state = AppState::new(
        config,
        storage.clone(),
        Arc::new(bus.clone()),
        Arc::new(dispatcher),
        Arc::new(Metrics::new()),
    );

    TestApp {
        app: api::router(state),
        storage,
        bus,
        invoker,
    }
}

fn aimpoint_json(device_id: &str) -> Value {
    json!({
        "deviceID": device_id,
        "collectionType": "STILLS",
        "accessUrl": format!("https://cams.example/{device_id}.jpg"),
        "pollFrequency": 60,
        "filenameBase": "rdtc{deviceID}",
        "collRegions": ["Europe (Frankfurt)"]
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_outcome_uses_sent_timestamp() {
    let test = build_test_app();

    let request = Request::builder()
        .uri("/outcomes")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Sent-Timestamp", "1714564800000")
        .body(Body::from(
            serde_json::to_vec(&json!({"aimpoint": aimpoint_json("12"), "isCollecting": true}))
                .unwrap(),
        ))
        .unwrap();

    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    assert_eq!(report["status"], true);
    assert_eq!(report["component"], "history");

    let keys = test.storage.list("status/rdtc12/").await.unwrap();
    assert_eq!(
        keys,
        vec!["status/rdtc12/20240501120000_1714564800000_success".to_string()]
    );
}

#[tokio::test]
async fn test_outcome_without_header_uses_receipt_time() {
    let test = build_test_app();
    let body = json!({"aimpoint": aimpoint_json("12"), "isCollecting": false});

    let response = test.app.oneshot(post_json("/outcomes", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let keys = test.storage.list("status/rdtc12/").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("_failure"));
}

#[tokio::test]
async fn test_outcome_rejects_wrong_content_type() {
    let test = build_test_app();

    let request = Request::builder()
        .uri("/outcomes")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("{}"))
        .unwrap();

    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_outcome_rejects_malformed_aimpoint() {
    let test = build_test_app();
    let mut aimpoint = aimpoint_json("12");
    aimpoint["pollFrequency"] = json!(0);

    let response = test
        .app
        .oneshot(post_json(
            "/outcomes",
            &json!({"aimpoint": aimpoint, "isCollecting": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error = body_json(response).await;
    assert_eq!(error["code"], "MALFORMED_AIMPOINT");
}

#[tokio::test]
async fn test_outcome_rejects_oversized_body() {
    let test = build_test_app();
    let mut aimpoint = aimpoint_json("12");
    aimpoint["padding"] = json!("x".repeat(300 * 1024));

    let response = test
        .app
        .oneshot(post_json(
            "/outcomes",
            &json!({"aimpoint": aimpoint, "isCollecting": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_dispatch_invokes_one_worker() {
    let test = build_test_app();
    let order = json!({
        "orderId": "01890a5d-ac96-774b-bcce-b302099a8057",
        "aimpoint": aimpoint_json("12"),
        "overrides": {"delaySecs": 30, "tickMs": 0}
    });

    let response = test.app.oneshot(post_json("/dispatch", &order)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = test.invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].region, "eu-central-1");
    assert_eq!(calls[0].worker, "Stills");
}

#[tokio::test]
async fn test_dispatch_rejects_unknown_collection_type() {
    let test = build_test_app();
    let mut aimpoint = aimpoint_json("12");
    aimpoint["collectionType"] = json!("FAX");
    let order = json!({
        "orderId": "01890a5d-ac96-774b-bcce-b302099a8057",
        "aimpoint": aimpoint,
        "overrides": {"delaySecs": 0, "tickMs": 0}
    });

    let response = test.app.oneshot(post_json("/dispatch", &order)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(test.invoker.calls().is_empty());
}

fn order_json(aimpoint: Value) -> Value {
    json!({
        "orderId": "01890a5d-ac96-774b-bcce-b302099a8057",
        "aimpoint": aimpoint,
        "overrides": {"delaySecs": 0, "tickMs": 0}
    })
}

#[tokio::test]
async fn test_dispatch_failure_consumes_the_order() {
    let test = build_test_app_with(MemoryInvoker::rejecting(503));

    let response = test
        .app
        .oneshot(post_json("/dispatch", &order_json(aimpoint_json("12"))))
        .await
        .unwrap();

    // Acknowledged so the bus does not redeliver; the failure is in the report
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["status"], false);
    assert_eq!(report["component"], "dispatcher");
    assert_eq!(test.invoker.calls().len(), 1);
}

#[tokio::test]
async fn test_dispatch_with_no_regions_is_consumed() {
    let test = build_test_app();
    let mut aimpoint = aimpoint_json("12");
    aimpoint["collRegions"] = json!([]);
    let order = json!({
        "orderId": "01890a5d-ac96-774b-bcce-b302099a8057",
        "aimpoint": aimpoint,
        "overrides": {"delaySecs": 0, "tickMs": 0}
    });

    let response = test.app.oneshot(post_json("/dispatch", &order)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["status"], false);
    assert!(test.invoker.calls().is_empty());
}

#[tokio::test]
async fn test_monitor_tick_enqueues_orders() {
    let test = build_test_app();
    test.storage
        .put(
            "targets/rdtc/12.json",
            Bytes::from(serde_json::to_vec(&aimpoint_json("12")).unwrap()),
        )
        .await
        .unwrap();

    let request = Request::builder()
        .uri("/ticks/monitor?now=2024-05-01T12:00:00Z")
        .method("POST")
        .body(Body::empty())
        .unwrap();

    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    assert_eq!(report["component"], "monitor");
    // pollFrequency 60 over a 630 s window: 0, 60, ... 600
    assert_eq!(report["counts"]["enqueued"], 11);
    assert_eq!(test.bus.delays_for("12").len(), 11);
}

#[tokio::test]
async fn test_lifecycle_ticks_report() {
    let test = build_test_app();

    for uri in ["/ticks/disabler", "/ticks/enabler"] {
        let request = Request::builder()
            .uri(uri)
            .method("POST")
            .body(Body::empty())
            .unwrap();
        let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["counts"]["scanned"], 0);
    }
}

#[tokio::test]
async fn test_health_reports_metrics() {
    let test = build_test_app();
    let body = json!({"aimpoint": aimpoint_json("12"), "isCollecting": true});
    let response = ServiceExt::<Request<Body>>::oneshot(test.app.clone(), post_json("/outcomes", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["metrics"]["outcomes_recorded"], 1);
}
