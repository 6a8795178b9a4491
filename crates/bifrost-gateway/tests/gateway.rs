//! End-to-end tests over real sockets.

mod common;

use common::{dead_addr, start_target, TestGateway};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn register_and_fan_out_to_live_target() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = TestGateway::start(dir.path()).await;
    let target = start_target().await;
    let http = reqwest::Client::new();

    let definition = json!({
        "routes": [
            {
                "url": format!("http://{target}/echo"),
                "method": "POST",
                "headers": {"x-tag": "order-<% order.id %>"},
                "body": {"item": "<% order.item %>"}
            },
            {"url": format!("http://{target}/text")}
        ]
    });
    let response = http
        .post(gateway.url("/bifrost/POST/orders"))
        .json(&definition)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = http
        .post(gateway.url("/orders"))
        .json(&json!({"order": {"id": 17, "item": "lamp"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: Value = response.json().await.unwrap();
    assert_eq!(
        report[format!("POST::http://{target}/echo")],
        json!({
            "status": 200,
            "body": {"method": "POST", "tag": "order-17", "body": {"item": "lamp"}}
        })
    );
    assert_eq!(
        report[format!("GET::http://{target}/text")],
        json!({"status": 200, "body": "plain words"})
    );

    gateway.shutdown().await;
}

#[tokio::test]
async fn unreachable_and_failing_targets_make_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = TestGateway::start(dir.path()).await;
    let target = start_target().await;
    let dead = dead_addr().await;
    let http = reqwest::Client::new();

    let definition = json!({"routes": [
        {"url": format!("http://{target}/echo")},
        {"url": format!("http://{target}/gone")},
        {"url": format!("http://{dead}/")}
    ]});
    http.post(gateway.url("/bifrost/GET/mixed"))
        .json(&definition)
        .send()
        .await
        .unwrap();

    let response = http.get(gateway.url("/mixed")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let report: Value = response.json().await.unwrap();
    let ok = &report[format!("GET::http://{target}/echo")];
    assert_eq!(ok["status"], 200);
    assert!(ok.get("error").is_none());

    let gone = &report[format!("GET::http://{target}/gone")];
    assert_eq!(gone["status"], 404);
    assert_eq!(gone["error"], "Not Found");
    assert_eq!(gone["body"], "gone");

    let down = &report[format!("GET::http://{dead}/")];
    assert_eq!(down["status"], 500);
    assert!(down["error"].is_string());

    gateway.shutdown().await;
}

#[tokio::test]
async fn routes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let http = reqwest::Client::new();

    let gateway = TestGateway::start(dir.path()).await;
    let response = http
        .post(gateway.url("/bifrost/GET/kept"))
        .json(&json!({"authorization": "Bearer k", "routes": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let data_dir = gateway.data_dir.clone();
    gateway.shutdown().await;

    let snapshot: Value =
        serde_json::from_slice(&std::fs::read(data_dir.join("routes.json")).unwrap()).unwrap();
    assert_eq!(snapshot["GET::kept"]["authorization"], "Bearer k");

    let gateway = TestGateway::start(&data_dir).await;

    let response = http.get(gateway.url("/kept")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = http
        .get(gateway.url("/kept"))
        .header("authorization", "Bearer k")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({}));

    let health: Value = http
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["routes"], 1);

    gateway.shutdown().await;
}
