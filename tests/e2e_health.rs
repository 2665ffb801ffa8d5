//! E2E tests for health check and basic server functionality

mod common;

use common::TestServer;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server.get("/health", None).await;

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_cors_headers() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/health"))
        .header("Origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();

    // Plain http deployments get a permissive CORS layer
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_404_for_unknown_routes() {
    let server = TestServer::new().await;

    let response = server.get("/unknown/route", None).await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;

    let response = server.get("/connect/github", None).await;
    assert_eq!(response.status(), 302);

    let response = server.get("/metrics", None).await;

    assert_eq!(response.status(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = response.text().await.unwrap();
    assert!(body.contains(r#"grantgate_connect_requests_total{outcome="redirect"}"#));
    assert!(body.contains("grantgate_connect_setups_total"));
}

#[tokio::test]
async fn test_echo_reports_request() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/echo/some/path?tag=a&tag=b"))
        .body("hello")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["request"]["method"], "POST");
    assert_eq!(body["request"]["searchParams"]["tag"], serde_json::json!(["a", "b"]));
    assert_eq!(body["request"]["body"], "hello");
    assert_eq!(body["params"]["path"], "some/path");
    // Connect handler not set up yet
    assert!(body["grant_session"].is_null());
}
