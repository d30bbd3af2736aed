//! WebDriver client against a mocked driver endpoint.

use std::time::Duration;

use serde_json::json;
use usagewatch::core::driver::{BrowserDriver, DriverError, LaunchOptions, PageHandle};
use usagewatch::core::webdriver::WebDriverClient;
use usagewatch::error::{ErrorKind, WatchError};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION: &str = "f3a1c9";

fn ok(value: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "value": value }))
}

fn w3c_error(status: u16, error: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .set_body_json(json!({ "value": { "error": error, "message": message, "stacktrace": "" } }))
}

fn session_path(suffix: &str) -> String {
    format!("/session/{SESSION}{suffix}")
}

async fn open_client(server: &MockServer) -> WebDriverClient {
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ok(json!({ "sessionId": SESSION, "capabilities": {} })))
        .expect(1)
        .mount(server)
        .await;

    let mut client = WebDriverClient::new(&server.uri(), "chrome").unwrap();
    client.open(&LaunchOptions::default()).await.unwrap();
    client
}

#[tokio::test]
async fn open_is_idempotent() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;

    assert!(client.is_open());
    assert_eq!(client.session_id(), Some(SESSION));
    // A second open must not create another session (expect(1) above).
    client.open(&LaunchOptions::default()).await.unwrap();
}

#[tokio::test]
async fn new_session_requests_headless_chrome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(body_partial_json(json!({
            "capabilities": { "alwaysMatch": { "browserName": "chrome" } }
        })))
        .respond_with(ok(json!({ "sessionId": SESSION })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = WebDriverClient::new(&server.uri(), "chrome").unwrap();
    let options = LaunchOptions {
        headless: true,
        ..LaunchOptions::default()
    };
    client.open(&options).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let args = body["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
        .as_array()
        .unwrap();
    assert!(args.iter().any(|a| a == "--headless=new"));
}

#[tokio::test]
async fn navigate_and_read_url() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("POST"))
        .and(path(session_path("/url")))
        .and(body_partial_json(json!({ "url": "https://claude.ai/settings/usage" })))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(session_path("/url")))
        .respond_with(ok(json!("https://claude.ai/settings/usage")))
        .mount(&server)
        .await;

    client.navigate("https://claude.ai/settings/usage").await.unwrap();
    assert_eq!(
        client.current_url().await.unwrap(),
        "https://claude.ai/settings/usage"
    );
}

#[tokio::test]
async fn queries_run_as_scripts() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("POST"))
        .and(path(session_path("/execute/sync")))
        .and(body_partial_json(json!({ "args": ["[data-testid=\"usage-4hour-percent\"]"] })))
        .respond_with(ok(json!("42%")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(session_path("/execute/sync")))
        .and(body_partial_json(json!({ "args": [".missing"] })))
        .respond_with(ok(json!(null)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(session_path("/execute/sync")))
        .and(body_partial_json(json!({ "args": ["[role=\"progressbar\"]", "aria-valuenow"] })))
        .respond_with(ok(json!("17")))
        .mount(&server)
        .await;

    assert_eq!(
        client
            .query_text(r#"[data-testid="usage-4hour-percent"]"#)
            .await
            .unwrap()
            .as_deref(),
        Some("42%")
    );
    assert_eq!(client.query_text(".missing").await.unwrap(), None);
    assert_eq!(
        client
            .query_attribute(r#"[role="progressbar"]"#, "aria-valuenow")
            .await
            .unwrap()
            .as_deref(),
        Some("17")
    );
}

#[tokio::test]
async fn wait_for_load_polls_ready_state() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("POST"))
        .and(path(session_path("/execute/sync")))
        .respond_with(ok(json!("complete")))
        .expect(1)
        .mount(&server)
        .await;

    client.wait_for_load(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn cookies_round_trip_through_the_driver() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    let cookies = json!([
        { "name": "sessionKey", "value": "sk-ant-secret", "domain": ".claude.ai" },
        { "name": "lastActiveOrg", "value": "org-1", "domain": ".claude.ai" }
    ]);
    Mock::given(method("GET"))
        .and(path(session_path("/cookie")))
        .respond_with(ok(cookies.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(session_path("/cookie")))
        .respond_with(ok(json!(null)))
        .expect(2)
        .mount(&server)
        .await;

    let blob = client.export_credentials().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&blob).unwrap();
    assert_eq!(parsed, cookies);

    client.import_credentials(&blob).await.unwrap();
}

#[tokio::test]
async fn rejected_cookie_is_skipped() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("POST"))
        .and(path(session_path("/cookie")))
        .respond_with(w3c_error(400, "invalid cookie domain", "Cookie domain mismatch"))
        .mount(&server)
        .await;

    let blob = serde_json::to_vec(&json!([{ "name": "a", "value": "b" }])).unwrap();
    client.import_credentials(&blob).await.unwrap();
}

#[tokio::test]
async fn dead_session_maps_to_fatal() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("POST"))
        .and(path(session_path("/execute/sync")))
        .respond_with(w3c_error(404, "invalid session id", "session deleted\nbecause browser closed"))
        .mount(&server)
        .await;

    let err = client.visible_text().await.unwrap_err();

    assert_eq!(
        err,
        DriverError::Crashed("invalid session id: session deleted".to_string())
    );
    assert!(err.is_fatal());
    assert_eq!(WatchError::from(err).kind(), ErrorKind::Fatal);
}

#[tokio::test]
async fn failed_navigation_is_retryable() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("POST"))
        .and(path(session_path("/url")))
        .respond_with(w3c_error(500, "unknown error", "net::ERR_NAME_NOT_RESOLVED"))
        .mount(&server)
        .await;

    let err = client.navigate("https://claude.ai/settings/usage").await.unwrap_err();

    assert!(matches!(err, DriverError::Navigation { ref url, .. } if url == "https://claude.ai/settings/usage"));
    assert!(WatchError::from(err).is_retryable());
}

#[tokio::test]
async fn close_deletes_session() {
    let server = MockServer::start().await;
    let mut client = open_client(&server).await;
    Mock::given(method("DELETE"))
        .and(path(session_path("")))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    client.close().await.unwrap();

    assert!(!client.is_open());
    assert_eq!(client.query_text("body").await.unwrap_err(), DriverError::NotOpen);
    // Closing twice is a no-op.
    client.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_is_disconnected() {
    let mut client = WebDriverClient::new("http://127.0.0.1:9", "chrome").unwrap();

    let err = client.open(&LaunchOptions::default()).await.unwrap_err();

    assert!(matches!(err, DriverError::Disconnected { .. }), "{err:?}");
    assert_eq!(WatchError::from(err).kind(), ErrorKind::Fatal);
}
