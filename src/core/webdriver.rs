//! W3C WebDriver client.
//!
//! Talks to chromedriver / geckodriver over HTTP. DOM queries run as small
//! synchronous scripts so a missing element is `None` rather than an error,
//! and cookies serve as the credential blob.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, ClientBuilder, Method};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::core::driver::{BrowserDriver, DriverError, DriverResult, LaunchOptions, PageHandle};

/// Per-request HTTP timeout; the session controller applies its own bound on top.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

const READY_POLL: Duration = Duration::from_millis(250);

const QUERY_TEXT_JS: &str = "const el = document.querySelector(arguments[0]); \
     return el ? (el.innerText || el.textContent || '').trim() : null;";
const QUERY_ATTRIBUTE_JS: &str =
    "const el = document.querySelector(arguments[0]); return el ? el.getAttribute(arguments[1]) : null;";
const VISIBLE_TEXT_JS: &str = "return document.body ? document.body.innerText : '';";
const READY_STATE_JS: &str = "return document.readyState;";

#[derive(Debug)]
pub struct WebDriverClient {
    client: Client,
    endpoint: String,
    browser_name: String,
    session_id: Option<String>,
}

impl WebDriverClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, browser_name: &str) -> DriverResult<Self> {
        let client = ClientBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .user_agent(format!("usagewatch/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            browser_name: browser_name.to_string(),
            session_id: None,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// New-session capabilities for the configured browser.
    #[must_use]
    pub fn capabilities(&self, options: &LaunchOptions) -> Value {
        let mut args = options.args.clone();
        if let Some(dir) = &options.user_data_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }

        let mut always_match = json!({ "browserName": self.browser_name });
        if self.browser_name.eq_ignore_ascii_case("firefox") {
            if options.headless {
                args.push("-headless".to_string());
            }
            always_match["moz:firefoxOptions"] = json!({ "args": args });
        } else {
            if options.headless {
                args.push("--headless=new".to_string());
            }
            args.push("--disable-blink-features=AutomationControlled".to_string());
            always_match["goog:chromeOptions"] = json!({
                "args": args,
                "excludeSwitches": ["enable-automation"],
            });
        }
        json!({ "capabilities": { "alwaysMatch": always_match } })
    }

    fn session_path(&self, suffix: &str) -> DriverResult<String> {
        let id = self.session_id.as_deref().ok_or(DriverError::NotOpen)?;
        Ok(format!("/session/{id}{suffix}"))
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> DriverResult<Value> {
        let url = format!("{}{path}", self.endpoint);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| DriverError::Protocol(format!("{method} {path}: unreadable response: {e}")))?;

        if status.is_success() {
            tracing::trace!(%method, path, "WebDriver command ok");
            return Ok(payload.get("value").cloned().unwrap_or(Value::Null));
        }
        Err(protocol_error(&payload, status.as_u16()))
    }

    fn transport_error(&self, err: &reqwest::Error) -> DriverError {
        if err.is_connect() {
            DriverError::Disconnected {
                endpoint: self.endpoint.clone(),
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            DriverError::Timeout(format!("no response from {}", self.endpoint))
        } else {
            DriverError::Protocol(err.to_string())
        }
    }

    async fn execute(&self, script: &str, args: Value) -> DriverResult<Value> {
        let path = self.session_path("/execute/sync")?;
        self.command(Method::POST, &path, Some(json!({ "script": script, "args": args })))
            .await
    }

    async fn execute_optional_string(&self, script: &str, args: Value) -> DriverResult<Option<String>> {
        match self.execute(script, args).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }
}

/// Map a W3C error body (`{"value":{"error","message"}}`) to a driver error.
fn protocol_error(payload: &Value, status: u16) -> DriverError {
    let value = payload.get("value").unwrap_or(payload);
    let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();

    match code {
        "invalid session id" | "no such window" | "session not created" => {
            DriverError::Crashed(format!("{code}: {message}"))
        }
        "timeout" | "script timeout" => DriverError::Timeout(message),
        "javascript error" | "no such element" | "stale element reference" => {
            DriverError::Script(format!("{code}: {message}"))
        }
        _ => DriverError::Protocol(format!("HTTP {status} {code}: {message}")),
    }
}

impl PageHandle for WebDriverClient {
    fn current_url(&mut self) -> BoxFuture<'_, DriverResult<String>> {
        async move {
            let path = self.session_path("/url")?;
            match self.command(Method::GET, &path, None).await? {
                Value::String(url) => Ok(url),
                other => Err(DriverError::Protocol(format!("unexpected url value: {other}"))),
            }
        }
        .boxed()
    }

    fn query_text<'a>(&'a mut self, selector: &'a str) -> BoxFuture<'a, DriverResult<Option<String>>> {
        self.execute_optional_string(QUERY_TEXT_JS, json!([selector]))
            .boxed()
    }

    fn query_attribute<'a>(
        &'a mut self,
        selector: &'a str,
        attribute: &'a str,
    ) -> BoxFuture<'a, DriverResult<Option<String>>> {
        self.execute_optional_string(QUERY_ATTRIBUTE_JS, json!([selector, attribute]))
            .boxed()
    }

    fn visible_text(&mut self) -> BoxFuture<'_, DriverResult<String>> {
        async move {
            Ok(self
                .execute_optional_string(VISIBLE_TEXT_JS, json!([]))
                .await?
                .unwrap_or_default())
        }
        .boxed()
    }
}

impl BrowserDriver for WebDriverClient {
    fn open<'a>(&'a mut self, options: &'a LaunchOptions) -> BoxFuture<'a, DriverResult<()>> {
        async move {
            if self.session_id.is_some() {
                return Ok(());
            }
            let body = self.capabilities(options);
            let value = self.command(Method::POST, "/session", Some(body)).await?;
            let id = value
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| DriverError::Protocol("new session response has no sessionId".into()))?;
            tracing::info!(endpoint = %self.endpoint, browser = %self.browser_name, "WebDriver session created");
            self.session_id = Some(id.to_string());
            Ok(())
        }
        .boxed()
    }

    fn is_open(&self) -> bool {
        self.session_id.is_some()
    }

    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        async move {
            let path = self.session_path("/url")?;
            match self.command(Method::POST, &path, Some(json!({ "url": url }))).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_fatal() => Err(e),
                Err(DriverError::Timeout(message)) => Err(DriverError::Timeout(message)),
                Err(e) => Err(DriverError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                }),
            }
        }
        .boxed()
    }

    fn wait_for_load(&mut self, timeout: Duration) -> BoxFuture<'_, DriverResult<()>> {
        async move {
            let deadline = Instant::now() + timeout;
            loop {
                let state = self.execute(READY_STATE_JS, json!([])).await?;
                if state.as_str() == Some("complete") {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(DriverError::Timeout(format!(
                        "page still {state} after {}s",
                        timeout.as_secs()
                    )));
                }
                tokio::time::sleep(READY_POLL).await;
            }
        }
        .boxed()
    }

    fn export_credentials(&mut self) -> BoxFuture<'_, DriverResult<Vec<u8>>> {
        async move {
            let path = self.session_path("/cookie")?;
            let cookies = self.command(Method::GET, &path, None).await?;
            if !cookies.is_array() {
                return Err(DriverError::Protocol("cookie list is not an array".into()));
            }
            serde_json::to_vec(&cookies).map_err(|e| DriverError::Protocol(e.to_string()))
        }
        .boxed()
    }

    fn import_credentials<'a>(&'a mut self, blob: &'a [u8]) -> BoxFuture<'a, DriverResult<()>> {
        async move {
            let path = self.session_path("/cookie")?;
            let cookies: Vec<Value> = serde_json::from_slice(blob)
                .map_err(|e| DriverError::Protocol(format!("stored cookies unreadable: {e}")))?;
            let mut skipped = 0usize;
            for cookie in cookies {
                match self
                    .command(Method::POST, &path, Some(json!({ "cookie": cookie })))
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        skipped += 1;
                        tracing::debug!(error = %e, "Cookie rejected by browser");
                    }
                }
            }
            if skipped > 0 {
                tracing::warn!(skipped, "Some stored cookies could not be restored");
            }
            Ok(())
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        async move {
            let Ok(path) = self.session_path("") else {
                return Ok(());
            };
            let result = self.command(Method::DELETE, &path, None).await.map(|_| ());
            self.session_id = None;
            match result {
                Err(DriverError::Crashed(_)) => Ok(()),
                other => other,
            }
        }
        .boxed()
    }

    fn page(&mut self) -> &mut dyn PageHandle {
        self
    }
}
