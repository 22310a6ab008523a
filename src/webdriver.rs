//! Minimal W3C WebDriver client driving a locally spawned `chromedriver`.
//!
//! Only the handful of commands the harvest needs are implemented: session
//! lifecycle, navigation, page source, element lookup/state and script
//! execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};

use crate::page::{Locator, PageSource, RevealOutcome, VisibleElement};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f3d6efa6a23";

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("CHROMEDRIVER_PATH is not set; add CHROMEDRIVER_PATH=/path/to/chromedriver to .env")]
    MissingDriverPath,

    #[error("failed to start chromedriver at {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("chromedriver did not become ready within {0:?}")]
    NotReady(Duration),

    #[error("webdriver command `{command}` failed ({error}): {message}")]
    Protocol {
        command: String,
        error: String,
        message: String,
    },

    #[error("unexpected webdriver response to `{0}`")]
    UnexpectedResponse(String),

    #[error("webdriver transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl WebDriverError {
    fn is(&self, code: &str) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == code)
    }

    /// Element lookups that fail this way simply mean "not there (yet)".
    fn is_absent(&self) -> bool {
        self.is("no such element") || self.is("stale element reference")
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub chromedriver_path: Option<PathBuf>,
    pub port: u16,
    pub headless: bool,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub reveal_timeout: Duration,
    pub scroll_pause: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            chromedriver_path: None,
            port: 9515,
            headless: true,
            startup_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            reveal_timeout: Duration::from_secs(7),
            scroll_pause: Duration::from_millis(500),
        }
    }
}

/// A running `chromedriver` process. The process is killed when the value
/// is dropped or [`ChromeDriver::shutdown`] is awaited.
pub struct ChromeDriver {
    child: Child,
    client: Client,
    base_url: String,
    options: DriverOptions,
}

impl ChromeDriver {
    pub async fn spawn(options: &DriverOptions) -> Result<Self, WebDriverError> {
        let path = options
            .chromedriver_path
            .clone()
            .ok_or(WebDriverError::MissingDriverPath)?;

        let child = Command::new(&path)
            .arg(format!("--port={}", options.port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WebDriverError::Spawn {
                path: path.clone(),
                source,
            })?;

        let driver = ChromeDriver {
            child,
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            base_url: format!("http://127.0.0.1:{}", options.port),
            options: options.clone(),
        };
        driver.wait_ready().await?;
        tracing::debug!(port = options.port, "chromedriver ready");
        Ok(driver)
    }

    async fn wait_ready(&self) -> Result<(), WebDriverError> {
        let deadline = Instant::now() + self.options.startup_timeout;
        loop {
            let status = self
                .client
                .get(format!("{}/status", self.base_url))
                .send()
                .await;
            if let Ok(response) = status {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                if body["value"]["ready"].as_bool().unwrap_or(false) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(WebDriverError::NotReady(self.options.startup_timeout));
            }
            sleep(self.options.poll_interval).await;
        }
    }

    /// Starts a browser session and navigates it to `url`.
    pub async fn open(&self, url: &str, load_more: Locator) -> Result<WebDriverPage, WebDriverError> {
        let mut args = vec!["--disable-gpu", "--window-size=1920,1080"];
        if self.options.headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let value = send(
            &self.client,
            Method::POST,
            format!("{}/session", self.base_url),
            Some(capabilities),
        )
        .await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| WebDriverError::UnexpectedResponse("new session".to_string()))?;

        let page = WebDriverPage {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            load_more,
            poll_interval: self.options.poll_interval,
            reveal_timeout: self.options.reveal_timeout,
            scroll_pause: self.options.scroll_pause,
        };
        page.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(page)
    }

    pub async fn shutdown(mut self) {
        if let Err(err) = self.child.kill().await {
            tracing::warn!("failed to stop chromedriver: {err}");
        }
    }
}

async fn send(
    client: &Client,
    method: Method,
    url: String,
    body: Option<Value>,
) -> Result<Value, WebDriverError> {
    let command = format!("{method} {url}");
    let mut request = client.request(method, &url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await?;
    let status = response.status();
    let mut payload: Value = response.json().await?;
    let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(WebDriverError::Protocol {
            command,
            error: value["error"].as_str().unwrap_or("unknown error").to_string(),
            message: value["message"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(value)
}

/// One browser session showing one campaign page.
pub struct WebDriverPage {
    client: Client,
    session_url: String,
    load_more: Locator,
    poll_interval: Duration,
    reveal_timeout: Duration,
    scroll_pause: Duration,
}

impl WebDriverPage {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, WebDriverError> {
        send(&self.client, method, format!("{}{}", self.session_url, path), body).await
    }

    async fn find(&self, locator: &Locator) -> Result<Option<String>, WebDriverError> {
        let (using, value) = match locator {
            Locator::Css(selector) => ("css selector", selector),
            Locator::XPath(expression) => ("xpath", expression),
        };
        match self
            .command(Method::POST, "/element", Some(json!({ "using": using, "value": value })))
            .await
        {
            Ok(found) => found[ELEMENT_KEY]
                .as_str()
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| WebDriverError::UnexpectedResponse("find element".to_string())),
            Err(err) if err.is_absent() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn element_flag(&self, element: &str, flag: &str) -> Result<bool, WebDriverError> {
        match self
            .command(Method::GET, &format!("/element/{element}/{flag}"), None)
            .await
        {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(err) if err.is_absent() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn element_string(&self, element: &str, path: &str) -> Result<String, WebDriverError> {
        let value = self
            .command(Method::GET, &format!("/element/{element}/{path}"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn execute_on(&self, script: &str, element: &str) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [{ ELEMENT_KEY: element }] })),
        )
        .await?;
        Ok(())
    }

    /// Polls until an element matching `locator` is displayed (and enabled,
    /// when `require_enabled`), or the timeout elapses.
    async fn poll_for(
        &self,
        locator: &Locator,
        timeout: Duration,
        require_enabled: bool,
    ) -> Result<Option<String>, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(locator).await? {
                let visible = self.element_flag(&element, "displayed").await?;
                let enabled = !require_enabled || self.element_flag(&element, "enabled").await?;
                if visible && enabled {
                    return Ok(Some(element));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval).await;
        }
    }

    pub async fn close(self) {
        if let Err(err) = self.command(Method::DELETE, "", None).await {
            tracing::warn!("failed to close browser session: {err}");
        }
    }
}

#[async_trait]
impl PageSource for WebDriverPage {
    async fn current_markup(&self) -> anyhow::Result<String> {
        let value = self.command(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn reveal_more(&self) -> anyhow::Result<RevealOutcome> {
        let Some(button) = self
            .poll_for(&self.load_more, self.reveal_timeout, true)
            .await?
        else {
            return Ok(RevealOutcome::Unavailable);
        };

        tracing::debug!("clicking load more");
        self.execute_on("arguments[0].scrollIntoView(true);", &button)
            .await?;
        sleep(self.scroll_pause).await;
        self.execute_on("arguments[0].click();", &button).await?;
        Ok(RevealOutcome::Revealed)
    }

    async fn wait_until_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> anyhow::Result<Option<VisibleElement>> {
        let Some(element) = self.poll_for(locator, timeout, false).await? else {
            return Ok(None);
        };
        Ok(Some(VisibleElement {
            text: self.element_string(&element, "text").await?.trim().to_string(),
            outer_html: self.element_string(&element, "property/outerHTML").await?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_element_errors_are_recognised() {
        let err = WebDriverError::Protocol {
            command: "POST /element".to_string(),
            error: "no such element".to_string(),
            message: "Unable to locate element".to_string(),
        };
        assert!(err.is_absent());

        let err = WebDriverError::Protocol {
            command: "POST /element".to_string(),
            error: "invalid session id".to_string(),
            message: String::new(),
        };
        assert!(!err.is_absent());
    }

    #[tokio::test]
    async fn spawning_without_driver_path_is_a_config_error() {
        let result = ChromeDriver::spawn(&DriverOptions::default()).await;
        assert!(matches!(result, Err(WebDriverError::MissingDriverPath)));
    }

    #[test]
    fn protocol_errors_render_their_code() {
        let err = WebDriverError::Protocol {
            command: "GET /source".to_string(),
            error: "unknown error".to_string(),
            message: "chrome not reachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "webdriver command `GET /source` failed (unknown error): chrome not reachable"
        );
    }
}
