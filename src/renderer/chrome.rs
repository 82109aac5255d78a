//! Chromium-backed page renderer.
//!
//! Launches (or attaches to) a Chrome instance through chromiumoxide and
//! drives a single tab. DOM queries are answered by serialising matching
//! elements to outer HTML inside the page.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserEngineConfig, DomNode, PageRenderer};
use crate::error::RendererError;

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

const SCROLL_TO_BOTTOM_SCRIPT: &str =
    "window.scrollTo(0, Math.max(document.body.scrollHeight, document.documentElement.scrollHeight));";

const HEIGHT_SCRIPT: &str =
    "Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)";

/// Chrome tab driven over the DevTools protocol.
pub struct ChromeRenderer {
    config: BrowserEngineConfig,
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeRenderer {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        // Windows
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    ];

    /// Launch a browser, or attach to `remote_url` when configured.
    pub async fn launch(config: BrowserEngineConfig) -> Result<Self, RendererError> {
        let (browser, handler) = match config.remote_url.clone() {
            Some(remote_url) => Self::connect_remote(&config, &remote_url).await?,
            None => Self::launch_local(&config).await?,
        };

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RendererError::Launch(format!("Failed to open tab: {}", e)))?;

        Ok(Self {
            config,
            browser,
            page,
            handler,
        })
    }

    fn find_chrome() -> Result<PathBuf, RendererError> {
        for path in Self::CHROME_PATHS {
            let p = Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        // Check if in PATH via `which`
        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(RendererError::Launch(
            "Chrome/Chromium not found. Install Chrome, Chromium or Edge, \
             or set browser.remote_url to an existing DevTools endpoint"
                .to_string(),
        ))
    }

    async fn launch_local(
        config: &BrowserEngineConfig,
    ) -> Result<(Browser, JoinHandle<()>), RendererError> {
        info!("Launching browser (headless={})", config.headless);

        let chrome_path = Self::find_chrome()?;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(Duration::from_secs(config.timeout));

        // with_head means NOT headless
        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(ref dir) = config.user_data_dir {
            let expanded = shellexpand::tilde(&dir.to_string_lossy()).to_string();
            builder = builder.user_data_dir(expanded);
        }

        if let Some(ref proxy) = config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio")
            .arg("--autoplay-policy=user-gesture-required")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &config.chrome_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| RendererError::Launch(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RendererError::Launch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(
        config: &BrowserEngineConfig,
        url: &str,
    ) -> Result<(Browser, JoinHandle<()>), RendererError> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, config.timeout
        );

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(Duration::from_secs(config.timeout))
            .send()
            .await
            .map_err(|e| RendererError::Launch(format!("Failed to connect to remote browser: {}", e)))?
            .json()
            .await
            .map_err(|e| RendererError::Launch(format!("Failed to parse browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RendererError::Launch("No webSocketDebuggerUrl in response".to_string()))?;

        info!("Connecting to WebSocket: {}", ws_url);

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(config.timeout),
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| RendererError::Launch(format!("Failed to connect to remote browser: {}", e)))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn evaluate_value<T: serde::de::DeserializeOwned>(
        &self,
        script: String,
    ) -> Result<T, RendererError> {
        let result = self.page.evaluate(script).await.map_err(map_cdp_error)?;
        result
            .into_value::<T>()
            .map_err(|e| RendererError::Script(format!("Unexpected script result: {}", e)))
    }
}

/// Classify a DevTools error. Transport failures and closed targets mean
/// the session is gone; everything else is a page-level script error.
fn map_cdp_error(err: CdpError) -> RendererError {
    match err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            RendererError::SessionLost(err.to_string())
        }
        other => {
            let message = other.to_string();
            if is_closed_target_message(&message) {
                RendererError::SessionLost(message)
            } else {
                RendererError::Script(message)
            }
        }
    }
}

fn is_closed_target_message(message: &str) -> bool {
    const CLOSED: &[&str] = &[
        "Target closed",
        "No target with given id",
        "Session with given id not found",
        "Inspected target navigated or closed",
    ];
    CLOSED.iter().any(|m| message.contains(m))
}

/// Embed a CSS selector in a script as a JS string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn navigate(&mut self, url: &str) -> Result<(), RendererError> {
        info!("Navigating to {}", url);
        let timeout = Duration::from_secs(self.config.timeout);

        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(match map_cdp_error(e) {
                    RendererError::Script(message) => RendererError::Navigation {
                        url: url.to_string(),
                        message,
                    },
                    other => other,
                });
            }
            Err(_) => {
                return Err(RendererError::Navigation {
                    url: url.to_string(),
                    message: format!("timed out after {}s", self.config.timeout),
                });
            }
        }

        match tokio::time::timeout(timeout, self.page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => {
                let err = map_cdp_error(e);
                if err.is_session_lost() {
                    return Err(err);
                }
                debug!("Could not check ready state: {}", err);
            }
            Err(_) => warn!("Timeout waiting for page ready state"),
        }

        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), RendererError> {
        self.execute(SCROLL_TO_BOTTOM_SCRIPT).await
    }

    async fn query(&mut self, selector: &str) -> Result<Vec<DomNode>, RendererError> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(e => e.outerHTML)",
            js_string(selector)
        );
        let html: Vec<String> = self.evaluate_value(script).await?;
        Ok(html.into_iter().map(DomNode::new).collect())
    }

    async fn count(&mut self, selector: &str) -> Result<usize, RendererError> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        );
        self.evaluate_value(script).await
    }

    async fn current_height(&mut self) -> Result<u64, RendererError> {
        self.evaluate_value(HEIGHT_SCRIPT.to_string()).await
    }

    async fn execute(&mut self, script: &str) -> Result<(), RendererError> {
        self.page
            .evaluate(script.to_string())
            .await
            .map_err(map_cdp_error)?;
        Ok(())
    }

    async fn scroll_into_view(&mut self, selector: &str) -> Result<bool, RendererError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (!el) return false; \
             el.scrollIntoView({{block: 'start'}}); return true; }})()",
            js_string(selector)
        );
        self.evaluate_value(script).await
    }

    async fn title(&mut self) -> Result<Option<String>, RendererError> {
        self.page.get_title().await.map_err(map_cdp_error)
    }

    async fn close(&mut self) -> Result<(), RendererError> {
        if self.config.remote_url.is_some() {
            // Leave a shared remote browser running; only drop our tab.
            let _ = self.page.clone().close().await;
        } else if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        self.handler.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_selector() {
        assert_eq!(js_string(".reply-item"), "\".reply-item\"");
        assert_eq!(
            js_string("[class*='review-item']"),
            "\"[class*='review-item']\""
        );
        assert_eq!(js_string("a[title=\"x\"]"), "\"a[title=\\\"x\\\"]\"");
    }

    #[test]
    fn test_closed_target_messages_mean_session_lost() {
        assert!(is_closed_target_message("Error -32000: Target closed."));
        assert!(is_closed_target_message("No target with given id found"));
        assert!(!is_closed_target_message("Uncaught ReferenceError: foo is not defined"));
    }
}
