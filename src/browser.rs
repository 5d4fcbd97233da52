//! Chrome ownership and the page-level primitives the action loop needs:
//! navigation with settle waits, in-page script evaluation, value setting,
//! clicking by selector, scrolling and screenshots.

use std::ffi::OsStr;
use std::time::{Duration, Instant};

use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BrowserConfig;
use crate::errors::{AgentError, Result};
use crate::plan::ScrollDirection;

/// Result of a bounded wait for navigation. Timing out is not an error:
/// clicking does not always navigate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Navigated,
    TimedOut,
}

pub struct BrowserSession {
    // Keeps the Chrome process alive for the life of the session.
    _browser: Browser,
    tab: Arc<Tab>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl BrowserSession {
    pub async fn new(config: &BrowserConfig) -> Result<Self> {
        let window_size_arg = format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        );
        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];
        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }
        if config.disable_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .build()
            .map_err(|e| AgentError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| AgentError::LaunchFailed(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AgentError::LaunchFailed(e.to_string()))?;

        info!(headless = config.headless, "browser session started");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    pub fn current_url(&self) -> String {
        self.tab.get_url()
    }

    /// Load a URL and wait for the page to settle.
    pub async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<()> {
        info!(url, "navigating");
        self.tab
            .navigate_to(url)
            .map_err(|e| AgentError::NavigationFailed(e.to_string()))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| AgentError::NavigationFailed(e.to_string()))?;
        self.wait_for_settle(timeout_ms).await
    }

    /// Poll until `document.readyState` reports complete. Evaluation errors
    /// while the page is in transit count as "not settled yet".
    pub async fn wait_for_settle(&self, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Ok(state) = self.ready_state() {
                if state == "complete" {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(AgentError::NavigationFailed(format!(
                    "page did not settle within {}ms",
                    timeout_ms
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Best-effort race between a navigation event and a timeout. Resolves
    /// within the budget either way.
    pub async fn wait_for_navigation_outcome(
        &self,
        prior_url: &str,
        timeout_ms: u64,
    ) -> NavigationOutcome {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.tab.get_url() != prior_url {
                // Let the destination settle with whatever budget remains.
                let remaining = deadline.saturating_duration_since(Instant::now());
                let _ = self.wait_for_settle(remaining.as_millis() as u64).await;
                return NavigationOutcome::Navigated;
            }
            if Instant::now() >= deadline {
                return NavigationOutcome::TimedOut;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn execute_script(&self, script: &str) -> Result<Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| AgentError::JavaScriptFailed(e.to_string()))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    pub async fn title(&self) -> Result<String> {
        let value = self.execute_script("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn outer_html(&self) -> Result<String> {
        let value = self
            .execute_script("document.documentElement.outerHTML")
            .await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AgentError::JavaScriptFailed("page has no outer HTML".to_string()))
    }

    /// Click the first element matching `selector` in-page. `Ok(false)` means
    /// no element matched.
    pub async fn click_selector(&self, selector: &str) -> Result<bool> {
        let script = format!(
            r#"
            (function() {{
                const element = document.querySelector('{}');
                if (element) {{
                    element.click();
                    return true;
                }}
                return false;
            }})()
            "#,
            selector.replace('\'', "\\'")
        );
        let value = self.execute_script(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Set the value of the first element matching `selector` and fire the
    /// input/change events frameworks listen for. No implicit submission.
    /// `Ok(false)` means no element matched.
    pub async fn set_value_selector(&self, selector: &str, value: &str) -> Result<bool> {
        let value_literal = serde_json::to_string(value)?;
        let script = format!(
            r#"
            (function() {{
                const element = document.querySelector('{}');
                if (element) {{
                    element.focus();
                    element.value = {};
                    element.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    element.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    return true;
                }}
                return false;
            }})()
            "#,
            selector.replace('\'', "\\'"),
            value_literal
        );
        let result = self.execute_script(&script).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    pub async fn scroll(&self, direction: ScrollDirection) -> Result<()> {
        let script = match direction {
            ScrollDirection::Down => "window.scrollBy(0, window.innerHeight)",
            ScrollDirection::Up => "window.scrollBy(0, -window.innerHeight)",
            ScrollDirection::Bottom => "window.scrollTo(0, document.body.scrollHeight)",
            ScrollDirection::Top => "window.scrollTo(0, 0)",
        };
        debug!(?direction, "scrolling");
        self.execute_script(script).await?;
        Ok(())
    }

    /// Full-page WebP screenshot, heavily compressed: the image feeds a model
    /// context, not an archive.
    pub async fn screenshot_webp(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(
                headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Webp,
                Some(10),
                None,
                true,
            )
            .map_err(|e| AgentError::ScreenshotFailed(e.to_string()))
    }

    fn ready_state(&self) -> Result<String> {
        let result = self
            .tab
            .evaluate("document.readyState", false)
            .map_err(|e| AgentError::JavaScriptFailed(e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default())
    }
}
