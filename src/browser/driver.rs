use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::Page;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::instrument;

/// Post-navigation readiness strategy, tried in descending strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavWait {
    NetworkIdle,
    DomContentLoaded,
    Load,
}

impl NavWait {
    pub fn timeout(&self) -> Duration {
        match self {
            NavWait::NetworkIdle => Duration::from_secs(30),
            NavWait::DomContentLoaded => Duration::from_secs(20),
            NavWait::Load => Duration::from_secs(15),
        }
    }

    /// The ladder the executor walks on navigation failures.
    pub fn ladder() -> [NavWait; 3] {
        [NavWait::NetworkIdle, NavWait::DomContentLoaded, NavWait::Load]
    }
}

/// The browser primitives the orchestrator consumes.
///
/// The production implementation is [`CdpDriver`]; tests drive the pipeline
/// with an in-memory scripted implementation.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn goto(&self, url: &str, wait: NavWait) -> Result<()>;
    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    async fn click_selector(&self, selector: &str) -> Result<()>;
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;
    async fn fill(&self, selector: &str, text: &str) -> Result<()>;
    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;
    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<()>;
    async fn screenshot_jpeg(&self, quality: u8) -> Result<Vec<u8>>;
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
}

/// Drives a single Chrome page over the DevTools protocol.
///
/// One browser, one tab, exclusively owned by the queue engine.
pub struct CdpDriver {
    browser: Arc<Mutex<Option<Browser>>>,
    page: Arc<Mutex<Option<Page>>>,
    launch_lock: Mutex<()>,
}

impl CdpDriver {
    pub fn new() -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            page: Arc::new(Mutex::new(None)),
            launch_lock: Mutex::new(()),
        }
    }

    /// Launch Chrome and adopt its startup tab as the single controlled
    /// page.
    #[instrument(skip(self), fields(headless = headless))]
    pub async fn launch(&self, headless: bool) -> Result<()> {
        // Serialize launches so a racing pair cannot spawn two Chromes.
        let _launch_guard = self.launch_lock.lock().await;

        self.close().await.ok();

        // The stock argument set advertises automation to every page the
        // cursor visits; start clean and opt into only what a supervised
        // single-tab session needs.
        let mut config = BrowserConfig::builder().disable_default_args();
        config = if headless {
            config.window_size(1280, 720)
        } else {
            config.with_head().arg("--start-maximized")
        };
        for flag in [
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-infobars",
            "--disable-popup-blocking",
            "--disable-extensions",
            "--disable-sync",
            "--disable-dev-shm-usage",
        ] {
            config = config.arg(flag);
        }
        let config = config
            .build()
            .map_err(|e| anyhow!("Invalid browser config: {}", e))?;

        let (browser, mut handler) = timeout(Duration::from_secs(30), Browser::launch(config))
            .await
            .map_err(|_| anyhow!("Chrome did not come up within 30s"))?
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!("Browser event: {:?}", event);
            }
        });

        // The startup tab can lag the CDP handshake; poll briefly before
        // falling back to opening our own.
        let mut startup_tab = None;
        for _ in 0..10 {
            if let Ok(mut pages) = browser.pages().await {
                if !pages.is_empty() {
                    startup_tab = Some(pages.remove(0));
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let page = match startup_tab {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|e| anyhow!("Failed to open a page: {}", e))?,
        };

        *self.browser.lock().await = Some(browser);
        *self.page.lock().await = Some(page);

        tracing::info!("Browser launched (headless={})", headless);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.page.lock().await.is_some()
    }

    pub async fn close(&self) -> Result<()> {
        if let Some(page) = self.page.lock().await.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.lock().await.take() {
            let _ = browser.close().await;
        }
        Ok(())
    }

    async fn active_page(&self) -> Result<Page> {
        self.page
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("No browser running"))
    }

    /// Poll `document.readyState` until the strategy is satisfied or the
    /// remaining limit runs out.
    async fn wait_ready(&self, page: &Page, wait: NavWait, limit: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + limit;
        let mut last_resources: Option<i64> = None;

        loop {
            let ready_state: String = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|v| v.into_value().ok())
                .unwrap_or_default();

            let dom_ready = match wait {
                NavWait::DomContentLoaded => {
                    ready_state == "interactive" || ready_state == "complete"
                }
                _ => ready_state == "complete",
            };

            if dom_ready {
                if wait != NavWait::NetworkIdle {
                    return Ok(());
                }
                // Network idle: two consecutive samples with a stable
                // resource count, 500ms apart.
                let resources: i64 = page
                    .evaluate("performance.getEntriesByType('resource').length")
                    .await
                    .ok()
                    .and_then(|v| v.into_value().ok())
                    .unwrap_or(0);
                if last_resources == Some(resources) {
                    return Ok(());
                }
                last_resources = Some(resources);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "Navigation wait timed out ({:?} after {}ms)",
                    wait,
                    limit.as_millis()
                ));
            }
            let interval = if wait == NavWait::NetworkIdle { 500 } else { 100 };
            tokio::time::sleep(Duration::from_millis(interval)).await;
        }
    }
}

impl Default for CdpDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for CdpDriver {
    #[instrument(skip(self), fields(url = %url))]
    async fn goto(&self, url: &str, wait: NavWait) -> Result<()> {
        let page = self
            .active_page()
            .await
            .context("Failed to get page for navigation")?;

        let limit = wait.timeout();
        let started = tokio::time::Instant::now();

        timeout(limit, page.goto(url))
            .await
            .map_err(|_| anyhow!("Navigation to {} timed out after {}s", url, limit.as_secs()))?
            .with_context(|| format!("Failed to navigate to {}", url))?;

        let remaining = limit.saturating_sub(started.elapsed());
        self.wait_ready(&page, wait, remaining).await
    }

    async fn url(&self) -> Result<String> {
        let page = self.active_page().await?;
        page.url()
            .await
            .map_err(|e| anyhow!("Failed to get URL: {}", e))?
            .ok_or_else(|| anyhow!("URL is None"))
    }

    async fn title(&self) -> Result<String> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or("").to_string())
    }

    /// JS only measures; the click itself is a trusted CDP input event,
    /// so pages that ignore synthetic `MouseEvent`s still react.
    async fn click_selector(&self, selector: &str) -> Result<()> {
        let probe = format!(
            r#"
            (function() {{
                const el = document.querySelector({sel:?});
                if (!el) return null;
                el.scrollIntoView({{ block: 'center' }});
                const box = el.getBoundingClientRect();
                return [box.x + box.width * 0.5, box.y + box.height * 0.5];
            }})()
            "#,
            sel = selector
        );

        let point = self.evaluate(&probe).await?;
        let center = point.as_array().and_then(|xy| {
            match (xy.first().and_then(|v| v.as_f64()), xy.get(1).and_then(|v| v.as_f64())) {
                (Some(x), Some(y)) => Some((x, y)),
                _ => None,
            }
        });
        let Some((x, y)) = center else {
            return Err(anyhow!("no element matched '{}' to click", selector));
        };

        self.click_at(x, y).await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        let page = self.active_page().await?;

        let mouse_down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow!("Failed to build mouse event: {}", e))?;
        let mouse_up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow!("Failed to build mouse event: {}", e))?;

        page.execute(mouse_down)
            .await
            .map_err(|e| anyhow!("Failed to dispatch mousedown: {}", e))?;
        page.execute(mouse_up)
            .await
            .map_err(|e| anyhow!("Failed to dispatch mouseup: {}", e))?;
        Ok(())
    }

    /// Focus, select-all, replace. Framework listeners see an
    /// `input`/`change` pair, the same shape a paste produces.
    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let script = format!(
            r#"
            (function() {{
                const field = document.querySelector({sel:?});
                if (!field) return false;
                field.focus();
                if (typeof field.select === 'function') {{
                    field.select();
                }}
                field.value = {text:?};
                field.dispatchEvent(new Event('input', {{ bubbles: true }}));
                field.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            sel = selector,
            text = text
        );

        if self.evaluate(&script).await?.as_bool() != Some(true) {
            return Err(anyhow!("no element matched '{}' to type into", selector));
        }
        Ok(())
    }

    /// Matches the wanted option by value or label, case-insensitively,
    /// and reports a short status code back so the error names what was
    /// actually missing.
    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        self.wait_for_visible(selector, Duration::from_secs(2)).await?;

        let script = format!(
            r#"
            (function() {{
                const dropdown = document.querySelector({sel:?});
                if (!dropdown || dropdown.tagName !== 'SELECT') return 'not-a-select';
                const wanted = {value:?}.toLowerCase();
                const index = Array.from(dropdown.options).findIndex(
                    (o) => o.value.toLowerCase() === wanted || o.label.toLowerCase() === wanted
                );
                if (index < 0) return 'no-option';
                dropdown.selectedIndex = index;
                dropdown.dispatchEvent(new Event('input', {{ bubbles: true }}));
                dropdown.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return 'ok';
            }})()
            "#,
            sel = selector,
            value = value
        );

        match self.evaluate(&script).await?.as_str() {
            Some("ok") => Ok(()),
            Some("no-option") => Err(anyhow!(
                "dropdown '{}' has no option matching '{}'",
                selector,
                value
            )),
            _ => Err(anyhow!("no element matched '{}' or it is not a dropdown", selector)),
        }
    }

    async fn wait_for_visible(&self, selector: &str, wait: Duration) -> Result<()> {
        let probe = format!(
            r#"
            (function() {{
                const el = document.querySelector({sel:?});
                if (!el) return false;
                const rect = el.getBoundingClientRect();
                return rect.width > 0 && rect.height > 0 &&
                    getComputedStyle(el).visibility !== 'hidden';
            }})()
            "#,
            sel = selector
        );

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Ok(value) = self.evaluate(&probe).await {
                if value.as_bool() == Some(true) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "Waiting for selector '{}' timed out after {}ms",
                    selector,
                    wait.as_millis()
                ));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn screenshot_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let page = self.active_page().await?;

        // Capture as PNG (lossless) and re-encode at the configured quality.
        let png_bytes = page
            .screenshot(
                chromiumoxide::page::ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| anyhow!("Failed to take screenshot: {}", e))?;

        let img = image::load_from_memory(&png_bytes)
            .map_err(|e| anyhow!("Failed to decode screenshot: {}", e))?;

        let mut jpeg_bytes = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
        img.write_with_encoder(encoder)
            .map_err(|e| anyhow!("Failed to encode screenshot as JPEG: {}", e))?;

        Ok(jpeg_bytes)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let page = self.active_page().await?;
        let result = page
            .evaluate(script)
            .await
            .map_err(|e| anyhow!("Failed to evaluate script: {}", e))?;

        result
            .into_value()
            .map_err(|e| anyhow!("Failed to parse script result: {}", e))
    }
}
