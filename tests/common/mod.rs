//! A scripted in-memory browser driver. Tests program which selectors are
//! visible, what the candidate harvest returns and how text-based clicks
//! behave, then assert on the recorded interactions.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use webpilot::browser::{Driver, NavWait};

#[derive(Default)]
pub struct SimDriver {
    pub current_url: Mutex<String>,
    pub title: Mutex<String>,
    pub visible: Mutex<HashSet<String>>,
    /// Harvest result served to the selector engine.
    pub candidates: Mutex<serde_json::Value>,
    /// Results for successive text-based click attempts; the last repeats.
    pub text_click_results: Mutex<Vec<bool>>,
    pub frame: Mutex<Vec<u8>>,
    /// Recorded interactions.
    pub navigations: Mutex<Vec<String>>,
    pub clicks: Mutex<Vec<String>>,
    pub fills: Mutex<Vec<(String, String)>>,
    pub coordinate_clicks: Mutex<Vec<(f64, f64)>>,
}

impl SimDriver {
    pub fn new() -> Self {
        let driver = Self::default();
        *driver.current_url.lock().unwrap() = "about:blank".to_string();
        *driver.frame.lock().unwrap() = vec![0xAB];
        *driver.candidates.lock().unwrap() = serde_json::json!([]);
        driver
    }

    pub fn show(&self, selector: &str) {
        self.visible.lock().unwrap().insert(selector.to_string());
    }

    pub fn set_candidates(&self, value: serde_json::Value) {
        *self.candidates.lock().unwrap() = value;
    }

    pub fn set_text_click_results(&self, results: Vec<bool>) {
        *self.text_click_results.lock().unwrap() = results;
    }
}

#[async_trait]
impl Driver for SimDriver {
    async fn goto(&self, url: &str, _wait: NavWait) -> Result<()> {
        *self.current_url.lock().unwrap() = url.to_string();
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.current_url.lock().unwrap().clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.title.lock().unwrap().clone())
    }

    async fn click_selector(&self, selector: &str) -> Result<()> {
        if self.visible.lock().unwrap().contains(selector) {
            self.clicks.lock().unwrap().push(selector.to_string());
            Ok(())
        } else {
            Err(anyhow!("Element not found: {}", selector))
        }
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.coordinate_clicks.lock().unwrap().push((x, y));
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        if self.visible.lock().unwrap().contains(selector) {
            self.fills
                .lock()
                .unwrap()
                .push((selector.to_string(), text.to_string()));
            Ok(())
        } else {
            Err(anyhow!("Element not found: {}", selector))
        }
    }

    async fn select_option(&self, selector: &str, _value: &str) -> Result<()> {
        if self.visible.lock().unwrap().contains(selector) {
            Ok(())
        } else {
            Err(anyhow!("Element not found: {}", selector))
        }
    }

    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<()> {
        if self.visible.lock().unwrap().contains(selector) {
            Ok(())
        } else {
            Err(anyhow!(
                "Waiting for selector '{}' timed out after {}ms",
                selector,
                timeout.as_millis()
            ))
        }
    }

    async fn screenshot_jpeg(&self, _quality: u8) -> Result<Vec<u8>> {
        Ok(self.frame.lock().unwrap().clone())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        if script.contains("document.readyState") {
            return Ok(serde_json::json!("complete"));
        }
        if script.contains("getEntriesByType") {
            return Ok(serde_json::json!(0));
        }
        if script.contains("nthCounter") {
            return Ok(self.candidates.lock().unwrap().clone());
        }
        if script.contains("haystacks") {
            let mut results = self.text_click_results.lock().unwrap();
            let result = if results.len() > 1 {
                results.remove(0)
            } else {
                results.first().copied().unwrap_or(false)
            };
            return Ok(serde_json::json!(result));
        }
        Ok(serde_json::Value::Null)
    }
}

/// A login-page harvest: username input, password input, submit button.
pub fn login_candidates() -> serde_json::Value {
    serde_json::json!([
        {
            "tag": "input", "id": "username", "name": "username",
            "inputType": "text", "placeholder": "Username",
            "x": 100.0, "y": 180.0, "width": 200.0, "height": 30.0,
            "tabindex": 0, "nthOfType": 1
        },
        {
            "tag": "input", "id": "pass", "name": "password",
            "inputType": "password",
            "x": 100.0, "y": 230.0, "width": 200.0, "height": 30.0,
            "tabindex": 0, "nthOfType": 2
        },
        {
            "tag": "button", "id": "login-btn", "text": "Login",
            "inputType": "submit", "clickable": true,
            "x": 100.0, "y": 280.0, "width": 100.0, "height": 40.0,
            "tabindex": 0, "nthOfType": 1
        }
    ])
}
