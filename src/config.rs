use std::env;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    /// Launch Chrome without a visible window.
    pub headless: bool,
    /// JPEG quality for broadcast frames (1-100).
    pub screenshot_quality: u8,
    /// Cadence of the screenshot differ in milliseconds.
    pub screenshot_interval_ms: u64,
    /// Settle interval between queue steps in milliseconds.
    pub settle_ms: u64,
    /// Attempts per action before the failure escapes to the queue.
    pub max_retries: u32,
    /// When set, a failed fill/type step is skipped instead of pausing the queue.
    pub skip_failed_fill: bool,
    /// LLM model id (genai auto-detects the provider from the prefix).
    /// None disables AI parsing and fallback entirely.
    pub llm_model: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8765),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            headless: env_flag("WEBPILOT_HEADLESS", false),
            screenshot_quality: env::var("WEBPILOT_SCREENSHOT_QUALITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|q| (1..=100).contains(q))
                .unwrap_or(60),
            screenshot_interval_ms: env::var("WEBPILOT_SCREENSHOT_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            settle_ms: env::var("WEBPILOT_SETTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            max_retries: env::var("WEBPILOT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            skip_failed_fill: env_flag("WEBPILOT_SKIP_FAILED_FILL", false),
            llm_model: env::var("WEBPILOT_LLM_MODEL").ok().filter(|m| !m.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8765,
            host: "127.0.0.1".to_string(),
            headless: false,
            screenshot_quality: 60,
            screenshot_interval_ms: 1000,
            settle_ms: 500,
            max_retries: 3,
            skip_failed_fill: false,
            llm_model: None,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
