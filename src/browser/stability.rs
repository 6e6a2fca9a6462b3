use std::time::Duration;

use super::driver::Driver;

/// Hard cap on the post-action stability wait.
pub const STABILITY_CAP: Duration = Duration::from_secs(10);

/// Extra settle time for late-arriving dynamic content.
const DYNAMIC_GRACE: Duration = Duration::from_secs(1);

/// Wait for the page to reach a stable state: DOM ready or network idle,
/// whichever comes first, capped at [`STABILITY_CAP`].
///
/// Never fails; an unresponsive page simply exhausts the cap.
pub async fn wait_for_stability(driver: &dyn Driver, cap: Duration) {
    let deadline = tokio::time::Instant::now() + cap.min(STABILITY_CAP);
    let mut last_resources: Option<i64> = None;

    loop {
        let ready: bool = driver
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.as_str().map(|s| s == "complete" || s == "interactive"))
            .unwrap_or(false);

        if ready {
            break;
        }

        // Network-idle check: resource count unchanged across two samples.
        let resources = driver
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.as_i64());
        if resources.is_some() && resources == last_resources {
            break;
        }
        last_resources = resources;

        if tokio::time::Instant::now() >= deadline {
            tracing::debug!("Page stability wait capped at {:?}", cap);
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    tokio::time::sleep(DYNAMIC_GRACE).await;
}
