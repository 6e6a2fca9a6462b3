//! Captures page frames on a fixed cadence and broadcasts only on visible
//! change. A forced capture bypasses the hash check but still records the
//! new hash, so the cadence stays quiet afterwards.

use anyhow::Result;
use base64::Engine;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broadcast::EventBroadcaster;
use crate::browser::Driver;
use crate::events::ServerEvent;

pub struct ScreenshotDiffer {
    driver: Arc<dyn Driver>,
    broadcaster: EventBroadcaster,
    quality: u8,
    interval: Duration,
    last_hash: Mutex<Option<String>>,
    running: AtomicBool,
}

impl ScreenshotDiffer {
    pub fn new(
        driver: Arc<dyn Driver>,
        broadcaster: EventBroadcaster,
        quality: u8,
        interval_ms: u64,
    ) -> Self {
        Self {
            driver,
            broadcaster,
            quality,
            interval: Duration::from_millis(interval_ms),
            last_hash: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Capture one frame. Unchanged frames are suppressed unless `forced`.
    /// Returns the broadcast hash, or `None` when suppressed.
    pub async fn capture(&self, forced: bool) -> Result<Option<String>> {
        let bytes = self.driver.screenshot_jpeg(self.quality).await?;
        let hash = format!("{:x}", md5::compute(&bytes));

        let mut last = self.last_hash.lock().await;
        if !forced && last.as_deref() == Some(hash.as_str()) {
            return Ok(None);
        }
        *last = Some(hash.clone());
        drop(last);

        let url = self.driver.url().await.unwrap_or_default();
        self.broadcaster.publish(ServerEvent::Screenshot {
            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            url,
            timestamp: Utc::now(),
            hash: hash.clone(),
            forced,
        });
        Ok(Some(hash))
    }

    pub async fn last_hash(&self) -> Option<String> {
        self.last_hash.lock().await.clone()
    }

    /// Start the cadence loop. Capture failures (e.g. browser not yet
    /// launched) are logged and skipped.
    pub fn spawn_cadence(self: &Arc<Self>) -> JoinHandle<()> {
        let differ = Arc::clone(self);
        differ.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(differ.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while differ.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(e) = differ.capture(false).await {
                    tracing::trace!("Cadence capture skipped: {}", e);
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Serves a programmable sequence of frames.
    struct FrameDriver {
        frames: StdMutex<Vec<Vec<u8>>>,
    }

    impl FrameDriver {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            Self {
                frames: StdMutex::new(frames),
            }
        }
    }

    #[async_trait]
    impl Driver for FrameDriver {
        async fn goto(&self, _url: &str, _wait: crate::browser::NavWait) -> Result<()> {
            Ok(())
        }
        async fn url(&self) -> Result<String> {
            Ok("https://a.test/".to_string())
        }
        async fn title(&self) -> Result<String> {
            Ok("A".to_string())
        }
        async fn click_selector(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn click_at(&self, _x: f64, _y: f64) -> Result<()> {
            Ok(())
        }
        async fn fill(&self, _selector: &str, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn select_option(&self, _selector: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for_visible(&self, _selector: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn screenshot_jpeg(&self, _quality: u8) -> Result<Vec<u8>> {
            let mut frames = self.frames.lock().unwrap();
            if frames.len() > 1 {
                Ok(frames.remove(0))
            } else {
                frames.first().cloned().ok_or_else(|| anyhow!("no frames"))
            }
        }
        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn differ_with_frames(frames: Vec<Vec<u8>>) -> (ScreenshotDiffer, EventBroadcaster) {
        let broadcaster = EventBroadcaster::new();
        let differ = ScreenshotDiffer::new(
            Arc::new(FrameDriver::new(frames)),
            broadcaster.clone(),
            60,
            1000,
        );
        (differ, broadcaster)
    }

    #[tokio::test]
    async fn identical_frames_are_suppressed() {
        let (differ, broadcaster) = differ_with_frames(vec![vec![1, 2, 3]]);
        let mut rx = broadcaster.subscribe();

        assert!(differ.capture(false).await.unwrap().is_some());
        assert!(differ.capture(false).await.unwrap().is_none());
        assert!(differ.capture(false).await.unwrap().is_none());

        // Exactly one broadcast frame.
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::Screenshot { forced: false, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn changed_frames_broadcast_with_new_hash() {
        let (differ, _broadcaster) = differ_with_frames(vec![vec![1], vec![2]]);
        let first = differ.capture(false).await.unwrap().unwrap();
        let second = differ.capture(false).await.unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn forced_capture_bypasses_suppression() {
        let (differ, broadcaster) = differ_with_frames(vec![vec![9, 9]]);
        let mut rx = broadcaster.subscribe();

        differ.capture(false).await.unwrap();
        let forced = differ.capture(true).await.unwrap();
        assert!(forced.is_some());

        let _baseline = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            ServerEvent::Screenshot { forced, .. } => assert!(forced),
            other => panic!("{:?}", other),
        }
    }
}
