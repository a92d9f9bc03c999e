//! Snapshot capture: full-page screenshots of each row's website.
//!
//! ## Ownership
//!
//! The browser is an expensive, long-lived resource: launching headless
//! Chrome costs seconds, while a capture costs milliseconds on top. The
//! pipeline therefore never launches a browser itself — the caller owns a
//! [`ChromiumSnapshotter`] (or any other [`SnapshotProvider`]), injects it
//! into the run config, shares it across as many runs as it likes, and
//! releases it with [`ChromiumSnapshotter::close`]. Dropping the handle
//! tears down the spawned CDP event task; the explicit close also asks the
//! browser process to exit cleanly.
//!
//! ## Page lifecycle
//!
//! Every capture opens a fresh page and closes it on all paths, success or
//! failure. chromiumoxide pages have no Drop cleanup — an unclosed page
//! leaks a CDP target in the browser until the whole process exits, so the
//! close is not optional. Only one page is open at a time: rows are strictly
//! sequential and the pipeline awaits each capture before the next.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::EnrichError;

/// How long to wait for network quiescence after navigation commits.
///
/// Pages with long-polling or ad beacons never settle; ten seconds of grace
/// captures the common case without stalling a row for the full navigation
/// timeout. A quiescence miss is logged and the capture proceeds.
const QUIESCENCE_WAIT_SECS: u64 = 10;

/// Errors a snapshot provider can produce for one capture.
///
/// Row context is added by the pipeline when it converts these into
/// [`crate::error::RowError`]s; the provider only knows about URLs.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// The browser could not navigate to the URL at all.
    #[error("navigation to '{url}' failed: {detail}")]
    Navigation { url: String, detail: String },

    /// Navigation did not commit within the configured timeout.
    #[error("navigation to '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Navigation succeeded but the screenshot could not be produced.
    #[error("screenshot failed: {detail}")]
    Capture { detail: String },
}

/// Capability to turn a URL into a full-page raster image on disk.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Capture `url` into a PNG at `output_path`.
    ///
    /// Implementations normalise scheme-less URLs, bound their waits, and
    /// release any per-capture resources on every path.
    async fn capture(&self, url: &str, output_path: &Path) -> Result<PathBuf, SnapshotError>;
}

/// Ensure the URL carries a scheme; bare domains get `https://`.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Configuration for [`ChromiumSnapshotter::launch`].
#[derive(Debug, Clone)]
pub struct SnapshotterConfig {
    /// Path to a Chrome/Chromium/Edge binary. `None` lets chromiumoxide
    /// detect an installed browser.
    pub chrome_executable: Option<PathBuf>,
    /// Viewport width in pixels. Default: 1920.
    pub window_width: u32,
    /// Viewport height in pixels. Default: 1080. The screenshot itself is
    /// full-page regardless; the viewport governs responsive layout.
    pub window_height: u32,
    /// Navigation timeout per capture in seconds. Default: 60.
    pub nav_timeout_secs: u64,
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            window_width: 1920,
            window_height: 1080,
            nav_timeout_secs: 60,
        }
    }
}

/// Production [`SnapshotProvider`] over a headless Chromium browser.
pub struct ChromiumSnapshotter {
    browser: Browser,
    handler_task: JoinHandle<()>,
    nav_timeout_secs: u64,
}

impl ChromiumSnapshotter {
    /// Launch a headless browser and return the capture handle.
    ///
    /// The returned handle spans as many runs as the caller wants; one
    /// browser per application is the intended shape.
    pub async fn launch(config: SnapshotterConfig) -> Result<Self, EnrichError> {
        info!("Launching headless browser...");

        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .window_size(config.window_width, config.window_height)
            .args(vec![
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--hide-scrollbars",
            ]);
        if let Some(ref exe) = config.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        let browser_config = builder
            .build()
            .map_err(|e| EnrichError::Internal(format!("Browser configuration failed: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| EnrichError::Internal(format!("Failed to launch browser: {e}")))?;

        // Drive CDP events in the background for the life of the browser.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        // Give the freshly launched browser a moment to finish target setup.
        sleep(Duration::from_millis(300)).await;

        debug!("Headless browser ready");
        Ok(Self {
            browser,
            handler_task,
            nav_timeout_secs: config.nav_timeout_secs,
        })
    }

    /// Shut the browser down and release the event task.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {e}");
        }
        self.handler_task.abort();
    }

    async fn navigate_and_shoot(
        &self,
        page: &Page,
        url: &str,
        output_path: &Path,
    ) -> Result<PathBuf, SnapshotError> {
        debug!("Navigating to {url}");
        match timeout(Duration::from_secs(self.nav_timeout_secs), page.goto(url)).await {
            Err(_) => {
                return Err(SnapshotError::Timeout {
                    url: url.to_string(),
                    secs: self.nav_timeout_secs,
                })
            }
            Ok(Err(e)) => {
                return Err(SnapshotError::Navigation {
                    url: url.to_string(),
                    detail: e.to_string(),
                })
            }
            Ok(Ok(_)) => {}
        }

        // Bounded quiescence wait. A miss is tolerated: pages that never
        // reach network idle still get captured in whatever state they are.
        match timeout(
            Duration::from_secs(QUIESCENCE_WAIT_SECS),
            page.wait_for_navigation(),
        )
        .await
        {
            Err(_) => warn!("Quiescence wait for {url} timed out; capturing anyway"),
            Ok(Err(e)) => warn!("Quiescence wait for {url} failed ({e}); capturing anyway"),
            Ok(Ok(_)) => {}
        }

        page.save_screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .build(),
            output_path,
        )
        .await
        .map_err(|e| SnapshotError::Capture {
            detail: e.to_string(),
        })?;

        debug!("Snapshot written to {}", output_path.display());
        Ok(output_path.to_path_buf())
    }
}

#[async_trait]
impl SnapshotProvider for ChromiumSnapshotter {
    async fn capture(&self, url: &str, output_path: &Path) -> Result<PathBuf, SnapshotError> {
        let url = normalize_url(url);

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| SnapshotError::Navigation {
                url: url.clone(),
                detail: format!("failed to open page: {e}"),
            })?;

        let result = self.navigate_and_shoot(&page, &url, output_path).await;

        // The page must be closed on every path; an unclosed page is a
        // leaked CDP target in the shared browser.
        if let Err(e) = page.close().await {
            warn!("Failed to close page for {url}: {e}");
        }

        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test double: records capture calls, writes a stub file, and fails on
    /// demand for URLs containing `fail_on`.
    #[derive(Default)]
    pub(crate) struct FakeSnapshotter {
        pub(crate) fail_on: Option<String>,
        pub(crate) captured: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SnapshotProvider for FakeSnapshotter {
        async fn capture(&self, url: &str, output_path: &Path) -> Result<PathBuf, SnapshotError> {
            let url = normalize_url(url);
            if let Some(ref needle) = self.fail_on {
                if url.contains(needle.as_str()) {
                    return Err(SnapshotError::Navigation {
                        url,
                        detail: "connection refused".into(),
                    });
                }
            }
            self.captured.lock().unwrap().push(url);
            std::fs::write(output_path, b"\x89PNG\r\n\x1a\n").map_err(|e| {
                SnapshotError::Capture {
                    detail: e.to_string(),
                }
            })?;
            Ok(output_path.to_path_buf())
        }
    }

    #[test]
    fn normalize_adds_https_scheme() {
        assert_eq!(normalize_url("acme.com"), "https://acme.com");
        assert_eq!(normalize_url("  acme.com "), "https://acme.com");
    }

    #[test]
    fn normalize_keeps_existing_scheme() {
        assert_eq!(normalize_url("http://acme.com"), "http://acme.com");
        assert_eq!(normalize_url("https://acme.com/x"), "https://acme.com/x");
    }

    #[tokio::test]
    async fn fake_snapshotter_writes_and_records() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let out = dir.path().join("shot.png");
        let fake = FakeSnapshotter::default();

        let path = fake.capture("acme.com", &out).await.expect("capture");
        assert_eq!(path, out);
        assert!(out.exists());
        assert_eq!(
            fake.captured.lock().unwrap().as_slice(),
            &["https://acme.com".to_string()]
        );
    }

    #[tokio::test]
    async fn fake_snapshotter_fails_on_matching_url() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let fake = FakeSnapshotter {
            fail_on: Some("broken".into()),
            ..Default::default()
        };
        let err = fake
            .capture("broken.example", &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Navigation { .. }));
    }
}
