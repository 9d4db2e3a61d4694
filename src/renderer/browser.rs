//! Shared browser lifecycle.
//!
//! One Chrome instance serves all render jobs; the handle relaunches it
//! when page creation fails (browser crash, closed socket). Created at
//! service start and disposed at shutdown, with no module-level
//! browser state anywhere.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use futures::StreamExt;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};

use crate::error::RenderError;

struct BrowserInstance {
    browser: Browser,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
}

/// Lazily launched, shared browser with relaunch-on-failure
pub struct BrowserHandle {
    headless: bool,
    executable: Option<PathBuf>,
    instance: Mutex<Option<BrowserInstance>>,
}

impl BrowserHandle {
    #[must_use]
    pub fn new(headless: bool, executable: Option<PathBuf>) -> Self {
        Self {
            headless,
            executable,
            instance: Mutex::new(None),
        }
    }

    /// Open a fresh page, launching or relaunching the browser as needed.
    ///
    /// A page-creation failure on a live instance is taken as a browser
    /// crash: the instance is torn down and one relaunch is attempted
    /// before giving up.
    pub async fn new_page(&self) -> Result<Page, RenderError> {
        let mut slot = self.instance.lock().await;

        if slot.is_none() {
            *slot = Some(self.launch().await.map_err(|e| {
                RenderError::Browser(format!("launch failed: {e:#}"))
            })?);
        }

        if let Some(instance) = slot.as_ref() {
            match instance.browser.new_page("about:blank").await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    warn!("page creation failed ({e}), relaunching browser");
                    if let Some(dead) = slot.take() {
                        teardown(dead).await;
                    }
                }
            }
        }

        let instance = self.launch().await.map_err(|e| {
            RenderError::Browser(format!("relaunch failed: {e:#}"))
        })?;
        let page = instance
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Browser(format!("page creation failed: {e}")))?;
        *slot = Some(instance);
        Ok(page)
    }

    /// Close the browser and reap its process
    pub async fn shutdown(&self) {
        let mut slot = self.instance.lock().await;
        if let Some(instance) = slot.take() {
            teardown(instance).await;
        }
    }

    async fn launch(&self) -> Result<BrowserInstance> {
        let chrome_path = match &self.executable {
            Some(path) => path.clone(),
            None => find_browser_executable()?,
        };

        let user_data_dir =
            std::env::temp_dir().join(format!("snapkit_chrome_{}", std::process::id()));
        std::fs::create_dir_all(&user_data_dir)
            .context("Failed to create user data directory")?;

        let mut config_builder = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .window_size(1920, 1080)
            .user_data_dir(user_data_dir.clone())
            .chrome_executable(chrome_path);

        if self.headless {
            config_builder = config_builder.headless_mode(HeadlessMode::default());
        } else {
            config_builder = config_builder.with_head();
        }

        config_builder = config_builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-notifications")
            .arg("--disable-background-networking")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg("--mute-audio");

        let browser_config = config_builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        info!("Launching browser");
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = task::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    let msg = e.to_string();
                    // Chrome sends CDP events chromiumoxide doesn't model;
                    // those deserialization misses are not real failures
                    if !msg.contains("data did not match any variant of untagged enum Message") {
                        warn!("Browser handler error: {e:?}");
                    }
                }
            }
            debug!("Browser handler task completed");
        });

        Ok(BrowserInstance {
            browser,
            handler_task,
            user_data_dir,
        })
    }
}

async fn teardown(mut instance: BrowserInstance) {
    if let Err(e) = instance.browser.close().await {
        warn!("Failed to close browser: {e}");
    }
    if let Err(e) = instance.browser.wait().await {
        warn!("Failed to wait for browser exit: {e}");
    }
    instance.handler_task.abort();
    if let Err(e) = std::fs::remove_dir_all(&instance.user_data_dir) {
        debug!("Failed to remove browser data directory: {e}");
    }
}

/// Find a Chrome/Chromium executable on the system
fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to non-existent file: {}",
            path.display()
        );
    }

    let paths = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for path_str in paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = Command::new("which").arg(cmd).output()
            && output.status.success()
        {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                let path = PathBuf::from(path_str);
                info!("Found browser using 'which': {}", path.display());
                return Ok(path);
            }
        }
    }

    Err(anyhow::anyhow!("Chrome/Chromium executable not found"))
}
