//! Chromium rendering engine
//!
//! One headless Chromium process per run; every rendering context is a tab in
//! that browser. Emulation, media and capture go through the Chrome DevTools
//! Protocol via `chromiumoxide`.

use crate::network_idle::NetworkIdleTracker;
use crate::{
    create_browser_config, Config, DeviceProfile, EngineLauncher, RenderContext, RenderEngine,
    Viewport, WaitPolicy, WebsnapError,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetEmulatedMediaParams, SetTouchEmulationEnabledParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    type Engine = ChromeEngine;

    async fn launch(self) -> Result<ChromeEngine, WebsnapError> {
        // Unique profile directory so concurrent runs never share a browser singleton
        let user_data_dir = std::env::temp_dir().join(format!(
            "websnap-chromium-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|e| WebsnapError::PoolLaunch(format!("failed to create user data dir: {e}")))?;

        let browser_config = create_browser_config(&self.config, &user_data_dir)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| WebsnapError::PoolLaunch(e.to_string()))?;

        // The handler drives all CDP traffic and must be polled for the browser to work
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
            debug!("CDP handler stream ended");
        });

        info!("Chromium launched (profile {})", user_data_dir.display());

        Ok(ChromeEngine {
            browser: Mutex::new(browser),
            handler: Mutex::new(Some(handler_task)),
            user_data_dir,
        })
    }
}

pub struct ChromeEngine {
    browser: Mutex<Browser>,
    handler: Mutex<Option<JoinHandle<()>>>,
    user_data_dir: PathBuf,
}

#[async_trait]
impl RenderEngine for ChromeEngine {
    type Context = ChromeContext;

    async fn new_context(&self) -> Result<ChromeContext, WebsnapError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| WebsnapError::ContextUnavailable(e.to_string()))?
        };

        page.execute(EnableParams::default())
            .await
            .map_err(|e| WebsnapError::ContextUnavailable(e.to_string()))?;

        Ok(ChromeContext {
            page,
            profile: None,
        })
    }

    async fn close(&self) -> Result<(), WebsnapError> {
        info!("Shutting down Chromium...");
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("Chromium did not close cleanly: {}", e);
            }
            let _ = browser.wait().await;
        }

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(
                "Could not remove Chromium profile {}: {}",
                self.user_data_dir.display(),
                e
            );
        }

        Ok(())
    }
}

/// A browser tab reused across jobs
pub struct ChromeContext {
    page: Page,
    /// Profile applied by the last `emulate`
    profile: Option<DeviceProfile>,
}

impl ChromeContext {
    async fn apply_metrics(&self, viewport: &Viewport, height: u32) -> Result<(), String> {
        let params = device_metrics(viewport, height)?;
        self.page.execute(params).await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Device metrics override for `viewport`, stretched to `height` CSS pixels.
fn device_metrics(
    viewport: &Viewport,
    height: u32,
) -> Result<SetDeviceMetricsOverrideParams, String> {
    SetDeviceMetricsOverrideParams::builder()
        .width(viewport.width)
        .height(height)
        .device_scale_factor(viewport.device_scale_factor)
        .mobile(viewport.mobile)
        .build()
}

/// Height of a full-page capture: the whole document, never less than the viewport.
fn full_page_height(content_height: f64, viewport_height: u32) -> u32 {
    if !content_height.is_finite() || content_height <= 0.0 {
        return viewport_height;
    }
    (content_height.ceil() as u32).max(viewport_height)
}

#[async_trait]
impl RenderContext for ChromeContext {
    async fn emulate(&mut self, profile: &DeviceProfile) -> Result<(), WebsnapError> {
        let viewport = &profile.viewport;
        self.profile = None;

        self.apply_metrics(viewport, viewport.height)
            .await
            .map_err(WebsnapError::Emulation)?;

        self.page
            .execute(SetTouchEmulationEnabledParams::new(viewport.has_touch))
            .await
            .map_err(|e| WebsnapError::Emulation(e.to_string()))?;

        self.page
            .execute(SetUserAgentOverrideParams::new(profile.user_agent.clone()))
            .await
            .map_err(|e| WebsnapError::Emulation(e.to_string()))?;

        self.profile = Some(profile.clone());
        Ok(())
    }

    async fn set_media_feature(&mut self, media: &str) -> Result<(), WebsnapError> {
        let params = SetEmulatedMediaParams::builder().media(media).build();

        self.page
            .execute(params)
            .await
            .map_err(|e| WebsnapError::Emulation(e.to_string()))?;

        Ok(())
    }

    async fn navigate(&mut self, url: &str, policy: &WaitPolicy) -> Result<(), WebsnapError> {
        let nav_err = |e: chromiumoxide::error::CdpError| WebsnapError::Navigation(e.to_string());

        // Subscribe before navigating so no request of this load is missed
        let mut started = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(nav_err)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(nav_err)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(nav_err)?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(nav_err)?;

        self.page.goto(url).await.map_err(nav_err)?;

        let mut tracker =
            NetworkIdleTracker::new(policy.max_inflight, policy.idle_window, Instant::now());
        // Redirects do not produce a response event, so the first document
        // response is the final navigation response.
        let mut document_status = None;

        loop {
            let idle = sleep_until_idle(tracker.idle_deadline());
            tokio::select! {
                biased;
                Some(event) = started.next() => {
                    tracker.request_started(event.request_id.clone(), Instant::now());
                }
                Some(event) = finished.next() => {
                    tracker.request_finished(&event.request_id, Instant::now());
                }
                Some(event) = failed.next() => {
                    tracker.request_finished(&event.request_id, Instant::now());
                }
                Some(event) = responses.next() => {
                    if document_status.is_none() && event.r#type == ResourceType::Document {
                        document_status = Some(event.response.status);
                    }
                }
                _ = idle => break,
            }
        }

        debug!(
            "Network idle for {} ({} requests still pending)",
            url,
            tracker.inflight()
        );

        match document_status {
            Some(status) if (200..300).contains(&status) => Ok(()),
            Some(status) => Err(WebsnapError::HttpStatus {
                url: url.to_string(),
                status,
            }),
            None => Err(WebsnapError::Navigation(format!(
                "{url} produced no document response"
            ))),
        }
    }

    async fn capture_full_page(&mut self) -> Result<Vec<u8>, WebsnapError> {
        let viewport = self
            .profile
            .as_ref()
            .map(|p| p.viewport.clone())
            .ok_or_else(|| WebsnapError::Capture("capture before emulate".to_string()))?;

        let layout = self
            .page
            .layout_metrics()
            .await
            .map_err(|e| WebsnapError::Capture(e.to_string()))?;
        let height = full_page_height(layout.css_content_size.height, viewport.height);

        // Stretch the viewport over the document at the profile's pixel ratio
        self.apply_metrics(&viewport, height)
            .await
            .map_err(WebsnapError::Capture)?;

        let screenshot_params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(false)
            .capture_beyond_viewport(true)
            .build();
        let captured = self
            .page
            .screenshot(screenshot_params)
            .await
            .map_err(|e| WebsnapError::Capture(e.to_string()));

        let restored = self.apply_metrics(&viewport, viewport.height).await;
        let artifact = captured?;
        restored.map_err(WebsnapError::Capture)?;
        Ok(artifact)
    }

    async fn release(self) -> Result<(), WebsnapError> {
        self.page
            .close()
            .await
            .map_err(|e| WebsnapError::ContextUnavailable(e.to_string()))
    }
}

async fn sleep_until_idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => futures::future::pending::<()>().await,
    }
}
