//! In-memory rendering engine for tests
//!
//! Records what every context was asked to do and tracks how many jobs are
//! in flight at the same time. A job is in flight from `emulate` until its
//! capture returns, its navigation fails, or its context goes away.

use crate::{DeviceProfile, EngineLauncher, RenderContext, RenderEngine, WaitPolicy, WebsnapError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Emulation state a context had when it navigated
#[derive(Debug, Clone)]
pub struct RenderRecord {
    pub context_id: usize,
    pub url: String,
    pub alias: String,
    pub user_agent: String,
    pub width: u32,
    pub media: Option<String>,
}

#[derive(Default)]
pub struct StubState {
    fail_navigation: Vec<String>,
    hang_navigation: Vec<String>,
    panic_navigation: Vec<String>,
    fail_contexts: bool,
    navigation_delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    contexts_created: AtomicUsize,
    contexts_released: AtomicUsize,
    closed: AtomicBool,
    records: Mutex<Vec<RenderRecord>>,
}

impl StubState {
    pub fn renders(&self) -> Vec<RenderRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    pub fn contexts_released(&self) -> usize {
        self.contexts_released.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Engine whose contexts never touch a browser. Clones share state.
#[derive(Clone, Default)]
pub struct StubEngine {
    state: Arc<StubState>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut StubState)) -> Self {
        f(Arc::get_mut(&mut self.state).expect("configure the stub before sharing it"));
        self
    }

    /// Navigations to URLs containing `needle` fail.
    pub fn fail_navigation(self, needle: &str) -> Self {
        self.configure(|s| s.fail_navigation.push(needle.to_string()))
    }

    /// Navigations to URLs containing `needle` never finish.
    pub fn hang_navigation(self, needle: &str) -> Self {
        self.configure(|s| s.hang_navigation.push(needle.to_string()))
    }

    /// Navigations to URLs containing `needle` panic.
    pub fn panic_navigation(self, needle: &str) -> Self {
        self.configure(|s| s.panic_navigation.push(needle.to_string()))
    }

    pub fn navigation_delay(self, delay: Duration) -> Self {
        self.configure(|s| s.navigation_delay = delay)
    }

    pub fn fail_contexts(self) -> Self {
        self.configure(|s| s.fail_contexts = true)
    }

    pub fn state(&self) -> &StubState {
        &self.state
    }

    pub fn launcher(&self) -> StubLauncher {
        StubLauncher {
            engine: self.clone(),
            fail: false,
            launched: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl RenderEngine for StubEngine {
    type Context = StubContext;

    async fn new_context(&self) -> Result<StubContext, WebsnapError> {
        if self.state.fail_contexts {
            return Err(WebsnapError::ContextUnavailable("tab crashed".to_string()));
        }
        let id = self.state.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(StubContext {
            id,
            state: self.state.clone(),
            profile: None,
            media: None,
            job: None,
        })
    }

    async fn close(&self) -> Result<(), WebsnapError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct StubLauncher {
    engine: StubEngine,
    fail: bool,
    launched: Arc<AtomicBool>,
}

impl StubLauncher {
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Flag that flips once `launch` has been called.
    pub fn launched_flag(&self) -> Arc<AtomicBool> {
        self.launched.clone()
    }
}

#[async_trait]
impl EngineLauncher for StubLauncher {
    type Engine = StubEngine;

    async fn launch(self) -> Result<StubEngine, WebsnapError> {
        self.launched.store(true, Ordering::SeqCst);
        if self.fail {
            return Err(WebsnapError::PoolLaunch("sandbox unavailable".to_string()));
        }
        Ok(self.engine)
    }
}

pub struct StubContext {
    id: usize,
    state: Arc<StubState>,
    profile: Option<DeviceProfile>,
    media: Option<String>,
    job: Option<InFlight>,
}

/// Counts one job in flight until dropped, so a context released or dropped
/// mid-job still gives its slot back.
struct InFlight(Arc<StubState>);

impl InFlight {
    fn enter(state: Arc<StubState>) -> Self {
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_active.fetch_max(active, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderContext for StubContext {
    async fn emulate(&mut self, profile: &DeviceProfile) -> Result<(), WebsnapError> {
        assert!(
            self.job.is_none(),
            "context {} got a second job before the first finished",
            self.id
        );
        self.job = Some(InFlight::enter(self.state.clone()));
        self.profile = Some(profile.clone());
        Ok(())
    }

    async fn set_media_feature(&mut self, media: &str) -> Result<(), WebsnapError> {
        self.media = Some(media.to_string());
        Ok(())
    }

    async fn navigate(&mut self, url: &str, _policy: &WaitPolicy) -> Result<(), WebsnapError> {
        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| WebsnapError::Emulation("navigate before emulate".to_string()))?;
        self.state.records.lock().unwrap().push(RenderRecord {
            context_id: self.id,
            url: url.to_string(),
            alias: profile.alias.clone(),
            user_agent: profile.user_agent.clone(),
            width: profile.viewport.width,
            media: self.media.clone(),
        });

        if !self.state.navigation_delay.is_zero() {
            tokio::time::sleep(self.state.navigation_delay).await;
        }

        if self.state.hang_navigation.iter().any(|n| url.contains(n.as_str())) {
            futures::future::pending::<()>().await;
        }

        if self.state.panic_navigation.iter().any(|n| url.contains(n.as_str())) {
            panic!("renderer crashed on {url}");
        }

        if self.state.fail_navigation.iter().any(|n| url.contains(n.as_str())) {
            self.job = None;
            return Err(WebsnapError::Navigation(format!(
                "net::ERR_CONNECTION_REFUSED at {url}"
            )));
        }

        Ok(())
    }

    async fn capture_full_page(&mut self) -> Result<Vec<u8>, WebsnapError> {
        let width = self.profile.as_ref().map_or(1, |p| p.viewport.width / 100);
        let artifact = png_bytes(width.max(1), 2);
        self.job = None;
        Ok(artifact)
    }

    async fn release(self) -> Result<(), WebsnapError> {
        self.state.contexts_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([20, 40, 80, 255]));
    let mut encoded = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut encoded),
            image::ImageFormat::Png,
        )
        .unwrap();
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[should_panic(expected = "second job")]
    async fn test_context_rejects_overlapping_jobs() {
        let engine = StubEngine::new();
        let mut context = engine.new_context().await.unwrap();
        context.emulate(&DeviceProfile::desktop()).await.unwrap();
        let _ = context.emulate(&DeviceProfile::mobile()).await;
    }

    #[tokio::test]
    async fn test_job_stays_in_flight_until_capture() {
        let engine = StubEngine::new();
        let mut context = engine.new_context().await.unwrap();

        context.emulate(&DeviceProfile::desktop()).await.unwrap();
        assert_eq!(engine.state().active.load(Ordering::SeqCst), 1);
        context
            .navigate("http://127.0.0.1:1/a.html", &WaitPolicy::default())
            .await
            .unwrap();
        assert_eq!(engine.state().active.load(Ordering::SeqCst), 1);
        context.capture_full_page().await.unwrap();
        assert_eq!(engine.state().active.load(Ordering::SeqCst), 0);

        // Dropping a context mid-job frees its slot
        context.emulate(&DeviceProfile::mobile()).await.unwrap();
        context.release().await.unwrap();
        assert_eq!(engine.state().active.load(Ordering::SeqCst), 0);
        assert_eq!(engine.state().max_active(), 1);
    }
}
