//! Rendering engine capabilities
//!
//! The render pool and job executor only talk to the browser through these
//! traits. [`crate::chrome`] implements them on top of Chromium; tests use an
//! instrumented in-memory engine.

use crate::{DeviceProfile, WaitPolicy, WebsnapError};
use async_trait::async_trait;

/// Starts a rendering engine. Consumed by [`crate::RenderPool::launch`].
#[async_trait]
pub trait EngineLauncher: Send {
    type Engine: RenderEngine;

    async fn launch(self) -> Result<Self::Engine, WebsnapError>;
}

/// A running engine that hands out rendering contexts
#[async_trait]
pub trait RenderEngine: Send + Sync + 'static {
    type Context: RenderContext;

    async fn new_context(&self) -> Result<Self::Context, WebsnapError>;

    /// Shut the engine down. Contexts must have been released first.
    async fn close(&self) -> Result<(), WebsnapError>;
}

/// One reusable rendering surface, driven by a single worker at a time
#[async_trait]
pub trait RenderContext: Send + 'static {
    /// Apply viewport, pixel ratio, touch and user agent, replacing whatever
    /// the previous job set.
    async fn emulate(&mut self, profile: &DeviceProfile) -> Result<(), WebsnapError>;

    async fn set_media_feature(&mut self, media: &str) -> Result<(), WebsnapError>;

    /// Load `url` and return once the network is quiet per `policy`.
    ///
    /// Callers bound this with `policy.timeout`; implementations do not need
    /// to enforce it themselves.
    async fn navigate(&mut self, url: &str, policy: &WaitPolicy) -> Result<(), WebsnapError>;

    /// PNG of the whole document, not just the viewport.
    async fn capture_full_page(&mut self) -> Result<Vec<u8>, WebsnapError>;

    async fn release(self) -> Result<(), WebsnapError>;
}
