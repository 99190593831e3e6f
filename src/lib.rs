//! # websnap
//!
//! Renders every page of a static site under several device profiles and
//! writes one image per (page, device) pair.
//!
//! The content root is served over HTTP on a free loopback port, every page
//! is expanded into one job per device profile, and a fixed-size pool of
//! headless Chromium tabs works through the jobs. A job that fails is logged
//! and reported in the run summary; it never stops the other jobs.
//!
//! ## Output layout
//!
//! `about/index.html` rendered with the `mobile` profile is written to
//! `<output>/about/index-mobile.png`. The extension (`.png`, `.jpg`, `.jpeg`
//! or `.webp`) selects the encoding.
//!
//! ## Styling captures
//!
//! Every page is rendered with the emulated media type `websnap` (see
//! `--media`), so a site can hide animations or banners in captures with
//! `@media websnap { ... }`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use websnap::{discover_pages, ChromeLauncher, Config, ContentHost, Scheduler};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pages = discover_pages(Path::new("public"), &config.page_extension)?;
//!
//!     let host = ContentHost::start("public", config.base_port).await?;
//!     let summary = Scheduler::new(config.clone(), "shots")
//!         .run(&pages, host.base_url(), ChromeLauncher::new(config))
//!         .await?;
//!     host.shutdown().await?;
//!
//!     println!("{} of {} captures written", summary.succeeded, summary.total);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! websnap --www public --output shots -N 8 --device desktop --device mobile
//! ```

/// Configuration and settings
pub mod config;

/// Error types and error classification
pub mod error;

/// Device profiles and the device registry
pub mod device;

/// Render jobs, the job matrix and job outcomes
pub mod job;

/// Rendering engine capability traits
pub mod engine;

/// Headless Chromium implementation of the rendering engine
pub mod chrome;

/// Network quiescence tracking
pub mod network_idle;

/// Per-job render pipeline
pub mod executor;

/// Render workers and the render pool
pub mod worker;

/// Run lifecycle and run summary
pub mod scheduler;

/// Page discovery under the content root
pub mod discovery;

/// Local HTTP server for the content root
pub mod content_host;

/// Command-line interface implementation
pub mod cli;

/// Job metrics
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod test_support;


pub use chrome::*;
pub use cli::*;
pub use config::*;
pub use content_host::*;
pub use device::*;
pub use discovery::*;
pub use engine::*;
pub use error::*;
pub use executor::*;
pub use job::*;
pub use self::metrics::*;
pub use network_idle::*;
pub use scheduler::*;
pub use utils::*;
pub use worker::*;
