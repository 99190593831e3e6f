//! Configuration management with serde serialization/deserialization
//!
//! This module holds the run configuration: concurrency, output encoding, the
//! media feature name, the navigation wait policy, Chromium launch settings and
//! the device registry.

use crate::{DeviceRegistry, WebsnapError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for a websnap run
///
/// # Examples
///
/// ```rust
/// use websnap::Config;
///
/// // Use default configuration
/// let config = Config::default();
/// assert_eq!(config.max_concurrency, 4);
///
/// // Create custom configuration
/// let config = Config {
///     max_concurrency: 2,
///     extension: ".webp".to_string(),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of rendering workers running at the same time (default: 4)
    ///
    /// Each worker drives one browser tab, so this is also the number of tabs
    /// open at once.
    pub max_concurrency: usize,

    /// First port probed when looking for a free port for the content host
    /// (default: 8080)
    pub base_port: u16,

    /// Extension of written artifacts, which also selects their encoding
    /// (default: ".png")
    pub extension: String,

    /// Media type emulated on every page (default: "websnap")
    ///
    /// Stylesheets can target it with `@media websnap { ... }` to hide
    /// animations or other content that should not appear in captures.
    pub media: String,

    /// Extension of the pages discovered under the content root (default: "html")
    pub page_extension: String,

    /// When navigation counts as finished
    pub wait_policy: WaitPolicy,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Keep Chromium's sandbox enabled (default: false)
    ///
    /// The sandbox usually cannot start inside containers, which is where
    /// this tool tends to run.
    pub sandbox: bool,

    /// Device profiles every page is rendered with
    pub devices: DeviceRegistry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            base_port: 8080,
            extension: ".png".to_string(),
            media: "websnap".to_string(),
            page_extension: "html".to_string(),
            wait_policy: WaitPolicy::default(),
            chrome_path: None,
            sandbox: false,
            devices: DeviceRegistry::default(),
        }
    }
}

impl Config {
    /// Artifact encoding selected by [`Config::extension`]
    pub fn artifact_format(&self) -> Result<ArtifactFormat, WebsnapError> {
        ArtifactFormat::from_extension(&self.extension).ok_or_else(|| {
            WebsnapError::Configuration(format!(
                "unsupported output extension {:?} (expected .png, .jpg, .jpeg or .webp)",
                self.extension
            ))
        })
    }
}

/// Network quiescence policy used after navigation
///
/// Navigation is complete once no more than `max_inflight` requests have
/// been pending for at least `idle_window`. `timeout` bounds the whole
/// navigation so a stuck page fails its job instead of holding a worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WaitPolicy {
    pub max_inflight: usize,
    pub idle_window: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_inflight: 2,
            idle_window: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Supported artifact encodings
///
/// The rendering engine always captures PNG; other formats are transcoded
/// before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ArtifactFormat {
    /// PNG format - lossless, written as captured
    Png,
    /// JPEG format - lossy compression, smaller files
    Jpeg,
    /// WebP format
    Webp,
}

impl ArtifactFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Prefix `extension` with a dot when it has none.
pub fn normalize_extension(extension: &str) -> String {
    if extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    }
}

pub fn validate_config(config: &Config) -> Result<(), WebsnapError> {
    if config.max_concurrency == 0 {
        return Err(WebsnapError::Configuration(
            "max concurrency must be greater than 0".to_string(),
        ));
    }

    if config.wait_policy.timeout.is_zero() {
        return Err(WebsnapError::Configuration(
            "navigation timeout must be greater than 0".to_string(),
        ));
    }

    if config.devices.is_empty() {
        return Err(WebsnapError::Configuration(
            "at least one device profile is required".to_string(),
        ));
    }

    if let Some(alias) = config.devices.duplicate_alias() {
        return Err(WebsnapError::Configuration(format!(
            "device alias {alias:?} is registered twice"
        )));
    }

    for profile in config.devices.iter() {
        if profile.alias.is_empty() || profile.alias.contains(['/', '\\']) {
            return Err(WebsnapError::Configuration(format!(
                "device alias {:?} cannot be used in file names",
                profile.alias
            )));
        }
        if profile.viewport.width == 0 || profile.viewport.height == 0 {
            return Err(WebsnapError::Configuration(format!(
                "viewport of {:?} must be greater than 0",
                profile.alias
            )));
        }
        if profile.viewport.device_scale_factor <= 0.0 {
            return Err(WebsnapError::Configuration(format!(
                "device scale factor of {:?} must be positive",
                profile.alias
            )));
        }
    }

    config.artifact_format()?;

    Ok(())
}

/// Generate Chromium command-line arguments based on configuration
///
/// # Examples
///
/// ```rust
/// use websnap::{Config, get_chrome_args};
///
/// let args = get_chrome_args(&Config::default());
/// assert!(args.contains(&"--no-sandbox".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
    ];

    if !config.sandbox {
        args.push("--no-sandbox".to_string());
        args.push("--disable-setuid-sandbox".to_string());
        args.push("--no-zygote".to_string());
    }

    args
}

pub fn create_browser_config(
    config: &Config,
    user_data_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, WebsnapError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .user_data_dir(user_data_dir)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(WebsnapError::PoolLaunch)
}
