use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum WebsnapError {
    #[error("No content paths to render")]
    EmptyInput,

    #[error("No HTML pages found at {root}")]
    NoPagesFound { root: String },

    #[error("Content root unreadable: {0}")]
    ContentRoot(String),

    #[error("No free port available starting from {0}")]
    PortUnavailable(u16),

    #[error("Content host error: {0}")]
    ContentHost(String),

    #[error("Rendering engine launch failed: {0}")]
    PoolLaunch(String),

    #[error("Rendering context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Emulation failed: {0}")]
    Emulation(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Navigation did not settle within {0:?}")]
    NavigationTimeout(Duration),

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: i64 },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Artifact encoding failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Render pool is closed")]
    PoolClosed,

    #[error("Render task panicked: {0}")]
    WorkerPanicked(String),
}

impl WebsnapError {
    /// Fatal errors abort the run before any job executes. Everything else is
    /// contained at the job boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WebsnapError::EmptyInput
                | WebsnapError::NoPagesFound { .. }
                | WebsnapError::ContentRoot(_)
                | WebsnapError::PortUnavailable(_)
                | WebsnapError::ContentHost(_)
                | WebsnapError::PoolLaunch(_)
                | WebsnapError::Configuration(_)
                | WebsnapError::PoolClosed
        )
    }

    /// Whether the rendering context that produced this error should be
    /// thrown away instead of reused for the next job.
    pub fn discards_context(&self) -> bool {
        !matches!(
            self,
            WebsnapError::Io(_) | WebsnapError::Encode(_) | WebsnapError::HttpStatus { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebsnapError::NavigationTimeout(_) => "timeout",
            WebsnapError::Navigation(_) | WebsnapError::HttpStatus { .. } => "navigation",
            WebsnapError::Emulation(_) => "emulation",
            WebsnapError::Capture(_) | WebsnapError::Encode(_) => "capture",
            WebsnapError::Io(_) => "io",
            WebsnapError::ContextUnavailable(_) | WebsnapError::WorkerPanicked(_) => "engine",
            _ => "fatal",
        }
    }
}

impl From<std::io::Error> for WebsnapError {
    fn from(err: std::io::Error) -> Self {
        WebsnapError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for WebsnapError {
    fn from(err: serde_json::Error) -> Self {
        WebsnapError::Configuration(err.to_string())
    }
}
