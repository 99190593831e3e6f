//! Render jobs and the job matrix
//!
//! A [`Job`] is one page rendered under one device profile. The matrix is
//! built once per run, before the render pool starts, and never changes.

use crate::{DeviceProfile, DeviceRegistry, WebsnapError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Job {
    /// Page path relative to the content root, with forward slashes
    pub source: String,
    pub target_url: String,
    pub profile: Arc<DeviceProfile>,
}

impl Job {
    pub fn new(source: impl Into<String>, target_url: impl Into<String>, profile: Arc<DeviceProfile>) -> Self {
        Self {
            source: source.into(),
            target_url: target_url.into(),
            profile,
        }
    }

    pub fn alias(&self) -> &str {
        &self.profile.alias
    }

    pub fn output_path(&self, output_root: &Path, extension: &str) -> PathBuf {
        output_path(output_root, &self.source, &self.profile.alias, extension)
    }
}

/// Expand `pages × devices` into jobs: outer loop over pages, inner loop over
/// profiles.
///
/// A page listed twice is rendered twice and the later capture overwrites
/// the earlier one.
pub fn build_job_matrix(
    pages: &[String],
    devices: &DeviceRegistry,
    base_url: &str,
) -> Result<Vec<Job>, WebsnapError> {
    if pages.is_empty() {
        return Err(WebsnapError::EmptyInput);
    }

    let base_url = base_url.trim_end_matches('/');
    let mut jobs = Vec::with_capacity(pages.len() * devices.len());
    let mut seen = HashSet::with_capacity(pages.len());

    for page in pages {
        if !seen.insert(page.as_str()) {
            warn!("{} is listed more than once; its artifacts will be overwritten", page);
        }
        let target_url = format!("{base_url}/{page}");
        for profile in devices.iter() {
            jobs.push(Job::new(page.clone(), target_url.clone(), profile.clone()));
        }
    }

    Ok(jobs)
}

/// Where the artifact for `source` rendered as `alias` is written.
///
/// `about/index.html` with alias `mobile` and extension `.png` lands at
/// `<output_root>/about/index-mobile.png`.
pub fn output_path(output_root: &Path, source: &str, alias: &str, extension: &str) -> PathBuf {
    let source = Path::new(source);
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut path = output_root.to_path_buf();
    if let Some(parent) = source.parent() {
        path.push(parent);
    }
    path.push(format!("{stem}-{alias}{extension}"));
    path
}

/// Terminal state of one job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub output: Option<PathBuf>,
    pub duration: Duration,
    pub error: Option<WebsnapError>,
}

impl JobOutcome {
    pub fn succeeded(job: Job, output: PathBuf, duration: Duration) -> Self {
        Self {
            job,
            output: Some(output),
            duration,
            error: None,
        }
    }

    pub fn failed(job: Job, error: WebsnapError, duration: Duration) -> Self {
        Self {
            job,
            output: None,
            duration,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}
