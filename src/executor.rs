//! Per-job render pipeline
//!
//! Emulate the device, set the media feature, navigate and wait for network
//! quiescence, capture the full page and write it under the output root.
//! Every error is caught here and turned into a failed [`JobOutcome`].

use crate::{
    normalize_extension, ArtifactFormat, Config, Job, JobOutcome, Metrics,
    RenderContext, WaitPolicy, WebsnapError,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info};

pub struct JobExecutor {
    output_root: PathBuf,
    extension: String,
    format: ArtifactFormat,
    media: String,
    wait_policy: WaitPolicy,
    metrics: Metrics,
}

impl JobExecutor {
    pub fn new(config: &Config, output_root: impl Into<PathBuf>) -> Result<Self, WebsnapError> {
        Ok(Self {
            output_root: output_root.into(),
            extension: normalize_extension(&config.extension),
            format: config.artifact_format()?,
            media: config.media.clone(),
            wait_policy: config.wait_policy.clone(),
            metrics: Metrics::new(),
        })
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn output_path(&self, job: &Job) -> PathBuf {
        job.output_path(&self.output_root, &self.extension)
    }

    /// Run `job` on `context`. Never fails: errors come back inside the outcome.
    pub async fn execute<C: RenderContext>(&self, context: &mut C, job: &Job) -> JobOutcome {
        let start_time = Instant::now();
        let output = self.output_path(job);
        self.metrics.job_started();

        let result = self.render(context, job, &output).await;
        let duration = start_time.elapsed();
        self.metrics.record_job(duration, result.is_ok());

        match result {
            Ok(()) => JobOutcome::succeeded(job.clone(), output, duration),
            Err(e) => {
                self.metrics.record_error(e.kind());
                error!("{} ({}) -> {}", job.source, job.alias(), e);
                JobOutcome::failed(job.clone(), e, duration)
            }
        }
    }

    async fn render<C: RenderContext>(
        &self,
        context: &mut C,
        job: &Job,
        output: &Path,
    ) -> Result<(), WebsnapError> {
        context.emulate(&job.profile).await?;
        context.set_media_feature(&self.media).await?;

        let navigation = context.navigate(&job.target_url, &self.wait_policy);
        match timeout(self.wait_policy.timeout, navigation).await {
            Ok(result) => result?,
            Err(_) => return Err(WebsnapError::NavigationTimeout(self.wait_policy.timeout)),
        }

        info!(
            "Capturing {} ({}) -> {}",
            display_path(&job.target_url),
            job.alias(),
            output.display()
        );
        let png_data = context.capture_full_page().await?;
        let artifact = convert_image_format(png_data, self.format)?;

        if let Some(parent) = output.parent() {
            // create_dir_all succeeds when a sibling job created the directory first
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, &artifact).await?;
        debug!("Wrote {} ({} bytes)", output.display(), artifact.len());

        Ok(())
    }
}

fn display_path(target_url: &str) -> String {
    url::Url::parse(target_url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| target_url.to_string())
}

/// Transcode a captured PNG into the configured artifact format.
pub fn convert_image_format(
    png_data: Vec<u8>,
    format: ArtifactFormat,
) -> Result<Vec<u8>, WebsnapError> {
    let target = match format {
        ArtifactFormat::Png => return Ok(png_data),
        ArtifactFormat::Jpeg => image::ImageFormat::Jpeg,
        ArtifactFormat::Webp => image::ImageFormat::WebP,
    };

    let img = image::load_from_memory(&png_data)
        .map_err(|e| WebsnapError::Encode(e.to_string()))?;
    // JPEG has no alpha channel
    let img = match format {
        ArtifactFormat::Jpeg => image::DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };

    let mut encoded = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut encoded), target)
        .map_err(|e| WebsnapError::Encode(e.to_string()))?;

    Ok(encoded)
}
