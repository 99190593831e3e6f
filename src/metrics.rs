use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use std::time::Duration;

/// Job-level counters. No recorder is installed by the binary, so these are
/// no-ops unless an embedding application installs one.
pub struct Metrics {
    pub jobs_succeeded: Counter,
    pub jobs_failed: Counter,
    pub job_duration: Histogram,
    pub active_jobs: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_succeeded: register_counter!("websnap_jobs_succeeded_total"),
            jobs_failed: register_counter!("websnap_jobs_failed_total"),
            job_duration: register_histogram!("websnap_job_duration_seconds"),
            active_jobs: register_gauge!("websnap_active_jobs"),
        }
    }

    pub fn job_started(&self) {
        self.active_jobs.increment(1.0);
    }

    pub fn record_job(&self, duration: Duration, success: bool) {
        self.active_jobs.decrement(1.0);

        if success {
            self.jobs_succeeded.increment(1);
        } else {
            self.jobs_failed.increment(1);
        }

        self.job_duration.record(duration.as_secs_f64());
    }

    pub fn record_error(&self, error_kind: &'static str) {
        register_counter!("websnap_job_errors_total", "kind" => error_kind).increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
