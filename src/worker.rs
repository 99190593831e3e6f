use crate::{EngineLauncher, Job, JobExecutor, JobOutcome, RenderContext, RenderEngine, WebsnapError};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One slot of the render pool. Owns at most one rendering context at a time
/// and never shares it with another job.
pub struct RenderWorker<E: RenderEngine> {
    id: usize,
    engine: Arc<E>,
    executor: Arc<JobExecutor>,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl<E: RenderEngine> RenderWorker<E> {
    pub fn new(id: usize, engine: Arc<E>, executor: Arc<JobExecutor>) -> Self {
        Self {
            id,
            engine,
            executor,
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pull jobs until the queue is closed and empty.
    ///
    /// The outcome of a job is published before the pending counter drops, so
    /// once the pool is idle every outcome is already in the outcome channel.
    pub async fn run_with_shared_receiver(
        &self,
        jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
        outcomes: mpsc::UnboundedSender<JobOutcome>,
        pending: Arc<watch::Sender<usize>>,
    ) {
        debug!("Starting render worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        let mut context: Option<E::Context> = None;

        loop {
            let job = {
                let mut receiver = jobs.lock().await;
                receiver.recv().await
            };

            let Some(job) = job else { break };

            let outcome = self.process_job(&mut context, job).await;

            if outcome.success() {
                self.processed_count.fetch_add(1, Ordering::Relaxed);
            } else {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }

            if outcomes.send(outcome).is_err() {
                warn!("Worker {} has nowhere to report outcomes", self.id);
            }
            pending.send_modify(|count| *count = count.saturating_sub(1));
        }

        if let Some(context) = context.take() {
            if let Err(e) = context.release().await {
                debug!("Worker {} failed to release its context: {}", self.id, e);
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        debug!("Render worker {} stopped", self.id);
    }

    async fn process_job(&self, slot: &mut Option<E::Context>, job: Job) -> JobOutcome {
        let start_time = Instant::now();

        let attempt = AssertUnwindSafe(self.execute_in_context(slot, &job))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(outcome)) => {
                if outcome.error.as_ref().is_some_and(|e| e.discards_context()) {
                    self.discard_context(slot).await;
                }
                outcome
            }
            Ok(Err(e)) => {
                error!("{} ({}) -> {}", job.source, job.alias(), e);
                JobOutcome::failed(job, e, start_time.elapsed())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Worker {} panicked on {} ({}): {}", self.id, job.source, job.alias(), message);
                // A context that was mid-job when the task panicked is not reused
                self.discard_context(slot).await;
                JobOutcome::failed(job, WebsnapError::WorkerPanicked(message), start_time.elapsed())
            }
        }
    }

    async fn execute_in_context(
        &self,
        slot: &mut Option<E::Context>,
        job: &Job,
    ) -> Result<JobOutcome, WebsnapError> {
        if slot.is_none() {
            debug!("Worker {} opening a rendering context", self.id);
            *slot = Some(self.engine.new_context().await?);
        }

        let Some(context) = slot.as_mut() else {
            return Err(WebsnapError::ContextUnavailable(format!(
                "worker {} has no context",
                self.id
            )));
        };

        Ok(self.executor.execute(context, job).await)
    }

    async fn discard_context(&self, slot: &mut Option<E::Context>) {
        if let Some(context) = slot.take() {
            debug!("Worker {} discarding its rendering context", self.id);
            if let Err(e) = context.release().await {
                debug!("Worker {} failed to release its context: {}", self.id, e);
            }
        }
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running.load(Ordering::Relaxed),
            processed_count: self.processed_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

impl<E: RenderEngine> Clone for RenderWorker<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            engine: self.engine.clone(),
            executor: self.executor.clone(),
            is_running: self.is_running.clone(),
            processed_count: self.processed_count.clone(),
            error_count: self.error_count.clone(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub worker_stats: Vec<WorkerStats>,
    /// Jobs submitted but not yet in a terminal state
    pub pending: usize,
    pub total_processed: usize,
    pub total_errors: usize,
    pub active_workers: usize,
}

/// Fixed-size pool of render workers sharing one engine
///
/// `submit` never waits for a free worker: jobs queue up in an unbounded
/// channel and are dispatched in submission order. `idle` is the only
/// synchronization point.
pub struct RenderPool<E: RenderEngine> {
    engine: Arc<E>,
    workers: Vec<RenderWorker<E>>,
    handles: Vec<JoinHandle<()>>,
    job_sender: Option<mpsc::UnboundedSender<Job>>,
    outcome_receiver: mpsc::UnboundedReceiver<JobOutcome>,
    pending: Arc<watch::Sender<usize>>,
}

impl<E: RenderEngine> RenderPool<E> {
    pub async fn launch<L>(
        launcher: L,
        max_concurrency: usize,
        executor: JobExecutor,
    ) -> Result<Self, WebsnapError>
    where
        L: EngineLauncher<Engine = E>,
    {
        if max_concurrency == 0 {
            return Err(WebsnapError::Configuration(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        let engine = launcher.launch().await.map_err(|e| match e {
            WebsnapError::PoolLaunch(_) => e,
            other => WebsnapError::PoolLaunch(other.to_string()),
        })?;
        let engine = Arc::new(engine);
        let executor = Arc::new(executor);

        let (job_sender, job_receiver) = mpsc::unbounded_channel();
        let (outcome_sender, outcome_receiver) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        // Share the receiver among workers using Arc<Mutex>
        let shared_receiver = Arc::new(Mutex::new(job_receiver));

        let mut workers = Vec::with_capacity(max_concurrency);
        let mut handles = Vec::with_capacity(max_concurrency);

        for id in 0..max_concurrency {
            let worker = RenderWorker::new(id, engine.clone(), executor.clone());
            let worker_clone = worker.clone();
            let rx = shared_receiver.clone();
            let tx = outcome_sender.clone();
            let pending = pending.clone();

            handles.push(tokio::spawn(async move {
                worker_clone.run_with_shared_receiver(rx, tx, pending).await;
            }));
            workers.push(worker);
        }

        info!("Render pool started with {} workers", max_concurrency);

        Ok(Self {
            engine,
            workers,
            handles,
            job_sender: Some(job_sender),
            outcome_receiver,
            pending,
        })
    }

    pub fn submit(&self, job: Job) -> Result<(), WebsnapError> {
        let sender = self.job_sender.as_ref().ok_or(WebsnapError::PoolClosed)?;

        self.pending.send_modify(|count| *count += 1);
        if sender.send(job).is_err() {
            self.pending.send_modify(|count| *count = count.saturating_sub(1));
            return Err(WebsnapError::PoolClosed);
        }

        Ok(())
    }

    /// Wait until every submitted job has succeeded or failed. Returns
    /// immediately when nothing is pending.
    pub async fn idle(&self) {
        let mut pending = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    /// Outcomes reported since the last call, in completion order.
    pub fn drain_outcomes(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcome_receiver.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn stats(&self) -> PoolStats {
        let worker_stats: Vec<WorkerStats> = self.workers.iter().map(|w| w.get_stats()).collect();

        PoolStats {
            pending: *self.pending.borrow(),
            total_processed: worker_stats.iter().map(|w| w.processed_count).sum(),
            total_errors: worker_stats.iter().map(|w| w.error_count).sum(),
            active_workers: worker_stats.iter().filter(|w| w.is_running).count(),
            worker_stats,
        }
    }

    /// Stop the workers, release their contexts and shut the engine down.
    ///
    /// Call after [`RenderPool::idle`]; queued jobs are still run first.
    pub async fn close(mut self) -> Result<(), WebsnapError> {
        self.job_sender.take();

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Render worker task failed: {}", e);
            }
        }

        self.engine.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubEngine;
    use crate::{Config, DeviceProfile};
    use std::time::Duration;

    fn job(source: &str) -> Job {
        Job::new(
            source,
            format!("http://127.0.0.1:1/{source}"),
            Arc::new(DeviceProfile::desktop()),
        )
    }

    fn executor(dir: &std::path::Path) -> JobExecutor {
        JobExecutor::new(&Config::default(), dir).unwrap()
    }

    #[tokio::test]
    async fn test_idle_with_no_jobs_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new();
        let pool = RenderPool::launch(engine.launcher(), 2, executor(dir.path()))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), pool.idle())
            .await
            .expect("idle should return at once");
        pool.close().await.unwrap();
        assert!(engine.state().is_closed());
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = RenderPool::launch(StubEngine::new().launcher(), 0, executor(dir.path())).await;
        assert!(matches!(result, Err(WebsnapError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_contexts_are_reused_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new();
        let mut pool = RenderPool::launch(engine.launcher(), 1, executor(dir.path()))
            .await
            .unwrap();

        for page in ["a.html", "b.html", "c.html"] {
            pool.submit(job(page)).unwrap();
        }
        pool.idle().await;

        assert_eq!(pool.drain_outcomes().len(), 3);
        let stats = pool.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.total_errors, 0);

        pool.close().await.unwrap();
        assert_eq!(engine.state().contexts_created(), 1);
        assert_eq!(engine.state().contexts_released(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_discards_context() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new().fail_navigation("broken");
        let mut pool = RenderPool::launch(engine.launcher(), 1, executor(dir.path()))
            .await
            .unwrap();

        pool.submit(job("broken.html")).unwrap();
        pool.submit(job("fine.html")).unwrap();
        pool.idle().await;

        let outcomes = pool.drain_outcomes();
        assert_eq!(outcomes.iter().filter(|o| o.success()).count(), 1);
        pool.close().await.unwrap();

        let renders = engine.state().renders();
        assert_ne!(renders[0].context_id, renders[1].context_id);
        assert_eq!(engine.state().contexts_created(), 2);
        assert_eq!(engine.state().contexts_released(), 2);
    }

    #[tokio::test]
    async fn test_panicking_job_releases_its_context() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new().panic_navigation("crash");
        let mut pool = RenderPool::launch(engine.launcher(), 1, executor(dir.path()))
            .await
            .unwrap();

        pool.submit(job("crash.html")).unwrap();
        pool.submit(job("after.html")).unwrap();
        pool.idle().await;

        let outcomes = pool.drain_outcomes();
        assert!(matches!(
            &outcomes[0].error,
            Some(WebsnapError::WorkerPanicked(message)) if message.contains("crash.html")
        ));
        assert!(outcomes[1].success());

        // Released right after the panic, not left open until shutdown
        assert_eq!(engine.state().contexts_created(), 2);
        assert_eq!(engine.state().contexts_released(), 1);

        pool.close().await.unwrap();
        assert_eq!(engine.state().contexts_released(), 2);
    }

    #[tokio::test]
    async fn test_context_creation_failure_fails_job_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new().fail_contexts();
        let mut pool = RenderPool::launch(engine.launcher(), 2, executor(dir.path()))
            .await
            .unwrap();

        pool.submit(job("a.html")).unwrap();
        pool.submit(job("b.html")).unwrap();
        pool.idle().await;

        let outcomes = pool.drain_outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.error, Some(WebsnapError::ContextUnavailable(_)))));
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_idle_runs_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StubEngine::new();
        let mut pool = RenderPool::launch(engine.launcher(), 2, executor(dir.path()))
            .await
            .unwrap();

        pool.submit(job("first.html")).unwrap();
        pool.idle().await;
        pool.submit(job("second.html")).unwrap();
        pool.idle().await;

        assert_eq!(pool.drain_outcomes().len(), 2);
        pool.close().await.unwrap();
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
