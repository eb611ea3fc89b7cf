//! Single-flight generation queue.
//!
//! Requests are checked against the cache on submission. Misses are queued
//! to one worker task that owns the generator and therefore the remote
//! session; it handles one task at a time in submission order.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, Instrument};

use crate::cache::ResultCache;
use crate::error::{ProxyError, Result};
use crate::generator::Generator;
use crate::params::{Fingerprint, RequestParams};

/// A finished request: where its audio lives and whether generation was
/// skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub path: PathBuf,
    pub served_from_cache: bool,
}

struct PendingTask {
    params: RequestParams,
    fingerprint: Fingerprint,
    respond_to: oneshot::Sender<Result<TaskOutput>>,
}

enum HandleState {
    Ready(TaskOutput),
    Pending(oneshot::Receiver<Result<TaskOutput>>),
}

/// Completion signal for one submitted request.
pub struct TaskHandle {
    fingerprint: Fingerprint,
    state: HandleState,
}

impl TaskHandle {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Wait until the task has either produced a cache entry or failed.
    pub async fn wait(self) -> Result<TaskOutput> {
        match self.state {
            HandleState::Ready(output) => Ok(output),
            HandleState::Pending(rx) => rx.await.map_err(|_| ProxyError::WorkerUnavailable)?,
        }
    }
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    generated: AtomicU64,
    cache_hits: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedulerSnapshot {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub generated: u64,
    pub cache_hits: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }
}

pub struct TaskScheduler {
    tx: mpsc::UnboundedSender<PendingTask>,
    cache: Arc<ResultCache>,
    stats: Arc<SchedulerStats>,
}

impl TaskScheduler {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(generator: Generator, cache: Arc<ResultCache>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(SchedulerStats::default());
        tokio::spawn(run_worker(rx, generator, Arc::clone(&cache), Arc::clone(&stats)));
        Self { tx, cache, stats }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn stats(&self) -> SchedulerSnapshot {
        self.stats.snapshot()
    }

    /// Return a handle that is already resolved on a cache hit, otherwise
    /// queue the request for the worker.
    pub async fn submit(&self, params: RequestParams) -> TaskHandle {
        let fingerprint = Fingerprint::of(&params);

        if self.cache.exists(&params, &fingerprint) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            let path = self.cache.path_for(&params, &fingerprint);
            return TaskHandle {
                fingerprint,
                state: HandleState::Ready(TaskOutput {
                    path,
                    served_from_cache: true,
                }),
            };
        }

        let (respond_to, rx) = oneshot::channel();
        let task = PendingTask {
            params,
            fingerprint: fingerprint.clone(),
            respond_to,
        };
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(task).is_err() {
            // the dropped sender resolves the handle as WorkerUnavailable
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            error!(%fingerprint, "generation worker is gone, task not queued");
        } else {
            debug!(%fingerprint, "task queued");
        }
        TaskHandle {
            fingerprint,
            state: HandleState::Pending(rx),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<PendingTask>,
    mut generator: Generator,
    cache: Arc<ResultCache>,
    stats: Arc<SchedulerStats>,
) {
    info!("generation worker started");

    while let Some(task) = rx.recv().await {
        stats.queued.fetch_sub(1, Ordering::Relaxed);
        stats.running.store(1, Ordering::Relaxed);

        let span = info_span!("generation", fingerprint = %task.fingerprint);
        let outcome = AssertUnwindSafe(
            process(&mut generator, &cache, &stats, &task.params, &task.fingerprint)
                .instrument(span),
        )
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                error!(fingerprint = %task.fingerprint, "generation task panicked");
                Err(ProxyError::Generation {
                    reason: "generation task panicked".to_string(),
                    exit_code: None,
                })
            }
        };

        stats.running.store(0, Ordering::Relaxed);
        match &result {
            Ok(_) => stats.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
        };

        if task.respond_to.send(result).is_err() {
            debug!(fingerprint = %task.fingerprint, "caller stopped waiting");
        }
    }

    info!("generation worker stopped");
}

async fn process(
    generator: &mut Generator,
    cache: &ResultCache,
    stats: &SchedulerStats,
    params: &RequestParams,
    fingerprint: &Fingerprint,
) -> Result<TaskOutput> {
    let path = cache.path_for(params, fingerprint);

    // an identical task queued earlier may already have produced it
    if cache.exists(params, fingerprint) {
        stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        return Ok(TaskOutput {
            path,
            served_from_cache: true,
        });
    }

    info!("starting generation");
    let started = std::time::Instant::now();
    match generator.generate(params, &path).await {
        Ok(path) => {
            stats.generated.fetch_add(1, Ordering::Relaxed);
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "generation complete");
            Ok(TaskOutput {
                path,
                served_from_cache: false,
            })
        }
        Err(e) => {
            error!(error = %e, "generation failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::remote::fake::FakeShell;
    use crate::remote::RemoteExecutionBridge;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scheduler(shell: &FakeShell) -> (TempDir, TaskScheduler) {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().join("cache"), dir.path().join("text_file")).unwrap();
        let config = GenerationConfig {
            workdir: "/srv/tts".to_string(),
            interpreter: Some("python".to_string()),
            ..GenerationConfig::default()
        };
        let bridge = RemoteExecutionBridge::new(Box::new(shell.clone()), config.workdir.clone());
        let scheduler = TaskScheduler::spawn(Generator::new(bridge, config), Arc::new(cache));
        (dir, scheduler)
    }

    fn params(text: &str) -> RequestParams {
        [("text", text), ("gender", "female")].into_iter().collect()
    }

    #[tokio::test]
    async fn test_identical_concurrent_requests_generate_once() {
        let shell = FakeShell::new();
        shell.state().generation_delay = Some(Duration::from_millis(50));
        let (_dir, scheduler) = scheduler(&shell);

        let mut handles = Vec::new();
        for _ in 0..5 {
            handles.push(scheduler.submit(params("same words")).await);
        }
        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.wait().await.unwrap());
        }

        assert_eq!(shell.generations(), 1);
        assert!(outputs.iter().all(|o| o.path == outputs[0].path));
        assert_eq!(outputs.iter().filter(|o| !o.served_from_cache).count(), 1);
        assert!(outputs[0].path.is_file());

        let stats = scheduler.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.generated, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_cached_request_touches_no_remote() {
        let shell = FakeShell::new();
        let (_dir, scheduler) = scheduler(&shell);

        let first = scheduler.submit(params("hello")).await.wait().await.unwrap();
        assert!(!first.served_from_cache);
        let commands_before = shell.state().commands.len();

        let handle = scheduler.submit(params("hello")).await;
        assert!(handle.is_ready());
        let second = handle.wait().await.unwrap();

        assert!(second.served_from_cache);
        assert_eq!(second.path, first.path);
        assert_eq!(shell.state().commands.len(), commands_before);
        assert_eq!(shell.generations(), 1);
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let shell = FakeShell::new();
        shell.state().generation_delay = Some(Duration::from_millis(10));
        let (_dir, scheduler) = scheduler(&shell);

        let mut handles = Vec::new();
        for text in ["first", "second", "third"] {
            handles.push(scheduler.submit(params(text)).await);
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let order: Vec<String> = shell
            .state()
            .commands
            .iter()
            .filter(|c| c.starts_with("cd "))
            .map(|c| c.rsplit("--text ").next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, vec!["'first'", "'second'", "'third'"]);
    }

    #[tokio::test]
    async fn test_failure_reaches_only_its_caller() {
        let shell = FakeShell::new();
        shell.state().generation_stdout = "INFO no marker here\n".to_string();
        let (_dir, scheduler) = scheduler(&shell);

        let err = scheduler.submit(params("broken")).await.wait().await.unwrap_err();
        assert!(matches!(err, ProxyError::Generation { .. }));

        shell.state().generation_stdout = "Generated audio file: results/ok.wav\n".to_string();
        let ok = scheduler.submit(params("fine")).await.wait().await.unwrap();
        assert!(ok.path.is_file());

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_worker() {
        let shell = FakeShell::new();
        shell.state().panic_on_generation = true;
        let (_dir, scheduler) = scheduler(&shell);

        let err = scheduler.submit(params("explode")).await.wait().await.unwrap_err();
        assert!(matches!(err, ProxyError::Generation { exit_code: None, .. }));

        let ok = scheduler.submit(params("recover")).await.wait().await.unwrap();
        assert!(!ok.served_from_cache);
    }

    #[tokio::test]
    async fn test_dead_session_is_reestablished() {
        let shell = FakeShell::new();
        let (_dir, scheduler) = scheduler(&shell);

        scheduler.submit(params("one")).await.wait().await.unwrap();
        shell.state().alive = false;
        scheduler.submit(params("two")).await.wait().await.unwrap();

        assert_eq!(shell.state().connects, 2);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported_to_caller() {
        let shell = FakeShell::new();
        shell.state().refuse_connect = true;
        let (_dir, scheduler) = scheduler(&shell);

        let err = scheduler.submit(params("hello")).await.wait().await.unwrap_err();
        assert!(matches!(err, ProxyError::Connection(_)));
        assert_eq!(shell.generations(), 0);
    }

    #[tokio::test]
    async fn test_half_written_download_is_not_a_cache_hit() {
        let shell = FakeShell::new();
        shell.state().download_pause = Some(Duration::from_millis(200));
        let (dir, scheduler) = scheduler(&shell);

        let first = scheduler.submit(params("slow words")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = scheduler.submit(params("slow words")).await;
        assert!(!second.is_ready());

        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();
        assert!(!first.served_from_cache);
        assert!(second.served_from_cache);
        assert_eq!(
            std::fs::metadata(&second.path).unwrap().len(),
            crate::remote::fake::silent_wav().len() as u64
        );
        assert_eq!(shell.generations(), 1);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
