/// Periodic background workers
///
/// Runs one unit of work on a fixed interval, first immediately at start,
/// with consecutive-failure tracking so a failing cycle is logged and retried
/// on the next tick instead of taking the loop down.
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// One cycle of a periodic loop.
#[async_trait]
pub trait CycleTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run_cycle(&self) -> Result<(), String>;
}

/// Control messages for a running worker
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a cycle now, outside the schedule
    RunNow,
    /// Finish the in-flight cycle and exit
    Shutdown,
}

/// Counters shared between the worker loop and its owner.
#[derive(Debug, Default)]
pub struct WorkerStats {
    cycles: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl WorkerStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    fn record_success(&self, task_name: &str) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
        if previous > 0 {
            warn!(
                "Task '{}' recovered after {} failures",
                task_name, previous
            );
        }
    }

    fn record_failure(&self, task_name: &str, reason: &str) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.failures.fetch_add(1, Ordering::SeqCst);
        let streak = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            "Task '{}' failed ({} in a row): {}",
            task_name, streak, reason
        );
    }
}

struct RunningWorker {
    tx: mpsc::Sender<WorkerMessage>,
    handle: JoinHandle<()>,
}

/// A stoppable, restartable periodic loop around a `CycleTask`.
pub struct PeriodicWorker {
    task: Arc<dyn CycleTask>,
    period: Duration,
    stats: Arc<WorkerStats>,
    running: Mutex<Option<RunningWorker>>,
}

impl PeriodicWorker {
    pub fn new(task: Arc<dyn CycleTask>, period: Duration) -> Self {
        Self {
            task,
            period,
            stats: Arc::new(WorkerStats::default()),
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawn the loop. Returns false if it is already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.task),
            self.period,
            rx,
            Arc::clone(&self.stats),
        ));
        *running = Some(RunningWorker { tx, handle });
        true
    }

    /// Stop the loop after its in-flight cycle. Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(worker) = self.running.lock().await.take() else {
            return false;
        };
        // A closed channel means the loop already exited
        let _ = worker.tx.send(WorkerMessage::Shutdown).await;
        if let Err(e) = worker.handle.await {
            error!("Task '{}' worker ended abnormally: {}", self.name(), e);
        }
        true
    }

    /// Request an immediate cycle. Returns false if the worker is not running.
    pub async fn run_now(&self) -> bool {
        match self.running.lock().await.as_ref() {
            Some(worker) => worker.tx.send(WorkerMessage::RunNow).await.is_ok(),
            None => false,
        }
    }
}

async fn run_loop(
    task: Arc<dyn CycleTask>,
    period: Duration,
    mut rx: mpsc::Receiver<WorkerMessage>,
    stats: Arc<WorkerStats>,
) {
    info!("Starting task '{}' with interval {:?}", task.name(), period);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // First tick completes immediately
            _ = ticker.tick() => {
                run_once(task.as_ref(), &stats).await;
            }

            msg = rx.recv() => {
                match msg {
                    Some(WorkerMessage::RunNow) => {
                        debug!("Task '{}' triggered manually", task.name());
                        run_once(task.as_ref(), &stats).await;
                    }
                    Some(WorkerMessage::Shutdown) | None => {
                        info!("Task '{}' shutting down", task.name());
                        break;
                    }
                }
            }
        }
    }
}

async fn run_once(task: &dyn CycleTask, stats: &WorkerStats) {
    match AssertUnwindSafe(task.run_cycle()).catch_unwind().await {
        Ok(Ok(())) => stats.record_success(task.name()),
        Ok(Err(e)) => stats.record_failure(task.name(), &e),
        Err(_) => stats.record_failure(task.name(), "cycle panicked"),
    }
}
