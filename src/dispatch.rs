//! Bounded concurrent dispatch of work items.
//!
//! Every phase hands [`dispatch`] a list of items and a task factory. The driver takes
//! one admission permit per item before building and spawning its task, so at most
//! `admission_limit` tasks are in flight however long the list is. Each task returns
//! its permit as the last thing it does, whether it succeeded, failed, timed out or
//! panicked. Once every item is submitted the driver reclaims all `admission_limit`
//! permits at once; holding all of them means no task is still running.

use crate::config::ADMISSION_FACTOR;
use crate::stats::{DispatchStats, DispatchSummary};
use anyhow::{Context, Result};
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::any::Any;
use std::fmt::Display;
use std::fs;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Available parallelism minus one, never below one.
pub fn default_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.saturating_sub(1).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub pool_size: usize,
    pub admission_limit: usize,
    pub task_timeout: Option<Duration>,
}

impl DispatchLimits {
    pub fn new(pool_size: usize, admission_limit: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            admission_limit: admission_limit.max(1),
            task_timeout: None,
        }
    }

    /// Limits for phases with many light tasks (scan, import).
    pub fn standard() -> Self {
        let pool = default_pool_size();
        Self::new(pool, pool * ADMISSION_FACTOR)
    }

    /// Limits for phases whose tasks are individually heavy (paragraph dedup).
    pub fn heavy() -> Self {
        let pool = default_pool_size();
        Self::new(pool, pool)
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Worker runtime sized to the pool: `pool_size` async workers and at most
    /// `pool_size` threads for blocking sections.
    pub fn build_runtime(&self, thread_name: &str) -> Result<Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.pool_size)
            .max_blocking_threads(self.pool_size)
            .thread_name(thread_name)
            .enable_io()
            .enable_time()
            .build()
            .context("Failed to build worker runtime")
    }
}

/// How a single task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    Failed(anyhow::Error),
    TimedOut(Duration),
    Panicked(String),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Drives a task to its end, turning errors, panics and timeouts into a [`TaskOutcome`].
pub async fn run_guarded<Fut>(task: Fut, timeout: Option<Duration>) -> TaskOutcome
where
    Fut: Future<Output = Result<()>>,
{
    let guarded = AssertUnwindSafe(task).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => return TaskOutcome::TimedOut(limit),
        },
        None => guarded.await,
    };

    match result {
        Ok(Ok(())) => TaskOutcome::Completed,
        Ok(Err(e)) => TaskOutcome::Failed(e),
        Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn settle(phase: &str, item: &str, outcome: TaskOutcome, stats: &DispatchStats) {
    match outcome {
        TaskOutcome::Completed => {
            stats.inc_completed();
            debug!(phase, item, "Task completed");
        }
        TaskOutcome::Failed(e) => {
            stats.inc_failed();
            error!(phase, item, error = %format!("{e:#}"), "{phase}: task failed");
        }
        TaskOutcome::TimedOut(limit) => {
            stats.inc_timed_out();
            error!(
                phase,
                item,
                timeout_secs = limit.as_secs_f64(),
                "{phase}: task timed out"
            );
        }
        TaskOutcome::Panicked(message) => {
            stats.inc_failed();
            error!(phase, item, panic = %message, "{phase}: task panicked");
        }
    }
}

/// Runs one task per item under the admission limit and returns once all have ended.
///
/// A factory error counts the item as rejected and moves on to the next one. Task
/// errors are logged and counted, never returned. Must be called from within a tokio
/// runtime; a multi-threaded one gives parallel tasks.
pub async fn dispatch<I, F, Fut>(
    phase: &'static str,
    items: Vec<I>,
    limits: &DispatchLimits,
    mut factory: F,
) -> Result<DispatchSummary>
where
    I: Display,
    F: FnMut(I) -> Result<Fut>,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let start = Instant::now();
    let all_permits =
        u32::try_from(limits.admission_limit).context("Admission limit exceeds u32")?;
    let semaphore = Arc::new(Semaphore::new(limits.admission_limit));
    let stats = Arc::new(DispatchStats::new());
    let pb = make_progress_bar(items.len() as u64, phase);

    info!(
        phase,
        items = items.len(),
        pool_size = limits.pool_size,
        admission_limit = limits.admission_limit,
        "Dispatching work items"
    );

    for item in items {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Admission semaphore closed")?;
        let label = item.to_string();

        let task = match factory(item) {
            Ok(task) => task,
            Err(e) => {
                stats.inc_rejected();
                warn!(phase, item = %label, error = %format!("{e:#}"), "{phase}: task rejected");
                pb.inc(1);
                drop(permit);
                continue;
            }
        };

        stats.inc_submitted();
        let stats = Arc::clone(&stats);
        let pb = pb.clone();
        let timeout = limits.task_timeout;
        tokio::spawn(async move {
            let outcome = run_guarded(task, timeout).await;
            settle(phase, &label, outcome, &stats);
            pb.inc(1);
            drop(permit);
        });
    }

    // Outstanding permits == admission limit implies zero tasks in flight.
    let barrier = semaphore
        .acquire_many(all_permits)
        .await
        .context("Admission semaphore closed")?;
    semaphore.close();
    drop(barrier);

    let summary = stats.summary(start.elapsed());
    pb.finish_with_message(format!(
        "{} done, {} failed, {} rejected",
        summary.completed, summary.failed, summary.rejected
    ));

    info!(
        phase,
        completed = summary.completed,
        failed = summary.failed,
        rejected = summary.rejected,
        timed_out = summary.timed_out,
        duration_secs = summary.elapsed.as_secs_f64(),
        "Dispatch complete"
    );

    Ok(summary)
}

/// Builds a pool-sized runtime and blocks on [`dispatch`].
pub fn run<I, F, Fut>(
    phase: &'static str,
    items: Vec<I>,
    limits: &DispatchLimits,
    factory: F,
) -> Result<DispatchSummary>
where
    I: Display,
    F: FnMut(I) -> Result<Fut>,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let rt = limits.build_runtime(&format!("acks-{phase}-worker"))?;
    rt.block_on(dispatch(phase, items, limits, factory))
}

/// Reads a work list: one item per line, blank lines ignored.
pub fn read_work_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read work list: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn make_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "    {{spinner:.cyan}} {label:<20} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} {{msg}}"
            ))
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
