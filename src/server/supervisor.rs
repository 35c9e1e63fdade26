//! Rebuild supervisor (C11)
//!
//! Owns the background indexing jobs. At most one rebuild runs at a time
//! per index; a trigger that arrives while one is running replaces the
//! pending job instead. Pending jobs escalate but never downgrade: a queued
//! full rebuild is not displaced by an incremental trigger, because full
//! rebuilds are what reconcile deletions.
//!
//! Incremental jobs run in-process on the blocking pool. Full rebuilds run
//! as a supervised child process (`mnemo index --full --porcelain`): a
//! reader task parses `PROGRESS <pct> <message>` lines from its stdout and
//! updates the status record monotonically, stderr is captured for the
//! failure message, and a hard timeout kills the child. Either way the
//! published snapshot is reloaded only after a successful, atomic publish.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::Notify;

use crate::indexer::{Indexer, NoProgress};
use crate::retriever::Snapshot;
use crate::status::{IndexState, IndexStatus};

use super::Shared;

/// Hard ceiling for a supervised full rebuild.
pub const DEFAULT_REBUILD_TIMEOUT: Duration = Duration::from_secs(600);
/// Periodic dirty-flag check interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// How much captured stderr a failure message keeps.
const STDERR_TAIL_BYTES: usize = 2048;

/// What kind of rebuild to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildJob {
    Incremental,
    Full,
}

struct SupervisorInner {
    shared: Shared,
    pending: Mutex<Option<RebuildJob>>,
    wakeup: Notify,
    running: AtomicBool,
    rebuild_timeout: Duration,
}

/// Handle for submitting rebuild jobs.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Start the supervisor loop and the periodic dirty-flag tick.
    pub fn spawn(shared: Shared, rebuild_timeout: Duration, tick_interval: Duration) -> Self {
        let inner = Arc::new(SupervisorInner {
            shared,
            pending: Mutex::new(None),
            wakeup: Notify::new(),
            running: AtomicBool::new(false),
            rebuild_timeout,
        });
        let supervisor = Self { inner };

        let loop_handle = supervisor.clone();
        tokio::spawn(async move { loop_handle.run_loop().await });

        // Fallback tick: a set dirty flag that nothing picked up (say, an
        // incremental job failed) eventually forces a full rebuild.
        let tick_handle = supervisor.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // first tick fires immediately, skip it
            loop {
                interval.tick().await;
                if tick_handle.inner.shared.dirty.is_set() {
                    tracing::info!("Periodic tick found dirty flag set, scheduling full rebuild");
                    tick_handle.submit(RebuildJob::Full);
                }
            }
        });

        supervisor
    }

    /// Queue a rebuild. The pending slot holds one job; a full rebuild is
    /// never downgraded to an incremental one.
    pub fn submit(&self, job: RebuildJob) {
        let mut pending = lock(&self.inner.pending);
        let next = match (*pending, job) {
            (Some(RebuildJob::Full), RebuildJob::Incremental) => RebuildJob::Full,
            _ => job,
        };
        *pending = Some(next);
        drop(pending);
        self.inner.wakeup.notify_one();
    }

    /// Is a rebuild executing right now?
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    async fn run_loop(&self) {
        loop {
            let job = lock(&self.inner.pending).take();
            let Some(job) = job else {
                self.inner.wakeup.notified().await;
                continue;
            };

            self.inner.running.store(true, Ordering::Release);
            match job {
                RebuildJob::Incremental => self.run_incremental().await,
                RebuildJob::Full => self.run_full().await,
            }
            self.inner.running.store(false, Ordering::Release);
        }
    }

    async fn run_incremental(&self) {
        let shared = self.inner.shared.clone();
        let Some(embedder) = shared.embedder.clone() else {
            self.fail("incremental index needs EMBEDDING_API_KEY");
            return;
        };

        self.set_status(IndexStatus::running(0, "incremental index starting"));
        let paths = shared.paths.clone();
        let store = shared.store.clone();
        let result = tokio::task::spawn_blocking(move || {
            Indexer::new(&store, &paths, embedder.as_ref()).incremental(&NoProgress)
        })
        .await;

        match result {
            Ok(Ok(report)) => {
                self.set_status(IndexStatus::completed(format!(
                    "incremental: {} new chunks, {} vectors total",
                    report.embedded, report.ntotal
                )));
                self.publish_snapshot();
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Incremental index failed");
                self.fail(format!("incremental index failed: {}", e));
            }
            Err(e) => {
                tracing::error!(error = %e, "Incremental index task panicked");
                self.fail("incremental index task panicked");
            }
        }
    }

    /// Launch `mnemo index --full --porcelain` and supervise it.
    async fn run_full(&self) {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                self.fail(format!("cannot locate own binary: {}", e));
                return;
            }
        };

        self.set_status(IndexStatus::running(0, "full rebuild starting"));
        let mut child = match tokio::process::Command::new(exe)
            .arg("index")
            .arg("--full")
            .arg("--porcelain")
            .arg("--data-dir")
            .arg(&self.inner.shared.paths.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.fail(format!("failed to spawn indexer: {}", e));
                return;
            }
        };

        // Reader task: parse progress lines, update status monotonically
        let stdout = child.stdout.take().expect("stdout piped");
        let status_writer = self.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_pct = 0u8;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some((pct, message)) = parse_progress_line(&line) {
                    if pct >= last_pct {
                        last_pct = pct;
                        status_writer.set_status(IndexStatus::running(pct, message));
                    }
                }
            }
        });

        let mut stderr = child.stderr.take().expect("stderr piped");
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let exit = tokio::time::timeout(self.inner.rebuild_timeout, child.wait()).await;
        let _ = reader.await;
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        match exit {
            Ok(Ok(status)) if status.success() => {
                self.set_status(IndexStatus::completed("full rebuild finished"));
                self.publish_snapshot();
            }
            Ok(Ok(status)) => {
                let tail = stderr_tail(&stderr_bytes);
                tracing::warn!(code = ?status.code(), stderr = %tail, "Full rebuild failed");
                self.fail(format!(
                    "full rebuild exited with {:?}: {}",
                    status.code(),
                    tail
                ));
            }
            Ok(Err(e)) => {
                self.fail(format!("failed to wait on indexer: {}", e));
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.inner.rebuild_timeout, "Full rebuild timed out, killing child");
                let _ = child.kill().await;
                self.fail("full rebuild timed out");
            }
        }
    }

    /// Swap in the freshly published `(index, metadata)` pair. The pair is
    /// read back from disk so the server and the child indexer agree on
    /// exactly what was published.
    fn publish_snapshot(&self) {
        match Snapshot::load(&self.inner.shared.paths) {
            Ok(snapshot) => {
                let mut slot = self
                    .inner
                    .shared
                    .snapshot
                    .write()
                    .unwrap_or_else(|p| p.into_inner());
                *slot = Arc::new(snapshot);
                drop(slot);
                self.inner
                    .shared
                    .snapshot_healthy
                    .store(true, Ordering::Release);
                tracing::info!("Published new retrieval snapshot");
            }
            Err(e) => {
                tracing::error!(error = %e, "Rebuilt index failed to load");
                self.inner
                    .shared
                    .snapshot_healthy
                    .store(false, Ordering::Release);
                self.fail(format!("rebuilt index failed to load: {}", e));
            }
        }
    }

    fn set_status(&self, status: IndexStatus) {
        if let Err(e) = self.inner.shared.status.write(&status) {
            tracing::warn!(error = %e, "Failed to write status record");
        }
    }

    fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        let mut status = IndexStatus::failed(&message);
        // Keep whatever progress the run reached before failing
        let prior = self.inner.shared.status.load();
        if prior.status == IndexState::Running {
            status.progress = prior.progress;
        }
        self.set_status(status);
    }
}

/// `PROGRESS <pct> <message>` lines printed by `mnemo index --porcelain`.
pub fn parse_progress_line(line: &str) -> Option<(u8, &str)> {
    let rest = line.strip_prefix("PROGRESS ")?;
    let (pct, message) = rest.split_once(' ').unwrap_or((rest, ""));
    let pct: u8 = pct.parse().ok()?;
    Some((pct.min(100), message.trim()))
}

fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
