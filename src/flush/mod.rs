//! Auto-flush manager: batches dirty mutations into atomic JSONL exports.
//!
//! A single worker thread owns the schedule; any thread may enqueue without
//! blocking. Requests within the debounce window coalesce into one flush,
//! with stricter options superseding weaker pending ones. Export failures
//! (including safety-guard refusals) are swallowed into exponential backoff
//! and surfaced only through [`FlushStats`]; they never reach command exit
//! codes. On shutdown the pending flush is drained synchronously under a
//! bounded timeout.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::storage::SqliteStore;
use crate::sync::{ExportOptions, export_to_jsonl};

/// Options for one flush request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOptions {
    /// Flush even when the dirty set is empty.
    pub force_dirty: bool,
    /// Emit the full snapshot regardless of incremental state; set after a
    /// daemon-to-direct fallback to reconcile in-flight state.
    pub force_full_export: bool,
}

impl FlushOptions {
    /// Combine a new request into a pending one: the stricter wins.
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        Self {
            force_dirty: self.force_dirty || other.force_dirty,
            force_full_export: self.force_full_export || other.force_full_export,
        }
    }
}

/// Timing knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Delay between a dirty mark and the flush it schedules.
    pub debounce: Duration,
    /// First retry delay after a failure; doubles per consecutive failure.
    pub backoff_base: Duration,
    /// Upper bound for the retry delay.
    pub backoff_cap: Duration,
    /// Bound on the final synchronous drain at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Observability counters, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct FlushStats {
    pub flush_count: u64,
    pub flush_failure_count: u64,
    pub last_flush_error: Option<String>,
    /// Number of issues written by the last successful flush.
    pub last_exported_count: usize,
}

enum Command {
    Schedule(FlushOptions),
    Shutdown(mpsc::Sender<()>),
}

struct Shared {
    stats: Mutex<FlushStats>,
    /// Serializes the worker's flush against synchronous callers.
    flush_gate: Mutex<()>,
}

/// Cooperative single-worker flush scheduler.
pub struct FlushManager {
    tx: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    db_path: PathBuf,
    jsonl_path: PathBuf,
    config: FlushConfig,
}

impl std::fmt::Debug for FlushManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushManager")
            .field("db_path", &self.db_path)
            .field("jsonl_path", &self.jsonl_path)
            .finish_non_exhaustive()
    }
}

impl FlushManager {
    /// Start the worker thread.
    #[must_use]
    pub fn start(db_path: PathBuf, jsonl_path: PathBuf, config: FlushConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            stats: Mutex::new(FlushStats::default()),
            flush_gate: Mutex::new(()),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_db = db_path.clone();
        let worker_jsonl = jsonl_path.clone();
        let worker_config = config.clone();
        let handle = std::thread::Builder::new()
            .name("bd-flush".to_string())
            .spawn(move || {
                worker_loop(&rx, &worker_shared, &worker_db, &worker_jsonl, &worker_config);
            })
            .expect("spawn flush worker");

        Self {
            tx,
            handle: Some(handle),
            shared,
            db_path,
            jsonl_path,
            config,
        }
    }

    /// Record dirtiness and schedule a debounced flush. Never blocks.
    ///
    /// The dirty marks themselves live in the store (written by the mutation
    /// that triggered this call); this only arms the scheduler.
    pub fn mark_dirty_and_schedule_flush(&self) {
        self.schedule(FlushOptions::default());
    }

    /// Schedule a flush with explicit options. Multiple calls within the
    /// debounce window coalesce; the latest request re-arms the timer.
    pub fn schedule(&self, options: FlushOptions) {
        // A send failure means the worker is gone (shutdown race); the final
        // drain covers pending state.
        let _ = self.tx.send(Command::Schedule(options));
    }

    /// Flush synchronously on the caller's thread.
    ///
    /// Safe to call concurrently with the worker: a running flush blocks
    /// this one on the shared gate.
    ///
    /// # Errors
    ///
    /// Returns the export error; the failure is also recorded in stats.
    pub fn flush_now(&self, options: FlushOptions) -> Result<usize> {
        run_flush(
            &self.shared,
            &self.db_path,
            &self.jsonl_path,
            options,
        )
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> FlushStats {
        self.shared.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Drain pending work and stop the worker. Bounded by
    /// `config.shutdown_timeout`.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(self.config.shutdown_timeout);
        }
        let _ = handle.join();
    }
}

impl Drop for FlushManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    rx: &mpsc::Receiver<Command>,
    shared: &Arc<Shared>,
    db_path: &Path,
    jsonl_path: &Path,
    config: &FlushConfig,
) {
    let mut pending: Option<FlushOptions> = None;
    let mut deadline: Option<Instant> = None;
    let mut consecutive_failures: u32 = 0;

    loop {
        let timeout = deadline.map_or(Duration::from_secs(3600), |d| {
            d.saturating_duration_since(Instant::now())
        });

        match rx.recv_timeout(timeout) {
            Ok(Command::Schedule(options)) => {
                pending = Some(pending.unwrap_or_default().or(options));
                // Latest request wins the timer, unless a backoff window is
                // already counting down from a failure.
                if consecutive_failures == 0 {
                    deadline = Some(Instant::now() + config.debounce);
                } else if deadline.is_none() {
                    deadline = Some(Instant::now() + config.debounce);
                }
            }
            Ok(Command::Shutdown(ack)) => {
                if let Some(options) = pending.take() {
                    let _ = run_flush(shared, db_path, jsonl_path, options);
                }
                let _ = ack.send(());
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                let due = deadline.is_some_and(|d| Instant::now() >= d);
                if !due {
                    continue;
                }
                deadline = None;
                let Some(options) = pending else {
                    continue;
                };
                match run_flush(shared, db_path, jsonl_path, options) {
                    Ok(_) => {
                        pending = None;
                        consecutive_failures = 0;
                    }
                    Err(err) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        let backoff = backoff_delay(config, consecutive_failures);
                        tracing::warn!(
                            error = %err,
                            failures = consecutive_failures,
                            retry_in_ms = backoff.as_millis() as u64,
                            "flush failed; backing off"
                        );
                        deadline = Some(Instant::now() + backoff);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(options) = pending.take() {
                    let _ = run_flush(shared, db_path, jsonl_path, options);
                }
                return;
            }
        }
    }
}

fn backoff_delay(config: &FlushConfig, failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(16);
    config
        .backoff_base
        .saturating_mul(factor)
        .min(config.backoff_cap)
}

/// Perform one flush: open a fresh store connection, check the dirty set,
/// export, and record stats. Exports read under a transaction snapshot, so
/// the archive is never torn.
fn run_flush(
    shared: &Arc<Shared>,
    db_path: &Path,
    jsonl_path: &Path,
    options: FlushOptions,
) -> Result<usize> {
    let _gate = shared.flush_gate.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    let outcome = (|| -> Result<Option<usize>> {
        let mut store = SqliteStore::open(db_path)?;
        let dirty = store.list_dirty_ids()?;
        if dirty.is_empty() && !options.force_dirty && !options.force_full_export {
            tracing::debug!("flush skipped: no dirty issues");
            return Ok(None);
        }
        let export = export_to_jsonl(
            &mut store,
            jsonl_path,
            Some(db_path),
            &ExportOptions::default(),
        )?;
        Ok(Some(export.exported_count))
    })();

    let mut stats = shared
        .stats
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    match outcome {
        Ok(None) => Ok(0),
        Ok(Some(count)) => {
            stats.flush_count += 1;
            stats.last_exported_count = count;
            stats.last_flush_error = None;
            tracing::debug!(exported = count, "flush complete");
            Ok(count)
        }
        Err(err) => {
            stats.flush_failure_count += 1;
            stats.last_flush_error = Some(err.to_string());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use crate::storage::CONFIG_ISSUE_PREFIX;
    use crate::sync::codec;
    use tempfile::TempDir;

    fn fast_config() -> FlushConfig {
        FlushConfig {
            debounce: Duration::from_millis(20),
            backoff_base: Duration::from_millis(40),
            backoff_cap: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    fn workspace() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("beads.db");
        let jsonl = dir.path().join("issues.jsonl");
        let mut store = SqliteStore::open(&db).unwrap();
        store.set_config(CONFIG_ISSUE_PREFIX, "bd").unwrap();
        (dir, db, jsonl)
    }

    fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn debounced_flush_exports_and_clears_dirty() {
        let (_dir, db, jsonl) = workspace();
        {
            let mut store = SqliteStore::open(&db).unwrap();
            store.create_issue(&Issue::new("bd-1", "A"), "test").unwrap();
        }

        let manager = FlushManager::start(db.clone(), jsonl.clone(), fast_config());
        manager.mark_dirty_and_schedule_flush();

        assert!(wait_until(Duration::from_secs(3), || jsonl.exists()));
        assert!(wait_until(Duration::from_secs(3), || {
            SqliteStore::open(&db)
                .map(|s| s.list_dirty_ids().unwrap_or_default().is_empty())
                .unwrap_or(false)
        }));
        assert_eq!(codec::count_issues(&jsonl).unwrap(), 1);
        assert_eq!(manager.stats().flush_count, 1);
    }

    #[test]
    fn rapid_schedules_coalesce_into_one_flush() {
        let (_dir, db, jsonl) = workspace();
        {
            let mut store = SqliteStore::open(&db).unwrap();
            store.create_issue(&Issue::new("bd-1", "A"), "test").unwrap();
        }

        let manager = FlushManager::start(db, jsonl.clone(), fast_config());
        for _ in 0..20 {
            manager.mark_dirty_and_schedule_flush();
        }

        assert!(wait_until(Duration::from_secs(3), || {
            manager.stats().flush_count >= 1
        }));
        // Let any stray timers fire.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(manager.stats().flush_count, 1);
    }

    #[test]
    fn guard_violation_counts_failure_and_retries() {
        let (_dir, db, jsonl) = workspace();
        // Non-empty archive, empty store: the export guard refuses.
        codec::write_jsonl_atomic(&jsonl, &[Issue::new("bd-9", "archived")]).unwrap();

        let manager = FlushManager::start(db.clone(), jsonl.clone(), fast_config());
        manager.schedule(FlushOptions {
            force_dirty: true,
            force_full_export: false,
        });

        assert!(wait_until(Duration::from_secs(3), || {
            manager.stats().flush_failure_count >= 2
        }));
        let stats = manager.stats();
        assert!(
            stats
                .last_flush_error
                .as_deref()
                .unwrap()
                .contains("refusing to export")
        );
        // The archive was never overwritten.
        assert_eq!(codec::count_issues(&jsonl).unwrap(), 1);

        // New dirty marks are still accepted, and success resets the error.
        {
            let mut store = SqliteStore::open(&db).unwrap();
            store.create_issue(&Issue::new("bd-9", "archived"), "test").unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || {
            manager.stats().flush_count >= 1
        }));
        assert!(manager.stats().last_flush_error.is_none());
    }

    #[test]
    fn flush_now_runs_synchronously() {
        let (_dir, db, jsonl) = workspace();
        {
            let mut store = SqliteStore::open(&db).unwrap();
            store.create_issue(&Issue::new("bd-1", "A"), "test").unwrap();
        }
        let manager = FlushManager::start(db, jsonl.clone(), fast_config());
        let exported = manager.flush_now(FlushOptions::default()).unwrap();
        assert_eq!(exported, 1);
        assert!(jsonl.exists());
    }

    #[test]
    fn flush_now_skips_when_clean() {
        let (_dir, db, jsonl) = workspace();
        let manager = FlushManager::start(db, jsonl.clone(), fast_config());
        let exported = manager.flush_now(FlushOptions::default()).unwrap();
        assert_eq!(exported, 0);
        assert!(!jsonl.exists());
    }

    #[test]
    fn force_full_export_flushes_clean_store() {
        let (_dir, db, jsonl) = workspace();
        {
            let mut store = SqliteStore::open(&db).unwrap();
            store.create_issue(&Issue::new("bd-1", "A"), "test").unwrap();
            let ids = store.list_dirty_ids().unwrap();
            store.clear_dirty_issues_by_id(&ids).unwrap();
        }
        let manager = FlushManager::start(db, jsonl.clone(), fast_config());
        let exported = manager
            .flush_now(FlushOptions {
                force_dirty: false,
                force_full_export: true,
            })
            .unwrap();
        assert_eq!(exported, 1);
    }

    #[test]
    fn shutdown_drains_pending_flush() {
        let (_dir, db, jsonl) = workspace();
        {
            let mut store = SqliteStore::open(&db).unwrap();
            store.create_issue(&Issue::new("bd-1", "A"), "test").unwrap();
        }

        let mut manager = FlushManager::start(
            db,
            jsonl.clone(),
            FlushConfig {
                // Long debounce: the flush must happen via the drain, not the timer.
                debounce: Duration::from_secs(600),
                ..fast_config()
            },
        );
        manager.mark_dirty_and_schedule_flush();
        manager.shutdown();

        assert!(jsonl.exists());
        assert_eq!(codec::count_issues(&jsonl).unwrap(), 1);
    }
}
