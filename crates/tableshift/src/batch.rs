//! Adaptive batched iteration over an integer id range.
//!
//! The [`BatchRunner`] is a generic primitive: it walks `[min, max]` in
//! contiguous inclusive windows, invokes a caller-supplied callback per
//! window, optionally executes the SQL the callback returns, shrinks the
//! window size when a window runs long, reports progress at a bounded
//! rate, and honors a cooperative [`CancelToken`] once per window. The
//! migrator's backfill is one caller; ad-hoc batched reads and updates
//! are another.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::db::Database;
use crate::error::MigrationError;
use crate::report::Reporter;

/// Tuning for one batched run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Initial window size in ids.
    pub batch_size: i64,
    /// How much to shrink the window after a slow batch.
    pub decrease_step: i64,
    /// Floor for throttled shrinking.
    pub min_batch_size: i64,
    /// A window slower than this triggers a shrink.
    pub throttle_threshold: Duration,
    /// Minimum wall time between progress lines.
    pub progress_interval: Duration,
    /// Explicit lower bound; discovered via `MIN(id)` when absent.
    pub start: Option<i64>,
    /// Explicit upper bound; discovered via `MAX(id)` when absent.
    pub finish: Option<i64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 40_000,
            decrease_step: 5_000,
            min_batch_size: 10_000,
            throttle_threshold: Duration::from_secs(4),
            progress_interval: Duration::from_secs(30),
            start: None,
            finish: None,
        }
    }
}

/// Walks an id range in adaptive windows, driving a per-window callback.
pub struct BatchRunner<'a> {
    db: &'a dyn Database,
    reporter: &'a Reporter,
    cancel: &'a CancelToken,
    table: &'a str,
    config: BatchConfig,
}

impl<'a> BatchRunner<'a> {
    /// Create a runner over `table` (used for bound discovery and as the
    /// progress-line prefix).
    pub fn new(
        db: &'a dyn Database,
        reporter: &'a Reporter,
        cancel: &'a CancelToken,
        table: &'a str,
        config: BatchConfig,
    ) -> Self {
        Self {
            db,
            reporter,
            cancel,
            table,
            config,
        }
    }

    /// Run the scan. The callback receives the inclusive `(start, end)` of
    /// each window; when it returns a statement, the runner executes it
    /// before moving on.
    ///
    /// Returns immediately with zero work when the table is empty or the
    /// effective range is non-positive. Returns
    /// [`MigrationError::Cancelled`] when the token is set; the in-flight
    /// window is completed first, later windows are not attempted.
    pub async fn run<F>(&self, mut window: F) -> Result<(), MigrationError>
    where
        F: FnMut(i64, i64) -> Option<String> + Send,
    {
        let min = match self.config.start {
            Some(bound) => Some(bound),
            None => {
                self.db
                    .select_int(&format!("SELECT MIN(`id`) FROM `{}`", self.table))
                    .await?
            }
        };
        let Some(min) = min else {
            debug!(table = %self.table, "no rows to scan");
            return Ok(());
        };
        let max = match self.config.finish {
            Some(bound) => Some(bound),
            None => {
                self.db
                    .select_int(&format!("SELECT MAX(`id`) FROM `{}`", self.table))
                    .await?
            }
        };
        let Some(max) = max else {
            debug!(table = %self.table, "no rows to scan");
            return Ok(());
        };

        let todo = max - min + 1;
        if todo <= 0 {
            debug!(table = %self.table, min, max, "empty id range");
            return Ok(());
        }

        let mut batch_size = self.config.batch_size.max(1);
        let mut batch_end = min - 1;
        let started = Instant::now();
        let mut last_progress = Instant::now();

        loop {
            let batch_start = batch_end + 1;
            batch_end = (batch_start + batch_size - 1).min(max);
            let batch_started = Instant::now();

            if let Some(sql) = window(batch_start, batch_end) {
                self.db.execute(&sql).await?;
            }

            if self.cancel.is_cancelled() {
                self.reporter
                    .emit(self.table, "Received termination signal, exiting...");
                return Err(MigrationError::Cancelled);
            }

            if batch_end >= max {
                break;
            }

            // Shrink under load; never grow back within one run.
            if batch_started.elapsed() > self.config.throttle_threshold {
                let shrunk = (batch_size - self.config.decrease_step).max(self.config.min_batch_size);
                if shrunk < batch_size {
                    debug!(table = %self.table, from = batch_size, to = shrunk, "throttling batch size");
                    batch_size = shrunk;
                }
            }

            if last_progress.elapsed() >= self.config.progress_interval {
                last_progress = Instant::now();
                let done = batch_end - min + 1;
                let percent = done as f64 / todo as f64 * 100.0;
                self.reporter
                    .emit(self.table, &format!("{percent:.2}% ({done}/{todo})"));
            }
        }

        self.reporter
            .emit(self.table, &completion_summary(started.elapsed()));
        Ok(())
    }
}

/// The end-of-run status line: seconds under two minutes, whole minutes
/// from there on.
fn completion_summary(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(120) {
        format!("Completed ({} secs)", elapsed.as_secs())
    } else {
        format!("Completed ({} mins)", elapsed.as_secs() / 60)
    }
}
