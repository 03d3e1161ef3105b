//! Zero-downtime online schema migrations for MySQL tables.
//!
//! tableshift rebuilds a live table next to itself instead of altering it
//! in place: it creates a shadow copy, applies arbitrary DDL to the copy,
//! installs triggers that mirror concurrent writes into the copy, copies
//! historical rows across in adaptive throttled batches, and finally swaps
//! the copy into place with a single atomic rename. The origin table keeps
//! serving reads and writes the whole time; the only unavailability is the
//! rename itself.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tableshift::{mysql::MySqlDatabase, Engine, IndexOptions};
//!
//! let db = Arc::new(MySqlDatabase::connect("mysql://localhost/app").await?);
//! let engine = Engine::new(db);
//!
//! engine
//!     .change_table("people", |t| {
//!         t.add_column("test", "varchar(32) DEFAULT 'foo'");
//!         t.change_column("name", "varchar(99) NOT NULL");
//!         t.add_index(&["code"], IndexOptions::default());
//!         Ok(())
//!     })
//!     .await?;
//!
//! // Drop archives older than a week, plus any crashed-migration debris.
//! engine.cleanup(Some(chrono::Utc::now() - chrono::Duration::days(7))).await?;
//! ```
//!
//! A failed or cancelled migration never swaps the origin table and always
//! removes its own shadow table and triggers before returning.

pub mod batch;
pub mod cancel;
pub mod db;
pub mod error;
pub mod migrator;
pub mod report;
mod sweeper;
pub mod table;

#[cfg(feature = "mysql")]
pub mod mysql;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use batch::{BatchConfig, BatchRunner};
pub use cancel::CancelToken;
pub use db::{ColumnInfo, Database, IndexInfo};
pub use error::MigrationError;
pub use migrator::{Migrator, MigratorConfig};
pub use report::Reporter;
pub use table::{IndexOptions, TableChange, TriggerKind};

/// Front door: one database session plus the reporter, cancellation token,
/// and tuning shared by every operation started through it.
///
/// The engine is sequential; one `Engine` should drive at most one
/// migration at a time, and two engines must not migrate the same origin
/// table concurrently (the deterministic shadow name makes the second
/// attempt fail at `CREATE TABLE`).
#[derive(Clone)]
pub struct Engine {
    db: Arc<dyn Database>,
    reporter: Reporter,
    cancel: CancelToken,
    config: MigratorConfig,
}

impl Engine {
    /// Wrap a database session with default reporter (stderr), a fresh
    /// cancellation token, and default tuning.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            reporter: Reporter::default(),
            cancel: CancelToken::new(),
            config: MigratorConfig::default(),
        }
    }

    /// Replace the progress sink ([`Reporter::Suppressed`] silences it).
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Share a cancellation token, typically set from a signal handler.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override migrator tuning.
    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    /// A clone of the engine's cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Migrate `table`: the closure describes the change (DDL against the
    /// shadow table), then the full shadow/backfill/cutover protocol runs.
    ///
    /// On any error the origin table is untouched and no shadow table or
    /// triggers remain.
    pub async fn change_table<F>(&self, table: &str, build: F) -> Result<(), MigrationError>
    where
        F: FnOnce(&mut TableChange) -> Result<(), MigrationError>,
    {
        let mut change = TableChange::new(table);
        build(&mut change)?;
        Migrator::new(self.db.as_ref(), change)
            .with_reporter(self.reporter.clone())
            .with_cancel_token(self.cancel.clone())
            .with_config(self.config.clone())
            .migrate()
            .await
    }

    /// Remove leftover shadow tables (with their triggers) from crashed
    /// runs, and archive tables created at or before `before`; all
    /// archives when `before` is `None`.
    pub async fn cleanup(&self, before: Option<DateTime<Utc>>) -> Result<(), MigrationError> {
        sweeper::cleanup_all(self.db.as_ref(), &self.reporter, before).await
    }

    /// Scan `table` in adaptive batches, invoking `each` per id window.
    pub async fn find_in_batches<F>(
        &self,
        table: &str,
        config: BatchConfig,
        mut each: F,
    ) -> Result<(), MigrationError>
    where
        F: FnMut(i64, i64) + Send,
    {
        BatchRunner::new(self.db.as_ref(), &self.reporter, &self.cancel, table, config)
            .run(|start, end| {
                each(start, end);
                None
            })
            .await
    }

    /// Mutate `table` in adaptive batches: `build` returns the statement
    /// to execute for each id window.
    pub async fn execute_in_batches<F>(
        &self,
        table: &str,
        config: BatchConfig,
        mut build: F,
    ) -> Result<(), MigrationError>
    where
        F: FnMut(i64, i64) -> String + Send,
    {
        BatchRunner::new(self.db.as_ref(), &self.reporter, &self.cancel, table, config)
            .run(|start, end| Some(build(start, end)))
            .await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("reporter", &self.reporter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
