//! The migration state machine.
//!
//! One [`Migrator`] owns one migration attempt end to end: validation,
//! session tuning, shadow-table creation, DDL application, trigger
//! installation, batched backfill, atomic cutover, and a cleanup phase
//! that runs on every exit path. Other processes keep reading and writing
//! the origin table throughout; the triggers mirror those writes into the
//! shadow table while backfill sweeps the historical id range.

use std::collections::HashSet;

use tracing::debug;

use crate::batch::{BatchConfig, BatchRunner};
use crate::cancel::CancelToken;
use crate::db::{Database, IndexInfo};
use crate::error::MigrationError;
use crate::report::Reporter;
use crate::table::{TableChange, TriggerKind};

/// The migration's own statements yield locks this much sooner than the
/// server default, so contention fails the migration instead of stalling
/// production writes.
const LOCK_WAIT_TIMEOUT_DELTA: i64 = -2;

/// Tuning for one [`Migrator`].
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Backfill batching parameters.
    pub batch: BatchConfig,
    /// Drop non-unique shadow indexes before backfill and recreate them
    /// afterwards. Unique indexes are always kept: conflict detection
    /// during backfill and mirroring depends on them.
    pub rebuild_indexes: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            rebuild_indexes: true,
        }
    }
}

/// Drives one table change through the full shadow-table protocol.
pub struct Migrator<'a> {
    db: &'a dyn Database,
    table: TableChange,
    reporter: Reporter,
    cancel: CancelToken,
    config: MigratorConfig,
    // Session state: memoized origin ∩ shadow columns and the non-unique
    // indexes removed before backfill.
    common_columns: Option<Vec<String>>,
    saved_indexes: Vec<IndexInfo>,
}

impl<'a> Migrator<'a> {
    /// Create a migrator with default reporter (stderr), token, and config.
    pub fn new(db: &'a dyn Database, table: TableChange) -> Self {
        Self {
            db,
            table,
            reporter: Reporter::default(),
            cancel: CancelToken::new(),
            config: MigratorConfig::default(),
            common_columns: None,
            saved_indexes: Vec::new(),
        }
    }

    /// Replace the progress sink.
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use a shared cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override tuning.
    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the migration. Cleanup (trigger removal, shadow drop) runs
    /// exactly once on every exit path; when both the migration and the
    /// cleanup fail, the migration error wins.
    pub async fn migrate(mut self) -> Result<(), MigrationError> {
        let outcome = self.run().await;
        let cleanup = self.cleanup().await;
        match outcome {
            Ok(()) => cleanup,
            Err(err) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::warn!(
                        table = %self.table.origin(),
                        error = %cleanup_err,
                        "cleanup failed while handling a migration error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(&mut self) -> Result<(), MigrationError> {
        self.validate().await?;
        self.tune_session().await?;
        // A previous attempt may have died mid-flight; its shadow table
        // and triggers would otherwise collide with ours.
        self.cleanup().await?;
        self.create_shadow().await?;
        if self.config.rebuild_indexes {
            self.drop_shadow_indexes().await?;
        }
        self.apply_ddl().await?;
        self.install_triggers().await?;
        self.backfill().await?;
        if self.config.rebuild_indexes {
            self.recreate_indexes().await?;
        }
        self.cutover().await
    }

    /// Drop the three mirroring triggers and the shadow table, tolerating
    /// absence. Idempotent; safe to call any number of times.
    pub async fn cleanup(&mut self) -> Result<(), MigrationError> {
        for kind in TriggerKind::ALL {
            self.db
                .execute(&format!(
                    "DROP TRIGGER IF EXISTS `{}`",
                    self.table.trigger_name(kind)
                ))
                .await?;
        }
        self.db
            .execute(&format!("DROP TABLE IF EXISTS `{}`", self.table.shadow()))
            .await
    }

    async fn validate(&mut self) -> Result<(), MigrationError> {
        let columns = self.db.columns(self.table.origin()).await?;
        let has_auto_id = columns.iter().any(|c| c.name == "id" && c.auto_increment);
        if !has_auto_id {
            return Err(MigrationError::MissingAutoIncrementId {
                table: self.table.origin().to_string(),
            });
        }
        Ok(())
    }

    async fn tune_session(&mut self) -> Result<(), MigrationError> {
        let Some(value) = self.db.global_variable("innodb_lock_wait_timeout").await? else {
            return Ok(());
        };
        match value.parse::<i64>() {
            Ok(timeout) => {
                self.db
                    .execute(&format!(
                        "SET SESSION innodb_lock_wait_timeout={}",
                        timeout + LOCK_WAIT_TIMEOUT_DELTA
                    ))
                    .await
            }
            Err(_) => {
                tracing::warn!(%value, "unparseable innodb_lock_wait_timeout, leaving session untuned");
                Ok(())
            }
        }
    }

    async fn create_shadow(&mut self) -> Result<(), MigrationError> {
        debug!(table = %self.table.origin(), shadow = %self.table.shadow(), "creating shadow table");
        self.db
            .execute(&format!(
                "CREATE TABLE `{}` LIKE `{}`",
                self.table.shadow(),
                self.table.origin()
            ))
            .await
    }

    /// Remove non-unique indexes from the shadow table so backfill inserts
    /// cheaply; they come back in [`Migrator::recreate_indexes`].
    async fn drop_shadow_indexes(&mut self) -> Result<(), MigrationError> {
        let indexes = self.db.indexes(self.table.shadow()).await?;
        self.saved_indexes = indexes.into_iter().filter(|idx| !idx.unique).collect();
        for idx in &self.saved_indexes {
            self.db
                .execute(&format!(
                    "ALTER TABLE `{}` DROP INDEX `{}`",
                    self.table.shadow(),
                    idx.name
                ))
                .await?;
        }
        Ok(())
    }

    /// Recreate the indexes removed before backfill in one statement, so
    /// the table is read once rather than once per index.
    async fn recreate_indexes(&mut self) -> Result<(), MigrationError> {
        if self.saved_indexes.is_empty() {
            return Ok(());
        }
        let clauses: Vec<String> = self
            .saved_indexes
            .iter()
            .map(IndexInfo::to_add_clause)
            .collect();
        self.db
            .execute(&format!(
                "ALTER TABLE `{}` {}",
                self.table.shadow(),
                clauses.join(", ")
            ))
            .await
    }

    async fn apply_ddl(&mut self) -> Result<(), MigrationError> {
        for statement in self.table.statements().to_vec() {
            self.db.execute(&statement).await?;
        }
        Ok(())
    }

    /// Install the three AFTER triggers that mirror concurrent writes into
    /// the shadow table. Runs after DDL so the mirrored column set
    /// reflects the post-DDL schema, and before backfill so every write
    /// from this point on lands in the shadow table.
    async fn install_triggers(&mut self) -> Result<(), MigrationError> {
        let origin = self.table.origin().to_string();
        let shadow = self.table.shadow().to_string();

        self.db
            .execute(&format!(
                "CREATE TRIGGER `{}` AFTER DELETE ON `{origin}` FOR EACH ROW \
                 DELETE IGNORE FROM `{shadow}` WHERE `{shadow}`.`id` = `OLD`.`id`",
                self.table.trigger_name(TriggerKind::Delete)
            ))
            .await?;

        let setters: Vec<String> = self
            .common_columns()
            .await?
            .iter()
            .map(|col| format!("`{col}`=`NEW`.`{col}`"))
            .collect();
        let setters = setters.join(", ");

        self.db
            .execute(&format!(
                "CREATE TRIGGER `{}` AFTER INSERT ON `{origin}` FOR EACH ROW \
                 REPLACE INTO `{shadow}` SET {setters}",
                self.table.trigger_name(TriggerKind::Insert)
            ))
            .await?;
        self.db
            .execute(&format!(
                "CREATE TRIGGER `{}` AFTER UPDATE ON `{origin}` FOR EACH ROW \
                 REPLACE INTO `{shadow}` SET {setters}",
                self.table.trigger_name(TriggerKind::Update)
            ))
            .await
    }

    /// Copy the historical id range into the shadow table in adaptive
    /// batches. `INSERT IGNORE` defers to rows the triggers have already
    /// mirrored, which are at least as new as what backfill would write.
    async fn backfill(&mut self) -> Result<(), MigrationError> {
        let common = self.common_columns().await?;
        let origin = self.table.origin().to_string();
        let shadow = self.table.shadow().to_string();
        let insert_columns: Vec<String> = common.iter().map(|c| format!("`{c}`")).collect();
        let insert_columns = insert_columns.join(", ");
        let select_columns: Vec<String> = common
            .iter()
            .map(|c| format!("`{origin}`.`{c}`"))
            .collect();
        let select_columns = select_columns.join(", ");

        let runner = BatchRunner::new(
            self.db,
            &self.reporter,
            &self.cancel,
            self.table.origin(),
            self.config.batch.clone(),
        );
        runner
            .run(move |batch_start, batch_end| {
                Some(format!(
                    "INSERT IGNORE INTO `{shadow}` ({insert_columns}) \
                     SELECT {select_columns} FROM `{origin}` \
                     WHERE `{origin}`.`id` BETWEEN {batch_start} AND {batch_end}"
                ))
            })
            .await
    }

    /// Swap shadow and origin in one atomic rename; the pre-migration
    /// table lives on under the archive name.
    async fn cutover(&mut self) -> Result<(), MigrationError> {
        debug!(table = %self.table.origin(), archive = %self.table.archive(), "cutting over");
        self.db
            .execute(&format!(
                "RENAME TABLE `{}` TO `{}`, `{}` TO `{}`",
                self.table.origin(),
                self.table.archive(),
                self.table.shadow(),
                self.table.origin()
            ))
            .await
    }

    /// Origin ∩ shadow column names, in origin order. Memoized for the
    /// session; computed only after DDL has shaped the shadow table.
    async fn common_columns(&mut self) -> Result<Vec<String>, MigrationError> {
        if let Some(columns) = &self.common_columns {
            return Ok(columns.clone());
        }
        let origin_columns = self.db.columns(self.table.origin()).await?;
        let shadow_columns: HashSet<String> = self
            .db
            .columns(self.table.shadow())
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let common: Vec<String> = origin_columns
            .into_iter()
            .map(|c| c.name)
            .filter(|name| shadow_columns.contains(name))
            .collect();
        self.common_columns = Some(common.clone());
        Ok(common)
    }
}
