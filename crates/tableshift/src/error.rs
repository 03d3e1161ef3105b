//! Error types for the migration engine.

use thiserror::Error;

/// Errors raised by the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The origin table has no auto-increment `id` primary key.
    ///
    /// Backfill and change-mirroring key every copy and delete off `id`,
    /// so a table without one cannot be migrated online.
    #[error("Cannot migrate table `{table}`, missing auto increment primary key `id`")]
    MissingAutoIncrementId {
        /// The table that failed validation.
        table: String,
    },

    /// A column rename was requested.
    ///
    /// Renaming a live column breaks the change-mirroring triggers, which
    /// copy by exact column name. The supported alternative is a two-phase
    /// add-then-remove across separate deploys.
    #[error(
        "Unsupported: you must first run a migration adding the column `{new_name}`, \
         deploy the code live, then run another migration at a later time to remove \
         the column `{old_name}`"
    )]
    RenameUnsupported {
        /// The column the caller wanted to rename.
        old_name: String,
        /// The requested new name.
        new_name: String,
    },

    /// A DDL or DML statement failed at the database.
    #[error("statement failed: {message} (statement: {sql})")]
    Statement {
        /// The statement that failed.
        sql: String,
        /// The database error message.
        message: String,
    },

    /// A connection-level database failure (not tied to one statement).
    #[error("database error: {message}")]
    Database {
        /// The driver error message.
        message: String,
    },

    /// The migration was cancelled by a termination request.
    ///
    /// Cleanup has already run by the time this reaches the caller; the
    /// origin table was never swapped.
    #[error("migration cancelled before cutover")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_id_message() {
        let err = MigrationError::MissingAutoIncrementId {
            table: "people_teams".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot migrate table `people_teams`, missing auto increment primary key `id`"
        );
    }

    #[test]
    fn test_rename_message_names_both_columns() {
        let err = MigrationError::RenameUnsupported {
            old_name: "email".to_string(),
            new_name: "email_address".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Unsupported:"));
        assert!(msg.contains("`email_address`"));
        assert!(msg.contains("`email`"));
    }
}
