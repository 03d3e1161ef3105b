//! Cleanup of leftover shadow and expired archive tables.
//!
//! A crashed migration leaves a shadow table and triggers behind; a
//! finished one leaves a timestamped archive. The sweeper removes both:
//! shadows unconditionally (re-running the migrator's idempotent cleanup
//! against the reconstructed origin), archives once they age past an
//! optional cutoff.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::MigrationError;
use crate::migrator::Migrator;
use crate::report::Reporter;
use crate::table::{TableChange, ARCHIVE_PREFIX, ARCHIVE_TIMESTAMP_FORMAT, SHADOW_PREFIX};

/// Drop orphaned shadow tables (and their triggers), then archives at or
/// before `before`; all archives when no cutoff is given.
pub(crate) async fn cleanup_all(
    db: &dyn Database,
    reporter: &Reporter,
    before: Option<DateTime<Utc>>,
) -> Result<(), MigrationError> {
    for shadow in db.tables_with_prefix(SHADOW_PREFIX).await? {
        let origin = shadow
            .strip_prefix(SHADOW_PREFIX)
            .unwrap_or(shadow.as_str())
            .to_string();
        debug!(table = %shadow, "removing orphaned shadow table");
        Migrator::new(db, TableChange::new(origin))
            .with_reporter(reporter.clone())
            .cleanup()
            .await?;
    }

    for archive in db.tables_with_prefix(ARCHIVE_PREFIX).await? {
        if let Some(cutoff) = before {
            match archive_timestamp(&archive) {
                Some(created) if created <= cutoff => {}
                Some(_) => continue,
                None => {
                    warn!(table = %archive, "archive name has no parseable timestamp, keeping it");
                    continue;
                }
            }
        }
        debug!(table = %archive, "dropping archive table");
        db.execute(&format!("DROP TABLE IF EXISTS `{archive}`")).await?;
    }
    Ok(())
}

/// Parse the creation timestamp embedded in an archive table name.
fn archive_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let rest = name.strip_prefix(ARCHIVE_PREFIX)?;
    let (naive, _tail) = NaiveDateTime::parse_and_remainder(rest, ARCHIVE_TIMESTAMP_FORMAT).ok()?;
    Some(naive.and_utc())
}
