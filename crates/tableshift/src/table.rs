//! Table descriptor: derived names and pending DDL.
//!
//! A [`TableChange`] is pure data. It derives the shadow-table and
//! archive-table names from the origin table name with no database access,
//! and accumulates the ordered DDL statements the migrator will apply to
//! the shadow table before backfill.

use chrono::{DateTime, Utc};

use crate::error::MigrationError;

/// Prefix for shadow (in-flight copy) tables.
pub const SHADOW_PREFIX: &str = "shift_";
/// Prefix for archive (pre-migration original) tables.
pub const ARCHIVE_PREFIX: &str = "shifta_";
/// Prefix for change-mirroring triggers.
pub const TRIGGER_PREFIX: &str = "shiftt_";

/// MySQL identifier length limit.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Timestamp layout embedded in archive table names. Fixed width, so
/// archive names sort lexicographically by creation time for a fixed
/// origin-name length.
pub(crate) const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%f";

/// The three change-mirroring trigger kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// AFTER DELETE.
    Delete,
    /// AFTER INSERT.
    Insert,
    /// AFTER UPDATE.
    Update,
}

impl TriggerKind {
    /// All kinds, in the order they are installed and dropped.
    pub const ALL: [TriggerKind; 3] = [TriggerKind::Delete, TriggerKind::Insert, TriggerKind::Update];

    pub(crate) fn tag(self) -> &'static str {
        match self {
            TriggerKind::Delete => "del",
            TriggerKind::Insert => "ins",
            TriggerKind::Update => "upd",
        }
    }
}

/// Options for [`TableChange::add_index`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Create a UNIQUE index.
    pub unique: bool,
    /// Explicit index name; derived from the columns when absent.
    pub name: Option<String>,
    /// Per-column prefix lengths, `(column, length)`.
    pub lengths: Vec<(String, u32)>,
}

/// A pending change to one table: derived names plus ordered DDL.
#[derive(Debug, Clone)]
pub struct TableChange {
    origin: String,
    shadow: String,
    archive: String,
    statements: Vec<String>,
}

impl TableChange {
    /// Describe a change to `origin`, stamping the archive name with the
    /// current time.
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_archive_time(origin, Utc::now())
    }

    /// Like [`TableChange::new`] with an explicit archive timestamp.
    pub fn with_archive_time(origin: impl Into<String>, at: DateTime<Utc>) -> Self {
        let origin = origin.into();
        let shadow = truncate_identifier(format!("{SHADOW_PREFIX}{origin}"));
        let archive = truncate_identifier(format!(
            "{ARCHIVE_PREFIX}{}_{origin}",
            at.format(ARCHIVE_TIMESTAMP_FORMAT)
        ));
        Self {
            origin,
            shadow,
            archive,
            statements: Vec::new(),
        }
    }

    /// The live table being migrated.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The shadow-copy table name. At most one in-flight migration can
    /// exist per origin, because this name is deterministic.
    pub fn shadow(&self) -> &str {
        &self.shadow
    }

    /// The timestamped archive name the origin is renamed to at cutover.
    pub fn archive(&self) -> &str {
        &self.archive
    }

    /// The pending DDL, in application order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Append a raw DDL statement. The statement text is opaque to the
    /// engine; the database judges it at apply time.
    pub fn ddl(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    /// Append a free-form `ALTER TABLE <shadow> {definition}`.
    pub fn alter(&mut self, definition: &str) {
        self.ddl(format!("ALTER TABLE `{}` {definition}", self.shadow));
    }

    /// Add a column to the shadow table.
    pub fn add_column(&mut self, name: &str, definition: &str) {
        self.ddl(format!(
            "ALTER TABLE `{}` ADD COLUMN `{name}` {definition}",
            self.shadow
        ));
    }

    /// Change a column definition on the shadow table.
    pub fn change_column(&mut self, name: &str, definition: &str) {
        self.ddl(format!(
            "ALTER TABLE `{}` MODIFY COLUMN `{name}` {definition}",
            self.shadow
        ));
    }

    /// Drop a column from the shadow table.
    pub fn remove_column(&mut self, name: &str) {
        self.ddl(format!("ALTER TABLE `{}` DROP `{name}`", self.shadow));
    }

    /// Add an index to the shadow table.
    pub fn add_index(&mut self, columns: &[&str], options: IndexOptions) {
        let name = match &options.name {
            Some(name) => name.clone(),
            None => truncate_identifier(format!(
                "index_{}_on_{}",
                self.origin,
                columns.join("_and_")
            )),
        };
        let cols: Vec<String> = columns
            .iter()
            .map(|col| {
                match options.lengths.iter().find(|(c, _)| c == col) {
                    Some((_, len)) => format!("`{col}`({len})"),
                    None => format!("`{col}`"),
                }
            })
            .collect();
        let unique = if options.unique { "UNIQUE " } else { "" };
        self.ddl(format!(
            "ALTER TABLE `{}` ADD {unique}INDEX `{name}` ({})",
            self.shadow,
            cols.join(", ")
        ));
    }

    /// Drop an index from the shadow table.
    pub fn remove_index(&mut self, name: &str) {
        self.ddl(format!("ALTER TABLE `{}` DROP INDEX `{name}`", self.shadow));
    }

    /// Rejected: renaming a live column breaks the change-mirroring
    /// triggers, which copy by exact column name. Add the new column in
    /// one migration, deploy, then remove the old column in a later one.
    pub fn rename_column(&self, old_name: &str, new_name: &str) -> Result<(), MigrationError> {
        Err(MigrationError::RenameUnsupported {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        })
    }

    /// Derived trigger name for one trigger kind.
    pub fn trigger_name(&self, kind: TriggerKind) -> String {
        truncate_identifier(format!("{TRIGGER_PREFIX}{}_{}", kind.tag(), self.origin))
    }
}

/// Clip an identifier to [`MAX_IDENTIFIER_LEN`] bytes, dropping trailing
/// characters. The distinguishing prefix (and, for archive names, the
/// timestamp) sits at the front and always survives.
pub(crate) fn truncate_identifier(mut name: String) -> String {
    if name.len() > MAX_IDENTIFIER_LEN {
        let mut end = MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}
