//! The database seam.
//!
//! The engine drives an external relational database through the
//! [`Database`] trait: raw statement execution, scalar queries, and the
//! schema introspection the migration protocol depends on. The engine
//! issues only standard DDL/DML and assumes MySQL semantics: atomic
//! multi-table `RENAME TABLE`, `REPLACE INTO`, `INSERT IGNORE`, and
//! row-level triggers executing inside the triggering statement's
//! transaction.

use async_trait::async_trait;

use crate::error::MigrationError;

/// Column metadata, in table definition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Whether the column is auto-incrementing.
    pub auto_increment: bool,
}

impl ColumnInfo {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, auto_increment: bool) -> Self {
        Self {
            name: name.into(),
            auto_increment,
        }
    }
}

/// Secondary-index metadata (the primary key is never listed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Per-column prefix lengths, parallel to `columns`.
    pub lengths: Vec<Option<u32>>,
    /// Index algorithm (e.g. `BTREE`), when known.
    pub algorithm: Option<String>,
}

impl IndexInfo {
    /// Render the `ADD ... INDEX` clause that recreates this index.
    pub fn to_add_clause(&self) -> String {
        let keyword = if self.unique { "ADD UNIQUE INDEX" } else { "ADD INDEX" };
        let cols: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| match self.lengths.get(i).copied().flatten() {
                Some(len) => format!("`{col}`({len})"),
                None => format!("`{col}`"),
            })
            .collect();
        let mut clause = format!("{keyword} `{}` ({})", self.name, cols.join(", "));
        if let Some(algo) = &self.algorithm {
            clause.push_str(" USING ");
            clause.push_str(algo);
        }
        clause
    }
}

/// Connection to the database hosting the tables under migration.
///
/// One value represents one session; the engine issues every statement of
/// a migration through the same session, sequentially. Implementations are
/// not required to support concurrent migrations over a single session.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute a statement, discarding any result set.
    async fn execute(&self, sql: &str) -> Result<(), MigrationError>;

    /// Run a scalar query returning a single nullable integer
    /// (e.g. `SELECT MIN(id) ...`, which is NULL on an empty table).
    async fn select_int(&self, sql: &str) -> Result<Option<i64>, MigrationError>;

    /// Look up a global server variable, `None` when the server has no
    /// such setting.
    async fn global_variable(&self, name: &str) -> Result<Option<String>, MigrationError>;

    /// List table names starting with `prefix`, in the current schema.
    async fn tables_with_prefix(&self, prefix: &str) -> Result<Vec<String>, MigrationError>;

    /// List a table's columns in definition order.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, MigrationError>;

    /// List a table's secondary indexes.
    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, MigrationError>;
}
