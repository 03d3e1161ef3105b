//! Scripted in-memory stand-in for a MySQL session.
//!
//! `FakeDb` records every executed statement and simulates just enough
//! catalog behavior (CREATE LIKE, RENAME, ADD/DROP COLUMN, DROP TABLE)
//! for the engine's introspection calls to see the schema evolve the way
//! a real server would show it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tableshift::{ColumnInfo, Database, IndexInfo, MigrationError};

#[derive(Default)]
struct State {
    tables: Vec<String>,
    columns: HashMap<String, Vec<ColumnInfo>>,
    indexes: HashMap<String, Vec<IndexInfo>>,
    scalars: HashMap<String, i64>,
    variables: HashMap<String, String>,
    executed: Vec<String>,
    fail_on: Option<String>,
}

#[derive(Default)]
pub struct FakeDb {
    state: Mutex<State>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table; `columns` pairs are `(name, auto_increment)`.
    pub fn add_table(&self, name: &str, columns: &[(&str, bool)]) {
        let mut state = self.state.lock().unwrap();
        state.tables.push(name.to_string());
        state.columns.insert(
            name.to_string(),
            columns
                .iter()
                .map(|(col, auto)| ColumnInfo::new(*col, *auto))
                .collect(),
        );
    }

    pub fn add_index(&self, table: &str, index: IndexInfo) {
        self.state
            .lock()
            .unwrap()
            .indexes
            .entry(table.to_string())
            .or_default()
            .push(index);
    }

    /// Can the answer to an exact scalar query.
    pub fn set_scalar(&self, sql: &str, value: i64) {
        self.state
            .lock()
            .unwrap()
            .scalars
            .insert(sql.to_string(), value);
    }

    pub fn set_variable(&self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .variables
            .insert(name.to_string(), value.to_string());
    }

    /// Make any statement containing `fragment` fail.
    pub fn fail_on(&self, fragment: &str) {
        self.state.lock().unwrap().fail_on = Some(fragment.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn tables(&self) -> Vec<String> {
        self.state.lock().unwrap().tables.clone()
    }

    pub fn table_columns(&self, table: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .columns
            .get(table)
            .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }
}

/// Identifiers between backticks, in order of appearance.
fn backtick_idents(sql: &str) -> Vec<String> {
    sql.split('`')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, part)| part.to_string())
        .collect()
}

fn apply_side_effects(state: &mut State, sql: &str) {
    let ids = backtick_idents(sql);
    if sql.starts_with("CREATE TABLE `") && sql.contains("` LIKE `") {
        let (new, src) = (&ids[0], &ids[1]);
        let columns = state.columns.get(src).cloned().unwrap_or_default();
        let indexes = state.indexes.get(src).cloned().unwrap_or_default();
        state.columns.insert(new.clone(), columns);
        state.indexes.insert(new.clone(), indexes);
        state.tables.push(new.clone());
    } else if sql.starts_with("DROP TABLE IF EXISTS `") {
        let name = &ids[0];
        state.tables.retain(|t| t != name);
        state.columns.remove(name);
        state.indexes.remove(name);
    } else if sql.starts_with("RENAME TABLE ") {
        for pair in ids.chunks(2) {
            let (from, to) = (&pair[0], &pair[1]);
            for table in state.tables.iter_mut() {
                if table == from {
                    *table = to.clone();
                }
            }
            if let Some(columns) = state.columns.remove(from) {
                state.columns.insert(to.clone(), columns);
            }
            if let Some(indexes) = state.indexes.remove(from) {
                state.indexes.insert(to.clone(), indexes);
            }
        }
    } else if sql.contains("` ADD COLUMN `") {
        let (table, column) = (&ids[0], &ids[1]);
        state
            .columns
            .entry(table.clone())
            .or_default()
            .push(ColumnInfo::new(column.clone(), false));
    } else if sql.contains("` DROP INDEX `") {
        let (table, index) = (&ids[0], &ids[1]);
        if let Some(list) = state.indexes.get_mut(table) {
            list.retain(|i| &i.name != index);
        }
    } else if sql.contains("` DROP `") {
        let (table, column) = (&ids[0], &ids[1]);
        if let Some(list) = state.columns.get_mut(table) {
            list.retain(|c| &c.name != column);
        }
    }
}

#[async_trait]
impl Database for FakeDb {
    async fn execute(&self, sql: &str) -> Result<(), MigrationError> {
        let mut state = self.state.lock().unwrap();
        if let Some(fragment) = &state.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(MigrationError::Statement {
                    sql: sql.to_string(),
                    message: "injected failure".to_string(),
                });
            }
        }
        state.executed.push(sql.to_string());
        apply_side_effects(&mut state, sql);
        Ok(())
    }

    async fn select_int(&self, sql: &str) -> Result<Option<i64>, MigrationError> {
        Ok(self.state.lock().unwrap().scalars.get(sql).copied())
    }

    async fn global_variable(&self, name: &str) -> Result<Option<String>, MigrationError> {
        Ok(self.state.lock().unwrap().variables.get(name).cloned())
    }

    async fn tables_with_prefix(&self, prefix: &str) -> Result<Vec<String>, MigrationError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .iter()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, MigrationError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .columns
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>, MigrationError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .indexes
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}

/// Cloneable in-memory writer for capturing `Reporter` output.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The `people` fixture used across tests.
pub fn people_db() -> FakeDb {
    let db = FakeDb::new();
    db.add_table(
        "people",
        &[
            ("id", true),
            ("account_id", false),
            ("name", false),
            ("code", false),
            ("created_at", false),
        ],
    );
    db.set_variable("innodb_lock_wait_timeout", "50");
    db
}
