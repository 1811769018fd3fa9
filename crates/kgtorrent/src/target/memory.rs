//! In-memory destination.
//!
//! Enforces what PostgreSQL would enforce when keys and foreign keys are
//! added after loading, so dry runs and tests see the same hardening
//! failures a real database reports.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{ForeignKeyDef, KeyKind, TargetStore, WriteOptions};
use crate::core::schema::Column;
use crate::core::value::{KeyValue, Row, Value};
use crate::download::{NotebookFilter, NotebookId};
use crate::error::{LoadError, Result};
use crate::typemap::column_type_to_postgres;

#[derive(Debug, Default)]
struct MemTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
    unique_columns: Vec<String>,
}

impl MemTable {
    fn column_index(&self, table: &str, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| LoadError::Config(format!("table {} has no column {}", table, column)))
    }
}

#[derive(Debug, Default)]
struct Inner {
    schemas: HashSet<String>,
    tables: BTreeMap<(String, String), MemTable>,
    /// Constraint name to the tables it spans.
    constraints: HashMap<(String, String), Vec<String>>,
    write_log: Vec<String>,
    failing: HashSet<String>,
}

/// Destination that keeps every table in a map.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    inner: Mutex<Inner>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `table` fail.
    pub fn fail_writes_for(&self, table: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(table.to_string());
        }
    }

    /// Rows currently stored in `schema.table`.
    pub fn rows(&self, schema: &str, table: &str) -> Option<Vec<Row>> {
        let inner = self.inner.lock().ok()?;
        inner
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
    }

    /// How many times `write_rows` was called for `table`.
    pub fn write_count(&self, table: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.write_log.iter().filter(|t| *t == table).count())
            .unwrap_or(0)
    }

    /// Tables in the order they were written.
    pub fn write_log(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.write_log.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| LoadError::pool("memory target lock poisoned", "MemoryTarget"))
    }
}

fn key_of(table: &str, schema: &str) -> (String, String) {
    (schema.to_string(), table.to_string())
}

fn missing_table(schema: &str, table: &str) -> LoadError {
    LoadError::transfer(table, format!("relation {}.{} does not exist", schema, table))
}

/// `Int` view of a value, for the notebook join.
fn as_int(value: &Value) -> Option<i64> {
    match value.key()? {
        KeyValue::Int(n) => Some(n),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.lock()?.schemas.insert(schema.to_string());
        Ok(())
    }

    async fn existing_tables(&self, schema: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .tables
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.tables.remove(&key_of(table, schema));
        inner
            .constraints
            .retain(|(s, _), tables| s != schema || !tables.iter().any(|t| t == table));
        Ok(())
    }

    async fn create_table(&self, schema: &str, table: &str, columns: &[Column]) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.schemas.contains(schema) {
            return Err(LoadError::transfer(
                table,
                format!("schema {} does not exist", schema),
            ));
        }
        let key = key_of(table, schema);
        if inner.tables.contains_key(&key) {
            return Err(LoadError::transfer(
                table,
                format!("relation {}.{} already exists", schema, table),
            ));
        }
        inner.tables.insert(
            key,
            MemTable {
                columns: columns.to_vec(),
                ..Default::default()
            },
        );
        debug!("Created table {}.{}", schema, table);
        Ok(())
    }

    async fn write_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[Column],
        rows: &[Row],
        _options: &WriteOptions,
    ) -> Result<u64> {
        let mut inner = self.lock()?;
        inner.write_log.push(table.to_string());
        let failing = inner.failing.contains(table);

        let t = inner
            .tables
            .get_mut(&key_of(table, schema))
            .ok_or_else(|| missing_table(schema, table))?;
        if failing {
            t.rows.clear();
            return Err(LoadError::transfer(table, "injected write failure"));
        }
        if t.columns.len() != columns.len() {
            return Err(LoadError::transfer(
                table,
                format!(
                    "expected {} columns, got {}",
                    t.columns.len(),
                    columns.len()
                ),
            ));
        }
        t.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn add_key(
        &self,
        schema: &str,
        table: &str,
        kind: KeyKind,
        column: &str,
        name: &str,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let constraint = (schema.to_string(), name.to_string());
        if inner.constraints.contains_key(&constraint) {
            return Err(LoadError::violation(table, name, "constraint already exists"));
        }

        let t = inner
            .tables
            .get_mut(&key_of(table, schema))
            .ok_or_else(|| missing_table(schema, table))?;
        let idx = t.column_index(table, column)?;

        let mut seen = HashSet::with_capacity(t.rows.len());
        for row in &t.rows {
            match row[idx].key() {
                None if kind == KeyKind::Primary => {
                    return Err(LoadError::violation(
                        table,
                        name,
                        format!("column {} contains null values", column),
                    ));
                }
                None => {}
                Some(k) => {
                    if !seen.insert(k) {
                        return Err(LoadError::violation(
                            table,
                            name,
                            format!("duplicate key value {} in {}", row[idx], column),
                        ));
                    }
                }
            }
        }

        t.unique_columns.push(column.to_string());
        inner.constraints.insert(constraint, vec![table.to_string()]);
        Ok(())
    }

    async fn add_foreign_key(&self, schema: &str, fk: &ForeignKeyDef) -> Result<()> {
        let mut inner = self.lock()?;
        let constraint = (schema.to_string(), fk.name.clone());
        if inner.constraints.contains_key(&constraint) {
            return Err(LoadError::violation(&fk.table, &fk.name, "constraint already exists"));
        }

        let referenced = inner
            .tables
            .get(&key_of(&fk.referenced_table, schema))
            .ok_or_else(|| missing_table(schema, &fk.referenced_table))?;
        if !referenced.unique_columns.contains(&fk.referenced_column) {
            return Err(LoadError::violation(
                &fk.table,
                &fk.name,
                format!(
                    "there is no unique constraint matching given keys for referenced table {}",
                    fk.referenced_table
                ),
            ));
        }
        let ridx = referenced.column_index(&fk.referenced_table, &fk.referenced_column)?;
        let keys: HashSet<KeyValue> = referenced.rows.iter().filter_map(|r| r[ridx].key()).collect();

        let t = inner
            .tables
            .get(&key_of(&fk.table, schema))
            .ok_or_else(|| missing_table(schema, &fk.table))?;
        let idx = t.column_index(&fk.table, &fk.column)?;
        let (fk_type, referenced_type) = (
            t.columns[idx].column_type,
            referenced.columns[ridx].column_type,
        );
        if fk_type != referenced_type {
            return Err(LoadError::violation(
                &fk.table,
                &fk.name,
                format!(
                    "key columns \"{}\" and \"{}\" are of incompatible types: {} and {}",
                    fk.column,
                    fk.referenced_column,
                    column_type_to_postgres(fk_type),
                    column_type_to_postgres(referenced_type)
                ),
            ));
        }
        if let Some(row) = t
            .rows
            .iter()
            .find(|r| r[idx].key().is_some_and(|k| !keys.contains(&k)))
        {
            return Err(LoadError::violation(
                &fk.table,
                &fk.name,
                format!(
                    "key ({})=({}) is not present in table {}",
                    fk.column, row[idx], fk.referenced_table
                ),
            ));
        }

        inner.constraints.insert(
            constraint,
            vec![fk.table.clone(), fk.referenced_table.clone()],
        );
        Ok(())
    }

    async fn notebook_identifiers(
        &self,
        schema: &str,
        filter: &NotebookFilter,
    ) -> Result<Vec<NotebookId>> {
        let inner = self.lock()?;
        let get = |name: &str| {
            inner
                .tables
                .get(&key_of(name, schema))
                .ok_or_else(|| missing_table(schema, name))
        };
        let (kernels, users, versions, languages) = (
            get("kernels")?,
            get("users")?,
            get("kernelversions")?,
            get("kernellanguages")?,
        );

        let (lang_id, lang_name) = (
            languages.column_index("kernellanguages", "Id")?,
            languages.column_index("kernellanguages", "Name")?,
        );
        let wanted: HashSet<i64> = languages
            .rows
            .iter()
            .filter(|r| {
                as_text(&r[lang_name]).is_some_and(|n| filter.languages.iter().any(|l| *l == n))
            })
            .filter_map(|r| as_int(&r[lang_id]))
            .collect();

        let (ver_id, ver_lang, ver_lines) = (
            versions.column_index("kernelversions", "Id")?,
            versions.column_index("kernelversions", "ScriptLanguageId")?,
            versions.column_index("kernelversions", "TotalLines")?,
        );
        let eligible: HashSet<i64> = versions
            .rows
            .iter()
            .filter(|r| as_int(&r[ver_lang]).is_some_and(|l| wanted.contains(&l)))
            .filter(|r| as_int(&r[ver_lines]).is_some_and(|n| n >= filter.min_lines))
            .filter_map(|r| as_int(&r[ver_id]))
            .collect();

        let (user_id, user_name) = (
            users.column_index("users", "Id")?,
            users.column_index("users", "UserName")?,
        );
        let owners: HashMap<i64, String> = users
            .rows
            .iter()
            .filter_map(|r| Some((as_int(&r[user_id])?, as_text(&r[user_name])?)))
            .collect();

        let (author, slug, current) = (
            kernels.column_index("kernels", "AuthorUserId")?,
            kernels.column_index("kernels", "CurrentUrlSlug")?,
            kernels.column_index("kernels", "CurrentKernelVersionId")?,
        );
        let mut ids: Vec<NotebookId> = kernels
            .rows
            .iter()
            .filter_map(|r| {
                let version = as_int(&r[current]).filter(|v| eligible.contains(v))?;
                let owner = owners.get(&as_int(&r[author])?)?;
                Some(NotebookId::new(owner.clone(), as_text(&r[slug])?, version))
            })
            .collect();
        ids.sort_by(|a, b| (&a.owner, &a.slug).cmp(&(&b.owner, &b.slug)));
        Ok(ids)
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}
