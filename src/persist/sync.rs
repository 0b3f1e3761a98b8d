//! Self-migrating SQLite table for [`Persistable`] records.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::Path;

use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::schema::{
    FieldMap, FieldValue, Persistable, StorageType, TableSchema, column_name, is_safe_identifier,
};
use crate::error::{Result, StoreError};

/// One row ready to write: column names and bound values, primary key first.
struct PreparedRow {
    columns: Vec<String>,
    values: Vec<FieldValue>,
}

/// Keeps a table in step with a record type's declared fields and performs
/// batched transactional upserts and reads.
pub struct SchemaSynchronizer<R: Persistable> {
    conn: Connection,
    table: String,
    /// Columns known to exist, refreshed after each migration.
    columns: BTreeSet<String>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Persistable> SchemaSynchronizer<R> {
    /// Open or create the database at `path` and ensure the table exists.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), table))]
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Startup(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        debug!("Opening profile database");
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Startup(format!("Failed to open database: {e}")))?;
        let sync = Self::with_connection(conn, table)?;
        info!(path = %path.display(), "Profile database ready");
        Ok(sync)
    }

    /// Create an in-memory database.
    pub fn in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Startup(format!("Failed to create in-memory database: {e}")))?;
        Self::with_connection(conn, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        if !is_safe_identifier(table) {
            return Err(StoreError::Schema(format!("invalid table name '{table}'")));
        }
        let mut sync = Self {
            conn,
            table: table.to_string(),
            columns: BTreeSet::new(),
            _record: PhantomData,
        };
        sync.ensure_table()?;
        Ok(sync)
    }

    fn schema() -> &'static TableSchema {
        R::schema()
    }

    #[cfg(test)]
    pub(crate) const fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if missing and add any declared column it lacks.
    pub fn ensure_table(&mut self) -> Result<()> {
        let schema = Self::schema();
        let pk = column_name(schema.primary_key);
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (\"{pk}\" TEXT PRIMARY KEY NOT NULL, \"{blob}\" TEXT)",
            table = self.table,
            blob = schema.blob_column,
        ))?;
        self.refresh_columns()?;

        let declared: Vec<(String, StorageType)> = schema
            .column_fields()
            .map(|f| (column_name(f.name), f.storage))
            .collect();
        self.migrate(&declared)?;
        Ok(())
    }

    fn refresh_columns(&mut self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", self.table))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        self.columns = names.collect::<rusqlite::Result<BTreeSet<_>>>()?;
        trace!(columns = self.columns.len(), "Refreshed table columns");
        Ok(())
    }

    /// Add every listed column the table does not have yet.
    ///
    /// Returns the number of columns added. Added columns are nullable so
    /// existing rows stay valid.
    #[instrument(skip(self, wanted), fields(table = %self.table))]
    pub fn migrate(&mut self, wanted: &[(String, StorageType)]) -> Result<usize> {
        let missing: Vec<&(String, StorageType)> = wanted
            .iter()
            .filter(|(name, _)| !self.columns.contains(name))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        for (name, storage) in &missing {
            if !is_safe_identifier(name) {
                return Err(StoreError::Schema(format!("invalid column name '{name}'")));
            }
            info!(column = %name, sql_type = storage.sql_type(), "Adding column");
            self.conn.execute_batch(&format!(
                "ALTER TABLE \"{}\" ADD COLUMN \"{name}\" {}",
                self.table,
                storage.sql_type()
            ))?;
        }
        self.refresh_columns()?;
        Ok(missing.len())
    }

    /// Column names currently present, in table order.
    pub fn columns(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", self.table))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        Ok(names.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Split a record's fields into columns and the blob payload.
    fn prepare_row(record: &R) -> Result<PreparedRow> {
        let schema = Self::schema();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut payload = serde_json::Map::new();

        for (name, value) in record.to_fields()? {
            if schema.is_excluded(name) {
                let json = match value {
                    FieldValue::Json(v) => v,
                    other => {
                        return Err(StoreError::Schema(format!(
                            "excluded field '{name}' must be JSON, got {other:?}"
                        )));
                    }
                };
                payload.insert(name.to_string(), json);
            } else {
                columns.push(column_name(name));
                values.push(value);
            }
        }

        let pk = column_name(schema.primary_key);
        if columns.first() != Some(&pk) {
            return Err(StoreError::Schema(format!(
                "primary key '{}' must be the first field",
                schema.primary_key
            )));
        }
        for field in schema.fields.iter().filter(|f| !f.nullable) {
            let present = if schema.is_excluded(field.name) {
                payload.contains_key(field.name)
            } else {
                columns.contains(&column_name(field.name))
            };
            if !present {
                return Err(StoreError::Schema(format!(
                    "required field '{}' is missing",
                    field.name
                )));
            }
        }

        columns.push(schema.blob_column.to_string());
        values.push(FieldValue::Json(serde_json::Value::Object(payload)));
        Ok(PreparedRow { columns, values })
    }

    /// Build the upsert statement for one field set.
    ///
    /// Declared nullable columns missing from the set are cleared on update.
    fn upsert_sql(&self, columns: &[String]) -> String {
        let schema = Self::schema();
        let pk = &columns[0];
        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

        let mut assignments: Vec<String> = columns[1..]
            .iter()
            .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
            .collect();
        for field in schema.column_fields().filter(|f| f.nullable) {
            let col = column_name(field.name);
            if !columns.contains(&col) {
                assignments.push(format!("\"{col}\" = NULL"));
            }
        }

        format!(
            "INSERT INTO \"{table}\" ({cols}) VALUES ({vals}) ON CONFLICT(\"{pk}\") DO UPDATE SET {sets}",
            table = self.table,
            cols = quoted.join(", "),
            vals = placeholders.join(", "),
            sets = assignments.join(", "),
        )
    }

    /// Insert or update every record in one transaction.
    ///
    /// Records are grouped by field set and each group gets one statement.
    /// Any failure rolls the whole batch back; on success returns the number
    /// of rows written.
    #[instrument(skip(self, records), fields(table = %self.table, count = records.len()))]
    pub fn upsert_batch(&mut self, records: &[R]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut groups: BTreeMap<Vec<String>, Vec<Vec<FieldValue>>> = BTreeMap::new();
        for record in records {
            let row = Self::prepare_row(record).inspect_err(|e| {
                warn!(key = %record.key(), error = %e, "Record cannot be written, batch aborted");
            })?;
            groups.entry(row.columns).or_default().push(row.values);
        }

        // Columns observed in this batch that the table has not seen.
        let schema = Self::schema();
        let observed: Vec<(String, StorageType)> = groups
            .keys()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|c| {
                let storage = schema
                    .field_for_column(c)
                    .map_or(StorageType::Text, |f| f.storage);
                (c.clone(), storage)
            })
            .collect();
        self.migrate(&observed)?;

        let statements: Vec<(String, Vec<Vec<FieldValue>>)> = groups
            .into_iter()
            .map(|(columns, rows)| (self.upsert_sql(&columns), rows))
            .collect();
        debug!(field_sets = statements.len(), "Upserting batch");

        let tx = self.conn.transaction()?;
        let mut written = 0;
        for (sql, rows) in &statements {
            trace!(%sql, rows = rows.len(), "Executing upsert");
            let mut stmt = tx.prepare(sql)?;
            for values in rows {
                written += stmt.execute(params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;

        info!(written, "Batch upserted");
        Ok(written)
    }

    /// Read every row back into records.
    ///
    /// A field whose stored value does not decode is logged and skipped; a
    /// row that cannot form a record is logged and skipped.
    #[instrument(skip(self), fields(table = %self.table))]
    pub fn load_all(&self) -> Result<Vec<R>> {
        let schema = Self::schema();
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM \"{}\"", self.table))?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|c| (*c).to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        let mut skipped = 0usize;

        while let Some(row) = rows.next()? {
            let mut fields = FieldMap::new();
            for (i, column) in column_names.iter().enumerate() {
                let raw = row.get_ref(i)?;

                if column == schema.blob_column {
                    decode_payload(schema, raw, &mut fields);
                    continue;
                }

                let Some(field) = schema.field_for_column(column) else {
                    trace!(%column, "Ignoring undeclared column");
                    continue;
                };
                match field.storage.decode(raw) {
                    Some(FieldValue::Null) => {}
                    Some(value) => {
                        fields.insert(field.name.to_string(), value);
                    }
                    None => warn!(
                        %column,
                        expected = ?field.storage,
                        "Column value does not match declared type, skipping field"
                    ),
                }
            }

            match R::from_fields(fields) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "Skipping unreadable row");
                }
            }
        }

        debug!(loaded = records.len(), skipped, "Rows loaded");
        Ok(records)
    }

    /// Delete rows by primary key in one transaction. Returns rows removed.
    #[instrument(skip(self, ids), fields(table = %self.table, count = ids.len()))]
    pub fn delete(&mut self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1",
            self.table,
            column_name(Self::schema().primary_key)
        );
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                removed += stmt.execute([FieldValue::Uuid(*id)])?;
            }
        }
        tx.commit()?;
        debug!(removed, "Rows deleted");
        Ok(removed)
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

impl<R: Persistable> std::fmt::Debug for SchemaSynchronizer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSynchronizer")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

fn decode_payload(schema: &TableSchema, raw: rusqlite::types::ValueRef<'_>, fields: &mut FieldMap) {
    match StorageType::Json.decode(raw) {
        Some(FieldValue::Json(serde_json::Value::Object(map))) => {
            for (name, value) in map {
                if schema.is_excluded(&name) {
                    fields.insert(name, FieldValue::Json(value));
                }
            }
        }
        Some(FieldValue::Null) => {}
        _ => warn!(column = schema.blob_column, "Unreadable payload, skipping field"),
    }
}
