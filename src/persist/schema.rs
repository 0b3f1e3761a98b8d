//! Compile-time table descriptors and field values.
//!
//! A record type declares its persisted fields once in a [`TableSchema`];
//! the synchronizer derives columns, migrations, and upsert statements from
//! it instead of inspecting the type at runtime.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::profile::{FlatSettings, ProfileRecord, Variant};

/// How a field is stored and decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Text,
    Integer,
    Real,
    /// Stored as 0/1.
    Boolean,
    /// Hyphenated string form.
    Uuid,
    /// RFC 3339 with nanoseconds.
    Timestamp,
    /// Lowercase variant name.
    Enum,
    /// Serialized JSON. Only valid for excluded fields or blob payloads.
    Json,
}

impl StorageType {
    /// SQLite column affinity.
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Uuid | Self::Timestamp | Self::Enum | Self::Json => "TEXT",
        }
    }

    /// Decode a column value. Returns `None` on a type mismatch.
    pub fn decode(self, value: ValueRef<'_>) -> Option<FieldValue> {
        if matches!(value, ValueRef::Null) {
            return Some(FieldValue::Null);
        }
        match (self, value) {
            (Self::Integer, ValueRef::Integer(i)) => Some(FieldValue::Integer(i)),
            (Self::Boolean, ValueRef::Integer(i)) => Some(FieldValue::Bool(i != 0)),
            (Self::Real, ValueRef::Real(f)) => Some(FieldValue::Real(f)),
            #[allow(clippy::cast_precision_loss)]
            (Self::Real, ValueRef::Integer(i)) => Some(FieldValue::Real(i as f64)),
            (storage, ValueRef::Text(bytes)) => {
                let text = std::str::from_utf8(bytes).ok()?;
                match storage {
                    Self::Text => Some(FieldValue::Text(text.to_string())),
                    Self::Enum => Some(FieldValue::Enum(text.to_string())),
                    Self::Uuid => Uuid::parse_str(text).ok().map(FieldValue::Uuid),
                    Self::Timestamp => DateTime::parse_from_rfc3339(text)
                        .ok()
                        .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc))),
                    Self::Json => serde_json::from_str(text).ok().map(FieldValue::Json),
                    Self::Integer | Self::Boolean | Self::Real => None,
                }
            }
            _ => None,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field identifier as the record names it (camelCase).
    pub name: &'static str,
    pub storage: StorageType,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub const fn required(name: &'static str, storage: StorageType) -> Self {
        Self {
            name,
            storage,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, storage: StorageType) -> Self {
        Self {
            name,
            storage,
            nullable: true,
        }
    }
}

/// Declared layout of a persisted record type.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub primary_key: &'static str,
    pub fields: &'static [FieldDescriptor],
    /// Fields serialized together into the blob column instead of their own.
    pub excluded: &'static [&'static str],
    pub blob_column: &'static str,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(&name)
    }

    /// Declared fields that get their own column, primary key first.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !self.is_excluded(f.name))
    }

    /// Map a column name back to a declared field identifier.
    pub fn field_for_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.column_fields().find(|f| column_name(f.name) == column)
    }
}

/// Translate a field identifier to its column name (`lastUpdated` → `last_updated`).
pub fn column_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, c) in field.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether `ident` can be spliced into SQL as a quoted identifier.
pub fn is_safe_identifier(ident: &str) -> bool {
    !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A single persisted field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Enum(String),
    Json(serde_json::Value),
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(s) | Self::Enum(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Uuid(u) => ToSqlOutput::Owned(Value::Text(u.to_string())),
            Self::Timestamp(t) => {
                ToSqlOutput::Owned(Value::Text(t.to_rfc3339_opts(SecondsFormat::Nanos, true)))
            }
            Self::Json(v) => ToSqlOutput::Owned(Value::Text(
                serde_json::to_string(v)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            )),
        })
    }
}

/// Decoded fields of one row, keyed by field identifier.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A record type with a declared table layout.
pub trait Persistable: Sized {
    fn schema() -> &'static TableSchema;

    fn key(&self) -> Uuid;

    /// Present fields in declaration order. Absent optional fields are
    /// omitted, so field sets may differ between records.
    fn to_fields(&self) -> Result<Vec<(&'static str, FieldValue)>>;

    /// Rebuild a record from decoded fields.
    fn from_fields(fields: FieldMap) -> Result<Self>;
}

static PROFILE_FIELDS: [FieldDescriptor; 7] = [
    FieldDescriptor::required("id", StorageType::Uuid),
    FieldDescriptor::required("name", StorageType::Text),
    FieldDescriptor::required("variant", StorageType::Enum),
    FieldDescriptor::required("isDefault", StorageType::Boolean),
    FieldDescriptor::optional("description", StorageType::Text),
    FieldDescriptor::required("lastUpdated", StorageType::Timestamp),
    FieldDescriptor::required("settingsMap", StorageType::Json),
];

static PROFILE_SCHEMA: TableSchema = TableSchema {
    primary_key: "id",
    fields: &PROFILE_FIELDS,
    excluded: &["settingsMap"],
    blob_column: "payload",
};

impl Persistable for ProfileRecord {
    fn schema() -> &'static TableSchema {
        &PROFILE_SCHEMA
    }

    fn key(&self) -> Uuid {
        self.id()
    }

    fn to_fields(&self) -> Result<Vec<(&'static str, FieldValue)>> {
        let mut fields = vec![
            ("id", FieldValue::Uuid(self.id())),
            ("name", FieldValue::Text(self.name().to_string())),
            ("variant", FieldValue::Enum(self.variant().as_str().to_string())),
            ("isDefault", FieldValue::Bool(self.is_default())),
        ];
        if let Some(description) = self.description() {
            fields.push(("description", FieldValue::Text(description.to_string())));
        }
        fields.push(("lastUpdated", FieldValue::Timestamp(self.last_updated())));
        fields.push((
            "settingsMap",
            FieldValue::Json(serde_json::to_value(self.settings())?),
        ));
        Ok(fields)
    }

    fn from_fields(mut fields: FieldMap) -> Result<Self> {
        let id = match fields.remove("id") {
            Some(FieldValue::Uuid(id)) => id,
            _ => return Err(StoreError::Schema("row has no usable id".to_string())),
        };
        let name = match fields.remove("name") {
            Some(FieldValue::Text(name)) => name,
            _ => return Err(StoreError::Schema(format!("row {id} has no name"))),
        };
        let last_updated = match fields.remove("lastUpdated") {
            Some(FieldValue::Timestamp(t)) => t,
            _ => {
                warn!(%id, "Row has no lastUpdated, using now");
                Utc::now()
            }
        };
        let settings: FlatSettings = match fields.remove("settingsMap") {
            Some(FieldValue::Json(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(%id, error = %e, "Unreadable settings payload, using empty map");
                FlatSettings::new()
            }),
            _ => FlatSettings::new(),
        };

        let mut record = Self::from_parts(id, name, settings, last_updated);
        if let Some(FieldValue::Enum(v)) = fields.remove("variant") {
            match v.parse::<Variant>() {
                Ok(variant) => record = record.with_variant(variant),
                Err(_) => warn!(%id, variant = %v, "Unknown variant, using default"),
            }
        }
        if let Some(FieldValue::Bool(b)) = fields.remove("isDefault") {
            record = record.with_default_flag(b);
        }
        if let Some(FieldValue::Text(d)) = fields.remove("description") {
            record = record.with_description(d);
        }
        Ok(record)
    }
}
