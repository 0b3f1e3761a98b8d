//! Setting value types.
//!
//! A [`FlatSettings`] map is the canonical storage form: dotted paths mapped to
//! leaf values. [`NestedSettings`] is the derived category view.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single setting leaf.
///
/// Serialized untagged, so backups and database blobs hold plain JSON/YAML
/// scalars rather than tagged objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<SettingValue>),
}

impl SettingValue {
    /// Parse a command-line style value.
    ///
    /// `true`/`false` become booleans, integers and floats are recognized,
    /// a JSON array becomes a list, anything else is kept as text.
    #[must_use]
    pub fn parse_loose(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Self::Float(f);
            }
        }
        if trimmed.starts_with('[') {
            if let Ok(list) = serde_json::from_str::<Vec<Self>>(trimmed) {
                return Self::List(list);
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// False when the value is, or holds, a NaN or infinite float.
    ///
    /// Such floats have no JSON form and would be written as `null`.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            other => other
                .as_list()
                .is_none_or(|items| items.iter().all(Self::is_finite)),
        }
    }

    /// Name of the value's type, for diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for SettingValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for SettingValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<SettingValue>> From<Vec<T>> for SettingValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// A node of the nested view: either a leaf or a sub-category.
///
/// Untagged with `Value` first: any JSON/YAML object deserializes as a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingNode {
    Value(SettingValue),
    Branch(NestedSettings),
}

impl SettingNode {
    pub const fn as_value(&self) -> Option<&SettingValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Branch(_) => None,
        }
    }

    pub const fn as_branch(&self) -> Option<&NestedSettings> {
        match self {
            Self::Branch(b) => Some(b),
            Self::Value(_) => None,
        }
    }
}

impl From<SettingValue> for SettingNode {
    fn from(v: SettingValue) -> Self {
        Self::Value(v)
    }
}

/// Canonical flat settings: dotted path → leaf value.
pub type FlatSettings = BTreeMap<String, SettingValue>;

/// Derived nested view: category → (leaf | sub-category).
pub type NestedSettings = BTreeMap<String, SettingNode>;
