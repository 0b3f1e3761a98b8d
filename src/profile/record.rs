//! The profile record held by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{trace, warn};
use uuid::Uuid;

use super::path::{self, PathError, RESERVED_KEYS};
use super::value::{FlatSettings, NestedSettings, SettingValue};
use crate::error::{Result, StoreError};

/// Client variant a profile targets.
///
/// Also selects the backup file a collection is written to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Standard,
    Classic,
}

impl Variant {
    /// All variants, in declaration order.
    pub const ALL: [Self; 2] = [Self::Standard, Self::Classic];

    /// Stable lowercase name, used in file names and database columns.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Classic => "classic",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::Validation(format!("unknown variant '{s}'")))
    }
}

/// A named, identified bundle of user-configurable settings.
///
/// The id is fixed at construction. Every mutator bumps `last_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    id: Uuid,
    name: String,
    #[serde(default)]
    variant: Variant,
    #[serde(default)]
    is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    settings_map: FlatSettings,
    last_updated: DateTime<Utc>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<FlatSettings, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<FlatSettings>::deserialize(deserializer)?.unwrap_or_default())
}

impl ProfileRecord {
    /// Create a profile with a freshly generated id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create a profile with a known id (restore and import paths).
    #[must_use]
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            variant: Variant::default(),
            is_default: false,
            description: None,
            settings_map: FlatSettings::new(),
            last_updated: Utc::now(),
        }
    }

    /// Reassemble a record from stored parts. Reserved keys are stripped.
    #[must_use]
    pub fn from_parts(
        id: Uuid,
        name: String,
        settings_map: FlatSettings,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            id,
            name,
            variant: Variant::default(),
            is_default: false,
            description: None,
            settings_map,
            last_updated,
        };
        record.strip_reserved();
        record
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default_flag(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn variant(&self) -> Variant {
        self.variant
    }

    pub const fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub const fn settings(&self) -> &FlatSettings {
        &self.settings_map
    }

    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Case-insensitive name key used for uniqueness checks.
    #[must_use]
    pub fn name_key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Check the record before it enters the store.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Validation("profile name is empty".to_string()));
        }
        if let Some(key) = self.settings_map.keys().find(|k| path::validate_path(k).is_err()) {
            return Err(StoreError::Validation(format!("invalid setting key '{key}'")));
        }
        if let Some(key) = self
            .settings_map
            .iter()
            .find_map(|(k, v)| (!v.is_finite()).then_some(k))
        {
            return Err(StoreError::Validation(format!(
                "setting '{key}' is not a finite number"
            )));
        }
        path::unflatten(&self.settings_map)?;
        Ok(())
    }

    /// Mark the record as modified now.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_variant(&mut self, variant: Variant) {
        self.variant = variant;
        self.touch();
    }

    pub fn set_default_flag(&mut self, is_default: bool) {
        self.is_default = is_default;
        self.touch();
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.touch();
    }

    /// Structured view of the settings.
    pub fn nested_settings(&self) -> std::result::Result<NestedSettings, PathError> {
        path::unflatten(&self.settings_map)
    }

    /// Read `category.key` through the nested view.
    ///
    /// `category` may itself be dotted. Returns `default` when the setting is
    /// absent or the stored map cannot be structured.
    #[must_use]
    pub fn get_setting(
        &self,
        category: &str,
        key: &str,
        default: Option<SettingValue>,
    ) -> Option<SettingValue> {
        let nested = match path::unflatten(&self.settings_map) {
            Ok(nested) => nested,
            Err(e) => {
                warn!(profile = %self.id, error = %e, "Stored settings are not structurable");
                return default;
            }
        };
        path::lookup(&nested, &path::join(category, key))
            .cloned()
            .or(default)
    }

    /// Write `category.key` through the nested view and reflatten.
    pub fn set_setting(
        &mut self,
        category: &str,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> std::result::Result<(), PathError> {
        let full = path::join(category, key);
        path::validate_path(&full)?;
        let value: SettingValue = value.into();
        path::validate_value(&full, &value)?;

        let mut nested = path::unflatten(&self.settings_map)?;
        path::insert_path(&mut nested, &full, value)?;
        self.settings_map = path::flatten(&nested)?;
        self.touch();
        trace!(profile = %self.id, path = %full, "Setting written");
        Ok(())
    }

    /// Read an uncategorized setting directly from the flat map.
    #[must_use]
    pub fn get_flat_setting(&self, key: &str, default: Option<SettingValue>) -> Option<SettingValue> {
        self.settings_map.get(key).cloned().or(default)
    }

    /// Write an uncategorized setting directly into the flat map.
    pub fn set_flat_setting(
        &mut self,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> std::result::Result<(), PathError> {
        path::validate_path(key)?;
        let value: SettingValue = value.into();
        path::validate_value(key, &value)?;
        path::check_flat_insert(&self.settings_map, key)?;
        self.settings_map.insert(key.to_string(), value);
        self.touch();
        trace!(profile = %self.id, path = %key, "Flat setting written");
        Ok(())
    }

    /// Remove a setting by full path. Returns the previous value.
    pub fn remove_setting(&mut self, key: &str) -> Option<SettingValue> {
        let previous = self.settings_map.remove(key);
        if previous.is_some() {
            self.touch();
        }
        previous
    }

    /// Settings under `category`, keyed relative to it.
    #[must_use]
    pub fn category(&self, category: &str) -> FlatSettings {
        let prefix = format!("{category}{}", path::SEPARATOR);
        self.settings_map
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect()
    }

    /// Replace the whole settings map with a validated flat map.
    pub fn replace_settings(&mut self, settings: FlatSettings) -> Result<()> {
        for (key, value) in &settings {
            path::validate_path(key)?;
            path::validate_value(key, value)?;
        }
        path::unflatten(&settings)?;
        self.settings_map = settings;
        self.touch();
        Ok(())
    }

    /// Drop settings whose first segment is a reserved record field.
    pub fn strip_reserved(&mut self) {
        let before = self.settings_map.len();
        self.settings_map.retain(|k, _| {
            let head = k.split(path::SEPARATOR).next().unwrap_or(k);
            !RESERVED_KEYS.contains(&head)
        });
        let removed = before - self.settings_map.len();
        if removed > 0 {
            warn!(profile = %self.id, removed, "Dropped reserved keys from settings");
        }
    }
}
