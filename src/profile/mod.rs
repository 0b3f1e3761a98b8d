//! Profile data model and the settings path codec.
//!
//! A [`ProfileRecord`] stores its settings as a flat map of dotted paths
//! (`"prayerSettings.boneHandler"`). The nested category view is derived on
//! demand by [`unflatten`] and folded back by [`flatten`].

pub mod path;
mod record;
mod value;

pub use path::{PathError, RESERVED_KEYS, flatten, unflatten};
pub use record::{ProfileRecord, Variant};
pub use value::{FlatSettings, NestedSettings, SettingNode, SettingValue};
