//! Whole-collection backups in JSON or YAML.
//!
//! Each (variant, format) pair maps to one file, `profiles-<variant>.<ext>`,
//! holding every profile of that variant. The caller picks the format and
//! variant on every call.

mod codec;
mod coordinator;

pub use codec::{BackupCodec, BackupDocument, BackupFormat, FORMAT_VERSION, JsonCodec, YamlCodec};
pub use coordinator::{BackupCoordinator, BackupFile, RestoreReport};
