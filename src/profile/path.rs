//! Conversion between nested settings and canonical dotted paths.
//!
//! `flatten` joins ancestor keys with `.`; `unflatten` splits them back and
//! rebuilds intermediate categories on demand. A path that would be both a
//! leaf and a category is reported as a [`PathError::Collision`] instead of
//! silently overwriting one with the other.

use thiserror::Error;
use tracing::trace;

use super::value::{FlatSettings, NestedSettings, SettingNode, SettingValue};

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// Record fields that can never be used as setting names.
pub const RESERVED_KEYS: [&str; 3] = ["id", "name", "lastUpdated"];

/// Errors raised while converting or validating setting paths.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("'{path}' is used both as a setting and as a category")]
    Collision { path: String },

    #[error("'{path}' is empty or contains an empty segment")]
    EmptySegment { path: String },

    #[error("'{key}' is a reserved profile field and cannot be a setting")]
    Reserved { key: String },

    #[error("'{path}' holds a NaN or infinite number")]
    NonFinite { path: String },

    #[error("'{path}' is an empty category")]
    EmptyCategory { path: String },
}

/// Join a category and key into a dotted path.
#[must_use]
pub fn join(category: &str, key: &str) -> String {
    format!("{category}{SEPARATOR}{key}")
}

/// Check that a path is well-formed and not reserved.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    if path.split(SEPARATOR).any(str::is_empty) {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
        });
    }
    let head = path.split(SEPARATOR).next().unwrap_or(path);
    if RESERVED_KEYS.contains(&head) {
        return Err(PathError::Reserved {
            key: head.to_string(),
        });
    }
    Ok(())
}

/// Check that a value can be stored under `path`.
pub fn validate_value(path: &str, value: &SettingValue) -> Result<(), PathError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PathError::NonFinite {
            path: path.to_string(),
        })
    }
}

/// Flatten a nested settings view into dotted paths.
///
/// An empty category has no dotted form, so it is rejected rather than
/// dropped; the empty root is fine.
pub fn flatten(nested: &NestedSettings) -> Result<FlatSettings, PathError> {
    let mut flat = FlatSettings::new();
    flatten_into(nested, None, &mut flat)?;
    if let Some(path) = find_collision(&flat) {
        return Err(PathError::Collision { path });
    }
    trace!(entries = flat.len(), "Flattened settings");
    Ok(flat)
}

fn flatten_into(
    nested: &NestedSettings,
    prefix: Option<&str>,
    out: &mut FlatSettings,
) -> Result<(), PathError> {
    for (key, node) in nested {
        let path = match prefix {
            Some(p) => join(p, key),
            None => key.clone(),
        };
        if key.is_empty() {
            return Err(PathError::EmptySegment { path });
        }
        match node {
            SettingNode::Value(value) => {
                // A key containing the separator can land on a path already
                // produced by a sibling branch.
                if out.contains_key(&path) {
                    return Err(PathError::Collision { path });
                }
                out.insert(path, value.clone());
            }
            SettingNode::Branch(children) if children.is_empty() => {
                return Err(PathError::EmptyCategory { path });
            }
            SettingNode::Branch(children) => flatten_into(children, Some(&path), out)?,
        }
    }
    Ok(())
}

/// Find a leaf path that is also a prefix of another path.
fn find_collision(flat: &FlatSettings) -> Option<String> {
    flat.keys().find_map(|key| {
        let prefix = format!("{key}{SEPARATOR}");
        flat.range(prefix.clone()..)
            .next()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|_| key.clone())
    })
}

/// Rebuild the nested view from dotted paths.
pub fn unflatten(flat: &FlatSettings) -> Result<NestedSettings, PathError> {
    let mut root = NestedSettings::new();
    for (path, value) in flat {
        insert_path(&mut root, path, value.clone())?;
    }
    trace!(entries = flat.len(), categories = root.len(), "Unflattened settings");
    Ok(root)
}

/// Insert a leaf at `path`, creating intermediate categories.
pub fn insert_path(
    root: &mut NestedSettings,
    path: &str,
    value: SettingValue,
) -> Result<(), PathError> {
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
        });
    }
    let (leaf, parents) = segments
        .split_last()
        .ok_or_else(|| PathError::EmptySegment {
            path: path.to_string(),
        })?;

    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        let node = current
            .entry((*segment).to_string())
            .or_insert_with(|| SettingNode::Branch(NestedSettings::new()));
        current = match node {
            SettingNode::Branch(children) => children,
            SettingNode::Value(_) => {
                return Err(PathError::Collision {
                    path: segments[..=depth].join("."),
                });
            }
        };
    }

    if matches!(current.get(*leaf), Some(SettingNode::Branch(_))) {
        return Err(PathError::Collision {
            path: path.to_string(),
        });
    }
    current.insert((*leaf).to_string(), SettingNode::Value(value));
    Ok(())
}

/// Look up a leaf in the nested view.
#[must_use]
pub fn lookup<'a>(root: &'a NestedSettings, path: &str) -> Option<&'a SettingValue> {
    let mut segments = path.split(SEPARATOR).peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        let node = current.get(segment)?;
        if segments.peek().is_none() {
            return node.as_value();
        }
        current = node.as_branch()?;
    }
    None
}

/// Check that writing a leaf at `path` keeps the flat map collision-free.
///
/// Used by the uncategorized setters, which skip the unflatten/reflatten
/// cycle and must not introduce a leaf/category overlap.
pub fn check_flat_insert(flat: &FlatSettings, path: &str) -> Result<(), PathError> {
    let nested_prefix = format!("{path}{SEPARATOR}");
    if flat
        .range(nested_prefix.clone()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(&nested_prefix))
    {
        return Err(PathError::Collision {
            path: path.to_string(),
        });
    }

    let mut end = 0;
    for segment in path.split(SEPARATOR) {
        if end > 0 {
            let ancestor = &path[..end];
            if flat.contains_key(ancestor) {
                return Err(PathError::Collision {
                    path: ancestor.to_string(),
                });
            }
            end += SEPARATOR.len_utf8();
        }
        end += segment.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(v: impl Into<SettingValue>) -> SettingNode {
        SettingNode::Value(v.into())
    }

    fn branch(entries: Vec<(&str, SettingNode)>) -> SettingNode {
        SettingNode::Branch(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn nested(entries: Vec<(&str, SettingNode)>) -> NestedSettings {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_flatten_scenario() {
        let m = nested(vec![("prayerSettings", branch(vec![("boneHandler", leaf("Bank"))]))]);
        let flat = flatten(&m).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["prayerSettings.boneHandler"], SettingValue::from("Bank"));
    }

    #[test]
    fn test_empty_input() {
        assert!(flatten(&NestedSettings::new()).unwrap().is_empty());
        assert!(unflatten(&FlatSettings::new()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_category_rejected() {
        let m = nested(vec![("emptyCat", branch(vec![])), ("k", leaf(1i64))]);
        assert_eq!(
            flatten(&m),
            Err(PathError::EmptyCategory {
                path: "emptyCat".into()
            })
        );

        let deep = nested(vec![("a", branch(vec![("b", branch(vec![]))]))]);
        assert_eq!(
            flatten(&deep),
            Err(PathError::EmptyCategory { path: "a.b".into() })
        );
    }

    #[test]
    fn test_non_finite_value_rejected() {
        assert!(validate_value("a.b", &SettingValue::Float(1.5)).is_ok());
        assert_eq!(
            validate_value("a.b", &SettingValue::Float(f64::NAN)),
            Err(PathError::NonFinite { path: "a.b".into() })
        );
        let nested_inf = SettingValue::List(vec![
            SettingValue::Int(1),
            SettingValue::List(vec![SettingValue::Float(f64::NEG_INFINITY)]),
        ]);
        assert!(matches!(
            validate_value("c", &nested_inf),
            Err(PathError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_single_segment_keys() {
        let mut flat = FlatSettings::new();
        flat.insert("volume".into(), SettingValue::Int(7));
        let m = unflatten(&flat).unwrap();
        assert_eq!(m["volume"], leaf(7i64));
        assert_eq!(flatten(&m).unwrap(), flat);
    }

    #[test]
    fn test_deep_nesting_round_trip() {
        let m = nested(vec![
            (
                "a",
                branch(vec![(
                    "b",
                    branch(vec![("c", branch(vec![("d", branch(vec![("e", leaf(true))]))]))]),
                )]),
            ),
            ("x", branch(vec![("y", leaf(1.25)), ("z", leaf(vec!["p", "q"]))])),
            ("top", leaf("t")),
        ]);
        let flat = flatten(&m).unwrap();
        assert_eq!(flat["a.b.c.d.e"], SettingValue::Bool(true));
        assert_eq!(unflatten(&flat).unwrap(), m);
        assert_eq!(flatten(&unflatten(&flat).unwrap()).unwrap(), flat);
    }

    #[test]
    fn test_collision_leaf_then_branch() {
        let mut flat = FlatSettings::new();
        flat.insert("combat".into(), SettingValue::Bool(true));
        flat.insert("combat.style".into(), SettingValue::from("melee"));
        assert_eq!(
            unflatten(&flat),
            Err(PathError::Collision {
                path: "combat".into()
            })
        );
    }

    #[test]
    fn test_collision_branch_then_leaf() {
        let mut root = NestedSettings::new();
        insert_path(&mut root, "a.b.c", SettingValue::Int(1)).unwrap();
        assert_eq!(
            insert_path(&mut root, "a.b", SettingValue::Int(2)),
            Err(PathError::Collision { path: "a.b".into() })
        );
    }

    #[test]
    fn test_flatten_dotted_key_collision() {
        let m = nested(vec![
            ("a", branch(vec![("b", leaf(1i64))])),
            ("a.b", leaf(2i64)),
        ]);
        assert!(matches!(flatten(&m), Err(PathError::Collision { .. })));
    }

    #[test]
    fn test_flatten_dotted_key_prefix_collision() {
        let m = nested(vec![
            ("a", branch(vec![("b", branch(vec![("c", leaf(1i64))]))])),
            ("a.b", leaf(2i64)),
        ]);
        assert_eq!(flatten(&m), Err(PathError::Collision { path: "a.b".into() }));
    }

    #[test]
    fn test_empty_segment_rejected() {
        let mut flat = FlatSettings::new();
        flat.insert("a..b".into(), SettingValue::Int(1));
        assert!(matches!(unflatten(&flat), Err(PathError::EmptySegment { .. })));
        assert!(validate_path(".a").is_err());
        assert!(validate_path("a.").is_err());
        assert!(validate_path("").is_err());
    }

    #[test]
    fn test_reserved_keys() {
        assert_eq!(
            validate_path("name"),
            Err(PathError::Reserved { key: "name".into() })
        );
        assert!(validate_path("id.sub").is_err());
        assert!(validate_path("prayerSettings.name").is_ok());
    }

    #[test]
    fn test_lookup() {
        let mut root = NestedSettings::new();
        insert_path(&mut root, "prayerSettings.boneHandler", "Bank".into()).unwrap();
        assert_eq!(
            lookup(&root, "prayerSettings.boneHandler"),
            Some(&SettingValue::from("Bank"))
        );
        assert_eq!(lookup(&root, "prayerSettings"), None);
        assert_eq!(lookup(&root, "missing.key"), None);
    }

    #[test]
    fn test_check_flat_insert() {
        let mut flat = FlatSettings::new();
        flat.insert("a.b".into(), SettingValue::Int(1));
        flat.insert("ab".into(), SettingValue::Int(1));
        assert!(check_flat_insert(&flat, "a").is_err());
        assert!(check_flat_insert(&flat, "a.b.c").is_err());
        assert!(check_flat_insert(&flat, "a.c").is_ok());
        assert!(check_flat_insert(&flat, "ab").is_ok());
        assert!(check_flat_insert(&flat, "b").is_ok());
    }
}
