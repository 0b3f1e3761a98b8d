//! Integration tests for the settings path codec and the settings API.

use pstore::profile::{
    FlatSettings, NestedSettings, PathError, ProfileRecord, SettingNode, SettingValue, flatten,
    unflatten,
};

fn branch(entries: Vec<(&str, SettingNode)>) -> SettingNode {
    SettingNode::Branch(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

fn leaf(v: impl Into<SettingValue>) -> SettingNode {
    SettingNode::Value(v.into())
}

fn sample_nested() -> NestedSettings {
    let root = branch(vec![
        (
            "prayerSettings",
            branch(vec![("boneHandler", leaf("Bank")), ("quickPray", leaf(true))]),
        ),
        (
            "combat",
            branch(vec![(
                "food",
                branch(vec![("threshold", leaf(45i64)), ("names", leaf(vec!["Shark", "Lobster"]))]),
            )]),
        ),
        ("volume", leaf(0.75)),
    ]);
    match root {
        SettingNode::Branch(map) => map,
        SettingNode::Value(_) => unreachable!(),
    }
}

#[test]
fn unflatten_inverts_flatten() {
    let nested = sample_nested();
    let flat = flatten(&nested).unwrap();
    assert_eq!(unflatten(&flat).unwrap(), nested);
}

#[test]
fn flatten_is_stable_across_round_trips() {
    let flat = flatten(&sample_nested()).unwrap();
    let again = flatten(&unflatten(&flat).unwrap()).unwrap();
    assert_eq!(again, flat);
    assert_eq!(
        flat.get("combat.food.threshold"),
        Some(&SettingValue::Int(45))
    );
}

#[test]
fn empty_category_is_an_error_not_a_loss() {
    let mut nested = NestedSettings::new();
    nested.insert("emptyCat".to_string(), branch(vec![]));
    nested.insert("k".to_string(), leaf(1i64));
    assert_eq!(
        flatten(&nested),
        Err(PathError::EmptyCategory {
            path: "emptyCat".to_string()
        })
    );

    // Anything that does flatten comes back unchanged.
    nested.remove("emptyCat");
    let flat = flatten(&nested).unwrap();
    assert_eq!(unflatten(&flat).unwrap(), nested);
}

#[test]
fn empty_and_single_segment_inputs() {
    assert!(flatten(&NestedSettings::new()).unwrap().is_empty());
    assert!(unflatten(&FlatSettings::new()).unwrap().is_empty());

    let mut flat = FlatSettings::new();
    flat.insert("volume".to_string(), SettingValue::Int(3));
    let nested = unflatten(&flat).unwrap();
    assert_eq!(nested.get("volume"), Some(&leaf(3i64)));
}

#[test]
fn deep_nesting() {
    let path: Vec<String> = (0..20).map(|i| format!("level{i}")).collect();
    let mut flat = FlatSettings::new();
    flat.insert(path.join("."), SettingValue::from("deep"));
    let nested = unflatten(&flat).unwrap();
    assert_eq!(flatten(&nested).unwrap(), flat);
}

#[test]
fn leaf_and_category_collision_fails() {
    let mut flat = FlatSettings::new();
    flat.insert("combat".to_string(), SettingValue::Bool(true));
    flat.insert("combat.style".to_string(), SettingValue::from("melee"));
    assert!(matches!(
        unflatten(&flat),
        Err(PathError::Collision { .. })
    ));
}

#[test]
fn scenario_read_your_writes() {
    let mut profile = ProfileRecord::new("Default");
    assert!(profile.settings().is_empty());

    profile
        .set_setting("prayerSettings", "boneHandler", "Bank")
        .unwrap();
    assert_eq!(
        profile.get_setting("prayerSettings", "boneHandler", None),
        Some(SettingValue::from("Bank"))
    );

    let mut expected = FlatSettings::new();
    expected.insert(
        "prayerSettings.boneHandler".to_string(),
        SettingValue::from("Bank"),
    );
    assert_eq!(profile.settings(), &expected);
    assert_eq!(flatten(&profile.nested_settings().unwrap()).unwrap(), expected);
}

#[test]
fn flat_and_categorized_apis_share_storage() {
    let mut profile = ProfileRecord::new("Default");
    profile.set_flat_setting("combat.style", "ranged").unwrap();
    assert_eq!(
        profile.get_setting("combat", "style", None),
        Some(SettingValue::from("ranged"))
    );
    profile.set_setting("combat", "style", "magic").unwrap();
    assert_eq!(
        profile.get_flat_setting("combat.style", None),
        Some(SettingValue::from("magic"))
    );
}

#[test]
fn reserved_keys_rejected() {
    let mut profile = ProfileRecord::new("Default");
    for key in ["id", "name", "lastUpdated"] {
        assert!(matches!(
            profile.set_flat_setting(key, 1i64),
            Err(PathError::Reserved { .. })
        ));
    }
    assert!(profile.settings().is_empty());
}

#[test]
fn defaults_returned_for_missing_settings() {
    let profile = ProfileRecord::new("Default");
    assert_eq!(
        profile.get_setting("missing", "key", Some(SettingValue::Int(5))),
        Some(SettingValue::Int(5))
    );
    assert_eq!(profile.get_flat_setting("missing", None), None);
}
