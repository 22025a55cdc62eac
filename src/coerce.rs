//! Type coercion for raw YAML values.
//!
//! One routine per [`Kind`]. Each takes the raw value and the dotted path of
//! the setting (for error messages) and either returns the coerced
//! [`Value`] or a [`Error::TypeMismatch`].

use std::path::PathBuf;

use serde_yaml::{Mapping, Value as Yaml};

use crate::ports::PortRegistry;
use crate::schema::{Kind, Schema};
use crate::value::Value;
use crate::{Error, Result};

/// Coerce `raw` to a scalar or collection `kind`.
///
/// Structural kinds (nested settings and groups) are materialized by the
/// node itself; use [`settings_map`] and [`group_items`] to check their shape.
pub fn coerce(kind: &Kind, raw: &Yaml, path: &str) -> Result<Value> {
    match kind {
        Kind::Bool => coerce_bool(raw, path).map(Value::Bool),
        Kind::Integer => coerce_integer(raw, path).map(Value::Integer),
        Kind::String => coerce_string(raw, path).map(Value::String),
        Kind::Path => coerce_path(raw, path).map(Value::Path),
        Kind::Array => coerce_array(raw, path).map(Value::List),
        Kind::Hash => coerce_hash(raw, path).map(Value::Map),
        Kind::Port { .. } => coerce_port(raw, path).map(Value::Port),
        Kind::Any => Ok(Value::Any(raw.clone())),
        Kind::Settings(_) | Kind::Group { .. } => Err(Error::mismatch(path, raw, kind.name())),
    }
}

/// Coerce `raw` and claim the resulting port, if `kind` is a port.
pub fn coerce_and_claim(
    kind: &Kind,
    raw: &Yaml,
    path: &str,
    registry: &mut PortRegistry,
) -> Result<Value> {
    let value = coerce(kind, raw, path)?;
    if let (Kind::Port { service }, Value::Port(port)) = (kind, &value) {
        registry.claim(*port, service)?;
    }
    Ok(value)
}

/// Only the booleans and the literal strings `"true"` and `"false"`.
pub fn coerce_bool(raw: &Yaml, path: &str) -> Result<bool> {
    match raw {
        Yaml::Bool(b) => Ok(*b),
        Yaml::String(s) if s == "true" => Ok(true),
        Yaml::String(s) if s == "false" => Ok(false),
        _ => Err(Error::mismatch(path, raw, "boolean")),
    }
}

/// Integers and decimal strings.
pub fn coerce_integer(raw: &Yaml, path: &str) -> Result<i64> {
    let parsed = match raw {
        Yaml::Number(n) => n.as_i64(),
        Yaml::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::mismatch(path, raw, "integer"))
}

/// Strings as-is; numbers and booleans are stringified.
pub fn coerce_string(raw: &Yaml, path: &str) -> Result<String> {
    match raw {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::mismatch(path, raw, "string")),
    }
}

/// Any non-null string.
pub fn coerce_path(raw: &Yaml, path: &str) -> Result<PathBuf> {
    match raw {
        Yaml::String(s) => Ok(PathBuf::from(s)),
        _ => Err(Error::mismatch(path, raw, "path")),
    }
}

/// A list as-is, or a single scalar wrapped into a one-element list.
pub fn coerce_array(raw: &Yaml, path: &str) -> Result<Vec<Yaml>> {
    match raw {
        Yaml::Sequence(items) => Ok(items.clone()),
        Yaml::Bool(_) | Yaml::Number(_) | Yaml::String(_) => Ok(vec![raw.clone()]),
        _ => Err(Error::mismatch(path, raw, "array")),
    }
}

/// A map, or a string holding a JSON object.
pub fn coerce_hash(raw: &Yaml, path: &str) -> Result<Mapping> {
    match raw {
        Yaml::Mapping(map) => Ok(map.clone()),
        Yaml::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(json @ serde_json::Value::Object(_)) => match serde_yaml::to_value(json)? {
                Yaml::Mapping(map) => Ok(map),
                _ => Err(Error::mismatch(path, raw, "hash")),
            },
            _ => Err(Error::mismatch(path, raw, "hash")),
        },
        _ => Err(Error::mismatch(path, raw, "hash")),
    }
}

/// An integer within 1..=65535.
pub fn coerce_port(raw: &Yaml, path: &str) -> Result<u16> {
    let n = coerce_integer(raw, path).map_err(|_| Error::mismatch(path, raw, "port"))?;
    match u16::try_from(n) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::mismatch(path, raw, "port")),
    }
}

/// The sub-map backing a nested settings node. Absent or null means empty.
pub fn settings_map(raw: Option<&Yaml>, path: &str) -> Result<Mapping> {
    match raw {
        None | Some(Yaml::Null) => Ok(Mapping::new()),
        Some(Yaml::Mapping(map)) => Ok(map.clone()),
        Some(other) => Err(Error::mismatch(path, other, "settings")),
    }
}

/// The raw element list backing a repeated group. Absent or null means empty.
///
/// Elements must be maps (or null, read as an empty map).
pub fn group_items(raw: Option<&Yaml>, path: &str) -> Result<Vec<Yaml>> {
    let items = match raw {
        None | Some(Yaml::Null) => return Ok(Vec::new()),
        Some(Yaml::Sequence(items)) => items,
        Some(other) => return Err(Error::mismatch(path, other, "settings array")),
    };
    for (index, item) in items.iter().enumerate() {
        if !matches!(item, Yaml::Mapping(_) | Yaml::Null) {
            return Err(Error::mismatch(
                &crate::path::child(path, index),
                item,
                "settings",
            ));
        }
    }
    Ok(items.clone())
}

/// [`settings_map`], additionally coercing every value the map supplies
/// against `schema`, recursing into nested settings and groups.
///
/// Keys the schema does not declare are left alone.
pub fn check_settings(schema: &Schema, raw: Option<&Yaml>, path: &str) -> Result<Mapping> {
    let map = settings_map(raw, path)?;
    for (key, value) in &map {
        let Some(setting) = key.as_str().and_then(|key| schema.get(key)) else {
            continue;
        };
        let child = crate::path::child(path, setting.key());
        match setting.kind() {
            Kind::Settings(sub) => {
                check_settings(sub, Some(value), &child)?;
            }
            Kind::Group { schema: sub, .. } => {
                check_group(sub, Some(value), &child)?;
            }
            kind => {
                coerce(kind, value, &child)?;
            }
        }
    }
    Ok(map)
}

/// [`group_items`], additionally checking every element against `schema`.
pub fn check_group(schema: &Schema, raw: Option<&Yaml>, path: &str) -> Result<Vec<Yaml>> {
    let items = group_items(raw, path)?;
    for (index, item) in items.iter().enumerate() {
        check_settings(schema, Some(item), &crate::path::child(path, index))?;
    }
    Ok(items)
}

/// Combine a user value with the default of a merge-enabled setting.
///
/// Lists concatenate user items before default items; maps deep-merge with
/// user values taking precedence. Anything else keeps the user value.
pub fn merge_values(user: Value, default: Value) -> Value {
    match (user, default) {
        (Value::List(user), Value::List(default)) => Value::List(merge_list(user, default)),
        (Value::Map(user), Value::Map(default)) => Value::Map(deep_merge(&default, &user)),
        (user, _) => user,
    }
}

/// User items first, then the defaults. Duplicates are kept.
pub fn merge_list(user: Vec<Yaml>, default: Vec<Yaml>) -> Vec<Yaml> {
    let mut merged = user;
    merged.extend(default);
    merged
}

/// Recursively merge `overlay` into `base`.
///
/// Maps present on both sides are merged key by key; any other value in
/// `overlay` replaces the one in `base` wholesale.
pub fn deep_merge(base: &Mapping, overlay: &Mapping) -> Mapping {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let combined = match (merged.get(key), value) {
            (Some(Yaml::Mapping(left)), Yaml::Mapping(right)) => {
                Yaml::Mapping(deep_merge(left, right))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    fn mapping(text: &str) -> Mapping {
        match yaml(text) {
            Yaml::Mapping(map) => map,
            other => panic!("not a mapping: {:?}", other),
        }
    }

    // ==================== Scalar Coercion Tests ====================

    #[test]
    fn test_bool_accepts_only_literals() {
        assert!(coerce_bool(&Yaml::Bool(true), "a").unwrap());
        assert!(coerce_bool(&Yaml::from("true"), "a").unwrap());
        assert!(!coerce_bool(&Yaml::from("false"), "a").unwrap());

        for bad in [Yaml::from("yes"), Yaml::from(1), Yaml::Null, Yaml::from("TRUE")] {
            let err = coerce_bool(&bad, "gitlab.enabled").unwrap_err();
            assert!(matches!(
                err,
                Error::TypeMismatch { ref path, expected: "boolean", .. } if path == "gitlab.enabled"
            ));
        }
    }

    #[test]
    fn test_integer_parses_decimal_strings() {
        assert_eq!(coerce_integer(&Yaml::from(42), "n").unwrap(), 42);
        assert_eq!(coerce_integer(&Yaml::from("3001"), "n").unwrap(), 3001);
        assert_eq!(coerce_integer(&Yaml::from("-7"), "n").unwrap(), -7);
        assert!(coerce_integer(&Yaml::from("0x10"), "n").is_err());
        assert!(coerce_integer(&Yaml::from(1.5), "n").is_err());
        assert!(coerce_integer(&Yaml::Null, "n").is_err());
    }

    #[test]
    fn test_string_stringifies_scalars() {
        assert_eq!(coerce_string(&Yaml::from("abc"), "s").unwrap(), "abc");
        assert_eq!(coerce_string(&Yaml::from(12), "s").unwrap(), "12");
        assert_eq!(coerce_string(&Yaml::Bool(false), "s").unwrap(), "false");
        assert!(coerce_string(&Yaml::Null, "s").is_err());
        assert!(coerce_string(&yaml("[a]"), "s").is_err());
    }

    #[test]
    fn test_path_rejects_nil() {
        assert_eq!(
            coerce_path(&Yaml::from("/tmp/x"), "p").unwrap(),
            PathBuf::from("/tmp/x")
        );
        let err = coerce_path(&Yaml::Null, "repositories").unwrap_err();
        assert_eq!(
            err.to_string(),
            "value 'nil' for setting 'repositories' is not a valid path"
        );
    }

    #[test]
    fn test_port_range() {
        assert_eq!(coerce_port(&Yaml::from(3000), "p").unwrap(), 3000);
        assert_eq!(coerce_port(&Yaml::from("65535"), "p").unwrap(), 65535);
        assert!(coerce_port(&Yaml::from(0), "p").is_err());
        assert!(coerce_port(&Yaml::from(65536), "p").is_err());
        assert!(coerce_port(&Yaml::from(-1), "p").is_err());
        assert!(matches!(
            coerce_port(&Yaml::from("http"), "p"),
            Err(Error::TypeMismatch { expected: "port", .. })
        ));
    }

    // ==================== Collection Coercion Tests ====================

    #[test]
    fn test_array_wraps_scalars() {
        assert_eq!(coerce_array(&yaml("[1, 2]"), "a").unwrap().len(), 2);
        assert_eq!(
            coerce_array(&Yaml::from("solo"), "a").unwrap(),
            vec![Yaml::from("solo")]
        );
        assert!(coerce_array(&yaml("{a: 1}"), "a").is_err());
        assert!(coerce_array(&Yaml::Null, "a").is_err());
    }

    #[test]
    fn test_hash_accepts_json_strings() {
        let map = coerce_hash(&Yaml::from(r#"{"a": 1, "b": {"c": true}}"#), "h").unwrap();
        assert_eq!(map.get("a"), Some(&Yaml::from(1)));
        assert_eq!(map, mapping("{a: 1, b: {c: true}}"));

        assert!(coerce_hash(&Yaml::from("[1, 2]"), "h").is_err());
        assert!(coerce_hash(&Yaml::from("not json"), "h").is_err());
        assert!(coerce_hash(&yaml("[1]"), "h").is_err());
    }

    #[test]
    fn test_structural_shapes() {
        assert!(settings_map(None, "s").unwrap().is_empty());
        assert!(settings_map(Some(&Yaml::from(1)), "s").is_err());
        assert!(group_items(None, "g").unwrap().is_empty());
        assert_eq!(group_items(Some(&yaml("[{a: 1}, ~]")), "g").unwrap().len(), 2);

        let err = group_items(Some(&yaml("[{a: 1}, 5]")), "cells.instances").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { ref path, .. } if path == "cells.instances.1"));
    }

    #[test]
    fn test_coerce_and_claim_registers_port() {
        let mut registry = PortRegistry::new();
        let kind = Kind::Port {
            service: "redis".to_string(),
        };
        coerce_and_claim(&kind, &Yaml::from(6379), "redis.port", &mut registry).unwrap();
        assert_eq!(registry.owner(6379), Some("redis"));

        let other = Kind::Port {
            service: "sshd".to_string(),
        };
        let err = coerce_and_claim(&other, &Yaml::from(6379), "sshd.port", &mut registry);
        assert!(matches!(err, Err(Error::PortConflict { .. })));
    }

    // ==================== Merge Tests ====================

    #[test]
    fn test_merge_list_user_first() {
        let merged = merge_list(
            vec![Yaml::from("x"), Yaml::from("base")],
            vec![Yaml::from("base")],
        );
        assert_eq!(
            merged,
            vec![Yaml::from("x"), Yaml::from("base"), Yaml::from("base")]
        );
    }

    #[test]
    fn test_deep_merge_user_wins_at_every_level() {
        let default = mapping("{a: 1, nested: {x: 1, y: 2, deep: {k: v}}, list: [1, 2]}");
        let user = mapping("{nested: {y: 20, deep: {j: w}}, list: [3], extra: true}");

        let merged = deep_merge(&default, &user);
        assert_eq!(
            merged,
            mapping("{a: 1, nested: {x: 1, y: 20, deep: {k: v, j: w}}, list: [3], extra: true}")
        );
    }

    #[test]
    fn test_deep_merge_scalar_replaces_map() {
        let merged = deep_merge(&mapping("{a: {b: 1}}"), &mapping("{a: 5}"));
        assert_eq!(merged, mapping("{a: 5}"));
    }
}
