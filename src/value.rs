//! Coerced runtime values.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value as Yaml};

use crate::node::SettingsNode;

/// The value of a setting after coercion to its declared kind.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    String(String),
    Path(PathBuf),
    List(Vec<Yaml>),
    Map(Mapping),
    Port(u16),
    Any(Yaml),
    Settings(SettingsNode),
    Group(Vec<SettingsNode>),
}

impl Value {
    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integers and ports both read as integers.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Port(p) => Some(i64::from(*p)),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The path, if this is one.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    /// The list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Yaml]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The map, if this is one.
    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The port number, if this is a port.
    pub fn as_port(&self) -> Option<u16> {
        match self {
            Value::Port(p) => Some(*p),
            _ => None,
        }
    }

    /// The nested node, if this is nested settings.
    pub fn as_node(&self) -> Option<&SettingsNode> {
        match self {
            Value::Settings(node) => Some(node),
            _ => None,
        }
    }

    /// The group elements, if this is a repeated group.
    pub fn as_group(&self) -> Option<&[SettingsNode]> {
        match self {
            Value::Group(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// The YAML form of a scalar or collection value.
    ///
    /// Returns `None` for nested settings and groups; those are serialized
    /// through [`SettingsNode::dump`].
    pub fn to_yaml(&self) -> Option<Yaml> {
        let yaml = match self {
            Value::Bool(b) => Yaml::Bool(*b),
            Value::Integer(n) => Yaml::from(*n),
            Value::String(s) => Yaml::String(s.clone()),
            Value::Path(p) => Yaml::String(p.to_string_lossy().into_owned()),
            Value::List(items) => Yaml::Sequence(items.clone()),
            Value::Map(map) => Yaml::Mapping(map.clone()),
            Value::Port(p) => Yaml::from(*p),
            Value::Any(v) => v.clone(),
            Value::Settings(_) | Value::Group(_) => return None,
        };
        Some(yaml)
    }

    pub(crate) fn describe(&self) -> String {
        match self.to_yaml() {
            Some(yaml) => render(&yaml),
            None => match self {
                Value::Settings(node) => format!("<settings {}>", node.key()),
                _ => "<settings array>".to_string(),
            },
        }
    }
}

/// Render a raw value as single-line text for error messages.
pub(crate) fn render(value: &Yaml) -> String {
    match value {
        Yaml::Null => "nil".to_string(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        Yaml::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}
