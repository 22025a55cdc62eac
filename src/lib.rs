//! Settree - a lazily-evaluated, hierarchical, typed settings tree.
//!
//! A [`Schema`] declares named settings (scalars, paths, collections, nested
//! sub-schemas and dynamically sized repeated groups). At runtime a single
//! YAML document is overlaid on that schema to produce a tree of
//! [`SettingsNode`]s whose values are computed on demand, coerced to their
//! declared kind, validated as a whole and written back to disk through
//! [`ConfigFile`].

pub mod coerce;
pub mod node;
pub mod path;
pub mod ports;
pub mod probe;
pub mod schema;
pub mod store;
pub mod value;

pub use node::{Attribute, SettingsNode};
pub use ports::PortRegistry;
pub use probe::{Probe, StubProbe, SystemProbe};
pub use schema::{GroupSize, Kind, Schema, SchemaBuilder, Setting};
pub use store::{Backup, ConfigFile, PersistState, TimestampedBackup};
pub use value::Value;

/// Test utilities shared by the unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use serde_yaml::Value as Yaml;

    use crate::schema::{GroupSize, Schema, Setting};

    /// Element schema for `cells.instances`.
    pub fn instance_schema() -> Arc<Schema> {
        Schema::builder("instance")
            .setting(Setting::integer("id").default_with(|node| {
                let index = node.index().unwrap_or_default() as i64;
                Ok(Yaml::from(index + 100))
            }))
            .setting(Setting::port("port", "cell").default_with(|node| {
                let index = node.index().unwrap_or_default() as i64;
                Ok(Yaml::from(12000 + index))
            }))
            .build()
    }

    /// A small schema that touches every kind.
    pub fn sample_schema() -> Arc<Schema> {
        let cells = Schema::builder("cells")
            .setting(Setting::bool("enabled").default_value(false))
            .setting(Setting::integer("count").default_value(2))
            .setting(Setting::group(
                "instances",
                instance_schema(),
                GroupSize::computed(|node| node.get_integer("count").map(|n| n.max(0) as usize)),
            ))
            .build();

        Schema::builder("root")
            .setting(Setting::string("hostname").default_value("127.0.0.1"))
            .setting(Setting::port("port", "workhorse").default_value("3000"))
            .setting(Setting::string("listen_address").default_with(|node| {
                let root = node.root();
                Ok(Yaml::from(format!(
                    "{}:{}",
                    root.get_string("hostname")?,
                    root.get_port("port")?
                )))
            }))
            .setting(Setting::path("repositories").default_value("/srv/repositories"))
            .setting(
                Setting::array("features")
                    .merge()
                    .default_value(vec!["base".to_string()]),
            )
            .setting(Setting::hash("env").merge().default_with(|_| {
                Ok(serde_yaml::from_str("RAILS_ENV: development\nnested:\n  a: 1\n  b: 2\n")?)
            }))
            .setting(Setting::any("anything_else").default_value(Yaml::Null))
            .setting(Setting::nested("cells", cells))
            .setting(Setting::string("__internal").default_value("hidden"))
            .build()
    }
}

/// Library-level error type for settings operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("setting undefined: {path}")]
    SettingUndefined { path: String },

    #[error("value '{value}' for setting '{path}' is not a valid {expected}")]
    TypeMismatch {
        path: String,
        value: String,
        expected: &'static str,
    },

    #[error("port {port} is already allocated for '{existing}', cannot claim it for '{requested}'")]
    PortConflict {
        port: u16,
        existing: String,
        requested: String,
    },

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("{path} has been modified externally since it was loaded")]
    ConcurrentModification { path: String },

    #[error("dependency cycle detected while evaluating '{path}'")]
    DependencyCycle { path: String },

    #[error("invalid setting path: {0}")]
    InvalidPath(String),

    #[error("invalid config document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    #[error("config file has not been loaded")]
    NotLoaded,
}

impl Error {
    /// Error for default evaluators that detect an invalid combination of settings.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedConfiguration(message.into())
    }

    pub(crate) fn mismatch(path: &str, value: &serde_yaml::Value, expected: &'static str) -> Self {
        Error::TypeMismatch {
            path: path.to_string(),
            value: crate::value::render(value),
            expected,
        }
    }
}

/// Result type alias for settings operations.
pub type Result<T> = std::result::Result<T, Error>;
