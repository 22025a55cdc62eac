//! Declarative schema definitions.
//!
//! A [`Schema`] is an ordered registry mapping a key to a [`Setting`]: the
//! setting's [`Kind`], an optional default evaluator and a merge flag. Schemas
//! are built once, wrapped in an `Arc` and shared by every node that uses them.
//!
//! ```
//! use settree::{Schema, Setting};
//!
//! let schema = Schema::builder("root")
//!     .setting(Setting::string("hostname").default_value("127.0.0.1"))
//!     .setting(Setting::port("port", "web").default_value(3000))
//!     .build();
//! assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["hostname", "port"]);
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_yaml::Value as Yaml;

use crate::Result;
use crate::node::SettingsNode;

/// Prefix marking a key as internal: evaluable, but skipped by validation and dumps.
pub const INTERNAL_PREFIX: &str = "__";

/// A default evaluator: computes the raw value of a setting from its owning node.
pub type Evaluator = Arc<dyn Fn(&SettingsNode) -> Result<Yaml> + Send + Sync>;

/// A size expression for a repeated group, evaluated against the owning node.
pub type SizeFn = Arc<dyn Fn(&SettingsNode) -> Result<usize> + Send + Sync>;

/// Number of elements a repeated group materializes.
#[derive(Clone)]
pub enum GroupSize {
    /// A literal element count.
    Fixed(usize),
    /// Computed from the owning node, so it may depend on sibling settings.
    Computed(SizeFn),
}

impl GroupSize {
    /// Build a computed size from a closure.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&SettingsNode) -> Result<usize> + Send + Sync + 'static,
    {
        GroupSize::Computed(Arc::new(f))
    }

    /// Resolve the size against `node`.
    pub fn resolve(&self, node: &SettingsNode) -> Result<usize> {
        match self {
            GroupSize::Fixed(n) => Ok(*n),
            GroupSize::Computed(f) => f(node),
        }
    }
}

impl fmt::Debug for GroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupSize::Fixed(n) => write!(f, "Fixed({})", n),
            GroupSize::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// The declared kind of a setting.
#[derive(Clone, Debug)]
pub enum Kind {
    Bool,
    Integer,
    String,
    Path,
    Array,
    Hash,
    /// A TCP port owned by the named logical service.
    Port { service: String },
    /// No checks at all.
    Any,
    /// A nested sub-schema bound to the same-named sub-map.
    Settings(Arc<Schema>),
    /// A dynamically sized list of nested sub-schemas.
    Group { schema: Arc<Schema>, size: GroupSize },
}

impl Kind {
    /// Human-readable kind name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Bool => "boolean",
            Kind::Integer => "integer",
            Kind::String => "string",
            Kind::Path => "path",
            Kind::Array => "array",
            Kind::Hash => "hash",
            Kind::Port { .. } => "port",
            Kind::Any => "value",
            Kind::Settings(_) => "settings",
            Kind::Group { .. } => "settings array",
        }
    }

    /// Whether this kind produces child nodes rather than a scalar value.
    pub fn is_structural(&self) -> bool {
        matches!(self, Kind::Settings(_) | Kind::Group { .. })
    }
}

/// One declared setting.
#[derive(Clone)]
pub struct Setting {
    key: String,
    kind: Kind,
    default: Option<Evaluator>,
    merge: bool,
}

impl Setting {
    /// Declare a setting of an arbitrary kind.
    pub fn new(key: impl Into<String>, kind: Kind) -> Self {
        Self {
            key: key.into(),
            kind,
            default: None,
            merge: false,
        }
    }

    /// Declare a boolean setting.
    pub fn bool(key: impl Into<String>) -> Self {
        Self::new(key, Kind::Bool)
    }

    /// Declare an integer setting.
    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, Kind::Integer)
    }

    /// Declare a string setting.
    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, Kind::String)
    }

    /// Declare a filesystem path setting.
    pub fn path(key: impl Into<String>) -> Self {
        Self::new(key, Kind::Path)
    }

    /// Declare a list setting.
    pub fn array(key: impl Into<String>) -> Self {
        Self::new(key, Kind::Array)
    }

    /// Declare a map setting.
    pub fn hash(key: impl Into<String>) -> Self {
        Self::new(key, Kind::Hash)
    }

    /// Declare a setting whose value is passed through unchecked.
    pub fn any(key: impl Into<String>) -> Self {
        Self::new(key, Kind::Any)
    }

    /// Declare a port claimed by `service` when evaluated.
    pub fn port(key: impl Into<String>, service: impl Into<String>) -> Self {
        Self::new(
            key,
            Kind::Port {
                service: service.into(),
            },
        )
    }

    /// Declare a nested group of settings.
    pub fn nested(key: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::new(key, Kind::Settings(schema))
    }

    /// Declare a repeated group of `size` elements sharing `schema`.
    pub fn group(key: impl Into<String>, schema: Arc<Schema>, size: GroupSize) -> Self {
        Self::new(key, Kind::Group { schema, size })
    }

    /// Use a constant as the default.
    pub fn default_value(self, value: impl Into<Yaml>) -> Self {
        let value = value.into();
        self.default_with(move |_| Ok(value.clone()))
    }

    /// Compute the default from the owning node.
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&SettingsNode) -> Result<Yaml> + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(f));
        self
    }

    /// Combine user values with the default instead of replacing it.
    ///
    /// Only meaningful for arrays (user items first, then defaults) and
    /// hashes (deep merge, user wins).
    pub fn merge(mut self) -> Self {
        self.merge = true;
        self
    }

    /// The key this setting is declared under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The declared kind.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The default evaluator, if any.
    pub fn default(&self) -> Option<&Evaluator> {
        self.default.as_ref()
    }

    /// Whether user values are merged with the default rather than replacing it.
    pub fn merges(&self) -> bool {
        self.merge && matches!(self.kind, Kind::Array | Kind::Hash)
    }

    /// Internal settings are skipped by validation and dumps.
    pub fn is_internal(&self) -> bool {
        self.key.starts_with(INTERNAL_PREFIX)
    }
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("default", &self.default.is_some())
            .field("merge", &self.merge)
            .finish()
    }
}

/// An immutable, ordered set of settings.
#[derive(Debug)]
pub struct Schema {
    name: String,
    settings: IndexMap<String, Setting>,
}

impl Schema {
    /// Start building a schema called `name`.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            settings: IndexMap::new(),
        }
    }

    /// Name of this schema, used in debug output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the setting declared under `key`.
    pub fn get(&self, key: &str) -> Option<&Setting> {
        self.settings.get(key)
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.settings.keys().map(String::as_str)
    }

    /// Settings in declaration order.
    pub fn settings(&self) -> impl Iterator<Item = &Setting> {
        self.settings.values()
    }

    /// Number of declared settings.
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Whether no settings are declared.
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

/// Builder for [`Schema`].
///
/// Declaring a key twice replaces the earlier declaration in place, which is
/// how stub and example schemas override individual entries of a base schema.
pub struct SchemaBuilder {
    name: String,
    settings: IndexMap<String, Setting>,
}

impl SchemaBuilder {
    /// Add `setting`, replacing an existing one with the same key in place.
    pub fn setting(mut self, setting: Setting) -> Self {
        self.settings.insert(setting.key.clone(), setting);
        self
    }

    /// Start from every setting of `base`.
    pub fn extend(mut self, base: &Schema) -> Self {
        for setting in base.settings() {
            self.settings.insert(setting.key.clone(), setting.clone());
        }
        self
    }

    /// Finish the schema.
    pub fn build(self) -> Arc<Schema> {
        Arc::new(Schema {
            name: self.name,
            settings: self.settings,
        })
    }
}
