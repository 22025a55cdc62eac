//! The runtime settings tree.
//!
//! A [`SettingsNode`] is a position in the tree: a schema, the dotted path of
//! the node and a link to its parent. Nodes do not own their raw YAML; every
//! node of a tree reads from one shared document held by the root, so
//! writes through [`SettingsNode::set`] are visible to every node at once.
//!
//! Evaluating attribute `k` on node `n`:
//! 1. If the raw map of `n` has `k`, coerce that value (user-supplied).
//! 2. Else if the setting has a default evaluator, call it with `n` and
//!    coerce the result.
//! 3. Else fail with [`Error::SettingUndefined`].
//!
//! Scalar values are memoized per tree by dotted path until the next
//! [`SettingsNode::set`]. Evaluations in progress are tracked so that
//! defaults referring to each other fail with [`Error::DependencyCycle`]
//! instead of recursing forever.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value as Yaml};
use tracing::{debug, trace};

use crate::coerce::{
    check_group, check_settings, coerce, coerce_and_claim, group_items, merge_values, settings_map,
};
use crate::path::{self, Segment};
use crate::ports::PortRegistry;
use crate::probe::{Probe, SystemProbe};
use crate::schema::{Kind, Schema, Setting};
use crate::value::Value;
use crate::{Error, Result};

/// Key of the implicit position attribute on repeated-group elements.
pub const INDEX_KEY: &str = "index";

/// State shared by every node of one tree.
struct Tree {
    document: RefCell<Yaml>,
    cache: RefCell<HashMap<String, Value>>,
    evaluating: RefCell<HashSet<String>>,
    ports: RefCell<PortRegistry>,
    probe: Arc<dyn Probe>,
}

impl Tree {
    /// Run `compute` for `path` with cycle tracking, memoizing the result if asked.
    fn evaluate<F>(&self, path: &str, memoize: bool, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        if memoize {
            if let Some(value) = self.cache.borrow().get(path) {
                return Ok(value.clone());
            }
        }

        if !self.evaluating.borrow_mut().insert(path.to_string()) {
            return Err(Error::DependencyCycle {
                path: path.to_string(),
            });
        }
        let result = compute();
        self.evaluating.borrow_mut().remove(path);

        if memoize {
            if let Ok(value) = &result {
                self.cache
                    .borrow_mut()
                    .insert(path.to_string(), value.clone());
            }
        }
        result
    }

    /// Forget every computed value and the port claims derived from them.
    fn invalidate(&self) {
        self.cache.borrow_mut().clear();
        self.ports.borrow_mut().clear_derived();
    }
}

/// Walk `segments` down from `current` through maps and sequences.
fn descend<'a>(mut current: &'a Yaml, segments: &[Segment]) -> Option<&'a Yaml> {
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Yaml::Mapping(map)) => map.get(key.as_str())?,
            (Segment::Index(index), Yaml::Sequence(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `segments` below `current`, creating maps and padding
/// sequences on the way. Sibling keys are left alone.
fn bury(current: &mut Yaml, segments: &[Segment], value: Yaml) {
    let Some((first, rest)) = segments.split_first() else {
        *current = value;
        return;
    };

    match first {
        Segment::Key(key) => {
            if !current.is_mapping() {
                *current = Yaml::Mapping(Mapping::new());
            }
            if let Yaml::Mapping(map) = current {
                let entry = map
                    .entry(Yaml::String(key.clone()))
                    .or_insert(Yaml::Null);
                bury(entry, rest, value);
            }
        }
        Segment::Index(index) => {
            if !current.is_sequence() {
                *current = Yaml::Sequence(Vec::new());
            }
            if let Yaml::Sequence(items) = current {
                while items.len() <= *index {
                    items.push(Yaml::Mapping(Mapping::new()));
                }
                bury(&mut items[*index], rest, value);
            }
        }
    }
}

fn undefined(path: String) -> Error {
    Error::SettingUndefined { path }
}

/// One position in the settings tree.
#[derive(Clone)]
pub struct SettingsNode {
    tree: Rc<Tree>,
    schema: Arc<Schema>,
    segments: Vec<Segment>,
    key: String,
    index: Option<usize>,
    parent: Option<Rc<SettingsNode>>,
}

impl fmt::Debug for SettingsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsNode")
            .field("schema", &self.schema.name())
            .field("key", &self.key)
            .field("index", &self.index)
            .finish()
    }
}

impl SettingsNode {
    /// A root node over an empty document.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_document(schema, Mapping::new())
    }

    /// A root node over `document`, probing the real system.
    pub fn with_document(schema: Arc<Schema>, document: Mapping) -> Self {
        Self::with_probe(schema, document, Arc::new(SystemProbe))
    }

    /// A root node over `document` with an explicit environment probe.
    pub fn with_probe(schema: Arc<Schema>, document: Mapping, probe: Arc<dyn Probe>) -> Self {
        let tree = Tree {
            document: RefCell::new(Yaml::Mapping(document)),
            cache: RefCell::new(HashMap::new()),
            evaluating: RefCell::new(HashSet::new()),
            ports: RefCell::new(PortRegistry::new()),
            probe,
        };
        Self {
            tree: Rc::new(tree),
            schema,
            segments: Vec::new(),
            key: String::new(),
            index: None,
            parent: None,
        }
    }

    /// A root node over a YAML document given as text.
    ///
    /// Empty text yields an empty document; anything other than a map is rejected.
    pub fn from_yaml_str(schema: Arc<Schema>, text: &str) -> Result<Self> {
        let document = parse_document(text, "<string>")?;
        Ok(Self::with_document(schema, document))
    }

    /// Dotted path of this node; empty for the root.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Position within a repeated group, if this node is a group element.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// The schema this node evaluates against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The node this one was reached from; `None` for the root.
    pub fn parent(&self) -> Option<&SettingsNode> {
        self.parent.as_deref()
    }

    /// The root node of this tree.
    pub fn root(&self) -> SettingsNode {
        let mut node = self;
        while let Some(parent) = &node.parent {
            node = &**parent;
        }
        node.clone()
    }

    /// Whether this node is the root of its tree.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The environment probe injected at the root.
    pub fn probe(&self) -> &dyn Probe {
        &*self.tree.probe
    }

    /// Declared keys in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        self.schema.keys().collect()
    }

    /// Bind the setting `key` of this node.
    pub fn attribute(&self, key: &str) -> Result<Attribute<'_>> {
        self.schema
            .get(key)
            .map(|setting| Attribute {
                node: self,
                setting,
            })
            .ok_or_else(|| undefined(path::child(&self.key, key)))
    }

    /// Evaluate the attribute `key` of this node.
    pub fn fetch(&self, key: &str) -> Result<Value> {
        match self.attribute(key) {
            Ok(attribute) => attribute.value(),
            Err(err) => match self.index {
                Some(index) if key == INDEX_KEY => Ok(Value::Integer(index as i64)),
                _ => Err(err),
            },
        }
    }

    /// Evaluate a dotted path relative to this node.
    pub fn get(&self, path: &str) -> Result<Value> {
        let segments = path::parse(path)?;
        let mut current = Value::Settings(self.clone());
        let mut walked = self.key.clone();

        for segment in &segments {
            let next = match (segment, &current) {
                (Segment::Key(key), Value::Settings(node)) => node.fetch(key)?,
                (Segment::Index(index), Value::Group(elements)) => elements
                    .get(*index)
                    .cloned()
                    .map(Value::Settings)
                    .ok_or_else(|| undefined(path::child(&walked, index)))?,
                _ => return Err(undefined(path::child(&walked, segment))),
            };
            current = next;
            walked = path::child(&walked, segment);
        }
        Ok(current)
    }

    /// Evaluate `path` as a boolean.
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get(path)?;
        value
            .as_bool()
            .ok_or_else(|| self.wrong_kind(path, &value, "boolean"))
    }

    /// Evaluate `path` as an integer. Ports read as integers too.
    pub fn get_integer(&self, path: &str) -> Result<i64> {
        let value = self.get(path)?;
        value
            .as_integer()
            .ok_or_else(|| self.wrong_kind(path, &value, "integer"))
    }

    /// Evaluate `path` as a string.
    pub fn get_string(&self, path: &str) -> Result<String> {
        let value = self.get(path)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.wrong_kind(path, &value, "string"))
    }

    /// Evaluate `path` as a filesystem path.
    pub fn get_path(&self, path: &str) -> Result<PathBuf> {
        let value = self.get(path)?;
        value
            .as_path()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| self.wrong_kind(path, &value, "path"))
    }

    /// Evaluate `path` as a list.
    pub fn get_list(&self, path: &str) -> Result<Vec<Yaml>> {
        let value = self.get(path)?;
        value
            .as_list()
            .map(<[Yaml]>::to_vec)
            .ok_or_else(|| self.wrong_kind(path, &value, "array"))
    }

    /// Evaluate `path` as a map.
    pub fn get_map(&self, path: &str) -> Result<Mapping> {
        let value = self.get(path)?;
        value
            .as_map()
            .cloned()
            .ok_or_else(|| self.wrong_kind(path, &value, "hash"))
    }

    /// Evaluate `path` as a port.
    pub fn get_port(&self, path: &str) -> Result<u16> {
        let value = self.get(path)?;
        value
            .as_port()
            .ok_or_else(|| self.wrong_kind(path, &value, "port"))
    }

    /// Evaluate `path` as a nested settings node.
    pub fn get_node(&self, path: &str) -> Result<SettingsNode> {
        match self.get(path)? {
            Value::Settings(node) => Ok(node),
            other => Err(self.wrong_kind(path, &other, "settings")),
        }
    }

    /// Evaluate `path` as the elements of a repeated group.
    pub fn get_group(&self, path: &str) -> Result<Vec<SettingsNode>> {
        match self.get(path)? {
            Value::Group(elements) => Ok(elements),
            other => Err(self.wrong_kind(path, &other, "settings array")),
        }
    }

    /// Deserialize the value at `path` into `T`.
    ///
    /// Nested settings and groups are dumped in full first.
    pub fn extract<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let yaml = match self.get(path)? {
            Value::Settings(node) => Yaml::Mapping(node.dump(false)?),
            Value::Group(elements) => Yaml::Sequence(
                elements
                    .iter()
                    .map(|element| element.dump(false).map(Yaml::Mapping))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => other.to_yaml().unwrap_or(Yaml::Null),
        };
        Ok(serde_yaml::from_value(yaml)?)
    }

    /// Whether `<path>.enabled` is true.
    pub fn is_enabled(&self, path: &str) -> Result<bool> {
        self.get_bool(&format!("{}.enabled", path))
    }

    /// Whether the raw document specifies a value at `path` below this node.
    pub fn is_user_defined(&self, path: &str) -> Result<bool> {
        let segments = path::parse(path)?;
        let document = self.tree.document.borrow();
        Ok(descend(&document, &self.segments)
            .and_then(|raw| descend(raw, &segments))
            .is_some())
    }

    /// Set the value at `path` below this node.
    ///
    /// The value is coerced like any other override first, so an invalid
    /// value fails with the same error and leaves the document untouched.
    /// Maps and lists set on nested settings or groups have every value
    /// they supply coerced against the sub-schema.
    /// Missing intermediate maps and group elements are created.
    pub fn set(&self, path: &str, value: impl Into<Yaml>) -> Result<()> {
        let segments = path::parse(path)?;
        let raw = value.into();

        let mut schema = Arc::clone(&self.schema);
        let mut walked = self.key.clone();
        let mut target: Option<Setting> = None;
        let mut position = 0;

        while position < segments.len() {
            let Segment::Key(key) = &segments[position] else {
                return Err(undefined(path::child(&walked, &segments[position])));
            };
            let setting = schema
                .get(key)
                .cloned()
                .ok_or_else(|| undefined(path::child(&walked, key)))?;
            walked = path::child(&walked, key);
            position += 1;

            if position == segments.len() {
                target = Some(setting);
                break;
            }

            match setting.kind() {
                Kind::Settings(sub) => schema = Arc::clone(sub),
                Kind::Group { schema: sub, .. } => {
                    let Segment::Index(index) = &segments[position] else {
                        return Err(undefined(path::child(&walked, &segments[position])));
                    };
                    walked = path::child(&walked, index);
                    position += 1;
                    schema = Arc::clone(sub);
                }
                _ => return Err(undefined(path::child(&walked, &segments[position]))),
            }
        }

        let stored = match target.as_ref().map(Setting::kind) {
            // The path ends on a group element.
            None => Yaml::Mapping(check_settings(&schema, Some(&raw), &walked)?),
            Some(Kind::Settings(sub)) => Yaml::Mapping(check_settings(sub, Some(&raw), &walked)?),
            Some(Kind::Group { schema: sub, .. }) => {
                Yaml::Sequence(check_group(sub, Some(&raw), &walked)?)
            }
            Some(kind) => coerce(kind, &raw, &walked)?
                .to_yaml()
                .ok_or_else(|| Error::mismatch(&walked, &raw, kind.name()))?,
        };

        let mut absolute = self.segments.clone();
        absolute.extend(segments);
        bury(&mut self.tree.document.borrow_mut(), &absolute, stored);
        self.tree.invalidate();
        debug!(path = %walked, "setting updated");
        Ok(())
    }

    /// Claim `port` for `service` in the tree's port registry.
    ///
    /// Explicit claims are kept across [`SettingsNode::set`].
    pub fn claim_port(&self, port: u16, service: &str) -> Result<()> {
        self.tree.ports.borrow_mut().reserve(port, service)
    }

    /// Snapshot of the ports claimed so far.
    pub fn claimed_ports(&self) -> PortRegistry {
        self.tree.ports.borrow().clone()
    }

    /// Force evaluation of every non-internal setting, depth first in
    /// declaration order. The first error aborts the pass.
    pub fn validate(&self) -> Result<()> {
        for setting in self.schema.settings().filter(|s| !s.is_internal()) {
            let attribute = Attribute {
                node: self,
                setting,
            };
            match attribute.value()? {
                Value::Settings(child) => child.validate()?,
                Value::Group(elements) => {
                    for element in &elements {
                        element.validate()?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Serialize every non-internal setting into a nested map.
    ///
    /// With `user_only`, only values present in the raw document are kept.
    /// Merge-enabled settings then emit the user part alone, and nested
    /// settings or groups that end up empty are omitted unless the document
    /// names them explicitly.
    pub fn dump(&self, user_only: bool) -> Result<Mapping> {
        let mut out = Mapping::new();

        for setting in self.schema.settings().filter(|s| !s.is_internal()) {
            let attribute = Attribute {
                node: self,
                setting,
            };
            let user_defined = attribute.is_user_defined();
            let key = setting.key();

            let dumped = match setting.kind() {
                Kind::Settings(schema) => {
                    let path = path::child(&self.key, key);
                    settings_map(self.raw(key).as_ref(), &path)?;
                    let map = self.child(key, Arc::clone(schema)).dump(user_only)?;
                    if user_only && map.is_empty() && !user_defined {
                        continue;
                    }
                    Yaml::Mapping(map)
                }
                Kind::Group { schema, .. } if user_only => {
                    let path = path::child(&self.key, key);
                    let items = group_items(self.raw(key).as_ref(), &path)?;
                    if items.is_empty() && !user_defined {
                        continue;
                    }
                    // Null elements stay null so the document round-trips.
                    Yaml::Sequence(
                        items
                            .iter()
                            .enumerate()
                            .map(|(index, item)| match item {
                                Yaml::Null => Ok(Yaml::Null),
                                _ => self
                                    .element(key, index, Arc::clone(schema))
                                    .dump(true)
                                    .map(Yaml::Mapping),
                            })
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                Kind::Group { .. } => {
                    let elements = attribute.value()?;
                    Yaml::Sequence(
                        elements
                            .as_group()
                            .unwrap_or_default()
                            .iter()
                            .map(|element| element.dump(false).map(Yaml::Mapping))
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                _ if user_only => match attribute.user_value()? {
                    Some(value) => value.to_yaml().unwrap_or(Yaml::Null),
                    None => continue,
                },
                _ => attribute.value()?.to_yaml().unwrap_or(Yaml::Null),
            };

            out.insert(Yaml::String(key.to_string()), dumped);
        }
        Ok(out)
    }

    /// [`SettingsNode::dump`] rendered as YAML text.
    pub fn dump_yaml(&self, user_only: bool) -> Result<String> {
        Ok(serde_yaml::to_string(&Yaml::Mapping(self.dump(user_only)?))?)
    }

    /// The raw value for `key` at this node, if the document has one.
    fn raw(&self, key: &str) -> Option<Yaml> {
        let document = self.tree.document.borrow();
        descend(&document, &self.segments)
            .and_then(Yaml::as_mapping)
            .and_then(|map| map.get(key))
            .cloned()
    }

    fn child(&self, key: &str, schema: Arc<Schema>) -> SettingsNode {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        SettingsNode {
            tree: Rc::clone(&self.tree),
            schema,
            segments,
            key: path::child(&self.key, key),
            index: None,
            parent: Some(Rc::new(self.clone())),
        }
    }

    fn element(&self, key: &str, index: usize, schema: Arc<Schema>) -> SettingsNode {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        segments.push(Segment::Index(index));
        SettingsNode {
            tree: Rc::clone(&self.tree),
            schema,
            segments,
            key: path::child(&path::child(&self.key, key), index),
            index: Some(index),
            parent: Some(Rc::new(self.clone())),
        }
    }

    fn wrong_kind(&self, path: &str, value: &Value, expected: &'static str) -> Error {
        Error::TypeMismatch {
            path: path::child(&self.key, path),
            value: value.describe(),
            expected,
        }
    }
}

/// Parse the text of a config document into its top-level map.
pub(crate) fn parse_document(text: &str, origin: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Yaml>(text)? {
        Yaml::Null => Ok(Mapping::new()),
        Yaml::Mapping(map) => Ok(map),
        _ => Err(Error::InvalidDocument {
            path: origin.to_string(),
            reason: "top level must be a map".to_string(),
        }),
    }
}

/// A setting bound to the node it is evaluated on.
pub struct Attribute<'a> {
    node: &'a SettingsNode,
    setting: &'a Setting,
}

impl<'a> Attribute<'a> {
    /// The schema entry behind this attribute.
    pub fn setting(&self) -> &'a Setting {
        self.setting
    }

    /// Dotted path of this attribute.
    pub fn path(&self) -> String {
        path::child(&self.node.key, self.setting.key())
    }

    /// Whether the raw document supplies this value.
    pub fn is_user_defined(&self) -> bool {
        self.node.raw(self.setting.key()).is_some()
    }

    /// The effective value: override, default, or both merged.
    pub fn value(&self) -> Result<Value> {
        let path = self.path();
        let key = self.setting.key();

        match self.setting.kind() {
            Kind::Settings(schema) => {
                settings_map(self.node.raw(key).as_ref(), &path)?;
                Ok(Value::Settings(self.node.child(key, Arc::clone(schema))))
            }
            Kind::Group { schema, size } => {
                self.node.tree.evaluate(&path, false, || {
                    let items = group_items(self.node.raw(key).as_ref(), &path)?;
                    let count = size.resolve(self.node)?.max(items.len());
                    Ok(Value::Group(
                        (0..count)
                            .map(|index| self.node.element(key, index, Arc::clone(schema)))
                            .collect(),
                    ))
                })
            }
            _ => self.node.tree.evaluate(&path, true, || self.compute(&path)),
        }
    }

    /// The coerced override alone, without defaults or merging.
    pub fn user_value(&self) -> Result<Option<Value>> {
        self.node
            .raw(self.setting.key())
            .map(|raw| coerce(self.setting.kind(), &raw, &self.path()))
            .transpose()
    }

    fn compute(&self, path: &str) -> Result<Value> {
        let kind = self.setting.kind();
        let merge_default = self.setting.default().filter(|_| self.setting.merges());

        match (self.node.raw(self.setting.key()), merge_default) {
            (Some(raw), Some(default)) => {
                let user = coerce(kind, &raw, path)?;
                Ok(merge_values(user, coerce(kind, &default(self.node)?, path)?))
            }
            (Some(raw), None) => self.coerce_claiming(&raw, path),
            (None, _) => {
                let default = self
                    .setting
                    .default()
                    .ok_or_else(|| undefined(path.to_string()))?;
                trace!(path, "evaluating default");
                let raw = default(self.node)?;
                self.coerce_claiming(&raw, path)
            }
        }
    }

    /// Ports claim their number for their service as they are coerced.
    fn coerce_claiming(&self, raw: &Yaml, path: &str) -> Result<Value> {
        coerce_and_claim(
            self.setting.kind(),
            raw,
            path,
            &mut self.node.tree.ports.borrow_mut(),
        )
    }
}

impl fmt::Debug for Attribute<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("path", &self.path())
            .field("setting", self.setting)
            .finish()
    }
}
