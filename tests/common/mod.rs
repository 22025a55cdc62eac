//! Common test utilities for settree integration tests.
//!
//! Provides `TestEnv` for isolated config files and a schema shaped like a
//! small development environment: a web service, a database, and a
//! dynamically sized list of cells.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value as Yaml;
use settree::{ConfigFile, GroupSize, Schema, Setting, StubProbe};
pub use tempfile::TempDir;

/// A temporary directory holding one config file.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Create the environment with `contents` already written to the config file.
    pub fn with_file(contents: &str) -> Self {
        let env = Self::new();
        std::fs::write(env.config_path(), contents).unwrap();
        env
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("settree.yml")
    }

    /// A config file over `schema()` with a deterministic probe.
    pub fn config(&self) -> ConfigFile {
        ConfigFile::new(self.config_path(), schema()).with_probe(Arc::new(StubProbe::new()))
    }

    pub fn read(&self) -> String {
        std::fs::read_to_string(self.config_path()).unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cell_schema() -> Arc<Schema> {
    Schema::builder("cell")
        .setting(Setting::integer("id").default_with(|node| {
            Ok(Yaml::from(node.index().unwrap_or_default() as i64 + 1))
        }))
        .setting(Setting::port("port", "cell").default_with(|node| {
            Ok(Yaml::from(3100 + node.index().unwrap_or_default() as i64))
        }))
        .setting(Setting::path("dir").default_with(|node| {
            let base = node.root().get_path("root_dir")?;
            Ok(Yaml::from(
                base.join(format!("cell-{}", node.get_integer("id")?))
                    .to_string_lossy()
                    .into_owned(),
            ))
        }))
        .build()
}

pub fn schema() -> Arc<Schema> {
    let web = Schema::builder("web")
        .setting(Setting::bool("enabled").default_value(true))
        .setting(Setting::port("port", "web").default_value(3000))
        .setting(Setting::hash("headers").merge().default_with(|_| {
            Ok(serde_yaml::from_str("X-Frame-Options: DENY\ncache:\n  max_age: 60\n")?)
        }))
        .build();

    let postgresql = Schema::builder("postgresql")
        .setting(Setting::port("port", "postgresql").default_value(5432))
        .setting(Setting::path("bin").default_with(|node| {
            let found = node
                .probe()
                .find_executable("postgres")
                .ok_or_else(|| settree::Error::unsupported("postgres is not installed"))?;
            Ok(Yaml::from(found.to_string_lossy().into_owned()))
        }))
        .setting(Setting::integer("max_connections").default_with(|node| {
            Ok(Yaml::from(node.probe().cpu_count() as i64 * 10))
        }))
        .build();

    let cells = Schema::builder("cells")
        .setting(Setting::bool("enabled").default_value(false))
        .setting(Setting::integer("instance_count").default_with(|node| {
            Ok(Yaml::from(if node.get_bool("enabled")? { 2 } else { 0 }))
        }))
        .setting(Setting::group(
            "instances",
            cell_schema(),
            GroupSize::computed(|node| {
                node.get_integer("instance_count").map(|n| n.max(0) as usize)
            }),
        ))
        .build();

    Schema::builder("root")
        .setting(Setting::string("hostname").default_value("127.0.0.1"))
        .setting(Setting::path("root_dir").default_value("/srv/dev"))
        .setting(Setting::array("allowed_hosts").merge().default_with(|node| {
            Ok(Yaml::from(vec![node.get_string("hostname")?]))
        }))
        .setting(Setting::nested("web", web))
        .setting(Setting::nested("postgresql", postgresql))
        .setting(Setting::nested("cells", cells))
        .setting(Setting::string("__secret").default_with(|node| {
            Ok(Yaml::from(node.probe().random_secret()))
        }))
        .build()
}

/// Parse a YAML snippet into a mapping.
pub fn mapping(text: &str) -> serde_yaml::Mapping {
    match serde_yaml::from_str::<Yaml>(text).unwrap() {
        Yaml::Mapping(map) => map,
        Yaml::Null => serde_yaml::Mapping::new(),
        other => panic!("not a mapping: {:?}", other),
    }
}
