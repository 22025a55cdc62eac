//! Loading and saving the settings document.
//!
//! [`ConfigFile`] reads a YAML file into a root [`SettingsNode`] and writes
//! back only the user-supplied values. Concurrent writers are detected
//! optimistically: the file's modification time is recorded at load and
//! compared again before saving. This is not a lock; there is a window
//! between the check and the write.
//!
//! ## Save sequence
//!
//! 1. Stat the file; a modification time different from the recorded one
//!    aborts with [`Error::ConcurrentModification`].
//! 2. Serialize the user-only dump.
//! 3. Move the current file away through the [`Backup`] strategy.
//! 4. Write the new content and record its modification time.
//!
//! If step 4 fails the backup is restored over the target before the
//! original error is returned.

pub mod backup;

pub use backup::{BACKUP_DIR, Backup, TimestampedBackup};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde_yaml::Mapping;
use tracing::{debug, error, info};

use crate::node::{SettingsNode, parse_document};
use crate::probe::{Probe, SystemProbe};
use crate::schema::Schema;
use crate::{Error, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "SETTREE_CONFIG";

/// Config file name used when [`CONFIG_ENV`] is not set.
pub const DEFAULT_CONFIG_FILE: &str = "settree.yml";

/// Lifecycle of a [`ConfigFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    Unloaded,
    Loaded,
    Saving,
    Saved,
    /// The last save failed; any backup taken was restored.
    Failed,
}

/// Resolve the config file path from an optional override.
pub fn resolve_path(env_value: Option<String>) -> PathBuf {
    match env_value {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Modification time of `path`, or `None` if it does not exist.
fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.modified()?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A settings document on disk.
pub struct ConfigFile<B: Backup = TimestampedBackup> {
    path: PathBuf,
    schema: Arc<Schema>,
    probe: Arc<dyn Probe>,
    backup: B,
    mtime: Option<SystemTime>,
    state: PersistState,
}

impl ConfigFile<TimestampedBackup> {
    /// A controller for the file at `path`, probing the real system and backing up next to the file.
    pub fn new(path: impl Into<PathBuf>, schema: Arc<Schema>) -> Self {
        Self {
            path: path.into(),
            schema,
            probe: Arc::new(SystemProbe),
            backup: TimestampedBackup::new(),
            mtime: None,
            state: PersistState::Unloaded,
        }
    }

    /// Use the path named by `SETTREE_CONFIG`, or `settree.yml` in the
    /// current directory.
    pub fn from_env(schema: Arc<Schema>) -> Self {
        Self::new(resolve_path(std::env::var(CONFIG_ENV).ok()), schema)
    }
}

impl<B: Backup> ConfigFile<B> {
    /// Replace the backup strategy.
    pub fn with_backup<C: Backup>(self, backup: C) -> ConfigFile<C> {
        ConfigFile {
            path: self.path,
            schema: self.schema,
            probe: self.probe,
            backup,
            mtime: self.mtime,
            state: self.state,
        }
    }

    /// Replace the environment probe handed to loaded trees.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    /// Location of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where this file is in its load/save lifecycle.
    pub fn state(&self) -> PersistState {
        self.state
    }

    /// Modification time recorded at the last load or save.
    pub fn recorded_mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Read the file into a new root node. A missing file yields an empty document.
    pub fn load(&mut self) -> Result<SettingsNode> {
        let (document, mtime) = match fs::read_to_string(&self.path) {
            Ok(text) => {
                let origin = self.path.display().to_string();
                (parse_document(&text, &origin)?, modified(&self.path)?)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "config file missing, starting empty");
                (Mapping::new(), None)
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %self.path.display(), keys = document.len(), "loaded config file");
        self.mtime = mtime;
        self.state = PersistState::Loaded;
        Ok(SettingsNode::with_probe(
            Arc::clone(&self.schema),
            document,
            Arc::clone(&self.probe),
        ))
    }

    /// Write the user-supplied values of `node`'s tree to the file.
    pub fn save(&mut self, node: &SettingsNode) -> Result<()> {
        if self.state == PersistState::Unloaded {
            return Err(Error::NotLoaded);
        }

        self.state = PersistState::Saving;
        let result = self.write(&node.root());
        self.state = match result {
            Ok(()) => PersistState::Saved,
            Err(_) => PersistState::Failed,
        };
        result
    }

    fn write(&mut self, root: &SettingsNode) -> Result<()> {
        let current = modified(&self.path)?;
        if current.is_some() && current != self.mtime {
            return Err(Error::ConcurrentModification {
                path: self.path.display().to_string(),
            });
        }

        let text = root.dump_yaml(true)?;

        let moved = match current {
            Some(_) => Some(self.backup.backup(&self.path)?),
            None => None,
        };

        match self.write_text(&text) {
            Ok(mtime) => {
                self.mtime = Some(mtime);
                info!(path = %self.path.display(), "saved config file");
                Ok(())
            }
            Err(err) => {
                if let Some(moved) = moved {
                    if let Err(restore_err) = self.backup.restore(&moved, &self.path) {
                        error!(
                            path = %self.path.display(),
                            backup = %moved.display(),
                            error = %restore_err,
                            "failed to restore config file from backup"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    fn write_text(&self, text: &str) -> Result<SystemTime> {
        fs::write(&self.path, text)?;
        modified(&self.path)?.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} vanished after writing", self.path.display()),
            ))
        })
    }
}
