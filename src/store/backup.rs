//! Backup strategies used before a config file is overwritten.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::{Error, Result};

/// Directory, next to the config file, that holds timestamped backups.
pub const BACKUP_DIR: &str = ".backups";

/// Moves a file out of the way before it is rewritten, and puts it back on failure.
///
/// `backup` is destructive: once it returns, `path` no longer exists until
/// new content is written.
pub trait Backup {
    /// Move `path` to a backup location and return that location.
    fn backup(&self, path: &Path) -> Result<PathBuf>;

    /// Move a backup made by [`Backup::backup`] back to `path`.
    fn restore(&self, moved: &Path, path: &Path) -> Result<()>;
}

/// Moves files into `<dir>/.backups/<name>.<timestamp>`.
#[derive(Debug, Clone, Default)]
pub struct TimestampedBackup {
    dir: Option<PathBuf>,
}

impl TimestampedBackup {
    /// Back up into a `.backups` directory next to each file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep backups in `dir` instead of next to the file.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn backup_dir(&self, path: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(BACKUP_DIR),
        }
    }
}

impl Backup for TimestampedBackup {
    fn backup(&self, path: &Path) -> Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| Error::InvalidDocument {
            path: path.display().to_string(),
            reason: "path has no file name".to_string(),
        })?;

        let dir = self.backup_dir(path);
        fs::create_dir_all(&dir)?;

        let stamp = Local::now().format("%Y%m%d%H%M%S%.6f");
        let moved = dir.join(format!("{}.{}", name.to_string_lossy(), stamp));
        fs::rename(path, &moved)?;

        info!(from = %path.display(), to = %moved.display(), "backed up config file");
        Ok(moved)
    }

    fn restore(&self, moved: &Path, path: &Path) -> Result<()> {
        fs::rename(moved, path)?;
        info!(from = %moved.display(), to = %path.display(), "restored config file");
        Ok(())
    }
}
