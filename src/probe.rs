//! Environment probes available to default evaluators.
//!
//! Defaults that look at the host (installed executables, CPU count,
//! environment variables, freshly generated secrets) go through a [`Probe`]
//! injected at the tree root. [`SystemProbe`] asks the real system;
//! [`StubProbe`] returns fixed answers so dumps are deterministic in tests
//! and when generating example files.

use std::collections::HashMap;
use std::path::PathBuf;

/// Host facts a default evaluator may depend on.
pub trait Probe: Send + Sync {
    /// Locate an executable on `PATH`.
    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    /// A new random secret.
    fn random_secret(&self) -> String;

    /// Number of CPUs available to this process.
    fn cpu_count(&self) -> usize;

    /// Read an environment variable.
    fn env_var(&self, name: &str) -> Option<String>;
}

/// Probe backed by the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn random_secret(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Deterministic probe.
///
/// Every executable resolves to `/usr/local/bin/<name>` unless registered
/// explicitly, and only registered environment variables exist.
#[derive(Debug, Clone)]
pub struct StubProbe {
    executables: HashMap<String, Option<PathBuf>>,
    env: HashMap<String, String>,
    secret: String,
    cpus: usize,
}

impl Default for StubProbe {
    fn default() -> Self {
        Self {
            executables: HashMap::new(),
            env: HashMap::new(),
            secret: "stub-secret".to_string(),
            cpus: 1,
        }
    }
}

impl StubProbe {
    /// A stub with no registered executables or environment variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to `path`, or to nothing when `path` is `None`.
    pub fn with_executable(mut self, name: impl Into<String>, path: Option<PathBuf>) -> Self {
        self.executables.insert(name.into(), path);
        self
    }

    /// Make `name` resolve to `value`.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Return `secret` from every `random_secret` call.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Report `cpus` CPUs.
    pub fn with_cpu_count(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }
}

impl Probe for StubProbe {
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        match self.executables.get(name) {
            Some(path) => path.clone(),
            None => Some(PathBuf::from("/usr/local/bin").join(name)),
        }
    }

    fn random_secret(&self) -> String {
        self.secret.clone()
    }

    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_probe_defaults() {
        let probe = StubProbe::new();
        assert_eq!(
            probe.find_executable("postgres"),
            Some(PathBuf::from("/usr/local/bin/postgres"))
        );
        assert_eq!(probe.random_secret(), "stub-secret");
        assert_eq!(probe.cpu_count(), 1);
        assert_eq!(probe.env_var("HOME"), None);
    }

    #[test]
    fn test_stub_probe_overrides() {
        let probe = StubProbe::new()
            .with_executable("redis-server", None)
            .with_env("HOME", "/home/dev")
            .with_secret("s3cr3t")
            .with_cpu_count(8);
        assert_eq!(probe.find_executable("redis-server"), None);
        assert_eq!(probe.env_var("HOME").as_deref(), Some("/home/dev"));
        assert_eq!(probe.random_secret(), "s3cr3t");
        assert_eq!(probe.cpu_count(), 8);
    }

    #[test]
    fn test_system_probe_secrets_are_fresh() {
        let probe = SystemProbe;
        let a = probe.random_secret();
        let b = probe.random_secret();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(probe.cpu_count() >= 1);
    }
}
