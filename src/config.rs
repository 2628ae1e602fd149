//! Pipeline configuration.
//!
//! A single [`Config`] carries every filesystem base, the confinement
//! launcher, and the store codec. Defaults come from [`crate::constants`];
//! a JSON file may override any subset of fields.
//!
//! ```json
//! {
//!   "layout": { "store": "/srv/corpus/store" },
//!   "confinement": { "launcher": "/usr/bin/sydbox" },
//!   "compressor": { "program": "/usr/bin/zstd", "args": ["-c"] }
//! }
//! ```

use crate::constants::{
    CACHE_BASE, DEFAULT_COMPRESSOR, DEFAULT_COMPRESSOR_ARGS, DEFAULT_DECOMPRESSOR,
    DEFAULT_DECOMPRESSOR_ARGS, DEFAULT_LAUNCHER, DEFAULT_LAUNCHER_FLAGS, DEFAULT_WRITABLE,
    EXEC_BASE, LOCK_BASE, SOURCE_BASE, STORE_BASE, TEMP_BASE, WRITE_ENV,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem bases for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Read-only per-identifier source trees.
    pub source: PathBuf,
    /// Transformation executables.
    pub executable: PathBuf,
    /// Compressed object store.
    pub store: PathBuf,
    /// Per-program caches.
    pub cache: PathBuf,
    /// Per-identifier temporary trees.
    pub temp: PathBuf,
    /// Per-identifier lock files.
    pub lock: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            source: PathBuf::from(SOURCE_BASE),
            executable: PathBuf::from(EXEC_BASE),
            store: PathBuf::from(STORE_BASE),
            cache: PathBuf::from(CACHE_BASE),
            temp: PathBuf::from(TEMP_BASE),
            lock: PathBuf::from(LOCK_BASE),
        }
    }
}

impl Layout {
    /// Lays every base out as a subdirectory of `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            source: root.join("source"),
            executable: root.join("libexec"),
            store: root.join("store"),
            cache: root.join("cache"),
            temp: root.join("tmp"),
            lock: root.join("lock"),
        }
    }

    /// Creates every base directory that does not exist yet.
    pub fn create_all(&self) -> Result<()> {
        for base in [
            &self.source,
            &self.executable,
            &self.store,
            &self.cache,
            &self.temp,
            &self.lock,
        ] {
            fs::create_dir_all(base).map_err(|source| Error::ResourceExhausted {
                path: base.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// External launcher that confines a child's filesystem writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Confinement {
    /// Launcher program (looked up on `PATH` when not absolute).
    pub launcher: PathBuf,
    /// Flags placed before the confined program.
    pub flags: Vec<String>,
    /// Environment variable that receives the writable allow-list.
    pub write_env: String,
    /// Paths every confined child may write to.
    pub default_writable: Vec<PathBuf>,
}

impl Default for Confinement {
    fn default() -> Self {
        Self {
            launcher: PathBuf::from(DEFAULT_LAUNCHER),
            flags: DEFAULT_LAUNCHER_FLAGS.iter().map(|s| s.to_string()).collect(),
            write_env: WRITE_ENV.to_string(),
            default_writable: DEFAULT_WRITABLE.iter().map(PathBuf::from).collect(),
        }
    }
}

impl Confinement {
    /// A launcher that runs the program through `launcher` with no flags.
    ///
    /// Useful with `/usr/bin/env`, which executes the program unconfined
    /// but otherwise honours the same argument and environment contract.
    pub fn passthrough(launcher: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            flags: Vec::new(),
            ..Self::default()
        }
    }
}

/// A stdin → stdout filter program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    /// Absolute path to the program.
    pub program: PathBuf,
    /// Arguments after the program.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: Layout,
    pub confinement: Confinement,
    pub compressor: Tool,
    pub decompressor: Tool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            confinement: Confinement::default(),
            compressor: Tool::new(DEFAULT_COMPRESSOR, DEFAULT_COMPRESSOR_ARGS),
            decompressor: Tool::new(DEFAULT_DECOMPRESSOR, DEFAULT_DECOMPRESSOR_ARGS),
        }
    }
}

impl Config {
    /// Default configuration with every base laid out under `root`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            layout: Layout::under(root),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = serde_json::from_str(&text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Replaces the confinement launcher.
    #[must_use]
    pub fn with_confinement(mut self, confinement: Confinement) -> Self {
        self.confinement = confinement;
        self
    }

    /// Replaces the store codec.
    #[must_use]
    pub fn with_codec(mut self, compressor: Tool, decompressor: Tool) -> Self {
        self.compressor = compressor;
        self.decompressor = decompressor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_uses_production_bases() {
        let config = Config::default();
        assert_eq!(config.layout.store, PathBuf::from(STORE_BASE));
        assert_eq!(config.confinement.write_env, WRITE_ENV);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"layout": {"store": "/srv/store"}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.layout.store, PathBuf::from("/srv/store"));
        assert_eq!(config.layout.temp, PathBuf::from(TEMP_BASE));
        assert_eq!(config.compressor.program, PathBuf::from(DEFAULT_COMPRESSOR));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
