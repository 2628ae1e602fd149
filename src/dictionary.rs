//! Read-only name → identifier lookup.
//!
//! Corpora often refer to objects by a human name (a file name, a URL).
//! A [`Dictionary`] maps such names to content identifiers; it is an
//! auxiliary index and never written by the pipeline.

use crate::error::{Error, Result};
use crate::ident::ContentIdentifier;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-only name lookup.
pub trait Dictionary {
    /// Returns the identifier registered under `name`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no entry exists.
    fn resolve(&self, name: &str) -> Result<ContentIdentifier>;
}

/// Dictionary loaded from a JSON object of `"name": "<hex>"` entries.
#[derive(Debug, Clone)]
pub struct JsonDictionary {
    path: PathBuf,
    entries: HashMap<String, ContentIdentifier>,
}

impl JsonDictionary {
    /// Loads and validates every entry of the file at `path`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFormat`] if the file is not a JSON object of hex
    /// identifiers.
    pub fn open(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
        let raw: HashMap<String, String> = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidFormat(format!("dictionary {}: {e}", path.display()))
        })?;

        let entries = raw
            .into_iter()
            .map(|(name, hex)| {
                let id = ContentIdentifier::from_hex(&hex).map_err(|e| {
                    Error::InvalidFormat(format!("dictionary entry {name:?}: {e}"))
                })?;
                Ok((name, id))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        debug!("Loaded {} dictionary entries from {}", entries.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Dictionary for JsonDictionary {
    fn resolve(&self, name: &str) -> Result<ContentIdentifier> {
        self.entries.get(name).copied().ok_or_else(|| Error::NotFound {
            path: self.path.join(name),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no dictionary entry for {name:?}"),
            ),
        })
    }
}
