//! # Content-Addressed Object Store
//!
//! Stores objects compressed, keyed by their content identifier.
//!
//! ## Storage Model
//!
//! Objects live flat under the store base:
//!
//! ```text
//! /var/db/opencorpus/store/
//! ├── 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.xz
//! └── e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855.xz
//! ```
//!
//! ## Data Flow
//!
//! The store never touches object bytes itself. Compression and
//! decompression run as confined children through the [`Dispatcher`]:
//!
//! ```text
//! deposit:   in ──► [compressor]   ──► <hex>.xz (opened create-exclusive)
//! retrieve:  <hex>.xz ──► [decompressor] ──► out
//! ```
//!
//! Both children start with an empty signal mask and default signal
//! dispositions, independent of the caller's signal setup.
//!
//! ## Immutability
//!
//! The destination of a deposit is opened with `O_CREAT | O_EXCL`. A second
//! deposit under the same identifier fails with [`Error::AlreadyExists`]
//! and never touches the existing object; among concurrent depositors of
//! one key exactly one wins.
//!
//! If the compressor cannot be spawned, the destination is removed again
//! before the error is returned.
//!
//! **Warning**: once the compressor is running, the destination belongs to
//! it. If the compressor then fails, the key stays occupied by a partial
//! object until the caller calls [`ObjectStore::efface`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use opencorpus::{Config, ContentIdentifier, ObjectStore};
//! use std::os::fd::AsFd;
//!
//! let store = ObjectStore::new(&Config::default())?;
//! let data = std::fs::File::open("object.bin")?;
//! let id = ContentIdentifier::of(&std::fs::read("object.bin")?);
//!
//! let status = store.deposit(&id, std::io::stderr().as_fd(), data.as_fd())?.wait()?;
//! assert!(status.success());
//! ```

use crate::config::{Config, Tool};
use crate::constants::BLOB_EXTENSION;
use crate::error::{Error, Result};
use crate::guard::{self, Access};
use crate::ident::ContentIdentifier;
use crate::sandbox::{ChildHandle, DispatchRequest, Dispatcher};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::BorrowedFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Storage backend seam.
///
/// Callers written against this trait can swap the flat-file store for
/// another backend without changing how they retrieve or deposit.
pub trait Backend {
    /// Streams the object to `out`, logging to `log`.
    fn retrieve(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        out: BorrowedFd<'_>,
    ) -> Result<ChildHandle>;

    /// Stores the object read from `input`, logging to `log`.
    fn deposit(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        input: BorrowedFd<'_>,
    ) -> Result<ChildHandle>;

    /// Removes the object.
    fn efface(&self, identifier: &ContentIdentifier) -> Result<()>;

    /// Checks whether the object is present.
    fn contains(&self, identifier: &ContentIdentifier) -> bool;
}

/// Compressed flat-file object store.
///
/// ## Thread Safety
///
/// `ObjectStore` holds no mutable state. Operations on different
/// identifiers are independent; concurrent deposits of one identifier are
/// arbitrated by the filesystem.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    /// Base directory for blobs.
    base_dir: PathBuf,
    compressor: Tool,
    decompressor: Tool,
    dispatcher: Dispatcher,
}

impl ObjectStore {
    /// Opens the store described by `config`, creating its base if needed.
    pub fn new(config: &Config) -> Result<Self> {
        let base_dir = &config.layout.store;
        fs::create_dir_all(base_dir).map_err(|source| Error::ResourceExhausted {
            path: base_dir.clone(),
            source,
        })?;

        info!("Object store initialized at: {}", base_dir.display());

        Ok(Self {
            base_dir: base_dir.clone(),
            compressor: config.compressor.clone(),
            decompressor: config.decompressor.clone(),
            dispatcher: Dispatcher::new(config.confinement.clone()),
        })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the blob for `identifier`: `<base>/<hex>.xz`.
    ///
    /// The name is built from the canonical hex form only, so it can never
    /// contain a separator.
    pub fn blob_path(&self, identifier: &ContentIdentifier) -> PathBuf {
        self.base_dir
            .join(format!("{}.{}", identifier.to_hex(), BLOB_EXTENSION))
    }

    /// Dispatches decompression of the object onto `out`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the object is absent.
    pub fn retrieve(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        out: BorrowedFd<'_>,
    ) -> Result<ChildHandle> {
        let blob = guard::canonicalize_and_check(
            &self.base_dir,
            &self.blob_path(identifier),
            Access::READ,
        )?;
        let program = self.validate_tool(&self.decompressor)?;

        let source = File::open(&blob).map_err(|e| Error::from_io(&blob, e))?;

        let request = DispatchRequest::new(program, out, log)
            .args(&self.decompressor.args)
            .stdin(source.as_fd())
            .reset_signals();

        let child = self.dispatcher.dispatch(request)?;
        debug!("Retrieving {} from {}", identifier, blob.display());
        Ok(child)
    }

    /// Dispatches compression of `input` into a new object.
    ///
    /// # Errors
    ///
    /// - [`Error::PermissionDenied`] if the store base is not writable
    /// - [`Error::AlreadyExists`] if the identifier is already stored
    /// - [`Error::SpawnFailure`] if the compressor cannot be started; the key
    ///   is left free
    pub fn deposit(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        input: BorrowedFd<'_>,
    ) -> Result<ChildHandle> {
        let base = guard::canonicalize_and_check(&self.base_dir, &self.base_dir, Access::READ_WRITE)?;
        let program = self.validate_tool(&self.compressor)?;

        let path = base.join(format!("{}.{}", identifier.to_hex(), BLOB_EXTENSION));
        let destination = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o444)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::AlreadyExists {
                    path: path.clone(),
                    source: e,
                },
                _ => Error::from_io(&path, e),
            })?;

        let request = DispatchRequest::new(program, destination.as_fd(), log)
            .args(&self.compressor.args)
            .stdin(input)
            .reset_signals();

        let child = match self.dispatcher.dispatch(request) {
            Ok(child) => child,
            Err(err) => {
                // Nothing was written; free the key for a retry.
                drop(destination);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove unwritten {}: {}", path.display(), e);
                }
                return Err(err);
            }
        };
        info!("Depositing {} into {}", identifier, path.display());
        Ok(child)
    }

    /// Removes the object.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the object is absent.
    pub fn efface(&self, identifier: &ContentIdentifier) -> Result<()> {
        let path = self.blob_path(identifier);
        fs::remove_file(&path).map_err(|e| Error::from_io(&path, e))?;
        info!("Effaced {}", identifier);
        Ok(())
    }

    /// Checks if an object exists.
    pub fn contains(&self, identifier: &ContentIdentifier) -> bool {
        fs::symlink_metadata(self.blob_path(identifier)).is_ok_and(|m| m.is_file())
    }

    fn validate_tool(&self, tool: &Tool) -> Result<PathBuf> {
        let root = Path::new("/");
        guard::canonicalize_and_check(root, &tool.program, Access::EXECUTE)
    }
}

impl Backend for ObjectStore {
    fn retrieve(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        out: BorrowedFd<'_>,
    ) -> Result<ChildHandle> {
        ObjectStore::retrieve(self, identifier, log, out)
    }

    fn deposit(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        input: BorrowedFd<'_>,
    ) -> Result<ChildHandle> {
        ObjectStore::deposit(self, identifier, log, input)
    }

    fn efface(&self, identifier: &ContentIdentifier) -> Result<()> {
        ObjectStore::efface(self, identifier)
    }

    fn contains(&self, identifier: &ContentIdentifier) -> bool {
        ObjectStore::contains(self, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_blob_path_structure() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(&Config::with_root(temp.path())).unwrap();

        let id = ContentIdentifier::of(b"hello");
        let path = store.blob_path(&id);

        assert!(path.starts_with(store.base_dir()));
        assert!(path.to_string_lossy().ends_with(&format!("{}.xz", id)));
    }

    #[test]
    fn test_efface_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(&Config::with_root(temp.path())).unwrap();

        let err = store.efface(&ContentIdentifier::of(b"absent")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
