//! # Scratch Directories
//!
//! Each dispatch works in three directories:
//!
//! | Directory | Keyed by            | Access     | Lifetime                      |
//! |-----------|---------------------|------------|-------------------------------|
//! | Source    | content identifier  | read       | owned by the corpus layout    |
//! | Cache     | program name        | read-write | persists, reused across runs  |
//! | Temp      | content identifier  | read-write | destroyed when the stage ends |
//!
//! [`ensure`] creates a directory lazily and validates it on every use.
//! [`teardown`] removes a tree depth-first without ever following a
//! symbolic link, so a link planted inside Temp cannot redirect cleanup
//! outside of it.
//!
//! ## Concurrency
//!
//! Two stages on the same identifier race on its Temp tree. Callers hold an
//! [`IdentifierLock`] from scratch preparation until the stage is reaped.
//! Cache trees are shared between programs' invocations; writers should
//! build artifacts in a [`CacheStage`] and publish them with an atomic
//! rename.

use crate::constants::LOCK_EXTENSION;
use crate::error::{Error, Result};
use crate::guard::{self, Access};
use crate::ident::ContentIdentifier;
use crate::unique;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Creates `path` if absent and validates it under `base` with `mode`.
///
/// An existing directory is not an error. Any other creation failure is
/// [`Error::ResourceExhausted`].
pub fn ensure(base: &Path, path: &Path, mode: Access) -> Result<PathBuf> {
    match DirBuilder::new().mode(0o755).create(path) {
        Ok(()) => debug!("Created scratch directory {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(source) => {
            return Err(Error::ResourceExhausted {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    let canon = guard::canonicalize_and_check(base, path, mode)?;
    if !canon.is_dir() {
        return Err(Error::denied(canon, "not a directory"));
    }
    Ok(canon)
}

/// Recursively removes `root`, which must lie under `base`.
///
/// Directories are emptied post-order; every other entry, symbolic links
/// included, is unlinked without being followed. A missing `root` is
/// treated as already torn down.
///
/// The walk continues past failures and returns the first one, leaving a
/// partial tree that a later call can finish.
pub fn teardown(base: &Path, root: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Nothing to tear down at {}", root.display());
            return Ok(());
        }
        Err(e) => return Err(Error::from_io(root, e)),
    };

    // Validate the parent rather than the root itself: the root may be a
    // link, and resolving it would leave the tree.
    let name = root
        .file_name()
        .ok_or_else(|| Error::denied(root, "no final component"))?;
    let parent = root
        .parent()
        .ok_or_else(|| Error::denied(root, "no parent directory"))?;
    let root = guard::canonicalize(base, parent)?.join(name);

    if !meta.is_dir() {
        fs::remove_file(&root).map_err(|e| Error::from_io(&root, e))?;
        info!("Removed {}", root.display());
        return Ok(());
    }

    let mut first_error = None;
    remove_tree(&root, &mut first_error);

    match first_error {
        None => {
            info!("Tore down {}", root.display());
            Ok(())
        }
        Some(err) => {
            warn!("Partial teardown of {}: {}", root.display(), err);
            Err(err)
        }
    }
}

fn remove_tree(dir: &Path, first_error: &mut Option<Error>) {
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        record(first_error, dir, e);
                        continue;
                    }
                };
                let path = entry.path();
                // DirEntry::file_type does not follow symlinks.
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => remove_tree(&path, first_error),
                    Ok(_) => {
                        if let Err(e) = fs::remove_file(&path) {
                            record(first_error, &path, e);
                        }
                    }
                    Err(e) => record(first_error, &path, e),
                }
            }
        }
        Err(e) => record(first_error, dir, e),
    }

    if let Err(e) = fs::remove_dir(dir) {
        record(first_error, dir, e);
    }
}

fn record(first_error: &mut Option<Error>, path: &Path, e: io::Error) {
    warn!("Failed to remove {}: {}", path.display(), e);
    if first_error.is_none() {
        *first_error = Some(Error::from_io(path, e));
    }
}

// =============================================================================
// Per-Identifier Lock
// =============================================================================

/// Exclusive advisory lock on one content identifier.
///
/// Backed by `flock(2)` on `<lock>/<hex>.lock`. The lock belongs to the open
/// file description, so it is released once every descriptor sharing it is
/// closed: this value and any copy a child inherited through
/// [`AsFd`]. The lock file itself is left in place.
#[derive(Debug)]
pub struct IdentifierLock {
    file: File,
    path: PathBuf,
}

impl IdentifierLock {
    /// Takes the lock without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if another holder (in any process) owns it.
    pub fn acquire(lock_base: &Path, identifier: &ContentIdentifier) -> Result<Self> {
        let base = guard::canonicalize_and_check(lock_base, lock_base, Access::READ_WRITE)?;
        let path = base.join(format!("{}.{}", identifier.to_hex(), LOCK_EXTENSION));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(&path)
            .map_err(|e| Error::from_io(&path, e))?;

        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::Busy { path });
            }
            return Err(Error::Io(e));
        }

        debug!("Locked {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for IdentifierLock {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for IdentifierLock {
    fn drop(&mut self) {
        // No LOCK_UN: an inherited copy must keep the lock until it closes.
        debug!("Closing lock {}", self.path.display());
    }
}

// =============================================================================
// Cache Staging
// =============================================================================

/// Private staging area inside a Cache tree.
///
/// Artifacts are built under [`CacheStage::path`] and published with
/// [`CacheStage::commit`], a single `rename(2)`, so concurrent readers never
/// see a partial artifact. The staging directory is torn down on drop.
#[derive(Debug)]
pub struct CacheStage {
    cache_dir: PathBuf,
    staging: PathBuf,
}

impl CacheStage {
    /// Creates a staging directory under `cache_dir`.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        let cache_dir = guard::canonicalize_and_check(cache_dir, cache_dir, Access::READ_WRITE)?;
        let staging = cache_dir.join(format!(".staging-{}", unique::generate()?));
        DirBuilder::new()
            .mode(0o700)
            .create(&staging)
            .map_err(|source| Error::ResourceExhausted {
                path: staging.clone(),
                source,
            })?;

        debug!("Staging into {}", staging.display());
        Ok(Self { cache_dir, staging })
    }

    /// Directory to build artifacts in.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Atomically moves the staged entry `name` into the cache tree.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFormat`] if `name` is not a single path component.
    pub fn commit(self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Error::InvalidFormat(format!(
                "cache entry name must be a single component: {name:?}"
            )));
        }

        let from = self.staging.join(name);
        let to = self.cache_dir.join(name);
        fs::rename(&from, &to).map_err(|e| Error::from_io(&to, e))?;

        info!("Published {} into cache", to.display());
        Ok(to)
    }
}

impl Drop for CacheStage {
    fn drop(&mut self) {
        if let Err(e) = teardown(&self.cache_dir, &self.staging) {
            warn!("Failed to remove staging {}: {}", self.staging.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("scratch");

        let first = ensure(temp.path(), &dir, Access::READ_WRITE).unwrap();
        let second = ensure(temp.path(), &dir, Access::READ_WRITE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_teardown_missing_root_is_ok() {
        let temp = TempDir::new().unwrap();
        teardown(temp.path(), &temp.path().join("gone")).unwrap();
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let id = ContentIdentifier::of(b"locked");

        let held = IdentifierLock::acquire(temp.path(), &id).unwrap();
        let err = IdentifierLock::acquire(temp.path(), &id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);

        drop(held);
        IdentifierLock::acquire(temp.path(), &id).unwrap();
    }
}
