//! # Path Guard
//!
//! Canonicalizes a path and verifies that it stays under a mandatory base.
//! This is the only security boundary between a caller-supplied name and
//! the execute/read/write access handed to a confined child.
//!
//! ## Containment
//!
//! Containment is decided on whole path components, never on raw bytes:
//!
//! ```text
//! base /data/x   path /data/x/f     → contained
//! base /data/x   path /data/x       → contained (exact match)
//! base /data/x   path /data/xyz/f   → PermissionDenied
//! ```
//!
//! ## Access Checks
//!
//! [`canonicalize_and_check`] runs `access(2)` against the already-resolved
//! path, so a symlink swapped in after resolution cannot redirect the check.

use crate::error::{Error, Result};
use std::ffi::CString;
use std::io;
use std::ops::BitOr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Access mode requested from a canonical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Access(libc::c_int);

impl Access {
    /// Existence only.
    pub const EXISTS: Self = Self(libc::F_OK);
    pub const READ: Self = Self(libc::R_OK);
    pub const WRITE: Self = Self(libc::W_OK);
    pub const EXECUTE: Self = Self(libc::X_OK);
    /// Read, write, and search (for scratch directories).
    pub const READ_WRITE: Self = Self(libc::R_OK | libc::W_OK | libc::X_OK);

    fn bits(self) -> libc::c_int {
        self.0
    }
}

impl BitOr for Access {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.0 & libc::R_OK != 0 { 'r' } else { '-' };
        let w = if self.0 & libc::W_OK != 0 { 'w' } else { '-' };
        let x = if self.0 & libc::X_OK != 0 { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// Canonicalizes `path` and verifies it lies under `prefix`.
///
/// # Errors
///
/// - [`Error::NotFound`] if `path` (or `prefix`) cannot be resolved
/// - [`Error::PermissionDenied`] if the resolved path escapes `prefix`
pub fn canonicalize(prefix: &Path, path: &Path) -> Result<PathBuf> {
    let base = resolve(prefix)?;
    let canon = resolve(path)?;

    if !is_contained(&base, &canon) {
        return Err(Error::denied(
            canon,
            format!("outside of {}", base.display()),
        ));
    }

    Ok(canon)
}

/// Canonicalizes `path`, verifies containment, then checks `mode` on it.
///
/// # Errors
///
/// As [`canonicalize`], plus [`Error::PermissionDenied`] if the resolved
/// path does not grant `mode` to the calling process.
pub fn canonicalize_and_check(prefix: &Path, path: &Path, mode: Access) -> Result<PathBuf> {
    let canon = canonicalize(prefix, path)?;
    check_access(&canon, mode)?;
    debug!("Validated {} ({})", canon.display(), mode);
    Ok(canon)
}

/// Returns `true` if `path` lies under `prefix` on a component boundary.
///
/// Purely lexical; both paths should already be canonical.
pub fn is_contained(prefix: &Path, path: &Path) -> bool {
    path.starts_with(prefix)
}

fn resolve(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|source| Error::NotFound {
        path: path.to_path_buf(),
        source,
    })
}

fn check_access(path: &Path, mode: Access) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidFormat(format!("path contains NUL: {}", path.display())))?;

    // SAFETY: c_path is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::access(c_path.as_ptr(), mode.bits()) };
    if rc != 0 {
        let source = io::Error::last_os_error();
        return Err(Error::PermissionDenied {
            path: path.to_path_buf(),
            reason: format!("{mode} access refused: {source}"),
            source: Some(source),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_exact_prefix_is_contained() {
        let temp = TempDir::new().unwrap();
        let canon = canonicalize(temp.path(), temp.path()).unwrap();
        assert_eq!(canon, fs::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_denied() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("x");
        let sibling = temp.path().join("xyz");
        fs::create_dir(&base).unwrap();
        fs::create_dir(&sibling).unwrap();
        fs::write(sibling.join("f"), b"").unwrap();

        let err = canonicalize(&base, &sibling.join("f")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_containment_is_component_wise() {
        assert!(is_contained(Path::new("/data/x"), Path::new("/data/x")));
        assert!(is_contained(Path::new("/data/x"), Path::new("/data/x/y/f")));
        assert!(!is_contained(Path::new("/data/x"), Path::new("/data/xyz/f")));
        assert!(!is_contained(Path::new("/data/x/y"), Path::new("/data/x")));
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = canonicalize(temp.path(), &temp.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_access_display() {
        assert_eq!(Access::READ_WRITE.to_string(), "rwx");
        assert_eq!((Access::READ | Access::EXECUTE).to_string(), "r-x");
    }
}
