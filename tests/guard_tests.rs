//! Tests for the path guard.
//!
//! Validates component-boundary containment, symlink resolution, traversal
//! rejection, and access-mode checks.

use opencorpus::{Access, ErrorKind, canonicalize, canonicalize_and_check};
use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use tempfile::TempDir;

// =============================================================================
// Containment Tests
// =============================================================================

#[test]
fn test_nested_path_is_contained() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    fs::create_dir_all(base.join("a/b")).unwrap();
    fs::write(base.join("a/b/f"), b"x").unwrap();

    let canon = canonicalize(&base, &base.join("a/b/f")).unwrap();
    assert!(canon.starts_with(fs::canonicalize(&base).unwrap()));
    assert!(canon.is_absolute());
}

#[test]
fn test_shared_byte_prefix_is_not_containment() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("data");
    let sibling = temp_dir.path().join("database");
    fs::create_dir(&base).unwrap();
    fs::create_dir(&sibling).unwrap();
    fs::write(sibling.join("secret"), b"x").unwrap();

    let err = canonicalize(&base, &sibling.join("secret")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_dot_dot_escape_is_denied() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    fs::create_dir(&base).unwrap();
    fs::write(temp_dir.path().join("outside"), b"x").unwrap();

    let err = canonicalize(&base, &base.join("../outside")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_dot_dot_that_stays_inside_is_allowed() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    fs::create_dir_all(base.join("a")).unwrap();
    fs::write(base.join("f"), b"x").unwrap();

    let canon = canonicalize(&base, &base.join("a/../f")).unwrap();
    assert_eq!(canon, fs::canonicalize(base.join("f")).unwrap());
}

#[test]
fn test_symlink_escape_is_denied() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    let outside = temp_dir.path().join("outside");
    fs::create_dir(&base).unwrap();
    fs::create_dir(&outside).unwrap();
    symlink(&outside, base.join("link")).unwrap();

    let err = canonicalize(&base, &base.join("link")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_symlink_inside_base_resolves() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    fs::create_dir_all(base.join("real")).unwrap();
    symlink(base.join("real"), base.join("alias")).unwrap();

    let canon = canonicalize(&base, &base.join("alias")).unwrap();
    assert_eq!(canon, fs::canonicalize(base.join("real")).unwrap());
}

#[test]
fn test_missing_base_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let err = canonicalize(&temp_dir.path().join("nope"), temp_dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Access Mode Tests
// =============================================================================

#[test]
fn test_execute_denied_without_x_bits() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("data");
    fs::write(&file, b"not a program").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

    // access(2) grants X_OK to root only when some x bit is set.
    let err = canonicalize_and_check(temp_dir.path(), &file, Access::EXECUTE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_execute_granted_with_x_bits() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("tool");
    fs::write(&file, b"#!/bin/sh\n").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();

    canonicalize_and_check(temp_dir.path(), &file, Access::EXECUTE).unwrap();
}

#[test]
fn test_directory_read_write_search() {
    let temp_dir = TempDir::new().unwrap();
    let canon = canonicalize_and_check(temp_dir.path(), temp_dir.path(), Access::READ_WRITE).unwrap();
    assert!(canon.is_dir());
}

#[test]
fn test_access_display_and_combination() {
    assert_eq!(Access::READ.to_string(), "r--");
    assert_eq!(Access::WRITE.to_string(), "-w-");
    assert_eq!((Access::READ | Access::WRITE).to_string(), "rw-");
    assert_eq!(Access::EXISTS.to_string(), "---");
}
