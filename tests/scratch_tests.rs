//! Tests for scratch directory management.
//!
//! Validates lazy creation, symlink-safe teardown, per-identifier locking,
//! and cache staging.

use opencorpus::{Access, CacheStage, ContentIdentifier, ErrorKind, IdentifierLock, ensure, teardown};
use std::fs;
use std::os::unix::fs::symlink;
use tempfile::TempDir;

// =============================================================================
// ensure() Tests
// =============================================================================

#[test]
fn test_ensure_creates_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("work");

    let canon = ensure(temp_dir.path(), &dir, Access::READ_WRITE).unwrap();

    assert!(dir.is_dir(), "directory should be created");
    assert_eq!(canon, fs::canonicalize(&dir).unwrap());
}

#[test]
fn test_ensure_keeps_existing_contents() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("work");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("keep"), b"x").unwrap();

    ensure(temp_dir.path(), &dir, Access::READ_WRITE).unwrap();
    assert!(dir.join("keep").exists(), "existing files should survive");
}

#[test]
fn test_ensure_rejects_file_in_the_way() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("work");
    fs::write(&path, b"file").unwrap();

    let err = ensure(temp_dir.path(), &path, Access::READ_WRITE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_ensure_rejects_link_out_of_base() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    let outside = temp_dir.path().join("outside");
    fs::create_dir(&base).unwrap();
    fs::create_dir(&outside).unwrap();
    symlink(&outside, base.join("work")).unwrap();

    let err = ensure(&base, &base.join("work"), Access::READ_WRITE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_ensure_missing_parent_is_resource_exhausted() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("no/such/parent/work");

    let err = ensure(temp_dir.path(), &path, Access::READ_WRITE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

// =============================================================================
// teardown() Tests
// =============================================================================

#[test]
fn test_teardown_removes_nested_tree() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("tree");
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    fs::write(root.join("top"), b"1").unwrap();
    fs::write(root.join("a/mid"), b"2").unwrap();
    fs::write(root.join("a/b/c/deep"), b"3").unwrap();

    teardown(temp_dir.path(), &root).unwrap();
    assert!(!root.exists(), "tree should be gone");
}

#[test]
fn test_teardown_does_not_follow_planted_symlinks() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("tmp");
    let victim = temp_dir.path().join("victim");
    fs::create_dir_all(base.join("job/sub")).unwrap();
    fs::create_dir(&victim).unwrap();
    fs::write(victim.join("precious"), b"keep me").unwrap();

    symlink(&victim, base.join("job/escape")).unwrap();
    symlink(victim.join("precious"), base.join("job/sub/file-link")).unwrap();

    teardown(&base, &base.join("job")).unwrap();

    assert!(!base.join("job").exists(), "temp tree should be gone");
    assert_eq!(fs::read(victim.join("precious")).unwrap(), b"keep me");
}

#[test]
fn test_teardown_of_symlink_root_removes_only_the_link() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("tmp");
    let victim = temp_dir.path().join("victim");
    fs::create_dir(&base).unwrap();
    fs::create_dir(&victim).unwrap();
    fs::write(victim.join("precious"), b"keep me").unwrap();
    symlink(&victim, base.join("job")).unwrap();

    teardown(&base, &base.join("job")).unwrap();

    assert!(fs::symlink_metadata(base.join("job")).is_err());
    assert!(victim.join("precious").exists());
}

#[test]
fn test_teardown_outside_base_is_denied() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("tmp");
    let other = temp_dir.path().join("other");
    fs::create_dir(&base).unwrap();
    fs::create_dir_all(other.join("job")).unwrap();

    let err = teardown(&base, &other.join("job")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(other.join("job").exists(), "nothing outside the base is touched");
}

#[test]
fn test_teardown_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("tree");
    fs::create_dir(&root).unwrap();

    teardown(temp_dir.path(), &root).unwrap();
    teardown(temp_dir.path(), &root).unwrap();
}

// =============================================================================
// IdentifierLock Tests
// =============================================================================

#[test]
fn test_locks_on_distinct_identifiers_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let a = IdentifierLock::acquire(temp_dir.path(), &ContentIdentifier::of(b"a")).unwrap();
    let b = IdentifierLock::acquire(temp_dir.path(), &ContentIdentifier::of(b"b")).unwrap();
    assert_ne!(a.path(), b.path());
}

#[test]
fn test_lock_contention_is_busy() {
    let temp_dir = TempDir::new().unwrap();
    let id = ContentIdentifier::of(b"contended");

    let held = IdentifierLock::acquire(temp_dir.path(), &id).unwrap();
    let err = IdentifierLock::acquire(temp_dir.path(), &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(held.path().exists(), "lock file should exist while held");
}

// =============================================================================
// CacheStage Tests
// =============================================================================

#[test]
fn test_cache_stage_commit_publishes_entry() {
    let temp_dir = TempDir::new().unwrap();
    let cache = temp_dir.path().join("prog");
    fs::create_dir(&cache).unwrap();

    let stage = CacheStage::new(&cache).unwrap();
    let staging = stage.path().to_path_buf();
    fs::write(stage.path().join("artifact"), b"built").unwrap();

    let published = stage.commit("artifact").unwrap();

    assert_eq!(fs::read(&published).unwrap(), b"built");
    assert!(!staging.exists(), "staging directory should be removed");
}

#[test]
fn test_cache_stage_drop_discards_work() {
    let temp_dir = TempDir::new().unwrap();
    let cache = temp_dir.path().join("prog");
    fs::create_dir(&cache).unwrap();

    let staging = {
        let stage = CacheStage::new(&cache).unwrap();
        fs::write(stage.path().join("half-built"), b"partial").unwrap();
        stage.path().to_path_buf()
    };

    assert!(!staging.exists());
    assert!(!cache.join("half-built").exists());
}

#[test]
fn test_cache_stage_rejects_nested_names() {
    let temp_dir = TempDir::new().unwrap();
    let stage = CacheStage::new(temp_dir.path()).unwrap();

    let err = stage.commit("../escape").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
}
