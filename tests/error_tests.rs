//! Tests for error types.
//!
//! Validates display formatting, failure classes, and source chaining.

use opencorpus::{Error, ErrorKind};
use std::error::Error as _;
use std::io;
use std::path::PathBuf;

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_not_found_display() {
    let err = Error::NotFound {
        path: PathBuf::from("/var/db/opencorpus/store/abc.xz"),
        source: io::Error::from(io::ErrorKind::NotFound),
    };
    let msg = err.to_string();

    assert!(msg.contains("abc.xz"), "should include the path");
    assert!(msg.contains("not found"), "should indicate not found");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_permission_denied_display() {
    let err = Error::PermissionDenied {
        path: PathBuf::from("/data/xyz/f"),
        reason: "outside of /data/x".to_string(),
        source: None,
    };
    let msg = err.to_string();

    assert!(msg.contains("/data/xyz/f"), "should include the path");
    assert!(msg.contains("outside of /data/x"), "should include the reason");
    assert!(err.source().is_none());
}

#[test]
fn test_busy_display() {
    let err = Error::Busy {
        path: PathBuf::from("/var/lock/opencorpus/abc.lock"),
    };
    assert!(err.to_string().contains("busy"));
    assert_eq!(err.kind(), ErrorKind::Busy);
}

#[test]
fn test_invalid_format_display() {
    let err = Error::InvalidFormat("hex string has odd length 3".to_string());
    assert_eq!(err.to_string(), "invalid format: hex string has odd length 3");
}

#[test]
fn test_config_display() {
    let err = Error::Config {
        path: PathBuf::from("/etc/opencorpus.json"),
        reason: "expected value".to_string(),
    };
    let msg = err.to_string();

    assert!(msg.contains("/etc/opencorpus.json"));
    assert!(msg.contains("expected value"));
}

// =============================================================================
// Source Chaining Tests
// =============================================================================

#[test]
fn test_spawn_failure_keeps_os_error() {
    let err = Error::SpawnFailure {
        program: PathBuf::from("/usr/libexec/opencorpus/identity"),
        source: io::Error::from(io::ErrorKind::NotFound),
    };

    assert_eq!(err.kind(), ErrorKind::SpawnFailure);
    let source = err.source().expect("spawn failure should chain its cause");
    assert!(source.downcast_ref::<io::Error>().is_some());
}

#[test]
fn test_io_error_converts() {
    let err: Error = io::Error::other("entropy short read").into();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.to_string().contains("entropy short read"));
}

// =============================================================================
// ErrorKind Tests
// =============================================================================

#[test]
fn test_kind_display_is_human_readable() {
    assert_eq!(ErrorKind::NotFound.to_string(), "not found");
    assert_eq!(ErrorKind::AlreadyExists.to_string(), "already exists");
    assert_eq!(ErrorKind::SpawnFailure.to_string(), "spawn failure");
}

