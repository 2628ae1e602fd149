//! # Corpus Constants
//!
//! Defines the filesystem bases, size limits, and confinement defaults for
//! the transformation pipeline. These constants are the **single source of
//! truth** for the security-critical bounds used throughout the crate.
//!
//! ## Security Rationale
//!
//! Every path the pipeline hands to a child process is derived from one of
//! the bases below and validated against it by [`crate::guard`]. Every
//! value read from an untrusted file is bounded by one of the limits below.
//!
//! ## Cross-References
//!
//! - [`crate::config`]: Uses the bases as defaults for [`crate::config::Layout`]
//! - [`crate::sandbox`]: Uses the writable allow-list defaults
//! - [`crate::transform`]: Uses the specifier size limit
//! - [`crate::storage`]: Uses the blob extension

// =============================================================================
// Filesystem Bases
// =============================================================================
//
// Production layout. All of these can be overridden through
// `Config::with_root` or a configuration file.
// =============================================================================

/// Base path for read-only per-identifier source trees.
///
/// Structure: `<source>/<hex-identifier>/spec` + transformation inputs.
pub const SOURCE_BASE: &str = "/var/db/opencorpus/source";

/// Base path for transformation executables.
///
/// Structure: `<executable>/<program-name>`
pub const EXEC_BASE: &str = "/usr/libexec/opencorpus";

/// Base path for the content-addressed object store.
///
/// Structure: `<store>/<hex-identifier>.xz`
pub const STORE_BASE: &str = "/var/db/opencorpus/store";

/// Base path for per-program caches shared across invocations.
///
/// Structure: `<cache>/<program-name>/`
pub const CACHE_BASE: &str = "/var/cache/opencorpus";

/// Base path for per-identifier temporary trees.
///
/// Structure: `<temp>/<hex-identifier>/`
pub const TEMP_BASE: &str = "/var/tmp/opencorpus";

/// Base path for per-identifier advisory lock files.
///
/// Structure: `<lock>/<hex-identifier>.lock`
pub const LOCK_BASE: &str = "/var/lock/opencorpus";

// =============================================================================
// Identifier Format
// =============================================================================

/// Width of a content identifier in bytes (256 bits).
pub const IDENTIFIER_LEN: usize = 32;

/// Width of the canonical hex form of a content identifier.
pub const IDENTIFIER_HEX_LEN: usize = IDENTIFIER_LEN * 2;

/// File extension of compressed blobs in the store.
pub const BLOB_EXTENSION: &str = "xz";

/// File extension of per-identifier lock files.
pub const LOCK_EXTENSION: &str = "lock";

/// Name of the transformation specifier inside a source tree.
pub const SPEC_FILE_NAME: &str = "spec";

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum size of a transformation specifier (platform filename limit).
///
/// **Security**: The specifier only names a program. Anything larger is a
/// malformed or hostile pointer file and is rejected before it is buffered.
pub const MAX_SPEC_LEN: usize = 255;

/// Maximum number of extra input streams for one dispatch.
///
/// The count travels to the child as a 16-bit big-endian hex argument.
pub const MAX_INPUTS: usize = u16::MAX as usize;

/// First descriptor slot used for extra input streams.
pub const FIRST_INPUT_FD: i32 = 3;

// =============================================================================
// Confinement Defaults
// =============================================================================
//
// The confinement launcher is an external program that refuses every
// filesystem write outside the allow-list it receives in its environment.
// =============================================================================

/// Default confinement launcher.
pub const DEFAULT_LAUNCHER: &str = "sydbox";

/// Default flags passed to the launcher before the confined program.
pub const DEFAULT_LAUNCHER_FLAGS: &[&str] = &["-C", "-L"];

/// Environment variable carrying the writable-path allow-list.
pub const WRITE_ENV: &str = "SYDBOX_WRITE";

/// Delimiter between entries of the writable-path allow-list.
pub const WRITE_DELIMITER: char = ';';

/// Device and proc paths every confined child may write to.
///
/// **Security**: None of these reach persistent storage outside `/tmp`.
/// The Source tree is never on this list.
pub const DEFAULT_WRITABLE: &[&str] = &[
    "/dev/fd",
    "/dev/full",
    "/dev/null",
    "/dev/stderr",
    "/dev/stdout",
    "/dev/shm",
    "/dev/tty",
    "/dev/zero",
    "/proc/self/attr",
    "/proc/self/fd",
    "/proc/self/task",
    "/tmp",
];

// =============================================================================
// Store Codec Defaults
// =============================================================================

/// Default compressor (reads stdin, writes stdout).
pub const DEFAULT_COMPRESSOR: &str = "/usr/bin/xz";

/// Default compressor arguments.
pub const DEFAULT_COMPRESSOR_ARGS: &[&str] = &["--compress", "--stdout"];

/// Default decompressor (reads stdin, writes stdout).
pub const DEFAULT_DECOMPRESSOR: &str = "/usr/bin/xz";

/// Default decompressor arguments.
pub const DEFAULT_DECOMPRESSOR_ARGS: &[&str] = &["--decompress", "--stdout"];

// =============================================================================
// Ephemeral Identifiers
// =============================================================================

/// OS entropy device read by the ephemeral identifier generator.
pub const ENTROPY_DEVICE: &str = "/dev/urandom";

// =============================================================================
// Program Name Validation Helper
// =============================================================================

/// Validates the raw content of a transformation specifier.
///
/// # Returns
///
/// The program name with trailing ASCII whitespace removed, or a static
/// description of why the content was rejected.
#[must_use = "validation result must be checked before the name is used in a path"]
pub fn validate_program_name(raw: &[u8]) -> std::result::Result<&[u8], &'static str> {
    if raw.len() > MAX_SPEC_LEN {
        return Err("specifier exceeds maximum filename length");
    }
    let name = raw.trim_ascii_end();
    if name.is_empty() {
        return Err("specifier is empty");
    }
    if name.contains(&0) {
        return Err("specifier contains a NUL byte");
    }
    Ok(name)
}
