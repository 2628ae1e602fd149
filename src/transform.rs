//! # Transformation Pipeline Stage
//!
//! Resolves which program transforms a content identifier and dispatches it
//! through the [`Dispatcher`] with the identifier's scratch directories.
//!
//! ## Resolution
//!
//! ```text
//! <source>/<hex>/spec  ──read──►  "program-name"
//!                                      │
//! <executable>/program-name  ◄─────────┘  (canonical, executable, under base)
//! ```
//!
//! Many identifiers can share one program; the caller never names program
//! paths directly.
//!
//! ## Stages
//!
//! ```text
//! Resolving → Validating → ScratchPreparing → Dispatched → (caller: Running → Exited)
//! ```
//!
//! The identifier's [`IdentifierLock`] is taken before scratch preparation
//! and travels inside the returned [`ChildHandle`]. The child inherits the
//! lock descriptor, so the lock holds until the child exits even if the
//! handle is dropped unreaped.

use crate::config::{Config, Layout};
use crate::constants::{MAX_INPUTS, MAX_SPEC_LEN, SPEC_FILE_NAME, validate_program_name};
use crate::error::{Error, Result};
use crate::guard::{self, Access};
use crate::ident::{ContentIdentifier, encode_hex};
use crate::sandbox::{ChildHandle, DispatchRequest, Dispatcher};
use crate::scratch::{self, IdentifierLock};
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::path::PathBuf;
use tracing::{debug, info};

/// The program that handles one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical, executable program path under the executable base.
    pub program: PathBuf,
    /// Name of the program's cache tree (the program's file name).
    pub cache_key: OsString,
}

/// Validated scratch directories for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchSet {
    pub source: PathBuf,
    pub cache: PathBuf,
    pub temp: PathBuf,
}

/// Transformation stage bound to one deployment layout.
#[derive(Debug, Clone)]
pub struct Pipeline {
    layout: Layout,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            layout: config.layout.clone(),
            dispatcher: Dispatcher::new(config.confinement.clone()),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// `<source>/<hex>`
    pub fn source_dir(&self, identifier: &ContentIdentifier) -> PathBuf {
        self.layout.source.join(identifier.to_hex())
    }

    /// `<temp>/<hex>`
    pub fn temp_dir(&self, identifier: &ContentIdentifier) -> PathBuf {
        self.layout.temp.join(identifier.to_hex())
    }

    /// `<cache>/<program-name>`
    pub fn cache_dir(&self, resolved: &Resolved) -> PathBuf {
        self.layout.cache.join(&resolved.cache_key)
    }

    /// Reads the identifier's specifier and validates the named program.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the specifier or program does not exist
    /// - [`Error::PermissionDenied`] if either escapes its base, the
    ///   specifier is unreadable, or the program is not executable
    /// - [`Error::InvalidFormat`] if the specifier is empty or oversized
    pub fn resolve(&self, identifier: &ContentIdentifier) -> Result<Resolved> {
        let spec_path = self.source_dir(identifier).join(SPEC_FILE_NAME);
        let spec = guard::canonicalize_and_check(&self.layout.source, &spec_path, Access::READ)?;

        // Read one byte past the limit so an oversized file is detectable.
        let mut raw = Vec::with_capacity(MAX_SPEC_LEN + 1);
        File::open(&spec)
            .map_err(|e| Error::from_io(&spec, e))?
            .take(MAX_SPEC_LEN as u64 + 1)
            .read_to_end(&mut raw)?;

        let name = validate_program_name(&raw)
            .map_err(|reason| Error::InvalidFormat(format!("{}: {reason}", spec.display())))?;

        let candidate = self.layout.executable.join(OsStr::from_bytes(name));
        let program =
            guard::canonicalize_and_check(&self.layout.executable, &candidate, Access::EXECUTE)?;
        if !program.is_file() {
            return Err(Error::denied(program, "not a regular file"));
        }

        let cache_key = program
            .file_name()
            .ok_or_else(|| Error::denied(&program, "program has no file name"))?
            .to_os_string();

        debug!("Resolved {} to {}", identifier, program.display());
        Ok(Resolved { program, cache_key })
    }

    /// Creates (where needed) and validates the identifier's scratch set.
    pub fn prepare(&self, identifier: &ContentIdentifier, resolved: &Resolved) -> Result<ScratchSet> {
        let source = guard::canonicalize_and_check(
            &self.layout.source,
            &self.source_dir(identifier),
            Access::READ | Access::EXECUTE,
        )?;
        let cache = scratch::ensure(&self.layout.cache, &self.cache_dir(resolved), Access::READ_WRITE)?;
        let temp = scratch::ensure(&self.layout.temp, &self.temp_dir(identifier), Access::READ_WRITE)?;

        Ok(ScratchSet {
            source,
            cache,
            temp,
        })
    }

    /// Dispatches the identifier's transformation.
    ///
    /// The child runs as `<program> <source> <cache> <temp> <count>` with
    /// `out` on descriptor 1, `log` on 2, and `inputs` from 3 onwards;
    /// `<count>` is the input count as four big-endian hex digits. Only the
    /// cache and temp directories are added to the writable allow-list.
    ///
    /// # Errors
    ///
    /// Any error of [`Pipeline::resolve`], plus [`Error::Busy`] if the
    /// identifier is locked, [`Error::ResourceExhausted`] if a scratch
    /// directory cannot be created, and [`Error::SpawnFailure`].
    pub fn transform(
        &self,
        identifier: &ContentIdentifier,
        log: BorrowedFd<'_>,
        out: BorrowedFd<'_>,
        inputs: &[BorrowedFd<'_>],
    ) -> Result<ChildHandle> {
        let resolved = self.resolve(identifier)?;

        let count = u16::try_from(inputs.len()).map_err(|_| {
            Error::InvalidFormat(format!(
                "{} input streams exceed the limit of {}",
                inputs.len(),
                MAX_INPUTS
            ))
        })?;

        let lock = IdentifierLock::acquire(&self.layout.lock, identifier)?;
        let scratch = self.prepare(identifier, &resolved)?;

        let request = DispatchRequest::new(&resolved.program, out, log)
            .arg(&scratch.source)
            .arg(&scratch.cache)
            .arg(&scratch.temp)
            .arg(encode_hex(&count.to_be_bytes()))
            .writable(&scratch.cache)
            .writable(&scratch.temp)
            .inputs(inputs)
            .hold(lock.as_fd());

        let child = self.dispatcher.dispatch(request)?;
        info!("Transforming {} with {}", identifier, resolved.program.display());
        Ok(child.with_lock(lock))
    }

    /// Tears down the identifier's Temp tree, and its program's Cache tree
    /// when `also_cache` is set.
    ///
    /// Both phases run even if the first fails; the first failure is
    /// returned. Safe to retry.
    pub fn cleanup(&self, identifier: &ContentIdentifier, also_cache: bool) -> Result<()> {
        let _lock = IdentifierLock::acquire(&self.layout.lock, identifier)?;

        let temp = scratch::teardown(&self.layout.temp, &self.temp_dir(identifier));
        let cache = if also_cache {
            self.resolve(identifier)
                .and_then(|resolved| scratch::teardown(&self.layout.cache, &self.cache_dir(&resolved)))
        } else {
            Ok(())
        };

        temp.and(cache)
    }
}
