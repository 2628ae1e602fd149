//! # opencorpus
//!
//! **Sandboxed Transformation Pipeline over a Content-Addressed Store**
//!
//! This crate ingests objects identified by a 256-bit content fingerprint,
//! runs each through the transformation program its source tree names, and
//! persists the outputs back into a compressed, write-once object store.
//! Every external program runs under a confinement launcher that refuses
//! filesystem writes outside an explicit allow-list.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            opencorpus                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Pipeline (transform)       │  │   ObjectStore (storage)     │  │
//! │  │ resolve → prepare → dispatch │  │ retrieve │ deposit │ efface │  │
//! │  └──────────────┬───────────────┘  └──────────────┬──────────────┘  │
//! │                 │                                 │                 │
//! │  ┌──────────────┴─────────────────────────────────┴──────────────┐  │
//! │  │                 Dispatcher (sandbox)                          │  │
//! │  │  fd plan 0/1/2/3.. │ writable allow-list │ confined spawn     │  │
//! │  └──────────────┬────────────────────────────────────────────────┘  │
//! │                 │                                                   │
//! │  ┌──────────────┴───────────┐  ┌───────────────┐  ┌──────────────┐  │
//! │  │ scratch: ensure/teardown │  │ guard         │  │ ident/unique │  │
//! │  │ locks │ cache staging    │  │ canonicalize  │  │ hex │ ids    │  │
//! │  └──────────────────────────┘  └───────────────┘  └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation follows the same protocol:
//!
//! ```text
//! resolve → canonicalize → validate → wire descriptors → spawn confined child → (caller) reap
//! ```
//!
//! # Security Model
//!
//! - **Containment**: every path handed to a child is canonicalized and
//!   checked against its base on path-component boundaries
//!   (see [`guard::canonicalize_and_check`]).
//! - **Confinement**: children may only write to a fixed device/proc list
//!   plus their Cache and Temp directories; Source stays read-only.
//! - **Immutability**: objects are deposited with create-exclusive
//!   semantics and never overwritten.
//! - **Safe cleanup**: teardown never follows symbolic links
//!   (see [`scratch::teardown`]).
//! - **Bounded input**: transformation specifiers larger than a filename
//!   are rejected before use.
//!
//! # Concurrency
//!
//! The library does no threading of its own. Dispatch returns as soon as
//! the child exists; waiting, killing, and timeouts are the caller's.
//! Stages on different identifiers are independent. Stages on the same
//! identifier are serialized by an advisory lock shared by the returned
//! [`ChildHandle`] and the child, held until the child exits.
//!
//! # Example
//!
//! ```rust,ignore
//! use opencorpus::{Config, ContentIdentifier, ObjectStore, Pipeline};
//! use std::os::fd::AsFd;
//!
//! fn main() -> opencorpus::Result<()> {
//!     let config = Config::default();
//!     let pipeline = Pipeline::new(&config);
//!     let store = ObjectStore::new(&config)?;
//!
//!     let id: ContentIdentifier = "2cf24dba…".parse()?;
//!     let output = std::fs::File::create("/tmp/out")?;
//!     let log = std::io::stderr();
//!
//!     let status = pipeline.transform(&id, log.as_fd(), output.as_fd(), &[])?.wait()?;
//!     pipeline.cleanup(&id, false)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod dictionary;
pub mod error;
pub mod guard;
pub mod ident;
pub mod sandbox;
pub mod scratch;
pub mod storage;
pub mod transform;
pub mod unique;

// Re-exports
pub use config::{Config, Confinement, Layout, Tool};
pub use constants::*;
pub use dictionary::{Dictionary, JsonDictionary};
pub use error::{Error, ErrorKind, Result};
pub use guard::{Access, canonicalize, canonicalize_and_check};
pub use ident::{ContentIdentifier, Fingerprinter, decode_hex, encode_hex};
pub use sandbox::{ChildHandle, DispatchRequest, Dispatcher};
pub use scratch::{CacheStage, IdentifierLock, ensure, teardown};
pub use storage::{Backend, ObjectStore};
pub use transform::{Pipeline, Resolved, ScratchSet};
pub use unique::EphemeralId;
