//! Deltafs: files stored as VCDIFF (RFC 3284) deltas against a parent file.
//!
//! A plain file can be declared the child of a parent, after which only
//! its difference from the parent is kept on disk. Reads materialize the
//! requested range; writes decode, patch and re-encode. Mutations of a
//! chain are serialized across processes by path-keyed lock files.
//!
//! The crate provides:
//! - A resumable VCDIFF engine driven by a negotiation loop (`vcdiff`)
//! - File-level encode/decode and range reads (`codec`)
//! - Cross-process path locks (`lock`)
//! - Chain writes, promotion and truncation (`chain`)
//! - The parent/child table (`directory`) and a filesystem front end (`fs`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use deltafs::config::Options;
//! use deltafs::directory::JsonDirectory;
//! use deltafs::fs::DeltaFs;
//!
//! let directory = JsonDirectory::open("/data/.deltafs.json").unwrap();
//! let store = DeltaFs::new("/data", Options::default(), directory).unwrap();
//!
//! store.adopt(Path::new("base.img"), Path::new("copy.img"), None, false).unwrap();
//! store.write(Path::new("copy.img"), b"patched", 4096).unwrap();
//! let bytes = store.read(Path::new("copy.img"), 7, 4096).unwrap();
//! assert_eq!(bytes, b"patched");
//! ```

pub mod chain;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod fs;
pub mod hash;
pub mod lock;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, Result};
