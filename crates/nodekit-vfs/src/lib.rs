//! Nodekit Virtual Filesystem
//!
//! An in-memory, synchronous, path-addressable file store. Both the guest
//! code (through the `fs` built-in) and host tooling (dependency installers,
//! editors, the CLI) read and write the same store, so files written by one
//! side are immediately visible to the other.
//!
//! Paths are `/`-separated and normalized on every call; relative paths are
//! resolved against the root. The store never touches the real filesystem.

mod error;
mod fs;
pub mod path;

pub use error::FsError;
pub use fs::{FileKind, MemFs, Metadata};
