//! Filesystem error types.
//!
//! Display strings carry Node-style error codes (`ENOENT: ...`) because the
//! `fs` built-in surfaces them to guest code, which matches on `err.code`.

/// Errors produced by [`crate::MemFs`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    /// Path (or a parent component) does not exist.
    #[error("ENOENT: no such file or directory, '{0}'")]
    NotFound(String),

    /// Target already exists and the operation requires it not to.
    #[error("EEXIST: file already exists, '{0}'")]
    AlreadyExists(String),

    /// A non-directory appeared where a directory was required.
    #[error("ENOTDIR: not a directory, '{0}'")]
    NotADirectory(String),

    /// A directory appeared where a file was required.
    #[error("EISDIR: illegal operation on a directory, '{0}'")]
    IsADirectory(String),

    /// Directory removal attempted on a non-empty directory.
    #[error("ENOTEMPTY: directory not empty, '{0}'")]
    NotEmpty(String),

    /// Malformed path or non-UTF-8 content read as text.
    #[error("EINVAL: invalid argument, '{0}'")]
    Invalid(String),
}

impl FsError {
    /// The Node-style error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "ENOENT",
            FsError::AlreadyExists(_) => "EEXIST",
            FsError::NotADirectory(_) => "ENOTDIR",
            FsError::IsADirectory(_) => "EISDIR",
            FsError::NotEmpty(_) => "ENOTEMPTY",
            FsError::Invalid(_) => "EINVAL",
        }
    }
}
