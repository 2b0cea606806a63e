//! Reader Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. The top frame of every error raised
//! by this crate carries one of four [`ErrorKind`]s; the underlying
//! [`std::io::Error`], when there is one, hangs below it as a child.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};

/// A reader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The cache directory, an index file, or an entry/sparse file does not
    /// exist. Enumeration skips these; everyone else reports them.
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Bad magic number, unsupported version, or a record cut short.
    #[display("malformed {}: {reason}", file.display())]
    Structural {
        /// File being decoded.
        file: PathBuf,
        /// Which record or field failed, and how.
        reason: String,
    },
    /// Key hash, CRC32 or SHA-256 mismatch. The data can't be trusted.
    #[display("integrity check failed in {}: {reason}", file.display())]
    Integrity {
        /// File being decoded.
        file: PathBuf,
        /// Which guard failed, with the stored and computed values.
        reason: String,
    },
    /// Any other filesystem failure (permissions, device errors).
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    pub(crate) fn structural(file: &Path, reason: impl Into<String>) -> Self {
        Self::Structural { file: file.to_path_buf(), reason: reason.into() }
    }

    pub(crate) fn integrity(file: &Path, reason: impl Into<String>) -> Self {
        Self::Integrity { file: file.to_path_buf(), reason: reason.into() }
    }

    /// Classify a failed `open`/`stat`. Only the I/O kind is inspected; the
    /// error itself is attached by the caller with `or_raise`.
    pub(crate) fn from_open(err: &IoError, path: &Path) -> Self {
        match err.kind() {
            IoErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            _ => Self::Io(path.to_path_buf()),
        }
    }

    /// Returns `true` if the underlying file was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // All I/O is local random access; there is no transient failure
        // worth retrying. A concurrent writer shows up as corruption.
        false
    }

    /// Recover the kind carried inside an [`IoError`] produced by one of the
    /// streaming body readers.
    pub fn from_io(err: &IoError) -> Option<&ErrorKind> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<ErrorKind>())
    }

    /// Wrap this kind in an [`IoError`], for [`std::io::Read`] implementations.
    pub(crate) fn into_io(self) -> IoError {
        let kind = match &self {
            Self::NotFound(_) => IoErrorKind::NotFound,
            Self::Structural { .. } => IoErrorKind::UnexpectedEof,
            Self::Integrity { .. } => IoErrorKind::InvalidData,
            Self::Io(_) => IoErrorKind::Other,
        };
        IoError::new(kind, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exn::ResultExt;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::NotFound(PathBuf::from("cache/0123456789abcdef_0")).to_string(),
            "not found: cache/0123456789abcdef_0"
        );
        assert_eq!(
            ErrorKind::structural(Path::new("cache/index"), "bad magic").to_string(),
            "malformed cache/index: bad magic"
        );
        assert_eq!(
            ErrorKind::integrity(Path::new("x_0"), "stream 0 CRC32").to_string(),
            "integrity check failed in x_0: stream 0 CRC32"
        );
    }

    #[test]
    fn error_kind_not_retryable() {
        assert!(!ErrorKind::Io(PathBuf::from("x")).is_retryable());
        assert!(!ErrorKind::structural(Path::new("x"), "y").is_retryable());
    }

    #[test]
    fn error_from_open() {
        let path = Path::new("missing");
        let missing = IoError::new(IoErrorKind::NotFound, "gone");
        assert!(ErrorKind::from_open(&missing, path).is_not_found());
        let denied = IoError::new(IoErrorKind::PermissionDenied, "nope");
        assert_eq!(ErrorKind::from_open(&denied, path), ErrorKind::Io(path.to_path_buf()));
    }

    #[test]
    fn error_round_trips_through_io() {
        let kind = ErrorKind::integrity(Path::new("x_s"), "range CRC32");
        let io = kind.clone().into_io();
        assert_eq!(io.kind(), IoErrorKind::InvalidData);
        assert_eq!(ErrorKind::from_io(&io), Some(&kind));
        assert_eq!(ErrorKind::from_io(&IoError::other("plain")), None);
    }

    #[test]
    fn error_from_result() {
        let result: std::result::Result<(), IoError> = Err(IoError::new(IoErrorKind::NotFound, "file not found"));
        let err: Result<()> = result.or_raise(|| ErrorKind::NotFound(PathBuf::from("index")));
        let exn = err.unwrap_err();
        assert!(exn.is_not_found());
    }
}
