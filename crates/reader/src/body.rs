//! Readers returned by [`Entry::body`](crate::Entry::body).

use crate::error::ErrorKind;
use crate::sparse::SparseReader;
use std::fs::File;
use std::io::{BufReader, Read, Result as IoResult, Take};
use std::path::PathBuf;

/// A response body: finite, read-once, and closed on drop.
///
/// Decoding failures surface as [`std::io::Error`]s wrapping an
/// [`ErrorKind`]; use [`ErrorKind::from_io`] to get it back.
#[derive(Debug)]
pub enum Body {
    /// Stream 1 of the entry file.
    Inline(InlineBody),
    /// Ranges of the sparse file, in logical order.
    Sparse(SparseReader),
}

impl Body {
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// Total number of bytes the body will yield.
    pub fn len(&self) -> u64 {
        match self {
            Self::Inline(inline) => inline.len,
            Self::Sparse(sparse) => sparse.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body into memory.
    pub fn into_bytes(mut self) -> IoResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(usize::try_from(self.len()).unwrap_or(0));
        self.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        match self {
            Self::Inline(inline) => inline.read(buf),
            Self::Sparse(sparse) => sparse.read(buf),
        }
    }
}

/// Bounded reader over stream 1.
///
/// Fails rather than returning a short body if the file ends before the
/// recorded stream length.
#[derive(Debug)]
pub struct InlineBody {
    inner: Take<BufReader<File>>,
    path: PathBuf,
    len: u64,
    remaining: u64,
}

impl InlineBody {
    /// `file` must already be positioned at the start of stream 1.
    pub(crate) fn new(file: File, path: PathBuf, len: u64) -> Self {
        Self {
            inner: BufReader::new(file).take(len),
            path,
            len,
            remaining: len,
        }
    }
}

impl Read for InlineBody {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if buf.is_empty() || self.remaining == 0 {
            return Ok(0);
        }
        let read = self.inner.read(buf)?;
        if read == 0 {
            let reason = format!("stream 1 ended {} bytes early", self.remaining);
            return Err(ErrorKind::structural(&self.path, reason).into_io());
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}
