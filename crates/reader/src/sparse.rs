//! Sparse file (`<hash>_s`) decoding.
//!
//! Large bodies are stored as independently written ranges:
//!
//! ```text
//! | EntryHeader | key | SparseRangeHeader | payload | SparseRangeHeader | payload | ... EOF
//! ```
//!
//! Ranges may appear in any order. [`SparseReader`] scans every range header
//! up front, sorts them by logical offset, and then serves their payloads
//! one range at a time, checking each CRC32 before any of its bytes are
//! returned.

use crate::entry::{check_crc, open, read_at, read_header};
use crate::error::{ErrorKind, Result};
use crate::layout::{
    ENTRY_HEADER_SIZE, SPARSE_RANGE_HEADER_SIZE, SPARSE_RANGE_MAGIC, SPARSE_VERSION, SparseRangeHeader, check_magic,
};
use crate::paths::{sparse_file_name, sparse_path};
use exn::{OptionExt, ResultExt};
use std::fs::File;
use std::io::{BufReader, Read, Result as IoResult, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::instrument;
use zerocopy::{FromZeros, IntoBytes};

/// One range of a sparse file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseRange {
    /// Position of the payload within the body.
    pub offset: u64,
    pub len: u64,
    /// CRC32 of the payload.
    pub crc: u32,
    /// Position of the payload within the sparse file.
    pub file_offset: u64,
}

impl SparseRange {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Streams the ranges of a sparse file as one body, in logical order.
#[derive(Debug)]
pub struct SparseReader {
    file: File,
    path: PathBuf,
    ranges: Vec<SparseRange>,
    /// Index into `ranges` of the next range to load.
    next: usize,
    buffer: Vec<u8>,
    position: usize,
}

impl SparseReader {
    /// Open the sparse file for lookup hash `hash` and scan its ranges.
    #[instrument(skip_all, fields(file = %sparse_file_name(hash), ranges))]
    pub fn open(hash: u64, dir: &Path) -> Result<Self> {
        let path = sparse_path(dir, hash);
        let (mut file, file_size) = open(&path)?;
        let (_, key_len) = read_header(&mut file, &path, file_size, SPARSE_VERSION)?;
        let ranges = scan_ranges(&mut file, &path, key_len, file_size)?;
        tracing::Span::current().record("ranges", ranges.len());
        Ok(Self { file, path, ranges, next: 0, buffer: Vec::new(), position: 0 })
    }

    /// The ranges in the order they are served.
    pub fn ranges(&self) -> &[SparseRange] {
        &self.ranges
    }

    /// Total payload length across all ranges.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|range| range.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load and verify the next range into the buffer. Returns `false` once
    /// every range has been served.
    fn fill(&mut self) -> Result<bool> {
        let Some(range) = self.ranges.get(self.next).copied() else {
            return Ok(false);
        };
        self.next += 1;
        let payload = read_at(&mut self.file, &self.path, range.file_offset, range.len, "sparse range")?;
        check_crc(&self.path, &format!("sparse range at {}", range.offset), range.crc, &payload)?;
        self.buffer = payload;
        self.position = 0;
        Ok(true)
    }
}

impl Read for SparseReader {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position == self.buffer.len() {
            match self.fill() {
                Ok(true) => {},
                Ok(false) => return Ok(0),
                Err(err) => return Err((*err).clone().into_io()),
            }
        }
        let available = &self.buffer[self.position..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}

/// Walk every range header after the key, then sort by logical offset.
///
/// Ending exactly on a range boundary is the normal end of the file. A
/// partial header, a bad magic number, or a payload running past the end of
/// the file is a structural error.
fn scan_ranges(file: &mut File, path: &Path, key_len: u64, file_size: u64) -> Result<Vec<SparseRange>> {
    let mut cursor = ENTRY_HEADER_SIZE + key_len;
    file.seek(SeekFrom::Start(cursor)).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let mut ranges = Vec::new();

    while cursor < file_size {
        if file_size - cursor < SPARSE_RANGE_HEADER_SIZE {
            exn::bail!(ErrorKind::structural(path, format!("truncated sparse range header at {cursor}")));
        }
        let mut header = SparseRangeHeader::new_zeroed();
        reader
            .read_exact(header.as_mut_bytes())
            .or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        check_magic(path, "sparse range", header.magic.get(), SPARSE_RANGE_MAGIC)?;

        let (offset, len) = u64::try_from(header.offset.get())
            .ok()
            .zip(u64::try_from(header.len.get()).ok())
            .ok_or_raise(|| {
                ErrorKind::structural(
                    path,
                    format!(
                        "sparse range at {cursor} has offset {} and length {}",
                        header.offset.get(),
                        header.len.get()
                    ),
                )
            })?;
        let file_offset = cursor + SPARSE_RANGE_HEADER_SIZE;
        if file_size - file_offset < len {
            exn::bail!(ErrorKind::structural(
                path,
                format!("sparse range of {len} bytes at {file_offset} runs past the end of the file")
            ));
        }
        let range = SparseRange { offset, len, crc: header.crc.get(), file_offset };
        tracing::trace!(offset = range.offset, len = range.len, file_offset, "Found sparse range");
        ranges.push(range);

        reader.seek_relative(len as i64).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        cursor = file_offset + len;
    }

    ranges.sort_by_key(|range| range.offset);
    Ok(ranges)
}
