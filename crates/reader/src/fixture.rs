//! Builders that write synthetic cache directories.
//!
//! Everything here produces files in the exact on-disk format the decoders
//! read, with every guard (key hash, CRC32, key SHA-256) computed correctly
//! unless a builder method asks otherwise. Tests then break individual bytes
//! with [`corrupt_byte`].

use crate::headers::{MetadataHeader, WINDOWS_EPOCH_DELTA_MICROS};
use crate::layout::{
    ENTRY_VERSION, EntryEof, EntryHeader, FINAL_MAGIC, FLAG_HAS_CRC32, FLAG_HAS_KEY_SHA256, FakeIndex, INDEX_MAGIC,
    INITIAL_MAGIC, IndexEntry, IndexHeader, MIN_INDEX_VERSION, Record, SPARSE_RANGE_MAGIC, SPARSE_VERSION,
    SparseRangeHeader,
};
use crate::paths::{INDEX_DIR_NAME, entry_path, fake_index_path, real_index_path, sparse_path};
use simplecache_hash::{integrity_hash, key_digest, lookup_hash};
use std::fs::{self, OpenOptions};
use std::io::{Read, Result, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use zerocopy::IntoBytes;
use zerocopy::byteorder::little_endian::{I32, I64, U32, U64};

/// 2023-11-14T22:13:20Z, as Windows-epoch microseconds.
pub const RESPONSE_TIME: i64 = WINDOWS_EPOCH_DELTA_MICROS + 1_700_000_000_000_000;

/// Encode stream 0: the metadata sub-header followed by the NUL-separated
/// status line and header lines.
pub fn response_info(status_line: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(status_line.as_bytes());
    block.push(0);
    for (name, value) in headers {
        block.extend_from_slice(format!("{name}: {value}").as_bytes());
        block.push(0);
    }
    block.push(0);

    let info = MetadataHeader {
        info_size: I32::new((MetadataHeader::SIZE as usize - size_of::<i32>() + block.len()) as i32),
        flags: I32::new(0),
        request_time: I64::new(RESPONSE_TIME - 1_000),
        response_time: I64::new(RESPONSE_TIME),
        header_size: I32::new(block.len() as i32),
    };
    let mut out = info.as_bytes().to_vec();
    out.extend_from_slice(&block);
    out
}

fn entry_header(key: &str, version: u32) -> EntryHeader {
    EntryHeader {
        magic: U64::new(INITIAL_MAGIC),
        version: U32::new(version),
        key_len: I32::new(key.len() as i32),
        key_hash: U32::new(integrity_hash(key)),
    }
}

fn eof(flags: u32, crc: u32, len: usize) -> EntryEof {
    EntryEof {
        magic: U64::new(FINAL_MAGIC),
        flags: U32::new(flags),
        crc: U32::new(crc),
        stream_size: I32::new(len as i32),
    }
}

/// An entry file (`<hash>_0`).
#[derive(Debug, Clone)]
pub struct EntryFixture {
    key: String,
    stream0: Vec<u8>,
    stream1: Vec<u8>,
    crc: bool,
    key_sha256: bool,
}

impl EntryFixture {
    /// A `200 OK` entry with an empty inline body, CRC32 on both streams and
    /// the key SHA-256 present.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            stream0: response_info("HTTP/1.1 200 OK", &[]),
            stream1: Vec::new(),
            crc: true,
            key_sha256: true,
        }
    }

    /// Replace stream 0 with an encoded response.
    pub fn with_response(mut self, status_line: &str, headers: &[(&str, &str)]) -> Self {
        self.stream0 = response_info(status_line, headers);
        self
    }

    /// Replace stream 0 with raw bytes.
    pub fn with_stream0(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.stream0 = raw.into();
        self
    }

    /// Set the inline body, with a matching `Content-Length` response.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.stream1 = body.into();
        let length = self.stream1.len().to_string();
        self.stream0 = response_info("HTTP/1.1 200 OK", &[("Content-Length", &length)]);
        self
    }

    /// Replace stream 1 without touching stream 0.
    pub fn with_stream1(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.stream1 = raw.into();
        self
    }

    /// Leave both CRC32 flags clear.
    pub fn without_crc(mut self) -> Self {
        self.crc = false;
        self
    }

    /// Omit the key SHA-256 and its flag.
    pub fn without_key_sha256(mut self) -> Self {
        self.key_sha256 = false;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hash(&self) -> u64 {
        lookup_hash(&self.key)
    }

    /// Offset of stream 1 within the encoded file.
    pub fn stream1_offset(&self) -> u64 {
        (EntryHeader::SIZE as usize + self.key.len()) as u64
    }

    /// Offset of stream 0 within the encoded file.
    pub fn stream0_offset(&self) -> u64 {
        self.stream1_offset() + (self.stream1.len() + EntryEof::SIZE as usize) as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let crc_flag = if self.crc { FLAG_HAS_CRC32 } else { 0 };
        let crc = |data: &[u8]| if self.crc { crc32fast::hash(data) } else { 0 };

        let mut out = entry_header(&self.key, ENTRY_VERSION).as_bytes().to_vec();
        out.extend_from_slice(self.key.as_bytes());
        out.extend_from_slice(&self.stream1);
        out.extend_from_slice(eof(crc_flag, crc(&self.stream1), self.stream1.len()).as_bytes());
        out.extend_from_slice(&self.stream0);
        let mut flags = crc_flag;
        if self.key_sha256 {
            out.extend_from_slice(&key_digest(&self.key));
            flags |= FLAG_HAS_KEY_SHA256;
        }
        out.extend_from_slice(eof(flags, crc(&self.stream0), self.stream0.len()).as_bytes());
        out
    }

    /// Write `<dir>/<hash>_0` and return its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = entry_path(dir, self.hash());
        fs::write(&path, self.to_bytes())?;
        Ok(path)
    }
}

/// A sparse file (`<hash>_s`). Ranges are written in the order they are added.
#[derive(Debug, Clone)]
pub struct SparseFixture {
    key: String,
    ranges: Vec<(u64, Vec<u8>)>,
    bad_crc: Option<usize>,
}

impl SparseFixture {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ranges: Vec::new(), bad_crc: None }
    }

    pub fn with_range(mut self, offset: u64, payload: impl Into<Vec<u8>>) -> Self {
        self.ranges.push((offset, payload.into()));
        self
    }

    /// Store a wrong CRC32 for the `index`th range added.
    pub fn with_bad_crc(mut self, index: usize) -> Self {
        self.bad_crc = Some(index);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = entry_header(&self.key, SPARSE_VERSION).as_bytes().to_vec();
        out.extend_from_slice(self.key.as_bytes());
        for (index, (offset, payload)) in self.ranges.iter().enumerate() {
            let mut crc = crc32fast::hash(payload);
            if self.bad_crc == Some(index) {
                crc = !crc;
            }
            let header = SparseRangeHeader {
                magic: U64::new(SPARSE_RANGE_MAGIC),
                offset: I64::new(*offset as i64),
                len: I64::new(payload.len() as i64),
                crc: U32::new(crc),
            };
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(payload);
        }
        out
    }

    /// Write `<dir>/<hash>_s` and return its path.
    pub fn write(&self, dir: &Path, hash: u64) -> Result<PathBuf> {
        let path = sparse_path(dir, hash);
        fs::write(&path, self.to_bytes())?;
        Ok(path)
    }
}

/// A whole cache directory: both index files plus entry and sparse files.
#[derive(Debug, Clone)]
pub struct CacheFixture {
    index_version: u32,
    entries: Vec<EntryFixture>,
    sparse: Vec<(u64, SparseFixture)>,
    orphans: Vec<u64>,
}

impl Default for CacheFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheFixture {
    pub fn new() -> Self {
        Self { index_version: MIN_INDEX_VERSION, entries: Vec::new(), sparse: Vec::new(), orphans: Vec::new() }
    }

    /// Index version for both index files. Above the minimum, the real index
    /// carries a write reason after its header.
    pub fn with_index_version(mut self, version: u32) -> Self {
        self.index_version = version;
        self
    }

    pub fn with_entry(mut self, entry: EntryFixture) -> Self {
        self.entries.push(entry);
        self
    }

    /// An entry with no inline body whose data lives in a sparse file.
    pub fn with_sparse_entry(mut self, entry: EntryFixture, sparse: SparseFixture) -> Self {
        self.sparse.push((entry.hash(), sparse));
        self.entries.push(entry);
        self
    }

    /// List `hash` in the index without writing any entry file for it.
    pub fn with_orphan(mut self, hash: u64) -> Self {
        self.orphans.push(hash);
        self
    }

    /// Write everything into `dir` and return the hashes in index order.
    pub fn write(&self, dir: &Path) -> Result<Vec<u64>> {
        let mut hashes = Vec::new();
        for entry in &self.entries {
            entry.write(dir)?;
            hashes.push(entry.hash());
        }
        for (hash, sparse) in &self.sparse {
            sparse.write(dir, *hash)?;
        }
        hashes.extend_from_slice(&self.orphans);
        write_fake_index(dir, self.index_version)?;
        write_real_index(dir, self.index_version, &hashes)?;
        Ok(hashes)
    }
}

/// Write `<dir>/index`.
pub fn write_fake_index(dir: &Path, version: u32) -> Result<()> {
    let index = FakeIndex { magic: U64::new(INITIAL_MAGIC), version: U32::new(version), reserved: U64::new(0) };
    fs::write(fake_index_path(dir), index.as_bytes())
}

/// Write `<dir>/index-dir/the-real-index` listing `hashes`.
pub fn write_real_index(dir: &Path, version: u32, hashes: &[u64]) -> Result<()> {
    let mut body = Vec::new();
    if version > MIN_INDEX_VERSION {
        // Write reason.
        body.extend_from_slice(&1u32.to_le_bytes());
    }
    for (position, hash) in hashes.iter().enumerate() {
        let record = IndexEntry {
            hash: U64::new(*hash),
            last_used: I64::new(RESPONSE_TIME + position as i64),
            entry_size: U64::new(4096),
        };
        body.extend_from_slice(record.as_bytes());
    }
    // Last modified time of the cache.
    body.extend_from_slice(&RESPONSE_TIME.to_le_bytes());

    let mut header = IndexHeader {
        payload_size: U32::new(0),
        payload_crc: U32::new(0),
        magic: U64::new(INDEX_MAGIC),
        version: U32::new(version),
        entry_count: U64::new(hashes.len() as u64),
        cache_size: U64::new(4096 * hashes.len() as u64),
    };
    let mut payload = header.as_bytes()[8..].to_vec();
    payload.extend_from_slice(&body);
    header.payload_size = U32::new(payload.len() as u32);
    header.payload_crc = U32::new(crc32fast::hash(&payload));

    fs::create_dir_all(dir.join(INDEX_DIR_NAME))?;
    let mut out = header.as_bytes().to_vec();
    out.extend_from_slice(&body);
    fs::write(real_index_path(dir), out)
}

/// Flip every bit of the byte at `offset` in `path`.
pub fn corrupt_byte(path: &Path, offset: u64) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut byte = [0u8];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    byte[0] = !byte[0];
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)
}
