//! Fixed record shapes of the simple cache files.
//!
//! All integers are little-endian and records are packed. The byte-order
//! wrappers from [`zerocopy::byteorder`] are alignment 1, so every record is
//! `Unaligned` and can be read straight out of a byte buffer.
//!
//! Which file each record lives in:
//!
//! ```text
//! <dir>/index                      FakeIndex
//! <dir>/index-dir/the-real-index   IndexHeader [u32 reason if version > 6] IndexEntry*
//! <dir>/<hash>_0                   EntryHeader key stream1 EntryEof stream0 [sha256(key)] EntryEof
//! <dir>/<hash>_s                   EntryHeader key (SparseRangeHeader payload)*
//! ```

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{ErrorKind as IoErrorKind, Read};
use std::mem::size_of;
use std::path::Path;
use zerocopy::byteorder::little_endian::{I32, I64, U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Magic number of the fake index, entry files and sparse files.
pub const INITIAL_MAGIC: u64 = 0xfcfb6d1ba7725c30;
/// Magic number that terminates each stream in an entry file.
pub const FINAL_MAGIC: u64 = 0xf4fa6f45970d41d8;
/// Magic number of `the-real-index`.
pub const INDEX_MAGIC: u64 = 0x656e74657220796f;
/// Magic number at the start of every range in a sparse file.
pub const SPARSE_RANGE_MAGIC: u64 = 0xeb97bf016553676b;

/// Oldest index version understood. Newer versions are accepted.
pub const MIN_INDEX_VERSION: u32 = 6;
/// The only entry file version understood.
pub const ENTRY_VERSION: u32 = 5;
/// The only sparse file version understood. Sparse files carry the index
/// version rather than the entry version.
pub const SPARSE_VERSION: u32 = MIN_INDEX_VERSION;

/// Stream trailer flag: `crc` holds the CRC32 of the stream.
pub const FLAG_HAS_CRC32: u32 = 1 << 0;
/// Stream trailer flag: the SHA-256 of the key precedes the trailer.
pub const FLAG_HAS_KEY_SHA256: u32 = 1 << 1;

/// Size of the "last write reason" that follows the real index header when
/// its version is above [`MIN_INDEX_VERSION`].
pub const INDEX_WRITE_REASON_SIZE: u64 = size_of::<u32>() as u64;

/// Content of the top-level `index` file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FakeIndex {
    pub magic: U64,
    pub version: U32,
    pub reserved: U64,
}

/// Header of `index-dir/the-real-index`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct IndexHeader {
    /// Size of the payload following this field pair.
    pub payload_size: U32,
    /// CRC32 of the payload.
    pub payload_crc: U32,
    pub magic: U64,
    pub version: U32,
    pub entry_count: U64,
    /// Total size of all entries, in bytes.
    pub cache_size: U64,
}

/// One record of the real index.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct IndexEntry {
    pub hash: U64,
    /// Windows-epoch microseconds.
    pub last_used: I64,
    pub entry_size: U64,
}

/// Header at the start of entry and sparse files; the key follows it.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EntryHeader {
    pub magic: U64,
    pub version: U32,
    pub key_len: I32,
    /// [`integrity_hash`](simplecache_hash::integrity_hash) of the key.
    pub key_hash: U32,
}

/// Trailer that ends each stream of an entry file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EntryEof {
    pub magic: U64,
    pub flags: U32,
    pub crc: U32,
    pub stream_size: I32,
}

impl EntryEof {
    #[inline]
    pub fn has_crc32(&self) -> bool {
        self.flags.get() & FLAG_HAS_CRC32 != 0
    }

    #[inline]
    pub fn has_key_sha256(&self) -> bool {
        self.flags.get() & FLAG_HAS_KEY_SHA256 != 0
    }
}

/// Header of one range in a sparse file; `len` bytes of payload follow it.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct SparseRangeHeader {
    pub magic: U64,
    /// Logical offset of the payload within the body.
    pub offset: I64,
    pub len: I64,
    pub crc: U32,
}

/// A fixed-size on-disk record.
pub trait Record: FromBytes + IntoBytes + KnownLayout + Immutable + Sized {
    /// Encoded size in bytes.
    const SIZE: u64 = size_of::<Self>() as u64;
    /// Used in error messages.
    const NAME: &'static str;
}

impl Record for FakeIndex {
    const NAME: &'static str = "fake index";
}
impl Record for IndexHeader {
    const NAME: &'static str = "index header";
}
impl Record for IndexEntry {
    const NAME: &'static str = "index entry";
}
impl Record for EntryHeader {
    const NAME: &'static str = "entry header";
}
impl Record for EntryEof {
    const NAME: &'static str = "stream trailer";
}
impl Record for SparseRangeHeader {
    const NAME: &'static str = "sparse range header";
}

pub const FAKE_INDEX_SIZE: u64 = FakeIndex::SIZE;
pub const INDEX_HEADER_SIZE: u64 = IndexHeader::SIZE;
pub const INDEX_ENTRY_SIZE: u64 = IndexEntry::SIZE;
pub const ENTRY_HEADER_SIZE: u64 = EntryHeader::SIZE;
pub const ENTRY_EOF_SIZE: u64 = EntryEof::SIZE;
pub const SPARSE_RANGE_HEADER_SIZE: u64 = SparseRangeHeader::SIZE;

const _: () = assert!(FAKE_INDEX_SIZE == 20);
const _: () = assert!(INDEX_HEADER_SIZE == 36);
const _: () = assert!(INDEX_ENTRY_SIZE == 24);
const _: () = assert!(ENTRY_HEADER_SIZE == 20);
const _: () = assert!(ENTRY_EOF_SIZE == 20);
const _: () = assert!(SPARSE_RANGE_HEADER_SIZE == 28);

/// Read one record from the current position of `reader`.
///
/// Running out of bytes is a [`Structural`](ErrorKind::Structural) error
/// naming the record; any other failure is [`Io`](ErrorKind::Io).
pub fn read_record<R: Record>(reader: &mut impl Read, file: &Path) -> Result<R> {
    let mut record = <R as FromZeros>::new_zeroed();
    match reader.read_exact(record.as_mut_bytes()) {
        Ok(()) => Ok(record),
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
            Err(e).or_raise(|| ErrorKind::structural(file, format!("truncated {}", R::NAME)))
        },
        Err(e) => Err(e).or_raise(|| ErrorKind::Io(file.to_path_buf())),
    }
}

/// Fail unless `found` equals `expected`.
pub fn check_magic(file: &Path, what: &str, found: u64, expected: u64) -> Result<()> {
    if found != expected {
        exn::bail!(ErrorKind::structural(
            file,
            format!("{what} magic {found:#018x}, expected {expected:#018x}")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_entry_header_layout() {
        let header = EntryHeader {
            magic: U64::new(INITIAL_MAGIC),
            version: U32::new(ENTRY_VERSION),
            key_len: I32::new(3),
            key_hash: U32::new(0xd2be198a),
        };
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[..8], INITIAL_MAGIC.to_le_bytes());
        assert_eq!(bytes[8..12], 5u32.to_le_bytes());
        assert_eq!(bytes[12..16], 3i32.to_le_bytes());
        assert_eq!(bytes[16..], 0xd2be198au32.to_le_bytes());
    }

    #[test]
    fn test_eof_flags() {
        let mut eof = EntryEof::new_zeroed();
        assert!(!eof.has_crc32());
        assert!(!eof.has_key_sha256());
        eof.flags = U32::new(FLAG_HAS_CRC32 | FLAG_HAS_KEY_SHA256);
        assert!(eof.has_crc32());
        assert!(eof.has_key_sha256());
        eof.flags = U32::new(FLAG_HAS_KEY_SHA256);
        assert!(!eof.has_crc32());
        assert!(eof.has_key_sha256());
    }

    #[test]
    fn test_read_record() {
        let mut bytes = SPARSE_RANGE_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&5i64.to_le_bytes());
        bytes.extend_from_slice(&10i64.to_le_bytes());
        bytes.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        let range: SparseRangeHeader = read_record(&mut Cursor::new(bytes), Path::new("x_s")).unwrap();
        assert_eq!(range.magic.get(), SPARSE_RANGE_MAGIC);
        assert_eq!(range.offset.get(), 5);
        assert_eq!(range.len.get(), 10);
        assert_eq!(range.crc.get(), 0xdeadbeef);
    }

    #[test]
    fn test_read_record_truncated() {
        let err = read_record::<EntryEof>(&mut Cursor::new(vec![0u8; 19]), Path::new("x_0")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Structural { reason, .. } if reason == "truncated stream trailer"));
    }

    #[test]
    fn test_check_magic() {
        assert!(check_magic(Path::new("index"), "index", INDEX_MAGIC, INDEX_MAGIC).is_ok());
        let err = check_magic(Path::new("index"), "index", INITIAL_MAGIC, INDEX_MAGIC).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Structural { .. }));
    }
}
