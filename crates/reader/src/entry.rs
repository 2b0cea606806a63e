//! Entry file (`<hash>_0`) decoding.
//!
//! ```text
//! 0                 20          20+k                    t1      t1+20        d0      t0     size
//! | EntryHeader     | key (k)   | stream 1 (s1)         | eof 1 | stream 0 (s0) [sha256] | eof 0 |
//! ```
//!
//! Only the header and key sit at fixed positions. Everything else is derived
//! backwards from the end of the file, in this order:
//!
//! 1. `t0 = size - EOF`: stream 0 trailer.
//! 2. `d0 = t0 - s0 - (32 if the trailer has the key SHA-256 flag)`: stream 0.
//! 3. `t1 = d0 - EOF`: stream 1 trailer.
//! 4. `d1 = 20 + k`: stream 1, which must end at or before `t1`.
//!
//! An [`Entry`] holds no file handle. Each accessor re-opens the file by
//! name, so a file removed in the meantime shows up as
//! [`NotFound`](ErrorKind::NotFound).

use crate::body::{Body, InlineBody};
use crate::error::{Error, ErrorKind, Result};
use crate::headers::{Headers, ResponseInfo};
use crate::layout::{
    ENTRY_EOF_SIZE, ENTRY_HEADER_SIZE, ENTRY_VERSION, EntryEof, EntryHeader, FINAL_MAGIC, INITIAL_MAGIC,
    check_magic, read_record,
};
use crate::paths::{entry_file_name, entry_path};
use crate::sparse::SparseReader;
use exn::{OptionExt, ResultExt};
use simplecache_hash::{KEY_DIGEST_SIZE, integrity_hash, key_digest, lookup_hash};
use std::borrow::Cow;
use std::fs::File;
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Bytes between the end of stream 0 and its trailer when the key digest is present.
const KEY_DIGEST_LEN: u64 = KEY_DIGEST_SIZE as u64;

/// A decoded entry: its key and where its two streams live in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    hash: u64,
    dir: PathBuf,
    key: Vec<u8>,
    file_size: u64,
    key_len: u64,
    offset0: u64,
    size0: u64,
    offset1: u64,
    size1: u64,
}

/// Open and fully validate the entry with lookup hash `hash` in `dir`.
///
/// Checks the header magic and version, the key hash, both stream trailers,
/// and every CRC32 or SHA-256 guard the trailers declare.
#[instrument(skip_all, fields(file = %entry_file_name(hash), stream0_size, stream1_size))]
pub fn open_entry(hash: u64, dir: impl AsRef<Path>) -> Result<Entry> {
    let dir = dir.as_ref();
    let path = entry_path(dir, hash);
    let (mut file, file_size) = open(&path)?;
    let (key_len, key) = read_key(&mut file, &path, file_size)?;

    let mut entry = Entry {
        hash,
        dir: dir.to_path_buf(),
        key,
        file_size,
        key_len,
        offset0: 0,
        size0: 0,
        offset1: 0,
        size1: 0,
    };
    entry.read_stream0(&mut file, &path)?;
    entry.read_stream1(&mut file, &path)?;

    let span = tracing::Span::current();
    span.record("stream0_size", entry.size0);
    span.record("stream1_size", entry.size1);
    Ok(entry)
}

/// Open the entry whose key is `key`.
pub fn open_key(key: &str, dir: impl AsRef<Path>) -> Result<Entry> {
    open_entry(lookup_hash(key), dir)
}

/// Decode only the header and key of an entry file.
///
/// This is the cheap pass used to enumerate a cache; stream trailers and
/// their guards are not checked.
pub(crate) fn read_entry_key(hash: u64, dir: &Path) -> Result<String> {
    let path = entry_path(dir, hash);
    let (mut file, file_size) = open(&path)?;
    let (_, key) = read_key(&mut file, &path, file_size)?;
    Ok(String::from_utf8_lossy(&key).into_owned())
}

impl Entry {
    /// Lookup hash naming this entry's files.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The original key, usually the URL of the resource. Bytes that are not
    /// valid UTF-8 are replaced with U+FFFD.
    pub fn key(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// The key exactly as stored.
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Cache directory the entry was opened from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry file.
    pub fn path(&self) -> PathBuf {
        entry_path(&self.dir, self.hash)
    }

    /// Size of the entry file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Length of stream 0 (response metadata and headers).
    pub fn metadata_len(&self) -> u64 {
        self.size0
    }

    /// Length of the inline body. Zero means the body is in the sparse file.
    pub fn body_len(&self) -> u64 {
        self.size1
    }

    pub fn has_inline_body(&self) -> bool {
        self.size1 > 0
    }

    /// Re-read and decode stream 0.
    #[instrument(skip_all, fields(file = %entry_file_name(self.hash)))]
    pub fn metadata(&self) -> Result<ResponseInfo> {
        let path = self.path();
        let (mut file, _) = open(&path)?;
        let stream = read_at(&mut file, &path, self.offset0, self.size0, "stream 0")?;
        ResponseInfo::decode(&stream, &path)
    }

    /// The response headers from stream 0.
    pub fn header(&self) -> Result<Headers> {
        Ok(self.metadata()?.headers)
    }

    /// Open the body for reading.
    ///
    /// An inline body is a bounded reader over stream 1. Without one, the
    /// body is reassembled from the sparse file. Either way the returned
    /// reader owns its file handle and releases it when dropped.
    #[instrument(skip_all, fields(file = %entry_file_name(self.hash), sparse = !self.has_inline_body()))]
    pub fn body(&self) -> Result<Body> {
        if !self.has_inline_body() {
            return Ok(Body::Sparse(SparseReader::open(self.hash, &self.dir)?));
        }
        let path = self.path();
        let (mut file, _) = open(&path)?;
        file.seek(SeekFrom::Start(self.offset1)).or_raise(|| ErrorKind::Io(path.clone()))?;
        Ok(Body::Inline(InlineBody::new(file, path, self.size1)))
    }

    fn read_stream0(&mut self, file: &mut File, path: &Path) -> Result<()> {
        let trailer_offset = self.file_size.checked_sub(ENTRY_EOF_SIZE).ok_or_raise(|| {
            ErrorKind::structural(path, format!("{} bytes is too small for a stream 0 trailer", self.file_size))
        })?;
        let eof = read_trailer(file, path, trailer_offset, "stream 0")?;

        self.size0 = stream_size(&eof, path, "stream 0")?;
        let digest_len = if eof.has_key_sha256() { KEY_DIGEST_LEN } else { 0 };
        // Room must remain for the header, the key and the stream 1 trailer.
        let floor = ENTRY_HEADER_SIZE + self.key_len + ENTRY_EOF_SIZE;
        self.offset0 = trailer_offset
            .checked_sub(self.size0)
            .and_then(|offset| offset.checked_sub(digest_len))
            .filter(|&offset| offset >= floor)
            .ok_or_raise(|| {
                ErrorKind::structural(
                    path,
                    format!("stream 0 of {} bytes does not fit before offset {trailer_offset}", self.size0),
                )
            })?;

        if eof.has_crc32() {
            let stream = read_at(file, path, self.offset0, self.size0, "stream 0")?;
            check_crc(path, "stream 0", eof.crc.get(), &stream)?;
        }
        if eof.has_key_sha256() {
            let stored = read_at(file, path, self.offset0 + self.size0, KEY_DIGEST_LEN, "key SHA-256")?;
            let actual = key_digest(&self.key);
            if stored[..] != actual[..] {
                exn::bail!(ErrorKind::integrity(path, "stored key SHA-256 does not match the key"));
            }
        }
        tracing::trace!(offset = self.offset0, size = self.size0, "Located stream 0");
        Ok(())
    }

    fn read_stream1(&mut self, file: &mut File, path: &Path) -> Result<()> {
        let trailer_offset = self.offset0 - ENTRY_EOF_SIZE;
        let eof = read_trailer(file, path, trailer_offset, "stream 1")?;

        self.size1 = stream_size(&eof, path, "stream 1")?;
        self.offset1 = ENTRY_HEADER_SIZE + self.key_len;
        if self.offset1 + self.size1 > trailer_offset {
            exn::bail!(ErrorKind::structural(
                path,
                format!("stream 1 of {} bytes overlaps its trailer at {trailer_offset}", self.size1)
            ));
        }

        if self.size1 > 0 && eof.has_crc32() {
            let stream = read_at(file, path, self.offset1, self.size1, "stream 1")?;
            check_crc(path, "stream 1", eof.crc.get(), &stream)?;
        }
        tracing::trace!(offset = self.offset1, size = self.size1, "Located stream 1");
        Ok(())
    }
}

/// Open a cache file and report its size.
pub(crate) fn open(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path).map_err(|e| {
        let kind = ErrorKind::from_open(&e, path);
        raise(e, kind)
    })?;
    let size = file.metadata().or_raise(|| ErrorKind::Io(path.to_path_buf()))?.len();
    Ok((file, size))
}

/// Read and validate the header at the start of an entry or sparse file,
/// then the key that follows it. Returns the key length and the raw key.
pub(crate) fn read_key(file: &mut File, path: &Path, file_size: u64) -> Result<(u64, Vec<u8>)> {
    let (header, key_len) = read_header(file, path, file_size, ENTRY_VERSION)?;
    let mut key = vec![0u8; key_len as usize];
    file.read_exact(&mut key).map_err(|e| map_read_error(e, path, "key"))?;

    let actual = integrity_hash(&key);
    if actual != header.key_hash.get() {
        exn::bail!(ErrorKind::integrity(
            path,
            format!("key hash {:#010x}, computed {actual:#010x}", header.key_hash.get())
        ));
    }
    Ok((key_len, key))
}

/// Read and validate the header of an entry or sparse file, leaving the file
/// positioned at the key. `version` is the only version accepted.
pub(crate) fn read_header(file: &mut File, path: &Path, file_size: u64, version: u32) -> Result<(EntryHeader, u64)> {
    let header: EntryHeader = read_record(file, path)?;
    check_magic(path, "entry header", header.magic.get(), INITIAL_MAGIC)?;
    if header.version.get() != version {
        exn::bail!(ErrorKind::structural(path, format!("file version {}, expected {version}", header.version.get())));
    }
    let key_len = u64::try_from(header.key_len.get())
        .ok()
        .filter(|&len| ENTRY_HEADER_SIZE + len <= file_size)
        .ok_or_raise(|| {
            ErrorKind::structural(path, format!("key length {} in a {file_size} byte file", header.key_len.get()))
        })?;
    Ok((header, key_len))
}

fn read_trailer(file: &mut File, path: &Path, offset: u64, stream: &str) -> Result<EntryEof> {
    file.seek(SeekFrom::Start(offset)).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let eof: EntryEof = read_record(file, path)?;
    check_magic(path, &format!("{stream} trailer"), eof.magic.get(), FINAL_MAGIC)?;
    Ok(eof)
}

fn stream_size(eof: &EntryEof, path: &Path, stream: &str) -> Result<u64> {
    let size = eof.stream_size.get();
    u64::try_from(size).or_raise(|| ErrorKind::structural(path, format!("{stream} size {size}")))
}

/// Read exactly `len` bytes at `offset`.
pub(crate) fn read_at(file: &mut File, path: &Path, offset: u64, len: u64, what: &str) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset)).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let mut buffer = vec![0u8; len as usize];
    file.read_exact(&mut buffer).map_err(|e| map_read_error(e, path, what))?;
    Ok(buffer)
}

pub(crate) fn check_crc(path: &Path, what: &str, expected: u32, data: &[u8]) -> Result<()> {
    let actual = crc32fast::hash(data);
    if actual != expected {
        exn::bail!(ErrorKind::integrity(path, format!("{what} CRC32 {expected:#010x}, computed {actual:#010x}")));
    }
    Ok(())
}

fn map_read_error(err: IoError, path: &Path, what: &str) -> Error {
    let kind = match err.kind() {
        IoErrorKind::UnexpectedEof => ErrorKind::structural(path, format!("truncated {what}")),
        _ => ErrorKind::Io(path.to_path_buf()),
    };
    raise(err, kind)
}

/// Attach `err` as the child of a new frame carrying `kind`.
fn raise(err: IoError, kind: ErrorKind) -> Error {
    exn::Exn::from(err).raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{EntryFixture, SparseFixture, corrupt_byte, response_info};
    use rstest::rstest;

    const URL: &str = "https://golang.org/doc/gopher/pkg.png";

    fn write(fixture: &EntryFixture) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture.write(dir.path()).unwrap();
        (dir, path)
    }

    fn kind(result: Result<Entry>) -> ErrorKind {
        (*result.unwrap_err()).clone()
    }

    #[test]
    fn test_open_entry() {
        let fixture = EntryFixture::new(URL).with_body(vec![0x89; 5409]);
        let (dir, path) = write(&fixture);

        let entry = open_entry(0xbb9d1cda868d278c, dir.path()).unwrap();
        assert_eq!(entry.key(), URL);
        assert_eq!(entry.hash(), fixture.hash());
        assert_eq!(entry.path(), path);
        assert_eq!(entry.body_len(), 5409);
        assert_eq!(entry.metadata_len(), response_info("HTTP/1.1 200 OK", &[("Content-Length", "5409")]).len() as u64);
        assert_eq!(entry.file_size(), std::fs::metadata(&path).unwrap().len());
        assert_eq!(open_key(URL, dir.path()).unwrap(), entry);
    }

    #[test]
    fn test_header_and_body() {
        let fixture = EntryFixture::new(URL)
            .with_response(
                "HTTP/1.1 200 OK",
                &[("Content-Type", "image/png"), ("Content-Length", "4"), ("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")],
            )
            .with_stream1(*b"\x89PNG");
        let (dir, _) = write(&fixture);

        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        let headers = entry.header().unwrap();
        assert_eq!(headers.status(), Some(200));
        assert_eq!(headers.get("content-type"), Some("image/png"));
        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);

        let body = entry.body().unwrap();
        assert!(!body.is_sparse());
        assert_eq!(body.len(), 4);
        assert_eq!(body.into_bytes().unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_metadata_times() {
        let (dir, _) = write(&EntryFixture::new(URL));
        let info = open_key(URL, dir.path()).unwrap().metadata().unwrap();
        assert_eq!(info.response_time.unwrap().unix_timestamp(), 1_700_000_000);
        assert!(info.request_time < info.response_time);
    }

    #[rstest]
    #[case::all_guards(EntryFixture::new(URL).with_body("data"))]
    #[case::no_crc(EntryFixture::new(URL).with_body("data").without_crc())]
    #[case::no_sha(EntryFixture::new(URL).with_body("data").without_key_sha256())]
    #[case::no_guards(EntryFixture::new(URL).with_body("data").without_crc().without_key_sha256())]
    fn test_optional_guards(#[case] fixture: EntryFixture) {
        let (dir, _) = write(&fixture);
        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        assert_eq!(entry.body().unwrap().into_bytes().unwrap(), b"data");
        assert_eq!(entry.header().unwrap().content_length(), Some(4));
    }

    #[test]
    fn test_stream1_crc_mismatch() {
        let fixture = EntryFixture::new(URL).with_body("data");
        let (dir, path) = write(&fixture);
        corrupt_byte(&path, fixture.stream1_offset()).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Integrity { .. }));
    }

    #[test]
    fn test_stream0_crc_mismatch() {
        let fixture = EntryFixture::new(URL);
        let (dir, path) = write(&fixture);
        corrupt_byte(&path, fixture.stream0_offset() + 30).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Integrity { .. }));
    }

    #[test]
    fn test_corruption_ignored_without_crc() {
        let fixture = EntryFixture::new(URL).with_body("data").without_crc();
        let (dir, path) = write(&fixture);
        corrupt_byte(&path, fixture.stream1_offset()).unwrap();
        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        assert_ne!(entry.body().unwrap().into_bytes().unwrap(), b"data");
    }

    #[test]
    fn test_key_sha256_mismatch() {
        let fixture = EntryFixture::new(URL).without_crc();
        let (dir, path) = write(&fixture);
        let size = std::fs::metadata(&path).unwrap().len();
        // First byte of the digest, just before the stream 0 trailer.
        corrupt_byte(&path, size - ENTRY_EOF_SIZE - KEY_DIGEST_LEN).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Integrity { .. }));
    }

    #[test]
    fn test_mutated_key_fails() {
        let fixture = EntryFixture::new(URL);
        let (dir, path) = write(&fixture);
        corrupt_byte(&path, ENTRY_HEADER_SIZE + 3).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Integrity { .. }));
        assert!(read_entry_key(fixture.hash(), dir.path()).is_err());
    }

    #[rstest]
    #[case::magic(0)]
    #[case::version(8)]
    fn test_bad_entry_header(#[case] offset: u64) {
        let fixture = EntryFixture::new(URL);
        let (dir, path) = write(&fixture);
        corrupt_byte(&path, offset).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Structural { .. }));
    }

    #[test]
    fn test_key_not_utf8() {
        let fixture = EntryFixture::new("http://example.com/\u{e9}").without_key_sha256().with_body("data");
        let mut bytes = fixture.to_bytes();
        let key_end = ENTRY_HEADER_SIZE as usize + fixture.key().len();
        bytes[key_end - 2..key_end].copy_from_slice(b"\xff\xfe");
        let raw_key = bytes[ENTRY_HEADER_SIZE as usize..key_end].to_vec();
        bytes[16..20].copy_from_slice(&integrity_hash(&raw_key).to_le_bytes());
        let dir = tempfile::tempdir().unwrap();
        let hash = lookup_hash(&raw_key);
        std::fs::write(entry_path(dir.path(), hash), bytes).unwrap();

        let entry = open_entry(hash, dir.path()).unwrap();
        assert_eq!(entry.key_bytes(), raw_key);
        assert_eq!(entry.key(), "http://example.com/\u{fffd}\u{fffd}");
        assert_eq!(read_entry_key(hash, dir.path()).unwrap(), entry.key());
        assert_eq!(entry.body().unwrap().len(), 4);
    }

    #[test]
    fn test_bad_trailer_magic() {
        let fixture = EntryFixture::new(URL).with_body("data");
        let (dir, path) = write(&fixture);
        corrupt_byte(&path, fixture.stream0_offset() - ENTRY_EOF_SIZE).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Structural { .. }));
    }

    #[rstest]
    #[case::no_trailer(10)]
    #[case::header_only(20)]
    #[case::half_trailer(ENTRY_HEADER_SIZE as usize + URL.len() + 30)]
    fn test_truncated_entry(#[case] len: usize) {
        let fixture = EntryFixture::new(URL).with_body("data");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(entry_path(dir.path(), fixture.hash()), &fixture.to_bytes()[..len]).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Structural { .. }));
    }

    #[test]
    fn test_oversized_stream0() {
        let fixture = EntryFixture::new(URL).without_crc().without_key_sha256();
        let (dir, path) = write(&fixture);
        let mut bytes = std::fs::read(&path).unwrap();
        let size_at = bytes.len() - 4;
        bytes[size_at..].copy_from_slice(&i32::MAX.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(kind(open_entry(fixture.hash(), dir.path())), ErrorKind::Structural { .. }));
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        assert!(kind(open_entry(0x0123_4567_89ab_cdef, dir.path())).is_not_found());
        assert!(kind(open_key("https://never.example/", dir.path())).is_not_found());
    }

    #[test]
    fn test_entry_removed_after_open() {
        let fixture = EntryFixture::new(URL);
        let (dir, path) = write(&fixture);
        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        std::fs::remove_file(path).unwrap();
        assert!(entry.header().unwrap_err().is_not_found());
    }

    #[test]
    fn test_sparse_body() {
        let fixture = EntryFixture::new(URL).with_response("HTTP/1.1 200 OK", &[("Content-Length", "6")]);
        let (dir, _) = write(&fixture);
        SparseFixture::new(URL).with_range(3, b"def").with_range(0, b"abc").write(dir.path(), fixture.hash()).unwrap();

        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        assert!(!entry.has_inline_body());
        let body = entry.body().unwrap();
        assert!(body.is_sparse());
        assert_eq!(body.len(), 6);
        assert_eq!(body.into_bytes().unwrap(), b"abcdef");
    }

    #[test]
    fn test_sparse_body_missing() {
        let fixture = EntryFixture::new(URL);
        let (dir, _) = write(&fixture);
        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        assert!(entry.body().unwrap_err().is_not_found());
    }

    #[test]
    fn test_inline_body_truncated_after_open() {
        let fixture = EntryFixture::new(URL).with_body(vec![7u8; 64]).without_crc();
        let (dir, path) = write(&fixture);
        let entry = open_entry(fixture.hash(), dir.path()).unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(fixture.stream1_offset() + 10).unwrap();

        let err = entry.body().unwrap().into_bytes().unwrap_err();
        assert!(matches!(ErrorKind::from_io(&err), Some(ErrorKind::Structural { .. })));
    }
}
