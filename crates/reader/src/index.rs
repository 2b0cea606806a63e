//! Cache directory and index decoding.
//!
//! A cache directory holds two index files. The top-level `index` is a
//! small marker checked only for its magic and version. The real index in
//! `index-dir/the-real-index` lists the lookup hash of every entry; the
//! keys themselves are only stored in the entry files.

use crate::entry::{Entry, open, open_entry, read_entry_key};
use crate::error::{ErrorKind, Result};
use crate::layout::{
    FakeIndex, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, INDEX_MAGIC, INDEX_WRITE_REASON_SIZE, INITIAL_MAGIC, IndexEntry,
    IndexHeader, MIN_INDEX_VERSION, check_magic, read_record,
};
use crate::paths::{fake_index_path, real_index_path};
use exn::ResultExt;
use simplecache_hash::lookup_hash;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::instrument;

/// An opened cache directory.
///
/// Holds the hash list read from the real index and, once first asked for,
/// the urls those hashes resolve to. No file handles are kept open.
#[derive(Debug)]
pub struct Cache {
    dir: PathBuf,
    version: u32,
    hashes: Vec<u64>,
    entries: OnceLock<Vec<(u64, String)>>,
}

/// Open the cache in `dir`. See [`Cache::open`].
pub fn open_cache(dir: impl AsRef<Path>) -> Result<Cache> {
    Cache::open(dir)
}

impl Cache {
    /// Validate both index files in `dir` and read the hash list.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) if `dir` is missing or is
    /// not a directory, or if either index file is missing.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display(), version, entry_count))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let metadata = std::fs::metadata(dir).map_err(|e| {
            let kind = ErrorKind::from_open(&e, dir);
            exn::Exn::from(e).raise(kind)
        })?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::NotFound(dir.to_path_buf()));
        }

        read_fake_index(&fake_index_path(dir))?;
        let (version, hashes) = read_real_index(&real_index_path(dir))?;

        let span = tracing::Span::current();
        span.record("version", version);
        span.record("entry_count", hashes.len());
        tracing::debug!("Opened cache");
        Ok(Self { dir: dir.to_path_buf(), version, hashes, entries: OnceLock::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Version of the real index.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Every hash listed in the real index, in index order.
    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    /// The `(hash, url)` pairs that resolved.
    ///
    /// Computed on first call by reading the header and key of each entry
    /// file; entries that fail to decode are logged and left out. Later calls,
    /// from any thread, return the same list.
    pub fn entries(&self) -> &[(u64, String)] {
        self.entries.get_or_init(|| resolve_keys(&self.dir, &self.hashes))
    }

    /// Urls of every entry that resolved, in index order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries().iter().map(|(_, url)| url.as_str())
    }

    /// Fully decode the entry for `url`.
    ///
    /// A url that was never cached is [`NotFound`](ErrorKind::NotFound).
    pub fn open_url(&self, url: &str) -> Result<Entry> {
        open_entry(lookup_hash(url), &self.dir)
    }

    /// Fully decode the entry with lookup hash `hash`.
    pub fn open_hash(&self, hash: u64) -> Result<Entry> {
        open_entry(hash, &self.dir)
    }
}

#[instrument(skip_all, fields(count = hashes.len()))]
fn resolve_keys(dir: &Path, hashes: &[u64]) -> Vec<(u64, String)> {
    let mut resolved = Vec::with_capacity(hashes.len());
    for &hash in hashes {
        match read_entry_key(hash, dir) {
            Ok(key) => resolved.push((hash, key)),
            Err(err) if err.is_not_found() => {
                tracing::warn!(hash = %format!("{hash:016x}"), error = ?err, "Skipping entry with no file");
            },
            Err(err) => {
                tracing::warn!(hash = %format!("{hash:016x}"), error = ?err, "Skipping unreadable entry");
            },
        }
    }
    tracing::debug!(resolved = resolved.len(), "Resolved entry keys");
    resolved
}

fn read_fake_index(path: &Path) -> Result<()> {
    let (mut file, _) = open(path)?;
    let index: FakeIndex = read_record(&mut file, path)?;
    check_magic(path, "fake index", index.magic.get(), INITIAL_MAGIC)?;
    check_version(path, "fake index", index.version.get())
}

/// Read the real index, returning its version and hash list.
fn read_real_index(path: &Path) -> Result<(u32, Vec<u64>)> {
    let (file, file_size) = open(path)?;
    let mut reader = BufReader::new(file);
    let header: IndexHeader = read_record(&mut reader, path)?;
    check_magic(path, "index", header.magic.get(), INDEX_MAGIC)?;
    let version = header.version.get();
    check_version(path, "index", version)?;

    let mut consumed = INDEX_HEADER_SIZE;
    if version > MIN_INDEX_VERSION {
        let mut reason = [0u8; INDEX_WRITE_REASON_SIZE as usize];
        reader.read_exact(&mut reason).or_raise(|| ErrorKind::structural(path, "truncated write reason"))?;
        consumed += INDEX_WRITE_REASON_SIZE;
    }

    // Records can't be resynchronized, so the whole count must fit.
    let entry_count = header.entry_count.get();
    let available = file_size.saturating_sub(consumed) / INDEX_ENTRY_SIZE;
    if entry_count > available {
        exn::bail!(ErrorKind::structural(
            path,
            format!("{entry_count} entries declared, room for {available}")
        ));
    }

    let mut hashes = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let entry: IndexEntry = read_record(&mut reader, path)?;
        hashes.push(entry.hash.get());
    }
    Ok((version, hashes))
}

fn check_version(path: &Path, what: &str, version: u32) -> Result<()> {
    if version < MIN_INDEX_VERSION {
        exn::bail!(ErrorKind::structural(
            path,
            format!("{what} version {version}, expected at least {MIN_INDEX_VERSION}")
        ));
    }
    Ok(())
}
