//! On-disk naming of cache files.
//!
//! An entry with lookup hash `h` lives in `<dir>/<h as 16 lowercase hex>_0`,
//! and its sparse companion (if any) in `..._s`.

use std::path::{Path, PathBuf};

/// Name of the fake index inside the cache directory.
pub const FAKE_INDEX_NAME: &str = "index";
/// Directory holding the real index, relative to the cache directory.
pub const INDEX_DIR_NAME: &str = "index-dir";
/// Name of the real index inside [`INDEX_DIR_NAME`].
pub const REAL_INDEX_NAME: &str = "the-real-index";

const ENTRY_SUFFIX: &str = "_0";
const SPARSE_SUFFIX: &str = "_s";

#[must_use]
pub fn entry_file_name(hash: u64) -> String {
    format!("{hash:016x}{ENTRY_SUFFIX}")
}

#[must_use]
pub fn sparse_file_name(hash: u64) -> String {
    format!("{hash:016x}{SPARSE_SUFFIX}")
}

#[must_use]
pub fn entry_path(dir: &Path, hash: u64) -> PathBuf {
    dir.join(entry_file_name(hash))
}

#[must_use]
pub fn sparse_path(dir: &Path, hash: u64) -> PathBuf {
    dir.join(sparse_file_name(hash))
}

#[must_use]
pub fn fake_index_path(dir: &Path) -> PathBuf {
    dir.join(FAKE_INDEX_NAME)
}

#[must_use]
pub fn real_index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_DIR_NAME).join(REAL_INDEX_NAME)
}

/// Recover the lookup hash from an entry file name (`<16 hex>_0`).
///
/// Sparse files, index files and anything not matching the naming contract
/// exactly return `None`.
#[must_use]
pub fn parse_entry_file_name(name: &str) -> Option<u64> {
    let hex = name.strip_suffix(ENTRY_SUFFIX)?;
    if hex.len() != 16 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0000000000000000_0", "0000000000000000_s")]
    #[case(0xbb9d1cda868d278c, "bb9d1cda868d278c_0", "bb9d1cda868d278c_s")]
    #[case(u64::MAX, "ffffffffffffffff_0", "ffffffffffffffff_s")]
    fn test_file_names(#[case] hash: u64, #[case] entry: &str, #[case] sparse: &str) {
        assert_eq!(entry_file_name(hash), entry);
        assert_eq!(sparse_file_name(hash), sparse);
    }

    #[test]
    fn test_index_paths() {
        let dir = Path::new("/tmp/Cache_Data");
        assert_eq!(fake_index_path(dir), Path::new("/tmp/Cache_Data/index"));
        assert_eq!(real_index_path(dir), Path::new("/tmp/Cache_Data/index-dir/the-real-index"));
        assert_eq!(entry_path(dir, 1), Path::new("/tmp/Cache_Data/0000000000000001_0"));
    }

    #[rstest]
    #[case("bb9d1cda868d278c_0", Some(0xbb9d1cda868d278c))]
    #[case("0000000000000001_0", Some(1))]
    #[case("bb9d1cda868d278c_s", None)]
    #[case("BB9D1CDA868D278C_0", None)]
    #[case("bb9d1cda868d278_0", None)]
    #[case("+b9d1cda868d278c_0", None)]
    #[case("the-real-index", None)]
    #[case("index", None)]
    fn test_parse_entry_file_name(#[case] name: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_entry_file_name(name), expected);
    }
}
