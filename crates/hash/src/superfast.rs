//! Paul Hsieh's SuperFastHash, as compiled into Chromium.
//!
//! Chromium hashes the entry key with its copy of the reference C code, where
//! the one to three tail bytes are read through `signed char`. Bytes at or
//! above `0x80` are therefore sign-extended before mixing; implementations
//! that treat them as unsigned agree on ASCII keys only.

/// Little-endian 16-bit read at `offset`.
#[inline]
fn get16(data: &[u8], offset: usize) -> u32 {
    u32::from(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

/// A tail byte as the C code sees it: `(signed char)` widened to `uint32_t`.
#[inline]
fn signed(byte: u8) -> u32 {
    i32::from(byte as i8) as u32
}

/// Compute the 32-bit key hash stored in entry headers.
///
/// # Examples
///
/// ```
/// assert_eq!(simplecache_hash::integrity_hash(b""), 0);
/// assert_eq!(simplecache_hash::integrity_hash(b"abcd"), 0xdad8b8db);
/// ```
#[must_use]
pub fn integrity_hash(data: impl AsRef<[u8]>) -> u32 {
    let data = data.as_ref();
    if data.is_empty() {
        return 0;
    }

    // The reference takes the length as an int; keys are far shorter.
    let mut hash = data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        hash = hash.wrapping_add(get16(chunk, 0));
        let tmp = (get16(chunk, 2) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let tail = chunks.remainder();
    match tail.len() {
        3 => {
            hash = hash.wrapping_add(get16(tail, 0));
            hash ^= hash << 16;
            hash ^= signed(tail[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        },
        2 => {
            hash = hash.wrapping_add(get16(tail, 0));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        },
        1 => {
            hash = hash.wrapping_add(signed(tail[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        },
        _ => {},
    }

    // Avalanche the final 127 bits.
    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

#[cfg(test)]
mod tests {
    use super::integrity_hash;
    use rstest::rstest;

    #[rstest]
    #[case(b"", 0x00000000)]
    #[case(b"a", 0x115ea782)]
    #[case(b"ab", 0x516b8b44)]
    #[case(b"abc", 0xd2be198a)]
    #[case(b"abcd", 0xdad8b8db)]
    #[case(b"hello world", 0xa68c6882)]
    #[case(b"http://example.com/", 0xa81c688e)]
    #[case(b"https://golang.org/doc/gopher/pkg.png", 0x6cc46ffd)]
    fn test_known_answers(#[case] key: &[u8], #[case] expected: u32) {
        assert_eq!(integrity_hash(key), expected);
    }

    #[rstest]
    // A lone 0xff sign-extends to -1 and cancels the length seed.
    #[case(b"\xff", 0x00000000)]
    #[case(b"ab\xff", 0xc25f0954)]
    fn test_high_tail_bytes_are_sign_extended(#[case] key: &[u8], #[case] expected: u32) {
        assert_eq!(integrity_hash(key), expected);
    }

    #[test]
    fn test_single_byte_change() {
        let key = b"https://example.com/index.html";
        let mut corrupted = *key;
        corrupted[8] ^= 0x01;
        assert_ne!(integrity_hash(key), integrity_hash(corrupted));
    }
}
