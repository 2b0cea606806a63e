//! HTTP response metadata stored in stream 0.
//!
//! Stream 0 starts with a small fixed header ([`MetadataHeader`]) followed by
//! the raw response header block: the status line and each header line,
//! NUL-separated.

use crate::error::{ErrorKind, Result};
use crate::layout::{Record, read_record};
use exn::OptionExt;
use std::path::Path;
use time::OffsetDateTime;
use zerocopy::byteorder::little_endian::{I32, I64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Name of the synthetic field holding the status code of the status line.
pub const STATUS: &str = "Status";

/// Microseconds between 1601-01-01 (Windows epoch) and 1970-01-01.
pub(crate) const WINDOWS_EPOCH_DELTA_MICROS: i64 = 11_644_473_600_000_000;

/// Fixed prefix of stream 0.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct MetadataHeader {
    pub info_size: I32,
    pub flags: I32,
    /// Windows-epoch microseconds.
    pub request_time: I64,
    /// Windows-epoch microseconds.
    pub response_time: I64,
    pub header_size: I32,
}

impl Record for MetadataHeader {
    const NAME: &'static str = "response info";
}

const _: () = assert!(MetadataHeader::SIZE == 28);

/// An ordered, case-insensitive, multi-valued header map.
///
/// Values keep insertion order, both overall and per name, so repeated
/// headers such as `Set-Cookie` come back in the order the server sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.fields.iter().filter(move |(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The response status code, from the synthetic [`STATUS`] field.
    pub fn status(&self) -> Option<u16> {
        self.get(STATUS)?.parse().ok()
    }

    /// The `Content-Length` header, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length")?.parse().ok()
    }

    /// Parse a NUL-separated header block.
    ///
    /// Each line is split on its first colon and both sides trimmed. A first
    /// line without a colon is the status line (`HTTP/1.1 200 OK`); its code
    /// becomes the [`STATUS`] field. Any other line without a colon, and any
    /// line with an empty name, is ignored.
    #[must_use]
    pub fn parse(block: &[u8]) -> Self {
        let mut headers = Self::new();
        for (index, line) in block.split(|&b| b == 0).enumerate() {
            let line = String::from_utf8_lossy(line);
            match line.split_once(':') {
                Some((name, value)) => {
                    let name = name.trim();
                    if !name.is_empty() {
                        headers.add(name, value.trim());
                    }
                },
                None if index == 0 => {
                    if let Some(code) = line.split_whitespace().nth(1) {
                        headers.add(STATUS, code);
                    }
                },
                None => {},
            }
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Decoded stream 0 of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub flags: i32,
    /// When the request was sent, if the stored timestamp is representable.
    pub request_time: Option<OffsetDateTime>,
    /// When the response arrived, if the stored timestamp is representable.
    pub response_time: Option<OffsetDateTime>,
    pub headers: Headers,
}

impl ResponseInfo {
    /// Decode the bytes of stream 0; `file` is used in error messages.
    pub fn decode(mut stream: &[u8], file: &Path) -> Result<Self> {
        let info: MetadataHeader = read_record(&mut stream, file)?;
        let header_size = usize::try_from(info.header_size.get())
            .ok()
            .filter(|&size| size <= stream.len())
            .ok_or_raise(|| {
                ErrorKind::structural(
                    file,
                    format!(
                        "header block of {} bytes, {} available",
                        info.header_size.get(),
                        stream.len()
                    ),
                )
            })?;
        Ok(Self {
            flags: info.flags.get(),
            request_time: windows_time(info.request_time.get()),
            response_time: windows_time(info.response_time.get()),
            headers: Headers::parse(&stream[..header_size]),
        })
    }
}

/// Convert Windows-epoch microseconds to a timestamp.
pub fn windows_time(micros: i64) -> Option<OffsetDateTime> {
    let unix_micros = micros.checked_sub(WINDOWS_EPOCH_DELTA_MICROS)?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(unix_micros) * 1_000).ok()
}
