//! Read-only decoder for the Chromium "simple cache" on-disk format.
//!
//! A simple cache directory holds one file per entry, named after the
//! [lookup hash](lookup_hash) of the entry's key (usually a URL), plus two
//! index files. This crate provides:
//!
//! - **Enumeration** of every cached url ([`open_cache`], [`Cache::urls`])
//! - **Lookup** by url or hash ([`Cache::open_url`], [`open_entry`])
//! - **Response metadata**: status, headers and timestamps ([`Entry::header`],
//!   [`Entry::metadata`])
//! - **Bodies** as a [`std::io::Read`] stream, whether stored inline or as
//!   out-of-order ranges in a sparse file ([`Entry::body`])
//!
//! Every magic number, version and stored checksum is verified. Nothing is
//! ever written to the cache directory, and no file handle outlives the call
//! (or the [`Body`]) that opened it.
//!
//! ```no_run
//! use std::io::Read;
//!
//! let cache = simplecache::open_cache("/home/me/.cache/chromium/Default/Cache/Cache_Data")?;
//! for url in cache.urls() {
//!     let entry = cache.open_url(url)?;
//!     let mut body = Vec::new();
//!     entry.body()?.read_to_end(&mut body)?;
//!     println!("{url}: {:?} ({} bytes)", entry.header()?.status(), body.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod body;
mod entry;
pub mod error;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
mod headers;
mod index;
pub mod layout;
pub mod paths;
mod sparse;

pub use crate::body::{Body, InlineBody};
pub use crate::entry::{Entry, open_entry, open_key};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::headers::{Headers, ResponseInfo, STATUS, windows_time};
pub use crate::index::{Cache, open_cache};
pub use crate::sparse::{SparseRange, SparseReader};
pub use simplecache_hash::lookup_hash;
