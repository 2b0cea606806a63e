//! Output of each subcommand.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use simplecache::{Cache, Entry};
use std::io::{self, Write};

/// One `{hash}\t{url}` line per resolved entry.
pub fn list(cache: &Cache, out: &mut impl Write) -> Result<()> {
    for (hash, url) in cache.entries() {
        writeln!(out, "{hash:016x}\t{url}").or_raise(|| ErrorKind::Output)?;
    }
    Ok(())
}

/// One `Name: value` line per header, in stored order.
pub fn header(entry: &Entry, out: &mut impl Write) -> Result<()> {
    let headers = entry.header().or_raise(|| ErrorKind::ReadEntry)?;
    for (name, value) in &headers {
        writeln!(out, "{name}: {value}").or_raise(|| ErrorKind::Output)?;
    }
    Ok(())
}

/// Copy the body verbatim.
pub fn body(entry: &Entry, out: &mut impl Write) -> Result<()> {
    let mut body = entry.body().or_raise(|| ErrorKind::ReadEntry)?;
    match io::copy(&mut body, out) {
        Ok(written) => {
            tracing::debug!(written, sparse = body.is_sparse(), "Copied body");
            Ok(())
        },
        Err(err) if simplecache::ErrorKind::from_io(&err).is_some() => Err(err).or_raise(|| ErrorKind::ReadEntry),
        Err(err) => Err(err).or_raise(|| ErrorKind::Output),
    }
}
