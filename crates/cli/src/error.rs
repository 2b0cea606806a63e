//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// What the command was doing when it failed.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("unable to load configuration")]
    Config,
    #[display("unable to open cache")]
    OpenCache,
    #[display("unable to open entry")]
    OpenEntry,
    #[display("unable to read entry")]
    ReadEntry,
    #[display("unable to write output")]
    Output,
}
