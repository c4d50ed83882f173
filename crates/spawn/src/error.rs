//! Error types shared by the spawn engine.

use nix::unistd::ForkResult;
use std::{error, fmt, io};

/// Errors raised while configuring or spawning a child.
#[derive(Debug)]
pub enum Error {
    /// Io errors, e.g. allocating a pty or opening `/dev/null`.
    Io(io::Error),

    /// Errors to various functions that return `Errno`.
    Errno(Option<ForkResult>, &'static str, nix::errno::Errno),

    /// An error when trying to fork.
    Fork(nix::errno::Errno),

    /// Arguments or environment keys/values contained an embedded NUL byte.
    Null(std::ffi::NulError),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Io error: {e}"),
            Self::Errno(fork, context, errno) => {
                let source = match fork {
                    Some(ForkResult::Child) => "child",
                    Some(ForkResult::Parent { child: _ }) | None => "parent",
                };
                write!(f, "{source} failed to {context}: {errno}")
            }
            Self::Fork(errno) => write!(f, "Failed to fork: {errno}"),
            Self::Null(e) => write!(f, "Provided string contains null values: {e}"),
        }
    }
}
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Errno(_, _, errno) => Some(errno),
            Self::Fork(errno) => Some(errno),
            Self::Null(e) => Some(e),
        }
    }
}
impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
impl From<std::ffi::NulError> for Error {
    fn from(value: std::ffi::NulError) -> Self {
        Self::Null(value)
    }
}
