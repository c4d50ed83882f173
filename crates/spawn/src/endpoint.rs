//! Decide, for each of the child's three standard streams, what it is
//! wired to: a captured pipe, an inherited fd, a pseudo-tty, a directly
//! supplied fd, or a host-side pump target.

use crate::Error;
use nix::{
    fcntl::{OFlag, open},
    pty::{PtyMaster, grantpt, posix_openpt, unlockpt},
    sys::stat::Mode,
    unistd::{close, dup, pipe},
};
use std::{
    fs::File,
    os::fd::{AsFd, AsRawFd, OwnedFd},
    sync::LazyLock,
};

/// An `OwnedFd` pointing to `/dev/null`, duplicated for `Discard` mode.
static NULL: LazyLock<OwnedFd> = LazyLock::new(|| {
    File::open("/dev/null")
        .expect("Failed to open /dev/null")
        .into()
});

/// Create a duplicate fd pointing to `/dev/null`.
pub fn dup_null() -> Result<OwnedFd, Error> {
    dup(NULL.as_fd()).map_err(|e| Error::Errno(None, "dup", e))
}

/// Force `/dev/null`'s lazy first-open to happen now. Call this before
/// `fork`: if its first touch happened instead in the child, the
/// `LazyLock`'s internal allocation/locking could run post-fork, which
/// isn't async-signal-safe.
pub fn ensure_null_ready() {
    LazyLock::force(&NULL);
}

/// How to handle a child's stdout/stderr stream.
#[derive(Default)]
pub enum OutputMode {
    /// Capture the stream via a pipe, read by a [`crate::Stream`] on the
    /// host side. This is the default in-memory capture (§3 `out`/`err`).
    #[default]
    Pipe,

    /// Inherit the parent's fd.
    Share,

    /// Send output to the system logger at the given level.
    Log(log::Level),

    /// Discard the stream entirely.
    Discard,

    /// Send the stream to the supplied fd directly (no host-side pump).
    #[cfg(feature = "fd")]
    Fd(OwnedFd),

    /// Merge this stream into the other captured stream (`err_to_out`).
    Merged,

    /// Back this stream with the slave half of an allocated pseudo-tty.
    Pty,
}

/// How to handle a child's stdin stream.
#[derive(Default)]
pub enum InputMode {
    /// Inherit the parent's stdin fd. Default when no `in` option is given.
    #[default]
    Share,

    /// Feed the child from a host-side pipe, drained by an input pump.
    Pipe,

    /// Discard: wire stdin to `/dev/null`.
    Discard,

    /// Supply an fd directly.
    #[cfg(feature = "fd")]
    Fd(OwnedFd),

    /// Back stdin with the slave half of an allocated pseudo-tty.
    Pty,
}

/// A host-allocated pty pair. The slave becomes the child's endpoint(s);
/// the master is retained on the host side.
pub struct Pty {
    master: PtyMaster,
}
impl Pty {
    /// Allocate a new pty pair, unlocked and granted for use.
    pub fn open() -> Result<Self, Error> {
        let master = posix_openpt(OFlag::O_RDWR).map_err(|e| Error::Errno(None, "posix_openpt", e))?;
        grantpt(&master).map_err(|e| Error::Errno(None, "grantpt", e))?;
        unlockpt(&master).map_err(|e| Error::Errno(None, "unlockpt", e))?;
        Ok(Self { master })
    }

    /// Open a fresh fd onto the slave device. Each call returns a distinct
    /// fd, since the child needs independent fds for stdin/stdout/stderr.
    pub fn slave(&self) -> Result<OwnedFd, Error> {
        let name = nix::pty::ptsname_r(&self.master).map_err(|e| Error::Errno(None, "ptsname_r", e))?;
        let fd = open(name.as_str(), OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())
            .map_err(|e| Error::Errno(None, "open pty slave", e))?;
        Ok(fd)
    }

    /// Duplicate the master fd for host-side use (e.g. as a [`crate::Stream`]).
    pub fn master_fd(&self) -> Result<OwnedFd, Error> {
        dup(self.master.as_raw_fd())
            .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
            .map_err(|e| Error::Errno(None, "dup pty master", e))
    }
}

use std::os::fd::FromRawFd;

/// Conditionally create a pipe. Returns `None` for modes that don't need one.
pub fn cond_pipe_out(mode: &OutputMode) -> Result<Option<(OwnedFd, OwnedFd)>, Error> {
    match mode {
        OutputMode::Pipe | OutputMode::Log(_) => {
            pipe().map(Some).map_err(|e| Error::Errno(None, "pipe", e))
        }
        _ => Ok(None),
    }
}

/// Conditionally create a pipe for stdin.
pub fn cond_pipe_in(mode: &InputMode) -> Result<Option<(OwnedFd, OwnedFd)>, Error> {
    match mode {
        InputMode::Pipe => pipe().map(Some).map_err(|e| Error::Errno(None, "pipe", e)),
        _ => Ok(None),
    }
}

/// Close a fd, swallowing the (already-fatal-to-the-child) error.
pub fn close_quiet(fd: OwnedFd) {
    let _ = close(fd);
}
