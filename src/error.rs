//! Errors raised by the public API.

use thiserror::Error;

/// Errors building or running an [`crate::Template`] invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// The named executable could not be resolved on `PATH`.
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// Two special options were set that cannot be combined, e.g. `iter`
    /// together with `piped`, or `out` together with `err_to_out`.
    #[error("incompatible special arguments: {0}")]
    IncompatibleSpecialArgs(&'static str),

    /// The child exited with a code not in the invocation's `ok_code` set.
    #[error("command exited with unexpected status {code}: {stderr}")]
    NonZeroExit {
        /// The raw exit code, or negative signal number if signalled.
        code: i32,
        /// Captured stderr, for diagnostics.
        stderr: String,
    },

    /// Resolving the executable's absolute path failed.
    #[error(transparent)]
    Which(#[from] which::Error),

    /// The spawn engine failed to configure or launch the child.
    #[error(transparent)]
    Spawn(#[from] spawn::Error),

    /// A pump thread failed.
    #[error(transparent)]
    Pump(#[from] spawn::PumpError),
}
impl Error {
    /// The typed exit code this error carries, if it's a [`Error::NonZeroExit`].
    /// Negative (signalled) codes fall back to [`spawn::ErrorReturnCode::Generic`].
    #[must_use]
    pub fn exit_code_kind(&self) -> Option<spawn::ErrorReturnCode> {
        match self {
            Self::NonZeroExit { code, .. } => Some((*code).into()),
            _ => None,
        }
    }
}
