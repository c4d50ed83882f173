//! `Options`: the typed surface for every Special Option in spec.md §3's
//! table. These are consumed by the library itself and never appear in
//! argv, unlike the keyword arguments handled by [`crate::marshal`].

use spawn::{CallbackKind, Sink, StdinSource};
use std::{collections::HashMap, path::PathBuf};

/// The set of exit codes considered successful for a call. Defaults to
/// `{0}`. Accepts either a single code or a set, matching spec.md's table
/// entry for `ok_code` exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkCodes(Vec<i32>);
impl Default for OkCodes {
    fn default() -> Self {
        Self(vec![0])
    }
}
impl OkCodes {
    /// Whether `code` is considered a success under this set.
    #[must_use]
    pub fn contains(&self, code: i32) -> bool {
        self.0.contains(&code)
    }
}
impl From<i32> for OkCodes {
    fn from(value: i32) -> Self {
        Self(vec![value])
    }
}
impl From<&[i32]> for OkCodes {
    fn from(value: &[i32]) -> Self {
        Self(value.to_vec())
    }
}
impl<const N: usize> From<[i32; N]> for OkCodes {
    fn from(value: [i32; N]) -> Self {
        Self(value.to_vec())
    }
}

/// How a call's stdin is sourced, mirroring spec.md's `in`/`piped` entries.
#[derive(Default)]
pub enum InputSpec {
    /// Inherit the caller's stdin (default).
    #[default]
    Inherit,
    /// Discard: wire stdin to `/dev/null`.
    Discard,
    /// Feed the given bytes, then close.
    Bytes(Vec<u8>),
    /// Drain the given iterator of chunks, then close.
    Iter(Box<dyn Iterator<Item = Vec<u8>> + Send>),
    /// Drain a queue until a `None` sentinel arrives.
    Queue(std::sync::mpsc::Receiver<Option<Vec<u8>>>),
    /// Read from an arbitrary `Read` until EOF.
    Reader(Box<dyn std::io::Read + Send>),
    /// Allocate a pseudo-tty and back stdin with its slave end.
    Pty,
}
impl InputSpec {
    pub(crate) fn into_source(self) -> Option<StdinSource> {
        match self {
            Self::Inherit | Self::Discard | Self::Pty => None,
            Self::Bytes(b) => Some(StdinSource::Bytes(b)),
            Self::Iter(i) => Some(StdinSource::Iter(i)),
            Self::Queue(q) => Some(StdinSource::Queue(q)),
            Self::Reader(r) => Some(StdinSource::Reader(r)),
        }
    }
}

/// How a call's stdout/stderr is additionally delivered, layered on top
/// of the capture buffer that is always maintained (see SPEC_FULL.md §9).
#[derive(Default)]
pub enum OutputSpec {
    /// Only the default capture buffer; nothing else (default).
    #[default]
    Capture,
    /// Also write bytes verbatim to this sink.
    Writer(Box<dyn std::io::Write + Send>),
    /// Also invoke this callback; see [`spawn::CallbackKind`] for the
    /// three supported arities.
    Callback(CallbackKind),
    /// Discard entirely: no capture, no pipe at all.
    Discard,
    /// Send to the system logger at the given level instead of capturing.
    Log(log::Level),
    /// Allocate a pseudo-tty and back this stream with its slave end.
    Pty,
}
impl OutputSpec {
    pub(crate) fn into_sink(self) -> Option<Sink> {
        match self {
            Self::Capture | Self::Discard | Self::Log(_) | Self::Pty => None,
            Self::Writer(w) => Some(Sink::Writer(w)),
            Self::Callback(c) => Some(Sink::Callback(c)),
        }
    }
}

/// The complete set of per-call options, one field per Special Option in
/// spec.md §3's table.
#[derive(Default)]
pub struct Options {
    /// `_in` / `in`.
    pub r#in: InputSpec,
    /// `_out` / `out`.
    pub out: OutputSpec,
    /// `_err` / `err`.
    pub err: OutputSpec,
    /// `_err_to_out` — merge stderr into stdout's stream.
    pub err_to_out: bool,
    /// `_piped` — defer draining stdout so it can feed a downstream call.
    pub piped: bool,
    /// `_bg` — don't block the caller; `Handle` is returned still running.
    pub bg: bool,
    /// `_iter`/`_iter_noblock` — consume stdout as a line iterator instead
    /// of (or in addition to) reading the full capture.
    pub iter: bool,
    /// Non-blocking variant of `iter`.
    pub iter_noblock: bool,
    /// `_tty_in` — shorthand for `in = InputSpec::Pty`.
    pub tty_in: bool,
    /// `_tty_out` — shorthand for `out = OutputSpec::Pty`.
    pub tty_out: bool,
    /// `_cwd`.
    pub cwd: Option<PathBuf>,
    /// `_env` — when set, replaces the environment wholesale (spec.md
    /// invariant: "env replacement is total, not an overlay").
    pub env: Option<HashMap<String, String>>,
    /// `_ok_code`.
    pub ok_code: OkCodes,
    /// `_out_bufsize`.
    pub out_bufsize: usize,
    /// `_err_bufsize`.
    pub err_bufsize: usize,
    /// `_internal_bufsize`.
    pub internal_bufsize: Option<usize>,
    /// `_with` — push this call onto the thread-local context stack
    /// instead of running it (spec.md §4.5's `with` scoping).
    pub with: bool,
}
impl Options {
    /// Validate mutually-exclusive combinations per spec.md §3.
    ///
    /// # Errors
    /// Returns [`crate::Error::IncompatibleSpecialArgs`] naming the
    /// conflicting pair.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.iter && self.piped {
            return Err(crate::Error::IncompatibleSpecialArgs("iter and piped"));
        }
        if self.iter && self.bg {
            return Err(crate::Error::IncompatibleSpecialArgs("iter and bg"));
        }
        if self.err_to_out && matches!(self.err, OutputSpec::Writer(_) | OutputSpec::Callback(_)) {
            return Err(crate::Error::IncompatibleSpecialArgs("err_to_out and err"));
        }
        if self.tty_out && matches!(self.out, OutputSpec::Writer(_) | OutputSpec::Callback(_)) {
            return Err(crate::Error::IncompatibleSpecialArgs("tty_out and out"));
        }
        Ok(())
    }

    /// Merge `other` over `self`: any field `other` set explicitly wins.
    /// Used when a baked `Template`'s default options combine with
    /// call-site overrides.
    #[must_use]
    pub fn merge(mut self, other: Options) -> Self {
        if !matches!(other.r#in, InputSpec::Inherit) {
            self.r#in = other.r#in;
        }
        if !matches!(other.out, OutputSpec::Capture) {
            self.out = other.out;
        }
        if !matches!(other.err, OutputSpec::Capture) {
            self.err = other.err;
        }
        self.err_to_out |= other.err_to_out;
        self.piped |= other.piped;
        self.bg |= other.bg;
        self.iter |= other.iter;
        self.iter_noblock |= other.iter_noblock;
        self.tty_in |= other.tty_in;
        self.tty_out |= other.tty_out;
        if other.cwd.is_some() {
            self.cwd = other.cwd;
        }
        if other.env.is_some() {
            self.env = other.env;
        }
        if other.out_bufsize != 0 {
            self.out_bufsize = other.out_bufsize;
        }
        if other.err_bufsize != 0 {
            self.err_bufsize = other.err_bufsize;
        }
        if other.internal_bufsize.is_some() {
            self.internal_bufsize = other.internal_bufsize;
        }
        self.ok_code = other.ok_code;
        self.with |= other.with;
        self
    }
}
