//! The Command Handle: a capability-polymorphic result object. Its
//! default behavior (`Display`, `PartialEq<str>`) acts like captured
//! stdout text; its methods expose exit status, stderr, and iteration
//! over stdout lines (spec.md §4.5).

use crate::{context, error::Error, options::OkCodes};
use spawn::{ExitStatus, StreamReader};
use std::{cell::RefCell, fmt};

/// What a `Handle` actually owns: a spawned process, or nothing but an
/// ambient-context scope (`with`, see [`Handle::context_guard`]).
enum Inner {
    /// A real spawned child.
    Process(RefCell<spawn::Handle>),
    /// A `with`-scope guard: no process was spawned for this call: it
    /// only holds the argv prefix it pushed onto the context stack, and
    /// pops it again when dropped.
    Context,
}

/// The result of one invocation.
///
/// Constructed by [`crate::Template::call`]; never constructed directly
/// by callers.
pub struct Handle {
    inner: Inner,
    argv: Vec<String>,
    ok_code: OkCodes,
    /// Captured once, lazily, so repeated `Display`/`PartialEq` calls
    /// don't re-drain an already-exhausted pipe.
    stdout_cache: std::cell::OnceCell<String>,
}

impl Handle {
    pub(crate) fn new(inner: spawn::Handle, argv: Vec<String>, ok_code: OkCodes) -> Self {
        Self {
            inner: Inner::Process(RefCell::new(inner)),
            argv,
            ok_code,
            stdout_cache: std::cell::OnceCell::new(),
        }
    }

    /// Build a guard `Handle` for a `with`-invoked template: nothing was
    /// spawned, `argv` reflects the prefix that's now active, and the
    /// context it pushed is popped when this value drops.
    pub(crate) fn context_guard(argv: Vec<String>) -> Self {
        Self {
            inner: Inner::Context,
            argv,
            ok_code: OkCodes::default(),
            stdout_cache: std::cell::OnceCell::new(),
        }
    }

    /// The literal argv this invocation ran, unquoted (spec.md §4.5
    /// "argv reflection"). For a `with`-scope guard, the argv that is now
    /// the ambient prefix rather than one that was actually spawned.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The child's pid, if still running.
    #[must_use]
    pub fn pid(&self) -> Option<nix::unistd::Pid> {
        match &self.inner {
            Inner::Process(p) => p.borrow().pid(),
            Inner::Context => None,
        }
    }

    /// Whether the child is still running.
    #[must_use]
    pub fn alive(&self) -> bool {
        match &self.inner {
            Inner::Process(p) => p.borrow().alive(),
            Inner::Context => false,
        }
    }

    /// Block until the child exits, returning its status.
    ///
    /// # Errors
    /// Returns [`Error::NonZeroExit`] if the exit code isn't in this
    /// invocation's `ok_code` set, or a [`Error::Spawn`] if `waitpid`
    /// itself fails.
    pub fn wait(&mut self) -> Result<ExitStatus, Error> {
        let Inner::Process(inner) = &mut self.inner else {
            return Ok(ExitStatus::Code(0));
        };
        let status = inner.get_mut().wait()?;
        let code = status.as_code();
        if self.ok_code.contains(code) {
            Ok(status)
        } else {
            let stderr = inner.get_mut().stderr().unwrap_or_default();
            Err(Error::NonZeroExit { code, stderr })
        }
    }

    /// The raw exit code/signal without checking it against `ok_code`.
    ///
    /// # Errors
    /// Returns an error if `waitpid` fails.
    pub fn exit_status(&mut self) -> Result<ExitStatus, spawn::Error> {
        match &mut self.inner {
            Inner::Process(p) => p.get_mut().wait(),
            Inner::Context => Ok(ExitStatus::Code(0)),
        }
    }

    /// Send `SIGTERM`.
    ///
    /// # Errors
    /// Returns an error if the signal can't be delivered.
    pub fn terminate(&self) -> Result<(), spawn::Error> {
        match &self.inner {
            Inner::Process(p) => p.borrow().terminate(),
            Inner::Context => Ok(()),
        }
    }

    /// Send `SIGKILL`.
    ///
    /// # Errors
    /// Returns an error if the signal can't be delivered.
    pub fn kill(&self) -> Result<(), spawn::Error> {
        match &self.inner {
            Inner::Process(p) => p.borrow().kill(),
            Inner::Context => Ok(()),
        }
    }

    /// Send an arbitrary signal.
    ///
    /// # Errors
    /// Returns an error if the signal can't be delivered.
    pub fn signal(&self, sig: nix::sys::signal::Signal) -> Result<(), spawn::Error> {
        match &self.inner {
            Inner::Process(p) => p.borrow().signal(sig),
            Inner::Context => Ok(()),
        }
    }

    /// Close the child's stdin, signalling EOF.
    pub fn close_stdin(&self) {
        if let Inner::Process(p) = &self.inner {
            p.borrow().close_stdin();
        }
    }

    /// The full captured stdout text (lossily decoded), caching the
    /// result after the first call.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stdout(&self) -> Result<&str, spawn::PumpError> {
        if let Some(cached) = self.stdout_cache.get() {
            return Ok(cached.as_str());
        }
        let text = match &self.inner {
            Inner::Process(p) => p.borrow_mut().stdout()?,
            Inner::Context => String::new(),
        };
        Ok(self.stdout_cache.get_or_init(|| text))
    }

    /// Raw captured stdout bytes, lossless.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stdout_bytes(&mut self) -> Result<Vec<u8>, spawn::PumpError> {
        match &mut self.inner {
            Inner::Process(p) => p.get_mut().stdout_bytes(),
            Inner::Context => Ok(Vec::new()),
        }
    }

    /// The full captured stderr text (lossily decoded).
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stderr(&mut self) -> Result<String, spawn::PumpError> {
        match &mut self.inner {
            Inner::Process(p) => p.get_mut().stderr(),
            Inner::Context => Ok(String::new()),
        }
    }

    /// Raw captured stderr bytes, lossless.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stderr_bytes(&mut self) -> Result<Vec<u8>, spawn::PumpError> {
        match &mut self.inner {
            Inner::Process(p) => p.get_mut().stderr_bytes(),
            Inner::Context => Ok(Vec::new()),
        }
    }

    /// Whether this handle has already been waited on (so `pid`/`alive`
    /// no longer reflect a live child). Always `true` for a `with`-scope
    /// guard, since nothing was ever spawned for it.
    #[must_use]
    pub fn has_waited(&self) -> bool {
        match &self.inner {
            Inner::Process(p) => !p.borrow().alive() && p.borrow().pid().is_none(),
            Inner::Context => true,
        }
    }

    /// Lines of stdout, blocking for each one (`_iter`).
    #[must_use]
    pub fn iter(&self) -> Lines<'_> {
        Lines { handle: self, blocking: true }
    }

    /// Lines of stdout, never blocking (`_iter_noblock`).
    #[must_use]
    pub fn iter_noblock(&self) -> Lines<'_> {
        Lines { handle: self, blocking: false }
    }

    /// A streaming view onto this invocation's captured stdout, used to
    /// relay it concurrently into a downstream call's stdin (spec.md §5
    /// pipelining) instead of waiting for the whole capture. `None` for a
    /// `with`-scope guard or a call with no captured stdout.
    pub(crate) fn stdout_reader(&self) -> Option<StreamReader> {
        match &self.inner {
            Inner::Process(p) => p.borrow().stdout_reader(),
            Inner::Context => None,
        }
    }

    /// Borrow the engine handle, for line iteration. `None` for a
    /// `with`-scope guard, which has nothing to iterate.
    fn inner(&self) -> Option<std::cell::Ref<'_, spawn::Handle>> {
        match &self.inner {
            Inner::Process(p) => Some(p.borrow()),
            Inner::Context => None,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stdout() {
            Ok(text) => write!(f, "{text}"),
            Err(_) => write!(f, ""),
        }
    }
}
impl PartialEq<str> for Handle {
    fn eq(&self, other: &str) -> bool {
        self.stdout().is_ok_and(|text| text == other)
    }
}
impl PartialEq<&str> for Handle {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}
impl Drop for Handle {
    fn drop(&mut self) {
        if matches!(self.inner, Inner::Context) {
            context::pop();
        }
    }
}

/// Iterates captured stdout line by line (`_iter`/`_iter_noblock`).
pub struct Lines<'a> {
    handle: &'a Handle,
    blocking: bool,
}
impl Iterator for Lines<'_> {
    type Item = String;
    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.handle.inner()?;
        if self.blocking {
            inner.next_stdout_line()
        } else {
            inner.try_next_stdout_line().flatten()
        }
    }
}
