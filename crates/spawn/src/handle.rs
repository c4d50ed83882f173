//! The Process Controller: spawns a child via fork/exec, wires its three
//! standard streams per the configured [`crate::OutputMode`]/[`crate::InputMode`],
//! and returns a [`Handle`] for waiting, signalling, and reading output.

use crate::{
    Error,
    endpoint::{self, InputMode, OutputMode, Pty},
    pump::{self, InputPump, ProcessControl, Sink, StdinSource, Stream, StreamReader},
};
use log::{debug, trace};
use nix::{
    sys::{
        signal::{self, Signal},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, chdir, dup2_stderr, dup2_stdin, dup2_stdout, execve, fork},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    ffi::CString,
    fs::File,
    io::Write,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    path::PathBuf,
    sync::Arc,
};

/// Everything the controller needs to spawn one child. Built by the
/// caller (the `subshell` crate's argument marshaller and options layer)
/// and consumed by [`spawn`].
pub struct Spec {
    /// The resolved executable path.
    pub program: PathBuf,
    /// `argv[1..]`, already fully expanded (no shell quoting is performed).
    pub args: Vec<CString>,
    /// Extra environment variables to set. When `clear_env` is true these
    /// become the entire environment instead of an overlay.
    pub env: Vec<(String, String)>,
    /// Replace the environment wholesale instead of overlaying `env`.
    pub clear_env: bool,
    /// Working directory for the child, if not the parent's.
    pub cwd: Option<PathBuf>,
    /// Disposition for the child's stdout.
    pub out: OutputMode,
    /// Disposition for the child's stderr.
    pub err: OutputMode,
    /// Disposition for the child's stdin.
    pub r#in: InputMode,
    /// Line/chunk size governing callback delivery for stdout.
    pub out_bufsize: pump::Bufsize,
    /// Line/chunk size governing callback delivery for stderr.
    pub err_bufsize: pump::Bufsize,
    /// Cap on retained stdout capture, see [`Stream::new`].
    pub out_internal_bufsize: Option<usize>,
    /// Cap on retained stderr capture, see [`Stream::new`].
    pub err_internal_bufsize: Option<usize>,
    /// Additional delivery target for stdout, layered on the default capture.
    pub out_sink: Option<Sink>,
    /// Additional delivery target for stderr, layered on the default capture.
    pub err_sink: Option<Sink>,
    /// Source to drain into the child's stdin, if `in` is `Pipe`.
    pub stdin_source: Option<StdinSource>,
}

/// A running or exited child process plus its attached pumps.
pub struct Handle {
    pid: Arc<Mutex<Option<Pid>>>,
    stdout: Option<Stream>,
    stderr: Option<Stream>,
    stdin: Arc<Mutex<Option<File>>>,
    input_pump: Option<InputPump>,
    /// The pty master, kept alive for the duration of the child's life if
    /// either stream was backed by a pseudo-tty.
    _pty: Option<Pty>,
    exit_status: Option<ExitStatus>,
    /// Other handles this one should signal when it is dropped (pipeline
    /// upstream/downstream association, §4.4).
    associates: Vec<Arc<Mutex<Option<Pid>>>>,
}

/// How a child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with the given code.
    Code(i32),
    /// Killed by the given signal.
    Signalled(Signal),
}
impl ExitStatus {
    /// The code as the reference implementation represents it: the raw
    /// exit code, or the negative signal number if signalled.
    #[must_use]
    pub fn as_code(self) -> i32 {
        match self {
            Self::Code(c) => c,
            Self::Signalled(s) => -(s as i32),
        }
    }
}

/// Everything pre-built in the parent, before `fork`, so the child never
/// allocates: the resolved program/argv/envp as `CString`s, and any
/// pre-opened pty slave fds it needs to dup onto its streams.
struct ChildPlan {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<CString>,
    in_pty_slave: Option<OwnedFd>,
    out_pty_slave: Option<OwnedFd>,
    err_pty_slave: Option<OwnedFd>,
}

/// Build the child's environment as `KEY=VALUE` `CString`s: an overlay
/// on the parent's environment, or a full replacement if `clear_env`.
fn build_envp(spec: &Spec) -> Result<Vec<CString>, Error> {
    let mut vars: HashMap<String, String> = if spec.clear_env { HashMap::new() } else { std::env::vars().collect() };
    for (key, value) in &spec.env {
        vars.insert(key.clone(), value.clone());
    }
    vars.into_iter()
        .map(|(key, value)| CString::new(format!("{key}={value}")).map_err(Error::from))
        .collect()
}

/// Spawn a child process per `spec`, returning a live [`Handle`].
///
/// # Errors
/// Returns an error if any pipe/pty allocation, `fork`, or `execve` setup
/// step fails. Failures inside the child after `fork` but before `execve`
/// are reported through the child exiting with a reserved status (125 for
/// `chdir`, 126 for stdio wiring, 127 for `execve` itself); they cannot
/// propagate back through this `Result`.
#[allow(clippy::too_many_lines)]
pub fn spawn(spec: Spec) -> Result<Handle, Error> {
    endpoint::ensure_null_ready();

    let pty = if matches!(spec.out, OutputMode::Pty) || matches!(spec.r#in, InputMode::Pty) || matches!(spec.err, OutputMode::Pty)
    {
        Some(Pty::open()?)
    } else {
        None
    };

    // Every fd/CString the child touches is resolved here, in the parent,
    // before `fork`. The child below performs only the syscalls needed to
    // wire them up and exec: no allocation, no locks another thread might
    // have held at fork time.
    let in_pty_slave = matches!(spec.r#in, InputMode::Pty)
        .then(|| pty.as_ref().expect("pty allocated for InputMode::Pty").slave())
        .transpose()?;
    let out_pty_slave = matches!(spec.out, OutputMode::Pty)
        .then(|| pty.as_ref().expect("pty allocated for OutputMode::Pty").slave())
        .transpose()?;
    let err_pty_slave = matches!(spec.err, OutputMode::Pty)
        .then(|| pty.as_ref().expect("pty allocated for OutputMode::Pty").slave())
        .transpose()?;

    let out_pipe = endpoint::cond_pipe_out(&spec.out)?;
    let err_pipe = endpoint::cond_pipe_out(&spec.err)?;
    let in_pipe = endpoint::cond_pipe_in(&spec.r#in)?;

    let program = CString::new(spec.program.as_os_str().as_encoded_bytes())?;
    let mut argv = Vec::with_capacity(spec.args.len() + 1);
    argv.push(program.clone());
    let envp = build_envp(&spec)?;
    let cwd = spec.cwd.as_ref().map(|p| CString::new(p.as_os_str().as_encoded_bytes())).transpose()?;
    argv.extend(spec.args.iter().cloned());

    let plan = ChildPlan {
        program,
        argv,
        envp,
        cwd,
        in_pty_slave,
        out_pty_slave,
        err_pty_slave,
    };

    trace!("Forking to exec {:?}", spec.program);
    // SAFETY: the child performs only async-signal-safe work (chdir,
    // dup2, close, execve) before either exec'ing or calling `_exit`; all
    // argv/envp/cwd `CString`s and pty slave fds were built above, in the
    // parent, so nothing in the child allocates or touches a std lock
    // another thread might have held open at the moment of `fork`.
    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            if let Some(cwd) = &plan.cwd
                && chdir(cwd.as_c_str()).is_err()
            {
                nix::unistd::_exit(125);
            }
            if wire_child_stdio(&spec, &plan, out_pipe, err_pipe, in_pipe).is_err() {
                nix::unistd::_exit(126);
            }
            let _ = execve(&plan.program, &plan.argv, &plan.envp);
            nix::unistd::_exit(127);
        }
        ForkResult::Parent { child } => {
            debug!("Spawned child {child}");

            // The parent doesn't use these; it holds its own copies only
            // because `fork` duplicated the fd table. A pty slave left
            // open here would prevent the master from ever seeing EOF.
            for slave in [plan.in_pty_slave, plan.out_pty_slave, plan.err_pty_slave].into_iter().flatten() {
                endpoint::close_quiet(slave);
            }

            let out_read = out_pipe.map(|(read, write)| {
                endpoint::close_quiet(write);
                read
            });
            let err_read = err_pipe.map(|(read, write)| {
                endpoint::close_quiet(write);
                read
            });
            let in_write = in_pipe.map(|(read, write)| {
                endpoint::close_quiet(read);
                write
            });

            let pid = Arc::new(Mutex::new(Some(child)));
            let process = ProcessControl::new(Arc::clone(&pid));
            let stdin_file: Arc<Mutex<Option<File>>> = Arc::new(Mutex::new(None));

            let stdout = out_read.map(|fd| {
                Stream::new(
                    fd,
                    spec.out_bufsize,
                    spec.out_internal_bufsize,
                    spec.out_sink,
                    Arc::clone(&stdin_file),
                    process.clone(),
                )
            });
            let stderr = err_read.map(|fd| {
                Stream::new(
                    fd,
                    spec.err_bufsize,
                    spec.err_internal_bufsize,
                    spec.err_sink,
                    Arc::clone(&stdin_file),
                    process.clone(),
                )
            });

            let input_pump = match (in_write, spec.stdin_source) {
                (Some(fd), Some(source)) => Some(InputPump::spawn(source, fd)),
                (Some(fd), None) => {
                    *stdin_file.lock() = Some(File::from(fd));
                    None
                }
                (None, _) => None,
            };

            Ok(Handle {
                pid,
                stdout,
                stderr,
                stdin: stdin_file,
                input_pump,
                _pty: pty,
                exit_status: None,
                associates: Vec::new(),
            })
        }
    }
}

/// Dup the appropriate fd onto the child's stdin/stdout/stderr and close
/// everything else that isn't needed post-exec. Runs in the child after
/// `fork`, before `execve`. Only dup2/close calls: no allocation.
fn wire_child_stdio(
    spec: &Spec,
    plan: &ChildPlan,
    out_pipe: Option<(OwnedFd, OwnedFd)>,
    err_pipe: Option<(OwnedFd, OwnedFd)>,
    in_pipe: Option<(OwnedFd, OwnedFd)>,
) -> Result<(), Error> {
    match &spec.r#in {
        InputMode::Share => {}
        InputMode::Discard => {
            let null = endpoint::dup_null()?;
            dup2_stdin(null).map_err(|e| Error::Errno(None, "dup2 stdin", e))?;
        }
        InputMode::Pipe => {
            if let Some((read, write)) = in_pipe {
                dup2_stdin(read).map_err(|e| Error::Errno(None, "dup2 stdin", e))?;
                endpoint::close_quiet(write);
            }
        }
        #[cfg(feature = "fd")]
        InputMode::Fd(_) => {}
        InputMode::Pty => {
            if let Some(slave) = &plan.in_pty_slave {
                let dup = nix::unistd::dup(slave.as_fd()).map_err(|e| Error::Errno(None, "dup pty slave", e))?;
                dup2_stdin(dup).map_err(|e| Error::Errno(None, "dup2 stdin", e))?;
            }
        }
    }

    match &spec.out {
        OutputMode::Pipe | OutputMode::Log(_) => {
            if let Some((read, write)) = out_pipe {
                dup2_stdout(write).map_err(|e| Error::Errno(None, "dup2 stdout", e))?;
                endpoint::close_quiet(read);
            }
        }
        OutputMode::Share => {}
        OutputMode::Discard => {
            let null = endpoint::dup_null()?;
            dup2_stdout(null).map_err(|e| Error::Errno(None, "dup2 stdout", e))?;
        }
        #[cfg(feature = "fd")]
        OutputMode::Fd(_) => {}
        OutputMode::Merged => {}
        OutputMode::Pty => {
            if let Some(slave) = &plan.out_pty_slave {
                let dup = nix::unistd::dup(slave.as_fd()).map_err(|e| Error::Errno(None, "dup pty slave", e))?;
                dup2_stdout(dup).map_err(|e| Error::Errno(None, "dup2 stdout", e))?;
            }
        }
    }

    match &spec.err {
        OutputMode::Merged => {
            // SAFETY: raw fd 1 (stdout), already wired above in this same
            // function; avoids touching `std::io::stdout()`'s lock here.
            let stdout_fd = unsafe { BorrowedFd::borrow_raw(1) };
            let out = nix::unistd::dup(stdout_fd).map_err(|e| Error::Errno(None, "dup stdout for err_to_out", e))?;
            dup2_stderr(out).map_err(|e| Error::Errno(None, "dup2 stderr", e))?;
        }
        OutputMode::Pipe | OutputMode::Log(_) => {
            if let Some((read, write)) = err_pipe {
                dup2_stderr(write).map_err(|e| Error::Errno(None, "dup2 stderr", e))?;
                endpoint::close_quiet(read);
            }
        }
        OutputMode::Share => {}
        OutputMode::Discard => {
            let null = endpoint::dup_null()?;
            dup2_stderr(null).map_err(|e| Error::Errno(None, "dup2 stderr", e))?;
        }
        #[cfg(feature = "fd")]
        OutputMode::Fd(_) => {}
        OutputMode::Pty => {
            if let Some(slave) = &plan.err_pty_slave {
                let dup = nix::unistd::dup(slave.as_fd()).map_err(|e| Error::Errno(None, "dup pty slave", e))?;
                dup2_stderr(dup).map_err(|e| Error::Errno(None, "dup2 stderr", e))?;
            }
        }
    }

    Ok(())
}

impl Handle {
    /// The child's pid, or `None` once it has been waited on.
    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        *self.pid.lock()
    }

    /// Whether the child is still running.
    #[must_use]
    pub fn alive(&self) -> bool {
        self.pid.lock().is_some() && self.exit_status.is_none()
    }

    /// Block until the child exits and return its exit status.
    ///
    /// # Errors
    /// Returns an error if `waitpid` fails (e.g. the pid was already
    /// reaped by something else).
    pub fn wait(&mut self) -> Result<ExitStatus, Error> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let pid = self.pid.lock().ok_or(Error::Fork(nix::errno::Errno::ECHILD))?;
        loop {
            match waitpid(pid, None).map_err(|e| Error::Errno(None, "waitpid", e))? {
                WaitStatus::Exited(_, code) => {
                    let status = ExitStatus::Code(code);
                    self.finish(status);
                    return Ok(status);
                }
                WaitStatus::Signaled(_, sig, _) => {
                    let status = ExitStatus::Signalled(sig);
                    self.finish(status);
                    return Ok(status);
                }
                _ => continue,
            }
        }
    }

    /// Non-blocking poll: `Some` once the child has exited.
    ///
    /// # Errors
    /// Returns an error if `waitpid` fails.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, Error> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(pid) = *self.pid.lock() else {
            return Ok(None);
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)).map_err(|e| Error::Errno(None, "waitpid", e))? {
            WaitStatus::Exited(_, code) => {
                let status = ExitStatus::Code(code);
                self.finish(status);
                Ok(Some(status))
            }
            WaitStatus::Signaled(_, sig, _) => {
                let status = ExitStatus::Signalled(sig);
                self.finish(status);
                Ok(Some(status))
            }
            _ => Ok(None),
        }
    }

    /// Record the exit status and reap associated streams/pumps.
    fn finish(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
        *self.pid.lock() = None;
        if let Some(stream) = &mut self.stdout {
            let _ = stream.wait();
        }
        if let Some(stream) = &mut self.stderr {
            let _ = stream.wait();
        }
        if let Some(pump) = &mut self.input_pump {
            pump.wait();
        }
    }

    /// Send a signal to the child. A no-op once it has exited.
    ///
    /// # Errors
    /// Returns an error if `kill` fails for a reason other than the
    /// process no longer existing.
    pub fn signal(&self, sig: Signal) -> Result<(), Error> {
        if let Some(pid) = *self.pid.lock() {
            signal::kill(pid, sig).map_err(|e| Error::Errno(None, "kill", e))?;
        }
        Ok(())
    }

    /// `SIGTERM`.
    ///
    /// # Errors
    /// See [`Handle::signal`].
    pub fn terminate(&self) -> Result<(), Error> {
        self.signal(Signal::SIGTERM)
    }

    /// `SIGKILL`.
    ///
    /// # Errors
    /// See [`Handle::signal`].
    pub fn kill(&self) -> Result<(), Error> {
        self.signal(Signal::SIGKILL)
    }

    /// Close the write end of the child's stdin, signalling EOF.
    pub fn close_stdin(&self) {
        *self.stdin.lock() = None;
    }

    /// Block until stdout closes and return everything captured.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stdout(&mut self) -> Result<String, pump::Error> {
        self.stdout.as_mut().map_or_else(|| Ok(String::new()), Stream::read_all)
    }

    /// As [`Handle::stdout`], raw bytes.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stdout_bytes(&mut self) -> Result<Vec<u8>, pump::Error> {
        self.stdout
            .as_mut()
            .map_or_else(|| Ok(Vec::new()), Stream::read_all_bytes)
    }

    /// Block until stderr closes and return everything captured.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stderr(&mut self) -> Result<String, pump::Error> {
        self.stderr.as_mut().map_or_else(|| Ok(String::new()), Stream::read_all)
    }

    /// As [`Handle::stderr`], raw bytes.
    ///
    /// # Errors
    /// Returns an error if the capture thread panicked.
    pub fn stderr_bytes(&mut self) -> Result<Vec<u8>, pump::Error> {
        self.stderr
            .as_mut()
            .map_or_else(|| Ok(Vec::new()), Stream::read_all_bytes)
    }

    /// Pull one line of stdout, blocking. Used to implement `iter` mode.
    #[must_use]
    pub fn next_stdout_line(&self) -> Option<String> {
        self.stdout.as_ref().and_then(Stream::read_line)
    }

    /// As [`Handle::next_stdout_line`], but non-blocking (`iter_noblock`).
    #[must_use]
    pub fn try_next_stdout_line(&self) -> Option<Option<String>> {
        self.stdout.as_ref().and_then(Stream::try_read_line)
    }

    /// A streaming view onto this child's captured stdout, for relaying
    /// bytes to a downstream process as they arrive rather than waiting
    /// for the whole capture (pipelining, spec.md §5).
    #[must_use]
    pub fn stdout_reader(&self) -> Option<StreamReader> {
        self.stdout.as_ref().map(Stream::reader)
    }

    /// Register another handle to be signalled when this one drops
    /// (pipeline association, §4.4).
    pub fn associate(&mut self, other: &Handle) {
        self.associates.push(Arc::clone(&other.pid));
    }
}
impl Write for Handle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.stdin.lock().as_mut() {
            Some(file) => file.write(buf),
            None => Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is closed")),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self.stdin.lock().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
impl Drop for Handle {
    fn drop(&mut self) {
        if self.alive() {
            let _ = self.kill();
            let _ = self.wait();
        }
        for associate in &self.associates {
            if let Some(pid) = *associate.lock() {
                let _ = signal::kill(pid, Signal::SIGTERM);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{InputMode, OutputMode};

    fn spec(program: &str, args: &[&str]) -> Spec {
        Spec {
            program: PathBuf::from(program),
            args: args.iter().map(|a| CString::new(*a).expect("no null bytes")).collect(),
            env: Vec::new(),
            clear_env: false,
            cwd: None,
            out: OutputMode::Pipe,
            err: OutputMode::Pipe,
            r#in: InputMode::Share,
            out_bufsize: 1,
            err_bufsize: 1,
            out_internal_bufsize: None,
            err_internal_bufsize: None,
            out_sink: None,
            err_sink: None,
            stdin_source: None,
        }
    }

    #[test]
    fn echo_roundtrip() {
        let mut handle = spawn(spec("/bin/echo", &["hello"])).expect("spawn echo");
        let out = handle.stdout().expect("read stdout");
        let status = handle.wait().expect("wait");
        assert_eq!(out.trim_end(), "hello");
        assert_eq!(status.as_code(), 0);
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let mut handle = spawn(spec("/bin/sh", &["-c", "exit 3"])).expect("spawn sh");
        let status = handle.wait().expect("wait");
        assert_eq!(status.as_code(), 3);
    }

    #[test]
    fn terminate_reports_signal() {
        let mut handle = spawn(spec("/bin/sleep", &["5"])).expect("spawn sleep");
        handle.terminate().expect("terminate");
        let status = handle.wait().expect("wait");
        assert_eq!(status, ExitStatus::Signalled(Signal::SIGTERM));
    }
}
