//! The Pump Fabric: worker threads that move bytes between the host and
//! a child's pipes without blocking the caller beyond what it asked for.

use log::warn;
use nix::{sys::signal::Signal, unistd::Pid};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    collections::VecDeque,
    error, fmt,
    fs::File,
    io::{self, Read, Write},
    os::fd::OwnedFd,
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Errors communicating with a pumped stream.
#[derive(Debug)]
pub enum Error {
    /// The worker thread for this stream panicked.
    Child,
    /// Attempted to write to a stdin that was never configured as a pipe.
    NoStdin,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Child => write!(f, "The pump thread terminated unexpectedly"),
            Self::NoStdin => write!(f, "No stdin pipe is attached to this process"),
        }
    }
}
impl error::Error for Error {}

/// How many bytes to accumulate before handing a chunk to a sink.
/// `0` = unbuffered (one byte/read at a time), `1` = line buffered,
/// `N > 1` = fixed-size chunks (the final chunk may be shorter).
pub type Bufsize = usize;

/// A destination an [`OutputPump`] additionally feeds bytes to, on top of
/// the default in-memory capture that is always maintained.
pub enum Sink {
    /// Write bytes verbatim to a file-like sink.
    Writer(Box<dyn Write + Send>),
    /// Invoke a callback, whose signature determines what it receives.
    Callback(CallbackKind),
}

/// Lets a callback signal or terminate the owning process.
#[derive(Clone)]
pub struct ProcessControl {
    pid: Arc<Mutex<Option<Pid>>>,
}
impl ProcessControl {
    pub(crate) fn new(pid: Arc<Mutex<Option<Pid>>>) -> Self {
        Self { pid }
    }

    /// Send `SIGTERM`.
    pub fn terminate(&self) {
        self.signal(Signal::SIGTERM);
    }

    /// Send `SIGKILL`.
    pub fn kill(&self) {
        self.signal(Signal::SIGKILL);
    }

    /// Send an arbitrary signal. A no-op once the child has exited.
    pub fn signal(&self, sig: Signal) {
        if let Some(pid) = *self.pid.lock()
            && let Err(e) = nix::sys::signal::kill(pid, sig)
        {
            warn!("Failed to deliver {sig} to child: {e}");
        }
    }
}

/// Writes into the child's stdin pipe, shared between the [`crate::Handle`]
/// and any callback that was given write access to it.
#[derive(Clone)]
pub struct StdinWriter {
    file: Arc<Mutex<Option<File>>>,
}
impl StdinWriter {
    pub(crate) fn new(file: Arc<Mutex<Option<File>>>) -> Self {
        Self { file }
    }
}
impl Write for StdinWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock().as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed")),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// The three callback arities a caller may register for `out`/`err`.
/// Returning `true` stops further delivery to the callback; it does not
/// stop the default capture buffer from continuing to fill, and does not
/// by itself affect the child.
pub enum CallbackKind {
    /// Receives only the chunk/line.
    Plain(Box<dyn FnMut(&[u8]) -> bool + Send>),
    /// Additionally receives a writer onto the child's stdin.
    Stdin(Box<dyn FnMut(&[u8], &mut StdinWriter) -> bool + Send>),
    /// Additionally receives a handle to signal/terminate the child.
    Process(Box<dyn FnMut(&[u8], &mut StdinWriter, &ProcessControl) -> bool + Send>),
}

/// Splits a byte stream into chunks according to a [`Bufsize`].
struct Chunker {
    bufsize: Bufsize,
    pending: Vec<u8>,
}
impl Chunker {
    fn new(bufsize: Bufsize) -> Self {
        Self {
            bufsize,
            pending: Vec::new(),
        }
    }

    /// Feed newly-read bytes in, invoking `emit` for each completed chunk
    /// per the buffering rule. Any partial chunk is retained until more
    /// bytes arrive or `flush` is called.
    fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(&[u8])) {
        match self.bufsize {
            0 => {
                for byte in bytes {
                    emit(std::slice::from_ref(byte));
                }
            }
            1 => {
                self.pending.extend_from_slice(bytes);
                loop {
                    if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = self.pending.drain(..=pos).collect();
                        emit(&line);
                    } else {
                        break;
                    }
                }
            }
            n => {
                self.pending.extend_from_slice(bytes);
                while self.pending.len() >= n {
                    let chunk: Vec<u8> = self.pending.drain(..n).collect();
                    emit(&chunk);
                }
            }
        }
    }

    /// Emit whatever is left over once the stream has closed.
    fn flush(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            emit(&rest);
        }
    }
}

/// The shared state between a [`Stream`] handle and its worker thread.
struct InnerBuffer {
    buffer: VecDeque<u8>,
    finished: bool,
}

struct SharedBuffer {
    state: Mutex<InnerBuffer>,
    condvar: Condvar,
}

/// A handle onto a process's captured stdout/stderr.
///
/// The default in-memory capture is always maintained regardless of
/// whether an additional [`Sink`] was configured (callback or file-like),
/// matching the reference implementation's behavior of keeping `stdout`
/// populated even when `_out` redirects elsewhere.
pub struct Stream {
    shared: Arc<SharedBuffer>,
    thread: Option<JoinHandle<()>>,
}
impl Stream {
    /// Construct a new `Stream`, starting its worker thread immediately.
    ///
    /// `internal_bufsize`, when set, caps the retained capture at
    /// `internal_bufsize * max(bufsize, 1)` bytes: once reached, the pump
    /// keeps draining the pipe (so the child is never blocked) but stops
    /// growing the buffer.
    pub fn new(
        owned_fd: OwnedFd,
        bufsize: Bufsize,
        internal_bufsize: Option<usize>,
        sink: Option<Sink>,
        stdin: Arc<Mutex<Option<File>>>,
        process: ProcessControl,
    ) -> Self {
        let mut file = File::from(owned_fd);
        let shared = Arc::new(SharedBuffer {
            state: Mutex::new(InnerBuffer {
                buffer: VecDeque::new(),
                finished: false,
            }),
            condvar: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let cap = internal_bufsize.map(|n| n.saturating_mul(bufsize.max(1)));

        let handle = thread::spawn(move || {
            let mut chunker = Chunker::new(bufsize);
            let mut sink = sink;
            let mut stdin_writer = StdinWriter::new(stdin);

            // `Sink::Writer` receives each raw read chunk verbatim: bufsize
            // chunking is a callback-delivery concern (spec.md §4.3), not
            // something a file-like sink should ever see applied to it.
            let mut dispatch_writer = |chunk: &[u8]| {
                if let Some(Sink::Writer(writer)) = &mut sink
                    && let Err(e) = writer.write_all(chunk)
                {
                    warn!("Failed writing to output sink: {e}");
                }
            };
            let mut dispatch_callback = |chunk: &[u8]| match &mut sink {
                Some(Sink::Callback(CallbackKind::Plain(cb))) => {
                    if cb(chunk) {
                        sink = None;
                    }
                }
                Some(Sink::Callback(CallbackKind::Stdin(cb))) => {
                    if cb(chunk, &mut stdin_writer) {
                        sink = None;
                    }
                }
                Some(Sink::Callback(CallbackKind::Process(cb))) => {
                    if cb(chunk, &mut stdin_writer, &process) {
                        sink = None;
                    }
                }
                Some(Sink::Writer(_)) | None => {}
            };

            let _ = (|| -> io::Result<()> {
                let mut buf = [0u8; 4096];
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    let slice = &buf[..n];

                    {
                        let mut state = thread_shared.state.lock();
                        match cap {
                            Some(cap) if state.buffer.len() >= cap => {}
                            Some(cap) => {
                                let room = cap - state.buffer.len();
                                state.buffer.extend(&slice[..room.min(slice.len())]);
                            }
                            None => state.buffer.extend(slice),
                        }
                        thread_shared.condvar.notify_all();
                    }

                    dispatch_writer(slice);
                    chunker.feed(slice, &mut dispatch_callback);
                }
                Ok(())
            })();
            chunker.flush(&mut dispatch_callback);

            let mut state = thread_shared.state.lock();
            state.finished = true;
            thread_shared.condvar.notify_all();
        });

        Stream {
            shared,
            thread: Some(handle),
        }
    }

    /// Drain the current contents of the buffer.
    fn drain(&self, state: &mut MutexGuard<InnerBuffer>, upto: Option<usize>) -> Vec<u8> {
        match upto {
            Some(n) => {
                if n > state.buffer.len() {
                    state.buffer.drain(..).collect()
                } else {
                    state.buffer.drain(..=n).collect()
                }
            }
            None => state.buffer.drain(..).collect(),
        }
    }

    /// Read a line from the stream, blocking until one is available or the
    /// stream closes.
    pub fn read_line(&self) -> Option<String> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line = String::from_utf8_lossy(&self.drain(&mut state, Some(pos))).into_owned();
                return Some(line);
            }
            if state.finished {
                return if state.buffer.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(&self.drain(&mut state, None)).into_owned())
                };
            }
            self.shared.condvar.wait(&mut state);
        }
    }

    /// As [`Stream::read_line`], but returns immediately with `None` if no
    /// full line is ready yet instead of blocking (`iter_noblock`). The
    /// outer `Option<Option<String>>` distinguishes "nothing ready yet"
    /// (`Some(None)`) from "stream closed" (`None`).
    pub fn try_read_line(&self) -> Option<Option<String>> {
        let mut state = self.shared.state.lock();
        if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(&self.drain(&mut state, Some(pos))).into_owned();
            return Some(Some(line));
        }
        if state.finished {
            return if state.buffer.is_empty() {
                None
            } else {
                Some(Some(String::from_utf8_lossy(&self.drain(&mut state, None)).into_owned()))
            };
        }
        Some(None)
    }

    /// Block until the child closes this stream, then return everything
    /// captured.
    pub fn read_all(&mut self) -> Result<String, Error> {
        self.wait()?;
        let mut state = self.shared.state.lock();
        Ok(String::from_utf8_lossy(&self.drain(&mut state, None)).into_owned())
    }

    /// Raw bytes, lossless. See [`Stream::read_all`].
    pub fn read_all_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.wait()?;
        let mut state = self.shared.state.lock();
        Ok(self.drain(&mut state, None))
    }

    /// Join the worker thread.
    pub fn wait(&mut self) -> Result<(), Error> {
        if let Some(handle) = self.thread.take() {
            handle.join().map_err(|_| Error::Child)
        } else {
            Ok(())
        }
    }

    /// Borrow a [`StreamReader`] onto this stream's captured bytes, for
    /// relaying them to another process as they arrive rather than
    /// waiting for the whole capture (pipelining, spec.md §5). It drains
    /// the same buffer as `read_line`/`read_all`; don't mix a `Stream`'s
    /// own accessors with a `StreamReader` taken from it.
    #[must_use]
    pub fn reader(&self) -> StreamReader {
        StreamReader { shared: Arc::clone(&self.shared) }
    }
}
impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// A thread-movable [`Read`] view onto a [`Stream`]'s captured bytes,
/// pulling whatever is available rather than waiting for a line or the
/// stream's close. Used to relay one process's stdout into another's
/// stdin concurrently, byte-as-available, instead of draining the whole
/// capture first.
pub struct StreamReader {
    shared: Arc<SharedBuffer>,
}
impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.state.lock();
        loop {
            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                for slot in &mut buf[..n] {
                    *slot = state.buffer.pop_front().expect("just checked buffer.len() >= n");
                }
                return Ok(n);
            }
            if state.finished {
                return Ok(0);
            }
            self.shared.condvar.wait(&mut state);
        }
    }
}

/// The source an [`InputPump`] drains into the child's stdin.
pub enum StdinSource {
    /// A byte string, written in full then the pipe is closed.
    Bytes(Vec<u8>),
    /// Chunks pulled from an iterator until it's exhausted.
    Iter(Box<dyn Iterator<Item = Vec<u8>> + Send>),
    /// Chunks pulled from a queue; `None` is the EOF sentinel.
    Queue(std::sync::mpsc::Receiver<Option<Vec<u8>>>),
    /// Bytes pulled from any reader until it returns `Ok(0)`.
    Reader(Box<dyn Read + Send>),
}

/// Feeds a [`StdinSource`] into the child's stdin pipe on a background
/// thread, treating a broken pipe (the child closed stdin early) as a
/// clean EOF rather than an error.
pub struct InputPump {
    thread: Option<JoinHandle<()>>,
}
impl InputPump {
    pub fn spawn(source: StdinSource, fd: OwnedFd) -> Self {
        let thread = thread::spawn(move || {
            let mut file = File::from(fd);
            let result = match source {
                StdinSource::Bytes(bytes) => file.write_all(&bytes),
                StdinSource::Reader(mut reader) => io::copy(&mut reader, &mut file).map(|_| ()),
                StdinSource::Iter(iter) => {
                    let mut result = Ok(());
                    for chunk in iter {
                        if let Err(e) = file.write_all(&chunk) {
                            result = Err(e);
                            break;
                        }
                    }
                    result
                }
                StdinSource::Queue(rx) => {
                    let mut result = Ok(());
                    while let Ok(Some(chunk)) = rx.recv() {
                        if let Err(e) = file.write_all(&chunk) {
                            result = Err(e);
                            break;
                        }
                    }
                    result
                }
            };
            if let Err(e) = result
                && e.kind() != io::ErrorKind::BrokenPipe
            {
                warn!("stdin pump failed: {e}");
            }
        });
        Self {
            thread: Some(thread),
        }
    }

    /// Join the worker thread.
    pub fn wait(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
impl Drop for InputPump {
    fn drop(&mut self) {
        self.wait();
    }
}
