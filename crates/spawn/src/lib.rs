#![doc = include_str!("../README.md")]

mod controller;
mod endpoint;
mod error;
mod handle;
mod pump;

pub use controller::ErrorReturnCode;
pub use endpoint::{InputMode, OutputMode, Pty};
pub use error::Error;
pub use handle::{ExitStatus, Handle, Spec, spawn};
pub use pump::{
    Bufsize, CallbackKind, Error as PumpError, InputPump, ProcessControl, Sink, StdinSource, StdinWriter, Stream, StreamReader,
};
