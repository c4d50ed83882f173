#![doc = include_str!("../README.md")]

mod context;
mod error;
mod handle;
mod marshal;
mod options;
mod template;

pub use context::ContextDefaults;
pub use error::Error;
pub use handle::{Handle, Lines};
pub use marshal::{Arg, IntoArg, KeyLen, OptionValue};
pub use options::{InputSpec, OkCodes, OutputSpec, Options};
pub use template::{Template, arg, kwarg};

/// Resolve `name` on `PATH` and build a [`Template`] for it, the
/// equivalent of `from sh import name` in the reference implementation.
///
/// # Errors
/// Returns [`Error::CommandNotFound`] if `name` can't be resolved.
pub fn command(name: &str) -> Result<Template, Error> {
    Template::new(name)
}

/// Run `body` with `defaults` pushed as ambient context for every
/// `Template` call inside it (spec.md §4.5 `with`).
pub fn with<T>(defaults: ContextDefaults, body: impl FnOnce() -> T) -> T {
    context::with(defaults, body)
}
