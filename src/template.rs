//! `Template`: a reusable, immutable reference to an executable plus a
//! baked prefix of arguments and default options (spec.md §3/§4.1).
//! Calling it produces a [`crate::Handle`].

use crate::{
    context,
    error::Error,
    handle::Handle,
    marshal::{self, Arg, IntoArg, Marshalled, OptionValue},
    options::{InputSpec, OkCodes, OutputSpec, Options},
};
use spawn::{InputMode, OutputMode, Spec, StdinSource};
use std::{path::PathBuf, sync::Arc};

/// An executable plus a baked argument prefix and default options.
///
/// Cloning a `Template` is O(1): the resolved path, baked arguments, and
/// name are all `Arc`-backed, matching spec.md §3's "baking is
/// associative and never mutates the parent."
#[derive(Clone)]
pub struct Template {
    program: Arc<PathBuf>,
    name: Arc<str>,
    baked: Arc<[String]>,
}

impl Template {
    /// Resolve `name` on `PATH` via the `which` crate and build a
    /// `Template` with no baked arguments.
    ///
    /// # Errors
    /// Returns [`Error::CommandNotFound`] if resolution fails.
    pub fn new(name: &str) -> Result<Self, Error> {
        let program = which::which(name).map_err(|_| Error::CommandNotFound(name.to_owned()))?;
        Ok(Self {
            program: Arc::new(program),
            name: Arc::from(name),
            baked: Arc::from([]),
        })
    }

    /// Build a `Template` from an already-resolved absolute path,
    /// bypassing `PATH` lookup.
    #[must_use]
    pub fn from_path(program: PathBuf) -> Self {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            program: Arc::new(program),
            name: Arc::from(name.as_str()),
            baked: Arc::from([]),
        }
    }

    /// Return a new `Template` with `args` appended to the baked prefix.
    /// Never mutates `self` (spec.md invariant: baking is associative).
    #[must_use]
    pub fn bake<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Self {
        let mut baked = self.baked.to_vec();
        baked.extend(args.into_iter().map(str::to_owned));
        Self {
            program: Arc::clone(&self.program),
            name: Arc::clone(&self.name),
            baked: Arc::from(baked),
        }
    }

    /// Sub-attribute access (`git.log()` in the original): a `Template`
    /// for a subcommand, sharing this template's resolved path and
    /// baked prefix plus the subcommand name appended (spec.md §4.5).
    #[must_use]
    pub fn sub(&self, name: &str) -> Self {
        self.bake([name])
    }

    /// Call with positional arguments only, default options.
    ///
    /// # Errors
    /// See [`Template::call`].
    pub fn run<'a>(&self, args: impl IntoIterator<Item = Arg<'a>>) -> Result<Handle, Error> {
        self.call(args, Vec::new(), Options::default())
    }

    /// The full call path: positional arguments, pre-rendered keyword
    /// flags (see [`crate::marshal::OptionValue`]), and special options.
    ///
    /// # Errors
    /// Returns [`Error::IncompatibleSpecialArgs`] if `options` combines
    /// mutually exclusive special arguments, [`Error::Which`]-derived
    /// errors are not produced here (resolution already happened in
    /// [`Template::new`]), and [`Error::Spawn`] if the engine fails to
    /// configure or launch the child.
    pub fn call<'a>(
        &self,
        args: impl IntoIterator<Item = Arg<'a>>,
        keywords: Vec<Vec<String>>,
        options: Options,
    ) -> Result<Handle, Error> {
        options.validate()?;

        if options.with {
            return Ok(self.enter_context());
        }

        let ambient = context::current();
        let prefix = ambient.prefix.clone();
        let options = apply_ambient(options, ambient);

        let Marshalled { argv, upstream } = marshal::marshal(&self.baked, args.into_iter().collect(), keywords)
            .map_err(|_| Error::IncompatibleSpecialArgs("argument contained an embedded NUL byte"))?;

        let (program, argv) = prefix_argv(self.program.as_ref(), prefix, argv)?;

        let out_mode = output_mode(&options.out, options.tty_out, options.err_to_out);
        let err_mode = if options.err_to_out {
            OutputMode::Merged
        } else {
            output_mode(&options.err, false, false)
        };
        let in_mode = input_mode(&options.r#in, options.tty_in, upstream.is_some());

        let argv_strings: Vec<String> = std::iter::once(program.to_string_lossy().into_owned())
            .chain(argv.iter().map(|c| c.to_string_lossy().into_owned()))
            .collect();

        let stdin_source = if let Some(upstream) = upstream {
            // Relayed concurrently, bytes-as-available, by a background
            // thread (`spawn::InputPump`) reading from the upstream's own
            // capture buffer as it fills — not drained up front. Requires
            // the upstream call to have been made with `piped: true` so it
            // is still running (see spec.md §5); otherwise it already
            // finished before reaching here and the bytes arrive at once.
            let reader = upstream
                .stdout_reader()
                .ok_or(Error::IncompatibleSpecialArgs("upstream has no captured stdout to pipe"))?;
            Some(StdinSource::Reader(Box::new(reader)))
        } else {
            options.r#in.into_source()
        };

        let env: Vec<(String, String)> = options.env.clone().map(|m| m.into_iter().collect()).unwrap_or_default();

        let spec = Spec {
            program,
            args: argv,
            env,
            clear_env: options.env.is_some(),
            cwd: options.cwd.clone(),
            out: out_mode,
            err: err_mode,
            r#in: in_mode,
            out_bufsize: options.out_bufsize,
            err_bufsize: options.err_bufsize,
            out_internal_bufsize: options.internal_bufsize,
            err_internal_bufsize: options.internal_bufsize,
            out_sink: take_out_sink(options.out),
            err_sink: if options.err_to_out { None } else { take_out_sink(options.err) },
            stdin_source,
        };

        let inner = spawn::spawn(spec)?;
        let mut handle = Handle::new(inner, argv_strings, options.ok_code.clone());

        if options.bg || options.piped || options.iter || options.iter_noblock {
            return Ok(handle);
        }
        handle.wait()?;
        Ok(handle)
    }

    /// Push this template's resolved program and baked arguments as the
    /// ambient argv prefix (`_with`, spec.md §4.5) and return a guard
    /// `Handle` that pops it again on `Drop` — the idiomatic-Rust
    /// (RAII-scoped) analogue of the reference implementation's `with
    /// cmd:` block, where the block's extent is a Python context manager
    /// instead of a value's lifetime.
    fn enter_context(&self) -> Handle {
        let argv_strings: Vec<String> = std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.baked.iter().cloned())
            .collect();
        context::push(context::ContextDefaults {
            prefix: Some((self.program.to_string_lossy().into_owned(), self.baked.to_vec())),
            ..context::ContextDefaults::default()
        });
        Handle::context_guard(argv_strings)
    }
}

/// Prepend an active `with`-scope's program+baked-args to `argv`, turning
/// this call's own program into just another argument of the prefix
/// command (e.g. `with time: ls()` runs `time ls ...`).
fn prefix_argv(
    program: &std::path::Path,
    prefix: Option<(String, Vec<String>)>,
    argv: Vec<std::ffi::CString>,
) -> Result<(PathBuf, Vec<std::ffi::CString>), Error> {
    let Some((prefix_program, prefix_args)) = prefix else {
        return Ok((program.to_path_buf(), argv));
    };
    let mut tokens = prefix_args;
    tokens.push(program.to_string_lossy().into_owned());
    let mut combined = tokens
        .into_iter()
        .map(std::ffi::CString::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Error::IncompatibleSpecialArgs("with-context argument contained an embedded NUL byte"))?;
    combined.extend(argv);
    Ok((PathBuf::from(prefix_program), combined))
}

fn output_mode(spec: &OutputSpec, tty: bool, merged: bool) -> OutputMode {
    if merged {
        return OutputMode::Merged;
    }
    if tty {
        return OutputMode::Pty;
    }
    match spec {
        OutputSpec::Capture => OutputMode::Pipe,
        OutputSpec::Writer(_) | OutputSpec::Callback(_) => OutputMode::Pipe,
        OutputSpec::Discard => OutputMode::Discard,
        OutputSpec::Log(level) => OutputMode::Log(*level),
        OutputSpec::Pty => OutputMode::Pty,
    }
}

fn input_mode(spec: &InputSpec, tty: bool, piped_upstream: bool) -> InputMode {
    if tty {
        return InputMode::Pty;
    }
    if piped_upstream {
        return InputMode::Pipe;
    }
    match spec {
        InputSpec::Inherit => InputMode::Share,
        InputSpec::Discard => InputMode::Discard,
        InputSpec::Pty => InputMode::Pty,
        InputSpec::Bytes(_) | InputSpec::Iter(_) | InputSpec::Queue(_) | InputSpec::Reader(_) => InputMode::Pipe,
    }
}

fn take_out_sink(spec: OutputSpec) -> Option<spawn::Sink> {
    spec.into_sink()
}

/// Layer ambient `with`-scope defaults underneath explicit call options:
/// anything the caller set explicitly still wins.
fn apply_ambient(mut options: Options, ambient: context::ContextDefaults) -> Options {
    if options.cwd.is_none() {
        options.cwd = ambient.cwd;
    }
    if options.env.is_none() {
        options.env = ambient.env;
    }
    if let Some(ok_code) = ambient.ok_code
        && options.ok_code == OkCodes::default()
    {
        options.ok_code = ok_code;
    }
    options
}

/// Positional argument rendering helper for call sites using literal
/// values rather than pre-built [`Arg`]s.
pub fn arg<'a>(value: impl IntoArg<'a>) -> Arg<'a> {
    value.into_arg()
}

/// Render one keyword argument's flag(s). Call-site sugar over
/// [`OptionValue::render`].
pub fn kwarg(key: marshal::KeyLen, value: &impl OptionValue) -> Vec<String> {
    value.render(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bake_does_not_mutate_parent() {
        let Ok(base) = Template::new("true") else {
            return;
        };
        let baked = base.bake(["--flag"]);
        assert!(base.baked.is_empty());
        assert_eq!(baked.baked.as_ref(), ["--flag".to_owned()]);
    }
}
