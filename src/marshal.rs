//! The Argument Marshaller: turns positional and keyword Rust values into
//! the literal argv handed to `execve`, with no shell quoting performed
//! anywhere in the pipeline (spec.md §4.1).

use crate::handle::Handle;
use log::warn;
use std::{ffi::CString, path::Path};

/// One positional slot in a call. Most values become a plain string
/// token; a `&Handle` instead marks "pipe this invocation's stdout into
/// my stdin" (§4.1 upstream piping / §5 pipelining).
pub enum Arg<'a> {
    /// A literal token, rendered via `Display`/`AsRef<str>`.
    Value(String),
    /// Pipe the referenced handle's raw stdout into this call's stdin.
    Upstream(&'a Handle),
}

/// Converts a Rust value into a positional [`Arg`].
pub trait IntoArg<'a> {
    /// Perform the conversion.
    fn into_arg(self) -> Arg<'a>;
}

macro_rules! display_into_arg {
    ($($t:ty),* $(,)?) => {
        $(
            impl<'a> IntoArg<'a> for $t {
                fn into_arg(self) -> Arg<'a> {
                    Arg::Value(self.to_string())
                }
            }
        )*
    };
}
display_into_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, char);

impl<'a> IntoArg<'a> for &str {
    fn into_arg(self) -> Arg<'a> {
        Arg::Value(self.to_owned())
    }
}
impl<'a> IntoArg<'a> for String {
    fn into_arg(self) -> Arg<'a> {
        Arg::Value(self)
    }
}
impl<'a> IntoArg<'a> for &Path {
    fn into_arg(self) -> Arg<'a> {
        Arg::Value(self.to_string_lossy().into_owned())
    }
}
impl<'a> IntoArg<'a> for &'a Handle {
    fn into_arg(self) -> Arg<'a> {
        Arg::Upstream(self)
    }
}

/// Whether a keyword argument renders as a single-character flag
/// (`-l`) or a word flag (`--color`); underscores in the Rust identifier
/// are mapped to hyphens for the latter, matching spec.md §4.1.
#[derive(Debug, Clone, Copy)]
pub enum KeyLen {
    /// A single-character flag, e.g. `Short('l')` → `-l`.
    Short(char),
    /// A word flag, e.g. `Long("dry_run")` → `--dry-run`.
    Long(&'static str),
}
impl KeyLen {
    /// The bare flag with no value attached.
    #[must_use]
    pub fn flag(self) -> String {
        match self {
            Self::Short(c) => format!("-{c}"),
            Self::Long(name) => format!("--{}", name.replace('_', "-")),
        }
    }
}

/// Converts a Rust value into the argv tokens for a keyword argument,
/// given which flavor of flag it was bound to.
pub trait OptionValue {
    /// Render zero or more argv tokens for this value under `key`.
    fn render(&self, key: KeyLen) -> Vec<String>;
}
impl OptionValue for bool {
    fn render(&self, key: KeyLen) -> Vec<String> {
        if *self { vec![key.flag()] } else { Vec::new() }
    }
}
impl OptionValue for &str {
    fn render(&self, key: KeyLen) -> Vec<String> {
        match key {
            KeyLen::Short(c) => vec![format!("-{c}"), (*self).to_owned()],
            KeyLen::Long(name) => vec![format!("--{}={self}", name.replace('_', "-"))],
        }
    }
}
impl OptionValue for String {
    fn render(&self, key: KeyLen) -> Vec<String> {
        self.as_str().render(key)
    }
}
macro_rules! display_option_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl OptionValue for $t {
                fn render(&self, key: KeyLen) -> Vec<String> {
                    self.to_string().render(key)
                }
            }
        )*
    };
}
display_option_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// The outcome of marshalling one call: the literal argv (excluding
/// `argv[0]`) and, if any positional argument piped from an upstream
/// handle, that handle.
pub struct Marshalled<'a> {
    /// The fully expanded argument vector, in call order.
    pub argv: Vec<CString>,
    /// Present if a positional argument was `&Handle` (pipelining).
    pub upstream: Option<&'a Handle>,
}

/// Build the final argv for a call: baked prefix arguments first, then
/// call-site positional arguments, then keyword-derived flags — matching
/// spec.md invariant 3 ("baked arguments precede call arguments").
///
/// # Errors
/// Returns an error if any resulting token contains an embedded NUL byte.
pub fn marshal<'a>(
    baked: &[String],
    positional: Vec<Arg<'a>>,
    keywords: Vec<Vec<String>>,
) -> Result<Marshalled<'a>, std::ffi::NulError> {
    if positional.is_empty() && keywords.is_empty() {
        warn!("marshalling a call with no positional or keyword arguments");
    }

    let mut tokens: Vec<String> = baked.to_vec();
    let mut upstream = None;

    for arg in positional {
        match arg {
            Arg::Value(v) => tokens.push(v),
            Arg::Upstream(handle) => {
                upstream = Some(handle);
            }
        }
    }
    for rendered in keywords {
        tokens.extend(rendered);
    }

    let argv = tokens
        .into_iter()
        .map(CString::new)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Marshalled { argv, upstream })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flag_renders_only_when_true() {
        assert_eq!(true.render(KeyLen::Short('l')), vec!["-l".to_owned()]);
        assert!(false.render(KeyLen::Short('l')).is_empty());
    }

    #[test]
    fn long_flag_replaces_underscores() {
        assert_eq!("auto".render(KeyLen::Long("color_mode")), vec!["--color-mode=auto".to_owned()]);
    }

    #[test]
    fn short_flag_renders_as_two_tokens() {
        assert_eq!("3".render(KeyLen::Short('n')), vec!["-n".to_owned(), "3".to_owned()]);
    }

    #[test]
    fn baked_precedes_call_arguments() {
        let baked = vec!["--verbose".to_owned()];
        let positional = vec![Arg::Value("ls".to_owned())];
        let result = marshal(&baked, positional, Vec::new()).expect("no nul bytes");
        let rendered: Vec<_> = result.argv.iter().map(|c| c.to_str().expect("utf8")).collect();
        assert_eq!(rendered, vec!["--verbose", "ls"]);
    }
}
