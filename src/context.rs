//! Thread-local context stack backing `Options::with` (spec.md §4.5
//! "context defaulting"): a `Template` invoked with `with` pushes a
//! lightweight set of ambient defaults for the duration of a scope, and
//! every other `Template` called in that scope picks them up.
//!
//! Only the `Clone`-able subset of `Options` participates (`cwd`, `env`,
//! `ok_code`) — sinks and callbacks are inherently single-use and are
//! never meaningful as ambient context.

use crate::options::OkCodes;
use std::{cell::RefCell, collections::HashMap, path::PathBuf};

/// The ambient defaults contributed by one `with`-scoped `Template`.
#[derive(Default, Clone)]
pub struct ContextDefaults {
    /// Ambient working directory.
    pub cwd: Option<PathBuf>,
    /// Ambient environment overlay/replacement.
    pub env: Option<HashMap<String, String>>,
    /// Ambient accepted exit codes.
    pub ok_code: Option<OkCodes>,
    /// Ambient argv prefix: a `with`-invoked template's resolved program
    /// path plus its baked arguments, prepended to every call made while
    /// the scope is active (spec.md §4.5 "context defaulting").
    pub prefix: Option<(String, Vec<String>)>,
}

thread_local! {
    static STACK: RefCell<Vec<ContextDefaults>> = const { RefCell::new(Vec::new()) };
}

/// Push `defaults` onto the context stack for the duration of `body`,
/// popping it on return (including on panic, via `Drop`).
pub fn with<T>(defaults: ContextDefaults, body: impl FnOnce() -> T) -> T {
    push(defaults);
    let _guard = PopOnDrop;
    body()
}

/// Push `defaults` onto the context stack without an attached scope.
/// Paired with [`pop`]; used by a `with`-invoked `Template::call`, whose
/// returned guard `Handle` pops the stack on `Drop` instead of on a
/// closure return.
pub(crate) fn push(defaults: ContextDefaults) {
    STACK.with_borrow_mut(|stack| stack.push(defaults));
}

/// Pop the innermost context scope. A no-op if the stack is empty.
pub(crate) fn pop() {
    STACK.with_borrow_mut(|stack| {
        let _ = stack.pop();
    });
}

/// The innermost-wins merge of every active context scope, outermost
/// first so a nested `with` can override its parent.
#[must_use]
pub fn current() -> ContextDefaults {
    STACK.with_borrow(|stack| {
        stack.iter().cloned().fold(ContextDefaults::default(), |mut acc, ctx| {
            if ctx.cwd.is_some() {
                acc.cwd = ctx.cwd;
            }
            if ctx.env.is_some() {
                acc.env = ctx.env;
            }
            if ctx.ok_code.is_some() {
                acc.ok_code = ctx.ok_code;
            }
            if ctx.prefix.is_some() {
                acc.prefix = ctx.prefix;
            }
            acc
        })
    })
}

/// Ensures the context stack is popped even if `body` panics.
struct PopOnDrop;
impl Drop for PopOnDrop {
    fn drop(&mut self) {
        pop();
    }
}
