use std::{fmt::Display, panic::Location};

use anyhow::Context;

/// Public prelude. Re-exports the relevant bits of anyhow and thiserror,
/// so downstream crates only need a single `use located_error::prelude::*;`
pub mod prelude {
    pub use anyhow::{anyhow, bail, Context, Result};
    pub use thiserror::Error;
    pub use super::{LocatedError, LocatedOption};
}

fn tag(caller: &Location) -> String {
    format!("[{}:{}:{}]", caller.file(), caller.line(), caller.column())
}

/// Extension trait over [`Result`], prefixing the error's context with the
/// `[file:line:column]` of the call site.
///
/// `loc` evaluates its context eagerly; `with_loc` only once an error
/// actually occurred. Both convert the error into an [`anyhow::Error`].
pub trait LocatedError<T> {
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where C: Display + Send + Sync + 'static;

    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> LocatedError<T> for Result<T, E>
where
    E: Display + Send + Sync + 'static,
    Result<T, E>: Context<T, E>,
{
    #[track_caller]
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where C: Display + Send + Sync + 'static
    {
        let caller = Location::caller();
        match self {
            Ok(ok)  => Ok(ok),
            Err(_)  => self.context(format!("{} {context}", tag(caller))),
        }
    }

    #[track_caller]
    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C
    {
        let caller = Location::caller();
        match self {
            Ok(ok)  => Ok(ok),
            Err(_)  => self.with_context(|| format!("{} {}", tag(caller), f())),
        }
    }
}

/// [`LocatedError`], for [`Option`].
pub trait LocatedOption<T> {
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where C: Display + Send + Sync + 'static;

    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> LocatedOption<T> for Option<T> {
    #[track_caller]
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where C: Display + Send + Sync + 'static
    {
        let caller = Location::caller();
        match self {
            Some(ok) => Ok(ok),
            None     => self.context(format!("{} {context}", tag(caller))),
        }
    }

    #[track_caller]
    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C
    {
        let caller = Location::caller();
        match self {
            Some(ok) => Ok(ok),
            None     => self.with_context(|| format!("{} {}", tag(caller), f())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn faulty() -> Result<()> {
        std::fs::File::open("/hopefully/not/a/real/path").loc("failed to open")?;
        Ok(())
    }

    #[test]
    fn result_context_carries_location() {
        let err = faulty().with_loc(|| "while testing").unwrap_err();
        let msgs: Vec<String> = err.chain().map(ToString::to_string).collect();
        assert!(msgs[0].contains("while testing"));
        assert!(msgs[0].contains(file!()));
        assert!(msgs[1].contains("failed to open"));
    }

    #[test]
    fn option_context_carries_location() {
        let none: Option<u8> = None;
        let err = none.loc("empty").unwrap_err();
        assert!(format!("{err}").contains("empty"));
        assert!(format!("{err}").contains(file!()));
    }

    #[test]
    fn ok_values_pass_through() {
        let ok: Result<u8, std::io::Error> = Ok(42);
        assert_eq!(ok.loc("never seen").unwrap(), 42);
        assert_eq!(Some(7u8).with_loc(|| "never seen").unwrap(), 7);
    }
}
