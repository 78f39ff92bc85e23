#![forbid(unsafe_code)]

//! Error type shared by the expression engine, the query engine and the
//! runtime.
//!
//! Most failures inside a render pass are soft: they are reported on the
//! debug channel and the offending expression renders as an empty string.
//! Only a handful of conditions escape as a [`BlocksError`] from the public
//! entry points (see `Runtime::query`).

use std::fmt;

/// Errors produced while compiling or evaluating template code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlocksError {
    /// The expression source could not be parsed.
    Parse {
        source: String,
        offset: usize,
        message: String,
    },
    /// An identifier was not found in the context chain.
    Reference(String),
    /// A value that is not a function or observable was called.
    NotCallable(String),
    /// An operation was applied to a value of the wrong type.
    Type(String),
    /// `render()` was used outside an `each` template.
    RenderOutsideEach,
    /// `Observable::extend` was given an unregistered extender name.
    UnknownExtender(String),
    /// A `template()` query could not resolve its markup.
    Template(String),
}

impl BlocksError {
    pub(crate) fn parse(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            source: source.to_owned(),
            offset,
            message: message.into(),
        }
    }

    /// Whether this error aborts the whole render pass instead of being
    /// reported and skipped.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RenderOutsideEach)
    }
}

impl fmt::Display for BlocksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse {
                source,
                offset,
                message,
            } => write!(f, "parse error at {offset} in `{source}`: {message}"),
            Self::Reference(name) => write!(f, "{name} is not defined"),
            Self::NotCallable(what) => write!(f, "{what} is not a function"),
            Self::Type(message) => write!(f, "type error: {message}"),
            Self::RenderOutsideEach => {
                write!(f, "render() is supported only inside each() templates")
            }
            Self::UnknownExtender(name) => write!(f, "unknown extender `{name}`"),
            Self::Template(message) => write!(f, "template error: {message}"),
        }
    }
}

impl std::error::Error for BlocksError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_identifier() {
        let err = BlocksError::Reference("missing".into());
        assert_eq!(err.to_string(), "missing is not defined");
    }

    #[test]
    fn parse_error_reports_offset() {
        let err = BlocksError::parse("a +", 3, "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "parse error at 3 in `a +`: unexpected end of input"
        );
    }

    #[test]
    fn only_render_outside_each_is_fatal() {
        assert!(BlocksError::RenderOutsideEach.is_fatal());
        assert!(!BlocksError::Reference("x".into()).is_fatal());
        assert!(!BlocksError::Type("x".into()).is_fatal());
    }
}
