#![forbid(unsafe_code)]

//! The debug channel.
//!
//! Soft failures (an expression that throws, a query name nobody registered,
//! a parameter that does not evaluate) are reported here instead of being
//! returned. Every event carries an `event` field naming its kind and is
//! emitted under this module's target (`blocks_core::debug`), at `warn`
//! level when [`RuntimeConfig::debug`](crate::RuntimeConfig::debug) is set
//! and at `debug` level otherwise.

use crate::BlocksError;
use crate::elements::ElementId;

macro_rules! channel {
    ($loud:expr, $($rest:tt)+) => {
        if $loud {
            tracing::warn!($($rest)+);
        } else {
            tracing::debug!($($rest)+);
        }
    };
}

pub(crate) fn expression_fail(loud: bool, expression: &str, error: &BlocksError) {
    channel!(
        loud,
        event = "expression_fail",
        expression,
        error = %error,
        "expression evaluation failed"
    );
}

pub(crate) fn query_not_exists(loud: bool, name: &str, query: &str) {
    channel!(
        loud,
        event = "query_not_exists",
        name,
        query,
        "query is not registered"
    );
}

pub(crate) fn query_parameter_fail(loud: bool, query: &str, parameter: &str, error: &BlocksError) {
    channel!(
        loud,
        event = "query_parameter_fail",
        query,
        parameter,
        error = %error,
        "query parameter failed to evaluate"
    );
}

pub(crate) fn comment_unsupported(loud: bool, name: &str) {
    channel!(
        loud,
        event = "comment_unsupported",
        name,
        "query cannot run on a comment block"
    );
}

pub(crate) fn query_summary(loud: bool, element: ElementId, query: &str, calls: usize) {
    channel!(
        loud,
        event = "query_summary",
        element,
        query,
        calls,
        "element query planned"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn events_carry_their_kind() {
        query_not_exists(false, "nope", "nope(1)");
        assert!(logs_contain("query_not_exists"));
        assert!(logs_contain("nope(1)"));
    }

    #[traced_test]
    #[test]
    fn loud_mode_reports_at_warn() {
        expression_fail(true, "a.b", &BlocksError::Reference("a".into()));
        assert!(logs_contain("WARN"));
        assert!(logs_contain("expression_fail"));
    }
}
