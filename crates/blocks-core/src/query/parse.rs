#![forbid(unsafe_code)]

//! Query pipeline parser.
//!
//! A single left-to-right scan. Quotes (with backslash escapes) and
//! `[]`/`{}` nesting are tracked so commas and parentheses inside string,
//! array and object literals stay within their parameter.

use super::QueryCall;

/// Parse `name(p1, p2), other(...)` into calls.
///
/// Calls may be separated by `,` or `.`; text outside parentheses that is
/// not followed by `(` is ignored. Empty parameters are dropped and
/// quotes around a method name are trimmed.
#[must_use]
pub fn parse_query(query: &str) -> Vec<QueryCall> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut literal_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0usize;
    let mut name: Option<String> = None;
    let mut params = Vec::new();

    for (i, ch) in query.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '[' | '{' => literal_depth += 1,
            ']' | '}' => literal_depth = literal_depth.saturating_sub(1),
            _ if literal_depth > 0 => {}
            '(' => {
                if depth == 0 {
                    name = Some(trim_quotes(query[start..i].trim()).to_owned());
                    start = i + 1;
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    push_param(&mut params, &query[start..i]);
                    if let Some(name) = name.take().filter(|n| !n.is_empty()) {
                        calls.push(QueryCall::new(name, std::mem::take(&mut params)));
                    }
                    params.clear();
                    start = i + 1;
                }
            }
            ',' if depth == 1 => {
                push_param(&mut params, &query[start..i]);
                start = i + 1;
            }
            ',' | '.' if depth == 0 => start = i + 1,
            _ => {}
        }
    }
    calls
}

fn push_param(params: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        params.push(text.to_owned());
    }
}

fn trim_quotes(text: &str) -> &str {
    text.trim_matches(|c| c == '\'' || c == '"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names_and_params(query: &str) -> Vec<(String, Vec<String>)> {
        parse_query(query)
            .into_iter()
            .map(|call| (call.name, call.params))
            .collect()
    }

    #[test]
    fn parses_a_pipeline() {
        assert_eq!(
            names_and_params("each(items), click(handler)"),
            vec![
                ("each".to_owned(), vec!["items".to_owned()]),
                ("click".to_owned(), vec!["handler".to_owned()]),
            ]
        );
    }

    #[test]
    fn literal_commas_stay_in_their_parameter() {
        let calls = parse_query("options(data, {text:'a,b', value:'id'})");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, vec!["data", "{text:'a,b', value:'id'}"]);

        let calls = parse_query("attr('title', [1, 2].join(', '))");
        assert_eq!(calls[0].params, vec!["'title'", "[1, 2].join(', ')"]);
    }

    #[test]
    fn nested_calls_and_conditionals() {
        let calls = parse_query("if(ok, setClass('a'), setClass('b')).text(name)");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "if");
        assert_eq!(calls[0].params, vec!["ok", "setClass('a')", "setClass('b')"]);
        assert_eq!(calls[1].name, "text");
    }

    #[test]
    fn quoted_parens_and_escapes() {
        let calls = parse_query(r"text('a) \' b'), html(x)");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].params, vec![r"'a) \' b'"]);
        assert_eq!(calls[0].query, r"text('a) \' b')");
    }

    #[test]
    fn empty_parameters_and_quoted_names() {
        let calls = parse_query(r#""focused"( , ok, )"#);
        assert_eq!(calls[0].name, "focused");
        assert_eq!(calls[0].params, vec!["ok"]);
        assert!(parse_query("").is_empty());
        assert!(parse_query("nothing here").is_empty());
    }

    proptest! {
        #[test]
        fn parsing_is_deterministic(query in "[a-z(),'\\[\\]{} ]{0,40}") {
            prop_assert_eq!(parse_query(&query), parse_query(&query));
        }

        #[test]
        fn simple_pipelines_round_trip(
            calls in proptest::collection::vec(("[a-z]{1,8}", proptest::collection::vec("[a-z0-9]{1,6}", 0..4)), 1..5)
        ) {
            let text = calls
                .iter()
                .map(|(name, params)| format!("{name}({})", params.join(", ")))
                .collect::<Vec<_>>()
                .join(", ");
            let parsed = names_and_params(&text);
            prop_assert_eq!(parsed, calls);
        }
    }
}
