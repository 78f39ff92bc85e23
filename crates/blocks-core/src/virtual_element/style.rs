#![forbid(unsafe_code)]

//! Inline style helpers: property name casing, unit suffixes and parsing of
//! `style="..."` attribute text.

use crate::value::{Value, format_number};

/// Properties that take a bare number.
const UNITLESS: &[&str] = &[
    "columnCount",
    "fillOpacity",
    "flexGrow",
    "flexShrink",
    "fontWeight",
    "lineHeight",
    "opacity",
    "order",
    "orphans",
    "widows",
    "zIndex",
    "zoom",
];

/// `font-size` -> `fontSize`.
pub(crate) fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for ch in name.trim().chars() {
        if ch == '-' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `fontSize` -> `font-size`.
pub(crate) fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Render `value` for `property`, adding `px` to bare numbers where the
/// property expects a length.
pub(crate) fn to_unit(property: &str, value: &Value) -> String {
    match value {
        Value::Number(n) if !UNITLESS.contains(&property) => format!("{}px", format_number(*n)),
        other => other.to_template_string(),
    }
}

/// Parse `color: red; font-size: 2px` into camel-cased pairs.
pub(crate) fn parse(text: &str) -> Vec<(String, String)> {
    text.split(';')
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((camel_case(name), value.trim().to_owned()))
        })
        .collect()
}
