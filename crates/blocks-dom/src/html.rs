#![forbid(unsafe_code)]

//! HTML fragment parsing and serialization.
//!
//! The parser is a forgiving fragment parser, not a full HTML5 tree builder.
//! It handles comments, start/end tags, quoted and bare attributes, void
//! elements, self-closing syntax, raw-text elements (`script`, `style`) and
//! escapable raw text (`textarea`, `title`), entity decoding, and the
//! implicit end tags templates commonly rely on (`li`, `option`, `p`, table
//! rows and cells). Doctype and processing instructions are skipped.
//!
//! Unmatched end tags are ignored. Unterminated comments run to the end of
//! input.

use indexmap::IndexMap;

use crate::document::Document;
use crate::node::{NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "footer", "form", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "nav", "ol", "p", "pre", "section", "table",
    "ul",
];

/// Whether `tag` never has children or an end tag.
#[must_use]
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn is_raw_text(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

fn is_escapable_raw_text(tag: &str) -> bool {
    matches!(tag, "textarea" | "title")
}

/// Escape text content: `&`, `<`, `>`.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape an attribute value for double-quoted output: `&`, `"`.
#[must_use]
pub fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Decode the named entities templates produce plus numeric references.
/// Unknown entities are left untouched.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&candidate[1..end]).map(|ch| (ch, end + 1)));
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &candidate[consumed..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

// ---------------------------------------------------------------------------
// Inline style
// ---------------------------------------------------------------------------

pub(crate) fn parse_style(text: &str) -> IndexMap<String, String> {
    let mut style = IndexMap::new();
    for declaration in text.split(';') {
        if let Some((name, value)) = declaration.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            if !name.is_empty() && !value.is_empty() {
                style.insert(name, value.to_owned());
            }
        }
    }
    style
}

pub(crate) fn serialize_style(style: &IndexMap<String, String>) -> String {
    style
        .iter()
        .map(|(name, value)| format!("{name}: {value};"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct StartTag {
    name: String,
    attributes: Vec<(String, String)>,
    self_closing: bool,
}

struct TreeBuilder<'a> {
    doc: &'a Document,
    /// Open elements; index 0 is the insertion root and is never popped.
    stack: Vec<NodeId>,
}

impl TreeBuilder<'_> {
    fn current(&self) -> NodeId {
        self.stack[self.stack.len() - 1]
    }

    fn current_tag(&self) -> Option<String> {
        (self.stack.len() > 1).then(|| self.doc.tag_name(self.current()))
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(last) = self.doc.last_child(parent)
            && self.doc.kind(last) == Some(NodeKind::Text)
        {
            let mut merged = self.doc.node_value(last).unwrap_or_default();
            merged.push_str(text);
            self.doc.set_node_value(last, &merged);
            return;
        }
        let node = self.doc.create_text_node(text);
        self.doc.append_child(parent, node);
    }

    fn comment(&mut self, text: &str) {
        let node = self.doc.create_comment(text);
        self.doc.append_child(self.current(), node);
    }

    fn open(&mut self, tag: StartTag) -> NodeId {
        while let Some(open) = self.current_tag() {
            if implicitly_closes(&open, &tag.name) {
                self.stack.pop();
            } else {
                break;
            }
        }
        let node = self.doc.create_element(&tag.name);
        for (name, value) in &tag.attributes {
            self.doc.set_attribute(node, name, value);
        }
        self.doc.append_child(self.current(), node);
        if !tag.self_closing && !is_void_element(&tag.name) {
            self.stack.push(node);
        }
        node
    }

    fn close(&mut self, name: &str) {
        let position = self
            .stack
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find(|(_, node)| self.doc.tag_name(**node) == name)
            .map(|(i, _)| i);
        if let Some(i) = position {
            self.stack.truncate(i);
        }
    }
}

fn implicitly_closes(open: &str, incoming: &str) -> bool {
    match open {
        "li" => incoming == "li",
        "option" => matches!(incoming, "option" | "optgroup"),
        "p" => BLOCK_ELEMENTS.contains(&incoming),
        "td" | "th" => matches!(incoming, "td" | "th" | "tr" | "tbody" | "thead" | "tfoot"),
        "tr" => matches!(incoming, "tr" | "tbody" | "thead" | "tfoot"),
        "dt" | "dd" => matches!(incoming, "dt" | "dd"),
        _ => false,
    }
}

/// Parse `input` and append the resulting nodes to `parent`.
pub(crate) fn parse_into(doc: &Document, parent: NodeId, input: &str) {
    let mut builder = TreeBuilder {
        doc,
        stack: vec![parent],
    };
    let mut rest = input;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<!--") {
            let (text, next) = match after.find("-->") {
                Some(end) => (&after[..end], &after[end + 3..]),
                None => (after, ""),
            };
            builder.comment(text);
            rest = next;
        } else if let Some(after) = rest.strip_prefix("</") {
            let end = after.find('>').unwrap_or(after.len());
            let name = after[..end].trim().to_ascii_lowercase();
            builder.close(&name);
            rest = after.get(end + 1..).unwrap_or("");
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map_or(rest.len(), |e| e + 1);
            rest = &rest[end..];
        } else if starts_tag(rest) {
            let (tag, consumed) = parse_start_tag(&rest[1..]);
            rest = &rest[1 + consumed..];
            let name = tag.name.clone();
            let self_closing = tag.self_closing;
            let node = builder.open(tag);
            if !self_closing && (is_raw_text(&name) || is_escapable_raw_text(&name)) {
                let lower = rest.to_ascii_lowercase();
                let close = format!("</{name}");
                let (body, next) = match lower.find(&close) {
                    Some(end) => {
                        let after_close = rest[end..].find('>').map_or(rest.len(), |g| end + g + 1);
                        (&rest[..end], &rest[after_close..])
                    }
                    None => (rest, ""),
                };
                if !body.is_empty() {
                    let text = if is_raw_text(&name) {
                        body.to_owned()
                    } else {
                        decode_entities(body)
                    };
                    let text_node = doc.create_text_node(&text);
                    doc.append_child(node, text_node);
                }
                builder.stack.pop();
                rest = next;
            }
        } else {
            let end = next_markup(rest);
            builder.text(&decode_entities(&rest[..end]));
            rest = &rest[end..];
        }
    }
}

fn starts_tag(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() > 1 && bytes[0] == b'<' && bytes[1].is_ascii_alphabetic()
}

/// Byte offset of the next markup start after the first character.
fn next_markup(s: &str) -> usize {
    s.match_indices('<')
        .map(|(i, _)| i)
        .filter(|i| *i > 0)
        .find(|i| {
            s.as_bytes()
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'))
        })
        .unwrap_or(s.len())
}

/// Parse a start tag body (after `<`). Returns the tag and bytes consumed,
/// including the closing `>`.
fn parse_start_tag(s: &str) -> (StartTag, usize) {
    let bytes = s.as_bytes();
    let len = bytes.len();
    let is_space = |b: u8| b.is_ascii_whitespace();
    let mut i = 0;
    while i < len && !is_space(bytes[i]) && bytes[i] != b'/' && bytes[i] != b'>' {
        i += 1;
    }
    let mut tag = StartTag {
        name: s[..i].to_ascii_lowercase(),
        attributes: Vec::new(),
        self_closing: false,
    };
    loop {
        while i < len && is_space(bytes[i]) {
            i += 1;
        }
        if i >= len {
            break;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                tag.self_closing = bytes.get(i + 1) == Some(&b'>');
                i += 1;
                continue;
            }
            _ => {}
        }
        let start = i;
        while i < len && !is_space(bytes[i]) && !matches!(bytes[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        let name = s[start..i].to_ascii_lowercase();
        if name.is_empty() {
            i += 1;
            continue;
        }
        while i < len && is_space(bytes[i]) {
            i += 1;
        }
        let mut value = String::new();
        if i < len && bytes[i] == b'=' {
            i += 1;
            while i < len && is_space(bytes[i]) {
                i += 1;
            }
            if i < len && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let start = i;
                while i < len && bytes[i] != quote {
                    i += 1;
                }
                value = decode_entities(&s[start..i]);
                i = (i + 1).min(len);
            } else {
                let start = i;
                while i < len && !is_space(bytes[i]) && bytes[i] != b'>' {
                    i += 1;
                }
                value = decode_entities(&s[start..i]);
            }
        }
        tag.self_closing = false;
        if !tag.attributes.iter().any(|(existing, _)| *existing == name) {
            tag.attributes.push((name, value));
        }
    }
    (tag, i)
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

pub(crate) fn serialize(doc: &Document, node: NodeId, out: &mut String) {
    match doc.kind(node) {
        Some(NodeKind::Element) => {
            let tag = doc.tag_name(node);
            out.push('<');
            out.push_str(&tag);
            for (name, value) in doc.attributes(node) {
                out.push(' ');
                out.push_str(&name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(&value));
                out.push('"');
            }
            out.push('>');
            if is_void_element(&tag) {
                return;
            }
            if is_raw_text(&tag) {
                out.push_str(&doc.text_content(node));
            } else {
                for child in doc.children(node) {
                    serialize(doc, child, out);
                }
            }
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        Some(NodeKind::Text) => {
            out.push_str(&escape_text(&doc.node_value(node).unwrap_or_default()));
        }
        Some(NodeKind::Comment) => {
            out.push_str("<!--");
            out.push_str(&doc.node_value(node).unwrap_or_default());
            out.push_str("-->");
        }
        Some(NodeKind::Fragment | NodeKind::Document) => {
            for child in doc.children(node) {
                serialize(doc, child, out);
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(markup: &str) -> String {
        let doc = Document::new();
        let fragment = doc.parse_fragment(markup);
        doc.inner_html(fragment)
    }

    #[test]
    fn parses_nested_elements_and_text() {
        assert_eq!(
            round_trip("<div class=\"a\"><span>hi</span> there</div>"),
            "<div class=\"a\"><span>hi</span> there</div>"
        );
    }

    #[test]
    fn comments_are_preserved() {
        assert_eq!(
            round_trip("<!-- 1:blocks each(items) --><li>x</li><!-- 1:/blocks -->"),
            "<!-- 1:blocks each(items) --><li>x</li><!-- 1:/blocks -->"
        );
    }

    #[test]
    fn attribute_forms() {
        let doc = Document::new();
        let fragment = doc.parse_fragment("<input type=checkbox checked data-query='val(x)'>");
        let input = doc.first_child(fragment).expect("input");
        assert_eq!(doc.get_attribute(input, "type").as_deref(), Some("checkbox"));
        assert_eq!(doc.get_attribute(input, "checked").as_deref(), Some(""));
        assert_eq!(doc.get_attribute(input, "data-query").as_deref(), Some("val(x)"));
        assert_eq!(doc.child_count(fragment), 1);
    }

    #[test]
    fn void_and_self_closing_tags_have_no_children() {
        assert_eq!(round_trip("<br><img src=\"a\"/><p>x</p>"), "<br><img src=\"a\"><p>x</p>");
        assert_eq!(round_trip("<div/>text"), "<div></div>text");
    }

    #[test]
    fn entities_decode_in_text_and_escape_on_output() {
        let doc = Document::new();
        let fragment = doc.parse_fragment("a &amp; b &lt;c&gt; &#39;d&#x27; &unknown;");
        assert_eq!(doc.text_content(fragment), "a & b <c> 'd' &unknown;");
        assert_eq!(doc.inner_html(fragment), "a &amp; b &lt;c&gt; 'd' &amp;unknown;");
    }

    #[test]
    fn raw_text_elements_keep_markup() {
        let doc = Document::new();
        let fragment = doc.parse_fragment("<script>if (a < b) { x = '<i>'; }</script><i>after</i>");
        let script = doc.first_child(fragment).expect("script");
        assert_eq!(doc.text_content(script), "if (a < b) { x = '<i>'; }");
        assert_eq!(doc.child_count(fragment), 2);
    }

    #[test]
    fn textarea_decodes_entities() {
        let doc = Document::new();
        let fragment = doc.parse_fragment("<textarea>a &amp; <b></textarea>");
        let area = doc.first_child(fragment).expect("textarea");
        assert_eq!(doc.value(area), "a & <b>");
    }

    #[test]
    fn implicit_end_tags() {
        assert_eq!(
            round_trip("<ul><li>a<li>b</ul>"),
            "<ul><li>a</li><li>b</li></ul>"
        );
        assert_eq!(
            round_trip("<select><option>a<option>b</select>"),
            "<select><option>a</option><option>b</option></select>"
        );
        assert_eq!(
            round_trip("<table><tr><td>1<td>2<tr><td>3</table>"),
            "<table><tr><td>1</td><td>2</td></tr><tr><td>3</td></tr></table>"
        );
    }

    #[test]
    fn stray_end_tags_and_doctype_are_ignored() {
        assert_eq!(round_trip("<!DOCTYPE html></span><b>x</b>"), "<b>x</b>");
    }

    #[test]
    fn lone_angle_bracket_is_text() {
        let doc = Document::new();
        let fragment = doc.parse_fragment("1 < 2 <b>y</b>");
        assert_eq!(doc.text_content(fragment), "1 < 2 y");
    }

    proptest! {
        #[test]
        fn parser_never_panics(input in "\\PC{0,64}") {
            let doc = Document::new();
            let fragment = doc.parse_fragment(&input);
            let _ = doc.inner_html(fragment);
        }

        #[test]
        fn escaped_text_round_trips(text in "[a-z<>&\" ]{0,32}") {
            let doc = Document::new();
            let fragment = doc.parse_fragment(&escape_text(&text));
            prop_assert_eq!(doc.text_content(fragment), text);
        }
    }
}
