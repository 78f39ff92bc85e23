#![forbid(unsafe_code)]

//! Tokenizer for template expressions.

use crate::BlocksError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    AndAnd,
    OrOr,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) offset: usize,
}

/// Longest operators first so `===` is not read as `==` `=`.
const OPERATORS: &[(&str, Punct)] = &[
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::Le),
    (">=", Punct::Ge),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::Nullish),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    (".", Punct::Dot),
    (",", Punct::Comma),
    (":", Punct::Colon),
    ("?", Punct::Question),
    ("!", Punct::Bang),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, BlocksError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch.is_ascii_digit()
            || (ch == '.' && source[offset + 1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            let (number, end) = scan_number(source, offset)?;
            tokens.push(Spanned {
                token: Token::Number(number),
                offset,
            });
            while chars.peek().is_some_and(|(i, _)| *i < end) {
                chars.next();
            }
            continue;
        }

        if ch == '\'' || ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    c if c == ch => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, 'r')) => text.push('\r'),
                        Some((_, '0')) => text.push('\0'),
                        Some((_, other)) => text.push(other),
                        None => break,
                    },
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(BlocksError::parse(source, offset, "unterminated string"));
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                offset,
            });
            continue;
        }

        if is_ident_start(ch) {
            let mut end = offset;
            while let Some(&(i, c)) = chars.peek() {
                if !is_ident_continue(c) {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            tokens.push(Spanned {
                token: Token::Ident(source[offset..end].to_owned()),
                offset,
            });
            continue;
        }

        let rest = &source[offset..];
        let Some((text, punct)) = OPERATORS.iter().find(|(text, _)| rest.starts_with(text)) else {
            return Err(BlocksError::parse(
                source,
                offset,
                format!("unexpected character `{ch}`"),
            ));
        };
        for _ in 0..text.len() {
            chars.next();
        }
        tokens.push(Spanned {
            token: Token::Punct(*punct),
            offset,
        });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn scan_number(source: &str, start: usize) -> Result<(f64, usize), BlocksError> {
    let bytes = source.as_bytes();
    let rest = &source[start..];
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        let digits = hex.bytes().take_while(u8::is_ascii_hexdigit).count();
        let end = start + 2 + digits;
        return u64::from_str_radix(&source[start + 2..end], 16)
            .map(|v| (v as f64, end))
            .map_err(|_| BlocksError::parse(source, start, "invalid hex literal"));
    }

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        }
    }
    source[start..end]
        .parse::<f64>()
        .map(|n| (n, end))
        .map_err(|_| BlocksError::parse(source, start, "invalid number literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn operators_prefer_the_longest_match() {
        assert_eq!(
            kinds("a === b"),
            vec![
                Token::Ident("a".into()),
                Token::Punct(Punct::EqEqEq),
                Token::Ident("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn strings_handle_both_quotes_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a,b""#),
            vec![Token::Str("it's".into()), Token::Str("a,b".into()), Token::Eof]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1 2.5 .5 1e3 0x10"),
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::Number(16.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn dollar_identifiers() {
        assert_eq!(
            kinds("$this.name"),
            vec![
                Token::Ident("$this".into()),
                Token::Punct(Punct::Dot),
                Token::Ident("name".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_offset() {
        let err = tokenize("x + 'abc").expect_err("unterminated");
        assert!(matches!(err, BlocksError::Parse { offset: 4, .. }));
    }

    #[test]
    fn lone_equals_is_rejected() {
        assert!(tokenize("a = 1").is_err());
    }
}
