#![forbid(unsafe_code)]

//! Pratt parser producing the expression AST.
//!
//! The grammar covers what templates actually write: literals, identifiers,
//! member/index access, calls, array and object literals, unary `! - +
//! typeof`, arithmetic, comparison, equality, `&& || ??` and the
//! conditional operator. There is no assignment, no `new` and no function
//! literal.

use crate::BlocksError;
use crate::value::{Value, format_number};

use super::lexer::{Punct, Spanned, Token, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn infix(punct: Punct) -> Option<(Infix, u8)> {
    let op = match punct {
        Punct::Nullish => (Infix::Logical(LogicalOp::Nullish), 1),
        Punct::OrOr => (Infix::Logical(LogicalOp::Or), 2),
        Punct::AndAnd => (Infix::Logical(LogicalOp::And), 3),
        Punct::EqEq => (Infix::Binary(BinaryOp::Eq), 4),
        Punct::NotEq => (Infix::Binary(BinaryOp::NotEq), 4),
        Punct::EqEqEq => (Infix::Binary(BinaryOp::StrictEq), 4),
        Punct::NotEqEq => (Infix::Binary(BinaryOp::StrictNotEq), 4),
        Punct::Lt => (Infix::Binary(BinaryOp::Lt), 5),
        Punct::Gt => (Infix::Binary(BinaryOp::Gt), 5),
        Punct::Le => (Infix::Binary(BinaryOp::Le), 5),
        Punct::Ge => (Infix::Binary(BinaryOp::Ge), 5),
        Punct::Plus => (Infix::Binary(BinaryOp::Add), 6),
        Punct::Minus => (Infix::Binary(BinaryOp::Sub), 6),
        Punct::Star => (Infix::Binary(BinaryOp::Mul), 7),
        Punct::Slash => (Infix::Binary(BinaryOp::Div), 7),
        Punct::Percent => (Infix::Binary(BinaryOp::Rem), 7),
        _ => return None,
    };
    Some(op)
}

/// Parse `source` as a single expression.
pub(crate) fn parse(source: &str) -> Result<Expr, BlocksError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let expr = parser.conditional()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        _ => Err(parser.error("unexpected token after expression")),
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map_or(&Token::Eof, |spanned| &spanned.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |spanned| spanned.offset)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if *self.peek() == Token::Punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: Punct, what: &str) -> Result<(), BlocksError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn error(&self, message: &str) -> BlocksError {
        let message = if matches!(self.peek(), Token::Eof) {
            format!("{message}, found end of input")
        } else {
            message.to_owned()
        };
        BlocksError::parse(self.source, self.offset(), message)
    }

    fn conditional(&mut self) -> Result<Expr, BlocksError> {
        let test = self.binary(0)?;
        if !self.eat(Punct::Question) {
            return Ok(test);
        }
        let then = self.conditional()?;
        self.expect(Punct::Colon, "`:`")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn binary(&mut self, min_power: u8) -> Result<Expr, BlocksError> {
        let mut lhs = self.unary()?;
        loop {
            let Token::Punct(punct) = *self.peek() else {
                break;
            };
            let Some((op, power)) = infix(punct) else {
                break;
            };
            if power <= min_power {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(power)?;
            lhs = match op {
                Infix::Binary(op) => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
                Infix::Logical(op) => Expr::Logical(op, Box::new(lhs), Box::new(rhs)),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, BlocksError> {
        let op = match self.peek() {
            Token::Punct(Punct::Bang) => UnaryOp::Not,
            Token::Punct(Punct::Minus) => UnaryOp::Neg,
            Token::Punct(Punct::Plus) => UnaryOp::Plus,
            Token::Ident(name) if name == "typeof" => UnaryOp::TypeOf,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, BlocksError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(Punct::Dot) {
                let Token::Ident(name) = self.advance() else {
                    self.pos -= 1;
                    return Err(self.error("expected property name"));
                };
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat(Punct::LBracket) {
                let index = self.conditional()?;
                self.expect(Punct::RBracket, "`]`")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(Punct::LParen) {
                let args = self.list(Punct::RParen)?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn list(&mut self, close: Punct) -> Result<Vec<Expr>, BlocksError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.conditional()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(Punct::Comma, "`,`")?;
            // Trailing comma.
            if self.eat(close) {
                return Ok(items);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, BlocksError> {
        let offset = self.offset();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::from(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "undefined" => Expr::Literal(Value::Undefined),
                "this" => Expr::Ident("$this".to_owned()),
                _ => Expr::Ident(name),
            }),
            Token::Punct(Punct::LParen) => {
                let inner = self.conditional()?;
                self.expect(Punct::RParen, "`)`")?;
                Ok(inner)
            }
            Token::Punct(Punct::LBracket) => Ok(Expr::Array(self.list(Punct::RBracket)?)),
            Token::Punct(Punct::LBrace) => self.object(),
            Token::Eof => Err(BlocksError::parse(
                self.source,
                offset,
                "unexpected end of input",
            )),
            Token::Punct(_) => Err(BlocksError::parse(self.source, offset, "unexpected token")),
        }
    }

    fn object(&mut self) -> Result<Expr, BlocksError> {
        let mut entries = Vec::new();
        if self.eat(Punct::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = match self.advance() {
                Token::Ident(name) => name,
                Token::Str(text) => text,
                Token::Number(n) => format_number(n),
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected property key"));
                }
            };
            self.expect(Punct::Colon, "`:`")?;
            let value = self.conditional()?;
            entries.push((key, value));
            if self.eat(Punct::RBrace) {
                return Ok(Expr::Object(entries));
            }
            self.expect(Punct::Comma, "`,`")?;
            if self.eat(Punct::RBrace) {
                return Ok(Expr::Object(entries));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(source: &str) -> String {
        fn walk(expr: &Expr) -> String {
            match expr {
                Expr::Literal(v) => format!("{v:?}"),
                Expr::Ident(name) => name.clone(),
                Expr::Array(items) => {
                    format!("[{}]", items.iter().map(walk).collect::<Vec<_>>().join(" "))
                }
                Expr::Object(entries) => format!(
                    "{{{}}}",
                    entries
                        .iter()
                        .map(|(k, v)| format!("{k}:{}", walk(v)))
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
                Expr::Member(obj, name) => format!("{}.{name}", walk(obj)),
                Expr::Index(obj, index) => format!("{}[{}]", walk(obj), walk(index)),
                Expr::Call(callee, args) => format!(
                    "{}({})",
                    walk(callee),
                    args.iter().map(walk).collect::<Vec<_>>().join(" ")
                ),
                Expr::Unary(op, operand) => format!("({op:?} {})", walk(operand)),
                Expr::Binary(op, l, r) => format!("({op:?} {} {})", walk(l), walk(r)),
                Expr::Logical(op, l, r) => format!("({op:?} {} {})", walk(l), walk(r)),
                Expr::Conditional(t, a, b) => {
                    format!("(? {} {} {})", walk(t), walk(a), walk(b))
                }
            }
        }
        walk(&parse(source).expect("parse"))
    }

    #[test]
    fn precedence() {
        assert_eq!(shape("1 + 2 * 3"), "(Add 1 (Mul 2 3))");
        assert_eq!(shape("a - b - c"), "(Sub (Sub a b) c)");
        assert_eq!(shape("a || b && c"), "(Or a (And b c))");
        assert_eq!(shape("a < b == c"), "(Eq (Lt a b) c)");
    }

    #[test]
    fn conditional_is_right_associative() {
        assert_eq!(shape("a ? b : c ? d : e"), "(? a b (? c d e))");
    }

    #[test]
    fn postfix_chains() {
        assert_eq!(shape("user.name.toUpperCase()"), "user.name.toUpperCase()");
        assert_eq!(shape("items[0].title"), "items[0].title");
        assert_eq!(shape("f(a, b)(c)"), "f(a b)(c)");
    }

    #[test]
    fn literals() {
        assert_eq!(shape("{text: 'a,b', 'value': id, 2: x}"), r#"{text:"a,b" value:id 2:x}"#);
        assert_eq!(shape("[1, 'two',]"), r#"[1 "two"]"#);
        assert_eq!(shape("!true"), "(Not true)");
        assert_eq!(shape("typeof x"), "(TypeOf x)");
        assert_eq!(shape("this.a"), "$this.a");
    }

    #[test]
    fn errors_carry_offsets() {
        let err = parse("a +").expect_err("incomplete");
        assert!(matches!(err, BlocksError::Parse { offset: 3, .. }));
        assert!(parse("a b").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("a.").is_err());
    }
}
