//! The token definition for the expert query language.

use std::borrow::Cow;
use std::fmt;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords
    And,     // "AND"
    Or,      // "OR"
    Not,     // "NOT"
    In,      // "IN"
    Between, // "BETWEEN"

    // Literals
    Identifier(&'a str),
    /// The unescaped content of a quoted string, without quotes.
    String(Cow<'a, str>),
    /// The raw digits of a number, e.g. `12` or `3.5`.
    Number(&'a str),

    // Punctuation
    LParen, // (
    RParen, // )
    Comma,  // ,
    At,     // @
    Plus,   // +
    Dash,   // -

    // Operators
    Eq,    // =
    NotEq, // !=
    Gt,    // >
    Lt,    // <
    Gte,   // >=
    Lte,   // <=

    // Special
    UnterminatedString,
    Illegal(char),
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::And => f.write_str("AND"),
            TokenKind::Or => f.write_str("OR"),
            TokenKind::Not => f.write_str("NOT"),
            TokenKind::In => f.write_str("IN"),
            TokenKind::Between => f.write_str("BETWEEN"),
            TokenKind::Identifier(name) => write!(f, "`{name}`"),
            TokenKind::String(value) => write!(f, "string \"{value}\""),
            TokenKind::Number(raw) => write!(f, "number {raw}"),
            TokenKind::LParen => f.write_str("`(`"),
            TokenKind::RParen => f.write_str("`)`"),
            TokenKind::Comma => f.write_str("`,`"),
            TokenKind::At => f.write_str("`@`"),
            TokenKind::Plus => f.write_str("`+`"),
            TokenKind::Dash => f.write_str("`-`"),
            TokenKind::Eq => f.write_str("`=`"),
            TokenKind::NotEq => f.write_str("`!=`"),
            TokenKind::Gt => f.write_str("`>`"),
            TokenKind::Lt => f.write_str("`<`"),
            TokenKind::Gte => f.write_str("`>=`"),
            TokenKind::Lte => f.write_str("`<=`"),
            TokenKind::UnterminatedString => f.write_str("unterminated string"),
            TokenKind::Illegal(c) => write!(f, "illegal character `{c}`"),
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// An empty span sitting at `offset`, used for end of input.
    pub fn at(offset: usize) -> Self {
        Self { start: offset, end: offset }
    }
}
