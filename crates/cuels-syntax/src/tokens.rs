use std::fmt;

use cuels_source::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Punct {
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
    Ellipsis,
    Assign,
    Question,
    Bang,
    At,
    Or,
    And,
    LogicalOr,
    LogicalAnd,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Match,
    NotMatch,
    Plus,
    Minus,
    Star,
    Slash,
}

impl Punct {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBrack => "[",
            Punct::RBrack => "]",
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::Colon => ":",
            Punct::Comma => ",",
            Punct::Dot => ".",
            Punct::Ellipsis => "...",
            Punct::Assign => "=",
            Punct::Question => "?",
            Punct::Bang => "!",
            Punct::At => "@",
            Punct::Or => "|",
            Punct::And => "&",
            Punct::LogicalOr => "||",
            Punct::LogicalAnd => "&&",
            Punct::Eq => "==",
            Punct::NotEq => "!=",
            Punct::Less => "<",
            Punct::LessEq => "<=",
            Punct::Greater => ">",
            Punct::GreaterEq => ">=",
            Punct::Match => "=~",
            Punct::NotMatch => "!~",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
        }
    }

    /// Binding power of a binary operator; `None` for tokens that cannot
    /// join two operands.
    pub(crate) fn binary_precedence(self) -> Option<u8> {
        let precedence = match self {
            Punct::Or => 1,
            Punct::And => 2,
            Punct::LogicalOr => 3,
            Punct::LogicalAnd => 4,
            Punct::Eq
            | Punct::NotEq
            | Punct::Less
            | Punct::LessEq
            | Punct::Greater
            | Punct::GreaterEq
            | Punct::Match
            | Punct::NotMatch => 5,
            Punct::Plus | Punct::Minus => 6,
            Punct::Star | Punct::Slash => 7,
            _ => return None,
        };
        Some(precedence)
    }

    pub(crate) fn is_unary(self) -> bool {
        matches!(
            self,
            Punct::Plus
                | Punct::Minus
                | Punct::Bang
                | Punct::Star
                | Punct::Less
                | Punct::LessEq
                | Punct::Greater
                | Punct::GreaterEq
                | Punct::NotEq
                | Punct::Match
                | Punct::NotMatch
        )
    }
}

impl fmt::Display for Punct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    /// Identifiers and keywords, including `#Definition`, `_hidden` and `$x`.
    Ident(String),
    /// Decoded string or bytes literal.
    String(String),
    Number(String),
    /// `_|_`
    Bottom,
    Punct(Punct),
    Error(String),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Set when a newline separates this token from the previous one. Newlines
    /// terminate declarations and list elements like commas do.
    pub newline_before: bool,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(name) => format!("identifier {name}"),
            TokenKind::String(_) => "string literal".to_string(),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Bottom => "_|_".to_string(),
            TokenKind::Punct(p) => format!("'{p}'"),
            TokenKind::Error(_) => "invalid token".to_string(),
            TokenKind::Eof => "EOF".to_string(),
        }
    }

    pub(crate) fn is_punct(&self, punct: Punct) -> bool {
        self.kind == TokenKind::Punct(punct)
    }

    pub(crate) fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    pub span: Span,
    /// Comment text without the leading `//`.
    pub text: String,
}
