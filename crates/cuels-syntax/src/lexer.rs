use cuels_source::Span;

use crate::tokens::Comment;
use crate::tokens::Punct;
use crate::tokens::Token;
use crate::tokens::TokenKind;

pub(crate) struct Lexer<'a> {
    source: &'a str,
    start: usize,
    current: usize,
    newline_pending: bool,
    comments: Vec<Comment>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Lexer {
            source,
            start: 0,
            current: 0,
            newline_pending: false,
            comments: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> (Vec<Token>, Vec<Comment>) {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();
            self.start = self.current;

            if self.is_at_end() {
                tokens.push(self.make(TokenKind::Eof));
                break;
            }

            let kind = self.next_kind();
            tokens.push(self.make(kind));
        }

        (tokens, self.comments)
    }

    fn make(&mut self, kind: TokenKind) -> Token {
        let token = Token {
            kind,
            span: Span::from_bounds(self.start, self.current),
            newline_before: self.newline_pending,
        };
        self.newline_pending = false;
        token
    }

    fn skip_trivia(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                '\n' => {
                    self.newline_pending = true;
                    self.consume();
                }
                c if c.is_whitespace() => self.consume(),
                '/' if self.peek_next() == '/' => {
                    let start = self.current;
                    while !self.is_at_end() && self.peek() != '\n' {
                        self.consume();
                    }
                    self.comments.push(Comment {
                        span: Span::from_bounds(start, self.current),
                        text: self.source[start + 2..self.current].to_string(),
                    });
                }
                _ => break,
            }
        }
    }

    fn next_kind(&mut self) -> TokenKind {
        let c = self.peek();
        match c {
            '"' | '\'' => self.lex_string(0),
            '#' if matches!(self.peek_next(), '"' | '#') => {
                let mut hashes = 0;
                while self.peek() == '#' {
                    hashes += 1;
                    self.consume();
                }
                if matches!(self.peek(), '"' | '\'') {
                    self.lex_string(hashes)
                } else {
                    TokenKind::Error("unexpected '#'".to_string())
                }
            }
            '_' if self.rest().starts_with("_|_") => {
                self.consume_n(3);
                TokenKind::Bottom
            }
            c if c.is_ascii_digit() => self.lex_number(),
            '.' if self.peek_next().is_ascii_digit() => self.lex_number(),
            c if is_ident_start(c) => self.lex_ident(),
            '#' => {
                self.consume();
                if is_ident_start(self.peek()) {
                    self.lex_ident()
                } else {
                    TokenKind::Error("unexpected '#'".to_string())
                }
            }
            _ => self.lex_punct(),
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        while !self.is_at_end() && is_ident_continue(self.peek()) {
            self.consume();
        }
        TokenKind::Ident(self.source[self.start..self.current].to_string())
    }

    fn lex_number(&mut self) -> TokenKind {
        while !self.is_at_end() {
            let c = self.peek();
            if c.is_ascii_alphanumeric() || c == '_' {
                let exponent = matches!(c, 'e' | 'E')
                    && !self.source[self.start..self.current].starts_with("0x");
                self.consume();
                if exponent && matches!(self.peek(), '+' | '-') {
                    self.consume();
                }
            } else if c == '.' && self.peek_next().is_ascii_digit() {
                self.consume();
            } else {
                break;
            }
        }
        TokenKind::Number(self.source[self.start..self.current].to_string())
    }

    /// Lex a string or bytes literal whose opening quote is at the cursor.
    /// `hashes` counts the `#` characters of a raw string prefix.
    fn lex_string(&mut self, hashes: usize) -> TokenKind {
        let quote = self.peek();
        let multiline = self.rest().starts_with(if quote == '"' { "\"\"\"" } else { "'''" });
        let delimiter = if multiline {
            quote.to_string().repeat(3)
        } else {
            quote.to_string()
        };
        let closing = format!("{delimiter}{}", "#".repeat(hashes));
        self.consume_n(delimiter.len());

        let escape = format!("\\{}", "#".repeat(hashes));
        let mut value = String::new();
        let mut interpolation_depth = 0usize;
        let mut nested_quote = false;

        while !self.is_at_end() {
            if interpolation_depth == 0 && self.rest().starts_with(&closing) {
                self.consume_n(closing.len());
                return TokenKind::String(if multiline {
                    strip_multiline(&value)
                } else {
                    value
                });
            }

            let c = self.peek();
            if c == '\n' && !multiline {
                break;
            }

            if interpolation_depth > 0 {
                match c {
                    '"' => nested_quote = !nested_quote,
                    '(' if !nested_quote => interpolation_depth += 1,
                    ')' if !nested_quote => interpolation_depth -= 1,
                    _ => {}
                }
                value.push(c);
                self.consume();
                continue;
            }

            if self.rest().starts_with(&escape) {
                self.consume_n(escape.len());
                let escaped = self.peek();
                self.consume();
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '(' => {
                        interpolation_depth = 1;
                        value.push_str("\\(");
                    }
                    'u' => match self.lex_unicode_escape() {
                        Some(decoded) => value.push(decoded),
                        None => value.push_str("\\u"),
                    },
                    other => value.push(other),
                }
                continue;
            }

            value.push(c);
            self.consume();
        }

        TokenKind::Error("string literal not terminated".to_string())
    }

    fn lex_unicode_escape(&mut self) -> Option<char> {
        let digits = self.rest().get(..4)?;
        let code = u32::from_str_radix(digits, 16).ok()?;
        let decoded = char::from_u32(code)?;
        self.consume_n(4);
        Some(decoded)
    }

    fn lex_punct(&mut self) -> TokenKind {
        const PUNCTS: &[(&str, Punct)] = &[
            ("...", Punct::Ellipsis),
            ("||", Punct::LogicalOr),
            ("&&", Punct::LogicalAnd),
            ("==", Punct::Eq),
            ("!=", Punct::NotEq),
            ("<=", Punct::LessEq),
            (">=", Punct::GreaterEq),
            ("=~", Punct::Match),
            ("!~", Punct::NotMatch),
            ("{", Punct::LBrace),
            ("}", Punct::RBrace),
            ("[", Punct::LBrack),
            ("]", Punct::RBrack),
            ("(", Punct::LParen),
            (")", Punct::RParen),
            (":", Punct::Colon),
            (",", Punct::Comma),
            (".", Punct::Dot),
            ("=", Punct::Assign),
            ("?", Punct::Question),
            ("!", Punct::Bang),
            ("@", Punct::At),
            ("|", Punct::Or),
            ("&", Punct::And),
            ("<", Punct::Less),
            (">", Punct::Greater),
            ("+", Punct::Plus),
            ("-", Punct::Minus),
            ("*", Punct::Star),
            ("/", Punct::Slash),
        ];

        for (text, punct) in PUNCTS {
            if self.rest().starts_with(text) {
                self.consume_n(text.len());
                return TokenKind::Punct(*punct);
            }
        }

        let c = self.peek();
        self.consume();
        TokenKind::Error(format!("illegal character {c:?}"))
    }

    fn rest(&self) -> &'a str {
        &self.source[self.current..]
    }

    fn peek(&self) -> char {
        self.rest().chars().next().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next().unwrap_or('\0')
    }

    fn consume(&mut self) {
        if let Some(c) = self.rest().chars().next() {
            self.current += c.len_utf8();
        }
    }

    fn consume_n(&mut self, bytes: usize) {
        self.current = (self.current + bytes).min(self.source.len());
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Multi-line strings drop the newline after the opening quotes and the
/// indentation of the closing line.
fn strip_multiline(raw: &str) -> String {
    let body = raw.strip_prefix('\n').unwrap_or(raw);
    let Some(last_newline) = body.rfind('\n') else {
        return body.to_string();
    };
    let indent = &body[last_newline + 1..];
    if !indent.chars().all(char::is_whitespace) {
        return body.to_string();
    }
    body[..last_newline]
        .lines()
        .map(|line| line.strip_prefix(indent).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}
