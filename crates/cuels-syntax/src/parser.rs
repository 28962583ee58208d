use cuels_source::Span;

use crate::ast::Clause;
use crate::ast::Comprehension;
use crate::ast::Decl;
use crate::ast::Expr;
use crate::ast::Field;
use crate::ast::Ident;
use crate::ast::ImportSpec;
use crate::ast::Label;
use crate::ast::LabelKind;
use crate::ast::LetClause;
use crate::ast::Literal;
use crate::ast::LiteralKind;
use crate::ast::PackageClause;
use crate::ast::SourceFile;
use crate::lexer::Lexer;
use crate::tokens::Comment;
use crate::tokens::Punct;
use crate::tokens::Token;
use crate::tokens::TokenKind;
use crate::SyntaxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParseMode {
    /// Parse the whole file.
    Full,
    /// Stop after the package clause and import declarations.
    ImportsOnly,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParseOutput {
    pub file: SourceFile,
    pub errors: Vec<SyntaxError>,
}

impl ParseOutput {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse `source`, recovering from errors. A tree is always produced; it
/// may be partial when `errors` is non-empty.
#[must_use]
pub fn parse(filename: &str, source: &str, mode: ParseMode) -> ParseOutput {
    let (tokens, comments) = Lexer::new(source).tokenize();
    let mut parser = Parser {
        source,
        tokens,
        comments,
        current: 0,
        errors: Vec::new(),
    };

    let package = parser.parse_package_clause();
    let imports = parser.parse_imports();
    let decls = match mode {
        ParseMode::Full => parser.parse_decls(None),
        ParseMode::ImportsOnly => Vec::new(),
    };

    let file = SourceFile {
        filename: filename.to_string(),
        span: Span::from_bounds(0, source.len()),
        package,
        imports,
        decls,
        comments: std::mem::take(&mut parser.comments),
    };

    ParseOutput {
        file,
        errors: parser.errors,
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    comments: Vec<Comment>,
    current: usize,
    errors: Vec<SyntaxError>,
}

impl Parser<'_> {
    fn parse_package_clause(&mut self) -> Option<PackageClause> {
        while self.at(Punct::At) {
            self.skip_attribute();
        }

        if self.peek().ident() != Some("package") || self.peek_at(1).ident().is_none() {
            return None;
        }

        let keyword = self.advance().span;
        let name_token = self.advance();
        let name = Ident {
            name: name_token.ident().unwrap_or_default().to_string(),
            span: name_token.span,
        };
        let span = keyword.cover(name.span);
        self.expect_separator("after package clause");
        Some(PackageClause { name, span })
    }

    fn parse_imports(&mut self) -> Vec<ImportSpec> {
        let mut imports = Vec::new();

        while self.peek().ident() == Some("import")
            && !self.is_label_end(1)
            && !self.peek_at(1).newline_before
        {
            let keyword = self.advance().span;
            if self.at(Punct::LParen) {
                self.advance();
                while !self.at(Punct::RParen) && !self.is_at_end() {
                    let before = self.current;
                    if let Some(spec) = self.parse_import_spec(None) {
                        imports.push(spec);
                    }
                    if self.at(Punct::Comma) {
                        self.advance();
                    } else if !self.at(Punct::RParen) && !self.peek().newline_before {
                        self.error_at_current("expected ',' or ')' in import list");
                        self.synchronize();
                    }
                    if self.current == before {
                        self.advance();
                    }
                }
                self.expect(Punct::RParen, "to close import list");
            } else if let Some(spec) = self.parse_import_spec(Some(keyword)) {
                imports.push(spec);
            }
            self.expect_separator("after import declaration");
        }

        imports
    }

    fn parse_import_spec(&mut self, keyword: Option<Span>) -> Option<ImportSpec> {
        let alias = match &self.peek().kind {
            TokenKind::Ident(name) => {
                let alias = Ident {
                    name: name.clone(),
                    span: self.peek().span,
                };
                self.advance();
                Some(alias)
            }
            _ => None,
        };

        let token = self.peek().clone();
        let TokenKind::String(path) = token.kind else {
            self.error_at_current(format!("expected import path, found {}", token.describe()));
            return None;
        };
        self.advance();

        let start = keyword
            .or(alias.as_ref().map(|alias| alias.span))
            .unwrap_or(token.span);
        Some(ImportSpec {
            alias,
            path,
            path_span: token.span,
            span: start.cover(token.span),
        })
    }

    /// Parse declarations until EOF or the given closing token, which is left
    /// unconsumed.
    fn parse_decls(&mut self, closing: Option<Punct>) -> Vec<Decl> {
        let mut decls = Vec::new();

        loop {
            if self.is_at_end() || closing.is_some_and(|punct| self.at(punct)) {
                break;
            }
            if self.at(Punct::At) {
                self.skip_attribute();
                continue;
            }

            let before = self.current;
            decls.push(self.parse_decl());

            if self.at(Punct::Comma) {
                self.advance();
            } else if !(self.is_at_end()
                || closing.is_some_and(|punct| self.at(punct))
                || self.peek().newline_before)
            {
                let found = self.peek().describe();
                self.error_at_current(format!("missing ',' in struct literal, found {found}"));
                self.synchronize();
            }

            if self.current == before {
                self.advance();
            }
        }

        decls
    }

    fn parse_decl(&mut self) -> Decl {
        let keyword = self.peek().ident().map(str::to_string);
        match keyword.as_deref() {
            Some("let")
                if self.peek_at(1).ident().is_some()
                    && self.peek_at(2).is_punct(Punct::Assign) =>
            {
                Decl::Let(self.parse_let_clause())
            }
            Some("for" | "if") if !self.is_label_end(1) => {
                Decl::Comprehension(self.parse_comprehension())
            }
            _ => {
                let expr = self.parse_expr();
                if self.is_label_end(0) {
                    Decl::Field(self.finish_field(expr))
                } else {
                    Decl::Embed(expr)
                }
            }
        }
    }

    /// Having parsed the label expression, parse the optional marker, the
    /// colon and the value.
    fn finish_field(&mut self, label_expr: Expr) -> Field {
        let label = self.to_label(label_expr);
        let constraint = match &self.peek().kind {
            TokenKind::Punct(punct @ (Punct::Question | Punct::Bang)) => {
                let punct = *punct;
                self.advance();
                Some(punct)
            }
            _ => None,
        };
        self.expect(Punct::Colon, "after label");

        let value = self.parse_field_value();
        while self.at(Punct::At) && !self.peek().newline_before {
            self.skip_attribute();
        }

        let doc = self.doc_comment(label.span.start());
        Field {
            span: label.span.cover(value.span()),
            label,
            constraint,
            value,
            doc,
        }
    }

    /// `a: b: c` nests `b: c` inside an implicit struct.
    fn parse_field_value(&mut self) -> Expr {
        let expr = self.parse_expr();
        if self.is_label_end(0) {
            let field = self.finish_field(expr);
            let span = field.span;
            Expr::Struct {
                decls: vec![Decl::Field(field)],
                span,
            }
        } else {
            expr
        }
    }

    fn to_label(&mut self, expr: Expr) -> Label {
        let span = expr.span();
        let kind = match expr {
            Expr::Ident(ident) => LabelKind::Ident(ident.name),
            Expr::Literal(Literal {
                kind: LiteralKind::String,
                value,
                ..
            }) => LabelKind::String(value),
            Expr::List { mut elems, .. } if elems.len() == 1 => {
                LabelKind::Pattern(Box::new(elems.remove(0)))
            }
            Expr::Paren { expr, .. } => LabelKind::Dynamic(expr),
            other => {
                self.error(span, "invalid label");
                LabelKind::Dynamic(Box::new(other))
            }
        };
        Label { kind, span }
    }

    fn parse_let_clause(&mut self) -> LetClause {
        let keyword = self.advance().span;
        let name_token = self.advance();
        let name = Ident {
            name: name_token.ident().unwrap_or_default().to_string(),
            span: name_token.span,
        };
        self.expect(Punct::Assign, "in let clause");
        let value = self.parse_expr();
        LetClause {
            span: keyword.cover(value.span()),
            name,
            value,
        }
    }

    fn parse_comprehension(&mut self) -> Comprehension {
        let start = self.peek().span;
        let mut clauses = Vec::new();

        loop {
            match self.peek().ident() {
                Some("for") => {
                    self.advance();
                    let first = self.parse_ident("in for clause");
                    let (key, value) = if self.at(Punct::Comma) {
                        self.advance();
                        (Some(first), self.parse_ident("in for clause"))
                    } else {
                        (None, first)
                    };
                    if self.peek().ident() == Some("in") {
                        self.advance();
                    } else {
                        self.error_at_current("expected 'in' in for clause");
                    }
                    let source = self.parse_expr();
                    clauses.push(Clause::For { key, value, source });
                }
                Some("if") => {
                    self.advance();
                    clauses.push(Clause::If(self.parse_expr()));
                }
                Some("let") if !clauses.is_empty() => {
                    clauses.push(Clause::Let(self.parse_let_clause()));
                }
                _ => break,
            }
        }

        let body = if self.at(Punct::LBrace) {
            self.parse_operand()
        } else {
            self.error_at_current("expected '{' after comprehension clauses");
            Expr::Bad(self.peek().span)
        };

        Comprehension {
            span: start.cover(body.span()),
            clauses,
            body: Box::new(body),
        }
    }

    fn parse_ident(&mut self, context: &str) -> Ident {
        let token = self.peek().clone();
        if let TokenKind::Ident(name) = token.kind {
            self.advance();
            Ident {
                name,
                span: token.span,
            }
        } else {
            self.error_at_current(format!(
                "expected identifier {context}, found {}",
                token.describe()
            ));
            Ident {
                name: String::new(),
                span: token.span,
            }
        }
    }

    fn parse_expr(&mut self) -> Expr {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Expr {
        let mut lhs = self.parse_unary();

        loop {
            let token = self.peek();
            let TokenKind::Punct(op) = token.kind else {
                break;
            };
            let Some(precedence) = op.binary_precedence() else {
                break;
            };
            if precedence < min_precedence || token.newline_before {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(precedence + 1);
            lhs = Expr::Binary {
                span: lhs.span().cover(rhs.span()),
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        if let TokenKind::Punct(op) = self.peek().kind {
            if op.is_unary() {
                let start = self.advance().span;
                let expr = self.parse_unary();
                return Expr::Unary {
                    span: start.cover(expr.span()),
                    op,
                    expr: Box::new(expr),
                };
            }
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_operand();

        loop {
            let token = self.peek();
            if token.newline_before {
                break;
            }
            match token.kind {
                TokenKind::Punct(Punct::Dot) => {
                    self.advance();
                    let sel = self.parse_selector();
                    expr = Expr::Selector {
                        span: expr.span().cover(sel.span),
                        base: Box::new(expr),
                        sel,
                    };
                }
                TokenKind::Punct(Punct::LBrack) => {
                    self.advance();
                    let index = self.parse_expr();
                    let end = self.expect(Punct::RBrack, "to close index").unwrap_or(index.span());
                    expr = Expr::Index {
                        span: expr.span().cover(end),
                        base: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Punct(Punct::LParen) => {
                    self.advance();
                    let (args, end) = self.parse_list_elements(Punct::RParen);
                    expr = Expr::Call {
                        span: expr.span().cover(end),
                        func: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }

        expr
    }

    fn parse_selector(&mut self) -> Ident {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) | TokenKind::String(name) => {
                self.advance();
                Ident {
                    name,
                    span: token.span,
                }
            }
            _ => {
                self.error_at_current(format!(
                    "expected selector, found {}",
                    token.describe()
                ));
                Ident {
                    name: String::new(),
                    span: token.span,
                }
            }
        }
    }

    fn parse_operand(&mut self) -> Expr {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                let literal = |kind, value: &str| {
                    Expr::Literal(Literal {
                        kind,
                        value: value.to_string(),
                        span: token.span,
                    })
                };
                match name.as_str() {
                    "true" | "false" => literal(LiteralKind::Bool, &name),
                    "null" => literal(LiteralKind::Null, &name),
                    _ => Expr::Ident(Ident {
                        name,
                        span: token.span,
                    }),
                }
            }
            TokenKind::String(value) => {
                self.advance();
                Expr::Literal(Literal {
                    kind: LiteralKind::String,
                    value,
                    span: token.span,
                })
            }
            TokenKind::Number(value) => {
                self.advance();
                Expr::Literal(Literal {
                    kind: LiteralKind::Number,
                    value,
                    span: token.span,
                })
            }
            TokenKind::Bottom => {
                self.advance();
                Expr::Literal(Literal {
                    kind: LiteralKind::Bottom,
                    value: "_|_".to_string(),
                    span: token.span,
                })
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                let decls = self.parse_decls(Some(Punct::RBrace));
                let end = self
                    .expect(Punct::RBrace, "to close struct literal")
                    .unwrap_or(self.previous_span());
                Expr::Struct {
                    decls,
                    span: token.span.cover(end),
                }
            }
            TokenKind::Punct(Punct::LBrack) => {
                self.advance();
                let (elems, end) = self.parse_list_elements(Punct::RBrack);
                Expr::List {
                    elems,
                    span: token.span.cover(end),
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.parse_expr();
                let end = self
                    .expect(Punct::RParen, "to close parenthesized expression")
                    .unwrap_or(expr.span());
                Expr::Paren {
                    span: token.span.cover(end),
                    expr: Box::new(expr),
                }
            }
            TokenKind::Punct(Punct::Ellipsis) => {
                self.advance();
                let next = self.peek();
                let ty = if next.newline_before || !starts_operand(next) {
                    None
                } else {
                    Some(Box::new(self.parse_unary()))
                };
                let span = ty
                    .as_ref()
                    .map_or(token.span, |ty| token.span.cover(ty.span()));
                Expr::Ellipsis { ty, span }
            }
            TokenKind::Error(message) => {
                self.advance();
                self.error(token.span, message);
                Expr::Bad(token.span)
            }
            TokenKind::Punct(
                Punct::RBrace | Punct::RBrack | Punct::RParen | Punct::Comma,
            )
            | TokenKind::Eof => {
                self.error(
                    token.span,
                    format!("expected operand, found {}", token.describe()),
                );
                Expr::Bad(token.span)
            }
            TokenKind::Punct(_) => {
                self.advance();
                self.error(
                    token.span,
                    format!("expected operand, found {}", token.describe()),
                );
                Expr::Bad(token.span)
            }
        }
    }

    /// Parse comma or newline separated elements up to `closing`, returning
    /// them with the span of the closing token.
    fn parse_list_elements(&mut self, closing: Punct) -> (Vec<Expr>, Span) {
        let mut elems = Vec::new();

        while !self.at(closing) && !self.is_at_end() {
            let before = self.current;
            let elem = match self.peek().ident() {
                Some("for" | "if") => {
                    Expr::Comprehension(Box::new(self.parse_comprehension()))
                }
                _ => self.parse_expr(),
            };
            elems.push(elem);

            if self.at(Punct::Comma) {
                self.advance();
            } else if !self.at(closing) && !self.peek().newline_before {
                let found = self.peek().describe();
                self.error_at_current(format!("missing ',' before {found}"));
                self.synchronize();
            }

            if self.current == before {
                self.advance();
            }
        }

        let end = self
            .expect(closing, "to close list")
            .unwrap_or(self.previous_span());
        (elems, end)
    }

    /// Skip an `@name(...)` attribute.
    fn skip_attribute(&mut self) {
        self.advance();
        if self.peek().ident().is_some() && !self.peek().newline_before {
            self.advance();
        }
        if !self.at(Punct::LParen) {
            return;
        }
        let mut depth = 0usize;
        while !self.is_at_end() {
            match self.advance().kind {
                TokenKind::Punct(Punct::LParen) => depth += 1,
                TokenKind::Punct(Punct::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Collect the comment lines directly above `start`, stopping at a blank
    /// line or at a comment that trails code.
    fn doc_comment(&self, start: u32) -> Option<String> {
        let end = self
            .comments
            .partition_point(|comment| comment.span.end() <= start);
        let mut lines = Vec::new();
        let mut next_start = start as usize;

        for comment in self.comments[..end].iter().rev() {
            let gap = &self.source[comment.span.end() as usize..next_start];
            if gap.matches('\n').count() != 1 || !gap.trim().is_empty() {
                break;
            }
            let line_start = self.source[..comment.span.start() as usize]
                .rfind('\n')
                .map_or(0, |idx| idx + 1);
            if !self.source[line_start..comment.span.start() as usize]
                .trim()
                .is_empty()
            {
                break;
            }
            lines.push(comment.text.strip_prefix(' ').unwrap_or(&comment.text));
            next_start = comment.span.start() as usize;
        }

        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        Some(lines.join("\n"))
    }

    /// Skip ahead to the start of the next declaration: past a comma, or to a
    /// token on a new line, or to a closing bracket of the enclosing level.
    fn synchronize(&mut self) {
        let start = self.current;
        let mut depth = 0usize;

        loop {
            let token = self.peek();
            if depth == 0 && token.newline_before && self.current > start {
                return;
            }
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Punct(Punct::LBrace | Punct::LBrack | Punct::LParen) => depth += 1,
                TokenKind::Punct(Punct::RBrace | Punct::RBrack | Punct::RParen) => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                TokenKind::Punct(Punct::Comma) if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn expect_separator(&mut self, context: &str) {
        if self.at(Punct::Comma) {
            self.advance();
        } else if !self.is_at_end() && !self.peek().newline_before {
            let found = self.peek().describe();
            self.error_at_current(format!("expected ';' or newline {context}, found {found}"));
            self.synchronize();
        }
    }

    fn expect(&mut self, punct: Punct, context: &str) -> Option<Span> {
        if self.at(punct) {
            return Some(self.advance().span);
        }
        let found = self.peek().describe();
        self.error_at_current(format!("expected '{punct}' {context}, found {found}"));
        None
    }

    /// Whether the token at `offset` ends a label: `:`, `?:` or `!:`.
    fn is_label_end(&self, offset: usize) -> bool {
        let token = self.peek_at(offset);
        token.is_punct(Punct::Colon)
            || ((token.is_punct(Punct::Question) || token.is_punct(Punct::Bang))
                && self.peek_at(offset + 1).is_punct(Punct::Colon))
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        let span = self.peek().span;
        self.error(span, message);
    }

    /// Record an error; a second error at the same offset is dropped.
    fn error(&mut self, span: Span, message: impl Into<String>) {
        if self
            .errors
            .last()
            .is_some_and(|last| last.span.start() == span.start())
        {
            return;
        }
        self.errors.push(SyntaxError::new(span, message));
    }

    fn at(&self, punct: Punct) -> bool {
        self.peek().is_punct(punct)
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.current + offset).min(last)]
    }

    fn previous_span(&self) -> Span {
        self.current
            .checked_sub(1)
            .map_or(Span::default(), |idx| self.tokens[idx].span)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }
}

fn starts_operand(token: &Token) -> bool {
    match token.kind {
        TokenKind::Ident(_)
        | TokenKind::String(_)
        | TokenKind::Number(_)
        | TokenKind::Bottom => true,
        TokenKind::Punct(punct) => {
            matches!(punct, Punct::LBrace | Punct::LBrack | Punct::LParen) || punct.is_unary()
        }
        TokenKind::Error(_) | TokenKind::Eof => false,
    }
}
