use cuels_source::Span;

pub use crate::tokens::Comment;
use crate::tokens::Punct;

/// A parsed `.cue` file. Declarations are empty when the file was parsed in
/// imports-only mode.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFile {
    pub filename: String,
    pub span: Span,
    pub package: Option<PackageClause>,
    pub imports: Vec<ImportSpec>,
    pub decls: Vec<Decl>,
    pub comments: Vec<Comment>,
}

impl SourceFile {
    /// The declared package name. A missing clause and the anonymous `_`
    /// package both report `None`.
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        let name = self.package.as_ref()?.name.name.as_str();
        (!name.is_empty() && name != "_").then_some(name)
    }

    /// Visit every node span in pre-order, starting with the file itself.
    /// Returning `false` from `visit` skips the node's children.
    pub fn walk(&self, visit: &mut dyn FnMut(Span) -> bool) {
        if !visit(self.span) {
            return;
        }
        if let Some(package) = &self.package {
            if visit(package.span) {
                visit(package.name.span);
            }
        }
        for import in &self.imports {
            if visit(import.span) {
                if let Some(alias) = &import.alias {
                    visit(alias.span);
                }
                visit(import.path_span);
            }
        }
        for decl in &self.decls {
            decl.walk(visit);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PackageClause {
    pub name: Ident,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportSpec {
    pub alias: Option<Ident>,
    /// Import path as written, with quotes removed.
    pub path: String,
    pub path_span: Span,
    pub span: Span,
}

impl ImportSpec {
    /// The identifier the import is referenced by: the alias when present,
    /// else the qualifier of the path.
    #[must_use]
    pub fn local_name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.name.clone(),
            None => crate::ImportPath::parse(&self.path).qualifier,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
    Field(Field),
    Embed(Expr),
    Let(LetClause),
    Comprehension(Comprehension),
    Bad(Span),
}

impl Decl {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Decl::Field(field) => field.span,
            Decl::Embed(expr) => expr.span(),
            Decl::Let(clause) => clause.span,
            Decl::Comprehension(comprehension) => comprehension.span,
            Decl::Bad(span) => *span,
        }
    }

    fn walk(&self, visit: &mut dyn FnMut(Span) -> bool) {
        if !visit(self.span()) {
            return;
        }
        match self {
            Decl::Field(field) => {
                if visit(field.label.span) {
                    if let LabelKind::Pattern(expr) | LabelKind::Dynamic(expr) = &field.label.kind
                    {
                        expr.walk(visit);
                    }
                }
                field.value.walk(visit);
            }
            Decl::Embed(expr) => expr.walk(visit),
            Decl::Let(clause) => {
                visit(clause.name.span);
                clause.value.walk(visit);
            }
            Decl::Comprehension(comprehension) => comprehension.walk(visit),
            Decl::Bad(_) => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub label: Label,
    /// `?` or `!` after the label.
    pub constraint: Option<Punct>,
    pub value: Expr,
    /// Text of the comment block directly above the field.
    pub doc: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub kind: LabelKind,
    pub span: Span,
}

impl Label {
    /// The static name of the label, if it has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            LabelKind::Ident(name) | LabelKind::String(name) => Some(name),
            LabelKind::Pattern(_) | LabelKind::Dynamic(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LabelKind {
    Ident(String),
    String(String),
    /// `[expr]: value`
    Pattern(Box<Expr>),
    /// `(expr): value`
    Dynamic(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LetClause {
    pub name: Ident,
    pub value: Expr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comprehension {
    pub clauses: Vec<Clause>,
    pub body: Box<Expr>,
    pub span: Span,
}

impl Comprehension {
    fn walk(&self, visit: &mut dyn FnMut(Span) -> bool) {
        for clause in &self.clauses {
            match clause {
                Clause::For { key, value, source } => {
                    if let Some(key) = key {
                        visit(key.span);
                    }
                    visit(value.span);
                    source.walk(visit);
                }
                Clause::If(condition) => condition.walk(visit),
                Clause::Let(clause) => {
                    visit(clause.name.span);
                    clause.value.walk(visit);
                }
            }
        }
        self.body.walk(visit);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    For {
        key: Option<Ident>,
        value: Ident,
        source: Expr,
    },
    If(Expr),
    Let(LetClause),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiteralKind {
    String,
    Number,
    Bool,
    Null,
    Bottom,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Literal {
    pub kind: LiteralKind,
    pub value: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Ident(Ident),
    Literal(Literal),
    Struct {
        decls: Vec<Decl>,
        span: Span,
    },
    List {
        elems: Vec<Expr>,
        span: Span,
    },
    Selector {
        base: Box<Expr>,
        sel: Ident,
        span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Unary {
        op: Punct,
        expr: Box<Expr>,
        span: Span,
    },
    Binary {
        op: Punct,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Paren {
        expr: Box<Expr>,
        span: Span,
    },
    /// `...` or `...T` inside a list or struct.
    Ellipsis {
        ty: Option<Box<Expr>>,
        span: Span,
    },
    Comprehension(Box<Comprehension>),
    Bad(Span),
}

impl Expr {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Expr::Ident(ident) => ident.span,
            Expr::Literal(literal) => literal.span,
            Expr::Comprehension(comprehension) => comprehension.span,
            Expr::Bad(span)
            | Expr::Struct { span, .. }
            | Expr::List { span, .. }
            | Expr::Selector { span, .. }
            | Expr::Index { span, .. }
            | Expr::Call { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Paren { span, .. }
            | Expr::Ellipsis { span, .. } => *span,
        }
    }

    /// The string value of a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Literal(Literal {
                kind: LiteralKind::String,
                value,
                ..
            }) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn walk(&self, visit: &mut dyn FnMut(Span) -> bool) {
        if !visit(self.span()) {
            return;
        }
        match self {
            Expr::Ident(_) | Expr::Literal(_) | Expr::Bad(_) => {}
            Expr::Struct { decls, .. } => {
                for decl in decls {
                    decl.walk(visit);
                }
            }
            Expr::List { elems, .. } => {
                for elem in elems {
                    elem.walk(visit);
                }
            }
            Expr::Selector { base, sel, .. } => {
                base.walk(visit);
                visit(sel.span);
            }
            Expr::Index { base, index, .. } => {
                base.walk(visit);
                index.walk(visit);
            }
            Expr::Call { func, args, .. } => {
                func.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Unary { expr, .. } | Expr::Paren { expr, .. } => expr.walk(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Ellipsis { ty, .. } => {
                if let Some(ty) = ty {
                    ty.walk(visit);
                }
            }
            Expr::Comprehension(comprehension) => comprehension.walk(visit),
        }
    }
}
