//! Name resolution over the files of one package.
//!
//! Nothing is computed up front beyond keeping the trees; the index of
//! top-level labels is built on first use.

use std::sync::Arc;
use std::sync::OnceLock;

use cuels_source::DocumentUri;
use cuels_source::LineIndex;
use cuels_source::Span;
use cuels_syntax::Clause;
use cuels_syntax::Comprehension;
use cuels_syntax::Decl;
use cuels_syntax::Expr;
use cuels_syntax::Ident;
use cuels_syntax::ImportPath;
use cuels_syntax::LabelKind;
use cuels_syntax::Punct;
use cuels_syntax::SourceFile;
use rustc_hash::FxHashMap;
use tower_lsp_server::ls_types::Position;
use tower_lsp_server::ls_types::Range;

use crate::loader::FileImport;
use crate::loader::LoadedFile;

#[derive(Debug)]
pub struct FileDefinitions {
    uri: DocumentUri,
    syntax: Arc<SourceFile>,
    content: Arc<str>,
    line_index: LineIndex,
    imports: Vec<FileImport>,
}

impl FileDefinitions {
    #[must_use]
    pub fn new(
        uri: DocumentUri,
        syntax: Arc<SourceFile>,
        content: Arc<str>,
        imports: Vec<FileImport>,
    ) -> Self {
        Self {
            line_index: LineIndex::new(&content),
            uri,
            syntax,
            content,
            imports,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    #[must_use]
    pub fn syntax(&self) -> &SourceFile {
        &self.syntax
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn imports(&self) -> &[FileImport] {
        &self.imports
    }

    #[must_use]
    pub fn offset(&self, position: Position) -> Option<u32> {
        self.line_index.offset(position, &self.content)
    }

    #[must_use]
    pub fn range(&self, span: Span) -> Range {
        self.line_index.range(span, &self.content)
    }
}

/// A place a name is declared: a field, a `let`, or a package clause.
#[derive(Clone, Copy, Debug)]
pub struct Declaration<'a> {
    pub file: &'a FileDefinitions,
    pub name: &'a str,
    /// The label, or the name of a `let` or package clause.
    pub label: Span,
    pub doc: Option<&'a str>,
    value: Option<&'a Expr>,
}

#[derive(Debug)]
pub enum Resolution<'a> {
    Declarations(Vec<Declaration<'a>>),
    /// The name leads into an imported package; the selectors still have to
    /// be looked up there.
    Import {
        path: ImportPath,
        selectors: Vec<String>,
    },
}

#[derive(Debug)]
pub struct Definitions {
    files: Vec<FileDefinitions>,
    top_level: OnceLock<FxHashMap<String, Vec<(usize, usize)>>>,
}

impl Definitions {
    #[must_use]
    pub fn analyse(files: Vec<FileDefinitions>) -> Self {
        Self {
            files,
            top_level: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn from_loaded(files: &[LoadedFile]) -> Self {
        Self::analyse(
            files
                .iter()
                .map(|file| {
                    FileDefinitions::new(
                        file.uri.clone(),
                        Arc::clone(&file.syntax),
                        Arc::clone(&file.content),
                        file.imports.clone(),
                    )
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn files(&self) -> &[FileDefinitions] {
        &self.files
    }

    #[must_use]
    pub fn file(&self, uri: &DocumentUri) -> Option<&FileDefinitions> {
        self.files.iter().find(|file| file.uri == *uri)
    }

    /// Labels declared at the top level of any file, sorted.
    #[must_use]
    pub fn top_level_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index().keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve whatever sits at `offset` in the file: a label resolves to
    /// every declaration of it in the same scope, a reference to the
    /// declarations it names.
    #[must_use]
    pub fn resolve_at(&self, uri: &DocumentUri, offset: u32) -> Option<Resolution<'_>> {
        let (index, file) = self
            .files
            .iter()
            .enumerate()
            .find(|(_, file)| file.uri == *uri)?;

        if let Some(spec) = file.syntax.imports.iter().find(|spec| spec.span.contains(offset)) {
            let name = spec.local_name();
            let import = file.imports.iter().find(|import| import.name == name)?;
            return Some(Resolution::Import {
                path: import.path.clone(),
                selectors: Vec::new(),
            });
        }

        let site = sites(&file.syntax)
            .into_iter()
            .find(|site| site.span.contains(offset))?;
        Some(self.resolve_site(index, &site))
    }

    /// Visit every reference in the package together with what it resolves
    /// to.
    pub fn for_each_reference(&self, mut f: impl FnMut(&FileDefinitions, Span, Resolution<'_>)) {
        for (index, file) in self.files.iter().enumerate() {
            for site in sites(&file.syntax) {
                if matches!(site.kind, SiteKind::Reference { .. }) {
                    f(file, site.span, self.resolve_site(index, &site));
                }
            }
        }
    }

    /// Follow a path of labels from the top level. An empty path names the
    /// package itself and yields its package clauses.
    #[must_use]
    pub fn lookup_path(&self, selectors: &[String]) -> Vec<Declaration<'_>> {
        let Some((first, rest)) = selectors.split_first() else {
            return self
                .files
                .iter()
                .filter_map(|file| {
                    let clause = file.syntax.package.as_ref()?;
                    Some(Declaration {
                        file,
                        name: &clause.name.name,
                        label: clause.name.span,
                        doc: None,
                        value: None,
                    })
                })
                .collect();
        };
        let mut decls = self.top_level(first);
        for selector in rest {
            decls = fields_of(&decls, selector);
        }
        decls
    }

    fn index(&self) -> &FxHashMap<String, Vec<(usize, usize)>> {
        self.top_level.get_or_init(|| {
            let mut index: FxHashMap<String, Vec<(usize, usize)>> = FxHashMap::default();
            for (file_index, file) in self.files.iter().enumerate() {
                for (decl_index, decl) in file.syntax.decls.iter().enumerate() {
                    if let Some(name) = declared_name(decl) {
                        index
                            .entry(name.to_string())
                            .or_default()
                            .push((file_index, decl_index));
                    }
                }
            }
            index
        })
    }

    fn top_level(&self, name: &str) -> Vec<Declaration<'_>> {
        self.index()
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|&(file_index, decl_index)| {
                let file = &self.files[file_index];
                declaration(file, &file.syntax.decls[decl_index])
            })
            .collect()
    }

    fn resolve_site(&self, index: usize, site: &Site<'_>) -> Resolution<'_> {
        let file = &self.files[index];
        match &site.kind {
            SiteKind::Label(name) => {
                let decls = if site.scopes.len() <= 1 {
                    self.top_level(name)
                } else {
                    site.scopes
                        .last()
                        .map(|scope| named_in(file, scope, name))
                        .unwrap_or_default()
                };
                Resolution::Declarations(decls)
            }
            SiteKind::Reference { root, selectors } => {
                let mut decls = Vec::new();
                for (depth, scope) in site.scopes.iter().enumerate().rev() {
                    decls = if depth == 0 {
                        self.top_level(root)
                    } else {
                        named_in(file, scope, root)
                    };
                    if !decls.is_empty() {
                        break;
                    }
                }
                if decls.is_empty() {
                    if let Some(import) = file.imports.iter().find(|import| import.name == *root) {
                        return Resolution::Import {
                            path: import.path.clone(),
                            selectors: selectors.iter().map(|s| (*s).to_string()).collect(),
                        };
                    }
                }
                for selector in selectors {
                    decls = fields_of(&decls, selector);
                }
                Resolution::Declarations(decls)
            }
        }
    }
}

fn declared_name(decl: &Decl) -> Option<&str> {
    match decl {
        Decl::Field(field) => field.label.name(),
        Decl::Let(clause) => Some(&clause.name.name),
        _ => None,
    }
}

fn declaration<'a>(file: &'a FileDefinitions, decl: &'a Decl) -> Option<Declaration<'a>> {
    match decl {
        Decl::Field(field) => Some(Declaration {
            file,
            name: field.label.name()?,
            label: field.label.span,
            doc: field.doc.as_deref(),
            value: Some(&field.value),
        }),
        Decl::Let(clause) => Some(Declaration {
            file,
            name: &clause.name.name,
            label: clause.name.span,
            doc: None,
            value: Some(&clause.value),
        }),
        _ => None,
    }
}

fn named_in<'a>(file: &'a FileDefinitions, decls: &'a [Decl], name: &str) -> Vec<Declaration<'a>> {
    decls
        .iter()
        .filter(|decl| declared_name(decl) == Some(name))
        .filter_map(|decl| declaration(file, decl))
        .collect()
}

/// Fields named `selector` inside the struct values of `decls`.
fn fields_of<'a>(decls: &[Declaration<'a>], selector: &str) -> Vec<Declaration<'a>> {
    fn structs<'a>(expr: &'a Expr, out: &mut Vec<&'a [Decl]>) {
        match expr {
            Expr::Struct { decls, .. } => out.push(decls),
            Expr::Binary {
                op: Punct::And,
                lhs,
                rhs,
                ..
            } => {
                structs(lhs, out);
                structs(rhs, out);
            }
            Expr::Paren { expr, .. } => structs(expr, out),
            _ => {}
        }
    }

    let mut found = Vec::new();
    for decl in decls {
        let Some(value) = decl.value else {
            continue;
        };
        let mut scopes = Vec::new();
        structs(value, &mut scopes);
        for scope in scopes {
            found.extend(named_in(decl.file, scope, selector));
        }
    }
    found
}

#[derive(Debug)]
enum SiteKind<'a> {
    Label(&'a str),
    Reference {
        root: &'a str,
        selectors: Vec<&'a str>,
    },
}

/// A label or a reference, with the scopes enclosing it, outermost first.
#[derive(Debug)]
struct Site<'a> {
    span: Span,
    kind: SiteKind<'a>,
    scopes: Vec<&'a [Decl]>,
}

fn sites(file: &SourceFile) -> Vec<Site<'_>> {
    let mut collector = SiteCollector::default();
    collector.decls(&file.decls);
    collector.sites
}

#[derive(Default)]
struct SiteCollector<'a> {
    scopes: Vec<&'a [Decl]>,
    sites: Vec<Site<'a>>,
}

impl<'a> SiteCollector<'a> {
    fn push(&mut self, span: Span, kind: SiteKind<'a>) {
        self.sites.push(Site {
            span,
            kind,
            scopes: self.scopes.clone(),
        });
    }

    fn decls(&mut self, decls: &'a [Decl]) {
        self.scopes.push(decls);
        for decl in decls {
            match decl {
                Decl::Field(field) => {
                    if let Some(name) = field.label.name() {
                        self.push(field.label.span, SiteKind::Label(name));
                    }
                    if let LabelKind::Pattern(expr) | LabelKind::Dynamic(expr) = &field.label.kind {
                        self.expr(expr);
                    }
                    self.expr(&field.value);
                }
                Decl::Embed(expr) => self.expr(expr),
                Decl::Let(clause) => {
                    self.push(clause.name.span, SiteKind::Label(&clause.name.name));
                    self.expr(&clause.value);
                }
                Decl::Comprehension(comprehension) => self.comprehension(comprehension),
                Decl::Bad(_) => {}
            }
        }
        self.scopes.pop();
    }

    fn comprehension(&mut self, comprehension: &'a Comprehension) {
        for clause in &comprehension.clauses {
            match clause {
                Clause::For { source, .. } => self.expr(source),
                Clause::If(condition) => self.expr(condition),
                Clause::Let(clause) => self.expr(&clause.value),
            }
        }
        self.expr(&comprehension.body);
    }

    fn expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Ident(ident) => self.push(
                ident.span,
                SiteKind::Reference {
                    root: &ident.name,
                    selectors: Vec::new(),
                },
            ),
            Expr::Selector { base, .. } => match chain(expr) {
                Some((root, selectors)) => {
                    self.push(
                        root.span,
                        SiteKind::Reference {
                            root: &root.name,
                            selectors: Vec::new(),
                        },
                    );
                    for (i, selector) in selectors.iter().enumerate() {
                        self.push(
                            selector.span,
                            SiteKind::Reference {
                                root: &root.name,
                                selectors: selectors[..=i].iter().map(|s| s.name.as_str()).collect(),
                            },
                        );
                    }
                }
                None => self.expr(base),
            },
            Expr::Literal(_) | Expr::Bad(_) => {}
            Expr::Struct { decls, .. } => self.decls(decls),
            Expr::List { elems, .. } => {
                for elem in elems {
                    self.expr(elem);
                }
            }
            Expr::Index { base, index, .. } => {
                self.expr(base);
                self.expr(index);
            }
            Expr::Call { func, args, .. } => {
                self.expr(func);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Unary { expr, .. } | Expr::Paren { expr, .. } => self.expr(expr),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Ellipsis { ty, .. } => {
                if let Some(ty) = ty {
                    self.expr(ty);
                }
            }
            Expr::Comprehension(comprehension) => self.comprehension(comprehension),
        }
    }
}

/// Split `a.b.c` into its root identifier and selectors.
fn chain(expr: &Expr) -> Option<(&Ident, Vec<&Ident>)> {
    match expr {
        Expr::Ident(ident) => Some((ident, Vec::new())),
        Expr::Selector { base, sel, .. } => {
            let (root, mut selectors) = chain(base)?;
            selectors.push(sel);
            Some((root, selectors))
        }
        _ => None,
    }
}
