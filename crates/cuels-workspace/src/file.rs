//! Per-file state kept for editor features: the current syntax tree, the
//! errors each owner reported against the file, and whether the client has
//! seen those errors yet.
//!
//! A record lives only while the file is open in the editor or some owner
//! still refers to it.

use std::sync::Arc;

use cuels_source::DocumentUri;
use cuels_source::LineIndex;
use cuels_source::Span;
use cuels_syntax::Decl;
use cuels_syntax::Expr;
use cuels_syntax::ImportPath;
use cuels_syntax::SourceFile;
use cuels_syntax::SyntaxError;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use tower_lsp_server::ls_types::Diagnostic;
use tower_lsp_server::ls_types::DiagnosticSeverity;
use tower_lsp_server::ls_types::DocumentSymbol;
use tower_lsp_server::ls_types::Range;
use tower_lsp_server::ls_types::SymbolKind;

use crate::DiagnosticsSink;

/// Something that loaded a file and may report errors against it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    /// A module, keyed by its root directory.
    Module(DocumentUri),
    Package(ImportPath),
    Standalone(DocumentUri),
}

/// An error reported against a file. Errors without an offset cover the
/// whole file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileError {
    pub offset: Option<u32>,
    pub message: String,
}

impl FileError {
    #[must_use]
    pub fn new(offset: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

impl From<&SyntaxError> for FileError {
    fn from(error: &SyntaxError) -> Self {
        Self::new(Some(error.span.start()), error.message.clone())
    }
}

#[derive(Debug)]
pub struct FileRecord {
    uri: DocumentUri,
    is_open: bool,
    version: Option<i32>,
    syntax: Option<Arc<SourceFile>>,
    content: Arc<str>,
    line_index: LineIndex,
    symbols: Option<Arc<[DocumentSymbol]>>,
    owners: Vec<(Owner, Vec<FileError>)>,
    dirty_errors: bool,
}

impl FileRecord {
    fn new(uri: DocumentUri) -> Self {
        Self {
            uri,
            is_open: false,
            version: None,
            syntax: None,
            content: Arc::from(""),
            line_index: LineIndex::new(""),
            symbols: None,
            owners: Vec::new(),
            dirty_errors: false,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    #[must_use]
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    #[must_use]
    pub fn syntax(&self) -> Option<&Arc<SourceFile>> {
        self.syntax.as_ref()
    }

    #[must_use]
    pub fn content(&self) -> &Arc<str> {
        &self.content
    }

    #[must_use]
    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    pub fn owners(&self) -> impl Iterator<Item = &Owner> {
        self.owners.iter().map(|(owner, _)| owner)
    }

    /// Errors from every owner, with duplicates reported by several owners
    /// collapsed.
    pub fn errors(&self) -> impl Iterator<Item = &FileError> {
        self.owners
            .iter()
            .flat_map(|(_, errors)| errors.iter())
            .unique()
    }

    #[must_use]
    pub fn has_unpublished_errors(&self) -> bool {
        self.dirty_errors
    }

    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors()
            .map(|error| Diagnostic {
                range: self.error_range(error.offset),
                severity: Some(DiagnosticSeverity::ERROR),
                source: Some("cue".to_string()),
                message: error.message.clone(),
                ..Default::default()
            })
            .collect()
    }

    fn error_range(&self, offset: Option<u32>) -> Range {
        let whole = Span::from_bounds(0, self.content.len());
        let span = match (offset, self.syntax.as_deref()) {
            (Some(offset), Some(syntax)) => token_range(syntax, offset),
            (Some(offset), None) => Span::new(offset, 0),
            (None, _) => whole,
        };
        self.line_index.range(span, &self.content)
    }
}

/// The span to underline for an error at `offset`: the smallest node
/// containing it, or when only the file itself contains it, the nearest node
/// starting after it.
fn token_range(syntax: &SourceFile, offset: u32) -> Span {
    let mut best = syntax.span;
    if !best.contains(offset) {
        return best;
    }

    let mut following: Option<Span> = None;
    let mut shrunk = false;
    syntax.walk(&mut |span| {
        if span.start() > offset && following.is_none_or(|f| span.start() < f.start()) {
            following = Some(span);
        }
        if span.contains(offset) {
            shrunk = shrunk || span.length() < best.length();
            best = span;
            true
        } else {
            false
        }
    });

    match following {
        Some(span) if !shrunk && !span.is_empty() => span,
        _ => best,
    }
}

/// All file records, keyed by URI.
#[derive(Debug, Default)]
pub struct Files {
    records: FxHashMap<DocumentUri, FileRecord>,
}

impl Files {
    #[must_use]
    pub fn get(&self, uri: &DocumentUri) -> Option<&FileRecord> {
        self.records.get(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn ensure(&mut self, uri: &DocumentUri) -> &mut FileRecord {
        self.records
            .entry(uri.clone())
            .or_insert_with(|| FileRecord::new(uri.clone()))
    }

    pub(crate) fn open(&mut self, uri: &DocumentUri, version: i32) {
        let record = self.ensure(uri);
        record.is_open = true;
        record.version = Some(version);
        record.dirty_errors = true;
    }

    pub(crate) fn set_version(&mut self, uri: &DocumentUri, version: i32) {
        if let Some(record) = self.records.get_mut(uri) {
            record.version = Some(version);
        }
    }

    pub(crate) fn close(&mut self, uri: &DocumentUri) {
        if let Some(record) = self.records.get_mut(uri) {
            record.is_open = false;
            record.version = None;
        }
        self.maybe_delete(uri);
    }

    /// Replace the tree and text of an existing record.
    pub(crate) fn set_syntax(
        &mut self,
        uri: &DocumentUri,
        syntax: Option<Arc<SourceFile>>,
        content: Arc<str>,
    ) {
        let Some(record) = self.records.get_mut(uri) else {
            return;
        };
        let unchanged = Arc::ptr_eq(&record.content, &content)
            && match (&record.syntax, &syntax) {
                (Some(old), Some(new)) => Arc::ptr_eq(old, new),
                (None, None) => true,
                _ => false,
            };
        if unchanged {
            return;
        }
        record.line_index = LineIndex::new(&content);
        record.content = content;
        record.syntax = syntax;
        record.symbols = None;
    }

    /// Record `owner` as a user of the file with the given errors. Calling
    /// this again with the same errors changes nothing.
    pub(crate) fn ensure_owner(&mut self, uri: &DocumentUri, owner: Owner, errors: Vec<FileError>) {
        let record = self.ensure(uri);
        if let Some((_, existing)) = record.owners.iter_mut().find(|(o, _)| *o == owner) {
            if *existing != errors {
                record.dirty_errors = true;
                *existing = errors;
            }
            return;
        }
        record.dirty_errors = record.dirty_errors || !errors.is_empty();
        record.owners.push((owner, errors));
    }

    pub(crate) fn remove_owner(&mut self, uri: &DocumentUri, owner: &Owner) {
        if let Some(record) = self.records.get_mut(uri) {
            let dirty = &mut record.dirty_errors;
            record.owners.retain(|(o, errors)| {
                if o == owner {
                    *dirty = *dirty || !errors.is_empty();
                    false
                } else {
                    true
                }
            });
        }
        self.maybe_delete(uri);
    }

    fn maybe_delete(&mut self, uri: &DocumentUri) {
        if self
            .records
            .get(uri)
            .is_some_and(|record| !record.is_open && record.owners.is_empty())
        {
            self.records.remove(uri);
        }
    }

    /// Send diagnostics for every open file whose errors changed since the
    /// last publish. Returns how many files were published.
    pub(crate) fn publish_diagnostics(&mut self, sink: &dyn DiagnosticsSink) -> usize {
        let mut published = 0;
        for record in self.records.values_mut() {
            if !record.is_open || !record.dirty_errors {
                continue;
            }
            record.dirty_errors = false;
            sink.publish_diagnostics(&record.uri, record.version, record.diagnostics());
            published += 1;
        }
        published
    }

    /// Outline of the fields in a file, built once per tree.
    pub fn document_symbols(&mut self, uri: &DocumentUri) -> Option<Arc<[DocumentSymbol]>> {
        let record = self.records.get_mut(uri)?;
        if let Some(symbols) = &record.symbols {
            return Some(Arc::clone(symbols));
        }
        let syntax = record.syntax.as_deref()?;
        let outline = Outline {
            content: &record.content,
            line_index: &record.line_index,
        };
        let symbols: Arc<[DocumentSymbol]> = outline.decls(&syntax.decls).into();
        record.symbols = Some(Arc::clone(&symbols));
        Some(symbols)
    }
}

struct Outline<'a> {
    content: &'a str,
    line_index: &'a LineIndex,
}

impl Outline<'_> {
    fn decls(&self, decls: &[Decl]) -> Vec<DocumentSymbol> {
        let mut symbols = Vec::new();
        for decl in decls {
            match decl {
                Decl::Field(field) => {
                    let name = self
                        .content
                        .get(field.label.span.as_range())
                        .unwrap_or_default()
                        .to_string();
                    let children = self.expr(&field.value);
                    #[allow(deprecated)]
                    symbols.push(DocumentSymbol {
                        name,
                        detail: None,
                        kind: SymbolKind::FIELD,
                        tags: None,
                        deprecated: None,
                        range: self.line_index.range(field.span, self.content),
                        selection_range: self.line_index.range(field.label.span, self.content),
                        children: (!children.is_empty()).then_some(children),
                    });
                }
                Decl::Embed(expr) => symbols.extend(self.expr(expr)),
                Decl::Let(clause) => symbols.extend(self.expr(&clause.value)),
                Decl::Comprehension(comprehension) => {
                    symbols.extend(self.expr(&comprehension.body));
                }
                Decl::Bad(_) => {}
            }
        }
        symbols
    }

    fn expr(&self, expr: &Expr) -> Vec<DocumentSymbol> {
        match expr {
            Expr::Struct { decls, .. } => self.decls(decls),
            Expr::List { elems, .. } => elems.iter().flat_map(|e| self.expr(e)).collect(),
            Expr::Binary { lhs, rhs, .. } => {
                let mut symbols = self.expr(lhs);
                symbols.extend(self.expr(rhs));
                symbols
            }
            Expr::Paren { expr, .. } | Expr::Unary { expr, .. } => self.expr(expr),
            Expr::Comprehension(comprehension) => self.expr(&comprehension.body),
            _ => Vec::new(),
        }
    }
}
