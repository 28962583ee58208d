//! Editor queries answered from the definitions of the packages that own a
//! file.

use std::sync::Arc;

use cuels_source::DocumentUri;
use cuels_source::Span;
use rustc_hash::FxHashSet;
use tower_lsp_server::ls_types::CompletionItem;
use tower_lsp_server::ls_types::CompletionItemKind;
use tower_lsp_server::ls_types::CompletionTextEdit;
use tower_lsp_server::ls_types::DocumentSymbol;
use tower_lsp_server::ls_types::Hover;
use tower_lsp_server::ls_types::HoverContents;
use tower_lsp_server::ls_types::MarkupContent;
use tower_lsp_server::ls_types::MarkupKind;
use tower_lsp_server::ls_types::Position;
use tower_lsp_server::ls_types::Range;
use tower_lsp_server::ls_types::TextEdit;

use crate::definitions::Declaration;
use crate::definitions::Definitions;
use crate::definitions::FileDefinitions;
use crate::definitions::Resolution;
use crate::file::Owner;
use crate::Workspace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub uri: DocumentUri,
    pub range: Range,
}

/// A resolved declaration, detached from the definitions it came from.
#[derive(Debug)]
struct Target {
    uri: DocumentUri,
    label: Span,
    range: Range,
    doc: Option<String>,
}

impl Target {
    fn from_declaration(decl: &Declaration<'_>) -> Self {
        Self {
            uri: decl.file.uri().clone(),
            label: decl.label,
            range: decl.file.range(decl.label),
            doc: decl.doc.map(str::to_string),
        }
    }

    fn location(&self) -> Location {
        Location {
            uri: self.uri.clone(),
            range: self.range,
        }
    }
}

impl Workspace {
    /// Definitions of every package or standalone file holding `uri`.
    fn definitions_for(&self, uri: &DocumentUri) -> Vec<Arc<Definitions>> {
        let Some(record) = self.files.get(uri) else {
            return Vec::new();
        };
        record
            .owners()
            .filter_map(|owner| match owner {
                Owner::Package(import_path) => self.packages.get(import_path)?.definitions().cloned(),
                Owner::Standalone(file) => self.standalone_definitions(file).cloned(),
                Owner::Module(_) => None,
            })
            .filter(|definitions| definitions.file(uri).is_some())
            .collect()
    }

    fn targets(&self, resolution: Resolution<'_>) -> Vec<Target> {
        match resolution {
            Resolution::Declarations(decls) => decls.iter().map(Target::from_declaration).collect(),
            Resolution::Import { path, selectors } => self
                .packages
                .get(&path)
                .and_then(|package| package.definitions())
                .map(|definitions| {
                    definitions
                        .lookup_path(&selectors)
                        .iter()
                        .map(Target::from_declaration)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Resolve at `position`, backing off one column when nothing is found,
    /// since the cursor usually sits just after the name.
    fn targets_at(&self, file: &FileDefinitions, definitions: &Definitions, position: Position) -> Vec<Target> {
        let mut positions = vec![position];
        if position.character > 0 {
            positions.push(Position::new(position.line, position.character - 1));
        }
        for position in positions {
            let Some(offset) = file.offset(position) else {
                continue;
            };
            let targets = definitions
                .resolve_at(file.uri(), offset)
                .map(|resolution| self.targets(resolution))
                .unwrap_or_default();
            if !targets.is_empty() {
                return targets;
            }
        }
        Vec::new()
    }

    #[must_use]
    pub fn definition(&self, uri: &DocumentUri, position: Position) -> Vec<Location> {
        let mut locations = Vec::new();
        for definitions in self.definitions_for(uri) {
            let Some(file) = definitions.file(uri) else {
                continue;
            };
            locations.extend(
                self.targets_at(file, &definitions, position)
                    .iter()
                    .map(Target::location),
            );
        }
        sort_locations(&mut locations);
        locations
    }

    /// Doc comments of whatever the name at `position` resolves to, each
    /// followed by a link to where it was declared.
    #[must_use]
    pub fn hover(&self, uri: &DocumentUri, position: Position) -> Option<Hover> {
        let mut targets = Vec::new();
        for definitions in self.definitions_for(uri) {
            let Some(file) = definitions.file(uri) else {
                continue;
            };
            let Some(offset) = file.offset(position) else {
                continue;
            };
            if let Some(resolution) = definitions.resolve_at(uri, offset) {
                targets.extend(self.targets(resolution));
            }
        }

        // Docs from other files first: those are less likely to be on screen.
        targets.sort_by(|a, b| {
            let a_here = a.uri == *uri;
            let b_here = b.uri == *uri;
            a_here
                .cmp(&b_here)
                .then_with(|| a.uri.cmp(&b.uri))
                .then_with(|| a.label.cmp(&b.label))
        });
        targets.dedup_by(|a, b| a.uri == b.uri && a.label == b.label);

        let mut value = String::new();
        for target in &targets {
            let Some(doc) = target.doc.as_deref().map(str::trim_end).filter(|doc| !doc.is_empty()) else {
                continue;
            };
            let line = target.range.start.line + 1;
            value.push_str(doc);
            value.push('\n');
            value.push_str(&format!(
                "([{} line {line}]({}#L{line}))\n\n",
                target.uri.file_name().unwrap_or_default(),
                target.uri
            ));
        }
        let value = value.trim_end_matches('\n');
        if value.is_empty() {
            return None;
        }
        Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: value.to_string(),
            }),
            range: None,
        })
    }

    /// Names that fit at `position`: labels of the imported package after
    /// `alias.`, the package's top-level labels and import aliases in a
    /// value, and top-level labels where a new field starts.
    #[must_use]
    pub fn completion(&self, uri: &DocumentUri, position: Position) -> Vec<CompletionItem> {
        let mut candidates: Vec<(String, CompletionItemKind, &str, Range)> = Vec::new();
        for definitions in self.definitions_for(uri) {
            let Some(file) = definitions.file(uri) else {
                continue;
            };
            let content = file.content();
            let offset = file
                .offset(position)
                .map_or(content.len(), |offset| offset as usize)
                .min(content.len());
            let before = &content[..offset];
            let prefix_start = before.trim_end_matches(is_ident_char).len();
            let range = file.range(Span::from_bounds(prefix_start, offset));
            let head = &before[..prefix_start];

            if let Some(base) = head.strip_suffix('.') {
                let alias = &base[base.trim_end_matches(is_ident_char).len()..];
                let imported = file
                    .imports()
                    .iter()
                    .find(|import| import.name == alias)
                    .and_then(|import| self.packages.get(&import.path))
                    .and_then(|package| package.definitions());
                if let Some(imported) = imported {
                    for name in imported.top_level_names() {
                        candidates.push((name.to_string(), CompletionItemKind::FIELD, "", range));
                    }
                }
                continue;
            }

            let line_start = head.rfind('\n').map_or(0, |idx| idx + 1);
            if head[line_start..].contains(':') {
                for name in definitions.top_level_names() {
                    candidates.push((name.to_string(), CompletionItemKind::VARIABLE, "", range));
                }
                for import in file.imports() {
                    candidates.push((import.name.clone(), CompletionItemKind::MODULE, "", range));
                }
            } else {
                for name in definitions.top_level_names() {
                    candidates.push((name.to_string(), CompletionItemKind::FIELD, ":", range));
                }
            }
        }

        let mut seen = FxHashSet::default();
        candidates.retain(|(name, ..)| seen.insert(name.clone()));
        let width = candidates.len().to_string().len();
        candidates
            .into_iter()
            .enumerate()
            .map(|(index, (name, kind, suffix, range))| {
                let label = if is_valid_ident(&name) {
                    name
                } else {
                    format!("{name:?}")
                };
                CompletionItem {
                    text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                        range,
                        new_text: format!("{label}{suffix}"),
                    })),
                    label,
                    kind: Some(kind),
                    sort_text: Some(format!("{index:0width$}")),
                    ..CompletionItem::default()
                }
            })
            .collect()
    }

    /// Every place in the workspace that refers to the declarations the name
    /// at `position` resolves to.
    #[must_use]
    pub fn references(
        &self,
        uri: &DocumentUri,
        position: Position,
        include_declaration: bool,
    ) -> Vec<Location> {
        let mut declared = Vec::new();
        for definitions in self.definitions_for(uri) {
            if let Some(file) = definitions.file(uri) {
                declared.extend(self.targets_at(file, &definitions, position));
            }
        }
        if declared.is_empty() {
            return Vec::new();
        }
        let keys: FxHashSet<(DocumentUri, Span)> = declared
            .iter()
            .map(|target| (target.uri.clone(), target.label))
            .collect();

        let mut locations: Vec<Location> = if include_declaration {
            declared.iter().map(Target::location).collect()
        } else {
            Vec::new()
        };

        let everything = self
            .packages
            .values()
            .filter_map(|package| package.definitions())
            .chain(self.standalone.keys().filter_map(|file| self.standalone_definitions(file)));
        for definitions in everything {
            definitions.for_each_reference(|file, span, resolution| {
                let hit = self
                    .targets(resolution)
                    .iter()
                    .any(|target| keys.contains(&(target.uri.clone(), target.label)));
                if hit {
                    locations.push(Location {
                        uri: file.uri().clone(),
                        range: file.range(span),
                    });
                }
            });
        }
        sort_locations(&mut locations);
        locations
    }

    /// Outline of the fields in a file.
    pub fn document_symbols(&mut self, uri: &DocumentUri) -> Vec<DocumentSymbol> {
        self.files
            .document_symbols(uri)
            .map(|symbols| symbols.to_vec())
            .unwrap_or_default()
    }
}

fn sort_locations(locations: &mut Vec<Location>) {
    locations.sort_by(|a, b| {
        a.uri
            .cmp(&b.uri)
            .then_with(|| a.range.start.line.cmp(&b.range.start.line))
            .then_with(|| a.range.start.character.cmp(&b.range.start.character))
    });
    locations.dedup();
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '#')
}

fn is_valid_ident(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(is_ident_char)
}
