use std::sync::Arc;

use cuels_source::FileKind;
use cuels_syntax::parse;
use cuels_syntax::ParseMode;
use cuels_syntax::SourceFile;
use cuels_syntax::SyntaxError;
use parking_lot::Mutex;

/// Result of parsing a file: the tree (absent for non-CUE files), the mode
/// that produced it and every error from the full parse.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedFile {
    pub syntax: Option<Arc<SourceFile>>,
    pub mode: ParseMode,
    pub errors: Arc<[SyntaxError]>,
}

impl ParsedFile {
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        self.syntax.as_deref().and_then(SourceFile::package_name)
    }
}

/// File content with a memoized parse, shared by every entry that aliases
/// the same bytes.
#[derive(Debug)]
pub struct SourceText {
    filename: String,
    content: Arc<str>,
    kind: FileKind,
    parsed: Mutex<Option<ParsedFile>>,
}

impl SourceText {
    #[must_use]
    pub fn new(filename: impl Into<String>, content: Arc<str>, kind: FileKind) -> Self {
        Self {
            filename: filename.into(),
            content,
            kind,
            parsed: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn content(&self) -> &Arc<str> {
        &self.content
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Parse the content as CUE. A full parse is tried first; when it fails
    /// but the header parses cleanly, the header tree is kept so that package
    /// and imports remain known.
    ///
    /// The lock is held while parsing, so concurrent first readers share one
    /// tree.
    pub fn read_cue(&self) -> ParsedFile {
        let mut parsed = self.parsed.lock();
        parsed.get_or_insert_with(|| self.parse()).clone()
    }

    fn parse(&self) -> ParsedFile {
        if self.kind != FileKind::Cue {
            return ParsedFile {
                syntax: None,
                mode: ParseMode::Full,
                errors: Arc::from(Vec::new()),
            };
        }

        let full = parse(&self.filename, &self.content, ParseMode::Full);
        if full.errors.is_empty() {
            return ParsedFile {
                syntax: Some(Arc::new(full.file)),
                mode: ParseMode::Full,
                errors: Arc::from(Vec::new()),
            };
        }

        let header = parse(&self.filename, &self.content, ParseMode::ImportsOnly);
        let errors: Arc<[SyntaxError]> = full.errors.into();
        if header.errors.is_empty() {
            ParsedFile {
                syntax: Some(Arc::new(header.file)),
                mode: ParseMode::ImportsOnly,
                errors,
            }
        } else {
            ParsedFile {
                syntax: Some(Arc::new(full.file)),
                mode: ParseMode::Full,
                errors,
            }
        }
    }
}
