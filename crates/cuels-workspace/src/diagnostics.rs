use cuels_source::DocumentUri;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tower_lsp_server::ls_types::Diagnostic;

/// Receiver of per-file diagnostics. Each call replaces everything
/// previously published for the URI.
pub trait DiagnosticsSink: Send + Sync {
    fn publish_diagnostics(&self, uri: &DocumentUri, version: Option<i32>, diagnostics: Vec<Diagnostic>);
}

/// A sink that keeps the latest diagnostics per file.
#[derive(Debug, Default)]
pub struct DiagnosticsLog {
    published: Mutex<FxHashMap<DocumentUri, Vec<Diagnostic>>>,
    publish_count: Mutex<usize>,
}

impl DiagnosticsLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest diagnostics for `uri`, `None` if nothing was ever published.
    #[must_use]
    pub fn get(&self, uri: &DocumentUri) -> Option<Vec<Diagnostic>> {
        self.published.lock().get(uri).cloned()
    }

    /// Files whose latest publish carried at least one diagnostic, sorted.
    #[must_use]
    pub fn with_errors(&self) -> Vec<(DocumentUri, Vec<Diagnostic>)> {
        let mut files: Vec<_> = self
            .published
            .lock()
            .iter()
            .filter(|(_, diagnostics)| !diagnostics.is_empty())
            .map(|(uri, diagnostics)| (uri.clone(), diagnostics.clone()))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }

    /// Total number of publish calls received.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        *self.publish_count.lock()
    }
}

impl DiagnosticsSink for DiagnosticsLog {
    fn publish_diagnostics(&self, uri: &DocumentUri, _version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        self.published.lock().insert(uri.clone(), diagnostics);
        *self.publish_count.lock() += 1;
    }
}
