use cuels_source::DocumentUri;
use tower_lsp_server::ls_types::TextDocumentContentChangeEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileAction {
    Open,
    Change,
    Close,
    Save,
    Create,
    Delete,
}

/// One file event, either from an editor buffer or, when `on_disk` is set,
/// from a file watcher.
#[derive(Clone, Debug, PartialEq)]
pub struct FileModification {
    pub uri: DocumentUri,
    pub action: FileAction,
    pub on_disk: bool,
    pub version: i32,
    pub changes: Vec<TextDocumentContentChangeEvent>,
}

impl FileModification {
    #[must_use]
    pub fn open(uri: DocumentUri, version: i32, text: impl Into<String>) -> Self {
        Self {
            uri,
            action: FileAction::Open,
            on_disk: false,
            version,
            changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.into(),
            }],
        }
    }

    #[must_use]
    pub fn change(
        uri: DocumentUri,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Self {
        Self {
            uri,
            action: FileAction::Change,
            on_disk: false,
            version,
            changes,
        }
    }

    /// A change replacing the whole buffer.
    #[must_use]
    pub fn replace(uri: DocumentUri, version: i32, text: impl Into<String>) -> Self {
        let mut modification = Self::open(uri, version, text);
        modification.action = FileAction::Change;
        modification
    }

    #[must_use]
    pub fn close(uri: DocumentUri) -> Self {
        Self::buffer_event(uri, FileAction::Close)
    }

    #[must_use]
    pub fn save(uri: DocumentUri) -> Self {
        Self::buffer_event(uri, FileAction::Save)
    }

    /// A watcher event for a file or directory changed outside the editor.
    #[must_use]
    pub fn on_disk(uri: DocumentUri, action: FileAction) -> Self {
        Self {
            uri,
            action,
            on_disk: true,
            version: 0,
            changes: Vec::new(),
        }
    }

    fn buffer_event(uri: DocumentUri, action: FileAction) -> Self {
        Self {
            uri,
            action,
            on_disk: false,
            version: 0,
            changes: Vec::new(),
        }
    }
}
