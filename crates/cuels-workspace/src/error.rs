use cuels_source::DocumentUri;
use cuels_syntax::ImportPath;
use thiserror::Error;

use crate::fs::FsError;
use crate::FileAction;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    /// The module's config file could not be read or parsed, so the module
    /// and all its packages were removed.
    #[error("module {0} deleted")]
    ModuleDeleted(DocumentUri),
    #[error("package {0} deleted")]
    PackageDeleted(ImportPath),
    #[error("file {file} is outside module {root}")]
    OutsideModule { file: DocumentUri, root: DocumentUri },
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(
        "modification for {uri} provides non-increasing version (existing: {existing}; supplied: {supplied})"
    )]
    NonIncreasingVersion {
        uri: DocumentUri,
        existing: i32,
        supplied: i32,
    },
    #[error("modifying unopened overlay {0}")]
    UnopenedOverlay(DocumentUri),
    #[error("{0}: no content changes provided")]
    NoContentChanges(DocumentUri),
    #[error("{uri}: {message}")]
    InvalidChange { uri: DocumentUri, message: String },
    #[error("{uri}: unsupported {action:?} modification from the editor")]
    UnsupportedAction { uri: DocumentUri, action: FileAction },
}
