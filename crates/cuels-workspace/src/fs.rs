//! The two file layers the workspace reads through: an on-disk content
//! cache, and an overlay of editor buffers on top of it.

mod cache;
mod identity;
mod overlay;
mod source;

pub(crate) use identity::FileIdentity;
pub use cache::ContentStore;
pub use cache::DirEntry;
pub use cache::DiskEntry;
pub use overlay::FileHandle;
pub use overlay::OverlayEntry;
pub use overlay::OverlayFs;
pub use overlay::UpdateTxn;
pub use overlay::ViewTxn;
pub use source::ParsedFile;
pub use source::SourceText;

use cuels_source::DocumentUri;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("{0}: file does not exist")]
    NotFound(DocumentUri),
    /// The URI names a directory where a file is needed, or the reverse.
    #[error("{0}: invalid argument")]
    Invalid(DocumentUri),
    #[error("{uri}: {message}")]
    Io { uri: DocumentUri, message: String },
}

impl FsError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    pub(crate) fn from_io(uri: &DocumentUri, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(uri.clone()),
            _ => FsError::Io {
                uri: uri.clone(),
                message: err.to_string(),
            },
        }
    }
}
