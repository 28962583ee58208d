mod file;
mod line_index;
mod span;
mod uri;

pub use file::FileKind;
pub use line_index::LineIndex;
pub use span::Span;
pub use uri::DocumentUri;
pub use uri::UriError;
