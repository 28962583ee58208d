mod changes;
mod definitions;
mod diagnostics;
mod error;
mod file;
pub mod fs;
mod loader;
mod modification;
mod module;
mod package;
mod queries;
mod reload;
mod standalone;
mod workspace;

pub use definitions::Declaration;
pub use definitions::Definitions;
pub use definitions::FileDefinitions;
pub use definitions::Resolution;
pub use diagnostics::DiagnosticsLog;
pub use diagnostics::DiagnosticsSink;
pub use error::WorkspaceError;
pub use file::FileError;
pub use file::FileRecord;
pub use file::Files;
pub use file::Owner;
pub use loader::DirLoader;
pub use loader::DirRegistry;
pub use loader::FileImport;
pub use loader::LoadError;
pub use loader::LoadRequest;
pub use loader::LoadedFile;
pub use loader::LoadedPackage;
pub use loader::PackageLoader;
pub use modification::FileAction;
pub use modification::FileModification;
pub use module::Module;
pub use package::LoadStatus;
pub use package::Package;
pub use queries::Location;
pub use workspace::FolderOptions;
pub use workspace::WatchPattern;
pub use workspace::Workspace;
pub use workspace::WorkspaceFolder;
