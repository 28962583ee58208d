use std::fs::Metadata;

use camino::Utf8Path;
use camino::Utf8PathBuf;

/// Identity of the file behind a path, so that two URIs reaching the same
/// file through a symlink share one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FileIdentity {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Path(Utf8PathBuf),
}

impl FileIdentity {
    #[cfg(unix)]
    pub(crate) fn new(_path: &Utf8Path, metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        FileIdentity::Inode {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn new(path: &Utf8Path, _metadata: &Metadata) -> Self {
        let canonical = path
            .canonicalize_utf8()
            .unwrap_or_else(|_| path.to_path_buf());
        FileIdentity::Path(canonical)
    }
}
