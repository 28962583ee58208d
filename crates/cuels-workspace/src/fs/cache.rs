use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use camino::Utf8Path;
use cuels_source::DocumentUri;
use cuels_source::FileKind;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::identity::FileIdentity;
use super::FsError;
use super::ParsedFile;
use super::SourceText;

/// A file read from disk. Entries are immutable; a changed file yields a new
/// entry. Aliases of one file share the same [`SourceText`].
#[derive(Clone, Debug)]
pub struct DiskEntry {
    uri: DocumentUri,
    mod_time: SystemTime,
    text: Arc<SourceText>,
}

impl DiskEntry {
    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    #[must_use]
    pub fn mod_time(&self) -> SystemTime {
        self.mod_time
    }

    #[must_use]
    pub fn content(&self) -> &Arc<str> {
        self.text.content()
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.text.kind()
    }

    #[must_use]
    pub fn text(&self) -> &Arc<SourceText> {
        &self.text
    }

    pub fn read_cue(&self) -> ParsedFile {
        self.text.read_cue()
    }

    fn alias(&self, uri: DocumentUri) -> Self {
        Self {
            uri,
            mod_time: self.mod_time,
            text: Arc::clone(&self.text),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Cache of on-disk files keyed by file identity.
///
/// Files modified within the debounce window are returned but not cached,
/// since they are likely still being written.
#[derive(Debug)]
pub struct ContentStore {
    entries: Mutex<FxHashMap<FileIdentity, Vec<Arc<DiskEntry>>>>,
    debounce: Duration,
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(cuels_conf::DEFAULT_DEBOUNCE_MS))
    }
}

impl ContentStore {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            debounce,
        }
    }

    pub fn read_file(&self, uri: &DocumentUri) -> Result<Arc<DiskEntry>, FsError> {
        let path = uri.path();
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                let err = FsError::from_io(uri, &err);
                if err.is_not_found() {
                    self.purge_under(uri);
                }
                return Err(err);
            }
        };
        if metadata.is_dir() {
            return Err(FsError::Invalid(uri.clone()));
        }

        let identity = FileIdentity::new(&path, &metadata);
        let mod_time = metadata
            .modified()
            .map_err(|err| FsError::from_io(uri, &err))?;

        {
            let mut entries = self.entries.lock();
            if let Some(files) = entries.get_mut(&identity) {
                if files.first().is_some_and(|file| file.mod_time == mod_time) {
                    if let Some(existing) = files.iter().find(|file| file.uri == *uri) {
                        return Ok(Arc::clone(existing));
                    }
                    let alias = Arc::new(files[0].alias(uri.clone()));
                    trace!("Content store alias {} -> {}", uri, files[0].uri);
                    files.push(Arc::clone(&alias));
                    return Ok(alias);
                }
            }
        }

        let recently_modified = SystemTime::now()
            .duration_since(mod_time)
            .map_or(true, |age| age < self.debounce);
        let result = read_entry(uri, &path, mod_time);

        let mut entries = self.entries.lock();
        match &result {
            Ok(entry) if !recently_modified => {
                entries.insert(identity, vec![Arc::clone(entry)]);
            }
            _ => {
                entries.remove(&identity);
            }
        }
        result
    }

    /// List a directory on disk, sorted by name.
    pub fn read_dir(&self, uri: &DocumentUri) -> Result<Vec<DirEntry>, FsError> {
        let path = uri.path();
        let iter = std::fs::read_dir(&path).map_err(|err| FsError::from_io(uri, &err))?;

        let mut entries = Vec::new();
        for entry in iter {
            let entry = entry.map_err(|err| FsError::from_io(uri, &err))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Follows symlinks, so a link to a directory counts as one.
            let is_dir = std::fs::metadata(entry.path()).is_ok_and(|m| m.is_dir());
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort();
        Ok(entries)
    }

    /// Drop every cached entry whose URI is `uri` or lies beneath it.
    pub fn purge_under(&self, uri: &DocumentUri) {
        let mut entries = self.entries.lock();
        entries.retain(|_, files| {
            files.retain(|file| !uri.encloses(&file.uri));
            !files.is_empty()
        });
    }

    /// Number of cached entries, counting aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_entry(
    uri: &DocumentUri,
    path: &Utf8Path,
    mod_time: SystemTime,
) -> Result<Arc<DiskEntry>, FsError> {
    let kind = FileKind::from_path(path);
    let content: Arc<str> = if kind == FileKind::Other {
        Arc::from("")
    } else {
        let bytes = std::fs::read(path).map_err(|err| FsError::from_io(uri, &err))?;
        Arc::from(String::from_utf8_lossy(&bytes).as_ref())
    };

    Ok(Arc::new(DiskEntry {
        uri: uri.clone(),
        mod_time,
        text: Arc::new(SourceText::new(path.as_str(), content, kind)),
    }))
}
