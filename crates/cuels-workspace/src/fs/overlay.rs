use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use cuels_source::DocumentUri;
use cuels_source::FileKind;
use parking_lot::RwLock;

use super::ContentStore;
use super::DirEntry;
use super::DiskEntry;
use super::FsError;
use super::ParsedFile;
use super::SourceText;

/// An editor buffer. Its version comes from the client and only ever grows.
#[derive(Debug)]
pub struct OverlayEntry {
    uri: DocumentUri,
    mod_time: SystemTime,
    version: i32,
    text: Arc<SourceText>,
}

impl OverlayEntry {
    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    #[must_use]
    pub fn mod_time(&self) -> SystemTime {
        self.mod_time
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn content(&self) -> &Arc<str> {
        self.text.content()
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.text.kind()
    }

    pub fn read_cue(&self) -> ParsedFile {
        self.text.read_cue()
    }
}

/// A readable file, from either layer.
#[derive(Clone, Debug)]
pub enum FileHandle {
    Overlay(Arc<OverlayEntry>),
    Disk(Arc<DiskEntry>),
}

impl FileHandle {
    #[must_use]
    pub fn uri(&self) -> &DocumentUri {
        match self {
            FileHandle::Overlay(entry) => entry.uri(),
            FileHandle::Disk(entry) => entry.uri(),
        }
    }

    #[must_use]
    pub fn content(&self) -> &Arc<str> {
        match self {
            FileHandle::Overlay(entry) => entry.content(),
            FileHandle::Disk(entry) => entry.content(),
        }
    }

    /// The editor version; disk files have none.
    #[must_use]
    pub fn version(&self) -> Option<i32> {
        match self {
            FileHandle::Overlay(entry) => Some(entry.version()),
            FileHandle::Disk(_) => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        match self {
            FileHandle::Overlay(entry) => entry.kind(),
            FileHandle::Disk(entry) => entry.kind(),
        }
    }

    pub fn read_cue(&self) -> ParsedFile {
        match self {
            FileHandle::Overlay(entry) => entry.read_cue(),
            FileHandle::Disk(entry) => entry.read_cue(),
        }
    }
}

#[derive(Clone, Debug)]
enum Node {
    File(Arc<OverlayEntry>),
    Dir(Dir),
}

type Dir = BTreeMap<String, Node>;

/// Editor buffers layered over a [`ContentStore`]. Directories exist only
/// as long as they hold a buffer.
#[derive(Debug)]
pub struct OverlayFs {
    root: RwLock<Dir>,
    store: Arc<ContentStore>,
}

impl OverlayFs {
    #[must_use]
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            root: RwLock::new(Dir::new()),
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Run `f` with shared access to the overlay.
    pub fn view<R>(&self, f: impl FnOnce(&ViewTxn<'_>) -> R) -> R {
        let root = self.root.read();
        f(&ViewTxn { root: &root })
    }

    /// Run `f` with exclusive access to the overlay.
    pub fn update<R>(&self, f: impl FnOnce(&mut UpdateTxn<'_>) -> R) -> R {
        let mut root = self.root.write();
        f(&mut UpdateTxn { root: &mut root })
    }

    /// Run `f` against a copy of the overlay and keep the copy only if `f`
    /// succeeds, so a failed batch leaves no partial edits behind.
    pub fn try_update<R, E>(
        &self,
        f: impl FnOnce(&mut UpdateTxn<'_>) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut root = self.root.write();
        let mut staged = root.clone();
        let result = f(&mut UpdateTxn { root: &mut staged })?;
        *root = staged;
        Ok(result)
    }

    /// Read a file, preferring the overlay and falling back to disk.
    pub fn read_file(&self, uri: &DocumentUri) -> Result<FileHandle, FsError> {
        match self.view(|txn| txn.get(uri)) {
            Ok(entry) => Ok(FileHandle::Overlay(entry)),
            Err(FsError::NotFound(_)) => self.store.read_file(uri).map(FileHandle::Disk),
            Err(err) => Err(err),
        }
    }

    /// List a directory from both layers; on a name collision the overlay
    /// entry wins.
    pub fn read_dir(&self, uri: &DocumentUri) -> Result<Vec<DirEntry>, FsError> {
        let overlay = self.view(|txn| txn.read_dir(uri));
        let disk = self.store.read_dir(uri);

        let (overlay, disk) = match (overlay, disk) {
            (None, Err(err)) => return Err(err),
            (overlay, disk) => (overlay.unwrap_or_default(), disk.unwrap_or_default()),
        };

        let mut merged: BTreeMap<String, bool> =
            disk.into_iter().map(|e| (e.name, e.is_dir)).collect();
        merged.extend(overlay.into_iter().map(|e| (e.name, e.is_dir)));
        Ok(merged
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }
}

fn segments(uri: &DocumentUri) -> Vec<&str> {
    uri.as_str()
        .strip_prefix("file:///")
        .unwrap_or_default()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn lookup<'a>(root: &'a Dir, uri: &DocumentUri) -> Result<&'a Node, FsError> {
    let segments = segments(uri);
    let Some((last, parents)) = segments.split_last() else {
        return Err(FsError::Invalid(uri.clone()));
    };

    let mut dir = root;
    for segment in parents {
        match dir.get(*segment) {
            Some(Node::Dir(child)) => dir = child,
            Some(Node::File(_)) => return Err(FsError::Invalid(uri.clone())),
            None => return Err(FsError::NotFound(uri.clone())),
        }
    }
    dir.get(*last).ok_or_else(|| FsError::NotFound(uri.clone()))
}

fn get(root: &Dir, uri: &DocumentUri) -> Result<Arc<OverlayEntry>, FsError> {
    match lookup(root, uri)? {
        Node::File(entry) => Ok(Arc::clone(entry)),
        Node::Dir(_) => Err(FsError::Invalid(uri.clone())),
    }
}

fn read_dir(root: &Dir, uri: &DocumentUri) -> Option<Vec<DirEntry>> {
    let dir = if uri.is_root() {
        root
    } else {
        match lookup(root, uri).ok()? {
            Node::Dir(dir) => dir,
            Node::File(_) => return None,
        }
    };
    Some(
        dir.iter()
            .map(|(name, node)| DirEntry {
                name: percent_decode(name),
                is_dir: matches!(node, Node::Dir(_)),
            })
            .collect(),
    )
}

fn percent_decode(segment: &str) -> String {
    DocumentUri::parse(&format!("file:///{segment}"))
        .ok()
        .and_then(|uri| uri.file_name())
        .unwrap_or_else(|| segment.to_string())
}

fn walk_files(root: &Dir, uri: &DocumentUri, f: &mut dyn FnMut(&Arc<OverlayEntry>)) {
    fn walk_dir(dir: &Dir, f: &mut dyn FnMut(&Arc<OverlayEntry>)) {
        for node in dir.values() {
            if let Node::File(entry) = node {
                f(entry);
            }
        }
        for node in dir.values() {
            if let Node::Dir(child) = node {
                walk_dir(child, f);
            }
        }
    }

    if uri.is_root() {
        walk_dir(root, f);
        return;
    }
    match lookup(root, uri) {
        Ok(Node::File(entry)) => f(entry),
        Ok(Node::Dir(dir)) => walk_dir(dir, f),
        Err(_) => {}
    }
}

/// Shared access to the overlay.
pub struct ViewTxn<'a> {
    root: &'a Dir,
}

impl ViewTxn<'_> {
    pub fn get(&self, uri: &DocumentUri) -> Result<Arc<OverlayEntry>, FsError> {
        get(self.root, uri)
    }

    /// Overlay-only listing of a directory, `None` if the overlay holds no
    /// such directory.
    #[must_use]
    pub fn read_dir(&self, uri: &DocumentUri) -> Option<Vec<DirEntry>> {
        read_dir(self.root, uri)
    }

    /// Visit the overlay files at or under `uri`, files of a directory
    /// before its subdirectories.
    pub fn walk_files(&self, uri: &DocumentUri, mut f: impl FnMut(&Arc<OverlayEntry>)) {
        walk_files(self.root, uri, &mut f);
    }
}

/// Exclusive access to the overlay.
pub struct UpdateTxn<'a> {
    root: &'a mut Dir,
}

impl UpdateTxn<'_> {
    pub fn get(&self, uri: &DocumentUri) -> Result<Arc<OverlayEntry>, FsError> {
        get(self.root, uri)
    }

    pub fn walk_files(&self, uri: &DocumentUri, mut f: impl FnMut(&Arc<OverlayEntry>)) {
        walk_files(self.root, uri, &mut f);
    }

    /// Create or replace the buffer at `uri`, creating parent directories.
    pub fn set(
        &mut self,
        uri: &DocumentUri,
        content: Arc<str>,
        mod_time: SystemTime,
        version: i32,
    ) -> Result<Arc<OverlayEntry>, FsError> {
        let segments = segments(uri);
        let Some((last, parents)) = segments.split_last() else {
            return Err(FsError::Invalid(uri.clone()));
        };

        let mut dir = &mut *self.root;
        for segment in parents {
            let node = dir
                .entry((*segment).to_string())
                .or_insert_with(|| Node::Dir(Dir::new()));
            match node {
                Node::Dir(child) => dir = child,
                Node::File(_) => return Err(FsError::Invalid(uri.clone())),
            }
        }

        if matches!(dir.get(*last), Some(Node::Dir(_))) {
            return Err(FsError::Invalid(uri.clone()));
        }

        let kind = FileKind::from_path(&uri.path());
        let entry = Arc::new(OverlayEntry {
            uri: uri.clone(),
            mod_time,
            version,
            text: Arc::new(SourceText::new(uri.path().as_str(), content, kind)),
        });
        dir.insert((*last).to_string(), Node::File(Arc::clone(&entry)));
        Ok(entry)
    }

    /// Remove the entry at `uri` and any directories left empty. Removing
    /// something that is not there does nothing.
    pub fn delete(&mut self, uri: &DocumentUri) {
        fn delete_in(dir: &mut Dir, segments: &[&str]) -> bool {
            match segments {
                [] => {}
                [last] => {
                    dir.remove(*last);
                }
                [first, rest @ ..] => {
                    if let Some(Node::Dir(child)) = dir.get_mut(*first) {
                        if delete_in(child, rest) {
                            dir.remove(*first);
                        }
                    }
                }
            }
            dir.is_empty()
        }

        delete_in(self.root, &segments(uri));
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use camino::Utf8PathBuf;

    use super::*;

    fn uri(path: &str) -> DocumentUri {
        DocumentUri::from_path(camino::Utf8Path::new(path)).unwrap()
    }

    fn overlay() -> OverlayFs {
        OverlayFs::new(Arc::new(ContentStore::new(Duration::ZERO)))
    }

    fn set(fs: &OverlayFs, path: &str, content: &str, version: i32) {
        fs.update(|txn| txn.set(&uri(path), Arc::from(content), SystemTime::now(), version))
            .unwrap();
    }

    mod transactions {
        use super::*;

        #[test]
        fn test_set_and_get() {
            let fs = overlay();
            set(&fs, "/w/a/b.cue", "x: 1", 3);
            let entry = fs.view(|txn| txn.get(&uri("/w/a/b.cue"))).unwrap();
            assert_eq!(&**entry.content(), "x: 1");
            assert_eq!(entry.version(), 3);
            assert_eq!(entry.kind(), FileKind::Cue);
        }

        #[test]
        fn test_get_missing_and_directory() {
            let fs = overlay();
            set(&fs, "/w/a/b.cue", "", 1);
            let missing = fs.view(|txn| txn.get(&uri("/w/a/c.cue")));
            assert_eq!(missing.unwrap_err(), FsError::NotFound(uri("/w/a/c.cue")));
            let dir = fs.view(|txn| txn.get(&uri("/w/a")));
            assert_eq!(dir.unwrap_err(), FsError::Invalid(uri("/w/a")));
        }

        #[test]
        fn test_file_used_as_directory() {
            let fs = overlay();
            set(&fs, "/w/a.cue", "", 1);
            let err = fs
                .update(|txn| txn.set(&uri("/w/a.cue/b.cue"), Arc::from(""), SystemTime::now(), 1))
                .unwrap_err();
            assert_eq!(err, FsError::Invalid(uri("/w/a.cue/b.cue")));
            let err = fs.view(|txn| txn.get(&uri("/w/a.cue/b.cue"))).unwrap_err();
            assert_eq!(err, FsError::Invalid(uri("/w/a.cue/b.cue")));
        }

        #[test]
        fn test_directory_replaced_by_file_rejected() {
            let fs = overlay();
            set(&fs, "/w/d/x.cue", "", 1);
            let err = fs
                .update(|txn| txn.set(&uri("/w/d"), Arc::from(""), SystemTime::now(), 1))
                .unwrap_err();
            assert_eq!(err, FsError::Invalid(uri("/w/d")));
        }

        #[test]
        fn test_delete_prunes_empty_parents() {
            let fs = overlay();
            set(&fs, "/w/a/b/c.cue", "", 1);
            set(&fs, "/w/keep.cue", "", 1);
            fs.update(|txn| txn.delete(&uri("/w/a/b/c.cue")));
            assert!(fs.view(|txn| txn.read_dir(&uri("/w/a"))).is_none());
            let names: Vec<_> = fs
                .view(|txn| txn.read_dir(&uri("/w")))
                .unwrap()
                .into_iter()
                .map(|e| e.name)
                .collect();
            assert_eq!(names, vec!["keep.cue".to_string()]);
        }

        #[test]
        fn test_delete_missing_is_noop() {
            let fs = overlay();
            set(&fs, "/w/a.cue", "", 1);
            fs.update(|txn| txn.delete(&uri("/w/nope/x.cue")));
            assert!(fs.view(|txn| txn.get(&uri("/w/a.cue"))).is_ok());
        }

        #[test]
        fn test_failed_try_update_is_discarded() {
            let fs = overlay();
            set(&fs, "/w/a.cue", "x: 1", 1);

            let result: Result<(), FsError> = fs.try_update(|txn| {
                txn.set(&uri("/w/b.cue"), Arc::from("y: 1"), SystemTime::now(), 1)?;
                txn.set(&uri("/w/a.cue"), Arc::from("x: 2"), SystemTime::now(), 2)?;
                txn.set(&uri("/w/a.cue/c.cue"), Arc::from(""), SystemTime::now(), 1)?;
                Ok(())
            });

            assert!(matches!(result, Err(FsError::Invalid(_))));
            assert!(matches!(
                fs.view(|txn| txn.get(&uri("/w/b.cue"))),
                Err(FsError::NotFound(_))
            ));
            let kept = fs.view(|txn| txn.get(&uri("/w/a.cue"))).unwrap();
            assert_eq!(&**kept.content(), "x: 1");
        }

        #[test]
        fn test_successful_try_update_is_kept() {
            let fs = overlay();
            let result: Result<(), FsError> = fs.try_update(|txn| {
                txn.set(&uri("/w/b.cue"), Arc::from("y: 1"), SystemTime::now(), 2)?;
                Ok(())
            });
            assert!(result.is_ok());
            assert_eq!(fs.view(|txn| txn.get(&uri("/w/b.cue"))).unwrap().version(), 2);
        }

        #[test]
        fn test_walk_files_order() {
            let fs = overlay();
            set(&fs, "/w/z/deep.cue", "", 1);
            set(&fs, "/w/b.cue", "", 1);
            set(&fs, "/w/a.cue", "", 1);
            let mut seen = Vec::new();
            fs.view(|txn| {
                txn.walk_files(&uri("/w"), |entry| seen.push(entry.uri().clone()));
            });
            assert_eq!(seen, vec![uri("/w/a.cue"), uri("/w/b.cue"), uri("/w/z/deep.cue")]);
        }
    }

    mod layering {
        use super::*;

        fn disk() -> (tempfile::TempDir, Utf8PathBuf) {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
            (dir, root)
        }

        #[test]
        fn test_overlay_shadows_disk() {
            let (_dir, root) = disk();
            let path = root.join("a.cue");
            fs::write(&path, "disk").unwrap();

            let ofs = overlay();
            set(&ofs, path.as_str(), "buffer", 2);
            let handle = ofs.read_file(&uri(path.as_str())).unwrap();
            assert_eq!(&**handle.content(), "buffer");
            assert_eq!(handle.version(), Some(2));
        }

        #[test]
        fn test_delete_falls_through_to_disk() {
            let (_dir, root) = disk();
            let path = root.join("a.cue");
            fs::write(&path, "disk").unwrap();

            let ofs = overlay();
            set(&ofs, path.as_str(), "buffer", 2);
            ofs.update(|txn| txn.delete(&uri(path.as_str())));
            let handle = ofs.read_file(&uri(path.as_str())).unwrap();
            assert_eq!(&**handle.content(), "disk");
            assert_eq!(handle.version(), None);
        }

        #[test]
        fn test_missing_everywhere() {
            let (_dir, root) = disk();
            let ofs = overlay();
            let err = ofs.read_file(&uri(root.join("none.cue").as_str())).unwrap_err();
            assert!(err.is_not_found());
        }

        #[test]
        fn test_read_dir_merges_layers() {
            let (_dir, root) = disk();
            fs::write(root.join("disk.cue"), "").unwrap();
            fs::write(root.join("both.cue"), "").unwrap();

            let ofs = overlay();
            set(&ofs, root.join("both.cue").as_str(), "", 1);
            set(&ofs, root.join("sub/only.cue").as_str(), "", 1);

            let entries = ofs.read_dir(&uri(root.as_str())).unwrap();
            let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.is_dir)).collect();
            assert_eq!(
                names,
                vec![("both.cue", false), ("disk.cue", false), ("sub", true)]
            );
        }

        #[test]
        fn test_read_dir_overlay_only_directory() {
            let ofs = overlay();
            set(&ofs, "/nonexistent-root-for-test/dir/x.cue", "", 1);
            let entries = ofs.read_dir(&uri("/nonexistent-root-for-test/dir")).unwrap();
            assert_eq!(entries.len(), 1);
        }
    }
}
