use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use cuels_conf::Settings;
use cuels_source::DocumentUri;
use cuels_source::FileKind;
use cuels_source::UriError;
use cuels_syntax::ImportPath;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use tracing::debug;
use tracing::warn;

use crate::changes::changed_text;
use crate::file::Files;
use crate::file::Owner;
use crate::fs::ContentStore;
use crate::fs::FileHandle;
use crate::fs::FileIdentity;
use crate::fs::FsError;
use crate::fs::OverlayFs;
use crate::loader::DirLoader;
use crate::loader::DirRegistry;
use crate::loader::PackageLoader;
use crate::module::Module;
use crate::module::MODULE_FILE;
use crate::package::Package;
use crate::standalone::StandaloneFile;
use crate::DiagnosticsSink;
use crate::FileAction;
use crate::FileModification;
use crate::FileRecord;
use crate::WorkspaceError;

/// Per-folder options supplied by the editor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderOptions {
    /// Glob patterns to watch in addition to `**/*.cue`.
    pub extra_watch_patterns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WorkspaceFolder {
    dir: DocumentUri,
    name: String,
    options: FolderOptions,
}

impl WorkspaceFolder {
    #[must_use]
    pub fn dir(&self) -> &DocumentUri {
        &self.dir
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn options(&self) -> &FolderOptions {
        &self.options
    }
}

/// Something the editor should watch for changes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WatchPattern {
    /// A glob relative to a folder.
    Glob { base: DocumentUri, pattern: String },
    /// A directory holding files the workspace has loaded.
    Dir(DocumentUri),
}

/// Files loaded by some owner, and the directories they sit in.
#[derive(Debug, Default)]
struct ActiveSet {
    files: FxHashMap<DocumentUri, Vec<Owner>>,
    dirs: FxHashSet<DocumentUri>,
}

/// All modules, packages and file records of an editor session.
///
/// Modules are keyed by root directory and packages by canonical import
/// path; modules, packages and files refer to each other through those keys.
pub struct Workspace {
    pub(crate) max_iterations: usize,
    pub(crate) overlay: OverlayFs,
    pub(crate) loader: Box<dyn PackageLoader>,
    sink: Arc<dyn DiagnosticsSink>,
    folders: Vec<WorkspaceFolder>,
    pub(crate) modules: BTreeMap<DocumentUri, Module>,
    pub(crate) packages: BTreeMap<ImportPath, Package>,
    pub(crate) files: Files,
    pub(crate) standalone: BTreeMap<DocumentUri, StandaloneFile>,
    active: Option<Arc<ActiveSet>>,
    /// Files carrying the non-convergence error, with the module it was
    /// reported under.
    pub(crate) stalled: Vec<(DocumentUri, DocumentUri)>,
}

impl Workspace {
    #[must_use]
    pub fn new(
        store: Arc<ContentStore>,
        loader: Box<dyn PackageLoader>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            max_iterations: cuels_conf::DEFAULT_MAX_RELOAD_ITERATIONS,
            overlay: OverlayFs::new(store),
            loader,
            sink,
            folders: Vec::new(),
            modules: BTreeMap::new(),
            packages: BTreeMap::new(),
            files: Files::default(),
            standalone: BTreeMap::new(),
            active: None,
            stalled: Vec::new(),
        }
    }

    /// A workspace reading from disk, with the cache, loader and reload
    /// limit configured from `settings`.
    pub fn from_settings(
        settings: &Settings,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self, UriError> {
        let registry = settings
            .registry
            .as_deref()
            .map(DirRegistry::from_path)
            .transpose()?;
        let store = Arc::new(ContentStore::new(settings.debounce()));
        let mut workspace = Self::new(store, Box::new(DirLoader::new(registry)), sink);
        workspace.set_max_reload_iterations(settings.reload.max_iterations);
        Ok(workspace)
    }

    pub fn set_max_reload_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations.max(1);
    }

    #[must_use]
    pub fn overlay(&self) -> &OverlayFs {
        &self.overlay
    }

    #[must_use]
    pub fn module(&self, root: &DocumentUri) -> Option<&Module> {
        self.modules.get(root)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    #[must_use]
    pub fn package(&self, import_path: &ImportPath) -> Option<&Package> {
        self.packages.get(import_path)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    #[must_use]
    pub fn file(&self, uri: &DocumentUri) -> Option<&FileRecord> {
        self.files.get(uri)
    }

    #[must_use]
    pub fn files(&self) -> &Files {
        &self.files
    }

    #[must_use]
    pub fn folders(&self) -> &[WorkspaceFolder] {
        &self.folders
    }

    /// Add a workspace folder unless it, or another path to the same
    /// directory, is already one.
    pub fn ensure_folder(
        &mut self,
        dir: &DocumentUri,
        name: &str,
    ) -> Result<&WorkspaceFolder, WorkspaceError> {
        let path = dir.path();
        let metadata = std::fs::metadata(&path).map_err(|err| FsError::from_io(dir, &err))?;
        let identity = FileIdentity::new(&path, &metadata);

        let mut found = None;
        for (index, folder) in self.folders.iter().enumerate() {
            if folder.dir == *dir {
                found = Some(index);
                break;
            }
            let other = folder.dir.path();
            let other_metadata =
                std::fs::metadata(&other).map_err(|err| FsError::from_io(&folder.dir, &err))?;
            if FileIdentity::new(&other, &other_metadata) == identity {
                found = Some(index);
                break;
            }
        }

        let index = if let Some(index) = found {
            index
        } else {
            self.folders.push(WorkspaceFolder {
                dir: dir.clone(),
                name: name.to_string(),
                options: FolderOptions::default(),
            });
            debug!("Workspace folder added: {}", dir);
            self.folders.len() - 1
        };
        Ok(&self.folders[index])
    }

    pub fn remove_folder(&mut self, dir: &DocumentUri) {
        self.folders.retain(|folder| {
            if folder.dir == *dir {
                debug!("Workspace folder removed: {}", dir);
            }
            folder.dir != *dir
        });
    }

    /// Ask for fresh options for every folder. Stops at the first failure.
    pub fn update_folder_options<E>(
        &mut self,
        mut fetch: impl FnMut(&DocumentUri) -> Result<FolderOptions, E>,
    ) -> Result<(), E> {
        for folder in &mut self.folders {
            folder.options = fetch(&folder.dir)?;
        }
        Ok(())
    }

    /// What the editor must watch to keep the workspace current: CUE files
    /// in every folder, plus each active directory inside a folder.
    pub fn file_watching_glob_patterns(&mut self) -> BTreeSet<WatchPattern> {
        let mut patterns = BTreeSet::new();
        for folder in &self.folders {
            patterns.insert(WatchPattern::Glob {
                base: folder.dir.clone(),
                pattern: "**/*.cue".to_string(),
            });
            for pattern in &folder.options.extra_watch_patterns {
                patterns.insert(WatchPattern::Glob {
                    base: folder.dir.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
        if self.folders.is_empty() {
            return patterns;
        }

        let active = self.active_files_and_dirs();
        for dir in &active.dirs {
            if self.folders.iter().any(|folder| folder.dir.encloses(dir)) {
                patterns.insert(WatchPattern::Dir(dir.clone()));
            }
        }
        patterns
    }

    pub(crate) fn invalidate_active_files(&mut self) {
        self.active = None;
    }

    fn active_files_and_dirs(&mut self) -> Arc<ActiveSet> {
        if let Some(active) = &self.active {
            return Arc::clone(active);
        }
        self.reload_modules();

        let mut active = ActiveSet::default();
        for (root, module) in &self.modules {
            let mod_file = module.mod_file_uri();
            active
                .files
                .insert(mod_file.clone(), vec![Owner::Module(root.clone())]);
            active.dirs.insert(mod_file.dir());
            active.dirs.insert(root.clone());

            for import_path in module.packages() {
                let Some(package) = self.packages.get(import_path) else {
                    continue;
                };
                for file in package.files() {
                    active
                        .files
                        .entry(file.clone())
                        .or_default()
                        .push(Owner::Package(import_path.clone()));
                    for dir in file
                        .dir()
                        .ancestors()
                        .take_while(|dir| dir != root && root.encloses(dir))
                    {
                        if !active.dirs.insert(dir) {
                            break;
                        }
                    }
                }
            }
        }
        for uri in self.standalone.keys() {
            active
                .files
                .entry(uri.clone())
                .or_default()
                .push(Owner::Standalone(uri.clone()));
            active.dirs.insert(uri.dir());
        }

        let active = Arc::new(active);
        self.active = Some(Arc::clone(&active));
        active
    }

    pub(crate) fn mark_file_dirty(&mut self, owner: &Owner, uri: &DocumentUri) {
        match owner {
            Owner::Module(root) => {
                if let Some(module) = self.modules.get_mut(root) {
                    assert!(
                        module.encloses(uri),
                        "{module} being told about file {uri}"
                    );
                    module.dirty_files.insert(uri.clone());
                }
            }
            Owner::Package(import_path) => {
                let Some(root) = self
                    .packages
                    .get(import_path)
                    .map(|package| package.module_root().clone())
                else {
                    return;
                };
                if let Some(module) = self.modules.get_mut(&root) {
                    module.dirty_files.insert(uri.clone());
                }
                self.mark_package_dirty(import_path);
            }
            Owner::Standalone(file) => {
                assert_eq!(file, uri, "standalone file {file} being told about file {uri}");
                if let Some(standalone) = self.standalone.get_mut(file) {
                    standalone.dirty = true;
                }
            }
        }
    }

    fn owner_encloses(&self, owner: &Owner, uri: &DocumentUri) -> bool {
        match owner {
            Owner::Module(root) => self
                .modules
                .get(root)
                .is_some_and(|module| module.encloses(uri)),
            Owner::Package(import_path) => self
                .packages
                .get(import_path)
                .is_some_and(|package| package.encloses(uri)),
            Owner::Standalone(file) => file == uri,
        }
    }

    /// Apply editor and watcher events, reload whatever they made dirty, and
    /// publish diagnostics for open files whose errors changed.
    ///
    /// Editor events are applied to the overlay first; a watcher event for a
    /// file with an overlay is ignored, since the buffer wins over disk.
    ///
    /// A file whose module cannot be looked up is skipped while the rest of
    /// the batch is reloaded and published; the first such error is returned
    /// afterwards.
    pub fn did_modify_files(
        &mut self,
        modifications: &[FileModification],
    ) -> Result<(), WorkspaceError> {
        self.clear_stalled();
        let updated = self.update_overlays(modifications)?;
        self.track_buffers(modifications);

        let active = self.active_files_and_dirs();
        let mut pending: BTreeMap<DocumentUri, FileHandle> = BTreeMap::new();
        for (uri, handle) in updated {
            if let Some(owners) = active.files.get(&uri) {
                let mut enclosed = false;
                for owner in owners {
                    self.mark_file_dirty(owner, &uri);
                    enclosed = enclosed || self.owner_encloses(owner, &uri);
                }
                self.invalidate_active_files();
                // An open file found only through an ancestor import still
                // needs its own package.
                if handle.is_none() || enclosed {
                    continue;
                }
            }

            let handle = if let Some(handle) = handle {
                handle
            } else {
                let is_dir = active.dirs.contains(&uri);
                if !is_dir && !active.dirs.contains(&uri.dir()) {
                    continue;
                }
                match self.overlay.store().read_file(&uri) {
                    Ok(entry) => FileHandle::Disk(entry),
                    Err(FsError::NotFound(_)) => {
                        if is_dir {
                            for (active_uri, owners) in &active.files {
                                if uri.encloses(active_uri) {
                                    for owner in owners {
                                        self.mark_file_dirty(owner, active_uri);
                                    }
                                    self.invalidate_active_files();
                                }
                            }
                        }
                        continue;
                    }
                    // Most likely a directory that was just created.
                    Err(_) => continue,
                }
            };
            pending.insert(uri, handle);
        }

        let (mod_files, files): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(uri, _)| uri.as_str().ends_with(&format!("/{MODULE_FILE}")));
        for (uri, _) in mod_files {
            self.new_module(&uri);
        }

        let mut failed: Option<WorkspaceError> = None;
        for (uri, handle) in files {
            let root = match self.find_module_for_file(&uri) {
                Ok(root) => root,
                Err(err) => {
                    warn!("Cannot find module for {}: {}", uri, err);
                    failed.get_or_insert(err);
                    continue;
                }
            };
            let owners = match root {
                Some(root) => match self.find_packages_or_modules_for_file(&root, &uri) {
                    Ok(owners) => owners,
                    Err(err) => {
                        debug!("Cannot place {}: {}", uri, err);
                        Vec::new()
                    }
                },
                None => {
                    debug!("No module found for {}", uri);
                    Vec::new()
                }
            };
            if owners.is_empty() {
                if handle.version().is_some() && handle.kind() == FileKind::Cue {
                    self.reload_standalone_file(&uri);
                }
                continue;
            }
            for owner in &owners {
                self.mark_file_dirty(owner, &uri);
            }
            self.invalidate_active_files();
        }

        self.reload_packages();
        self.reload_standalone_files();
        if self.subtract_modules_and_packages() {
            self.reload_packages();
        }
        self.adopt_open_orphans();
        self.files.publish_diagnostics(self.sink.as_ref());
        match failed {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Apply the editor events to the overlay in one transaction, kept only
    /// if every event applies, then note which watcher events need a look at
    /// the disk. A `None` handle means the URI has to be read from disk.
    fn update_overlays(
        &self,
        modifications: &[FileModification],
    ) -> Result<BTreeMap<DocumentUri, Option<FileHandle>>, WorkspaceError> {
        let now = SystemTime::now();
        self.overlay.try_update(|txn| {
            let mut updated = BTreeMap::new();

            for modification in modifications.iter().filter(|m| !m.on_disk) {
                let uri = &modification.uri;
                let entry = match modification.action {
                    FileAction::Open => {
                        let Some(change) = modification.changes.first() else {
                            return Err(WorkspaceError::NoContentChanges(uri.clone()));
                        };
                        Some(txn.set(uri, Arc::from(change.text.as_str()), now, modification.version)?)
                    }
                    FileAction::Change => {
                        let existing = match txn.get(uri) {
                            Ok(existing) => existing,
                            Err(FsError::NotFound(_)) => {
                                return Err(WorkspaceError::UnopenedOverlay(uri.clone()))
                            }
                            Err(err) => return Err(err.into()),
                        };
                        if modification.version <= existing.version() {
                            return Err(WorkspaceError::NonIncreasingVersion {
                                uri: uri.clone(),
                                existing: existing.version(),
                                supplied: modification.version,
                            });
                        }
                        let text = changed_text(uri, existing.content(), &modification.changes)?;
                        Some(txn.set(uri, Arc::from(text), now, modification.version)?)
                    }
                    FileAction::Close => {
                        txn.delete(uri);
                        None
                    }
                    FileAction::Save => continue,
                    FileAction::Create | FileAction::Delete => {
                        return Err(WorkspaceError::UnsupportedAction {
                            uri: uri.clone(),
                            action: modification.action,
                        })
                    }
                };
                updated.insert(uri.clone(), entry.map(FileHandle::Overlay));
            }

            for modification in modifications.iter().filter(|m| m.on_disk) {
                let uri = &modification.uri;
                if updated.contains_key(uri) {
                    continue;
                }
                match txn.get(uri) {
                    Err(FsError::Invalid(_)) if modification.action == FileAction::Delete => {
                        updated.insert(uri.clone(), None);
                    }
                    Err(FsError::NotFound(_)) => {
                        updated.insert(uri.clone(), None);
                    }
                    _ => {}
                }
            }
            Ok(updated)
        })
    }

    fn track_buffers(&mut self, modifications: &[FileModification]) {
        for modification in modifications.iter().filter(|m| !m.on_disk) {
            let uri = &modification.uri;
            match modification.action {
                FileAction::Open => self.files.open(uri, modification.version),
                FileAction::Change => self.files.set_version(uri, modification.version),
                FileAction::Close => {
                    self.files.close(uri);
                    self.delete_standalone_file(uri);
                }
                FileAction::Save | FileAction::Create | FileAction::Delete => {}
            }
        }
    }

    /// Open CUE buffers nobody loaded become standalone files, so they still
    /// get syntax errors and queries. Module config files are left alone: a
    /// broken one is retried as a module on its next change.
    fn adopt_open_orphans(&mut self) {
        let orphans: Vec<DocumentUri> = self
            .files
            .iter()
            .filter(|record| record.is_open() && record.owners().next().is_none())
            .map(FileRecord::uri)
            .filter(|uri| FileKind::from_path(&uri.path()) == FileKind::Cue)
            .filter(|uri| !uri.as_str().ends_with(&format!("/{MODULE_FILE}")))
            .cloned()
            .collect();
        for uri in orphans {
            self.reload_standalone_file(&uri);
        }
    }
}
