use std::collections::BTreeSet;

use cuels_source::DocumentUri;
use cuels_syntax::ImportPath;
use cuels_syntax::ModuleFile;
use tracing::debug;

use crate::file::Owner;
use crate::fs::FsError;
use crate::loader::strip_path_prefix;
use crate::loader::LoadRequest;
use crate::loader::LoadedPackage;
use crate::loader::LEGACY_DIRS;
use crate::package::LoadStatus;
use crate::Workspace;
use crate::WorkspaceError;

pub(crate) const MODULE_FILE: &str = "cue.mod/module.cue";

/// A CUE module: the directory holding `cue.mod/module.cue` and every
/// package found beneath it.
///
/// A module is dirty exactly while its config file is in `dirty_files`.
#[derive(Debug)]
pub struct Module {
    root: DocumentUri,
    mod_file_uri: DocumentUri,
    mod_file: Option<ModuleFile>,
    pub(crate) packages: BTreeSet<ImportPath>,
    pub(crate) dirty_files: BTreeSet<DocumentUri>,
}

impl Module {
    fn new(mod_file_uri: DocumentUri) -> Self {
        Self {
            root: mod_file_uri.dir().dir(),
            dirty_files: BTreeSet::from([mod_file_uri.clone()]),
            mod_file_uri,
            mod_file: None,
            packages: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &DocumentUri {
        &self.root
    }

    #[must_use]
    pub fn mod_file_uri(&self) -> &DocumentUri {
        &self.mod_file_uri
    }

    /// The parsed config file, absent until the first successful reload.
    #[must_use]
    pub fn mod_file(&self) -> Option<&ModuleFile> {
        self.mod_file.as_ref()
    }

    #[must_use]
    pub fn packages(&self) -> &BTreeSet<ImportPath> {
        &self.packages
    }

    #[must_use]
    pub fn dirty_files(&self) -> &BTreeSet<DocumentUri> {
        &self.dirty_files
    }

    #[must_use]
    pub fn status(&self) -> LoadStatus {
        if self.dirty_files.contains(&self.mod_file_uri) {
            LoadStatus::Dirty
        } else {
            LoadStatus::Loaded
        }
    }

    #[must_use]
    pub fn encloses(&self, uri: &DocumentUri) -> bool {
        self.mod_file_uri == *uri
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mod_file {
            Some(mod_file) => write!(
                f,
                "Module dir={} module={}",
                self.root,
                mod_file.qualified_module()
            ),
            None => write!(f, "Module dir={} module=unknown", self.root),
        }
    }
}

impl Workspace {
    /// Add a module for the config file at `mod_file_uri`, unless one with
    /// the same root exists. Returns the module root.
    pub(crate) fn new_module(&mut self, mod_file_uri: &DocumentUri) -> DocumentUri {
        let module = Module::new(mod_file_uri.clone());
        let root = module.root.clone();
        if let Some(existing) = self.modules.get_mut(&root) {
            existing.dirty_files.insert(mod_file_uri.clone());
            return root;
        }
        debug!("{} Created", module);
        self.files
            .ensure_owner(mod_file_uri, Owner::Module(root.clone()), Vec::new());
        self.modules.insert(root.clone(), module);
        self.invalidate_active_files();
        root
    }

    pub(crate) fn ensure_module(&mut self, root: &DocumentUri) -> DocumentUri {
        if self.modules.contains_key(root) {
            return root.clone();
        }
        self.new_module(&root.join(MODULE_FILE))
    }

    /// Re-read the module's config file if it is dirty. Any failure to read
    /// or parse it deletes the module along with its packages.
    pub(crate) fn reload_module(&mut self, root: &DocumentUri) -> Result<(), WorkspaceError> {
        let Some(module) = self.modules.get(root) else {
            return Err(WorkspaceError::ModuleDeleted(root.clone()));
        };
        if module.status() == LoadStatus::Loaded {
            return Ok(());
        }
        let uri = module.mod_file_uri.clone();

        let loaded = self.overlay.read_file(&uri).map_err(|err| err.to_string()).and_then(|handle| {
            ModuleFile::parse_non_strict(handle.content(), uri.path().as_str())
                .map(|mod_file| (mod_file, handle))
                .map_err(|err| err.to_string())
        });
        let (mod_file, handle) = match loaded {
            Ok(loaded) => loaded,
            Err(message) => {
                debug!("Module dir={} Error when reloading: {}", root, message);
                self.delete_module(root);
                return Err(WorkspaceError::ModuleDeleted(root.clone()));
            }
        };

        let parsed = handle.read_cue();
        self.files
            .set_syntax(&uri, parsed.syntax, std::sync::Arc::clone(handle.content()));

        let Some(module) = self.modules.get_mut(root) else {
            return Err(WorkspaceError::ModuleDeleted(root.clone()));
        };
        module.mod_file = Some(mod_file);
        module.dirty_files.remove(&uri);
        debug!("{} Reloaded", module);
        for import_path in module.packages.clone() {
            self.mark_package_dirty(&import_path);
        }
        Ok(())
    }

    /// Reload every module, dropping those whose config no longer loads.
    pub(crate) fn reload_modules(&mut self) {
        let roots: Vec<DocumentUri> = self.modules.keys().cloned().collect();
        for root in roots {
            // Failures delete the module, which is all there is to do.
            let _ = self.reload_module(&root);
        }
    }

    pub(crate) fn delete_module(&mut self, root: &DocumentUri) {
        let Some(module) = self.modules.remove(root) else {
            return;
        };
        for import_path in &module.packages {
            self.delete_package(import_path);
        }
        self.files
            .remove_owner(&module.mod_file_uri, &Owner::Module(root.clone()));
        debug!("{} Deleted", module);
        self.invalidate_active_files();
    }

    /// The import path and leaf directories of the package the file
    /// declares, or `None` when it has no package clause.
    pub fn find_import_path_for_file(
        &mut self,
        root: &DocumentUri,
        file: &DocumentUri,
    ) -> Result<Option<(ImportPath, Vec<DocumentUri>)>, WorkspaceError> {
        if !root.encloses(file) {
            return Err(WorkspaceError::OutsideModule {
                file: file.clone(),
                root: root.clone(),
            });
        }
        self.reload_module(root)?;

        // Packages never include these, so they must not be claimed.
        if file
            .file_name()
            .is_some_and(|name| name.starts_with(['.', '_']))
        {
            return Ok(None);
        }

        let handle = self.overlay.read_file(file)?;
        let parsed = handle.read_cue();
        let Some(package_name) = parsed.package_name() else {
            debug!("Module dir={} No package found for {}", root, file);
            return Ok(None);
        };

        let Some(mod_file) = self.modules.get(root).and_then(Module::mod_file) else {
            return Err(WorkspaceError::ModuleDeleted(root.clone()));
        };
        let dir = file.dir();
        let relative = dir.relative_to(root).unwrap_or_default();

        for legacy in LEGACY_DIRS {
            if let Some(rest) = strip_path_prefix(&relative, legacy).filter(|rest| !rest.is_empty()) {
                let import_path = ImportPath {
                    path: rest.to_string(),
                    version: String::new(),
                    qualifier: package_name.to_string(),
                    explicit_qualifier: true,
                }
                .canonical();
                let dirs = LEGACY_DIRS
                    .iter()
                    .map(|legacy| root.join(&format!("{legacy}/{rest}")))
                    .collect();
                return Ok(Some((import_path, dirs)));
            }
        }

        let path = if relative.is_empty() {
            mod_file.module_path().to_string()
        } else {
            format!("{}/{relative}", mod_file.module_path())
        };
        let import_path = ImportPath {
            path,
            version: mod_file.major_version().to_string(),
            qualifier: package_name.to_string(),
            explicit_qualifier: true,
        }
        .canonical();
        Ok(Some((import_path, vec![dir])))
    }

    /// Everything in the module that should reload when `file` changes: the
    /// module itself for its config file, otherwise the file's own package
    /// (created if needed) plus loaded packages that pull the file in as an
    /// ancestor. Never loads anything.
    pub fn find_packages_or_modules_for_file(
        &mut self,
        root: &DocumentUri,
        file: &DocumentUri,
    ) -> Result<Vec<Owner>, WorkspaceError> {
        let Some(module) = self.modules.get(root) else {
            return Err(WorkspaceError::ModuleDeleted(root.clone()));
        };
        if module.mod_file_uri == *file {
            return Ok(vec![Owner::Module(root.clone())]);
        }

        let Some((import_path, dirs)) = self.find_import_path_for_file(root, file)? else {
            return Ok(Vec::new());
        };
        let legacy = dirs.len() > 1;
        self.ensure_package(root, &import_path, dirs);

        let mut owners = vec![Owner::Package(import_path.clone())];
        if !legacy {
            if let Some(module) = self.modules.get(root) {
                owners.extend(
                    module
                        .packages
                        .iter()
                        .filter(|other| import_path.is_ancestor_of(other))
                        .filter(|other| {
                            self.packages
                                .get(*other)
                                .is_some_and(|package| package.status() == LoadStatus::Loaded)
                        })
                        .map(|other| Owner::Package(other.clone())),
                );
            }
        }
        Ok(owners)
    }

    /// The module a file belongs to: the deepest known module enclosing it,
    /// unless a closer `cue.mod/module.cue` exists, in which case that
    /// module is created and returned.
    pub fn find_module_for_file(
        &mut self,
        file: &DocumentUri,
    ) -> Result<Option<DocumentUri>, WorkspaceError> {
        self.reload_modules();
        let file_dir = file.dir();
        let mut candidate: Option<DocumentUri> = None;
        for root in self.modules.keys() {
            if *root == file_dir {
                return Ok(Some(root.clone()));
            }
            if root.encloses(file) && candidate.as_ref().is_none_or(|c| c.encloses(root)) {
                candidate = Some(root.clone());
            }
        }

        for dir in file_dir.ancestors().take_while(|dir| !dir.is_root()) {
            if candidate.as_ref().is_some_and(|c| dir.encloses(c)) {
                return Ok(candidate);
            }
            let mod_file = dir.join(MODULE_FILE);
            match self.overlay.read_file(&mod_file) {
                Ok(_) => return Ok(Some(self.new_module(&mod_file))),
                Err(FsError::NotFound(_) | FsError::Invalid(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(candidate)
    }

    /// Load the module's dirty packages. `None` means nothing was dirty.
    pub(crate) fn load_dirty_packages(
        &mut self,
        root: &DocumentUri,
    ) -> Result<Option<Vec<LoadedPackage>>, WorkspaceError> {
        self.reload_module(root)?;
        let Some(module) = self.modules.get(root) else {
            return Err(WorkspaceError::ModuleDeleted(root.clone()));
        };
        let Some(mod_file) = module.mod_file.as_ref() else {
            return Err(WorkspaceError::ModuleDeleted(root.clone()));
        };

        let import_paths: Vec<ImportPath> = module
            .packages
            .iter()
            .filter(|ip| {
                self.packages
                    .get(*ip)
                    .is_some_and(|package| package.status() == LoadStatus::Dirty)
            })
            .cloned()
            .collect();
        if import_paths.is_empty() {
            return Ok(None);
        }

        debug!(
            "{} Loading packages [{}]",
            module,
            import_paths.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
        );
        let request = LoadRequest {
            module_root: root,
            module_file: mod_file,
            import_paths: &import_paths,
        };
        Ok(Some(self.loader.load_packages(&self.overlay, &request)))
    }
}
