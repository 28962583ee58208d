//! Bringing dirty packages up to date.
//!
//! Each pass loads the dirty packages of every module, folds the results
//! back into the package arena, repairs the import graph, and then looks for
//! dirty files that no reloaded package claimed. Such files have usually
//! moved to a package that is not loaded yet, so they are dispatched again
//! and the pass repeats.

use std::collections::BTreeMap;
use std::sync::Arc;

use cuels_source::DocumentUri;
use cuels_syntax::ImportPath;
use rustc_hash::FxHashSet;
use tracing::debug;
use tracing::warn;

use crate::definitions::Definitions;
use crate::file::FileError;
use crate::file::Owner;
use crate::loader::LoadedPackage;
use crate::package::LoadStatus;
use crate::Workspace;

pub(crate) const NOT_CONVERGED: &str = "package reload did not converge";

impl Workspace {
    /// Reload dirty packages until no dirty file is left unclaimed, or the
    /// pass limit is reached.
    pub(crate) fn reload_packages(&mut self) {
        for _ in 0..self.max_iterations {
            if !self.reload_pass() {
                return;
            }
        }
        self.report_stalled();
    }

    /// One pass. Returns whether another one is needed.
    fn reload_pass(&mut self) -> bool {
        let roots: Vec<DocumentUri> = self.modules.keys().cloned().collect();
        let mut loaded: Vec<LoadedPackage> = Vec::new();
        let mut dirty_files: BTreeMap<DocumentUri, DocumentUri> = BTreeMap::new();

        for root in roots {
            match self.load_dirty_packages(&root) {
                Ok(Some(packages)) => {
                    loaded.extend(packages);
                    if let Some(module) = self.modules.get(&root) {
                        for file in &module.dirty_files {
                            dirty_files.insert(file.clone(), root.clone());
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => debug!("Skipping module: {}", err),
            }
        }

        loaded.retain(|package| !package.std_lib);
        // Local results first, so that a package reached both directly and
        // as an import of another module is taken from the direct load.
        loaded.sort_by_key(|package| package.external);

        let mut seen: FxHashSet<ImportPath> = FxHashSet::default();
        let mut relink: Vec<ImportPath> = Vec::new();
        let mut repeat = false;

        for unit in loaded {
            let import_path = unit.import_path.canonical();
            if !seen.insert(import_path.clone()) {
                continue;
            }

            let root = self.ensure_module(&unit.module_root);
            if self.reload_module(&root).is_err() {
                continue;
            }

            if let Some(error) = &unit.error {
                debug!("Package {} Error when reloading: {}", import_path, error);
                self.delete_package(&import_path);
                continue;
            }

            if !self.packages.contains_key(&import_path) {
                self.ensure_package(&root, &import_path, leaf_dirs(&unit.locations));
            }

            let unit = Arc::new(unit);
            if unit.external {
                if let Some(package) = self.packages.get_mut(&import_path) {
                    package.set_unit(unit);
                    // Only headers were parsed. A package never loaded in
                    // full stays dirty in its own module for the next pass.
                    if package.status() != LoadStatus::Loaded {
                        repeat = true;
                    }
                }
            } else {
                self.apply_local_unit(&import_path, unit, &mut dirty_files);
            }
            relink.push(import_path);
        }

        for import_path in &relink {
            self.link_imports(import_path);
        }

        for (file, root) in dirty_files {
            match self.find_packages_or_modules_for_file(&root, &file) {
                Ok(owners) if !owners.is_empty() => {
                    for owner in &owners {
                        self.mark_file_dirty(owner, &file);
                    }
                    repeat = true;
                }
                Ok(_) => {
                    debug!("No package for dirty file {}", file);
                    self.forget_dirty_file(&root, &file);
                }
                Err(err) => {
                    debug!("Dropping dirty file {}: {}", file, err);
                    self.forget_dirty_file(&root, &file);
                }
            }
        }

        repeat
    }

    fn apply_local_unit(
        &mut self,
        import_path: &ImportPath,
        unit: Arc<LoadedPackage>,
        dirty_files: &mut BTreeMap<DocumentUri, DocumentUri>,
    ) {
        let Some(package) = self.packages.get(import_path) else {
            return;
        };
        let owner = Owner::Package(import_path.clone());
        let old_files: Vec<DocumentUri> = package.files().cloned().collect();

        for file in &unit.files {
            self.files
                .ensure_owner(&file.uri, owner.clone(), file.errors.clone());
            self.files.set_syntax(
                &file.uri,
                Some(Arc::clone(&file.syntax)),
                Arc::clone(&file.content),
            );
            if let Some(root) = dirty_files.remove(&file.uri) {
                if let Some(module) = self.modules.get_mut(&root) {
                    module.dirty_files.remove(&file.uri);
                }
            }
        }
        for uri in old_files {
            if !unit.files.iter().any(|file| file.uri == uri) {
                self.files.remove_owner(&uri, &owner);
            }
        }

        let definitions = Definitions::from_loaded(&unit.files);
        if let Some(package) = self.packages.get_mut(import_path) {
            package.set_unit(unit);
            package.set_loaded(definitions);
            debug!(
                "Package Loaded dirs={:?} importPath={}",
                package.leaf_dirs(),
                import_path
            );
        }
        self.invalidate_active_files();
    }

    fn forget_dirty_file(&mut self, root: &DocumentUri, file: &DocumentUri) {
        if let Some(module) = self.modules.get_mut(root) {
            module.dirty_files.remove(file);
        }
    }

    fn report_stalled(&mut self) {
        warn!(
            "Package reload did not converge after {} passes",
            self.max_iterations
        );
        let mut stalled = Vec::new();
        for (root, module) in &self.modules {
            for file in &module.dirty_files {
                if *file != *module.mod_file_uri() {
                    stalled.push((file.clone(), root.clone()));
                }
            }
        }
        for (file, root) in &stalled {
            self.files.ensure_owner(
                file,
                Owner::Module(root.clone()),
                vec![FileError::new(None, NOT_CONVERGED)],
            );
        }
        self.stalled.extend(stalled);
    }

    /// Withdraw the errors left by an earlier reload that gave up.
    pub(crate) fn clear_stalled(&mut self) {
        for (file, root) in std::mem::take(&mut self.stalled) {
            self.files.remove_owner(&file, &Owner::Module(root));
        }
    }
}

/// The directories a package's own files live in: every location that does
/// not enclose another one. Ancestor directories only contribute through the
/// ancestor-import rule.
fn leaf_dirs(locations: &[DocumentUri]) -> Vec<DocumentUri> {
    locations
        .iter()
        .filter(|dir| {
            !locations
                .iter()
                .any(|other| other != *dir && dir.encloses(other))
        })
        .cloned()
        .collect()
}
