use std::collections::BTreeSet;
use std::sync::Arc;

use cuels_source::DocumentUri;
use cuels_syntax::ImportPath;
use tracing::debug;

use crate::definitions::Definitions;
use crate::file::Owner;
use crate::loader::LoadedPackage;
use crate::Workspace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Dirty,
    Loaded,
}

/// A package of one module: the files of its leaf directories plus those of
/// ancestor directories declaring the same package name.
#[derive(Debug)]
pub struct Package {
    module_root: DocumentUri,
    import_path: ImportPath,
    leaf_dirs: Vec<DocumentUri>,
    unit: Option<Arc<LoadedPackage>>,
    imports: BTreeSet<ImportPath>,
    imported_by: BTreeSet<ImportPath>,
    status: LoadStatus,
    definitions: Option<Arc<Definitions>>,
}

impl Package {
    pub(crate) fn new(
        module_root: DocumentUri,
        import_path: ImportPath,
        mut leaf_dirs: Vec<DocumentUri>,
    ) -> Self {
        leaf_dirs.sort();
        leaf_dirs.dedup();
        Self {
            module_root,
            import_path,
            leaf_dirs,
            unit: None,
            imports: BTreeSet::new(),
            imported_by: BTreeSet::new(),
            status: LoadStatus::Dirty,
            definitions: None,
        }
    }

    #[must_use]
    pub fn module_root(&self) -> &DocumentUri {
        &self.module_root
    }

    #[must_use]
    pub fn import_path(&self) -> &ImportPath {
        &self.import_path
    }

    #[must_use]
    pub fn leaf_dirs(&self) -> &[DocumentUri] {
        &self.leaf_dirs
    }

    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.status
    }

    /// The most recent load result. External packages hold one too, parsed
    /// for imports only.
    #[must_use]
    pub fn unit(&self) -> Option<&Arc<LoadedPackage>> {
        self.unit.as_ref()
    }

    #[must_use]
    pub fn imports(&self) -> &BTreeSet<ImportPath> {
        &self.imports
    }

    #[must_use]
    pub fn imported_by(&self) -> &BTreeSet<ImportPath> {
        &self.imported_by
    }

    #[must_use]
    pub fn definitions(&self) -> Option<&Arc<Definitions>> {
        self.definitions.as_ref()
    }

    /// Whether `uri` sits directly in one of the leaf directories.
    #[must_use]
    pub fn encloses(&self, uri: &DocumentUri) -> bool {
        self.leaf_dirs.contains(&uri.dir())
    }

    /// URIs of the files in the last load.
    pub fn files(&self) -> impl Iterator<Item = &DocumentUri> {
        self.unit
            .iter()
            .flat_map(|unit| unit.files.iter().map(|file| &file.uri))
    }

    pub(crate) fn set_unit(&mut self, unit: Arc<LoadedPackage>) {
        self.unit = Some(unit);
    }

    pub(crate) fn set_loaded(&mut self, definitions: Definitions) {
        self.status = LoadStatus::Loaded;
        self.definitions = Some(Arc::new(definitions));
    }
}

impl Workspace {
    /// Return the package for `import_path`, creating it in the module at
    /// `module_root` when it does not exist yet.
    pub(crate) fn ensure_package(
        &mut self,
        module_root: &DocumentUri,
        import_path: &ImportPath,
        leaf_dirs: Vec<DocumentUri>,
    ) {
        if self.packages.contains_key(import_path) {
            return;
        }
        let Some(module) = self.modules.get_mut(module_root) else {
            panic!("package {import_path} created in unknown module {module_root}");
        };
        module.packages.insert(import_path.clone());
        let package = Package::new(module_root.clone(), import_path.clone(), leaf_dirs);
        debug!("Package created: dirs={:?} importPath={}", package.leaf_dirs, import_path);
        self.packages.insert(import_path.clone(), package);
        self.invalidate_active_files();
    }

    /// Mark a package dirty, and every package that imports it, directly or
    /// not. Packages already dirty stop the walk.
    pub(crate) fn mark_package_dirty(&mut self, import_path: &ImportPath) {
        let mut worklist = vec![import_path.clone()];
        while let Some(next) = worklist.pop() {
            let Some(package) = self.packages.get_mut(&next) else {
                continue;
            };
            if package.status == LoadStatus::Dirty && next != *import_path {
                continue;
            }
            package.status = LoadStatus::Dirty;
            worklist.extend(package.imported_by.iter().cloned());
        }
    }

    /// Remove a package from its module and from the import graph, and drop
    /// its ownership of files.
    pub(crate) fn delete_package(&mut self, import_path: &ImportPath) {
        let Some(package) = self.packages.remove(import_path) else {
            return;
        };
        debug!("Package deleted: {}", import_path);
        if let Some(module) = self.modules.get_mut(&package.module_root) {
            module.packages.remove(import_path);
        }
        for imported in &package.imports {
            if let Some(other) = self.packages.get_mut(imported) {
                other.imported_by.remove(import_path);
            }
        }
        for importer in &package.imported_by {
            if let Some(other) = self.packages.get_mut(importer) {
                other.imports.remove(import_path);
            }
        }
        let owner = Owner::Package(import_path.clone());
        for uri in package.files() {
            self.files.remove_owner(uri, &owner);
        }
        self.invalidate_active_files();
    }

    /// Bring the package's edges in line with the imports of its current
    /// unit. Imports of packages that do not exist are left unlinked.
    pub(crate) fn link_imports(&mut self, import_path: &ImportPath) {
        let Some(package) = self.packages.get(import_path) else {
            return;
        };
        let wanted: BTreeSet<ImportPath> = package
            .unit
            .iter()
            .flat_map(|unit| unit.imports.iter())
            .filter(|imported| *imported != import_path && self.packages.contains_key(*imported))
            .cloned()
            .collect();
        let stale: Vec<ImportPath> = package.imports.difference(&wanted).cloned().collect();

        for imported in &stale {
            if let Some(other) = self.packages.get_mut(imported) {
                other.imported_by.remove(import_path);
            }
        }
        for imported in &wanted {
            if let Some(other) = self.packages.get_mut(imported) {
                other.imported_by.insert(import_path.clone());
            }
        }
        if let Some(package) = self.packages.get_mut(import_path) {
            package.imports = wanted;
        }
    }
}
