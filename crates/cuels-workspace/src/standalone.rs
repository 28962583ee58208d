//! Open files that belong to no package: no module encloses them, their
//! module config is broken, or they declare no package.

use std::sync::Arc;

use cuels_source::DocumentUri;
use cuels_syntax::ImportPath;
use tracing::debug;

use crate::definitions::Definitions;
use crate::definitions::FileDefinitions;
use crate::file::FileError;
use crate::file::Owner;
use crate::loader::FileImport;
use crate::Workspace;

#[derive(Debug, Default)]
pub(crate) struct StandaloneFile {
    pub(crate) dirty: bool,
    definitions: Option<Arc<Definitions>>,
}

impl Workspace {
    /// Make `uri` a standalone file, if it is not one already, and reload it.
    pub(crate) fn reload_standalone_file(&mut self, uri: &DocumentUri) {
        if !self.standalone.contains_key(uri) {
            debug!("StandaloneFile {} Created", uri);
            self.invalidate_active_files();
        }
        self.standalone.entry(uri.clone()).or_default().dirty = true;
        self.reload_standalone(uri);
    }

    pub(crate) fn reload_standalone_files(&mut self) {
        let dirty: Vec<DocumentUri> = self
            .standalone
            .iter()
            .filter(|(_, file)| file.dirty)
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in dirty {
            self.reload_standalone(&uri);
        }
    }

    /// Re-read and re-parse the file. A file that can no longer be read, or
    /// yields no tree at all, stops being standalone.
    fn reload_standalone(&mut self, uri: &DocumentUri) {
        let Some(file) = self.standalone.get_mut(uri) else {
            return;
        };
        if !file.dirty {
            return;
        }
        file.dirty = false;

        let handle = match self.overlay.read_file(uri) {
            Ok(handle) => handle,
            Err(err) => {
                debug!("StandaloneFile {} Error when reloading: {}", uri, err);
                self.delete_standalone_file(uri);
                return;
            }
        };
        let parsed = handle.read_cue();
        let Some(syntax) = parsed.syntax.clone() else {
            debug!("StandaloneFile {} Not a CUE file", uri);
            self.delete_standalone_file(uri);
            return;
        };

        let errors = parsed.errors.iter().map(FileError::from).collect();
        self.files
            .ensure_owner(uri, Owner::Standalone(uri.clone()), errors);
        self.files
            .set_syntax(uri, Some(Arc::clone(&syntax)), Arc::clone(handle.content()));

        let imports = syntax
            .imports
            .iter()
            .map(|spec| FileImport {
                name: spec.local_name(),
                path: ImportPath::parse(&spec.path).canonical(),
            })
            .collect();
        let definitions = Definitions::analyse(vec![FileDefinitions::new(
            uri.clone(),
            syntax,
            Arc::clone(handle.content()),
            imports,
        )]);
        if let Some(file) = self.standalone.get_mut(uri) {
            file.definitions = Some(Arc::new(definitions));
        }
        debug!("StandaloneFile {} Reloaded", uri);
    }

    pub(crate) fn delete_standalone_file(&mut self, uri: &DocumentUri) {
        if self.standalone.remove(uri).is_none() {
            return;
        }
        self.files.remove_owner(uri, &Owner::Standalone(uri.clone()));
        self.invalidate_active_files();
        debug!("StandaloneFile {} Deleted", uri);
    }

    /// Hand standalone files that now declare a package inside a loadable
    /// module over to that package. Returns whether any file moved.
    pub(crate) fn subtract_modules_and_packages(&mut self) -> bool {
        let candidates: Vec<DocumentUri> = self
            .standalone
            .keys()
            .filter(|uri| {
                self.files
                    .get(uri)
                    .and_then(|record| record.syntax())
                    .is_some_and(|syntax| syntax.package_name().is_some())
            })
            .cloned()
            .collect();

        let mut moved = false;
        for uri in candidates {
            let root = match self.find_module_for_file(&uri) {
                Ok(Some(root)) => root,
                Ok(None) => continue,
                Err(err) => {
                    debug!("StandaloneFile {} No module: {}", uri, err);
                    continue;
                }
            };
            let Ok(Some((import_path, dirs))) = self.find_import_path_for_file(&root, &uri) else {
                continue;
            };
            self.delete_standalone_file(&uri);
            let legacy = dirs.len() > 1;
            self.ensure_package(&root, &import_path, dirs);
            self.mark_file_dirty(&Owner::Package(import_path.clone()), &uri);
            if !legacy {
                let descendants: Vec<ImportPath> = self
                    .modules
                    .get(&root)
                    .into_iter()
                    .flat_map(|module| module.packages.iter())
                    .filter(|other| import_path.is_ancestor_of(other))
                    .cloned()
                    .collect();
                for other in descendants {
                    self.mark_file_dirty(&Owner::Package(other), &uri);
                }
            }
            moved = true;
        }
        moved
    }

    /// URIs of the current standalone files.
    pub fn standalone_files(&self) -> impl Iterator<Item = &DocumentUri> {
        self.standalone.keys()
    }

    pub(crate) fn standalone_definitions(&self, uri: &DocumentUri) -> Option<&Arc<Definitions>> {
        self.standalone.get(uri)?.definitions.as_ref()
    }
}
