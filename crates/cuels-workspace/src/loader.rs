//! Loading packages from directories.
//!
//! A request names the import paths wanted from one module. The loader
//! resolves each path to directories (inside the module, inside a dependency
//! module held by the registry, or in the legacy `cue.mod/{gen,pkg,usr}`
//! trees), reads the package's files through the overlay, and follows their
//! imports. Packages outside the requesting module are parsed for their
//! header only.

use std::sync::Arc;

use camino::Utf8Path;
use cuels_source::DocumentUri;
use cuels_source::FileKind;
use cuels_syntax::parse;
use cuels_syntax::ImportPath;
use cuels_syntax::ModuleFile;
use cuels_syntax::ParseMode;
use cuels_syntax::SourceFile;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::trace;

use crate::fs::FileHandle;
use crate::fs::FsError;
use crate::fs::OverlayFs;
use crate::FileError;

pub(crate) const LEGACY_DIRS: [&str; 3] = ["cue.mod/gen", "cue.mod/pkg", "cue.mod/usr"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("cannot find package {0}")]
    NotFound(String),
    #[error("no CUE files for package {package} in {dir}")]
    NoFiles { package: String, dir: DocumentUri },
    #[error("found packages {names} in {dir}")]
    Ambiguous { names: String, dir: DocumentUri },
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// What to load, on behalf of which module.
#[derive(Clone, Copy, Debug)]
pub struct LoadRequest<'a> {
    pub module_root: &'a DocumentUri,
    pub module_file: &'a ModuleFile,
    /// Canonical import paths carrying the module's major version.
    pub import_paths: &'a [ImportPath],
}

/// An import as written in a file, resolved to its canonical path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileImport {
    pub name: String,
    pub path: ImportPath,
}

#[derive(Clone, Debug)]
pub struct LoadedFile {
    pub uri: DocumentUri,
    pub syntax: Arc<SourceFile>,
    pub content: Arc<str>,
    pub errors: Vec<FileError>,
    pub imports: Vec<FileImport>,
}

#[derive(Clone, Debug)]
pub struct LoadedPackage {
    pub import_path: ImportPath,
    pub module_root: DocumentUri,
    /// Whether the package lives in a module other than the requesting one.
    pub external: bool,
    pub std_lib: bool,
    /// Directories that contributed files, leaf directories first.
    pub locations: Vec<DocumentUri>,
    pub files: Vec<LoadedFile>,
    /// Canonical paths of every package the files import.
    pub imports: Vec<ImportPath>,
    pub error: Option<LoadError>,
}

impl LoadedPackage {
    fn failed(import_path: ImportPath, module_root: DocumentUri, error: LoadError) -> Self {
        Self {
            import_path,
            module_root,
            external: false,
            std_lib: false,
            locations: Vec::new(),
            files: Vec::new(),
            imports: Vec::new(),
            error: Some(error),
        }
    }
}

pub trait PackageLoader: Send {
    /// Load the requested packages and everything they import, transitively.
    /// Failures are reported per package.
    fn load_packages(&self, fs: &OverlayFs, request: &LoadRequest<'_>) -> Vec<LoadedPackage>;
}

/// Downloaded dependency modules, laid out as `<root>/<module path>@<version>/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirRegistry {
    root: DocumentUri,
}

impl DirRegistry {
    #[must_use]
    pub fn new(root: DocumentUri) -> Self {
        Self { root }
    }

    pub fn from_path(root: &Utf8Path) -> Result<Self, cuels_source::UriError> {
        DocumentUri::from_path(root).map(Self::new)
    }

    #[must_use]
    pub fn module_root(&self, module_path: &str, version: &str) -> DocumentUri {
        self.root.join(&format!("{module_path}@{version}"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct DirLoader {
    registry: Option<DirRegistry>,
}

impl DirLoader {
    #[must_use]
    pub fn new(registry: Option<DirRegistry>) -> Self {
        Self { registry }
    }
}

impl PackageLoader for DirLoader {
    fn load_packages(&self, fs: &OverlayFs, request: &LoadRequest<'_>) -> Vec<LoadedPackage> {
        let mut session = Session {
            fs,
            request,
            registry: self.registry.as_ref(),
            seen: FxHashSet::default(),
            loaded: Vec::new(),
        };
        for import_path in request.import_paths {
            session.load_requested(import_path);
        }
        session.loaded
    }
}

/// Where an import path lives on disk.
#[derive(Debug)]
struct Resolved {
    import_path: ImportPath,
    module_root: DocumentUri,
    dirs: Vec<DocumentUri>,
    /// Files in ancestors of the leaf directory up to this root belong to the
    /// package too. Legacy vendor trees have none.
    ancestor_root: Option<DocumentUri>,
    external: bool,
    std_lib: bool,
}

struct Session<'a> {
    fs: &'a OverlayFs,
    request: &'a LoadRequest<'a>,
    registry: Option<&'a DirRegistry>,
    seen: FxHashSet<ImportPath>,
    loaded: Vec<LoadedPackage>,
}

impl Session<'_> {
    fn load_requested(&mut self, import_path: &ImportPath) {
        match self.resolve(import_path) {
            Ok(resolved) => self.load(resolved),
            Err(error) => {
                if self.seen.insert(import_path.clone()) {
                    self.loaded.push(LoadedPackage::failed(
                        import_path.clone(),
                        self.request.module_root.clone(),
                        error,
                    ));
                }
            }
        }
    }

    fn resolve(&self, import_path: &ImportPath) -> Result<Resolved, LoadError> {
        if import_path.is_std_lib() {
            return Ok(Resolved {
                import_path: import_path.canonical(),
                module_root: self.request.module_root.clone(),
                dirs: Vec::new(),
                ancestor_root: None,
                external: false,
                std_lib: true,
            });
        }

        let module_file = self.request.module_file;
        let module_path = module_file.module_path();
        let major = module_file.major_version();
        if let Some(rest) = strip_path_prefix(&import_path.path, module_path) {
            if import_path.version.is_empty() || import_path.version == major {
                let root = self.request.module_root.clone();
                return Ok(Resolved {
                    import_path: import_path.with_version(major).canonical(),
                    dirs: vec![root.join(rest)],
                    ancestor_root: Some(root.clone()),
                    module_root: root,
                    external: false,
                    std_lib: false,
                });
            }
        }

        if let Some(dep) = module_file.dependency_for(&import_path.path, &import_path.version) {
            let Some(registry) = self.registry else {
                return Err(LoadError::NotFound(import_path.to_string()));
            };
            let root = registry.module_root(dep.path(), &dep.version);
            let rest = strip_path_prefix(&import_path.path, dep.path()).unwrap_or_default();
            return Ok(Resolved {
                import_path: import_path.with_version(dep.major()).canonical(),
                dirs: vec![root.join(rest)],
                ancestor_root: Some(root.clone()),
                external: root != *self.request.module_root,
                module_root: root,
                std_lib: false,
            });
        }

        if import_path.version.is_empty() {
            let root = self.request.module_root;
            let dirs: Vec<DocumentUri> = LEGACY_DIRS
                .iter()
                .map(|dir| root.join(&format!("{dir}/{}", import_path.path)))
                .filter(|dir| self.fs.read_dir(dir).is_ok())
                .collect();
            if !dirs.is_empty() {
                return Ok(Resolved {
                    import_path: import_path.canonical(),
                    module_root: root.clone(),
                    dirs,
                    ancestor_root: None,
                    external: false,
                    std_lib: false,
                });
            }
        }

        Err(LoadError::NotFound(import_path.to_string()))
    }

    fn load(&mut self, resolved: Resolved) {
        if !self.seen.insert(resolved.import_path.clone()) {
            return;
        }
        if resolved.std_lib {
            self.loaded.push(LoadedPackage {
                import_path: resolved.import_path,
                module_root: resolved.module_root,
                external: false,
                std_lib: true,
                locations: Vec::new(),
                files: Vec::new(),
                imports: Vec::new(),
                error: None,
            });
            return;
        }

        let package = match self.read_package(&resolved) {
            Ok(package) => package,
            Err(error) => LoadedPackage::failed(
                resolved.import_path.clone(),
                resolved.module_root.clone(),
                error,
            ),
        };
        trace!(package = %package.import_path, files = package.files.len(), "Read package");

        let mut pending = Vec::new();
        for file in &package.files {
            for spec in &file.syntax.imports {
                if let Ok(next) = self.resolve(&ImportPath::parse(&spec.path)) {
                    pending.push(next);
                }
            }
        }
        self.loaded.push(package);
        for next in pending {
            self.load(next);
        }
    }

    fn read_package(&self, resolved: &Resolved) -> Result<LoadedPackage, LoadError> {
        let mut import_path = resolved.import_path.clone();
        let full = !resolved.external;

        let mut leaf_files = Vec::new();
        for dir in &resolved.dirs {
            leaf_files.extend(self.read_dir_files(dir, full).into_iter().map(|f| (dir.clone(), f)));
        }

        if import_path.qualifier.is_empty() {
            let names: Vec<&str> = leaf_files
                .iter()
                .filter_map(|(_, (syntax, ..))| syntax.package_name())
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            let dir = resolved.dirs.first().cloned().unwrap_or_else(|| resolved.module_root.clone());
            match names.as_slice() {
                [] => {
                    return Err(LoadError::NoFiles {
                        package: import_path.to_string(),
                        dir,
                    })
                }
                [name] => {
                    import_path.qualifier = (*name).to_string();
                    import_path = import_path.canonical();
                }
                _ => {
                    return Err(LoadError::Ambiguous {
                        names: names.join(", "),
                        dir,
                    })
                }
            }
        }
        let qualifier = import_path.qualifier.clone();

        let mut locations = Vec::new();
        let mut files = Vec::new();
        for (dir, file) in leaf_files {
            if file.0.package_name() == Some(qualifier.as_str()) {
                if !locations.contains(&dir) {
                    locations.push(dir);
                }
                files.push(file);
            }
        }
        if files.is_empty() {
            return Err(LoadError::NoFiles {
                package: import_path.to_string(),
                dir: resolved.dirs.first().cloned().unwrap_or_else(|| resolved.module_root.clone()),
            });
        }

        if let (Some(stop), [leaf]) = (&resolved.ancestor_root, resolved.dirs.as_slice()) {
            for dir in leaf.ancestors().skip(1).take_while(|dir| stop.encloses(dir)) {
                let matching: Vec<_> = self
                    .read_dir_files(&dir, full)
                    .into_iter()
                    .filter(|file| file.0.package_name() == Some(qualifier.as_str()))
                    .collect();
                if !matching.is_empty() {
                    locations.push(dir);
                    files.extend(matching);
                }
            }
        }

        let mut imports: Vec<ImportPath> = Vec::new();
        let loaded_files = files
            .into_iter()
            .map(|(syntax, content, uri, syntax_errors)| {
                let mut errors: Vec<FileError> = syntax_errors;
                let mut file_imports = Vec::new();
                for spec in &syntax.imports {
                    match self.resolve(&ImportPath::parse(&spec.path)) {
                        Ok(target) => {
                            if !imports.contains(&target.import_path) {
                                imports.push(target.import_path.clone());
                            }
                            file_imports.push(FileImport {
                                name: spec.local_name(),
                                path: target.import_path,
                            });
                        }
                        Err(error) if full => {
                            errors.push(FileError::new(Some(spec.path_span.start()), error.to_string()));
                        }
                        Err(_) => {}
                    }
                }
                LoadedFile {
                    uri,
                    syntax,
                    content,
                    errors,
                    imports: file_imports,
                }
            })
            .collect();

        Ok(LoadedPackage {
            import_path,
            module_root: resolved.module_root.clone(),
            external: resolved.external,
            std_lib: false,
            locations,
            files: loaded_files,
            imports,
            error: None,
        })
    }

    /// Parse every CUE file directly inside `dir`. Hidden files and files
    /// starting with `_` are skipped.
    fn read_dir_files(&self, dir: &DocumentUri, full: bool) -> Vec<ReadFile> {
        let Ok(entries) = self.fs.read_dir(dir) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .filter(|entry| !entry.is_dir && !entry.name.starts_with(['.', '_']))
            .filter(|entry| FileKind::is_cue(Utf8Path::new(&entry.name)))
            .filter_map(|entry| {
                let uri = dir.join(&entry.name);
                let handle = self.fs.read_file(&uri).ok()?;
                Some(parse_handle(&handle, uri, full))
            })
            .collect()
    }
}

/// Syntax tree, content, URI and syntax errors of one file.
type ReadFile = (Arc<SourceFile>, Arc<str>, DocumentUri, Vec<FileError>);

fn parse_handle(handle: &FileHandle, uri: DocumentUri, full: bool) -> ReadFile {
    let content = Arc::clone(handle.content());
    if full {
        let parsed = handle.read_cue();
        let errors = parsed.errors.iter().map(FileError::from).collect();
        let syntax = parsed.syntax.unwrap_or_else(|| {
            Arc::new(parse(uri.as_str(), &content, ParseMode::ImportsOnly).file)
        });
        (syntax, content, uri, errors)
    } else {
        let output = parse(uri.path().as_str(), &content, ParseMode::ImportsOnly);
        (Arc::new(output.file), content, uri, Vec::new())
    }
}

/// The `/`-separated remainder of `path` below `prefix`, or `None` when
/// `path` is not `prefix` or beneath it.
pub(crate) fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    match path.strip_prefix(prefix)? {
        "" => Some(""),
        rest => rest.strip_prefix('/'),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::SystemTime;

    use tempfile::TempDir;

    use super::*;
    use crate::fs::ContentStore;

    struct Fixture {
        dir: TempDir,
        fs: OverlayFs,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                fs: OverlayFs::new(Arc::new(ContentStore::new(std::time::Duration::ZERO))),
            }
        }

        fn root(&self) -> &Utf8Path {
            Utf8Path::from_path(self.dir.path()).unwrap()
        }

        fn write(&self, path: &str, content: &str) {
            let path = self.root().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn uri(&self, path: &str) -> DocumentUri {
            DocumentUri::from_path(self.root()).unwrap().join(path)
        }

        fn load(&self, module_dir: &str, registry: Option<&str>, paths: &[&str]) -> Vec<LoadedPackage> {
            let module_root = self.uri(module_dir);
            let source = fs::read_to_string(self.root().join(module_dir).join("cue.mod/module.cue")).unwrap();
            let module_file = ModuleFile::parse_non_strict(&source, "module.cue").unwrap();
            let import_paths: Vec<ImportPath> = paths.iter().map(|p| ImportPath::parse(p).canonical()).collect();
            let loader = DirLoader::new(registry.map(|r| DirRegistry::new(self.uri(r))));
            loader.load_packages(
                &self.fs,
                &LoadRequest {
                    module_root: &module_root,
                    module_file: &module_file,
                    import_paths: &import_paths,
                },
            )
        }
    }

    fn find<'a>(packages: &'a [LoadedPackage], path: &str) -> &'a LoadedPackage {
        let wanted = ImportPath::parse(path).canonical();
        packages
            .iter()
            .find(|p| p.import_path == wanted)
            .unwrap_or_else(|| panic!("{path} not loaded: {packages:#?}"))
    }

    mod local {
        use super::*;

        #[test]
        fn test_package_with_ancestor_files() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");
            fx.write("root.cue", "package b\nshared: 1\n");
            fx.write("a/b/b.cue", "package b\nx: 1\n");
            fx.write("a/b/other.cue", "package other\n");

            let loaded = fx.load("", None, &["example.com/app/a/b@v0"]);
            let pkg = find(&loaded, "example.com/app/a/b@v0");
            assert!(pkg.error.is_none(), "{:?}", pkg.error);
            assert!(!pkg.external);
            assert_eq!(pkg.files.len(), 2);
            assert_eq!(pkg.locations, vec![fx.uri("a/b"), fx.uri("")]);
        }

        #[test]
        fn test_imports_are_followed_and_normalized() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");
            fx.write("a/a.cue", "package a\nimport (\n\t\"example.com/app/b\"\n\t\"strings\"\n)\nx: b.y\n");
            fx.write("b/b.cue", "package b\ny: 1\n");

            let loaded = fx.load("", None, &["example.com/app/a@v0"]);
            let a = find(&loaded, "example.com/app/a@v0");
            assert_eq!(
                a.imports,
                vec![ImportPath::parse("example.com/app/b@v0"), ImportPath::parse("strings")]
            );
            assert_eq!(a.files[0].imports[0].name, "b");
            assert!(find(&loaded, "strings").std_lib);
            assert!(find(&loaded, "example.com/app/b@v0").error.is_none());
        }

        #[test]
        fn test_unresolved_import_is_a_file_error() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");
            fx.write("a/a.cue", "package a\nimport \"example.com/missing\"\n");

            let loaded = fx.load("", None, &["example.com/app/a@v0"]);
            let a = find(&loaded, "example.com/app/a@v0");
            assert!(a.error.is_none());
            assert_eq!(a.files[0].errors.len(), 1);
            assert!(a.files[0].errors[0].message.contains("cannot find package"));
        }

        #[test]
        fn test_missing_directory_errors() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");

            let loaded = fx.load("", None, &["example.com/app/gone@v0"]);
            assert!(matches!(loaded[0].error, Some(LoadError::NoFiles { .. })));
        }

        #[test]
        fn test_overlay_content_wins() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");
            fx.write("a/a.cue", "package a\n");
            fx.fs.update(|txn| {
                txn.set(&fx.uri("a/a.cue"), Arc::from("package a\nfrom: \"buffer\"\n"), SystemTime::now(), 1)
                    .unwrap();
            });

            let loaded = fx.load("", None, &["example.com/app/a@v0"]);
            assert!(find(&loaded, "example.com/app/a@v0").files[0].content.contains("buffer"));
        }

        #[test]
        fn test_syntax_errors_are_file_errors() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");
            fx.write("a/a.cue", "package a\nx: {\n");

            let loaded = fx.load("", None, &["example.com/app/a@v0"]);
            let a = find(&loaded, "example.com/app/a@v0");
            assert!(a.error.is_none());
            assert!(!a.files[0].errors.is_empty());
        }
    }

    mod dependencies {
        use super::*;

        #[test]
        fn test_registry_package_is_external_and_header_only() {
            let fx = Fixture::new();
            fx.write(
                "app/cue.mod/module.cue",
                "module: \"example.com/app\"\ndeps: \"example.com/lib@v0\": v: \"v0.1.0\"\n",
            );
            fx.write("app/a.cue", "package app\nimport \"example.com/lib\"\nx: lib.y\n");
            fx.write("reg/example.com/lib@v0.1.0/cue.mod/module.cue", "module: \"example.com/lib@v0\"\n");
            fx.write("reg/example.com/lib@v0.1.0/lib.cue", "package lib\ny: 1\n");

            let loaded = fx.load("app", Some("reg"), &["example.com/app@v0"]);
            let lib = find(&loaded, "example.com/lib@v0");
            assert!(lib.external);
            assert_eq!(lib.module_root, fx.uri("reg/example.com/lib@v0.1.0"));
            assert!(lib.files[0].syntax.decls.is_empty());
        }

        #[test]
        fn test_dependency_without_registry_is_unresolved() {
            let fx = Fixture::new();
            fx.write(
                "cue.mod/module.cue",
                "module: \"example.com/app\"\ndeps: \"example.com/lib@v0\": v: \"v0.1.0\"\n",
            );
            fx.write("a.cue", "package app\nimport \"example.com/lib\"\n");

            let loaded = fx.load("", None, &["example.com/app@v0"]);
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].files[0].errors.len(), 1);
        }

        #[test]
        fn test_legacy_vendor_dirs() {
            let fx = Fixture::new();
            fx.write("cue.mod/module.cue", "module: \"example.com/app\"\n");
            fx.write("cue.mod/gen/k8s.io/api/gen.cue", "package api\nx: 1\n");
            fx.write("cue.mod/usr/k8s.io/api/usr.cue", "package api\ny: 1\n");
            fx.write("a.cue", "package app\nimport \"k8s.io/api\"\n");

            let loaded = fx.load("", None, &["example.com/app@v0"]);
            let api = find(&loaded, "k8s.io/api");
            assert!(!api.external);
            assert_eq!(api.files.len(), 2);
            assert_eq!(api.locations.len(), 2);
        }
    }

    #[test]
    fn test_strip_path_prefix() {
        assert_eq!(strip_path_prefix("a.com/x/y", "a.com/x"), Some("y"));
        assert_eq!(strip_path_prefix("a.com/x", "a.com/x"), Some(""));
        assert_eq!(strip_path_prefix("a.com/xy", "a.com/x"), None);
    }
}
