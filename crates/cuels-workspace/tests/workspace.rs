use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use cuels_source::DocumentUri;
use cuels_syntax::ImportPath;
use cuels_workspace::fs::ContentStore;
use cuels_workspace::DiagnosticsLog;
use cuels_workspace::DirLoader;
use cuels_workspace::DirRegistry;
use cuels_workspace::FileAction;
use cuels_workspace::FileModification;
use cuels_workspace::LoadStatus;
use cuels_workspace::LoadedPackage;
use cuels_workspace::Owner;
use cuels_workspace::Package;
use cuels_workspace::Workspace;
use cuels_workspace::WorkspaceError;
use tempfile::TempDir;
use tower_lsp_server::ls_types::Position;

const MODULE: &str = "module: \"example.com/app@v0\"\nlanguage: version: \"v0.9.0\"\n";

struct Fixture {
    dir: TempDir,
    log: Arc<DiagnosticsLog>,
    workspace: Workspace,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let registry = DirRegistry::from_path(&root.join("registry")).unwrap();
        // Files rewritten within one clock tick must still be re-read, so
        // nothing is ever old enough to be cached.
        let store = Arc::new(ContentStore::new(Duration::from_secs(3600)));
        let log = Arc::new(DiagnosticsLog::new());
        let workspace = Workspace::new(
            store,
            Box::new(DirLoader::new(Some(registry))),
            Arc::clone(&log) as Arc<dyn cuels_workspace::DiagnosticsSink>,
        );
        Self { dir, log, workspace }
    }

    /// A fixture with a module at its root.
    fn with_module() -> Self {
        let fx = Self::new();
        fx.write("cue.mod/module.cue", MODULE);
        fx
    }

    fn root(&self) -> &Utf8Path {
        Utf8Path::from_path(self.dir.path()).unwrap()
    }

    fn uri(&self, path: &str) -> DocumentUri {
        DocumentUri::from_path(self.root()).unwrap().join(path)
    }

    fn write(&self, path: &str, content: &str) {
        let path = self.root().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn apply(&mut self, modifications: Vec<FileModification>) {
        self.workspace.did_modify_files(&modifications).unwrap();
    }

    fn open(&mut self, path: &str, text: &str) {
        let uri = self.uri(path);
        self.apply(vec![FileModification::open(uri, 1, text)]);
    }

    fn disk_change(&mut self, path: &str, action: FileAction) {
        let uri = self.uri(path);
        self.apply(vec![FileModification::on_disk(uri, action)]);
    }

    fn package(&self, import_path: &str) -> &Package {
        self.workspace
            .package(&ImportPath::parse(import_path).canonical())
            .unwrap_or_else(|| panic!("no package {import_path}"))
    }

    fn has_package(&self, import_path: &str) -> bool {
        self.workspace
            .package(&ImportPath::parse(import_path).canonical())
            .is_some()
    }

    fn unit(&self, import_path: &str) -> Arc<LoadedPackage> {
        Arc::clone(self.package(import_path).unit().unwrap())
    }

    fn owners(&self, path: &str) -> Vec<Owner> {
        self.workspace
            .file(&self.uri(path))
            .map(|record| record.owners().cloned().collect())
            .unwrap_or_default()
    }
}

fn package_owner(import_path: &str) -> Owner {
    Owner::Package(ImportPath::parse(import_path).canonical())
}

fn import_path(raw: &str) -> ImportPath {
    ImportPath::parse(raw).canonical()
}

/// Position of the first occurrence of `needle` in `text`.
fn position(text: &str, needle: &str) -> Position {
    let offset = text.find(needle).unwrap();
    let before = &text[..offset];
    let line = before.matches('\n').count();
    let character = offset - before.rfind('\n').map_or(0, |idx| idx + 1);
    Position::new(u32::try_from(line).unwrap(), u32::try_from(character).unwrap())
}

mod loading {
    use super::*;

    const A: &str = "package a\nimport \"example.com/app/b\"\nx: b.y\n";

    #[test]
    fn test_open_loads_package_and_imports() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", A);
        fx.write("b/b.cue", "package b\ny: 1\n");

        fx.open("a/a.cue", A);

        let a = fx.package("example.com/app/a@v0");
        assert_eq!(a.status(), LoadStatus::Loaded);
        assert_eq!(a.module_root(), &fx.uri(""));
        assert_eq!(a.leaf_dirs(), [fx.uri("a")]);
        assert_eq!(fx.package("example.com/app/b@v0").status(), LoadStatus::Loaded);
        assert_eq!(fx.owners("a/a.cue"), vec![package_owner("example.com/app/a@v0")]);
        assert_eq!(fx.owners("b/b.cue"), vec![package_owner("example.com/app/b@v0")]);
        assert_eq!(fx.log.get(&fx.uri("a/a.cue")), Some(Vec::new()));
    }

    #[test]
    fn test_import_graph_is_symmetric() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", A);
        fx.write("b/b.cue", "package b\ny: 1\n");
        fx.open("a/a.cue", A);

        let a = import_path("example.com/app/a@v0");
        let b = import_path("example.com/app/b@v0");
        assert!(fx.package("example.com/app/a@v0").imports().contains(&b));
        assert!(fx.package("example.com/app/b@v0").imported_by().contains(&a));
        for package in fx.workspace.packages() {
            for imported in package.imports() {
                let other = fx.workspace.package(imported).unwrap();
                assert!(other.imported_by().contains(package.import_path()));
            }
            for importer in package.imported_by() {
                let other = fx.workspace.package(importer).unwrap();
                assert!(other.imports().contains(package.import_path()));
            }
        }
    }

    #[test]
    fn test_reload_without_changes_is_a_no_op() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", A);
        fx.write("b/b.cue", "package b\ny: 1\n");
        fx.open("a/a.cue", A);

        let before = fx.unit("example.com/app/a@v0");
        let published = fx.log.publish_count();
        fx.apply(Vec::new());
        fx.apply(vec![FileModification::save(fx.uri("a/a.cue"))]);

        assert!(Arc::ptr_eq(&before, &fx.unit("example.com/app/a@v0")));
        assert_eq!(fx.log.publish_count(), published);
    }

    #[test]
    fn test_unresolved_import_is_reported() {
        let mut fx = Fixture::with_module();
        let text = "package a\nimport \"example.com/missing\"\nx: 1\n";
        fx.write("a/a.cue", text);
        fx.open("a/a.cue", text);

        let diagnostics = fx.log.get(&fx.uri("a/a.cue")).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("example.com/missing"));
        assert_eq!(fx.package("example.com/app/a@v0").status(), LoadStatus::Loaded);
    }

    #[test]
    fn test_ancestor_files_belong_to_descendant_package() {
        let mut fx = Fixture::with_module();
        let root_text = "package a\nshared: 1\n";
        fx.write("root.cue", root_text);
        fx.write("a/a.cue", "package a\nx: shared\n");
        fx.open("a/a.cue", "package a\nx: shared\n");

        assert_eq!(fx.owners("root.cue"), vec![package_owner("example.com/app/a@v0")]);
        assert_eq!(fx.package("example.com/app/a@v0").leaf_dirs(), [fx.uri("a")]);

        fx.open("root.cue", root_text);
        let mut owners = fx.owners("root.cue");
        owners.sort();
        let mut expected = vec![
            package_owner("example.com/app/a@v0"),
            package_owner("example.com/app@v0:a"),
        ];
        expected.sort();
        assert_eq!(owners, expected);

        let child = fx.unit("example.com/app/a@v0");
        let parent = fx.unit("example.com/app@v0:a");
        fx.apply(vec![FileModification::replace(
            fx.uri("root.cue"),
            2,
            "package a\nshared: 2\n",
        )]);
        assert!(!Arc::ptr_eq(&child, &fx.unit("example.com/app/a@v0")));
        assert!(!Arc::ptr_eq(&parent, &fx.unit("example.com/app@v0:a")));
    }

    #[test]
    fn test_unloaded_descendant_is_not_an_owner() {
        let mut fx = Fixture::with_module();
        let root_text = "package a\nshared: 1\n";
        fx.write("root.cue", root_text);
        fx.write("a/a.cue", "package a\nx: shared\n");

        fx.open("root.cue", root_text);

        assert_eq!(fx.owners("root.cue"), vec![package_owner("example.com/app@v0:a")]);
        assert!(!fx.has_package("example.com/app/a@v0"));
    }

    #[test]
    fn test_file_outside_module_has_no_import_path() {
        let mut fx = Fixture::with_module();
        fx.open("a/a.cue", "package a\nx: 1\n");
        let outside = DocumentUri::parse("file:///elsewhere/x.cue").unwrap();

        let err = fx
            .workspace
            .find_import_path_for_file(&fx.uri(""), &outside)
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::OutsideModule { .. }));
    }

    #[test]
    fn test_external_dependency_is_loaded_in_full() {
        let mut fx = Fixture::new();
        fx.write(
            "app/cue.mod/module.cue",
            "module: \"example.com/app@v0\"\ndeps: {\n\t\"example.com/dep@v0\": {\n\t\tv: \"v0.1.0\"\n\t}\n}\n",
        );
        fx.write(
            "registry/example.com/dep@v0.1.0/cue.mod/module.cue",
            "module: \"example.com/dep@v0\"\n",
        );
        fx.write(
            "registry/example.com/dep@v0.1.0/d.cue",
            "package dep\n// The answer.\nanswer: 42\n",
        );
        let text = "package a\nimport \"example.com/dep\"\nx: dep.answer\n";
        fx.write("app/a/a.cue", text);
        fx.open("app/a/a.cue", text);

        let dep = fx.package("example.com/dep@v0");
        assert_eq!(dep.status(), LoadStatus::Loaded);
        assert_eq!(dep.module_root(), &fx.uri("registry/example.com/dep@v0.1.0"));
        assert!(dep.definitions().is_some());
        assert!(dep.imported_by().contains(&import_path("example.com/app/a@v0")));
        assert!(fx.workspace.module(&fx.uri("registry/example.com/dep@v0.1.0")).is_some());

        let uri = fx.uri("app/a/a.cue");
        let hover = fx.workspace.hover(&uri, position(text, "answer")).unwrap();
        let tower_lsp_server::ls_types::HoverContents::Markup(markup) = hover.contents else {
            panic!("expected markup");
        };
        assert!(markup.value.starts_with("The answer."), "{}", markup.value);
    }
}

mod invalidation {
    use super::*;

    #[test]
    fn test_change_dirties_importers_transitively() {
        let mut fx = Fixture::with_module();
        let a = "package a\nimport \"example.com/app/b\"\nx: b.y\n";
        fx.write("a/a.cue", a);
        fx.write("b/b.cue", "package b\nimport \"example.com/app/c\"\ny: c.z\n");
        fx.write("c/c.cue", "package c\nz: 1\n");
        fx.write("e/e.cue", "package e\nw: 1\n");
        fx.apply(vec![
            FileModification::open(fx.uri("a/a.cue"), 1, a),
            FileModification::open(fx.uri("e/e.cue"), 1, "package e\nw: 1\n"),
        ]);

        let units: Vec<_> = ["a", "b", "c", "e"]
            .iter()
            .map(|name| fx.unit(&format!("example.com/app/{name}@v0")))
            .collect();

        fx.write("c/c.cue", "package c\nz: 2\n");
        fx.disk_change("c/c.cue", FileAction::Change);

        for (name, before) in ["a", "b", "c"].iter().zip(&units) {
            let after = fx.unit(&format!("example.com/app/{name}@v0"));
            assert!(!Arc::ptr_eq(before, &after), "{name} was not reloaded");
        }
        assert!(Arc::ptr_eq(&units[3], &fx.unit("example.com/app/e@v0")));
        let c = fx.package("example.com/app/c@v0").definitions().unwrap();
        assert!(c.file(&fx.uri("c/c.cue")).unwrap().content().contains("z: 2"));
    }

    #[test]
    fn test_module_edit_dirties_every_package() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.write("b/b.cue", "package b\ny: 1\n");
        fx.apply(vec![
            FileModification::open(fx.uri("a/a.cue"), 1, "package a\nx: 1\n"),
            FileModification::open(fx.uri("b/b.cue"), 1, "package b\ny: 1\n"),
        ]);
        let a = fx.unit("example.com/app/a@v0");
        let b = fx.unit("example.com/app/b@v0");

        fx.write("cue.mod/module.cue", &format!("{MODULE}// edited\n"));
        fx.disk_change("cue.mod/module.cue", FileAction::Change);

        assert!(!Arc::ptr_eq(&a, &fx.unit("example.com/app/a@v0")));
        assert!(!Arc::ptr_eq(&b, &fx.unit("example.com/app/b@v0")));
        assert_eq!(fx.workspace.module(&fx.uri("")).unwrap().status(), LoadStatus::Loaded);
    }

    #[test]
    fn test_broken_module_file_deletes_module() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.open("a/a.cue", "package a\nx: 1\n");
        assert!(fx.has_package("example.com/app/a@v0"));

        fx.write("cue.mod/module.cue", "language: version: \"v0.9.0\"\n");
        fx.disk_change("cue.mod/module.cue", FileAction::Change);

        assert!(fx.workspace.module(&fx.uri("")).is_none());
        assert!(!fx.has_package("example.com/app/a@v0"));
        // The open file is kept alive on its own.
        assert_eq!(
            fx.owners("a/a.cue"),
            vec![Owner::Standalone(fx.uri("a/a.cue"))]
        );
    }

    #[test]
    fn test_package_rename_moves_file() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.open("a/a.cue", "package a\nx: 1\n");

        fx.apply(vec![FileModification::replace(
            fx.uri("a/a.cue"),
            2,
            "package z\nx: 1\n",
        )]);

        assert!(!fx.has_package("example.com/app/a@v0"));
        let z = fx.package("example.com/app/a@v0:z");
        assert_eq!(z.status(), LoadStatus::Loaded);
        assert_eq!(fx.owners("a/a.cue"), vec![package_owner("example.com/app/a@v0:z")]);
    }

    #[test]
    fn test_deleted_directory_dirties_its_files() {
        let mut fx = Fixture::with_module();
        let a = "package a\nimport \"example.com/app/b\"\nx: b.y\n";
        fx.write("a/a.cue", a);
        fx.write("b/b.cue", "package b\ny: 1\n");
        fx.open("a/a.cue", a);
        assert!(fx.has_package("example.com/app/b@v0"));

        fs::remove_dir_all(fx.root().join("b")).unwrap();
        fx.disk_change("b", FileAction::Delete);

        assert!(!fx.has_package("example.com/app/b@v0"));
        assert!(fx.package("example.com/app/a@v0").imports().is_empty());
        assert!(fx.workspace.file(&fx.uri("b/b.cue")).is_none());
    }

    #[test]
    fn test_stalled_reload_is_reported_then_cleared() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.open("a/a.cue", "package a\nx: 1\n");
        // A rename needs a second pass to settle.
        fx.workspace.set_max_reload_iterations(1);

        fx.apply(vec![FileModification::replace(
            fx.uri("a/a.cue"),
            2,
            "package z\nx: 1\n",
        )]);
        let diagnostics = fx.log.get(&fx.uri("a/a.cue")).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("did not converge"));

        fx.apply(Vec::new());
        assert_eq!(fx.log.get(&fx.uri("a/a.cue")), Some(Vec::new()));
        assert_eq!(fx.owners("a/a.cue"), vec![package_owner("example.com/app/a@v0:z")]);
    }
}

mod overlays {
    use super::*;

    fn top_level(fx: &Fixture) -> Vec<String> {
        fx.package("example.com/app/a@v0")
            .definitions()
            .unwrap()
            .top_level_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_buffer_wins_over_disk_until_closed() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.open("a/a.cue", "package a\ny: 2\n");
        assert_eq!(top_level(&fx), ["y"]);

        fx.write("a/a.cue", "package a\nz: 3\n");
        fx.disk_change("a/a.cue", FileAction::Change);
        assert_eq!(top_level(&fx), ["y"]);

        fx.apply(vec![FileModification::close(fx.uri("a/a.cue"))]);
        assert_eq!(top_level(&fx), ["z"]);

        // Still owned, so the record outlives the buffer.
        let record = fx.workspace.file(&fx.uri("a/a.cue")).unwrap();
        assert!(!record.is_open());
        assert_eq!(record.version(), None);
        assert!(record.content().contains("z: 3"));
    }

    #[test]
    fn test_versions_must_increase() {
        let mut fx = Fixture::new();
        let uri = fx.uri("loose.cue");
        fx.apply(vec![FileModification::open(uri.clone(), 1, "x: 1\n")]);

        let err = fx
            .workspace
            .did_modify_files(&[FileModification::replace(uri.clone(), 1, "x: 2\n")])
            .unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::NonIncreasingVersion { existing: 1, supplied: 1, .. }
        ));

        let entry = fx.workspace.overlay().view(|txn| txn.get(&uri)).unwrap();
        assert_eq!(entry.version(), 1);
        assert_eq!(&*entry.content(), "x: 1\n");

        fx.apply(vec![FileModification::replace(uri.clone(), 2, "x: 2\n")]);
        assert_eq!(fx.workspace.file(&uri).unwrap().version(), Some(2));
    }

    #[test]
    fn test_rejected_batch_leaves_no_partial_edits() {
        let mut fx = Fixture::new();
        let a = fx.uri("a.cue");
        let b = fx.uri("b.cue");
        fx.apply(vec![FileModification::open(a.clone(), 1, "x: 1\n")]);

        let err = fx
            .workspace
            .did_modify_files(&[
                FileModification::open(b.clone(), 1, "y: 1\n"),
                FileModification::replace(a.clone(), 1, "x: 2\n"),
            ])
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::NonIncreasingVersion { .. }));

        assert!(fx.workspace.overlay().view(|txn| txn.get(&b)).is_err());
        assert!(fx.workspace.file(&b).is_none());

        fx.apply(vec![FileModification::open(b.clone(), 1, "y: 1\n")]);
        assert_eq!(fx.workspace.file(&b).unwrap().version(), Some(1));
        assert!(fx.workspace.standalone_files().any(|uri| *uri == b));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_module_dir_does_not_stop_the_batch() {
        use std::os::unix::fs::PermissionsExt;

        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.write("x/cue.mod/module.cue", MODULE);
        let locked = fx.root().join("x/cue.mod");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::metadata(locked.join("module.cue")).is_ok() {
            // Permission bits are not enforced for this user.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = fx.workspace.did_modify_files(&[
            FileModification::open(fx.uri("a/a.cue"), 1, "package a\nx: 1\n"),
            FileModification::open(fx.uri("x/y.cue"), 1, "y: 1\n"),
        ]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(
            result,
            Err(WorkspaceError::Fs(cuels_workspace::fs::FsError::Io { .. }))
        ));
        assert_eq!(fx.package("example.com/app/a@v0").status(), LoadStatus::Loaded);
        assert_eq!(fx.log.get(&fx.uri("a/a.cue")), Some(Vec::new()));
    }

    #[test]
    fn test_malformed_events_are_rejected() {
        let mut fx = Fixture::new();
        let uri = fx.uri("loose.cue");

        let err = fx
            .workspace
            .did_modify_files(&[FileModification::replace(uri.clone(), 3, "x: 1\n")])
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::UnopenedOverlay(_)));

        let empty = FileModification {
            changes: Vec::new(),
            ..FileModification::open(uri.clone(), 1, "")
        };
        let err = fx.workspace.did_modify_files(&[empty]).unwrap_err();
        assert!(matches!(err, WorkspaceError::NoContentChanges(_)));

        let create = FileModification {
            action: FileAction::Create,
            ..FileModification::save(uri.clone())
        };
        let err = fx.workspace.did_modify_files(&[create]).unwrap_err();
        assert!(matches!(err, WorkspaceError::UnsupportedAction { .. }));
    }
}

mod standalone {
    use super::*;

    #[test]
    fn test_file_outside_modules_is_standalone() {
        let mut fx = Fixture::new();
        let text = "x: 1\ny: x\n";
        fx.open("loose/x.cue", text);
        let uri = fx.uri("loose/x.cue");

        assert_eq!(fx.workspace.standalone_files().collect::<Vec<_>>(), [&uri]);
        assert_eq!(fx.owners("loose/x.cue"), vec![Owner::Standalone(uri.clone())]);

        let found = fx.workspace.definition(&uri, position(text, "x\n"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, Position::new(0, 0));

        fx.apply(vec![FileModification::close(uri.clone())]);
        assert_eq!(fx.workspace.standalone_files().count(), 0);
        assert!(fx.workspace.file(&uri).is_none());
    }

    #[test]
    fn test_syntax_errors_are_published_and_cleared() {
        let mut fx = Fixture::new();
        let uri = fx.uri("broken.cue");
        fx.open("broken.cue", "x: {\n");
        assert!(!fx.log.get(&uri).unwrap().is_empty());

        fx.apply(vec![FileModification::replace(uri.clone(), 2, "x: {}\n")]);
        assert_eq!(fx.log.get(&uri), Some(Vec::new()));
    }

    #[test]
    fn test_gaining_a_package_clause_joins_the_package() {
        let mut fx = Fixture::with_module();
        fx.open("a/a.cue", "x: 1\n");
        let uri = fx.uri("a/a.cue");
        assert_eq!(fx.owners("a/a.cue"), vec![Owner::Standalone(uri.clone())]);

        fx.apply(vec![FileModification::replace(uri, 2, "package a\nx: 1\n")]);

        assert_eq!(fx.workspace.standalone_files().count(), 0);
        assert_eq!(fx.owners("a/a.cue"), vec![package_owner("example.com/app/a@v0")]);
        assert_eq!(fx.package("example.com/app/a@v0").status(), LoadStatus::Loaded);
    }
}

mod queries {
    use tower_lsp_server::ls_types::CompletionItemKind;
    use tower_lsp_server::ls_types::HoverContents;

    use super::*;

    const A: &str = "package a\nx: y\n";
    const B: &str = "package a\n// Doc for y.\ny: 1\n";

    fn fixture() -> Fixture {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", A);
        fx.write("a/b.cue", B);
        fx.open("a/a.cue", A);
        fx
    }

    #[test]
    fn test_definition_across_files() {
        let fx = fixture();
        let found = fx.workspace.definition(&fx.uri("a/a.cue"), position(A, "y\n"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, fx.uri("a/b.cue"));
        assert_eq!(found[0].range.start, Position::new(2, 0));
    }

    #[test]
    fn test_hover_shows_doc_comment() {
        let fx = fixture();
        let hover = fx
            .workspace
            .hover(&fx.uri("a/a.cue"), position(A, "y\n"))
            .unwrap();
        let HoverContents::Markup(markup) = hover.contents else {
            panic!("expected markup");
        };
        assert!(markup.value.starts_with("Doc for y."), "{}", markup.value);
        assert!(markup.value.contains("b.cue line 3"), "{}", markup.value);
    }

    #[test]
    fn test_references() {
        let fx = fixture();
        let uri = fx.uri("a/a.cue");
        let with_declaration = fx.workspace.references(&uri, position(A, "y\n"), true);
        assert_eq!(with_declaration.len(), 2);
        assert_eq!(with_declaration[0].uri, uri);
        assert_eq!(with_declaration[0].range.start, Position::new(1, 3));
        assert_eq!(with_declaration[1].uri, fx.uri("a/b.cue"));

        let without = fx.workspace.references(&uri, position(A, "y\n"), false);
        assert_eq!(without.len(), 1);
        assert_eq!(without[0].uri, uri);
    }

    #[test]
    fn test_completion_in_value_position() {
        let mut fx = Fixture::with_module();
        let text = "package a\nfoo: 1\nbar: f\n";
        fx.write("a/a.cue", text);
        fx.open("a/a.cue", text);

        let items = fx.workspace.completion(&fx.uri("a/a.cue"), Position::new(2, 6));
        let foo = items.iter().find(|item| item.label == "foo").unwrap();
        assert_eq!(foo.kind, Some(CompletionItemKind::VARIABLE));
        assert!(items.iter().any(|item| item.label == "bar"));
    }

    #[test]
    fn test_document_symbols() {
        let mut fx = Fixture::with_module();
        let text = "package a\nfoo: {\n\tbar: 1\n}\n";
        fx.write("a/a.cue", text);
        fx.open("a/a.cue", text);

        let symbols = fx.workspace.document_symbols(&fx.uri("a/a.cue"));
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "foo");
        let children = symbols[0].children.as_ref().unwrap();
        assert_eq!(children[0].name, "bar");
    }
}

mod folders {
    use cuels_workspace::FolderOptions;
    use cuels_workspace::WatchPattern;

    use super::*;

    #[test]
    fn test_watch_patterns_cover_folders_and_active_dirs() {
        let mut fx = Fixture::with_module();
        fx.write("a/a.cue", "package a\nx: 1\n");
        fx.open("a/a.cue", "package a\nx: 1\n");

        let root = fx.uri("");
        fx.workspace.ensure_folder(&root, "app").unwrap();
        fx.workspace.ensure_folder(&root, "again").unwrap();
        assert_eq!(fx.workspace.folders().len(), 1);

        fx.workspace
            .update_folder_options(|_| {
                Ok::<_, std::convert::Infallible>(FolderOptions {
                    extra_watch_patterns: vec!["**/*.json".to_string()],
                })
            })
            .unwrap();

        let patterns = fx.workspace.file_watching_glob_patterns();
        assert!(patterns.contains(&WatchPattern::Glob {
            base: root.clone(),
            pattern: "**/*.cue".to_string(),
        }));
        assert!(patterns.contains(&WatchPattern::Glob {
            base: root.clone(),
            pattern: "**/*.json".to_string(),
        }));
        assert!(patterns.contains(&WatchPattern::Dir(fx.uri("a"))));
        assert!(patterns.contains(&WatchPattern::Dir(fx.uri("cue.mod"))));

        fx.workspace.remove_folder(&root);
        assert!(fx.workspace.file_watching_glob_patterns().is_empty());
    }
}
