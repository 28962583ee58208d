use camino::Utf8Path;
use camino::Utf8PathBuf;
use cuels_source::FileKind;
use ignore::WalkBuilder;

/// Collect the CUE files among `paths`, descending into directories.
///
/// Hidden entries and anything matched by ignore files are skipped inside
/// directories; paths named directly are always taken. Returns sorted,
/// deduplicated canonical paths.
pub fn walk_cue_files(paths: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            if FileKind::is_cue(path) {
                files.push(canonicalize(path).unwrap_or_else(|_| path.clone()));
            }
            continue;
        }
        if !path.is_dir() {
            continue;
        }

        let walker = WalkBuilder::new(path.as_std_path())
            .standard_filters(true)
            .hidden(true)
            .follow_links(false)
            .build();

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Some(utf8) = Utf8Path::from_path(entry.path()) else {
                continue;
            };
            if FileKind::is_cue(utf8) {
                files.push(canonicalize(utf8).unwrap_or_else(|_| utf8.to_owned()));
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

fn canonicalize(path: &Utf8Path) -> std::io::Result<Utf8PathBuf> {
    let canonical = path.as_std_path().canonicalize()?;
    Utf8PathBuf::from_path_buf(canonical)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-UTF-8 path"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn setup() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        (dir, root)
    }

    fn touch(root: &Utf8Path, path: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_collects_cue_files_sorted() {
        let (_dir, root) = setup();
        touch(&root, "b/b.cue");
        touch(&root, "a/a.cue");
        touch(&root, "a/data.json");
        touch(&root, "cue.mod/module.cue");

        let files = walk_cue_files(&[root.clone()]);
        assert_eq!(
            files,
            vec![
                root.join("a/a.cue"),
                root.join("b/b.cue"),
                root.join("cue.mod/module.cue"),
            ]
        );
    }

    #[test]
    fn test_skips_hidden_directories() {
        let (_dir, root) = setup();
        touch(&root, ".cache/x.cue");
        touch(&root, "a/a.cue");

        assert_eq!(walk_cue_files(&[root.clone()]), vec![root.join("a/a.cue")]);
    }

    #[test]
    fn test_explicit_file_and_overlap_deduplicated() {
        let (_dir, root) = setup();
        touch(&root, "a/a.cue");

        let files = walk_cue_files(&[root.join("a/a.cue"), root.join("a"), root.join("missing")]);
        assert_eq!(files, vec![root.join("a/a.cue")]);
    }
}
