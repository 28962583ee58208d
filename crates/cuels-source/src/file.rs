use camino::Utf8Path;

/// Encoding of a file, decided by its extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    Cue,
    Json,
    Yaml,
    Other,
}

impl FileKind {
    /// Determine [`FileKind`] from a file path extension.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension() {
            Some("cue") => FileKind::Cue,
            Some("json" | "jsonl" | "ldjson") => FileKind::Json,
            Some("yaml" | "yml") => FileKind::Yaml,
            _ => FileKind::Other,
        }
    }

    #[must_use]
    pub fn is_cue(path: &Utf8Path) -> bool {
        Self::from_path(path) == FileKind::Cue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(FileKind::from_path(Utf8Path::new("a/b.cue")), FileKind::Cue);
        assert_eq!(FileKind::from_path(Utf8Path::new("x.json")), FileKind::Json);
        assert_eq!(FileKind::from_path(Utf8Path::new("x.yml")), FileKind::Yaml);
        assert_eq!(FileKind::from_path(Utf8Path::new("x.cue.bak")), FileKind::Other);
        assert_eq!(FileKind::from_path(Utf8Path::new("Makefile")), FileKind::Other);
    }

    #[test]
    fn test_is_cue() {
        assert!(FileKind::is_cue(Utf8Path::new("/a/cue.mod/module.cue")));
        assert!(!FileKind::is_cue(Utf8Path::new("/a/cue.mod")));
    }
}
