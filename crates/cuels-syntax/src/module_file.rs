//! Reader for `cue.mod/module.cue`.
//!
//! Parsing is non-strict: unknown fields are ignored and only the fields the
//! loader needs are checked.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ast::Decl;
use crate::ast::Expr;
use crate::ast::LiteralKind;
use crate::import_path::split_package_version;
use crate::parser::parse;
use crate::parser::ParseMode;
use crate::SyntaxError;

const DEFAULT_MAJOR_VERSION: &str = "v0";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModuleFileError {
    #[error("{filename}: {error}")]
    Syntax {
        filename: String,
        error: SyntaxError,
    },
    #[error("{0}: no module field found")]
    MissingModule(String),
    #[error("invalid module path {path:?}: {reason}")]
    InvalidModulePath { path: String, reason: String },
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleDep {
    /// Key of the `deps` entry: a module path with its major version.
    pub module: String,
    /// Full version, e.g. `v0.1.2`.
    pub version: String,
    pub default: bool,
}

impl ModuleDep {
    #[must_use]
    pub fn path(&self) -> &str {
        split_package_version(&self.module).0
    }

    #[must_use]
    pub fn major(&self) -> &str {
        match split_package_version(&self.module) {
            (_, major, true) => major,
            _ => major_of(&self.version),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleFile {
    /// The `module` field as written, possibly without a major version.
    pub module: String,
    pub language_version: Option<String>,
    pub source_kind: Option<String>,
    pub deps: Vec<ModuleDep>,
}

impl ModuleFile {
    pub fn parse_non_strict(source: &str, filename: &str) -> Result<Self, ModuleFileError> {
        let output = parse(filename, source, ParseMode::Full);
        if let Some(error) = output.errors.into_iter().next() {
            return Err(ModuleFileError::Syntax {
                filename: filename.to_string(),
                error,
            });
        }

        let decls = &output.file.decls;
        let module = match lookup(decls, &["module"]) {
            Some(expr) => string_value(expr, "module")?.to_string(),
            None => return Err(ModuleFileError::MissingModule(filename.to_string())),
        };
        check_module_path(&module)?;

        let language_version = lookup(decls, &["language", "version"])
            .map(|expr| string_value(expr, "language.version").map(str::to_string))
            .transpose()?;
        let source_kind = lookup(decls, &["source", "kind"])
            .map(|expr| string_value(expr, "source.kind").map(str::to_string))
            .transpose()?;

        let mut deps = Vec::new();
        if let Some(Expr::Struct { decls: entries, .. }) = lookup(decls, &["deps"]) {
            for entry in entries {
                let Decl::Field(field) = entry else {
                    continue;
                };
                let Some(key) = field.label.name() else {
                    continue;
                };
                let fields = struct_decls(&field.value);
                let version = fields
                    .and_then(|decls| lookup(decls, &["v"]))
                    .map(|expr| string_value(expr, "deps.v"))
                    .transpose()?
                    .unwrap_or_default()
                    .to_string();
                let default = fields
                    .and_then(|decls| lookup(decls, &["default"]))
                    .is_some_and(|expr| matches!(expr, Expr::Literal(lit) if lit.kind == LiteralKind::Bool && lit.value == "true"));
                deps.push(ModuleDep {
                    module: key.to_string(),
                    version,
                    default,
                });
            }
        }

        Ok(ModuleFile {
            module,
            language_version,
            source_kind,
            deps,
        })
    }

    /// The module path without its major version.
    #[must_use]
    pub fn module_path(&self) -> &str {
        split_package_version(&self.module).0
    }

    #[must_use]
    pub fn major_version(&self) -> &str {
        match split_package_version(&self.module) {
            (_, major, true) => major,
            _ => DEFAULT_MAJOR_VERSION,
        }
    }

    /// The module path including a major version, `v0` when none is written.
    #[must_use]
    pub fn qualified_module(&self) -> String {
        format!("{}@{}", self.module_path(), self.major_version())
    }

    /// Pairs of dependency module (with major version) and full version.
    pub fn dep_versions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.deps
            .iter()
            .map(|dep| (dep.module.as_str(), dep.version.as_str()))
    }

    /// For each dependency path, the major version used when an import does
    /// not name one: the entry marked default, or the only entry.
    #[must_use]
    pub fn default_major_versions(&self) -> FxHashMap<String, String> {
        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for dep in &self.deps {
            *counts.entry(dep.path()).or_default() += 1;
        }

        let mut defaults = FxHashMap::default();
        for dep in &self.deps {
            if dep.default || counts.get(dep.path()) == Some(&1) {
                defaults.insert(dep.path().to_string(), dep.major().to_string());
            }
        }
        defaults
    }

    /// The dependency providing `import_path`, preferring the longest module
    /// path. An empty `major` selects the default major version.
    #[must_use]
    pub fn dependency_for(&self, import_path: &str, major: &str) -> Option<&ModuleDep> {
        let defaults = self.default_major_versions();
        self.deps
            .iter()
            .filter(|dep| {
                let path = dep.path();
                import_path == path
                    || import_path
                        .strip_prefix(path)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .filter(|dep| {
                if major.is_empty() {
                    defaults.get(dep.path()).map(String::as_str) == Some(dep.major())
                } else {
                    dep.major() == major
                }
            })
            .max_by_key(|dep| dep.path().len())
    }
}

fn major_of(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

fn check_module_path(module: &str) -> Result<(), ModuleFileError> {
    let invalid = |reason: &str| ModuleFileError::InvalidModulePath {
        path: module.to_string(),
        reason: reason.to_string(),
    };

    let (path, major, has_major) = split_package_version(module);
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.split('/').any(str::is_empty) {
        return Err(invalid("empty path element"));
    }
    if path.chars().any(|c| c.is_whitespace() || c == ':' || c == '\\') {
        return Err(invalid("invalid character in path"));
    }
    if has_major {
        let digits = major.strip_prefix('v').unwrap_or_default();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("major version must be of the form vN"));
        }
    }
    Ok(())
}

/// Follow a chain of field labels through nested structs.
fn lookup<'a>(decls: &'a [Decl], labels: &[&str]) -> Option<&'a Expr> {
    let (first, rest) = labels.split_first()?;
    let value = decls.iter().find_map(|decl| match decl {
        Decl::Field(field) if field.label.name() == Some(*first) => Some(&field.value),
        _ => None,
    })?;
    if rest.is_empty() {
        Some(value)
    } else {
        lookup(struct_decls(value)?, rest)
    }
}

fn struct_decls(expr: &Expr) -> Option<&[Decl]> {
    match expr {
        Expr::Struct { decls, .. } => Some(decls),
        _ => None,
    }
}

fn string_value<'a>(expr: &'a Expr, field: &str) -> Result<&'a str, ModuleFileError> {
    expr.as_str().ok_or_else(|| ModuleFileError::InvalidField {
        field: field.to_string(),
        reason: "expected a string".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
module: "example.com/app@v1"
language: version: "v0.9.0"
source: kind: "git"
deps: {
	"example.com/lib@v0": {
		v: "v0.3.1"
	}
	"example.com/lib/extra@v0": {
		v: "v0.1.0"
		default: true
	}
	"example.com/other@v1": v: "v1.2.0"
	"example.com/other@v2": {
		v: "v2.0.0"
		default: true
	}
}
"#;

    #[test]
    fn test_parse_fields() {
        let file = ModuleFile::parse_non_strict(FULL, "module.cue").unwrap();
        assert_eq!(file.module, "example.com/app@v1");
        assert_eq!(file.module_path(), "example.com/app");
        assert_eq!(file.qualified_module(), "example.com/app@v1");
        assert_eq!(file.language_version.as_deref(), Some("v0.9.0"));
        assert_eq!(file.source_kind.as_deref(), Some("git"));
        assert_eq!(file.deps.len(), 4);
        assert_eq!(file.deps[0].version, "v0.3.1");
        assert!(file.deps[1].default);
        assert_eq!(file.deps[2].version, "v1.2.0");
    }

    #[test]
    fn test_qualified_module_defaults_to_v0() {
        let file = ModuleFile::parse_non_strict("module: \"example.com/a\"\n", "module.cue").unwrap();
        assert_eq!(file.qualified_module(), "example.com/a@v0");
        assert_eq!(file.major_version(), "v0");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let file = ModuleFile::parse_non_strict(
            "module: \"example.com/a\"\ncustom: whatever: 1\n",
            "module.cue",
        )
        .unwrap();
        assert_eq!(file.module, "example.com/a");
    }

    #[test]
    fn test_default_major_versions() {
        let file = ModuleFile::parse_non_strict(FULL, "module.cue").unwrap();
        let defaults = file.default_major_versions();
        assert_eq!(defaults.get("example.com/lib").map(String::as_str), Some("v0"));
        assert_eq!(defaults.get("example.com/other").map(String::as_str), Some("v2"));
    }

    #[test]
    fn test_dependency_for_prefers_longest_path() {
        let file = ModuleFile::parse_non_strict(FULL, "module.cue").unwrap();
        let dep = file.dependency_for("example.com/lib/extra/pkg", "").unwrap();
        assert_eq!(dep.module, "example.com/lib/extra@v0");
        let dep = file.dependency_for("example.com/lib/sub", "").unwrap();
        assert_eq!(dep.module, "example.com/lib@v0");
        assert!(file.dependency_for("example.com/library", "").is_none());
    }

    #[test]
    fn test_dependency_for_major_version() {
        let file = ModuleFile::parse_non_strict(FULL, "module.cue").unwrap();
        assert_eq!(
            file.dependency_for("example.com/other", "").unwrap().version,
            "v2.0.0"
        );
        assert_eq!(
            file.dependency_for("example.com/other/x", "v1").unwrap().version,
            "v1.2.0"
        );
    }

    mod errors {
        use super::*;

        #[test]
        fn test_missing_module() {
            let err = ModuleFile::parse_non_strict("language: version: \"v0.9.0\"\n", "m.cue")
                .unwrap_err();
            assert_eq!(err, ModuleFileError::MissingModule("m.cue".to_string()));
        }

        #[test]
        fn test_syntax_error() {
            let err = ModuleFile::parse_non_strict("module: {\n", "m.cue").unwrap_err();
            assert!(matches!(err, ModuleFileError::Syntax { .. }));
        }

        #[test]
        fn test_invalid_module_path() {
            for bad in ["", "a//b", "a b", "a.com/x@1", "a.com/x@vx"] {
                let source = format!("module: {bad:?}\n");
                let err = ModuleFile::parse_non_strict(&source, "m.cue").unwrap_err();
                assert!(
                    matches!(err, ModuleFileError::InvalidModulePath { .. }),
                    "{bad}: {err:?}"
                );
            }
        }

        #[test]
        fn test_module_not_a_string() {
            let err = ModuleFile::parse_non_strict("module: 42\n", "m.cue").unwrap_err();
            assert!(matches!(err, ModuleFileError::InvalidField { .. }));
        }
    }
}
