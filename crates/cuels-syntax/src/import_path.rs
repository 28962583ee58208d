use std::fmt;

/// A parsed import path of the form `path[@version][:qualifier]`.
///
/// When no qualifier is written it is inferred from the last path element,
/// provided that element is a usable package identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportPath {
    pub path: String,
    /// Major version such as `v0`, empty when absent.
    pub version: String,
    pub qualifier: String,
    /// Whether the qualifier was written with a `:` rather than inferred.
    pub explicit_qualifier: bool,
}

impl ImportPath {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut parts = ImportPath::default();
        let mut path = raw;

        if let Some(idx) = raw.rfind(['/', ':']) {
            if raw[idx..].starts_with(':') {
                parts.qualifier = raw[idx + 1..].to_string();
                parts.explicit_qualifier = true;
                path = &raw[..idx];
            }
        }

        if let (base, version, true) = split_package_version(path) {
            parts.version = version.to_string();
            path = base;
        }
        parts.path = path.to_string();

        if !parts.explicit_qualifier {
            parts.qualifier = inferred_qualifier(&parts.path).to_string();
        }
        parts
    }

    /// The form used as a key: the qualifier is marked explicit exactly when
    /// it cannot be inferred from the path.
    #[must_use]
    pub fn canonical(&self) -> Self {
        let mut parts = self.clone();
        parts.explicit_qualifier =
            !parts.qualifier.is_empty() && parts.qualifier != inferred_qualifier(&parts.path);
        parts
    }

    /// The same path and version with no qualifier at all.
    #[must_use]
    pub fn unqualified(&self) -> Self {
        ImportPath {
            path: self.path.clone(),
            version: self.version.clone(),
            qualifier: String::new(),
            explicit_qualifier: false,
        }
    }

    #[must_use]
    pub fn with_version(&self, version: &str) -> Self {
        ImportPath {
            version: version.to_string(),
            ..self.clone()
        }
    }

    /// Standard library packages have no dot in their first path element.
    #[must_use]
    pub fn is_std_lib(&self) -> bool {
        let first = self.path.split('/').next().unwrap_or_default();
        !first.is_empty() && !first.contains('.')
    }

    /// Whether `other` lies strictly beneath this path and shares the same
    /// qualifier and version.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &ImportPath) -> bool {
        self.qualifier == other.qualifier
            && self.version == other.version
            && other
                .path
                .strip_prefix(&self.path)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The last element of the path.
    #[must_use]
    pub fn last_element(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        let needs_qualifier = self.explicit_qualifier
            || (!self.qualifier.is_empty() && self.qualifier != inferred_qualifier(&self.path));
        if needs_qualifier {
            write!(f, ":{}", self.qualifier)?;
        }
        Ok(())
    }
}

/// Split `path@version` into its parts. Only an `@` in the final path
/// element counts.
#[must_use]
pub fn split_package_version(path: &str) -> (&str, &str, bool) {
    match path.rfind(['/', '@']) {
        Some(idx) if path[idx..].starts_with('@') => (&path[..idx], &path[idx + 1..], true),
        _ => (path, "", false),
    }
}

fn inferred_qualifier(path: &str) -> &str {
    let last = path.rsplit('/').next().unwrap_or_default();
    if last == "_" || last.starts_with('#') || !is_identifier(last) {
        ""
    } else {
        last
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let first_ok = first.is_alphabetic() || matches!(first, '_' | '$' | '#');
    first_ok && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '$'))
}
