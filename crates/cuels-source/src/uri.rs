//! `file://` URIs used as the identity of every file and directory the
//! workspace knows about.
//!
//! URIs are kept in one canonical spelling (percent-encoded path segments, no
//! trailing slash except for the filesystem root) so that string comparison
//! and prefix checks are enough to answer equality and containment questions.

use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use percent_encoding::percent_decode_str;
use percent_encoding::utf8_percent_encode;
use percent_encoding::AsciiSet;
use percent_encoding::CONTROLS;
use thiserror::Error;
use url::Url;

const SCHEME_PREFIX: &str = "file://";
const ROOT: &str = "file:///";

/// The characters `Url::from_file_path` escapes inside a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("invalid uri {uri:?}: {message}")]
    Invalid { uri: String, message: String },
    #[error("unsupported uri scheme {0:?}, expected file")]
    UnsupportedScheme(String),
    #[error("path {0:?} is not absolute")]
    RelativePath(String),
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentUri(Arc<str>);

impl DocumentUri {
    /// Build a URI from an absolute filesystem path.
    pub fn from_path(path: &Utf8Path) -> Result<Self, UriError> {
        let url = Url::from_file_path(path.as_std_path())
            .map_err(|()| UriError::RelativePath(path.to_string()))?;
        Ok(Self::from_url_str(url.as_str()))
    }

    /// Parse and canonicalize a `file://` URI string.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let url = Url::parse(uri).map_err(|err| UriError::Invalid {
            uri: uri.to_string(),
            message: err.to_string(),
        })?;
        if url.scheme() != "file" {
            return Err(UriError::UnsupportedScheme(url.scheme().to_string()));
        }
        let path = url.to_file_path().map_err(|()| UriError::Invalid {
            uri: uri.to_string(),
            message: "not a local file path".to_string(),
        })?;
        let path = Utf8PathBuf::from_path_buf(path).map_err(|path| UriError::Invalid {
            uri: uri.to_string(),
            message: format!("{} is not valid UTF-8", path.display()),
        })?;
        Self::from_path(&path)
    }

    fn from_url_str(raw: &str) -> Self {
        let trimmed = raw.trim_end_matches('/');
        if trimmed.len() < ROOT.len() {
            Self(Arc::from(ROOT))
        } else {
            Self(Arc::from(trimmed))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        &*self.0 == ROOT
    }

    /// The decoded filesystem path.
    #[must_use]
    pub fn path(&self) -> Utf8PathBuf {
        let encoded = self.0.strip_prefix(SCHEME_PREFIX).unwrap_or(&self.0);
        let decoded = percent_decode_str(encoded).decode_utf8_lossy();

        #[cfg(windows)]
        let decoded = {
            // Remove leading '/' for paths like /C:/...
            std::borrow::Cow::Owned(decoded.strip_prefix('/').unwrap_or(&decoded).to_string())
        };

        Utf8PathBuf::from(decoded.as_ref())
    }

    /// The parent directory. The root is its own parent.
    #[must_use]
    pub fn dir(&self) -> Self {
        if self.is_root() {
            return self.clone();
        }
        match self.0.rfind('/') {
            Some(idx) if idx >= ROOT.len() => Self(Arc::from(&self.0[..idx])),
            _ => Self(Arc::from(ROOT)),
        }
    }

    /// The decoded final path segment, `None` for the root.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        if self.is_root() {
            return None;
        }
        let segment = self.0.rsplit('/').next()?;
        Some(percent_decode_str(segment).decode_utf8_lossy().into_owned())
    }

    /// Append a relative, `/`-separated, unencoded path.
    #[must_use]
    pub fn join(&self, relative: &str) -> Self {
        let mut joined = String::from(self.as_str());
        for segment in relative.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if !joined.ends_with('/') {
                joined.push('/');
            }
            joined.extend(utf8_percent_encode(segment, PATH_SEGMENT));
        }
        Self::from_url_str(&joined)
    }

    /// Reports whether `other` is this URI or lies beneath it.
    #[must_use]
    pub fn encloses(&self, other: &DocumentUri) -> bool {
        if self.is_root() {
            return other.0.starts_with(ROOT);
        }
        match other.0.strip_prefix(&*self.0) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// The decoded `/`-separated path of `self` relative to `base`, empty
    /// when they are equal.
    #[must_use]
    pub fn relative_to(&self, base: &DocumentUri) -> Option<String> {
        if !base.encloses(self) {
            return None;
        }
        let rest = if base.is_root() {
            &self.0[ROOT.len()..]
        } else {
            self.0[base.0.len()..].trim_start_matches('/')
        };
        Some(percent_decode_str(rest).decode_utf8_lossy().into_owned())
    }

    /// Number of path segments below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0[ROOT.len()..].split('/').count()
        }
    }

    /// Iterate over this URI and each ancestor, ending at the root.
    pub fn ancestors(&self) -> impl Iterator<Item = DocumentUri> {
        let mut next = Some(self.clone());
        std::iter::from_fn(move || {
            let current = next.take()?;
            if !current.is_root() {
                next = Some(current.dir());
            }
            Some(current)
        })
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}
