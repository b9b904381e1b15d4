//! Canonical content keys for media
//!
//! Every piece of media is keyed by an [`Identifier`] of the form
//! `namespace:path`. Identifiers are derived deterministically from the URL or
//! file path the media came from, so any call site asking for the same source
//! lands on the same key.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::iter;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, IdentifierError>;

/// Namespace used for anything that does not come from a remote host
pub const LOCAL_NAMESPACE: &str = "local";

const MAX_NAME_LEN: usize = 255;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Namespace + path key for one piece of media
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    namespace: String,
    path: String,
}

impl Identifier {
    /// Build an identifier from its two halves, validating both
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let path = path.into();

        if !is_valid_part(&namespace) {
            return Err(IdentifierError::InvalidIdentifier(format!(
                "namespace is not valid: {namespace:?}"
            )));
        }
        if !is_valid_part(&path) {
            return Err(IdentifierError::InvalidIdentifier(format!(
                "path is not valid: {path:?}"
            )));
        }

        Ok(Self { namespace, path })
    }

    /// Parse the `namespace:path` form
    pub fn parse(value: &str) -> Result<Self> {
        let (namespace, path) = value.split_once(':').ok_or_else(|| {
            IdentifierError::InvalidIdentifier(format!("missing ':' separator: {value:?}"))
        })?;

        Self::new(namespace, path)
    }

    /// Derive the identifier for a media source.
    ///
    /// `http(s)` URLs use their host as namespace; everything else (plain
    /// paths, `file://` URLs) lands in the `local` namespace. The path half is
    /// the sanitized file stem of the source.
    pub fn derive(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(IdentifierError::InvalidIdentifier(
                "cannot derive an identifier from an empty source".to_string(),
            ));
        }

        let (namespace, stem) = match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let namespace = url
                    .host_str()
                    .and_then(sanitize_name)
                    .unwrap_or_else(|| LOCAL_NAMESPACE.to_string());
                let stem = url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .and_then(file_stem);
                (namespace, stem)
            }
            Ok(url) if url.scheme() == "file" => {
                let stem = url
                    .to_file_path()
                    .ok()
                    .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()));
                (LOCAL_NAMESPACE.to_string(), stem)
            }
            _ => (LOCAL_NAMESPACE.to_string(), file_stem(source)),
        };

        let path = stem.as_deref().and_then(sanitize_name).ok_or_else(|| {
            IdentifierError::InvalidIdentifier(format!("no usable file name in source: {source}"))
        })?;

        Self::new(namespace, path)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The joined `namespace:path` string
    pub fn to_string_format(&self) -> String {
        format!("{}:{}", self.namespace, self.path)
    }

    fn joined_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.namespace
            .bytes()
            .chain(iter::once(b':'))
            .chain(self.path.bytes())
    }
}

impl Ord for Identifier {
    // Ordinal comparison of the joined form, not field by field
    fn cmp(&self, other: &Self) -> Ordering {
        self.joined_bytes().cmp(other.joined_bytes())
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_string_format()
    }
}

/// Fixed identifiers bound to built-in fallback media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Missing,
    Error,
    Loading,
    Censored,
}

impl Placeholder {
    pub const ALL: [Placeholder; 4] = [
        Placeholder::Missing,
        Placeholder::Error,
        Placeholder::Loading,
        Placeholder::Censored,
    ];

    /// File stem of the placeholder image, which is also its identifier path
    pub fn file_stem(self) -> &'static str {
        match self {
            Placeholder::Missing => "swapper_missing_image",
            Placeholder::Error => "swapper_error_image",
            Placeholder::Loading => "swapper_loading_image",
            Placeholder::Censored => "swapper_censored_image",
        }
    }

    pub fn id(self) -> Identifier {
        Identifier {
            namespace: LOCAL_NAMESPACE.to_string(),
            path: self.file_stem().to_string(),
        }
    }

    /// Whether `id` is one of the fixed placeholder identifiers
    pub fn is_placeholder(id: &Identifier) -> bool {
        id.namespace == LOCAL_NAMESPACE && Self::ALL.iter().any(|p| p.file_stem() == id.path)
    }
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty() && !part.chars().any(|c| c == ':' || c.is_whitespace())
}

fn file_stem(name: &str) -> Option<String> {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}

/// Make a name safe for use as an identifier half and as a file name.
///
/// Characters outside `[A-Za-z0-9_.-]` become `_`, the result is truncated to
/// 255 characters, and reserved device names get a `_` prefix.
pub fn sanitize_name(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    let upper = sanitized.to_ascii_uppercase();
    if RESERVED_NAMES.contains(&upper.as_str()) {
        sanitized.insert(0, '_');
    }

    Some(sanitized)
}
