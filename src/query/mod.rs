//! Media queries and their results
//!
//! A query names a set of media sources: files on disk or remote URLs. Each
//! source that gets loaded carries a [`QueryResult`] describing where it came
//! from and how it was rated.

pub mod filter;
pub mod rating;

pub use filter::ContentFilter;
pub use rating::MediaRating;

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use url::Url;

use crate::formats::FormatRegistry;

/// Which query group a source is executed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Local,
    Remote,
}

/// Origin metadata attached to loaded media
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResult {
    Local {
        origin: String,
        #[serde(default)]
        rating: MediaRating,
        #[serde(default)]
        tags: Vec<String>,
    },
    Remote {
        domain: String,
        #[serde(default)]
        rating: MediaRating,
        #[serde(default)]
        tags: Vec<String>,
    },
    #[default]
    Empty,
}

impl QueryResult {
    pub fn local(origin: impl Into<String>, rating: MediaRating, tags: Vec<String>) -> Self {
        Self::Local {
            origin: origin.into(),
            rating,
            tags,
        }
    }

    /// Result for a remote source; the domain is taken from the URL host
    pub fn remote(url: &str, rating: MediaRating, tags: Vec<String>) -> Self {
        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        Self::Remote {
            domain,
            rating,
            tags,
        }
    }

    pub fn rating(&self) -> Option<MediaRating> {
        match self {
            Self::Local { rating, .. } | Self::Remote { rating, .. } => Some(*rating),
            Self::Empty => None,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Self::Local { tags, .. } | Self::Remote { tags, .. } => tags,
            Self::Empty => &[],
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// A set of media sources to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaQuery {
    Local {
        #[serde(default)]
        directory: Option<PathBuf>,
        #[serde(default)]
        files: Vec<PathBuf>,
        #[serde(default)]
        rating: MediaRating,
        #[serde(default)]
        tags: Vec<String>,
    },
    Remote {
        urls: Vec<String>,
        #[serde(default)]
        rating: MediaRating,
        #[serde(default)]
        tags: Vec<String>,
    },
}

impl MediaQuery {
    pub fn kind(&self) -> QueryKind {
        match self {
            Self::Local { .. } => QueryKind::Local,
            Self::Remote { .. } => QueryKind::Remote,
        }
    }

    pub fn rating(&self) -> MediaRating {
        match self {
            Self::Local { rating, .. } | Self::Remote { rating, .. } => *rating,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Self::Local { tags, .. } | Self::Remote { tags, .. } => tags,
        }
    }

    /// Resolve a local query into the files it covers.
    ///
    /// Paths with parent-directory segments are refused. Directory listings
    /// keep only files whose extension belongs to a registered format, sorted
    /// by path.
    pub async fn gather_files(&self, registry: &FormatRegistry) -> Vec<PathBuf> {
        let Self::Local {
            directory, files, ..
        } = self
        else {
            return Vec::new();
        };

        let mut gathered = Vec::new();

        if let Some(directory) = directory {
            if contains_traversal(directory) {
                tracing::warn!(path = %directory.display(), "Refusing directory with parent segments");
            } else {
                gathered.extend(list_directory(directory, registry).await);
            }
        }

        for file in files {
            if contains_traversal(file) {
                tracing::warn!(path = %file.display(), "Refusing file with parent segments");
                continue;
            }
            if !tokio::fs::try_exists(file).await.unwrap_or(false) {
                tracing::warn!(path = %file.display(), "Local file does not exist");
                continue;
            }
            gathered.push(file.clone());
        }

        gathered
    }

    /// URLs of a remote query after host-specific rewriting
    pub fn remote_urls(&self) -> Vec<String> {
        match self {
            Self::Remote { urls, .. } => urls
                .iter()
                .map(|url| url.trim())
                .filter(|url| !url.is_empty())
                .filter_map(adjust_url)
                .collect(),
            Self::Local { .. } => Vec::new(),
        }
    }

    pub fn result_for(&self, source: &str) -> QueryResult {
        match self {
            Self::Local { rating, tags, .. } => QueryResult::local(source, *rating, tags.clone()),
            Self::Remote { rating, tags, .. } => QueryResult::remote(source, *rating, tags.clone()),
        }
    }
}

async fn list_directory(directory: &Path, registry: &FormatRegistry) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %directory.display(), error = %e, "Cannot list local directory");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| registry.is_registered_extension(ext));

        if is_file && supported {
            files.push(path);
        }
    }

    files.sort();
    files
}

/// Whether a path walks up through `..`
pub fn contains_traversal(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Unwrap media redirect links (`reddit.com/media?url=...`) to the real URL.
/// A redirect link without a target is dropped.
pub fn adjust_url(url: &str) -> Option<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Some(url.to_string());
    };

    let is_reddit = parsed
        .host_str()
        .is_some_and(|host| host == "reddit.com" || host.ends_with(".reddit.com"));

    if is_reddit && parsed.path() == "/media" {
        let target = parsed
            .query_pairs()
            .find(|(key, _)| key == "url")
            .map(|(_, target)| target.into_owned());
        if target.is_none() {
            tracing::warn!(url, "Dropping media link without a target");
        }
        return target;
    }

    Some(url.to_string())
}
