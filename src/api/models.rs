//! Response bodies of the status router
//!
//! `GET /media` (optionally `?name=<path>`) answers with a
//! [`MediaListResponse`]:
//!
//! ```json
//! {
//!   "count": 1,
//!   "media": [
//!     { "id": "i.example.com:cat", "kind": "image", "state": null, "handler": "material" }
//!   ]
//! }
//! ```
//!
//! `GET /media/{namespace}/{path}` returns the mirroring triple
//! ([`crate::mirror::FullMediaData`]) as JSON, and
//! `GET /media/{namespace}/{path}/mirror` as protobuf. `POST /mirror` takes
//! that protobuf body and answers with a [`MirrorResponse`].

use serde::{Deserialize, Serialize};

use crate::formats::MediaKind;
use crate::identifier::Identifier;
use crate::storage::ProcessingState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

/// One identifier as seen by the status router
#[derive(Debug, Serialize)]
pub struct MediaEntry {
    pub id: Identifier,
    pub kind: Option<MediaKind>,
    /// Absent once processing finished
    pub state: Option<ProcessingState>,
    pub handler: Option<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaListQuery {
    /// Identifier path to match across namespaces
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub count: usize,
    pub media: Vec<MediaEntry>,
}

/// Outcome of a mirrored load
#[derive(Debug, Serialize)]
pub struct MirrorResponse {
    pub id: Identifier,
    /// The identifier was already registered, so nothing was loaded
    pub known: bool,
}
