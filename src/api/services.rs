use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

use super::{
    error::ApiError,
    models::{MediaEntry, MediaListQuery, MediaListResponse, MirrorResponse},
    state::AppState,
};
use crate::identifier::Identifier;
use crate::mirror::FullMediaData;
use crate::observability::MetricsSnapshot;

/// Liveness probe (GET /health)
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Published identifiers with their kind, state and handler (GET /media).
/// `?name=<path>` keeps identifiers with that path in any namespace.
pub async fn list_media(
    State(state): State<AppState>,
    Query(query): Query<MediaListQuery>,
) -> Json<MediaListResponse> {
    let storage = state.pipeline.storage();
    let ids = match query.name.as_deref() {
        Some(name) => storage.ids_named(name),
        None => storage.identifiers(),
    };

    let media: Vec<MediaEntry> = ids
        .into_iter()
        .map(|id| MediaEntry {
            kind: storage.media_kind(&id),
            state: storage.state(&id),
            handler: storage.handler(&id).map(|h| h.kind_name()),
            id,
        })
        .collect();

    Json(MediaListResponse {
        count: media.len(),
        media,
    })
}

fn published_triple(
    state: &AppState,
    namespace: String,
    path: String,
) -> Result<FullMediaData, ApiError> {
    let id = Identifier::new(namespace, path)?;
    let storage = state.pipeline.storage();

    if !storage.contains(&id) {
        return Err(ApiError::NotFound(id.to_string()));
    }

    Ok(storage.full_data(&id))
}

/// Mirroring triple of one identifier (GET /media/{namespace}/{path})
pub async fn get_media(
    State(state): State<AppState>,
    Path((namespace, path)): Path<(String, String)>,
) -> Result<Json<FullMediaData>, ApiError> {
    published_triple(&state, namespace, path).map(Json)
}

/// Protobuf form of the mirroring triple (GET /media/{namespace}/{path}/mirror)
pub async fn get_mirror(
    State(state): State<AppState>,
    Path((namespace, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let full = published_triple(&state, namespace, path)?;
    Ok((
        [(header::CONTENT_TYPE, "application/x-protobuf")],
        full.encode(),
    ))
}

/// Materialize a triple mirrored from another instance (POST /mirror)
pub async fn post_mirror(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let full = FullMediaData::decode(&body)?;
    let id = full.id.clone();
    let known = state.pipeline.storage().is_known(&id);

    if !known {
        tracing::info!(id = %id, url = %full.info.url, "Loading mirrored media");
        // the handler lands with a later drain
        let _ = state.pipeline.load_if_not_found(full);
    }

    let status = if known {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(MirrorResponse { id, known })))
}

/// Pipeline counters (GET /metrics)
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.pipeline.metrics().snapshot())
}
