// logsight-server/src/handlers/files.rs
//! File upload and listing handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use logsight_core::FileInfo;
use logsight_session::{CompleteUpload, UploadJobSnapshot};

use crate::error::ApiError;
use crate::handlers::decode_base64;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UploadRequest {
    pub name: String,
    /// Base64-encoded file contents
    pub data: String,
}

/// `POST /api/files/upload` — single-shot upload
pub async fn upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<FileInfo>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("missing required field: name"));
    }
    let bytes = decode_base64(&request.data)?;
    let info = state.files.save_bytes(&request.name, &bytes)?;
    Ok((StatusCode::CREATED, Json(info)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub upload_id: String,
    pub chunk_index: u32,
    /// Base64-encoded chunk payload
    pub data: String,
}

/// `POST /api/files/upload/chunk` — stage one chunk
pub async fn upload_chunk(
    State(state): State<AppState>,
    Json(request): Json<ChunkRequest>,
) -> Result<StatusCode, ApiError> {
    let bytes = decode_base64(&request.data)?;
    state
        .uploads
        .stage_chunk(&request.upload_id, request.chunk_index, &bytes)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub upload_id: String,
    pub name: String,
    pub total_chunks: u32,
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub encoding: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// `POST /api/files/upload/complete` — register the processing job
pub async fn upload_complete(
    State(state): State<AppState>,
    Json(request): Json<CompleteRequest>,
) -> Result<(StatusCode, Json<CompleteResponse>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("missing required field: name"));
    }
    let job_id = state.uploads.complete(CompleteUpload {
        upload_id: request.upload_id,
        name: request.name,
        total_chunks: request.total_chunks,
        original_size: request.original_size,
        compressed_size: request.compressed_size,
        encoding: request.encoding,
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CompleteResponse {
            job_id,
            status: "pending",
        }),
    ))
}

/// `GET /api/files/recent` — newest stored log files
pub async fn recent(State(state): State<AppState>) -> Result<Json<Vec<FileInfo>>, ApiError> {
    Ok(Json(state.files.recent()?))
}

/// `GET /api/files/upload/jobs/{id}` — job snapshot
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadJobSnapshot>, ApiError> {
    Ok(Json(state.uploads.get_job(&id)?))
}

/// `DELETE /api/files/{id}` — remove a stored file and any session on it
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.files.delete(&id)?;
    state.sessions.delete_parsed_file(&id);
    Ok(StatusCode::OK)
}
