// logsight-server/src/handlers/parse.rs
//! Session lifecycle handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use logsight_session::SessionSnapshot;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub file_id: Option<String>,
    pub file_ids: Option<Vec<String>>,
}

/// `POST /api/parse` — create a session for one file or several
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<ParseRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let file_ids = match (request.file_id, request.file_ids) {
        (Some(id), _) => vec![id],
        (None, Some(ids)) if !ids.is_empty() => ids,
        _ => return Err(ApiError::validation("missing required field: fileId")),
    };

    // Resolve every file before starting: a bad id fails the request, not
    // the worker.
    let mut files = Vec::with_capacity(file_ids.len());
    for id in file_ids {
        state.files.get(&id)?;
        let path = state.files.path_of(&id)?;
        files.push((id, path));
    }

    let snapshot = if files.len() == 1 {
        let (id, path) = files.remove(0);
        state.sessions.start_session(id, path)?
    } else {
        state.sessions.start_multi_session(files)?
    };

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// `GET /api/parse/{id}/status` — session snapshot; touches the session
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state.sessions.touch_session(&id)?;
    Ok(Json(state.sessions.get_session(&id)?))
}

/// `POST /api/parse/{id}/keepalive` — reset the idle clock
pub async fn keepalive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sessions.touch_session(&id)?;
    Ok(StatusCode::OK)
}
