// logsight-server/src/handlers/query.rs
//! Query handlers over a complete session's analytical store.
//!
//! Every handler holds a cancellation token whose drop guard fires when
//! the client goes away, so abandoned scans stop at the next row batch.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::{CancellationToken, DropGuard};

use logsight_core::{LogEntry, SignalType};
use logsight_store::{
    BoundaryValues, QueryPage, QueryParams, SortColumn, SortDirection, TimeTreeNode,
};

use crate::error::ApiError;
use crate::handlers::WireTs;
use crate::state::AppState;

fn request_token() -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Filter fields shared by the entries, index, and timetree endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterQuery {
    pub search: Option<String>,
    pub regex: Option<bool>,
    pub case_sensitive: Option<bool>,
    pub show_changed_only: Option<bool>,
    /// Comma-separated category list
    pub categories: Option<String>,
    /// Comma-separated `device::signal` list
    pub signals: Option<String>,
    pub signal_type: Option<String>,
    pub sort_column: Option<String>,
    pub sort_direction: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl FilterQuery {
    fn into_params(self) -> Result<QueryParams, ApiError> {
        let signal_type = match self.signal_type.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                SignalType::from_str_opt(raw)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown signalType: {raw}")))?,
            ),
            None => None,
        };

        let sort_column = match self.sort_column.as_deref().filter(|s| !s.is_empty()) {
            Some("id") => Some(SortColumn::Id),
            Some("timestamp") => Some(SortColumn::Timestamp),
            Some(other) => {
                return Err(ApiError::bad_request(format!("unknown sortColumn: {other}")))
            }
            None => None,
        };

        let sort_direction = match self.sort_direction.as_deref().filter(|s| !s.is_empty()) {
            Some("asc") | None => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(ApiError::bad_request(format!(
                    "unknown sortDirection: {other}"
                )))
            }
        };

        Ok(QueryParams {
            search: self.search.filter(|s| !s.is_empty()),
            regex: self.regex.unwrap_or(false),
            case_sensitive: self.case_sensitive.unwrap_or(false),
            show_changed_only: self.show_changed_only.unwrap_or(false),
            categories: split_list(self.categories.as_deref()),
            signals: split_list(self.signals.as_deref()),
            signal_type,
            sort_column,
            sort_direction,
        })
    }
}

/// `GET /api/parse/{id}/entries` — filtered, paginated scan
pub async fn entries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<QueryPage>, ApiError> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(100);
    let params = query.into_params()?;

    let (token, _guard) = request_token();
    let result = state
        .sessions
        .query_entries(&id, token, params, page, page_size)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct ChunkQuery {
    pub start: WireTs,
    pub end: WireTs,
    /// Optional comma-separated `device::signal` list
    pub signals: Option<String>,
}

/// `GET /api/parse/{id}/chunk` — inclusive time-range read
pub async fn chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ChunkQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let (token, _guard) = request_token();
    let entries = state
        .sessions
        .get_chunk(
            &id,
            token,
            query.start.0,
            query.end.0,
            split_list(query.signals.as_deref()),
        )
        .await?;
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct BoundariesRequest {
    pub start: WireTs,
    pub end: WireTs,
    pub signals: Vec<String>,
}

/// `POST /api/parse/{id}/chunk/boundaries` — waveform edge extension
pub async fn boundaries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BoundariesRequest>,
) -> Result<Json<BoundaryValues>, ApiError> {
    if request.signals.is_empty() {
        return Err(ApiError::validation("missing required field: signals"));
    }
    let (token, _guard) = request_token();
    let bounds = state
        .sessions
        .get_boundary_values(&id, token, request.start.0, request.end.0, request.signals)
        .await?;
    Ok(Json(bounds))
}

#[derive(Deserialize)]
pub struct ValuesQuery {
    pub ts: WireTs,
    pub signals: Option<String>,
}

/// `GET /api/parse/{id}/values` — point-in-time snapshot
pub async fn values_at(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ValuesQuery>,
) -> Result<Json<HashMap<String, LogEntry>>, ApiError> {
    let (token, _guard) = request_token();
    let values = state
        .sessions
        .get_values_at(&id, token, query.ts.0, split_list(query.signals.as_deref()))
        .await?;
    Ok(Json(values))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub ts: WireTs,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub regex: Option<bool>,
    #[serde(default)]
    pub case_sensitive: Option<bool>,
    #[serde(default)]
    pub show_changed_only: Option<bool>,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub signals: Option<String>,
    #[serde(default)]
    pub signal_type: Option<String>,
}

#[derive(serde::Serialize)]
pub struct IndexResponse {
    pub index: i64,
}

/// `GET /api/parse/{id}/index` — wall-clock position to table row
pub async fn index_by_time(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<IndexQuery>,
) -> Result<Json<IndexResponse>, ApiError> {
    let ts = query.ts.0;
    let params = FilterQuery {
        search: query.search,
        regex: query.regex,
        case_sensitive: query.case_sensitive,
        show_changed_only: query.show_changed_only,
        categories: query.categories,
        signals: query.signals,
        signal_type: query.signal_type,
        ..Default::default()
    }
    .into_params()?;
    let (token, _guard) = request_token();
    let index = state
        .sessions
        .get_index_by_time(&id, token, params, ts)
        .await?;
    Ok(Json(IndexResponse { index }))
}

/// `GET /api/parse/{id}/timetree` — minute-bucket navigation histogram
pub async fn time_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<TimeTreeNode>>, ApiError> {
    let params = query.into_params()?;
    let (token, _guard) = request_token();
    let tree = state.sessions.get_time_tree(&id, token, params).await?;
    Ok(Json(tree))
}

/// `GET /api/parse/{id}/signals` — unique signal keys
pub async fn signals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.sessions.get_signals(&id)?))
}

/// `GET /api/parse/{id}/devices` — unique device ids
pub async fn devices(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.sessions.get_devices(&id)?))
}

/// `GET /api/parse/{id}/signals/types` — per-signal resolved types
pub async fn signal_types(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HashMap<String, SignalType>>, ApiError> {
    Ok(Json(state.sessions.get_signal_types(&id)?))
}

/// `GET /api/parse/{id}/timerange` — inclusive session time range
pub async fn time_range(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<logsight_core::TimeRange>>, ApiError> {
    Ok(Json(state.sessions.get_time_range(&id)?))
}

/// `GET /api/parse/{id}/categories` — unique categories
pub async fn categories(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let (token, _guard) = request_token();
    Ok(Json(state.sessions.get_categories(&id, token).await?))
}

#[derive(Deserialize)]
pub struct CarriersQuery {
    pub start: Option<WireTs>,
    pub end: Option<WireTs>,
}

/// `GET /api/parse/{id}/carriers` — carrier location entries
pub async fn carriers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CarriersQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let (token, _guard) = request_token();
    let positions = state
        .sessions
        .get_carrier_positions(
            &id,
            token,
            query.start.map(|t| t.0),
            query.end.map(|t| t.0),
        )
        .await?;
    Ok(Json(positions))
}
