// logsight-server/src/sse.rs
//! Server-sent event endpoints.
//!
//! All progress streams follow one pattern: send the current snapshot
//! immediately, tick at 100 ms, emit only when a watched field changed,
//! and stop on the terminal state, client disconnect, or the safety
//! timeout. Error frames carry `{error}` and terminate the stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::Stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

/// Tick interval for progress streams
const TICK: Duration = Duration::from_millis(100);

/// Hard timeout for parse-progress streams
const PROGRESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Rows per entry-stream frame
const STREAM_BATCH: usize = 5_000;

/// Store pages fetched per frame (the store caps a page at 1000 rows)
const STREAM_PAGE_SIZE: u32 = 1_000;

/// Touch the session once per this many streamed rows
const STREAM_TOUCH_INTERVAL: u64 = 10_000;

fn json_event<T: Serialize>(value: &T) -> Event {
    let data = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Event::default().data(data)
}

fn error_event(message: &str) -> Event {
    json_event(&serde_json::json!({ "error": message }))
}

/// Wrap an event stream with the required SSE headers
fn sse_response<S>(stream: S) -> impl IntoResponse
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}

/// `GET /api/parse/{id}/progress` — session snapshots until terminal
pub async fn parse_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown sessions fail the request instead of opening a dead stream.
    state.sessions.get_session(&id)?;

    let sessions = state.sessions.clone();
    let stream = async_stream::stream! {
        let deadline = tokio::time::Instant::now() + PROGRESS_TIMEOUT;
        let mut interval = tokio::time::interval(TICK);
        let mut last: Option<serde_json::Value> = None;

        loop {
            let snapshot = match sessions.get_session(&id) {
                Ok(snapshot) => snapshot,
                Err(_) => {
                    yield Ok::<_, Infallible>(error_event("session evicted"));
                    break;
                }
            };

            let current = serde_json::to_value(&snapshot).unwrap_or_default();
            if last.as_ref() != Some(&current) {
                yield Ok(json_event(&snapshot));
                last = Some(current);
            }
            if snapshot.status.is_terminal() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                yield Ok(error_event("progress stream timed out"));
                break;
            }
            interval.tick().await;
        }
    };

    Ok(sse_response(stream))
}

/// `GET /api/files/upload/jobs/{id}/progress` — job snapshots until terminal
pub async fn job_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.uploads.get_job(&id)?;

    let uploads = state.uploads.clone();
    let stream = async_stream::stream! {
        let deadline = tokio::time::Instant::now() + PROGRESS_TIMEOUT;
        let mut interval = tokio::time::interval(TICK);
        let mut last: Option<serde_json::Value> = None;

        loop {
            let snapshot = match uploads.get_job(&id) {
                Ok(snapshot) => snapshot,
                Err(_) => {
                    yield Ok::<_, Infallible>(error_event("job not found"));
                    break;
                }
            };

            let current = serde_json::to_value(&snapshot).unwrap_or_default();
            if last.as_ref() != Some(&current) {
                yield Ok(json_event(&snapshot));
                last = Some(current);
            }
            if matches!(
                snapshot.status,
                logsight_session::JobStatus::Complete | logsight_session::JobStatus::Error
            ) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                yield Ok(error_event("progress stream timed out"));
                break;
            }
            interval.tick().await;
        }
    };

    Ok(sse_response(stream))
}

#[derive(Serialize)]
struct EntryFrame {
    entries: Vec<logsight_core::LogEntry>,
    progress: f32,
}

#[derive(Serialize)]
struct DoneFrame {
    done: bool,
    total: u64,
    progress: f32,
}

/// `GET /api/parse/{id}/stream` — the whole table in 5k-row frames
pub async fn entry_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.get_session(&id)?;

    let sessions = state.sessions.clone();
    let stream = async_stream::stream! {
        let mut page: u32 = 1;
        let mut sent: u64 = 0;
        let mut touched: u64 = 0;
        let mut buffer: Vec<logsight_core::LogEntry> = Vec::with_capacity(STREAM_BATCH);
        let mut total: u64 = 0;

        loop {
            let batch = match sessions
                .get_entries(&id, CancellationToken::new(), page, STREAM_PAGE_SIZE)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    yield Ok::<_, Infallible>(error_event(&err.to_string()));
                    return;
                }
            };

            total = batch.total;
            let count = batch.entries.len() as u64;
            sent += count;
            buffer.extend(batch.entries);
            page += 1;

            let finished = sent >= total || count == 0;
            if buffer.len() >= STREAM_BATCH || (finished && !buffer.is_empty()) {
                let progress = if total == 0 {
                    100.0
                } else {
                    ((sent as f64 / total as f64) * 100.0) as f32
                };
                let frame = EntryFrame {
                    entries: std::mem::take(&mut buffer),
                    progress,
                };
                yield Ok(json_event(&frame));
            }

            if sent / STREAM_TOUCH_INTERVAL > touched {
                touched = sent / STREAM_TOUCH_INTERVAL;
                let _ = sessions.touch_session(&id);
            }

            if finished {
                break;
            }
        }

        yield Ok(json_event(&DoneFrame {
            done: true,
            total,
            progress: 100.0,
        }));
    };

    Ok(sse_response(stream))
}
