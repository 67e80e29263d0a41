// logsight-session/src/session.rs
//! One parse session: the ingestion and query unit owning an analytical
//! store plus its lifecycle metadata.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use logsight_parsers::LineError;
use logsight_store::AnalyticalStore;

/// Line errors included verbatim in a session snapshot
const SNAPSHOT_ERROR_LIMIT: usize = 10;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Parsing,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Error)
    }
}

/// Wire-facing view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(rename = "fileIds")]
    pub file_ids: Vec<String>,
    pub status: SessionStatus,
    /// 0..=100, monotonically non-decreasing
    pub progress: f32,
    pub entry_count: u64,
    pub signal_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser_name: Option<String>,
    /// First accumulated parse errors, capped for transport
    pub parse_errors: Vec<LineError>,
    pub parse_error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

struct SessionMeta {
    status: SessionStatus,
    progress: f32,
    entry_count: u64,
    signal_count: u64,
    parser_name: Option<String>,
    parse_errors: Vec<LineError>,
    parse_error_count: u64,
    error: Option<String>,
    last_touched: Instant,
}

/// An ingestion+query session owning one analytical store
pub struct ParseSession {
    id: String,
    file_ids: Vec<String>,
    paths: Vec<PathBuf>,
    store: Arc<AnalyticalStore>,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
    meta: RwLock<SessionMeta>,
}

impl ParseSession {
    pub fn new(
        id: String,
        file_ids: Vec<String>,
        paths: Vec<PathBuf>,
        store: Arc<AnalyticalStore>,
    ) -> Self {
        Self {
            id,
            file_ids,
            paths,
            store,
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
            meta: RwLock::new(SessionMeta {
                status: SessionStatus::Pending,
                progress: 0.0,
                entry_count: 0,
                signal_count: 0,
                parser_name: None,
                parse_errors: Vec::new(),
                parse_error_count: 0,
                error: None,
                last_touched: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_ids(&self) -> &[String] {
        &self.file_ids
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The session's analytical store
    ///
    /// Handles are short-lived: callers go through the manager and must
    /// not outlive the session.
    pub fn store(&self) -> &Arc<AnalyticalStore> {
        &self.store
    }

    /// Token cancelling the session's worker
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn status(&self) -> SessionStatus {
        self.meta.read().status
    }

    /// Reset the idle clock; every successful read does this
    pub fn touch(&self) {
        self.meta.write().last_touched = Instant::now();
    }

    /// How long since the last touch
    pub fn idle_for(&self) -> std::time::Duration {
        self.meta.read().last_touched.elapsed()
    }

    /// Move into `parsing` under the named parser
    pub fn mark_parsing(&self, parser_name: &str) {
        let mut meta = self.meta.write();
        meta.status = SessionStatus::Parsing;
        meta.parser_name = Some(parser_name.to_string());
    }

    /// Raise progress; values below the current one are ignored
    pub fn set_progress(&self, progress: f32) {
        let mut meta = self.meta.write();
        let clamped = progress.clamp(0.0, 100.0);
        if clamped > meta.progress {
            meta.progress = clamped;
        }
    }

    /// Record the completed parse
    pub fn mark_complete(
        &self,
        entry_count: u64,
        signal_count: u64,
        parse_errors: Vec<LineError>,
        parse_error_count: u64,
    ) {
        let mut meta = self.meta.write();
        meta.status = SessionStatus::Complete;
        meta.progress = 100.0;
        meta.entry_count = entry_count;
        meta.signal_count = signal_count;
        meta.parse_errors = parse_errors;
        meta.parse_error_count = parse_error_count;
        meta.last_touched = Instant::now();
    }

    /// Record a fatal failure
    pub fn mark_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(session = %self.id, error = %message, "Session failed");
        let mut meta = self.meta.write();
        meta.status = SessionStatus::Error;
        meta.error = Some(message);
        meta.last_touched = Instant::now();
    }

    /// Current wire-facing snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        let meta = self.meta.read();
        SessionSnapshot {
            id: self.id.clone(),
            file_ids: self.file_ids.clone(),
            status: meta.status,
            progress: meta.progress,
            entry_count: meta.entry_count,
            signal_count: meta.signal_count,
            parser_name: meta.parser_name.clone(),
            parse_errors: meta
                .parse_errors
                .iter()
                .take(SNAPSHOT_ERROR_LIMIT)
                .cloned()
                .collect(),
            parse_error_count: meta.parse_error_count,
            error: meta.error.clone(),
            created_at: self.created_at,
        }
    }

    /// Cancel the worker and release the backing store
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dir: &tempfile::TempDir) -> ParseSession {
        let store = Arc::new(AnalyticalStore::create(dir.path().join("s.db")).unwrap());
        ParseSession::new(
            "sess-1".to_string(),
            vec!["file-1".to_string()],
            vec![PathBuf::from("/tmp/file-1")],
            store,
        )
    }

    #[test]
    fn test_progress_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);

        s.set_progress(40.0);
        s.set_progress(10.0);
        assert_eq!(s.snapshot().progress, 40.0);

        s.set_progress(150.0);
        assert_eq!(s.snapshot().progress, 100.0);
    }

    #[test]
    fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        assert_eq!(s.status(), SessionStatus::Pending);

        s.mark_parsing("plc_debug");
        assert_eq!(s.status(), SessionStatus::Parsing);
        assert!(!s.status().is_terminal());

        s.mark_complete(10, 3, Vec::new(), 0);
        let snap = s.snapshot();
        assert_eq!(snap.status, SessionStatus::Complete);
        assert_eq!(snap.progress, 100.0);
        assert_eq!(snap.entry_count, 10);
        assert_eq!(snap.signal_count, 3);
        assert_eq!(snap.parser_name.as_deref(), Some("plc_debug"));
        assert!(snap.status.is_terminal());
    }

    #[test]
    fn test_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        s.mark_error("disk full");

        let snap = s.snapshot();
        assert_eq!(snap.status, SessionStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_snapshot_error_cap() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        let errors: Vec<LineError> = (0..50)
            .map(|i| LineError::new(i, "bad", "reason"))
            .collect();
        s.mark_complete(0, 0, errors, 50);

        let snap = s.snapshot();
        assert_eq!(snap.parse_errors.len(), SNAPSHOT_ERROR_LIMIT);
        assert_eq!(snap.parse_error_count, 50);
    }

    #[test]
    fn test_touch_resets_idle() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(s.idle_for().as_millis() >= 20);
        s.touch();
        assert!(s.idle_for().as_millis() < 20);
    }
}
