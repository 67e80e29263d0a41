// logsight-server/src/state.rs
//! Shared handler state, injected rather than global.

use std::sync::Arc;

use logsight_session::{FileStore, SessionManager, UploadManager};

/// Everything a handler can reach
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub uploads: Arc<UploadManager>,
    pub files: Arc<FileStore>,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionManager>,
        uploads: Arc<UploadManager>,
        files: Arc<FileStore>,
    ) -> Self {
        Self {
            sessions,
            uploads,
            files,
        }
    }
}
