// logsight-session/src/manager.rs
//! The session manager: owns every parse session, routes parsing work,
//! bounds parse concurrency, and evicts idle sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use logsight_core::{Error, LogEntry, Result, SignalType, TimeRange};
use logsight_parsers::{
    detect_parser, CompactStore, EntrySink, LineError, LogParser, ParseProgress,
    MAX_RETAINED_ERRORS,
};
use logsight_store::{AnalyticalStore, BoundaryValues, QueryPage, QueryParams, TimeTreeNode};

use crate::merge::merge_sources;
use crate::session::{ParseSession, SessionSnapshot, SessionStatus};

/// Manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding `session_<id>.db` files
    pub sessions_dir: PathBuf,
    /// Idle window after which a session is evicted
    pub idle_timeout: Duration,
    /// Cross-source dedup window for multi-file sessions; 0 disables
    pub dedup_window_ms: i64,
    /// Concurrent parse worker bound
    pub max_concurrent_parses: usize,
}

impl SessionConfig {
    /// Defaults rooted at `sessions_dir`
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            idle_timeout: Duration::from_secs(1800),
            dedup_window_ms: 1_000,
            max_concurrent_parses: 2,
        }
    }
}

/// How often the eviction loop wakes up
const EVICTION_TICK: Duration = Duration::from_secs(30);

/// Minimum interval between throttled progress writes
const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Share of the progress bar covered by parsing (the rest is finalize)
const PARSE_PROGRESS_CEILING: f32 = 95.0;

/// Entries between cancellation checks on the write path
const SINK_CANCEL_INTERVAL: u64 = 10_000;

/// Owns sessions and their analytical stores
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<ParseSession>>>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_parses.max(1))),
            config,
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Manager configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn the idle-eviction loop; lives until shutdown
    pub fn spawn_eviction_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(EVICTION_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = tick.tick() => manager.evict_idle(),
                }
            }
        });
    }

    /// Evict terminal sessions idle past the configured window
    pub fn evict_idle(&self) {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<Arc<ParseSession>> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| s.status().is_terminal() && s.idle_for() >= idle_timeout)
                .cloned()
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        let mut sessions = self.sessions.write();
        for session in expired {
            tracing::info!(session = %session.id(), "Evicting idle session");
            sessions.remove(session.id());
            session.shutdown();
        }
    }

    /// Cancel all workers and drop every session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.semaphore.close();
        let mut sessions = self.sessions.write();
        for (_, session) in sessions.drain() {
            session.shutdown();
        }
    }

    fn store_path(&self, id: &str) -> PathBuf {
        self.config.sessions_dir.join(format!("session_{id}.db"))
    }

    fn register(&self, file_ids: Vec<String>, paths: Vec<PathBuf>) -> Result<Arc<ParseSession>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Unavailable {
                message: "shutdown in progress".to_string(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let store = Arc::new(AnalyticalStore::create(self.store_path(&id))?);
        let session = Arc::new(ParseSession::new(id.clone(), file_ids, paths, store));
        self.sessions.write().insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Create a session for one file and spawn its parse worker
    pub fn start_session(&self, file_id: String, path: PathBuf) -> Result<SessionSnapshot> {
        let session = self.register(vec![file_id], vec![path.clone()])?;
        let snapshot = session.snapshot();
        spawn_parse_worker(Arc::clone(&self.semaphore), session, move |session| {
            parse_single(&session, &path)
        });
        Ok(snapshot)
    }

    /// Create a session over several files parsed into one store
    pub fn start_multi_session(
        &self,
        files: Vec<(String, PathBuf)>,
    ) -> Result<SessionSnapshot> {
        if files.is_empty() {
            return Err(Error::missing_field("fileIds"));
        }

        let (file_ids, paths): (Vec<String>, Vec<PathBuf>) = files.into_iter().unzip();
        let session = self.register(file_ids, paths.clone())?;
        let snapshot = session.snapshot();
        let dedup_window = self.config.dedup_window_ms;
        spawn_parse_worker(Arc::clone(&self.semaphore), session, move |session| {
            parse_multi(&session, &paths, dedup_window)
        });
        Ok(snapshot)
    }

    /// Internal handle lookup
    pub fn session(&self, id: &str) -> Result<Arc<ParseSession>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound { id: id.to_string() })
    }

    /// Wire-facing snapshot
    pub fn get_session(&self, id: &str) -> Result<SessionSnapshot> {
        Ok(self.session(id)?.snapshot())
    }

    /// Reset a session's idle clock
    pub fn touch_session(&self, id: &str) -> Result<()> {
        self.session(id)?.touch();
        Ok(())
    }

    /// A complete session's store handle, touching the session
    fn ready_store(&self, id: &str) -> Result<Arc<AnalyticalStore>> {
        let session = self.session(id)?;
        let status = session.status();
        if status != SessionStatus::Complete {
            return Err(Error::SessionNotReady {
                id: id.to_string(),
                status: format!("{status:?}").to_lowercase(),
            });
        }
        session.touch();
        Ok(Arc::clone(session.store()))
    }

    /// Best-effort removal of sessions tied to a deleted file
    pub fn delete_parsed_file(&self, file_id: &str) {
        let matching: Vec<Arc<ParseSession>> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| s.file_ids().iter().any(|f| f == file_id))
                .cloned()
                .collect()
        };

        let mut sessions = self.sessions.write();
        for session in matching {
            tracing::info!(session = %session.id(), file = %file_id, "Dropping session for deleted file");
            sessions.remove(session.id());
            session.shutdown();
        }
    }

    // ---- Query pass-throughs -------------------------------------------

    pub async fn query_entries(
        &self,
        id: &str,
        cancel: CancellationToken,
        params: QueryParams,
        page: u32,
        page_size: u32,
    ) -> Result<QueryPage> {
        let store = self.ready_store(id)?;
        run_query(move || store.query_entries(&cancel, &params, page, page_size)).await
    }

    pub async fn get_entries(
        &self,
        id: &str,
        cancel: CancellationToken,
        page: u32,
        page_size: u32,
    ) -> Result<QueryPage> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_entries(&cancel, page, page_size)).await
    }

    pub async fn get_chunk(
        &self,
        id: &str,
        cancel: CancellationToken,
        start_ts: i64,
        end_ts: i64,
        signals: Vec<String>,
    ) -> Result<Vec<LogEntry>> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_chunk(&cancel, start_ts, end_ts, &signals)).await
    }

    pub async fn get_boundary_values(
        &self,
        id: &str,
        cancel: CancellationToken,
        start_ts: i64,
        end_ts: i64,
        signals: Vec<String>,
    ) -> Result<BoundaryValues> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_boundary_values(&cancel, start_ts, end_ts, &signals)).await
    }

    pub async fn get_values_at(
        &self,
        id: &str,
        cancel: CancellationToken,
        ts: i64,
        signals: Vec<String>,
    ) -> Result<HashMap<String, LogEntry>> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_values_at(&cancel, ts, &signals)).await
    }

    pub async fn get_index_by_time(
        &self,
        id: &str,
        cancel: CancellationToken,
        params: QueryParams,
        ts_millis: i64,
    ) -> Result<i64> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_index_by_time(&cancel, &params, ts_millis)).await
    }

    pub async fn get_time_tree(
        &self,
        id: &str,
        cancel: CancellationToken,
        params: QueryParams,
    ) -> Result<Vec<TimeTreeNode>> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_time_tree(&cancel, &params)).await
    }

    pub async fn get_categories(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        let store = self.ready_store(id)?;
        run_query(move || store.get_categories(&cancel)).await
    }

    pub fn get_signals(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.ready_store(id)?.signals())
    }

    pub fn get_devices(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.ready_store(id)?.devices())
    }

    pub fn get_signal_types(&self, id: &str) -> Result<HashMap<String, SignalType>> {
        Ok(self.ready_store(id)?.signal_types())
    }

    pub fn get_time_range(&self, id: &str) -> Result<Option<TimeRange>> {
        Ok(self.ready_store(id)?.time_range())
    }

    /// Carrier positions: one filtered query for `CurrentLocation`
    /// entries, optionally bounded to a time range
    pub async fn get_carrier_positions(
        &self,
        id: &str,
        cancel: CancellationToken,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
    ) -> Result<Vec<LogEntry>> {
        let store = self.ready_store(id)?;
        let location_suffix = format!("::{}", logsight_parsers::LOCATION_SIGNAL);
        let keys: Vec<String> = store
            .signals()
            .into_iter()
            .filter(|k| k.ends_with(&location_suffix))
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let start = start_ts.unwrap_or(i64::MIN);
        let end = end_ts.unwrap_or(i64::MAX);
        run_query(move || store.get_chunk(&cancel, start, end, &keys)).await
    }
}

async fn run_query<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| Error::internal("query worker panicked"))?
}

/// Sink wrapper checking the session's cancellation token on the write path
struct GuardedSink<'a> {
    store: &'a AnalyticalStore,
    cancel: &'a CancellationToken,
    written: u64,
}

impl EntrySink for GuardedSink<'_> {
    fn add_entry(&mut self, entry: LogEntry) -> Result<()> {
        self.written += 1;
        if self.written % SINK_CANCEL_INTERVAL == 0 && self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.store.add_entry(entry)
    }
}

/// Progress callback bridging parser ratios into session percent,
/// throttled to ~100 ms plus 10% milestones
struct ProgressThrottle {
    session: Arc<ParseSession>,
    floor: f32,
    ceiling: f32,
    state: Mutex<(Instant, f32)>,
}

impl ProgressThrottle {
    fn new(session: Arc<ParseSession>, floor: f32, ceiling: f32) -> Self {
        let past = Instant::now()
            .checked_sub(PROGRESS_WRITE_INTERVAL)
            .unwrap_or_else(Instant::now);
        Self {
            session,
            floor,
            ceiling,
            state: Mutex::new((past, -1.0)),
        }
    }

    fn report(&self, ratio: f64) {
        let percent = self.floor + (ratio.clamp(0.0, 1.0) as f32) * (self.ceiling - self.floor);
        let mut state = self.state.lock();
        let (last_at, last_percent) = *state;

        let milestone = percent - last_percent >= 10.0 || percent >= self.ceiling;
        if milestone || last_at.elapsed() >= PROGRESS_WRITE_INTERVAL {
            self.session.set_progress(percent);
            *state = (Instant::now(), percent);
        }
    }
}

fn spawn_parse_worker<F>(semaphore: Arc<Semaphore>, session: Arc<ParseSession>, work: F)
where
    F: FnOnce(Arc<ParseSession>) -> Result<()> + Send + 'static,
{
    tokio::spawn(async move {
        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                session.mark_error("shutdown in progress");
                return;
            }
        };

        let worker_session = Arc::clone(&session);
        let outcome =
            tokio::task::spawn_blocking(move || work(worker_session)).await;
        drop(permit);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => session.mark_error(err.to_string()),
            Err(_) => session.mark_error("parse worker panicked"),
        }
    });
}

fn parse_single(session: &Arc<ParseSession>, path: &std::path::Path) -> Result<()> {
    let parser = detect_parser(path)?;
    session.mark_parsing(parser.name());
    session.set_progress(0.0);

    let throttle = ProgressThrottle::new(Arc::clone(session), 0.0, PARSE_PROGRESS_CEILING);
    let progress = move |p: ParseProgress| throttle.report(p.ratio());

    let store = Arc::clone(session.store());
    let mut sink = GuardedSink {
        store: &store,
        cancel: session.cancel_token(),
        written: 0,
    };

    let summary = parser.parse_to_sink(path, &mut sink, Some(&progress))?;
    store.finalize()?;

    session.mark_complete(
        summary.entry_count,
        summary.signal_keys.len() as u64,
        summary.errors,
        summary.error_count,
    );
    tracing::info!(
        session = %session.id(),
        parser = %parser.name(),
        entries = summary.entry_count,
        line_errors = summary.error_count,
        "Parse complete"
    );
    Ok(())
}

fn parse_multi(session: &Arc<ParseSession>, paths: &[PathBuf], dedup_window_ms: i64) -> Result<()> {
    let total = paths.len() as f32;
    let mut sources: Vec<CompactStore> = Vec::with_capacity(paths.len());
    let mut parser_name: Option<&'static str> = None;
    let mut errors: Vec<LineError> = Vec::new();
    let mut error_count: u64 = 0;
    let mut signal_keys = std::collections::HashSet::new();

    // Each file parses into its own buffer first: the store is
    // append-only, and the merged output must be globally time-sorted.
    for (idx, path) in paths.iter().enumerate() {
        if session.cancel_token().is_cancelled() {
            return Err(Error::Cancelled);
        }

        let parser = detect_parser(path)?;
        if parser_name.is_none() {
            parser_name = Some(parser.name());
            session.mark_parsing(parser.name());
        }

        let floor = (idx as f32 / total) * 85.0;
        let ceiling = ((idx as f32 + 1.0) / total) * 85.0;
        let throttle = ProgressThrottle::new(Arc::clone(session), floor, ceiling);
        let progress = move |p: ParseProgress| throttle.report(p.ratio());

        let mut buffer = CompactStore::new();
        let summary = parser.parse_to_sink(path, &mut buffer, Some(&progress))?;

        signal_keys.extend(summary.signal_keys);
        error_count += summary.error_count;
        for err in summary.errors {
            if errors.len() < MAX_RETAINED_ERRORS {
                errors.push(err);
            }
        }
        sources.push(buffer);
    }

    let store = Arc::clone(session.store());
    let mut sink = GuardedSink {
        store: &store,
        cancel: session.cancel_token(),
        written: 0,
    };
    let emitted = merge_sources(&sources, dedup_window_ms, |entry| sink.add_entry(entry))?;
    session.set_progress(95.0);

    store.finalize()?;
    session.mark_complete(emitted, signal_keys.len() as u64, errors, error_count);
    tracing::info!(
        session = %session.id(),
        files = paths.len(),
        entries = emitted,
        "Multi-file parse complete"
    );
    Ok(())
}
