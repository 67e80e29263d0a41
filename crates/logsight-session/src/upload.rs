// logsight-session/src/upload.rs
//! Chunked upload staging and the per-upload processing job.
//!
//! Chunks land on disk as they arrive (never accumulated in memory); a
//! `complete` request registers a job whose worker assembles the chunks,
//! optionally streams them through gzip, and saves the result into the
//! permanent file store. Job snapshots stay observable after the terminal
//! state so progress subscribers always see completion.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use logsight_core::{Error, FileInfo, Result};

use crate::files::{validate_id, FileStore};

/// Buffer size for streamed gzip decompression
const DECOMPRESS_BUFFER: usize = 256 * 1024;

/// How long the worker waits for missing chunks after `complete`
const CHUNK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for missing chunks
const CHUNK_WAIT_TICK: Duration = Duration::from_millis(100);

/// Upload job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

/// Processing stages in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Assembling,
    Decompressing,
    Saving,
}

/// Wire-facing job view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// 0..=100 across all stages, monotonically non-decreasing
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,
    pub stage_progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobState {
    id: String,
    status: JobStatus,
    progress: f32,
    stage: Option<JobStage>,
    stage_progress: f32,
    file: Option<FileInfo>,
    error: Option<String>,
}

impl JobState {
    fn snapshot(&self) -> UploadJobSnapshot {
        UploadJobSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            stage: self.stage,
            stage_progress: self.stage_progress,
            file: self.file.clone(),
            error: self.error.clone(),
        }
    }
}

/// Handle to one job's state with monotonic progress updates
#[derive(Clone)]
struct JobHandle(Arc<Mutex<JobState>>);

impl JobHandle {
    fn new(id: String) -> Self {
        Self(Arc::new(Mutex::new(JobState {
            id,
            status: JobStatus::Pending,
            progress: 0.0,
            stage: None,
            stage_progress: 0.0,
            file: None,
            error: None,
        })))
    }

    fn snapshot(&self) -> UploadJobSnapshot {
        self.0.lock().snapshot()
    }

    fn enter_stage(&self, stage: JobStage) {
        let mut state = self.0.lock();
        state.status = JobStatus::Processing;
        state.stage = Some(stage);
        state.stage_progress = 0.0;
    }

    /// Update stage progress, mapping it into the overall bar
    ///
    /// Stage spans: assembling 0–60, decompressing 60–90, saving 90–100;
    /// without decompression assembling stretches to 80.
    fn set_stage_progress(&self, stage_ratio: f32, has_decompression: bool) {
        let mut state = self.0.lock();
        let ratio = stage_ratio.clamp(0.0, 1.0);
        if ratio > state.stage_progress {
            state.stage_progress = ratio;
        }

        let (floor, span) = match (state.stage, has_decompression) {
            (Some(JobStage::Assembling), true) => (0.0, 60.0),
            (Some(JobStage::Assembling), false) => (0.0, 80.0),
            (Some(JobStage::Decompressing), _) => (60.0, 30.0),
            (Some(JobStage::Saving), true) => (90.0, 10.0),
            (Some(JobStage::Saving), false) => (80.0, 20.0),
            (None, _) => (0.0, 0.0),
        };
        let overall = floor + ratio * span;
        if overall > state.progress {
            state.progress = overall;
        }
    }

    fn complete(&self, file: FileInfo) {
        let mut state = self.0.lock();
        state.status = JobStatus::Complete;
        state.progress = 100.0;
        state.stage_progress = 1.0;
        state.file = Some(file);
    }

    fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.0.lock();
        tracing::warn!(job = %state.id, error = %message, "Upload job failed");
        state.status = JobStatus::Error;
        state.error = Some(message);
    }
}

/// Completion request for a staged upload
#[derive(Debug, Clone)]
pub struct CompleteUpload {
    pub upload_id: String,
    pub name: String,
    pub total_chunks: u32,
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
    /// `gzip` triggers the decompression stage
    pub encoding: Option<String>,
}

/// Owns chunk staging directories and processing jobs
pub struct UploadManager {
    staging_root: PathBuf,
    files: Arc<FileStore>,
    jobs: RwLock<HashMap<String, JobHandle>>,
    completed: Mutex<HashSet<String>>,
}

impl UploadManager {
    /// Create a manager staging under `staging_root`
    pub fn new(staging_root: impl Into<PathBuf>, files: Arc<FileStore>) -> Result<Self> {
        let staging_root = staging_root.into();
        std::fs::create_dir_all(&staging_root)?;
        Ok(Self {
            staging_root,
            files,
            jobs: RwLock::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        })
    }

    fn staging_dir(&self, upload_id: &str) -> Result<PathBuf> {
        validate_id(upload_id)?;
        Ok(self.staging_root.join(upload_id))
    }

    fn chunk_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("chunk_{index:06}"))
    }

    /// Write one chunk to the upload's staging directory
    ///
    /// Chunks are accepted even after `complete`: the job worker waits for
    /// stragglers before assembling.
    pub fn stage_chunk(&self, upload_id: &str, chunk_index: u32, bytes: &[u8]) -> Result<()> {
        let dir = self.staging_dir(upload_id)?;
        std::fs::create_dir_all(&dir)?;
        std::fs::write(Self::chunk_path(&dir, chunk_index), bytes).map_err(|e| {
            Error::InvalidChunk {
                message: format!("chunk {chunk_index} write failed: {e}"),
            }
        })
    }

    /// Number of chunks staged so far
    pub fn staged_chunks(&self, upload_id: &str) -> usize {
        self.staging_dir(upload_id)
            .ok()
            .and_then(|dir| std::fs::read_dir(dir).ok())
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
    }

    /// Register the processing job for a finished upload
    ///
    /// Returns the job id; the job itself runs on a background worker.
    /// Completing the same upload id twice is a conflict.
    pub fn complete(&self, request: CompleteUpload) -> Result<String> {
        validate_id(&request.upload_id)?;
        if request.total_chunks == 0 {
            return Err(Error::missing_field("totalChunks"));
        }
        {
            let mut completed = self.completed.lock();
            if !completed.insert(request.upload_id.clone()) {
                return Err(Error::DuplicateUpload {
                    id: request.upload_id.clone(),
                });
            }
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let handle = JobHandle::new(job_id.clone());
        self.jobs.write().insert(job_id.clone(), handle.clone());

        let staging_dir = self.staging_dir(&request.upload_id)?;
        let files = Arc::clone(&self.files);
        tokio::spawn(async move {
            let outcome = match wait_for_chunks(&staging_dir, request.total_chunks).await {
                Ok(()) => {
                    let worker_handle = handle.clone();
                    let worker_dir = staging_dir.clone();
                    tokio::task::spawn_blocking(move || {
                        process_job(&worker_handle, &request, &worker_dir, &files)
                    })
                    .await
                    .unwrap_or_else(|_| Err(Error::internal("upload worker panicked")))
                }
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                handle.fail(err.to_string());
            }
            let _ = std::fs::remove_dir_all(&staging_dir);
        });

        Ok(job_id)
    }

    /// Snapshot of a job's state
    pub fn get_job(&self, job_id: &str) -> Result<UploadJobSnapshot> {
        self.jobs
            .read()
            .get(job_id)
            .map(JobHandle::snapshot)
            .ok_or_else(|| Error::JobNotFound {
                id: job_id.to_string(),
            })
    }
}

/// Reader wrapper tracking consumed bytes for decompression progress
struct CountingReader<R: Read> {
    inner: R,
    bytes: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.bytes += read as u64;
        Ok(read)
    }
}

fn process_job(
    handle: &JobHandle,
    request: &CompleteUpload,
    staging_dir: &Path,
    files: &FileStore,
) -> Result<()> {
    let has_decompression = request
        .encoding
        .as_deref()
        .is_some_and(|e| e.eq_ignore_ascii_case("gzip"));

    handle.enter_stage(JobStage::Assembling);
    let assembled = staging_dir.join("assembled");
    {
        let progress_every = (request.total_chunks / 10).max(1);
        let mut out = std::io::BufWriter::new(std::fs::File::create(&assembled)?);
        for index in 0..request.total_chunks {
            let chunk = std::fs::read(UploadManager::chunk_path(staging_dir, index))
                .map_err(|e| Error::InvalidChunk {
                    message: format!("chunk {index} unreadable: {e}"),
                })?;
            out.write_all(&chunk)?;

            if (index + 1) % progress_every == 0 || index + 1 == request.total_chunks {
                handle.set_stage_progress(
                    (index + 1) as f32 / request.total_chunks as f32,
                    has_decompression,
                );
            }
        }
        out.flush()?;
    }

    let final_path = if has_decompression {
        handle.enter_stage(JobStage::Decompressing);
        let decompressed = staging_dir.join("decompressed");
        let total_in = std::fs::metadata(&assembled)?.len().max(1);

        let file = std::fs::File::open(&assembled)?;
        let counting = CountingReader {
            inner: file,
            bytes: 0,
        };
        let mut decoder = flate2::read::GzDecoder::new(counting);
        let mut out = std::io::BufWriter::new(std::fs::File::create(&decompressed)?);
        let mut buffer = vec![0u8; DECOMPRESS_BUFFER];

        loop {
            let read = decoder.read(&mut buffer).map_err(|e| {
                Error::DecompressionFailed {
                    message: e.to_string(),
                }
            })?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])?;
            handle.set_stage_progress(
                decoder.get_ref().bytes as f32 / total_in as f32,
                has_decompression,
            );
        }
        out.flush()?;
        handle.set_stage_progress(1.0, has_decompression);
        decompressed
    } else {
        assembled
    };

    handle.enter_stage(JobStage::Saving);
    let info = files.save_from_path(&request.name, &final_path)?;
    handle.set_stage_progress(1.0, has_decompression);
    handle.complete(info.clone());

    tracing::info!(
        upload = %request.upload_id,
        file = %info.id,
        size = info.size,
        "Upload processed"
    );
    Ok(())
}

async fn wait_for_chunks(staging_dir: &Path, total: u32) -> Result<()> {
    let deadline = tokio::time::Instant::now() + CHUNK_WAIT_TIMEOUT;
    loop {
        let missing = (0..total)
            .find(|&i| !UploadManager::chunk_path(staging_dir, i).exists());
        match missing {
            None => return Ok(()),
            Some(index) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::InvalidChunk {
                        message: format!("chunk {index} never arrived"),
                    });
                }
                tokio::time::sleep(CHUNK_WAIT_TICK).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn setup() -> (tempfile::TempDir, Arc<FileStore>, UploadManager) {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FileStore::new(dir.path().join("uploads")).unwrap());
        let manager =
            UploadManager::new(dir.path().join("uploads/.ws_temp"), Arc::clone(&files)).unwrap();
        (dir, files, manager)
    }

    async fn wait_terminal(manager: &UploadManager, job_id: &str) -> UploadJobSnapshot {
        for _ in 0..200 {
            let snap = manager.get_job(job_id).unwrap();
            if matches!(snap.status, JobStatus::Complete | JobStatus::Error) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn test_chunked_upload_out_of_order() {
        let (_dir, files, manager) = setup();

        manager.stage_chunk("up-1", 0, b"hello ").unwrap();
        manager.stage_chunk("up-1", 2, b"chunks").unwrap();

        let job_id = manager
            .complete(CompleteUpload {
                upload_id: "up-1".to_string(),
                name: "trace.log".to_string(),
                total_chunks: 3,
                original_size: None,
                compressed_size: None,
                encoding: None,
            })
            .unwrap();

        // The middle chunk arrives after `complete`; the worker waits.
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.stage_chunk("up-1", 1, b"upload ").unwrap();

        let snap = wait_terminal(&manager, &job_id).await;
        assert_eq!(snap.status, JobStatus::Complete);
        assert_eq!(snap.progress, 100.0);

        let info = snap.file.unwrap();
        let bytes = std::fs::read(files.path_of(&info.id).unwrap()).unwrap();
        assert_eq!(bytes, b"hello upload chunks");
    }

    #[tokio::test]
    async fn test_gzip_upload() {
        let (_dir, files, manager) = setup();

        let payload = b"2025-12-05 00:00:35, CV01, MotorOn, ON\n".repeat(100);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        for (i, chunk) in compressed.chunks(128).enumerate() {
            manager.stage_chunk("up-gz", i as u32, chunk).unwrap();
        }
        let total = compressed.chunks(128).count() as u32;

        let job_id = manager
            .complete(CompleteUpload {
                upload_id: "up-gz".to_string(),
                name: "trace.csv".to_string(),
                total_chunks: total,
                original_size: Some(payload.len() as u64),
                compressed_size: Some(compressed.len() as u64),
                encoding: Some("gzip".to_string()),
            })
            .unwrap();

        let snap = wait_terminal(&manager, &job_id).await;
        assert_eq!(snap.status, JobStatus::Complete);

        let info = snap.file.unwrap();
        assert_eq!(info.size, payload.len() as u64);
        let bytes = std::fs::read(files.path_of(&info.id).unwrap()).unwrap();
        assert_eq!(bytes, payload);
    }

    #[tokio::test]
    async fn test_duplicate_complete_conflicts() {
        let (_dir, _files, manager) = setup();
        manager.stage_chunk("up-dup", 0, b"data").unwrap();

        let request = CompleteUpload {
            upload_id: "up-dup".to_string(),
            name: "a.log".to_string(),
            total_chunks: 1,
            original_size: None,
            compressed_size: None,
            encoding: None,
        };
        manager.complete(request.clone()).unwrap();
        let err = manager.complete(request).unwrap_err();
        assert!(matches!(err, Error::DuplicateUpload { .. }));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_dir, _files, manager) = setup();
        assert!(matches!(
            manager.get_job("nope").unwrap_err(),
            Error::JobNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_progress_monotonic_through_stages() {
        let (_dir, _files, manager) = setup();

        for i in 0..20u32 {
            manager
                .stage_chunk("up-mono", i, format!("chunk-{i};").as_bytes())
                .unwrap();
        }
        let job_id = manager
            .complete(CompleteUpload {
                upload_id: "up-mono".to_string(),
                name: "trace.log".to_string(),
                total_chunks: 20,
                original_size: None,
                compressed_size: None,
                encoding: None,
            })
            .unwrap();

        let mut last = -1.0f32;
        loop {
            let snap = manager.get_job(&job_id).unwrap();
            assert!(snap.progress >= last, "progress went backwards");
            last = snap.progress;
            if matches!(snap.status, JobStatus::Complete | JobStatus::Error) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn test_corrupt_gzip_fails_job() {
        let (_dir, _files, manager) = setup();
        manager.stage_chunk("up-bad", 0, b"not gzip at all").unwrap();

        let job_id = manager
            .complete(CompleteUpload {
                upload_id: "up-bad".to_string(),
                name: "bad.gz".to_string(),
                total_chunks: 1,
                original_size: None,
                compressed_size: None,
                encoding: Some("gzip".to_string()),
            })
            .unwrap();

        let snap = wait_terminal(&manager, &job_id).await;
        assert_eq!(snap.status, JobStatus::Error);
        assert!(snap.error.is_some());
    }
}
