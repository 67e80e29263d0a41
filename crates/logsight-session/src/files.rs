// logsight-session/src/files.rs
//! Permanent upload store.
//!
//! File bytes live at `<root>/<id>` with a `<id>.json` metadata sidecar.
//! Metadata mutations are serialized; reads go straight to disk so the
//! store needs no startup scan and survives restarts for free.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use logsight_core::{Error, FileInfo, Result};

/// Extensions hidden from the recent-files listing (map/rules assets)
const HIDDEN_EXTENSIONS: &[&str] = &["xml", "yaml", "yml"];

/// Maximum entries returned by `recent`
const RECENT_LIMIT: usize = 20;

/// Process-wide permanent file store
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create) the store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of a stored file's bytes
    pub fn path_of(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Store a byte buffer under a fresh id
    pub fn save_bytes(&self, name: &str, bytes: &[u8]) -> Result<FileInfo> {
        let info = FileInfo {
            id: Uuid::new_v4().to_string(),
            name: sanitize_name(name),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let _guard = self.write_lock.lock();
        std::fs::write(self.root.join(&info.id), bytes)?;
        self.write_meta(&info)?;
        Ok(info)
    }

    /// Copy an already-assembled file into the store
    pub fn save_from_path(&self, name: &str, src: &Path) -> Result<FileInfo> {
        let size = std::fs::metadata(src)?.len();
        let info = FileInfo {
            id: Uuid::new_v4().to_string(),
            name: sanitize_name(name),
            size,
            created_at: Utc::now(),
        };

        let _guard = self.write_lock.lock();
        std::fs::copy(src, self.root.join(&info.id))?;
        self.write_meta(&info)?;
        Ok(info)
    }

    fn write_meta(&self, info: &FileInfo) -> Result<()> {
        let json = serde_json::to_vec_pretty(info)
            .map_err(|e| Error::internal(format!("file metadata encode: {e}")))?;
        std::fs::write(self.meta_path(&info.id), json)?;
        Ok(())
    }

    /// Look up a stored file's metadata
    pub fn get(&self, id: &str) -> Result<FileInfo> {
        validate_id(id)?;
        let meta_path = self.meta_path(id);
        let bytes = std::fs::read(&meta_path)
            .map_err(|_| Error::FileNotFound(self.root.join(id)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::internal(format!("file metadata decode: {e}")))
    }

    /// Newest stored files, excluding map/rules assets, at most 20
    pub fn recent(&self) -> Result<Vec<FileInfo>> {
        let mut infos = Vec::new();
        for dir_entry in std::fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let Ok(info) = serde_json::from_slice::<FileInfo>(&bytes) else {
                continue;
            };

            let ext = Path::new(&info.name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());
            if ext.as_deref().is_some_and(|e| HIDDEN_EXTENSIONS.contains(&e)) {
                continue;
            }
            infos.push(info);
        }

        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        infos.truncate(RECENT_LIMIT);
        Ok(infos)
    }

    /// Remove a stored file and its metadata
    pub fn delete(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let _guard = self.write_lock.lock();
        let bytes = self.root.join(id);
        if !bytes.exists() {
            return Err(Error::FileNotFound(bytes));
        }
        std::fs::remove_file(&bytes)?;
        let _ = std::fs::remove_file(self.meta_path(id));
        Ok(())
    }
}

/// Reject ids that could escape the store directory
pub(crate) fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::invalid_data(format!("invalid file id: {id:?}")))
    }
}

fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim();
    let base = Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}
