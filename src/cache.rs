//! Durable reconnect-endpoint cache
//!
//! Remembers the last `reconnect_url` the gateway handed out so a restart
//! can resume against it. The on-disk record is a single JSON object,
//! `{"websocket_url": "..."}`, replaced via write-then-rename so a crash
//! leaves either the previous or the new file, never a torn one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Persisted record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEndpoint {
    #[serde(rename = "websocket_url", default)]
    pub url: String,
}

/// In-memory endpoint plus its backing file
#[derive(Debug)]
pub struct EndpointCache {
    path: PathBuf,
    url: RwLock<String>,
}

impl EndpointCache {
    /// Create a cache bound to `path` and seed it from disk
    ///
    /// A missing file is the normal first-run case and yields an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let url = Self::load(&path)?.map(|c| c.url).unwrap_or_default();

        if url.is_empty() {
            debug!(path = %path.display(), "No cached endpoint");
        } else {
            info!(path = %path.display(), "Loaded cached reconnect endpoint");
        }

        Ok(Self {
            path,
            url: RwLock::new(url),
        })
    }

    /// Create a cache with no file backing it yet, used when the persisted
    /// record is unreadable and we continue without it
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            url: RwLock::new(String::new()),
        }
    }

    /// Read the persisted record, `None` if the file does not exist
    pub fn load(path: &Path) -> Result<Option<CachedEndpoint>> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::IoRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| Error::CacheCorrupted {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current endpoint, empty when nothing is cached
    pub fn get(&self) -> String {
        self.url.read().clone()
    }

    /// Replace the endpoint and persist it
    ///
    /// The in-memory value is updated even when the write fails, so the
    /// running process keeps using the newest hint.
    pub fn set(&self, url: &str) -> Result<()> {
        let mut current = self.url.write();
        *current = url.to_string();
        self.persist(&current)
    }

    /// Forget the endpoint (e.g. after the gateway refused it)
    pub fn clear(&self) -> Result<()> {
        self.set("")
    }

    fn persist(&self, url: &str) -> Result<()> {
        let record = CachedEndpoint { url: url.to_string() };
        let data = serde_json::to_string_pretty(&record).map_err(|e| self.write_error(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }

        let tmp = self.tmp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| self.write_error(e))?;
        file.write_all(data.as_bytes()).map_err(|e| self.write_error(e))?;
        file.sync_all().map_err(|e| self.write_error(e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| self.write_error(e))?;
        debug!(path = %self.path.display(), "Endpoint cache persisted");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "websocket_cache.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_error(&self, e: impl std::fmt::Display) -> Error {
        Error::CacheWrite {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}
