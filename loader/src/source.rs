//! Byte sources.
//!
//! The registry never reads bytes itself; it asks a [`ByteSource`] for the
//! contents at a location. Fetching is the only suspension point of a load.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use spin::Mutex;

use crate::error::FetchError;

/// Fetched bytes plus the media type the source reported, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Fetched {
    pub fn binary(bytes: Vec<u8>) -> Self {
        Fetched {
            bytes,
            content_type: None,
        }
    }
}

#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Fetched, FetchError>;
}

/// Files under a root directory. A leading `/` in a location is relative to
/// the root; `..` components are rejected.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSource { root: root.into() }
    }

    fn resolve(&self, location: &str) -> Option<PathBuf> {
        let relative = Path::new(location.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn fetch(&self, location: &str) -> Result<Fetched, FetchError> {
        let path = self.resolve(location).ok_or_else(|| FetchError::NotFound {
            location: location.into(),
        })?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let content_type = match path.extension().and_then(|e| e.to_str()) {
                    Some("wasm") => Some(String::from("application/wasm")),
                    Some("html") | Some("htm") => Some(String::from("text/html")),
                    _ => None,
                };
                Ok(Fetched {
                    bytes,
                    content_type,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound {
                location: location.into(),
            }),
            Err(e) => Err(FetchError::Io {
                location: location.into(),
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    fetched: Fetched,
    delay: Option<Duration>,
    hang: bool,
}

/// In-process map of locations to bytes, with fetch counting.
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: Mutex<HashMap<String, Entry>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: &str, bytes: Vec<u8>) {
        self.insert_fetched(location, Fetched::binary(bytes));
    }

    pub fn insert_fetched(&self, location: &str, fetched: Fetched) {
        self.entries.lock().insert(
            location.into(),
            Entry {
                fetched,
                delay: None,
                hang: false,
            },
        );
    }

    pub fn remove(&self, location: &str) {
        self.entries.lock().remove(location);
    }

    /// Delay every fetch of `location`.
    pub fn set_delay(&self, location: &str, delay: Duration) {
        if let Some(entry) = self.entries.lock().get_mut(location) {
            entry.delay = Some(delay);
        }
    }

    /// Make fetches of `location` never complete (or stop doing so).
    pub fn set_hang(&self, location: &str, hang: bool) {
        if let Some(entry) = self.entries.lock().get_mut(location) {
            entry.hang = hang;
        }
    }

    /// How many times `location` has been fetched.
    pub fn fetch_count(&self, location: &str) -> usize {
        self.fetches.lock().get(location).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn fetch(&self, location: &str) -> Result<Fetched, FetchError> {
        *self.fetches.lock().entry(location.into()).or_insert(0) += 1;

        let entry = self
            .entries
            .lock()
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                location: location.into(),
            })?;

        if entry.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = entry.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(entry.fetched)
    }
}
