//! Destinations for downloaded bodies.
//!
//! A session hands the complete body to its client's [`Sink`] exactly once,
//! keyed by the request's sink id. A failed store fails the request with a
//! sink error.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Stores a finished body under an identifier.
pub trait Sink: Send + Sync {
    /// Persists `bytes` under `id`, replacing any earlier value.
    fn store(&self, id: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Writes each body to a file below a root directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    /// Creates a sink that writes below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `id` to a path below the root.
    ///
    /// Absolute ids and ids that step outside the root are rejected.
    pub fn path_for(&self, id: &str) -> io::Result<PathBuf> {
        let rel = Path::new(id);
        let mut normal = false;
        for component in rel.components() {
            match component {
                Component::Normal(_) => normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("sink id {id:?} escapes the sink root"),
                    ));
                }
            }
        }
        if !normal {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sink id {id:?} names no file"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

impl Sink for FileSink {
    fn store(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }
}

/// Keeps bodies in memory. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    bodies: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemorySink {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the body stored under `id`.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.bodies.lock().get(id).cloned()
    }

    /// Number of stored bodies.
    pub fn len(&self) -> usize {
        self.bodies.lock().len()
    }

    /// Returns true if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.bodies.lock().is_empty()
    }

    /// Stored ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.bodies.lock().keys().cloned().collect()
    }
}

impl Sink for MemorySink {
    fn store(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        self.bodies.lock().insert(id.to_owned(), bytes.to_vec());
        Ok(())
    }
}
