// Durable context persistence.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::RwLock;

/// One durable key holding the serialized context. Absence is a valid
/// state; backends never interpret the payload.
pub trait ContextStorage: Send + Sync {
    /// Read the stored payload, `None` when nothing was persisted.
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored payload.
    fn save(&self, raw: &str) -> Result<()>;

    /// Remove the stored payload. Removing an absent payload is fine.
    fn remove(&self) -> Result<()>;
}

/// File-backed storage: one JSON document at a fixed path.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ContextStorage for FileStorage {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn save(&self, raw: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.path, raw).with_context(|| format!("writing {}", self.path.display()))
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    slot: RwLock<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a payload, as if a previous process had persisted it.
    pub fn with_payload(raw: impl Into<String>) -> Self {
        Self {
            slot: RwLock::new(Some(raw.into())),
        }
    }
}

impl ContextStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot.read().clone())
    }

    fn save(&self, raw: &str) -> Result<()> {
        *self.slot.write() = Some(raw.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.slot.write() = None;
        Ok(())
    }
}
