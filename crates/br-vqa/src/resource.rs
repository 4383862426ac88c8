//! Named stream providers
//!
//! The player opens its stream by name through a [`ResourceProvider`]; where
//! the bytes live (loose files, an archive, memory) is the provider's
//! business. Names are matched case-insensitively, as game scripts spell
//! them inconsistently.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{VqaError, VqaResult};

/// Seekable byte source
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Opens named byte streams
pub trait ResourceProvider: Send + Sync {
    fn open_stream(&self, name: &str) -> VqaResult<Box<dyn ReadSeek>>;
}

// ============ Directory ============

/// Loose files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> VqaResult<PathBuf> {
        let exact = self.root.join(name);
        if exact.is_file() {
            return Ok(exact);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
                && entry.file_type()?.is_file()
            {
                return Ok(entry.path());
            }
        }

        Err(VqaError::ResourceNotFound(name.to_string()))
    }
}

impl ResourceProvider for DirectoryResources {
    fn open_stream(&self, name: &str) -> VqaResult<Box<dyn ReadSeek>> {
        let path = self.resolve(name)?;
        log::debug!("[DirectoryResources] Opening {}", path.display());
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

// ============ Memory ============

/// Named in-memory buffers
#[derive(Debug, Default)]
pub struct MemoryResources {
    streams: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a stream
    pub fn insert(&self, name: &str, data: impl Into<Arc<[u8]>>) {
        self.streams
            .write()
            .insert(name.to_ascii_uppercase(), data.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.streams
            .write()
            .remove(&name.to_ascii_uppercase())
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams
            .read()
            .contains_key(&name.to_ascii_uppercase())
    }
}

impl ResourceProvider for MemoryResources {
    fn open_stream(&self, name: &str) -> VqaResult<Box<dyn ReadSeek>> {
        let data = self
            .streams
            .read()
            .get(&name.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| VqaError::ResourceNotFound(name.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }
}
