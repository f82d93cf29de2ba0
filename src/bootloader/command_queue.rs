//! Queued command file: newline-separated arguments left on the cache volume.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::errors::{RecoveryError, Result};
use crate::platform::pal::VolumeManager;

pub struct CommandQueue {
    path: PathBuf,
    volumes: Option<Arc<dyn VolumeManager>>,
    reads: AtomicUsize,
}

impl CommandQueue {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            volumes: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Mount the volume holding the queue before touching it.
    #[must_use]
    pub fn with_volumes(mut self, volumes: Arc<dyn VolumeManager>) -> Self {
        self.volumes = Some(volumes);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many times the queue file has been read.
    #[must_use]
    pub fn read_attempts(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Non-empty tokens of the queue; a missing file yields none.
    pub fn read_tokens(&self) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(volumes) = &self.volumes {
            volumes.ensure_mounted(&self.path)?;
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RecoveryError::io(&self.path, e)),
        };
        Ok(content
            .split('\n')
            .filter(|token| !token.is_empty() && !token.starts_with('\0'))
            .map(str::to_string)
            .collect())
    }

    /// Delete the queue so it is not replayed; already absent is fine.
    pub fn remove(&self) -> Result<()> {
        if let Some(volumes) = &self.volumes {
            volumes.ensure_mounted(&self.path)?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecoveryError::io(&self.path, e)),
        }
    }
}
