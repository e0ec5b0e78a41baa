//! Small content cache for `config` and `download` requests

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::error::{StoreError, StoreResult};

/// Files larger than this are served but not cached
const MAX_CACHED_FILE: u64 = 1024 * 1024;

#[derive(Debug, Default)]
pub struct FileCache {
    entries: HashMap<PathBuf, Vec<u8>>,
}

impl FileCache {
    /// Read `name` below `root`, caching small files
    pub fn load(&mut self, root: &Path, name: &str) -> StoreResult<Vec<u8>> {
        if name.contains("../") || name.starts_with('/') || name.is_empty() {
            return Err(StoreError::Rejected(format!("illegal file name '{name}'")));
        }
        let path = root.join(name);
        if let Some(content) = self.entries.get(&path) {
            trace!("file cache hit for {}", path.display());
            return Ok(content.clone());
        }
        let content = std::fs::read(&path)?;
        if content.len() as u64 <= MAX_CACHED_FILE {
            self.entries.insert(path, content.clone());
        }
        Ok(content)
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
