//! Flat cache of file contents keyed by (project, revision, path).

use std::collections::HashMap;
use std::sync::Mutex;

/// Identifies one version of one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileContentKey {
    pub project: String,
    /// Commit sha, or another stable revision name.
    pub revision: String,
    pub path: String,
}

impl FileContentKey {
    #[must_use]
    pub fn new(project: &str, revision: &str, path: &str) -> Self {
        Self {
            project: project.to_string(),
            revision: revision.to_string(),
            path: path.to_string(),
        }
    }
}

/// File contents never change for a given commit, so entries are only
/// removed by [`FileContentCache::clear`].
#[derive(Debug, Default)]
pub struct FileContentCache {
    contents: Mutex<HashMap<FileContentKey, String>>,
}

impl FileContentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &FileContentKey) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: FileContentKey, content: String) {
        self.contents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, content);
    }

    pub fn clear(&self) {
        self.contents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
