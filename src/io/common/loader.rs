use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Could not locate {path}")]
    NotFound { path: String },

    #[error("Failed to read {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Asset paths are case-insensitive and use backslashes, as inside of the MPQ archives.
/// This brings any given path into that canonical form, which is also used as cache key.
pub fn normalize_path(path: &str) -> String {
    path.replace('/', "\\").to_uppercase()
}

pub trait RawAssetLoader: Send + Sync {
    /// in case of a caching implementation, this may need to clone the whole buffer!
    fn load_raw_owned(&self, path: &str) -> Result<Vec<u8>, LoaderError>;

    fn contains(&self, path: &str) -> bool;
}

/// Serves assets that have been registered up front, used for tests and tooling that generate
/// their assets on the fly.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(normalize_path(path), data);
    }

    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl RawAssetLoader for MemoryLoader {
    fn load_raw_owned(&self, path: &str) -> Result<Vec<u8>, LoaderError> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| LoaderError::NotFound { path: path.into() })
    }

    fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }
}
