use std::fs;
use std::path::{Path, PathBuf};

use dashmap::{DashMap, DashSet};
use log::{trace, warn};

use crate::io::common::loader::{LoaderError, RawAssetLoader, normalize_path};

/// Loads assets from an extracted data directory.
///
/// The game addresses assets case-insensitively (`World\wmo\...` vs. `WORLD\WMO\...`), while the
/// extracted files are usually stored with whatever casing the extraction tool used. Directories
/// are thus indexed lazily, the first time a lookup passes through them, mapping the normalized
/// logical path to the real one. Lookups happen from all streaming workers at the same time, hence
/// the concurrent maps.
pub struct FsLoader {
    data_folder: PathBuf,
    index: DashMap<String, PathBuf>,
    indexed_directories: DashSet<String>,
}

impl FsLoader {
    pub fn new(data_folder: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let data_folder = data_folder.as_ref().to_path_buf();
        if !data_folder.is_dir() {
            return Err(LoaderError::NotFound {
                path: data_folder.to_string_lossy().to_string(),
            });
        }

        Ok(Self {
            data_folder,
            index: DashMap::with_capacity(1024),
            indexed_directories: DashSet::new(),
        })
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let normalized = normalize_path(path);
        if let Some(hit) = self.index.get(&normalized) {
            return Some(hit.value().clone());
        }

        let mut directory = self.data_folder.clone();
        let mut prefix = String::new();
        for component in normalized.split('\\').filter(|component| !component.is_empty()) {
            if !self.indexed_directories.contains(&prefix) {
                self.index_directory(&directory, &prefix);
            }

            let logical = if prefix.is_empty() {
                component.to_string()
            } else {
                format!("{}\\{}", prefix, component)
            };

            directory = self.index.get(&logical)?.value().clone();
            prefix = logical;
        }

        Some(directory)
    }

    fn index_directory(&self, directory: &Path, prefix: &str) {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to enumerate {}: {}", directory.display(), err);
                return;
            }
        };

        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name().to_string_lossy().to_uppercase();
            let logical = if prefix.is_empty() {
                name
            } else {
                format!("{}\\{}", prefix, name)
            };
            self.index.insert(logical, entry.path());
        }

        trace!("Indexed {} ({})", directory.display(), prefix);
        self.indexed_directories.insert(prefix.to_string());
    }
}

impl RawAssetLoader for FsLoader {
    fn load_raw_owned(&self, path: &str) -> Result<Vec<u8>, LoaderError> {
        let Some(real_path) = self.resolve(path).filter(|real_path| real_path.is_file()) else {
            warn!("Could not locate {}!", path);
            return Err(LoaderError::NotFound { path: path.into() });
        };

        trace!("Loading {} from {}", path, real_path.display());
        fs::read(&real_path).map_err(|source| LoaderError::ReadError {
            path: path.into(),
            source,
        })
    }

    fn contains(&self, path: &str) -> bool {
        self.resolve(path)
            .is_some_and(|real_path| real_path.is_file())
    }
}
