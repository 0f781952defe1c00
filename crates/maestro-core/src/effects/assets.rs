//! Asset bundles — bundled resources addressed by relative path.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::effects::MediaHandle;
use crate::error::{ResolutionErrorKind, SourceResolutionError};
use crate::models::SourceKind;
use crate::resolver::AssetBundle;

/// Assets stored under a directory on disk.
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetBundle for DirectoryAssets {
    fn open(&self, path: &str) -> Result<MediaHandle, SourceResolutionError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(not_found(format!("asset path escapes bundle: {}", path)));
        }

        let full = self.root.join(relative);
        if full.is_file() {
            Ok(MediaHandle::File { path: full })
        } else {
            Err(not_found(path.to_string()))
        }
    }
}

/// Assets held in memory, e.g. from `include_bytes!`.
#[derive(Default)]
pub struct MemoryAssets {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries
            .write()
            .insert(path.into(), Arc::from(bytes.into()));
    }
}

impl AssetBundle for MemoryAssets {
    fn open(&self, path: &str) -> Result<MediaHandle, SourceResolutionError> {
        let bytes = self
            .entries
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path.to_string()))?;
        let hint = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        Ok(MediaHandle::Bytes { bytes, hint })
    }
}

fn not_found(detail: String) -> SourceResolutionError {
    SourceResolutionError::new(ResolutionErrorKind::NotFound, SourceKind::Asset, detail)
}
