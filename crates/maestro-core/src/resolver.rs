//! Source resolver — maps an [`AudioSource`] variant to a [`MediaHandle`].
//!
//! Exhaustive match over the closed variant set. Playlists resolve lazily:
//! only the first playable leaf is touched here; players resolve the rest
//! when those entries become current.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{never, Receiver};

use crate::effects::assets::DirectoryAssets;
use crate::effects::MediaHandle;
use crate::error::{BackendError, ResolutionErrorKind, SourceResolutionError};
use crate::models::{AudioSource, SourceKind};

/// Bundled-asset accessor: path → handle | NotFound.
pub trait AssetBundle: Send + Sync {
    fn open(&self, path: &str) -> Result<MediaHandle, SourceResolutionError>;
}

/// Network transport: url → stream handle | NetworkError.
pub trait NetworkTransport: Send + Sync {
    fn open(&self, url: &str) -> Result<MediaHandle, SourceResolutionError>;
}

/// Transport used when the `http` feature is off. Every URL fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

impl NetworkTransport for OfflineTransport {
    fn open(&self, url: &str) -> Result<MediaHandle, SourceResolutionError> {
        Err(SourceResolutionError::new(
            ResolutionErrorKind::NetworkError,
            SourceKind::Network,
            format!("no network transport available for {}", url),
        ))
    }
}

pub struct Resolver {
    assets: Arc<dyn AssetBundle>,
    network: Arc<dyn NetworkTransport>,
}

impl Resolver {
    pub fn new(assets: Arc<dyn AssetBundle>, network: Arc<dyn NetworkTransport>) -> Self {
        Self { assets, network }
    }

    /// Directory-backed assets plus the default transport for this build.
    pub fn with_asset_root(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectoryAssets::new(root)), default_transport())
    }

    /// Resolve, blocking on deferred bytes for as long as it takes.
    pub fn resolve(&self, source: &AudioSource) -> Result<MediaHandle, SourceResolutionError> {
        self.resolve_interruptible(source, &never())
            .unwrap_or_else(|| Err(rejected(SourceKind::FutureBytes, "wait interrupted")))
    }

    /// Resolve, giving up when `interrupt` disconnects. `None` means interrupted.
    pub(crate) fn resolve_interruptible(
        &self,
        source: &AudioSource,
        interrupt: &Receiver<()>,
    ) -> Option<Result<MediaHandle, SourceResolutionError>> {
        let resolved = match source {
            AudioSource::Asset { path } => self.assets.open(path),
            AudioSource::Filepath { path } => open_file(path),
            AudioSource::Network { url } => self.network.open(url),
            AudioSource::Playlist { .. } => match source.leaves().into_iter().next() {
                Some(first) => return self.resolve_interruptible(&first, interrupt),
                None => Err(SourceResolutionError::new(
                    ResolutionErrorKind::NotFound,
                    SourceKind::Playlist,
                    "empty playlist",
                )),
            },
            AudioSource::FutureBytes { pending } => match pending.wait_or_interrupt(interrupt)? {
                Ok(bytes) => Ok(MediaHandle::Bytes { bytes, hint: None }),
                Err(reason) => Err(rejected(SourceKind::FutureBytes, &reason)),
            },
        };
        Some(resolved)
    }
}

#[cfg(feature = "http")]
pub fn default_transport() -> Arc<dyn NetworkTransport> {
    Arc::new(crate::effects::http::HttpTransport)
}

#[cfg(not(feature = "http"))]
pub fn default_transport() -> Arc<dyn NetworkTransport> {
    Arc::new(OfflineTransport)
}

/// A resolved handle the backend could not open.
pub(crate) fn decode_failure(variant: SourceKind, err: BackendError) -> SourceResolutionError {
    SourceResolutionError::new(ResolutionErrorKind::DecodeError, variant, err.to_string())
}

fn open_file(path: &Path) -> Result<MediaHandle, SourceResolutionError> {
    if path.is_file() {
        Ok(MediaHandle::File { path: path.to_path_buf() })
    } else {
        Err(SourceResolutionError::new(
            ResolutionErrorKind::NotFound,
            SourceKind::Filepath,
            path.display().to_string(),
        ))
    }
}

fn rejected(variant: SourceKind, reason: &str) -> SourceResolutionError {
    SourceResolutionError::new(ResolutionErrorKind::FutureRejected, variant, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::assets::MemoryAssets;
    use crate::models::FutureBytes;
    use tempfile::TempDir;

    fn memory_resolver() -> Resolver {
        let assets = MemoryAssets::new();
        assets.insert("music/theme.mp3", vec![7u8; 4]);
        Resolver::new(Arc::new(assets), Arc::new(OfflineTransport))
    }

    #[test]
    fn asset_resolves_through_bundle() {
        let media = memory_resolver().resolve(&AudioSource::asset("music/theme.mp3")).unwrap();
        assert!(matches!(media, MediaHandle::Bytes { .. }));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = memory_resolver()
            .resolve(&AudioSource::file(dir.path().join("gone.flac")))
            .unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::NotFound);
        assert_eq!(err.variant, SourceKind::Filepath);
    }

    #[test]
    fn existing_file_resolves() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("here.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        let media = memory_resolver().resolve(&AudioSource::file(&path)).unwrap();
        assert!(matches!(media, MediaHandle::File { .. }));
    }

    #[test]
    fn offline_network_fails_with_network_error() {
        let err = memory_resolver()
            .resolve(&AudioSource::url("https://example.com/a.mp3"))
            .unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::NetworkError);
    }

    #[test]
    fn playlist_resolves_first_leaf_only() {
        let source = AudioSource::playlist([
            AudioSource::playlist([AudioSource::asset("music/theme.mp3")]),
            AudioSource::url("https://never.touched/b.mp3"),
        ]);
        assert!(memory_resolver().resolve(&source).is_ok());

        let empty = memory_resolver().resolve(&AudioSource::playlist([])).unwrap_err();
        assert_eq!(empty.variant, SourceKind::Playlist);
    }

    #[test]
    fn playlist_skips_empty_leading_items() {
        let source = AudioSource::playlist([
            AudioSource::playlist([]),
            AudioSource::playlist([AudioSource::playlist([])]),
            AudioSource::asset("music/theme.mp3"),
        ]);
        let media = memory_resolver().resolve(&source).unwrap();
        assert!(matches!(media, MediaHandle::Bytes { .. }));

        let hollow = AudioSource::playlist([AudioSource::playlist([]), AudioSource::playlist([])]);
        let err = memory_resolver().resolve(&hollow).unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::NotFound);
        assert_eq!(err.variant, SourceKind::Playlist);
    }

    #[test]
    fn future_bytes_resolve_and_reject() {
        let resolver = memory_resolver();
        let ok = resolver.resolve(&AudioSource::future_bytes(FutureBytes::ready(vec![1u8])));
        assert!(matches!(ok, Ok(MediaHandle::Bytes { .. })));

        let err = resolver
            .resolve(&AudioSource::future_bytes(FutureBytes::rejected("403")))
            .unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::FutureRejected);
        assert_eq!(err.detail, "403");
    }
}
