//! Audio source descriptions.
//!
//! `AudioSource` is a closed tagged enum: where the bytes come from, nothing
//! more. Resolution into something a backend can open lives in the resolver.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use parking_lot::Mutex;

/// Where playable audio bytes originate.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Bundled resource, looked up through the asset bundle.
    Asset { path: String },
    /// Local filesystem path.
    Filepath { path: PathBuf },
    /// Remote URL opened through the network transport.
    Network { url: String },
    /// Ordered sources, possibly nesting further playlists.
    Playlist { items: Vec<AudioSource> },
    /// Bytes that arrive later (or never).
    FutureBytes { pending: FutureBytes },
}

/// Variant tag, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Asset,
    Filepath,
    Network,
    Playlist,
    FutureBytes,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Asset => "asset",
            Self::Filepath => "filepath",
            Self::Network => "network",
            Self::Playlist => "playlist",
            Self::FutureBytes => "future-bytes",
        };
        f.write_str(name)
    }
}

impl AudioSource {
    pub fn asset(path: impl Into<String>) -> Self {
        Self::Asset { path: path.into() }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::Filepath { path: path.into() }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Network { url: url.into() }
    }

    pub fn playlist(items: impl IntoIterator<Item = AudioSource>) -> Self {
        Self::Playlist {
            items: items.into_iter().collect(),
        }
    }

    pub fn future_bytes(pending: FutureBytes) -> Self {
        Self::FutureBytes { pending }
    }

    /// Classify a free-form location string.
    ///
    /// `http(s)://` → Network, `asset:` prefix → Asset, anything else → Filepath.
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::url(location)
        } else if let Some(path) = location.strip_prefix("asset:") {
            Self::asset(path)
        } else {
            Self::file(location)
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Asset { .. } => SourceKind::Asset,
            Self::Filepath { .. } => SourceKind::Filepath,
            Self::Network { .. } => SourceKind::Network,
            Self::Playlist { .. } => SourceKind::Playlist,
            Self::FutureBytes { .. } => SourceKind::FutureBytes,
        }
    }

    pub fn is_playlist(&self) -> bool {
        matches!(self, Self::Playlist { .. })
    }

    /// Playable leaves in play order, nested playlists flattened depth-first.
    pub fn leaves(&self) -> Vec<AudioSource> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<AudioSource>) {
        match self {
            Self::Playlist { items } => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
            leaf => out.push(leaf.clone()),
        }
    }
}

type Settled = Result<Arc<[u8]>, String>;

/// Deferred byte buffer with a single resolution.
///
/// Clones share the outcome. Waiters are woken by the completer's signal
/// channel disconnecting, so every clone observes the same settlement.
#[derive(Clone)]
pub struct FutureBytes {
    slot: Arc<Mutex<Option<Settled>>>,
    settled: Receiver<()>,
}

/// Write side of a [`FutureBytes`]. Dropping it unsettled rejects the future.
pub struct BytesCompleter {
    slot: Arc<Mutex<Option<Settled>>>,
    _signal: Sender<()>,
}

impl FutureBytes {
    /// A pending future and the completer that settles it.
    pub fn pending() -> (BytesCompleter, FutureBytes) {
        let (signal, settled) = bounded(0);
        let slot = Arc::new(Mutex::new(None));
        (
            BytesCompleter {
                slot: Arc::clone(&slot),
                _signal: signal,
            },
            FutureBytes { slot, settled },
        )
    }

    pub fn ready(bytes: impl Into<Vec<u8>>) -> Self {
        let (completer, future) = Self::pending();
        completer.resolve(bytes);
        future
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        let (completer, future) = Self::pending();
        completer.reject(reason);
        future
    }

    /// Settle from a closure on a background thread.
    pub fn spawn<F>(produce: F) -> Self
    where
        F: FnOnce() -> Result<Vec<u8>, String> + Send + 'static,
    {
        let (completer, future) = Self::pending();
        thread::spawn(move || match produce() {
            Ok(bytes) => completer.resolve(bytes),
            Err(reason) => completer.reject(reason),
        });
        future
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Block until settled.
    pub fn wait(&self) -> Result<Arc<[u8]>, String> {
        self.wait_or_interrupt(&never())
            .unwrap_or_else(|| Err("wait interrupted".into()))
    }

    /// Block until settled or until `interrupt` disconnects. `None` means interrupted.
    pub(crate) fn wait_or_interrupt(&self, interrupt: &Receiver<()>) -> Option<Settled> {
        if let Some(settled) = self.slot.lock().clone() {
            return Some(settled);
        }
        select! {
            recv(self.settled) -> _ => Some(self.outcome()),
            recv(interrupt) -> _ => None,
        }
    }

    fn outcome(&self) -> Settled {
        self.slot
            .lock()
            .clone()
            .unwrap_or_else(|| Err("completer dropped before settling".into()))
    }
}

impl fmt::Debug for FutureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureBytes")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl BytesCompleter {
    pub fn resolve(self, bytes: impl Into<Vec<u8>>) {
        self.settle(Ok(Arc::from(bytes.into())));
    }

    pub fn reject(self, reason: impl Into<String>) {
        self.settle(Err(reason.into()));
    }

    // Slot is written before the signal sender drops with `self`.
    fn settle(self, outcome: Settled) {
        *self.slot.lock() = Some(outcome);
    }
}
