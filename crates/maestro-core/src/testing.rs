//! Resource-accounting fake backend for tests.
//!
//! Counts live sessions, remembers the peak and the release order, and
//! lets tests drive a session to its natural end. Bytes handles are
//! labelled with their contents, so `MemoryAssets` entries should hold
//! their own name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::effects::assets::MemoryAssets;
use crate::effects::{AudioBackend, MediaHandle, Session};
use crate::error::BackendError;
use crate::resolver::{OfflineTransport, Resolver};

pub(crate) const DEFAULT_DURATION: Duration = Duration::from_secs(120);

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    ledger: Arc<Ledger>,
}

#[derive(Default)]
struct Ledger {
    live: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    probes: AtomicUsize,
    fail_open: AtomicBool,
    durations: Mutex<HashMap<String, Option<Duration>>>,
    sessions: Mutex<Vec<Arc<FakeState>>>,
    /// Labels in the order their sessions were disposed.
    released: Mutex<Vec<String>>,
}

pub(crate) struct FakeState {
    pub label: String,
    pub playing: AtomicBool,
    pub finished: AtomicBool,
    pub disposed: AtomicBool,
    pub position: Mutex<Duration>,
    pub volume: Mutex<f32>,
    duration: Option<Duration>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_duration(&self, label: &str, duration: Option<Duration>) {
        self.ledger.durations.lock().insert(label.to_string(), duration);
    }

    pub fn fail_opens(&self, fail: bool) {
        self.ledger.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.ledger.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.ledger.peak.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.ledger.opened.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.ledger.probes.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.ledger.released.lock().clone()
    }

    /// Most recently opened session that is still live.
    pub fn current(&self) -> Option<Arc<FakeState>> {
        self.ledger
            .sessions
            .lock()
            .iter()
            .rev()
            .find(|s| !s.disposed.load(Ordering::SeqCst))
            .cloned()
    }

    pub fn current_label(&self) -> Option<String> {
        self.current().map(|s| s.label.clone())
    }

    /// Drive the current live session to its natural end.
    pub fn finish_current(&self) {
        if let Some(session) = self.current() {
            session.playing.store(false, Ordering::SeqCst);
            session.finished.store(true, Ordering::SeqCst);
        }
    }

    fn duration_for(&self, label: &str) -> Option<Duration> {
        self.ledger
            .durations
            .lock()
            .get(label)
            .copied()
            .unwrap_or(Some(DEFAULT_DURATION))
    }
}

fn label_of(media: &MediaHandle) -> String {
    match media {
        MediaHandle::File { path } => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        MediaHandle::Bytes { bytes, .. } => String::from_utf8_lossy(bytes).into_owned(),
        MediaHandle::Stream { url, .. } => url.clone(),
    }
}

impl AudioBackend for FakeBackend {
    fn open(&self, media: MediaHandle) -> Result<Box<dyn Session>, BackendError> {
        if self.ledger.fail_open.load(Ordering::SeqCst) {
            return Err(BackendError::Decode("fake decoder refused".into()));
        }
        let label = label_of(&media);
        let state = Arc::new(FakeState {
            duration: self.duration_for(&label),
            label,
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            position: Mutex::new(Duration::ZERO),
            volume: Mutex::new(1.0),
        });
        self.ledger.sessions.lock().push(Arc::clone(&state));
        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.peak.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state,
            ledger: Arc::clone(&self.ledger),
        }))
    }

    fn probe(&self, media: MediaHandle) -> Result<Option<Duration>, BackendError> {
        self.ledger.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.duration_for(&label_of(&media)))
    }
}

struct FakeSession {
    state: Arc<FakeState>,
    ledger: Arc<Ledger>,
}

impl Session for FakeSession {
    fn play(&mut self) -> Result<(), BackendError> {
        self.state.finished.store(false, Ordering::SeqCst);
        self.state.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
        *self.state.position.lock() = Duration::ZERO;
    }

    fn seek(&mut self, position: Duration) {
        self.state.finished.store(false, Ordering::SeqCst);
        *self.state.position.lock() = position;
    }

    fn set_volume(&mut self, volume: f32) {
        *self.state.volume.lock() = volume;
    }

    fn position(&self) -> Duration {
        *self.state.position.lock()
    }

    fn duration(&self) -> Option<Duration> {
        self.state.duration
    }

    fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    fn dispose(&mut self) {
        if !self.state.disposed.swap(true, Ordering::SeqCst) {
            self.state.playing.store(false, Ordering::SeqCst);
            self.ledger.live.fetch_sub(1, Ordering::SeqCst);
            self.ledger.released.lock().push(self.state.label.clone());
        }
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Memory-backed resolver whose assets contain their own names.
pub(crate) fn resolver_with(names: &[&str]) -> Arc<Resolver> {
    let assets = MemoryAssets::new();
    for name in names {
        assets.insert(*name, name.as_bytes().to_vec());
    }
    Arc::new(Resolver::new(Arc::new(assets), Arc::new(OfflineTransport)))
}

/// Poll `condition` until it holds or two seconds pass.
pub(crate) fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
