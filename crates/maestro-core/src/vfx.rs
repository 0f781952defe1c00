//! Effects player — fire-and-forget one-shots.
//!
//! Each play opens its own session. Sessions are not individually
//! controllable; finished ones are reaped before every new play and on the
//! coordinator heartbeat.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::effects::{AudioBackend, Session};
use crate::error::PlayerError;
use crate::models::AudioSource;
use crate::resolver::{decode_failure, Resolver};

pub struct VfxPlayer {
    resolver: Arc<Resolver>,
    backend: Arc<dyn AudioBackend>,
    volume: f32,
    sessions: Mutex<Option<Vec<Box<dyn Session>>>>,
    dispose_signal: Mutex<Option<Sender<()>>>,
    interrupt: Receiver<()>,
}

impl VfxPlayer {
    pub fn new(resolver: Arc<Resolver>, backend: Arc<dyn AudioBackend>, volume: f32) -> Self {
        let (signal, interrupt) = bounded(0);
        Self {
            resolver,
            backend,
            volume: if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) },
            sessions: Mutex::new(Some(Vec::new())),
            dispose_signal: Mutex::new(Some(signal)),
            interrupt,
        }
    }

    pub fn play_asset(&self, path: &str) -> Result<(), PlayerError> {
        self.play_audio_source(AudioSource::asset(path))
    }

    /// Resolve and start `source`. Playlists play their first leaf.
    pub fn play_audio_source(&self, source: AudioSource) -> Result<(), PlayerError> {
        if self.reap().is_none() {
            return Err(PlayerError::UseAfterDispose);
        }

        let Some(resolved) = self.resolver.resolve_interruptible(&source, &self.interrupt) else {
            return Err(PlayerError::UseAfterDispose);
        };
        let media = resolved?;

        let mut sessions = self.sessions.lock();
        let Some(live) = sessions.as_mut() else {
            return Err(PlayerError::UseAfterDispose);
        };
        let mut session = self
            .backend
            .open(media)
            .map_err(|e| decode_failure(source.kind(), e))?;
        session.set_volume(self.volume);
        session.play()?;
        live.push(session);
        log::debug!("maestro: vfx started {} source ({} live)", source.kind(), live.len());
        Ok(())
    }

    /// Dispose finished sessions. `None` once disposed, else the live count.
    pub fn reap(&self) -> Option<usize> {
        let mut sessions = self.sessions.lock();
        let live = sessions.as_mut()?;
        live.retain_mut(|session| {
            if session.is_finished() {
                session.dispose();
                false
            } else {
                true
            }
        });
        Some(live.len())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Release every in-flight session. Idempotent.
    pub fn dispose(&self) {
        self.dispose_signal.lock().take();
        if let Some(sessions) = self.sessions.lock().take() {
            let count = sessions.len();
            for mut session in sessions {
                session.dispose();
            }
            log::debug!("maestro: vfx disposed {} sessions", count);
        }
    }
}
