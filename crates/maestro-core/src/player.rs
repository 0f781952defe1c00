//! Single-track player — one backend session behind one state machine.
//!
//! ```text
//! Idle → Resolving → Ready → {Playing ⇄ Paused} → Stopped
//!   any state → Disposed (terminal)
//! ```
//!
//! State lives behind a mutex; every public operation runs against it
//! serially. Source resolution runs with the lock released and is guarded
//! by a generation counter: a newer `set_*` bumps the generation and the
//! stale resolution is discarded when it finally lands. The backend session
//! is only opened under the lock, after the generation check, so a player
//! never holds two live sessions.
//!
//! A playlist source is flattened into its leaves; only the current leaf
//! is ever resolved. Moving between leaves passes through `Resolving`, so
//! the playing stream reports a false/true pair for every re-arm.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::effects::{AudioBackend, Session};
use crate::error::PlayerError;
use crate::events::EventStream;
use crate::models::{AudioSource, LoopMode, PlaybackState};
use crate::resolver::{decode_failure, Resolver};

/// What one heartbeat tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not playing; nothing polled.
    Inactive,
    /// Still playing at this position.
    Progressed(Duration),
    /// Natural end under a looping policy; same entry restarted at zero.
    Restarted,
    /// Natural end; moved on to this nested entry.
    Advanced(usize),
    /// Natural end with nothing left to play; player is stopped.
    Finished,
    /// Natural end, but continuing failed. Logged; player is not playing.
    Failed,
}

pub struct AudioPlayer {
    label: String,
    resolver: Arc<Resolver>,
    backend: Arc<dyn AudioBackend>,
    inner: Mutex<Inner>,
    /// Disconnects on dispose, unblocking pending deferred-bytes waits.
    interrupt: Receiver<()>,
    playing: EventStream<bool>,
    completed: EventStream<()>,
    index: EventStream<Option<usize>>,
    position: EventStream<Duration>,
}

struct Inner {
    state: PlaybackState,
    entries: Vec<AudioSource>,
    /// Source was a playlist; `seek` honours an index.
    playlist: bool,
    index: Option<usize>,
    session: Option<Box<dyn Session>>,
    volume: f32,
    loop_mode: LoopMode,
    /// Silence between leaves on auto-advance.
    gap: Option<Duration>,
    generation: u64,
    dispose_signal: Option<Sender<()>>,
}

impl Inner {
    fn ensure_live(&self) -> Result<(), PlayerError> {
        if self.state == PlaybackState::Disposed {
            Err(PlayerError::UseAfterDispose)
        } else {
            Ok(())
        }
    }

    /// Drop the armed session. Returns whether it was playing.
    fn release_session(&mut self) -> bool {
        let was_playing = self.state == PlaybackState::Playing;
        if let Some(mut session) = self.session.take() {
            session.dispose();
        }
        was_playing
    }

    fn invalid(&self, operation: &'static str) -> PlayerError {
        PlayerError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl AudioPlayer {
    pub fn new(label: impl Into<String>, resolver: Arc<Resolver>, backend: Arc<dyn AudioBackend>) -> Self {
        let (signal, interrupt) = bounded(0);
        Self {
            label: label.into(),
            resolver,
            backend,
            inner: Mutex::new(Inner {
                state: PlaybackState::Idle,
                entries: Vec::new(),
                playlist: false,
                index: None,
                session: None,
                volume: 1.0,
                loop_mode: LoopMode::Off,
                gap: None,
                generation: 0,
                dispose_signal: Some(signal),
            }),
            interrupt,
            playing: EventStream::coalescing(false),
            completed: EventStream::new(),
            index: EventStream::coalescing(None),
            position: EventStream::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    pub fn set_asset(&self, path: &str) -> Result<Option<Duration>, PlayerError> {
        self.set_audio_source(AudioSource::asset(path))
    }

    pub fn set_filepath(&self, path: impl Into<PathBuf>) -> Result<Option<Duration>, PlayerError> {
        self.set_audio_source(AudioSource::file(path))
    }

    pub fn set_url(&self, url: &str) -> Result<Option<Duration>, PlayerError> {
        self.set_audio_source(AudioSource::url(url))
    }

    /// Tear down whatever is armed, resolve `source` and arm it.
    ///
    /// Returns the duration if the backend knows it. A newer `set_*` issued
    /// while this one is resolving makes this call return `Superseded`.
    pub fn set_audio_source(&self, source: AudioSource) -> Result<Option<Duration>, PlayerError> {
        let (generation, first) = {
            let mut inner = self.inner.lock();
            inner.ensure_live()?;
            if inner.release_session() {
                self.playing.emit(false);
            }
            inner.generation += 1;
            inner.playlist = source.is_playlist();
            inner.entries = source.leaves();
            inner.index = if inner.entries.is_empty() { None } else { Some(0) };
            self.index.emit(inner.index);

            match inner.entries.first().cloned() {
                Some(first) => {
                    inner.state = PlaybackState::Resolving;
                    (inner.generation, first)
                }
                None => {
                    inner.state = PlaybackState::Ready;
                    return Ok(None);
                }
            }
        };
        log::debug!("maestro: {} resolving {} source", self.label, first.kind());
        self.arm(generation, first, Duration::ZERO, false)
    }

    /// Release the session and forget the source. Back to `Idle`.
    pub fn unload(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        if inner.release_session() {
            self.playing.emit(false);
        }
        inner.generation += 1;
        inner.entries.clear();
        inner.playlist = false;
        inner.index = None;
        inner.state = PlaybackState::Idle;
        self.index.emit(None);
        Ok(())
    }

    /// Resolve `entry` outside the lock, then open it if still current.
    fn arm(
        &self,
        generation: u64,
        entry: AudioSource,
        start_at: Duration,
        autoplay: bool,
    ) -> Result<Option<Duration>, PlayerError> {
        let resolved = self.resolver.resolve_interruptible(&entry, &self.interrupt);

        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        if inner.generation != generation {
            log::debug!(
                "maestro: {} discarded superseded {} resolution",
                self.label,
                entry.kind()
            );
            return Err(PlayerError::Superseded);
        }
        let Some(resolved) = resolved else {
            return Err(PlayerError::UseAfterDispose);
        };

        let opened = resolved.and_then(|media| {
            self.backend
                .open(media)
                .map_err(|e| decode_failure(entry.kind(), e))
        });
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                log::warn!("maestro: {} could not arm source: {}", self.label, e);
                inner.state = PlaybackState::Idle;
                self.playing.emit(false);
                return Err(e.into());
            }
        };

        session.set_volume(inner.volume);
        let duration = session.duration();
        if !start_at.is_zero() {
            session.seek(clamp_position(start_at, duration));
        }
        inner.session = Some(session);
        inner.state = PlaybackState::Ready;

        if autoplay {
            self.start_locked(&mut inner)?;
        }
        Ok(duration)
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    pub fn play(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        match inner.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Ready | PlaybackState::Paused | PlaybackState::Stopped => {
                if inner.session.is_none() {
                    // Empty playlist: nothing to play.
                    return Ok(());
                }
                self.start_locked(&mut inner)
            }
            _ => Err(inner.invalid("play")),
        }
    }

    fn start_locked(&self, inner: &mut Inner) -> Result<(), PlayerError> {
        if let Some(session) = inner.session.as_mut() {
            session.play()?;
            inner.state = PlaybackState::Playing;
            self.playing.emit(true);
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        match inner.state {
            PlaybackState::Playing => {
                if let Some(session) = inner.session.as_mut() {
                    session.pause();
                }
                inner.state = PlaybackState::Paused;
                self.playing.emit(false);
                Ok(())
            }
            PlaybackState::Paused => Ok(()),
            _ => Err(inner.invalid("pause")),
        }
    }

    /// Halt and rewind. The backend session stays armed.
    pub fn stop(&self) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        match inner.state {
            PlaybackState::Idle => Err(inner.invalid("stop")),
            PlaybackState::Resolving => Ok(()),
            _ => {
                let was_playing = inner.state == PlaybackState::Playing;
                if let Some(session) = inner.session.as_mut() {
                    session.stop();
                }
                inner.state = PlaybackState::Stopped;
                if was_playing {
                    self.playing.emit(false);
                }
                Ok(())
            }
        }
    }

    /// Seek within the current entry, or to `index` when the source is a
    /// playlist. A single source ignores `index`.
    pub fn seek(&self, position: Duration, index: Option<usize>) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        if matches!(inner.state, PlaybackState::Idle | PlaybackState::Resolving) {
            return Err(inner.invalid("seek"));
        }

        let target = index.filter(|&i| inner.playlist && Some(i) != inner.index);
        let Some(target) = target else {
            self.seek_locked(&mut inner, position);
            return Ok(());
        };

        let len = inner.entries.len();
        if target >= len {
            return Err(PlayerError::IndexOutOfRange { index: target, len });
        }
        let was_playing = inner.release_session();
        if was_playing {
            self.playing.emit(false);
        }
        inner.generation += 1;
        let generation = inner.generation;
        inner.index = Some(target);
        self.index.emit(inner.index);
        inner.state = PlaybackState::Resolving;
        let entry = inner.entries[target].clone();
        drop(inner);

        self.arm(generation, entry, position, was_playing).map(|_| ())
    }

    /// Relative seek. Negative deltas saturate at zero.
    pub fn seek_by(&self, delta_ms: i64) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        if matches!(inner.state, PlaybackState::Idle | PlaybackState::Resolving) {
            return Err(inner.invalid("seek_by"));
        }
        let current = inner
            .session
            .as_ref()
            .map(|s| s.position())
            .unwrap_or_default();
        self.seek_locked(&mut inner, offset(current, delta_ms));
        Ok(())
    }

    fn seek_locked(&self, inner: &mut Inner, position: Duration) {
        if let Some(session) = inner.session.as_mut() {
            let target = clamp_position(position, session.duration());
            session.seek(target);
            self.position.emit(target);
        }
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        let volume = clamp_volume(volume);
        inner.volume = volume;
        if let Some(session) = inner.session.as_mut() {
            session.set_volume(volume);
        }
        Ok(())
    }

    /// Applies from the next natural end-of-track.
    pub fn set_loop_mode(&self, mode: LoopMode) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.ensure_live()?;
        inner.loop_mode = mode;
        Ok(())
    }

    /// Pause inserted before the next leaf when a playlist auto-advances.
    pub(crate) fn set_transition_gap(&self, gap: Option<Duration>) {
        self.inner.lock().gap = gap;
    }

    /// Release the session and refuse further use. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PlaybackState::Disposed {
            return;
        }
        let was_playing = inner.release_session();
        inner.state = PlaybackState::Disposed;
        inner.generation += 1;
        inner.entries.clear();
        inner.index = None;
        inner.dispose_signal.take();
        if was_playing {
            self.playing.emit(false);
        }
        log::debug!("maestro: {} disposed", self.label);
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Poll the session: emit position, and on natural end apply the loop mode.
    pub fn tick(&self) -> TickOutcome {
        let mut inner = self.inner.lock();
        if inner.state != PlaybackState::Playing {
            return TickOutcome::Inactive;
        }
        let (finished, position) = match inner.session.as_ref() {
            Some(session) => (session.is_finished(), session.position()),
            None => return TickOutcome::Inactive,
        };
        if !finished {
            self.position.emit(position);
            return TickOutcome::Progressed(position);
        }

        self.completed.emit(());
        let len = inner.entries.len().max(1);
        let current = inner.index.unwrap_or(0);
        let next = match inner.loop_mode {
            LoopMode::One => Some(current),
            LoopMode::All => Some((current + 1) % len),
            LoopMode::Off => (current + 1 < len).then_some(current + 1),
        };

        match next {
            Some(next) if next == current => self.restart_locked(&mut inner),
            Some(next) => {
                inner.release_session();
                self.playing.emit(false);
                inner.generation += 1;
                let generation = inner.generation;
                inner.index = Some(next);
                self.index.emit(inner.index);
                inner.state = PlaybackState::Resolving;
                let entry = inner.entries[next].clone();
                let gap = inner.gap;
                drop(inner);

                if let Some(gap) = gap {
                    thread::sleep(gap);
                }

                match self.arm(generation, entry, Duration::ZERO, true) {
                    Ok(_) => TickOutcome::Advanced(next),
                    Err(PlayerError::Superseded) | Err(PlayerError::UseAfterDispose) => {
                        TickOutcome::Inactive
                    }
                    Err(e) => {
                        log::warn!("maestro: {} auto-advance failed: {}", self.label, e);
                        TickOutcome::Failed
                    }
                }
            }
            None => {
                if let Some(session) = inner.session.as_mut() {
                    session.stop();
                }
                inner.state = PlaybackState::Stopped;
                self.playing.emit(false);
                TickOutcome::Finished
            }
        }
    }

    fn restart_locked(&self, inner: &mut Inner) -> TickOutcome {
        let Some(session) = inner.session.as_mut() else {
            return TickOutcome::Inactive;
        };
        session.seek(Duration::ZERO);
        match session.play() {
            Ok(()) => {
                self.position.emit(Duration::ZERO);
                TickOutcome::Restarted
            }
            Err(e) => {
                log::warn!("maestro: {} restart failed: {}", self.label, e);
                session.stop();
                inner.state = PlaybackState::Stopped;
                self.playing.emit(false);
                TickOutcome::Failed
            }
        }
    }

    /// Duration of `source` without arming it. Sums playlist leaves;
    /// None if any leaf's duration is unknown.
    pub(crate) fn probe(&self, source: &AudioSource) -> Result<Option<Duration>, PlayerError> {
        let leaves = source.leaves();
        if leaves.is_empty() {
            return Ok(None);
        }
        let mut total = Duration::ZERO;
        for leaf in leaves {
            let Some(resolved) = self.resolver.resolve_interruptible(&leaf, &self.interrupt) else {
                return Err(PlayerError::UseAfterDispose);
            };
            match self.backend.probe(resolved?) {
                Ok(Some(d)) => total += d,
                Ok(None) => return Ok(None),
                Err(e) => return Err(decode_failure(leaf.kind(), e).into()),
            }
        }
        Ok(Some(total))
    }

    // -----------------------------------------------------------------------
    // Accessors & streams
    // -----------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    /// Defined only while Ready, Playing or Paused.
    pub fn position(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if !inner.state.has_position() {
            return None;
        }
        inner.session.as_ref().map(|s| s.position())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.inner.lock().session.as_ref().and_then(|s| s.duration())
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.inner.lock().loop_mode
    }

    /// Nested entry for playlist sources.
    pub fn current_index(&self) -> Option<usize> {
        self.inner.lock().index
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn playing_stream(&self) -> Receiver<bool> {
        self.playing.subscribe()
    }

    pub fn completed_stream(&self) -> Receiver<()> {
        self.completed.subscribe()
    }

    pub fn current_index_stream(&self) -> Receiver<Option<usize>> {
        self.index.subscribe()
    }

    pub fn position_stream(&self) -> Receiver<Duration> {
        self.position.subscribe()
    }
}

fn clamp_position(position: Duration, duration: Option<Duration>) -> Duration {
    match duration {
        Some(duration) => position.min(duration),
        None => position,
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

fn offset(current: Duration, delta_ms: i64) -> Duration {
    let delta = Duration::from_millis(delta_ms.unsigned_abs());
    if delta_ms >= 0 {
        current.saturating_add(delta)
    } else {
        current.saturating_sub(delta)
    }
}
