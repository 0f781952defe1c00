//! Music stack player.
//!
//! An ordered stack of sources over one [`AudioPlayer`] slot. Only the entry
//! at the current index is ever armed; the others wait for push-to-empty,
//! replace, pop or auto-advance to reach them. The stack lock is held for
//! the whole of each stack operation, so later calls queue behind earlier
//! ones, including across a pending resolution.
//!
//! Loop policy is split between the two layers: `One` is handed to the
//! slot, which restarts in place; `Off` and `All` are applied here once the
//! slot reports it has nothing left to play.
//!
//! A `Gap` transition applies to every move between entries that keeps
//! sound going: replace, pop and seek while playing, and auto-advance at
//! both levels (stack entries here, nested playlist leaves in the slot).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::config::TransitionPolicy;
use crate::effects::AudioBackend;
use crate::error::PlayerError;
use crate::events::EventStream;
use crate::models::{AudioSource, LoopMode, PlaybackState};
use crate::player::{AudioPlayer, TickOutcome};
use crate::resolver::Resolver;

pub struct MusicPlayer {
    slot: AudioPlayer,
    stack: Mutex<Stack>,
    disposed: AtomicBool,
    index: EventStream<Option<usize>>,
    transition: TransitionPolicy,
}

#[derive(Default)]
struct Stack {
    entries: Vec<StackEntry>,
    index: Option<usize>,
    loop_mode: LoopMode,
}

struct StackEntry {
    source: AudioSource,
    /// Cached once known.
    duration: Option<Duration>,
}

impl MusicPlayer {
    pub fn new(resolver: Arc<Resolver>, backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_transition(resolver, backend, TransitionPolicy::HardCut)
    }

    pub fn with_transition(
        resolver: Arc<Resolver>,
        backend: Arc<dyn AudioBackend>,
        transition: TransitionPolicy,
    ) -> Self {
        let slot = AudioPlayer::new("music", resolver, backend);
        slot.set_transition_gap(transition.gap());
        Self {
            slot,
            stack: Mutex::new(Stack::default()),
            disposed: AtomicBool::new(false),
            index: EventStream::coalescing(None),
            transition,
        }
    }

    fn ensure_live(&self) -> Result<(), PlayerError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(PlayerError::UseAfterDispose)
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Stack
    // -----------------------------------------------------------------------

    pub fn push_asset(&self, path: &str) -> Result<Option<Duration>, PlayerError> {
        self.push_audio_source(AudioSource::asset(path))
    }

    /// Append `source`. Arms it only if the stack was empty; otherwise it
    /// is queued and nothing is resolved.
    pub fn push_audio_source(&self, source: AudioSource) -> Result<Option<Duration>, PlayerError> {
        self.ensure_live()?;
        let mut stack = self.stack.lock();
        stack.entries.push(StackEntry {
            source,
            duration: None,
        });
        log::debug!("maestro: music pushed entry {}", stack.entries.len() - 1);
        if stack.entries.len() > 1 {
            return Ok(None);
        }
        self.arm_entry(&mut stack, 0, false)
    }

    pub fn replace_asset(&self, path: &str) -> Result<Option<Duration>, PlayerError> {
        self.replace_audio_source(AudioSource::asset(path))
    }

    /// Swap the entry at the current index, preserving play state.
    /// On an empty stack this is a push.
    pub fn replace_audio_source(&self, source: AudioSource) -> Result<Option<Duration>, PlayerError> {
        self.ensure_live()?;
        let mut stack = self.stack.lock();
        let Some(index) = stack.index else {
            drop(stack);
            return self.push_audio_source(source);
        };
        let was_playing = self.slot.state() == PlaybackState::Playing;
        stack.entries[index] = StackEntry {
            source,
            duration: None,
        };
        self.arm_entry(&mut stack, index, was_playing)
    }

    /// Remove the most recent entry. Popping an empty stack is a no-op.
    pub fn pop(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let mut stack = self.stack.lock();
        if stack.entries.pop().is_none() {
            return Ok(());
        }
        let len = stack.entries.len();
        if stack.index != Some(len) {
            return Ok(());
        }

        if len == 0 {
            stack.index = None;
            self.index.emit(None);
            return self.slot.unload();
        }
        let was_playing = self.slot.state() == PlaybackState::Playing;
        self.arm_entry(&mut stack, len - 1, was_playing).map(|_| ())
    }

    /// Duration of the entry at `index`. With exactly one entry the
    /// index is ignored and the slot's duration is reported.
    pub fn get_track_duration(&self, index: usize) -> Result<Option<Duration>, PlayerError> {
        self.ensure_live()?;
        let mut stack = self.stack.lock();
        let len = stack.entries.len();
        if len == 1 {
            return Ok(self.slot.duration());
        }
        if index >= len {
            return Err(PlayerError::IndexOutOfRange { index, len });
        }
        if stack.index == Some(index) {
            if let Some(duration) = self.slot.duration() {
                return Ok(Some(duration));
            }
        }
        if let Some(duration) = stack.entries[index].duration {
            return Ok(Some(duration));
        }
        let probed = self.slot.probe(&stack.entries[index].source)?;
        stack.entries[index].duration = probed;
        Ok(probed)
    }

    /// Seek the active entry back to zero. Play state and stack untouched.
    pub fn restart(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let stack = self.stack.lock();
        if stack.index.is_none() {
            return Ok(());
        }
        self.slot.seek(Duration::ZERO, None).map_err(|e| match e {
            PlayerError::InvalidState { state, .. } => PlayerError::InvalidState {
                operation: "restart",
                state,
            },
            other => other,
        })
    }

    /// Point the stack at `index` and arm its entry in the slot.
    ///
    /// The gap runs when the outgoing entry is audible or when playback
    /// continues into the new one (auto-advance after a natural end).
    fn arm_entry(
        &self,
        stack: &mut Stack,
        index: usize,
        autoplay: bool,
    ) -> Result<Option<Duration>, PlayerError> {
        if let Some(gap) = self.transition.gap() {
            let audible = self.slot.state() == PlaybackState::Playing;
            if audible {
                self.slot.pause()?;
            }
            if audible || autoplay {
                thread::sleep(gap);
            }
        }

        stack.index = Some(index);
        self.index.emit(stack.index);
        let source = stack.entries[index].source.clone();
        let duration = self.slot.set_audio_source(source)?;
        if duration.is_some() {
            stack.entries[index].duration = duration;
        }
        if autoplay {
            self.slot.play()?;
        }
        Ok(duration)
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Poll the slot and apply stack-level loop policy at natural end.
    /// Skips the tick while a stack operation is in flight.
    pub fn tick(&self) -> TickOutcome {
        let Some(mut stack) = self.stack.try_lock() else {
            return TickOutcome::Inactive;
        };
        match self.slot.tick() {
            TickOutcome::Finished => self.advance(&mut stack),
            other => other,
        }
    }

    fn advance(&self, stack: &mut Stack) -> TickOutcome {
        let Some(current) = stack.index else {
            return TickOutcome::Finished;
        };
        let len = stack.entries.len();
        let next = match stack.loop_mode {
            LoopMode::All => Some((current + 1) % len),
            LoopMode::Off => (current + 1 < len).then_some(current + 1),
            // The slot restarts `One` itself and never reports Finished.
            LoopMode::One => None,
        };

        let result = match next {
            None => return TickOutcome::Finished,
            Some(next) if next == current => self
                .slot
                .seek(Duration::ZERO, Some(0))
                .and_then(|_| self.slot.play())
                .map(|_| TickOutcome::Restarted),
            Some(next) => self
                .arm_entry(stack, next, true)
                .map(|_| TickOutcome::Advanced(next)),
        };
        result.unwrap_or_else(|e| {
            log::warn!("maestro: music auto-advance failed: {}", e);
            TickOutcome::Failed
        })
    }

    // -----------------------------------------------------------------------
    // Delegated transport
    // -----------------------------------------------------------------------

    pub fn play(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        self.slot.play()
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        self.slot.pause()
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        self.slot.stop()
    }

    /// Seek within the active entry. `index` picks a nested leaf when the
    /// active entry is a playlist, otherwise a stack entry; moving to
    /// another stack entry keeps the play state.
    pub fn seek(&self, position: Duration, index: Option<usize>) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let mut stack = self.stack.lock();
        let (Some(current), Some(target)) = (stack.index, index) else {
            return self.slot.seek(position, index);
        };
        if stack.entries[current].source.is_playlist() {
            return self.slot.seek(position, index);
        }

        let len = stack.entries.len();
        if target >= len {
            return Err(PlayerError::IndexOutOfRange { index: target, len });
        }
        if target != current {
            let was_playing = self.slot.state() == PlaybackState::Playing;
            self.arm_entry(&mut stack, target, was_playing)?;
        }
        self.slot.seek(position, None)
    }

    pub fn seek_by(&self, delta_ms: i64) -> Result<(), PlayerError> {
        self.ensure_live()?;
        self.slot.seek_by(delta_ms)
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        self.ensure_live()?;
        self.slot.set_volume(volume)
    }

    pub fn set_loop_mode(&self, mode: LoopMode) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let mut stack = self.stack.lock();
        stack.loop_mode = mode;
        let slot_mode = if mode == LoopMode::One {
            LoopMode::One
        } else {
            LoopMode::Off
        };
        self.slot.set_loop_mode(slot_mode)
    }

    /// Dispose the slot first so a pending resolution holding the stack
    /// lock is interrupted.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.slot.dispose();
        let mut stack = self.stack.lock();
        stack.entries.clear();
        stack.index = None;
        self.index.emit(None);
    }

    // -----------------------------------------------------------------------
    // Accessors & streams
    // -----------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.slot.state()
    }

    pub fn position(&self) -> Option<Duration> {
        self.slot.position()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.slot.duration()
    }

    pub fn volume(&self) -> f32 {
        self.slot.volume()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.stack.lock().loop_mode
    }

    /// Stack index of the active entry.
    pub fn current_index(&self) -> Option<usize> {
        self.stack.lock().index
    }

    pub fn len(&self) -> usize {
        self.stack.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_index_stream(&self) -> Receiver<Option<usize>> {
        self.index.subscribe()
    }

    pub fn playing_stream(&self) -> Receiver<bool> {
        self.slot.playing_stream()
    }

    pub fn completed_stream(&self) -> Receiver<()> {
        self.slot.completed_stream()
    }

    pub fn position_stream(&self) -> Receiver<Duration> {
        self.slot.position_stream()
    }
}
