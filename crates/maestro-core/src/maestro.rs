//! Maestro — owns the music, voice and effects players.
//!
//! `resume` / `pause` fan out to music and voice on scoped threads; every
//! target is attempted and any failure comes back as one aggregate report.
//! Effects are fire-and-forget and never paused.
//!
//! `start()` spawns the heartbeat that drives position, end-of-track and
//! loop policy for the two long-running players and reaps finished effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::MaestroConfig;
use crate::effects::AudioBackend;
use crate::error::{FanOutReport, MaestroError, PlayerError, Role};
use crate::models::PlaybackState;
use crate::music::MusicPlayer;
use crate::player::AudioPlayer;
use crate::resolver::Resolver;
use crate::vfx::VfxPlayer;

pub struct Maestro {
    music: Arc<MusicPlayer>,
    voice: Arc<AudioPlayer>,
    vfx: Arc<VfxPlayer>,
    config: MaestroConfig,
    disposed: AtomicBool,
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Maestro {
    /// cpal + symphonia output.
    #[cfg(feature = "native")]
    pub fn native(config: MaestroConfig) -> Self {
        Self::new(config, Arc::new(crate::effects::audio::NativeBackend::new()))
    }

    /// Assets resolve against `config.asset_root`.
    pub fn new(config: MaestroConfig, backend: Arc<dyn AudioBackend>) -> Self {
        let resolver = Arc::new(Resolver::with_asset_root(config.asset_root.clone()));
        Self::with_resolver(config, resolver, backend)
    }

    pub fn with_resolver(
        config: MaestroConfig,
        resolver: Arc<Resolver>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        let music = MusicPlayer::with_transition(
            Arc::clone(&resolver),
            Arc::clone(&backend),
            config.transition,
        );
        log_err(music.set_volume(config.music_volume), "init music volume");
        log_err(music.set_loop_mode(config.music_loop_mode), "init music loop mode");

        let voice = AudioPlayer::new("voice", Arc::clone(&resolver), Arc::clone(&backend));
        log_err(voice.set_volume(config.voice_volume), "init voice volume");
        log_err(voice.set_loop_mode(config.voice_loop_mode), "init voice loop mode");

        let vfx = VfxPlayer::new(resolver, backend, config.vfx_volume);

        Self {
            music: Arc::new(music),
            voice: Arc::new(voice),
            vfx: Arc::new(vfx),
            config,
            disposed: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn music(&self) -> &MusicPlayer {
        &self.music
    }

    pub fn voice(&self) -> &AudioPlayer {
        &self.voice
    }

    pub fn vfx(&self) -> &VfxPlayer {
        &self.vfx
    }

    pub fn config(&self) -> &MaestroConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Resume whatever is paused. Players with nothing paused succeed trivially.
    pub fn resume(&self) -> Result<(), MaestroError> {
        self.fan_out(
            "resume",
            |music| match music.state() {
                PlaybackState::Paused | PlaybackState::Disposed => music.play(),
                _ => Ok(()),
            },
            |voice| match voice.state() {
                PlaybackState::Paused | PlaybackState::Disposed => voice.play(),
                _ => Ok(()),
            },
        )
    }

    /// Pause whatever is playing. Players not playing succeed trivially.
    pub fn pause(&self) -> Result<(), MaestroError> {
        self.fan_out(
            "pause",
            |music| match music.state() {
                PlaybackState::Playing | PlaybackState::Disposed => music.pause(),
                _ => Ok(()),
            },
            |voice| match voice.state() {
                PlaybackState::Playing | PlaybackState::Disposed => voice.pause(),
                _ => Ok(()),
            },
        )
    }

    fn fan_out<M, V>(&self, operation: &'static str, on_music: M, on_voice: V) -> Result<(), MaestroError>
    where
        M: FnOnce(&MusicPlayer) -> Result<(), PlayerError> + Send,
        V: FnOnce(&AudioPlayer) -> Result<(), PlayerError> + Send,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MaestroError::UseAfterDispose);
        }

        let music: &MusicPlayer = &self.music;
        let voice: &AudioPlayer = &self.voice;
        let (music_outcome, voice_outcome) = thread::scope(|scope| {
            let music_task = scope.spawn(move || on_music(music));
            let voice_task = scope.spawn(move || on_voice(voice));
            (joined(music_task.join()), joined(voice_task.join()))
        });

        let report = FanOutReport {
            operation,
            outcomes: vec![(Role::Music, music_outcome), (Role::Voice, voice_outcome)],
        };
        if report.is_success() {
            Ok(())
        } else {
            log::warn!("maestro: {}", report);
            Err(MaestroError::AggregateFailure(report))
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Spawn the heartbeat. Idempotent.
    pub fn start(&self) -> Result<(), MaestroError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MaestroError::UseAfterDispose);
        }
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Ok(());
        }
        handles.push(self.start_heartbeat());
        Ok(())
    }

    /// One heartbeat step, for callers that drive their own clock.
    pub fn tick(&self) {
        heartbeat_step(&self.music, &self.voice, &self.vfx);
    }

    fn start_heartbeat(&self) -> JoinHandle<()> {
        let music = Arc::clone(&self.music);
        let voice = Arc::clone(&self.voice);
        let vfx = Arc::clone(&self.vfx);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.config.tick_interval();

        thread::spawn(move || {
            log::debug!("maestro: heartbeat every {:?}", interval);
            while !shutdown.load(Ordering::SeqCst) {
                thread::sleep(interval);

                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                heartbeat_step(&music, &voice, &vfx);
            }
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Dispose music, voice and vfx in that order, then join the heartbeat.
    ///
    /// Players go first so a heartbeat blocked on a pending resolution is
    /// released before the join.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);

        self.music.dispose();
        self.voice.dispose();
        self.vfx.dispose();

        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        log::debug!("maestro: disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for Maestro {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn heartbeat_step(music: &MusicPlayer, voice: &AudioPlayer, vfx: &VfxPlayer) {
    music.tick();
    voice.tick();
    vfx.reap();
}

fn joined(result: thread::Result<Result<(), PlayerError>>) -> Result<(), PlayerError> {
    result.unwrap_or_else(|_| Err(PlayerError::Backend("fan-out task panicked".into())))
}

/// Log a failed result and move on.
fn log_err<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("maestro: {} failed: {}", context, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitionPolicy;
    use crate::models::LoopMode;
    use crate::testing::{resolver_with, wait_for, FakeBackend};

    fn maestro(names: &[&str]) -> (Maestro, FakeBackend) {
        let backend = FakeBackend::new();
        let maestro = Maestro::with_resolver(
            MaestroConfig::default(),
            resolver_with(names),
            Arc::new(backend.clone()),
        );
        (maestro, backend)
    }

    #[test]
    fn config_is_applied_to_players() {
        let config = MaestroConfig {
            music_volume: 0.3,
            voice_loop_mode: LoopMode::One,
            vfx_volume: 0.2,
            transition: TransitionPolicy::Gap { millis: 1 },
            ..MaestroConfig::default()
        };
        let maestro = Maestro::with_resolver(config, resolver_with(&[]), Arc::new(FakeBackend::new()));
        assert_eq!(maestro.music().volume(), 0.3);
        assert_eq!(maestro.music().loop_mode(), LoopMode::All);
        assert_eq!(maestro.voice().loop_mode(), LoopMode::One);
        assert_eq!(maestro.vfx().volume(), 0.2);
    }

    #[test]
    fn pause_and_resume_fan_out_to_music_and_voice() {
        let (maestro, _backend) = maestro(&["theme", "line", "hit"]);
        maestro.music().push_asset("theme").unwrap();
        maestro.music().play().unwrap();
        maestro.voice().set_asset("line").unwrap();
        maestro.voice().play().unwrap();
        maestro.vfx().play_asset("hit").unwrap();

        maestro.pause().unwrap();
        assert_eq!(maestro.music().state(), PlaybackState::Paused);
        assert_eq!(maestro.voice().state(), PlaybackState::Paused);
        assert_eq!(maestro.vfx().active_sessions(), 1);

        maestro.resume().unwrap();
        assert_eq!(maestro.music().state(), PlaybackState::Playing);
        assert_eq!(maestro.voice().state(), PlaybackState::Playing);
    }

    #[test]
    fn idle_players_do_not_fail_fan_out() {
        let (maestro, _backend) = maestro(&[]);
        maestro.pause().unwrap();
        maestro.resume().unwrap();
    }

    #[test]
    fn voice_failure_does_not_short_circuit_music() {
        let (maestro, _backend) = maestro(&["theme"]);
        maestro.music().push_asset("theme").unwrap();
        maestro.music().play().unwrap();
        maestro.music().pause().unwrap();
        maestro.voice().dispose();

        let err = maestro.resume().unwrap_err();
        let MaestroError::AggregateFailure(report) = err else {
            panic!("expected aggregate failure");
        };
        assert_eq!(report.operation, "resume");
        assert!(report.succeeded(Role::Music));
        assert_eq!(report.outcome(Role::Voice), Some(&Err(PlayerError::UseAfterDispose)));
        assert_eq!(maestro.music().state(), PlaybackState::Playing);
    }

    #[test]
    fn both_failures_are_reported() {
        let (maestro, _backend) = maestro(&[]);
        maestro.music().dispose();
        maestro.voice().dispose();
        let MaestroError::AggregateFailure(report) = maestro.pause().unwrap_err() else {
            panic!("expected aggregate failure");
        };
        assert_eq!(report.failures().count(), 2);
    }

    #[test]
    fn dispose_is_ordered_idempotent_and_final() {
        let (maestro, backend) = maestro(&["theme", "line", "hit"]);
        maestro.music().push_asset("theme").unwrap();
        maestro.voice().set_asset("line").unwrap();
        maestro.vfx().play_asset("hit").unwrap();
        maestro.start().unwrap();

        maestro.dispose();
        maestro.dispose();
        assert!(maestro.is_disposed());
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.released(), vec!["theme", "line", "hit"]);
        assert_eq!(maestro.music().state(), PlaybackState::Disposed);
        assert_eq!(maestro.voice().state(), PlaybackState::Disposed);
        assert_eq!(maestro.resume(), Err(MaestroError::UseAfterDispose));
        assert_eq!(maestro.pause(), Err(MaestroError::UseAfterDispose));
        assert_eq!(maestro.start(), Err(MaestroError::UseAfterDispose));
    }

    #[test]
    fn heartbeat_advances_music_stack() {
        let backend = FakeBackend::new();
        let config = MaestroConfig {
            tick_interval_ms: 5,
            ..MaestroConfig::default()
        };
        let maestro = Maestro::with_resolver(config, resolver_with(&["a", "b"]), Arc::new(backend.clone()));
        maestro.music().push_asset("a").unwrap();
        maestro.music().push_asset("b").unwrap();
        maestro.music().play().unwrap();
        maestro.start().unwrap();
        maestro.start().unwrap();

        backend.finish_current();
        assert!(wait_for(|| maestro.music().current_index() == Some(1)));
        assert_eq!(backend.current_label().as_deref(), Some("b"));
        drop(maestro);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn manual_tick_reaps_vfx() {
        let (maestro, backend) = maestro(&["hit"]);
        maestro.vfx().play_asset("hit").unwrap();
        backend.finish_current();
        maestro.tick();
        assert_eq!(maestro.vfx().active_sessions(), 0);
    }
}
