//! maestro-core — audio playback orchestration.
//!
//! Players own state machines; backends own audio.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: Sources   (AudioSource, Resolver, asset bundles, transports)
//! Layer 1: Effects   (AudioBackend / Session: symphonia + cpal, or a fake)
//! Layer 2: Players   (AudioPlayer, MusicPlayer, VfxPlayer)
//! Layer 3: Maestro   (fan-out pause/resume, heartbeat, ordered dispose)
//! ```

pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod maestro;
pub mod models;
pub mod music;
pub mod player;
pub mod resolver;
pub mod vfx;

#[cfg(test)]
mod testing;

pub use config::{MaestroConfig, TransitionPolicy};
pub use effects::{AudioBackend, MediaHandle, NoopBackend, Session};
pub use error::{
    BackendError, ConfigError, FanOutReport, MaestroError, PlayerError, ResolutionErrorKind, Role,
    SourceResolutionError,
};
pub use maestro::Maestro;
pub use models::*;
pub use music::MusicPlayer;
pub use player::{AudioPlayer, TickOutcome};
pub use resolver::Resolver;
pub use vfx::VfxPlayer;
