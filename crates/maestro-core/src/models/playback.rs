//! Loop mode and playback state.
//!
//! LoopMode is a string enum so it can live in JSON config.
//! PlaybackState is derived by the players, never set by callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What happens when the active track reaches its natural end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    One,
    All,
}

/// Player lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Resolving,
    Ready,
    Playing,
    Paused,
    Stopped,
    Disposed,
}

impl PlaybackState {
    /// States in which a backend session may be armed and a position is defined.
    pub fn has_position(self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}
