//! Maestro data models.
//!
//! Only what the players dispatch on: the closed set of audio sources,
//! the loop mode, and the derived playback state.

pub mod playback;
pub mod source;

pub use playback::{LoopMode, PlaybackState};
pub use source::{AudioSource, BytesCompleter, FutureBytes, SourceKind};
