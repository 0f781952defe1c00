//! Backend seam — everything that touches real audio.
//!
//! Players only see [`AudioBackend`] and [`Session`]. The native engine
//! (symphonia + cpal), the HTTP transport and the asset bundle live here
//! as reference collaborators.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lofty::prelude::*;
use lofty::probe::Probe;
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};

use crate::error::BackendError;

pub mod assets;
#[cfg(feature = "native")]
pub mod audio;
#[cfg(feature = "http")]
pub mod http;

/// A resolved source, ready to hand to a backend.
pub enum MediaHandle {
    File {
        path: PathBuf,
    },
    Bytes {
        bytes: Arc<[u8]>,
        hint: Option<String>,
    },
    /// Non-seekable byte stream; duration is only known lazily, if at all.
    Stream {
        url: String,
        reader: Box<dyn Read + Send + Sync>,
        hint: Option<String>,
    },
}

impl MediaHandle {
    /// Container/extension hint for the decoder probe.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::File { path } => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase()),
            Self::Bytes { hint, .. } | Self::Stream { hint, .. } => hint.clone(),
        }
    }

    /// Wrap the handle for symphonia. Streams become a `ReadOnlySource`.
    pub fn into_media_source_stream(self) -> Result<MediaSourceStream, BackendError> {
        let source: Box<dyn MediaSource> = match self {
            Self::File { path } => Box::new(std::fs::File::open(path)?),
            Self::Bytes { bytes, .. } => Box::new(Cursor::new(bytes)),
            Self::Stream { reader, .. } => Box::new(ReadOnlySource::new(reader)),
        };
        Ok(MediaSourceStream::new(source, Default::default()))
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => write!(f, "File({})", path.display()),
            Self::Bytes { bytes, hint } => write!(f, "Bytes({} bytes, {:?})", bytes.len(), hint),
            Self::Stream { url, hint, .. } => write!(f, "Stream({}, {:?})", url, hint),
        }
    }
}

/// Backend audio engine.
///
/// All methods take `&self` — backends manage their own concurrency.
pub trait AudioBackend: Send + Sync {
    /// Realize a playback session. The session starts paused at position zero.
    fn open(&self, media: MediaHandle) -> Result<Box<dyn Session>, BackendError>;

    /// Duration without opening a session. Defaults to reading container tags.
    fn probe(&self, media: MediaHandle) -> Result<Option<Duration>, BackendError> {
        probe_tagged_duration(media)
    }
}

/// One realized playback session. Owned by exactly one player.
pub trait Session: Send {
    fn play(&mut self) -> Result<(), BackendError>;
    fn pause(&mut self);
    /// Halt output and rewind to the start. The session stays usable.
    fn stop(&mut self);
    fn seek(&mut self, position: Duration);
    fn set_volume(&mut self, volume: f32);
    fn position(&self) -> Duration;
    /// None until the engine knows it.
    fn duration(&self) -> Option<Duration>;
    /// True once the track reached its natural end. Cleared by seek.
    fn is_finished(&self) -> bool;
    /// Release native resources. Idempotent.
    fn dispose(&mut self);
}

/// Read the duration from container metadata. Streams report None.
pub fn probe_tagged_duration(media: MediaHandle) -> Result<Option<Duration>, BackendError> {
    let tagged = match media {
        MediaHandle::File { path } => Probe::open(&path).and_then(|p| p.read()),
        MediaHandle::Bytes { bytes, .. } => Probe::new(Cursor::new(bytes)).guess_file_type()?.read(),
        MediaHandle::Stream { .. } => return Ok(None),
    }
    .map_err(|e| BackendError::Decode(e.to_string()))?;

    let duration = tagged.properties().duration();
    Ok(Some(duration).filter(|d| !d.is_zero()))
}

/// No-op audio backend for headless use.
///
/// Sessions track position and volume but produce no output and never
/// finish on their own.
pub struct NoopBackend;

impl AudioBackend for NoopBackend {
    fn open(&self, _: MediaHandle) -> Result<Box<dyn Session>, BackendError> {
        Ok(Box::new(NoopSession::default()))
    }

    fn probe(&self, _: MediaHandle) -> Result<Option<Duration>, BackendError> {
        Ok(None)
    }
}

#[derive(Default)]
struct NoopSession {
    position: Duration,
}

impl Session for NoopSession {
    fn play(&mut self) -> Result<(), BackendError> { Ok(()) }
    fn pause(&mut self) {}
    fn stop(&mut self) { self.position = Duration::ZERO; }
    fn seek(&mut self, position: Duration) { self.position = position; }
    fn set_volume(&mut self, _: f32) {}
    fn position(&self) -> Duration { self.position }
    fn duration(&self) -> Option<Duration> { None }
    fn is_finished(&self) -> bool { false }
    fn dispose(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_hint_is_lowercase_extension() {
        let media = MediaHandle::File { path: "/music/Track.FLAC".into() };
        assert_eq!(media.hint().as_deref(), Some("flac"));
    }

    #[test]
    fn streams_probe_to_unknown_duration() {
        let media = MediaHandle::Stream {
            url: "https://example.com/live".into(),
            reader: Box::new(Cursor::new(Vec::new())),
            hint: None,
        };
        assert_eq!(probe_tagged_duration(media).unwrap(), None);
    }

    #[test]
    fn garbage_bytes_fail_probe() {
        let media = MediaHandle::Bytes {
            bytes: Arc::from(vec![0u8; 16]),
            hint: None,
        };
        assert!(probe_tagged_duration(media).is_err());
    }

    #[test]
    fn noop_session_tracks_seek_and_stop() {
        let mut session = NoopBackend
            .open(MediaHandle::File { path: "/x.mp3".into() })
            .unwrap();
        session.seek(Duration::from_secs(3));
        assert_eq!(session.position(), Duration::from_secs(3));
        session.stop();
        assert_eq!(session.position(), Duration::ZERO);
        assert!(!session.is_finished());
    }
}
