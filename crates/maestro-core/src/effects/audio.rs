//! Native backend — symphonia decode + cpal output.
//!
//! Each session owns two threads for its whole lifetime:
//! 1. the decoder pulls packets from symphonia into a ring buffer
//! 2. the output thread holds a cpal stream that drains the ring
//!
//! Pausing silences the stream and parks the decoder. At end of stream the
//! decoder idles rather than exiting, so a seek (including loop restarts)
//! can resume decoding without reopening the source. A session is finished
//! once the decoder hit EOF, no seek is pending and the ring is drained.
//! The decoder clears `eof` before it takes a seek target and
//! `reached_end` reads them in the opposite order, so a restart can
//! never read as a second natural end.
//!
//! Position is tracked via decoded frame count at the track's sample rate.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::effects::{AudioBackend, MediaHandle, Session};
use crate::error::BackendError;

/// No seek pending.
const NO_SEEK: u64 = u64::MAX;

/// cpal + symphonia engine. Stateless; all state lives in sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for NativeBackend {
    fn open(&self, media: MediaHandle) -> Result<Box<dyn Session>, BackendError> {
        let mut hint = Hint::new();
        if let Some(ext) = media.hint() {
            hint.with_extension(&ext);
        }
        let mss = media.into_media_source_stream()?;

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| BackendError::Unsupported("no default track".into()))?;
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count() as u32).unwrap_or(2);
        let duration_ms = track
            .codec_params
            .n_frames
            .map(|n| n * 1000 / sample_rate as u64)
            .unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(codec_error)?;

        let state = Arc::new(SessionState::new(sample_rate, channels, duration_ms));

        let decoder_state = Arc::clone(&state);
        let decode = thread::spawn(move || {
            if let Err(e) = decode_to_ring(format, decoder, track_id, &decoder_state) {
                log::error!("maestro: decode error: {}", e);
                decoder_state.fail();
            }
        });

        let output_state = Arc::clone(&state);
        let output = thread::spawn(move || {
            let err_state = Arc::clone(&output_state);
            if let Err(e) = output_from_ring(output_state) {
                log::error!("maestro: output error: {}", e);
                err_state.fail();
            }
        });

        Ok(Box::new(NativeSession {
            state,
            threads: vec![decode, output],
        }))
    }
}

struct SessionState {
    paused: AtomicBool,
    /// f32 bits.
    volume: AtomicU32,
    /// Updated by the decoder.
    position_ms: AtomicU64,
    /// 0 while unknown.
    duration_ms: AtomicU64,
    sample_rate: AtomicU32,
    channels: AtomicU32,
    /// Decoder writes, cpal reads.
    samples: Mutex<SampleRing>,
    /// Session disposed; both threads exit.
    stop_signal: AtomicBool,
    seek_to_ms: AtomicU64,
    /// Decoder reached end of stream.
    eof: AtomicBool,
    error: AtomicBool,
}

impl SessionState {
    fn new(sample_rate: u32, channels: u32, duration_ms: u64) -> Self {
        Self {
            paused: AtomicBool::new(true),
            volume: AtomicU32::new(1.0f32.to_bits()),
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(duration_ms),
            sample_rate: AtomicU32::new(sample_rate),
            channels: AtomicU32::new(channels),
            samples: Mutex::new(SampleRing::new(48000 * 2 * 4)), // ~4s stereo
            stop_signal: AtomicBool::new(false),
            seek_to_ms: AtomicU64::new(NO_SEEK),
            eof: AtomicBool::new(false),
            error: AtomicBool::new(false),
        }
    }

    fn fail(&self) {
        self.error.store(true, Ordering::SeqCst);
    }

    /// Take the pending seek target, clearing `eof` first.
    fn take_seek(&self) -> Option<u64> {
        if self.seek_to_ms.load(Ordering::SeqCst) == NO_SEEK {
            return None;
        }
        self.eof.store(false, Ordering::SeqCst);
        match self.seek_to_ms.swap(NO_SEEK, Ordering::SeqCst) {
            NO_SEEK => None,
            ms => Some(ms),
        }
    }
}

/// Natural end or failure. Seek is read before `eof`.
fn reached_end(state: &SessionState) -> bool {
    if state.error.load(Ordering::SeqCst) {
        return true;
    }
    state.seek_to_ms.load(Ordering::SeqCst) == NO_SEEK
        && state.eof.load(Ordering::SeqCst)
        && state.samples.lock().len == 0
}

pub struct NativeSession {
    state: Arc<SessionState>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Session for NativeSession {
    fn play(&mut self) -> Result<(), BackendError> {
        if self.state.error.load(Ordering::SeqCst) {
            return Err(BackendError::Device("session failed; see log".into()));
        }
        self.state.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.state.paused.store(true, Ordering::SeqCst);
        self.seek(Duration::ZERO);
    }

    fn seek(&mut self, position: Duration) {
        let ms = position.as_millis().min(NO_SEEK as u128 - 1) as u64;
        self.state.seek_to_ms.store(ms, Ordering::SeqCst);
        self.state.position_ms.store(ms, Ordering::SeqCst);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.volume.store(volume.to_bits(), Ordering::SeqCst);
    }

    fn position(&self) -> Duration {
        Duration::from_millis(self.state.position_ms.load(Ordering::SeqCst))
    }

    fn duration(&self) -> Option<Duration> {
        match self.state.duration_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn is_finished(&self) -> bool {
        reached_end(&self.state)
    }

    fn dispose(&mut self) {
        self.state.stop_signal.store(true, Ordering::SeqCst);
        self.state.samples.lock().clear(); // Clear first so output thread exits fast
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Decoder thread
// ---------------------------------------------------------------------------

fn decode_to_ring(
    mut format: Box<dyn FormatReader>,
    mut decoder: Box<dyn Decoder>,
    track_id: u32,
    state: &SessionState,
) -> Result<(), Box<dyn std::error::Error>> {
    let sample_rate = state.sample_rate.load(Ordering::SeqCst);
    let channels = state.channels.load(Ordering::SeqCst);

    let device_rate = probe_device_rate(sample_rate);
    let mut resampler = if device_rate != sample_rate {
        log::info!("maestro: resampling {}Hz -> {}Hz", sample_rate, device_rate);
        Some(LinearResampler::new(sample_rate, device_rate, channels as u16))
    } else {
        None
    };

    let mut decoded_frames: u64 = 0;

    loop {
        if state.stop_signal.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(seek_ms) = state.take_seek() {
            let time = Time::new(seek_ms / 1000, (seek_ms % 1000) as f64 / 1000.0);
            let to = SeekTo::Time { time, track_id: Some(track_id) };
            match format.seek(SeekMode::Accurate, to) {
                Ok(_) => {
                    decoder.reset();
                    state.samples.lock().clear();
                    decoded_frames = seek_ms * sample_rate as u64 / 1000;
                }
                Err(e) => log::warn!("maestro: seek to {}ms failed: {}", seek_ms, e),
            }
        }

        if state.paused.load(Ordering::SeqCst) || state.eof.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                state.eof.store(true, Ordering::SeqCst);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let n_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(n_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let raw_samples = sample_buf.samples();
        let samples = match resampler.as_mut() {
            Some(rs) => rs.process(raw_samples),
            None => raw_samples.to_vec(),
        };

        decoded_frames += n_frames as u64;
        state
            .position_ms
            .store(decoded_frames * 1000 / sample_rate as u64, Ordering::SeqCst);

        // Back-pressure while the ring is full
        loop {
            let mut ring = state.samples.lock();
            if ring.free() >= samples.len() {
                ring.push(&samples);
                break;
            }
            drop(ring);
            thread::sleep(Duration::from_millis(5));

            if state.stop_signal.load(Ordering::SeqCst)
                || state.seek_to_ms.load(Ordering::SeqCst) != NO_SEEK
            {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Output thread
// ---------------------------------------------------------------------------

/// Hold a cpal stream draining the ring until the session is disposed.
///
/// The stream is configured at the track's rate when the device supports
/// it, otherwise at the device default (the decoder resamples to match).
fn output_from_ring(state: Arc<SessionState>) -> Result<(), Box<dyn std::error::Error>> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or("no output device")?;

    let track_rate = state.sample_rate.load(Ordering::SeqCst);
    let track_channels = state.channels.load(Ordering::SeqCst).max(1) as u16;

    let device_supports_track = device
        .supported_output_configs()
        .map(|configs| {
            configs.into_iter().any(|range| {
                range.sample_format() == cpal::SampleFormat::F32
                    && range.channels() >= track_channels
                    && range.min_sample_rate().0 <= track_rate
                    && range.max_sample_rate().0 >= track_rate
            })
        })
        .unwrap_or(false);

    let config: cpal::StreamConfig = if device_supports_track {
        cpal::StreamConfig {
            channels: track_channels,
            sample_rate: cpal::SampleRate(track_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    } else {
        let default_cfg = device.default_output_config()?;
        if default_cfg.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!(
                "device does not support f32 output (got {:?})",
                default_cfg.sample_format()
            )
            .into());
        }
        default_cfg.into()
    };

    let out_channels = config.channels;
    let ring_channels = track_channels;
    let cb_state = Arc::clone(&state);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if cb_state.paused.load(Ordering::SeqCst) {
                data.fill(0.0);
                return;
            }
            if ring_channels == out_channels {
                cb_state.samples.lock().pull(data);
            } else {
                let frames = data.len() / out_channels as usize;
                let mut tmp = vec![0.0f32; frames * ring_channels as usize];
                cb_state.samples.lock().pull(&mut tmp);
                adapt_channels(&tmp, ring_channels, data, out_channels);
            }
            let volume = f32::from_bits(cb_state.volume.load(Ordering::SeqCst));
            for s in data.iter_mut() {
                *s *= volume;
            }
        },
        move |err| {
            log::error!("maestro: cpal error: {}", err);
        },
        None,
    )?;

    stream.play()?;

    while !state.stop_signal.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(25));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample plumbing
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of interleaved f32 samples.
struct SampleRing {
    buf: Vec<f32>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Samples past capacity are dropped.
    fn push(&mut self, samples: &[f32]) {
        for &s in samples.iter().take(self.free()) {
            self.buf[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.buf.len();
            self.len += 1;
        }
    }

    /// Fill `out`, zero-padding on underrun. Returns samples actually read.
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        for sample in out.iter_mut().take(n) {
            *sample = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.buf.len();
        }
        self.len -= n;
        out[n..].fill(0.0);
        n
    }

    fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Linear interpolation resampler. Phase carries across calls.
struct LinearResampler {
    ratio: f64,
    phase: f64,
    channels: usize,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32, channels: u16) -> Self {
        Self {
            ratio: dst_rate as f64 / src_rate as f64,
            phase: 0.0,
            channels: channels.max(1) as usize,
        }
    }

    fn is_needed(&self) -> bool {
        (self.ratio - 1.0).abs() > 0.001
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if !self.is_needed() {
            return input.to_vec();
        }
        let ch = self.channels;
        let in_frames = input.len() / ch;
        if in_frames == 0 {
            return Vec::new();
        }
        let out_frames = ((in_frames as f64) * self.ratio).ceil() as usize;
        let mut output = Vec::with_capacity(out_frames * ch);

        while output.len() < out_frames * ch {
            let src_idx = self.phase as usize;
            if src_idx >= in_frames {
                break;
            }
            let frac = (self.phase - src_idx as f64) as f32;
            let next_idx = (src_idx + 1).min(in_frames - 1);
            for c in 0..ch {
                let s0 = input[src_idx * ch + c];
                let s1 = input[next_idx * ch + c];
                output.push(s0 + (s1 - s0) * frac);
            }
            self.phase += 1.0 / self.ratio;
        }

        self.phase = (self.phase - in_frames as f64).max(0.0);
        output
    }
}

/// Remap interleaved frames between channel layouts.
fn adapt_channels(src: &[f32], src_ch: u16, dst: &mut [f32], dst_ch: u16) {
    let src_ch = src_ch as usize;
    let dst_ch = dst_ch as usize;
    let sample = |i: usize| src.get(i).copied().unwrap_or(0.0);

    for (f, frame) in dst.chunks_exact_mut(dst_ch).enumerate() {
        let base = f * src_ch;
        match (src_ch, dst_ch) {
            (1, _) => frame.fill(sample(base)),
            (_, 1) => {
                let sum: f32 = (0..src_ch).map(|c| sample(base + c)).sum();
                frame[0] = sum / src_ch as f32;
            }
            _ => {
                for (c, out) in frame.iter_mut().enumerate() {
                    *out = if c < src_ch { sample(base + c) } else { 0.0 };
                }
            }
        }
    }
}

fn codec_error(err: SymphoniaError) -> BackendError {
    match err {
        SymphoniaError::Unsupported(what) => BackendError::Unsupported(what.into()),
        other => BackendError::Decode(other.to_string()),
    }
}

/// Rate the output device will run at for a track of `track_rate`.
fn probe_device_rate(track_rate: u32) -> u32 {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        return track_rate;
    };

    let supports_track = device
        .supported_output_configs()
        .map(|configs| {
            configs.into_iter().any(|range| {
                range.min_sample_rate().0 <= track_rate && range.max_sample_rate().0 >= track_rate
            })
        })
        .unwrap_or(false);

    if supports_track {
        track_rate
    } else {
        device
            .default_output_config()
            .map(|c| c.sample_rate().0)
            .unwrap_or(track_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_preserves_order_across_wraparound() {
        let mut ring = SampleRing::new(4);
        ring.push(&[1.0, 2.0, 3.0]);
        let mut out = [0.0f32; 3];
        assert_eq!(ring.pull(&mut out), 3);
        ring.push(&[7.0, 8.0, 9.0, 10.0]);
        let mut out = [0.0f32; 4];
        ring.pull(&mut out);
        assert_eq!(out, [7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn ring_drops_overflow_and_pads_underrun() {
        let mut ring = SampleRing::new(4);
        ring.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ring.free(), 0);
        let mut out = [9.0f32; 6];
        assert_eq!(ring.pull(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);

        ring.push(&[1.0]);
        ring.clear();
        assert_eq!(ring.pull(&mut out[..1]), 0);
    }

    #[test]
    fn resampler_passthrough_at_equal_rates() {
        let mut rs = LinearResampler::new(44100, 44100, 2);
        assert!(!rs.is_needed());
        assert_eq!(rs.process(&[1.0, 2.0, 3.0, 4.0]), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn resampler_doubles_and_halves() {
        let mut up = LinearResampler::new(22050, 44100, 1);
        let out = up.process(&[0.0, 1.0, 0.0, -1.0]);
        assert_eq!(out.len(), 8);
        assert_eq!(out[1], 0.5);

        let mut down = LinearResampler::new(96000, 48000, 1);
        let input: Vec<f32> = (0..96).map(|i| i as f32).collect();
        let out = down.process(&input);
        assert_eq!(out.len(), 48);
        assert_eq!(out[1], 2.0);
    }

    #[test]
    fn channel_adaptation() {
        let mut stereo = [0.0f32; 6];
        adapt_channels(&[1.0, 2.0, 3.0], 1, &mut stereo, 2);
        assert_eq!(stereo, [1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

        let mut mono = [0.0f32; 2];
        adapt_channels(&[1.0, 3.0, 2.0, 4.0], 2, &mut mono, 1);
        assert_eq!(mono, [2.0, 3.0]);

        let mut quad = [9.0f32; 4];
        adapt_channels(&[1.0, 2.0], 2, &mut quad, 4);
        assert_eq!(quad, [1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn end_is_reported_only_when_drained_without_pending_seek() {
        let state = SessionState::new(44100, 2, 1000);
        assert!(!reached_end(&state));

        state.samples.lock().push(&[0.5, 0.5]);
        state.eof.store(true, Ordering::SeqCst);
        assert!(!reached_end(&state));
        state.samples.lock().clear();
        assert!(reached_end(&state));

        state.seek_to_ms.store(0, Ordering::SeqCst);
        assert!(!reached_end(&state));
    }

    #[test]
    fn taking_a_restart_seek_never_reads_as_end() {
        let state = SessionState::new(44100, 2, 1000);
        state.eof.store(true, Ordering::SeqCst);
        assert!(reached_end(&state));

        // Loop restart: seek(0) with the decoder idling at EOF.
        state.seek_to_ms.store(0, Ordering::SeqCst);
        assert!(!reached_end(&state));
        assert_eq!(state.take_seek(), Some(0));
        assert!(!reached_end(&state));
        assert_eq!(state.take_seek(), None);
    }

    #[test]
    fn failure_reads_as_end() {
        let state = SessionState::new(44100, 2, 0);
        state.samples.lock().push(&[0.1]);
        state.fail();
        assert!(reached_end(&state));
    }

    #[test]
    fn codec_errors_keep_unsupported_apart() {
        assert!(matches!(
            codec_error(SymphoniaError::Unsupported("codec")),
            BackendError::Unsupported(_)
        ));
        assert!(matches!(
            codec_error(SymphoniaError::DecodeError("bad frame")),
            BackendError::Decode(_)
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_open() {
        let media = MediaHandle::Bytes {
            bytes: Arc::from(vec![0u8; 64]),
            hint: Some("mp3".into()),
        };
        assert!(matches!(NativeBackend::new().open(media), Err(BackendError::Decode(_))));
    }
}
