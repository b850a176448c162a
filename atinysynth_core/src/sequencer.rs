//! Sequencer: turns a per-channel map of notes into either a flat,
//! replayable frame stream (offline compile) or a live pull-fed voice
//! loader (online feed), sharing the same one-frame-per-sample load
//! policy so both paths draw identical notes in identical order.
//!
//! Ported from `sequencer.c`/`sequencer.h`. The C version kept its
//! compiler and player state in file-scope statics (`frame_count`,
//! `voice_count`, a function pointer); here they are fields of
//! [`SequencerPlayer`] and locals of [`compile`], so nothing about
//! replay is implicit global state.

use alloc::vec::Vec;
use core::fmt;

use crate::envelope::EnvelopeDefinition;
use crate::mixer::PolySynth;
use crate::waveform::WaveformDefinition;

/// One step: the envelope and waveform a voice should switch to.
/// 15 bytes on the wire (§6.1): 11 for the envelope, 4 for the waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerFrame {
    pub envelope: EnvelopeDefinition,
    pub waveform: WaveformDefinition,
}

impl SequencerFrame {
    /// Serializes to the 15-byte wire form (11-byte envelope + 4-byte
    /// waveform, §6.1).
    pub fn to_bytes(self) -> [u8; 15] {
        let mut out = [0u8; 15];
        out[..11].copy_from_slice(&self.envelope.to_bytes());
        out[11..].copy_from_slice(&self.waveform.to_bytes());
        out
    }

    pub fn from_bytes(b: [u8; 15]) -> Self {
        let mut env = [0u8; 11];
        env.copy_from_slice(&b[..11]);
        let mut wf = [0u8; 4];
        wf.copy_from_slice(&b[11..]);
        Self {
            envelope: EnvelopeDefinition::from_bytes(env),
            waveform: WaveformDefinition::from_bytes(wf),
        }
    }
}

/// Per-channel notes awaiting compilation into a [`FrameStream`].
///
/// Channels with zero frames are not assigned a voice at compile time;
/// `seq_compile`'s "skip empty channels" rule.
#[derive(Debug, Clone, Default)]
pub struct FrameMap {
    channels: Vec<Vec<SequencerFrame>>,
}

impl FrameMap {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: alloc::vec![Vec::new(); channel_count],
        }
    }

    /// Grows the channel list so that `channel` is addressable, leaving
    /// any newly created channels empty.
    pub fn ensure_channel(&mut self, channel: usize) {
        if channel >= self.channels.len() {
            self.channels.resize(channel + 1, Vec::new());
        }
    }

    pub fn push_frame(&mut self, channel: usize, frame: SequencerFrame) {
        self.ensure_channel(channel);
        self.channels[channel].push(frame);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn active_channel_count(&self) -> usize {
        self.channels.iter().filter(|c| !c.is_empty()).count()
    }
}

/// Header describing a compiled stream, checked by the player before
/// it accepts the stream (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub synth_frequency: u16,
    pub voices: u8,
    pub frame_count: u16,
}

impl StreamHeader {
    /// Serializes to the 5-byte wire form (§6.1).
    pub fn to_bytes(self) -> [u8; 5] {
        let freq = self.synth_frequency.to_le_bytes();
        let count = self.frame_count.to_le_bytes();
        [freq[0], freq[1], self.voices, count[0], count[1]]
    }

    pub fn from_bytes(b: [u8; 5]) -> Self {
        Self {
            synth_frequency: u16::from_le_bytes([b[0], b[1]]),
            voices: b[2],
            frame_count: u16::from_le_bytes([b[3], b[4]]),
        }
    }
}

/// A flattened, replay-ordered stream produced by [`compile`].
#[derive(Debug, Clone)]
pub struct FrameStream {
    pub header: StreamHeader,
    pub frames: Vec<SequencerFrame>,
}

impl FrameStream {
    /// Serializes the header followed by every frame, back to back,
    /// matching the wire layout §6.1 describes for a precompiled file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.frames.len() * 15);
        out.extend_from_slice(&self.header.to_bytes());
        for frame in &self.frames {
            out.extend_from_slice(&frame.to_bytes());
        }
        out
    }

    /// Parses a stream serialized by [`to_bytes`](Self::to_bytes).
    /// Returns `None` if `bytes` is too short for the header's declared
    /// frame count.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 5 {
            return None;
        }
        let mut header_bytes = [0u8; 5];
        header_bytes.copy_from_slice(&bytes[..5]);
        let header = StreamHeader::from_bytes(header_bytes);

        let mut frames = Vec::with_capacity(header.frame_count as usize);
        let mut pos = 5;
        for _ in 0..header.frame_count {
            if pos + 15 > bytes.len() {
                return None;
            }
            let mut frame_bytes = [0u8; 15];
            frame_bytes.copy_from_slice(&bytes[pos..pos + 15]);
            frames.push(SequencerFrame::from_bytes(frame_bytes));
            pos += 15;
        }
        Some(Self { header, frames })
    }
}

/// Errors rejecting a stream before playback starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The stream needs more voices than the player was given.
    VoiceCountExceedsCapacity { required: u8, available: usize },
    /// The stream was compiled for a different sample rate.
    SampleRateMismatch { stream: u16, player: u32 },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::VoiceCountExceedsCapacity {
                required,
                available,
            } => write!(
                f,
                "stream requires {required} voices but only {available} are available"
            ),
            StreamError::SampleRateMismatch { stream, player } => write!(
                f,
                "stream was compiled for {stream} Hz but player runs at {player} Hz"
            ),
        }
    }
}

impl core::error::Error for StreamError {}

/// Compiles a [`FrameMap`] into a [`FrameStream`] by simulating the
/// synth offline: each active channel is assigned a voice slot, and
/// frames are handed to the first free slot one at a time, in ascending
/// slot order, exactly as the online player would pull them. This is
/// what gives the stream its "fetch order, not channel order" layout.
pub fn compile(map: &FrameMap, sample_rate: u32) -> FrameStream {
    compile_with_pcm(map, sample_rate).0
}

/// Same as [`compile`], but also returns the per-sample PCM the offline
/// simulation produced along the way — the trace a live
/// [`SequencerPlayer`] feeding the resulting stream (before each
/// `synth.next()`, per §4.5) must reproduce bit-for-bit for the stream
/// to be a faithful replay of the map it was compiled from.
pub fn compile_with_pcm(map: &FrameMap, sample_rate: u32) -> (FrameStream, Vec<i8>) {
    let voice_count = map.active_channel_count();
    let mut synth = PolySynth::new(voice_count);
    let mut positions = alloc::vec![0usize; voice_count];
    let active_channels: Vec<&Vec<SequencerFrame>> =
        map.channels.iter().filter(|c| !c.is_empty()).collect();

    let mut out = Vec::new();
    let mut pcm = Vec::new();

    feed_channels(&mut synth, &active_channels, &mut positions, &mut out);
    while synth.enable_mask() != 0 {
        pcm.push(synth.next());
        feed_channels(&mut synth, &active_channels, &mut positions, &mut out);
    }

    let stream = FrameStream {
        header: StreamHeader {
            synth_frequency: sample_rate as u16,
            voices: voice_count as u8,
            frame_count: out.len() as u16,
        },
        frames: out,
    };
    (stream, pcm)
}

/// Feeds at most one frame into the first free voice slot, matching
/// `seq_feed_channels`'s "don't overload the CPU with multiple frames
/// per sample" rule.
fn feed_channels(
    synth: &mut PolySynth,
    channels: &[&Vec<SequencerFrame>],
    positions: &mut [usize],
    out: &mut Vec<SequencerFrame>,
) {
    for (voice_idx, channel) in channels.iter().enumerate() {
        if positions[voice_idx] < channel.len() && !synth.is_enabled(voice_idx) {
            let frame = channel[positions[voice_idx]];
            positions[voice_idx] += 1;
            synth.configure_voice(voice_idx, frame.envelope, frame.waveform);
            out.push(frame);
            break;
        }
    }
}

/// Supplies frames to a [`SequencerPlayer`] one at a time, pull-style.
/// Returns `None` at end of stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<SequencerFrame>;
}

/// An online player of a [`FrameStream`], pulling frames from a
/// [`FrameSource`] at sample time instead of holding the whole stream
/// in memory at once.
///
/// Ported from `seq_play_stream`/`seq_feed_synth`.
pub struct SequencerPlayer {
    voice_count: u8,
}

impl SequencerPlayer {
    /// Validates `header` against the player's capabilities and sample
    /// rate, then constructs a player ready to [`feed`](Self::feed).
    /// Disables every voice on the synth, per `seq_play_stream`.
    pub fn load_header(
        header: StreamHeader,
        sample_rate: u32,
        synth: &mut PolySynth,
    ) -> Result<Self, StreamError> {
        if header.voices as usize > synth.voice_count() {
            warn!(
                "rejecting stream: needs {} voices, only {} available",
                header.voices,
                synth.voice_count()
            );
            return Err(StreamError::VoiceCountExceedsCapacity {
                required: header.voices,
                available: synth.voice_count(),
            });
        }
        if header.synth_frequency as u32 != sample_rate {
            warn!(
                "rejecting stream: compiled for {} Hz, player runs at {} Hz",
                header.synth_frequency, sample_rate
            );
            return Err(StreamError::SampleRateMismatch {
                stream: header.synth_frequency,
                player: sample_rate,
            });
        }
        synth.disable_all();
        Ok(Self {
            voice_count: header.voices,
        })
    }

    /// Feeds at most one frame into the first free voice slot for this
    /// sample, pulling it from `source`. Call once per sample, *before*
    /// `synth.next()` runs the mixer (§4.5: "before the mixer runs"),
    /// exactly mirroring [`compile`]'s own prefeed-then-(`next`,`feed`)
    /// loop so a stream replays identically live as it did when
    /// compiled. A voice freed by the previous sample's `next()` call is
    /// still seen as free here, since nothing else touches `enable`
    /// between samples.
    pub fn feed(&mut self, synth: &mut PolySynth, source: &mut dyn FrameSource) {
        for voice_idx in 0..self.voice_count as usize {
            if !synth.is_enabled(voice_idx) {
                let Some(frame) = source.next_frame() else {
                    return;
                };
                synth.configure_voice(voice_idx, frame.envelope, frame.waveform);
                break;
            }
        }
    }
}

/// A [`FrameSource`] that replays an in-memory [`FrameStream`] in order.
pub struct StreamFrameSource<'a> {
    frames: core::slice::Iter<'a, SequencerFrame>,
}

impl<'a> StreamFrameSource<'a> {
    pub fn new(stream: &'a FrameStream) -> Self {
        Self {
            frames: stream.frames.iter(),
        }
    }
}

impl<'a> FrameSource for StreamFrameSource<'a> {
    fn next_frame(&mut self) -> Option<SequencerFrame> {
        self.frames.next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::WaveformMode;

    fn quick_frame(freq: u16) -> SequencerFrame {
        SequencerFrame {
            envelope: EnvelopeDefinition {
                time_scale: 1,
                delay_time: 0,
                attack_time: 0,
                decay_time: 0,
                sustain_time: 0,
                release_time: 1,
                peak_amp: 100,
                sustain_amp: 0,
            },
            waveform: WaveformDefinition::periodic(WaveformMode::Square, 8000, freq, 100),
        }
    }

    #[test]
    fn compile_skips_empty_channels() {
        let mut map = FrameMap::new(3);
        map.push_frame(0, quick_frame(220));
        // channel 1 left empty
        map.push_frame(2, quick_frame(440));
        let stream = compile(&map, 8000);
        assert_eq!(stream.header.voices, 2);
        assert!(stream.header.frame_count >= 2);
    }

    #[test]
    fn compile_assigns_one_frame_per_sample_max() {
        let mut map = FrameMap::new(1);
        for f in 0..5 {
            map.push_frame(0, quick_frame(220 + f * 10));
        }
        let stream = compile(&map, 8000);
        assert_eq!(stream.frames.len(), 5);
    }

    #[test]
    fn compiled_stream_survives_byte_round_trip() {
        let mut map = FrameMap::new(1);
        map.push_frame(0, quick_frame(220));
        map.push_frame(0, quick_frame(440));
        let stream = compile(&map, 8000);

        let bytes = stream.to_bytes();
        let parsed = FrameStream::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.header, stream.header);
        assert_eq!(parsed.frames, stream.frames);
    }

    #[test]
    fn player_rejects_voice_count_mismatch() {
        let mut synth = PolySynth::new(1);
        let header = StreamHeader {
            synth_frequency: 8000,
            voices: 2,
            frame_count: 0,
        };
        let result = SequencerPlayer::load_header(header, 8000, &mut synth);
        assert!(matches!(
            result,
            Err(StreamError::VoiceCountExceedsCapacity { .. })
        ));
    }

    #[test]
    fn player_rejects_sample_rate_mismatch() {
        let mut synth = PolySynth::new(2);
        let header = StreamHeader {
            synth_frequency: 8000,
            voices: 1,
            frame_count: 0,
        };
        let result = SequencerPlayer::load_header(header, 48_000, &mut synth);
        assert!(matches!(
            result,
            Err(StreamError::SampleRateMismatch { .. })
        ));
    }

    #[test]
    fn online_feed_matches_compiled_stream_voice_count() {
        let mut map = FrameMap::new(2);
        map.push_frame(0, quick_frame(220));
        map.push_frame(1, quick_frame(440));
        let stream = compile(&map, 8000);

        let mut synth = PolySynth::new(2);
        let mut player = SequencerPlayer::load_header(stream.header, 8000, &mut synth).unwrap();
        let mut source = StreamFrameSource::new(&stream);

        for _ in 0..64 {
            player.feed(&mut synth, &mut source);
            synth.next();
        }
    }
}
