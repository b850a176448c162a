//! Polyphonic fixed-point synthesizer core.
//!
//! This crate is the real-time synthesis pipeline: a per-voice ADSR
//! envelope, a per-voice fixed-point waveform oscillator, a polyphonic
//! mixer that sums voices into one clipped 8-bit sample, a sequencer that
//! feeds pre-compiled frames into voices at sample time, and an offline
//! MML compiler that turns textual scores into the sequencer's frame
//! map. It has no knowledge of timers, PWM, GPIO or audio sinks — those
//! are the host's job.
//!
//! The sample rate is not a compile-time constant of this crate (unlike
//! the hardware it targets, where it is fixed at boot). It is supplied
//! by the caller to whichever entry point needs it (`PolySynth::new`,
//! `SequencerPlayer::new`, `MmlCompiler::new`) so the same binary can
//! serve multiple target rates, and so the offline compiler and the
//! on-device player can assert they agree (§6.1: a stream whose
//! `synth_frequency` differs from the player's is rejected).

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

mod bit;
pub mod envelope;
pub mod fifo;
pub mod mixer;
pub mod mml;
pub mod sequencer;
pub mod sink;
pub mod voice;
pub mod waveform;

pub use envelope::{EnvelopeDefinition, EnvelopeState};
pub use mixer::PolySynth;
pub use sequencer::{FrameStream, SequencerFrame, SequencerPlayer};
pub use voice::VoiceChannel;
pub use waveform::{WaveformDefinition, WaveformMode, WaveformState};

/// Number of voice slots a single `u32` enable/mute bitmask can address.
pub const MAX_VOICES: usize = 32;
