//! A single voice: one envelope driving one oscillator.
//!
//! Ported from `voice.h`.

use crate::envelope::{EnvelopeDefinition, EnvelopeState};
use crate::waveform::{WaveformDefinition, WaveformState};

/// One envelope-gated oscillator.
#[derive(Debug, Clone, Default)]
pub struct VoiceChannel {
    envelope: EnvelopeState,
    waveform: WaveformState,
}

impl VoiceChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a new envelope and waveform, starting a fresh note.
    pub fn configure(&mut self, envelope: EnvelopeDefinition, waveform: WaveformDefinition) {
        self.envelope.configure(envelope);
        self.waveform.configure(waveform);
    }

    /// True once the envelope has fully released.
    pub fn is_done(&self) -> bool {
        self.envelope.is_done()
    }

    /// Releases an indefinite delay/sustain hold on this voice's envelope.
    pub fn continue_envelope(&mut self) {
        self.envelope.continue_();
    }

    pub fn is_waiting(&self) -> bool {
        self.envelope.is_waiting()
    }

    /// Produces the next sample: the oscillator, scaled by the envelope's
    /// current amplitude and saturated to `i8`.
    ///
    /// The oscillator is not stepped when the envelope amplitude is zero,
    /// matching the original's skip of `voice_wf_next` while silent.
    pub fn next(&mut self) -> i8 {
        let amplitude = self.envelope.next();
        if amplitude == 0 {
            return 0;
        }

        let sample = self.waveform.next_sample() as i16;
        let value = (sample * amplitude as i16) >> 8;
        value.clamp(i8::MIN as i16, i8::MAX as i16) as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::WaveformMode;

    #[test]
    fn silent_envelope_yields_silent_voice_without_advancing_oscillator() {
        let mut voice = VoiceChannel::new();
        // Zero peak/sustain amplitude: envelope stays at zero.
        voice.configure(
            EnvelopeDefinition {
                time_scale: 1,
                delay_time: 0,
                attack_time: 0,
                decay_time: 0,
                sustain_time: 0,
                release_time: 0,
                peak_amp: 0,
                sustain_amp: 0,
            },
            WaveformDefinition::dc(127),
        );
        for _ in 0..10 {
            assert_eq!(voice.next(), 0);
        }
    }

    #[test]
    fn full_amplitude_dc_passes_through() {
        let mut voice = VoiceChannel::new();
        voice.configure(
            EnvelopeDefinition {
                time_scale: 1,
                delay_time: 0,
                attack_time: 0,
                decay_time: 0,
                sustain_time: u8::MAX,
                release_time: 0,
                peak_amp: 255,
                sustain_amp: 255,
            },
            WaveformDefinition::dc(100),
        );
        // Walk past the instantaneous delay/attack/decay states into sustain.
        let mut sample = 0;
        for _ in 0..8 {
            sample = voice.next();
        }
        assert_eq!(sample, 100);
    }

    #[test]
    fn voice_reports_done_after_release_completes() {
        let mut voice = VoiceChannel::new();
        voice.configure(
            EnvelopeDefinition {
                time_scale: 1,
                delay_time: 0,
                attack_time: 0,
                decay_time: 0,
                sustain_time: 0,
                release_time: 0,
                peak_amp: 80,
                sustain_amp: 0,
            },
            WaveformDefinition::periodic(WaveformMode::Square, 8000, 440, 80),
        );
        let mut done = false;
        for _ in 0..16 {
            voice.next();
            if voice.is_done() {
                done = true;
                break;
            }
        }
        assert!(done);
    }
}
