//! Polyphonic mixer: sums up to [`crate::MAX_VOICES`] voices into one
//! clipped 8-bit sample per tick.
//!
//! Ported from `synth.h`. Disabled voices are skipped entirely;
//! muted-but-enabled voices are still stepped (so their envelope and
//! oscillator keep advancing) but excluded from the sum. A voice that
//! finishes its release on a given tick is auto-disabled and its
//! envelope reset, freeing the slot for the next `configure` call.

use alloc::vec::Vec;

use crate::bit::test_bit;
use crate::envelope::EnvelopeDefinition;
use crate::voice::VoiceChannel;
use crate::waveform::WaveformDefinition;

/// A bank of voices mixed down to a single 8-bit output stream.
pub struct PolySynth {
    voices: Vec<VoiceChannel>,
    /// Bit `n` set means voice `n` is active and contributes time.
    enable: u32,
    /// Bit `n` set means voice `n` is excluded from the sum (but still
    /// stepped, if also enabled).
    mute: u32,
}

impl PolySynth {
    /// Creates a synth with `voice_count` idle voices (`voice_count` must
    /// not exceed [`crate::MAX_VOICES`]).
    pub fn new(voice_count: usize) -> Self {
        debug_assert!(voice_count <= crate::MAX_VOICES);
        let mut voices = Vec::with_capacity(voice_count);
        voices.resize_with(voice_count, VoiceChannel::new);
        Self {
            voices,
            enable: 0,
            mute: 0,
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Loads a new note into slot `idx` and enables it, unmuted.
    pub fn configure_voice(
        &mut self,
        idx: usize,
        envelope: EnvelopeDefinition,
        waveform: WaveformDefinition,
    ) {
        self.voices[idx].configure(envelope, waveform);
        self.enable |= 1 << idx;
        self.mute &= !(1 << idx);
    }

    pub fn set_enabled(&mut self, idx: usize, enabled: bool) {
        if enabled {
            self.enable |= 1 << idx;
        } else {
            self.enable &= !(1 << idx);
        }
    }

    pub fn set_muted(&mut self, idx: usize, muted: bool) {
        if muted {
            self.mute |= 1 << idx;
        } else {
            self.mute &= !(1 << idx);
        }
    }

    pub fn is_enabled(&self, idx: usize) -> bool {
        test_bit(self.enable, idx as u32)
    }

    pub fn is_muted(&self, idx: usize) -> bool {
        test_bit(self.mute, idx as u32)
    }

    /// Raw enable bitmask, bit `n` set means voice `n` is active.
    pub fn enable_mask(&self) -> u32 {
        self.enable
    }

    /// Disables every voice without resetting their envelope/oscillator
    /// state, matching `seq_play_stream`'s bulk clear of `synth->enable`.
    pub fn disable_all(&mut self) {
        self.enable = 0;
    }

    pub fn voice(&self, idx: usize) -> &VoiceChannel {
        &self.voices[idx]
    }

    pub fn voice_mut(&mut self, idx: usize) -> &mut VoiceChannel {
        &mut self.voices[idx]
    }

    /// Mixes one sample: steps every enabled voice (in ascending slot
    /// order), sums the unmuted ones, and clips to `i8` range.
    pub fn next(&mut self) -> i8 {
        let mut sample: i16 = 0;

        for idx in 0..self.voices.len() {
            if !test_bit(self.enable, idx as u32) {
                continue;
            }

            let ch_sample = self.voices[idx].next();
            if !test_bit(self.mute, idx as u32) {
                sample += ch_sample as i16;
            }

            if self.voices[idx].is_done() {
                trace!("voice {idx} done, freeing slot");
                self.enable &= !(1 << idx);
                self.voices[idx] = VoiceChannel::new();
            }
        }

        sample.clamp(i8::MIN as i16, i8::MAX as i16) as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::WaveformMode;

    fn always_on(peak: u8) -> EnvelopeDefinition {
        EnvelopeDefinition {
            time_scale: 1,
            delay_time: 0,
            attack_time: 0,
            decay_time: 0,
            sustain_time: u8::MAX,
            release_time: 0,
            peak_amp: peak,
            sustain_amp: peak,
        }
    }

    #[test]
    fn disabled_voice_contributes_nothing() {
        let mut synth = PolySynth::new(2);
        synth.configure_voice(0, always_on(255), WaveformDefinition::dc(100));
        synth.set_enabled(0, false);
        for _ in 0..8 {
            assert_eq!(synth.next(), 0);
        }
    }

    #[test]
    fn muted_voice_still_advances_but_is_silent() {
        let mut synth = PolySynth::new(1);
        synth.configure_voice(
            0,
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
            WaveformDefinition::dc(80),
        );
        synth.set_muted(0, true);
        for _ in 0..16 {
            assert_eq!(synth.next(), 0);
        }
        // With sustain/release both instantaneous, the voice should have
        // run to completion and auto-disabled despite being muted.
        assert!(!synth.is_enabled(0));
    }

    #[test]
    fn two_voices_sum_and_clip() {
        let mut synth = PolySynth::new(2);
        synth.configure_voice(0, always_on(255), WaveformDefinition::dc(100));
        synth.configure_voice(1, always_on(255), WaveformDefinition::dc(100));
        let mut sample = 0;
        for _ in 0..8 {
            sample = synth.next();
        }
        assert_eq!(sample, i8::MAX);
    }

    #[test]
    fn finished_voice_auto_disables_and_frees_slot() {
        let mut synth = PolySynth::new(1);
        synth.configure_voice(
            0,
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
        for _ in 0..16 {
            synth.next();
        }
        assert!(!synth.is_enabled(0));
        // Slot is free for a brand new note.
        synth.configure_voice(0, always_on(50), WaveformDefinition::dc(50));
        assert!(synth.is_enabled(0));
    }
}
