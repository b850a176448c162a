//! ADSR envelope generator.
//!
//! Produces one unsigned 8-bit amplitude per call. Time is measured in
//! "time units" scaled by `time_scale` samples per unit, so the same
//! definition plays back identically regardless of sample rate as long
//! as `time_scale` is derived from it.
//!
//! Ported bit-for-bit from `adsr.c`/`adsr.h`: the state machine here
//! is the same one, just expressed as a Rust enum
//! dispatched through a `loop { match }` instead of a chain of
//! non-exclusive `if` statements that fall through when a state needs
//! no sample time of its own.

/// Sentinel for `delay_time`/`sustain_time` meaning "hold forever until
/// [`EnvelopeState::continue_`] is called".
pub const INFINITE: u8 = u8::MAX;

/// Exponential/linear blend factor used in the attack and release ramps.
const LIN_AMP_FACTOR: u16 = 5;

/// Compile-time envelope record. 11 bytes on the wire (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvelopeDefinition {
    /// Samples per time unit.
    pub time_scale: u32,
    /// Delay period, time units. [`INFINITE`] holds until triggered.
    pub delay_time: u8,
    /// Attack period, time units.
    pub attack_time: u8,
    /// Decay period, time units.
    pub decay_time: u8,
    /// Sustain period, time units. [`INFINITE`] holds until triggered.
    pub sustain_time: u8,
    /// Release period, time units.
    pub release_time: u8,
    /// Amplitude reached at the end of attack.
    pub peak_amp: u8,
    /// Amplitude held during sustain.
    pub sustain_amp: u8,
}

impl EnvelopeDefinition {
    /// Serializes to the 11-byte little-endian wire form (§6.1).
    pub fn to_bytes(self) -> [u8; 11] {
        let scale = self.time_scale.to_le_bytes();
        [
            scale[0],
            scale[1],
            scale[2],
            scale[3],
            self.delay_time,
            self.attack_time,
            self.decay_time,
            self.sustain_time,
            self.release_time,
            self.peak_amp,
            self.sustain_amp,
        ]
    }

    /// Parses from the 11-byte little-endian wire form.
    pub fn from_bytes(b: [u8; 11]) -> Self {
        Self {
            time_scale: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            delay_time: b[4],
            attack_time: b[5],
            decay_time: b[6],
            sustain_time: b[7],
            release_time: b[8],
            peak_amp: b[9],
            sustain_amp: b[10],
        }
    }

    fn is_configured(&self) -> bool {
        self.time_scale != 0
            && (self.delay_time != 0
                || self.attack_time != 0
                || self.decay_time != 0
                || self.sustain_time != 0
                || self.release_time != 0)
            && (self.peak_amp != 0 || self.sustain_amp != 0)
    }
}

/// Envelope phase, in the order samples actually pass through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    DelayInit,
    DelayExpire,
    AttackInit,
    Attack,
    AttackExpire,
    DecayInit,
    Decay,
    DecayExpire,
    SustainInit,
    SustainExpire,
    ReleaseInit,
    Release,
    ReleaseExpire,
    Done,
}

/// Runtime envelope generator state.
#[derive(Debug, Clone)]
pub struct EnvelopeState {
    def: EnvelopeDefinition,
    phase: Phase,
    /// Samples until the next state transition. `u32::MAX` means "wait
    /// for an explicit [`continue_`](Self::continue_)".
    next_event: u32,
    /// Samples between amplitude steps within attack/decay/release.
    time_step: u16,
    /// Counts down the 16 segments of attack/decay/release ramps.
    counter: u8,
    amplitude: u8,
}

impl Default for EnvelopeState {
    fn default() -> Self {
        Self {
            def: EnvelopeDefinition::default(),
            phase: Phase::Idle,
            next_event: 0,
            time_step: 0,
            counter: 0,
            amplitude: 0,
        }
    }
}

impl EnvelopeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a new definition and resets to idle.
    pub fn configure(&mut self, def: EnvelopeDefinition) {
        self.def = def;
        self.reset();
    }

    /// Resets to idle without forgetting the current definition,
    /// ready for the next note-on.
    pub fn reset(&mut self) {
        self.next_event = 0;
        self.phase = Phase::Idle;
    }

    /// Advances the envelope by one sample and returns its amplitude.
    pub fn next(&mut self) -> u8 {
        if self.next_event != 0 {
            if self.next_event != u32::MAX {
                self.next_event -= 1;
            }
            return self.amplitude;
        }

        loop {
            match self.phase {
                Phase::Idle => {
                    if !self.def.is_configured() {
                        return 0;
                    }
                    self.phase = if self.def.delay_time != 0 {
                        Phase::DelayInit
                    } else {
                        Phase::DelayExpire
                    };
                }
                Phase::DelayInit => {
                    self.amplitude = 0;
                    self.next_event = num_samples(self.def.time_scale, self.def.delay_time);
                    self.phase = Phase::DelayExpire;
                    return self.amplitude;
                }
                Phase::DelayExpire => {
                    self.phase = if self.def.attack_time != 0 {
                        Phase::AttackInit
                    } else {
                        Phase::AttackExpire
                    };
                }
                Phase::AttackInit => {
                    self.time_step =
                        ((self.def.attack_time as u32 * self.def.time_scale) >> 4) as u16;
                    self.counter = 16;
                    self.next_event = self.time_step as u32;
                    self.phase = Phase::Attack;
                }
                Phase::Attack => {
                    if self.counter != 0 {
                        let lin_amp =
                            (16 - self.counter as u16) * self.def.peak_amp as u16 >> LIN_AMP_FACTOR;
                        let exp_amp = exp_shift(self.def.peak_amp, self.counter);
                        self.amplitude = (lin_amp + exp_amp as u16) as u8;
                        self.counter -= 1;
                        self.next_event = self.time_step as u32;
                        return self.amplitude;
                    } else {
                        self.phase = Phase::AttackExpire;
                    }
                }
                Phase::AttackExpire => {
                    self.phase = if self.def.decay_time != 0 {
                        Phase::DecayInit
                    } else {
                        Phase::DecayExpire
                    };
                }
                Phase::DecayInit => {
                    self.amplitude = self.def.peak_amp;
                    self.time_step =
                        ((self.def.decay_time as u32 * self.def.time_scale) >> 4) as u16;
                    self.counter = 16;
                    self.next_event = self.time_step as u32;
                    self.phase = Phase::Decay;
                }
                Phase::Decay => {
                    if self.counter != 0 {
                        let mut delta = (self.def.peak_amp as u16)
                            .saturating_sub(self.def.sustain_amp as u16)
                            * self.counter as u16;
                        delta >>= 4;
                        self.amplitude = self.def.sustain_amp.wrapping_add(delta as u8);
                        self.next_event = self.time_step as u32;
                        self.counter -= 1;
                        return self.amplitude;
                    } else {
                        self.phase = Phase::DecayExpire;
                    }
                }
                Phase::DecayExpire => {
                    self.phase = if self.def.sustain_time != 0 {
                        Phase::SustainInit
                    } else {
                        Phase::SustainExpire
                    };
                }
                Phase::SustainInit => {
                    self.amplitude = self.def.sustain_amp;
                    self.next_event = num_samples(self.def.time_scale, self.def.sustain_time);
                    self.phase = Phase::SustainExpire;
                    return self.amplitude;
                }
                Phase::SustainExpire => {
                    self.phase = if self.def.release_time != 0 {
                        Phase::ReleaseInit
                    } else {
                        Phase::ReleaseExpire
                    };
                }
                Phase::ReleaseInit => {
                    self.time_step =
                        ((self.def.release_time as u32 * self.def.time_scale) >> 4) as u16;
                    self.counter = 16;
                    self.next_event = self.time_step as u32;
                    self.phase = Phase::Release;
                }
                Phase::Release => {
                    if self.counter != 0 {
                        let lin_amp =
                            self.counter as u16 * self.def.sustain_amp as u16 >> LIN_AMP_FACTOR;
                        let exp_amp = exp_shift(self.def.sustain_amp, 16 - self.counter);
                        self.amplitude = (lin_amp + exp_amp as u16) as u8;
                        self.counter -= 1;
                        self.next_event = self.time_step as u32;
                        return self.amplitude;
                    } else {
                        self.phase = Phase::ReleaseExpire;
                    }
                }
                Phase::ReleaseExpire => {
                    self.phase = Phase::Done;
                    self.amplitude = 0;
                }
                Phase::Done => return self.amplitude,
            }
        }
    }

    /// True once the release tail has fully decayed.
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// True before the first call to [`next`](Self::next) after configure.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// True if parked indefinitely in delay or sustain, awaiting
    /// [`continue_`](Self::continue_).
    pub fn is_waiting(&self) -> bool {
        self.next_event == u32::MAX
            && matches!(self.phase, Phase::DelayExpire | Phase::SustainExpire)
    }

    /// Releases an indefinite delay/sustain hold, letting the envelope
    /// proceed to the next phase on the following [`next`](Self::next) call.
    pub fn continue_(&mut self) {
        self.next_event = 0;
    }
}

fn num_samples(scale: u32, units: u8) -> u32 {
    if units != INFINITE {
        scale.saturating_mul(units as u32)
    } else {
        u32::MAX
    }
}

/// Exponential segment of the attack/release ramp; halves `amp` per
/// remaining step, floored to zero past the eighth halving.
fn exp_shift(amp: u8, count: u8) -> u8 {
    if count >= 8 {
        0
    } else {
        (amp as u16 >> (count + 1)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_env(peak: u8, sustain: u8) -> EnvelopeDefinition {
        EnvelopeDefinition {
            time_scale: 1,
            delay_time: 0,
            attack_time: 0,
            decay_time: 0,
            sustain_time: 0,
            release_time: 0,
            peak_amp: peak,
            sustain_amp: sustain,
        }
    }

    #[test]
    fn unconfigured_envelope_is_silent() {
        let mut env = EnvelopeState::new();
        assert_eq!(env.next(), 0);
        assert!(env.is_idle());
    }

    #[test]
    fn zero_time_envelope_reaches_done_quickly() {
        let mut env = EnvelopeState::new();
        env.configure(instant_env(100, 50));
        // delay/attack/decay/sustain/release all zero-length: should
        // reach Done within a handful of calls without panicking.
        let mut done = false;
        for _ in 0..8 {
            env.next();
            if env.is_done() {
                done = true;
                break;
            }
        }
        assert!(done);
    }

    #[test]
    fn attack_ramps_up_to_peak() {
        let def = EnvelopeDefinition {
            time_scale: 10,
            delay_time: 0,
            attack_time: 4,
            decay_time: 0,
            sustain_time: INFINITE,
            release_time: 2,
            peak_amp: 200,
            sustain_amp: 0,
        };
        let mut env = EnvelopeState::new();
        env.configure(def);
        let mut last = 0u8;
        let mut saw_increase = false;
        for _ in 0..200 {
            let amp = env.next();
            if amp > last {
                saw_increase = true;
            }
            last = amp;
            if env.is_waiting() {
                break;
            }
        }
        assert!(saw_increase);
    }

    #[test]
    fn infinite_sustain_waits_for_continue() {
        let def = EnvelopeDefinition {
            time_scale: 5,
            delay_time: 0,
            attack_time: 1,
            decay_time: 1,
            sustain_time: INFINITE,
            release_time: 1,
            peak_amp: 100,
            sustain_amp: 40,
        };
        let mut env = EnvelopeState::new();
        env.configure(def);
        for _ in 0..100 {
            env.next();
            if env.is_waiting() {
                break;
            }
        }
        assert!(env.is_waiting());
        let held = env.next();
        assert_eq!(held, 40);
        assert!(env.is_waiting());

        env.continue_();
        // After continuing, the envelope should move past sustain into
        // release and eventually reach Done.
        let mut done = false;
        for _ in 0..200 {
            env.next();
            if env.is_done() {
                done = true;
                break;
            }
        }
        assert!(done);
    }

    #[test]
    fn reset_returns_to_idle_without_forgetting_definition() {
        let mut env = EnvelopeState::new();
        env.configure(instant_env(80, 0));
        for _ in 0..8 {
            env.next();
        }
        assert!(env.is_done());
        env.reset();
        assert!(env.is_idle());
        assert_eq!(env.next(), 0);
    }
}
