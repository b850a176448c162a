//! Music Macro Language compiler: turns a textual score into a
//! [`FrameMap`](crate::sequencer::FrameMap) the sequencer can compile
//! or feed.
//!
//! Ported from `mml.c`. The C version kept per-channel parser
//! state (`mml_channel_states`) and the frame map being built
//! (`frame_map`) as file-scope statics, grown with `realloc` as new
//! channel letters were first seen; [`MmlCompiler::compile`] keeps both
//! as locals of one parse, so compiling two scores back to back never
//! leaks state between them.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::envelope::EnvelopeDefinition;
use crate::sequencer::{FrameMap, SequencerFrame};
use crate::waveform::{WaveformDefinition, WaveformMode};

const ARTICULATION_STACCATO: f64 = 3.0 / 4.0;
const ARTICULATION_NORMAL: f64 = 7.0 / 8.0;
const ARTICULATION_LEGATO: f64 = 1.0;

/// A parse error, with the 1-based line and column it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmlError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for MmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl core::error::Error for MmlError {}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    octave: u8,
    default_length: i32,
    default_length_dot: u32,
    tempo: i32,
    volume: i32,
    articulation: f64,
    waveform: WaveformMode,
    is_active: bool,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            octave: 4,
            default_length: 4,
            default_length_dot: 0,
            tempo: 120,
            volume: 63,
            articulation: ARTICULATION_NORMAL,
            waveform: WaveformMode::Square,
            is_active: false,
        }
    }
}

/// Compiles MML source into a [`FrameMap`] at a fixed sample rate.
///
/// The sample rate must match whatever [`crate::sequencer::compile`]
/// and the eventual player will use, since note durations are
/// expressed in samples (§4.6).
pub struct MmlCompiler {
    sample_rate: u32,
}

impl MmlCompiler {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn compile(&self, source: &str) -> Result<FrameMap, MmlError> {
        Parser::new(source, self.sample_rate).run()
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    idx: usize,
    line: u32,
    col: u32,
    sample_rate: u32,
    channels: Vec<ChannelState>,
    frame_map: FrameMap,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, sample_rate: u32) -> Self {
        Self {
            bytes: source.as_bytes(),
            idx: 0,
            line: 1,
            col: 0,
            sample_rate,
            channels: Vec::new(),
            frame_map: FrameMap::new(0),
        }
    }

    fn err(&self, message: impl Into<String>) -> MmlError {
        MmlError {
            message: message.into(),
            line: self.line,
            column: self.col,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.idx).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.idx += 1;
        self.col += 1;
        Some(b)
    }

    fn enable_channel(&mut self, channel: usize) {
        if channel >= self.channels.len() {
            self.channels.resize_with(channel + 1, ChannelState::new);
        }
        self.channels[channel].is_active = true;
    }

    /// By default, a line with no leading channel selector addresses
    /// channel A only.
    fn reset_active_state(&mut self) {
        for ch in self.channels.iter_mut().skip(1) {
            ch.is_active = false;
        }
        self.enable_channel(0);
    }

    fn read_number(&mut self) -> Option<i32> {
        let start = self.idx;
        if self.peek().map(|b| b.is_ascii_digit()) != Some(true) {
            return None;
        }
        while self.peek().map(|b| b.is_ascii_digit()) == Some(true) {
            self.advance();
        }
        let parsed = core::str::from_utf8(&self.bytes[start..self.idx])
            .ok()
            .and_then(|s| s.parse::<i32>().ok());
        if parsed == Some(0) {
            // Matches `strtol` returning 0 for "no digits consumed"; a
            // literal "0" length/tempo/etc. is rejected the same way
            // the original's `!ret` check rejects it.
            None
        } else {
            parsed
        }
    }

    /// Like [`read_number`](Self::read_number) but accepts a literal
    /// `0`, for the one place zero is meaningful: note code `0` is a
    /// pause.
    fn read_number_allow_zero(&mut self) -> Option<i32> {
        let start = self.idx;
        if self.peek().map(|b| b.is_ascii_digit()) != Some(true) {
            return None;
        }
        while self.peek().map(|b| b.is_ascii_digit()) == Some(true) {
            self.advance();
        }
        core::str::from_utf8(&self.bytes[start..self.idx])
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
    }

    fn run(mut self) -> Result<FrameMap, MmlError> {
        self.reset_active_state();

        loop {
            self.col += 1;
            let Some(code) = self.advance_raw() else {
                break;
            };

            if code <= b' ' || code == b'|' {
                if code == b'\n' {
                    self.line += 1;
                    self.reset_active_state();
                    self.col = 0;
                }
                continue;
            }

            if code == b'#' || code == b';' {
                while self.peek().is_some() && self.peek() != Some(b'\n') {
                    self.idx += 1;
                }
                self.idx += 1;
                self.line += 1;
                self.reset_active_state();
                self.col = 0;
                continue;
            }

            if code.is_ascii_uppercase() {
                if self.col == 1 {
                    self.channels[0].is_active = false;
                    self.enable_channel((code - b'A') as usize);
                    while self.peek().map(|b| b.is_ascii_uppercase()) == Some(true) {
                        let c = self.advance().unwrap();
                        self.enable_channel((c - b'A') as usize);
                    }
                    continue;
                } else {
                    return Err(self.err("Misplaced channel selector"));
                }
            }

            self.dispatch(code)?;
        }

        Ok(self.frame_map)
    }

    /// Reads the raw next byte, bumping the index but not treating it
    /// as already having incremented `col` (the caller does that).
    fn advance_raw(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.idx += 1;
        Some(b)
    }

    fn dispatch(&mut self, code: u8) -> Result<(), MmlError> {
        match code {
            b'o' => self.cmd_octave(),
            b'l' => self.cmd_default_length(),
            b't' => self.cmd_tempo(),
            b'v' => self.cmd_volume(),
            b'<' => self.cmd_octave_down(),
            b'>' => self.cmd_octave_up(),
            b'm' => self.cmd_articulation(),
            b'w' => self.cmd_waveform(),
            b'p' | b'r' => self.cmd_note(code, true, false),
            b'n' => self.cmd_note(code, false, true),
            b'a'..=b'g' => self.cmd_note(code, false, false),
            _ => Err(self.err("Unknown command")),
        }
    }

    fn cmd_octave(&mut self) -> Result<(), MmlError> {
        let digit = self.peek().filter(|b| b.is_ascii_digit());
        let octave = match digit {
            Some(d) => {
                self.advance();
                d - b'0'
            }
            None => return Err(self.err("Invalid octave")),
        };
        if octave > 6 {
            return Err(self.err("Invalid octave"));
        }
        for ch in self.channels.iter_mut().filter(|c| c.is_active) {
            ch.octave = octave;
        }
        Ok(())
    }

    fn cmd_default_length(&mut self) -> Result<(), MmlError> {
        let length = self.read_number().ok_or_else(|| self.err("Invalid length"))?;
        let mut dots = 0u32;
        while self.peek() == Some(b'.') {
            dots += 1;
            self.advance();
        }
        for ch in self.channels.iter_mut().filter(|c| c.is_active) {
            ch.default_length = length;
            ch.default_length_dot = dots;
        }
        Ok(())
    }

    fn cmd_tempo(&mut self) -> Result<(), MmlError> {
        let tempo = self.read_number().ok_or_else(|| self.err("Invalid tempo"))?;
        for ch in self.channels.iter_mut().filter(|c| c.is_active) {
            ch.tempo = tempo;
        }
        Ok(())
    }

    fn cmd_volume(&mut self) -> Result<(), MmlError> {
        let volume = self
            .read_number()
            .ok_or_else(|| self.err("Invalid volume"))?;
        if !(0..=128).contains(&volume) {
            return Err(self.err("Invalid volume"));
        }
        for ch in self.channels.iter_mut().filter(|c| c.is_active) {
            ch.volume = volume;
        }
        Ok(())
    }

    fn cmd_octave_down(&mut self) -> Result<(), MmlError> {
        for idx in 0..self.channels.len() {
            if self.channels[idx].is_active {
                if self.channels[idx].octave == 0 {
                    return Err(self.err("Invalid octave step down"));
                }
                self.channels[idx].octave -= 1;
            }
        }
        Ok(())
    }

    fn cmd_octave_up(&mut self) -> Result<(), MmlError> {
        for idx in 0..self.channels.len() {
            if self.channels[idx].is_active {
                if self.channels[idx].octave == 9 {
                    return Err(self.err("Invalid octave step up"));
                }
                self.channels[idx].octave += 1;
            }
        }
        Ok(())
    }

    fn cmd_articulation(&mut self) -> Result<(), MmlError> {
        let articulation = match self.peek() {
            Some(b'l') => ARTICULATION_LEGATO,
            Some(b'n') => ARTICULATION_NORMAL,
            Some(b's') => ARTICULATION_STACCATO,
            _ => return Err(self.err("Invalid music articulation")),
        };
        self.advance();
        for ch in self.channels.iter_mut().filter(|c| c.is_active) {
            ch.articulation = articulation;
        }
        Ok(())
    }

    fn cmd_waveform(&mut self) -> Result<(), MmlError> {
        let waveform = match self.peek() {
            Some(b's') => WaveformMode::Square,
            Some(b'w') => WaveformMode::Sawtooth,
            Some(b't') => WaveformMode::Triangle,
            _ => return Err(self.err("Invalid waveform")),
        };
        self.advance();
        for ch in self.channels.iter_mut().filter(|c| c.is_active) {
            ch.waveform = waveform;
        }
        Ok(())
    }

    fn cmd_note(&mut self, mut code: u8, is_pause: bool, is_note_code: bool) -> Result<(), MmlError> {
        let mut length: i32 = -1;
        let mut dots = 0u32;
        let mut sharp = false;
        let mut has_custom_length = false;
        let mut note_code: Option<i32> = None;

        loop {
            let Some(next) = self.peek() else { break };

            if !is_pause && !is_note_code && matches!(next, b'-' | b'+' | b'#') {
                if next == b'-' {
                    code -= 1;
                }
                if code == b'e' || code == b'b' {
                    return Err(self.err("Invalid sharp"));
                }
                sharp = true;
                self.advance();
                continue;
            }

            if next.is_ascii_digit() {
                if is_note_code {
                    if note_code.is_some() {
                        return Err(self.err("Invalid note code"));
                    }
                    let n = self
                        .read_number_allow_zero()
                        .ok_or_else(|| self.err("Invalid note code"))?;
                    if !(0..=84).contains(&n) {
                        return Err(self.err("Invalid note code"));
                    }
                    note_code = Some(n);
                } else {
                    if has_custom_length {
                        return Err(self.err("Invalid length"));
                    }
                    length = self.read_number().ok_or_else(|| self.err("Invalid length"))?;
                    has_custom_length = true;
                }
                continue;
            }

            if next == b'.' {
                dots += 1;
                self.advance();
                continue;
            }

            break;
        }

        for idx in 0..self.channels.len() {
            if !self.channels[idx].is_active {
                continue;
            }
            let ch = self.channels[idx];

            let mut pause = is_pause;
            if is_note_code && note_code == Some(0) {
                pause = true;
            }

            let frequency = if pause {
                0
            } else if is_note_code {
                freq_from_code(note_code.unwrap_or(0))
            } else {
                freq_from_note(code, sharp, ch.octave)
            };

            let (use_length, use_dots) = if length < 0 {
                (ch.default_length, if dots == 0 { ch.default_length_dot } else { dots })
            } else {
                (length, dots)
            };
            let duration = duration_in_samples(self.sample_rate, ch.tempo, use_length, use_dots);

            let frame = build_frame(frequency, duration, ch.volume, ch.articulation, ch.waveform, self.sample_rate);
            self.frame_map.push_frame(idx, frame);
        }

        Ok(())
    }
}

/// Converts a 0-84 scale-degree code to a frequency in Hz. 0 is C at
/// octave 0; note 33 is A440 (octave 2, fourth-octave scientific pitch).
fn freq_from_code(note_code: i32) -> i32 {
    (440.0 * libm_pow2((note_code - 33) as f64 / 12.0)) as i32
}

/// Converts an `a`-`g` note letter (plus sharp flag and octave) to Hz.
fn freq_from_note(note: u8, sharp: bool, octave: u8) -> i32 {
    let mut semitone = (((note as i32 - b'a' as i32 + 5) % 7) * 2) as i32;
    if semitone > 4 {
        semitone -= 1;
    }
    if sharp {
        semitone += 1;
    }
    freq_from_code(semitone + octave as i32 * 12)
}

/// `2^x` without requiring `std`'s `f64::powf`.
fn libm_pow2(x: f64) -> f64 {
    exp2_via_exp(x)
}

fn exp2_via_exp(x: f64) -> f64 {
    // 2^x = e^(x * ln 2); `core` has no transcendental functions, so we
    // implement exp via its Taylor series, good enough precision for
    // the handful of octaves MML notes span.
    const LN2: f64 = core::f64::consts::LN_2;
    exp_taylor(x * LN2)
}

fn exp_taylor(x: f64) -> f64 {
    // Range-reduce to keep the series accurate, then square back up.
    let mut reductions = 0u32;
    let mut y = x;
    while y.abs() > 0.5 {
        y /= 2.0;
        reductions += 1;
    }
    let mut term = 1.0;
    let mut sum = 1.0;
    for n in 1..20 {
        term *= y / n as f64;
        sum += term;
    }
    for _ in 0..reductions {
        sum *= sum;
    }
    sum
}

/// Duration in samples for `length` (fraction of a whole note, e.g. 4
/// = quarter note) at `tempo` quarter-notes-per-minute, with `dots`
/// dotted-note extensions (each dot multiplies duration by 1.5).
fn duration_in_samples(sample_rate: u32, tempo: i32, length: i32, dots: u32) -> u32 {
    let mut l = length as f64;
    for _ in 0..dots {
        l /= 1.5;
    }
    ((sample_rate as f64) * 60.0 * 4.0 / tempo as f64 / l) as u32
}

/// Builds one sequencer frame for a note/pause, using the fixed
/// envelope shape and duration-derived time scale the original used
/// for every MML-sourced note (§4.6).
fn build_frame(
    frequency: i32,
    duration: u32,
    volume: i32,
    articulation: f64,
    waveform: WaveformMode,
    sample_rate: u32,
) -> SequencerFrame {
    let waveform_def = if frequency == 0 {
        WaveformDefinition::dc(0)
    } else {
        let amplitude = volume.clamp(0, i8::MAX as i32) as i8;
        WaveformDefinition::periodic(waveform, sample_rate, frequency.max(0) as u16, amplitude)
    };

    let delay_time = 0u8;
    let attack_time = 12u8;
    let decay_time = 12u8;
    let peak_amp = 63u8;
    let sustain_amp = 40u8;
    let release_time = (128.0 * (1.0 - articulation)) as u8;
    let sustain_time = 128u8
        .saturating_sub(delay_time)
        .saturating_sub(attack_time)
        .saturating_sub(decay_time)
        .saturating_sub(release_time);
    let time_scale = duration / 128;

    SequencerFrame {
        envelope: EnvelopeDefinition {
            time_scale,
            delay_time,
            attack_time,
            decay_time,
            sustain_time,
            release_time,
            peak_amp,
            sustain_amp,
        },
        waveform: waveform_def,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_note_produces_one_frame_on_channel_a() {
        let compiler = MmlCompiler::new(8000);
        let map = compiler.compile("c").unwrap();
        assert_eq!(map.channel_count(), 1);
    }

    #[test]
    fn channel_selector_routes_to_named_channels() {
        let compiler = MmlCompiler::new(8000);
        let map = compiler.compile("AB c d").unwrap();
        assert_eq!(map.channel_count(), 2);
    }

    #[test]
    fn misplaced_channel_selector_errors() {
        let compiler = MmlCompiler::new(8000);
        let err = compiler.compile("cA").unwrap_err();
        assert_eq!(err.message, "Misplaced channel selector");
    }

    #[test]
    fn octave_above_six_errors() {
        let compiler = MmlCompiler::new(8000);
        let err = compiler.compile("o7").unwrap_err();
        assert_eq!(err.message, "Invalid octave");
    }

    #[test]
    fn octave_down_below_zero_errors() {
        let compiler = MmlCompiler::new(8000);
        let err = compiler.compile("o0<").unwrap_err();
        assert_eq!(err.message, "Invalid octave step down");
    }

    #[test]
    fn sharp_on_e_or_b_errors() {
        let compiler = MmlCompiler::new(8000);
        assert!(compiler.compile("e+").is_err());
        assert!(compiler.compile("b+").is_err());
        assert!(compiler.compile("b#").is_err());
    }

    #[test]
    fn flat_landing_on_e_or_b_errors() {
        let compiler = MmlCompiler::new(8000);
        // 'c' flattened steps back to 'b'; 'f' flattened steps back to 'e'.
        assert!(compiler.compile("c-").is_err());
        assert!(compiler.compile("f-").is_err());
    }

    #[test]
    fn flat_not_landing_on_e_or_b_is_accepted() {
        let compiler = MmlCompiler::new(8000);
        // 'b' flattened steps to 'a', which is not a restricted letter.
        assert!(compiler.compile("b-").is_ok());
    }

    #[test]
    fn pause_produces_dc_zero_frame() {
        let compiler = MmlCompiler::new(8000);
        let map = compiler.compile("r4").unwrap();
        assert_eq!(map.channel_count(), 1);
    }

    #[test]
    fn comment_line_is_skipped() {
        let compiler = MmlCompiler::new(8000);
        let map = compiler.compile("; a comment\nc").unwrap();
        assert_eq!(map.channel_count(), 1);
    }

    #[test]
    fn unknown_command_errors_with_position() {
        let compiler = MmlCompiler::new(8000);
        let err = compiler.compile("z").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
