//! Token-language console, ported from `ports/pc/main.c`: a flat
//! command stream (from CLI args or a script file) that selects a
//! voice, configures its envelope/waveform piece by piece, flips the
//! enable/mute masks, and renders samples on demand.
//!
//! `compile-mml` and `sequencer` go beyond what the C port's token
//! language covered on its own, needed to actually exercise the
//! sequencer/MML modules from the command line.

use atinysynth_core::envelope::EnvelopeDefinition;
use atinysynth_core::mixer::PolySynth;
use atinysynth_core::mml::MmlCompiler;
use atinysynth_core::sequencer::{self, FrameMap, FrameSource, FrameStream, SequencerFrame, SequencerPlayer};
use atinysynth_core::sink::Sink;
use atinysynth_core::waveform::{WaveformDefinition, WaveformMode};

use crate::error::CliError;

/// Up to 16 simultaneous voices, matching `ports/pc/main.c`'s
/// `poly_voice[16]`.
const VOICE_COUNT: usize = 16;

struct OwnedFrameSource {
    frames: Vec<SequencerFrame>,
    idx: usize,
}

impl FrameSource for OwnedFrameSource {
    fn next_frame(&mut self) -> Option<SequencerFrame> {
        let frame = self.frames.get(self.idx).copied();
        if frame.is_some() {
            self.idx += 1;
        }
        frame
    }
}

struct SequencerSession {
    player: SequencerPlayer,
    source: OwnedFrameSource,
}

/// Interprets one script's worth of tokens against a live [`PolySynth`].
pub struct Interpreter {
    synth: PolySynth,
    sample_rate: u32,
    current_voice: usize,
    /// Envelope/waveform fields staged per voice by `dc`/`square`/`attack`/
    /// etc commands, applied to the synth only when `en` turns the bit on
    /// — mirroring the original writing struct fields directly and
    /// relying on a later mask write to take effect.
    staged: Vec<(EnvelopeDefinition, WaveformDefinition)>,
    sequencer: Option<SequencerSession>,
}

impl Interpreter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            synth: PolySynth::new(VOICE_COUNT),
            sample_rate,
            current_voice: 0,
            staged: vec![(EnvelopeDefinition::default(), WaveformDefinition::dc(0)); VOICE_COUNT],
            sequencer: None,
        }
    }

    /// Runs every token in `tokens` in order, rendering samples into
    /// `sink` whenever a `next` command asks for them. Stops early on
    /// `end`.
    pub fn run(&mut self, tokens: &[String], sink: &mut dyn Sink<i8>) -> Result<(), CliError> {
        let mut iter = tokens.iter();
        while let Some(tok) = iter.next() {
            match tok.as_str() {
                "end" => break,
                "voice" => self.current_voice = self.next_usize(&mut iter, "voice")?,
                "mute" => {
                    let mask = self.next_u32(&mut iter, "mute")?;
                    for i in 0..VOICE_COUNT {
                        self.synth.set_muted(i, (mask >> i) & 1 != 0);
                    }
                }
                "en" => {
                    let mask = self.next_u32(&mut iter, "en")?;
                    for i in 0..VOICE_COUNT {
                        let enable = (mask >> i) & 1 != 0;
                        if enable && !self.synth.is_enabled(i) {
                            let (env, wf) = self.staged[i];
                            self.synth.configure_voice(i, env, wf);
                        } else {
                            self.synth.set_enabled(i, enable);
                        }
                    }
                }
                "dc" => {
                    let amp = self.next_i8(&mut iter, "dc")?;
                    self.stage_waveform(WaveformDefinition::dc(amp));
                }
                "noise" => {
                    let amp = self.next_i8(&mut iter, "noise")?;
                    self.stage_waveform(WaveformDefinition::noise(amp, 0xACE1));
                }
                "square" => self.stage_periodic(&mut iter, WaveformMode::Square)?,
                "sawtooth" => self.stage_periodic(&mut iter, WaveformMode::Sawtooth)?,
                "triangle" => self.stage_periodic(&mut iter, WaveformMode::Triangle)?,
                "scale" => {
                    let v = self.next_u32(&mut iter, "scale")?;
                    self.staged[self.current_voice].0.time_scale = v;
                }
                "delay" => {
                    let v = self.next_u8(&mut iter, "delay")?;
                    self.staged[self.current_voice].0.delay_time = v;
                }
                "attack" => {
                    let v = self.next_u8(&mut iter, "attack")?;
                    self.staged[self.current_voice].0.attack_time = v;
                }
                "decay" => {
                    let v = self.next_u8(&mut iter, "decay")?;
                    self.staged[self.current_voice].0.decay_time = v;
                }
                "sustain" => {
                    let v = self.next_u8(&mut iter, "sustain")?;
                    self.staged[self.current_voice].0.sustain_time = v;
                }
                "release" => {
                    let v = self.next_u8(&mut iter, "release")?;
                    self.staged[self.current_voice].0.release_time = v;
                }
                "peak" => {
                    let v = self.next_u8(&mut iter, "peak")?;
                    self.staged[self.current_voice].0.peak_amp = v;
                }
                "samp" => {
                    let v = self.next_u8(&mut iter, "samp")?;
                    self.staged[self.current_voice].0.sustain_amp = v;
                }
                "reset" => {
                    self.staged[self.current_voice] =
                        (EnvelopeDefinition::default(), WaveformDefinition::dc(0));
                    self.synth.set_enabled(self.current_voice, false);
                }
                "compile-mml" => {
                    let path = self.next_string(&mut iter, "compile-mml")?;
                    self.load_mml(&path)?;
                }
                "sequencer" => {
                    let path = self.next_string(&mut iter, "sequencer")?;
                    self.load_sequencer_file(&path)?;
                }
                "next" => {
                    let n = self.next_usize(&mut iter, "next")?;
                    self.render(n, sink);
                }
                other => return Err(CliError::Token(format!("unknown command {other:?}"))),
            }
        }
        Ok(())
    }

    fn render(&mut self, n: usize, sink: &mut dyn Sink<i8>) {
        for _ in 0..n {
            if let Some(session) = &mut self.sequencer {
                session.player.feed(&mut self.synth, &mut session.source);
            }
            let sample = self.synth.next();
            sink.append(sample);
        }
    }

    fn stage_waveform(&mut self, wf: WaveformDefinition) {
        self.staged[self.current_voice].1 = wf;
    }

    fn stage_periodic(
        &mut self,
        iter: &mut core::slice::Iter<'_, String>,
        mode: WaveformMode,
    ) -> Result<(), CliError> {
        let freq = self.next_u16(iter, "frequency")?;
        let amp = self.next_i8(iter, "amplitude")?;
        let wf = WaveformDefinition::periodic(mode, self.sample_rate, freq, amp);
        self.stage_waveform(wf);
        Ok(())
    }

    fn load_mml(&mut self, path: &str) -> Result<(), CliError> {
        let content = std::fs::read_to_string(path)?;
        let map: FrameMap = MmlCompiler::new(self.sample_rate).compile(&content)?;
        let stream = sequencer::compile(&map, self.sample_rate);
        self.start_sequencer(stream)?;
        Ok(())
    }

    fn load_sequencer_file(&mut self, path: &str) -> Result<(), CliError> {
        let bytes = std::fs::read(path)?;
        let stream = FrameStream::from_bytes(&bytes)
            .ok_or_else(|| CliError::Token(format!("malformed sequencer stream in {path}")))?;
        self.start_sequencer(stream)?;
        Ok(())
    }

    fn start_sequencer(&mut self, stream: FrameStream) -> Result<(), CliError> {
        let player = SequencerPlayer::load_header(stream.header, self.sample_rate, &mut self.synth)?;
        self.sequencer = Some(SequencerSession {
            player,
            source: OwnedFrameSource {
                frames: stream.frames,
                idx: 0,
            },
        });
        Ok(())
    }

    fn next_string(&self, iter: &mut core::slice::Iter<'_, String>, cmd: &str) -> Result<String, CliError> {
        iter.next()
            .cloned()
            .ok_or_else(|| CliError::Token(format!("{cmd} expects an argument")))
    }

    fn next_usize(&self, iter: &mut core::slice::Iter<'_, String>, cmd: &str) -> Result<usize, CliError> {
        self.next_parsed(iter, cmd)
    }
    fn next_u32(&self, iter: &mut core::slice::Iter<'_, String>, cmd: &str) -> Result<u32, CliError> {
        self.next_parsed(iter, cmd)
    }
    fn next_u16(&self, iter: &mut core::slice::Iter<'_, String>, cmd: &str) -> Result<u16, CliError> {
        self.next_parsed(iter, cmd)
    }
    fn next_u8(&self, iter: &mut core::slice::Iter<'_, String>, cmd: &str) -> Result<u8, CliError> {
        self.next_parsed(iter, cmd)
    }
    fn next_i8(&self, iter: &mut core::slice::Iter<'_, String>, cmd: &str) -> Result<i8, CliError> {
        self.next_parsed(iter, cmd)
    }

    fn next_parsed<T: core::str::FromStr>(
        &self,
        iter: &mut core::slice::Iter<'_, String>,
        cmd: &str,
    ) -> Result<T, CliError> {
        let raw = iter
            .next()
            .ok_or_else(|| CliError::Token(format!("{cmd} expects an argument")))?;
        raw.parse::<T>()
            .map_err(|_| CliError::Token(format!("{cmd} argument {raw:?} is not a valid number")))
    }
}
