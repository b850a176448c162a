//! Host driver for `atinysynth_core`: a token-language synth console,
//! ported from `ports/pc/main.c`. Where that port wrote raw 16-bit PCM
//! to `out.raw` and pushed it to `libao`, this one writes a proper WAV
//! file (`hound`) and/or plays live through `cpal`.

mod audio_driver;
mod error;
mod tokens;
mod wav;

use std::fs;
use std::time::Duration;

use atinysynth_core::sink::Sink;
use clap::{App, Arg};
use log::info;

use error::CliError;
use tokens::Interpreter;

/// Sample rate the original PC port hard-coded as `synth_freq`.
const DEFAULT_SAMPLE_RATE: u32 = 32_000;

/// Fans one sample out to every active output sink.
struct MultiSink {
    sinks: Vec<Box<dyn Sink<i8>>>,
}

impl Sink<i8> for MultiSink {
    fn append(&mut self, value: i8) {
        for sink in &mut self.sinks {
            sink.append(value);
        }
    }
}

/// Wraps a sink to count how many samples passed through it, so the CLI
/// knows how long to keep the process alive after the interpreter has
/// finished queuing samples into a live audio buffer.
struct CountingSink<S> {
    inner: S,
    count: u64,
}

impl<S: Sink<i8>> Sink<i8> for CountingSink<S> {
    fn append(&mut self, value: i8) {
        self.inner.append(value);
        self.count += 1;
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("atinysynth: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let matches = App::new("atinysynth")
        .version("0.1")
        .about("Polyphonic fixed-point synthesizer console")
        .arg(
            Arg::with_name("rate")
                .long("rate")
                .value_name("HZ")
                .help("Sample rate in Hz")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("wav")
                .long("wav")
                .value_name("FILE")
                .help("Capture output to a WAV file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("play")
                .long("play")
                .help("Play output live through the default audio device"),
        )
        .arg(
            Arg::with_name("script")
                .short("s")
                .long("script")
                .value_name("FILE")
                .help("Read console tokens from a file instead of the command line")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("TOKENS")
                .help("Console tokens, e.g. voice 0 square 440 100 en 1 next 32000 end")
                .multiple(true)
                .allow_hyphen_values(true),
        )
        .get_matches();

    let sample_rate = matches
        .value_of("rate")
        .map(|v| v.parse::<u32>().map_err(|_| CliError::Token(format!("invalid --rate {v:?}"))))
        .transpose()?
        .unwrap_or(DEFAULT_SAMPLE_RATE);

    let tokens: Vec<String> = if let Some(path) = matches.value_of("script") {
        let content = fs::read_to_string(path)?;
        content.split_whitespace().map(String::from).collect()
    } else {
        matches
            .values_of("TOKENS")
            .map(|v| v.map(String::from).collect())
            .unwrap_or_default()
    };

    let mut sinks: Vec<Box<dyn Sink<i8>>> = Vec::new();
    let mut wav_sink = None;
    if let Some(path) = matches.value_of("wav") {
        info!("capturing to {path}");
        wav_sink = Some(wav::WavSink::create(path, sample_rate)?);
    }

    let _audio_driver;
    if matches.is_present("play") {
        info!("opening live audio output");
        _audio_driver = audio_driver::AudioDriver::new(sample_rate, 100);
        sinks.push(Box::new(_audio_driver.sink()));
    }

    let playing_live = matches.is_present("play");
    let mut interp = Interpreter::new(sample_rate);
    let samples_rendered = if let Some(mut wav) = wav_sink.take() {
        // The WAV writer owns the file handle, so it has to outlive the
        // run; collect into it directly rather than via `MultiSink` and
        // hand off the live-audio sinks (if any) alongside.
        struct Both<'a> {
            wav: &'a mut wav::WavSink,
            rest: &'a mut MultiSink,
        }
        impl Sink<i8> for Both<'_> {
            fn append(&mut self, value: i8) {
                self.wav.append(value);
                self.rest.append(value);
            }
        }
        let mut rest = MultiSink { sinks };
        let both = Both {
            wav: &mut wav,
            rest: &mut rest,
        };
        let mut counting = CountingSink { inner: both, count: 0 };
        interp.run(&tokens, &mut counting)?;
        wav.finalize()?;
        counting.count
    } else {
        let multi = MultiSink { sinks };
        let mut counting = CountingSink { inner: multi, count: 0 };
        interp.run(&tokens, &mut counting)?;
        counting.count
    };

    // The interpreter queues samples into the live ring buffer far faster
    // than real time; keep the process (and its `cpal` stream) alive long
    // enough for the consumer callback to actually drain them instead of
    // exiting the instant rendering finishes.
    if playing_live {
        let playback_secs = samples_rendered as f64 / sample_rate as f64;
        spin_sleep::sleep(Duration::from_secs_f64(playback_secs + 0.2));
    }

    Ok(())
}
