//! Live playback sink: a ring buffer shared with a `cpal` output
//! callback via `Arc<Mutex<_>>`, resampled from the synth's fixed rate
//! to whatever the device wants. Mono, since the synth emits one
//! channel.

use std::sync::{Arc, Mutex};

use atinysynth_core::sink::Sink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use log::{error, info};

struct SampleBuffer {
    inner: Box<[f32]>,
    write_index: usize,
    read_index: usize,
    count: usize,
}

impl SampleBuffer {
    fn push(&mut self, value: f32) {
        self.inner[self.write_index] = value;
        self.write_index += 1;
        if self.write_index >= self.inner.len() {
            self.write_index = 0;
        }
        self.count += 1;
        if self.count > self.inner.len() {
            self.count = self.inner.len();
        }
    }
}

impl Iterator for SampleBuffer {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        let ret = self.inner[self.read_index];
        self.read_index += 1;
        if self.read_index >= self.inner.len() {
            self.read_index = 0;
        }
        self.count -= 1;
        Some(ret)
    }
}

pub struct AudioDriverSink {
    buffer: Arc<Mutex<SampleBuffer>>,
}

impl Sink<i8> for AudioDriverSink {
    fn append(&mut self, value: i8) {
        let mut buf = self.buffer.lock().unwrap();
        buf.push(value as f32 / 128.0);
    }
}

pub struct AudioDriver {
    buffer: Arc<Mutex<SampleBuffer>>,
    _stream: cpal::Stream,
}

impl AudioDriver {
    pub fn new(sample_rate: u32, latency_ms: u32) -> Self {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .expect("No audio output device available.");

        let supported_configs_range = device
            .supported_output_configs()
            .expect("error while querying configs");

        let best_config = supported_configs_range
            .max_by(|x, y| x.cmp_default_heuristics(y))
            .expect("No supported output configs for device.")
            .with_sample_rate(cpal::SampleRate(48_000));

        let err_fn = |err| error!("An error occurred on the output audio stream: {}", err);
        let sample_format = best_config.sample_format();
        let buffer_samples = (sample_rate * latency_ms / 1000).max(1) as usize;
        info!("Sound:");
        info!("\tDevice: {:?}", device.name().unwrap());
        info!("\tDevice sample format: {:?}", sample_format);
        info!("\tDevice sample rate: {:?}", best_config.sample_rate().0);
        info!("\tDevice channels: {:?}", best_config.channels());

        let config = best_config.config();
        let channels = config.channels as usize;
        let audio_buffer = Arc::new(Mutex::new(SampleBuffer {
            inner: vec![0.0; buffer_samples].into_boxed_slice(),
            count: 0,
            write_index: 0,
            read_index: 0,
        }));

        let mut resampler = LinearResampler::new(sample_rate, config.sample_rate.0);
        let read_audio_buffer = audio_buffer.clone();

        macro_rules! build_stream {
            ($sample_ty:ty) => {
                device.build_output_stream(
                    &config,
                    move |data: &mut [$sample_ty], _: &cpal::OutputCallbackInfo| {
                        let mut buffer = read_audio_buffer.lock().unwrap();
                        for frame in data.chunks_mut(channels) {
                            let s = resampler.next(&mut *buffer);
                            for sample in frame.iter_mut() {
                                *sample = Sample::from(&s);
                            }
                        }
                    },
                    err_fn,
                )
            };
        }

        let stream = match sample_format {
            SampleFormat::F32 => build_stream!(f32),
            SampleFormat::I16 => build_stream!(i16),
            SampleFormat::U16 => build_stream!(u16),
        }
        .unwrap();

        stream.play().unwrap();

        AudioDriver {
            buffer: audio_buffer,
            _stream: stream,
        }
    }

    pub fn sink(&self) -> AudioDriverSink {
        AudioDriverSink {
            buffer: self.buffer.clone(),
        }
    }
}

/// Linear-interpolating resampler, using a gcd-based step derivation
/// between the source and sink rates.
struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    current_from: f32,
    next_from: f32,
    from_fractional_pos: u32,
}

impl LinearResampler {
    fn new(from_sample_rate: u32, to_sample_rate: u32) -> Self {
        fn gcd(a: u32, b: u32) -> u32 {
            if b == 0 {
                a
            } else {
                gcd(b, a % b)
            }
        }
        let g = gcd(from_sample_rate, to_sample_rate).max(1);
        LinearResampler {
            from_rate: from_sample_rate / g,
            to_rate: to_sample_rate / g,
            current_from: 0.0,
            next_from: 0.0,
            from_fractional_pos: 0,
        }
    }

    fn next(&mut self, input: &mut dyn Iterator<Item = f32>) -> f32 {
        fn interpolate(a: f32, b: f32, num: u32, denom: u32) -> f32 {
            (a * ((denom - num) as f32) + b * (num as f32)) / (denom as f32)
        }
        let ret = interpolate(
            self.current_from,
            self.next_from,
            self.from_fractional_pos,
            self.to_rate,
        );

        self.from_fractional_pos += self.from_rate;
        while self.from_fractional_pos > self.to_rate {
            self.from_fractional_pos -= self.to_rate;
            self.current_from = self.next_from;
            self.next_from = input.next().unwrap_or(0.0);
        }
        ret
    }
}
