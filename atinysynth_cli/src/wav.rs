//! WAV file capture sink, grounded in `hound`'s `WavWriter` usage shown
//! in the pack's `emu-c64/src/capture.rs`.

use std::path::Path;

use atinysynth_core::sink::Sink;
use hound::{SampleFormat, WavSpec, WavWriter};

pub struct WavSink {
    writer: WavWriter<std::io::BufWriter<std::fs::File>>,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer })
    }

    pub fn finalize(self) -> Result<(), hound::Error> {
        self.writer.finalize()
    }
}

impl Sink<i8> for WavSink {
    fn append(&mut self, value: i8) {
        // 8-bit WAV PCM is conventionally unsigned with a 128 bias.
        let unsigned = (value as i16 + 128) as u8;
        if let Err(e) = self.writer.write_sample(unsigned) {
            log::error!("failed to write WAV sample: {e}");
        }
    }
}
