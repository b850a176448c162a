//! Output sinks: decouples sample production from whatever the host
//! does with the samples (playback, capture to disk, test assertions).

/// A sink that accepts owned values.
pub trait Sink<T> {
    fn append(&mut self, value: T);
}

/// A sink that accepts values by reference, for unsized types like `[T]`.
pub trait SinkRef<T: ?Sized> {
    fn append(&mut self, value: &T);
}

/// One mixed-down synthesizer sample: signed 8-bit PCM, mono.
pub type PcmFrame = i8;
