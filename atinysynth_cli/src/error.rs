//! Top-level CLI error type.
//!
//! One small enum wrapping each lower layer's error: `Debug`-derived
//! with a hand-written `Display`, not a `From`-chasing library-wide
//! error type.

use std::fmt;

use atinysynth_core::mml::MmlError;
use atinysynth_core::sequencer::StreamError;

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Mml(MmlError),
    Stream(StreamError),
    Wav(hound::Error),
    /// A token in the script referenced an argument that was missing,
    /// unparseable, or out of range.
    Token(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(e) => write!(f, "I/O error: {e}"),
            CliError::Mml(e) => write!(f, "MML parse error: {e}"),
            CliError::Stream(e) => write!(f, "sequencer stream error: {e}"),
            CliError::Wav(e) => write!(f, "WAV write error: {e}"),
            CliError::Token(msg) => write!(f, "script error: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<MmlError> for CliError {
    fn from(e: MmlError) -> Self {
        CliError::Mml(e)
    }
}

impl From<StreamError> for CliError {
    fn from(e: StreamError) -> Self {
        CliError::Stream(e)
    }
}

impl From<hound::Error> for CliError {
    fn from(e: hound::Error) -> Self {
        CliError::Wav(e)
    }
}
