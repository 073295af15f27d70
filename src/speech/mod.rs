//! Speech module wrapping platform recognition and synthesis engines
//!
//! The adapters here own the engine handles and turn raw engine callbacks
//! into the discrete events the session coordinator consumes.

mod bridge;
mod capture;
mod command;
mod playback;
#[cfg(test)]
pub mod testing;

use thiserror::Error;

pub use bridge::{BridgeHandle, BridgeRecognizer};
pub use capture::{
    CaptureError, CaptureEvent, RecognitionEngine, RecognitionEvent, RecognitionSettings,
    SpeechCapture, StartOutcome,
};
#[cfg(test)]
pub use capture::RecognitionResult;
pub use command::CommandSynthesizer;
pub use playback::{PlaybackEvent, SpeechPlayback, SynthesisEngine, SynthesisEvent, Utterance};

/// Errors reported by a platform engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refused or failed to start
    #[error("engine failed: {0}")]
    Failed(String),
}
