//! Speech playback adapter
//!
//! At most one utterance plays at a time. A new utterance cancels the one
//! in progress, and only the latest utterance's completion is reported.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::EngineError;

/// Text handed to the synthesis engine
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub locale: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// Raw callbacks from a synthesis engine
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Finished { id: u64 },
    Failed { id: u64, error: String },
}

/// A platform speech-synthesis facility
pub trait SynthesisEngine: Send {
    /// Whether the synthesizer can produce speech at all
    fn is_available(&self) -> bool;

    /// Start speaking, reporting completion on `events`
    fn speak(
        &mut self,
        utterance: Utterance,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> Result<(), EngineError>;

    /// Cancel whatever is currently being spoken
    fn cancel(&mut self);
}

/// Events surfaced by the playback adapter
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Finished { utterance: u64 },
    Failed { utterance: u64, error: String },
}

/// Errors starting playback
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("speech synthesis is not available")]
    Unavailable,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Wraps a synthesis engine with last-writer-wins semantics
pub struct SpeechPlayback {
    engine: Option<Box<dyn SynthesisEngine>>,
    locale: String,
    next_id: u64,
    /// Utterance whose completion will be reported
    current: Option<u64>,
    events_tx: mpsc::UnboundedSender<SynthesisEvent>,
    events_rx: mpsc::UnboundedReceiver<SynthesisEvent>,
}

impl SpeechPlayback {
    /// Create an adapter; `None` means the platform has no synthesizer
    pub fn new(engine: Option<Box<dyn SynthesisEngine>>, locale: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            locale: locale.into(),
            next_id: 1,
            current: None,
            events_tx,
            events_rx,
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_available())
    }

    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Speak `text`, cancelling any utterance in progress
    pub fn speak(&mut self, text: &str) -> Result<u64, PlaybackError> {
        let engine = match self.engine.as_mut() {
            Some(engine) if engine.is_available() => engine,
            _ => return Err(PlaybackError::Unavailable),
        };

        if let Some(previous) = self.current.take() {
            debug!(utterance = previous, "cancelling superseded utterance");
            engine.cancel();
        }

        let id = self.next_id;
        self.next_id += 1;

        let utterance = Utterance {
            id,
            text: text.to_string(),
            locale: self.locale.clone(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        };
        engine.speak(utterance, self.events_tx.clone())?;

        self.current = Some(id);
        debug!(utterance = id, chars = text.len(), "speaking");
        Ok(id)
    }

    /// Stop playback; a no-op when nothing is playing
    pub fn stop(&mut self) {
        if self.current.take().is_none() {
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.cancel();
        }
        debug!("playback stopped");
    }

    /// Wait for the current utterance to finish or fail
    ///
    /// Reports from cancelled or superseded utterances are dropped.
    pub async fn next_event(&mut self) -> PlaybackEvent {
        loop {
            // The adapter holds a sender, so the channel never closes
            let Some(raw) = self.events_rx.recv().await else {
                return std::future::pending().await;
            };

            let id = match &raw {
                SynthesisEvent::Finished { id } | SynthesisEvent::Failed { id, .. } => *id,
            };
            if self.current != Some(id) {
                debug!(utterance = id, "ignoring report for stale utterance");
                continue;
            }
            self.current = None;

            return match raw {
                SynthesisEvent::Finished { id } => PlaybackEvent::Finished { utterance: id },
                SynthesisEvent::Failed { id, error } => {
                    warn!(utterance = id, %error, "speech synthesis error");
                    PlaybackEvent::Failed {
                        utterance: id,
                        error,
                    }
                }
            };
        }
    }
}
