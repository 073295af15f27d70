//! Speech capture adapter
//!
//! Owns at most one recognition session. Raw engine results are folded
//! into interim and final transcripts; a final transcript is surfaced
//! exactly once per utterance.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::EngineError;

/// Settings handed to the engine on every start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// Language tag, e.g. `en-US`
    pub locale: String,
    /// Keep recognizing after the first utterance
    pub continuous: bool,
    /// Report provisional results while the user is speaking
    pub interim_results: bool,
    pub max_alternatives: u32,
}

impl RecognitionSettings {
    /// Single-utterance recognition with interim results
    pub fn single_utterance(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            continuous: false,
            interim_results: true,
            max_alternatives: 1,
        }
    }
}

/// One entry of an engine result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

/// Raw callbacks from a recognition engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognitionEvent {
    /// The engine began listening
    Started,
    /// Results changed; entries before `result_index` are unchanged
    Result {
        #[serde(default)]
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    /// The engine failed
    Error { error: String },
    /// The engine stopped listening
    Ended,
}

/// A platform speech-recognition facility
pub trait RecognitionEngine: Send {
    /// Whether the platform provides recognition at all
    fn is_available(&self) -> bool;

    /// Begin recognizing, reporting callbacks on `events`
    fn start(
        &mut self,
        settings: &RecognitionSettings,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<(), EngineError>;

    /// Stop recognizing
    fn stop(&mut self);
}

/// Events surfaced by the capture adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Started,
    /// Provisional text, superseded by the next event
    Interim(String),
    /// Completed utterance text
    Final(String),
    /// The engine failed; capture is already stopped
    Error(String),
    /// The engine ended the session on its own
    Stopped,
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new capture session began
    Started,
    /// A session was already running and has been stopped instead
    Stopped,
}

/// Errors starting capture
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("speech recognition is not supported")]
    Unsupported,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Wraps a recognition engine with single-session semantics
pub struct SpeechCapture {
    engine: Option<Box<dyn RecognitionEngine>>,
    settings: RecognitionSettings,
    /// Receiver for the current session; replaced on every start
    events: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
    listening: bool,
    /// A final transcript was already surfaced for this session
    finalized: bool,
}

impl SpeechCapture {
    /// Create an adapter; `None` means the platform has no recognizer
    pub fn new(engine: Option<Box<dyn RecognitionEngine>>, settings: RecognitionSettings) -> Self {
        Self {
            engine,
            settings,
            events: None,
            listening: false,
            finalized: false,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_available())
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Start capture, or stop it if a session is already running
    pub fn start(&mut self) -> Result<StartOutcome, CaptureError> {
        if self.listening {
            self.stop();
            return Ok(StartOutcome::Stopped);
        }

        let engine = match self.engine.as_mut() {
            Some(engine) if engine.is_available() => engine,
            _ => return Err(CaptureError::Unsupported),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        engine.start(&self.settings, tx)?;

        self.events = Some(rx);
        self.listening = true;
        self.finalized = false;
        info!(locale = %self.settings.locale, "speech capture started");
        Ok(StartOutcome::Started)
    }

    /// Stop the current session; a no-op when not listening
    pub fn stop(&mut self) {
        // Dropping the receiver discards whatever the engine still reports
        self.events = None;
        if !self.listening {
            return;
        }
        self.listening = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        info!("speech capture stopped");
    }

    /// Wait for the next capture event; pending while no session is active
    pub async fn next_event(&mut self) -> CaptureEvent {
        loop {
            let Some(rx) = self.events.as_mut() else {
                return std::future::pending().await;
            };

            match rx.recv().await {
                Some(raw) => {
                    if let Some(event) = self.translate(raw) {
                        return event;
                    }
                }
                None => {
                    // Engine dropped its sender without an end callback
                    let was_listening = self.listening;
                    self.release();
                    if was_listening {
                        return CaptureEvent::Stopped;
                    }
                }
            }
        }
    }

    fn translate(&mut self, raw: RecognitionEvent) -> Option<CaptureEvent> {
        match raw {
            RecognitionEvent::Started => {
                debug!("recognition engine started");
                Some(CaptureEvent::Started)
            }
            RecognitionEvent::Result {
                result_index,
                results,
            } => {
                if self.finalized {
                    return None;
                }

                let mut interim = String::new();
                let mut final_text = String::new();
                for result in results.iter().skip(result_index) {
                    if result.is_final {
                        final_text.push_str(&result.transcript);
                    } else {
                        interim.push_str(&result.transcript);
                    }
                }

                let final_text = final_text.trim();
                if !final_text.is_empty() {
                    self.finalized = true;
                    debug!(transcript = %final_text, "final transcript");
                    Some(CaptureEvent::Final(final_text.to_string()))
                } else if !interim.is_empty() {
                    Some(CaptureEvent::Interim(interim))
                } else {
                    None
                }
            }
            RecognitionEvent::Error { error } => {
                warn!(%error, "speech recognition error");
                self.release();
                Some(CaptureEvent::Error(error))
            }
            RecognitionEvent::Ended => {
                debug!("recognition engine ended");
                self.release();
                Some(CaptureEvent::Stopped)
            }
        }
    }

    /// The engine ended the session itself; release it all the same
    fn release(&mut self) {
        self.events = None;
        if !self.listening {
            return;
        }
        self.listening = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        debug!("speech capture released");
    }
}
