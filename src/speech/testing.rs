//! Scriptable engines for tests

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{
    EngineError, RecognitionEngine, RecognitionEvent, RecognitionSettings, SynthesisEngine,
    SynthesisEvent, Utterance,
};

#[derive(Default)]
struct RecognizerState {
    unavailable: bool,
    fail_start: bool,
    sender: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    settings: Option<RecognitionSettings>,
    starts: usize,
    stops: usize,
}

/// Recognizer whose callbacks are driven by the test
#[derive(Clone, Default)]
pub struct FakeRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().unavailable = true;
        fake
    }

    pub fn failing_start() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().fail_start = true;
        fake
    }

    /// Deliver a callback to the active session
    pub fn emit(&self, event: RecognitionEvent) {
        if let Some(tx) = &self.state.lock().unwrap().sender {
            let _ = tx.send(event);
        }
    }

    pub fn sender(&self) -> Option<mpsc::UnboundedSender<RecognitionEvent>> {
        self.state.lock().unwrap().sender.clone()
    }

    pub fn last_settings(&self) -> Option<RecognitionSettings> {
        self.state.lock().unwrap().settings.clone()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().sender.is_some()
    }
}

impl RecognitionEngine for FakeRecognizer {
    fn is_available(&self) -> bool {
        !self.state.lock().unwrap().unavailable
    }

    fn start(
        &mut self,
        settings: &RecognitionSettings,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(EngineError::Failed("microphone busy".to_string()));
        }
        state.starts += 1;
        state.settings = Some(settings.clone());
        state.sender = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.sender = None;
    }
}

#[derive(Default)]
struct SynthesizerState {
    unavailable: bool,
    sender: Option<mpsc::UnboundedSender<SynthesisEvent>>,
    spoken: Vec<Utterance>,
    cancels: usize,
    speaking: bool,
}

/// Synthesizer whose completions are driven by the test
#[derive(Clone, Default)]
pub struct FakeSynthesizer {
    state: Arc<Mutex<SynthesizerState>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A synthesizer whose program is missing
    pub fn unavailable() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().unavailable = true;
        fake
    }

    pub fn finish(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.speaking = false;
        if let Some(tx) = &state.sender {
            let _ = tx.send(SynthesisEvent::Finished { id });
        }
    }

    pub fn fail(&self, id: u64, error: &str) {
        let mut state = self.state.lock().unwrap();
        state.speaking = false;
        if let Some(tx) = &state.sender {
            let _ = tx.send(SynthesisEvent::Failed {
                id,
                error: error.to_string(),
            });
        }
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.state.lock().unwrap().spoken.clone()
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().unwrap().cancels
    }

    /// Whether the engine believes it is producing audio
    pub fn is_speaking(&self) -> bool {
        self.state.lock().unwrap().speaking
    }
}

impl SynthesisEngine for FakeSynthesizer {
    fn is_available(&self) -> bool {
        !self.state.lock().unwrap().unavailable
    }

    fn speak(
        &mut self,
        utterance: Utterance,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.sender = Some(events);
        state.spoken.push(utterance);
        state.speaking = true;
        Ok(())
    }

    fn cancel(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.cancels += 1;
        state.speaking = false;
    }
}
