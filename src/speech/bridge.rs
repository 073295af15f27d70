//! Recognition bridged to the connected UI host
//!
//! The storefront front-end owns the microphone and its platform
//! recognizer. Starting capture broadcasts a `capture_requested` event;
//! the host relays recognizer callbacks back over IPC, and the
//! [`BridgeHandle`] feeds them into the active session.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{EngineError, RecognitionEngine, RecognitionEvent, RecognitionSettings};
use crate::events::SessionEvent;

type Slot = Arc<Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>>;

/// Delivers host recognition callbacks to the active capture session
#[derive(Clone, Default)]
pub struct BridgeHandle {
    slot: Slot,
}

impl BridgeHandle {
    /// Forward a callback; returns false when no capture is active
    pub fn deliver(&self, event: RecognitionEvent) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

/// Recognition engine backed by the UI host
pub struct BridgeRecognizer {
    handle: BridgeHandle,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl BridgeRecognizer {
    pub fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            handle: BridgeHandle::default(),
            event_tx,
        }
    }

    /// Handle the IPC server uses to deliver host callbacks
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }
}

impl RecognitionEngine for BridgeRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn start(
        &mut self,
        settings: &RecognitionSettings,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<(), EngineError> {
        *self
            .handle
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(events);

        debug!("requesting capture from UI host");
        let _ = self.event_tx.send(SessionEvent::CaptureRequested {
            settings: settings.clone(),
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.handle
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        debug!("releasing capture on UI host");
        let _ = self.event_tx.send(SessionEvent::CaptureReleased);
    }
}
