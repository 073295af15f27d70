//! Events module for voice session transitions
//!
//! Structured events broadcast by the session coordinator to UI hosts:
//! state changes, transcripts, replies and user-visible notices.

use serde::{Deserialize, Serialize};

use crate::dispatch::ProductResult;
use crate::session::SessionState;
use crate::speech::RecognitionSettings;

/// Category of a user-visible failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The platform lacks speech recognition
    Unsupported,
    /// Capture failed mid-session
    Recognition,
    /// The assistant query failed
    Dispatch,
    /// Speech output failed; never surfaced as a notice
    Synthesis,
}

impl ErrorKind {
    /// Message shown to the user for this kind of failure
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Unsupported => "Speech recognition is not supported on this device",
            ErrorKind::Recognition => "Speech recognition failed. Please try again.",
            ErrorKind::Dispatch => "Failed to get AI response",
            ErrorKind::Synthesis => "Speech playback failed",
        }
    }
}

/// Events emitted by the session coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session state changed
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Provisional transcript; replaces the previous one
    InterimTranscript { text: String },

    /// Completed transcript about to be dispatched
    FinalTranscript { text: String },

    /// Assistant reply with matching products
    Reply {
        text: String,
        results: Vec<ProductResult>,
    },

    /// Transient user-visible notification
    Notice { kind: ErrorKind, message: String },

    /// The bridge recognizer wants the UI host to start listening
    CaptureRequested { settings: RecognitionSettings },

    /// The bridge recognizer wants the UI host to stop listening
    CaptureReleased,
}

impl SessionEvent {
    /// Notice carrying the standard message for `kind`
    pub fn notice(kind: ErrorKind) -> Self {
        SessionEvent::Notice {
            kind,
            message: kind.user_message().to_string(),
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { from, to } => {
                write!(f, "STATE_CHANGED ({} -> {})", from, to)
            }
            SessionEvent::InterimTranscript { text } => write!(f, "INTERIM ({} chars)", text.len()),
            SessionEvent::FinalTranscript { text } => write!(f, "FINAL ({} chars)", text.len()),
            SessionEvent::Reply { results, .. } => write!(f, "REPLY ({} results)", results.len()),
            SessionEvent::Notice { kind, .. } => write!(f, "NOTICE ({:?})", kind),
            SessionEvent::CaptureRequested { .. } => write!(f, "CAPTURE_REQUESTED"),
            SessionEvent::CaptureReleased => write!(f, "CAPTURE_RELEASED"),
        }
    }
}
