//! In-memory conversation log for the current session

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::dispatch::ProductResult;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ProductResult>,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

/// Ordered user and assistant turns
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    next_id: u64,
}

impl Conversation {
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Speaker::User, text.into(), Vec::new());
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, results: Vec<ProductResult>) {
        self.push(Speaker::Assistant, text.into(), results);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn push(&mut self, speaker: Speaker, text: String, results: Vec<ProductResult>) {
        self.next_id += 1;
        self.turns.push(Turn {
            id: self.next_id,
            speaker,
            text,
            results,
            timestamp_ms: now_ms(),
        });
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
