//! Voice session module
//!
//! Provides the session coordinator, an explicit state machine with four
//! states:
//! - Idle: nothing captured, nothing playing
//! - Listening: a capture session is running
//! - Dispatching: a query is awaiting the assistant's reply
//! - Speaking: the reply is being played back

mod conversation;
mod machine;

pub use conversation::Turn;
pub use machine::{Coordinator, DispatchOptions, SessionCommand, SessionSnapshot, SessionState};
