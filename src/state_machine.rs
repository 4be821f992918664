//! Conversation loop state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! [`transition`] never performs I/O, it only says which [`Effect`]s the
//! executor must run next.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, StreamEvent};
pub use event::LoopEvent;
pub use state::{LoopContext, LoopOutcome, LoopState};
pub use transition::{start, transition};
