//! The SqlSage reasoning loop.
//!
//! [`TurnRunner`] drives one conversational turn at a time: it loads the
//! thread's history, streams model output to the client, executes the
//! tools the model requests and persists every step before showing it.
//! [`TurnEvent`] is the frame vocabulary shared with the HTTP gateway.

pub mod gates;
pub mod turn;
pub mod turn_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use turn::{DEFAULT_SYSTEM_PROMPT, Turn, TurnOptions, TurnPhase, TurnRunner};
pub use turn_event::TurnEvent;
