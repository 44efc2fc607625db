//! Domain layer: rounds, the session state machine, commands and events.

pub mod commands;
pub mod events;
pub mod round;
pub mod session;
