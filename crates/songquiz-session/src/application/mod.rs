//! Application layer: the session registry, the room-options cache and the
//! async command and query handlers.

pub mod command_handlers;
pub mod options;
pub mod query_handlers;
pub mod registry;
