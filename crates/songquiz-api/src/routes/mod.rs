//! Route modules.

pub mod health;
pub mod media;
pub mod players;
pub mod rooms;
pub mod stats;
