//! Song Quiz — session engine.
//!
//! Runs one game per room: round lifecycle, timeout-driven auto-advance,
//! guess resolution and the session registry shared by all rooms.

pub mod application;
pub mod domain;
