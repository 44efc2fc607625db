//! Song Quiz Core — shared domain abstractions.
//!
//! This crate defines the identifiers, error taxonomy, room options and the
//! collaborator ports that the scoring and session crates depend on. It
//! contains no infrastructure code.

pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod ids;
pub mod options;
pub mod ports;
pub mod rng;
