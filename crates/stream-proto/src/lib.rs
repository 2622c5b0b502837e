//! Shared types for the stream control daemon and its panel.

pub mod config;
pub mod destination;
pub mod phase;
pub mod platform;
pub mod protocol;
pub mod state;
