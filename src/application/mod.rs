//! Application layer: rendering primitives and preview orchestration.

pub mod error;
pub mod language;
pub mod preview;
pub mod render;
