//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod surface;
pub mod telemetry;
pub mod workspace;
