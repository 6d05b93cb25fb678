//! Live preview core for Altsia documents.
//!
//! The crate splits into three layers, mirroring how the binary wires them:
//!
//! - [`application`]: pure rendering (math segmentation, KaTeX adapter, text rewriting)
//!   and the preview orchestration that serialises overlapping render requests.
//! - [`infra`]: filesystem workspace, file-backed preview surface and telemetry.
//! - [`config`]: layered settings and the command-line interface.

pub mod application;
pub mod config;
pub mod infra;
