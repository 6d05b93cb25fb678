//! Rendering primitives for the preview.
//!
//! Everything here is synchronous and free of shared state: segmentation is a
//! pure function, and the macro table and visited-length counter live inside a
//! per-pass [`RenderPass`] rather than in process-wide globals.

mod engine;
mod math;
mod rewrite;
mod segment;

pub use engine::{
    Capabilities, CapabilityError, ComrakEngine, ContextSnapshot, EngineError, EngineInput,
    MarkupEngine, RenderPass, SnapshotDocument,
};
pub use math::{KatexBackend, MacroTable, MathBackend, MathError, MathRenderer};
pub use rewrite::TextRewriter;
pub use segment::{Delimiter, DelimiterSet, Span, segment};
