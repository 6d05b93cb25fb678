//! Preview orchestration: context collection, the surface seam and the
//! controller that serialises overlapping renders against it.

mod context;
mod controller;
mod lock;
mod sanitize;
mod surface;

pub use context::{ContextCache, ContextError, Document, DocumentId, Workspace, collect_documents};
pub use controller::{
    PreviewController, PreviewOptions, RENDER_DURATION_MS, RENDER_FAILED_TOTAL, RENDER_PUBLISHED_TOTAL,
    RENDER_SUPERSEDED_TOTAL, RENDER_TOTAL, RenderOutcome, RenderTask,
};
pub use sanitize::sanitize_body;
pub use surface::{
    PageStyle, PreviewFrame, PreviewSurface, SurfaceError, SurfaceHost, render_page,
};
