//! Render orchestration for the single live preview surface.
//!
//! Every trigger takes the next render version before its first suspension
//! point. A finished pass publishes only if, under the state lock, the surface
//! it was started for is still alive and bound to the same document and no
//! newer version has been issued. Anything else is a superseded pass: its
//! output is dropped and nothing is logged as a failure.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    context::{ContextCache, Document, DocumentId, Workspace},
    lock::{mutex_lock, rw_read, rw_write},
    sanitize::sanitize_body,
    surface::{PageStyle, PreviewFrame, PreviewSurface, SurfaceError, SurfaceHost, render_page},
};
use crate::application::{
    language::resolve_supported_language,
    render::{EngineInput, MarkupEngine, MathBackend, MathRenderer, RenderPass},
};

const SOURCE: &str = "application::preview::controller";

pub const RENDER_TOTAL: &str = "altsia_preview_render_total";
pub const RENDER_PUBLISHED_TOTAL: &str = "altsia_preview_render_published_total";
pub const RENDER_SUPERSEDED_TOTAL: &str = "altsia_preview_render_superseded_total";
pub const RENDER_FAILED_TOTAL: &str = "altsia_preview_render_failed_total";
pub const RENDER_DURATION_MS: &str = "altsia_preview_render_ms";

/// Handle of a spawned render pass.
pub type RenderTask = JoinHandle<RenderOutcome>;

/// How a render pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The frame reached the surface.
    Published,
    /// The engine failed; an error banner over the last good body was published.
    Degraded,
    /// A newer trigger, a rebind or a close overtook this pass.
    Superseded,
    /// The context snapshot could not be collected; the surface was left alone.
    ContextFailed,
    /// The surface refused the frame.
    Failed,
    /// No preview is bound to the document.
    Unbound,
}

/// Static options of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOptions {
    /// File extension, without the dot, of documents that can be previewed.
    pub extension: String,
    pub style: PageStyle,
    pub display_language: String,
}

struct Binding {
    surface: Arc<dyn PreviewSurface>,
    document: Document,
    last_body: Option<String>,
}

impl Binding {
    /// The three-part publish guard.
    fn accepts(&self, surface_id: Uuid, document: &DocumentId) -> bool {
        self.surface.id() == surface_id
            && !self.surface.is_disposed()
            && self.document.id() == *document
    }
}

enum ControllerState {
    NoPanel,
    Bound(Binding),
}

struct Inner {
    engine: Arc<dyn MarkupEngine>,
    math: Arc<dyn MathBackend>,
    host: Arc<dyn SurfaceHost>,
    context: ContextCache,
    extension: String,
    style: PageStyle,
    display_language: RwLock<String>,
    state: Mutex<ControllerState>,
    version: AtomicU64,
}

/// Owns the preview binding and sequences renders against it.
#[derive(Clone)]
pub struct PreviewController {
    inner: Arc<Inner>,
}

impl PreviewController {
    pub fn new(
        engine: Arc<dyn MarkupEngine>,
        math: Arc<dyn MathBackend>,
        host: Arc<dyn SurfaceHost>,
        workspace: Arc<dyn Workspace>,
        options: PreviewOptions,
    ) -> Self {
        let context = ContextCache::new(workspace, options.extension.clone());
        Self {
            inner: Arc::new(Inner {
                engine,
                math,
                host,
                context,
                extension: options.extension,
                style: options.style,
                display_language: RwLock::new(resolve_supported_language(
                    &options.display_language,
                )),
                state: Mutex::new(ControllerState::NoPanel),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Latest issued render version.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> &ContextCache {
        &self.inner.context
    }

    /// Whether `document` is a kind this controller previews.
    pub fn qualifies(&self, document: &Document) -> bool {
        document
            .uri
            .path()
            .strip_suffix(self.inner.extension.as_str())
            .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
    }

    /// The document the surface currently tracks.
    pub fn bound_document(&self) -> Option<DocumentId> {
        match &*mutex_lock(&self.inner.state, SOURCE, "bound_document") {
            ControllerState::Bound(binding) => Some(binding.document.id()),
            ControllerState::NoPanel => None,
        }
    }

    pub fn surface_id(&self) -> Option<Uuid> {
        match &*mutex_lock(&self.inner.state, SOURCE, "surface_id") {
            ControllerState::Bound(binding) => Some(binding.surface.id()),
            ControllerState::NoPanel => None,
        }
    }

    pub fn display_language(&self) -> String {
        self.inner.display_language()
    }

    /// Explicit "open preview".
    ///
    /// With no panel, binds a new surface to `active` and starts a render.
    /// With a panel already open, only brings it to the front.
    pub fn open_preview(
        &self,
        active: Option<Document>,
    ) -> Result<Option<RenderTask>, SurfaceError> {
        let document = {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "open_preview");
            if let ControllerState::Bound(binding) = &*state {
                binding.surface.reveal();
                return Ok(None);
            }

            let Some(document) = active.filter(|document| self.qualifies(document)) else {
                return Ok(None);
            };

            let surface = self.inner.host.create_surface(&title_for(&document))?;
            info!(
                target = SOURCE,
                surface = %surface.id(),
                document = %document.id(),
                "Preview opened"
            );
            *state = ControllerState::Bound(Binding {
                surface,
                document: document.clone(),
                last_body: None,
            });
            document
        };

        Ok(Some(self.trigger(document)))
    }

    /// Content of a document changed; re-render when it is the bound one.
    pub fn handle_document_change(&self, document: Document) -> Option<RenderTask> {
        {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "handle_document_change");
            let ControllerState::Bound(binding) = &mut *state else {
                return None;
            };
            if binding.document.id() != document.id() {
                return None;
            }
            binding.document = document.clone();
        }
        Some(self.trigger(document))
    }

    /// The active editor switched; rebind when it shows another qualifying document.
    pub fn handle_active_editor_change(&self, active: Option<Document>) -> Option<RenderTask> {
        let document = active.filter(|document| self.qualifies(document))?;
        {
            let mut state =
                mutex_lock(&self.inner.state, SOURCE, "handle_active_editor_change");
            let ControllerState::Bound(binding) = &mut *state else {
                return None;
            };
            if binding.document.id() == document.id() {
                return None;
            }
            debug!(
                target = SOURCE,
                from = %binding.document.id(),
                to = %document.id(),
                "Preview rebound"
            );
            binding.surface.set_title(&title_for(&document));
            binding.document = document.clone();
            binding.last_body = None;
        }
        Some(self.trigger(document))
    }

    /// The user closed surface `surface_id`. Returns whether it was the bound one.
    pub fn handle_surface_closed(&self, surface_id: Uuid) -> bool {
        let mut state = mutex_lock(&self.inner.state, SOURCE, "handle_surface_closed");
        let closes_bound = matches!(
            &*state,
            ControllerState::Bound(binding) if binding.surface.id() == surface_id
        );
        if closes_bound {
            *state = ControllerState::NoPanel;
            self.inner.context.invalidate();
            info!(target = SOURCE, surface = %surface_id, "Preview closed");
        }
        closes_bound
    }

    /// Re-render the bound document as last seen.
    pub fn refresh(&self) -> Option<RenderTask> {
        let document = match &*mutex_lock(&self.inner.state, SOURCE, "refresh") {
            ControllerState::Bound(binding) => binding.document.clone(),
            ControllerState::NoPanel => return None,
        };
        Some(self.trigger(document))
    }

    /// Switch the language handed to the engine and refresh the preview.
    pub fn set_display_language(&self, value: &str) -> Option<RenderTask> {
        let resolved = resolve_supported_language(value);
        {
            let mut language =
                rw_write(&self.inner.display_language, SOURCE, "set_display_language");
            if *language == resolved {
                return None;
            }
            *language = resolved;
        }
        self.refresh()
    }

    /// Spawn a render pass for `document` on the current runtime.
    pub fn trigger(&self, document: Document) -> RenderTask {
        tokio::spawn(self.render(document))
    }

    /// The render trigger procedure.
    ///
    /// The version is taken when this is called, not when the returned future
    /// is first polled, so triggers are ordered by call order.
    pub fn render(&self, document: Document) -> impl Future<Output = RenderOutcome> + Send + 'static {
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        counter!(RENDER_TOTAL).increment(1);
        let inner = Arc::clone(&self.inner);
        async move { inner.run_pass(document, version).await }
    }
}

impl Inner {
    fn display_language(&self) -> String {
        rw_read(&self.display_language, SOURCE, "display_language").clone()
    }

    fn is_current(&self, version: u64) -> bool {
        self.version.load(Ordering::SeqCst) == version
    }

    /// Surface the pass is computed for, if `document` is bound.
    fn bound_surface(&self, document: &DocumentId) -> Option<Uuid> {
        match &*mutex_lock(&self.state, SOURCE, "bound_surface") {
            ControllerState::Bound(binding) if binding.accepts(binding.surface.id(), document) => {
                Some(binding.surface.id())
            }
            _ => None,
        }
    }

    fn still_valid(&self, version: u64, surface_id: Uuid, document: &DocumentId) -> bool {
        self.is_current(version)
            && match &*mutex_lock(&self.state, SOURCE, "still_valid") {
                ControllerState::Bound(binding) => binding.accepts(surface_id, document),
                ControllerState::NoPanel => false,
            }
    }

    fn superseded(&self, version: u64, document: &DocumentId, stage: &'static str) -> RenderOutcome {
        counter!(RENDER_SUPERSEDED_TOTAL).increment(1);
        debug!(
            target = SOURCE,
            version,
            latest = self.version.load(Ordering::SeqCst),
            document = %document,
            stage,
            "Render pass superseded"
        );
        RenderOutcome::Superseded
    }

    async fn run_pass(&self, document: Document, version: u64) -> RenderOutcome {
        let id = document.id();
        let Some(surface_id) = self.bound_surface(&id) else {
            debug!(target = SOURCE, version, document = %id, "Render skipped, no preview bound");
            return RenderOutcome::Unbound;
        };

        let started = Instant::now();
        let mut pass = RenderPass::new(
            MathRenderer::new(Arc::clone(&self.math)),
            document.uri.clone(),
        );

        let snapshot = match self.context.get(&document).await {
            Ok(snapshot) => snapshot,
            Err(_) if !self.still_valid(version, surface_id, &id) => {
                return self.superseded(version, &id, "context");
            }
            Err(err) => {
                counter!(RENDER_FAILED_TOTAL).increment(1);
                warn!(
                    target = SOURCE,
                    version,
                    document = %id,
                    error = %err,
                    "Context collection failed, keeping previous preview"
                );
                return RenderOutcome::ContextFailed;
            }
        };

        if !self.still_valid(version, surface_id, &id) {
            return self.superseded(version, &id, "context");
        }

        let language = self.display_language();
        let input = EngineInput {
            source: &document.text,
            snapshot: &snapshot,
            display_language: &language,
        };
        let result = self.engine.render(input, &mut pass).await;
        let word_count = pass.visited_len();

        let mut state = mutex_lock(&self.state, SOURCE, "publish");
        let binding = match &mut *state {
            ControllerState::Bound(binding)
                if self.is_current(version) && binding.accepts(surface_id, &id) =>
            {
                binding
            }
            _ => return self.superseded(version, &id, "publish"),
        };

        let (body, error, outcome) = match result {
            Ok(html) => {
                let body = sanitize_body(&html);
                binding.last_body = Some(body.clone());
                (body, None, RenderOutcome::Published)
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    version,
                    document = %id,
                    error = %err,
                    "Render failed, showing last good preview"
                );
                (
                    binding.last_body.clone().unwrap_or_default(),
                    Some(err.to_string()),
                    RenderOutcome::Degraded,
                )
            }
        };

        let title = title_for(&binding.document);
        let published = render_page(&self.style, &language, &title, &body, error.as_deref())
            .and_then(|html| {
                binding.surface.publish(PreviewFrame {
                    title,
                    html,
                    word_count,
                })
            });

        match published {
            Ok(()) if outcome == RenderOutcome::Published => {
                counter!(RENDER_PUBLISHED_TOTAL).increment(1);
                histogram!(RENDER_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
                debug!(target = SOURCE, version, document = %id, word_count, "Preview published");
                outcome
            }
            Ok(()) => {
                counter!(RENDER_FAILED_TOTAL).increment(1);
                outcome
            }
            Err(err) => {
                counter!(RENDER_FAILED_TOTAL).increment(1);
                warn!(
                    target = SOURCE,
                    version,
                    document = %id,
                    error = %err,
                    "Preview surface rejected frame"
                );
                RenderOutcome::Failed
            }
        }
    }
}

fn title_for(document: &Document) -> String {
    format!("Preview {}", document.file_name())
}
