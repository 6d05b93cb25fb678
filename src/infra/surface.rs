//! Preview surface that keeps the latest frame and optionally mirrors it to a file.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, info};
use uuid::Uuid;

use crate::application::preview::{PreviewFrame, PreviewSurface, SurfaceError, SurfaceHost};

const SOURCE: &str = "infra::surface";

#[derive(Debug, Default)]
struct SurfaceState {
    title: String,
    latest: Option<PreviewFrame>,
    published: usize,
}

#[derive(Debug)]
pub struct FileSurface {
    id: Uuid,
    output: Option<PathBuf>,
    state: Mutex<SurfaceState>,
    disposed: AtomicBool,
}

impl FileSurface {
    pub fn new(title: &str, output: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            output,
            state: Mutex::new(SurfaceState {
                title: title.to_string(),
                ..Default::default()
            }),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    pub fn latest(&self) -> Option<PreviewFrame> {
        self.lock().latest.clone()
    }

    pub fn published_count(&self) -> usize {
        self.lock().published
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Replace `path` in one step so readers never see a half-written page.
fn write_page(path: &Path, html: &str) -> std::io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".partial");
    let staging = PathBuf::from(staging);
    fs::write(&staging, html)?;
    fs::rename(&staging, path)
}

impl PreviewSurface for FileSurface {
    fn id(&self) -> Uuid {
        self.id
    }

    fn reveal(&self) {
        debug!(target = SOURCE, surface = %self.id, "Surface revealed");
    }

    fn set_title(&self, title: &str) {
        self.lock().title = title.to_string();
    }

    fn publish(&self, frame: PreviewFrame) -> Result<(), SurfaceError> {
        if self.is_disposed() {
            return Err(SurfaceError::publish("surface has been disposed"));
        }

        if let Some(path) = self.output.as_deref() {
            write_page(path, &frame.html).map_err(|err| {
                SurfaceError::publish(format!("failed to write `{}`: {err}", path.display()))
            })?;
            info!(
                target = SOURCE,
                path = %path.display(),
                status = %frame.status_text(),
                "Preview written"
            );
        }

        let mut state = self.lock();
        state.title = frame.title.clone();
        state.latest = Some(frame);
        state.published += 1;
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Creates [`FileSurface`]s that all mirror to the same output path.
#[derive(Debug, Default)]
pub struct FileSurfaceHost {
    output: Option<PathBuf>,
    current: Mutex<Option<Arc<FileSurface>>>,
}

impl FileSurfaceHost {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            current: Mutex::new(None),
        }
    }

    /// The most recently created surface.
    pub fn surface(&self) -> Option<Arc<FileSurface>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SurfaceHost for FileSurfaceHost {
    fn create_surface(&self, title: &str) -> Result<Arc<dyn PreviewSurface>, SurfaceError> {
        if let Some(parent) = self.output.as_deref().and_then(Path::parent)
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            return Err(SurfaceError::create(format!(
                "output directory `{}` does not exist",
                parent.display()
            )));
        }

        let surface = Arc::new(FileSurface::new(title, self.output.clone()));
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&surface));
        Ok(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(html: &str) -> PreviewFrame {
        PreviewFrame {
            title: "Preview a.alt".into(),
            html: html.into(),
            word_count: 3,
        }
    }

    #[test]
    fn publishes_to_file_and_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("preview.html");
        let host = FileSurfaceHost::new(Some(path.clone()));

        let surface = host.create_surface("Preview a.alt").expect("surface");
        surface.publish(frame("<p>one</p>")).expect("publish");
        surface.publish(frame("<p>two</p>")).expect("publish");

        assert_eq!(fs::read_to_string(&path).expect("read"), "<p>two</p>");
        let concrete = host.surface().expect("tracked");
        assert_eq!(concrete.published_count(), 2);
        assert_eq!(concrete.latest().map(|f| f.word_count), Some(3));
        assert!(!dir.path().join("preview.html.partial").exists());
    }

    #[test]
    fn disposed_surfaces_reject_frames() {
        let host = FileSurfaceHost::new(None);
        host.create_surface("t").expect("surface");
        let surface = host.surface().expect("tracked");
        surface.dispose();
        assert!(surface.is_disposed());
        assert!(surface.publish(frame("x")).is_err());
    }

    #[test]
    fn missing_output_directory_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = FileSurfaceHost::new(Some(dir.path().join("nope/preview.html")));
        assert!(matches!(
            host.create_surface("t"),
            Err(SurfaceError::Create { .. })
        ));
    }

    #[test]
    fn titles_follow_updates() {
        let surface = FileSurface::new("Preview a.alt", None);
        surface.set_title("Preview b.alt");
        assert_eq!(surface.title(), "Preview b.alt");
    }
}
