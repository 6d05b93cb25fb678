use std::{fs, path::Path, sync::Arc};

use altsia_preview::{
    application::{
        preview::{Document, PageStyle, PreviewController, PreviewOptions, RenderOutcome},
        render::{ComrakEngine, KatexBackend},
    },
    infra::{surface::FileSurfaceHost, workspace::FsWorkspace},
};
use tempfile::TempDir;
use url::Url;

struct Pipeline {
    dir: TempDir,
    controller: PreviewController,
    host: Arc<FileSurfaceHost>,
}

impl Pipeline {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, text) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(path, text).expect("write fixture");
        }

        let workspace = Arc::new(FsWorkspace::new([dir.path().to_path_buf()]).expect("workspace"));
        let host = Arc::new(FileSurfaceHost::new(Some(dir.path().join("preview.html"))));
        let controller = PreviewController::new(
            Arc::new(ComrakEngine),
            Arc::new(KatexBackend),
            host.clone(),
            workspace,
            PreviewOptions {
                extension: "alt".into(),
                style: PageStyle {
                    stylesheet_href: "katex/katex.min.css".into(),
                    font_size: 16,
                },
                display_language: "en".into(),
            },
        );

        Self {
            dir,
            controller,
            host,
        }
    }

    fn document(&self, name: &str, text: &str) -> Document {
        let path = self.dir.path().canonicalize().expect("canonical").join(name);
        Document::new(Url::from_file_path(path).expect("file url"), text)
    }

    fn page(&self) -> String {
        fs::read_to_string(self.dir.path().join("preview.html")).expect("preview written")
    }

    fn published(&self) -> usize {
        self.host.surface().map_or(0, |surface| surface.published_count())
    }
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).expect("write");
}

#[tokio::test]
async fn renders_markup_and_math_to_the_output_file() {
    let source = "# Notes\n\nEuler: $e^{i\\pi}+1=0$\n\n$$\\int_0^1 x dx$$\n";
    let pipeline = Pipeline::new(&[("a.alt", source), ("b.alt", "sibling")]);

    let outcome = pipeline
        .controller
        .open_preview(Some(pipeline.document("a.alt", source)))
        .expect("open")
        .expect("render task")
        .await
        .expect("join");
    assert_eq!(outcome, RenderOutcome::Published);

    let page = pipeline.page();
    assert!(page.contains("<h1>Notes</h1>"));
    assert!(page.contains(r#"<link rel="stylesheet" href="katex/katex.min.css">"#));
    assert!(page.contains("font-size: 16px"));
    assert!(page.contains("katex-display"));
    assert!(!page.contains("<script"));

    let frame = pipeline
        .host
        .surface()
        .and_then(|surface| surface.latest())
        .expect("frame");
    assert_eq!(frame.title, "Preview a.alt");
    // Every text run counts in full, math source included.
    let runs = ["Notes", "Euler: $e^{i\\pi}+1=0$", "$$\\int_0^1 x dx$$"];
    assert_eq!(
        frame.word_count,
        runs.iter().map(|run| run.encode_utf16().count()).sum::<usize>()
    );
    assert_eq!(frame.status_text(), "43 words");
}

#[tokio::test]
async fn mixed_runs_are_segmented_and_counted_whole() {
    let source = "x ${a}^{2}$ y $$b$$ z\n";
    let pipeline = Pipeline::new(&[("a.alt", source)]);

    let outcome = pipeline
        .controller
        .open_preview(Some(pipeline.document("a.alt", source)))
        .expect("open")
        .expect("task")
        .await
        .expect("join");
    assert_eq!(outcome, RenderOutcome::Published);

    let page = pipeline.page();
    assert!(page.contains("<p>x <span class=\"katex\">"));
    assert!(page.contains("katex-display"));
    assert!(!page.contains("${a}"));

    let frame = pipeline
        .host
        .surface()
        .and_then(|surface| surface.latest())
        .expect("frame");
    assert_eq!(frame.word_count, "x ${a}^{2}$ y $$b$$ z".len());
}

#[tokio::test]
async fn macros_live_exactly_one_pass() {
    let defining = "$\\gdef\\Foo{\\mathbb{F}}$ so $x \\in \\Foo$\n";
    let pipeline = Pipeline::new(&[("a.alt", defining)]);

    let outcome = pipeline
        .controller
        .open_preview(Some(pipeline.document("a.alt", defining)))
        .expect("open")
        .expect("task")
        .await
        .expect("join");
    assert_eq!(outcome, RenderOutcome::Published);

    // The next pass starts with an empty table, so the bare use fails and the
    // previous body stays visible under an error banner.
    let outcome = pipeline
        .controller
        .handle_document_change(pipeline.document("a.alt", "only $x \\in \\Foo$\n"))
        .expect("task")
        .await
        .expect("join");
    assert_eq!(outcome, RenderOutcome::Degraded);

    let page = pipeline.page();
    assert!(page.contains("preview-error"));
    assert!(page.contains("so "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_edits_ends_on_the_last_one() {
    let pipeline = Pipeline::new(&[("a.alt", "start")]);
    pipeline
        .controller
        .open_preview(Some(pipeline.document("a.alt", "start")))
        .expect("open")
        .expect("task")
        .await
        .expect("join");

    let tasks: Vec<_> = (1..=8)
        .map(|edit| {
            pipeline
                .controller
                .handle_document_change(pipeline.document("a.alt", &format!("edit {edit} $x_{edit}$")))
                .expect("bound document")
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.expect("join"));
    }

    assert_eq!(outcomes.last(), Some(&RenderOutcome::Published));
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        RenderOutcome::Published | RenderOutcome::Superseded
    )));
    assert!(pipeline.page().contains("edit 8"));
}

#[tokio::test]
async fn context_failure_leaves_the_preview_alone() {
    let pipeline = Pipeline::new(&[("a.alt", "first"), ("b.alt", "second")]);
    pipeline
        .controller
        .open_preview(Some(pipeline.document("a.alt", "first")))
        .expect("open")
        .expect("task")
        .await
        .expect("join");
    assert_eq!(pipeline.published(), 1);

    // An undecodable sibling makes the next context collection fail.
    write(pipeline.dir.path(), "broken.alt", &[0xff, 0xfe, 0xfd]);

    let outcome = pipeline
        .controller
        .handle_active_editor_change(Some(pipeline.document("b.alt", "second")))
        .expect("rebind")
        .await
        .expect("join");
    assert_eq!(outcome, RenderOutcome::ContextFailed);
    assert_eq!(pipeline.published(), 1);
    assert!(pipeline.page().contains("first"));

    // Failed fetches are not cached; fixing the workspace lets the next pass through.
    fs::remove_file(pipeline.dir.path().join("broken.alt")).expect("remove");
    let outcome = pipeline
        .controller
        .refresh()
        .expect("bound")
        .await
        .expect("join");
    assert_eq!(outcome, RenderOutcome::Published);
    assert!(pipeline.page().contains("second"));
}
