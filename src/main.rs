use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use altsia_preview::{
    application::{
        error::AppError,
        language::display_label,
        preview::{
            Document, PageStyle, PreviewController, PreviewOptions, RenderOutcome,
            collect_documents,
        },
        render::{ComrakEngine, KatexBackend},
    },
    config::{self, RenderArgs, Settings, WatchArgs},
    infra::{error::InfraError, surface::FileSurfaceHost, telemetry, workspace::FsWorkspace},
};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(source = report.source, error = %report.summary(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, error = %report.summary(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let file = cli_args.command.file().clone();
    let document = load_document(&file).await?;
    let workspace =
        open_workspace(&file, cli_args.command.workspace().map(PathBuf::as_path)).await?;
    info!(
        target = "altsia_preview::session",
        file = %file.display(),
        workspace = ?workspace.roots(),
        language = %display_label(&settings.preview.display_language),
        "Session starting"
    );

    match cli_args.command {
        config::Command::Render(args) => run_render(settings, args, document, workspace).await,
        config::Command::Watch(args) => run_watch(settings, args, document, workspace).await,
        config::Command::Context(_) => run_context(settings, document, workspace).await,
    }
}

async fn run_render(
    settings: Settings,
    args: RenderArgs,
    document: Document,
    workspace: Arc<FsWorkspace>,
) -> Result<(), AppError> {
    let host = Arc::new(FileSurfaceHost::new(args.output.clone()));
    let controller = build_controller(&settings, workspace, Arc::clone(&host));

    let task = controller
        .open_preview(Some(document))?
        .ok_or_else(|| not_previewable(&args.file, &settings))?;
    let outcome = task
        .await
        .map_err(|err| AppError::unexpected(format!("render task failed: {err}")))?;

    let frame = host.surface().and_then(|surface| surface.latest());
    if args.output.is_none()
        && let Some(frame) = frame.as_ref()
    {
        println!("{}", frame.html);
    }

    match outcome {
        RenderOutcome::Published => {
            info!(
                target = "altsia_preview::render",
                file = %args.file.display(),
                words = frame.map(|frame| frame.word_count).unwrap_or_default(),
                "Render complete"
            );
            Ok(())
        }
        RenderOutcome::Degraded => Err(AppError::unexpected(
            "document rendered with errors; see the banner in the preview",
        )),
        other => Err(AppError::unexpected(format!(
            "render did not publish a preview ({other:?})"
        ))),
    }
}

async fn run_watch(
    settings: Settings,
    args: WatchArgs,
    mut document: Document,
    workspace: Arc<FsWorkspace>,
) -> Result<(), AppError> {
    let host = Arc::new(FileSurfaceHost::new(Some(args.output.clone())));
    let controller = build_controller(&settings, workspace, Arc::clone(&host));

    controller
        .open_preview(Some(document.clone()))?
        .ok_or_else(|| not_previewable(&args.file, &settings))?;

    info!(
        target = "altsia_preview::watch",
        file = %args.file.display(),
        output = %args.output.display(),
        interval_ms = settings.watch.poll_interval.as_millis() as u64,
        "Watching for changes"
    );

    let mut ticker = interval(settings.watch.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => match tokio::fs::read_to_string(&args.file).await {
                Ok(text) if text != document.text => {
                    document.text = text;
                    controller.handle_document_change(document.clone());
                }
                Ok(_) => {}
                Err(err) => warn!(
                    target = "altsia_preview::watch",
                    file = %args.file.display(),
                    error = %err,
                    "Failed to read watched document"
                ),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(InfraError::from)?;
                break;
            }
        }
    }

    if let Some(surface_id) = controller.surface_id() {
        controller.handle_surface_closed(surface_id);
    }
    info!(target = "altsia_preview::watch", "Stopped watching");
    Ok(())
}

async fn run_context(
    settings: Settings,
    document: Document,
    workspace: Arc<FsWorkspace>,
) -> Result<(), AppError> {
    let snapshot =
        collect_documents(workspace.as_ref(), &document, &settings.preview.extension).await?;
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|err| AppError::unexpected(format!("failed to encode snapshot: {err}")))?;
    println!("{json}");
    Ok(())
}

fn build_controller(
    settings: &Settings,
    workspace: Arc<FsWorkspace>,
    host: Arc<FileSurfaceHost>,
) -> PreviewController {
    let preview = &settings.preview;
    PreviewController::new(
        Arc::new(ComrakEngine),
        Arc::new(KatexBackend),
        host,
        workspace,
        PreviewOptions {
            extension: preview.extension.clone(),
            style: PageStyle {
                stylesheet_href: preview.stylesheet_href.clone(),
                font_size: preview.font_size,
            },
            display_language: preview.display_language.clone(),
        },
    )
}

async fn load_document(path: &Path) -> Result<Document, AppError> {
    let absolute = tokio::fs::canonicalize(path)
        .await
        .map_err(InfraError::from)?;
    let text = tokio::fs::read_to_string(&absolute)
        .await
        .map_err(InfraError::from)?;
    let uri = Url::from_file_path(&absolute).map_err(|()| {
        AppError::validation(format!("`{}` is not an absolute path", absolute.display()))
    })?;
    Ok(Document::new(uri, text))
}

async fn open_workspace(file: &Path, folder: Option<&Path>) -> Result<Arc<FsWorkspace>, AppError> {
    let root = match folder {
        Some(folder) => folder.to_path_buf(),
        None => tokio::fs::canonicalize(file)
            .await
            .map_err(InfraError::from)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    Ok(Arc::new(FsWorkspace::new([root])?))
}

fn not_previewable(file: &Path, settings: &Settings) -> AppError {
    AppError::validation(format!(
        "`{}` is not a `.{}` document",
        file.display(),
        settings.preview.extension
    ))
}
